//! Interaction builder (spec §2 "most representative kind", §4.3, §8
//! scenario 3).
//!
//! Input 0 spends the target leaf of an already-funded Taproot contract
//! output; inputs ≥ 1 are plain wallet key-path UTXOs covering the fee.
//! Output layout: epoch-challenge miner reward, optional pass-through
//! outputs, refund.

use bitcoin::secp256k1::Secp256k1;
use bitcoin::taproot::LeafVersion;

use crate::builders::{
    select_utxos_for_target, BuilderConfig, BuilderState, PlannedOutput, TapLeafBinding,
    TransactionDraft, TransactionKind, UtxoReference,
};
use crate::challenge::ChallengeSolution;
use crate::constants::{dust_threshold_for, MINIMUM_AMOUNT_REWARD, SCRIPT_SIGNER_LEAF_VERSION};
use crate::error::{OpnetTxError, Result};
use crate::fee::{converge, InputDimensions};
use crate::keys::signer::SignerCapability;
use crate::keys::ClassicalKeypair;
use crate::network::Network;
use crate::script::features::Feature;
use crate::script::{compile_target_leaf, CompiledTargetLeaf, ScriptCompilerParams};
use crate::signer_orchestrator::{KeyPathJob, SigningOrchestrator};
use crate::state::envelope::{BaseParams, Header, PrecomputedData, TypeSpecificData};
use crate::state::TransactionState;
use crate::taproot::finalizer::finalize_target_leaf_witness;
use crate::taproot::TaprootTree;

/// Caller-supplied parameters for a contract-interaction transaction.
pub struct InteractionParams {
    pub contract_address: String,
    pub compressed_calldata: Vec<u8>,
    pub contract_secret: [u8; 32],
    pub challenge: ChallengeSolution,
    pub priority_fee: u64,
    pub features: Vec<Feature>,
    /// 32 bytes of per-transaction randomness the script signer's keypair
    /// is deterministically derived from (spec invariant 6).
    pub script_signer_seed: [u8; 32],
    pub refund_address: bitcoin::Address,
    pub passthrough_outputs: Vec<PlannedOutput>,
    pub network: Network,
}

pub struct InteractionBuilder<'a> {
    config: BuilderConfig,
    params: InteractionParams,
    tree: TaprootTree,
    compiled_leaf: CompiledTargetLeaf,
    script_signer: ClassicalKeypair,
    wallet_signer: &'a dyn SignerCapability,
    draft: TransactionDraft,
}

impl<'a> InteractionBuilder<'a> {
    /// Compile the target leaf, assemble the Taproot tree, and validate
    /// `target_utxo` actually pays that tree's output script.
    pub fn new(
        config: BuilderConfig,
        params: InteractionParams,
        target_utxo: &UtxoReference,
        wallet_signer: &'a dyn SignerCapability,
    ) -> Result<Self> {
        let secp = Secp256k1::new();
        let script_signer = ClassicalKeypair::from_deterministic_seed(&secp, &params.script_signer_seed)?;
        let main_signer = wallet_signer.x_only_public_key()?;

        let compiled_leaf = compile_target_leaf(&ScriptCompilerParams {
            compressed_calldata: &params.compressed_calldata,
            contract_secret: &params.contract_secret,
            challenge: &params.challenge,
            priority_fee: params.priority_fee,
            features: &params.features,
            main_signer,
            script_signer: script_signer.x_only_public_key(),
            network: params.network,
        })?;
        let lock_leaf = crate::script::lock_leaf::build_lock_leaf(&main_signer);
        let tree = TaprootTree::build(&secp, compiled_leaf.script.clone(), lock_leaf, main_signer)?;

        if target_utxo.script_pubkey != tree.output_script() {
            return Err(OpnetTxError::InvalidContractAddress(
                "target UTXO script-pubkey does not match the computed Taproot tree output"
                    .to_string(),
            ));
        }

        let mut draft = TransactionDraft::new(config.tx_version);
        let tree_depth = 1u8;
        let control_block = tree.target_control_block()?;
        draft.push_input(
            target_utxo.clone(),
            Some(TapLeafBinding {
                leaf_script: compiled_leaf.script.clone(),
                control_block: control_block.serialize(),
                tree_depth,
            }),
        );

        Ok(Self {
            config,
            params,
            tree,
            compiled_leaf,
            script_signer,
            wallet_signer,
            draft,
        })
    }

    pub fn output_address(&self, network: bitcoin::Network) -> bitcoin::Address {
        self.tree.address(network)
    }

    /// Select fee-paying wallet UTXOs, compose outputs, and converge fees
    /// (spec §4.3 `build()`, "Common output layout for interaction kinds").
    pub fn build(&mut self, available_wallet_utxos: &[UtxoReference]) -> Result<()> {
        self.draft.ensure_not_finalized()?;

        let reward_value = self.params.priority_fee.max(MINIMUM_AMOUNT_REWARD);
        let reward_script = self
            .params
            .challenge
            .time_lock_address(self.params.network.to_bitcoin())
            .script_pubkey();

        let mut outputs = vec![PlannedOutput {
            value: reward_value,
            script_pubkey: reward_script.clone(),
        }];
        outputs.extend(self.params.passthrough_outputs.iter().cloned());

        let refund_script = self.params.refund_address.script_pubkey();
        let dust_threshold = dust_threshold_for(refund_script.is_p2tr());
        let non_refund_value: u64 = outputs.iter().map(|o| o.value).sum();

        // Input 0 already funds most of the reward; only select additional
        // wallet UTXOs if input 0's value can't cover outputs + fee.
        let target_utxo_value = self.draft.inputs[0].value;
        let mut selected_wallet_utxos = Vec::new();
        if target_utxo_value < non_refund_value {
            let shortfall = non_refund_value - target_utxo_value;
            let (selected, _total) = select_utxos_for_target(available_wallet_utxos, shortfall)?;
            selected_wallet_utxos = selected;
        }
        for utxo in &selected_wallet_utxos {
            self.draft.push_input(utxo.clone(), None);
        }

        let mut input_dims = vec![InputDimensions::TargetLeaf {
            leaf_script_len: self.compiled_leaf.script.len(),
            tree_depth: 1,
        }];
        input_dims.extend(selected_wallet_utxos.iter().map(|_| InputDimensions::KeyPath));

        let output_lens: Vec<usize> = outputs.iter().map(|o| o.script_pubkey.len()).collect();

        let estimate = converge(
            &input_dims,
            &output_lens,
            self.draft.total_input_value(),
            non_refund_value,
            self.config.fee_rate_sat_per_vb,
            refund_script.len(),
            dust_threshold,
        )?;

        if let Some(change) = estimate.refund_amount {
            outputs.push(PlannedOutput {
                value: change,
                script_pubkey: refund_script,
            });
        }

        self.draft.fee_output_index = estimate.refund_amount.map(|_| outputs.len() - 1);
        self.draft.outputs = outputs;
        self.draft.cached_vsize = Some(estimate.vsize);
        self.draft.state = BuilderState::OutputsComposed;
        Ok(())
    }

    /// Sign input 0 (target leaf, script + wallet signatures) then every
    /// remaining key-path input concurrently (spec §4.5).
    pub async fn sign(&mut self) -> Result<()> {
        self.draft.ensure_not_finalized()?;
        let unsigned = self.draft.unsigned_transaction();
        let prevouts: Vec<bitcoin::TxOut> = self.draft.inputs.iter().map(|u| u.as_txout()).collect();
        let prevouts = bitcoin::sighash::Prevouts::All(&prevouts);
        let mut cache = bitcoin::sighash::SighashCache::new(&unsigned);

        let leaf_version = LeafVersion::from_consensus(SCRIPT_SIGNER_LEAF_VERSION)
            .expect("0xc0 is a valid leaf version");
        let leaf_hash = bitcoin::taproot::TapLeafHash::from_script(
            &self.compiled_leaf.script,
            leaf_version,
        );
        let target_sighash = cache
            .taproot_script_spend_signature_hash(
                0,
                &prevouts,
                leaf_hash,
                bitcoin::sighash::TapSighashType::Default,
            )
            .map_err(OpnetTxError::sighash)?;

        let orchestrator = SigningOrchestrator::new(self.wallet_signer);
        let (script_sig, wallet_sig) =
            orchestrator.sign_target_leaf_input(&self.script_signer, self.wallet_signer, target_sighash)?;

        let control_block = self.tree.target_control_block()?;
        self.draft.witnesses[0] = finalize_target_leaf_witness(
            &self.params.contract_secret,
            &script_sig,
            &wallet_sig,
            &self.compiled_leaf.script,
            &control_block,
            None,
        );

        if self.draft.inputs.len() > 1 {
            let mut sighashes = Vec::with_capacity(self.draft.inputs.len() - 1);
            for index in 1..self.draft.inputs.len() {
                let sighash = cache
                    .taproot_key_spend_signature_hash(
                        index,
                        &prevouts,
                        bitcoin::sighash::TapSighashType::Default,
                    )
                    .map_err(OpnetTxError::sighash)?;
                sighashes.push((index, sighash));
            }
            let jobs: Vec<KeyPathJob> = sighashes
                .into_iter()
                .map(|(input_index, sighash)| KeyPathJob {
                    input_index,
                    sighash,
                    address: None,
                })
                .collect();
            let results = orchestrator.sign_key_path_inputs(jobs).await?;
            for result in results {
                let mut witness = bitcoin::Witness::new();
                witness.push(result.signature.as_ref());
                self.draft.witnesses[result.input_index] = witness;
            }
        }

        self.draft.state = BuilderState::Signed;
        Ok(())
    }

    pub fn extract(&mut self) -> Result<bitcoin::Transaction> {
        let tx = self.draft.finalized_transaction()?;
        self.draft.state = BuilderState::Finalized;
        Ok(tx)
    }

    pub fn export_state(&self, chain_id: u32, timestamp: u64) -> TransactionState {
        TransactionState {
            header: Header {
                format_version: crate::constants::STATE_FORMAT_VERSION,
                consensus_version: crate::constants::STATE_CONSENSUS_VERSION,
                transaction_type: TransactionKind::Interaction.as_str().to_string(),
                chain_id,
                timestamp,
            },
            base_params: BaseParams {
                from: self.params.refund_address.to_string(),
                to: Some(self.params.contract_address.clone()),
                fee_rate: self.config.fee_rate_sat_per_vb,
                priority_fee: self.params.priority_fee,
                gas_sat_fee: 0,
                network: self.params.network,
                tx_version: self.config.tx_version,
                note: None,
                anchor: false,
                debug_fees: None,
            },
            utxos: self
                .draft
                .inputs
                .iter()
                .map(crate::state::envelope::UtxoEnvelope::from_utxo)
                .collect(),
            optional_inputs: vec![],
            optional_outputs: self
                .params
                .passthrough_outputs
                .iter()
                .map(|o| crate::state::envelope::OptionalOutputEnvelope {
                    value: o.value,
                    address: None,
                    script: Some(hex::encode(o.script_pubkey.as_bytes())),
                    tap_internal_key: None,
                })
                .collect(),
            address_rotation_enabled: false,
            signer_mappings: vec![],
            type_specific_data: TypeSpecificData::Interaction {
                contract_address: self.params.contract_address.clone(),
                calldata_hex: hex::encode(&self.params.compressed_calldata),
                contract_secret_hex: hex::encode(self.params.contract_secret),
            },
            precomputed_data: PrecomputedData {
                compiled_target_script: Some(hex::encode(self.compiled_leaf.script.as_bytes())),
                random_bytes: Some(hex::encode(self.params.script_signer_seed)),
                estimated_fees: self.draft.cached_vsize.map(|vsize| {
                    crate::fee::ceil_fee(vsize, self.config.fee_rate_sat_per_vb)
                }),
                contract_seed: None,
                contract_address: Some(self.params.contract_address.clone()),
            },
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::keys::signer::{LocalKeypairSigner, SignerIdentity};
    use bitcoin::hashes::Hash;
    use bitcoin::secp256k1::SecretKey;

    fn wallet_signer() -> LocalKeypairSigner {
        let secp = Secp256k1::new();
        let sk = SecretKey::from_slice(&[21u8; 32]).unwrap();
        LocalKeypairSigner::new(ClassicalKeypair::from_secret_key(&secp, sk))
    }

    fn mock_challenge(submitter_key: bitcoin::secp256k1::XOnlyPublicKey) -> ChallengeSolution {
        ChallengeSolution {
            epoch_number: 1,
            submitter_public_key: submitter_key,
            solution: [1u8; 32],
            salt: [2u8; 32],
            graffiti: [3u8; 32],
            difficulty: 1,
            unlock_height: 100,
        }
    }

    fn build_params(signer: &LocalKeypairSigner, submitter: bitcoin::secp256k1::XOnlyPublicKey) -> InteractionParams {
        InteractionParams {
            contract_address: "contract-placeholder".to_string(),
            compressed_calldata: vec![1, 2, 3, 4],
            contract_secret: [0u8; 32],
            challenge: mock_challenge(submitter),
            priority_fee: 100,
            features: vec![],
            script_signer_seed: [9u8; 32],
            refund_address: signer.controlled_address(bitcoin::Network::Regtest).unwrap(),
            passthrough_outputs: vec![],
            network: Network::Regtest,
        }
    }

    fn expected_output_script(signer: &LocalKeypairSigner, params: &InteractionParams) -> bitcoin::ScriptBuf {
        let secp = Secp256k1::new();
        let script_signer =
            ClassicalKeypair::from_deterministic_seed(&secp, &params.script_signer_seed).unwrap();
        let main_signer = signer.x_only_public_key().unwrap();
        let compiled = compile_target_leaf(&ScriptCompilerParams {
            compressed_calldata: &params.compressed_calldata,
            contract_secret: &params.contract_secret,
            challenge: &params.challenge,
            priority_fee: params.priority_fee,
            features: &params.features,
            main_signer,
            script_signer: script_signer.x_only_public_key(),
            network: params.network,
        })
        .unwrap();
        let lock_leaf = crate::script::lock_leaf::build_lock_leaf(&main_signer);
        let tree = TaprootTree::build(&secp, compiled.script, lock_leaf, main_signer).unwrap();
        tree.output_script()
    }

    fn placeholder_utxo(script_pubkey: bitcoin::ScriptBuf, value: u64) -> UtxoReference {
        UtxoReference {
            txid: bitcoin::Txid::all_zeros(),
            vout: 0,
            value,
            script_pubkey,
            address: None,
            redeem_script: None,
            witness_script: None,
            non_witness_utxo: None,
        }
    }

    #[tokio::test]
    async fn rejects_target_utxo_with_mismatched_script() {
        let signer = wallet_signer();
        let submitter = signer.x_only_public_key().unwrap();
        let params = build_params(&signer, submitter);
        let config = BuilderConfig::new(Network::Regtest, 1.0);
        let wrong_utxo = placeholder_utxo(bitcoin::ScriptBuf::new(), 100_000);
        assert!(InteractionBuilder::new(config, params, &wrong_utxo, &signer).is_err());
    }

    #[tokio::test]
    async fn first_output_is_time_lock_reward_second_is_change() {
        let signer = wallet_signer();
        let submitter = signer.x_only_public_key().unwrap();
        let params = build_params(&signer, submitter);
        let output_script = expected_output_script(&signer, &params);
        let target_utxo = placeholder_utxo(output_script, 100_000);

        let config = BuilderConfig::new(Network::Regtest, 1.0);
        let mut builder = InteractionBuilder::new(config, params, &target_utxo, &signer).unwrap();
        builder.build(&[]).unwrap();
        builder.sign().await.unwrap();
        let tx = builder.extract().unwrap();
        assert_eq!(tx.input.len(), 1);
        assert_eq!(tx.output.len(), 2);
    }
}
