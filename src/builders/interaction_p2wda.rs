//! P2WDA interaction builder (spec §4.2 "P2WDA", glossary "Pay-to-Witness-
//! Data-Anchor").
//!
//! Like [`crate::builders::interaction::InteractionBuilder`], except the
//! calldata travels in the witness at spend time instead of being pushed
//! directly into the target leaf script — the leaf only commits to a hash
//! of the witness fields, keeping the leaf itself small. Bounded to
//! [`MAX_P2WDA_WITNESS_FIELDS`] fields of at most
//! [`MAX_HASH_COMMITTED_CHUNK_SIZE`] bytes each.

use bitcoin::hashes::{sha256, Hash};
use bitcoin::secp256k1::Secp256k1;
use bitcoin::taproot::LeafVersion;

use crate::builders::{
    select_utxos_for_target, BuilderConfig, BuilderState, PlannedOutput, TapLeafBinding,
    TransactionDraft, TransactionKind, UtxoReference,
};
use crate::challenge::ChallengeSolution;
use crate::constants::{
    dust_threshold_for, MAX_HASH_COMMITTED_CHUNK_SIZE, MAX_P2WDA_WITNESS_FIELDS,
    MINIMUM_AMOUNT_REWARD, SCRIPT_SIGNER_LEAF_VERSION,
};
use crate::error::{OpnetTxError, Result};
use crate::fee::{converge, InputDimensions};
use crate::keys::signer::SignerCapability;
use crate::keys::ClassicalKeypair;
use crate::network::Network;
use crate::script::features::Feature;
use crate::script::lock_leaf::build_lock_leaf;
use crate::script::{compile_target_leaf, CompiledTargetLeaf, ScriptCompilerParams};
use crate::signer_orchestrator::{KeyPathJob, SigningOrchestrator};
use crate::state::envelope::{BaseParams, Header, PrecomputedData, TypeSpecificData};
use crate::state::TransactionState;
use crate::taproot::finalizer::finalize_custom_script_witness;
use crate::taproot::TaprootTree;

pub struct InteractionP2wdaParams {
    pub contract_address: String,
    /// Raw calldata chunks carried in the witness rather than the script.
    pub witness_fields: Vec<Vec<u8>>,
    pub contract_secret: [u8; 32],
    pub challenge: ChallengeSolution,
    pub priority_fee: u64,
    pub features: Vec<Feature>,
    pub script_signer_seed: [u8; 32],
    pub refund_address: bitcoin::Address,
    pub passthrough_outputs: Vec<PlannedOutput>,
    pub network: Network,
}

impl InteractionP2wdaParams {
    fn validate(&self) -> Result<()> {
        if self.witness_fields.len() > MAX_P2WDA_WITNESS_FIELDS {
            return Err(OpnetTxError::TooManyWitnessFields {
                count: self.witness_fields.len(),
                max: MAX_P2WDA_WITNESS_FIELDS,
            });
        }
        for field in &self.witness_fields {
            if field.len() > MAX_HASH_COMMITTED_CHUNK_SIZE {
                return Err(OpnetTxError::FeaturePayloadMalformed(format!(
                    "witness field of {} bytes exceeds {} byte limit",
                    field.len(),
                    MAX_HASH_COMMITTED_CHUNK_SIZE
                )));
            }
        }
        Ok(())
    }

    fn witness_fields_commitment(&self) -> [u8; 32] {
        let mut buf = Vec::new();
        for field in &self.witness_fields {
            buf.extend_from_slice(&(field.len() as u32).to_le_bytes());
            buf.extend_from_slice(field);
        }
        sha256::Hash::hash(&buf).to_byte_array()
    }
}

pub struct InteractionP2wdaBuilder<'a> {
    config: BuilderConfig,
    params: InteractionP2wdaParams,
    tree: TaprootTree,
    compiled_leaf: CompiledTargetLeaf,
    script_signer: ClassicalKeypair,
    wallet_signer: &'a dyn SignerCapability,
    draft: TransactionDraft,
}

impl<'a> InteractionP2wdaBuilder<'a> {
    pub fn new(
        config: BuilderConfig,
        params: InteractionP2wdaParams,
        target_utxo: &UtxoReference,
        wallet_signer: &'a dyn SignerCapability,
    ) -> Result<Self> {
        params.validate()?;

        let secp = Secp256k1::new();
        let script_signer = ClassicalKeypair::from_deterministic_seed(&secp, &params.script_signer_seed)?;
        let main_signer = wallet_signer.x_only_public_key()?;
        let commitment = params.witness_fields_commitment();

        let compiled_leaf = compile_target_leaf(&ScriptCompilerParams {
            compressed_calldata: &commitment,
            contract_secret: &params.contract_secret,
            challenge: &params.challenge,
            priority_fee: params.priority_fee,
            features: &params.features,
            main_signer,
            script_signer: script_signer.x_only_public_key(),
            network: params.network,
        })?;
        let lock_leaf = build_lock_leaf(&main_signer);
        let tree = TaprootTree::build(&secp, compiled_leaf.script.clone(), lock_leaf, main_signer)?;

        if target_utxo.script_pubkey != tree.output_script() {
            return Err(OpnetTxError::InvalidContractAddress(
                "target UTXO script-pubkey does not match the computed Taproot tree output"
                    .to_string(),
            ));
        }

        let mut draft = TransactionDraft::new(config.tx_version);
        let control_block = tree.target_control_block()?;
        draft.push_input(
            target_utxo.clone(),
            Some(TapLeafBinding {
                leaf_script: compiled_leaf.script.clone(),
                control_block: control_block.serialize(),
                tree_depth: 1,
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
            script_pubkey: reward_script,
        }];
        outputs.extend(self.params.passthrough_outputs.iter().cloned());

        let refund_script = self.params.refund_address.script_pubkey();
        let dust_threshold = dust_threshold_for(refund_script.is_p2tr());
        let non_refund_value: u64 = outputs.iter().map(|o| o.value).sum();

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

        // The witness fields ride alongside the standard prefix, so the
        // estimator needs them counted as extra witness components.
        let mut witness_component_lens: Vec<usize> =
            self.params.witness_fields.iter().map(|f| f.len()).collect();
        witness_component_lens.extend([32, 64, 64]); // secret, script sig, wallet sig

        let mut input_dims = vec![InputDimensions::Explicit {
            witness_components: {
                let mut components = witness_component_lens.clone();
                components.push(self.compiled_leaf.script.len());
                components.push(33 + 32 * 2); // control block, rough depth-1 size
                components
            },
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

    pub async fn sign(&mut self) -> Result<()> {
        self.draft.ensure_not_finalized()?;
        let unsigned = self.draft.unsigned_transaction();
        let prevouts: Vec<bitcoin::TxOut> = self.draft.inputs.iter().map(|u| u.as_txout()).collect();
        let prevouts = bitcoin::sighash::Prevouts::All(&prevouts);
        let mut cache = bitcoin::sighash::SighashCache::new(&unsigned);

        let leaf_version = LeafVersion::from_consensus(SCRIPT_SIGNER_LEAF_VERSION)
            .expect("0xc0 is a valid leaf version");
        let leaf_hash =
            bitcoin::taproot::TapLeafHash::from_script(&self.compiled_leaf.script, leaf_version);
        let target_sighash = cache
            .taproot_script_spend_signature_hash(
                0,
                &prevouts,
                leaf_hash,
                bitcoin::sighash::TapSighashType::Default,
            )
            .map_err(OpnetTxError::sighash)?;

        let orchestrator = SigningOrchestrator::new(self.wallet_signer);
        let (script_sig, wallet_sig) = orchestrator.sign_target_leaf_input(
            &self.script_signer,
            self.wallet_signer,
            target_sighash,
        )?;

        let control_block = self.tree.target_control_block()?;
        let mut custom_items: Vec<Vec<u8>> = self.params.witness_fields.clone();
        custom_items.push(self.params.contract_secret.to_vec());
        custom_items.push(script_sig.as_ref().to_vec());
        custom_items.push(wallet_sig.as_ref().to_vec());
        self.draft.witnesses[0] = finalize_custom_script_witness(
            &custom_items,
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
                transaction_type: TransactionKind::InteractionP2wda.as_str().to_string(),
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
            optional_outputs: vec![],
            address_rotation_enabled: false,
            signer_mappings: vec![],
            type_specific_data: TypeSpecificData::InteractionP2wda {
                contract_address: self.params.contract_address.clone(),
                witness_fields_hex: self
                    .params
                    .witness_fields
                    .iter()
                    .map(hex::encode)
                    .collect(),
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
