//! Deployment builder (spec §4.3 "each kind ... Deployment").
//!
//! Stands up a new contract Taproot address: the target leaf embeds the
//! (compressed) bytecode and a contract secret exactly like an
//! interaction's target leaf, but this transaction *funds* that address
//! rather than spending it — a later Interaction transaction spends the
//! leaf this builder creates.

use bitcoin::secp256k1::Secp256k1;

use crate::builders::{
    select_utxos_for_target, BuilderConfig, BuilderState, PlannedOutput, TransactionDraft,
    TransactionKind, UtxoReference,
};
use crate::constants::dust_threshold_for;
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
use crate::taproot::TaprootTree;

use crate::challenge::ChallengeSolution;

pub struct DeploymentParams {
    pub compressed_bytecode: Vec<u8>,
    pub contract_secret: [u8; 32],
    /// Deployment still commits to a challenge solution, exactly like an
    /// interaction's target leaf (same compiler, spec §4.1).
    pub challenge: ChallengeSolution,
    pub priority_fee: u64,
    pub features: Vec<Feature>,
    pub script_signer_seed: [u8; 32],
    pub deployment_amount: u64,
    pub refund_address: bitcoin::Address,
    pub network: Network,
}

pub struct DeploymentBuilder<'a> {
    config: BuilderConfig,
    params: DeploymentParams,
    tree: TaprootTree,
    compiled_leaf: CompiledTargetLeaf,
    wallet_signer: &'a dyn SignerCapability,
    draft: TransactionDraft,
}

impl<'a> DeploymentBuilder<'a> {
    pub fn new(
        config: BuilderConfig,
        params: DeploymentParams,
        wallet_signer: &'a dyn SignerCapability,
    ) -> Result<Self> {
        let secp = Secp256k1::new();
        let script_signer = ClassicalKeypair::from_deterministic_seed(&secp, &params.script_signer_seed)?;
        let main_signer = wallet_signer.x_only_public_key()?;

        let compiled_leaf = compile_target_leaf(&ScriptCompilerParams {
            compressed_calldata: &params.compressed_bytecode,
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

        Ok(Self {
            config,
            params,
            tree,
            compiled_leaf,
            wallet_signer,
            draft: TransactionDraft::new(0),
        })
    }

    pub fn contract_address(&self, network: bitcoin::Network) -> bitcoin::Address {
        self.tree.address(network)
    }

    pub fn build(&mut self, available: &[UtxoReference]) -> Result<()> {
        self.draft.ensure_not_finalized()?;
        self.draft.tx_version = self.config.tx_version;

        let deploy_script = self.tree.output_script();
        let dust_threshold = dust_threshold_for(true);
        if self.params.deployment_amount < dust_threshold {
            return Err(OpnetTxError::DustOutput {
                value: self.params.deployment_amount,
                threshold: dust_threshold,
            });
        }

        let (selected, total) = select_utxos_for_target(available, self.params.deployment_amount)?;
        for utxo in &selected {
            self.draft.push_input(utxo.clone(), None);
        }

        let refund_script = self.params.refund_address.script_pubkey();
        let refund_dust = dust_threshold_for(refund_script.is_p2tr());
        let input_dims: Vec<InputDimensions> = selected.iter().map(|_| InputDimensions::KeyPath).collect();
        let output_lens = vec![deploy_script.len()];

        let estimate = converge(
            &input_dims,
            &output_lens,
            total,
            self.params.deployment_amount,
            self.config.fee_rate_sat_per_vb,
            refund_script.len(),
            refund_dust,
        )?;

        let mut outputs = vec![PlannedOutput {
            value: self.params.deployment_amount,
            script_pubkey: deploy_script,
        }];
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

        let mut jobs = Vec::with_capacity(self.draft.inputs.len());
        for index in 0..self.draft.inputs.len() {
            let sighash = cache
                .taproot_key_spend_signature_hash(
                    index,
                    &prevouts,
                    bitcoin::sighash::TapSighashType::Default,
                )
                .map_err(OpnetTxError::sighash)?;
            jobs.push(KeyPathJob {
                input_index: index,
                sighash,
                address: None,
            });
        }

        let orchestrator = SigningOrchestrator::new(self.wallet_signer);
        let results = orchestrator.sign_key_path_inputs(jobs).await?;
        for result in results {
            let mut witness = bitcoin::Witness::new();
            witness.push(result.signature.as_ref());
            self.draft.witnesses[result.input_index] = witness;
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
                transaction_type: TransactionKind::Deployment.as_str().to_string(),
                chain_id,
                timestamp,
            },
            base_params: BaseParams {
                from: self.params.refund_address.to_string(),
                to: Some(self.tree.address(self.params.network.to_bitcoin()).to_string()),
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
            type_specific_data: TypeSpecificData::Deployment {
                bytecode_hex: hex::encode(&self.params.compressed_bytecode),
                contract_secret_hex: hex::encode(self.params.contract_secret),
            },
            precomputed_data: PrecomputedData {
                compiled_target_script: Some(hex::encode(self.compiled_leaf.script.as_bytes())),
                random_bytes: Some(hex::encode(self.params.script_signer_seed)),
                estimated_fees: self.draft.cached_vsize.map(|vsize| {
                    crate::fee::ceil_fee(vsize, self.config.fee_rate_sat_per_vb)
                }),
                contract_seed: None,
                contract_address: Some(self.tree.address(self.params.network.to_bitcoin()).to_string()),
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
        let sk = SecretKey::from_slice(&[31u8; 32]).unwrap();
        LocalKeypairSigner::new(ClassicalKeypair::from_secret_key(&secp, sk))
    }

    #[tokio::test]
    async fn deploys_a_funded_contract_output() {
        let signer = wallet_signer();
        let submitter = signer.x_only_public_key().unwrap();
        let params = DeploymentParams {
            compressed_bytecode: vec![0xde, 0xad, 0xbe, 0xef],
            contract_secret: [0u8; 32],
            challenge: ChallengeSolution {
                epoch_number: 1,
                submitter_public_key: submitter,
                solution: [1u8; 32],
                salt: [2u8; 32],
                graffiti: [3u8; 32],
                difficulty: 1,
                unlock_height: 100,
            },
            priority_fee: 0,
            features: vec![],
            script_signer_seed: [12u8; 32],
            deployment_amount: 10_000,
            refund_address: signer.controlled_address(bitcoin::Network::Regtest).unwrap(),
            network: Network::Regtest,
        };
        let config = BuilderConfig::new(Network::Regtest, 1.0);
        let mut builder = DeploymentBuilder::new(config, params, &signer).unwrap();

        let address = signer.controlled_address(bitcoin::Network::Regtest).unwrap();
        let available = vec![UtxoReference {
            txid: bitcoin::Txid::all_zeros(),
            vout: 0,
            value: 50_000,
            script_pubkey: address.script_pubkey(),
            address: Some(address),
            redeem_script: None,
            witness_script: None,
            non_witness_utxo: None,
        }];
        builder.build(&available).unwrap();
        builder.sign().await.unwrap();
        let tx = builder.extract().unwrap();
        assert!(tx.output[0].script_pubkey.is_p2tr());
        assert_eq!(tx.output[0].value.to_sat(), 10_000);
    }
}
