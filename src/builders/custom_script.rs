//! Custom-script builder (spec §4.2 "Custom script transactions").
//!
//! The target leaf is caller-supplied rather than produced by the Script
//! Compiler, and the witness items the caller provides replace the
//! standard `[contract-secret, script-signer-sig, wallet-signer-sig]`
//! prefix entirely — this builder only assembles the leaf/control-block
//! suffix around them. No epoch-challenge reward output is forced; the
//! caller is opting out of the standard interaction shape.

use bitcoin::secp256k1::{Secp256k1, XOnlyPublicKey};
use bitcoin::ScriptBuf;

use crate::builders::{
    select_utxos_for_target, BuilderConfig, BuilderState, PlannedOutput, TapLeafBinding,
    TransactionDraft, TransactionKind, UtxoReference,
};
use crate::constants::dust_threshold_for;
use crate::error::{OpnetTxError, Result};
use crate::fee::{converge, InputDimensions};
use crate::keys::signer::SignerCapability;
use crate::network::Network;
use crate::script::lock_leaf::build_lock_leaf;
use crate::signer_orchestrator::{KeyPathJob, SigningOrchestrator};
use crate::state::envelope::{BaseParams, Header, PrecomputedData, TypeSpecificData};
use crate::state::TransactionState;
use crate::taproot::finalizer::finalize_custom_script_witness;
use crate::taproot::TaprootTree;

pub struct CustomScriptParams {
    pub leaf_script: ScriptBuf,
    pub main_signer_pubkey: XOnlyPublicKey,
    /// Fully caller-supplied witness items for input 0, in stack order.
    pub witness_items: Vec<Vec<u8>>,
    pub refund_address: bitcoin::Address,
    pub passthrough_outputs: Vec<PlannedOutput>,
    pub network: Network,
}

pub struct CustomScriptBuilder<'a> {
    config: BuilderConfig,
    params: CustomScriptParams,
    tree: TaprootTree,
    wallet_signer: &'a dyn SignerCapability,
    draft: TransactionDraft,
}

impl<'a> CustomScriptBuilder<'a> {
    pub fn new(
        config: BuilderConfig,
        params: CustomScriptParams,
        target_utxo: &UtxoReference,
        wallet_signer: &'a dyn SignerCapability,
    ) -> Result<Self> {
        let secp = Secp256k1::new();
        let lock_leaf = build_lock_leaf(&params.main_signer_pubkey);
        let tree = TaprootTree::build(
            &secp,
            params.leaf_script.clone(),
            lock_leaf,
            params.main_signer_pubkey,
        )?;

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
                leaf_script: params.leaf_script.clone(),
                control_block: control_block.serialize(),
                tree_depth: 1,
            }),
        );

        Ok(Self {
            config,
            params,
            tree,
            wallet_signer,
            draft,
        })
    }

    pub fn build(&mut self, available_wallet_utxos: &[UtxoReference]) -> Result<()> {
        self.draft.ensure_not_finalized()?;

        let mut outputs: Vec<PlannedOutput> = self.params.passthrough_outputs.clone();
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

        let witness_components: Vec<usize> = self
            .params
            .witness_items
            .iter()
            .map(|item| item.len())
            .chain([self.params.leaf_script.len(), 33 + 32 * 2])
            .collect();
        let mut input_dims = vec![InputDimensions::Explicit {
            witness_components,
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

    /// Input 0's witness is the caller-supplied items plus leaf/control
    /// block (no orchestrator signing involved for it); remaining inputs
    /// sign concurrently as plain key-path spends.
    pub async fn sign(&mut self) -> Result<()> {
        self.draft.ensure_not_finalized()?;
        let control_block = self.tree.target_control_block()?;
        self.draft.witnesses[0] = finalize_custom_script_witness(
            &self.params.witness_items,
            &self.params.leaf_script,
            &control_block,
            None,
        );

        if self.draft.inputs.len() > 1 {
            let unsigned = self.draft.unsigned_transaction();
            let prevouts: Vec<bitcoin::TxOut> =
                self.draft.inputs.iter().map(|u| u.as_txout()).collect();
            let prevouts = bitcoin::sighash::Prevouts::All(&prevouts);
            let mut cache = bitcoin::sighash::SighashCache::new(&unsigned);

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
            let orchestrator = SigningOrchestrator::new(self.wallet_signer);
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
                transaction_type: TransactionKind::CustomScript.as_str().to_string(),
                chain_id,
                timestamp,
            },
            base_params: BaseParams {
                from: self.params.refund_address.to_string(),
                to: None,
                fee_rate: self.config.fee_rate_sat_per_vb,
                priority_fee: 0,
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
            type_specific_data: TypeSpecificData::CustomScript {
                leaf_script_hex: hex::encode(self.params.leaf_script.as_bytes()),
                witness_items_hex: self.params.witness_items.iter().map(hex::encode).collect(),
            },
            precomputed_data: PrecomputedData {
                compiled_target_script: Some(hex::encode(self.params.leaf_script.as_bytes())),
                random_bytes: None,
                estimated_fees: self.draft.cached_vsize.map(|vsize| {
                    crate::fee::ceil_fee(vsize, self.config.fee_rate_sat_per_vb)
                }),
                contract_seed: None,
                contract_address: None,
            },
        }
    }
}
