//! Funding builder (spec §4.3 "Funding builder", §8 scenarios 1-2, 5-6).
//!
//! Produces one or more equal-value outputs to a single recipient, plus a
//! change output. The simplest builder kind: every input is a plain
//! wallet key-path spend, there is no Taproot tree to assemble.

use bitcoin::Address;

use crate::builders::{
    select_utxos_for_target, BuilderConfig, BuilderState, PlannedOutput, TransactionDraft,
    TransactionKind, UtxoReference,
};
use crate::constants::dust_threshold_for;
use crate::error::{OpnetTxError, Result};
use crate::fee::{converge, InputDimensions};
use crate::keys::signer::SignerCapability;
use crate::network::Network;
use crate::signer_orchestrator::{KeyPathJob, SigningOrchestrator};
use crate::state::envelope::{BaseParams, Header, PrecomputedData, TypeSpecificData};
use crate::state::TransactionState;

/// Caller-supplied parameters for a funding transaction.
#[derive(Debug, Clone)]
pub struct FundingParams {
    pub to: Address,
    pub refund_address: Address,
    pub amount: u64,
    /// Number of equal-value outputs to `to` (spec: "count = splitInputsInto").
    pub split_inputs_into: usize,
    /// When the requested amount equals the total input value, deduct the
    /// estimated fee from the amount instead of rejecting the transaction.
    pub auto_adjust_amount: bool,
}

pub struct FundingBuilder<'a> {
    config: BuilderConfig,
    params: FundingParams,
    wallet_signer: &'a dyn SignerCapability,
    draft: TransactionDraft,
    addresses: Vec<bitcoin::Address>,
}

impl<'a> FundingBuilder<'a> {
    pub fn new(
        config: BuilderConfig,
        params: FundingParams,
        wallet_signer: &'a dyn SignerCapability,
    ) -> Self {
        Self {
            draft: TransactionDraft::new(config.tx_version),
            addresses: Vec::new(),
            config,
            params,
            wallet_signer,
        }
    }

    /// Assemble inputs, outputs, and converge fees (spec §4.3 `build()`).
    pub fn build(&mut self, available: &[UtxoReference]) -> Result<()> {
        self.draft.ensure_not_finalized()?;

        let per_output = self.params.amount / self.params.split_inputs_into as u64;
        if per_output < dust_threshold_for(self.params.to.script_pubkey().is_p2tr()) {
            return Err(OpnetTxError::DustOutput {
                value: per_output,
                threshold: dust_threshold_for(self.params.to.script_pubkey().is_p2tr()),
            });
        }

        let (selected, total) = select_utxos_for_target(available, self.params.amount)?;
        for utxo in &selected {
            self.draft.push_input(utxo.clone(), None);
        }

        let split_script = self.params.to.script_pubkey();
        let mut split_outputs: Vec<PlannedOutput> = (0..self.params.split_inputs_into)
            .map(|_| PlannedOutput {
                value: per_output,
                script_pubkey: split_script.clone(),
            })
            .collect();

        let refund_script = self.params.refund_address.script_pubkey();
        let dust_threshold = dust_threshold_for(refund_script.is_p2tr());

        let input_dims: Vec<InputDimensions> = selected.iter().map(|_| InputDimensions::KeyPath).collect();
        let split_lens: Vec<usize> = split_outputs.iter().map(|o| o.script_pubkey.len()).collect();

        let non_refund_value = if self.params.auto_adjust_amount && self.params.amount == total {
            // The whole input value was requested: fee comes out of the
            // amount, so the "non-refund" value charged against inputs is
            // the split outputs themselves, shrunk below amount by the fee.
            0
        } else {
            per_output * self.params.split_inputs_into as u64
        };

        let estimate = converge(
            &input_dims,
            &split_lens,
            total,
            non_refund_value,
            self.config.fee_rate_sat_per_vb,
            refund_script.len(),
            dust_threshold,
        )?;

        if self.params.auto_adjust_amount && self.params.amount == total {
            // Deduct the fee from the requested amount rather than reject.
            let adjusted_total = total
                .checked_sub(estimate.fee)
                .ok_or(OpnetTxError::InsufficientFunds {
                    inputs: total,
                    required: estimate.fee,
                })?;
            let adjusted_per_output = adjusted_total / self.params.split_inputs_into as u64;
            if adjusted_per_output < dust_threshold_for(split_script.is_p2tr()) {
                return Err(OpnetTxError::DustOutput {
                    value: adjusted_per_output,
                    threshold: dust_threshold_for(split_script.is_p2tr()),
                });
            }
            for output in &mut split_outputs {
                output.value = adjusted_per_output;
            }
        } else if let Some(change) = estimate.refund_amount {
            split_outputs.push(PlannedOutput {
                value: change,
                script_pubkey: refund_script,
            });
        }

        self.draft.outputs = split_outputs;
        self.draft.fee_output_index = estimate.refund_amount.map(|_| self.draft.outputs.len() - 1);
        self.draft.cached_vsize = Some(estimate.vsize);
        self.draft.state = BuilderState::OutputsComposed;
        self.addresses = selected
            .iter()
            .filter_map(|u| u.address.clone())
            .collect();
        Ok(())
    }

    /// Sign every input as a key-path spend (spec §4.5 step 3, no script
    /// signer or address rotation involved for plain funding transactions).
    pub async fn sign(&mut self) -> Result<()> {
        self.draft.ensure_not_finalized()?;
        let unsigned = self.draft.unsigned_transaction();
        let prevouts: Vec<bitcoin::TxOut> = self.draft.inputs.iter().map(|u| u.as_txout()).collect();
        let prevouts = bitcoin::sighash::Prevouts::All(&prevouts);

        let mut cache = bitcoin::sighash::SighashCache::new(&unsigned);
        let mut jobs = Vec::with_capacity(self.draft.inputs.len());
        let mut sighashes = Vec::with_capacity(self.draft.inputs.len());
        for index in 0..self.draft.inputs.len() {
            let sighash = cache
                .taproot_key_spend_signature_hash(
                    index,
                    &prevouts,
                    bitcoin::sighash::TapSighashType::Default,
                )
                .map_err(OpnetTxError::sighash)?;
            sighashes.push(sighash);
        }
        for (index, sighash) in sighashes.into_iter().enumerate() {
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

    /// Produce the finalized transaction (spec §4.3 `extract()`).
    pub fn extract(&mut self) -> Result<bitcoin::Transaction> {
        let tx = self.draft.finalized_transaction()?;
        self.draft.state = BuilderState::Finalized;
        Ok(tx)
    }

    /// Snapshot this builder as a serializable offline state (spec §4.6).
    pub fn export_state(&self, chain_id: u32, timestamp: u64) -> TransactionState {
        TransactionState {
            header: Header {
                format_version: crate::constants::STATE_FORMAT_VERSION,
                consensus_version: crate::constants::STATE_CONSENSUS_VERSION,
                transaction_type: TransactionKind::Funding.as_str().to_string(),
                chain_id,
                timestamp,
            },
            base_params: BaseParams {
                from: self.addresses.first().map(|a| a.to_string()).unwrap_or_default(),
                to: Some(self.params.to.to_string()),
                fee_rate: self.config.fee_rate_sat_per_vb,
                priority_fee: 0,
                gas_sat_fee: 0,
                network: Network::from_bitcoin(self.config.network.to_bitcoin())
                    .unwrap_or(self.config.network),
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
            type_specific_data: TypeSpecificData::Funding {
                to: self.params.to.to_string(),
                amount: self.params.amount,
                split_inputs_into: self.params.split_inputs_into,
                auto_adjust_amount: self.params.auto_adjust_amount,
            },
            precomputed_data: PrecomputedData {
                estimated_fees: self.draft.cached_vsize.map(|vsize| {
                    crate::fee::ceil_fee(vsize, self.config.fee_rate_sat_per_vb)
                }),
                ..Default::default()
            },
        }
    }

    /// Reconstruct a builder from a previously exported state (spec §4.6
    /// "Reconstruct"), re-running `build()` against the state's recorded
    /// UTXOs. The caller still drives `sign()`/`extract()`.
    pub fn from_state(state: &TransactionState, wallet_signer: &'a dyn SignerCapability) -> Result<Self> {
        let (to, amount, split_inputs_into, auto_adjust_amount) = match &state.type_specific_data {
            TypeSpecificData::Funding {
                to,
                amount,
                split_inputs_into,
                auto_adjust_amount,
            } => (to.clone(), *amount, *split_inputs_into, *auto_adjust_amount),
            other => {
                return Err(OpnetTxError::UnsupportedTransactionType(format!(
                    "expected funding, got {other:?}"
                )))
            }
        };

        let network = state.base_params.network.to_bitcoin();
        let to_address = to
            .parse::<Address<bitcoin::address::NetworkUnchecked>>()
            .map_err(OpnetTxError::bitcoin)?
            .require_network(network)
            .map_err(OpnetTxError::bitcoin)?;
        let refund_address = state
            .base_params
            .from
            .parse::<Address<bitcoin::address::NetworkUnchecked>>()
            .map_err(OpnetTxError::bitcoin)?
            .require_network(network)
            .map_err(OpnetTxError::bitcoin)?;

        let config = BuilderConfig::new(state.base_params.network, state.base_params.fee_rate);
        let params = FundingParams {
            to: to_address,
            refund_address,
            amount,
            split_inputs_into,
            auto_adjust_amount,
        };
        let mut builder = Self::new(config, params, wallet_signer);

        let available: Result<Vec<UtxoReference>> =
            state.utxos.iter().map(|u| u.to_utxo()).collect();
        let available = available?;
        builder.build(&available)?;
        Ok(builder)
    }

    pub fn unsigned_transaction(&self) -> bitcoin::Transaction {
        self.draft.unsigned_transaction()
    }

    pub fn vsize(&self) -> Option<usize> {
        self.draft.cached_vsize
    }

    pub fn outputs(&self) -> &[PlannedOutput] {
        &self.draft.outputs
    }
}
