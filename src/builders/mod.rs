//! Shared builder state machine core (spec §4.3, §2 L4).
//!
//! Every transaction kind is modeled as a sum type over its kind-specific
//! fields, sharing this module's `TransactionDraft`, UTXO/output shapes,
//! and state-machine transitions:
//!
//! ```text
//! Created -> InputsSelected -> OutputsComposed -> Signed -> Finalized -> Extracted
//! ```

pub mod cancel;
pub mod consolidated_interaction;
pub mod custom_script;
pub mod deployment;
pub mod funding;
pub mod interaction;
pub mod interaction_p2wda;
pub mod multisig;

use bitcoin::{Address, ScriptBuf, Transaction, TxOut, Txid};

use crate::error::{OpnetTxError, Result};
use crate::network::Network;

/// Tag identifying a builder's kind, used by the offline state envelope's
/// `typeSpecificData` variant (spec §6).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum TransactionKind {
    Funding,
    Deployment,
    Interaction,
    InteractionP2wda,
    MultiSign,
    CustomScript,
    Cancel,
    ConsolidatedInteraction,
}

impl TransactionKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            TransactionKind::Funding => "funding",
            TransactionKind::Deployment => "deployment",
            TransactionKind::Interaction => "interaction",
            TransactionKind::InteractionP2wda => "interactionP2WDA",
            TransactionKind::MultiSign => "multiSign",
            TransactionKind::CustomScript => "customScript",
            TransactionKind::Cancel => "cancel",
            TransactionKind::ConsolidatedInteraction => "consolidatedInteraction",
        }
    }

    pub fn from_str(s: &str) -> Result<Self> {
        Ok(match s {
            "funding" => TransactionKind::Funding,
            "deployment" => TransactionKind::Deployment,
            "interaction" => TransactionKind::Interaction,
            "interactionP2WDA" => TransactionKind::InteractionP2wda,
            "multiSign" => TransactionKind::MultiSign,
            "customScript" => TransactionKind::CustomScript,
            "cancel" => TransactionKind::Cancel,
            "consolidatedInteraction" => TransactionKind::ConsolidatedInteraction,
            other => return Err(OpnetTxError::UnsupportedTransactionType(other.to_string())),
        })
    }
}

/// A reference to a spendable prior output (spec §3 "UTXO reference").
/// Immutable once constructed.
#[derive(Debug, Clone)]
pub struct UtxoReference {
    pub txid: Txid,
    pub vout: u32,
    pub value: u64,
    pub script_pubkey: ScriptBuf,
    pub address: Option<Address>,
    pub redeem_script: Option<ScriptBuf>,
    pub witness_script: Option<ScriptBuf>,
    pub non_witness_utxo: Option<Transaction>,
}

impl UtxoReference {
    pub fn outpoint(&self) -> bitcoin::OutPoint {
        bitcoin::OutPoint {
            txid: self.txid,
            vout: self.vout,
        }
    }

    pub fn is_taproot(&self) -> bool {
        self.script_pubkey.is_p2tr()
    }

    pub fn as_txout(&self) -> TxOut {
        TxOut {
            value: bitcoin::Amount::from_sat(self.value),
            script_pubkey: self.script_pubkey.clone(),
        }
    }
}

/// An output the builder plans to include, before final fee convergence
/// fixes the refund value.
#[derive(Debug, Clone)]
pub struct PlannedOutput {
    pub value: u64,
    pub script_pubkey: ScriptBuf,
}

impl PlannedOutput {
    pub fn as_txout(&self) -> TxOut {
        TxOut {
            value: bitcoin::Amount::from_sat(self.value),
            script_pubkey: self.script_pubkey.clone(),
        }
    }
}

/// Per-input binding to a Taproot script-path leaf, when the input is not
/// a plain key-path spend.
#[derive(Debug, Clone)]
pub struct TapLeafBinding {
    pub leaf_script: ScriptBuf,
    pub control_block: Vec<u8>,
    pub tree_depth: u8,
}

/// Builder lifecycle state (spec §4.3).
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum BuilderState {
    Created,
    InputsSelected,
    OutputsComposed,
    Signed,
    Finalized,
}

/// Mutable in-progress transaction structure owned by a builder (spec §3
/// "Transaction draft").
#[derive(Debug, Clone)]
pub struct TransactionDraft {
    pub inputs: Vec<UtxoReference>,
    pub outputs: Vec<PlannedOutput>,
    pub tap_leaf_bindings: Vec<Option<TapLeafBinding>>,
    pub witnesses: Vec<bitcoin::Witness>,
    pub fee_output_index: Option<usize>,
    pub cached_vsize: Option<usize>,
    pub state: BuilderState,
    pub tx_version: i32,
}

impl TransactionDraft {
    pub fn new(tx_version: i32) -> Self {
        Self {
            inputs: Vec::new(),
            outputs: Vec::new(),
            tap_leaf_bindings: Vec::new(),
            witnesses: Vec::new(),
            fee_output_index: None,
            cached_vsize: None,
            state: BuilderState::Created,
            tx_version,
        }
    }

    pub fn total_input_value(&self) -> u64 {
        self.inputs.iter().map(|u| u.value).sum()
    }

    pub fn total_output_value(&self) -> u64 {
        self.outputs.iter().map(|o| o.value).sum()
    }

    pub fn push_input(&mut self, utxo: UtxoReference, binding: Option<TapLeafBinding>) {
        self.inputs.push(utxo);
        self.tap_leaf_bindings.push(binding);
        self.witnesses.push(bitcoin::Witness::new());
    }

    /// Assemble the unsigned `bitcoin::Transaction` skeleton from the
    /// current inputs/outputs (witnesses filled in during `sign`/`finalize`).
    pub fn unsigned_transaction(&self) -> Transaction {
        Transaction {
            version: bitcoin::transaction::Version(self.tx_version),
            lock_time: bitcoin::absolute::LockTime::ZERO,
            input: self
                .inputs
                .iter()
                .map(|utxo| bitcoin::TxIn {
                    previous_output: utxo.outpoint(),
                    script_sig: ScriptBuf::new(),
                    sequence: bitcoin::Sequence::ENABLE_RBF_NO_LOCKTIME,
                    witness: bitcoin::Witness::new(),
                })
                .collect(),
            output: self.outputs.iter().map(PlannedOutput::as_txout).collect(),
        }
    }

    /// Assemble the final, witness-populated transaction. Errors if any
    /// input's witness is still empty (spec §4.3 "Errors").
    pub fn finalized_transaction(&self) -> Result<Transaction> {
        let mut tx = self.unsigned_transaction();
        for (index, witness) in self.witnesses.iter().enumerate() {
            if witness.is_empty() {
                return Err(OpnetTxError::MissingTapScriptSignature(index));
            }
            tx.input[index].witness = witness.clone();
        }
        Ok(tx)
    }

    pub fn ensure_not_finalized(&self) -> Result<()> {
        if self.state == BuilderState::Finalized {
            return Err(OpnetTxError::TransactionAlreadyFinalized);
        }
        Ok(())
    }
}

/// Construction-time parameters common to every builder kind.
#[derive(Debug, Clone)]
pub struct BuilderConfig {
    pub network: Network,
    pub tx_version: i32,
    pub fee_rate_sat_per_vb: f64,
}

impl BuilderConfig {
    pub fn new(network: Network, fee_rate_sat_per_vb: f64) -> Self {
        Self {
            network,
            tx_version: crate::constants::DEFAULT_TX_VERSION,
            fee_rate_sat_per_vb,
        }
    }
}

/// Select UTXOs greedily (largest-first) until `target` is met, matching
/// the teacher corpus's straightforward selection strategy. Returns the
/// selected UTXOs and their total value.
pub fn select_utxos_for_target(
    available: &[UtxoReference],
    target: u64,
) -> Result<(Vec<UtxoReference>, u64)> {
    if available.is_empty() {
        return Err(OpnetTxError::NoUtxos);
    }
    let mut sorted: Vec<UtxoReference> = available.to_vec();
    sorted.sort_by(|a, b| b.value.cmp(&a.value));

    let mut selected = Vec::new();
    let mut total = 0u64;
    for utxo in sorted {
        if total >= target {
            break;
        }
        total += utxo.value;
        selected.push(utxo);
    }
    Ok((selected, total))
}

#[cfg(test)]
mod tests {
    use super::*;
    use bitcoin::hashes::Hash;

    fn utxo(value: u64) -> UtxoReference {
        UtxoReference {
            txid: Txid::all_zeros(),
            vout: 0,
            value,
            script_pubkey: ScriptBuf::new(),
            address: None,
            redeem_script: None,
            witness_script: None,
            non_witness_utxo: None,
        }
    }

    #[test]
    fn selects_fewest_utxos_covering_target() {
        let utxos = vec![utxo(10_000), utxo(50_000), utxo(20_000)];
        let (selected, total) = select_utxos_for_target(&utxos, 40_000).unwrap();
        assert_eq!(selected.len(), 1);
        assert_eq!(total, 50_000);
    }

    #[test]
    fn finalized_transaction_requires_witnesses() {
        let mut draft = TransactionDraft::new(2);
        draft.push_input(utxo(10_000), None);
        assert!(draft.finalized_transaction().is_err());
    }
}
