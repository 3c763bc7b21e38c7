//! Serializable offline-state wire envelope (spec §3 "Serializable
//! transaction state", §6 "Serializable state envelope").
//!
//! Every binary field is hex-encoded at this layer so the whole envelope
//! round-trips through JSON (and, transport-wise, through hex/base64)
//! without any implicit binary framing.

use serde::{Deserialize, Serialize};

use crate::builders::{PlannedOutput, UtxoReference};
use crate::error::{OpnetTxError, Result};
use crate::network::Network;

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Header {
    pub format_version: u32,
    pub consensus_version: u32,
    pub transaction_type: String,
    pub chain_id: u32,
    pub timestamp: u64,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct BaseParams {
    pub from: String,
    pub to: Option<String>,
    pub fee_rate: f64,
    pub priority_fee: u64,
    pub gas_sat_fee: u64,
    pub network: Network,
    pub tx_version: i32,
    pub note: Option<String>,
    pub anchor: bool,
    pub debug_fees: Option<bool>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct UtxoEnvelope {
    pub transaction_id: String,
    pub output_index: u32,
    pub value: u64,
    pub script_pub_key_hex: String,
    pub script_pub_key_address: Option<String>,
    pub redeem_script: Option<String>,
    pub witness_script: Option<String>,
    pub non_witness_utxo: Option<String>,
}

impl UtxoEnvelope {
    pub fn from_utxo(utxo: &UtxoReference) -> Self {
        Self {
            transaction_id: utxo.txid.to_string(),
            output_index: utxo.vout,
            value: utxo.value,
            script_pub_key_hex: hex::encode(utxo.script_pubkey.as_bytes()),
            script_pub_key_address: utxo.address.as_ref().map(|a| a.to_string()),
            redeem_script: utxo.redeem_script.as_ref().map(|s| hex::encode(s.as_bytes())),
            witness_script: utxo.witness_script.as_ref().map(|s| hex::encode(s.as_bytes())),
            non_witness_utxo: utxo
                .non_witness_utxo
                .as_ref()
                .map(|tx| hex::encode(bitcoin::consensus::encode::serialize(tx))),
        }
    }

    pub fn to_utxo(&self) -> Result<UtxoReference> {
        use bitcoin::consensus::Decodable;
        use std::str::FromStr;

        let txid =
            bitcoin::Txid::from_str(&self.transaction_id).map_err(OpnetTxError::bitcoin)?;
        let script_pubkey =
            bitcoin::ScriptBuf::from_bytes(hex::decode(&self.script_pub_key_hex)?);
        let address = self
            .script_pub_key_address
            .as_ref()
            .map(|a| {
                bitcoin::Address::from_str(a)
                    .map_err(OpnetTxError::bitcoin)
                    .map(|a| a.assume_checked())
            })
            .transpose()?;
        let redeem_script = self
            .redeem_script
            .as_ref()
            .map(|s| hex::decode(s).map(bitcoin::ScriptBuf::from_bytes))
            .transpose()?;
        let witness_script = self
            .witness_script
            .as_ref()
            .map(|s| hex::decode(s).map(bitcoin::ScriptBuf::from_bytes))
            .transpose()?;
        let non_witness_utxo = self
            .non_witness_utxo
            .as_ref()
            .map(|s| -> Result<bitcoin::Transaction> {
                let bytes = hex::decode(s)?;
                bitcoin::Transaction::consensus_decode(&mut bytes.as_slice())
                    .map_err(OpnetTxError::bitcoin)
            })
            .transpose()?;

        Ok(UtxoReference {
            txid,
            vout: self.output_index,
            value: self.value,
            script_pubkey,
            address,
            redeem_script,
            witness_script,
            non_witness_utxo,
        })
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct OptionalOutputEnvelope {
    pub value: u64,
    pub address: Option<String>,
    pub script: Option<String>,
    pub tap_internal_key: Option<String>,
}

impl OptionalOutputEnvelope {
    pub fn to_planned_output(&self, network: bitcoin::Network) -> Result<PlannedOutput> {
        use std::str::FromStr;
        let script_pubkey = if let Some(address) = &self.address {
            bitcoin::Address::from_str(address)
                .map_err(OpnetTxError::bitcoin)?
                .require_network(network)
                .map_err(OpnetTxError::bitcoin)?
                .script_pubkey()
        } else if let Some(script) = &self.script {
            bitcoin::ScriptBuf::from_bytes(hex::decode(script)?)
        } else {
            return Err(OpnetTxError::MissingRequiredParam(
                "optional output requires an address or a script",
            ));
        };
        Ok(PlannedOutput {
            value: self.value,
            script_pubkey,
        })
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SignerMapping {
    pub address: String,
    pub input_indices: Vec<usize>,
}

/// Kind-specific parameters (spec §6 "typeSpecificData"). Each variant
/// holds exactly what its builder needs to reconstruct a draft, in
/// addition to the common `utxos`/`optional_outputs` fields above.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "kind")]
pub enum TypeSpecificData {
    Funding {
        to: String,
        amount: u64,
        split_inputs_into: usize,
        auto_adjust_amount: bool,
    },
    Deployment {
        bytecode_hex: String,
        contract_secret_hex: String,
    },
    Interaction {
        contract_address: String,
        calldata_hex: String,
        contract_secret_hex: String,
    },
    InteractionP2wda {
        contract_address: String,
        witness_fields_hex: Vec<String>,
    },
    MultiSig {
        public_keys_hex: Vec<String>,
        threshold: u8,
        base_psbt_base64: Option<String>,
    },
    CustomScript {
        leaf_script_hex: String,
        witness_items_hex: Vec<String>,
    },
    Cancel {
        target_txid: String,
        target_vout: u32,
        lock_leaf_script_hex: String,
    },
    ConsolidatedInteraction {
        chunks_hex: Vec<String>,
    },
}

impl TypeSpecificData {
    pub fn kind_tag(&self) -> &'static str {
        match self {
            TypeSpecificData::Funding { .. } => "funding",
            TypeSpecificData::Deployment { .. } => "deployment",
            TypeSpecificData::Interaction { .. } => "interaction",
            TypeSpecificData::InteractionP2wda { .. } => "interactionP2WDA",
            TypeSpecificData::MultiSig { .. } => "multiSign",
            TypeSpecificData::CustomScript { .. } => "customScript",
            TypeSpecificData::Cancel { .. } => "cancel",
            TypeSpecificData::ConsolidatedInteraction { .. } => "consolidatedInteraction",
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, Default)]
pub struct PrecomputedData {
    pub compiled_target_script: Option<String>,
    pub random_bytes: Option<String>,
    pub estimated_fees: Option<u64>,
    pub contract_seed: Option<String>,
    pub contract_address: Option<String>,
}

/// The full serializable transaction state (spec §3, §6).
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TransactionState {
    pub header: Header,
    pub base_params: BaseParams,
    pub utxos: Vec<UtxoEnvelope>,
    pub optional_inputs: Vec<UtxoEnvelope>,
    pub optional_outputs: Vec<OptionalOutputEnvelope>,
    pub address_rotation_enabled: bool,
    pub signer_mappings: Vec<SignerMapping>,
    pub type_specific_data: TypeSpecificData,
    pub precomputed_data: PrecomputedData,
}

impl TransactionState {
    pub fn to_hex(&self) -> Result<String> {
        let bytes = serde_json::to_vec(self)?;
        Ok(hex::encode(bytes))
    }

    pub fn from_hex(input: &str) -> Result<Self> {
        let bytes = hex::decode(input)?;
        Ok(serde_json::from_slice(&bytes)?)
    }

    pub fn to_base64(&self) -> Result<String> {
        use base64::Engine;
        let bytes = serde_json::to_vec(self)?;
        Ok(base64::engine::general_purpose::STANDARD.encode(bytes))
    }

    pub fn from_base64(input: &str) -> Result<Self> {
        use base64::Engine;
        let bytes = base64::engine::general_purpose::STANDARD.decode(input)?;
        Ok(serde_json::from_slice(&bytes)?)
    }

    pub fn type_specific_data_kind(&self) -> &'static str {
        self.type_specific_data.kind_tag()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn sample_state() -> TransactionState {
        TransactionState {
            header: Header {
                format_version: crate::constants::STATE_FORMAT_VERSION,
                consensus_version: crate::constants::STATE_CONSENSUS_VERSION,
                transaction_type: "funding".to_string(),
                chain_id: 0,
                timestamp: 1_700_000_000,
            },
            base_params: BaseParams {
                from: "bcrt1qsender".to_string(),
                to: Some("bcrt1qrecipient".to_string()),
                fee_rate: 1.0,
                priority_fee: 0,
                gas_sat_fee: 0,
                network: Network::Regtest,
                tx_version: 2,
                note: None,
                anchor: false,
                debug_fees: None,
            },
            utxos: vec![],
            optional_inputs: vec![],
            optional_outputs: vec![],
            address_rotation_enabled: false,
            signer_mappings: vec![],
            type_specific_data: TypeSpecificData::Funding {
                to: "bcrt1qrecipient".to_string(),
                amount: 100_000,
                split_inputs_into: 1,
                auto_adjust_amount: false,
            },
            precomputed_data: PrecomputedData::default(),
        }
    }

    #[test]
    fn round_trips_through_hex() {
        let state = sample_state();
        let hex_string = state.to_hex().unwrap();
        assert!(hex_string.chars().all(|c| c.is_ascii_hexdigit()));
        let restored = TransactionState::from_hex(&hex_string).unwrap();
        assert_eq!(restored.base_params.from, state.base_params.from);
    }

    #[test]
    fn round_trips_through_base64() {
        let state = sample_state();
        let encoded = state.to_base64().unwrap();
        let restored = TransactionState::from_base64(&encoded).unwrap();
        assert_eq!(restored.header.chain_id, state.header.chain_id);
    }
}
