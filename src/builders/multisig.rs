//! Multisig vault builder (spec §4.2 "N-of-M vault", §4.3).
//!
//! Key-path spending through a MuSig2-aggregated cosigner key, with an
//! M-of-N `OP_CHECKSIGADD` script leaf as the non-cooperative fallback
//! path. The actual MuSig2 nonce/partial-signature exchange across
//! cosigners is an external collaborator reached through
//! [`SignerCapability::sign_psbt`] (spec §4.5 point 2) — this builder only
//! assembles the vault's Taproot output, the unsigned PSBT, and the final
//! transaction once a cooperative key-path signature lands in the PSBT.

use bitcoin::hashes::Hash;
use bitcoin::opcodes::all::{OP_CHECKSIG, OP_CHECKSIGADD, OP_GREATERTHANOREQUAL};
use bitcoin::script::Builder;
use bitcoin::secp256k1::{PublicKey, Secp256k1, XOnlyPublicKey};
use bitcoin::taproot::{LeafVersion, TaprootBuilder};
use bitcoin::{Address, Psbt, ScriptBuf};

use crate::builders::{BuilderConfig, PlannedOutput, TransactionKind, UtxoReference};
use crate::constants::{dust_threshold_for, SCRIPT_SIGNER_LEAF_VERSION};
use crate::error::{OpnetTxError, Result};
use crate::fee::{converge, InputDimensions};
use crate::keys::signer::SignerCapability;
use crate::network::Network;
use crate::state::envelope::{BaseParams, Header, PrecomputedData, TypeSpecificData};
use crate::state::TransactionState;

/// Build the M-of-N fallback script: `pk1 CHECKSIG pk2 CHECKSIGADD ...
/// pkN CHECKSIGADD threshold GREATERTHANOREQUAL`.
pub fn build_multisig_script(public_keys: &[XOnlyPublicKey], threshold: u8) -> Result<ScriptBuf> {
    if public_keys.is_empty() || threshold == 0 || threshold as usize > public_keys.len() {
        return Err(OpnetTxError::MissingRequiredParam(
            "multisig requires 1 <= threshold <= number of public keys",
        ));
    }
    let mut builder = Builder::new()
        .push_slice(public_keys[0].serialize())
        .push_opcode(OP_CHECKSIG);
    for key in &public_keys[1..] {
        builder = builder.push_slice(key.serialize()).push_opcode(OP_CHECKSIGADD);
    }
    builder = builder
        .push_int(threshold as i64)
        .push_opcode(OP_GREATERTHANOREQUAL);
    Ok(builder.into_script())
}

/// Aggregate cosigner keys into a single MuSig2 public key (spec §4.2
/// "cooperative key-path"). The heavy lifting (nonce commitments, partial
/// signature aggregation) happens outside this crate; this function only
/// computes the static aggregated point used as the Taproot internal key.
pub fn aggregate_musig2_pubkey(public_keys: &[XOnlyPublicKey]) -> Result<XOnlyPublicKey> {
    let musig_keys: Result<Vec<musig2::secp256k1::PublicKey>> = public_keys
        .iter()
        .map(|k| {
            let compressed = PublicKey::from_x_only_public_key(*k, bitcoin::secp256k1::Parity::Even);
            musig2::secp256k1::PublicKey::from_slice(&compressed.serialize())
                .map_err(|e| OpnetTxError::Bitcoin(e.to_string()))
        })
        .collect();
    let key_agg_ctx = musig2::KeyAggContext::new(musig_keys?)
        .map_err(|e| OpnetTxError::Bitcoin(e.to_string()))?;
    let aggregated: musig2::secp256k1::PublicKey = key_agg_ctx.aggregated_pubkey();
    let bytes = aggregated.serialize();
    XOnlyPublicKey::from_slice(&bytes[1..]).map_err(OpnetTxError::bitcoin)
}

pub struct MultiSigParams {
    pub public_keys: Vec<XOnlyPublicKey>,
    pub threshold: u8,
    pub network: Network,
}

pub struct MultiSigBuilder<'a> {
    config: BuilderConfig,
    params: MultiSigParams,
    script_leaf: ScriptBuf,
    aggregated_pubkey: XOnlyPublicKey,
    merkle_root: bitcoin::taproot::TapNodeHash,
    vault_utxo: UtxoReference,
    wallet_signer: &'a dyn SignerCapability,
    psbt: Option<Psbt>,
}

impl<'a> MultiSigBuilder<'a> {
    pub fn new(
        config: BuilderConfig,
        params: MultiSigParams,
        vault_utxo: UtxoReference,
        wallet_signer: &'a dyn SignerCapability,
    ) -> Result<Self> {
        let script_leaf = build_multisig_script(&params.public_keys, params.threshold)?;
        let aggregated_pubkey = aggregate_musig2_pubkey(&params.public_keys)?;

        let secp = Secp256k1::new();
        let leaf_version = LeafVersion::from_consensus(SCRIPT_SIGNER_LEAF_VERSION)
            .expect("0xc0 is a valid leaf version");
        let spend_info = TaprootBuilder::new()
            .add_leaf_with_ver(0, script_leaf.clone(), leaf_version)
            .map_err(OpnetTxError::bitcoin)?
            .finalize(&secp, aggregated_pubkey)
            .map_err(|(_, e)| OpnetTxError::bitcoin(e))?;
        let merkle_root = spend_info
            .merkle_root()
            .ok_or_else(|| OpnetTxError::Bitcoin("multisig vault tree has no merkle root".to_string()))?;

        let output_script = ScriptBuf::new_p2tr(&secp, aggregated_pubkey, Some(merkle_root));
        if vault_utxo.script_pubkey != output_script {
            return Err(OpnetTxError::InvalidContractAddress(
                "vault UTXO script-pubkey does not match the aggregated Taproot output".to_string(),
            ));
        }

        Ok(Self {
            config,
            params,
            script_leaf,
            aggregated_pubkey,
            merkle_root,
            vault_utxo,
            wallet_signer,
            psbt: None,
        })
    }

    pub fn vault_address(&self, network: bitcoin::Network) -> Address {
        let secp = Secp256k1::new();
        Address::p2tr(&secp, self.aggregated_pubkey, Some(self.merkle_root), network)
    }

    /// Start a fresh spend of the vault to `outputs`, converging fees
    /// against the vault's own value.
    pub fn build(&mut self, outputs: Vec<PlannedOutput>) -> Result<()> {
        let output_lens: Vec<usize> = outputs.iter().map(|o| o.script_pubkey.len()).collect();
        let dust_threshold = dust_threshold_for(true);
        let non_refund_value: u64 = outputs.iter().map(|o| o.value).sum();

        let estimate = converge(
            &[InputDimensions::KeyPath],
            &output_lens,
            self.vault_utxo.value,
            non_refund_value,
            self.config.fee_rate_sat_per_vb,
            0,
            dust_threshold,
        )?;

        let mut final_outputs = outputs;
        if let Some(extra) = estimate.refund_amount {
            // No refund script was supplied for a single-output spend; any
            // leftover change must be folded into the caller's last output
            // by construction, since a vault spend has no implicit refund
            // address of its own.
            if let Some(last) = final_outputs.last_mut() {
                last.value += extra;
            }
        }

        let unsigned = bitcoin::Transaction {
            version: bitcoin::transaction::Version(self.config.tx_version),
            lock_time: bitcoin::absolute::LockTime::ZERO,
            input: vec![bitcoin::TxIn {
                previous_output: self.vault_utxo.outpoint(),
                script_sig: ScriptBuf::new(),
                sequence: bitcoin::Sequence::ENABLE_RBF_NO_LOCKTIME,
                witness: bitcoin::Witness::new(),
            }],
            output: final_outputs.iter().map(PlannedOutput::as_txout).collect(),
        };

        let mut psbt = Psbt::from_unsigned_tx(unsigned).map_err(OpnetTxError::bitcoin)?;
        psbt.inputs[0].witness_utxo = Some(self.vault_utxo.as_txout());
        psbt.inputs[0].tap_internal_key = Some(self.aggregated_pubkey);
        psbt.inputs[0].tap_merkle_root = Some(self.merkle_root);
        self.psbt = Some(psbt);
        Ok(())
    }

    /// Continue an in-flight cooperative signing session from a
    /// previously exported base64 PSBT (spec "may be constructed from an
    /// existing base64 PSBT to add additional partial signatures").
    pub fn from_base_psbt(
        config: BuilderConfig,
        params: MultiSigParams,
        vault_utxo: UtxoReference,
        base_psbt_base64: &str,
        wallet_signer: &'a dyn SignerCapability,
    ) -> Result<Self> {
        use base64::Engine;
        let mut builder = Self::new(config, params, vault_utxo, wallet_signer)?;
        let bytes = base64::engine::general_purpose::STANDARD
            .decode(base_psbt_base64)
            .map_err(OpnetTxError::Base64Decode)?;
        let psbt = Psbt::deserialize(&bytes).map_err(OpnetTxError::bitcoin)?;
        builder.psbt = Some(psbt);
        Ok(builder)
    }

    /// Hand the PSBT to this wallet's signer, adding its partial
    /// contribution to the MuSig2 aggregate (or, for a remote cosigner's
    /// turn, simply round-tripping it back unchanged).
    pub async fn sign(&mut self) -> Result<()> {
        let psbt = self
            .psbt
            .take()
            .ok_or_else(|| OpnetTxError::MissingRequiredParam("call build() or from_base_psbt() first"))?;
        let signed = self.wallet_signer.sign_psbt(psbt).await?;
        self.psbt = Some(signed);
        Ok(())
    }

    pub fn export_psbt_base64(&self) -> Result<String> {
        use base64::Engine;
        let psbt = self
            .psbt
            .as_ref()
            .ok_or_else(|| OpnetTxError::MissingRequiredParam("no PSBT to export"))?;
        Ok(base64::engine::general_purpose::STANDARD.encode(psbt.serialize()))
    }

    /// Finalize once a cooperative aggregate signature has landed in the
    /// PSBT's `tap_key_sig` field.
    pub fn extract(&mut self) -> Result<bitcoin::Transaction> {
        let psbt = self
            .psbt
            .as_ref()
            .ok_or_else(|| OpnetTxError::MissingRequiredParam("no PSBT to finalize"))?;
        let signature = psbt.inputs[0]
            .tap_key_sig
            .ok_or(OpnetTxError::MissingTapScriptSignature(0))?;

        let mut tx = psbt.unsigned_tx.clone();
        let mut witness = bitcoin::Witness::new();
        witness.push(signature.to_vec());
        tx.input[0].witness = witness;
        Ok(tx)
    }

    pub fn export_state(&self, chain_id: u32, timestamp: u64) -> Result<TransactionState> {
        Ok(TransactionState {
            header: Header {
                format_version: crate::constants::STATE_FORMAT_VERSION,
                consensus_version: crate::constants::STATE_CONSENSUS_VERSION,
                transaction_type: TransactionKind::MultiSign.as_str().to_string(),
                chain_id,
                timestamp,
            },
            base_params: BaseParams {
                from: self.vault_address(self.params.network.to_bitcoin()).to_string(),
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
            utxos: vec![crate::state::envelope::UtxoEnvelope::from_utxo(&self.vault_utxo)],
            optional_inputs: vec![],
            optional_outputs: vec![],
            address_rotation_enabled: false,
            signer_mappings: vec![],
            type_specific_data: TypeSpecificData::MultiSig {
                public_keys_hex: self
                    .params
                    .public_keys
                    .iter()
                    .map(|k| hex::encode(k.serialize()))
                    .collect(),
                threshold: self.params.threshold,
                base_psbt_base64: self.export_psbt_base64().ok(),
            },
            precomputed_data: PrecomputedData {
                compiled_target_script: Some(hex::encode(self.script_leaf.as_bytes())),
                random_bytes: None,
                estimated_fees: None,
                contract_seed: None,
                contract_address: None,
            },
        })
    }
}
