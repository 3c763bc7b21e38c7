//! Consolidated-interaction builder (spec §4.2 "Consolidated interaction",
//! glossary "hash-committed P2WSH").
//!
//! Large calldata that would overflow a single tapscript push is split
//! into chunks, each hash-committed inside its own P2WSH output by a
//! setup transaction; a later reveal transaction spends every chunk
//! output, supplying the preimages, and reassembles the calldata for the
//! actual contract interaction.

use bitcoin::hashes::{hash160, Hash};
use bitcoin::opcodes::all::{OP_CHECKSIG, OP_EQUALVERIFY, OP_HASH160};
use bitcoin::script::Builder;
use bitcoin::secp256k1::{PublicKey, Secp256k1};
use bitcoin::{Amount, ScriptBuf, WScriptHash};

use crate::builders::{
    select_utxos_for_target, BuilderConfig, BuilderState, PlannedOutput, TransactionDraft,
    TransactionKind, UtxoReference,
};
use crate::constants::{
    dust_threshold_for, MAX_CHUNKS_PER_OUTPUT, MAX_CONSOLIDATED_OUTPUTS,
    MAX_HASH_COMMITTED_CHUNK_SIZE, MAX_STANDARD_P2WSH_STACK_ITEMS, SCRIPT_SIZE_POLICY_LIMIT,
};
use crate::error::{OpnetTxError, Result};
use crate::fee::{converge, InputDimensions};
use crate::keys::signer::SignerCapability;
use crate::network::Network;
use crate::signer_orchestrator::{KeyPathJob, SigningOrchestrator};
use crate::state::envelope::{BaseParams, Header, PrecomputedData, TypeSpecificData};
use crate::state::TransactionState;

/// Split `data` into `MAX_HASH_COMMITTED_CHUNK_SIZE`-byte pieces.
pub fn chunk_calldata(data: &[u8]) -> Vec<Vec<u8>> {
    if data.is_empty() {
        return vec![];
    }
    data.chunks(MAX_HASH_COMMITTED_CHUNK_SIZE)
        .map(|c| c.to_vec())
        .collect()
}

/// Group chunks into outputs of at most `MAX_CHUNKS_PER_OUTPUT` each,
/// rejecting a plan that would need more than `MAX_CONSOLIDATED_OUTPUTS`.
pub fn group_chunks_into_outputs(chunks: &[Vec<u8>]) -> Result<Vec<Vec<Vec<u8>>>> {
    let groups: Vec<Vec<Vec<u8>>> = chunks
        .chunks(MAX_CHUNKS_PER_OUTPUT)
        .map(|g| g.to_vec())
        .collect();
    if groups.len() > MAX_CONSOLIDATED_OUTPUTS {
        return Err(OpnetTxError::ChunkCountExceedsStandardTxLimit {
            count: groups.len(),
            max: MAX_CONSOLIDATED_OUTPUTS,
        });
    }
    Ok(groups)
}

/// The witness script committing a group of chunks: each chunk must
/// HASH160-match the embedded 20-byte commitment (checked top-of-stack
/// first, so chunks are committed in reverse order), then the owner's
/// signature authorizes the spend.
pub fn build_chunk_commitment_script(chunks: &[Vec<u8>], owner: &PublicKey) -> Result<ScriptBuf> {
    if chunks.len() > MAX_STANDARD_P2WSH_STACK_ITEMS {
        return Err(OpnetTxError::TooManyWitnessFields {
            count: chunks.len(),
            max: MAX_STANDARD_P2WSH_STACK_ITEMS,
        });
    }
    let mut builder = Builder::new();
    for chunk in chunks.iter().rev() {
        let digest = hash160::Hash::hash(chunk).to_byte_array();
        builder = builder.push_opcode(OP_HASH160).push_slice(digest).push_opcode(OP_EQUALVERIFY);
    }
    builder = builder.push_slice(owner.serialize()).push_opcode(OP_CHECKSIG);
    let script = builder.into_script();
    if script.len() > SCRIPT_SIZE_POLICY_LIMIT {
        return Err(OpnetTxError::CompiledScriptTooLarge {
            size: script.len(),
            max: SCRIPT_SIZE_POLICY_LIMIT,
        });
    }
    Ok(script)
}

fn p2wsh_script(witness_script: &ScriptBuf) -> ScriptBuf {
    ScriptBuf::new_p2wsh(&WScriptHash::hash(witness_script.as_bytes()))
}

/// Builds the setup transaction: one hash-committed P2WSH output per
/// chunk group, funded from the wallet.
pub struct ConsolidatedSetupBuilder<'a> {
    config: BuilderConfig,
    owner: PublicKey,
    chunk_groups: Vec<Vec<Vec<u8>>>,
    witness_scripts: Vec<ScriptBuf>,
    chunk_output_value: u64,
    refund_address: bitcoin::Address,
    wallet_signer: &'a dyn SignerCapability,
    draft: TransactionDraft,
}

impl<'a> ConsolidatedSetupBuilder<'a> {
    pub fn new(
        config: BuilderConfig,
        calldata: &[u8],
        owner: PublicKey,
        chunk_output_value: u64,
        refund_address: bitcoin::Address,
        wallet_signer: &'a dyn SignerCapability,
    ) -> Result<Self> {
        let chunks = chunk_calldata(calldata);
        let chunk_groups = group_chunks_into_outputs(&chunks)?;
        let witness_scripts = chunk_groups
            .iter()
            .map(|group| build_chunk_commitment_script(group, &owner))
            .collect::<Result<Vec<_>>>()?;
        let draft = TransactionDraft::new(config.tx_version);

        Ok(Self {
            config,
            owner,
            chunk_groups,
            witness_scripts,
            chunk_output_value,
            refund_address,
            wallet_signer,
            draft,
        })
    }

    pub fn chunk_output_scripts(&self) -> Vec<ScriptBuf> {
        self.witness_scripts.iter().map(p2wsh_script).collect()
    }

    pub fn build(&mut self, available: &[UtxoReference]) -> Result<()> {
        self.draft.ensure_not_finalized()?;

        let chunk_outputs: Vec<PlannedOutput> = self
            .chunk_output_scripts()
            .into_iter()
            .map(|script| PlannedOutput {
                value: self.chunk_output_value,
                script_pubkey: script,
            })
            .collect();
        let non_refund_value = self.chunk_output_value * chunk_outputs.len() as u64;

        let (selected, total) = select_utxos_for_target(available, non_refund_value)?;
        for utxo in &selected {
            self.draft.push_input(utxo.clone(), None);
        }

        let refund_script = self.refund_address.script_pubkey();
        let dust_threshold = dust_threshold_for(refund_script.is_p2tr());
        let input_dims: Vec<InputDimensions> = selected.iter().map(|_| InputDimensions::KeyPath).collect();
        let output_lens: Vec<usize> = chunk_outputs.iter().map(|o| o.script_pubkey.len()).collect();

        let estimate = converge(
            &input_dims,
            &output_lens,
            total,
            non_refund_value,
            self.config.fee_rate_sat_per_vb,
            refund_script.len(),
            dust_threshold,
        )?;

        let mut outputs = chunk_outputs;
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
                transaction_type: TransactionKind::ConsolidatedInteraction.as_str().to_string(),
                chain_id,
                timestamp,
            },
            base_params: BaseParams {
                from: self.refund_address.to_string(),
                to: None,
                fee_rate: self.config.fee_rate_sat_per_vb,
                priority_fee: 0,
                gas_sat_fee: 0,
                network: self.config.network,
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
            type_specific_data: TypeSpecificData::ConsolidatedInteraction {
                chunks_hex: self
                    .chunk_groups
                    .iter()
                    .flatten()
                    .map(hex::encode)
                    .collect(),
            },
            precomputed_data: PrecomputedData {
                compiled_target_script: Some(hex::encode(self.owner.serialize())),
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

/// Spends every chunk output produced by a setup transaction, supplying
/// the preimages, and reassembles the original calldata alongside the
/// reveal (spec: the actual contract interaction rides in the same
/// transaction as the reveal, in the teacher's "common output layout").
pub struct ConsolidatedRevealBuilder<'a> {
    config: BuilderConfig,
    chunk_groups: Vec<Vec<Vec<u8>>>,
    witness_scripts: Vec<ScriptBuf>,
    chunk_utxos: Vec<UtxoReference>,
    owner_keypair: &'a crate::keys::ClassicalKeypair,
    network: Network,
    draft: TransactionDraft,
}

impl<'a> ConsolidatedRevealBuilder<'a> {
    pub fn new(
        config: BuilderConfig,
        chunk_groups: Vec<Vec<Vec<u8>>>,
        chunk_utxos: Vec<UtxoReference>,
        owner_keypair: &'a crate::keys::ClassicalKeypair,
        network: Network,
    ) -> Result<Self> {
        if chunk_groups.len() != chunk_utxos.len() {
            return Err(OpnetTxError::MissingRequiredParam(
                "chunk groups and chunk UTXOs must have the same length",
            ));
        }
        let secp = Secp256k1::new();
        let owner = PublicKey::from_secret_key(&secp, &owner_keypair.secret_key());
        let witness_scripts = chunk_groups
            .iter()
            .map(|group| build_chunk_commitment_script(group, &owner))
            .collect::<Result<Vec<_>>>()?;
        for (utxo, script) in chunk_utxos.iter().zip(&witness_scripts) {
            if utxo.script_pubkey != p2wsh_script(script) {
                return Err(OpnetTxError::InvalidContractAddress(
                    "chunk UTXO does not match its committed witness script".to_string(),
                ));
            }
        }

        let mut draft = TransactionDraft::new(config.tx_version);
        for utxo in &chunk_utxos {
            draft.push_input(utxo.clone(), None);
        }

        Ok(Self {
            config,
            chunk_groups,
            witness_scripts,
            chunk_utxos,
            owner_keypair,
            network,
            draft,
        })
    }

    pub fn reassembled_calldata(&self) -> Vec<u8> {
        self.chunk_groups.iter().flatten().flatten().copied().collect()
    }

    pub fn build(&mut self, outputs: Vec<PlannedOutput>, refund_address: bitcoin::Address) -> Result<()> {
        self.draft.ensure_not_finalized()?;

        let total_input_value: u64 = self.chunk_utxos.iter().map(|u| u.value).sum();
        let non_refund_value: u64 = outputs.iter().map(|o| o.value).sum();
        let refund_script = refund_address.script_pubkey();
        let dust_threshold = dust_threshold_for(refund_script.is_p2tr());

        let input_dims: Vec<InputDimensions> = self
            .witness_scripts
            .iter()
            .map(|script| InputDimensions::Explicit {
                witness_components: vec![64, script.len()],
            })
            .collect();
        let output_lens: Vec<usize> = outputs.iter().map(|o| o.script_pubkey.len()).collect();

        let estimate = converge(
            &input_dims,
            &output_lens,
            total_input_value,
            non_refund_value,
            self.config.fee_rate_sat_per_vb,
            refund_script.len(),
            dust_threshold,
        )?;

        let mut final_outputs = outputs;
        if let Some(change) = estimate.refund_amount {
            final_outputs.push(PlannedOutput {
                value: change,
                script_pubkey: refund_script,
            });
        }

        self.draft.fee_output_index = estimate.refund_amount.map(|_| final_outputs.len() - 1);
        self.draft.outputs = final_outputs;
        self.draft.cached_vsize = Some(estimate.vsize);
        self.draft.state = BuilderState::OutputsComposed;
        Ok(())
    }

    pub fn sign(&mut self) -> Result<()> {
        self.draft.ensure_not_finalized()?;
        let secp = Secp256k1::new();
        let secret_key = self.owner_keypair.secret_key();
        let unsigned = self.draft.unsigned_transaction();
        let mut cache = bitcoin::sighash::SighashCache::new(&unsigned);
        let sighash_type = bitcoin::sighash::EcdsaSighashType::All;

        for index in 0..self.draft.inputs.len() {
            let value = Amount::from_sat(self.chunk_utxos[index].value);
            let sighash = cache
                .segwit_signature_hash(index, &self.witness_scripts[index], value, sighash_type)
                .map_err(OpnetTxError::sighash)?;
            let message = bitcoin::secp256k1::Message::from_digest(sighash.to_byte_array());
            let signature = secp.sign_ecdsa(&message, &secret_key);

            let mut sig_with_hashtype = signature.serialize_der().to_vec();
            sig_with_hashtype.push(sighash_type as u8);

            let mut witness = bitcoin::Witness::new();
            witness.push(sig_with_hashtype);
            for chunk in self.chunk_groups[index].iter() {
                witness.push(chunk);
            }
            witness.push(self.witness_scripts[index].as_bytes());
            self.draft.witnesses[index] = witness;
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
                transaction_type: TransactionKind::ConsolidatedInteraction.as_str().to_string(),
                chain_id,
                timestamp,
            },
            base_params: BaseParams {
                from: String::new(),
                to: None,
                fee_rate: self.config.fee_rate_sat_per_vb,
                priority_fee: 0,
                gas_sat_fee: 0,
                network: self.network,
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
            type_specific_data: TypeSpecificData::ConsolidatedInteraction {
                chunks_hex: self
                    .chunk_groups
                    .iter()
                    .flatten()
                    .map(hex::encode)
                    .collect(),
            },
            precomputed_data: PrecomputedData {
                compiled_target_script: None,
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

#[cfg(test)]
mod tests {
    use super::*;
    use crate::keys::signer::{LocalKeypairSigner, SignerIdentity};
    use crate::keys::ClassicalKeypair;
    use bitcoin::hashes::Hash as _;
    use bitcoin::secp256k1::SecretKey;

    fn wallet_signer() -> LocalKeypairSigner {
        let secp = Secp256k1::new();
        let sk = SecretKey::from_slice(&[71u8; 32]).unwrap();
        LocalKeypairSigner::new(ClassicalKeypair::from_secret_key(&secp, sk))
    }

    fn full_pubkey(sk_byte: u8) -> PublicKey {
        let secp = Secp256k1::new();
        let sk = SecretKey::from_slice(&[sk_byte; 32]).unwrap();
        PublicKey::from_secret_key(&secp, &sk)
    }

    #[test]
    fn chunks_calldata_into_80_byte_pieces() {
        let data = vec![0u8; 200];
        let chunks = chunk_calldata(&data);
        assert_eq!(chunks.len(), 3);
        assert_eq!(chunks[0].len(), MAX_HASH_COMMITTED_CHUNK_SIZE);
        assert_eq!(chunks[2].len(), 40);
    }

    #[test]
    fn groups_respect_max_chunks_per_output() {
        let chunks: Vec<Vec<u8>> = (0..30).map(|i| vec![i as u8]).collect();
        let groups = group_chunks_into_outputs(&chunks).unwrap();
        assert_eq!(groups.len(), 3); // 14 + 14 + 2
        assert_eq!(groups[0].len(), MAX_CHUNKS_PER_OUTPUT);
    }

    #[test]
    fn rejects_plans_needing_too_many_outputs() {
        let chunks: Vec<Vec<u8>> = (0..(MAX_CONSOLIDATED_OUTPUTS * MAX_CHUNKS_PER_OUTPUT + 1))
            .map(|i| vec![i as u8])
            .collect();
        assert!(group_chunks_into_outputs(&chunks).is_err());
    }

    #[tokio::test]
    async fn setup_transaction_produces_one_output_per_chunk_group() {
        let signer = wallet_signer();
        let address = signer.controlled_address(bitcoin::Network::Regtest).unwrap();
        let owner = full_pubkey(71);
        let config = BuilderConfig::new(Network::Regtest, 1.0);
        let calldata = vec![9u8; 200]; // 3 chunks, 1 output group
        let mut builder =
            ConsolidatedSetupBuilder::new(config, &calldata, owner, 10_000, address.clone(), &signer)
                .unwrap();

        let available = vec![UtxoReference {
            txid: bitcoin::Txid::all_zeros(),
            vout: 0,
            value: 100_000,
            script_pubkey: address.script_pubkey(),
            address: Some(address),
            redeem_script: None,
            witness_script: None,
            non_witness_utxo: None,
        }];
        builder.build(&available).unwrap();
        builder.sign().await.unwrap();
        let tx = builder.extract().unwrap();
        assert_eq!(tx.output[0].script_pubkey.is_p2wsh(), true);
    }

    #[test]
    fn reveal_reassembles_original_calldata_and_signs_each_chunk_output() {
        let secp = Secp256k1::new();
        let sk = SecretKey::from_slice(&[83u8; 32]).unwrap();
        let keypair = ClassicalKeypair::from_secret_key(&secp, sk);
        let owner = PublicKey::from_secret_key(&secp, &keypair.secret_key());

        let calldata = vec![7u8; 90]; // 2 chunks, 1 output group
        let chunks = chunk_calldata(&calldata);
        let chunk_groups = group_chunks_into_outputs(&chunks).unwrap();
        let witness_script = build_chunk_commitment_script(&chunk_groups[0], &owner).unwrap();
        let chunk_utxo = UtxoReference {
            txid: bitcoin::Txid::all_zeros(),
            vout: 0,
            value: 10_000,
            script_pubkey: p2wsh_script(&witness_script),
            address: None,
            redeem_script: None,
            witness_script: None,
            non_witness_utxo: None,
        };

        let config = BuilderConfig::new(Network::Regtest, 1.0);
        let mut builder = ConsolidatedRevealBuilder::new(
            config,
            chunk_groups,
            vec![chunk_utxo],
            &keypair,
            Network::Regtest,
        )
        .unwrap();

        assert_eq!(builder.reassembled_calldata(), calldata);

        let refund_address =
            bitcoin::Address::p2wpkh(&bitcoin::PublicKey::new(owner), bitcoin::Network::Regtest);
        builder.build(vec![], refund_address).unwrap();
        builder.sign().unwrap();
        let tx = builder.extract().unwrap();
        assert_eq!(tx.input.len(), 1);
        assert_eq!(tx.input[0].witness.len(), 4); // sig + 2 chunks + witness script
    }
}
