//! Cancel builder (spec §4.2 "Cancel transactions", §4.3, §8 scenario 4).
//!
//! Spends the lock leaf of an abandoned target output — the target leaf
//! was never revealed, so the wallet signer alone recovers the funds.
//! Input 0 is the abandoned output itself; additional wallet UTXOs may be
//! pushed in if input 0's value can't cover the fee on its own.

use bitcoin::secp256k1::{Secp256k1, XOnlyPublicKey};
use bitcoin::taproot::LeafVersion;
use bitcoin::ScriptBuf;

use crate::builders::{
    select_utxos_for_target, BuilderConfig, BuilderState, PlannedOutput, TapLeafBinding,
    TransactionDraft, TransactionKind, UtxoReference,
};
use crate::constants::{dust_threshold_for, SCRIPT_SIGNER_LEAF_VERSION};
use crate::error::{OpnetTxError, Result};
use crate::fee::{converge, InputDimensions};
use crate::keys::signer::{sign_script_path, SignerCapability};
use crate::network::Network;
use crate::script::lock_leaf::build_lock_leaf;
use crate::signer_orchestrator::{KeyPathJob, SigningOrchestrator};
use crate::state::envelope::{BaseParams, Header, PrecomputedData, TypeSpecificData};
use crate::state::TransactionState;
use crate::taproot::TaprootTree;

pub struct CancelParams {
    /// The target leaf script committed to by the abandoned output, needed
    /// to rebuild the same Taproot tree and derive the lock leaf's control
    /// block (spec invariant 3: both leaves share one tree).
    pub target_leaf_script: ScriptBuf,
    /// The wallet signer's untweaked x-only public key — both the tree's
    /// internal key and the lock leaf's sole signer.
    pub main_signer_pubkey: XOnlyPublicKey,
    pub refund_address: bitcoin::Address,
    pub network: Network,
}

pub struct CancelBuilder<'a> {
    config: BuilderConfig,
    params: CancelParams,
    tree: TaprootTree,
    lock_leaf: ScriptBuf,
    wallet_signer: &'a dyn SignerCapability,
    draft: TransactionDraft,
}

impl<'a> CancelBuilder<'a> {
    pub fn new(
        config: BuilderConfig,
        params: CancelParams,
        target_utxo: &UtxoReference,
        wallet_signer: &'a dyn SignerCapability,
    ) -> Result<Self> {
        let secp = Secp256k1::new();
        let lock_leaf = build_lock_leaf(&params.main_signer_pubkey);
        let tree = TaprootTree::build(
            &secp,
            params.target_leaf_script.clone(),
            lock_leaf.clone(),
            params.main_signer_pubkey,
        )?;

        if target_utxo.script_pubkey != tree.output_script() {
            return Err(OpnetTxError::InvalidContractAddress(
                "target UTXO script-pubkey does not match the computed Taproot tree output"
                    .to_string(),
            ));
        }

        let mut draft = TransactionDraft::new(config.tx_version);
        let control_block = tree.lock_control_block()?;
        draft.push_input(
            target_utxo.clone(),
            Some(TapLeafBinding {
                leaf_script: lock_leaf.clone(),
                control_block: control_block.serialize(),
                tree_depth: 1,
            }),
        );

        Ok(Self {
            config,
            params,
            tree,
            lock_leaf,
            wallet_signer,
            draft,
        })
    }

    /// Select any extra fee-paying wallet UTXOs needed, compose the single
    /// refund output, and converge fees (spec §8 scenario 4: "refund output
    /// carries the rest minus fee").
    pub fn build(&mut self, extra_fee_utxos: &[UtxoReference]) -> Result<()> {
        self.draft.ensure_not_finalized()?;

        let refund_script = self.params.refund_address.script_pubkey();
        let dust_threshold = dust_threshold_for(refund_script.is_p2tr());

        let target_value = self.draft.inputs[0].value;
        let estimated_without_extra = converge(
            &[InputDimensions::Cancel {
                lock_leaf_script_len: self.lock_leaf.len(),
                tree_depth: 1,
            }],
            &[],
            target_value,
            0,
            self.config.fee_rate_sat_per_vb,
            refund_script.len(),
            dust_threshold,
        );

        let selected_extra = match estimated_without_extra {
            Ok(_) => Vec::new(),
            Err(_) => {
                let (selected, _total) = select_utxos_for_target(extra_fee_utxos, dust_threshold)?;
                selected
            }
        };
        for utxo in &selected_extra {
            self.draft.push_input(utxo.clone(), None);
        }

        let mut input_dims = vec![InputDimensions::Cancel {
            lock_leaf_script_len: self.lock_leaf.len(),
            tree_depth: 1,
        }];
        input_dims.extend(selected_extra.iter().map(|_| InputDimensions::KeyPath));

        let estimate = converge(
            &input_dims,
            &[],
            self.draft.total_input_value(),
            0,
            self.config.fee_rate_sat_per_vb,
            refund_script.len(),
            dust_threshold,
        )?;

        let mut outputs = Vec::new();
        if let Some(change) = estimate.refund_amount {
            outputs.push(PlannedOutput {
                value: change,
                script_pubkey: refund_script,
            });
        }

        self.draft.fee_output_index = estimate.refund_amount.map(|_| 0);
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
        let leaf_hash = bitcoin::taproot::TapLeafHash::from_script(&self.lock_leaf, leaf_version);
        let lock_sighash = cache
            .taproot_script_spend_signature_hash(
                0,
                &prevouts,
                leaf_hash,
                bitcoin::sighash::TapSighashType::Default,
            )
            .map_err(OpnetTxError::sighash)?;

        let wallet_keypair = self.wallet_signer.local_keypair().ok_or_else(|| {
            OpnetTxError::SignerCapabilityMissing(
                "wallet signer has no local keypair; use sign_psbt to spend the lock leaf"
                    .to_string(),
            )
        })?;
        let signature = sign_script_path(wallet_keypair, lock_sighash);

        let control_block = self.tree.lock_control_block()?;
        self.draft.witnesses[0] = crate::taproot::finalizer::finalize_cancel_witness(
            &signature,
            &self.lock_leaf,
            &control_block,
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
        let target = &self.draft.inputs[0];
        TransactionState {
            header: Header {
                format_version: crate::constants::STATE_FORMAT_VERSION,
                consensus_version: crate::constants::STATE_CONSENSUS_VERSION,
                transaction_type: TransactionKind::Cancel.as_str().to_string(),
                chain_id,
                timestamp,
            },
            base_params: BaseParams {
                from: self.params.refund_address.to_string(),
                to: Some(self.params.refund_address.to_string()),
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
            type_specific_data: TypeSpecificData::Cancel {
                target_txid: target.txid.to_string(),
                target_vout: target.vout,
                lock_leaf_script_hex: hex::encode(self.lock_leaf.as_bytes()),
            },
            precomputed_data: PrecomputedData {
                compiled_target_script: Some(hex::encode(self.params.target_leaf_script.as_bytes())),
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
    use bitcoin::hashes::Hash;
    use bitcoin::secp256k1::SecretKey;

    fn wallet_signer() -> LocalKeypairSigner {
        let secp = Secp256k1::new();
        let sk = SecretKey::from_slice(&[41u8; 32]).unwrap();
        LocalKeypairSigner::new(ClassicalKeypair::from_secret_key(&secp, sk))
    }

    fn target_utxo(signer: &LocalKeypairSigner) -> (UtxoReference, ScriptBuf) {
        let main_signer = signer.x_only_public_key().unwrap();
        let target_leaf_script = ScriptBuf::from_bytes(vec![0x51]);
        let lock_leaf = build_lock_leaf(&main_signer);
        let secp = Secp256k1::new();
        let tree =
            TaprootTree::build(&secp, target_leaf_script.clone(), lock_leaf, main_signer).unwrap();
        let utxo = UtxoReference {
            txid: bitcoin::Txid::all_zeros(),
            vout: 0,
            value: 50_000,
            script_pubkey: tree.output_script(),
            address: None,
            redeem_script: None,
            witness_script: None,
            non_witness_utxo: None,
        };
        (utxo, target_leaf_script)
    }

    #[tokio::test]
    async fn recovers_abandoned_target_to_refund_address() {
        let signer = wallet_signer();
        let (utxo, target_leaf_script) = target_utxo(&signer);
        let params = CancelParams {
            target_leaf_script,
            main_signer_pubkey: signer.x_only_public_key().unwrap(),
            refund_address: signer.controlled_address(bitcoin::Network::Regtest).unwrap(),
            network: Network::Regtest,
        };
        let config = BuilderConfig::new(Network::Regtest, 1.0);
        let mut builder = CancelBuilder::new(config, params, &utxo, &signer).unwrap();
        builder.build(&[]).unwrap();
        builder.sign().await.unwrap();
        let tx = builder.extract().unwrap();
        assert_eq!(tx.input.len(), 1);
        assert_eq!(tx.output.len(), 1);
        assert!(tx.output[0].value.to_sat() < 50_000);
    }
}
