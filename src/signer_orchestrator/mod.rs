//! Signing Orchestrator (spec §4.5, §2 L2).
//!
//! Combines the deterministic script signer (input 0's tapleaf signature)
//! with a user wallet signer, signs independent key-path inputs
//! concurrently, and honors address rotation. The draft itself is mutated
//! only by the calling builder, on the orchestrating task — workers here
//! exchange only immutable `{sighash} -> {signature}` results (spec §5
//! "Shared-resource policy").

pub mod rotation;

use bitcoin::secp256k1::schnorr::Signature as SchnorrSignature;
use bitcoin::TapSighash;

use crate::error::{OpnetTxError, Result};
use crate::keys::signer::{sign_script_path, SignerCapability};
use rotation::AddressRotation;

/// One pending key-path signature, addressed by input index (spec §4.5
/// "workers receive the prehashed sighash and return `{index, signature}`").
pub struct KeyPathJob<'a> {
    pub input_index: usize,
    pub sighash: TapSighash,
    /// The UTXO's controlling address, consulted for rotation; `None`
    /// always resolves to the orchestrator's default signer.
    pub address: Option<&'a str>,
}

#[derive(Debug, Clone, Copy)]
pub struct KeyPathResult {
    pub input_index: usize,
    pub signature: SchnorrSignature,
}

/// Drives the signing of one transaction draft (spec §4.5 "Contract").
pub struct SigningOrchestrator<'a> {
    default_signer: &'a dyn SignerCapability,
    rotation: Option<&'a AddressRotation<'a>>,
}

impl<'a> SigningOrchestrator<'a> {
    pub fn new(default_signer: &'a dyn SignerCapability) -> Self {
        Self {
            default_signer,
            rotation: None,
        }
    }

    pub fn with_rotation(mut self, rotation: &'a AddressRotation<'a>) -> Self {
        self.rotation = Some(rotation);
        self
    }

    fn resolve(&self, address: Option<&str>) -> Result<&'a dyn SignerCapability> {
        if let Some(rotation) = self.rotation {
            if let Some(address) = address {
                if let Some(signer) = rotation.resolve(address)? {
                    return Ok(signer);
                }
            }
        }
        Ok(self.default_signer)
    }

    /// Sign input 0's target-leaf spend (spec §3 invariant 4, §4.5 step 3):
    /// the script signer and the wallet signer each sign the same tapleaf
    /// sighash with their untweaked keypair. Requires a local wallet signer
    /// (a remote/extension wallet signer must instead be driven through
    /// [`SignerCapability::sign_psbt`] and its leaf signature extracted by
    /// the caller from the returned PSBT).
    pub fn sign_target_leaf_input(
        &self,
        script_signer: &crate::keys::ClassicalKeypair,
        wallet_signer: &dyn SignerCapability,
        sighash: TapSighash,
    ) -> Result<(SchnorrSignature, SchnorrSignature)> {
        let script_signature = sign_script_path(script_signer, sighash);
        let wallet_keypair = wallet_signer.local_keypair().ok_or_else(|| {
            OpnetTxError::SignerCapabilityMissing(
                "wallet signer has no local keypair; use sign_psbt for input 0's leaf signature"
                    .to_string(),
            )
        })?;
        let wallet_signature = sign_script_path(wallet_keypair, sighash);
        Ok((script_signature, wallet_signature))
    }

    /// Sign every input ≥ 1 (key-path spends) concurrently, preserving
    /// input order in the returned `Vec` (spec §4.5 "Ordering guarantees":
    /// finalization order for inputs ≥ 1 is by ascending index — callers
    /// rely on this ordering when writing results back into the draft).
    pub async fn sign_key_path_inputs(
        &self,
        jobs: Vec<KeyPathJob<'_>>,
    ) -> Result<Vec<KeyPathResult>> {
        let mut signers = Vec::with_capacity(jobs.len());
        let mut indices = Vec::with_capacity(jobs.len());
        let mut sighashes = Vec::with_capacity(jobs.len());
        for job in &jobs {
            signers.push(self.resolve(job.address)?);
            indices.push(job.input_index);
            sighashes.push(job.sighash);
        }

        let futures = signers
            .iter()
            .zip(sighashes.iter())
            .map(|(signer, sighash)| signer.sign_key_path(*sighash));
        let signatures = futures::future::join_all(futures).await;

        indices
            .into_iter()
            .zip(signatures)
            .map(|(input_index, signature)| {
                signature.map(|signature| KeyPathResult {
                    input_index,
                    signature,
                })
            })
            .collect()
    }
}
