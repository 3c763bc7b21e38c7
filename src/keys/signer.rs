//! Signer capability abstraction (spec §4.5, §1).
//!
//! The Signing Orchestrator treats "a deterministic local keypair" and "a
//! browser-extension wallet signer" (Unisat/Xverse RPC surfaces) uniformly
//! through this trait. Concrete in-wallet signer implementations are
//! external collaborators (spec §1); this crate only defines the
//! capability surface and a local-keypair implementation.

use async_trait::async_trait;
use bitcoin::psbt::Psbt;
use bitcoin::secp256k1::schnorr::Signature as SchnorrSignature;
use bitcoin::secp256k1::{Message, Secp256k1};
use bitcoin::{Address, TapSighash};

use crate::error::{OpnetTxError, Result};
use crate::keys::ClassicalKeypair;

/// Identifies which wallet-controlled public key/address a signer speaks
/// for, used by the address-rotation map (spec §4.5 "Address rotation").
pub trait SignerIdentity {
    fn controlled_address(&self, network: bitcoin::Network) -> Result<Address>;

    /// The raw (untweaked) x-only public key this signer controls, used to
    /// embed the wallet signer's key directly into a leaf script (the
    /// target leaf's `OP_CHECKSIG` pubkey, the lock leaf's sole pubkey).
    fn x_only_public_key(&self) -> Result<bitcoin::secp256k1::XOnlyPublicKey>;
}

/// A capability that can produce Schnorr signatures for Taproot key-path
/// spends, either locally or by delegating to an external wallet.
#[async_trait(?Send)]
pub trait SignerCapability: SignerIdentity {
    /// Sign a single prehashed Taproot key-path sighash.
    async fn sign_key_path(&self, sighash: TapSighash) -> Result<SchnorrSignature>;

    /// Whether this signer exposes a `multiSignPsbt`-style bulk capability
    /// (spec §4.5 point 2). When `true`, the orchestrator calls
    /// [`SignerCapability::sign_psbt`] once instead of signing inputs
    /// individually.
    fn supports_bulk_psbt_signing(&self) -> bool {
        false
    }

    /// Sign every wallet-controlled input of `psbt` in one round trip.
    async fn sign_psbt(&self, psbt: Psbt) -> Result<Psbt> {
        let _ = psbt;
        Err(OpnetTxError::SignerCapabilityMissing(
            "bulk PSBT signing not supported by this signer".to_string(),
        ))
    }

    /// The untweaked classical keypair backing this signer, when it is a
    /// local in-memory signer. A tapleaf script-path signature (spec §4.2)
    /// is produced directly against this keypair; remote/extension signers
    /// return `None` and must be driven through [`SignerCapability::sign_psbt`]
    /// instead (spec §4.5 point 2).
    fn local_keypair(&self) -> Option<&ClassicalKeypair> {
        None
    }
}

/// A signer backed by a local, in-memory [`ClassicalKeypair`].
///
/// This is both the "script signer" (deterministically derived from the
/// transaction's random bytes, spec invariant 6) and the default shape of
/// a "wallet signer" when no browser extension is in use.
pub struct LocalKeypairSigner {
    keypair: ClassicalKeypair,
}

impl LocalKeypairSigner {
    pub fn new(keypair: ClassicalKeypair) -> Self {
        Self { keypair }
    }

    pub fn x_only_public_key(&self) -> bitcoin::secp256k1::XOnlyPublicKey {
        self.keypair.x_only_public_key()
    }
}

impl SignerIdentity for LocalKeypairSigner {
    fn controlled_address(&self, network: bitcoin::Network) -> Result<Address> {
        let secp = Secp256k1::new();
        let tweaked = self.keypair.tap_tweak(&secp, None);
        Ok(Address::p2tr_tweaked(
            tweaked.to_inner().public_key().into(),
            network,
        ))
    }

    fn x_only_public_key(&self) -> Result<bitcoin::secp256k1::XOnlyPublicKey> {
        Ok(self.keypair.x_only_public_key())
    }
}

#[async_trait(?Send)]
impl SignerCapability for LocalKeypairSigner {
    async fn sign_key_path(&self, sighash: TapSighash) -> Result<SchnorrSignature> {
        let secp = Secp256k1::new();
        let tweaked = self.keypair.tap_tweak(&secp, None);
        let message = Message::from_digest(sighash.to_byte_array());
        Ok(secp.sign_schnorr_no_aux_rand(&message, &tweaked.to_inner()))
    }

    fn local_keypair(&self) -> Option<&ClassicalKeypair> {
        Some(&self.keypair)
    }
}

/// Sign a Taproot script-path leaf with an untweaked keypair (no tweak
/// applied — the script path never tweaks the signing key, only the
/// output key, per BIP341).
pub fn sign_script_path(
    keypair: &ClassicalKeypair,
    sighash: bitcoin::TapSighash,
) -> SchnorrSignature {
    let secp = Secp256k1::new();
    let untweaked = keypair.keypair(&secp);
    let message = Message::from_digest(sighash.to_byte_array());
    secp.sign_schnorr_no_aux_rand(&message, &untweaked)
}

use bitcoin::hashes::Hash as _;

#[cfg(test)]
mod tests {
    use super::*;
    use bitcoin::secp256k1::SecretKey;

    #[tokio::test]
    async fn local_signer_produces_valid_schnorr_signature() {
        let secp = Secp256k1::new();
        let secret_key = SecretKey::from_slice(&[3u8; 32]).unwrap();
        let keypair = ClassicalKeypair::from_secret_key(&secp, secret_key);
        let signer = LocalKeypairSigner::new(keypair);

        let sighash = TapSighash::from_byte_array([9u8; 32]);
        let sig = signer.sign_key_path(sighash).await.unwrap();

        let tweaked_pubkey = {
            let secp = Secp256k1::new();
            let untweaked = SecretKey::from_slice(&[3u8; 32]).unwrap();
            let kp = bitcoin::key::Keypair::from_secret_key(&secp, &untweaked);
            kp.tap_tweak(&secp, None).to_inner().x_only_public_key().0
        };
        let message = Message::from_digest(sighash.to_byte_array());
        assert!(secp.verify_schnorr(&sig, &message, &tweaked_pubkey).is_ok());
    }
}
