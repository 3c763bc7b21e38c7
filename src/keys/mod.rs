//! Keypair model (spec §2 L0, §3 "Keypair").
//!
//! The underlying secp256k1/Schnorr primitives and the ML-DSA (post-quantum)
//! BIP32 derivation are external collaborators (spec §1 "Out of scope");
//! this module only defines the surface the rest of the crate consumes:
//! a classical keypair the script signer and wallet signer are built from,
//! and a thin marker for the post-quantum variant so `MLDSA_LINK` features
//! (spec §4.1) can bind a public key without this crate reimplementing
//! ML-DSA itself.

pub mod signer;

use bitcoin::key::{Keypair, TapTweak};
use bitcoin::secp256k1::{Secp256k1, SecretKey, Signing, Verification, XOnlyPublicKey};

use crate::containers::SecretBytes;
use crate::error::Result;

/// Security level for the post-quantum (ML-DSA / FIPS 204) keyring.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum MlDsaLevel {
    MlDsa44,
    MlDsa65,
    MlDsa87,
}

/// A post-quantum public key, opaque to this crate beyond its bytes and
/// security level. Derivation and signing live in the external ML-DSA
/// collaborator; this crate only needs to embed the public key bytes in
/// the `MLDSA_LINK` feature payload (spec §4.1).
#[derive(Debug, Clone)]
pub struct MlDsaPublicKey {
    pub level: MlDsaLevel,
    pub bytes: Vec<u8>,
}

/// A classical secp256k1 keypair, scoped-release on drop.
///
/// Lifecycle matches spec §3: created on wallet generation/import, mutated
/// only through BIP32-style child derivation (external collaborator)
/// producing a new `ClassicalKeypair`, destroyed by [`ClassicalKeypair::release`].
pub struct ClassicalKeypair {
    secret: SecretBytes,
    public: XOnlyPublicKey,
}

impl ClassicalKeypair {
    pub fn from_secret_key<C: Signing>(secp: &Secp256k1<C>, secret_key: SecretKey) -> Self {
        let (xonly, _parity) = secret_key.x_only_public_key(secp);
        Self {
            secret: SecretBytes::new(secret_key.secret_bytes().to_vec()),
            public: xonly,
        }
    }

    /// Derive deterministically from 32 bytes of seed material, per spec
    /// invariant 6 ("the transaction's random bytes deterministically
    /// derive the script signer's keypair"). Retries with a tagged
    /// increment on the vanishingly unlikely case the seed is not a valid
    /// secp256k1 scalar.
    pub fn from_deterministic_seed<C: Signing>(
        secp: &Secp256k1<C>,
        seed: &[u8; 32],
    ) -> Result<Self> {
        let mut candidate = *seed;
        loop {
            match SecretKey::from_slice(&candidate) {
                Ok(secret_key) => return Ok(Self::from_secret_key(secp, secret_key)),
                Err(_) => {
                    let hash = bitcoin::hashes::sha256::Hash::hash(&candidate);
                    candidate = *bitcoin::hashes::Hash::as_byte_array(&hash);
                }
            }
        }
    }

    pub fn x_only_public_key(&self) -> XOnlyPublicKey {
        self.public
    }

    pub fn secret_key(&self) -> SecretKey {
        SecretKey::from_slice(self.secret.as_slice()).expect("stored secret is always valid")
    }

    pub fn keypair<C: Signing>(&self, secp: &Secp256k1<C>) -> Keypair {
        Keypair::from_secret_key(secp, &self.secret_key())
    }

    /// Tweak this keypair for Taproot key-path spending (BIP341), given an
    /// optional merkle root.
    pub fn tap_tweak<C: Signing + Verification>(
        &self,
        secp: &Secp256k1<C>,
        merkle_root: Option<bitcoin::taproot::TapNodeHash>,
    ) -> bitcoin::key::TweakedKeypair {
        self.keypair(secp).tap_tweak(secp, merkle_root)
    }

    /// Explicitly zero the secret material now rather than on drop.
    pub fn release(self) {
        self.secret.release();
    }
}

impl std::fmt::Debug for ClassicalKeypair {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ClassicalKeypair")
            .field("public", &self.public)
            .finish_non_exhaustive()
    }
}

use bitcoin::hashes::Hash as _;
