//! Address → signer rotation map (spec §4.5 "Address rotation", §9).
//!
//! Immutable for the lifetime of one signing cycle: built once before
//! `sign()` runs, consulted per input, never mutated mid-cycle.

use crate::containers::AddressMap;
use crate::error::{OpnetTxError, Result};
use crate::keys::signer::SignerCapability;

/// Maps a canonical address string to the signer capability controlling it.
///
/// When `strict` is set, resolving an address with no entry is an error
/// rather than a silent fallback to the orchestrator's default signer
/// (spec §9: "MUST error rather than silently fall back if rotation is
/// enabled without a complete mapping").
pub struct AddressRotation<'a> {
    signers: AddressMap<&'a dyn SignerCapability>,
    strict: bool,
}

impl<'a> AddressRotation<'a> {
    pub fn new(strict: bool) -> Self {
        Self {
            signers: AddressMap::new(),
            strict,
        }
    }

    pub fn register(&mut self, address: impl Into<String>, signer: &'a dyn SignerCapability) {
        self.signers.insert(address, signer);
    }

    pub fn is_empty(&self) -> bool {
        self.signers.is_empty()
    }

    /// Resolve the signer for `address`. Returns `Err` under a strict
    /// mapping with no matching entry; returns `Ok(None)` otherwise so the
    /// caller can fall back to its default signer.
    pub fn resolve(&self, address: &str) -> Result<Option<&'a dyn SignerCapability>> {
        match self.signers.get(address) {
            Some(signer) => Ok(Some(*signer)),
            None if self.strict => {
                Err(OpnetTxError::SignerMissingForAddress(address.to_string()))
            }
            None => Ok(None),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::keys::signer::{LocalKeypairSigner, SignerIdentity};
    use crate::keys::ClassicalKeypair;
    use bitcoin::secp256k1::{Secp256k1, SecretKey};

    fn signer(byte: u8) -> LocalKeypairSigner {
        let secp = Secp256k1::new();
        let sk = SecretKey::from_slice(&[byte; 32]).unwrap();
        LocalKeypairSigner::new(ClassicalKeypair::from_secret_key(&secp, sk))
    }

    #[test]
    fn strict_mapping_errors_on_unknown_address() {
        let mut rotation = AddressRotation::new(true);
        let s = signer(1);
        let address = s.controlled_address(bitcoin::Network::Regtest).unwrap();
        rotation.register(address.to_string(), &s);
        assert!(rotation.resolve("bcrt1qunknownaddress").is_err());
    }

    #[test]
    fn lenient_mapping_falls_back_to_none() {
        let rotation = AddressRotation::new(false);
        assert_eq!(rotation.resolve("bcrt1qanything").unwrap(), None);
    }
}
