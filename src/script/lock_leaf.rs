//! Lock (recovery) leaf script (spec §3 "Lock leaf script", §4.2 "Cancel
//! transactions").
//!
//! Fixed shape for every transaction of a given kind: the wallet signer
//! alone can spend it, letting them recover funds if the target leaf is
//! never revealed.

use bitcoin::opcodes::all::OP_CHECKSIG;
use bitcoin::script::Builder;
use bitcoin::secp256k1::XOnlyPublicKey;
use bitcoin::ScriptBuf;

/// Build the lock leaf: `<wallet_signer_x_only> OP_CHECKSIG`.
pub fn build_lock_leaf(wallet_signer: &XOnlyPublicKey) -> ScriptBuf {
    Builder::new()
        .push_slice(wallet_signer.serialize())
        .push_opcode(OP_CHECKSIG)
        .into_script()
}

#[cfg(test)]
mod tests {
    use super::*;
    use bitcoin::secp256k1::{Secp256k1, SecretKey};

    #[test]
    fn lock_leaf_embeds_pubkey() {
        let secp = Secp256k1::new();
        let sk = SecretKey::from_slice(&[4u8; 32]).unwrap();
        let (pk, _) = sk.x_only_public_key(&secp);
        let script = build_lock_leaf(&pk);
        let hex_script = script.to_hex_string();
        assert!(hex_script.contains(&hex::encode(pk.serialize())));
        assert!(hex_script.ends_with("ac")); // OP_CHECKSIG
    }
}
