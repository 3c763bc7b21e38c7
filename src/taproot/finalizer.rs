//! Witness-stack finalizers (spec §4.2 "Witness stack", §6 "Wire: target
//! leaf witness stack").
//!
//! Each finalizer hand-crafts the exact witness stack for one spend
//! pattern. None of them compute signatures themselves (that is the
//! Signing Orchestrator's job, spec §4.5) — they only assemble already
//! computed signature bytes into the wire-correct stack order.

use bitcoin::secp256k1::schnorr::Signature as SchnorrSignature;
use bitcoin::taproot::ControlBlock;
use bitcoin::{ScriptBuf, Witness};

use crate::constants::ANNEX_PREFIX;
use crate::error::{OpnetTxError, Result};

fn push_annex(witness: &mut Witness, annex: Option<&[u8]>) {
    if let Some(annex) = annex {
        let mut tagged = Vec::with_capacity(annex.len() + 1);
        tagged.push(ANNEX_PREFIX);
        tagged.extend_from_slice(annex);
        witness.push(tagged);
    }
}

/// Finalize the target-leaf spend witness stack:
/// `[ contract-secret, script-signer-signature, wallet-signer-signature,
///    target-leaf-script, control-block, (annex) ]`.
pub fn finalize_target_leaf_witness(
    contract_secret: &[u8],
    script_signer_signature: &SchnorrSignature,
    wallet_signer_signature: &SchnorrSignature,
    leaf_script: &ScriptBuf,
    control_block: &ControlBlock,
    annex: Option<&[u8]>,
) -> Witness {
    let mut witness = Witness::new();
    witness.push(contract_secret);
    witness.push(script_signer_signature.as_ref());
    witness.push(wallet_signer_signature.as_ref());
    witness.push(leaf_script.as_bytes());
    witness.push(control_block.serialize());
    push_annex(&mut witness, annex);
    witness
}

/// Finalize a custom-script target-leaf spend: the caller-supplied witness
/// items replace the `[secret, sigs]` prefix (spec §4.2).
pub fn finalize_custom_script_witness(
    custom_items: &[Vec<u8>],
    leaf_script: &ScriptBuf,
    control_block: &ControlBlock,
    annex: Option<&[u8]>,
) -> Witness {
    let mut witness = Witness::new();
    for item in custom_items {
        witness.push(item);
    }
    witness.push(leaf_script.as_bytes());
    witness.push(control_block.serialize());
    push_annex(&mut witness, annex);
    witness
}

/// Finalize the cancel-transaction witness stack:
/// `[ tap-script-signature, lock-leaf-script, lock-control-block ]`.
pub fn finalize_cancel_witness(
    signature: &SchnorrSignature,
    lock_leaf_script: &ScriptBuf,
    lock_control_block: &ControlBlock,
) -> Witness {
    let mut witness = Witness::new();
    witness.push(signature.as_ref());
    witness.push(lock_leaf_script.as_bytes());
    witness.push(lock_control_block.serialize());
    witness
}

/// Validate a finalized witness has the minimum required elements for a
/// script-path spend (signature(s) + leaf script + control block), used
/// by builders before calling `extract()` (spec §4.3 errors).
pub fn validate_script_path_witness(witness: &Witness, input_index: usize) -> Result<()> {
    if witness.len() < 2 {
        return Err(OpnetTxError::MissingTapScriptSignature(input_index));
    }
    let control_block_bytes = witness
        .last()
        .ok_or(OpnetTxError::MissingControlBlock(input_index))?;
    if control_block_bytes.is_empty() {
        return Err(OpnetTxError::MissingControlBlock(input_index));
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::taproot::TaprootTree;
    use bitcoin::secp256k1::{Message, Secp256k1, SecretKey};

    fn sig() -> SchnorrSignature {
        let secp = Secp256k1::new();
        let sk = SecretKey::from_slice(&[1u8; 32]).unwrap();
        let keypair = bitcoin::key::Keypair::from_secret_key(&secp, &sk);
        let message = Message::from_digest([2u8; 32]);
        secp.sign_schnorr_no_aux_rand(&message, &keypair)
    }

    #[test]
    fn target_leaf_witness_has_expected_shape() {
        let secp = Secp256k1::new();
        let target = ScriptBuf::from_bytes(vec![0x51]);
        let lock = ScriptBuf::from_bytes(vec![0x52]);
        let sk = SecretKey::from_slice(&[9u8; 32]).unwrap();
        let internal_key = sk.x_only_public_key(&secp).0;
        let tree = TaprootTree::build(&secp, target.clone(), lock, internal_key).unwrap();
        let control_block = tree.target_control_block().unwrap();

        let signature = sig();
        let witness = finalize_target_leaf_witness(
            &[0u8; 32],
            &signature,
            &signature,
            &target,
            &control_block,
            None,
        );

        assert_eq!(witness.len(), 5);
        validate_script_path_witness(&witness, 0).unwrap();
    }

    #[test]
    fn annex_is_tagged_with_0x50() {
        let secp = Secp256k1::new();
        let target = ScriptBuf::from_bytes(vec![0x51]);
        let lock = ScriptBuf::from_bytes(vec![0x52]);
        let sk = SecretKey::from_slice(&[9u8; 32]).unwrap();
        let internal_key = sk.x_only_public_key(&secp).0;
        let tree = TaprootTree::build(&secp, target.clone(), lock, internal_key).unwrap();
        let control_block = tree.target_control_block().unwrap();
        let signature = sig();

        let witness = finalize_target_leaf_witness(
            &[0u8; 32],
            &signature,
            &signature,
            &target,
            &control_block,
            Some(b"annex-data"),
        );
        assert_eq!(witness.len(), 6);
        let annex_item: Vec<u8> = witness.last().unwrap().to_vec();
        assert_eq!(annex_item[0], ANNEX_PREFIX);
    }

    #[test]
    fn rejects_empty_witness() {
        let witness = Witness::new();
        assert!(validate_script_path_witness(&witness, 0).is_err());
    }
}
