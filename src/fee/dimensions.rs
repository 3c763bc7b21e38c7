//! Weight-based virtual-size estimation (spec §4.4 "Algorithm").
//!
//! Segwit discount: witness bytes count as 1 weight unit, non-witness
//! bytes as 4; `vsize = ceil(weight / 4)`.

use bitcoin::VarInt;

/// Schnorr signature, fixed 64 bytes (no sighash-type byte for `Default`).
pub const SCHNORR_SIG_SIZE: usize = 64;

/// Schnorr signature with an explicit (non-default) sighash-type byte appended.
pub const SCHNORR_SIG_SIZE_WITH_SIGHASH: usize = 65;

pub const XONLY_PUBKEY_SIZE: usize = 32;
pub const CONTROL_BLOCK_BASE_SIZE: usize = 33; // leaf-version|parity byte + internal key
pub const CONTROL_BLOCK_NODE_SIZE: usize = 32; // one sibling hash per tree level

/// Transaction-level overhead: version(4) + locktime(4) + input count
/// varint(1, common case) + output count varint(1, common case).
pub const TX_OVERHEAD_SIZE: usize = 10;

/// Segwit marker + flag bytes, counted once per transaction when any
/// input carries a witness.
pub const TX_SEGWIT_MARKER_FLAG_SIZE: usize = 2;

/// Outpoint(36) + scriptSig-length-prefix(1, empty scriptSig) + sequence(4).
pub const INPUT_BASE_SIZE: usize = 41;

/// value(8) + scriptPubKey length-prefix(1) for a 34-byte P2TR scriptPubKey.
pub const P2TR_OUTPUT_SIZE: usize = 43;

/// value(8) + scriptPubKey length-prefix(1) for a 22-byte P2WSH placeholder
/// (push-then-hash outputs use the 34-byte P2WSH form instead; see
/// [`P2WSH_OUTPUT_SIZE`]).
pub const P2WSH_OUTPUT_SIZE: usize = 43;

fn var_slice_size(length: usize) -> usize {
    VarInt(length as u64).size() + length
}

fn vector_weight(element_lengths: &[usize]) -> usize {
    VarInt(element_lengths.len() as u64).size()
        + element_lengths
            .iter()
            .map(|&len| var_slice_size(len))
            .sum::<usize>()
}

/// Compute the weight units contributed by one input, given its
/// (empty, for segwit/taproot) scriptSig length and its witness element
/// lengths.
pub fn input_weight(witness_components: &[usize]) -> usize {
    let base_size = INPUT_BASE_SIZE;
    let witness_size = if witness_components.is_empty() {
        0
    } else {
        vector_weight(witness_components)
    };
    3 * base_size + base_size + witness_size
}

/// Weight units for an output of `script_pubkey_len` bytes.
pub fn output_weight(script_pubkey_len: usize) -> usize {
    (8 + var_slice_size(script_pubkey_len)) * 4
}

/// Witness component lengths for a key-path Taproot spend (a single
/// Schnorr signature).
pub fn key_path_witness_components(with_sighash_byte: bool) -> Vec<usize> {
    vec![if with_sighash_byte {
        SCHNORR_SIG_SIZE_WITH_SIGHASH
    } else {
        SCHNORR_SIG_SIZE
    }]
}

/// Witness component lengths for the target-leaf script-path spend:
/// secret(32) + script-signer-sig(64) + wallet-signer-sig(64) + leaf
/// script + control block.
pub fn target_leaf_witness_components(leaf_script_len: usize, tree_depth: u8) -> Vec<usize> {
    vec![
        32,
        SCHNORR_SIG_SIZE,
        SCHNORR_SIG_SIZE,
        leaf_script_len,
        control_block_size(tree_depth),
    ]
}

/// Witness component lengths for a cancel (lock-leaf) spend:
/// sig(64) + lock leaf script + control block.
pub fn cancel_witness_components(lock_leaf_script_len: usize, tree_depth: u8) -> Vec<usize> {
    vec![
        SCHNORR_SIG_SIZE,
        lock_leaf_script_len,
        control_block_size(tree_depth),
    ]
}

pub fn control_block_size(tree_depth: u8) -> usize {
    CONTROL_BLOCK_BASE_SIZE + tree_depth as usize * CONTROL_BLOCK_NODE_SIZE
}

/// Virtual size of a transaction given total input/output weight and
/// whether any input carries a witness.
pub fn vsize_from_weight(total_base_weight: usize, witness_weight: usize, has_witness: bool) -> usize {
    let segwit_overhead = if has_witness {
        TX_SEGWIT_MARKER_FLAG_SIZE
    } else {
        0
    };
    let total_weight = total_base_weight + segwit_overhead + witness_weight;
    (total_weight + 3) / 4
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn control_block_grows_with_depth() {
        assert_eq!(control_block_size(1), 33 + 32);
        assert_eq!(control_block_size(0), 33);
    }

    #[test]
    fn vsize_ceils() {
        assert_eq!(vsize_from_weight(1, 0, false), 1);
        assert_eq!(vsize_from_weight(4, 0, false), 1);
        assert_eq!(vsize_from_weight(5, 0, false), 2);
    }
}
