//! Protocol-wide constants.
//!
//! Named and versioned per spec §9 Open Questions: standardness limits
//! that upstream node policy may change are kept as constants here rather
//! than scattered magic numbers.

/// Dust threshold for non-Taproot segwit outputs (P2WPKH/P2WSH), in satoshis.
pub const DUST_SEGWIT: u64 = 546;

/// Dust threshold for Taproot (P2TR) outputs, in satoshis.
pub const DUST_TAPROOT: u64 = 330;

/// Maximum compressed calldata accepted by the Script Compiler.
pub const MAX_COMPRESSED_CALLDATA: usize = 1024 * 1024;

/// Taproot leaf version used for both the target leaf and the lock leaf.
pub const SCRIPT_SIGNER_LEAF_VERSION: u8 = 0xc0;

/// Default transaction version for newly built transactions.
pub const DEFAULT_TX_VERSION: i32 = 2;

/// Minimum value of the epoch-challenge miner reward output.
pub const MINIMUM_AMOUNT_REWARD: u64 = 330;

/// Maximum single push inside a tapscript leaf (consensus `MAX_SCRIPT_ELEMENT_SIZE`).
pub const MAX_SCRIPT_PUSH_SIZE: usize = 520;

/// Maximum aggregate size of a compiled target leaf script.
pub const MAX_COMPILED_SCRIPT_SIZE: usize = 400_000;

/// Maximum bytes in one hash-committed P2WSH chunk.
pub const MAX_HASH_COMMITTED_CHUNK_SIZE: usize = 80;

/// Maximum chunks per hash-committed P2WSH output.
pub const MAX_CHUNKS_PER_OUTPUT: usize = 14;

/// Maximum hash-committed P2WSH outputs a consolidated-interaction setup
/// transaction may create.
pub const MAX_CONSOLIDATED_OUTPUTS: usize = 220;

/// Maximum witness fields allowed in a P2WDA interaction (10 fields of 80 B).
pub const MAX_P2WDA_WITNESS_FIELDS: usize = 10;

/// Bitcoin Core standardness: maximum tapscript size policy limit.
pub const SCRIPT_SIZE_POLICY_LIMIT: usize = 1650;

/// Bitcoin Core standardness: maximum witness stack items for P2WSH.
pub const MAX_STANDARD_P2WSH_STACK_ITEMS: usize = 100;

/// Upper bound on fee-estimation loop iterations (spec §9 Open Question).
pub const MAX_FEE_LOOP_ITERATIONS: usize = 5;

/// Serializable offline-state wire format version.
pub const STATE_FORMAT_VERSION: u32 = 1;

/// Consensus transaction version recorded in offline state.
pub const STATE_CONSENSUS_VERSION: u32 = 2;

/// Taproot tree index of the target (contract) leaf.
pub const TARGET_LEAF_INDEX: u8 = 0;

/// Taproot tree index of the lock (recovery) leaf.
pub const LOCK_LEAF_INDEX: u8 = 1;

/// Annex prefix byte (BIP341).
pub const ANNEX_PREFIX: u8 = 0x50;

/// Dust threshold for the given output script kind.
pub fn dust_threshold_for(is_taproot: bool) -> u64 {
    if is_taproot {
        DUST_TAPROOT
    } else {
        DUST_SEGWIT
    }
}
