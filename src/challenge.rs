//! Challenge solution and time-lock P2WSH derivation (spec §3 "Challenge
//! solution", glossary "Time-lock P2WSH").
//!
//! The actual proof-of-work / difficulty verification is protocol logic
//! external to this core (we only need the solution's shape to derive the
//! deterministic miner-reward address and to embed it in the target leaf
//! via the `EPOCH_SUBMISSION` feature, spec §4.1).

use bitcoin::hashes::{sha256, Hash};
use bitcoin::opcodes::all::{OP_CHECKSIGVERIFY, OP_CLTV, OP_DROP};
use bitcoin::script::Builder;
use bitcoin::secp256k1::XOnlyPublicKey;
use bitcoin::{Address, Network as BitcoinNetwork, ScriptBuf, WScriptHash};
use serde::{Deserialize, Serialize};

use crate::error::{OpnetTxError, Result};

/// Epoch-bound proof-of-work-like structure (spec §3).
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ChallengeSolution {
    pub epoch_number: u64,
    pub submitter_public_key: XOnlyPublicKey,
    pub solution: [u8; 32],
    pub salt: [u8; 32],
    pub graffiti: [u8; 32],
    pub difficulty: u32,
    /// Block height after which the time-lock script becomes spendable by
    /// the submitter directly (recovery path), encoded as a CLTV locktime.
    pub unlock_height: u32,
}

impl ChallengeSolution {
    /// Validate the solution's shape. Full proof-of-work / difficulty
    /// re-verification is out of scope for this core (consensus nodes do
    /// that); we only reject structurally invalid input.
    pub fn validate(&self) -> Result<()> {
        if self.difficulty == 0 {
            return Err(OpnetTxError::InvalidChallenge(
                "difficulty must be non-zero".to_string(),
            ));
        }
        Ok(())
    }

    /// Build the time-lock P2WSH witness script: the submitter may spend
    /// immediately (proving the solution by revealing `solution`/`salt`),
    /// or anyone may spend after `unlock_height` as a fallback recovery.
    ///
    /// ```text
    /// <unlock_height> OP_CLTV OP_DROP
    /// <submitter_pubkey_hash_commitment> OP_CHECKSIGVERIFY
    /// ```
    pub fn witness_script(&self) -> ScriptBuf {
        Builder::new()
            .push_int(self.unlock_height as i64)
            .push_opcode(OP_CLTV)
            .push_opcode(OP_DROP)
            .push_slice(self.submitter_public_key.serialize())
            .push_opcode(OP_CHECKSIGVERIFY)
            .into_script()
    }

    /// Derive the deterministic time-lock P2WSH address used as the
    /// epoch-challenge miner-reward output on every interaction
    /// transaction.
    pub fn time_lock_address(&self, network: BitcoinNetwork) -> Address {
        let script = self.witness_script();
        let hash = WScriptHash::hash(script.as_bytes());
        Address::p2wsh_from_hash(hash, network)
    }

    /// A tagged hash summarizing this solution, used by the `EPOCH_SUBMISSION`
    /// feature payload (spec §4.1) so the leaf commits to the solution
    /// without re-embedding all of its bytes.
    pub fn commitment(&self) -> [u8; 32] {
        let mut buf = Vec::with_capacity(8 + 32 + 32 + 32 + 32 + 4 + 4);
        buf.extend_from_slice(&self.epoch_number.to_le_bytes());
        buf.extend_from_slice(&self.submitter_public_key.serialize());
        buf.extend_from_slice(&self.solution);
        buf.extend_from_slice(&self.salt);
        buf.extend_from_slice(&self.graffiti);
        buf.extend_from_slice(&self.difficulty.to_le_bytes());
        buf.extend_from_slice(&self.unlock_height.to_le_bytes());
        sha256::Hash::hash(&buf).to_byte_array()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use bitcoin::secp256k1::{Secp256k1, SecretKey};

    fn mock_solution() -> ChallengeSolution {
        let secp = Secp256k1::new();
        let sk = SecretKey::from_slice(&[5u8; 32]).unwrap();
        let (pk, _) = sk.x_only_public_key(&secp);
        ChallengeSolution {
            epoch_number: 42,
            submitter_public_key: pk,
            solution: [1u8; 32],
            salt: [2u8; 32],
            graffiti: [3u8; 32],
            difficulty: 10,
            unlock_height: 800_000,
        }
    }

    #[test]
    fn time_lock_address_is_deterministic() {
        let solution = mock_solution();
        let a = solution.time_lock_address(BitcoinNetwork::Testnet);
        let b = solution.time_lock_address(BitcoinNetwork::Testnet);
        assert_eq!(a, b);
    }

    #[test]
    fn rejects_zero_difficulty() {
        let mut solution = mock_solution();
        solution.difficulty = 0;
        assert!(solution.validate().is_err());
    }

    #[test]
    fn commitment_changes_with_epoch() {
        let a = mock_solution();
        let mut b = mock_solution();
        b.epoch_number = 43;
        assert_ne!(a.commitment(), b.commitment());
    }
}
