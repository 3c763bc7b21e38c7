//! Taproot tree assembly and control block derivation (spec §4.2, §2 L3).
//!
//! Builds the 2-leaf `[target-leaf, lock-leaf]` tree at leaf version
//! `0xc0`, computes the output key, and derives the control block for
//! either leaf. The secp256k1/Schnorr tagged-hash machinery itself is the
//! `bitcoin` crate's `TaprootBuilder` (an external collaborator per spec
//! §1); this module only wires up the protocol-specific tree shape.

pub mod finalizer;

use bitcoin::hashes::Hash;
use bitcoin::key::TweakedPublicKey;
use bitcoin::secp256k1::{Secp256k1, Verification, XOnlyPublicKey};
use bitcoin::taproot::{ControlBlock, LeafVersion, TaprootBuilder, TaprootSpendInfo};
use bitcoin::{Address, Network as BitcoinNetwork, ScriptBuf};

use crate::constants::{LOCK_LEAF_INDEX, SCRIPT_SIGNER_LEAF_VERSION, TARGET_LEAF_INDEX};
use crate::error::{OpnetTxError, Result};

/// The "nothing-up-my-sleeve" point used as internal key when key-path
/// spending must be disabled (spec §4.2 "`G*`").
///
/// This is `lift_x` of `SHA256(uncompressed-DER(secp256k1 generator G))`,
/// the standard BIP341 NUMS point.
pub const NUMS_POINT_HEX: &str =
    "50929b74c1a04954b78b4b6035e97a5e078a5a0f28ec96d547bfee9ace803ac0";

pub fn nums_point() -> XOnlyPublicKey {
    NUMS_POINT_HEX.parse().expect("valid NUMS point constant")
}

fn leaf_version() -> LeafVersion {
    LeafVersion::from_consensus(SCRIPT_SIGNER_LEAF_VERSION)
        .expect("0xc0 is always a valid leaf version")
}

/// The assembled 2-leaf Taproot tree: target leaf at index 0, lock leaf at
/// index 1 (spec §3 invariant 3).
#[derive(Debug, Clone)]
pub struct TaprootTree {
    pub target_leaf: ScriptBuf,
    pub lock_leaf: ScriptBuf,
    pub internal_key: XOnlyPublicKey,
    spend_info: TaprootSpendInfo,
}

impl TaprootTree {
    /// Build the tree, tweaking `internal_key` (either the main signer's
    /// key, or [`nums_point`] when key-path spending must be disabled).
    pub fn build<C: Verification>(
        secp: &Secp256k1<C>,
        target_leaf: ScriptBuf,
        lock_leaf: ScriptBuf,
        internal_key: XOnlyPublicKey,
    ) -> Result<Self> {
        let builder = TaprootBuilder::new()
            .add_leaf_with_ver(1, target_leaf.clone(), leaf_version())
            .map_err(OpnetTxError::bitcoin)?
            .add_leaf_with_ver(1, lock_leaf.clone(), leaf_version())
            .map_err(OpnetTxError::bitcoin)?;

        let spend_info = builder
            .finalize(secp, internal_key)
            .map_err(|(_, e)| OpnetTxError::bitcoin(e))?;

        Ok(Self {
            target_leaf,
            lock_leaf,
            internal_key,
            spend_info,
        })
    }

    pub fn output_key(&self) -> TweakedPublicKey {
        self.spend_info.output_key().into()
    }

    pub fn merkle_root(&self) -> Option<bitcoin::taproot::TapNodeHash> {
        self.spend_info.merkle_root()
    }

    /// The Taproot output script: `OP_1 <32-byte-tweaked-x-only>` (spec §6).
    pub fn output_script(&self) -> ScriptBuf {
        ScriptBuf::new_p2tr_tweaked(self.output_key())
    }

    pub fn address(&self, network: BitcoinNetwork) -> Address {
        Address::p2tr_tweaked(self.output_key(), network)
    }

    /// Control block for the leaf at `leaf_index` (0 = target, 1 = lock;
    /// spec §3 invariant 3 governs which index is which).
    pub fn control_block(&self, leaf_index: u8) -> Result<ControlBlock> {
        let script = match leaf_index {
            TARGET_LEAF_INDEX => &self.target_leaf,
            LOCK_LEAF_INDEX => &self.lock_leaf,
            other => {
                return Err(OpnetTxError::InvalidRedeemVersion(other));
            }
        };
        self.spend_info
            .control_block(&(script.clone(), leaf_version()))
            .ok_or_else(|| OpnetTxError::MissingControlBlock(leaf_index as usize))
    }

    pub fn target_control_block(&self) -> Result<ControlBlock> {
        self.control_block(TARGET_LEAF_INDEX)
    }

    pub fn lock_control_block(&self) -> Result<ControlBlock> {
        self.control_block(LOCK_LEAF_INDEX)
    }
}
