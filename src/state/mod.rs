//! Offline State Manager (spec §4.6, §2 L5).
//!
//! Lets a cold signer reproduce and sign the same transaction without the
//! original builder in memory: capture a builder's parameters into
//! [`envelope::TransactionState`], transport it as hex/base64, and
//! reconstruct + re-sign (optionally with new fees) on the other end.

pub mod envelope;
pub mod reconstruct;

pub use envelope::{
    BaseParams, Header, OptionalOutputEnvelope, PrecomputedData, SignerMapping, TransactionState,
    TypeSpecificData, UtxoEnvelope,
};
pub use reconstruct::rebuild_with_new_fees;
