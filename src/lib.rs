//! Transaction construction, signing, and offline-state core for OP_NET
//! smart-contract Taproot transactions.
//!
//! Layout mirrors the pipeline a caller drives: [`script`] compiles
//! contract-interaction parameters into a tapscript leaf, [`taproot`]
//! assembles the two-leaf tree and its control blocks, [`fee`] converges
//! the refund output against a target fee rate, [`builders`] sequences
//! UTXO selection through signing for every transaction kind, and
//! [`state`] lets a cold signer resume a builder from a serialized
//! envelope.

pub mod builders;
pub mod challenge;
pub mod constants;
pub mod containers;
pub mod error;
pub mod fee;
pub mod keys;
pub mod network;
pub mod script;
pub mod signer_orchestrator;
pub mod state;
pub mod taproot;

pub use error::{OpnetTxError, Result};
pub use network::Network;

pub use builders::{
    select_utxos_for_target, BuilderConfig, BuilderState, PlannedOutput, TapLeafBinding,
    TransactionDraft, TransactionKind, UtxoReference,
};
pub use challenge::ChallengeSolution;
pub use fee::{converge, FeeEstimate, InputDimensions};
pub use keys::signer::{LocalKeypairSigner, SignerCapability, SignerIdentity};
pub use keys::ClassicalKeypair;
pub use script::{compile_target_leaf, CompiledTargetLeaf, ScriptCompilerParams};
pub use state::{TransactionState, TypeSpecificData};
pub use taproot::TaprootTree;
