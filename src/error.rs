//! Error types for the transaction-construction core.

use thiserror::Error;

/// Result type used throughout the crate.
pub type Result<T> = std::result::Result<T, OpnetTxError>;

/// Errors produced while compiling scripts, assembling Taproot trees,
/// estimating fees, signing, and (de)serializing offline state.
#[derive(Error, Debug)]
pub enum OpnetTxError {
    // -- Script Compiler (spec §4.1) --
    #[error("compressed calldata too large: {size} bytes (max {max})")]
    CalldataTooLarge { size: usize, max: usize },

    #[error("invalid contract secret: expected 32 bytes, got {0}")]
    InvalidContractSecret(usize),

    #[error("invalid challenge solution: {0}")]
    InvalidChallenge(String),

    #[error("feature payload malformed: {0}")]
    FeaturePayloadMalformed(String),

    #[error("compiled script too large: {size} bytes (max {max})")]
    CompiledScriptTooLarge { size: usize, max: usize },

    // -- Taproot Tree & Finalizer (spec §4.2) --
    #[error("missing tap script signature for input {0}")]
    MissingTapScriptSignature(usize),

    #[error("missing control block for input {0}")]
    MissingControlBlock(usize),

    #[error("invalid redeem version: {0:#x}")]
    InvalidRedeemVersion(u8),

    #[error("invalid control block: {0}")]
    InvalidControlBlock(String),

    #[error("witness script missing for input {0}")]
    WitnessScriptMissing(usize),

    #[error("too many witness fields: {count} (max {max})")]
    TooManyWitnessFields { count: usize, max: usize },

    #[error("chunk count exceeds standard transaction limit: {count} (max {max})")]
    ChunkCountExceedsStandardTxLimit { count: usize, max: usize },

    // -- Builders (spec §4.3) --
    #[error("insufficient funds: inputs {inputs} sat, required {required} sat")]
    InsufficientFunds { inputs: u64, required: u64 },

    #[error("dust output: {value} sat below threshold {threshold} sat")]
    DustOutput { value: u64, threshold: u64 },

    #[error("amount below minimum reward: {amount} sat (minimum {minimum})")]
    AmountBelowMinimumReward { amount: u64, minimum: u64 },

    #[error("invalid contract address: {0}")]
    InvalidContractAddress(String),

    #[error("signer capability missing: {0}")]
    SignerCapabilityMissing(String),

    #[error("invalid network: expected {expected}, got {actual}")]
    InvalidNetwork { expected: String, actual: String },

    #[error("transaction already finalized")]
    TransactionAlreadyFinalized,

    #[error("no UTXOs available for spending")]
    NoUtxos,

    // -- Signing Orchestrator (spec §4.5) --
    #[error("script signer unavailable")]
    ScriptSignerUnavailable,

    #[error("wallet RPC failure: {0}")]
    WalletRpcFailure(String),

    #[error("signing timed out")]
    SigningTimeout,

    #[error("signing was cancelled")]
    SigningCancelled,

    // -- Offline State Manager (spec §4.6) --
    #[error("unsupported format version: {0}")]
    UnsupportedFormatVersion(u32),

    #[error("unsupported transaction type: {0}")]
    UnsupportedTransactionType(String),

    #[error("address rotation enabled but no signer map supplied")]
    MissingRotationSigners,

    #[error("no signer configured for address: {0}")]
    SignerMissingForAddress(String),

    // -- Input validation --
    #[error("invalid address for network: {0}")]
    InvalidAddressForNetwork(String),

    #[error("missing required parameter: {0}")]
    MissingRequiredParam(&'static str),

    // -- Passthrough / foreign errors --
    #[error("bitcoin script/address error: {0}")]
    Bitcoin(String),

    #[error("sighash computation error: {0}")]
    Sighash(String),

    #[error("hex decoding error: {0}")]
    HexDecode(#[from] hex::FromHexError),

    #[error("base64 decoding error: {0}")]
    Base64Decode(#[from] base64::DecodeError),

    #[error("JSON (de)serialization error: {0}")]
    Json(#[from] serde_json::Error),

    #[error("secp256k1 error: {0}")]
    Secp256k1(#[from] bitcoin::secp256k1::Error),
}

impl OpnetTxError {
    pub(crate) fn bitcoin(e: impl std::fmt::Display) -> Self {
        OpnetTxError::Bitcoin(e.to_string())
    }

    pub(crate) fn sighash(e: impl std::fmt::Display) -> Self {
        OpnetTxError::Sighash(e.to_string())
    }
}
