//! Feature opcodes embedded in the target leaf (spec §4.1 "Feature
//! opcodes").
//!
//! Each feature is a tagged byte-string with an integer priority. The
//! encoder emits features in descending priority order so the verifier's
//! streaming decoder can match them without lookahead.

use crate::error::{OpnetTxError, Result};
use crate::keys::{MlDsaLevel, MlDsaPublicKey};

/// Opcode tag identifying a feature in the TLV stream. Values are
/// protocol-defined and stable across versions.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord)]
pub enum FeatureTag {
    AccessList = 0x01,
    EpochSubmission = 0x02,
    MlDsaLink = 0x03,
}

impl FeatureTag {
    fn from_byte(byte: u8) -> Result<Self> {
        match byte {
            0x01 => Ok(FeatureTag::AccessList),
            0x02 => Ok(FeatureTag::EpochSubmission),
            0x03 => Ok(FeatureTag::MlDsaLink),
            other => Err(OpnetTxError::FeaturePayloadMalformed(format!(
                "unknown feature tag: {other:#x}"
            ))),
        }
    }

    fn to_byte(self) -> u8 {
        self as u8
    }
}

/// A single feature to embed in the target leaf.
#[derive(Debug, Clone)]
pub enum Feature {
    /// Storage-slot preload list, one 32-byte storage key per entry.
    AccessList(Vec<[u8; 32]>),
    /// The miner-challenge payload (spec glossary "Challenge solution"),
    /// as its 32-byte commitment (see [`crate::challenge::ChallengeSolution::commitment`]).
    EpochSubmission { commitment: [u8; 32] },
    /// Binds a post-quantum public key to the sender address.
    MlDsaLink(MlDsaPublicKey),
}

impl Feature {
    pub fn tag(&self) -> FeatureTag {
        match self {
            Feature::AccessList(_) => FeatureTag::AccessList,
            Feature::EpochSubmission { .. } => FeatureTag::EpochSubmission,
            Feature::MlDsaLink(_) => FeatureTag::MlDsaLink,
        }
    }

    /// Priority used to order features in the TLV stream; higher sorts
    /// first. Ties broken by tag value for determinism.
    pub fn priority(&self) -> u32 {
        match self {
            Feature::EpochSubmission { .. } => 100,
            Feature::MlDsaLink(_) => 50,
            Feature::AccessList(_) => 10,
        }
    }

    fn payload(&self) -> Result<Vec<u8>> {
        match self {
            Feature::AccessList(keys) => {
                let mut payload = Vec::with_capacity(keys.len() * 32);
                for key in keys {
                    payload.extend_from_slice(key);
                }
                Ok(payload)
            }
            Feature::EpochSubmission { commitment } => Ok(commitment.to_vec()),
            Feature::MlDsaLink(public_key) => {
                let level_byte = match public_key.level {
                    MlDsaLevel::MlDsa44 => 44u8,
                    MlDsaLevel::MlDsa65 => 65u8,
                    MlDsaLevel::MlDsa87 => 87u8,
                };
                if public_key.bytes.is_empty() {
                    return Err(OpnetTxError::FeaturePayloadMalformed(
                        "MLDSA_LINK public key is empty".to_string(),
                    ));
                }
                let mut payload = vec![level_byte];
                payload.extend_from_slice(&public_key.bytes);
                Ok(payload)
            }
        }
    }
}

/// A decoded TLV entry, as the on-chain streaming decoder would see it.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FeatureEntry {
    pub tag: u8,
    pub payload: Vec<u8>,
}

/// Encode features into a single TLV byte stream, descending by priority.
///
/// Format per entry: `tag(1B) | len(4B LE) | payload(len bytes)`.
pub fn encode_features(features: &[Feature]) -> Result<Vec<u8>> {
    let mut ordered: Vec<&Feature> = features.iter().collect();
    ordered.sort_by(|a, b| {
        b.priority()
            .cmp(&a.priority())
            .then_with(|| a.tag().cmp(&b.tag()))
    });

    let mut stream = Vec::new();
    for feature in ordered {
        let payload = feature.payload()?;
        if payload.len() > u32::MAX as usize {
            return Err(OpnetTxError::FeaturePayloadMalformed(
                "feature payload exceeds u32 length".to_string(),
            ));
        }
        stream.push(feature.tag().to_byte());
        stream.extend_from_slice(&(payload.len() as u32).to_le_bytes());
        stream.extend_from_slice(&payload);
    }
    Ok(stream)
}

/// Decode a TLV stream back into entries, in stream (priority-descending) order.
pub fn decode_features(stream: &[u8]) -> Result<Vec<FeatureEntry>> {
    let mut entries = Vec::new();
    let mut cursor = 0usize;
    while cursor < stream.len() {
        if cursor + 5 > stream.len() {
            return Err(OpnetTxError::FeaturePayloadMalformed(
                "truncated feature TLV header".to_string(),
            ));
        }
        let tag = stream[cursor];
        FeatureTag::from_byte(tag)?;
        let len = u32::from_le_bytes(stream[cursor + 1..cursor + 5].try_into().unwrap()) as usize;
        cursor += 5;
        if cursor + len > stream.len() {
            return Err(OpnetTxError::FeaturePayloadMalformed(
                "truncated feature TLV payload".to_string(),
            ));
        }
        entries.push(FeatureEntry {
            tag,
            payload: stream[cursor..cursor + len].to_vec(),
        });
        cursor += len;
    }
    Ok(entries)
}
