//! Script Compiler (spec §4.1, §2 L3).
//!
//! Turns higher-level contract-interaction parameters into the target-leaf
//! byte string. Output bytes are bit-exact: consensus nodes recomputing
//! this leaf from the same inputs must get the same hash, so every step
//! here is a pure function of its inputs.

pub mod compression;
pub mod features;
pub mod lock_leaf;

use bitcoin::hashes::{sha256, Hash};
use bitcoin::opcodes::all::{OP_CHECKSIG, OP_CHECKSIGVERIFY};
use bitcoin::script::{Builder, PushBytesBuf};
use bitcoin::secp256k1::XOnlyPublicKey;
use bitcoin::ScriptBuf;

use crate::challenge::ChallengeSolution;
use crate::constants::{MAX_COMPILED_SCRIPT_SIZE, MAX_COMPRESSED_CALLDATA, MAX_SCRIPT_PUSH_SIZE};
use crate::error::{OpnetTxError, Result};
use crate::network::Network;
use features::Feature;

/// All the inputs the Script Compiler needs (spec §4.1 "Inputs").
pub struct ScriptCompilerParams<'a> {
    /// Already-compressed calldata (see [`compression::compress`]).
    pub compressed_calldata: &'a [u8],
    pub contract_secret: &'a [u8],
    pub challenge: &'a ChallengeSolution,
    pub priority_fee: u64,
    pub features: &'a [Feature],
    pub main_signer: XOnlyPublicKey,
    pub script_signer: XOnlyPublicKey,
    pub network: Network,
}

/// A compiled target leaf plus the artifacts the caller needs alongside it.
#[derive(Debug, Clone)]
pub struct CompiledTargetLeaf {
    pub script: ScriptBuf,
    /// sha256 of the contract secret, embedded in the leaf as the hash
    /// commitment the spend-time preimage must match (spec §3 invariant 5).
    pub secret_hash: [u8; 32],
}

fn push_chunked(mut builder: Builder, data: &[u8]) -> Result<Builder> {
    if data.is_empty() {
        let bytes = PushBytesBuf::new();
        return Ok(builder.push_slice(bytes));
    }
    for chunk in data.chunks(MAX_SCRIPT_PUSH_SIZE) {
        let bytes = PushBytesBuf::try_from(chunk.to_vec())
            .map_err(|e| OpnetTxError::FeaturePayloadMalformed(e.to_string()))?;
        builder = builder.push_slice(bytes);
    }
    Ok(builder)
}

/// Compile the target leaf script (spec §4.1, §3 "Target leaf script").
///
/// Push order: challenge-solution parts, script-signer x-only pubkey +
/// `OP_CHECKSIGVERIFY`, wallet-signer (main) x-only pubkey + `OP_CHECKSIG`,
/// priority-fee tag, feature TLV stream, compressed calldata blob,
/// contract-secret hash.
pub fn compile_target_leaf(params: &ScriptCompilerParams<'_>) -> Result<CompiledTargetLeaf> {
    if params.compressed_calldata.len() > MAX_COMPRESSED_CALLDATA {
        return Err(OpnetTxError::CalldataTooLarge {
            size: params.compressed_calldata.len(),
            max: MAX_COMPRESSED_CALLDATA,
        });
    }
    if params.contract_secret.len() != 32 {
        return Err(OpnetTxError::InvalidContractSecret(
            params.contract_secret.len(),
        ));
    }
    params.challenge.validate()?;

    let mut builder = Builder::new();

    // Challenge-solution parts.
    builder = builder.push_slice(params.challenge.submitter_public_key.serialize());
    builder = builder.push_slice(params.challenge.solution);
    builder = builder.push_slice(params.challenge.salt);
    builder = builder.push_slice(params.challenge.graffiti);
    builder = builder.push_int(params.challenge.difficulty as i64);
    builder = builder.push_int(params.challenge.epoch_number as i64);
    builder = builder.push_int(params.challenge.unlock_height as i64);

    // Script-signer check (deterministic, contract-bound signer).
    builder = builder.push_slice(params.script_signer.serialize());
    builder = builder.push_opcode(OP_CHECKSIGVERIFY);

    // Wallet (main) signer check.
    builder = builder.push_slice(params.main_signer.serialize());
    builder = builder.push_opcode(OP_CHECKSIG);

    // Priority fee tag.
    builder = builder.push_int(params.priority_fee as i64);

    // Feature TLV stream, highest priority first.
    let feature_stream = features::encode_features(params.features)?;
    builder = push_chunked(builder, &feature_stream)?;

    // Compressed calldata blob.
    builder = push_chunked(builder, params.compressed_calldata)?;

    // Contract secret hash commitment.
    let secret_hash = sha256::Hash::hash(params.contract_secret).to_byte_array();
    builder = builder.push_slice(secret_hash);

    let script = builder.into_script();
    if script.len() > MAX_COMPILED_SCRIPT_SIZE {
        return Err(OpnetTxError::CompiledScriptTooLarge {
            size: script.len(),
            max: MAX_COMPILED_SCRIPT_SIZE,
        });
    }

    Ok(CompiledTargetLeaf {
        script,
        secret_hash,
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::script::features::Feature;
    use bitcoin::secp256k1::{Secp256k1, SecretKey};

    fn xonly(byte: u8) -> XOnlyPublicKey {
        let secp = Secp256k1::new();
        let sk = SecretKey::from_slice(&[byte; 32]).unwrap();
        sk.x_only_public_key(&secp).0
    }

    fn mock_challenge() -> ChallengeSolution {
        ChallengeSolution {
            epoch_number: 1,
            submitter_public_key: xonly(9),
            solution: [1u8; 32],
            salt: [2u8; 32],
            graffiti: [3u8; 32],
            difficulty: 1,
            unlock_height: 100,
        }
    }

    #[test]
    fn compiles_deterministically() {
        let challenge = mock_challenge();
        let params = ScriptCompilerParams {
            compressed_calldata: &[1, 2, 3, 4],
            contract_secret: &[0u8; 32],
            challenge: &challenge,
            priority_fee: 500,
            features: &[],
            main_signer: xonly(10),
            script_signer: xonly(11),
            network: Network::Regtest,
        };
        let a = compile_target_leaf(&params).unwrap();
        let b = compile_target_leaf(&params).unwrap();
        assert_eq!(a.script, b.script);
    }

    #[test]
    fn rejects_invalid_secret_length() {
        let challenge = mock_challenge();
        let params = ScriptCompilerParams {
            compressed_calldata: &[],
            contract_secret: &[0u8; 16],
            challenge: &challenge,
            priority_fee: 0,
            features: &[],
            main_signer: xonly(10),
            script_signer: xonly(11),
            network: Network::Regtest,
        };
        let err = compile_target_leaf(&params).unwrap_err();
        assert!(matches!(err, OpnetTxError::InvalidContractSecret(16)));
    }

    #[test]
    fn rejects_oversized_calldata() {
        let challenge = mock_challenge();
        let big = vec![0u8; MAX_COMPRESSED_CALLDATA + 1];
        let params = ScriptCompilerParams {
            compressed_calldata: &big,
            contract_secret: &[0u8; 32],
            challenge: &challenge,
            priority_fee: 0,
            features: &[],
            main_signer: xonly(10),
            script_signer: xonly(11),
            network: Network::Regtest,
        };
        assert!(matches!(
            compile_target_leaf(&params),
            Err(OpnetTxError::CalldataTooLarge { .. })
        ));
    }

    #[test]
    fn handles_large_calldata_needing_multiple_pushes() {
        let challenge = mock_challenge();
        let big = vec![7u8; MAX_SCRIPT_PUSH_SIZE * 3 + 10];
        let params = ScriptCompilerParams {
            compressed_calldata: &big,
            contract_secret: &[0u8; 32],
            challenge: &challenge,
            priority_fee: 0,
            features: &[Feature::AccessList(vec![[1u8; 32]])],
            main_signer: xonly(10),
            script_signer: xonly(11),
            network: Network::Regtest,
        };
        let compiled = compile_target_leaf(&params).unwrap();
        assert!(compiled.script.len() > big.len());
    }
}
