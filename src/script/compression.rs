//! Deterministic calldata compression (spec §4.1 "Compression").
//!
//! Uses raw DEFLATE (no gzip header/timestamp, no zlib adler wrapper) so
//! that compression is a pure function of the input bytes: the same
//! calldata always compresses to the same bytes, which is required for
//! spec invariant P4 (determinism of the unsigned transaction).

use std::io::Write;

use flate2::write::{DeflateDecoder, DeflateEncoder};
use flate2::Compression;

use crate::error::{OpnetTxError, Result};

/// Compress `data` with raw DEFLATE at the best (and therefore always
/// identical for identical input) compression level.
pub fn compress(data: &[u8]) -> Result<Vec<u8>> {
    let mut encoder = DeflateEncoder::new(Vec::new(), Compression::best());
    encoder
        .write_all(data)
        .map_err(|e| OpnetTxError::FeaturePayloadMalformed(format!("compression failed: {e}")))?;
    encoder
        .finish()
        .map_err(|e| OpnetTxError::FeaturePayloadMalformed(format!("compression failed: {e}")))
}

/// Decompress bytes produced by [`compress`].
pub fn decompress(data: &[u8]) -> Result<Vec<u8>> {
    let mut decoder = DeflateDecoder::new(Vec::new());
    decoder
        .write_all(data)
        .map_err(|e| OpnetTxError::FeaturePayloadMalformed(format!("decompression failed: {e}")))?;
    decoder
        .finish()
        .map_err(|e| OpnetTxError::FeaturePayloadMalformed(format!("decompression failed: {e}")))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn round_trips() {
        let data = b"the quick brown fox jumps over the lazy dog".repeat(20);
        let compressed = compress(&data).unwrap();
        let decompressed = decompress(&compressed).unwrap();
        assert_eq!(decompressed, data);
    }

    #[test]
    fn is_pure_function_of_input() {
        let data = vec![0x42u8; 4096];
        let a = compress(&data).unwrap();
        let b = compress(&data).unwrap();
        assert_eq!(a, b);
    }

    #[test]
    fn compresses_repetitive_data() {
        let data = vec![0x00u8; 100_000];
        let compressed = compress(&data).unwrap();
        assert!(compressed.len() < data.len() / 10);
    }
}
