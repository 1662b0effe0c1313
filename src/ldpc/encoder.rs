//! Block-partitioning LDPC encoder: pad, multiply by G over GF(2), and emit
//! the codeword stream with its metadata.

use crate::clock::Clock;
use crate::error::CodecError;
use crate::ldpc::adaptive::ErrorCorrectionMode;
use crate::ldpc::codegen::{fetch_matrices, CodeParameters, MatrixCache};
use crate::telemetry;
use log::{debug, info, warn};
use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};
use std::sync::{Arc, Mutex};
use std::time::Duration;

/// Encoder failures tolerated before the degraded latch engages.
const FAILURE_LATCH: u32 = 5;

/// Metadata accompanying one encoded bit stream. The digest over the padded
/// plaintext is the decoder's success predicate.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct EncodedBlockMeta {
    pub original_bit_length: usize,
    pub encoded_bit_length: usize,
    pub code_rate: f64,
    pub block_length: usize,
    pub padding_bits: usize,
    pub encoding_time_ms: f64,
    pub mode: ErrorCorrectionMode,
    pub digest: [u8; 32],
}

/// Unpack bytes into bits, most significant bit first.
pub fn bits_from_bytes(bytes: &[u8]) -> Vec<u8> {
    let mut bits = Vec::with_capacity(bytes.len() * 8);
    for &byte in bytes {
        for shift in (0..8).rev() {
            bits.push(byte >> shift & 1);
        }
    }
    bits
}

/// Pack bits back into bytes, zero-filling a trailing partial byte.
pub fn bytes_from_bits(bits: &[u8]) -> Vec<u8> {
    bits.chunks(8)
        .map(|chunk| {
            chunk
                .iter()
                .enumerate()
                .fold(0u8, |byte, (i, &bit)| byte | (bit & 1) << (7 - i))
        })
        .collect()
}

pub(crate) fn digest_bits(bits: &[u8]) -> [u8; 32] {
    Sha256::digest(bits).into()
}

fn validate_bits(bits: &[u8]) -> Result<(), CodecError> {
    if bits.is_empty() {
        return Err(CodecError::InvalidInput("input bit stream is empty".into()));
    }
    if bits.iter().any(|&b| b > 1) {
        return Err(CodecError::InvalidInput(
            "input must be binary (0s and 1s only)".into(),
        ));
    }
    Ok(())
}

/// The encoder half of the codec. Tracks its own failure latch, independent
/// of the scheduler's degraded mode.
pub struct BlockEncoder {
    cache: Arc<Mutex<MatrixCache>>,
    consecutive_failures: u32,
    degraded: bool,
}

impl BlockEncoder {
    pub fn new(cache: Arc<Mutex<MatrixCache>>) -> Self {
        Self {
            cache,
            consecutive_failures: 0,
            degraded: false,
        }
    }

    /// Latched after more than [`FAILURE_LATCH`] consecutive failures; the
    /// engine then forces high-redundancy parameters until a success clears
    /// it.
    pub fn is_degraded(&self) -> bool {
        self.degraded
    }

    pub fn consecutive_failures(&self) -> u32 {
        self.consecutive_failures
    }

    /// Encode a bit stream. The whole operation must finish within `budget`.
    pub fn encode(
        &mut self,
        bits: &[u8],
        params: &CodeParameters,
        mode: ErrorCorrectionMode,
        budget: Duration,
    ) -> Result<(Vec<u8>, EncodedBlockMeta), CodecError> {
        match self.encode_inner(bits, params, mode, budget) {
            Ok(out) => {
                self.consecutive_failures = 0;
                if self.degraded {
                    self.degraded = false;
                    info!("encoder left degraded mode");
                }
                Ok(out)
            }
            Err(err) => {
                self.consecutive_failures += 1;
                if self.consecutive_failures > FAILURE_LATCH && !self.degraded {
                    self.degraded = true;
                    warn!(
                        "encoder entering degraded mode after {} consecutive failures",
                        self.consecutive_failures
                    );
                }
                Err(err)
            }
        }
    }

    fn encode_inner(
        &self,
        bits: &[u8],
        params: &CodeParameters,
        mode: ErrorCorrectionMode,
        budget: Duration,
    ) -> Result<(Vec<u8>, EncodedBlockMeta), CodecError> {
        let started = Clock::new().now();
        validate_bits(bits)?;
        let matrices = fetch_matrices(&self.cache, params)?;
        let k = matrices.info_bits;
        let n = matrices.block_length;

        let padding_bits = (k - bits.len() % k) % k;
        let mut padded = bits.to_vec();
        padded.resize(bits.len() + padding_bits, 0);
        let digest = digest_bits(&padded);

        let mut encoded = Vec::with_capacity(padded.len() / k * n);
        for block in padded.chunks(k) {
            if started.elapsed() > budget {
                return Err(CodecError::Timeout(budget));
            }
            let mut codeword = vec![0u8; n];
            for (i, &bit) in block.iter().enumerate() {
                if bit == 1 {
                    for &j in matrices.generator.row(i) {
                        codeword[j as usize] ^= 1;
                    }
                }
            }
            encoded.extend_from_slice(&codeword);
            telemetry::BLOCKS_ENCODED.inc();
        }

        let meta = EncodedBlockMeta {
            original_bit_length: bits.len(),
            encoded_bit_length: encoded.len(),
            code_rate: params.code_rate,
            block_length: n,
            padding_bits,
            encoding_time_ms: Clock::elapsed_ms(started),
            mode,
            digest,
        };
        debug!(
            "encoded {} -> {} bits in {:.2}ms",
            bits.len(),
            encoded.len(),
            meta.encoding_time_ms
        );
        Ok((encoded, meta))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn bit_packing_round_trip() {
        let bytes = b"HELLO WORLD".to_vec();
        let bits = bits_from_bytes(&bytes);
        assert_eq!(bits.len(), 88);
        assert_eq!(&bits[..8], &[0, 1, 0, 0, 1, 0, 0, 0]); // 'H' = 0x48
        assert_eq!(bytes_from_bits(&bits), bytes);
    }

    #[test]
    fn rejects_non_binary_input() {
        let cache = Arc::new(Mutex::new(MatrixCache::new(256 * 1024 * 1024)));
        let mut encoder = BlockEncoder::new(cache);
        let params = CodeParameters::new(0.5, 64);
        let err = encoder
            .encode(&[0, 1, 2], &params, ErrorCorrectionMode::Standard, Duration::from_secs(5))
            .unwrap_err();
        assert!(matches!(err, CodecError::InvalidInput(_)));
        let err = encoder
            .encode(&[], &params, ErrorCorrectionMode::Standard, Duration::from_secs(5))
            .unwrap_err();
        assert!(matches!(err, CodecError::InvalidInput(_)));
    }

    #[test]
    fn pads_to_block_multiple_and_reports_it() {
        let cache = Arc::new(Mutex::new(MatrixCache::new(256 * 1024 * 1024)));
        let mut encoder = BlockEncoder::new(cache);
        let params = CodeParameters::new(0.5, 64); // k = 32
        let bits = vec![1u8; 40];
        let (encoded, meta) = encoder
            .encode(&bits, &params, ErrorCorrectionMode::Standard, Duration::from_secs(5))
            .unwrap();
        assert_eq!(meta.original_bit_length, 40);
        assert_eq!(meta.padding_bits, 24);
        assert_eq!(meta.encoded_bit_length, 2 * 64);
        assert_eq!(encoded.len(), 128);
        assert!(encoded.iter().all(|&b| b <= 1));
    }

    #[test]
    fn failure_latch_engages_and_clears() {
        let cache = Arc::new(Mutex::new(MatrixCache::new(256 * 1024 * 1024)));
        let mut encoder = BlockEncoder::new(cache);
        let params = CodeParameters::new(0.5, 64);
        for _ in 0..6 {
            let _ = encoder
                .encode(&[0, 1, 2], &params, ErrorCorrectionMode::Standard, Duration::from_secs(5))
                .unwrap_err();
        }
        assert!(encoder.is_degraded());
        assert_eq!(encoder.consecutive_failures(), 6);

        encoder
            .encode(&[1, 0, 1], &params, ErrorCorrectionMode::Standard, Duration::from_secs(5))
            .unwrap();
        assert!(!encoder.is_degraded());
        assert_eq!(encoder.consecutive_failures(), 0);
    }
}
