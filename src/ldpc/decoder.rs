//! Iterative bit-flipping LDPC decoder: syndrome check, votes from
//! unsatisfied parity rows, flip past the mean-plus-deviation threshold,
//! repeat until convergence or the iteration cap.

use crate::clock::Clock;
use crate::error::CodecError;
use crate::ldpc::codegen::{fetch_matrices, CodeParameters, MatrixCache};
use crate::ldpc::encoder::{digest_bits, EncodedBlockMeta};
use crate::ldpc::matrix::SparseBinaryMatrix;
use crate::telemetry;
use log::{debug, warn};
use serde::Serialize;
use std::sync::{Arc, Mutex};
use std::time::Duration;

/// Synthetic suspect-position count reported for a block that never
/// converged.
const UNCONVERGED_SUSPECTS: usize = 10;

/// Outcome of decoding one received stream. Recoverable conditions (timeout,
/// non-convergence, digest mismatch) are reported here, never as errors.
#[derive(Debug, Clone, Serialize)]
pub struct DecodingResult {
    pub success: bool,
    pub corrected_bits: Option<Vec<u8>>,
    pub iterations_used: usize,
    pub syndrome_norm: f64,
    pub error_positions: Vec<usize>,
    pub decoding_time_ms: f64,
    pub bit_error_rate: f64,
}

impl DecodingResult {
    fn failed(decoding_time_ms: f64) -> Self {
        Self {
            success: false,
            corrected_bits: None,
            iterations_used: 0,
            syndrome_norm: f64::INFINITY,
            error_positions: Vec::new(),
            decoding_time_ms,
            bit_error_rate: 1.0,
        }
    }
}

struct BlockOutcome {
    converged: bool,
    iterations: usize,
    syndrome_norm: f64,
    /// Positions corrected within the block, relative to the block start.
    flipped: Vec<usize>,
}

/// The decoder half of the codec.
pub struct BlockDecoder {
    cache: Arc<Mutex<MatrixCache>>,
}

impl BlockDecoder {
    pub fn new(cache: Arc<Mutex<MatrixCache>>) -> Self {
        Self { cache }
    }

    /// Decode a received codeword stream against its metadata. Exceeding
    /// `budget` yields a failed result so link processing continues;
    /// malformed metadata is a hard error.
    pub fn decode(
        &self,
        received: &[u8],
        meta: &EncodedBlockMeta,
        params: &CodeParameters,
        budget: Duration,
    ) -> Result<DecodingResult, CodecError> {
        let started = Clock::new().now();
        validate_meta(meta)?;
        if received.iter().any(|&b| b > 1) {
            return Err(CodecError::InvalidInput(
                "received stream must be binary".into(),
            ));
        }

        // Decode with the parameters the stream was encoded under, keeping
        // the current iteration cap and convergence threshold.
        let block_params = CodeParameters {
            code_rate: meta.code_rate,
            block_length: meta.block_length,
            max_iterations: params.max_iterations,
            syndrome_threshold: params.syndrome_threshold,
        };
        let matrices = fetch_matrices(&self.cache, &block_params)?;
        let k = matrices.info_bits;
        let n = matrices.block_length;

        let mut decoded = Vec::with_capacity((received.len() + n - 1) / n * k);
        let mut iterations_used = 0;
        let mut max_syndrome_norm: f64 = 0.0;
        let mut error_positions = Vec::new();
        let mut all_converged = true;

        for (block_index, chunk) in received.chunks(n).enumerate() {
            if started.elapsed() > budget {
                warn!("decode timed out after {:?}", budget);
                let result = DecodingResult::failed(Clock::elapsed_ms(started));
                telemetry::DECODE_FAILURES.inc();
                return Ok(result);
            }
            let mut block = chunk.to_vec();
            block.resize(n, 0);

            let outcome = decode_block(
                &mut block,
                &matrices.parity_check,
                block_params.max_iterations,
                block_params.syndrome_threshold,
            );
            decoded.extend_from_slice(&block[..k]);
            // The worst block drives both aggregates, keeping the reported
            // iteration count within the per-block cap.
            iterations_used = iterations_used.max(outcome.iterations);
            max_syndrome_norm = max_syndrome_norm.max(outcome.syndrome_norm);
            all_converged &= outcome.converged;
            error_positions.extend(outcome.flipped.iter().map(|p| p + block_index * n));
            telemetry::BLOCKS_DECODED.inc();
        }

        // Strip padding and truncate to the transmitted length.
        decoded.truncate(meta.original_bit_length);

        // The digest over the re-padded plaintext is the success predicate.
        let mut repadded = decoded.clone();
        repadded.resize(meta.original_bit_length + meta.padding_bits, 0);
        let digest_matches = digest_bits(&repadded) == meta.digest;

        let success = digest_matches && all_converged;
        if !success {
            telemetry::DECODE_FAILURES.inc();
            if !digest_matches {
                warn!("decoded stream digest mismatch");
            }
        }
        let bit_error_rate = error_positions.len() as f64 / received.len().max(1) as f64;
        let result = DecodingResult {
            success,
            corrected_bits: Some(decoded),
            iterations_used,
            syndrome_norm: if all_converged {
                max_syndrome_norm
            } else {
                f64::INFINITY
            },
            error_positions,
            decoding_time_ms: Clock::elapsed_ms(started),
            bit_error_rate,
        };
        debug!(
            "decoded {} bits in {:.2}ms, {} iterations, BER {:.4}",
            received.len(),
            result.decoding_time_ms,
            result.iterations_used,
            result.bit_error_rate
        );
        Ok(result)
    }
}

fn validate_meta(meta: &EncodedBlockMeta) -> Result<(), CodecError> {
    if meta.block_length == 0 {
        return Err(CodecError::InvalidMetadata(
            "block_length must be positive".into(),
        ));
    }
    if !(meta.code_rate > 0.0 && meta.code_rate < 1.0) {
        return Err(CodecError::InvalidMetadata(
            "code_rate must be between 0 and 1".into(),
        ));
    }
    let k = (meta.block_length as f64 * meta.code_rate).floor() as usize;
    if k == 0 {
        return Err(CodecError::InvalidMetadata(
            "metadata yields no information bits".into(),
        ));
    }
    if (meta.original_bit_length + meta.padding_bits) % k != 0 {
        return Err(CodecError::InvalidMetadata(
            "padded length is not a block multiple".into(),
        ));
    }
    Ok(())
}

/// One round of hard-decision bit-flipping on a single codeword.
fn decode_block(
    block: &mut [u8],
    parity_check: &SparseBinaryMatrix,
    max_iterations: usize,
    syndrome_threshold: f64,
) -> BlockOutcome {
    let n = block.len();
    let original: Vec<u8> = block.to_vec();
    let mut iterations = 0;

    while iterations < max_iterations {
        iterations += 1;

        let unsatisfied: Vec<usize> = (0..parity_check.rows())
            .filter(|&i| parity_check.row_parity(i, block) == 1)
            .collect();
        let syndrome_norm = (unsatisfied.len() as f64).sqrt();
        if syndrome_norm < syndrome_threshold {
            let flipped = (0..n).filter(|&i| block[i] != original[i]).collect();
            return BlockOutcome {
                converged: true,
                iterations,
                syndrome_norm,
                flipped,
            };
        }

        // Each unsatisfied check votes against every bit it covers.
        let mut votes = vec![0u32; n];
        for &i in &unsatisfied {
            for &j in parity_check.row(i) {
                votes[j as usize] += 1;
            }
        }
        let mean = votes.iter().map(|&v| v as f64).sum::<f64>() / n as f64;
        let variance =
            votes.iter().map(|&v| (v as f64 - mean).powi(2)).sum::<f64>() / n as f64;
        let flip_threshold = mean + variance.sqrt();

        let flips: Vec<usize> = (0..n)
            .filter(|&j| votes[j] as f64 > flip_threshold)
            .collect();
        if flips.is_empty() {
            break;
        }
        for j in flips {
            block[j] ^= 1;
        }
    }

    BlockOutcome {
        converged: false,
        iterations,
        syndrome_norm: f64::INFINITY,
        flipped: (0..n.min(UNCONVERGED_SUSPECTS)).collect(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::ldpc::codegen::generate_matrices;

    const LIMIT: usize = 256 * 1024 * 1024;

    #[test]
    fn clean_codeword_converges_immediately() {
        let params = CodeParameters::new(0.5, 64);
        let matrices = generate_matrices(&params, LIMIT).unwrap();
        let n = matrices.block_length;
        // The all-zero word is a codeword of every linear code.
        let mut block = vec![0u8; n];
        let outcome = decode_block(&mut block, &matrices.parity_check, 50, 1e-6);
        assert!(outcome.converged);
        assert_eq!(outcome.iterations, 1);
        assert!(outcome.flipped.is_empty());
        assert_eq!(outcome.syndrome_norm, 0.0);
    }

    #[test]
    fn malformed_metadata_is_a_hard_error() {
        let cache = Arc::new(Mutex::new(MatrixCache::new(LIMIT)));
        let decoder = BlockDecoder::new(cache);
        let params = CodeParameters::new(0.5, 64);
        let meta = EncodedBlockMeta {
            original_bit_length: 10,
            encoded_bit_length: 0,
            code_rate: 0.5,
            block_length: 0,
            padding_bits: 0,
            encoding_time_ms: 0.0,
            mode: crate::ldpc::adaptive::ErrorCorrectionMode::Standard,
            digest: [0u8; 32],
        };
        let err = decoder
            .decode(&[0, 1], &meta, &params, Duration::from_secs(1))
            .unwrap_err();
        assert!(matches!(err, CodecError::InvalidMetadata(_)));
    }
}
