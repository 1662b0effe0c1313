//! Block-oriented LDPC error correction with adaptive code-rate selection.
//!
//! The engine owns the encoder, the decoder, the bounded matrix cache, and
//! the adaptation controller. Every decoded block's estimated BER feeds the
//! channel classifier; sustained changes in channel quality rewrite the
//! active code parameters and invalidate the cache.

pub mod adaptive;
pub mod codegen;
pub mod decoder;
pub mod encoder;
pub mod matrix;

pub use adaptive::{AdaptationController, ErrorCorrectionMode, ModeSwitch};
pub use codegen::{CodeParameters, LdpcMatrices, MatrixCache, MATRIX_CACHE_CAP};
pub use decoder::{BlockDecoder, DecodingResult};
pub use encoder::{bits_from_bytes, bytes_from_bits, BlockEncoder, EncodedBlockMeta};
pub use matrix::SparseBinaryMatrix;

use crate::config::LdpcConfig;
use crate::error::CodecError;
use crate::metrics::{ChannelCondition, CodecStats, MetricsAggregator};
use crate::telemetry;
use log::info;
use rand::rngs::StdRng;
use rand::{Rng, SeedableRng};
use serde::Serialize;
use std::sync::{Arc, Mutex};
use std::time::Duration;

/// Read-only summary of codec state and performance.
#[derive(Debug, Clone, Serialize)]
pub struct CodecSummary {
    #[serde(flatten)]
    pub stats: CodecStats,
    pub current_mode: ErrorCorrectionMode,
    pub code_rate: f64,
    pub block_length: usize,
    pub consecutive_failures: u32,
    pub degraded_mode: bool,
    pub cache_size: usize,
}

/// The error-correction engine for one link endpoint.
pub struct LdpcEngine {
    params: Mutex<CodeParameters>,
    cache: Arc<Mutex<MatrixCache>>,
    encoder: Mutex<BlockEncoder>,
    decoder: BlockDecoder,
    controller: Mutex<AdaptationController>,
    metrics: Arc<MetricsAggregator>,
}

impl LdpcEngine {
    pub fn new(config: &LdpcConfig) -> Result<Self, CodecError> {
        let metrics = Arc::new(MetricsAggregator::new(true));
        Self::with_metrics(config, metrics)
    }

    /// Build the engine around a shared aggregator so the scheduler and the
    /// codec report into one place.
    pub fn with_metrics(
        config: &LdpcConfig,
        metrics: Arc<MetricsAggregator>,
    ) -> Result<Self, CodecError> {
        config.validate().map_err(CodecError::InvalidInput)?;
        let params = CodeParameters::from(config);
        let initial_mode = ErrorCorrectionMode::from_rate(params.code_rate);
        let cache = Arc::new(Mutex::new(MatrixCache::new(config.memory_limit_bytes())));
        telemetry::CODE_RATE_PERMILLE.set((params.code_rate * 1000.0) as i64);
        info!(
            "LDPC engine initialized: rate={} block_length={} adaptive={}",
            params.code_rate, params.block_length, config.enable_adaptive_mode
        );
        Ok(Self {
            params: Mutex::new(params),
            encoder: Mutex::new(BlockEncoder::new(Arc::clone(&cache))),
            decoder: BlockDecoder::new(Arc::clone(&cache)),
            controller: Mutex::new(AdaptationController::new(
                config.enable_adaptive_mode,
                initial_mode,
            )),
            cache,
            metrics,
        })
    }

    /// Encode a bit stream under the active parameters. While the encoder's
    /// failure latch is engaged, work is forced to high-redundancy
    /// parameters.
    pub fn encode(
        &self,
        bits: &[u8],
        budget: Duration,
    ) -> Result<(Vec<u8>, EncodedBlockMeta), CodecError> {
        let (params, mode) = self.effective_params();
        let outcome = self
            .encoder
            .lock()
            .unwrap()
            .encode(bits, &params, mode, budget);
        if let Ok((_, meta)) = &outcome {
            self.metrics
                .record_encoding(meta.encoding_time_ms / 1000.0, bits.len());
        }
        outcome
    }

    /// Decode a received stream. Recoverable conditions come back as a failed
    /// `DecodingResult`; the block's BER feeds the adaptation controller.
    pub fn decode(
        &self,
        received: &[u8],
        meta: &EncodedBlockMeta,
        budget: Duration,
    ) -> Result<DecodingResult, CodecError> {
        let params = *self.params.lock().unwrap();
        let result = self.decoder.decode(received, meta, &params, budget)?;
        self.metrics.record_decoding(
            result.success,
            result.bit_error_rate,
            result.iterations_used,
            result.decoding_time_ms,
            received.len(),
        );
        self.observe_ber(result.bit_error_rate);
        Ok(result)
    }

    /// Feed one BER observation through the classifier and the controller.
    /// Called internally per decoded stream; exposed for hosts that measure
    /// channel quality out of band.
    pub fn observe_ber(&self, bit_error_rate: f64) {
        let condition = self.metrics.assess_channel(bit_error_rate);
        let switched = self.controller.lock().unwrap().observe(condition);
        if let Some(mode) = switched {
            self.apply_mode(mode);
        }
    }

    /// Rewrite the active parameters for a new mode and force matrix
    /// regeneration on next use.
    fn apply_mode(&self, mode: ErrorCorrectionMode) {
        let mut params = self.params.lock().unwrap();
        params.code_rate = mode.code_rate();
        telemetry::CODE_RATE_PERMILLE.set((params.code_rate * 1000.0) as i64);
        drop(params);
        self.cache.lock().unwrap().invalidate();
    }

    fn effective_params(&self) -> (CodeParameters, ErrorCorrectionMode) {
        let mut params = *self.params.lock().unwrap();
        let mut mode = self.controller.lock().unwrap().current_mode();
        if self.encoder.lock().unwrap().is_degraded()
            && mode != ErrorCorrectionMode::HighRedundancy
        {
            mode = ErrorCorrectionMode::HighRedundancy;
            params.code_rate = mode.code_rate();
        }
        (params, mode)
    }

    pub fn current_mode(&self) -> ErrorCorrectionMode {
        self.controller.lock().unwrap().current_mode()
    }

    pub fn current_channel_condition(&self) -> ChannelCondition {
        self.metrics.current_channel_condition()
    }

    pub fn code_parameters(&self) -> CodeParameters {
        *self.params.lock().unwrap()
    }

    pub fn cache_len(&self) -> usize {
        self.cache.lock().unwrap().len()
    }

    pub fn is_degraded(&self) -> bool {
        self.encoder.lock().unwrap().is_degraded()
    }

    pub fn metrics(&self) -> Arc<MetricsAggregator> {
        Arc::clone(&self.metrics)
    }

    pub fn summary(&self) -> CodecSummary {
        let params = *self.params.lock().unwrap();
        let encoder = self.encoder.lock().unwrap();
        CodecSummary {
            stats: self.metrics.codec_stats(),
            current_mode: self.controller.lock().unwrap().current_mode(),
            code_rate: params.code_rate,
            block_length: params.block_length,
            consecutive_failures: encoder.consecutive_failures(),
            degraded_mode: encoder.is_degraded(),
            cache_size: self.cache.lock().unwrap().len(),
        }
    }
}

/// Corrupt a bit stream the way the link does: independent per-bit flips at
/// `error_rate`, plus Poisson-length bursts started with `burst_probability`
/// per position. Seeded for reproducible trials.
pub fn simulate_channel_errors(
    bits: &[u8],
    error_rate: f64,
    burst_probability: f64,
    mean_burst_length: f64,
    seed: u64,
) -> Vec<u8> {
    assert!(
        (0.0..=1.0).contains(&error_rate),
        "error_rate must be between 0 and 1"
    );
    let mut rng = StdRng::seed_from_u64(seed);
    let mut corrupted = bits.to_vec();
    for bit in corrupted.iter_mut() {
        if rng.gen::<f64>() < error_rate {
            *bit ^= 1;
        }
    }
    if burst_probability > 0.0 {
        let starts: Vec<usize> = (0..corrupted.len())
            .filter(|_| rng.gen::<f64>() < burst_probability)
            .collect();
        for start in starts {
            let burst = poisson(&mut rng, mean_burst_length);
            let end = (start + burst).min(corrupted.len());
            for bit in &mut corrupted[start..end] {
                *bit ^= 1;
            }
        }
    }
    corrupted
}

/// Knuth's Poisson sampler; burst lengths are small so the loop stays short.
fn poisson(rng: &mut StdRng, mean: f64) -> usize {
    let limit = (-mean).exp();
    let mut count = 0;
    let mut product = rng.gen::<f64>();
    while product > limit {
        count += 1;
        product *= rng.gen::<f64>();
    }
    count
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn channel_simulation_is_seeded() {
        let bits = vec![0u8; 4096];
        let a = simulate_channel_errors(&bits, 0.05, 0.0, 0.0, 7);
        let b = simulate_channel_errors(&bits, 0.05, 0.0, 0.0, 7);
        assert_eq!(a, b);
        let flipped = a.iter().filter(|&&b| b == 1).count();
        // Around 5% with generous slack for the draw.
        assert!(flipped > 100 && flipped < 320, "flipped {}", flipped);
    }

    #[test]
    fn bursts_flip_contiguous_runs() {
        let bits = vec![0u8; 2048];
        let corrupted = simulate_channel_errors(&bits, 0.0, 0.01, 4.0, 11);
        assert!(corrupted.iter().any(|&b| b == 1));
    }
}
