//! Per-class dispatch reservoirs, codec performance tracking, and the
//! channel-condition classifier feeding the adaptation controller.

use crate::clock::Clock;
use crate::scheduler::message::{Band, PriorityClass};
use crate::telemetry;
use log::warn;
use serde::Serialize;
use std::collections::{BTreeMap, HashMap, VecDeque};
use std::sync::Mutex;
use std::time::{Duration, Instant};

const LATENCY_RESERVOIR: usize = 1000;
const BAND_RESERVOIR: usize = 100;
const SYSTEM_RESERVOIR: usize = 100;
const CONDITION_RESERVOIR: usize = 100;
const BURST_WINDOW: Duration = Duration::from_secs(60);
const BURST_BER: f64 = 0.10;
const BURST_ALARM_COUNT: usize = 5;
const ERROR_RATE_ALARM: f64 = 0.05;

/// Coarse channel quality derived from the most recent decoded block.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum ChannelCondition {
    Excellent,
    Good,
    Poor,
    Severe,
}

impl ChannelCondition {
    /// Fixed BER thresholds: <1% excellent, <5% good, <15% poor, else severe.
    pub fn classify(ber: f64) -> Self {
        if ber < 0.01 {
            ChannelCondition::Excellent
        } else if ber < 0.05 {
            ChannelCondition::Good
        } else if ber < 0.15 {
            ChannelCondition::Poor
        } else {
            ChannelCondition::Severe
        }
    }

    fn gauge_value(self) -> i64 {
        match self {
            ChannelCondition::Excellent => 0,
            ChannelCondition::Good => 1,
            ChannelCondition::Poor => 2,
            ChannelCondition::Severe => 3,
        }
    }
}

#[derive(Debug, Clone, Serialize)]
pub struct ClassStats {
    pub messages: u64,
    pub failures: u64,
    pub error_rate: f64,
    pub average_latency_ms: f64,
}

/// Read-only snapshot of scheduler-side metrics.
#[derive(Debug, Clone, Serialize)]
pub struct MetricsSummary {
    pub uptime_seconds: f64,
    pub total_messages: u64,
    pub per_class: BTreeMap<&'static str, ClassStats>,
    pub bandwidth_usage: BTreeMap<&'static str, Vec<u32>>,
    pub current_cpu_percent: f32,
    pub current_memory_percent: f32,
    pub current_channel_condition: ChannelCondition,
}

/// Codec-side reservoir snapshot, wrapped by the engine into its summary.
#[derive(Debug, Clone, Serialize)]
pub struct CodecStats {
    pub total_operations: usize,
    pub avg_encoding_time_ms: f64,
    pub avg_decoding_time_ms: f64,
    pub success_rate: f64,
    pub avg_bit_error_rate: f64,
    pub avg_iterations: f64,
    pub current_channel_condition: ChannelCondition,
    pub error_burst_count: usize,
}

struct Inner {
    counts: [u64; 4],
    failures: [u64; 4],
    latencies: [VecDeque<f64>; 4],
    band_usage: HashMap<Band, VecDeque<u32>>,
    cpu: VecDeque<f32>,
    memory: VecDeque<f32>,

    encoding_times: VecDeque<f64>,
    decoding_times: VecDeque<f64>,
    successes: VecDeque<bool>,
    bit_error_rates: VecDeque<f64>,
    iterations: VecDeque<usize>,

    conditions: VecDeque<ChannelCondition>,
    bursts: Vec<Instant>,
}

impl Inner {
    fn new() -> Self {
        Self {
            counts: [0; 4],
            failures: [0; 4],
            latencies: Default::default(),
            band_usage: HashMap::new(),
            cpu: VecDeque::new(),
            memory: VecDeque::new(),
            encoding_times: VecDeque::new(),
            decoding_times: VecDeque::new(),
            successes: VecDeque::new(),
            bit_error_rates: VecDeque::new(),
            iterations: VecDeque::new(),
            conditions: VecDeque::new(),
            bursts: Vec::new(),
        }
    }
}

fn push_bounded<T>(deque: &mut VecDeque<T>, value: T, cap: usize) {
    if deque.len() == cap {
        deque.pop_front();
    }
    deque.push_back(value);
}

fn mean(values: impl Iterator<Item = f64>, len: usize) -> f64 {
    if len == 0 {
        0.0
    } else {
        values.sum::<f64>() / len as f64
    }
}

/// Thread-safe metrics aggregator shared by the scheduler and the codec.
/// When disabled every record call is a no-op and summaries read as empty.
pub struct MetricsAggregator {
    enabled: bool,
    start: Instant,
    clock: Clock,
    inner: Mutex<Inner>,
}

impl MetricsAggregator {
    pub fn new(enabled: bool) -> Self {
        Self {
            enabled,
            start: Instant::now(),
            clock: Clock::new(),
            inner: Mutex::new(Inner::new()),
        }
    }

    pub fn is_enabled(&self) -> bool {
        self.enabled
    }

    /// Record one dispatched message with its processing latency.
    pub fn record_dispatch(
        &self,
        class: PriorityClass,
        band: Band,
        bandwidth_required: u32,
        latency_ms: f64,
        success: bool,
    ) {
        if !self.enabled {
            return;
        }
        let mut inner = self.inner.lock().unwrap();
        inner.counts[class.index()] += 1;
        if !success {
            inner.failures[class.index()] += 1;
        }
        push_bounded(&mut inner.latencies[class.index()], latency_ms, LATENCY_RESERVOIR);
        let usage = inner.band_usage.entry(band).or_default();
        push_bounded(usage, bandwidth_required, BAND_RESERVOIR);

        if latency_ms > class.latency_limit_ms() {
            warn!(
                "latency threshold exceeded for {}: {:.2}ms > {:.0}ms",
                class.as_str(),
                latency_ms,
                class.latency_limit_ms()
            );
        }
    }

    /// Record a resource probe sample and alarm on hot thresholds.
    pub fn record_system(&self, cpu_percent: f32, memory_percent: f32) {
        if !self.enabled {
            return;
        }
        let mut inner = self.inner.lock().unwrap();
        push_bounded(&mut inner.cpu, cpu_percent, SYSTEM_RESERVOIR);
        push_bounded(&mut inner.memory, memory_percent, SYSTEM_RESERVOIR);
        drop(inner);

        if cpu_percent > 80.0 {
            warn!("high CPU usage: {:.1}%", cpu_percent);
        }
        if memory_percent > 85.0 {
            warn!("high memory usage: {:.1}%", memory_percent);
        }
    }

    pub fn record_encoding(&self, seconds: f64, bits: usize) {
        if !self.enabled {
            return;
        }
        let mut inner = self.inner.lock().unwrap();
        let recent: Vec<f64> = inner.encoding_times.iter().rev().take(10).copied().collect();
        push_bounded(&mut inner.encoding_times, seconds, LATENCY_RESERVOIR);
        drop(inner);

        if recent.len() == 10 {
            let avg = recent.iter().sum::<f64>() / recent.len() as f64;
            if seconds > avg * 3.0 {
                warn!(
                    "slow encoding: {:.3}s (avg {:.3}s) for {} bits",
                    seconds, avg, bits
                );
            }
        }
    }

    pub fn record_decoding(
        &self,
        success: bool,
        bit_error_rate: f64,
        iterations: usize,
        decoding_time_ms: f64,
        bits: usize,
    ) {
        if !self.enabled {
            return;
        }
        let mut inner = self.inner.lock().unwrap();
        push_bounded(&mut inner.decoding_times, decoding_time_ms / 1000.0, LATENCY_RESERVOIR);
        push_bounded(&mut inner.successes, success, LATENCY_RESERVOIR);
        push_bounded(&mut inner.bit_error_rates, bit_error_rate, LATENCY_RESERVOIR);
        push_bounded(&mut inner.iterations, iterations, LATENCY_RESERVOIR);
        drop(inner);

        if decoding_time_ms > 100.0 {
            warn!("slow decoding: {:.1}ms for {} bits", decoding_time_ms, bits);
        }
        if !success {
            warn!(
                "decoding failed after {} iterations, BER {:.4}",
                iterations, bit_error_rate
            );
        }
    }

    /// Classify a decoded block's BER, track it, and raise the burst alarm
    /// when enough high-error events land inside the sliding window.
    pub fn assess_channel(&self, bit_error_rate: f64) -> ChannelCondition {
        let condition = ChannelCondition::classify(bit_error_rate);
        telemetry::CHANNEL_CONDITION.set(condition.gauge_value());
        if !self.enabled {
            return condition;
        }

        let mut inner = self.inner.lock().unwrap();
        push_bounded(&mut inner.conditions, condition, CONDITION_RESERVOIR);

        let now = self.clock.now();
        inner.bursts.retain(|t| now.duration_since(*t) <= BURST_WINDOW);
        if bit_error_rate > BURST_BER {
            inner.bursts.push(now);
            if inner.bursts.len() >= BURST_ALARM_COUNT {
                telemetry::ERROR_BURSTS.inc();
                warn!(
                    "error burst: {} high-error blocks within {:?}",
                    inner.bursts.len(),
                    BURST_WINDOW
                );
            }
        }
        condition
    }

    /// Most recent channel classification; `Good` before any block decoded.
    pub fn current_channel_condition(&self) -> ChannelCondition {
        self.inner
            .lock()
            .unwrap()
            .conditions
            .back()
            .copied()
            .unwrap_or(ChannelCondition::Good)
    }

    pub fn error_rate(&self, class: PriorityClass) -> f64 {
        let inner = self.inner.lock().unwrap();
        let count = inner.counts[class.index()].max(1);
        inner.failures[class.index()] as f64 / count as f64
    }

    /// Log a warning for every class whose failure ratio crossed the alarm
    /// threshold.
    pub fn check_error_rates(&self) {
        if !self.enabled {
            return;
        }
        for class in PriorityClass::DESCENDING {
            let rate = self.error_rate(class);
            if rate > ERROR_RATE_ALARM {
                warn!("high error rate for {}: {:.1}%", class.as_str(), rate * 100.0);
            }
        }
    }

    pub fn burst_count(&self) -> usize {
        let mut inner = self.inner.lock().unwrap();
        let now = self.clock.now();
        inner.bursts.retain(|t| now.duration_since(*t) <= BURST_WINDOW);
        inner.bursts.len()
    }

    pub fn summary(&self) -> MetricsSummary {
        let inner = self.inner.lock().unwrap();
        let mut per_class = BTreeMap::new();
        for class in PriorityClass::DESCENDING {
            let idx = class.index();
            let latencies = &inner.latencies[idx];
            per_class.insert(
                class.as_str(),
                ClassStats {
                    messages: inner.counts[idx],
                    failures: inner.failures[idx],
                    error_rate: inner.failures[idx] as f64 / inner.counts[idx].max(1) as f64,
                    average_latency_ms: mean(latencies.iter().copied(), latencies.len()),
                },
            );
        }
        MetricsSummary {
            uptime_seconds: self.start.elapsed().as_secs_f64(),
            total_messages: inner.counts.iter().sum(),
            per_class,
            bandwidth_usage: inner
                .band_usage
                .iter()
                .map(|(band, usage)| (band.as_str(), usage.iter().copied().collect()))
                .collect(),
            current_cpu_percent: inner.cpu.back().copied().unwrap_or(0.0),
            current_memory_percent: inner.memory.back().copied().unwrap_or(0.0),
            current_channel_condition: inner
                .conditions
                .back()
                .copied()
                .unwrap_or(ChannelCondition::Good),
        }
    }

    pub fn codec_stats(&self) -> CodecStats {
        let inner = self.inner.lock().unwrap();
        let success_rate = if inner.successes.is_empty() {
            1.0
        } else {
            inner.successes.iter().filter(|&&s| s).count() as f64 / inner.successes.len() as f64
        };
        CodecStats {
            total_operations: inner.decoding_times.len(),
            avg_encoding_time_ms: mean(
                inner.encoding_times.iter().map(|s| s * 1000.0),
                inner.encoding_times.len(),
            ),
            avg_decoding_time_ms: mean(
                inner.decoding_times.iter().map(|s| s * 1000.0),
                inner.decoding_times.len(),
            ),
            success_rate,
            avg_bit_error_rate: mean(
                inner.bit_error_rates.iter().copied(),
                inner.bit_error_rates.len(),
            ),
            avg_iterations: mean(
                inner.iterations.iter().map(|&i| i as f64),
                inner.iterations.len(),
            ),
            current_channel_condition: inner
                .conditions
                .back()
                .copied()
                .unwrap_or(ChannelCondition::Good),
            error_burst_count: inner.bursts.len(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn classifier_thresholds() {
        assert_eq!(ChannelCondition::classify(0.001), ChannelCondition::Excellent);
        assert_eq!(ChannelCondition::classify(0.02), ChannelCondition::Good);
        assert_eq!(ChannelCondition::classify(0.10), ChannelCondition::Poor);
        assert_eq!(ChannelCondition::classify(0.15), ChannelCondition::Severe);
        assert_eq!(ChannelCondition::classify(0.5), ChannelCondition::Severe);
    }

    #[test]
    fn burst_alarm_counts_recent_events() {
        let metrics = MetricsAggregator::new(true);
        for _ in 0..5 {
            metrics.assess_channel(0.2);
        }
        assert_eq!(metrics.burst_count(), 5);
        assert_eq!(
            metrics.current_channel_condition(),
            ChannelCondition::Severe
        );
    }

    #[test]
    fn low_ber_does_not_feed_burst_window() {
        let metrics = MetricsAggregator::new(true);
        for _ in 0..10 {
            metrics.assess_channel(0.02);
        }
        assert_eq!(metrics.burst_count(), 0);
    }

    #[test]
    fn summary_tracks_per_class_counts() {
        let metrics = MetricsAggregator::new(true);
        metrics.record_dispatch(PriorityClass::High, Band::X, 100, 2.0, true);
        metrics.record_dispatch(PriorityClass::High, Band::X, 100, 4.0, false);
        let summary = metrics.summary();
        let high = &summary.per_class["high"];
        assert_eq!(high.messages, 2);
        assert_eq!(high.failures, 1);
        assert!((high.error_rate - 0.5).abs() < 1e-9);
        assert!((high.average_latency_ms - 3.0).abs() < 1e-9);
        assert_eq!(summary.total_messages, 2);
    }

    #[test]
    fn disabled_aggregator_records_nothing() {
        let metrics = MetricsAggregator::new(false);
        metrics.record_dispatch(PriorityClass::Low, Band::S, 10, 1.0, true);
        assert_eq!(metrics.summary().total_messages, 0);
    }
}
