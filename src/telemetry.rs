//! Telemetry metrics used throughout groundlink.
//!
//! Currently exported metrics:
//! - `messages_admitted_total`: Messages accepted into a priority queue.
//! - `messages_dispatched_total`: Messages handed to a processor.
//! - `messages_dropped_total`: Messages dropped by preemption or degraded mode.
//! - `messages_expired_total`: Messages removed by the expiry sweep.
//! - `dispatch_errors_total`: Processor failures and timeouts.
//! - `queue_depth`: Current depth per priority class.
//! - `degraded_mode`: 1 while admission is restricted to critical traffic.
//! - `blocks_encoded_total` / `blocks_decoded_total`: Codec block counts.
//! - `decode_failures_total`: Decodes that did not converge or failed digest.
//! - `mode_switch_total`: Error-correction mode transitions.
//! - `code_rate_permille`: Active code rate multiplied by 1000.
//! - `channel_condition`: Coarse channel class (0 excellent .. 3 severe).
//! - `error_bursts_total`: Error-burst alarms raised by the classifier.
//! - `matrix_generations_total`: LDPC matrix constructions.
//! - `matrix_cache_entries`: Current matrix cache population.
//! - `cpu_usage_percent` / `memory_usage_percent`: Last resource probe.

use lazy_static::lazy_static;
use prometheus::{
    register_int_counter, register_int_gauge, register_int_gauge_vec, Encoder, IntCounter,
    IntGauge, IntGaugeVec, TextEncoder,
};

lazy_static! {
    pub static ref MESSAGES_ADMITTED: IntCounter =
        register_int_counter!("messages_admitted_total", "Messages admitted to a queue").unwrap();
    pub static ref MESSAGES_DISPATCHED: IntCounter =
        register_int_counter!("messages_dispatched_total", "Messages handed to a processor")
            .unwrap();
    pub static ref MESSAGES_DROPPED: IntCounter =
        register_int_counter!("messages_dropped_total", "Messages dropped before dispatch")
            .unwrap();
    pub static ref MESSAGES_EXPIRED: IntCounter =
        register_int_counter!("messages_expired_total", "Messages expired in queue").unwrap();
    pub static ref DISPATCH_ERRORS: IntCounter =
        register_int_counter!("dispatch_errors_total", "Processor failures and timeouts").unwrap();
    pub static ref QUEUE_DEPTH: IntGaugeVec =
        register_int_gauge_vec!("queue_depth", "Current queue depth per class", &["class"])
            .unwrap();
    pub static ref DEGRADED_MODE: IntGauge =
        register_int_gauge!("degraded_mode", "Degraded admission state").unwrap();
    pub static ref BLOCKS_ENCODED: IntCounter =
        register_int_counter!("blocks_encoded_total", "Total encoded codeword blocks").unwrap();
    pub static ref BLOCKS_DECODED: IntCounter =
        register_int_counter!("blocks_decoded_total", "Total decoded codeword blocks").unwrap();
    pub static ref DECODE_FAILURES: IntCounter =
        register_int_counter!("decode_failures_total", "Decodes that failed to recover").unwrap();
    pub static ref MODE_SWITCHES: IntCounter =
        register_int_counter!("mode_switch_total", "Error-correction mode transitions").unwrap();
    pub static ref CODE_RATE_PERMILLE: IntGauge =
        register_int_gauge!("code_rate_permille", "Active code rate * 1000").unwrap();
    pub static ref CHANNEL_CONDITION: IntGauge =
        register_int_gauge!("channel_condition", "Coarse channel class").unwrap();
    pub static ref ERROR_BURSTS: IntCounter =
        register_int_counter!("error_bursts_total", "Error-burst alarms").unwrap();
    pub static ref MATRIX_GENERATIONS: IntCounter =
        register_int_counter!("matrix_generations_total", "LDPC matrix constructions").unwrap();
    pub static ref MATRIX_CACHE_ENTRIES: IntGauge =
        register_int_gauge!("matrix_cache_entries", "Matrix cache population").unwrap();
    pub static ref CPU_USAGE_PERCENT: IntGauge =
        register_int_gauge!("cpu_usage_percent", "Last sampled CPU usage").unwrap();
    pub static ref MEMORY_USAGE_PERCENT: IntGauge =
        register_int_gauge!("memory_usage_percent", "Last sampled memory usage").unwrap();
}

/// Serve the metric registry as text exposition on a plain TCP listener.
pub fn serve(addr: &str) {
    use std::io::Write;
    use std::net::TcpListener;
    let listener = TcpListener::bind(addr).expect("bind metrics");
    std::thread::spawn(move || {
        let encoder = TextEncoder::new();
        for stream in listener.incoming() {
            if let Ok(mut s) = stream {
                let metrics = prometheus::gather();
                let mut buf = Vec::new();
                encoder.encode(&metrics, &mut buf).unwrap();
                let _ = s.write_all(&buf);
            }
        }
    });
}

/// Dump the current registry to the log, for shutdown summaries.
pub fn flush() {
    let encoder = TextEncoder::new();
    let metrics = prometheus::gather();
    let mut buf = Vec::new();
    if encoder.encode(&metrics, &mut buf).is_ok() {
        log::info!("\n{}", String::from_utf8_lossy(&buf));
    }
}
