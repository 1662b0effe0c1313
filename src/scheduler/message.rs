use crate::clock::Clock;
use chrono::{DateTime, Utc};
use clap::ValueEnum;
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::time::Duration;

/// Priority tier of a message. Higher values dispatch first; the discriminant
/// doubles as the priority key.
#[derive(
    Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize, ValueEnum,
)]
#[serde(rename_all = "snake_case")]
pub enum PriorityClass {
    Low = 0,
    Medium = 1,
    High = 2,
    Critical = 3,
}

impl PriorityClass {
    /// All classes, highest priority first. Dispatch selection scans in this
    /// order.
    pub const DESCENDING: [PriorityClass; 4] = [
        PriorityClass::Critical,
        PriorityClass::High,
        PriorityClass::Medium,
        PriorityClass::Low,
    ];

    pub fn value(self) -> u8 {
        self as u8
    }

    pub fn index(self) -> usize {
        self as usize
    }

    /// Nominal dispatch frequency for this class in Hz.
    pub fn base_frequency_hz(self) -> f64 {
        match self {
            PriorityClass::Critical => 1000.0,
            PriorityClass::High => 500.0,
            PriorityClass::Medium => 100.0,
            PriorityClass::Low => 10.0,
        }
    }

    /// Per-class processing latency alert threshold in milliseconds.
    pub fn latency_limit_ms(self) -> f64 {
        match self {
            PriorityClass::Critical => 1.0,
            PriorityClass::High => 10.0,
            PriorityClass::Medium => 50.0,
            PriorityClass::Low => 1000.0,
        }
    }

    /// Static share of the advertised link bandwidth, for admission stats.
    pub fn bandwidth_share(self) -> f64 {
        match self {
            PriorityClass::Critical => 0.40,
            PriorityClass::High => 0.35,
            PriorityClass::Medium => 0.20,
            PriorityClass::Low => 0.05,
        }
    }

    pub fn as_str(self) -> &'static str {
        match self {
            PriorityClass::Critical => "critical",
            PriorityClass::High => "high",
            PriorityClass::Medium => "medium",
            PriorityClass::Low => "low",
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum MessageStatus {
    Queued,
    Processing,
    Completed,
    Failed,
    Timeout,
    Dropped,
}

impl MessageStatus {
    pub fn is_terminal(self) -> bool {
        matches!(
            self,
            MessageStatus::Completed
                | MessageStatus::Failed
                | MessageStatus::Timeout
                | MessageStatus::Dropped
        )
    }
}

/// Nominal RF band a message is destined for. Only used for bandwidth
/// bookkeeping; the core never inspects it otherwise.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Band {
    S,
    X,
    K,
    Ka,
}

impl Band {
    pub fn as_str(self) -> &'static str {
        match self {
            Band::S => "s_band",
            Band::X => "x_band",
            Band::K => "k_band",
            Band::Ka => "ka_band",
        }
    }
}

impl Default for Band {
    fn default() -> Self {
        Band::X
    }
}

/// Message content. Carried opaquely; the scheduler never looks inside.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Payload {
    Text(String),
    Bytes(Vec<u8>),
    Structured(BTreeMap<String, serde_json::Value>),
}

impl Payload {
    /// Rough in-memory footprint, for resource accounting.
    pub fn approx_size(&self) -> usize {
        match self {
            Payload::Text(s) => s.len(),
            Payload::Bytes(b) => b.len(),
            Payload::Structured(map) => map
                .iter()
                .map(|(k, v)| k.len() + v.to_string().len())
                .sum(),
        }
    }
}

/// Immutable time constraints attached to a message.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct TimeConstraints {
    pub max_latency_ms: f64,
    pub deadline: Option<DateTime<Utc>>,
    pub timeout_ms: f64,
    pub retry_limit: u32,
}

impl Default for TimeConstraints {
    fn default() -> Self {
        Self {
            max_latency_ms: 50.0,
            deadline: None,
            timeout_ms: 5000.0,
            retry_limit: 3,
        }
    }
}

impl TimeConstraints {
    pub fn validate(&self) -> Result<(), String> {
        if self.max_latency_ms <= 0.0 {
            return Err("max_latency_ms must be positive".into());
        }
        if self.timeout_ms <= 0.0 {
            return Err("timeout_ms must be positive".into());
        }
        Ok(())
    }

    pub fn processing_timeout(&self) -> Duration {
        Duration::from_secs_f64(self.timeout_ms / 1000.0)
    }
}

/// A single message moving through the dispatch pipeline.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Message {
    pub id: String,
    pub payload: Payload,
    pub class: PriorityClass,

    /// Required bandwidth in Hz.
    pub bandwidth_required: u32,
    /// Advisory estimate consumed by the default simulated processor.
    pub processing_estimate: Duration,
    /// Estimated footprint in bytes.
    pub memory_requirement: usize,

    pub constraints: TimeConstraints,

    pub band: Band,
    pub source: Option<String>,
    pub destination: Option<String>,

    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
    pub queued_at: Option<DateTime<Utc>>,
    pub processing_started_at: Option<DateTime<Utc>>,
    pub processing_finished_at: Option<DateTime<Utc>>,

    pub status: MessageStatus,
    pub retry_count: u32,
    pub error_history: Vec<String>,
}

impl Message {
    pub fn new(
        id: impl Into<String>,
        payload: Payload,
        class: PriorityClass,
        bandwidth_required: u32,
    ) -> Self {
        let now = Utc::now();
        let memory_requirement = payload.approx_size().max(1024);
        Self {
            id: id.into(),
            payload,
            class,
            bandwidth_required,
            processing_estimate: Duration::ZERO,
            memory_requirement,
            constraints: TimeConstraints::default(),
            band: Band::default(),
            source: None,
            destination: None,
            created_at: now,
            updated_at: now,
            queued_at: None,
            processing_started_at: None,
            processing_finished_at: None,
            status: MessageStatus::Queued,
            retry_count: 0,
            error_history: Vec::new(),
        }
    }

    pub fn with_constraints(mut self, constraints: TimeConstraints) -> Self {
        self.constraints = constraints;
        self
    }

    pub fn with_band(mut self, band: Band) -> Self {
        self.band = band;
        self
    }

    pub fn with_route(
        mut self,
        source: impl Into<String>,
        destination: impl Into<String>,
    ) -> Self {
        self.source = Some(source.into());
        self.destination = Some(destination.into());
        self
    }

    pub fn with_processing_estimate(mut self, estimate: Duration) -> Self {
        self.processing_estimate = estimate;
        self
    }

    pub fn with_memory_requirement(mut self, bytes: usize) -> Self {
        self.memory_requirement = bytes;
        self
    }

    pub fn validate(&self) -> Result<(), String> {
        if self.id.is_empty() {
            return Err("message id must not be empty".into());
        }
        if self.bandwidth_required == 0 {
            return Err("bandwidth_required must be positive".into());
        }
        if self.retry_count > self.constraints.retry_limit {
            return Err("retry_count exceeds the retry limit".into());
        }
        self.constraints.validate()
    }

    /// Update the status, stamping `updated_at` and appending to the error
    /// history when a cause is given.
    pub fn set_status(&mut self, status: MessageStatus, cause: Option<&str>) {
        self.status = status;
        self.updated_at = Utc::now();
        if let Some(cause) = cause {
            self.error_history
                .push(format!("{}: {}", self.updated_at.to_rfc3339(), cause));
            log::warn!("message {} error: {}", self.id, cause);
        }
    }

    pub fn is_expired(&self, clock: &Clock) -> bool {
        self.constraints
            .deadline
            .map(|d| clock.is_past(d))
            .unwrap_or(false)
    }

    pub fn age_seconds(&self, clock: &Clock) -> f64 {
        (clock.utc_now() - self.created_at)
            .num_milliseconds()
            .max(0) as f64
            / 1000.0
    }

    /// Processing latency in milliseconds, once both stamps exist.
    pub fn processing_latency_ms(&self) -> Option<f64> {
        match (self.processing_started_at, self.processing_finished_at) {
            (Some(start), Some(end)) => Some((end - start).num_microseconds()? as f64 / 1000.0),
            _ => None,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn class_ordering_matches_priority_values() {
        assert!(PriorityClass::Critical > PriorityClass::High);
        assert!(PriorityClass::High > PriorityClass::Medium);
        assert!(PriorityClass::Medium > PriorityClass::Low);
        assert_eq!(PriorityClass::Critical.value(), 3);
        assert_eq!(PriorityClass::Low.value(), 0);
    }

    #[test]
    fn validation_rejects_bad_parameters() {
        let msg = Message::new("", Payload::Text("x".into()), PriorityClass::Low, 100);
        assert!(msg.validate().is_err());

        let msg = Message::new("a", Payload::Text("x".into()), PriorityClass::Low, 0);
        assert!(msg.validate().is_err());

        let bad_constraints = TimeConstraints {
            max_latency_ms: 0.0,
            ..TimeConstraints::default()
        };
        let msg = Message::new("a", Payload::Text("x".into()), PriorityClass::Low, 100)
            .with_constraints(bad_constraints);
        assert!(msg.validate().is_err());
    }

    #[test]
    fn status_transitions_record_errors() {
        let mut msg = Message::new("m-1", Payload::Bytes(vec![1, 2]), PriorityClass::High, 10);
        msg.set_status(MessageStatus::Failed, Some("processor returned false"));
        assert_eq!(msg.status, MessageStatus::Failed);
        assert!(msg.status.is_terminal());
        assert_eq!(msg.error_history.len(), 1);
        assert!(msg.error_history[0].contains("processor returned false"));
    }

    #[test]
    fn expiry_uses_absolute_deadline() {
        let clock = Clock::new();
        let constraints = TimeConstraints {
            deadline: Some(clock.deadline_in_ms(-5)),
            ..TimeConstraints::default()
        };
        let msg = Message::new("m-2", Payload::Text("t".into()), PriorityClass::Medium, 10)
            .with_constraints(constraints);
        assert!(msg.is_expired(&clock));
    }
}
