use crate::scheduler::message::PriorityClass;
use std::time::Duration;
use thiserror::Error;

/// Errors surfaced synchronously by the scheduler's admission path.
#[derive(Debug, Error)]
pub enum SchedulerError {
    #[error("invalid message parameters: {0}")]
    InvalidParameters(String),
    #[error("duplicate message id {0:?}")]
    DuplicateId(String),
    #[error("{0:?} queue full")]
    QueueFull(PriorityClass),
    #[error("admission restricted to critical and high traffic while degraded")]
    DegradedModeDrop,
    #[error("operation timed out after {0:?}")]
    Timeout(Duration),
}

/// Errors surfaced by the encode/decode paths. Recoverable decode conditions
/// are reported through `DecodingResult::success` instead.
#[derive(Debug, Error)]
pub enum CodecError {
    #[error("invalid input: {0}")]
    InvalidInput(String),
    #[error("invalid block metadata: {0}")]
    InvalidMetadata(String),
    #[error("operation timed out after {0:?}")]
    Timeout(Duration),
    #[error("matrix memory estimate {required} bytes exceeds the {limit} byte budget")]
    OutOfBudget { required: usize, limit: usize },
    #[error("code construction failed: {0}")]
    Generation(String),
}
