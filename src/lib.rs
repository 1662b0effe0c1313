// groundlink core library
//
// Soft-real-time message dispatch and LDPC forward error correction for a
// space-to-ground link: priority-class scheduling with adaptive dispatch
// frequencies, and a block codec whose code rate follows observed channel
// quality.

pub mod clock;
pub mod config;
pub mod error;
pub mod health;
pub mod ldpc;
pub mod metrics;
pub mod scheduler;
pub mod telemetry;

pub use config::{LdpcConfig, LinkConfig, SchedulerConfig};
pub use error::{CodecError, SchedulerError};
pub use ldpc::{CodeParameters, DecodingResult, EncodedBlockMeta, ErrorCorrectionMode, LdpcEngine};
pub use metrics::{ChannelCondition, MetricsAggregator};
pub use scheduler::{
    Band, Message, MessageProcessor, MessageScheduler, MessageStatus, Payload, PriorityClass,
    TimeConstraints,
};
