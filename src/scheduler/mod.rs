//! Priority-based message scheduling for the space-to-ground link: admission,
//! four class queues, adaptive dispatch workers, and maintenance.

pub mod dispatch;
pub mod message;
pub mod queue;

pub use dispatch::MessageProcessor;
pub use message::{Band, Message, MessageStatus, Payload, PriorityClass, TimeConstraints};

use crate::config::SchedulerConfig;
use crate::error::SchedulerError;
use crate::metrics::{MetricsAggregator, MetricsSummary};
use dispatch::SchedulerCore;
use log::{info, warn};
use serde::Serialize;
use std::collections::BTreeMap;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex as StdMutex};
use std::time::Duration;
use tokio::sync::watch;
use tokio::task::JoinHandle;
use tokio::time::Instant;

/// Read-only snapshot of the queue layer.
#[derive(Debug, Clone, Serialize)]
pub struct QueueStatus {
    pub is_running: bool,
    pub degraded_mode: bool,
    pub total_active_messages: usize,
    pub queue_sizes: BTreeMap<&'static str, usize>,
    pub processing_frequencies_hz: BTreeMap<&'static str, f64>,
    pub consecutive_errors: BTreeMap<&'static str, u32>,
    /// Static share of the advertised link capacity per class, in Hz.
    pub bandwidth_allocation_hz: BTreeMap<&'static str, u32>,
}

/// The message scheduler. Admission is synchronous; dispatch runs on
/// cooperative background tasks once `start` is called.
pub struct MessageScheduler {
    core: Arc<SchedulerCore>,
    shutdown_tx: watch::Sender<bool>,
    shutdown_rx: watch::Receiver<bool>,
    tasks: StdMutex<Vec<JoinHandle<()>>>,
    running: AtomicBool,
}

impl MessageScheduler {
    pub fn new(config: SchedulerConfig) -> Result<Self, SchedulerError> {
        config
            .validate()
            .map_err(SchedulerError::InvalidParameters)?;
        let metrics = Arc::new(MetricsAggregator::new(config.enable_performance_monitoring));
        Self::with_metrics(config, metrics)
    }

    /// Build a scheduler around an existing aggregator, so the codec and the
    /// scheduler can share one.
    pub fn with_metrics(
        config: SchedulerConfig,
        metrics: Arc<MetricsAggregator>,
    ) -> Result<Self, SchedulerError> {
        config
            .validate()
            .map_err(SchedulerError::InvalidParameters)?;
        info!(
            "scheduler initialized: bandwidth={}Hz queue_size={} memory_limit={}MB",
            config.max_bandwidth, config.max_queue_size, config.memory_limit_mb
        );
        let (shutdown_tx, shutdown_rx) = watch::channel(false);
        Ok(Self {
            core: Arc::new(SchedulerCore::new(config, metrics)),
            shutdown_tx,
            shutdown_rx,
            tasks: StdMutex::new(Vec::new()),
            running: AtomicBool::new(false),
        })
    }

    /// Admit a message under the configured admission timeout.
    pub async fn admit(&self, message: Message) -> Result<(), SchedulerError> {
        let budget = Duration::from_millis(self.core.config.admit_timeout_ms);
        self.admit_with_timeout(message, budget).await
    }

    /// Admit a message, giving up after `budget`.
    pub async fn admit_with_timeout(
        &self,
        message: Message,
        budget: Duration,
    ) -> Result<(), SchedulerError> {
        message
            .validate()
            .map_err(SchedulerError::InvalidParameters)?;
        match tokio::time::timeout(budget, self.core.queues.admit(message)).await {
            Ok(Ok(displaced)) => {
                for message in displaced.0 {
                    self.core.record_history(message);
                }
                Ok(())
            }
            Ok(Err(err)) => Err(err),
            Err(_) => Err(SchedulerError::Timeout(budget)),
        }
    }

    /// Register the processor for one class. Registration is idempotent and
    /// takes effect on the next dispatched message.
    pub fn set_processor(&self, class: PriorityClass, processor: Arc<dyn MessageProcessor>) {
        self.core.processors.write().unwrap()[class.index()] = Some(processor);
        info!("processor registered for {} priority", class.as_str());
    }

    /// Spawn the dispatch, monitor, and maintenance loops.
    pub fn start(&self) {
        if self.running.swap(true, Ordering::SeqCst) {
            warn!("scheduler is already running");
            return;
        }
        let mut tasks = self.tasks.lock().unwrap();
        for class in PriorityClass::DESCENDING {
            tasks.push(tokio::spawn(dispatch::dispatch_loop(
                Arc::clone(&self.core),
                class,
                self.shutdown_rx.clone(),
            )));
        }
        if self.core.config.enable_performance_monitoring {
            tasks.push(tokio::spawn(dispatch::monitor_loop(
                Arc::clone(&self.core),
                self.shutdown_rx.clone(),
            )));
        }
        tasks.push(tokio::spawn(dispatch::maintenance_loop(
            Arc::clone(&self.core),
            self.shutdown_rx.clone(),
        )));
        info!("scheduler started with all processing loops");
    }

    pub fn is_running(&self) -> bool {
        self.running.load(Ordering::SeqCst)
    }

    /// Graceful shutdown with the configured grace period.
    pub async fn shutdown(&self) {
        let grace = Duration::from_secs(self.core.config.shutdown_timeout_secs);
        self.shutdown_with_timeout(grace).await;
    }

    /// Signal shutdown, allow in-flight work to finish within `grace`, then
    /// abort whatever remains. Cancelled messages are not re-queued.
    pub async fn shutdown_with_timeout(&self, grace: Duration) {
        if !self.running.swap(false, Ordering::SeqCst) {
            return;
        }
        info!("initiating graceful shutdown");
        let _ = self.shutdown_tx.send(true);
        let handles: Vec<JoinHandle<()>> = self.tasks.lock().unwrap().drain(..).collect();
        let deadline = Instant::now() + grace;
        for mut handle in handles {
            let remaining = deadline.saturating_duration_since(Instant::now());
            if tokio::time::timeout(remaining, &mut handle).await.is_err() {
                warn!("shutdown grace period expired, aborting task");
                handle.abort();
            }
        }
        info!("scheduler shutdown complete");
    }

    /// Pop the head of one class queue without running a processor. For hosts
    /// that drive dispatch themselves instead of starting the loops.
    pub async fn pop_highest(&self, class: PriorityClass) -> Option<Message> {
        self.core.queues.pop_highest(class).await
    }

    /// Pop the globally highest-priority message across all classes.
    pub async fn pop_next(&self) -> Option<Message> {
        self.core.queues.pop_next().await
    }

    /// Sweep expired messages from one class queue; returns how many were
    /// removed.
    pub async fn sweep_expired(&self, class: PriorityClass) -> usize {
        let expired = self.core.queues.sweep_expired(class).await;
        let count = expired.len();
        for message in expired {
            self.core.record_history(message);
        }
        count
    }

    /// Operator override for the degraded-admission flag. The maintenance
    /// loop may clear it again once memory pressure recedes.
    pub async fn force_degraded(&self, degraded: bool) {
        self.core.queues.set_degraded(degraded).await;
    }

    pub async fn is_degraded(&self) -> bool {
        self.core.queues.is_degraded().await
    }

    /// Recent terminal messages, oldest first.
    pub fn recent_history(&self) -> Vec<Message> {
        self.core.history.lock().unwrap().iter().cloned().collect()
    }

    pub fn metrics(&self) -> Arc<MetricsAggregator> {
        Arc::clone(&self.core.metrics)
    }

    pub fn metrics_summary(&self) -> MetricsSummary {
        self.core.metrics.summary()
    }

    pub async fn queue_status(&self) -> QueueStatus {
        let mut queue_sizes = BTreeMap::new();
        let mut frequencies = BTreeMap::new();
        let mut errors = BTreeMap::new();
        let mut allocation = BTreeMap::new();
        for class in PriorityClass::DESCENDING {
            queue_sizes.insert(class.as_str(), self.core.queues.depth(class));
            frequencies.insert(class.as_str(), self.core.compute_frequency(class));
            errors.insert(class.as_str(), self.core.consecutive_error_count(class));
            allocation.insert(
                class.as_str(),
                (self.core.config.max_bandwidth as f64 * class.bandwidth_share()) as u32,
            );
        }
        QueueStatus {
            is_running: self.is_running(),
            degraded_mode: self.core.queues.is_degraded().await,
            total_active_messages: self.core.queues.total_active(),
            queue_sizes,
            processing_frequencies_hz: frequencies,
            consecutive_errors: errors,
            bandwidth_allocation_hz: allocation,
        }
    }
}
