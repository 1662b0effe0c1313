//! Per-class dispatch workers, the system monitor loop, and the maintenance
//! loop. One cooperative task per class pops and processes one message per
//! period at an adaptively computed frequency.

use crate::clock::Clock;
use crate::config::SchedulerConfig;
use crate::health::{MemoryPressure, ResourceProbe, ResourceSample, RECOVER_THRESHOLD_PERCENT};
use crate::metrics::MetricsAggregator;
use crate::scheduler::message::{Message, MessageStatus, PriorityClass};
use crate::scheduler::queue::PriorityQueues;
use crate::telemetry;
use async_trait::async_trait;
use log::{debug, info, warn};
use std::collections::VecDeque;
use std::sync::atomic::{AtomicU32, Ordering};
use std::sync::{Arc, Mutex as StdMutex, RwLock};
use std::time::Duration;
use tokio::sync::watch;

pub(crate) const HISTORY_CAP: usize = 1000;
pub(crate) const HISTORY_TRIM: usize = 500;
const MAX_FREQUENCY_HZ: f64 = 2000.0;
const EMPTY_QUEUE_SLEEP_CAP: Duration = Duration::from_millis(100);
const MONITOR_INTERVAL: Duration = Duration::from_secs(5);
const MAINTENANCE_INTERVAL: Duration = Duration::from_secs(30);

/// Host-supplied processing for one priority class. At most one processor is
/// registered per class; without one, dispatch simulates processing by
/// sleeping the message's advisory estimate.
#[async_trait]
pub trait MessageProcessor: Send + Sync {
    /// Process a message, returning `true` on success.
    async fn process(&self, message: &Message) -> bool;
}

/// Shared state behind every loop task.
pub(crate) struct SchedulerCore {
    pub(crate) config: SchedulerConfig,
    pub(crate) queues: PriorityQueues,
    pub(crate) metrics: Arc<MetricsAggregator>,
    pub(crate) processors: RwLock<[Option<Arc<dyn MessageProcessor>>; 4]>,
    pub(crate) consecutive_errors: [AtomicU32; 4],
    pub(crate) history: StdMutex<VecDeque<Message>>,
    pub(crate) probe: StdMutex<ResourceProbe>,
    pub(crate) clock: Clock,
}

impl SchedulerCore {
    pub(crate) fn new(config: SchedulerConfig, metrics: Arc<MetricsAggregator>) -> Self {
        Self {
            queues: PriorityQueues::new(config.max_queue_size),
            config,
            metrics,
            processors: RwLock::new(Default::default()),
            consecutive_errors: Default::default(),
            history: StdMutex::new(VecDeque::with_capacity(HISTORY_CAP)),
            probe: StdMutex::new(ResourceProbe::new()),
            clock: Clock::new(),
        }
    }

    /// Target dispatch frequency for one class: the nominal base, raised when
    /// the queue backs up and lowered when errors accumulate.
    pub(crate) fn compute_frequency(&self, class: PriorityClass) -> f64 {
        let mut frequency = class.base_frequency_hz();
        if self.config.enable_adaptive_scheduling {
            let depth = self.queues.depth(class);
            let capacity = self.queues.capacity();
            if depth as f64 > capacity as f64 * 0.8 {
                frequency *= 1.5;
            } else if depth as f64 > capacity as f64 * 0.5 {
                frequency *= 1.2;
            }
            let errors = self.consecutive_errors[class.index()].load(Ordering::Relaxed);
            if errors as f64 / depth.max(1) as f64 > 0.1 {
                frequency *= 0.8;
            }
        }
        frequency.min(MAX_FREQUENCY_HZ)
    }

    pub(crate) fn consecutive_error_count(&self, class: PriorityClass) -> u32 {
        self.consecutive_errors[class.index()].load(Ordering::Relaxed)
    }

    pub(crate) fn record_history(&self, message: Message) {
        let mut history = self.history.lock().unwrap();
        if history.len() == HISTORY_CAP {
            history.pop_front();
        }
        history.push_back(message);
    }

    /// Pop and process one message. Returns false when the queue was empty.
    /// The queue mutex is released before any user work runs.
    async fn process_next(&self, class: PriorityClass) -> bool {
        let Some(mut message) = self.queues.pop_highest(class).await else {
            return false;
        };
        let start = self.clock.now();
        message.processing_started_at = Some(self.clock.utc_now());
        message.set_status(MessageStatus::Processing, None);

        let success = if message.is_expired(&self.clock) {
            message.set_status(MessageStatus::Timeout, Some("deadline passed before processing"));
            false
        } else {
            let processor = self.processors.read().unwrap()[class.index()].clone();
            let budget = message.constraints.processing_timeout();
            match processor {
                Some(processor) => {
                    match tokio::time::timeout(budget, processor.process(&message)).await {
                        Ok(true) => {
                            message.set_status(MessageStatus::Completed, None);
                            true
                        }
                        Ok(false) => {
                            message.set_status(
                                MessageStatus::Failed,
                                Some("processor returned false"),
                            );
                            false
                        }
                        Err(_) => {
                            let cause = format!("processing timeout ({:?})", budget);
                            message.set_status(MessageStatus::Timeout, Some(cause.as_str()));
                            false
                        }
                    }
                }
                None => {
                    // Simulated processing for classes without a processor.
                    tokio::time::sleep(message.processing_estimate).await;
                    message.set_status(MessageStatus::Completed, None);
                    true
                }
            }
        };

        message.processing_finished_at = Some(self.clock.utc_now());
        let latency_ms = Clock::elapsed_ms(start);

        if success {
            self.consecutive_errors[class.index()].store(0, Ordering::Relaxed);
            debug!(
                "message {} processed in {:.2}ms",
                message.id, latency_ms
            );
        } else {
            self.consecutive_errors[class.index()].fetch_add(1, Ordering::Relaxed);
            telemetry::DISPATCH_ERRORS.inc();
        }
        telemetry::MESSAGES_DISPATCHED.inc();
        self.metrics.record_dispatch(
            class,
            message.band,
            message.bandwidth_required,
            latency_ms,
            success,
        );

        self.queues.release_active(&message.id).await;
        self.record_history(message);
        true
    }

    /// React to a resource sample: elevated memory trims bookkeeping, critical
    /// memory enters degraded admission.
    async fn handle_memory_pressure(&self, sample: ResourceSample) {
        match sample.memory_pressure() {
            MemoryPressure::Critical => {
                self.trim_bookkeeping();
                self.queues.set_degraded(true).await;
            }
            MemoryPressure::Elevated => self.trim_bookkeeping(),
            MemoryPressure::Nominal => {}
        }
    }

    fn trim_bookkeeping(&self) {
        let mut history = self.history.lock().unwrap();
        let before = history.len();
        while history.len() > HISTORY_TRIM {
            history.pop_front();
        }
        if before > HISTORY_TRIM {
            warn!(
                "memory pressure: trimmed message history {} -> {}",
                before,
                history.len()
            );
        }
    }
}

/// Dispatch worker for one priority class. Checks the shutdown signal at each
/// iteration boundary and between the pop and the next sleep.
pub(crate) async fn dispatch_loop(
    core: Arc<SchedulerCore>,
    class: PriorityClass,
    mut shutdown: watch::Receiver<bool>,
) {
    info!(
        "{} dispatch loop started at {:.0} Hz",
        class.as_str(),
        class.base_frequency_hz()
    );
    loop {
        if *shutdown.borrow() {
            break;
        }
        let frequency = core.compute_frequency(class);
        let interval = Duration::from_secs_f64(1.0 / frequency);
        let start = core.clock.now();
        let processed = core.process_next(class).await;
        if *shutdown.borrow() {
            break;
        }
        let idle = if processed {
            interval.saturating_sub(start.elapsed())
        } else {
            interval.saturating_mul(5).min(EMPTY_QUEUE_SLEEP_CAP)
        };
        if !idle.is_zero() {
            tokio::select! {
                _ = tokio::time::sleep(idle) => {}
                _ = shutdown.changed() => {}
            }
        }
    }
    info!("{} dispatch loop stopped", class.as_str());
}

/// System monitor: records resource samples and raises threshold alarms.
pub(crate) async fn monitor_loop(core: Arc<SchedulerCore>, mut shutdown: watch::Receiver<bool>) {
    info!("system monitor loop started");
    loop {
        if *shutdown.borrow() {
            break;
        }
        let sample = core.probe.lock().unwrap().sample();
        core.metrics.record_system(sample.cpu_percent, sample.memory_percent);
        core.metrics.check_error_rates();
        for class in PriorityClass::DESCENDING {
            let depth = core.queues.depth(class);
            if depth as f64 > core.queues.capacity() as f64 * 0.9 {
                warn!(
                    "{} queue nearly full: {}/{}",
                    class.as_str(),
                    depth,
                    core.queues.capacity()
                );
            }
        }
        core.handle_memory_pressure(sample).await;

        tokio::select! {
            _ = tokio::time::sleep(MONITOR_INTERVAL) => {}
            _ = shutdown.changed() => {}
        }
    }
    info!("system monitor loop stopped");
}

/// Maintenance: periodic expiry sweeps, bookkeeping trims, and degraded-mode
/// recovery once memory falls back below the recovery threshold.
pub(crate) async fn maintenance_loop(
    core: Arc<SchedulerCore>,
    mut shutdown: watch::Receiver<bool>,
) {
    info!("maintenance loop started");
    loop {
        if *shutdown.borrow() {
            break;
        }
        let mut total_expired = 0;
        for class in PriorityClass::DESCENDING {
            let expired = core.queues.sweep_expired(class).await;
            total_expired += expired.len();
            for message in expired {
                core.record_history(message);
            }
        }
        if total_expired > 0 {
            info!("maintenance removed {} expired messages", total_expired);
        }

        let sample = core.probe.lock().unwrap().sample();
        core.handle_memory_pressure(sample).await;
        if core.queues.is_degraded().await
            && sample.memory_percent <= RECOVER_THRESHOLD_PERCENT
        {
            core.queues.set_degraded(false).await;
        }

        tokio::select! {
            _ = tokio::time::sleep(MAINTENANCE_INTERVAL) => {}
            _ = shutdown.changed() => {}
        }
    }
    info!("maintenance loop stopped");
}
