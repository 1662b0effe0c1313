//! Per-class priority queues and the admission path: capacity enforcement,
//! duplicate rejection, degraded-mode filtering, and priority eviction.

use crate::clock::Clock;
use crate::error::SchedulerError;
use crate::scheduler::message::{Message, MessageStatus, PriorityClass};
use crate::telemetry;
use chrono::{DateTime, Utc};
use log::{debug, info, warn};
use std::cmp::Ordering;
use std::collections::{BinaryHeap, HashMap};
use std::sync::atomic::{AtomicUsize, Ordering as AtomicOrdering};
use tokio::sync::Mutex;

pub(crate) const PREEMPTION_CAUSE: &str = "preempted-by-higher";

/// Heap wrapper ordering messages by (priority, earliest creation).
#[derive(Debug)]
struct QueuedEntry(Message);

impl PartialEq for QueuedEntry {
    fn eq(&self, other: &Self) -> bool {
        self.cmp(other) == Ordering::Equal
    }
}

impl Eq for QueuedEntry {}

impl PartialOrd for QueuedEntry {
    fn partial_cmp(&self, other: &Self) -> Option<Ordering> {
        Some(self.cmp(other))
    }
}

impl Ord for QueuedEntry {
    fn cmp(&self, other: &Self) -> Ordering {
        // Max-heap: higher class wins, then the earlier creation timestamp,
        // then the id for a total order.
        self.0
            .class
            .cmp(&other.0.class)
            .then_with(|| other.0.created_at.cmp(&self.0.created_at))
            .then_with(|| other.0.id.cmp(&self.0.id))
    }
}

/// Bookkeeping entry for a message that is queued or being processed.
#[derive(Debug, Clone)]
pub struct ActiveRecord {
    pub class: PriorityClass,
    pub created_at: DateTime<Utc>,
}

/// State behind the single global mutex: the active-message index and the
/// degraded-admission flag. Lock order is queue mutex first, then this.
struct SharedState {
    active: HashMap<String, ActiveRecord>,
    degraded: bool,
}

/// Messages pushed out of the queues as a side effect of one admission:
/// expired entries found by the opportunistic sweep and at most one victim
/// of priority eviction. The caller records them into the history ring.
#[derive(Debug, Default)]
pub struct Displaced(pub Vec<Message>);

/// The four class queues plus shared admission state.
pub struct PriorityQueues {
    queues: [Mutex<BinaryHeap<QueuedEntry>>; 4],
    depths: [AtomicUsize; 4],
    shared: Mutex<SharedState>,
    capacity: usize,
    clock: Clock,
}

impl PriorityQueues {
    pub fn new(capacity: usize) -> Self {
        Self {
            queues: Default::default(),
            depths: Default::default(),
            shared: Mutex::new(SharedState {
                active: HashMap::new(),
                degraded: false,
            }),
            capacity,
            clock: Clock::new(),
        }
    }

    pub fn capacity(&self) -> usize {
        self.capacity
    }

    pub fn depth(&self, class: PriorityClass) -> usize {
        self.depths[class.index()].load(AtomicOrdering::Relaxed)
    }

    pub fn total_active(&self) -> usize {
        self.depths
            .iter()
            .map(|d| d.load(AtomicOrdering::Relaxed))
            .sum()
    }

    pub async fn is_degraded(&self) -> bool {
        self.shared.lock().await.degraded
    }

    pub async fn set_degraded(&self, degraded: bool) {
        let mut shared = self.shared.lock().await;
        if shared.degraded != degraded {
            shared.degraded = degraded;
            telemetry::DEGRADED_MODE.set(degraded as i64);
            if degraded {
                warn!("entering degraded mode: only critical and high traffic admitted");
            } else {
                info!("exited degraded mode");
            }
        }
    }

    pub async fn active_contains(&self, id: &str) -> bool {
        self.shared.lock().await.active.contains_key(id)
    }

    /// Remove a terminal message from the active index.
    pub async fn release_active(&self, id: &str) {
        self.shared.lock().await.active.remove(id);
    }

    /// Admit a message into its class queue. The caller has already validated
    /// parameters and wrapped this call in the admission timeout.
    ///
    /// Capacity is enforced per class. A full queue first sheds expired
    /// entries; critical and high traffic may then make room by evicting
    /// from the lowest non-empty lower class before being enqueued.
    pub async fn admit(&self, mut message: Message) -> Result<Displaced, SchedulerError> {
        let class = message.class;
        {
            let shared = self.shared.lock().await;
            if shared.active.contains_key(&message.id) {
                warn!("duplicate message id rejected: {}", message.id);
                return Err(SchedulerError::DuplicateId(message.id));
            }
            if shared.degraded && class < PriorityClass::High {
                warn!("message {} dropped: degraded mode", message.id);
                return Err(SchedulerError::DegradedModeDrop);
            }
        }

        let mut displaced = Displaced::default();
        let mut queue = self.queues[class.index()].lock().await;
        if queue.len() >= self.capacity {
            displaced.0 = self.sweep_collect(class, &mut queue).await;
        }
        if queue.len() >= self.capacity {
            let victim = if class >= PriorityClass::High {
                self.evict_lowest_below(class).await
            } else {
                None
            };
            match victim {
                // Room was made by dropping lower traffic; the target heap
                // exceeds its cap by one until dispatch drains it.
                Some(victim) => displaced.0.push(victim),
                None => {
                    warn!("queue full for {}", class.as_str());
                    return Err(SchedulerError::QueueFull(class));
                }
            }
        }

        message.queued_at = Some(self.clock.utc_now());
        message.status = MessageStatus::Queued;
        {
            // Re-check under the index lock; a racing admit may have won.
            let mut shared = self.shared.lock().await;
            if shared.active.contains_key(&message.id) {
                return Err(SchedulerError::DuplicateId(message.id));
            }
            shared.active.insert(
                message.id.clone(),
                ActiveRecord {
                    class,
                    created_at: message.created_at,
                },
            );
        }
        debug!(
            "message {} queued with {} priority (depth {})",
            message.id,
            class.as_str(),
            queue.len() + 1
        );
        queue.push(QueuedEntry(message));
        self.depths[class.index()].fetch_add(1, AtomicOrdering::Relaxed);
        self.publish_depth(class);
        telemetry::MESSAGES_ADMITTED.inc();
        Ok(displaced)
    }

    /// Pop the head of one class queue: the message with the largest priority
    /// key, ties broken by the earliest creation timestamp.
    pub async fn pop_highest(&self, class: PriorityClass) -> Option<Message> {
        let mut queue = self.queues[class.index()].lock().await;
        let entry = queue.pop()?;
        self.depths[class.index()].fetch_sub(1, AtomicOrdering::Relaxed);
        self.publish_depth(class);
        Some(entry.0)
    }

    /// Pop the globally highest-priority message, scanning classes from
    /// critical down. No lower-class message is returned while a higher
    /// queue is non-empty at the instant of selection.
    pub async fn pop_next(&self) -> Option<Message> {
        for class in PriorityClass::DESCENDING {
            if let Some(message) = self.pop_highest(class).await {
                return Some(message);
            }
        }
        None
    }

    /// Remove every expired message from one class queue, marking each as
    /// timed out. Returns the expired messages for history recording.
    pub async fn sweep_expired(&self, class: PriorityClass) -> Vec<Message> {
        let mut queue = self.queues[class.index()].lock().await;
        self.sweep_collect(class, &mut queue).await
    }

    async fn sweep_collect(
        &self,
        class: PriorityClass,
        queue: &mut BinaryHeap<QueuedEntry>,
    ) -> Vec<Message> {
        let mut expired = Vec::new();
        let entries = std::mem::take(queue);
        for QueuedEntry(mut message) in entries.into_iter() {
            if message.is_expired(&self.clock) {
                message.set_status(MessageStatus::Timeout, Some("deadline passed in queue"));
                expired.push(message);
            } else {
                queue.push(QueuedEntry(message));
            }
        }
        if !expired.is_empty() {
            let mut shared = self.shared.lock().await;
            for message in &expired {
                shared.active.remove(&message.id);
            }
            drop(shared);
            self.depths[class.index()].fetch_sub(expired.len(), AtomicOrdering::Relaxed);
            self.publish_depth(class);
            telemetry::MESSAGES_EXPIRED.inc_by(expired.len() as u64);
            info!(
                "removed {} expired messages from {} queue",
                expired.len(),
                class.as_str()
            );
        }
        expired
    }

    /// Evict the oldest message from the lowest non-empty class strictly
    /// below `class`, marking it dropped. Queue locks are always taken in
    /// descending class order, so holding the target lock here is safe.
    async fn evict_lowest_below(&self, class: PriorityClass) -> Option<Message> {
        for victim_class in PriorityClass::DESCENDING.iter().rev() {
            if *victim_class >= class {
                break;
            }
            let mut queue = self.queues[victim_class.index()].lock().await;
            if let Some(QueuedEntry(mut message)) = queue.pop() {
                self.depths[victim_class.index()].fetch_sub(1, AtomicOrdering::Relaxed);
                self.publish_depth(*victim_class);
                message.set_status(MessageStatus::Dropped, Some(PREEMPTION_CAUSE));
                self.shared.lock().await.active.remove(&message.id);
                telemetry::MESSAGES_DROPPED.inc();
                info!(
                    "dropped {} message {} for incoming {} traffic",
                    victim_class.as_str(),
                    message.id,
                    class.as_str()
                );
                return Some(message);
            }
        }
        None
    }

    fn publish_depth(&self, class: PriorityClass) {
        telemetry::QUEUE_DEPTH
            .with_label_values(&[class.as_str()])
            .set(self.depth(class) as i64);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::scheduler::message::Payload;
    use chrono::Duration as ChronoDuration;

    fn message(id: &str, class: PriorityClass) -> Message {
        Message::new(id, Payload::Text("payload".into()), class, 100)
    }

    #[tokio::test]
    async fn fifo_within_a_class() {
        let queues = PriorityQueues::new(16);
        let mut early = message("early", PriorityClass::Medium);
        let mut late = message("late", PriorityClass::Medium);
        late.created_at = early.created_at + ChronoDuration::milliseconds(5);
        // Admit out of order; pop must still honor creation order.
        queues.admit(late).await.unwrap();
        queues.admit(early).await.unwrap();

        let first = queues.pop_highest(PriorityClass::Medium).await.unwrap();
        assert_eq!(first.id, "early");
        let second = queues.pop_highest(PriorityClass::Medium).await.unwrap();
        assert_eq!(second.id, "late");
    }

    #[tokio::test]
    async fn duplicate_ids_are_rejected() {
        let queues = PriorityQueues::new(16);
        queues.admit(message("x", PriorityClass::Low)).await.unwrap();
        let err = queues
            .admit(message("x", PriorityClass::Critical))
            .await
            .unwrap_err();
        assert!(matches!(err, SchedulerError::DuplicateId(_)));
        assert_eq!(queues.depth(PriorityClass::Low), 1);
        assert_eq!(queues.depth(PriorityClass::Critical), 0);
    }

    #[tokio::test]
    async fn degraded_mode_filters_low_classes() {
        let queues = PriorityQueues::new(16);
        queues.set_degraded(true).await;
        let err = queues
            .admit(message("m", PriorityClass::Medium))
            .await
            .unwrap_err();
        assert!(matches!(err, SchedulerError::DegradedModeDrop));
        queues.admit(message("h", PriorityClass::High)).await.unwrap();
        queues
            .admit(message("c", PriorityClass::Critical))
            .await
            .unwrap();
        assert_eq!(queues.total_active(), 2);
    }

    #[tokio::test]
    async fn classes_fill_independently() {
        let queues = PriorityQueues::new(2);
        queues.admit(message("a", PriorityClass::Medium)).await.unwrap();
        queues.admit(message("b", PriorityClass::Medium)).await.unwrap();
        // A full medium queue must not block admission to an empty class.
        queues.admit(message("l", PriorityClass::Low)).await.unwrap();
        assert_eq!(queues.depth(PriorityClass::Low), 1);
        assert_eq!(queues.total_active(), 3);
    }

    #[tokio::test]
    async fn full_queue_below_high_cannot_preempt() {
        let queues = PriorityQueues::new(2);
        queues.admit(message("l", PriorityClass::Low)).await.unwrap();
        queues.admit(message("a", PriorityClass::Medium)).await.unwrap();
        queues.admit(message("b", PriorityClass::Medium)).await.unwrap();
        let err = queues
            .admit(message("c", PriorityClass::Medium))
            .await
            .unwrap_err();
        assert!(matches!(
            err,
            SchedulerError::QueueFull(PriorityClass::Medium)
        ));
        assert!(queues.active_contains("l").await);
        assert!(queues.active_contains("a").await);
        assert!(queues.active_contains("b").await);
    }

    #[tokio::test]
    async fn eviction_removes_oldest_from_lowest_class() {
        let queues = PriorityQueues::new(2);
        let old_low = message("old-low", PriorityClass::Low);
        let mut new_low = message("new-low", PriorityClass::Low);
        new_low.created_at = old_low.created_at + ChronoDuration::milliseconds(1);
        queues.admit(old_low).await.unwrap();
        queues.admit(new_low).await.unwrap();
        queues
            .admit(message("crit-1", PriorityClass::Critical))
            .await
            .unwrap();
        queues
            .admit(message("crit-2", PriorityClass::Critical))
            .await
            .unwrap();

        // The critical queue is at capacity; admitting one more makes room
        // by dropping the oldest message from the lowest class.
        let displaced = queues
            .admit(message("crit-3", PriorityClass::Critical))
            .await
            .unwrap();
        assert_eq!(displaced.0.len(), 1);
        let victim = &displaced.0[0];
        assert_eq!(victim.id, "old-low");
        assert_eq!(victim.status, MessageStatus::Dropped);
        assert!(victim.error_history[0].contains(PREEMPTION_CAUSE));
        assert!(!queues.active_contains("old-low").await);
        assert_eq!(queues.depth(PriorityClass::Low), 1);
        assert_eq!(queues.depth(PriorityClass::Critical), 3);
    }
}
