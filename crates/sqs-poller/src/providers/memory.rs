//! In-memory queue transport for testing and development.
//!
//! Behaves like a standard SQS queue within one process:
//! - receive long-polls until a message arrives or the wait runs out
//! - received messages stay invisible for the visibility timeout and are
//!   redelivered with an incremented receive count unless deleted
//! - each delivery gets a fresh receipt handle; handles from earlier
//!   deliveries are rejected
//!
//! Queues are created on first use. All timing uses `tokio::time`, so tests
//! can drive visibility timeouts with a paused clock.

use crate::config::{MAX_BATCH_SIZE, MAX_WAIT_SECONDS};
use crate::error::QueueError;
use crate::message::{
    MessageId, QueueUrl, ReceiptHandle, ReceivedMessage, ATTR_APPROXIMATE_RECEIVE_COUNT,
};
use crate::transport::QueueTransport;
use async_trait::async_trait;
use bytes::Bytes;
use std::collections::{HashMap, VecDeque};
use std::sync::{Mutex, MutexGuard};
use std::time::Duration;
use tokio::sync::Notify;
use tokio::time::Instant;

#[cfg(test)]
#[path = "memory_tests.rs"]
mod tests;

/// System attribute carrying the send time in epoch milliseconds
pub const ATTR_SENT_TIMESTAMP: &str = "SentTimestamp";

/// Configuration for [`InMemoryTransport`]
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct InMemoryConfig {
    /// How long a received message stays hidden before it is redelivered
    pub visibility_timeout: Duration,
}

impl Default for InMemoryConfig {
    fn default() -> Self {
        Self {
            visibility_timeout: Duration::from_secs(30),
        }
    }
}

// ============================================================================
// Internal Storage Structures
// ============================================================================

/// A message stored in the queue with its delivery metadata
#[derive(Clone)]
struct StoredMessage {
    message_id: MessageId,
    body: Bytes,
    message_attributes: HashMap<String, String>,
    sent_timestamp_millis: i64,
    receive_count: u32,
}

/// A delivered message waiting for deletion or its visibility timeout
struct InFlightMessage {
    message: StoredMessage,
    visible_at: Instant,
}

#[derive(Default)]
struct QueueState {
    visible: VecDeque<StoredMessage>,
    /// Keyed by the receipt handle of the current delivery
    in_flight: HashMap<String, InFlightMessage>,
}

impl QueueState {
    /// Move messages whose visibility timeout has passed back to the queue
    fn requeue_expired(&mut self, now: Instant) {
        let expired: Vec<String> = self
            .in_flight
            .iter()
            .filter(|(_, m)| m.visible_at <= now)
            .map(|(receipt, _)| receipt.clone())
            .collect();

        for receipt in expired {
            if let Some(in_flight) = self.in_flight.remove(&receipt) {
                self.visible.push_back(in_flight.message);
            }
        }
    }

    fn next_visibility_expiry(&self) -> Option<Instant> {
        self.in_flight.values().map(|m| m.visible_at).min()
    }
}

// ============================================================================
// InMemoryTransport
// ============================================================================

/// In-process queue transport
pub struct InMemoryTransport {
    queues: Mutex<HashMap<String, QueueState>>,
    arrivals: Notify,
    config: InMemoryConfig,
}

impl InMemoryTransport {
    pub fn new(config: InMemoryConfig) -> Self {
        Self {
            queues: Mutex::new(HashMap::new()),
            arrivals: Notify::new(),
            config,
        }
    }

    /// Enqueue a message and wake pending receives
    pub fn send(&self, queue: &QueueUrl, body: impl Into<Bytes>) -> MessageId {
        self.send_with_attributes(queue, body, HashMap::new())
    }

    /// Enqueue a message carrying sender-defined attributes
    pub fn send_with_attributes(
        &self,
        queue: &QueueUrl,
        body: impl Into<Bytes>,
        message_attributes: HashMap<String, String>,
    ) -> MessageId {
        let message_id = MessageId::new();
        let stored = StoredMessage {
            message_id: message_id.clone(),
            body: body.into(),
            message_attributes,
            sent_timestamp_millis: chrono::Utc::now().timestamp_millis(),
            receive_count: 0,
        };

        self.lock()
            .entry(queue.as_str().to_string())
            .or_default()
            .visible
            .push_back(stored);
        self.arrivals.notify_waiters();

        message_id
    }

    /// Messages currently available for receiving
    pub fn visible_count(&self, queue: &QueueUrl) -> usize {
        self.with_queue(queue, |state| state.visible.len())
    }

    /// Messages received but neither deleted nor past their visibility timeout
    pub fn in_flight_count(&self, queue: &QueueUrl) -> usize {
        self.with_queue(queue, |state| state.in_flight.len())
    }

    fn with_queue<T>(&self, queue: &QueueUrl, f: impl FnOnce(&mut QueueState) -> T) -> T {
        let mut queues = self.lock();
        let state = queues.entry(queue.as_str().to_string()).or_default();
        state.requeue_expired(Instant::now());
        f(state)
    }

    fn lock(&self) -> MutexGuard<'_, HashMap<String, QueueState>> {
        // State stays consistent even if a holder panicked mid-operation
        self.queues.lock().unwrap_or_else(|e| e.into_inner())
    }

    /// Deliver up to `max` visible messages, together with the instant the
    /// next in-flight message becomes visible again
    fn take_visible(&self, queue: &QueueUrl, max: usize) -> (Vec<ReceivedMessage>, Option<Instant>) {
        let visibility_timeout = self.config.visibility_timeout;
        self.with_queue(queue, |state| {
            let now = Instant::now();
            let mut batch = Vec::new();

            while batch.len() < max {
                let mut message = match state.visible.pop_front() {
                    Some(message) => message,
                    None => break,
                };
                message.receive_count += 1;

                let receipt = ReceiptHandle::generate();
                batch.push(deliver(&message, receipt.clone()));
                state.in_flight.insert(
                    receipt.as_str().to_string(),
                    InFlightMessage {
                        message,
                        visible_at: now + visibility_timeout,
                    },
                );
            }

            (batch, state.next_visibility_expiry())
        })
    }
}

impl Default for InMemoryTransport {
    fn default() -> Self {
        Self::new(InMemoryConfig::default())
    }
}

fn deliver(message: &StoredMessage, receipt: ReceiptHandle) -> ReceivedMessage {
    let attributes = HashMap::from([
        (
            ATTR_APPROXIMATE_RECEIVE_COUNT.to_string(),
            message.receive_count.to_string(),
        ),
        (
            ATTR_SENT_TIMESTAMP.to_string(),
            message.sent_timestamp_millis.to_string(),
        ),
    ]);

    ReceivedMessage::new(message.message_id.clone(), receipt, message.body.clone())
        .with_attributes(attributes)
        .with_message_attributes(message.message_attributes.clone())
}

#[async_trait]
impl QueueTransport for InMemoryTransport {
    async fn receive_batch(
        &self,
        queue: &QueueUrl,
        max_messages: u32,
        wait_seconds: u32,
    ) -> Result<Vec<ReceivedMessage>, QueueError> {
        let max = max_messages.clamp(1, MAX_BATCH_SIZE) as usize;
        let wait = Duration::from_secs(u64::from(wait_seconds.min(MAX_WAIT_SECONDS)));
        let deadline = Instant::now() + wait;

        loop {
            // Register for wake-ups before looking so a send in between is not missed
            let notified = self.arrivals.notified();
            tokio::pin!(notified);
            notified.as_mut().enable();

            let (batch, next_expiry) = self.take_visible(queue, max);
            if !batch.is_empty() || Instant::now() >= deadline {
                return Ok(batch);
            }

            let wake_at = next_expiry.map_or(deadline, |expiry| expiry.min(deadline));
            tokio::select! {
                _ = &mut notified => {}
                _ = tokio::time::sleep_until(wake_at) => {}
            }
        }
    }

    async fn delete_message(
        &self,
        queue: &QueueUrl,
        receipt: &ReceiptHandle,
    ) -> Result<(), QueueError> {
        self.with_queue(queue, |state| {
            state
                .in_flight
                .remove(receipt.as_str())
                .map(|_| ())
                .ok_or_else(|| QueueError::ReceiptInvalid {
                    receipt: receipt.as_str().to_string(),
                })
        })
    }
}
