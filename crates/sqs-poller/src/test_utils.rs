//! Test doubles shared by the unit tests of this crate.

use crate::error::QueueError;
use crate::logger::Logger;
use crate::message::{MessageId, QueueUrl, ReceiptHandle, ReceivedMessage};
use crate::transport::QueueTransport;
use async_trait::async_trait;
use bytes::Bytes;
use std::collections::{HashSet, VecDeque};
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Mutex;

pub fn queue_url() -> QueueUrl {
    QueueUrl::new("https://sqs.us-east-1.amazonaws.com/123456789012/test-queue").unwrap()
}

/// Message whose body and receipt handle are both derived from `body`
pub fn message(body: &str) -> ReceivedMessage {
    ReceivedMessage::new(
        MessageId::new(),
        ReceiptHandle::new(format!("receipt-{}", body)).unwrap(),
        Bytes::from(body.to_string()),
    )
}

// ============================================================================
// Recording Logger
// ============================================================================

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Level {
    Debug,
    Info,
    Error,
}

#[derive(Default)]
pub struct RecordingLogger {
    entries: Mutex<Vec<(Level, String)>>,
}

impl RecordingLogger {
    pub fn entries(&self, level: Level) -> Vec<String> {
        self.entries
            .lock()
            .unwrap()
            .iter()
            .filter(|(l, _)| *l == level)
            .map(|(_, m)| m.clone())
            .collect()
    }

    pub fn count(&self, level: Level) -> usize {
        self.entries(level).len()
    }

    fn push(&self, level: Level, message: &str) {
        self.entries
            .lock()
            .unwrap()
            .push((level, message.to_string()));
    }
}

impl Logger for RecordingLogger {
    fn debug(&self, message: &str) {
        self.push(Level::Debug, message);
    }

    fn info(&self, message: &str) {
        self.push(Level::Info, message);
    }

    fn error(&self, message: &str) {
        self.push(Level::Error, message);
    }
}

// ============================================================================
// Scripted Transport
// ============================================================================

/// Transport that replays scripted receive results and records deletes.
///
/// Once the script runs out every receive returns an empty batch.
#[derive(Default)]
pub struct ScriptedTransport {
    receives: Mutex<VecDeque<Result<Vec<ReceivedMessage>, QueueError>>>,
    receive_calls: AtomicUsize,
    receive_requests: Mutex<Vec<(u32, u32)>>,
    deleted: Mutex<Vec<String>>,
    failing_deletes: Mutex<HashSet<String>>,
}

impl ScriptedTransport {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn push_batch(&self, batch: Vec<ReceivedMessage>) {
        self.receives.lock().unwrap().push_back(Ok(batch));
    }

    pub fn push_error(&self, error: QueueError) {
        self.receives.lock().unwrap().push_back(Err(error));
    }

    /// Make deletes for this receipt handle fail
    pub fn fail_delete_for(&self, receipt: &str) {
        self.failing_deletes
            .lock()
            .unwrap()
            .insert(receipt.to_string());
    }

    pub fn receive_calls(&self) -> usize {
        self.receive_calls.load(Ordering::SeqCst)
    }

    /// `(max_messages, wait_seconds)` of every receive call
    pub fn receive_requests(&self) -> Vec<(u32, u32)> {
        self.receive_requests.lock().unwrap().clone()
    }

    /// Receipt handles of every delete call, including failed ones
    pub fn deleted(&self) -> Vec<String> {
        self.deleted.lock().unwrap().clone()
    }
}

#[async_trait]
impl QueueTransport for ScriptedTransport {
    async fn receive_batch(
        &self,
        _queue: &QueueUrl,
        max_messages: u32,
        wait_seconds: u32,
    ) -> Result<Vec<ReceivedMessage>, QueueError> {
        self.receive_calls.fetch_add(1, Ordering::SeqCst);
        self.receive_requests
            .lock()
            .unwrap()
            .push((max_messages, wait_seconds));

        let next = self.receives.lock().unwrap().pop_front();
        match next {
            Some(result) => result,
            None => {
                tokio::task::yield_now().await;
                Ok(Vec::new())
            }
        }
    }

    async fn delete_message(
        &self,
        _queue: &QueueUrl,
        receipt: &ReceiptHandle,
    ) -> Result<(), QueueError> {
        self.deleted
            .lock()
            .unwrap()
            .push(receipt.as_str().to_string());

        if self.failing_deletes.lock().unwrap().contains(receipt.as_str()) {
            return Err(QueueError::ConnectionFailed {
                message: "connection reset by peer".to_string(),
            });
        }
        Ok(())
    }
}
