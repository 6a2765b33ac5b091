//! Transport interface between the worker and the remote queue service.

use crate::error::QueueError;
use crate::message::{QueueUrl, ReceiptHandle, ReceivedMessage};
use async_trait::async_trait;

/// Receive and delete operations against a queue service.
///
/// Implementations must be safe for concurrent use: one transport is shared by
/// the poll loop and by every in-flight message of a batch.
#[async_trait]
pub trait QueueTransport: Send + Sync {
    /// Receive up to `max_messages` messages, waiting up to `wait_seconds` for
    /// at least one to become available. An empty vector means the wait elapsed.
    async fn receive_batch(
        &self,
        queue: &QueueUrl,
        max_messages: u32,
        wait_seconds: u32,
    ) -> Result<Vec<ReceivedMessage>, QueueError>;

    /// Delete (acknowledge) one delivery of a message
    async fn delete_message(
        &self,
        queue: &QueueUrl,
        receipt: &ReceiptHandle,
    ) -> Result<(), QueueError>;
}
