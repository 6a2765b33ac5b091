//! # SQS Poller
//!
//! Long-polling worker for SQS-style message queues.
//!
//! The worker repeatedly receives a batch of messages, runs a user-supplied
//! handler on every message of the batch concurrently, and deletes each
//! message whose handler succeeded. Handler failures are split in two:
//!
//! - an **invalid event** (the payload can never be processed) is logged and
//!   the message is deleted anyway
//! - any **other failure** leaves the message on the queue so the service
//!   redelivers it once its visibility timeout expires
//!
//! Delivery is at-least-once: handlers must tolerate seeing a message again.
//!
//! ## Module Organization
//!
//! - [`worker`] - the poll loop
//! - [`dispatcher`] - concurrent batch processing and acknowledgment
//! - [`handler`] - the [`MessageHandler`] trait and [`handler_fn`]
//! - [`transport`] - the [`QueueTransport`] trait
//! - [`providers`] - SQS and in-memory transports
//! - [`config`], [`error`], [`logger`], [`message`], [`retry`]
//!
//! ## Example
//!
//! ```no_run
//! use sqs_poller::providers::AwsSqsTransport;
//! use sqs_poller::{handler_fn, AwsSqsConfig, AwsCredentials, Worker, WorkerConfig};
//! use std::sync::Arc;
//! use tokio_util::sync::CancellationToken;
//!
//! # async fn example() -> Result<(), Box<dyn std::error::Error>> {
//! let transport = Arc::new(AwsSqsTransport::new(
//!     AwsSqsConfig::new("us-east-1").with_credentials(AwsCredentials::from_env()?),
//! )?);
//! let queue_url = transport.resolve_queue_url("orders").await?;
//!
//! let handler = handler_fn(|message, _shutdown| async move {
//!     println!("{}", String::from_utf8_lossy(message.body()));
//!     Ok(())
//! });
//!
//! let worker = Worker::new(WorkerConfig::new(queue_url), transport, Arc::new(handler))?;
//! worker.run(CancellationToken::new()).await;
//! # Ok(())
//! # }
//! ```

pub mod config;
pub mod dispatcher;
pub mod error;
pub mod handler;
pub mod logger;
pub mod message;
pub mod providers;
pub mod retry;
pub mod transport;
pub mod worker;

#[cfg(test)]
pub(crate) mod test_utils;

// Re-export commonly used types at crate root for convenience
pub use config::{AwsCredentials, AwsSqsConfig, WorkerConfig, MAX_BATCH_SIZE, MAX_WAIT_SECONDS};
pub use dispatcher::{classify, BatchReport, Dispatcher, Disposition};
pub use error::{ConfigurationError, HandlerError, InvalidEventError, QueueError, ValidationError};
pub use handler::{handler_fn, HandlerFn, MessageHandler};
pub use logger::{Logger, NoopLogger, TracingLogger};
pub use message::{
    MessageId, QueueUrl, ReceiptHandle, ReceivedMessage, ATTR_APPROXIMATE_RECEIVE_COUNT,
};
pub use retry::RetryPolicy;
pub use transport::QueueTransport;
pub use worker::{PollOutcome, Worker, WorkerStats};

#[cfg(test)]
#[path = "lib_tests.rs"]
mod tests;
