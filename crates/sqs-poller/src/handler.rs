//! User-supplied message handlers.

use crate::error::HandlerError;
use crate::message::ReceivedMessage;
use async_trait::async_trait;
use std::future::Future;
use tokio_util::sync::CancellationToken;

#[cfg(test)]
#[path = "handler_tests.rs"]
mod tests;

/// Processes one message.
///
/// Return `Ok(())` to acknowledge the message, [`HandlerError::InvalidEvent`]
/// to acknowledge a payload that can never be processed, or
/// [`HandlerError::Failed`] to leave it for redelivery.
///
/// `shutdown` is cancelled when the worker is asked to stop. Long-running
/// handlers may watch it to finish early. The worker waits for every handler
/// unless a shutdown grace period is configured, in which case handlers still
/// running when it elapses are aborted.
#[async_trait]
pub trait MessageHandler: Send + Sync {
    async fn handle_message(
        &self,
        message: &ReceivedMessage,
        shutdown: &CancellationToken,
    ) -> Result<(), HandlerError>;
}

/// Handler backed by an async closure, see [`handler_fn`]
pub struct HandlerFn<F> {
    f: F,
}

/// Build a [`MessageHandler`] from an async closure
///
/// ```rust
/// use sqs_poller::{handler_fn, HandlerError};
///
/// let handler = handler_fn(|message, _shutdown| async move {
///     match message.body_as_str() {
///         Ok(body) => {
///             println!("{body}");
///             Ok(())
///         }
///         Err(e) => Err(HandlerError::invalid_event("non-utf8", e.to_string())),
///     }
/// });
/// # let _ = handler;
/// ```
pub fn handler_fn<F, Fut>(f: F) -> HandlerFn<F>
where
    F: Fn(ReceivedMessage, CancellationToken) -> Fut + Send + Sync,
    Fut: Future<Output = Result<(), HandlerError>> + Send,
{
    HandlerFn { f }
}

#[async_trait]
impl<F, Fut> MessageHandler for HandlerFn<F>
where
    F: Fn(ReceivedMessage, CancellationToken) -> Fut + Send + Sync,
    Fut: Future<Output = Result<(), HandlerError>> + Send,
{
    async fn handle_message(
        &self,
        message: &ReceivedMessage,
        shutdown: &CancellationToken,
    ) -> Result<(), HandlerError> {
        (self.f)(message.clone(), shutdown.clone()).await
    }
}
