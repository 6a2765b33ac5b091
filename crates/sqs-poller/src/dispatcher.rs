//! # Batch Dispatcher
//!
//! Processes one received batch. Every message gets its own task on a
//! [`JoinSet`]; the dispatcher returns only after every task of the batch has
//! finished, whatever the individual outcomes.
//!
//! Per message:
//! 1. run the handler
//! 2. [`classify`] the result
//! 3. on [`Disposition::Acknowledge`], delete the message by receipt handle
//! 4. on [`Disposition::Redeliver`], log and leave the message on the queue
//!
//! A failed delete is logged and the message is not retried within the batch;
//! it becomes visible again once its visibility timeout expires.
//!
//! Tasks share nothing mutable. A handler that panics only takes down its own
//! task, and the message is treated like a generic failure.

use crate::error::HandlerError;
use crate::handler::MessageHandler;
use crate::logger::Logger;
use crate::message::{QueueUrl, ReceivedMessage};
use crate::transport::QueueTransport;
use std::sync::Arc;
use std::time::Duration;
use tokio::task::{JoinError, JoinSet};
use tokio_util::sync::CancellationToken;
use tracing::Instrument;

#[cfg(test)]
#[path = "dispatcher_tests.rs"]
mod tests;

// ============================================================================
// Classification
// ============================================================================

/// What to do with a message after its handler returned
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Disposition {
    /// Delete the message so it is not delivered again
    Acknowledge,
    /// Leave the message for the queue's redelivery mechanism
    Redeliver,
}

/// Map a handler result onto a [`Disposition`].
///
/// Success and invalid events are acknowledged: retrying an invalid payload
/// cannot succeed. Every other failure is left for redelivery.
pub fn classify(result: &Result<(), HandlerError>) -> Disposition {
    match result {
        Ok(()) => Disposition::Acknowledge,
        Err(HandlerError::InvalidEvent(_)) => Disposition::Acknowledge,
        Err(HandlerError::Failed(_)) => Disposition::Redeliver,
    }
}

// ============================================================================
// Outcomes
// ============================================================================

/// Final state of one message after dispatch
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum MessageOutcome {
    /// Acknowledged and deleted
    Deleted { invalid_event: bool },
    /// Acknowledged but the delete call failed; the message will be redelivered
    DeleteFailed { invalid_event: bool },
    /// Handler failed; the message will be redelivered
    LeftForRedelivery,
}

/// Summary of one dispatched batch
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct BatchReport {
    /// Messages in the batch
    pub received: usize,
    /// Handler returned success
    pub succeeded: usize,
    /// Handler returned an invalid-event failure
    pub invalid_events: usize,
    /// Handler returned a generic failure or panicked
    pub failed: usize,
    /// Delete calls that succeeded
    pub deleted: usize,
    /// Delete calls that failed
    pub delete_failed: usize,
    /// Handlers still running when an explicit shutdown grace period ran out
    pub aborted: usize,
}

impl BatchReport {
    fn new(received: usize) -> Self {
        Self {
            received,
            ..Self::default()
        }
    }

    /// Handler invocations that ran to completion
    pub fn completed(&self) -> usize {
        self.succeeded + self.invalid_events + self.failed
    }

    fn record(&mut self, outcome: MessageOutcome) {
        match outcome {
            MessageOutcome::Deleted { invalid_event } => {
                self.count_acknowledged(invalid_event);
                self.deleted += 1;
            }
            MessageOutcome::DeleteFailed { invalid_event } => {
                self.count_acknowledged(invalid_event);
                self.delete_failed += 1;
            }
            MessageOutcome::LeftForRedelivery => self.failed += 1,
        }
    }

    fn count_acknowledged(&mut self, invalid_event: bool) {
        if invalid_event {
            self.invalid_events += 1;
        } else {
            self.succeeded += 1;
        }
    }
}

// ============================================================================
// Dispatcher
// ============================================================================

/// Runs a batch of messages through a handler concurrently
#[derive(Clone)]
pub struct Dispatcher {
    inner: Arc<DispatchContext>,
}

/// Everything a message task needs, shared read-only across the batch
#[derive(Clone)]
struct DispatchContext {
    queue_url: QueueUrl,
    transport: Arc<dyn QueueTransport>,
    handler: Arc<dyn MessageHandler>,
    logger: Arc<dyn Logger>,
    logging_enabled: bool,
    shutdown_grace_period: Option<Duration>,
}

impl Dispatcher {
    pub fn new(
        queue_url: QueueUrl,
        transport: Arc<dyn QueueTransport>,
        handler: Arc<dyn MessageHandler>,
        logger: Arc<dyn Logger>,
    ) -> Self {
        Self {
            inner: Arc::new(DispatchContext {
                queue_url,
                transport,
                handler,
                logger,
                logging_enabled: true,
                shutdown_grace_period: None,
            }),
        }
    }

    /// Log handler and delete failures (invalid events are always logged)
    pub fn with_logging_enabled(self, logging_enabled: bool) -> Self {
        self.rebuild(|ctx| ctx.logging_enabled = logging_enabled)
    }

    pub fn with_logger(self, logger: Arc<dyn Logger>) -> Self {
        self.rebuild(|ctx| ctx.logger = logger)
    }

    /// Abort handlers still running `grace_period` after shutdown is
    /// requested. Without it the dispatcher waits for every handler.
    pub fn with_shutdown_grace_period(self, grace_period: Duration) -> Self {
        self.rebuild(|ctx| ctx.shutdown_grace_period = Some(grace_period))
    }

    fn rebuild(self, apply: impl FnOnce(&mut DispatchContext)) -> Self {
        let mut next = DispatchContext::clone(&self.inner);
        apply(&mut next);
        Self {
            inner: Arc::new(next),
        }
    }

    /// Process every message of `batch` concurrently and wait for all of them.
    ///
    /// Cancelling `shutdown` does not interrupt handlers: they see the token
    /// and the batch still waits for all of them. Only with an explicit grace
    /// period are handlers still running after it aborted, leaving their
    /// messages on the queue.
    pub async fn dispatch(
        &self,
        batch: Vec<ReceivedMessage>,
        shutdown: &CancellationToken,
    ) -> BatchReport {
        let mut report = BatchReport::new(batch.len());
        if batch.is_empty() {
            return report;
        }

        let span = tracing::info_span!("batch", size = batch.len());
        self.inner
            .logger
            .info(&format!("worker: Received {} messages", batch.len()));

        let mut tasks = JoinSet::new();
        for message in batch {
            let ctx = Arc::clone(&self.inner);
            let token = shutdown.clone();
            tasks.spawn(
                async move { ctx.process_message(message, token).await }.instrument(span.clone()),
            );
        }

        self.wait_for_batch(&mut tasks, shutdown, &mut report)
            .instrument(span)
            .await;

        report
    }

    async fn wait_for_batch(
        &self,
        tasks: &mut JoinSet<MessageOutcome>,
        shutdown: &CancellationToken,
        report: &mut BatchReport,
    ) {
        loop {
            tokio::select! {
                biased;

                joined = tasks.join_next() => match joined {
                    Some(result) => self.record(report, result),
                    None => return,
                },

                _ = shutdown.cancelled() => break,
            }
        }

        let grace_period = match self.inner.shutdown_grace_period {
            Some(grace_period) => grace_period,
            None => {
                self.inner.logger.info(&format!(
                    "worker: shutdown requested, waiting for {} in-flight messages",
                    tasks.len()
                ));
                while let Some(result) = tasks.join_next().await {
                    self.record(report, result);
                }
                return;
            }
        };
        self.inner.logger.info(&format!(
            "worker: shutdown requested, waiting up to {}s for {} in-flight messages",
            grace_period.as_secs(),
            tasks.len()
        ));

        let deadline = tokio::time::Instant::now() + grace_period;
        loop {
            match tokio::time::timeout_at(deadline, tasks.join_next()).await {
                Ok(Some(result)) => self.record(report, result),
                Ok(None) => return,
                Err(_) => break,
            }
        }

        tasks.abort_all();
        while let Some(result) = tasks.join_next().await {
            self.record(report, result);
        }
    }

    fn record(&self, report: &mut BatchReport, result: Result<MessageOutcome, JoinError>) {
        match result {
            Ok(outcome) => report.record(outcome),
            Err(e) if e.is_cancelled() => {
                report.aborted += 1;
                self.inner.logger.error(
                    "worker: message handler aborted after shutdown grace period, message left for redelivery",
                );
            }
            Err(e) => {
                report.failed += 1;
                self.inner
                    .logger
                    .error(&format!("worker: message handler panicked: {}", e));
            }
        }
    }
}

impl DispatchContext {
    async fn process_message(
        &self,
        message: ReceivedMessage,
        shutdown: CancellationToken,
    ) -> MessageOutcome {
        let result = self.handler.handle_message(&message, &shutdown).await;

        let invalid_event = match classify(&result) {
            Disposition::Redeliver => {
                if let Err(e) = &result {
                    if self.logging_enabled {
                        self.logger.error(&e.to_string());
                    }
                }
                return MessageOutcome::LeftForRedelivery;
            }
            Disposition::Acknowledge => match &result {
                Err(e) => {
                    self.logger.error(&e.to_string());
                    true
                }
                Ok(()) => false,
            },
        };

        let receipt = message.receipt_handle();
        match self.transport.delete_message(&self.queue_url, receipt).await {
            Ok(()) => {
                self.logger
                    .debug(&format!("worker: deleted message from queue: {}", receipt));
                MessageOutcome::Deleted { invalid_event }
            }
            Err(e) => {
                if self.logging_enabled {
                    self.logger.error(&format!(
                        "worker: failed to delete message {}: {}",
                        message.message_id(),
                        e
                    ));
                }
                MessageOutcome::DeleteFailed { invalid_event }
            }
        }
    }
}
