//! # Poll Loop
//!
//! The [`Worker`] repeatedly long-polls the queue for a batch, hands the batch
//! to the [`Dispatcher`] and waits for it to finish before polling again. A
//! failed receive is logged and the loop continues; it never terminates the
//! worker. The loop only stops when its [`CancellationToken`] is cancelled.
//!
//! ```text
//! loop:
//!     if cancelled -> stop
//!     receive(max_batch_size, wait_seconds)
//!         error -> log, optional backoff, continue
//!         empty -> continue
//!         batch -> dispatch and wait for every message
//! ```

use crate::config::WorkerConfig;
use crate::dispatcher::{BatchReport, Dispatcher};
use crate::error::{QueueError, ValidationError};
use crate::handler::MessageHandler;
use crate::logger::{Logger, TracingLogger};
use crate::transport::QueueTransport;
use std::sync::Arc;
use tokio_util::sync::CancellationToken;
use tracing::Instrument;

#[cfg(test)]
#[path = "worker_tests.rs"]
mod tests;

/// Result of a single poll iteration
#[derive(Debug)]
pub enum PollOutcome {
    /// Shutdown was requested before or during the receive call
    Cancelled,
    /// The receive call failed; the error has already been logged
    ReceiveFailed(QueueError),
    /// The receive call returned no messages
    Empty,
    /// A batch was received and fully dispatched
    Dispatched(BatchReport),
}

/// Counters accumulated over the lifetime of [`Worker::run`]
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct WorkerStats {
    /// Receive calls that completed (successfully or not)
    pub iterations: u64,
    pub receive_errors: u64,
    pub empty_receives: u64,
    pub batches: u64,
    pub messages_received: u64,
    pub messages_deleted: u64,
    /// Generic handler failures, panics and aborted handlers
    pub handler_failures: u64,
}

impl WorkerStats {
    fn record(&mut self, outcome: &PollOutcome) {
        match outcome {
            PollOutcome::Cancelled => return,
            PollOutcome::ReceiveFailed(_) => self.receive_errors += 1,
            PollOutcome::Empty => self.empty_receives += 1,
            PollOutcome::Dispatched(report) => {
                self.batches += 1;
                self.messages_received += report.received as u64;
                self.messages_deleted += report.deleted as u64;
                self.handler_failures += (report.failed + report.aborted) as u64;
            }
        }
        self.iterations += 1;
    }
}

/// Long-polling queue consumer
pub struct Worker {
    config: WorkerConfig,
    transport: Arc<dyn QueueTransport>,
    logger: Arc<dyn Logger>,
    dispatcher: Dispatcher,
}

impl Worker {
    /// Create a worker logging through [`TracingLogger`].
    ///
    /// # Errors
    ///
    /// Returns a [`ValidationError`] when the configuration is outside the
    /// limits of the receive API.
    pub fn new(
        config: WorkerConfig,
        transport: Arc<dyn QueueTransport>,
        handler: Arc<dyn MessageHandler>,
    ) -> Result<Self, ValidationError> {
        config.validate()?;

        let logger: Arc<dyn Logger> = Arc::new(TracingLogger);
        let mut dispatcher = Dispatcher::new(
            config.queue_url.clone(),
            Arc::clone(&transport),
            handler,
            Arc::clone(&logger),
        )
        .with_logging_enabled(config.logging_enabled);
        if let Some(grace_period) = config.shutdown_grace_period() {
            dispatcher = dispatcher.with_shutdown_grace_period(grace_period);
        }

        Ok(Self {
            config,
            transport,
            logger,
            dispatcher,
        })
    }

    /// Replace the log sink used by the loop and the dispatcher
    pub fn with_logger(mut self, logger: Arc<dyn Logger>) -> Self {
        self.dispatcher = self.dispatcher.with_logger(Arc::clone(&logger));
        self.logger = logger;
        self
    }

    pub fn config(&self) -> &WorkerConfig {
        &self.config
    }

    /// Run one iteration: receive a batch and dispatch it.
    ///
    /// The receive call is abandoned when `shutdown` is cancelled. Messages
    /// it may have claimed become visible again after their visibility timeout.
    pub async fn poll_once(&self, shutdown: &CancellationToken) -> PollOutcome {
        if shutdown.is_cancelled() {
            return PollOutcome::Cancelled;
        }

        self.logger.debug("worker: Start Polling");

        let received = tokio::select! {
            biased;

            _ = shutdown.cancelled() => return PollOutcome::Cancelled,

            result = self.transport.receive_batch(
                &self.config.queue_url,
                self.config.max_batch_size,
                self.config.wait_seconds,
            ) => result,
        };

        match received {
            Err(e) => {
                self.logger.error(&e.to_string());
                PollOutcome::ReceiveFailed(e)
            }
            Ok(batch) if batch.is_empty() => PollOutcome::Empty,
            Ok(batch) => PollOutcome::Dispatched(self.dispatcher.dispatch(batch, shutdown).await),
        }
    }

    /// Poll until `shutdown` is cancelled.
    ///
    /// Returns once the current batch (if any) has been dispatched.
    pub async fn run(&self, shutdown: CancellationToken) -> WorkerStats {
        let span = tracing::info_span!("worker", queue = %self.config.queue_url.queue_name());
        self.run_loop(shutdown).instrument(span).await
    }

    async fn run_loop(&self, shutdown: CancellationToken) -> WorkerStats {
        let mut stats = WorkerStats::default();
        let mut consecutive_failures: u32 = 0;

        self.logger.info(&format!(
            "worker: polling {} (batch size {}, wait {}s)",
            self.config.queue_url, self.config.max_batch_size, self.config.wait_seconds
        ));

        loop {
            let outcome = self.poll_once(&shutdown).await;
            stats.record(&outcome);

            match outcome {
                PollOutcome::Cancelled => break,
                PollOutcome::ReceiveFailed(_) => {
                    consecutive_failures = consecutive_failures.saturating_add(1);
                    if let Some(policy) = &self.config.receive_backoff {
                        let delay = policy.calculate_delay(consecutive_failures - 1);
                        tokio::select! {
                            _ = shutdown.cancelled() => break,
                            _ = tokio::time::sleep(delay) => {}
                        }
                    }
                }
                PollOutcome::Empty | PollOutcome::Dispatched(_) => consecutive_failures = 0,
            }
        }

        self.logger.info("worker: stopped");
        stats
    }
}
