//! Logging capability used by the worker.
//!
//! The worker reports through a [`Logger`] rather than calling `tracing`
//! directly so that an embedding application can route worker output wherever
//! it wants. The default, [`TracingLogger`], forwards to `tracing` events and
//! picks up whatever spans are active at the call site.

/// Fire-and-forget log sink
pub trait Logger: Send + Sync {
    fn debug(&self, message: &str);
    fn info(&self, message: &str);
    fn error(&self, message: &str);
}

/// Forwards to `tracing` under the `sqs_poller` target
#[derive(Debug, Clone, Copy, Default)]
pub struct TracingLogger;

impl Logger for TracingLogger {
    fn debug(&self, message: &str) {
        tracing::debug!(target: "sqs_poller", "{}", message);
    }

    fn info(&self, message: &str) {
        tracing::info!(target: "sqs_poller", "{}", message);
    }

    fn error(&self, message: &str) {
        tracing::error!(target: "sqs_poller", "{}", message);
    }
}

/// Discards everything
#[derive(Debug, Clone, Copy, Default)]
pub struct NoopLogger;

impl Logger for NoopLogger {
    fn debug(&self, _message: &str) {}

    fn info(&self, _message: &str) {}

    fn error(&self, _message: &str) {}
}
