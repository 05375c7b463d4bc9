use std::sync::Arc;

/// Sink for save-path diagnostics, passed to every save call.
pub trait RunLogger: Send + Sync {
    fn info(&self, message: &str);
    fn warn(&self, message: &str);
    fn error(&self, message: &str);
}

/// Forwards messages to `tracing` events under the `doctrack` target.
#[derive(Debug, Clone, Copy, Default)]
pub struct TracingRunLogger;

impl RunLogger for TracingRunLogger {
    fn info(&self, message: &str) {
        tracing::info!(target: "doctrack", "{message}");
    }

    fn warn(&self, message: &str) {
        tracing::warn!(target: "doctrack", "{message}");
    }

    fn error(&self, message: &str) {
        tracing::error!(target: "doctrack", "{message}");
    }
}

#[derive(Debug, Clone, Copy, Default)]
pub struct NoopRunLogger;

impl RunLogger for NoopRunLogger {
    fn info(&self, _message: &str) {}

    fn warn(&self, _message: &str) {}

    fn error(&self, _message: &str) {}
}

impl<L: RunLogger + ?Sized> RunLogger for Arc<L> {
    fn info(&self, message: &str) {
        (**self).info(message);
    }

    fn warn(&self, message: &str) {
        (**self).warn(message);
    }

    fn error(&self, message: &str) {
        (**self).error(message);
    }
}
