use std::time::Duration;

use tracing::debug;

/// Observability hooks injected into the reader and writer.
pub trait Observer: Send + Sync {
    fn request_finished(&self, operation: &'static str, elapsed: Duration, ok: bool);

    /// A row could not be decoded and was dropped from the response.
    fn row_skipped(&self, operation: &'static str);

    fn span_written(&self, field_count: usize);

    /// One widening step of the trace-ID search finished.
    fn search_iteration(&self, window: Duration, found: usize);
}

/// Reports every hook as a `tracing` event.
#[derive(Debug, Clone, Copy, Default)]
pub struct TracingObserver;

impl Observer for TracingObserver {
    fn request_finished(&self, operation: &'static str, elapsed: Duration, ok: bool) {
        debug!(operation, elapsed_ms = elapsed.as_millis() as u64, ok, "request finished");
    }

    fn row_skipped(&self, operation: &'static str) {
        debug!(operation, "row skipped");
    }

    fn span_written(&self, field_count: usize) {
        debug!(field_count, "span written");
    }

    fn search_iteration(&self, window: Duration, found: usize) {
        debug!(window_secs = window.as_secs(), found, "trace id search iteration");
    }
}
