use std::sync::Arc;

use logspan_core::context::QueryContext;
use logspan_core::engine::{MessageProcessor, TenantId};
use logspan_core::error::StorageError;
use logspan_core::observer::{Observer, TracingObserver};
use logspan_core::storage::SpanWriter;
use logspan_core::trace::Span;
use parking_lot::Mutex;
use tracing::debug;

use crate::codec::SpanEncoder;

/// Idle encoders kept for reuse.
const MAX_POOLED_ENCODERS: usize = 64;

/// [`SpanWriter`] that encodes spans and hands the rows to a
/// [`MessageProcessor`].
pub struct LogsSpanWriter {
    processor: Arc<dyn MessageProcessor>,
    observer: Arc<dyn Observer>,
    tenant: TenantId,
    encoders: Mutex<Vec<SpanEncoder>>,
}

impl LogsSpanWriter {
    pub fn new(processor: Arc<dyn MessageProcessor>, tenant: TenantId) -> Self {
        Self {
            processor,
            observer: Arc::new(TracingObserver),
            tenant,
            encoders: Mutex::new(Vec::new()),
        }
    }

    pub fn with_observer(mut self, observer: Arc<dyn Observer>) -> Self {
        self.observer = observer;
        self
    }

    fn acquire_encoder(&self) -> SpanEncoder {
        self.encoders.lock().pop().unwrap_or_default()
    }

    fn release_encoder(&self, encoder: SpanEncoder) {
        let mut encoders = self.encoders.lock();
        if encoders.len() < MAX_POOLED_ENCODERS {
            encoders.push(encoder);
        }
    }
}

impl SpanWriter for LogsSpanWriter {
    fn write_span(&self, ctx: &QueryContext, span: &Span) -> Result<(), StorageError> {
        ctx.check()?;
        let mut encoder = self.acquire_encoder();
        let encoded = encoder.encode(span);
        self.release_encoder(encoder);
        let encoded = encoded?;

        self.processor.add_row(
            self.tenant,
            encoded.timestamp,
            &encoded.fields,
            &encoded.stream_fields,
        );
        debug!(trace_id = %span.trace_id, span_id = %span.span_id, "span written");
        self.observer.span_written(encoded.fields.len());
        Ok(())
    }
}
