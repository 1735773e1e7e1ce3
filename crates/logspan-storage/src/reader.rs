use std::collections::HashMap;
use std::sync::Arc;
use std::time::{Duration, Instant, SystemTime};

use logspan_core::context::QueryContext;
use logspan_core::engine::{LogEngine, LogsQuery, TenantId, TimeRange};
use logspan_core::error::StorageError;
use logspan_core::field::Row;
use logspan_core::observer::{Observer, TracingObserver};
use logspan_core::storage::{DependencyLink, DependencyReader, SpanReader, TraceQueryParameters};
use logspan_core::trace::{Span, Trace, TraceId};
use serde::Deserialize;
use tracing::{debug, warn};

use crate::codec::{OPERATION_NAME, PROCESS_SERVICE_NAME, decode_span};
use crate::collector::RowCollector;
use crate::query::{service_query, trace_ids_query, trace_query, traces_query};
use crate::search::{SearchSettings, TraceIdSearch};

/// Upper bound on services or operations returned by one listing.
pub const MAX_DISTINCT_VALUES: u64 = 1_000;

#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
#[serde(default)]
pub struct ReaderConfig {
    pub tenant: TenantId,
    /// Capped at [`MAX_DISTINCT_VALUES`].
    pub max_distinct_values: u64,
    /// Used when a trace query asks for zero traces.
    pub default_num_traces: usize,
    pub search: SearchSettings,
}

impl Default for ReaderConfig {
    fn default() -> Self {
        Self {
            tenant: TenantId::default(),
            max_distinct_values: MAX_DISTINCT_VALUES,
            default_num_traces: 100,
            search: SearchSettings::default(),
        }
    }
}

impl ReaderConfig {
    fn distinct_values_limit(&self) -> u64 {
        self.max_distinct_values.min(MAX_DISTINCT_VALUES)
    }
}

/// [`SpanReader`] over a log engine.
pub struct LogsSpanReader {
    engine: Arc<dyn LogEngine>,
    observer: Arc<dyn Observer>,
    config: ReaderConfig,
}

impl LogsSpanReader {
    pub fn new(engine: Arc<dyn LogEngine>, config: ReaderConfig) -> Self {
        Self {
            engine,
            observer: Arc::new(TracingObserver),
            config,
        }
    }

    pub fn with_observer(mut self, observer: Arc<dyn Observer>) -> Self {
        self.observer = observer;
        self
    }

    pub fn config(&self) -> &ReaderConfig {
        &self.config
    }

    fn observed<T>(
        &self,
        operation: &'static str,
        run: impl FnOnce() -> Result<T, StorageError>,
    ) -> Result<T, StorageError> {
        let start = Instant::now();
        let result = run();
        if let Err(error) = &result {
            debug!(operation, %error, "request failed");
        }
        self.observer
            .request_finished(operation, start.elapsed(), result.is_ok());
        result
    }

    fn parse_query(text: &str) -> Result<LogsQuery, StorageError> {
        LogsQuery::parse(text).map_err(|e| StorageError::engine(text, e))
    }

    fn run_query(&self, ctx: &QueryContext, query: &LogsQuery) -> Result<Vec<Row>, StorageError> {
        ctx.check()?;
        let collector = RowCollector::new();
        self.engine
            .run_query(ctx, self.config.tenant, query, &|block_id, timestamps, columns| {
                collector.write_block(block_id, timestamps, columns)
            })
            .map_err(|e| StorageError::engine(query, e))?;
        let mut rows = collector.into_rows();
        rows.sort_by_key(|row| row.timestamp);
        Ok(rows)
    }

    fn field_values(
        &self,
        ctx: &QueryContext,
        query: &LogsQuery,
        field_name: &str,
    ) -> Result<Vec<String>, StorageError> {
        ctx.check()?;
        let limit = self.config.distinct_values_limit();
        let mut values = self
            .engine
            .field_values(ctx, self.config.tenant, query, field_name, limit)
            .map_err(|e| StorageError::engine(query, e))?;
        values.truncate(limit as usize);
        values.sort();
        Ok(values)
    }

    /// Decode every row, dropping the ones that are not valid spans.
    fn decode_rows(&self, operation: &'static str, rows: &[Row]) -> Vec<Span> {
        rows.iter()
            .filter_map(|row| match decode_span(&row.fields) {
                Ok(span) => Some(span),
                Err(error) => {
                    warn!(operation, timestamp = row.timestamp, %error, "skipping undecodable row");
                    self.observer.row_skipped(operation);
                    None
                }
            })
            .collect()
    }

    fn search_trace_ids(
        &self,
        ctx: &QueryContext,
        params: &TraceQueryParameters,
    ) -> Result<Vec<TraceId>, StorageError> {
        params.validate()?;
        let limit = match params.num_traces {
            0 => self.config.default_num_traces,
            n => n,
        };
        let query = Self::parse_query(&trace_ids_query(params))?;
        let range = TimeRange::between(params.start_time_min, params.start_time_max);
        let search = TraceIdSearch::new(
            self.engine.as_ref(),
            self.observer.as_ref(),
            self.config.tenant,
            self.config.search,
        );
        search
            .run(ctx, &query, range, limit)?
            .iter()
            .map(|trace_id| trace_id.parse())
            .collect()
    }
}

impl SpanReader for LogsSpanReader {
    fn get_trace(&self, ctx: &QueryContext, trace_id: TraceId) -> Result<Trace, StorageError> {
        self.observed("get_trace", || {
            debug!(trace_id = %trace_id, "`get_trace` request");
            let query = Self::parse_query(&trace_query(trace_id))?;
            let rows = self.run_query(ctx, &query)?;
            let spans = self.decode_rows("get_trace", &rows);
            debug!(trace_id = %trace_id, num_spans = spans.len(), "`get_trace` response");
            Ok(Trace { spans })
        })
    }

    fn get_services(&self, ctx: &QueryContext) -> Result<Vec<String>, StorageError> {
        self.observed("get_services", || {
            let query = Self::parse_query("*")?.with_time_range(TimeRange::full());
            let services = self.field_values(ctx, &query, PROCESS_SERVICE_NAME)?;
            debug!(num_services = services.len(), "`get_services` response");
            Ok(services)
        })
    }

    fn get_operations(
        &self,
        ctx: &QueryContext,
        service_name: &str,
    ) -> Result<Vec<String>, StorageError> {
        self.observed("get_operations", || {
            if service_name.is_empty() {
                return Err(StorageError::InvalidInput(
                    "service name is required".to_string(),
                ));
            }
            let query =
                Self::parse_query(&service_query(service_name))?.with_time_range(TimeRange::full());
            let operations = self.field_values(ctx, &query, OPERATION_NAME)?;
            debug!(service_name, num_operations = operations.len(), "`get_operations` response");
            Ok(operations)
        })
    }

    fn find_traces(
        &self,
        ctx: &QueryContext,
        params: &TraceQueryParameters,
    ) -> Result<Vec<Trace>, StorageError> {
        self.observed("find_traces", || {
            debug!(params = ?params, "`find_traces` request");
            let trace_ids = self.search_trace_ids(ctx, params)?;
            if trace_ids.is_empty() {
                return Ok(Vec::new());
            }

            let query = Self::parse_query(&traces_query(&trace_ids))?.with_time_range(
                TimeRange::between(params.start_time_min, params.start_time_max),
            );
            let rows = self.run_query(ctx, &query)?;

            let positions: HashMap<TraceId, usize> = trace_ids
                .iter()
                .enumerate()
                .map(|(position, trace_id)| (*trace_id, position))
                .collect();
            let mut traces = vec![Trace::default(); trace_ids.len()];
            for span in self.decode_rows("find_traces", &rows) {
                match positions.get(&span.trace_id) {
                    Some(&position) => traces[position].spans.push(span),
                    None => debug!(trace_id = %span.trace_id, "span of an unrequested trace"),
                }
            }
            debug!(num_traces = traces.len(), "`find_traces` response");
            Ok(traces)
        })
    }

    fn find_trace_ids(
        &self,
        ctx: &QueryContext,
        params: &TraceQueryParameters,
    ) -> Result<Vec<TraceId>, StorageError> {
        self.observed("find_trace_ids", || {
            debug!(params = ?params, "`find_trace_ids` request");
            let trace_ids = self.search_trace_ids(ctx, params)?;
            debug!(num_trace_ids = trace_ids.len(), "`find_trace_ids` response");
            Ok(trace_ids)
        })
    }
}

/// Dependency links are not computed; always empty.
impl DependencyReader for LogsSpanReader {
    fn get_dependencies(
        &self,
        _ctx: &QueryContext,
        _end_time: SystemTime,
        _lookback: Duration,
    ) -> Result<Vec<DependencyLink>, StorageError> {
        Ok(Vec::new())
    }
}
