use std::collections::BTreeMap;
use std::time::{Duration, SystemTime};

use serde::{Deserialize, Serialize};

use crate::context::QueryContext;
use crate::error::StorageError;
use crate::trace::{Span, Trace, TraceId};

/// Search parameters for `find_traces` / `find_trace_ids`.
#[derive(Debug, Clone, PartialEq)]
pub struct TraceQueryParameters {
    pub service_name: String,
    pub operation_name: String,
    pub tags: BTreeMap<String, String>,
    pub start_time_min: SystemTime,
    pub start_time_max: SystemTime,
    pub duration_min: Option<Duration>,
    pub duration_max: Option<Duration>,
    /// Zero means "use the configured default".
    pub num_traces: usize,
}

impl TraceQueryParameters {
    pub fn new(start_time_min: SystemTime, start_time_max: SystemTime) -> Self {
        Self {
            service_name: String::new(),
            operation_name: String::new(),
            tags: BTreeMap::new(),
            start_time_min,
            start_time_max,
            duration_min: None,
            duration_max: None,
            num_traces: 0,
        }
    }

    pub fn validate(&self) -> Result<(), StorageError> {
        if self.start_time_min > self.start_time_max {
            return Err(StorageError::InvalidInput(
                "start_time_min is after start_time_max".to_string(),
            ));
        }
        if let (Some(min), Some(max)) = (self.duration_min, self.duration_max) {
            if min > max {
                return Err(StorageError::InvalidInput(
                    "duration_min is greater than duration_max".to_string(),
                ));
            }
        }
        Ok(())
    }
}

/// Edge of the service dependency graph.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct DependencyLink {
    pub parent: String,
    pub child: String,
    pub call_count: u64,
}

/// Read side of span storage.
pub trait SpanReader: Send + Sync {
    /// All spans of one trace.
    fn get_trace(&self, ctx: &QueryContext, trace_id: TraceId) -> Result<Trace, StorageError>;

    fn get_services(&self, ctx: &QueryContext) -> Result<Vec<String>, StorageError>;

    fn get_operations(
        &self,
        ctx: &QueryContext,
        service_name: &str,
    ) -> Result<Vec<String>, StorageError>;

    /// One trace per matching trace ID, in the order the IDs were found.
    fn find_traces(
        &self,
        ctx: &QueryContext,
        query: &TraceQueryParameters,
    ) -> Result<Vec<Trace>, StorageError>;

    fn find_trace_ids(
        &self,
        ctx: &QueryContext,
        query: &TraceQueryParameters,
    ) -> Result<Vec<TraceId>, StorageError>;
}

pub trait DependencyReader: Send + Sync {
    fn get_dependencies(
        &self,
        ctx: &QueryContext,
        end_time: SystemTime,
        lookback: Duration,
    ) -> Result<Vec<DependencyLink>, StorageError>;
}

/// Write side of span storage.
pub trait SpanWriter: Send + Sync {
    fn write_span(&self, ctx: &QueryContext, span: &Span) -> Result<(), StorageError>;
}
