use logspan_core::storage::TraceQueryParameters;
use logspan_core::time::duration_nanos;
use logspan_core::trace::TraceId;
use tracing::debug;

use crate::codec::{DURATION, OPERATION_NAME, PROCESS_SERVICE_NAME, TAG_PREFIX, TRACE_ID};

/// Keeps the newest row of every trace, projects it to `_time, trace_id`
/// and sorts newest first.
const TRACE_ID_PIPES: &str =
    " | last 1 by (_time) partition by (trace_id) | fields _time, trace_id | sort by (_time) desc";

/// Build the trace-ID search query for `params`. The time bounds and the
/// result limit are attached by the caller.
pub fn trace_ids_query(params: &TraceQueryParameters) -> String {
    let mut query = String::new();
    if !params.service_name.is_empty() {
        query.push_str(&format!(
            "AND _stream:{{{PROCESS_SERVICE_NAME}={}}} ",
            quote(&params.service_name)
        ));
    }
    if !params.operation_name.is_empty() {
        query.push_str(&format!(
            "AND _stream:{{{OPERATION_NAME}={}}} ",
            quote(&params.operation_name)
        ));
    }
    for (key, value) in &params.tags {
        query.push_str(&format!("AND {TAG_PREFIX}{key}:={} ", quote(value)));
    }
    if let Some(min) = params.duration_min.filter(|d| !d.is_zero()) {
        query.push_str(&format!("AND {DURATION}:>{} ", duration_nanos(min)));
    }
    if let Some(max) = params.duration_max.filter(|d| !d.is_zero()) {
        query.push_str(&format!("AND {DURATION}:<{} ", duration_nanos(max)));
    }

    let filter = query.trim_start_matches("AND ").trim_end();
    let query = if filter.is_empty() {
        format!("*{TRACE_ID_PIPES}")
    } else {
        format!("{filter}{TRACE_ID_PIPES}")
    };
    debug!(query = %query, "trace id query");
    query
}

/// All rows of one trace.
pub fn trace_query(trace_id: TraceId) -> String {
    format!("{TRACE_ID}:{trace_id}")
}

/// All rows belonging to any of `trace_ids`.
pub fn traces_query(trace_ids: &[TraceId]) -> String {
    let ids: Vec<String> = trace_ids.iter().map(TraceId::to_string).collect();
    format!("{TRACE_ID}:in({})", ids.join(","))
}

/// Rows of one service, for listing its operations.
pub fn service_query(service_name: &str) -> String {
    format!("_stream:{{{PROCESS_SERVICE_NAME}={}}}", quote(service_name))
}

/// Double-quote `value`, escaping backslashes and quotes.
pub fn quote(value: &str) -> String {
    let mut quoted = String::with_capacity(value.len() + 2);
    quoted.push('"');
    for c in value.chars() {
        if c == '"' || c == '\\' {
            quoted.push('\\');
        }
        quoted.push(c);
    }
    quoted.push('"');
    quoted
}
