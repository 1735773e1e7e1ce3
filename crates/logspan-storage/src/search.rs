//! Adaptive trace-ID search.
//!
//! Callers usually want the most recent traces but ask for far more time
//! than it takes to find them. The search starts with a narrow window at the
//! end of the requested range and widens it geometrically until it yields
//! `limit` trace IDs. If the widened window would reach the start of the
//! range, one last query covers the exact requested range.

use std::collections::HashSet;
use std::time::Duration;

use logspan_core::context::QueryContext;
use logspan_core::engine::{LogEngine, LogsQuery, TenantId, TimeRange};
use logspan_core::error::StorageError;
use logspan_core::observer::Observer;
use logspan_core::time::duration_nanos;
use serde::Deserialize;
use tracing::debug;

use crate::codec::TRACE_ID;
use crate::collector::RowCollector;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Deserialize)]
#[serde(default)]
pub struct SearchSettings {
    /// Width of the first window, and the first widening step.
    pub initial_step_secs: u64,
    /// Each step is this many times larger than the previous one.
    pub widen_factor: u32,
}

impl Default for SearchSettings {
    fn default() -> Self {
        Self {
            initial_step_secs: 60,
            widen_factor: 5,
        }
    }
}

impl SearchSettings {
    pub fn initial_step(&self) -> Duration {
        Duration::from_secs(self.initial_step_secs)
    }
}

/// The widening windows tried before falling back to the full range. All
/// windows end at `range.end`; each starts strictly after `range.start`.
#[derive(Debug, Clone)]
pub struct SearchWindows {
    range: TimeRange,
    step: i64,
    factor: i64,
    window_start: i64,
}

impl SearchWindows {
    pub fn new(range: TimeRange, settings: SearchSettings) -> Self {
        let step = i64::try_from(duration_nanos(settings.initial_step()))
            .unwrap_or(i64::MAX)
            .max(1);
        Self {
            range,
            step,
            factor: i64::from(settings.widen_factor.max(2)),
            window_start: range.end.saturating_sub(step),
        }
    }
}

impl Iterator for SearchWindows {
    type Item = TimeRange;

    fn next(&mut self) -> Option<TimeRange> {
        if self.window_start <= self.range.start {
            return None;
        }
        let window = TimeRange::new(self.window_start, self.range.end);
        self.step = self.step.saturating_mul(self.factor);
        self.window_start = self.window_start.saturating_sub(self.step);
        Some(window)
    }
}

pub struct TraceIdSearch<'a> {
    engine: &'a dyn LogEngine,
    observer: &'a dyn Observer,
    tenant: TenantId,
    settings: SearchSettings,
}

impl<'a> TraceIdSearch<'a> {
    pub fn new(
        engine: &'a dyn LogEngine,
        observer: &'a dyn Observer,
        tenant: TenantId,
        settings: SearchSettings,
    ) -> Self {
        Self {
            engine,
            observer,
            tenant,
            settings,
        }
    }

    /// Up to `limit` distinct trace IDs matching `query` within `range`,
    /// newest first. Windows run sequentially; `ctx` is checked before each.
    pub fn run(
        &self,
        ctx: &QueryContext,
        query: &LogsQuery,
        range: TimeRange,
        limit: usize,
    ) -> Result<Vec<String>, StorageError> {
        for window in SearchWindows::new(range, self.settings) {
            ctx.check()?;
            let mut trace_ids = self.trace_ids_in(ctx, query, window, limit)?;
            self.observer.search_iteration(
                Duration::from_nanos(window.end.abs_diff(window.start)),
                trace_ids.len(),
            );
            // `>=` rather than `==`: a window holding more IDs than asked for
            // already satisfies the request.
            if trace_ids.len() >= limit {
                trace_ids.truncate(limit);
                debug!(found = trace_ids.len(), window_start = window.start, "trace id search satisfied early");
                return Ok(trace_ids);
            }
        }

        ctx.check()?;
        self.trace_ids_in(ctx, query, range, limit)
    }

    fn trace_ids_in(
        &self,
        ctx: &QueryContext,
        query: &LogsQuery,
        window: TimeRange,
        limit: usize,
    ) -> Result<Vec<String>, StorageError> {
        let query = query
            .clone()
            .with_time_range(window)
            .with_limit(limit as u64);
        let collector = RowCollector::new();
        self.engine
            .run_query(ctx, self.tenant, &query, &|block_id, timestamps, columns| {
                collector.write_block(block_id, timestamps, columns)
            })
            .map_err(|e| StorageError::engine(&query, e))?;

        let mut rows = collector.into_rows();
        rows.sort_by(|a, b| b.timestamp.cmp(&a.timestamp));
        let mut seen = HashSet::new();
        let trace_ids = rows
            .iter()
            .filter_map(|row| row.get(TRACE_ID))
            .filter(|trace_id| seen.insert(*trace_id))
            .map(str::to_string)
            .collect();
        Ok(trace_ids)
    }
}
