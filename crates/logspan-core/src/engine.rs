use std::fmt;
use std::str::FromStr;
use std::time::SystemTime;

use serde::{Deserialize, Serialize};

use crate::context::QueryContext;
use crate::error::{EngineError, StorageError};
use crate::field::{Column, Field};
use crate::time::to_unix_nanos;

// ─────────────────────────────────────────────────────────────────────────────
// Tenancy and time bounds
// ─────────────────────────────────────────────────────────────────────────────

/// Accounting identity a query runs under.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct TenantId {
    pub account_id: u32,
    pub project_id: u32,
}

impl fmt::Display for TenantId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}:{}", self.account_id, self.project_id)
    }
}

impl FromStr for TenantId {
    type Err = StorageError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let invalid = || StorageError::InvalidInput(format!("tenant must be `account:project`, got {s:?}"));
        let (account, project) = s.split_once(':').ok_or_else(invalid)?;
        Ok(Self {
            account_id: account.parse().map_err(|_| invalid())?,
            project_id: project.parse().map_err(|_| invalid())?,
        })
    }
}

/// Inclusive `[start, end]` bounds in unix nanoseconds.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct TimeRange {
    pub start: i64,
    pub end: i64,
}

impl TimeRange {
    pub fn new(start: i64, end: i64) -> Self {
        Self { start, end }
    }

    /// Everything from the epoch onwards.
    pub fn full() -> Self {
        Self::new(0, i64::MAX)
    }

    pub fn between(start: SystemTime, end: SystemTime) -> Self {
        Self::new(to_unix_nanos(start), to_unix_nanos(end))
    }
}

// ─────────────────────────────────────────────────────────────────────────────
// Query handle
// ─────────────────────────────────────────────────────────────────────────────

/// A parsed query: a filter expression followed by pipe stages, plus the
/// time filter and limit pipe attached by the caller.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct LogsQuery {
    filter: String,
    pipes: Vec<String>,
    time_range: Option<TimeRange>,
    limit: Option<u64>,
}

impl LogsQuery {
    /// Split `text` at top-level `|` into the filter and its pipe stages.
    pub fn parse(text: &str) -> Result<Self, EngineError> {
        let mut parts = Vec::new();
        let mut current = String::new();
        let mut in_quotes = false;
        let mut escaped = false;
        for c in text.chars() {
            if escaped {
                current.push(c);
                escaped = false;
                continue;
            }
            match c {
                '\\' if in_quotes => {
                    current.push(c);
                    escaped = true;
                }
                '"' => {
                    in_quotes = !in_quotes;
                    current.push(c);
                }
                '|' if !in_quotes => parts.push(std::mem::take(&mut current)),
                _ => current.push(c),
            }
        }
        if in_quotes {
            return Err(EngineError::Parse(format!(
                "unterminated quoted string in {text:?}"
            )));
        }
        parts.push(current);

        let mut parts = parts.into_iter().map(|part| part.trim().to_string());
        let filter = match parts.next() {
            Some(filter) if !filter.is_empty() => filter,
            _ => "*".to_string(),
        };
        let pipes: Vec<String> = parts.collect();
        if pipes.iter().any(String::is_empty) {
            return Err(EngineError::Parse(format!("empty pipe stage in {text:?}")));
        }
        Ok(Self {
            filter,
            pipes,
            time_range: None,
            limit: None,
        })
    }

    pub fn with_time_range(mut self, time_range: TimeRange) -> Self {
        self.time_range = Some(time_range);
        self
    }

    pub fn with_limit(mut self, limit: u64) -> Self {
        self.limit = Some(limit);
        self
    }

    pub fn filter(&self) -> &str {
        &self.filter
    }

    pub fn pipes(&self) -> &[String] {
        &self.pipes
    }

    pub fn time_range(&self) -> Option<TimeRange> {
        self.time_range
    }

    pub fn limit(&self) -> Option<u64> {
        self.limit
    }
}

impl fmt::Display for LogsQuery {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self.time_range {
            Some(range) if self.filter == "*" => write!(f, "_time:[{}, {}]", range.start, range.end)?,
            Some(range) => write!(
                f,
                "_time:[{}, {}] AND ({})",
                range.start, range.end, self.filter
            )?,
            None => f.write_str(&self.filter)?,
        }
        for pipe in &self.pipes {
            write!(f, " | {pipe}")?;
        }
        if let Some(limit) = self.limit {
            write!(f, " | limit {limit}")?;
        }
        Ok(())
    }
}

// ─────────────────────────────────────────────────────────────────────────────
// Engine boundary
// ─────────────────────────────────────────────────────────────────────────────

pub type BlockId = usize;

/// Receives one columnar result block: `(block, timestamps, columns)`.
pub type WriteBlock<'a> = dyn Fn(BlockId, &[i64], &[Column]) + Send + Sync + 'a;

/// The log-storage query engine.
pub trait LogEngine: Send + Sync {
    /// Execute `query`, handing result blocks to `write_block`. May invoke
    /// `write_block` concurrently from several workers; returns once every
    /// block has been delivered.
    fn run_query(
        &self,
        ctx: &QueryContext,
        tenant: TenantId,
        query: &LogsQuery,
        write_block: &WriteBlock<'_>,
    ) -> Result<(), EngineError>;

    /// Up to `limit` distinct values of `field_name` among rows matching `query`.
    fn field_values(
        &self,
        ctx: &QueryContext,
        tenant: TenantId,
        query: &LogsQuery,
        field_name: &str,
        limit: u64,
    ) -> Result<Vec<String>, EngineError>;
}

/// Ingestion hand-off for encoded rows.
pub trait MessageProcessor: Send + Sync {
    fn add_row(&self, tenant: TenantId, timestamp: i64, fields: &[Field], stream_fields: &[Field]);
}
