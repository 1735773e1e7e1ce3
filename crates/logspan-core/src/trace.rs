use std::fmt;
use std::str::FromStr;
use std::time::{Duration, SystemTime};

use serde::{Deserialize, Serialize};

use crate::error::StorageError;

/// Unique identifier for a trace (128-bit, Jaeger layout).
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(into = "String", try_from = "String")]
pub struct TraceId {
    pub high: u64,
    pub low: u64,
}

impl TraceId {
    pub fn new(high: u64, low: u64) -> Self {
        Self { high, low }
    }

    pub fn is_zero(&self) -> bool {
        self.high == 0 && self.low == 0
    }
}

/// Canonical text: the hex of `low` alone when `high` is zero, otherwise
/// `high` followed by the zero-padded `low`.
impl fmt::Display for TraceId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        if self.high == 0 {
            write!(f, "{:x}", self.low)
        } else {
            write!(f, "{:x}{:016x}", self.high, self.low)
        }
    }
}

impl FromStr for TraceId {
    type Err = StorageError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        check_hex_digits("trace_id", s, 32)?;
        let (high, low) = if s.len() > 16 {
            let split = s.len() - 16;
            (parse_hex_u64("trace_id", &s[..split])?, parse_hex_u64("trace_id", &s[split..])?)
        } else {
            (0, parse_hex_u64("trace_id", s)?)
        };
        Ok(Self { high, low })
    }
}

impl From<TraceId> for String {
    fn from(trace_id: TraceId) -> Self {
        trace_id.to_string()
    }
}

impl TryFrom<String> for TraceId {
    type Error = StorageError;

    fn try_from(s: String) -> Result<Self, Self::Error> {
        s.parse()
    }
}

/// Unique identifier for a span within a trace (64-bit).
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(into = "String", try_from = "String")]
pub struct SpanId(pub u64);

impl SpanId {
    pub fn is_zero(&self) -> bool {
        self.0 == 0
    }
}

impl fmt::Display for SpanId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{:016x}", self.0)
    }
}

impl FromStr for SpanId {
    type Err = StorageError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        check_hex_digits("span_id", s, 16)?;
        parse_hex_u64("span_id", s).map(SpanId)
    }
}

impl From<SpanId> for String {
    fn from(span_id: SpanId) -> Self {
        span_id.to_string()
    }
}

impl TryFrom<String> for SpanId {
    type Error = StorageError;

    fn try_from(s: String) -> Result<Self, Self::Error> {
        s.parse()
    }
}

/// Only ASCII hex digits are accepted, so byte offsets are char boundaries.
fn check_hex_digits(field: &str, s: &str, max_digits: usize) -> Result<(), StorageError> {
    if s.is_empty() || s.len() > max_digits || !s.bytes().all(|b| b.is_ascii_hexdigit()) {
        return Err(StorageError::malformed(
            field,
            format!("expected 1 to {max_digits} hex digits, got {s:?}"),
        ));
    }
    Ok(())
}

fn parse_hex_u64(field: &str, s: &str) -> Result<u64, StorageError> {
    u64::from_str_radix(s, 16).map_err(|e| StorageError::malformed(field, format!("{s:?}: {e}")))
}

// ─────────────────────────────────────────────────────────────────────────────
// Tags
// ─────────────────────────────────────────────────────────────────────────────

/// Wire code of a tag value type. String is the default and is never
/// written out next to a stored tag.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[repr(u8)]
pub enum ValueType {
    #[default]
    String = 0,
    Bool = 1,
    Int64 = 2,
    Float64 = 3,
    Binary = 4,
}

impl ValueType {
    pub fn code(self) -> u8 {
        self as u8
    }

    /// Unknown codes yield `None`; callers fall back to [`ValueType::String`].
    pub fn from_code(code: u8) -> Option<Self> {
        match code {
            0 => Some(Self::String),
            1 => Some(Self::Bool),
            2 => Some(Self::Int64),
            3 => Some(Self::Float64),
            4 => Some(Self::Binary),
            _ => None,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", content = "value", rename_all = "lowercase")]
pub enum TagValue {
    String(String),
    Bool(bool),
    Int64(i64),
    Float64(f64),
    Binary(Vec<u8>),
}

impl TagValue {
    pub fn value_type(&self) -> ValueType {
        match self {
            Self::String(_) => ValueType::String,
            Self::Bool(_) => ValueType::Bool,
            Self::Int64(_) => ValueType::Int64,
            Self::Float64(_) => ValueType::Float64,
            Self::Binary(_) => ValueType::Binary,
        }
    }
}

/// A typed key/value pair attached to a span, a process or a log record.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct KeyValue {
    pub key: String,
    pub value: TagValue,
}

impl KeyValue {
    pub fn new(key: impl Into<String>, value: TagValue) -> Self {
        Self {
            key: key.into(),
            value,
        }
    }

    pub fn string(key: impl Into<String>, value: impl Into<String>) -> Self {
        Self::new(key, TagValue::String(value.into()))
    }

    pub fn value_type(&self) -> ValueType {
        self.value.value_type()
    }
}

// ─────────────────────────────────────────────────────────────────────────────
// Spans
// ─────────────────────────────────────────────────────────────────────────────

/// A timestamped event recorded during a span.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Log {
    pub timestamp: SystemTime,
    #[serde(default)]
    pub fields: Vec<KeyValue>,
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum SpanRefType {
    #[default]
    ChildOf,
    FollowsFrom,
}

/// Causal link from one span to another.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SpanRef {
    pub trace_id: TraceId,
    pub span_id: SpanId,
    #[serde(default)]
    pub ref_type: SpanRefType,
}

/// The service that emitted a span.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct Process {
    pub service_name: String,
    #[serde(default)]
    pub tags: Vec<KeyValue>,
}

/// One timed unit of work in a distributed trace.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Span {
    pub trace_id: TraceId,
    pub span_id: SpanId,
    pub operation_name: String,
    #[serde(default)]
    pub flags: u32,
    pub start_time: SystemTime,
    pub duration: Duration,
    #[serde(default)]
    pub process_id: String,
    #[serde(default)]
    pub process: Process,
    #[serde(default)]
    pub tags: Vec<KeyValue>,
    #[serde(default)]
    pub logs: Vec<Log>,
    #[serde(default)]
    pub warnings: Vec<String>,
    #[serde(default)]
    pub references: Vec<SpanRef>,
}

/// Spans sharing one trace ID, assembled on the read path.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct Trace {
    pub spans: Vec<Span>,
}
