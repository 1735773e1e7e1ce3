//! Conversion between [`Span`]s and the flat field sets stored in the log
//! engine.
//!
//! Every span becomes a fixed set of core fields plus one field per tag:
//!
//! ```text
//! tag:<key>                 value as text
//! tag:<key>:v_type          type code, only for non-string values
//! process_tag:<key>         same, for process tags
//! process_tag:<key>:v_type
//! ```
//!
//! Logs, warnings and references travel as JSON blobs.

use std::collections::{BTreeMap, HashMap};
use std::str::FromStr;
use std::time::{Duration, UNIX_EPOCH};

use base64::Engine as _;
use base64::engine::general_purpose::STANDARD as BASE64;
use logspan_core::error::StorageError;
use logspan_core::field::Field;
use logspan_core::time::{duration_nanos, from_unix_nanos, to_unix_nanos};
use logspan_core::trace::{KeyValue, Process, Span, SpanId, TagValue, TraceId, ValueType};
use serde::{Deserialize, Serialize};
use serde::de::DeserializeOwned;
use tracing::debug;

pub const MSG: &str = "_msg";
pub const TRACE_ID: &str = "trace_id";
pub const SPAN_ID: &str = "span_id";
pub const FLAGS: &str = "flags";
pub const START_TIME: &str = "start_time";
pub const END_TIME: &str = "end_time";
pub const DURATION: &str = "duration";
pub const PROCESS_ID: &str = "process_id";
pub const PROCESS_SERVICE_NAME: &str = "process_service_name";
pub const OPERATION_NAME: &str = "operation_name";
pub const LOG: &str = "log";
pub const WARNINGS: &str = "warnings";
pub const REFERENCES: &str = "references";

pub const TAG_PREFIX: &str = "tag:";
pub const PROCESS_TAG_PREFIX: &str = "process_tag:";
pub const VALUE_TYPE_SUFFIX: &str = ":v_type";

const CORE_FIELD_COUNT: usize = 10;

/// Output of [`SpanEncoder::encode`].
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct EncodedSpan {
    /// Span start time in unix nanoseconds; the row timestamp.
    #[serde(default)]
    pub timestamp: i64,
    pub fields: Vec<Field>,
    /// `process_service_name` and `operation_name`, the stream key.
    #[serde(default)]
    pub stream_fields: Vec<Field>,
}

// ─────────────────────────────────────────────────────────────────────────────
// Encoding
// ─────────────────────────────────────────────────────────────────────────────

/// Span encoder holding a scratch buffer for tag field names. Reusable
/// across spans; not shared between threads.
#[derive(Debug, Default)]
pub struct SpanEncoder {
    name_buf: String,
}

impl SpanEncoder {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn encode(&mut self, span: &Span) -> Result<EncodedSpan, StorageError> {
        let start_time = to_unix_nanos(span.start_time);
        let duration = duration_nanos(span.duration);
        let end_time = start_time.saturating_add(i64::try_from(duration).unwrap_or(i64::MAX));

        let tag_count = span.tags.len() + span.process.tags.len();
        let mut fields = Vec::with_capacity(CORE_FIELD_COUNT + 2 * tag_count + 3);
        fields.push(Field::new(MSG, span.operation_name.as_str()));
        fields.push(Field::new(TRACE_ID, span.trace_id.to_string()));
        fields.push(Field::new(SPAN_ID, span.span_id.to_string()));
        fields.push(Field::new(FLAGS, span.flags.to_string()));
        fields.push(Field::new(START_TIME, start_time.to_string()));
        fields.push(Field::new(END_TIME, end_time.to_string()));
        fields.push(Field::new(DURATION, duration.to_string()));
        fields.push(Field::new(PROCESS_ID, span.process_id.as_str()));
        fields.push(Field::new(
            PROCESS_SERVICE_NAME,
            span.process.service_name.as_str(),
        ));
        fields.push(Field::new(OPERATION_NAME, span.operation_name.as_str()));

        self.push_tags(&mut fields, PROCESS_TAG_PREFIX, &span.process.tags);
        self.push_tags(&mut fields, TAG_PREFIX, &span.tags);

        if !span.logs.is_empty() {
            fields.push(Field::new(LOG, to_json("logs", &span.logs)?));
        }
        if !span.warnings.is_empty() {
            fields.push(Field::new(WARNINGS, to_json("warnings", &span.warnings)?));
        }
        if !span.references.is_empty() {
            fields.push(Field::new(
                REFERENCES,
                to_json("references", &span.references)?,
            ));
        }

        Ok(EncodedSpan {
            timestamp: start_time,
            fields,
            stream_fields: stream_fields(span),
        })
    }

    fn push_tags(&mut self, fields: &mut Vec<Field>, prefix: &str, tags: &[KeyValue]) {
        for tag in tags {
            self.name_buf.clear();
            self.name_buf.push_str(prefix);
            self.name_buf.push_str(&tag.key);
            fields.push(Field::new(self.name_buf.as_str(), format_tag_value(&tag.value)));

            let value_type = tag.value_type();
            if value_type != ValueType::String {
                self.name_buf.push_str(VALUE_TYPE_SUFFIX);
                fields.push(Field::new(
                    self.name_buf.as_str(),
                    value_type.code().to_string(),
                ));
            }
        }
        self.name_buf.clear();
    }
}

/// Encode with a throwaway encoder.
pub fn encode_span(span: &Span) -> Result<EncodedSpan, StorageError> {
    SpanEncoder::new().encode(span)
}

pub fn stream_fields(span: &Span) -> Vec<Field> {
    vec![
        Field::new(PROCESS_SERVICE_NAME, span.process.service_name.as_str()),
        Field::new(OPERATION_NAME, span.operation_name.as_str()),
    ]
}

fn format_tag_value(value: &TagValue) -> String {
    match value {
        TagValue::String(s) => s.clone(),
        TagValue::Bool(b) => b.to_string(),
        TagValue::Int64(i) => i.to_string(),
        TagValue::Float64(f) => f.to_string(),
        TagValue::Binary(bytes) => BASE64.encode(bytes),
    }
}

fn to_json<T: Serialize + ?Sized>(
    collection: &'static str,
    value: &T,
) -> Result<String, StorageError> {
    serde_json::to_string(value)
        .map_err(|source| StorageError::Serialization { collection, source })
}

// ─────────────────────────────────────────────────────────────────────────────
// Decoding
// ─────────────────────────────────────────────────────────────────────────────

/// Rebuild a span from its fields, in any order. Unknown fields are ignored.
pub fn decode_span(fields: &[Field]) -> Result<Span, StorageError> {
    let mut span = Span {
        trace_id: TraceId::default(),
        span_id: SpanId::default(),
        operation_name: String::new(),
        flags: 0,
        start_time: UNIX_EPOCH,
        duration: Duration::ZERO,
        process_id: String::new(),
        process: Process::default(),
        tags: Vec::new(),
        logs: Vec::new(),
        warnings: Vec::new(),
        references: Vec::new(),
    };
    let mut tags = TagAccumulator::default();
    let mut process_tags = TagAccumulator::default();

    for field in fields {
        let value = field.value.as_str();
        match field.name.as_str() {
            TRACE_ID => span.trace_id = value.parse()?,
            SPAN_ID => span.span_id = value.parse()?,
            FLAGS => span.flags = parse_decimal(FLAGS, value)?,
            START_TIME => span.start_time = from_unix_nanos(parse_decimal(START_TIME, value)?),
            END_TIME => {
                parse_decimal::<i64>(END_TIME, value)?;
            }
            DURATION => span.duration = Duration::from_nanos(parse_decimal(DURATION, value)?),
            PROCESS_ID => span.process_id = value.to_string(),
            PROCESS_SERVICE_NAME => span.process.service_name = value.to_string(),
            OPERATION_NAME => span.operation_name = value.to_string(),
            LOG => span.logs = from_json(LOG, value)?,
            WARNINGS => span.warnings = from_json(WARNINGS, value)?,
            REFERENCES => span.references = from_json(REFERENCES, value)?,
            name => {
                if let Some(key) = name.strip_prefix(PROCESS_TAG_PREFIX) {
                    process_tags.insert(key, value);
                } else if let Some(key) = name.strip_prefix(TAG_PREFIX) {
                    tags.insert(key, value);
                }
            }
        }
    }

    if span.span_id.is_zero() {
        return Err(StorageError::malformed(SPAN_ID, "missing or zero span id"));
    }
    span.tags = tags.into_tags();
    span.process.tags = process_tags.into_tags();
    Ok(span)
}

fn parse_decimal<T>(field: &str, value: &str) -> Result<T, StorageError>
where
    T: FromStr,
    T::Err: std::fmt::Display,
{
    value
        .parse()
        .map_err(|e| StorageError::malformed(field, format!("{value:?}: {e}")))
}

fn from_json<T: DeserializeOwned>(field: &str, value: &str) -> Result<T, StorageError> {
    serde_json::from_str(value).map_err(|e| StorageError::malformed(field, e.to_string()))
}

/// Tag values and type codes keyed by tag name, joined once all fields
/// have been seen.
#[derive(Default)]
struct TagAccumulator<'a> {
    values: BTreeMap<&'a str, &'a str>,
    types: HashMap<&'a str, ValueType>,
}

impl<'a> TagAccumulator<'a> {
    fn insert(&mut self, key: &'a str, value: &'a str) {
        match key.strip_suffix(VALUE_TYPE_SUFFIX) {
            Some(base) => {
                let value_type = value
                    .parse::<u8>()
                    .ok()
                    .and_then(ValueType::from_code)
                    .unwrap_or_default();
                self.types.insert(base, value_type);
            }
            None => {
                self.values.insert(key, value);
            }
        }
    }

    fn into_tags(self) -> Vec<KeyValue> {
        self.values
            .into_iter()
            .map(|(key, raw)| {
                let value_type = self.types.get(key).copied().unwrap_or_default();
                KeyValue::new(key, parse_tag_value(key, value_type, raw))
            })
            .collect()
    }
}

/// Values that do not parse as their declared type are kept as strings.
fn parse_tag_value(key: &str, value_type: ValueType, raw: &str) -> TagValue {
    let parsed = match value_type {
        ValueType::String => return TagValue::String(raw.to_string()),
        ValueType::Bool => raw.parse().ok().map(TagValue::Bool),
        ValueType::Int64 => raw.parse().ok().map(TagValue::Int64),
        ValueType::Float64 => raw.parse().ok().map(TagValue::Float64),
        ValueType::Binary => BASE64.decode(raw).ok().map(TagValue::Binary),
    };
    parsed.unwrap_or_else(|| {
        debug!(key, ?value_type, raw, "tag value does not match its type, keeping it as a string");
        TagValue::String(raw.to_string())
    })
}

#[cfg(test)]
mod tests {
    use std::time::SystemTime;

    use logspan_core::trace::{Log, SpanRef, SpanRefType};
    use rand::seq::SliceRandom;

    use super::*;

    fn make_span() -> Span {
        Span {
            trace_id: TraceId::new(0xdead, 0xbeef),
            span_id: SpanId(0x42),
            operation_name: "GET /api/users".to_string(),
            flags: 1,
            start_time: UNIX_EPOCH + Duration::new(1_700_000_000, 123_456_789),
            duration: Duration::from_micros(1_500),
            process_id: "p1".to_string(),
            process: Process {
                service_name: "frontend".to_string(),
                tags: vec![
                    KeyValue::string("hostname", "web-1"),
                    KeyValue::new("pid", TagValue::Int64(4242)),
                ],
            },
            tags: vec![
                KeyValue::string("http.method", "GET"),
                KeyValue::new("error", TagValue::Bool(false)),
                KeyValue::new("retries", TagValue::Int64(-3)),
                KeyValue::new("ratio", TagValue::Float64(0.1 + 0.2)),
                KeyValue::new("payload", TagValue::Binary(vec![0x00, 0xff, 0xfe, 0x41])),
            ],
            logs: vec![Log {
                timestamp: UNIX_EPOCH + Duration::new(1_700_000_000, 500),
                fields: vec![
                    KeyValue::string("event", "cache miss"),
                    KeyValue::new("attempt", TagValue::Int64(2)),
                ],
            }],
            warnings: vec!["clock skew adjusted".to_string()],
            references: vec![SpanRef {
                trace_id: TraceId::new(0xdead, 0xbeef),
                span_id: SpanId(0x41),
                ref_type: SpanRefType::ChildOf,
            }],
        }
    }

    fn minimal_span() -> Span {
        Span {
            trace_id: TraceId::new(0, 1),
            span_id: SpanId(2),
            operation_name: "op".to_string(),
            flags: 0,
            start_time: UNIX_EPOCH + Duration::from_secs(10),
            duration: Duration::from_secs(1),
            process_id: String::new(),
            process: Process::default(),
            tags: Vec::new(),
            logs: Vec::new(),
            warnings: Vec::new(),
            references: Vec::new(),
        }
    }

    fn get<'a>(fields: &'a [Field], name: &str) -> Option<&'a str> {
        fields
            .iter()
            .find(|field| field.name == name)
            .map(|field| field.value.as_str())
    }

    fn sorted_tags(mut tags: Vec<KeyValue>) -> Vec<KeyValue> {
        tags.sort_by(|a, b| a.key.cmp(&b.key));
        tags
    }

    #[test]
    fn test_roundtrip_all_value_types() {
        let span = make_span();
        let encoded = encode_span(&span).unwrap();
        let decoded = decode_span(&encoded.fields).unwrap();

        assert_eq!(decoded.trace_id, span.trace_id);
        assert_eq!(decoded.span_id, span.span_id);
        assert_eq!(decoded.operation_name, span.operation_name);
        assert_eq!(decoded.flags, span.flags);
        assert_eq!(decoded.start_time, span.start_time);
        assert_eq!(decoded.duration, span.duration);
        assert_eq!(decoded.process_id, span.process_id);
        assert_eq!(decoded.process.service_name, span.process.service_name);
        assert_eq!(decoded.tags, sorted_tags(span.tags.clone()));
        assert_eq!(decoded.process.tags, sorted_tags(span.process.tags.clone()));
        assert_eq!(decoded.logs, span.logs);
        assert_eq!(decoded.warnings, span.warnings);
        assert_eq!(decoded.references, span.references);
    }

    #[test]
    fn test_decode_ignores_field_order() {
        let span = make_span();
        let mut fields = encode_span(&span).unwrap().fields;
        fields.shuffle(&mut rand::thread_rng());
        let decoded = decode_span(&fields).unwrap();
        assert_eq!(decoded.tags, sorted_tags(span.tags));
        assert_eq!(decoded.span_id, span.span_id);
    }

    #[test]
    fn test_encode_is_deterministic() {
        let span = make_span();
        let mut encoder = SpanEncoder::new();
        let mut first = encoder.encode(&span).unwrap().fields;
        let mut second = encoder.encode(&span).unwrap().fields;
        first.sort();
        second.sort();
        assert_eq!(first, second);
    }

    #[test]
    fn test_core_fields() {
        let encoded = encode_span(&make_span()).unwrap();
        let fields = &encoded.fields;
        for name in [
            MSG,
            TRACE_ID,
            SPAN_ID,
            FLAGS,
            START_TIME,
            END_TIME,
            DURATION,
            PROCESS_ID,
            PROCESS_SERVICE_NAME,
            OPERATION_NAME,
        ] {
            assert_eq!(fields.iter().filter(|f| f.name == name).count(), 1, "{name}");
        }
        assert_eq!(get(fields, TRACE_ID), Some("dead000000000000beef"));
        assert_eq!(get(fields, SPAN_ID), Some("0000000000000042"));
        assert_eq!(get(fields, START_TIME), Some("1700000000123456789"));
        assert_eq!(get(fields, DURATION), Some("1500000"));
        assert_eq!(get(fields, END_TIME), Some("1700000000124956789"));
        assert_eq!(encoded.timestamp, 1_700_000_000_123_456_789);
    }

    #[test]
    fn test_stream_fields() {
        let encoded = encode_span(&make_span()).unwrap();
        assert_eq!(
            encoded.stream_fields,
            vec![
                Field::new(PROCESS_SERVICE_NAME, "frontend"),
                Field::new(OPERATION_NAME, "GET /api/users"),
            ]
        );
    }

    #[test]
    fn test_string_tag_has_no_type_field() {
        let mut span = minimal_span();
        span.tags = vec![KeyValue::string("k", "v")];
        let fields = encode_span(&span).unwrap().fields;
        assert_eq!(get(&fields, "tag:k"), Some("v"));
        assert_eq!(get(&fields, "tag:k:v_type"), None);
    }

    #[test]
    fn test_typed_tag_has_type_field() {
        let mut span = minimal_span();
        span.tags = vec![KeyValue::new("k", TagValue::Int64(42))];
        span.process.tags = vec![KeyValue::new("up", TagValue::Bool(true))];
        let fields = encode_span(&span).unwrap().fields;
        assert_eq!(get(&fields, "tag:k"), Some("42"));
        assert_eq!(get(&fields, "tag:k:v_type"), Some("2"));
        assert_eq!(get(&fields, "process_tag:up"), Some("true"));
        assert_eq!(get(&fields, "process_tag:up:v_type"), Some("1"));
    }

    #[test]
    fn test_empty_collections_are_omitted() {
        let fields = encode_span(&minimal_span()).unwrap().fields;
        assert_eq!(fields.len(), CORE_FIELD_COUNT);
        assert_eq!(get(&fields, LOG), None);
        assert_eq!(get(&fields, WARNINGS), None);
        assert_eq!(get(&fields, REFERENCES), None);
    }

    #[test]
    fn test_encode_reports_failing_collection() {
        let mut span = minimal_span();
        span.logs = vec![Log {
            timestamp: UNIX_EPOCH - Duration::from_secs(1),
            fields: Vec::new(),
        }];
        match encode_span(&span) {
            Err(StorageError::Serialization { collection, .. }) => assert_eq!(collection, "logs"),
            other => panic!("unexpected result: {other:?}"),
        }
    }

    #[test]
    fn test_decode_rejects_missing_span_id() {
        let mut fields = encode_span(&minimal_span()).unwrap().fields;
        fields.retain(|field| field.name != SPAN_ID);
        assert!(matches!(
            decode_span(&fields),
            Err(StorageError::Malformed { .. })
        ));
    }

    #[test]
    fn test_decode_rejects_zero_span_id() {
        let mut span = minimal_span();
        span.span_id = SpanId(0);
        let fields = encode_span(&span).unwrap().fields;
        assert!(decode_span(&fields).is_err());
        assert!(decode_span(&[]).is_err());
    }

    #[test]
    fn test_decode_rejects_malformed_core_fields() {
        let base = encode_span(&minimal_span()).unwrap().fields;
        for (name, bad) in [
            (TRACE_ID, "not-hex"),
            (SPAN_ID, "zz"),
            (FLAGS, "-1"),
            (START_TIME, "yesterday"),
            (END_TIME, "1.5"),
            (DURATION, "-10"),
            (LOG, "{not json"),
        ] {
            let mut fields = base.clone();
            fields.push(Field::new(name, bad));
            match decode_span(&fields) {
                Err(StorageError::Malformed { field, .. }) => assert_eq!(field, name),
                other => panic!("{name}: unexpected result {other:?}"),
            }
        }
    }

    #[test]
    fn test_decode_unknown_type_defaults_to_string() {
        let mut fields = encode_span(&minimal_span()).unwrap().fields;
        fields.push(Field::new("tag:color", "blue"));
        fields.push(Field::new("tag:color:v_type", "99"));
        fields.push(Field::new("tag:size", "12"));
        fields.push(Field::new("tag:size:v_type", "garbage"));
        let span = decode_span(&fields).unwrap();
        assert_eq!(
            span.tags,
            vec![KeyValue::string("color", "blue"), KeyValue::string("size", "12")]
        );
    }

    #[test]
    fn test_decode_mismatched_value_kept_as_string() {
        let mut fields = encode_span(&minimal_span()).unwrap().fields;
        fields.push(Field::new("tag:flag", "maybe"));
        fields.push(Field::new("tag:flag:v_type", "1"));
        let span = decode_span(&fields).unwrap();
        assert_eq!(span.tags, vec![KeyValue::string("flag", "maybe")]);
    }

    #[test]
    fn test_decode_ignores_engine_fields() {
        let mut fields = encode_span(&minimal_span()).unwrap().fields;
        fields.push(Field::new("_time", "2024-01-01T00:00:00Z"));
        fields.push(Field::new("_stream", "{process_service_name=\"\"}"));
        assert!(decode_span(&fields).is_ok());
    }

    #[test]
    fn test_pre_epoch_start_time_roundtrip() {
        let mut span = minimal_span();
        span.start_time = UNIX_EPOCH - Duration::from_millis(250);
        let decoded = decode_span(&encode_span(&span).unwrap().fields).unwrap();
        assert_eq!(decoded.start_time, span.start_time);
    }

    #[test]
    fn test_random_spans_roundtrip() {
        let mut rng = rand::thread_rng();
        for _ in 0..50 {
            let mut span = minimal_span();
            span.trace_id = TraceId::new(rand::random(), rand::random());
            span.span_id = SpanId(rand::random::<u64>() | 1);
            span.start_time = SystemTime::UNIX_EPOCH + Duration::from_nanos(rand::random::<u32>() as u64);
            let mut tags = vec![
                KeyValue::new("i", TagValue::Int64(rand::random())),
                KeyValue::new("f", TagValue::Float64(rand::random())),
                KeyValue::new("b", TagValue::Bool(rand::random())),
                KeyValue::new("bin", TagValue::Binary((0..8).map(|_| rand::random()).collect())),
            ];
            tags.shuffle(&mut rng);
            span.tags = tags;
            let decoded = decode_span(&encode_span(&span).unwrap().fields).unwrap();
            assert_eq!(decoded.trace_id, span.trace_id);
            assert_eq!(decoded.span_id, span.span_id);
            assert_eq!(decoded.tags, sorted_tags(span.tags));
        }
    }
}
