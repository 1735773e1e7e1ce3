//! In-memory engine answering queries from a script, for tests.

use std::collections::BTreeSet;

use logspan_core::context::QueryContext;
use logspan_core::engine::{LogEngine, LogsQuery, TenantId, WriteBlock};
use logspan_core::error::EngineError;
use logspan_core::field::{Column, Field};
use logspan_core::trace::Span;
use parking_lot::Mutex;

use crate::codec::{TRACE_ID, encode_span};

pub(crate) struct Block {
    pub timestamps: Vec<i64>,
    pub columns: Vec<Column>,
}

type Respond = Box<dyn Fn(&LogsQuery) -> Vec<Block> + Send + Sync>;
type FieldValues = Box<dyn Fn(&LogsQuery, &str) -> Vec<String> + Send + Sync>;

/// Records every query and answers it with the blocks returned by a
/// closure. Blocks of one answer are delivered from separate threads.
pub(crate) struct ScriptedEngine {
    respond: Respond,
    field_values: FieldValues,
    failure: Option<String>,
    queries: Mutex<Vec<LogsQuery>>,
    field_value_calls: Mutex<Vec<(LogsQuery, String, u64)>>,
    tenants: Mutex<Vec<TenantId>>,
}

impl ScriptedEngine {
    pub fn new(respond: impl Fn(&LogsQuery) -> Vec<Block> + Send + Sync + 'static) -> Self {
        Self {
            respond: Box::new(respond),
            field_values: Box::new(|_, _| Vec::new()),
            failure: None,
            queries: Mutex::new(Vec::new()),
            field_value_calls: Mutex::new(Vec::new()),
            tenants: Mutex::new(Vec::new()),
        }
    }

    pub fn failing(message: &str) -> Self {
        let mut engine = Self::new(|_| Vec::new());
        engine.failure = Some(message.to_string());
        engine
    }

    pub fn with_field_values(
        mut self,
        field_values: impl Fn(&LogsQuery, &str) -> Vec<String> + Send + Sync + 'static,
    ) -> Self {
        self.field_values = Box::new(field_values);
        self
    }

    pub fn queries(&self) -> Vec<LogsQuery> {
        self.queries.lock().clone()
    }

    pub fn field_value_calls(&self) -> Vec<(LogsQuery, String, u64)> {
        self.field_value_calls.lock().clone()
    }

    pub fn tenants(&self) -> Vec<TenantId> {
        self.tenants.lock().clone()
    }
}

impl LogEngine for ScriptedEngine {
    fn run_query(
        &self,
        _ctx: &QueryContext,
        tenant: TenantId,
        query: &LogsQuery,
        write_block: &WriteBlock<'_>,
    ) -> Result<(), EngineError> {
        self.queries.lock().push(query.clone());
        self.tenants.lock().push(tenant);
        if let Some(message) = &self.failure {
            return Err(EngineError::Execution(message.clone()));
        }
        let blocks = (self.respond)(query);
        std::thread::scope(|scope| {
            for (block_id, block) in blocks.iter().enumerate() {
                scope.spawn(move || write_block(block_id, &block.timestamps, &block.columns));
            }
        });
        Ok(())
    }

    fn field_values(
        &self,
        _ctx: &QueryContext,
        tenant: TenantId,
        query: &LogsQuery,
        field_name: &str,
        limit: u64,
    ) -> Result<Vec<String>, EngineError> {
        self.field_value_calls
            .lock()
            .push((query.clone(), field_name.to_string(), limit));
        self.tenants.lock().push(tenant);
        if let Some(message) = &self.failure {
            return Err(EngineError::Execution(message.clone()));
        }
        Ok((self.field_values)(query, field_name))
    }
}

/// A block of `(timestamp, trace_id)` rows.
pub(crate) fn trace_id_block(rows: &[(i64, String)]) -> Block {
    Block {
        timestamps: rows.iter().map(|(ts, _)| *ts).collect(),
        columns: vec![
            Column::new("_time", rows.iter().map(|(ts, _)| ts.to_string()).collect()),
            Column::new(TRACE_ID, rows.iter().map(|(_, id)| id.clone()).collect()),
        ],
    }
}

/// A block holding the encoded form of `spans`, one row per span.
pub(crate) fn span_block(spans: &[Span]) -> Block {
    let rows: Vec<(i64, Vec<Field>)> = spans
        .iter()
        .map(|span| {
            let encoded = encode_span(span).unwrap();
            (encoded.timestamp, encoded.fields)
        })
        .collect();
    fields_block(&rows)
}

/// A block built from raw field lists; missing fields become empty values.
pub(crate) fn fields_block(rows: &[(i64, Vec<Field>)]) -> Block {
    let names: BTreeSet<&str> = rows
        .iter()
        .flat_map(|(_, fields)| fields.iter().map(|field| field.name.as_str()))
        .collect();
    let columns = names
        .into_iter()
        .map(|name| {
            let values = rows
                .iter()
                .map(|(_, fields)| {
                    fields
                        .iter()
                        .find(|field| field.name == name)
                        .map(|field| field.value.clone())
                        .unwrap_or_default()
                })
                .collect();
            Column::new(name, values)
        })
        .collect();
    Block {
        timestamps: rows.iter().map(|(ts, _)| *ts).collect(),
        columns,
    }
}
