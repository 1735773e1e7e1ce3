use logspan_core::engine::BlockId;
use logspan_core::field::{Column, Field, Row};
use parking_lot::Mutex;

/// Accumulates the engine's result blocks into owned rows.
///
/// The engine may deliver blocks from several workers at once, so rows of
/// different blocks arrive in no particular order; rows within one block
/// keep their order.
#[derive(Debug, Default)]
pub struct RowCollector {
    rows: Mutex<Vec<Row>>,
}

impl RowCollector {
    pub fn new() -> Self {
        Self::default()
    }

    /// Block callback. Names and values are copied out of the engine's
    /// buffers; empty values are treated as absent fields.
    pub fn write_block(&self, _block_id: BlockId, timestamps: &[i64], columns: &[Column]) {
        let rows: Vec<Row> = timestamps
            .iter()
            .enumerate()
            .map(|(i, &timestamp)| Row {
                timestamp,
                fields: columns
                    .iter()
                    .filter_map(|column| {
                        column
                            .values
                            .get(i)
                            .filter(|value| !value.is_empty())
                            .map(|value| Field::new(column.name.as_str(), value.as_str()))
                    })
                    .collect(),
            })
            .collect();
        self.rows.lock().extend(rows);
    }

    pub fn len(&self) -> usize {
        self.rows.lock().len()
    }

    pub fn is_empty(&self) -> bool {
        self.rows.lock().is_empty()
    }

    pub fn into_rows(self) -> Vec<Row> {
        self.rows.into_inner()
    }
}
