use serde::{Deserialize, Serialize};

/// A flat name/value pair, the storage engine's native unit.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct Field {
    pub name: String,
    pub value: String,
}

impl Field {
    pub fn new(name: impl Into<String>, value: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            value: value.into(),
        }
    }
}

/// One column of a result block. `values` is parallel to the block's
/// timestamps; an empty value means the field is absent for that row.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Column {
    pub name: String,
    pub values: Vec<String>,
}

impl Column {
    pub fn new(name: impl Into<String>, values: Vec<String>) -> Self {
        Self {
            name: name.into(),
            values,
        }
    }
}

/// One `(timestamp, fields)` record returned by a query.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Row {
    pub timestamp: i64,
    pub fields: Vec<Field>,
}

impl Row {
    /// Value of the first field called `name`.
    pub fn get(&self, name: &str) -> Option<&str> {
        self.fields
            .iter()
            .find(|field| field.name == name)
            .map(|field| field.value.as_str())
    }
}
