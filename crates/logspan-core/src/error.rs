use thiserror::Error;

#[derive(Debug, Error)]
pub enum StorageError {
    #[error("invalid input: {0}")]
    InvalidInput(String),
    #[error("failed to serialize {collection}: {source}")]
    Serialization {
        collection: &'static str,
        #[source]
        source: serde_json::Error,
    },
    #[error("malformed {field}: {reason}")]
    Malformed { field: String, reason: String },
    #[error("query `{query}` failed: {source}")]
    Engine {
        query: String,
        #[source]
        source: EngineError,
    },
    #[error("request cancelled")]
    Cancelled,
    #[error("request deadline exceeded")]
    DeadlineExceeded,
}

impl StorageError {
    pub fn malformed(field: impl Into<String>, reason: impl Into<String>) -> Self {
        Self::Malformed {
            field: field.into(),
            reason: reason.into(),
        }
    }

    pub fn engine(query: impl ToString, source: EngineError) -> Self {
        Self::Engine {
            query: query.to_string(),
            source,
        }
    }
}

/// Failures reported by the log engine itself.
#[derive(Debug, Error)]
pub enum EngineError {
    #[error("cannot parse query: {0}")]
    Parse(String),
    #[error("query execution failed: {0}")]
    Execution(String),
}
