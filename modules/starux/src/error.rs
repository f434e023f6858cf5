use serde_json::Value;
use thiserror::Error;

pub type Result<T> = std::result::Result<T, StoreError>;

#[derive(Debug, Error)]
pub enum StoreError {
    #[error("Unknown action: {0}")]
    UnknownAction(String),

    #[error("Unknown selector: {0}")]
    UnknownSelector(String),

    #[error("Action {action} takes arguments of type {expected}, got {actual}")]
    ArgumentMismatch {
        action: String,
        expected: &'static str,
        actual: &'static str,
    },

    #[error("Path not found: {0}")]
    PathNotFound(String),

    #[error("Type mismatch at {path}: expected {expected}, found {found}")]
    TypeMismatch {
        path: String,
        expected: &'static str,
        found: &'static str,
    },

    #[error("Index {index} out of bounds at {path} (len {len})")]
    IndexOutOfBounds {
        path: String,
        index: usize,
        len: usize,
    },

    #[error("Serialization error: {0}")]
    Serialization(String),

    #[error("Reducer {action} failed: {source}")]
    Reducer {
        action: String,
        #[source]
        source: Box<dyn std::error::Error + Send + Sync>,
    },

    #[error("Reducer {0} panicked")]
    ReducerPanicked(String),

    #[error("Reducer {0} was aborted before it finished")]
    ReducerAborted(String),
}

impl From<serde_json::Error> for StoreError {
    fn from(err: serde_json::Error) -> Self {
        StoreError::Serialization(err.to_string())
    }
}

/// Failure modes of a serialized call. The wrapped function's own errors
/// travel inside its return value, not here.
#[derive(Debug, Error, Clone, Copy, PartialEq, Eq)]
pub enum QueueError {
    #[error("Serialized call panicked")]
    Panicked,

    #[error("Serialization queue is closed")]
    Closed,
}

/// Human-readable name of a JSON value's type, for error messages.
pub fn value_type_name(value: &Value) -> &'static str {
    match value {
        Value::Null => "null",
        Value::Bool(_) => "boolean",
        Value::Number(_) => "number",
        Value::String(_) => "string",
        Value::Array(_) => "array",
        Value::Object(_) => "object",
    }
}
