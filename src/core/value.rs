//! Task values and the value-or-error pair every task produces.

use serde_json::Value;
use std::fmt;
use std::time::Duration;
use thiserror::Error;

/// A value produced by a task.
///
/// Most tasks emit JSON; byte-oriented tasks (e.g. raw HTTP bodies
/// before decoding) emit raw bytes, which are rendered as hex when
/// logged or serialized.
#[derive(Debug, Clone, PartialEq)]
pub enum TaskValue {
    /// A JSON value.
    Json(Value),
    /// A raw byte sequence.
    Bytes(Vec<u8>),
}

impl TaskValue {
    /// View the value as JSON, if it is one.
    pub fn as_json(&self) -> Option<&Value> {
        match self {
            TaskValue::Json(v) => Some(v),
            TaskValue::Bytes(_) => None,
        }
    }

    /// View the value as bytes, if it is a byte sequence.
    pub fn as_bytes(&self) -> Option<&[u8]> {
        match self {
            TaskValue::Json(_) => None,
            TaskValue::Bytes(b) => Some(b),
        }
    }

    /// Serialized form of the value. Byte sequences become hex strings.
    pub fn to_json(&self) -> Value {
        match self {
            TaskValue::Json(v) => v.clone(),
            TaskValue::Bytes(b) => Value::String(to_hex(b)),
        }
    }
}

impl From<Value> for TaskValue {
    fn from(v: Value) -> Self {
        TaskValue::Json(v)
    }
}

impl From<Vec<u8>> for TaskValue {
    fn from(b: Vec<u8>) -> Self {
        TaskValue::Bytes(b)
    }
}

impl fmt::Display for TaskValue {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            TaskValue::Json(v) => write!(f, "{}", v),
            TaskValue::Bytes(b) => write!(f, "{}", String::from_utf8_lossy(b)),
        }
    }
}

/// Lowercase hex rendering of a byte sequence.
pub(crate) fn to_hex(bytes: &[u8]) -> String {
    use fmt::Write;

    let mut out = String::with_capacity(bytes.len() * 2);
    for b in bytes {
        let _ = write!(out, "{:02x}", b);
    }
    out
}

/// Errors produced by task execution.
///
/// These are `Clone` because an errored result fans out as an input to
/// every successor of the failing task.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum TaskError {
    /// Task execution failed with a message.
    #[error("execution failed: {0}")]
    ExecutionFailed(String),

    /// Task input was missing or of an unexpected shape.
    #[error("invalid input: {0}")]
    InvalidInput(String),

    /// Task exceeded its effective deadline.
    #[error("task timed out after {0:?}")]
    Timeout(Duration),

    /// Task was cancelled by the stop signal or the caller.
    #[error("task cancelled")]
    Cancelled,

    /// The task's worker panicked; the payload is the panic message.
    #[error("worker panicked when executing task: {0}")]
    Panicked(String),

    /// The whole run panicked repeatedly and was abandoned.
    #[error("pipeline run panicked")]
    RunPanicked,
}

/// The value-or-error pair produced by every task invocation. Exactly
/// one side is meaningful.
pub type TaskOutput = Result<TaskValue, TaskError>;

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_json_value_round_trip() {
        let value = TaskValue::from(json!({"answer": 42}));
        assert_eq!(value.as_json(), Some(&json!({"answer": 42})));
        assert!(value.as_bytes().is_none());
        assert_eq!(value.to_json(), json!({"answer": 42}));
    }

    #[test]
    fn test_bytes_value_serializes_as_hex() {
        let value = TaskValue::from(vec![0xde, 0xad, 0xbe, 0xef]);
        assert_eq!(value.to_json(), json!("deadbeef"));
        assert_eq!(value.as_bytes(), Some(&[0xde, 0xad, 0xbe, 0xef][..]));
    }

    #[test]
    fn test_bytes_display_is_lossy_text() {
        let value = TaskValue::from(b"hello".to_vec());
        assert_eq!(format!("{}", value), "hello");
    }

    #[test]
    fn test_hex_rendering() {
        assert_eq!(to_hex(&[0x00, 0x0f, 0xff]), "000fff");
        assert_eq!(to_hex(&[]), "");
    }

    #[test]
    fn test_error_display() {
        let err = TaskError::ExecutionFailed("bad response".to_string());
        assert_eq!(err.to_string(), "execution failed: bad response");

        let err = TaskError::RunPanicked;
        assert_eq!(err.to_string(), "pipeline run panicked");
    }

    #[test]
    fn test_errors_are_cloneable() {
        let err = TaskError::Timeout(Duration::from_millis(10));
        let copy = err.clone();
        assert_eq!(err, copy);
    }
}
