//! Identifier types for pipeline specs, jobs and tasks.

use serde::{Deserialize, Serialize};
use std::fmt;

/// Unique identifier for a pipeline spec.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct SpecId(i64);

/// Unique identifier for the job owning a pipeline spec.
///
/// Used together with the job name for telemetry labeling.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct JobId(i64);

/// Stable textual identifier of a task within a pipeline (its dot-id).
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct TaskId(String);

impl SpecId {
    /// Create a new SpecId.
    pub fn new(id: i64) -> Self {
        Self(id)
    }

    /// Get the underlying value.
    pub fn value(&self) -> i64 {
        self.0
    }
}

impl JobId {
    /// Create a new JobId.
    pub fn new(id: i64) -> Self {
        Self(id)
    }

    /// Get the underlying value.
    pub fn value(&self) -> i64 {
        self.0
    }
}

impl TaskId {
    /// Create a new TaskId from a dot-id string.
    pub fn new(id: impl Into<String>) -> Self {
        Self(id.into())
    }

    /// Get the underlying string value.
    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl From<i64> for SpecId {
    fn from(id: i64) -> Self {
        Self::new(id)
    }
}

impl From<i32> for SpecId {
    fn from(id: i32) -> Self {
        Self::new(id.into())
    }
}

impl From<i64> for JobId {
    fn from(id: i64) -> Self {
        Self::new(id)
    }
}

impl From<i32> for JobId {
    fn from(id: i32) -> Self {
        Self::new(id.into())
    }
}

impl From<&str> for TaskId {
    fn from(s: &str) -> Self {
        Self::new(s)
    }
}

impl From<String> for TaskId {
    fn from(s: String) -> Self {
        Self::new(s)
    }
}

impl fmt::Display for SpecId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

impl fmt::Display for JobId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

impl fmt::Display for TaskId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_task_id_creation() {
        let task_id = TaskId::new("fetch");
        assert_eq!(task_id.as_str(), "fetch");
    }

    #[test]
    fn test_task_id_display() {
        let task_id = TaskId::new("parse");
        assert_eq!(format!("{}", task_id), "parse");
    }

    #[test]
    fn test_task_id_equality() {
        let id1 = TaskId::new("ds1");
        let id2 = TaskId::new("ds1");
        let id3 = TaskId::new("ds2");

        assert_eq!(id1, id2);
        assert_ne!(id1, id3);
    }

    #[test]
    fn test_spec_and_job_ids() {
        let spec_id = SpecId::new(7);
        let job_id = JobId::new(42);

        assert_eq!(spec_id.value(), 7);
        assert_eq!(job_id.value(), 42);
        assert_eq!(format!("{}", job_id), "42");
    }

    #[test]
    fn test_ids_are_hashable() {
        use std::collections::HashSet;

        let mut task_ids: HashSet<TaskId> = HashSet::new();
        task_ids.insert(TaskId::new("a"));
        task_ids.insert(TaskId::new("b"));
        task_ids.insert(TaskId::new("a")); // duplicate

        assert_eq!(task_ids.len(), 2);
    }

    #[test]
    fn test_task_id_from_str() {
        let id1: TaskId = "multiply".into();
        let id2 = TaskId::new("multiply");
        assert_eq!(id1, id2);
    }
}
