//! Per-run records: task run results, the aggregated final result and
//! the persistable run header.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::time::Duration;

use crate::core::task::TaskType;
use crate::core::types::{SpecId, TaskId};
use crate::core::value::{TaskError, TaskOutput, TaskValue};

/// Result of executing one task within a run.
///
/// Created when the task's worker begins, finalized when the worker
/// posts back to the scheduler. Exactly one exists per task in the DAG,
/// panicked runs included.
#[derive(Debug, Clone)]
pub struct TaskRunResult {
    /// The executed task's dot-id.
    pub task_id: TaskId,
    /// The executed task's type tag.
    pub task_type: TaskType,
    /// Position of the task in the pipeline's task enumeration.
    pub task_index: usize,
    /// Whether the task has no successors and so contributes to the
    /// final result.
    pub is_terminal: bool,
    /// The task's value-or-error output.
    pub output: TaskOutput,
    /// When the worker started.
    pub created_at: DateTime<Utc>,
    /// When the result was finalized.
    pub finished_at: DateTime<Utc>,
}

impl TaskRunResult {
    /// Wall-clock duration of the task run.
    pub fn duration(&self) -> Duration {
        (self.finished_at - self.created_at)
            .to_std()
            .unwrap_or_default()
    }

    /// Whether the output carries an error.
    pub fn has_error(&self) -> bool {
        self.output.is_err()
    }
}

/// All task run results of one run, in unspecified order.
#[derive(Debug, Clone, Default)]
pub struct TaskRunResults(Vec<TaskRunResult>);

impl TaskRunResults {
    /// Number of task run results.
    pub fn len(&self) -> usize {
        self.0.len()
    }

    /// Whether there are no results.
    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }

    /// Iterate over the results.
    pub fn iter(&self) -> std::slice::Iter<'_, TaskRunResult> {
        self.0.iter()
    }

    /// Look up the result for a task.
    pub fn get(&self, task_id: &TaskId) -> Option<&TaskRunResult> {
        self.0.iter().find(|trr| &trr.task_id == task_id)
    }

    /// Aggregate the terminal tasks' outputs into a final result.
    ///
    /// Outputs and errors are index-aligned, ordered by the terminal
    /// tasks' position in the pipeline's task enumeration rather than
    /// by completion order.
    pub fn final_result(&self) -> FinalResult {
        let mut terminals: Vec<&TaskRunResult> =
            self.0.iter().filter(|trr| trr.is_terminal).collect();
        terminals.sort_by_key(|trr| trr.task_index);

        let mut outputs = Vec::with_capacity(terminals.len());
        let mut errors = Vec::with_capacity(terminals.len());
        for trr in terminals {
            match &trr.output {
                Ok(value) => {
                    outputs.push(Some(value.clone()));
                    errors.push(None);
                }
                Err(err) => {
                    outputs.push(None);
                    errors.push(Some(err.clone()));
                }
            }
        }

        FinalResult { outputs, errors }
    }
}

impl From<Vec<TaskRunResult>> for TaskRunResults {
    fn from(trrs: Vec<TaskRunResult>) -> Self {
        Self(trrs)
    }
}

impl IntoIterator for TaskRunResults {
    type Item = TaskRunResult;
    type IntoIter = std::vec::IntoIter<TaskRunResult>;

    fn into_iter(self) -> Self::IntoIter {
        self.0.into_iter()
    }
}

impl<'a> IntoIterator for &'a TaskRunResults {
    type Item = &'a TaskRunResult;
    type IntoIter = std::slice::Iter<'a, TaskRunResult>;

    fn into_iter(self) -> Self::IntoIter {
        self.0.iter()
    }
}

/// The value/error sequences aggregated from a run's terminal tasks.
#[derive(Debug, Clone, Default)]
pub struct FinalResult {
    /// Terminal task values; `None` where the task errored.
    pub outputs: Vec<Option<TaskValue>>,
    /// Terminal task errors, position-aligned with `outputs`.
    pub errors: Vec<Option<TaskError>>,
}

impl FinalResult {
    /// Whether any terminal task errored.
    pub fn has_errors(&self) -> bool {
        self.errors.iter().any(Option::is_some)
    }

    /// Serialized outputs for the run header.
    pub fn outputs_json(&self) -> Vec<Option<Value>> {
        self.outputs
            .iter()
            .map(|o| o.as_ref().map(TaskValue::to_json))
            .collect()
    }

    /// Stringified errors for the run header.
    pub fn error_strings(&self) -> Vec<Option<String>> {
        self.errors
            .iter()
            .map(|e| e.as_ref().map(ToString::to_string))
            .collect()
    }
}

/// One end-to-end evaluation of a pipeline, in its persistable form.
///
/// Lives only for the duration of the call that produced it; persisting
/// it is a separate, optional step.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Run {
    /// The spec this run evaluated.
    pub pipeline_spec_id: SpecId,
    /// When the run started.
    pub created_at: DateTime<Utc>,
    /// When the run finished, if it has.
    pub finished_at: Option<DateTime<Utc>>,
    /// Serialized terminal outputs, index-aligned with `errors`.
    pub outputs: Vec<Option<Value>>,
    /// Terminal error messages, index-aligned with `outputs`.
    pub errors: Vec<Option<String>>,
}

impl Run {
    /// Create an empty run bound to a spec and start time.
    pub fn new(pipeline_spec_id: SpecId, created_at: DateTime<Utc>) -> Self {
        Self {
            pipeline_spec_id,
            created_at,
            finished_at: None,
            outputs: Vec::new(),
            errors: Vec::new(),
        }
    }

    /// Whether any terminal error was recorded.
    pub fn has_errors(&self) -> bool {
        self.errors.iter().any(Option::is_some)
    }
}
