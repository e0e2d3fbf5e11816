//! Pipeline spec: the immutable input to a run.

use std::time::Duration;

use crate::core::types::{JobId, SpecId};

/// Immutable description of a pipeline, handed to the runner per run.
///
/// `job_id` and `job_name` are expected to be set for logging and
/// telemetry labels.
#[derive(Debug, Clone)]
pub struct PipelineSpec {
    /// Unique identifier of this pipeline spec.
    pub id: SpecId,
    /// Identifier of the owning job.
    pub job_id: JobId,
    /// Name of the owning job.
    pub job_name: String,
    /// Source text the DAG is parsed from.
    pub dot_dag_source: String,
    /// Run-wide maximum duration applied to tasks that do not declare
    /// their own timeout.
    pub max_task_duration: Option<Duration>,
}

impl PipelineSpec {
    /// Create a spec with no run-wide task duration limit.
    pub fn new(
        id: impl Into<SpecId>,
        job_id: impl Into<JobId>,
        job_name: impl Into<String>,
        dot_dag_source: impl Into<String>,
    ) -> Self {
        Self {
            id: id.into(),
            job_id: job_id.into(),
            job_name: job_name.into(),
            dot_dag_source: dot_dag_source.into(),
            max_task_duration: None,
        }
    }

    /// Set the run-wide maximum task duration.
    pub fn with_max_task_duration(mut self, limit: Duration) -> Self {
        self.max_task_duration = Some(limit);
        self
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_spec_creation() {
        let spec = PipelineSpec::new(1, 10, "price-feed", "a -> b");

        assert_eq!(spec.id.value(), 1);
        assert_eq!(spec.job_id.value(), 10);
        assert_eq!(spec.job_name, "price-feed");
        assert_eq!(spec.dot_dag_source, "a -> b");
        assert!(spec.max_task_duration.is_none());
    }

    #[test]
    fn test_spec_with_max_task_duration() {
        let spec = PipelineSpec::new(1, 10, "price-feed", "a -> b")
            .with_max_task_duration(Duration::from_secs(30));

        assert_eq!(spec.max_task_duration, Some(Duration::from_secs(30)));
    }
}
