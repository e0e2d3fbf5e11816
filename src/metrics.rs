//! Pipeline metrics.
//!
//! Metric names and labels are a stable external contract; the exporter
//! is the embedder's concern.

use std::time::Duration;

use crate::core::run::TaskRunResult;
use crate::core::spec::PipelineSpec;

/// Record a single task run: execution time gauge plus the finished
/// counter labeled by completion status.
pub(crate) fn record_task_run(spec: &PipelineSpec, trr: &TaskRunResult) {
    ::metrics::gauge!(
        "pipeline_task_execution_time",
        "job_id" => spec.job_id.to_string(),
        "job_name" => spec.job_name.clone(),
        "task_type" => trr.task_type.to_string()
    )
    .set(trr.duration().as_secs_f64());

    let status = if trr.has_error() { "error" } else { "completed" };
    ::metrics::counter!(
        "pipeline_tasks_total_finished",
        "job_id" => spec.job_id.to_string(),
        "job_name" => spec.job_name.clone(),
        "task_type" => trr.task_type.to_string(),
        "status" => status
    )
    .increment(1);
}

/// Record the wall-clock duration of a completed run.
pub(crate) fn record_run_completion(spec: &PipelineSpec, run_time: Duration) {
    ::metrics::gauge!(
        "pipeline_run_total_time_to_completion",
        "job_id" => spec.job_id.to_string(),
        "job_name" => spec.job_name.clone()
    )
    .set(run_time.as_secs_f64());
}

/// Count a run whose final result carried errors.
pub(crate) fn record_run_errors(spec: &PipelineSpec) {
    ::metrics::counter!(
        "pipeline_run_errors",
        "job_id" => spec.job_id.to_string(),
        "job_name" => spec.job_name.clone()
    )
    .increment(1);
}
