//! Common test utilities shared across integration tests.

use serde_json::Value;
use std::sync::Arc;
use tokio_util::sync::CancellationToken;

use sluice::{
    DagParser, InMemoryStore, PipelineRunner, PipelineSpec, Run, RunnerConfig, TaskRunResults,
    TaskValue,
};

/// Build a runner over a fresh in-memory store.
pub fn test_runner(parser: Arc<dyn DagParser>) -> (PipelineRunner, Arc<InMemoryStore>) {
    let store = Arc::new(InMemoryStore::new());
    let runner = PipelineRunner::new(store.clone(), RunnerConfig::default(), parser);
    (runner, store)
}

/// A spec whose source text is only a label; tests pair it with parsers
/// that build the graph programmatically.
pub fn test_spec(name: &str) -> PipelineSpec {
    PipelineSpec::new(1, 10, name, name)
}

/// Execute a run with a JSON seed input and no caller deadline,
/// panicking on engine-level errors.
pub async fn execute(
    runner: &PipelineRunner,
    spec: PipelineSpec,
    seed: Value,
) -> (Run, TaskRunResults) {
    runner
        .execute_run(
            CancellationToken::new(),
            spec,
            TaskValue::from(seed),
            Value::Null,
        )
        .await
        .expect("pipeline run failed")
}
