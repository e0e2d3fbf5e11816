//! Task contract and the per-run resources handed to each invocation.
//!
//! The `Task` trait is the unit of work in a pipeline. Implementations
//! live outside the engine; the engine only knows the closed set of
//! type tags, the dot-id, the optional per-task timeout and the `run`
//! entry point.

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::collections::HashMap;
use std::fmt;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::Mutex;

use crate::config::RunnerConfig;
use crate::core::value::TaskOutput;
use crate::storage::PipelineStore;

/// Closed set of task type tags.
///
/// The engine treats these opaquely except for telemetry labels; task
/// behavior is defined entirely by the [`Task`] implementation.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum TaskType {
    /// Fetches data over HTTP.
    Http,
    /// Calls out to an external bridge, persisting through the store.
    Bridge,
    /// Parses a JSON document path out of its input.
    JsonParse,
    /// Takes the median of its numeric inputs.
    Median,
    /// Multiplies its input by a constant.
    Multiply,
    /// Catch-all for task types the engine has no special knowledge of.
    Any,
}

impl fmt::Display for TaskType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let tag = match self {
            TaskType::Http => "http",
            TaskType::Bridge => "bridge",
            TaskType::JsonParse => "jsonparse",
            TaskType::Median => "median",
            TaskType::Multiply => "multiply",
            TaskType::Any => "any",
        };
        write!(f, "{}", tag)
    }
}

/// Opaque metadata carried verbatim from the run caller to every task.
pub type Meta = Value;

/// Shared read-only variable bag available to every task of a run.
///
/// The runner seeds it with the pipeline input under the `"input"` key.
#[derive(Debug, Clone, Default)]
pub struct Vars {
    values: Arc<HashMap<String, Value>>,
}

impl Vars {
    /// Create a variable bag from a map.
    pub fn new(values: HashMap<String, Value>) -> Self {
        Self {
            values: Arc::new(values),
        }
    }

    /// Look up a variable by name.
    pub fn get(&self, key: &str) -> Option<&Value> {
        self.values.get(key)
    }

    /// Whether the bag contains a variable.
    pub fn contains(&self, key: &str) -> bool {
        self.values.contains_key(key)
    }
}

/// Store handle shared by the bridge tasks of a single run.
///
/// The mutex serializes their transactions: at most one bridge task of
/// a given run may hold a transaction at a time.
#[derive(Clone)]
pub struct SafeTx {
    store: Arc<dyn PipelineStore>,
    lock: Arc<Mutex<()>>,
}

impl SafeTx {
    /// Create a fresh per-run handle over the store.
    pub fn new(store: Arc<dyn PipelineStore>) -> Self {
        Self {
            store,
            lock: Arc::new(Mutex::new(())),
        }
    }

    /// The underlying store.
    pub fn store(&self) -> &Arc<dyn PipelineStore> {
        &self.store
    }

    /// Acquire the run-wide transaction lock, returning the store for
    /// the duration of the guard.
    pub async fn lock(&self) -> (tokio::sync::MutexGuard<'_, ()>, &Arc<dyn PipelineStore>) {
        (self.lock.lock().await, &self.store)
    }
}

impl fmt::Debug for SafeTx {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("SafeTx").finish_non_exhaustive()
    }
}

/// Runner-scoped resources handed to every task invocation of a run.
///
/// Built once per run, before any worker is spawned; read-only from the
/// worker pool's point of view.
#[derive(Debug, Clone)]
pub struct RunContext {
    /// Runner configuration (HTTP timeouts and the like).
    pub config: Arc<RunnerConfig>,
    /// Transactional store handle shared across the run's bridge tasks.
    pub tx: SafeTx,
}

/// The core trait for executable pipeline tasks.
///
/// # Example
///
/// ```ignore
/// use sluice::{Meta, RunContext, Task, TaskOutput, TaskType, Vars};
/// use async_trait::async_trait;
///
/// struct DoubleTask {
///     id: String,
/// }
///
/// #[async_trait]
/// impl Task for DoubleTask {
///     fn task_type(&self) -> TaskType {
///         TaskType::Multiply
///     }
///
///     fn dot_id(&self) -> &str {
///         &self.id
///     }
///
///     async fn run(
///         &self,
///         _ctx: &RunContext,
///         _vars: &Vars,
///         _meta: &Meta,
///         inputs: &[TaskOutput],
///     ) -> TaskOutput {
///         let n = inputs[0].clone()?;
///         // ...
///         Ok(n)
///     }
/// }
/// ```
#[async_trait]
pub trait Task: Send + Sync {
    /// The task's type tag.
    fn task_type(&self) -> TaskType;

    /// The task's stable textual identifier within its pipeline.
    fn dot_id(&self) -> &str;

    /// The task's own declared timeout, if any. Takes precedence over
    /// the spec-wide maximum task duration.
    fn task_timeout(&self) -> Option<Duration> {
        None
    }

    /// Execute the task.
    ///
    /// `inputs` holds one entry per incoming edge, ordered by edge
    /// index. Entries may carry upstream errors; tasks decide their own
    /// propagation policy (the typical one is to return the first
    /// upstream error unchanged without running the body).
    async fn run(
        &self,
        ctx: &RunContext,
        vars: &Vars,
        meta: &Meta,
        inputs: &[TaskOutput],
    ) -> TaskOutput;
}
