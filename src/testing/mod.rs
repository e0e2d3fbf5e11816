//! Testing utilities for embedders of the engine.
//!
//! Provides deterministic task implementations (arithmetic, failing,
//! panicking, sleeping), parser stand-ins for the DAG syntax seam and
//! instrumented stores, so pipelines can be exercised without any real
//! task types or database.

use async_trait::async_trait;
use serde_json::{json, Value};
use std::sync::atomic::{AtomicU32, AtomicU64, Ordering};
use std::sync::Mutex;
use std::time::Duration;

use crate::core::task::{Meta, RunContext, Task, TaskType, Vars};
use crate::core::value::{TaskError, TaskOutput, TaskValue};
use crate::graph::{DagParser, GraphError, Pipeline};
use crate::storage::{PipelineStore, StoreError};
use crate::{Run, TaskRunResults};

/// Extract an integer from a task output, or explain why not.
pub fn as_i64(output: &TaskOutput) -> Result<i64, TaskError> {
    match output {
        Ok(TaskValue::Json(value)) => value
            .as_i64()
            .ok_or_else(|| TaskError::InvalidInput(format!("not an integer: {value}"))),
        Ok(TaskValue::Bytes(_)) => {
            Err(TaskError::InvalidInput("unexpected byte input".to_string()))
        }
        Err(err) => Err(err.clone()),
    }
}

/// First upstream error among the inputs, if any. The short-circuit
/// policy shared by all helper tasks.
pub fn first_error(inputs: &[TaskOutput]) -> Option<TaskError> {
    inputs.iter().find_map(|input| input.as_ref().err().cloned())
}

/// Emits a fixed value, ignoring its inputs (but short-circuiting on
/// upstream errors).
pub struct ConstTask {
    id: String,
    value: Value,
}

impl ConstTask {
    /// Create a task that always emits `value`.
    pub fn new(id: &str, value: Value) -> Self {
        Self {
            id: id.to_string(),
            value,
        }
    }
}

#[async_trait]
impl Task for ConstTask {
    fn task_type(&self) -> TaskType {
        TaskType::Any
    }

    fn dot_id(&self) -> &str {
        &self.id
    }

    async fn run(
        &self,
        _ctx: &RunContext,
        _vars: &Vars,
        _meta: &Meta,
        inputs: &[TaskOutput],
    ) -> TaskOutput {
        if let Some(err) = first_error(inputs) {
            return Err(err);
        }
        Ok(TaskValue::Json(self.value.clone()))
    }
}

/// Adds a constant to its first input.
pub struct AddTask {
    id: String,
    amount: i64,
}

impl AddTask {
    /// Create a task adding `amount` to its first input.
    pub fn new(id: &str, amount: i64) -> Self {
        Self {
            id: id.to_string(),
            amount,
        }
    }
}

#[async_trait]
impl Task for AddTask {
    fn task_type(&self) -> TaskType {
        TaskType::Any
    }

    fn dot_id(&self) -> &str {
        &self.id
    }

    async fn run(
        &self,
        _ctx: &RunContext,
        _vars: &Vars,
        _meta: &Meta,
        inputs: &[TaskOutput],
    ) -> TaskOutput {
        if let Some(err) = first_error(inputs) {
            return Err(err);
        }
        let first = inputs
            .first()
            .ok_or_else(|| TaskError::InvalidInput("no inputs".to_string()))?;
        let n = as_i64(first)?;
        Ok(TaskValue::Json(json!(n + self.amount)))
    }
}

/// Multiplies its first input by a constant.
pub struct MultiplyTask {
    id: String,
    factor: i64,
}

impl MultiplyTask {
    /// Create a task multiplying its first input by `factor`.
    pub fn new(id: &str, factor: i64) -> Self {
        Self {
            id: id.to_string(),
            factor,
        }
    }
}

#[async_trait]
impl Task for MultiplyTask {
    fn task_type(&self) -> TaskType {
        TaskType::Multiply
    }

    fn dot_id(&self) -> &str {
        &self.id
    }

    async fn run(
        &self,
        _ctx: &RunContext,
        _vars: &Vars,
        _meta: &Meta,
        inputs: &[TaskOutput],
    ) -> TaskOutput {
        if let Some(err) = first_error(inputs) {
            return Err(err);
        }
        let first = inputs
            .first()
            .ok_or_else(|| TaskError::InvalidInput("no inputs".to_string()))?;
        let n = as_i64(first)?;
        Ok(TaskValue::Json(json!(n * self.factor)))
    }
}

/// Subtracts its second input from its first. Position-sensitive by
/// construction: input order is the declared edge order.
pub struct SubtractTask {
    id: String,
}

impl SubtractTask {
    /// Create a subtract task.
    pub fn new(id: &str) -> Self {
        Self { id: id.to_string() }
    }
}

#[async_trait]
impl Task for SubtractTask {
    fn task_type(&self) -> TaskType {
        TaskType::Any
    }

    fn dot_id(&self) -> &str {
        &self.id
    }

    async fn run(
        &self,
        _ctx: &RunContext,
        _vars: &Vars,
        _meta: &Meta,
        inputs: &[TaskOutput],
    ) -> TaskOutput {
        if let Some(err) = first_error(inputs) {
            return Err(err);
        }
        if inputs.len() != 2 {
            return Err(TaskError::InvalidInput(format!(
                "expected 2 inputs, got {}",
                inputs.len()
            )));
        }
        let minuend = as_i64(&inputs[0])?;
        let subtrahend = as_i64(&inputs[1])?;
        Ok(TaskValue::Json(json!(minuend - subtrahend)))
    }
}

/// Always fails with the given message.
pub struct FailingTask {
    id: String,
    message: String,
}

impl FailingTask {
    /// Create a task that fails with `message`.
    pub fn new(id: &str, message: &str) -> Self {
        Self {
            id: id.to_string(),
            message: message.to_string(),
        }
    }
}

#[async_trait]
impl Task for FailingTask {
    fn task_type(&self) -> TaskType {
        TaskType::Any
    }

    fn dot_id(&self) -> &str {
        &self.id
    }

    async fn run(
        &self,
        _ctx: &RunContext,
        _vars: &Vars,
        _meta: &Meta,
        _inputs: &[TaskOutput],
    ) -> TaskOutput {
        Err(TaskError::ExecutionFailed(self.message.clone()))
    }
}

/// Panics when run.
pub struct PanickingTask {
    id: String,
    message: String,
}

impl PanickingTask {
    /// Create a task that panics with `message`.
    pub fn new(id: &str, message: &str) -> Self {
        Self {
            id: id.to_string(),
            message: message.to_string(),
        }
    }
}

#[async_trait]
impl Task for PanickingTask {
    fn task_type(&self) -> TaskType {
        TaskType::Any
    }

    fn dot_id(&self) -> &str {
        &self.id
    }

    async fn run(
        &self,
        _ctx: &RunContext,
        _vars: &Vars,
        _meta: &Meta,
        _inputs: &[TaskOutput],
    ) -> TaskOutput {
        panic!("{}", self.message);
    }
}

/// Sleeps for a fixed duration, then echoes its first input (or null).
/// Optionally declares its own task timeout.
pub struct SleepingTask {
    id: String,
    sleep_for: Duration,
    timeout: Option<Duration>,
}

impl SleepingTask {
    /// Create a task sleeping for `sleep_for`.
    pub fn new(id: &str, sleep_for: Duration) -> Self {
        Self {
            id: id.to_string(),
            sleep_for,
            timeout: None,
        }
    }

    /// Declare the task's own timeout.
    pub fn with_timeout(mut self, timeout: Duration) -> Self {
        self.timeout = Some(timeout);
        self
    }
}

#[async_trait]
impl Task for SleepingTask {
    fn task_type(&self) -> TaskType {
        TaskType::Any
    }

    fn dot_id(&self) -> &str {
        &self.id
    }

    fn task_timeout(&self) -> Option<Duration> {
        self.timeout
    }

    async fn run(
        &self,
        _ctx: &RunContext,
        _vars: &Vars,
        _meta: &Meta,
        inputs: &[TaskOutput],
    ) -> TaskOutput {
        tokio::time::sleep(self.sleep_for).await;
        match inputs.first() {
            Some(input) => input.clone(),
            None => Ok(TaskValue::Json(Value::Null)),
        }
    }
}

/// A parser that ignores the source text and builds the pipeline from
/// a closure. Stands in for the external DAG syntax in tests.
pub struct StaticParser<F> {
    build: F,
}

impl<F> StaticParser<F>
where
    F: Fn() -> Result<Pipeline, GraphError> + Send + Sync,
{
    /// Create a parser producing pipelines from `build`.
    pub fn new(build: F) -> Self {
        Self { build }
    }
}

impl<F> DagParser for StaticParser<F>
where
    F: Fn() -> Result<Pipeline, GraphError> + Send + Sync,
{
    fn parse(&self, _source: &str) -> Result<Pipeline, GraphError> {
        (self.build)()
    }
}

/// Convenience constructor boxing a [`StaticParser`].
pub fn static_parser<F>(build: F) -> std::sync::Arc<dyn DagParser>
where
    F: Fn() -> Result<Pipeline, GraphError> + Send + Sync + 'static,
{
    std::sync::Arc::new(StaticParser::new(build))
}

/// A parser that panics for its first `panics` calls, then delegates to
/// the builder closure. Used to exercise the run-level panic retries.
pub struct PanickingParser<F> {
    remaining: AtomicU32,
    served: AtomicU32,
    build: F,
}

impl<F> PanickingParser<F>
where
    F: Fn() -> Result<Pipeline, GraphError> + Send + Sync,
{
    /// Create a parser that panics `panics` times before recovering.
    pub fn new(panics: u32, build: F) -> Self {
        Self {
            remaining: AtomicU32::new(panics),
            served: AtomicU32::new(0),
            build,
        }
    }

    /// How many panics have been served so far.
    pub fn panics_served(&self) -> u32 {
        self.served.load(Ordering::SeqCst)
    }
}

impl<F> DagParser for PanickingParser<F>
where
    F: Fn() -> Result<Pipeline, GraphError> + Send + Sync,
{
    fn parse(&self, _source: &str) -> Result<Pipeline, GraphError> {
        if self
            .remaining
            .fetch_update(Ordering::SeqCst, Ordering::SeqCst, |n| n.checked_sub(1))
            .is_ok()
        {
            self.served.fetch_add(1, Ordering::SeqCst);
            panic!("injected parse panic");
        }
        (self.build)()
    }
}

/// A store that records calls instead of persisting anything.
pub struct CountingStore {
    inserts: AtomicU64,
    deletes: AtomicU64,
    next_id: AtomicU64,
    last_threshold: Mutex<Option<Duration>>,
    fail_inserts: bool,
}

impl CountingStore {
    /// Create a store that accepts every call.
    pub fn new() -> Self {
        Self {
            inserts: AtomicU64::new(0),
            deletes: AtomicU64::new(0),
            next_id: AtomicU64::new(1),
            last_threshold: Mutex::new(None),
            fail_inserts: false,
        }
    }

    /// Create a store whose inserts fail.
    pub fn failing_inserts() -> Self {
        Self {
            fail_inserts: true,
            ..Self::new()
        }
    }

    /// Number of insert calls observed.
    pub fn insert_calls(&self) -> u64 {
        self.inserts.load(Ordering::SeqCst)
    }

    /// Number of delete calls observed.
    pub fn delete_calls(&self) -> u64 {
        self.deletes.load(Ordering::SeqCst)
    }

    /// Threshold passed to the most recent delete call.
    pub fn last_threshold(&self) -> Option<Duration> {
        self.last_threshold.lock().ok().and_then(|guard| *guard)
    }
}

impl Default for CountingStore {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl PipelineStore for CountingStore {
    async fn insert_finished_run(
        &self,
        _run: &Run,
        _trrs: &TaskRunResults,
        _save_successful_task_runs: bool,
    ) -> Result<i64, StoreError> {
        self.inserts.fetch_add(1, Ordering::SeqCst);
        if self.fail_inserts {
            return Err(StoreError::Database("insert rejected".to_string()));
        }
        Ok(self.next_id.fetch_add(1, Ordering::SeqCst) as i64)
    }

    async fn delete_runs_older_than(&self, threshold: Duration) -> Result<u64, StoreError> {
        self.deletes.fetch_add(1, Ordering::SeqCst);
        if let Ok(mut guard) = self.last_threshold.lock() {
            *guard = Some(threshold);
        }
        Ok(0)
    }
}
