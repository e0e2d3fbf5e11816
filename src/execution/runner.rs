//! Pipeline runner.
//!
//! Owns a single run's lifecycle: parse the DAG, prime the per-run
//! resources, stream ready tasks out of the scheduler into detached
//! workers, enforce timeout precedence, trap panics at both the task
//! and the run level, and aggregate the terminal results. Also owns the
//! service lifecycle around the background run reaper.

use std::any::Any;
use std::collections::HashMap;
use std::sync::atomic::{AtomicU8, Ordering};
use std::sync::{Arc, Mutex};
use std::time::{Duration, Instant};

use chrono::Utc;
use thiserror::Error;
use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, warn};

use crate::core::run::{FinalResult, Run, TaskRunResult, TaskRunResults};
use crate::core::spec::PipelineSpec;
use crate::core::task::{Meta, RunContext, SafeTx, Vars};
use crate::core::types::{SpecId, TaskId};
use crate::core::value::{to_hex, TaskError, TaskValue};
use crate::graph::{DagParser, GraphError};
use crate::storage::{PipelineStore, StoreError};

use super::reaper::SleeperWorker;
use super::scheduler::{ReadyTaskRun, Scheduler};

/// Total attempts for a run that panics at the run level.
const NUM_PANIC_RETRIES: u32 = 5;

/// Backoff between run-level panic retries: factor 2, no jitter.
const PANIC_RETRY_BACKOFF_MIN: Duration = Duration::from_millis(100);
const PANIC_RETRY_BACKOFF_MAX: Duration = Duration::from_secs(10);

const STATE_UNSTARTED: u8 = 0;
const STATE_RUNNING: u8 = 1;
const STATE_STOPPED: u8 = 2;

/// Errors surfaced by the runner itself.
///
/// Task-level failures never appear here; they live inside the
/// individual task run results.
#[derive(Debug, Error)]
pub enum RunnerError {
    /// The spec's DAG source failed to parse.
    #[error(transparent)]
    Parse(#[from] GraphError),

    /// Executing a run failed (only parse failures can cause this).
    #[error("executing run for spec {spec_id}: {source}")]
    Execute {
        /// The spec whose run failed.
        spec_id: SpecId,
        /// The underlying failure.
        #[source]
        source: Box<RunnerError>,
    },

    /// Persisting a finished run failed.
    #[error("inserting finished run for spec {spec_id}: {source}")]
    Store {
        /// The spec whose run could not be persisted.
        spec_id: SpecId,
        /// The underlying storage failure.
        #[source]
        source: StoreError,
    },
}

/// Executes pipeline runs and reaps old persisted ones.
///
/// Cheap to clone; all clones share the same stop signal and reaper.
#[derive(Clone)]
pub struct PipelineRunner {
    inner: Arc<RunnerInner>,
}

struct RunnerInner {
    store: Arc<dyn PipelineStore>,
    config: Arc<crate::config::RunnerConfig>,
    parser: Arc<dyn DagParser>,
    stop: CancellationToken,
    state: AtomicU8,
    reaper_loop: Mutex<Option<JoinHandle<()>>>,
    sleeper: Mutex<Option<SleeperWorker>>,
}

impl PipelineRunner {
    /// Create a runner over a store, config and DAG parser.
    pub fn new(
        store: Arc<dyn PipelineStore>,
        config: crate::config::RunnerConfig,
        parser: Arc<dyn DagParser>,
    ) -> Self {
        Self {
            inner: Arc::new(RunnerInner {
                store,
                config: Arc::new(config),
                parser,
                stop: CancellationToken::new(),
                state: AtomicU8::new(STATE_UNSTARTED),
                reaper_loop: Mutex::new(None),
                sleeper: Mutex::new(None),
            }),
        }
    }

    /// Launch the background reaper. Idempotent: only the first call
    /// transitions the service to running.
    pub fn start(&self) {
        if self
            .inner
            .state
            .compare_exchange(
                STATE_UNSTARTED,
                STATE_RUNNING,
                Ordering::SeqCst,
                Ordering::SeqCst,
            )
            .is_err()
        {
            return;
        }

        let sleeper = SleeperWorker::spawn({
            let store = Arc::clone(&self.inner.store);
            let threshold = self.inner.config.reaper_threshold;
            move || {
                let store = Arc::clone(&store);
                async move {
                    if let Err(err) = store.delete_runs_older_than(threshold).await {
                        error!(error = %err, "pipeline run reaper failed");
                    }
                }
            }
        });
        if let Ok(mut guard) = self.inner.sleeper.lock() {
            *guard = Some(sleeper);
        }

        let inner = Arc::clone(&self.inner);
        let handle = tokio::spawn(async move { inner.reaper_loop().await });
        if let Ok(mut guard) = self.inner.reaper_loop.lock() {
            *guard = Some(handle);
        }
    }

    /// Stop the service: cancel the stop signal, wait for the reaper
    /// loop to exit and halt its worker. Idempotent. In-flight runs are
    /// only affected through the stop signal observed by their tasks.
    pub async fn close(&self) {
        if self
            .inner
            .state
            .compare_exchange(
                STATE_RUNNING,
                STATE_STOPPED,
                Ordering::SeqCst,
                Ordering::SeqCst,
            )
            .is_err()
        {
            return;
        }

        self.inner.stop.cancel();

        let handle = self
            .inner
            .reaper_loop
            .lock()
            .ok()
            .and_then(|mut guard| guard.take());
        if let Some(handle) = handle {
            let _ = handle.await;
        }

        let sleeper = self
            .inner
            .sleeper
            .lock()
            .ok()
            .and_then(|mut guard| guard.take());
        if let Some(sleeper) = sleeper {
            sleeper.stop().await;
        }
    }

    /// Execute a new run in memory according to `spec` and return the
    /// results.
    ///
    /// A run-level panic is retried up to five attempts with backoff;
    /// exhaustion yields a synthesized run in which every task carries
    /// [`TaskError::RunPanicked`], with no top-level error. Parse
    /// failures are returned untouched and produce no run.
    pub async fn execute_run(
        &self,
        ctx: CancellationToken,
        spec: PipelineSpec,
        input: TaskValue,
        meta: Meta,
    ) -> Result<(Run, TaskRunResults), RunnerError> {
        let mut backoff = Backoff::new(PANIC_RETRY_BACKOFF_MIN, PANIC_RETRY_BACKOFF_MAX);

        for attempt in 1..=NUM_PANIC_RETRIES {
            let attempt_fut = {
                let runner = self.clone();
                let ctx = ctx.clone();
                let spec = spec.clone();
                let input = input.clone();
                let meta = meta.clone();
                async move { runner.execute_run_once(ctx, spec, input, meta).await }
            };

            match tokio::spawn(attempt_fut).await {
                Ok(outcome) => return outcome,
                Err(err) => {
                    let message = if err.is_panic() {
                        panic_message(err.into_panic())
                    } else {
                        err.to_string()
                    };
                    warn!(
                        attempt,
                        spec_id = %spec.id,
                        panic = %message,
                        "pipeline run panicked"
                    );
                    if attempt < NUM_PANIC_RETRIES {
                        tokio::time::sleep(backoff.duration()).await;
                    }
                }
            }
        }

        self.panicked_run_results(&spec)
    }

    /// Execute a run, then persist it, returning the run id and final
    /// result.
    pub async fn execute_and_insert_finished_run(
        &self,
        ctx: CancellationToken,
        spec: PipelineSpec,
        input: TaskValue,
        meta: Meta,
        save_successful_task_runs: bool,
    ) -> Result<(i64, FinalResult), RunnerError> {
        let spec_id = spec.id;
        let (run, trrs) = self
            .execute_run(ctx, spec, input, meta)
            .await
            .map_err(|source| RunnerError::Execute {
                spec_id,
                source: Box::new(source),
            })?;

        let final_result = trrs.final_result();
        let run_id = self
            .inner
            .store
            .insert_finished_run(&run, &trrs, save_successful_task_runs)
            .await
            .map_err(|source| RunnerError::Store { spec_id, source })?;

        Ok((run_id, final_result))
    }

    /// Persist an already-finished run.
    pub async fn insert_finished_run(
        &self,
        run: &Run,
        trrs: &TaskRunResults,
        save_successful_task_runs: bool,
    ) -> Result<i64, RunnerError> {
        self.inner
            .store
            .insert_finished_run(run, trrs, save_successful_task_runs)
            .await
            .map_err(|source| RunnerError::Store {
                spec_id: run.pipeline_spec_id,
                source,
            })
    }

    /// One attempt at a run. Panics unwind out of the attempt task and
    /// are handled by the retry loop in [`Self::execute_run`].
    async fn execute_run_once(
        &self,
        ctx: CancellationToken,
        spec: PipelineSpec,
        input: TaskValue,
        meta: Meta,
    ) -> Result<(Run, TaskRunResults), RunnerError> {
        debug!(
            job_id = %spec.job_id,
            job_name = %spec.job_name,
            "initiating tasks for pipeline run"
        );

        let start_run = Instant::now();
        let mut run = Run::new(spec.id, Utc::now());

        let graph = Arc::new(self.inner.parser.parse(&spec.dot_dag_source)?);

        let run_ctx = RunContext {
            config: Arc::clone(&self.inner.config),
            tx: SafeTx::new(Arc::clone(&self.inner.store)),
        };
        let vars = Vars::new(HashMap::from([("input".to_string(), input.to_json())]));

        let (scheduler, mut ready_rx, result_tx) =
            Scheduler::new(Arc::clone(&graph), input, vars);
        let scheduler_handle = tokio::spawn(scheduler.run());

        let spec = Arc::new(spec);
        while let Some(ready) = ready_rx.recv().await {
            tokio::spawn(run_task_worker(
                Arc::clone(&spec),
                run_ctx.clone(),
                self.inner.stop.clone(),
                ctx.clone(),
                meta.clone(),
                ready,
                result_tx.clone(),
            ));
        }

        let results = match scheduler_handle.await {
            Ok(results) => results,
            Err(err) if err.is_panic() => std::panic::resume_unwind(err.into_panic()),
            Err(err) => panic!("pipeline scheduler task aborted: {err}"),
        };

        let finish_run = Utc::now();
        let run_time = start_run.elapsed();
        debug!(
            spec_id = %spec.id,
            run_time_ms = run_time.as_millis() as u64,
            "finished all tasks for pipeline run"
        );
        crate::metrics::record_run_completion(&spec, run_time);

        let trrs = TaskRunResults::from(results.into_values().collect::<Vec<_>>());
        let final_result = trrs.final_result();
        if final_result.has_errors() {
            crate::metrics::record_run_errors(&spec);
        }
        run.outputs = final_result.outputs_json();
        run.errors = final_result.error_strings();
        run.finished_at = Some(finish_run);

        Ok((run, trrs))
    }

    /// Synthesize an all-errors run after the panic retries are
    /// exhausted: one result per DAG task, each marked
    /// [`TaskError::RunPanicked`], finished the instant it was created.
    fn panicked_run_results(
        &self,
        spec: &PipelineSpec,
    ) -> Result<(Run, TaskRunResults), RunnerError> {
        let graph = self.inner.parser.parse(&spec.dot_dag_source)?;
        let now = Utc::now();

        let mut trrs = Vec::with_capacity(graph.len());
        for (index, task) in graph.tasks().iter().enumerate() {
            let task_id = TaskId::new(task.dot_id());
            let is_terminal = graph.is_terminal(&task_id);
            trrs.push(TaskRunResult {
                task_id,
                task_type: task.task_type(),
                task_index: index,
                is_terminal,
                output: Err(TaskError::RunPanicked),
                created_at: now,
                finished_at: now,
            });
        }

        let trrs = TaskRunResults::from(trrs);
        let final_result = trrs.final_result();
        let mut run = Run::new(spec.id, now);
        run.outputs = final_result.outputs_json();
        run.errors = final_result.error_strings();
        run.finished_at = Some(now);
        Ok((run, trrs))
    }
}

impl RunnerInner {
    async fn reaper_loop(self: Arc<Self>) {
        let period = self.config.reaper_interval;
        let mut ticker =
            tokio::time::interval_at(tokio::time::Instant::now() + period, period);
        loop {
            tokio::select! {
                _ = self.stop.cancelled() => break,
                _ = ticker.tick() => {
                    if let Ok(guard) = self.sleeper.lock() {
                        if let Some(sleeper) = guard.as_ref() {
                            sleeper.wake();
                        }
                    }
                }
            }
        }
    }
}

/// One detached worker per ready task. The task body runs in a nested
/// spawn so a panic is confined to it; the worker always posts exactly
/// one result back to the scheduler.
async fn run_task_worker(
    spec: Arc<PipelineSpec>,
    run_ctx: RunContext,
    stop: CancellationToken,
    caller: CancellationToken,
    meta: Meta,
    ready: ReadyTaskRun,
    result_tx: mpsc::UnboundedSender<TaskRunResult>,
) {
    let created_at = Utc::now();
    let task_id = TaskId::new(ready.task.dot_id());
    let task_type = ready.task.task_type();
    let task_index = ready.task_index;
    let is_terminal = ready.is_terminal;

    let exec = tokio::spawn(execute_task_run(
        Arc::clone(&spec),
        run_ctx,
        stop,
        caller,
        meta,
        ready,
        created_at,
    ));

    let trr = match exec.await {
        Ok(trr) => trr,
        Err(err) => {
            let message = if err.is_panic() {
                panic_message(err.into_panic())
            } else {
                err.to_string()
            };
            error!(
                task_name = %task_id,
                panic = %message,
                "worker panicked executing task"
            );
            TaskRunResult {
                task_id,
                task_type,
                task_index,
                is_terminal,
                output: Err(TaskError::Panicked(message)),
                created_at,
                finished_at: Utc::now(),
            }
        }
    };

    crate::metrics::record_task_run(&spec, &trr);
    let _ = result_tx.send(trr);
}

/// Execute one task under its effective deadline.
///
/// Timeout precedence: the task's own declared timeout, else the
/// spec-wide maximum task duration, else the caller's context alone.
/// Whatever is chosen is composed with the runner's stop signal.
async fn execute_task_run(
    spec: Arc<PipelineSpec>,
    run_ctx: RunContext,
    stop: CancellationToken,
    caller: CancellationToken,
    meta: Meta,
    ready: ReadyTaskRun,
    created_at: chrono::DateTime<Utc>,
) -> TaskRunResult {
    let task = Arc::clone(&ready.task);
    let inputs = ready.inputs_sorted();

    let deadline = task
        .task_timeout()
        .or_else(|| spec.max_task_duration.filter(|d| *d > Duration::ZERO));

    let output = {
        let fut = task.run(&run_ctx, &ready.vars, &meta, &inputs);
        tokio::select! {
            _ = stop.cancelled() => Err(TaskError::Cancelled),
            _ = caller.cancelled() => Err(TaskError::Cancelled),
            output = async {
                match deadline {
                    Some(limit) => match tokio::time::timeout(limit, fut).await {
                        Ok(output) => output,
                        Err(_) => Err(TaskError::Timeout(limit)),
                    },
                    None => fut.await,
                }
            } => output,
        }
    };

    match &output {
        Ok(TaskValue::Bytes(bytes)) => debug!(
            task_name = %task.dot_id(),
            result_string = %String::from_utf8_lossy(bytes),
            result_hex = %to_hex(bytes),
            "pipeline task completed"
        ),
        Ok(value) => debug!(
            task_name = %task.dot_id(),
            result_value = %value,
            "pipeline task completed"
        ),
        Err(err) => debug!(
            task_name = %task.dot_id(),
            result_error = %err,
            "pipeline task completed"
        ),
    }

    TaskRunResult {
        task_id: TaskId::new(task.dot_id()),
        task_type: task.task_type(),
        task_index: ready.task_index,
        is_terminal: ready.is_terminal,
        output,
        created_at,
        finished_at: Utc::now(),
    }
}

/// Exponential backoff between run-level panic retries.
struct Backoff {
    next: Duration,
    max: Duration,
}

impl Backoff {
    fn new(min: Duration, max: Duration) -> Self {
        Self { next: min, max }
    }

    fn duration(&mut self) -> Duration {
        let current = self.next;
        self.next = (self.next * 2).min(self.max);
        current
    }
}

/// Best-effort rendering of a panic payload.
fn panic_message(payload: Box<dyn Any + Send>) -> String {
    if let Some(message) = payload.downcast_ref::<&'static str>() {
        (*message).to_string()
    } else if let Some(message) = payload.downcast_ref::<String>() {
        message.clone()
    } else {
        "unknown panic payload".to_string()
    }
}
