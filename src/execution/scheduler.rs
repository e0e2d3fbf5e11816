//! DAG scheduler.
//!
//! The scheduler walks a parsed pipeline in dependency order. It emits
//! each task exactly once on the ready channel — only after every
//! predecessor has posted a result — and absorbs completed results on
//! the result channel, unblocking successors as they arrive. The ready
//! channel closes once every task has both been emitted and reported.
//!
//! Errored results are not a scheduling failure: successors still run
//! and receive the error-bearing output as an input.

use std::collections::HashMap;
use std::sync::Arc;
use tokio::sync::mpsc;
use tracing::debug;

use crate::core::run::TaskRunResult;
use crate::core::task::{Task, Vars};
use crate::core::types::TaskId;
use crate::core::value::{TaskOutput, TaskValue};
use crate::graph::Pipeline;

/// One input of a scheduled task, tagged with its edge index.
#[derive(Debug, Clone)]
pub(crate) struct ScheduledInput {
    /// The predecessor's output (or the run's seed input).
    pub output: TaskOutput,
    /// Position among the consuming task's declared inputs.
    pub index: u32,
}

/// A task whose predecessors have all reported, ready for dispatch.
pub(crate) struct ReadyTaskRun {
    /// The task to execute.
    pub task: Arc<dyn Task>,
    /// Position of the task in the pipeline's task enumeration.
    pub task_index: usize,
    /// Whether the task contributes to the final result.
    pub is_terminal: bool,
    /// Collected inputs, one per incoming edge, in arrival order.
    pub inputs: Vec<ScheduledInput>,
    /// The run's shared variable bag.
    pub vars: Vars,
}

impl ReadyTaskRun {
    /// The inputs ordered by edge index, regardless of the order the
    /// predecessors completed in.
    pub fn inputs_sorted(&self) -> Vec<TaskOutput> {
        let mut inputs: Vec<&ScheduledInput> = self.inputs.iter().collect();
        inputs.sort_by_key(|input| input.index);
        inputs.into_iter().map(|input| input.output.clone()).collect()
    }
}

/// Walks one pipeline graph to completion.
pub(crate) struct Scheduler {
    graph: Arc<Pipeline>,
    vars: Vars,
    /// Remaining predecessor count per task.
    pending: HashMap<TaskId, usize>,
    /// Inputs collected so far per task.
    buffered: HashMap<TaskId, Vec<ScheduledInput>>,
    /// Tasks whose predecessors have all reported, not yet emitted.
    ready: Vec<TaskId>,
    ready_tx: mpsc::UnboundedSender<ReadyTaskRun>,
    result_rx: mpsc::UnboundedReceiver<TaskRunResult>,
}

impl Scheduler {
    /// Build a scheduler over `graph`, seeding every task without
    /// predecessors with `seed` at input index 0.
    ///
    /// Returns the scheduler plus the runner's ends of the two
    /// channels: ready descriptors out, task run results back in.
    pub fn new(
        graph: Arc<Pipeline>,
        seed: TaskValue,
        vars: Vars,
    ) -> (
        Self,
        mpsc::UnboundedReceiver<ReadyTaskRun>,
        mpsc::UnboundedSender<TaskRunResult>,
    ) {
        let (ready_tx, ready_rx) = mpsc::unbounded_channel();
        let (result_tx, result_rx) = mpsc::unbounded_channel();

        let mut pending = HashMap::with_capacity(graph.len());
        let mut buffered: HashMap<TaskId, Vec<ScheduledInput>> =
            HashMap::with_capacity(graph.len());
        let mut ready = Vec::new();

        for id in graph.task_ids() {
            let in_degree = graph.in_degree(id);
            pending.insert(id.clone(), in_degree);
            let mut inputs = Vec::new();
            if in_degree == 0 {
                inputs.push(ScheduledInput {
                    output: Ok(seed.clone()),
                    index: 0,
                });
                ready.push(id.clone());
            }
            buffered.insert(id.clone(), inputs);
        }

        let scheduler = Self {
            graph,
            vars,
            pending,
            buffered,
            ready,
            ready_tx,
            result_rx,
        };
        (scheduler, ready_rx, result_tx)
    }

    /// Drive the traversal to completion and return one result per
    /// task. The ready channel closes when this returns.
    pub async fn run(mut self) -> HashMap<TaskId, TaskRunResult> {
        let total = self.graph.len();
        let mut results = HashMap::with_capacity(total);

        loop {
            for id in std::mem::take(&mut self.ready) {
                let task = self
                    .graph
                    .task(&id)
                    .cloned()
                    .expect("ready task is in the graph");
                let run = ReadyTaskRun {
                    task,
                    task_index: self.graph.task_index(&id).unwrap_or_default(),
                    is_terminal: self.graph.is_terminal(&id),
                    inputs: self.buffered.remove(&id).unwrap_or_default(),
                    vars: self.vars.clone(),
                };
                if self.ready_tx.send(run).is_err() {
                    // The runner went away; nothing left to drive.
                    return results;
                }
            }

            if results.len() == total {
                break;
            }

            let Some(result) = self.result_rx.recv().await else {
                break;
            };
            debug!(task = %result.task_id, error = result.has_error(), "task reported");

            for edge in self.graph.successors_of(&result.task_id) {
                if let Some(inputs) = self.buffered.get_mut(&edge.to) {
                    inputs.push(ScheduledInput {
                        output: result.output.clone(),
                        index: edge.index,
                    });
                }
                if let Some(remaining) = self.pending.get_mut(&edge.to) {
                    *remaining -= 1;
                    if *remaining == 0 {
                        self.ready.push(edge.to.clone());
                    }
                }
            }
            results.insert(result.task_id.clone(), result);
        }

        results
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::core::task::{Meta, RunContext, TaskType};
    use crate::core::value::TaskError;
    use crate::graph::PipelineBuilder;
    use async_trait::async_trait;
    use chrono::Utc;
    use serde_json::json;

    struct NoOpTask {
        id: String,
    }

    impl NoOpTask {
        fn new(id: &str) -> Arc<dyn Task> {
            Arc::new(Self { id: id.to_string() })
        }
    }

    #[async_trait]
    impl Task for NoOpTask {
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
            Ok(TaskValue::Json(json!(null)))
        }
    }

    fn result_for(ready: &ReadyTaskRun, output: TaskOutput) -> TaskRunResult {
        let now = Utc::now();
        TaskRunResult {
            task_id: TaskId::new(ready.task.dot_id()),
            task_type: ready.task.task_type(),
            task_index: ready.task_index,
            is_terminal: ready.is_terminal,
            output,
            created_at: now,
            finished_at: now,
        }
    }

    fn diamond() -> Arc<Pipeline> {
        Arc::new(
            PipelineBuilder::new()
                .add_task(NoOpTask::new("a"))
                .add_task(NoOpTask::new("b"))
                .add_task(NoOpTask::new("c"))
                .add_task(NoOpTask::new("d"))
                .add_edge("a", "b")
                .add_edge("a", "c")
                .add_edge("b", "d")
                .add_edge("c", "d")
                .build()
                .unwrap(),
        )
    }

    #[tokio::test]
    async fn test_emits_each_task_exactly_once_in_dependency_order() {
        let graph = diamond();
        let (scheduler, mut ready_rx, result_tx) =
            Scheduler::new(graph, TaskValue::Json(json!(0)), Vars::default());
        let handle = tokio::spawn(scheduler.run());

        let mut emitted = Vec::new();
        while let Some(ready) = ready_rx.recv().await {
            emitted.push(ready.task.dot_id().to_string());
            let result = result_for(&ready, Ok(TaskValue::Json(json!(1))));
            result_tx.send(result).unwrap();
        }

        let results = handle.await.unwrap();

        assert_eq!(emitted.len(), 4);
        assert_eq!(results.len(), 4);
        assert_eq!(emitted[0], "a");
        assert_eq!(emitted[3], "d");
        // b and c may interleave either way.
        let mut middle = vec![emitted[1].clone(), emitted[2].clone()];
        middle.sort();
        assert_eq!(middle, vec!["b", "c"]);
    }

    #[tokio::test]
    async fn test_seed_input_delivered_to_root_tasks_at_index_zero() {
        let graph = Arc::new(
            PipelineBuilder::new()
                .add_task(NoOpTask::new("root"))
                .build()
                .unwrap(),
        );
        let (scheduler, mut ready_rx, result_tx) =
            Scheduler::new(graph, TaskValue::Json(json!(5)), Vars::default());
        let handle = tokio::spawn(scheduler.run());

        let ready = ready_rx.recv().await.unwrap();
        assert_eq!(ready.inputs.len(), 1);
        assert_eq!(ready.inputs[0].index, 0);
        assert_eq!(
            ready.inputs_sorted(),
            vec![Ok(TaskValue::Json(json!(5)))]
        );

        result_tx
            .send(result_for(&ready, Ok(TaskValue::Json(json!(10)))))
            .unwrap();
        drop(result_tx);
        handle.await.unwrap();
    }

    #[tokio::test]
    async fn test_task_waits_for_all_predecessors() {
        let graph = diamond();
        let (scheduler, mut ready_rx, result_tx) =
            Scheduler::new(graph, TaskValue::Json(json!(0)), Vars::default());
        let handle = tokio::spawn(scheduler.run());

        let a = ready_rx.recv().await.unwrap();
        result_tx
            .send(result_for(&a, Ok(TaskValue::Json(json!("a")))))
            .unwrap();

        let b = ready_rx.recv().await.unwrap();
        let c = ready_rx.recv().await.unwrap();

        // Complete only b; d must not be emitted yet.
        result_tx
            .send(result_for(&b, Ok(TaskValue::Json(json!("b")))))
            .unwrap();
        tokio::time::sleep(std::time::Duration::from_millis(20)).await;
        assert!(ready_rx.try_recv().is_err());

        result_tx
            .send(result_for(&c, Ok(TaskValue::Json(json!("c")))))
            .unwrap();
        let d = ready_rx.recv().await.unwrap();
        assert_eq!(d.task.dot_id(), "d");
        assert_eq!(d.inputs.len(), 2);

        result_tx
            .send(result_for(&d, Ok(TaskValue::Json(json!("d")))))
            .unwrap();
        drop(result_tx);
        let results = handle.await.unwrap();
        assert_eq!(results.len(), 4);
    }

    #[tokio::test]
    async fn test_inputs_sorted_by_edge_index_under_reversed_completion() {
        let graph = diamond();
        let (scheduler, mut ready_rx, result_tx) =
            Scheduler::new(graph, TaskValue::Json(json!(0)), Vars::default());
        let handle = tokio::spawn(scheduler.run());

        let a = ready_rx.recv().await.unwrap();
        result_tx
            .send(result_for(&a, Ok(TaskValue::Json(json!(20)))))
            .unwrap();

        let b = ready_rx.recv().await.unwrap();
        let c = ready_rx.recv().await.unwrap();

        // c (edge index 1 into d) completes before b (edge index 0).
        result_tx
            .send(result_for(&c, Ok(TaskValue::Json(json!(19)))))
            .unwrap();
        result_tx
            .send(result_for(&b, Ok(TaskValue::Json(json!(21)))))
            .unwrap();

        let d = ready_rx.recv().await.unwrap();
        assert_eq!(
            d.inputs_sorted(),
            vec![
                Ok(TaskValue::Json(json!(21))),
                Ok(TaskValue::Json(json!(19))),
            ]
        );

        result_tx
            .send(result_for(&d, Ok(TaskValue::Json(json!(2)))))
            .unwrap();
        drop(result_tx);
        handle.await.unwrap();
    }

    #[tokio::test]
    async fn test_errored_result_still_unblocks_successors() {
        let graph = Arc::new(
            PipelineBuilder::new()
                .add_task(NoOpTask::new("a"))
                .add_task(NoOpTask::new("b"))
                .add_edge("a", "b")
                .build()
                .unwrap(),
        );
        let (scheduler, mut ready_rx, result_tx) =
            Scheduler::new(graph, TaskValue::Json(json!(0)), Vars::default());
        let handle = tokio::spawn(scheduler.run());

        let a = ready_rx.recv().await.unwrap();
        let err = TaskError::ExecutionFailed("boom".to_string());
        result_tx.send(result_for(&a, Err(err.clone()))).unwrap();

        let b = ready_rx.recv().await.unwrap();
        assert_eq!(b.task.dot_id(), "b");
        assert_eq!(b.inputs_sorted(), vec![Err(err)]);

        result_tx
            .send(result_for(&b, Err(TaskError::ExecutionFailed("boom".to_string()))))
            .unwrap();
        drop(result_tx);
        let results = handle.await.unwrap();
        assert_eq!(results.len(), 2);
    }

    #[tokio::test]
    async fn test_scheduler_returns_early_when_runner_drops() {
        let graph = diamond();
        let (scheduler, ready_rx, _result_tx) =
            Scheduler::new(graph, TaskValue::Json(json!(0)), Vars::default());
        drop(ready_rx);

        let results = scheduler.run().await;
        assert!(results.is_empty());
    }

    #[test]
    fn test_inputs_sorted_is_stable_for_copies() {
        let ready = ReadyTaskRun {
            task: NoOpTask::new("t"),
            task_index: 0,
            is_terminal: true,
            inputs: vec![
                ScheduledInput {
                    output: Ok(TaskValue::Json(json!("second"))),
                    index: 1,
                },
                ScheduledInput {
                    output: Ok(TaskValue::Json(json!("first"))),
                    index: 0,
                },
            ],
            vars: Vars::default(),
        };

        assert_eq!(
            ready.inputs_sorted(),
            vec![
                Ok(TaskValue::Json(json!("first"))),
                Ok(TaskValue::Json(json!("second"))),
            ]
        );
        // Sorting is non-destructive.
        assert_eq!(ready.inputs[0].index, 1);
    }
}
