//! Parsed pipeline graphs.
//!
//! A [`Pipeline`] is the result of parsing a spec's DAG source: an
//! ordered sequence of tasks plus the edges between them. Each incoming
//! edge of a task carries a stable **index** — its position among the
//! task's declared inputs — which the executor uses to order inputs at
//! invocation time regardless of predecessor completion order.
//!
//! The engine does not define the DAG text syntax; parsers implement
//! [`DagParser`]. [`PipelineBuilder`] constructs graphs
//! programmatically and is what parser implementations build on.

use std::collections::HashMap;
use std::sync::Arc;
use thiserror::Error;

use crate::core::task::Task;
use crate::core::types::TaskId;

/// Errors from constructing or parsing a pipeline graph.
#[derive(Debug, Error)]
pub enum GraphError {
    /// A cycle was detected in the graph.
    #[error("cycle detected involving task: {0}")]
    CycleDetected(TaskId),

    /// An edge references a task that doesn't exist.
    #[error("missing dependency: task '{from}' feeds non-existent task '{to}'")]
    MissingDependency { from: TaskId, to: TaskId },

    /// Two tasks share a dot-id.
    #[error("duplicate task: {0}")]
    DuplicateTask(TaskId),

    /// An edge starts from a task that doesn't exist.
    #[error("task not found: {0}")]
    TaskNotFound(TaskId),

    /// The graph has no tasks.
    #[error("pipeline has no tasks")]
    Empty,

    /// The source text could not be parsed.
    #[error("parse error: {0}")]
    Parse(String),
}

/// A directed edge between two tasks.
///
/// `index` is the edge's position among `to`'s declared inputs; the
/// executor delivers `to`'s inputs sorted ascending by it.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Edge {
    /// The producing task.
    pub from: TaskId,
    /// The consuming task.
    pub to: TaskId,
    /// Position among the consuming task's declared inputs.
    pub index: u32,
}

/// A parsed, validated pipeline graph.
pub struct Pipeline {
    tasks: Vec<Arc<dyn Task>>,
    ids: Vec<TaskId>,
    index_of: HashMap<TaskId, usize>,
    incoming: HashMap<TaskId, Vec<Edge>>,
    outgoing: HashMap<TaskId, Vec<Edge>>,
}

impl Pipeline {
    /// The tasks in declaration order.
    pub fn tasks(&self) -> &[Arc<dyn Task>] {
        &self.tasks
    }

    /// The task ids in declaration order.
    pub fn task_ids(&self) -> &[TaskId] {
        &self.ids
    }

    /// Number of tasks.
    pub fn len(&self) -> usize {
        self.tasks.len()
    }

    /// Whether the graph has no tasks. Validated graphs never are.
    pub fn is_empty(&self) -> bool {
        self.tasks.is_empty()
    }

    /// Look up a task by id.
    pub fn task(&self, id: &TaskId) -> Option<&Arc<dyn Task>> {
        self.index_of.get(id).map(|&i| &self.tasks[i])
    }

    /// Position of a task in the declaration order.
    pub fn task_index(&self, id: &TaskId) -> Option<usize> {
        self.index_of.get(id).copied()
    }

    /// Incoming edges of a task.
    pub fn predecessors_of(&self, id: &TaskId) -> &[Edge] {
        self.incoming.get(id).map_or(&[], Vec::as_slice)
    }

    /// Outgoing edges of a task.
    pub fn successors_of(&self, id: &TaskId) -> &[Edge] {
        self.outgoing.get(id).map_or(&[], Vec::as_slice)
    }

    /// Number of incoming edges of a task.
    pub fn in_degree(&self, id: &TaskId) -> usize {
        self.predecessors_of(id).len()
    }

    /// Whether the task has no successors.
    pub fn is_terminal(&self, id: &TaskId) -> bool {
        self.successors_of(id).is_empty()
    }
}

impl std::fmt::Debug for Pipeline {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Pipeline")
            .field("tasks", &self.ids)
            .field(
                "edges",
                &self.outgoing.values().map(Vec::len).sum::<usize>(),
            )
            .finish()
    }
}

/// Builder for constructing pipelines.
///
/// Edges are declared in input order: the n-th `add_edge` targeting a
/// task becomes that task's input at index n.
pub struct PipelineBuilder {
    tasks: Vec<Arc<dyn Task>>,
    edges: Vec<(TaskId, TaskId)>,
}

impl PipelineBuilder {
    /// Create an empty builder.
    pub fn new() -> Self {
        Self {
            tasks: Vec::new(),
            edges: Vec::new(),
        }
    }

    /// Add a task.
    pub fn add_task(mut self, task: Arc<dyn Task>) -> Self {
        self.tasks.push(task);
        self
    }

    /// Declare that `from`'s output feeds `to`. Declaration order
    /// determines `to`'s input indices.
    pub fn add_edge(mut self, from: impl Into<TaskId>, to: impl Into<TaskId>) -> Self {
        self.edges.push((from.into(), to.into()));
        self
    }

    /// Validate and build the pipeline.
    pub fn build(self) -> Result<Pipeline, GraphError> {
        if self.tasks.is_empty() {
            return Err(GraphError::Empty);
        }

        let mut ids = Vec::with_capacity(self.tasks.len());
        let mut index_of = HashMap::with_capacity(self.tasks.len());
        for (i, task) in self.tasks.iter().enumerate() {
            let id = TaskId::new(task.dot_id());
            if index_of.insert(id.clone(), i).is_some() {
                return Err(GraphError::DuplicateTask(id));
            }
            ids.push(id);
        }

        let mut incoming: HashMap<TaskId, Vec<Edge>> =
            ids.iter().map(|id| (id.clone(), Vec::new())).collect();
        let mut outgoing: HashMap<TaskId, Vec<Edge>> =
            ids.iter().map(|id| (id.clone(), Vec::new())).collect();

        for (from, to) in self.edges {
            if !index_of.contains_key(&from) {
                return Err(GraphError::TaskNotFound(from));
            }
            if !index_of.contains_key(&to) {
                return Err(GraphError::MissingDependency { from, to });
            }
            let index = incoming[&to].len() as u32;
            let edge = Edge {
                from: from.clone(),
                to: to.clone(),
                index,
            };
            if let Some(edges) = incoming.get_mut(&to) {
                edges.push(edge.clone());
            }
            if let Some(edges) = outgoing.get_mut(&from) {
                edges.push(edge);
            }
        }

        let pipeline = Pipeline {
            tasks: self.tasks,
            ids,
            index_of,
            incoming,
            outgoing,
        };
        check_acyclic(&pipeline)?;
        Ok(pipeline)
    }
}

impl Default for PipelineBuilder {
    fn default() -> Self {
        Self::new()
    }
}

/// Kahn's algorithm; errors with a task on the cycle if one exists.
fn check_acyclic(pipeline: &Pipeline) -> Result<(), GraphError> {
    let mut in_degree: HashMap<&TaskId, usize> = pipeline
        .task_ids()
        .iter()
        .map(|id| (id, pipeline.in_degree(id)))
        .collect();

    let mut queue: Vec<&TaskId> = in_degree
        .iter()
        .filter(|(_, deg)| **deg == 0)
        .map(|(id, _)| *id)
        .collect();

    let mut visited = 0usize;
    while let Some(id) = queue.pop() {
        visited += 1;
        for edge in pipeline.successors_of(id) {
            if let Some(deg) = in_degree.get_mut(&edge.to) {
                *deg -= 1;
                if *deg == 0 {
                    queue.push(&edge.to);
                }
            }
        }
    }

    if visited != pipeline.len() {
        let cycle_node = in_degree
            .iter()
            .find(|(_, deg)| **deg > 0)
            .map(|(id, _)| (*id).clone())
            .unwrap_or_else(|| TaskId::new("unknown"));
        return Err(GraphError::CycleDetected(cycle_node));
    }

    Ok(())
}

/// Parses DAG source text into a pipeline.
///
/// The syntax is the parser's concern; the engine only requires that
/// edge indices reflect each task's declared input order.
pub trait DagParser: Send + Sync {
    /// Parse the source into a validated pipeline.
    fn parse(&self, source: &str) -> Result<Pipeline, GraphError>;
}
