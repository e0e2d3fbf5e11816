//! # Sluice
//!
//! An in-memory pipeline execution engine. A pipeline is a directed
//! acyclic graph of tasks; each run evaluates the graph once for a given
//! input, respecting inter-task dependencies, per-task timeouts and
//! panic isolation, and aggregates the terminal tasks' results into a
//! deterministic [`FinalResult`] suitable for durable persistence.
//!
//! The engine consumes tasks through the [`Task`] trait, parsed graphs
//! through the [`DagParser`] trait and persistence through the
//! [`PipelineStore`] trait; concrete task implementations, the DAG text
//! syntax and storage backends live outside the core.
//!
//! ## Quick start
//!
//! ```rust,ignore
//! use sluice::{PipelineRunner, TaskValue};
//!
//! let runner = PipelineRunner::new(store, config, parser);
//! runner.start();
//!
//! let (run, results) = runner
//!     .execute_run(ctx, spec, TaskValue::from(serde_json::json!(5)), meta)
//!     .await?;
//!
//! runner.close().await;
//! ```

pub mod config;
pub mod core;
pub mod execution;
pub mod graph;
mod metrics;
pub mod storage;
pub mod testing;

pub use crate::config::RunnerConfig;
pub use crate::core::run::{FinalResult, Run, TaskRunResult, TaskRunResults};
pub use crate::core::spec::PipelineSpec;
pub use crate::core::task::{Meta, RunContext, SafeTx, Task, TaskType, Vars};
pub use crate::core::types::{JobId, SpecId, TaskId};
pub use crate::core::value::{TaskError, TaskOutput, TaskValue};
pub use crate::execution::{PipelineRunner, RunnerError};
pub use crate::graph::{DagParser, Edge, GraphError, Pipeline, PipelineBuilder};
pub use crate::storage::{InMemoryStore, PipelineStore, StoreError};

#[cfg(feature = "sqlite")]
pub use crate::storage::SqliteStore;
