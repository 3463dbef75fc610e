//! # Durable Workflow Engine
//!
//! Turns ordinary async (or blocking) procedures into durably-tracked,
//! retry-aware units of work. Two annotated constructs carry the
//! lifecycle tracking: [`Workflow`] definitions orchestrate, and
//! [`Workstep`] definitions do the retryable work.
//!
//! ## Features
//!
//! - **Lifecycle journaling**: every status change is appended to an
//!   append-only journal alongside the status mutation, atomically
//! - **Layered retry policies**: linear, capped-exponential,
//!   jittered-exponential and conditional backoff, resolved by a fixed
//!   precedence order
//! - **Ambient execution context**: propagated per cooperative task via
//!   a `tokio::task_local`, not per OS thread
//! - **Pluggable persistence**: an in-memory store for tests, a SQLite
//!   store for the embedded reference deployment
//!
//! ## Architecture
//!
//! ```text
//! ┌─────────────────────────────────────────────────────────────┐
//! │                      WorkflowRunner                           │
//! │  (installs context, drives Instantiated→Running→terminal)   │
//! └─────────────────────────────────────────────────────────────┘
//!                              │
//!                              ▼
//! ┌─────────────────────────────────────────────────────────────┐
//! │                      WorkstepRunner                           │
//! │  (resolves retry policy, runs the attempt loop, journals)    │
//! └─────────────────────────────────────────────────────────────┘
//!                              │
//!                              ▼
//! ┌─────────────────────────────────────────────────────────────┐
//! │                       InstanceStore                           │
//! │  (in-memory, or SQLite: workflow_instance, workstep_instance)│
//! └─────────────────────────────────────────────────────────────┘
//! ```
//!
//! ## Example
//!
//! ```ignore
//! use durable_workflow::prelude::*;
//! use std::sync::Arc;
//!
//! struct Double;
//!
//! #[async_trait::async_trait]
//! impl Workstep for Double {
//!     const NAME: &'static str = "Double";
//!     type Input = u32;
//!     type Output = u32;
//!
//!     async fn execute(&self, input: &u32) -> Result<u32, WorkstepError> {
//!         Ok(input * 2)
//!     }
//! }
//!
//! # async fn run() -> anyhow::Result<()> {
//! let store = Arc::new(InMemoryInstanceStore::new());
//! let runner = WorkstepRunner::new(store);
//! let result = runner.run(&Double, 21, WorkstepOptions::default()).await?;
//! assert_eq!(result, 42);
//! # Ok(())
//! # }
//! ```

pub mod context;
pub mod error;
pub mod persistence;
pub mod query;
pub mod retry;
pub mod status;
pub mod workflow;
pub mod workstep;

/// Prelude for common imports.
pub mod prelude {
    pub use crate::context::ExecutionContext;
    pub use crate::error::{ErrorKind, ExecutionError, WorkflowError, WorkstepError};
    pub use crate::persistence::{
        InMemoryInstanceStore, InstanceStore, SqliteInstanceStore, SqliteStoreConfig, StoreError,
        WorkflowInstance, WorkflowSummary, WorkstepInstance,
    };
    pub use crate::query::{retention_sweep, step_execution_history, workflow_summary};
    pub use crate::retry::RetryPolicy;
    pub use crate::status::{WorkflowStatus, WorkstepStatus};
    pub use crate::workflow::{BlockingWorkflow, Workflow, WorkflowRunner};
    pub use crate::workstep::{BlockingWorkstep, Workstep, WorkstepOptions, WorkstepRunner};
}

pub use context::ExecutionContext;
pub use error::{ErrorKind, ExecutionError, WorkflowError, WorkstepError};
pub use persistence::{
    InMemoryInstanceStore, InstanceStore, SqliteInstanceStore, SqliteStoreConfig, StoreError,
    WorkflowInstance, WorkflowSummary, WorkstepInstance,
};
pub use retry::RetryPolicy;
pub use status::{WorkflowStatus, WorkstepStatus};
pub use workflow::{BlockingWorkflow, Workflow, WorkflowRunner};
pub use workstep::{BlockingWorkstep, Workstep, WorkstepOptions, WorkstepRunner};
