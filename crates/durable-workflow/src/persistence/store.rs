//! The `InstanceStore` trait, the seam an implementer swaps for an
//! external RDBMS without touching runner logic.

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use uuid::Uuid;

use crate::status::{WorkflowStatus, WorkstepStatus};

use super::model::{WorkflowInstance, WorkstepInstance};

/// Error type for store operations.
#[derive(Debug, thiserror::Error)]
pub enum StoreError {
    #[error("workflow instance not found: {0}")]
    WorkflowNotFound(i64),

    #[error("workstep instance not found: {0}")]
    WorkstepNotFound(i64),

    #[error("illegal transition from {from} to {to}")]
    IllegalTransition { from: String, to: String },

    #[error("database error: {0}")]
    Database(String),
}

/// Input for creating a new workflow instance row.
#[derive(Debug, Clone)]
pub struct NewWorkflowInstance {
    pub workflow_id: String,
    pub workflow_name: String,
    pub payload_data: Option<String>,
}

/// Input for creating a new workstep instance row.
#[derive(Debug, Clone)]
pub struct NewWorkstepInstance {
    pub workflow_instance_id: Option<i64>,
    pub step_id: String,
    pub step_name: String,
    pub bian_sd: String,
    pub max_retries: u32,
    pub retry_delay: u32,
    pub payload_data: Option<String>,
}

/// Persistence for workflow and workstep instances and their lifecycle
/// journals.
///
/// Implementations must be `Send + Sync` and safe for concurrent access
/// from multiple tasks. `set_workflow_status`/`set_workstep_status` must
/// perform "read current status, append a lifecycle row iff it actually
/// changed, write the new status" as a single atomic operation.
#[async_trait]
pub trait InstanceStore: Send + Sync + 'static {
    async fn create_workflow_instance(
        &self,
        new: NewWorkflowInstance,
    ) -> Result<WorkflowInstance, StoreError>;

    async fn get_workflow_instance(&self, id: i64) -> Result<WorkflowInstance, StoreError>;

    /// Transition a workflow instance's status, journaling the change iff
    /// the status actually differs from the one currently stored.
    async fn set_workflow_status(
        &self,
        id: i64,
        new_status: WorkflowStatus,
        end_time: Option<DateTime<Utc>>,
        error_message: Option<String>,
    ) -> Result<(), StoreError>;

    async fn create_workstep_instance(
        &self,
        new: NewWorkstepInstance,
    ) -> Result<WorkstepInstance, StoreError>;

    async fn get_workstep_instance(&self, id: i64) -> Result<WorkstepInstance, StoreError>;

    /// Update attempt bookkeeping (attempt number, start time) without a
    /// status transition; used at the start of each retry attempt.
    async fn begin_workstep_attempt(
        &self,
        id: i64,
        attempt_number: u32,
        start_time: DateTime<Utc>,
    ) -> Result<(), StoreError>;

    /// Transition a workstep instance's status, journaling the change iff
    /// the status actually differs from the one currently stored.
    async fn set_workstep_status(
        &self,
        id: i64,
        new_status: WorkstepStatus,
        end_time: Option<DateTime<Utc>>,
        error_message: Option<String>,
        result_data: Option<String>,
    ) -> Result<(), StoreError>;

    /// List workflow instances, most recently started first, optionally
    /// filtered by business `workflow_id`.
    async fn list_workflow_instances(
        &self,
        workflow_id: Option<&str>,
    ) -> Result<Vec<WorkflowInstance>, StoreError>;

    /// List the worksteps belonging to a workflow instance, in execution
    /// order.
    async fn list_worksteps_for_workflow(
        &self,
        workflow_instance_id: i64,
    ) -> Result<Vec<WorkstepInstance>, StoreError>;

    /// List every recorded attempt series for a given business `step_id`,
    /// most recent first.
    async fn list_worksteps_by_step_id(
        &self,
        step_id: &str,
    ) -> Result<Vec<WorkstepInstance>, StoreError>;

    /// Delete workflow instances (and, via cascade, their worksteps and
    /// lifecycle rows) started before `cutoff`. Returns the number of
    /// workflow instances removed.
    async fn delete_workflow_instances_started_before(
        &self,
        cutoff: DateTime<Utc>,
    ) -> Result<u64, StoreError>;
}

/// Next surrogate id in an in-process id sequence; shared helper between
/// the in-memory and SQLite stores' lifecycle-entry construction.
pub fn new_lifecycle_id() -> Uuid {
    Uuid::now_v7()
}
