//! Row types persisted by an [`InstanceStore`](super::InstanceStore).

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::status::{WorkflowStatus, WorkstepStatus};

/// A single execution of a workflow definition.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct WorkflowInstance {
    pub id: i64,
    pub workflow_id: String,
    pub workflow_name: String,
    pub status: WorkflowStatus,
    pub start_time: DateTime<Utc>,
    pub end_time: Option<DateTime<Utc>>,
    pub error_message: Option<String>,
    pub payload_data: Option<String>,
}

/// A single execution attempt series of a workstep definition.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct WorkstepInstance {
    pub id: i64,
    pub workflow_instance_id: Option<i64>,
    pub step_id: String,
    pub step_name: String,
    pub bian_sd: String,
    pub status: WorkstepStatus,
    pub start_time: Option<DateTime<Utc>>,
    pub end_time: Option<DateTime<Utc>>,
    pub attempt_number: u32,
    pub max_retries: u32,
    pub retry_delay: u32,
    pub error_message: Option<String>,
    pub result_data: Option<String>,
    pub payload_data: Option<String>,
}

/// One row of the append-only workflow lifecycle journal.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct WorkflowLifecycleEntry {
    pub id: Uuid,
    pub workflow_instance_id: i64,
    pub from_state: WorkflowStatus,
    pub to_state: WorkflowStatus,
    pub change_dt: DateTime<Utc>,
    pub changed_by: String,
    pub notes: Option<String>,
}

/// One row of the append-only workstep lifecycle journal.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct WorkstepLifecycleEntry {
    pub id: Uuid,
    pub workstep_instance_id: i64,
    pub from_state: WorkstepStatus,
    pub to_state: WorkstepStatus,
    pub change_dt: DateTime<Utc>,
    pub changed_by: String,
    pub notes: Option<String>,
}

/// Default "who made this change" value for engine-driven transitions.
pub const CHANGED_BY_AUTO: &str = "auto";

/// A workflow instance together with the worksteps run under it, as
/// returned by [`crate::query::workflow_summary`].
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct WorkflowSummary {
    pub instance: WorkflowInstance,
    pub steps: Vec<WorkstepInstance>,
}
