//! Status enumerations and their legal transition graphs.

use serde::{Deserialize, Serialize};

/// Lifecycle status of a workflow instance.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "PascalCase")]
pub enum WorkflowStatus {
    #[serde(rename = "Initiated")]
    Instantiated,
    Running,
    Completed,
    Failed,
    Cancelled,
    Pending,
}

impl WorkflowStatus {
    /// Terminal states a workflow never leaves.
    pub fn is_final_state(self) -> bool {
        matches!(self, Self::Cancelled | Self::Completed)
    }

    /// Statuses this status may transition into.
    pub fn next_states(self) -> &'static [WorkflowStatus] {
        match self {
            Self::Instantiated => &[Self::Running],
            Self::Running => &[
                Self::Failed,
                Self::Completed,
                Self::Pending,
                Self::Cancelled,
            ],
            Self::Failed => &[Self::Running, Self::Cancelled],
            Self::Pending => &[Self::Completed, Self::Cancelled],
            Self::Completed | Self::Cancelled => &[],
        }
    }

    /// Whether transitioning from `self` to `next` is legal.
    pub fn can_transition_to(self, next: WorkflowStatus) -> bool {
        self.next_states().contains(&next)
    }
}

impl std::fmt::Display for WorkflowStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let s = match self {
            Self::Instantiated => "Initiated",
            Self::Running => "Running",
            Self::Completed => "Completed",
            Self::Failed => "Failed",
            Self::Cancelled => "Cancelled",
            Self::Pending => "Pending",
        };
        write!(f, "{s}")
    }
}

impl std::str::FromStr for WorkflowStatus {
    type Err = ();

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "Initiated" => Ok(Self::Instantiated),
            "Running" => Ok(Self::Running),
            "Completed" => Ok(Self::Completed),
            "Failed" => Ok(Self::Failed),
            "Cancelled" => Ok(Self::Cancelled),
            "Pending" => Ok(Self::Pending),
            _ => Err(()),
        }
    }
}

/// Parse a stored status string, warning and returning `None` on an
/// unrecognized value instead of failing the read.
pub fn parse_workflow_status(raw: &str) -> Option<WorkflowStatus> {
    match raw.parse() {
        Ok(status) => Some(status),
        Err(()) => {
            tracing::warn!(value = raw, "invalid WorkflowStatus value in store");
            None
        }
    }
}

/// Lifecycle status of a workstep instance.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "PascalCase")]
pub enum WorkstepStatus {
    #[serde(rename = "Initiated")]
    Instantiated,
    Running,
    Completed,
    Failed,
    Cancelled,
    Waiting,
    #[serde(rename = "Pending Completion")]
    PendingCompletion,
}

impl WorkstepStatus {
    pub fn is_final_state(self) -> bool {
        matches!(self, Self::Cancelled | Self::Completed)
    }

    pub fn next_states(self) -> &'static [WorkstepStatus] {
        match self {
            Self::Instantiated => &[Self::Running],
            Self::Running => &[
                Self::Waiting,
                Self::Failed,
                Self::Completed,
                Self::PendingCompletion,
                Self::Cancelled,
            ],
            Self::Waiting => &[Self::Running, Self::Cancelled],
            Self::Failed => &[Self::Running, Self::Cancelled],
            Self::PendingCompletion => &[Self::Completed, Self::Cancelled],
            Self::Completed | Self::Cancelled => &[],
        }
    }

    pub fn can_transition_to(self, next: WorkstepStatus) -> bool {
        self.next_states().contains(&next)
    }
}

impl std::fmt::Display for WorkstepStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let s = match self {
            Self::Instantiated => "Initiated",
            Self::Running => "Running",
            Self::Completed => "Completed",
            Self::Failed => "Failed",
            Self::Cancelled => "Cancelled",
            Self::Waiting => "Waiting",
            Self::PendingCompletion => "Pending Completion",
        };
        write!(f, "{s}")
    }
}

impl std::str::FromStr for WorkstepStatus {
    type Err = ();

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "Initiated" => Ok(Self::Instantiated),
            "Running" => Ok(Self::Running),
            "Completed" => Ok(Self::Completed),
            "Failed" => Ok(Self::Failed),
            "Cancelled" => Ok(Self::Cancelled),
            "Waiting" => Ok(Self::Waiting),
            "Pending Completion" => Ok(Self::PendingCompletion),
            _ => Err(()),
        }
    }
}

pub fn parse_workstep_status(raw: &str) -> Option<WorkstepStatus> {
    match raw.parse() {
        Ok(status) => Some(status),
        Err(()) => {
            tracing::warn!(value = raw, "invalid WorkstepStatus value in store");
            None
        }
    }
}
