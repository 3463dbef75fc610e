//! Error types raised by worksteps and workflows, and by the engine itself.

use serde::{Deserialize, Serialize};

/// The coarse category a [`WorkstepError`] falls into, consulted by retry
/// policies when deciding whether an attempt should be retried.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum ErrorKind {
    /// The input was malformed; retrying will not help. Policies exclude
    /// this kind from retries by default, mirroring the reference
    /// implementation's built-in `ValueError` exclusion.
    InvalidInput,
    /// A transient failure (timeout, connection reset, etc) that may
    /// succeed if attempted again.
    Transient,
    /// A failure judged permanent by the caller.
    Permanent,
    /// An application-defined category, for conditional policies that key
    /// off a caller-chosen label.
    Custom(String),
}

impl std::fmt::Display for ErrorKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::InvalidInput => write!(f, "invalid_input"),
            Self::Transient => write!(f, "transient"),
            Self::Permanent => write!(f, "permanent"),
            Self::Custom(label) => write!(f, "{label}"),
        }
    }
}

/// An error raised from inside a workstep body.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct WorkstepError {
    pub kind: ErrorKind,
    pub message: String,
}

impl WorkstepError {
    pub fn new(kind: ErrorKind, message: impl Into<String>) -> Self {
        Self {
            kind,
            message: message.into(),
        }
    }

    pub fn transient(message: impl Into<String>) -> Self {
        Self::new(ErrorKind::Transient, message)
    }

    pub fn permanent(message: impl Into<String>) -> Self {
        Self::new(ErrorKind::Permanent, message)
    }

    pub fn invalid_input(message: impl Into<String>) -> Self {
        Self::new(ErrorKind::InvalidInput, message)
    }
}

impl std::fmt::Display for WorkstepError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.message)
    }
}

impl std::error::Error for WorkstepError {}

/// An error surfaced from a workflow's top-level `execute`.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct WorkflowError {
    pub message: String,
}

impl WorkflowError {
    pub fn new(message: impl Into<String>) -> Self {
        Self {
            message: message.into(),
        }
    }
}

impl std::fmt::Display for WorkflowError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.message)
    }
}

impl std::error::Error for WorkflowError {}

impl From<WorkstepError> for WorkflowError {
    fn from(err: WorkstepError) -> Self {
        Self::new(err.message)
    }
}

impl From<anyhow::Error> for WorkflowError {
    fn from(err: anyhow::Error) -> Self {
        Self::new(err.to_string())
    }
}

/// Errors raised by the engine itself (not by user workstep/workflow code).
#[derive(Debug, thiserror::Error)]
pub enum ExecutionError {
    #[error("illegal transition from {from} to {to}")]
    IllegalTransition { from: String, to: String },

    #[error("no execution context installed, and this call requires one")]
    MissingContext,

    #[error(transparent)]
    Store(#[from] crate::persistence::StoreError),

    #[error("workstep failed: {0}")]
    Workstep(#[from] WorkstepError),

    #[error("workflow failed: {0}")]
    Workflow(#[from] WorkflowError),
}
