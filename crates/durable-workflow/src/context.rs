//! Ambient execution context, carried per cooperative task rather than
//! per OS thread so sibling worksteps never observe each other's state.

use std::cell::RefCell;
use std::future::Future;
use std::sync::Arc;

use crate::persistence::{InstanceStore, WorkflowInstance};
use crate::retry::RetryPolicy;

/// The state installed while a workflow's `execute` body is running.
#[derive(Clone)]
pub struct ExecutionContext {
    pub workflow_instance: WorkflowInstance,
    pub store: Arc<dyn InstanceStore>,
    pub workflow_retry_policy: Option<RetryPolicy>,
}

tokio::task_local! {
    static CONTEXT: RefCell<Option<ExecutionContext>>;
}

impl ExecutionContext {
    /// Install `ctx` for the duration of `fut`, clearing it again once
    /// `fut` resolves, panics, or is dropped early.
    pub async fn scope<F, T>(ctx: ExecutionContext, fut: F) -> T
    where
        F: Future<Output = T>,
    {
        CONTEXT.scope(RefCell::new(Some(ctx)), fut).await
    }

    /// The context installed by the innermost enclosing [`Self::scope`]
    /// call on this task, if any.
    pub fn current() -> Option<ExecutionContext> {
        CONTEXT
            .try_with(|cell| cell.borrow().clone())
            .unwrap_or(None)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::persistence::InMemoryInstanceStore;
    use crate::status::WorkflowStatus;
    use chrono::Utc;

    fn dummy_instance() -> WorkflowInstance {
        WorkflowInstance {
            id: 1,
            workflow_id: "wf".into(),
            workflow_name: "wf".into(),
            status: WorkflowStatus::Instantiated,
            start_time: Utc::now(),
            end_time: None,
            error_message: None,
            payload_data: None,
        }
    }

    #[tokio::test]
    async fn context_is_visible_inside_scope_and_absent_outside() {
        assert!(ExecutionContext::current().is_none());

        let ctx = ExecutionContext {
            workflow_instance: dummy_instance(),
            store: Arc::new(InMemoryInstanceStore::new()),
            workflow_retry_policy: None,
        };

        ExecutionContext::scope(ctx, async {
            let current = ExecutionContext::current();
            assert!(current.is_some());
            assert_eq!(current.unwrap().workflow_instance.id, 1);
        })
        .await;

        assert!(ExecutionContext::current().is_none());
    }

    #[tokio::test]
    async fn sibling_tasks_do_not_share_context() {
        let ctx = ExecutionContext {
            workflow_instance: dummy_instance(),
            store: Arc::new(InMemoryInstanceStore::new()),
            workflow_retry_policy: None,
        };

        ExecutionContext::scope(ctx, async {
            let sibling = tokio::spawn(async { ExecutionContext::current().is_some() });
            assert!(!sibling.await.unwrap());
        })
        .await;
    }
}
