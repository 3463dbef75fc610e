//! Workflow definitions and the runner that installs ambient context
//! around a workflow's top-level `execute` body.

use std::sync::Arc;

use async_trait::async_trait;
use chrono::Utc;
use serde::Serialize;
use tracing::{error, info};

use crate::context::ExecutionContext;
use crate::error::WorkflowError;
use crate::persistence::{InstanceStore, NewWorkflowInstance};
use crate::retry::RetryPolicy;
use crate::status::WorkflowStatus;

/// An asynchronous workflow: the top-level orchestration body that calls
/// out to worksteps.
#[async_trait]
pub trait Workflow: Send + Sync + Sized {
    const NAME: &'static str;

    type Input: Serialize + Send + Sync;
    type Output: Serialize + Send + Sync;

    fn new(input: Self::Input) -> Self;

    /// Workflow-level retry policy, inherited by any workstep invoked
    /// from within `execute` that doesn't specify its own.
    fn retry_policy(&self) -> Option<RetryPolicy> {
        None
    }

    async fn execute(&self) -> Result<Self::Output, WorkflowError>;
}

/// A blocking (synchronous) workflow.
pub trait BlockingWorkflow: Send + Sync + Sized {
    const NAME: &'static str;

    type Input: Serialize + Send + Sync;
    type Output: Serialize + Send + Sync;

    fn new(input: Self::Input) -> Self;

    fn retry_policy(&self) -> Option<RetryPolicy> {
        None
    }

    fn execute(&self) -> Result<Self::Output, WorkflowError>;
}

fn serialize_payload<T: Serialize>(value: &T) -> Option<String> {
    serde_json::to_string(value).ok()
}

/// Runs [`Workflow`]/[`BlockingWorkflow`] implementations: creates the
/// instance row, installs the ambient [`ExecutionContext`], drives the
/// `Instantiated -> Running -> {Completed, Failed}` transition.
pub struct WorkflowRunner {
    store: Arc<dyn InstanceStore>,
}

impl WorkflowRunner {
    pub fn new(store: Arc<dyn InstanceStore>) -> Self {
        Self { store }
    }

    /// Run an async [`Workflow`] end to end.
    pub async fn run<W: Workflow>(&self, input: W::Input) -> Result<W::Output, WorkflowError> {
        let payload = serialize_payload(&input);
        let workflow = W::new(input);
        let retry_policy = workflow.retry_policy();

        let instance = self
            .store
            .create_workflow_instance(NewWorkflowInstance {
                workflow_id: W::NAME.to_string(),
                workflow_name: W::NAME.to_string(),
                payload_data: payload,
            })
            .await
            .map_err(|e| WorkflowError::new(format!("failed to create workflow row: {e}")))?;

        let ctx = ExecutionContext {
            workflow_instance: instance.clone(),
            store: Arc::clone(&self.store),
            workflow_retry_policy: retry_policy,
        };

        ExecutionContext::scope(ctx, async move {
            self.store
                .set_workflow_status(instance.id, WorkflowStatus::Running, None, None)
                .await
                .map_err(|e| WorkflowError::new(e.to_string()))?;

            info!(workflow = W::NAME, id = instance.id, "starting workflow execution");

            match workflow.execute().await {
                Ok(output) => {
                    self.store
                        .set_workflow_status(
                            instance.id,
                            WorkflowStatus::Completed,
                            Some(Utc::now()),
                            None,
                        )
                        .await
                        .map_err(|e| WorkflowError::new(e.to_string()))?;
                    info!(workflow = W::NAME, id = instance.id, "workflow completed");
                    Ok(output)
                }
                Err(err) => {
                    self.store
                        .set_workflow_status(
                            instance.id,
                            WorkflowStatus::Failed,
                            Some(Utc::now()),
                            Some(err.message.clone()),
                        )
                        .await
                        .map_err(|e| WorkflowError::new(e.to_string()))?;
                    error!(workflow = W::NAME, id = instance.id, error = %err, "workflow failed");
                    Err(err)
                }
            }
        })
        .await
    }

    /// Run a [`BlockingWorkflow`] on a dedicated blocking thread.
    pub async fn run_blocking<W>(&self, input: W::Input) -> Result<W::Output, WorkflowError>
    where
        W: BlockingWorkflow + 'static,
    {
        let payload = serialize_payload(&input);
        let workflow = W::new(input);
        let retry_policy = workflow.retry_policy();

        let instance = self
            .store
            .create_workflow_instance(NewWorkflowInstance {
                workflow_id: W::NAME.to_string(),
                workflow_name: W::NAME.to_string(),
                payload_data: payload,
            })
            .await
            .map_err(|e| WorkflowError::new(format!("failed to create workflow row: {e}")))?;

        let ctx = ExecutionContext {
            workflow_instance: instance.clone(),
            store: Arc::clone(&self.store),
            workflow_retry_policy: retry_policy,
        };

        let store = Arc::clone(&self.store);
        let instance_id = instance.id;

        ExecutionContext::scope(ctx, async move {
            store
                .set_workflow_status(instance_id, WorkflowStatus::Running, None, None)
                .await
                .map_err(|e| WorkflowError::new(e.to_string()))?;

            info!(workflow = W::NAME, id = instance_id, "starting blocking workflow execution");

            let result = tokio::task::spawn_blocking(move || workflow.execute())
                .await
                .map_err(|e| WorkflowError::new(format!("blocking workflow panicked: {e}")))?;

            match result {
                Ok(output) => {
                    store
                        .set_workflow_status(
                            instance_id,
                            WorkflowStatus::Completed,
                            Some(Utc::now()),
                            None,
                        )
                        .await
                        .map_err(|e| WorkflowError::new(e.to_string()))?;
                    info!(workflow = W::NAME, id = instance_id, "blocking workflow completed");
                    Ok(output)
                }
                Err(err) => {
                    store
                        .set_workflow_status(
                            instance_id,
                            WorkflowStatus::Failed,
                            Some(Utc::now()),
                            Some(err.message.clone()),
                        )
                        .await
                        .map_err(|e| WorkflowError::new(e.to_string()))?;
                    error!(workflow = W::NAME, id = instance_id, error = %err, "blocking workflow failed");
                    Err(err)
                }
            }
        })
        .await
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::persistence::InMemoryInstanceStore;
    use crate::workstep::{Workstep, WorkstepOptions, WorkstepRunner};
    use async_trait::async_trait;

    struct DoubleStep;

    #[async_trait]
    impl Workstep for DoubleStep {
        const NAME: &'static str = "DoubleStep";
        type Input = u32;
        type Output = u32;

        async fn execute(&self, input: &u32) -> Result<u32, crate::error::WorkstepError> {
            Ok(input * 2)
        }
    }

    struct DoublingWorkflow {
        input: u32,
    }

    #[async_trait]
    impl Workflow for DoublingWorkflow {
        const NAME: &'static str = "DoublingWorkflow";
        type Input = u32;
        type Output = u32;

        fn new(input: Self::Input) -> Self {
            Self { input }
        }

        async fn execute(&self) -> Result<u32, WorkflowError> {
            let ctx = ExecutionContext::current().expect("workflow context installed");
            let runner = WorkstepRunner::new(ctx.store);
            let step = DoubleStep;
            let result = runner
                .run(&step, self.input, WorkstepOptions::default())
                .await?;
            Ok(result)
        }
    }

    struct AlwaysFailsWorkflow;

    #[async_trait]
    impl Workflow for AlwaysFailsWorkflow {
        const NAME: &'static str = "AlwaysFailsWorkflow";
        type Input = ();
        type Output = ();

        fn new(_input: ()) -> Self {
            Self
        }

        async fn execute(&self) -> Result<(), WorkflowError> {
            Err(WorkflowError::new("boom"))
        }
    }

    #[tokio::test]
    async fn workflow_completes_and_runs_nested_workstep() {
        let store = Arc::new(InMemoryInstanceStore::new());
        let runner = WorkflowRunner::new(store);
        let result = runner.run::<DoublingWorkflow>(21).await.unwrap();
        assert_eq!(result, 42);
    }

    #[tokio::test]
    async fn workflow_failure_is_recorded_and_propagated() {
        let store = Arc::new(InMemoryInstanceStore::new());
        let runner = WorkflowRunner::new(Arc::clone(&store));
        let result = runner.run::<AlwaysFailsWorkflow>(()).await;
        assert!(result.is_err());

        let instances = store.list_workflow_instances(None).await.unwrap();
        assert_eq!(instances.len(), 1);
        assert_eq!(instances[0].status, WorkflowStatus::Failed);
        assert_eq!(instances[0].error_message.as_deref(), Some("boom"));
    }

    #[tokio::test]
    async fn nested_workstep_inherits_workflow_context() {
        let store = Arc::new(InMemoryInstanceStore::new());
        let runner = WorkflowRunner::new(Arc::clone(&store));
        runner.run::<DoublingWorkflow>(5).await.unwrap();

        let instances = store.list_workflow_instances(None).await.unwrap();
        let workflow_id = instances[0].id;
        let steps = store.list_worksteps_for_workflow(workflow_id).await.unwrap();
        assert_eq!(steps.len(), 1);
        assert_eq!(steps[0].workflow_instance_id, Some(workflow_id));
    }
}
