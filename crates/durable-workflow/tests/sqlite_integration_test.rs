//! Integration tests for the SQLite-backed [`SqliteInstanceStore`].
//!
//! Run with: cargo test -p durable-workflow --test sqlite_integration_test
//!
//! Each test gets its own temp-file database, so no external service or
//! shared state is required.

use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;

use durable_workflow::prelude::*;

async fn fresh_store() -> (Arc<SqliteInstanceStore>, tempfile::TempDir) {
    let dir = tempfile::tempdir().expect("tempdir");
    let path = dir.path().join("workflow.db");
    let store = SqliteInstanceStore::connect(SqliteStoreConfig::new(path))
        .await
        .expect("connect");
    (Arc::new(store), dir)
}

struct WithdrawStep;

#[async_trait]
impl Workstep for WithdrawStep {
    const NAME: &'static str = "WithdrawStep";
    type Input = u32;
    type Output = u32;

    async fn execute(&self, input: &u32) -> Result<u32, WorkstepError> {
        Ok(*input)
    }
}

struct FlakyDepositStep {
    attempts_before_success: std::sync::atomic::AtomicU32,
}

#[async_trait]
impl Workstep for FlakyDepositStep {
    const NAME: &'static str = "FlakyDepositStep";
    type Input = u32;
    type Output = u32;

    async fn execute(&self, input: &u32) -> Result<u32, WorkstepError> {
        let n = self
            .attempts_before_success
            .fetch_add(1, std::sync::atomic::Ordering::SeqCst);
        if n < 2 {
            Err(WorkstepError::transient("deposit service unavailable"))
        } else {
            Ok(*input)
        }
    }
}

struct TransferWorkflow {
    amount: u32,
}

#[async_trait]
impl Workflow for TransferWorkflow {
    const NAME: &'static str = "TransferWorkflow";
    type Input = u32;
    type Output = u32;

    fn new(amount: Self::Input) -> Self {
        Self { amount }
    }

    fn retry_policy(&self) -> Option<RetryPolicy> {
        Some(RetryPolicy::exponential(
            3,
            Duration::from_millis(1),
            Duration::from_millis(10),
        ))
    }

    async fn execute(&self) -> Result<u32, WorkflowError> {
        let ctx = ExecutionContext::current().expect("workflow context installed");
        let runner = WorkstepRunner::new(ctx.store);
        let withdrawn = runner
            .run(&WithdrawStep, self.amount, WorkstepOptions::default())
            .await?;

        let deposit = FlakyDepositStep {
            attempts_before_success: std::sync::atomic::AtomicU32::new(0),
        };
        let deposited = runner
            .run(&deposit, withdrawn, WorkstepOptions::default())
            .await?;
        Ok(deposited)
    }
}

#[tokio::test]
async fn workflow_completes_and_journals_every_step_transition() {
    let (store, _dir) = fresh_store().await;
    let runner = WorkflowRunner::new(Arc::clone(&store));

    let result = runner.run::<TransferWorkflow>(100).await.unwrap();
    assert_eq!(result, 100);

    let summaries = workflow_summary(store.as_ref(), Some("TransferWorkflow"))
        .await
        .unwrap();
    assert_eq!(summaries.len(), 1);
    assert_eq!(summaries[0].instance.status, WorkflowStatus::Completed);
    assert_eq!(summaries[0].steps.len(), 2);

    let deposit_step = summaries[0]
        .steps
        .iter()
        .find(|s| s.step_name == "FlakyDepositStep")
        .unwrap();
    assert_eq!(deposit_step.attempt_number, 3);
    assert_eq!(deposit_step.status, WorkstepStatus::Completed);
}

#[tokio::test]
async fn retention_sweep_clears_instances_through_the_sqlite_store() {
    let (store, _dir) = fresh_store().await;
    let runner = WorkflowRunner::new(Arc::clone(&store));
    runner.run::<TransferWorkflow>(5).await.unwrap();

    let removed = retention_sweep(store.as_ref(), -1).await.unwrap();
    assert_eq!(removed, 1);

    let summaries = workflow_summary(store.as_ref(), None).await.unwrap();
    assert!(summaries.is_empty());
}

#[tokio::test]
async fn standalone_workstep_has_no_workflow_instance_id() {
    let (store, _dir) = fresh_store().await;
    let runner = WorkstepRunner::new(Arc::clone(&store));
    let result = runner
        .run(&WithdrawStep, 7, WorkstepOptions::default())
        .await
        .unwrap();
    assert_eq!(result, 7);

    let history = step_execution_history(store.as_ref(), "WithdrawStep.execute")
        .await
        .unwrap();
    assert_eq!(history.len(), 1);
    assert_eq!(history[0].workflow_instance_id, None);
}
