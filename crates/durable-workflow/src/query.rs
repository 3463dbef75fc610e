//! Read-side utilities: workflow summaries, per-step execution history,
//! and a retention sweep for old instances.

use chrono::{Duration as ChronoDuration, Utc};

use crate::persistence::{InstanceStore, StoreError, WorkflowSummary, WorkstepInstance};

/// Summaries of every recorded run of a workflow, most recently started
/// first, each paired with the worksteps executed under it.
pub async fn workflow_summary(
    store: &dyn InstanceStore,
    workflow_id: Option<&str>,
) -> Result<Vec<WorkflowSummary>, StoreError> {
    let instances = store.list_workflow_instances(workflow_id).await?;
    let mut summaries = Vec::with_capacity(instances.len());
    for instance in instances {
        let steps = store.list_worksteps_for_workflow(instance.id).await?;
        summaries.push(WorkflowSummary { instance, steps });
    }
    Ok(summaries)
}

/// Every recorded attempt series for a business `step_id`, most recent
/// first.
pub async fn step_execution_history(
    store: &dyn InstanceStore,
    step_id: &str,
) -> Result<Vec<WorkstepInstance>, StoreError> {
    store.list_worksteps_by_step_id(step_id).await
}

/// Delete workflow instances (and their worksteps/lifecycle rows, via
/// cascade) started more than `retain_days` ago. Returns the number of
/// workflow instances removed.
pub async fn retention_sweep(
    store: &dyn InstanceStore,
    retain_days: i64,
) -> Result<u64, StoreError> {
    let cutoff = Utc::now() - ChronoDuration::days(retain_days);
    store.delete_workflow_instances_started_before(cutoff).await
}
