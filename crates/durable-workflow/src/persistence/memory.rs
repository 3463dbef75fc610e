//! In-memory implementation of [`InstanceStore`], for tests and
//! standalone use without a database.

use std::collections::HashMap;
use std::sync::atomic::{AtomicI64, Ordering};

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use parking_lot::Mutex;

use crate::status::{WorkflowStatus, WorkstepStatus};

use super::model::{
    WorkflowInstance, WorkflowLifecycleEntry, WorkstepInstance, WorkstepLifecycleEntry,
    CHANGED_BY_AUTO,
};
use super::store::{
    new_lifecycle_id, InstanceStore, NewWorkflowInstance, NewWorkstepInstance, StoreError,
};

struct Inner {
    workflows: HashMap<i64, WorkflowInstance>,
    worksteps: HashMap<i64, WorkstepInstance>,
    workflow_lifecycle: Vec<WorkflowLifecycleEntry>,
    workstep_lifecycle: Vec<WorkstepLifecycleEntry>,
}

/// In-memory [`InstanceStore`].
///
/// Stores every row in a single mutex-guarded map, matching the
/// SQLite-backed store's all-or-nothing status-transition semantics
/// without needing an actual transaction.
///
/// # Example
///
/// ```
/// use durable_workflow::InMemoryInstanceStore;
///
/// let store = InMemoryInstanceStore::new();
/// ```
pub struct InMemoryInstanceStore {
    inner: Mutex<Inner>,
    next_workflow_id: AtomicI64,
    next_workstep_id: AtomicI64,
}

impl Default for InMemoryInstanceStore {
    fn default() -> Self {
        Self::new()
    }
}

impl InMemoryInstanceStore {
    pub fn new() -> Self {
        Self {
            inner: Mutex::new(Inner {
                workflows: HashMap::new(),
                worksteps: HashMap::new(),
                workflow_lifecycle: Vec::new(),
                workstep_lifecycle: Vec::new(),
            }),
            next_workflow_id: AtomicI64::new(1),
            next_workstep_id: AtomicI64::new(1),
        }
    }

    pub fn workflow_count(&self) -> usize {
        self.inner.lock().workflows.len()
    }

    /// Snapshot of every lifecycle row recorded for `workflow_instance_id`,
    /// oldest first. Exposed for test assertions.
    pub fn workflow_lifecycle_for(&self, workflow_instance_id: i64) -> Vec<WorkflowLifecycleEntry> {
        self.inner
            .lock()
            .workflow_lifecycle
            .iter()
            .filter(|e| e.workflow_instance_id == workflow_instance_id)
            .cloned()
            .collect()
    }

    pub fn workstep_lifecycle_for(&self, workstep_instance_id: i64) -> Vec<WorkstepLifecycleEntry> {
        self.inner
            .lock()
            .workstep_lifecycle
            .iter()
            .filter(|e| e.workstep_instance_id == workstep_instance_id)
            .cloned()
            .collect()
    }
}

#[async_trait]
impl InstanceStore for InMemoryInstanceStore {
    async fn create_workflow_instance(
        &self,
        new: NewWorkflowInstance,
    ) -> Result<WorkflowInstance, StoreError> {
        let id = self.next_workflow_id.fetch_add(1, Ordering::SeqCst);
        let instance = WorkflowInstance {
            id,
            workflow_id: new.workflow_id,
            workflow_name: new.workflow_name,
            status: WorkflowStatus::Instantiated,
            start_time: Utc::now(),
            end_time: None,
            error_message: None,
            payload_data: new.payload_data,
        };
        self.inner.lock().workflows.insert(id, instance.clone());
        Ok(instance)
    }

    async fn get_workflow_instance(&self, id: i64) -> Result<WorkflowInstance, StoreError> {
        self.inner
            .lock()
            .workflows
            .get(&id)
            .cloned()
            .ok_or(StoreError::WorkflowNotFound(id))
    }

    async fn set_workflow_status(
        &self,
        id: i64,
        new_status: WorkflowStatus,
        end_time: Option<DateTime<Utc>>,
        error_message: Option<String>,
    ) -> Result<(), StoreError> {
        let mut inner = self.inner.lock();
        let old_status = {
            let instance = inner
                .workflows
                .get(&id)
                .ok_or(StoreError::WorkflowNotFound(id))?;
            instance.status
        };

        if old_status != new_status && !old_status.can_transition_to(new_status) {
            return Err(StoreError::IllegalTransition {
                from: old_status.to_string(),
                to: new_status.to_string(),
            });
        }

        let instance = inner.workflows.get_mut(&id).unwrap();
        instance.status = new_status;
        if end_time.is_some() {
            instance.end_time = end_time;
        }
        if error_message.is_some() {
            instance.error_message = error_message;
        }

        if old_status != new_status {
            inner.workflow_lifecycle.push(WorkflowLifecycleEntry {
                id: new_lifecycle_id(),
                workflow_instance_id: id,
                from_state: old_status,
                to_state: new_status,
                change_dt: Utc::now(),
                changed_by: CHANGED_BY_AUTO.to_string(),
                notes: None,
            });
        }
        Ok(())
    }

    async fn create_workstep_instance(
        &self,
        new: NewWorkstepInstance,
    ) -> Result<WorkstepInstance, StoreError> {
        let id = self.next_workstep_id.fetch_add(1, Ordering::SeqCst);
        let instance = WorkstepInstance {
            id,
            workflow_instance_id: new.workflow_instance_id,
            step_id: new.step_id,
            step_name: new.step_name,
            bian_sd: new.bian_sd,
            status: WorkstepStatus::Instantiated,
            start_time: None,
            end_time: None,
            attempt_number: 1,
            max_retries: new.max_retries,
            retry_delay: new.retry_delay,
            error_message: None,
            result_data: None,
            payload_data: new.payload_data,
        };
        self.inner.lock().worksteps.insert(id, instance.clone());
        Ok(instance)
    }

    async fn get_workstep_instance(&self, id: i64) -> Result<WorkstepInstance, StoreError> {
        self.inner
            .lock()
            .worksteps
            .get(&id)
            .cloned()
            .ok_or(StoreError::WorkstepNotFound(id))
    }

    async fn begin_workstep_attempt(
        &self,
        id: i64,
        attempt_number: u32,
        start_time: DateTime<Utc>,
    ) -> Result<(), StoreError> {
        let mut inner = self.inner.lock();
        let instance = inner
            .worksteps
            .get_mut(&id)
            .ok_or(StoreError::WorkstepNotFound(id))?;
        instance.attempt_number = attempt_number;
        instance.start_time = Some(start_time);
        Ok(())
    }

    async fn set_workstep_status(
        &self,
        id: i64,
        new_status: WorkstepStatus,
        end_time: Option<DateTime<Utc>>,
        error_message: Option<String>,
        result_data: Option<String>,
    ) -> Result<(), StoreError> {
        let mut inner = self.inner.lock();
        let old_status = {
            let instance = inner
                .worksteps
                .get(&id)
                .ok_or(StoreError::WorkstepNotFound(id))?;
            instance.status
        };

        if old_status != new_status && !old_status.can_transition_to(new_status) {
            return Err(StoreError::IllegalTransition {
                from: old_status.to_string(),
                to: new_status.to_string(),
            });
        }

        let instance = inner.worksteps.get_mut(&id).unwrap();
        instance.status = new_status;
        if end_time.is_some() {
            instance.end_time = end_time;
        }
        if error_message.is_some() {
            instance.error_message = error_message;
        }
        if result_data.is_some() {
            instance.result_data = result_data;
        }

        if old_status != new_status {
            inner.workstep_lifecycle.push(WorkstepLifecycleEntry {
                id: new_lifecycle_id(),
                workstep_instance_id: id,
                from_state: old_status,
                to_state: new_status,
                change_dt: Utc::now(),
                changed_by: CHANGED_BY_AUTO.to_string(),
                notes: None,
            });
        }
        Ok(())
    }

    async fn list_workflow_instances(
        &self,
        workflow_id: Option<&str>,
    ) -> Result<Vec<WorkflowInstance>, StoreError> {
        let inner = self.inner.lock();
        let mut instances: Vec<WorkflowInstance> = inner
            .workflows
            .values()
            .filter(|w| workflow_id.map_or(true, |id| w.workflow_id == id))
            .cloned()
            .collect();
        instances.sort_by(|a, b| b.start_time.cmp(&a.start_time));
        Ok(instances)
    }

    async fn list_worksteps_for_workflow(
        &self,
        workflow_instance_id: i64,
    ) -> Result<Vec<WorkstepInstance>, StoreError> {
        let inner = self.inner.lock();
        let mut steps: Vec<WorkstepInstance> = inner
            .worksteps
            .values()
            .filter(|s| s.workflow_instance_id == Some(workflow_instance_id))
            .cloned()
            .collect();
        steps.sort_by_key(|s| s.id);
        Ok(steps)
    }

    async fn list_worksteps_by_step_id(
        &self,
        step_id: &str,
    ) -> Result<Vec<WorkstepInstance>, StoreError> {
        let inner = self.inner.lock();
        let mut steps: Vec<WorkstepInstance> = inner
            .worksteps
            .values()
            .filter(|s| s.step_id == step_id)
            .cloned()
            .collect();
        steps.sort_by(|a, b| b.start_time.cmp(&a.start_time));
        Ok(steps)
    }

    async fn delete_workflow_instances_started_before(
        &self,
        cutoff: DateTime<Utc>,
    ) -> Result<u64, StoreError> {
        let mut inner = self.inner.lock();
        let to_delete: Vec<i64> = inner
            .workflows
            .values()
            .filter(|w| w.start_time < cutoff)
            .map(|w| w.id)
            .collect();

        for id in &to_delete {
            inner.workflows.remove(id);
            inner.workflow_lifecycle.retain(|e| e.workflow_instance_id != *id);
            let step_ids: Vec<i64> = inner
                .worksteps
                .values()
                .filter(|s| s.workflow_instance_id == Some(*id))
                .map(|s| s.id)
                .collect();
            for step_id in step_ids {
                inner.worksteps.remove(&step_id);
                inner
                    .workstep_lifecycle
                    .retain(|e| e.workstep_instance_id != step_id);
            }
        }
        Ok(to_delete.len() as u64)
    }
}
