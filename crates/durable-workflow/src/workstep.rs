//! Workstep definitions and the runner that wraps a call with retrying
//! execution and lifecycle journaling.

use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use chrono::Utc;
use serde::Serialize;
use tracing::{debug, info, warn};

use crate::context::ExecutionContext;
use crate::error::WorkstepError;
use crate::persistence::{InstanceStore, NewWorkstepInstance, WorkstepInstance};
use crate::retry::RetryPolicy;
use crate::status::WorkstepStatus;

/// Decoration-time metadata for a workstep invocation.
#[derive(Debug, Clone, Default)]
pub struct WorkstepOptions {
    /// Business-level step id. Defaults to `"{TypeName}.{method}"` when
    /// omitted, mirroring the reference implementation's fallback.
    pub step_id: Option<String>,
    pub bian_sd: Option<String>,
    /// Explicit, step-level retry policy: highest-precedence override.
    pub retry_policy: Option<RetryPolicy>,
}

const DEFAULT_BIAN_SD: &str = "UNKNOWN?";

/// An asynchronous unit of work that may fail and be retried.
#[async_trait]
pub trait Workstep: Send + Sync {
    /// Name recorded as `step_name`; typically the type or method name.
    const NAME: &'static str;

    type Input: Serialize + Send + Sync;
    type Output: Serialize + Send + Sync;

    async fn execute(&self, input: &Self::Input) -> Result<Self::Output, WorkstepError>;

    /// Instance-level retry policy: precedence below an explicit
    /// [`WorkstepOptions::retry_policy`], above the ambient workflow policy.
    fn instance_retry_policy(&self) -> Option<RetryPolicy> {
        None
    }
}

/// A blocking (synchronous) unit of work that may fail and be retried.
pub trait BlockingWorkstep: Send + Sync {
    const NAME: &'static str;

    type Input: Serialize + Send + Sync;
    type Output: Serialize + Send + Sync;

    fn execute(&self, input: &Self::Input) -> Result<Self::Output, WorkstepError>;

    fn instance_retry_policy(&self) -> Option<RetryPolicy> {
        None
    }
}

/// Resolve the effective retry policy by precedence: explicit step-level,
/// then instance-level, then the ambient workflow policy, then a default.
fn determine_retry_policy(
    step_retry_policy: Option<RetryPolicy>,
    instance_retry_policy: Option<RetryPolicy>,
    workflow_retry_policy: Option<RetryPolicy>,
) -> RetryPolicy {
    if let Some(policy) = step_retry_policy {
        debug!("using explicit step retry policy");
        return policy;
    }
    if let Some(policy) = instance_retry_policy {
        debug!("using instance retry policy");
        return policy;
    }
    if let Some(policy) = workflow_retry_policy {
        debug!("inheriting workflow retry policy");
        return policy;
    }
    debug!("using default retry policy");
    RetryPolicy::default()
}

fn serialize_result<T: Serialize>(value: &T) -> String {
    serde_json::to_string(value).unwrap_or_else(|_| serde_json::json!(null).to_string())
}

fn serialize_payload<T: Serialize>(value: &T) -> Option<String> {
    serde_json::to_string(value).ok()
}

/// Runs [`Workstep`]/[`BlockingWorkstep`] implementations against a store,
/// owning the shared attempt-loop and row-lifecycle bookkeeping.
pub struct WorkstepRunner {
    store: Arc<dyn InstanceStore>,
}

impl WorkstepRunner {
    pub fn new(store: Arc<dyn InstanceStore>) -> Self {
        Self { store }
    }

    fn step_id_for(type_name: &str, options: &WorkstepOptions) -> String {
        options
            .step_id
            .clone()
            .unwrap_or_else(|| format!("{type_name}.execute"))
    }

    async fn create_row(
        &self,
        step_id: &str,
        step_name: &str,
        bian_sd: &str,
        workflow_instance_id: Option<i64>,
        policy: &RetryPolicy,
        payload_data: Option<String>,
    ) -> Result<WorkstepInstance, WorkstepError> {
        self.store
            .create_workstep_instance(NewWorkstepInstance {
                workflow_instance_id,
                step_id: step_id.to_string(),
                step_name: step_name.to_string(),
                bian_sd: bian_sd.to_string(),
                max_retries: policy.max_retries(),
                retry_delay: policy.base_delay().as_secs() as u32,
                payload_data,
            })
            .await
            .map_err(|e| WorkstepError::permanent(format!("failed to create workstep row: {e}")))
    }

    /// Run an async [`Workstep`], retrying per the resolved policy.
    pub async fn run<W: Workstep>(
        &self,
        workstep: &W,
        input: W::Input,
        options: WorkstepOptions,
    ) -> Result<W::Output, WorkstepError> {
        let ctx = ExecutionContext::current();
        let workflow_retry_policy = ctx.as_ref().and_then(|c| c.workflow_retry_policy.clone());
        let workflow_instance_id = ctx.as_ref().map(|c| c.workflow_instance.id);

        let policy = determine_retry_policy(
            options.retry_policy.clone(),
            workstep.instance_retry_policy(),
            workflow_retry_policy,
        );

        let step_id = Self::step_id_for(W::NAME, &options);
        let bian_sd = options.bian_sd.clone().unwrap_or_else(|| DEFAULT_BIAN_SD.into());

        let row = self
            .create_row(
                &step_id,
                W::NAME,
                &bian_sd,
                workflow_instance_id,
                &policy,
                serialize_payload(&input),
            )
            .await?;

        info!(step_id = %step_id, max_retries = policy.max_retries(), "starting workstep execution");

        let mut attempt = 1u32;
        loop {
            self.store
                .begin_workstep_attempt(row.id, attempt, Utc::now())
                .await
                .map_err(|e| WorkstepError::permanent(e.to_string()))?;
            self.store
                .set_workstep_status(row.id, WorkstepStatus::Running, None, None, None)
                .await
                .map_err(|e| WorkstepError::permanent(e.to_string()))?;

            debug!(step_id = %step_id, attempt, "attempt");

            match workstep.execute(&input).await {
                Ok(output) => {
                    self.store
                        .set_workstep_status(
                            row.id,
                            WorkstepStatus::Completed,
                            Some(Utc::now()),
                            None,
                            Some(serialize_result(&output)),
                        )
                        .await
                        .map_err(|e| WorkstepError::permanent(e.to_string()))?;
                    info!(step_id = %step_id, attempt, "workstep completed");
                    return Ok(output);
                }
                Err(err) => {
                    self.store
                        .set_workstep_status(
                            row.id,
                            WorkstepStatus::Running,
                            Some(Utc::now()),
                            Some(err.message.clone()),
                            None,
                        )
                        .await
                        .map_err(|e| WorkstepError::permanent(e.to_string()))?;

                    if policy.should_retry(attempt, &err.kind) {
                        let delay = policy.delay_for_attempt(attempt);
                        warn!(step_id = %step_id, attempt, delay_ms = delay.as_millis() as u64, error = %err, "workstep failed, retrying");
                        tokio::time::sleep(delay).await;
                        attempt += 1;
                    } else {
                        self.store
                            .set_workstep_status(
                                row.id,
                                WorkstepStatus::Failed,
                                Some(Utc::now()),
                                Some(err.message.clone()),
                                None,
                            )
                            .await
                            .map_err(|e| WorkstepError::permanent(e.to_string()))?;
                        warn!(step_id = %step_id, attempt, error = %err, "workstep exhausted retries");
                        return Err(err);
                    }
                }
            }
        }
    }

    /// Run a [`BlockingWorkstep`] on a dedicated blocking thread, retrying
    /// per the resolved policy with a synchronous sleep between attempts.
    pub async fn run_blocking<W>(
        &self,
        workstep: Arc<W>,
        input: W::Input,
        options: WorkstepOptions,
    ) -> Result<W::Output, WorkstepError>
    where
        W: BlockingWorkstep + 'static,
        W::Input: Clone + 'static,
        W::Output: 'static,
    {
        let ctx = ExecutionContext::current();
        let workflow_retry_policy = ctx.as_ref().and_then(|c| c.workflow_retry_policy.clone());
        let workflow_instance_id = ctx.as_ref().map(|c| c.workflow_instance.id);

        let policy = determine_retry_policy(
            options.retry_policy.clone(),
            workstep.instance_retry_policy(),
            workflow_retry_policy,
        );

        let step_id = Self::step_id_for(W::NAME, &options);
        let bian_sd = options.bian_sd.clone().unwrap_or_else(|| DEFAULT_BIAN_SD.into());

        let row = self
            .create_row(
                &step_id,
                W::NAME,
                &bian_sd,
                workflow_instance_id,
                &policy,
                serialize_payload(&input),
            )
            .await?;

        info!(step_id = %step_id, max_retries = policy.max_retries(), "starting blocking workstep execution");

        let mut attempt = 1u32;
        loop {
            self.store
                .begin_workstep_attempt(row.id, attempt, Utc::now())
                .await
                .map_err(|e| WorkstepError::permanent(e.to_string()))?;
            self.store
                .set_workstep_status(row.id, WorkstepStatus::Running, None, None, None)
                .await
                .map_err(|e| WorkstepError::permanent(e.to_string()))?;

            debug!(step_id = %step_id, attempt, "blocking attempt");

            let workstep = Arc::clone(&workstep);
            let input_clone = input.clone();
            let result = tokio::task::spawn_blocking(move || workstep.execute(&input_clone))
                .await
                .map_err(|e| WorkstepError::permanent(format!("blocking task panicked: {e}")))?;

            match result {
                Ok(output) => {
                    self.store
                        .set_workstep_status(
                            row.id,
                            WorkstepStatus::Completed,
                            Some(Utc::now()),
                            None,
                            Some(serialize_result(&output)),
                        )
                        .await
                        .map_err(|e| WorkstepError::permanent(e.to_string()))?;
                    info!(step_id = %step_id, attempt, "blocking workstep completed");
                    return Ok(output);
                }
                Err(err) => {
                    self.store
                        .set_workstep_status(
                            row.id,
                            WorkstepStatus::Running,
                            Some(Utc::now()),
                            Some(err.message.clone()),
                            None,
                        )
                        .await
                        .map_err(|e| WorkstepError::permanent(e.to_string()))?;

                    if policy.should_retry(attempt, &err.kind) {
                        let delay = policy.delay_for_attempt(attempt);
                        warn!(step_id = %step_id, attempt, delay_ms = delay.as_millis() as u64, error = %err, "blocking workstep failed, retrying");
                        std::thread::sleep(delay);
                        attempt += 1;
                    } else {
                        self.store
                            .set_workstep_status(
                                row.id,
                                WorkstepStatus::Failed,
                                Some(Utc::now()),
                                Some(err.message.clone()),
                                None,
                            )
                            .await
                            .map_err(|e| WorkstepError::permanent(e.to_string()))?;
                        warn!(step_id = %step_id, attempt, error = %err, "blocking workstep exhausted retries");
                        return Err(err);
                    }
                }
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::persistence::InMemoryInstanceStore;
    use std::sync::atomic::{AtomicU32, Ordering};

    struct FlakyStep {
        fail_until_attempt: u32,
        calls: AtomicU32,
    }

    #[async_trait]
    impl Workstep for FlakyStep {
        const NAME: &'static str = "FlakyStep";
        type Input = u32;
        type Output = u32;

        async fn execute(&self, input: &u32) -> Result<u32, WorkstepError> {
            let call = self.calls.fetch_add(1, Ordering::SeqCst) + 1;
            if call < self.fail_until_attempt {
                Err(WorkstepError::transient("not yet"))
            } else {
                Ok(*input * 2)
            }
        }
    }

    struct AlwaysInvalid;

    #[async_trait]
    impl Workstep for AlwaysInvalid {
        const NAME: &'static str = "AlwaysInvalid";
        type Input = ();
        type Output = ();

        async fn execute(&self, _input: &()) -> Result<(), WorkstepError> {
            Err(WorkstepError::invalid_input("bad"))
        }
    }

    fn fast_policy(max_retries: u32) -> RetryPolicy {
        RetryPolicy::linear(max_retries, Duration::from_millis(1))
    }

    #[tokio::test]
    async fn succeeds_on_first_attempt() {
        let store = Arc::new(InMemoryInstanceStore::new());
        let runner = WorkstepRunner::new(store);
        let step = FlakyStep {
            fail_until_attempt: 1,
            calls: AtomicU32::new(0),
        };
        let result = runner
            .run(
                &step,
                21,
                WorkstepOptions {
                    retry_policy: Some(fast_policy(3)),
                    ..Default::default()
                },
            )
            .await
            .unwrap();
        assert_eq!(result, 42);
    }

    #[tokio::test]
    async fn retries_then_succeeds() {
        let store = Arc::new(InMemoryInstanceStore::new());
        let runner = WorkstepRunner::new(store);
        let step = FlakyStep {
            fail_until_attempt: 3,
            calls: AtomicU32::new(0),
        };
        let result = runner
            .run(
                &step,
                10,
                WorkstepOptions {
                    retry_policy: Some(fast_policy(5)),
                    ..Default::default()
                },
            )
            .await
            .unwrap();
        assert_eq!(result, 20);
        assert_eq!(step.calls.load(Ordering::SeqCst), 3);
    }

    #[tokio::test]
    async fn exhausts_retries_and_propagates_error() {
        let store = Arc::new(InMemoryInstanceStore::new());
        let runner = WorkstepRunner::new(store);
        let step = FlakyStep {
            fail_until_attempt: 100,
            calls: AtomicU32::new(0),
        };
        let result = runner
            .run(
                &step,
                1,
                WorkstepOptions {
                    retry_policy: Some(fast_policy(2)),
                    ..Default::default()
                },
            )
            .await;
        assert!(result.is_err());
        assert_eq!(step.calls.load(Ordering::SeqCst), 3); // 1 initial + 2 retries
    }

    #[tokio::test]
    async fn invalid_input_is_not_retried() {
        let store = Arc::new(InMemoryInstanceStore::new());
        let runner = WorkstepRunner::new(Arc::clone(&store));
        let step = AlwaysInvalid;
        let result = runner
            .run(
                &step,
                (),
                WorkstepOptions {
                    retry_policy: Some(fast_policy(5)),
                    ..Default::default()
                },
            )
            .await;
        assert!(result.is_err());

        let steps = store.list_worksteps_by_step_id("AlwaysInvalid.execute").await.unwrap();
        assert_eq!(steps.len(), 1);
        assert_eq!(steps[0].attempt_number, 1);
    }
}
