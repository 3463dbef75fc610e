//! SQLite implementation of [`InstanceStore`].
//!
//! The reference embedded store: a single file, no server to run, schema
//! applied on first connect.

use chrono::{DateTime, Utc};
use sqlx::sqlite::{SqliteConnectOptions, SqlitePoolOptions};
use sqlx::{Row, SqlitePool};
use tracing::{debug, error, instrument};

use crate::status::{parse_workflow_status, parse_workstep_status, WorkflowStatus, WorkstepStatus};

use super::model::{WorkflowInstance, WorkstepInstance, CHANGED_BY_AUTO};
use super::store::{
    new_lifecycle_id, InstanceStore, NewWorkflowInstance, NewWorkstepInstance, StoreError,
};

const SCHEMA: &str = include_str!("schema.sql");

/// Connection configuration for the embedded SQLite store.
#[derive(Debug, Clone)]
pub struct SqliteStoreConfig {
    pub path: std::path::PathBuf,
    pub max_connections: u32,
}

impl SqliteStoreConfig {
    pub fn new(path: impl Into<std::path::PathBuf>) -> Self {
        Self {
            path: path.into(),
            max_connections: 5,
        }
    }
}

/// SQLite-backed [`InstanceStore`].
///
/// # Example
///
/// ```no_run
/// use durable_workflow::persistence::{SqliteInstanceStore, SqliteStoreConfig};
///
/// # async fn run() -> anyhow::Result<()> {
/// let store = SqliteInstanceStore::connect(SqliteStoreConfig::new("workflow.db")).await?;
/// # Ok(())
/// # }
/// ```
#[derive(Clone)]
pub struct SqliteInstanceStore {
    pool: SqlitePool,
}

impl SqliteInstanceStore {
    pub async fn connect(config: SqliteStoreConfig) -> Result<Self, StoreError> {
        let options = SqliteConnectOptions::new()
            .filename(&config.path)
            .create_if_missing(true);

        let pool = SqlitePoolOptions::new()
            .max_connections(config.max_connections)
            .connect_with(options)
            .await
            .map_err(|e| StoreError::Database(e.to_string()))?;

        sqlx::query(SCHEMA)
            .execute(&pool)
            .await
            .map_err(|e| StoreError::Database(e.to_string()))?;

        Ok(Self { pool })
    }

    pub fn pool(&self) -> &SqlitePool {
        &self.pool
    }
}

fn row_to_workflow_instance(row: &sqlx::sqlite::SqliteRow) -> WorkflowInstance {
    let status_raw: String = row.get("status");
    WorkflowInstance {
        id: row.get("id"),
        workflow_id: row.get("workflow_id"),
        workflow_name: row.get("workflow_name"),
        status: parse_workflow_status(&status_raw).unwrap_or(WorkflowStatus::Failed),
        start_time: row.get("start_time"),
        end_time: row.get("end_time"),
        error_message: row.get("error_message"),
        payload_data: row.get("payload_data"),
    }
}

fn row_to_workstep_instance(row: &sqlx::sqlite::SqliteRow) -> WorkstepInstance {
    let status_raw: String = row.get("status");
    WorkstepInstance {
        id: row.get("id"),
        workflow_instance_id: row.get("workflow_instance_id"),
        step_id: row.get("step_id"),
        step_name: row.get("step_name"),
        bian_sd: row.get("bian_sd"),
        status: parse_workstep_status(&status_raw).unwrap_or(WorkstepStatus::Failed),
        start_time: row.get("start_time"),
        end_time: row.get("end_time"),
        attempt_number: row.get::<i64, _>("attempt_number") as u32,
        max_retries: row.get::<i64, _>("max_retries") as u32,
        retry_delay: row.get::<i64, _>("retry_delay") as u32,
        error_message: row.get("error_message"),
        result_data: row.get("result_data"),
        payload_data: row.get("payload_data"),
    }
}

#[async_trait::async_trait]
impl InstanceStore for SqliteInstanceStore {
    #[instrument(skip(self, new))]
    async fn create_workflow_instance(
        &self,
        new: NewWorkflowInstance,
    ) -> Result<WorkflowInstance, StoreError> {
        let start_time = Utc::now();
        let status = WorkflowStatus::Instantiated;
        let id = sqlx::query(
            r#"
            INSERT INTO workflow_instance (workflow_id, workflow_name, status, start_time, payload_data)
            VALUES (?1, ?2, ?3, ?4, ?5)
            "#,
        )
        .bind(&new.workflow_id)
        .bind(&new.workflow_name)
        .bind(status.to_string())
        .bind(start_time)
        .bind(&new.payload_data)
        .execute(&self.pool)
        .await
        .map_err(|e| {
            error!("failed to create workflow instance: {e}");
            StoreError::Database(e.to_string())
        })?
        .last_insert_rowid();

        debug!(id, workflow_id = %new.workflow_id, "created workflow instance");

        Ok(WorkflowInstance {
            id,
            workflow_id: new.workflow_id,
            workflow_name: new.workflow_name,
            status,
            start_time,
            end_time: None,
            error_message: None,
            payload_data: new.payload_data,
        })
    }

    #[instrument(skip(self))]
    async fn get_workflow_instance(&self, id: i64) -> Result<WorkflowInstance, StoreError> {
        let row = sqlx::query("SELECT * FROM workflow_instance WHERE id = ?1")
            .bind(id)
            .fetch_optional(&self.pool)
            .await
            .map_err(|e| StoreError::Database(e.to_string()))?
            .ok_or(StoreError::WorkflowNotFound(id))?;
        Ok(row_to_workflow_instance(&row))
    }

    #[instrument(skip(self))]
    async fn set_workflow_status(
        &self,
        id: i64,
        new_status: WorkflowStatus,
        end_time: Option<DateTime<Utc>>,
        error_message: Option<String>,
    ) -> Result<(), StoreError> {
        let mut tx = self
            .pool
            .begin()
            .await
            .map_err(|e| StoreError::Database(e.to_string()))?;

        let row = sqlx::query("SELECT status FROM workflow_instance WHERE id = ?1")
            .bind(id)
            .fetch_optional(&mut *tx)
            .await
            .map_err(|e| StoreError::Database(e.to_string()))?
            .ok_or(StoreError::WorkflowNotFound(id))?;
        let old_raw: String = row.get("status");
        let old_status = parse_workflow_status(&old_raw).unwrap_or(WorkflowStatus::Failed);

        if old_status != new_status && !old_status.can_transition_to(new_status) {
            return Err(StoreError::IllegalTransition {
                from: old_status.to_string(),
                to: new_status.to_string(),
            });
        }

        sqlx::query(
            r#"
            UPDATE workflow_instance
            SET status = ?1,
                end_time = COALESCE(?2, end_time),
                error_message = COALESCE(?3, error_message)
            WHERE id = ?4
            "#,
        )
        .bind(new_status.to_string())
        .bind(end_time)
        .bind(error_message)
        .bind(id)
        .execute(&mut *tx)
        .await
        .map_err(|e| StoreError::Database(e.to_string()))?;

        if old_status != new_status {
            sqlx::query(
                r#"
                INSERT INTO workflow_instance_lifecycle
                    (id, workflow_instance_id, from_state, to_state, change_dt, changed_by)
                VALUES (?1, ?2, ?3, ?4, ?5, ?6)
                "#,
            )
            .bind(new_lifecycle_id().to_string())
            .bind(id)
            .bind(old_status.to_string())
            .bind(new_status.to_string())
            .bind(Utc::now())
            .bind(CHANGED_BY_AUTO)
            .execute(&mut *tx)
            .await
            .map_err(|e| StoreError::Database(e.to_string()))?;
        }

        tx.commit()
            .await
            .map_err(|e| StoreError::Database(e.to_string()))?;
        Ok(())
    }

    #[instrument(skip(self, new))]
    async fn create_workstep_instance(
        &self,
        new: NewWorkstepInstance,
    ) -> Result<WorkstepInstance, StoreError> {
        let status = WorkstepStatus::Instantiated;
        let id = sqlx::query(
            r#"
            INSERT INTO workstep_instance
                (workflow_instance_id, step_id, step_name, bian_sd, status, attempt_number, max_retries, retry_delay, payload_data)
            VALUES (?1, ?2, ?3, ?4, ?5, 1, ?6, ?7, ?8)
            "#,
        )
        .bind(new.workflow_instance_id)
        .bind(&new.step_id)
        .bind(&new.step_name)
        .bind(&new.bian_sd)
        .bind(status.to_string())
        .bind(new.max_retries as i64)
        .bind(new.retry_delay as i64)
        .bind(&new.payload_data)
        .execute(&self.pool)
        .await
        .map_err(|e| StoreError::Database(e.to_string()))?
        .last_insert_rowid();

        debug!(id, step_id = %new.step_id, "created workstep instance");

        Ok(WorkstepInstance {
            id,
            workflow_instance_id: new.workflow_instance_id,
            step_id: new.step_id,
            step_name: new.step_name,
            bian_sd: new.bian_sd,
            status,
            start_time: None,
            end_time: None,
            attempt_number: 1,
            max_retries: new.max_retries,
            retry_delay: new.retry_delay,
            error_message: None,
            result_data: None,
            payload_data: new.payload_data,
        })
    }

    #[instrument(skip(self))]
    async fn get_workstep_instance(&self, id: i64) -> Result<WorkstepInstance, StoreError> {
        let row = sqlx::query("SELECT * FROM workstep_instance WHERE id = ?1")
            .bind(id)
            .fetch_optional(&self.pool)
            .await
            .map_err(|e| StoreError::Database(e.to_string()))?
            .ok_or(StoreError::WorkstepNotFound(id))?;
        Ok(row_to_workstep_instance(&row))
    }

    #[instrument(skip(self))]
    async fn begin_workstep_attempt(
        &self,
        id: i64,
        attempt_number: u32,
        start_time: DateTime<Utc>,
    ) -> Result<(), StoreError> {
        sqlx::query(
            "UPDATE workstep_instance SET attempt_number = ?1, start_time = ?2 WHERE id = ?3",
        )
        .bind(attempt_number as i64)
        .bind(start_time)
        .bind(id)
        .execute(&self.pool)
        .await
        .map_err(|e| StoreError::Database(e.to_string()))?;
        Ok(())
    }

    #[instrument(skip(self, result_data))]
    async fn set_workstep_status(
        &self,
        id: i64,
        new_status: WorkstepStatus,
        end_time: Option<DateTime<Utc>>,
        error_message: Option<String>,
        result_data: Option<String>,
    ) -> Result<(), StoreError> {
        let mut tx = self
            .pool
            .begin()
            .await
            .map_err(|e| StoreError::Database(e.to_string()))?;

        let row = sqlx::query("SELECT status FROM workstep_instance WHERE id = ?1")
            .bind(id)
            .fetch_optional(&mut *tx)
            .await
            .map_err(|e| StoreError::Database(e.to_string()))?
            .ok_or(StoreError::WorkstepNotFound(id))?;
        let old_raw: String = row.get("status");
        let old_status = parse_workstep_status(&old_raw).unwrap_or(WorkstepStatus::Failed);

        if old_status != new_status && !old_status.can_transition_to(new_status) {
            return Err(StoreError::IllegalTransition {
                from: old_status.to_string(),
                to: new_status.to_string(),
            });
        }

        sqlx::query(
            r#"
            UPDATE workstep_instance
            SET status = ?1,
                end_time = COALESCE(?2, end_time),
                error_message = COALESCE(?3, error_message),
                result_data = COALESCE(?4, result_data)
            WHERE id = ?5
            "#,
        )
        .bind(new_status.to_string())
        .bind(end_time)
        .bind(error_message)
        .bind(result_data)
        .bind(id)
        .execute(&mut *tx)
        .await
        .map_err(|e| StoreError::Database(e.to_string()))?;

        if old_status != new_status {
            sqlx::query(
                r#"
                INSERT INTO workstep_instance_lifecycle
                    (id, workstep_instance_id, from_state, to_state, change_dt, changed_by)
                VALUES (?1, ?2, ?3, ?4, ?5, ?6)
                "#,
            )
            .bind(new_lifecycle_id().to_string())
            .bind(id)
            .bind(old_status.to_string())
            .bind(new_status.to_string())
            .bind(Utc::now())
            .bind(CHANGED_BY_AUTO)
            .execute(&mut *tx)
            .await
            .map_err(|e| StoreError::Database(e.to_string()))?;
        }

        tx.commit()
            .await
            .map_err(|e| StoreError::Database(e.to_string()))?;
        Ok(())
    }

    #[instrument(skip(self))]
    async fn list_workflow_instances(
        &self,
        workflow_id: Option<&str>,
    ) -> Result<Vec<WorkflowInstance>, StoreError> {
        let rows = match workflow_id {
            Some(id) => {
                sqlx::query(
                    "SELECT * FROM workflow_instance WHERE workflow_id = ?1 ORDER BY start_time DESC",
                )
                .bind(id)
                .fetch_all(&self.pool)
                .await
            }
            None => {
                sqlx::query("SELECT * FROM workflow_instance ORDER BY start_time DESC")
                    .fetch_all(&self.pool)
                    .await
            }
        }
        .map_err(|e| StoreError::Database(e.to_string()))?;

        Ok(rows.iter().map(row_to_workflow_instance).collect())
    }

    #[instrument(skip(self))]
    async fn list_worksteps_for_workflow(
        &self,
        workflow_instance_id: i64,
    ) -> Result<Vec<WorkstepInstance>, StoreError> {
        let rows = sqlx::query(
            "SELECT * FROM workstep_instance WHERE workflow_instance_id = ?1 ORDER BY id ASC",
        )
        .bind(workflow_instance_id)
        .fetch_all(&self.pool)
        .await
        .map_err(|e| StoreError::Database(e.to_string()))?;

        Ok(rows.iter().map(row_to_workstep_instance).collect())
    }

    #[instrument(skip(self))]
    async fn list_worksteps_by_step_id(
        &self,
        step_id: &str,
    ) -> Result<Vec<WorkstepInstance>, StoreError> {
        let rows = sqlx::query(
            "SELECT * FROM workstep_instance WHERE step_id = ?1 ORDER BY start_time DESC",
        )
        .bind(step_id)
        .fetch_all(&self.pool)
        .await
        .map_err(|e| StoreError::Database(e.to_string()))?;

        Ok(rows.iter().map(row_to_workstep_instance).collect())
    }

    #[instrument(skip(self))]
    async fn delete_workflow_instances_started_before(
        &self,
        cutoff: DateTime<Utc>,
    ) -> Result<u64, StoreError> {
        let result = sqlx::query("DELETE FROM workflow_instance WHERE start_time < ?1")
            .bind(cutoff)
            .execute(&self.pool)
            .await
            .map_err(|e| StoreError::Database(e.to_string()))?;
        Ok(result.rows_affected())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    async fn temp_store() -> (SqliteInstanceStore, tempfile::TempDir) {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("workflow.db");
        let store = SqliteInstanceStore::connect(SqliteStoreConfig::new(path))
            .await
            .unwrap();
        (store, dir)
    }

    #[tokio::test]
    async fn schema_applies_and_round_trips_an_instance() {
        let (store, _dir) = temp_store().await;
        let instance = store
            .create_workflow_instance(NewWorkflowInstance {
                workflow_id: "wf-1".into(),
                workflow_name: "MyWorkflow".into(),
                payload_data: Some(r#"{"amount":10}"#.into()),
            })
            .await
            .unwrap();

        let fetched = store.get_workflow_instance(instance.id).await.unwrap();
        assert_eq!(fetched.workflow_id, "wf-1");
        assert_eq!(fetched.status, WorkflowStatus::Instantiated);
    }

    #[tokio::test]
    async fn status_transition_is_journaled_in_sqlite() {
        let (store, _dir) = temp_store().await;
        let instance = store
            .create_workflow_instance(NewWorkflowInstance {
                workflow_id: "wf-1".into(),
                workflow_name: "MyWorkflow".into(),
                payload_data: None,
            })
            .await
            .unwrap();

        store
            .set_workflow_status(instance.id, WorkflowStatus::Running, None, None)
            .await
            .unwrap();

        let row = sqlx::query(
            "SELECT COUNT(*) as c FROM workflow_instance_lifecycle WHERE workflow_instance_id = ?1",
        )
        .bind(instance.id)
        .fetch_one(store.pool())
        .await
        .unwrap();
        let count: i64 = row.get("c");
        assert_eq!(count, 1);
    }
}
