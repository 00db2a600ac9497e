//! Task service façade — composes the validator, store, and engine.

use std::sync::Arc;

use chrono::Utc;
use tracing::info;

use crate::engine::{CommandRunner, ExecutionError};
use crate::model::{NewTask, Task, TaskExecution};
use crate::security::{self, RejectionReason};
use crate::store::{StoreError, TaskStore};

/// Everything a caller can get back from the service, as a closed taxonomy.
/// The REST layer maps these onto status codes; nothing here is fatal.
#[derive(Debug, thiserror::Error)]
pub enum ServiceError {
    #[error("task not found")]
    NotFound,
    #[error(transparent)]
    Rejected(#[from] RejectionReason),
    #[error("{0}")]
    Validation(String),
    #[error(transparent)]
    Execution(ExecutionError),
    #[error("storage error: {0}")]
    Store(#[source] sqlx::Error),
}

impl From<StoreError> for ServiceError {
    fn from(err: StoreError) -> Self {
        match err {
            StoreError::NotFound => Self::NotFound,
            StoreError::Validation(msg) => Self::Validation(msg),
            StoreError::Db(e) => Self::Store(e),
        }
    }
}

#[derive(Clone)]
pub struct TaskService {
    store: TaskStore,
    runner: Arc<dyn CommandRunner>,
}

impl TaskService {
    pub fn new(store: TaskStore, runner: Arc<dyn CommandRunner>) -> Self {
        Self { store, runner }
    }

    /// Validate the command, then persist the task.
    pub async fn create_task(&self, new_task: NewTask) -> Result<Task, ServiceError> {
        security::validate_command(&new_task.command)?;
        let task = self
            .store
            .create(&new_task.name, &new_task.owner, &new_task.command)
            .await?;
        info!(task_id = %task.id, name = %task.name, "task created");
        Ok(task)
    }

    pub async fn get_task(&self, id: &str) -> Result<Task, ServiceError> {
        Ok(self.store.get(id).await?)
    }

    pub async fn list_tasks(&self) -> Result<Vec<Task>, ServiceError> {
        Ok(self.store.list().await?)
    }

    /// Name-substring search. An empty term is rejected here, not in the store.
    pub async fn search_tasks(&self, term: &str) -> Result<Vec<Task>, ServiceError> {
        if term.trim().is_empty() {
            return Err(ServiceError::Validation(
                "search term must not be empty".to_string(),
            ));
        }
        Ok(self.store.find_by_name(term).await?)
    }

    pub async fn delete_task(&self, id: &str) -> Result<(), ServiceError> {
        self.store.delete(id).await?;
        info!(task_id = %id, "task deleted");
        Ok(())
    }

    /// Execute a task's command and append the record.
    ///
    /// The command is re-validated on every run, so a task created before a
    /// deny-list tightening is refused at its next execution. On timeout the
    /// partial output is still appended as a record, and the timeout error is
    /// surfaced to the caller as well.
    pub async fn run_task(&self, id: &str) -> Result<Task, ServiceError> {
        let task = self.store.get(id).await?;
        security::validate_command(&task.command)?;

        match self.runner.run(&task.command).await {
            Ok(outcome) => {
                let duration_ms = (outcome.finished_at - outcome.started_at).num_milliseconds();
                info!(
                    task_id = %task.id,
                    exit_code = outcome.exit_code,
                    duration_ms,
                    "task executed"
                );
                let execution = TaskExecution {
                    start_time: outcome.started_at,
                    end_time: outcome.finished_at,
                    output: outcome.output,
                };
                Ok(self.store.append_execution(id, execution).await?)
            }
            Err(ExecutionError::Timeout {
                timeout_secs,
                partial_output,
                started_at,
            }) => {
                let execution = TaskExecution {
                    start_time: started_at,
                    end_time: Utc::now(),
                    output: partial_output.clone(),
                };
                self.store.append_execution(id, execution).await?;
                Err(ServiceError::Execution(ExecutionError::Timeout {
                    timeout_secs,
                    partial_output,
                    started_at,
                }))
            }
            Err(err) => Err(ServiceError::Execution(err)),
        }
    }
}
