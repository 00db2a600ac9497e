//! SQLite-backed task store.
//!
//! Tasks and their execution records live in two tables. Executions are
//! keyed by an autoincrement sequence so that insertion order is append
//! order. All mutations are single statements or transactions — readers
//! never observe a task mid-mutation.

use std::collections::HashMap;
use std::path::Path;

use anyhow::{Context as _, Result};
use chrono::{DateTime, Utc};
use sqlx::{sqlite::SqliteConnectOptions, ConnectOptions, SqlitePool};
use std::str::FromStr;

use crate::model::{new_id, Task, TaskExecution};

/// Queries slower than this are logged at WARN level.
const SLOW_QUERY: std::time::Duration = std::time::Duration::from_secs(1);

/// Minimum lengths for the create-side shape checks.
const MIN_NAME_CHARS: usize = 3;
const MIN_OWNER_CHARS: usize = 2;

/// Operational store errors. `NotFound` and `Validation` are expected,
/// user-facing outcomes; `Db` is a fault.
#[derive(Debug, thiserror::Error)]
pub enum StoreError {
    #[error("task not found")]
    NotFound,
    #[error("{0}")]
    Validation(String),
    #[error("database error: {0}")]
    Db(#[from] sqlx::Error),
}

#[derive(Debug, Clone, sqlx::FromRow)]
struct TaskRow {
    id: String,
    name: String,
    owner: String,
    command: String,
}

#[derive(Debug, Clone, sqlx::FromRow)]
struct ExecutionRow {
    task_id: String,
    start_time: DateTime<Utc>,
    end_time: DateTime<Utc>,
    output: String,
}

#[derive(Clone)]
pub struct TaskStore {
    pool: SqlitePool,
}

impl TaskStore {
    /// Open (or create) the store at `{data_dir}/taskd.db`.
    pub async fn open(data_dir: &Path) -> Result<Self> {
        tokio::fs::create_dir_all(data_dir).await?;
        let db_path = data_dir.join("taskd.db");
        let opts =
            SqliteConnectOptions::from_str(&format!("sqlite://{}?mode=rwc", db_path.display()))?
                .journal_mode(sqlx::sqlite::SqliteJournalMode::Wal)
                .synchronous(sqlx::sqlite::SqliteSynchronous::Normal)
                .create_if_missing(true)
                .log_slow_statements(log::LevelFilter::Warn, SLOW_QUERY);

        let pool = SqlitePool::connect_with(opts).await?;
        let store = Self { pool };
        store.migrate().await?;
        Ok(store)
    }

    /// Wrap an existing pool (tests use `:memory:`). Caller runs `migrate`.
    pub fn new(pool: SqlitePool) -> Self {
        Self { pool }
    }

    /// Idempotent schema creation.
    pub async fn migrate(&self) -> Result<()> {
        let stmts = [
            r#"
            CREATE TABLE IF NOT EXISTS tasks (
                id         TEXT PRIMARY KEY,
                name       TEXT NOT NULL,
                owner      TEXT NOT NULL,
                command    TEXT NOT NULL,
                created_at TEXT NOT NULL
            )
            "#,
            r#"
            CREATE TABLE IF NOT EXISTS task_executions (
                seq        INTEGER PRIMARY KEY AUTOINCREMENT,
                task_id    TEXT NOT NULL REFERENCES tasks(id) ON DELETE CASCADE,
                start_time TEXT NOT NULL,
                end_time   TEXT NOT NULL,
                output     TEXT NOT NULL
            )
            "#,
            "CREATE INDEX IF NOT EXISTS idx_executions_task ON task_executions(task_id, seq)",
        ];
        for stmt in stmts {
            sqlx::query(stmt)
                .execute(&self.pool)
                .await
                .context("creating task store schema")?;
        }
        Ok(())
    }

    /// Create a task with a fresh ULID and an empty execution history.
    pub async fn create(
        &self,
        name: &str,
        owner: &str,
        command: &str,
    ) -> Result<Task, StoreError> {
        let name = name.trim();
        let owner = owner.trim();
        if name.chars().count() < MIN_NAME_CHARS {
            return Err(StoreError::Validation(format!(
                "task name must be at least {MIN_NAME_CHARS} characters"
            )));
        }
        if owner.chars().count() < MIN_OWNER_CHARS {
            return Err(StoreError::Validation(format!(
                "owner must be at least {MIN_OWNER_CHARS} characters"
            )));
        }

        let id = new_id();
        sqlx::query("INSERT INTO tasks (id, name, owner, command, created_at) VALUES (?, ?, ?, ?, ?)")
            .bind(&id)
            .bind(name)
            .bind(owner)
            .bind(command)
            .bind(Utc::now().to_rfc3339())
            .execute(&self.pool)
            .await?;

        Ok(Task {
            id,
            name: name.to_string(),
            owner: owner.to_string(),
            command: command.to_string(),
            task_executions: Vec::new(),
        })
    }

    pub async fn get(&self, id: &str) -> Result<Task, StoreError> {
        let row: TaskRow = sqlx::query_as("SELECT id, name, owner, command FROM tasks WHERE id = ?")
            .bind(id)
            .fetch_optional(&self.pool)
            .await?
            .ok_or(StoreError::NotFound)?;

        let executions: Vec<ExecutionRow> = sqlx::query_as(
            "SELECT task_id, start_time, end_time, output \
             FROM task_executions WHERE task_id = ? ORDER BY seq ASC",
        )
        .bind(id)
        .fetch_all(&self.pool)
        .await?;

        Ok(assemble(row, executions.into_iter().map(execution).collect()))
    }

    /// All tasks in creation order (rowid is insertion order; `created_at`
    /// can tie within a millisecond).
    pub async fn list(&self) -> Result<Vec<Task>, StoreError> {
        let rows: Vec<TaskRow> =
            sqlx::query_as("SELECT id, name, owner, command FROM tasks ORDER BY rowid ASC")
                .fetch_all(&self.pool)
                .await?;
        self.with_executions(rows).await
    }

    /// Tasks whose name contains `term` as a case-insensitive substring.
    pub async fn find_by_name(&self, term: &str) -> Result<Vec<Task>, StoreError> {
        let escaped = term
            .replace('\\', "\\\\")
            .replace('%', "\\%")
            .replace('_', "\\_");
        let rows: Vec<TaskRow> = sqlx::query_as(
            "SELECT id, name, owner, command FROM tasks \
             WHERE name LIKE ? ESCAPE '\\' ORDER BY rowid ASC",
        )
        .bind(format!("%{escaped}%"))
        .fetch_all(&self.pool)
        .await?;
        self.with_executions(rows).await
    }

    /// Delete a task and its execution history in one transaction.
    pub async fn delete(&self, id: &str) -> Result<(), StoreError> {
        let mut tx = self.pool.begin().await?;
        sqlx::query("DELETE FROM task_executions WHERE task_id = ?")
            .bind(id)
            .execute(&mut *tx)
            .await?;
        let affected = sqlx::query("DELETE FROM tasks WHERE id = ?")
            .bind(id)
            .execute(&mut *tx)
            .await?
            .rows_affected();
        if affected == 0 {
            return Err(StoreError::NotFound);
        }
        tx.commit().await?;
        Ok(())
    }

    /// Append one execution record and return the updated task.
    pub async fn append_execution(
        &self,
        id: &str,
        execution: TaskExecution,
    ) -> Result<Task, StoreError> {
        let mut tx = self.pool.begin().await?;
        let exists: Option<(String,)> = sqlx::query_as("SELECT id FROM tasks WHERE id = ?")
            .bind(id)
            .fetch_optional(&mut *tx)
            .await?;
        if exists.is_none() {
            return Err(StoreError::NotFound);
        }
        sqlx::query(
            "INSERT INTO task_executions (task_id, start_time, end_time, output) VALUES (?, ?, ?, ?)",
        )
        .bind(id)
        .bind(execution.start_time)
        .bind(execution.end_time)
        .bind(&execution.output)
        .execute(&mut *tx)
        .await?;
        tx.commit().await?;

        self.get(id).await
    }

    /// Attach execution histories to a batch of task rows in one query.
    async fn with_executions(&self, rows: Vec<TaskRow>) -> Result<Vec<Task>, StoreError> {
        let executions: Vec<ExecutionRow> = sqlx::query_as(
            "SELECT task_id, start_time, end_time, output FROM task_executions ORDER BY seq ASC",
        )
        .fetch_all(&self.pool)
        .await?;

        let mut by_task: HashMap<String, Vec<TaskExecution>> = HashMap::new();
        for row in executions {
            by_task
                .entry(row.task_id.clone())
                .or_default()
                .push(execution(row));
        }

        Ok(rows
            .into_iter()
            .map(|row| {
                let history = by_task.remove(&row.id).unwrap_or_default();
                assemble(row, history)
            })
            .collect())
    }
}

fn assemble(row: TaskRow, task_executions: Vec<TaskExecution>) -> Task {
    Task {
        id: row.id,
        name: row.name,
        owner: row.owner,
        command: row.command,
        task_executions,
    }
}

fn execution(row: ExecutionRow) -> TaskExecution {
    TaskExecution {
        start_time: row.start_time,
        end_time: row.end_time,
        output: row.output,
    }
}
