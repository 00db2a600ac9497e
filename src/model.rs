//! Task data model types.
//!
//! Field names serialize in camelCase because the browser UI consumes these
//! shapes verbatim (`taskExecutions`, `startTime`, `endTime`).

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// Generate a new ULID string.
pub fn new_id() -> String {
    ulid::Ulid::new().to_string()
}

/// A named, owned shell command plus its execution history.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Task {
    pub id: String,
    pub name: String,
    pub owner: String,
    pub command: String,
    /// Append-only; insertion order is completion order.
    pub task_executions: Vec<TaskExecution>,
}

/// One immutable record of a single run of a task's command.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct TaskExecution {
    pub start_time: DateTime<Utc>,
    pub end_time: DateTime<Utc>,
    pub output: String,
}

/// Creation payload: `{name, owner, command}`.
#[derive(Debug, Clone, Deserialize)]
pub struct NewTask {
    pub name: String,
    pub owner: String,
    pub command: String,
}
