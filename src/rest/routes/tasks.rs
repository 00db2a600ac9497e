// rest/routes/tasks.rs — Task REST routes.

use axum::{
    extract::{Path, Query, State},
    http::StatusCode,
    Json,
};
use serde::Deserialize;
use serde_json::{json, Value};
use std::sync::Arc;

use crate::engine::ExecutionError;
use crate::model::NewTask;
use crate::service::ServiceError;
use crate::AppContext;

type RouteError = (StatusCode, Json<Value>);

/// Map a service error onto a status code and a `{"error": ...}` body the UI
/// can display directly. Timeouts carry the partial output alongside.
fn error_response(err: ServiceError) -> RouteError {
    let status = match &err {
        ServiceError::NotFound => StatusCode::NOT_FOUND,
        ServiceError::Rejected(_) | ServiceError::Validation(_) => StatusCode::BAD_REQUEST,
        ServiceError::Execution(ExecutionError::Timeout { .. }) => StatusCode::GATEWAY_TIMEOUT,
        ServiceError::Execution(_) | ServiceError::Store(_) => StatusCode::INTERNAL_SERVER_ERROR,
    };
    let mut body = json!({ "error": err.to_string() });
    if let ServiceError::Execution(ExecutionError::Timeout { partial_output, .. }) = &err {
        body["output"] = Value::String(partial_output.clone());
    }
    (status, Json(body))
}

fn to_json<T: serde::Serialize>(value: &T) -> Result<Json<Value>, RouteError> {
    serde_json::to_value(value)
        .map(Json)
        .map_err(|e| {
            (
                StatusCode::INTERNAL_SERVER_ERROR,
                Json(json!({ "error": e.to_string() })),
            )
        })
}

#[derive(Deserialize)]
pub struct TaskQuery {
    pub id: Option<String>,
    pub name: Option<String>,
}

/// `GET /api/tasks` — all tasks; `?id=` narrows to one, `?name=` searches.
pub async fn get_tasks(
    State(ctx): State<Arc<AppContext>>,
    Query(query): Query<TaskQuery>,
) -> Result<Json<Value>, RouteError> {
    if let Some(id) = query.id {
        let task = ctx.service.get_task(&id).await.map_err(error_response)?;
        return to_json(&task);
    }
    if let Some(name) = query.name {
        let tasks = ctx
            .service
            .search_tasks(&name)
            .await
            .map_err(error_response)?;
        return to_json(&tasks);
    }
    let tasks = ctx.service.list_tasks().await.map_err(error_response)?;
    to_json(&tasks)
}

#[derive(Deserialize)]
pub struct FindQuery {
    pub name: Option<String>,
}

/// `GET /api/tasks/find?name=` — search by name substring.
pub async fn find_tasks(
    State(ctx): State<Arc<AppContext>>,
    Query(query): Query<FindQuery>,
) -> Result<Json<Value>, RouteError> {
    let term = query.name.unwrap_or_default();
    let tasks = ctx
        .service
        .search_tasks(&term)
        .await
        .map_err(error_response)?;
    to_json(&tasks)
}

/// `PUT /api/tasks` — create a task from `{name, owner, command}`.
pub async fn create_task(
    State(ctx): State<Arc<AppContext>>,
    Json(body): Json<NewTask>,
) -> Result<Json<Value>, RouteError> {
    let task = ctx.service.create_task(body).await.map_err(error_response)?;
    to_json(&task)
}

/// `DELETE /api/tasks/{id}`.
pub async fn delete_task(
    State(ctx): State<Arc<AppContext>>,
    Path(id): Path<String>,
) -> Result<StatusCode, RouteError> {
    ctx.service.delete_task(&id).await.map_err(error_response)?;
    Ok(StatusCode::NO_CONTENT)
}

/// `PUT /api/tasks/execute/{id}` — run and return the updated task.
pub async fn run_task(
    State(ctx): State<Arc<AppContext>>,
    Path(id): Path<String>,
) -> Result<Json<Value>, RouteError> {
    let task = ctx.service.run_task(&id).await.map_err(error_response)?;
    to_json(&task)
}
