/// Integration tests for the taskd REST API.
/// Spins up a real server on a free port and drives it over HTTP.
use std::sync::Arc;
use std::time::Duration;

use serde_json::{json, Value};
use taskd::{
    config::DaemonConfig, engine::ShellRunner, rest, service::TaskService, store::TaskStore,
    AppContext,
};

/// Start a server on a random port and return its base URL.
async fn start_test_server() -> String {
    let data_dir = tempfile::tempdir().unwrap().keep();
    let port = get_free_port();

    let config = Arc::new(DaemonConfig::new(
        Some(port),
        Some(data_dir.clone()),
        Some("warn".to_string()),
        None,
    ));
    let store = TaskStore::open(&data_dir).await.unwrap();
    let runner = Arc::new(ShellRunner::new(Duration::from_secs(10), 64 * 1024));
    let service = TaskService::new(store, runner);
    let ctx = Arc::new(AppContext::new(config, service));

    let router = rest::build_router(ctx);
    let listener = tokio::net::TcpListener::bind(("127.0.0.1", port))
        .await
        .unwrap();
    tokio::spawn(async move {
        axum::serve(listener, router).await.ok();
    });

    format!("http://127.0.0.1:{port}")
}

fn get_free_port() -> u16 {
    let listener = std::net::TcpListener::bind("127.0.0.1:0").unwrap();
    listener.local_addr().unwrap().port()
}

async fn create_task(base: &str, name: &str, owner: &str, command: &str) -> reqwest::Response {
    reqwest::Client::new()
        .put(format!("{base}/api/tasks"))
        .json(&json!({ "name": name, "owner": owner, "command": command }))
        .send()
        .await
        .unwrap()
}

#[tokio::test]
async fn health_reports_ok() {
    let base = start_test_server().await;
    let body: Value = reqwest::get(format!("{base}/api/health"))
        .await
        .unwrap()
        .json()
        .await
        .unwrap();
    assert_eq!(body["status"], "ok");
    assert!(body["instance_id"].as_str().is_some());
}

#[tokio::test]
async fn create_list_get_roundtrip() {
    let base = start_test_server().await;

    let created: Value = create_task(&base, "Print Hello", "Mahesh", "echo Hello")
        .await
        .json()
        .await
        .unwrap();
    assert_eq!(created["name"], "Print Hello");
    assert_eq!(created["owner"], "Mahesh");
    assert_eq!(created["command"], "echo Hello");
    assert_eq!(created["taskExecutions"], json!([]));
    let id = created["id"].as_str().unwrap().to_string();

    let all: Value = reqwest::get(format!("{base}/api/tasks"))
        .await
        .unwrap()
        .json()
        .await
        .unwrap();
    assert_eq!(all.as_array().unwrap().len(), 1);

    let single: Value = reqwest::get(format!("{base}/api/tasks?id={id}"))
        .await
        .unwrap()
        .json()
        .await
        .unwrap();
    assert_eq!(single["id"], id.as_str());
    assert_eq!(single["taskExecutions"], json!([]));
}

#[tokio::test]
async fn dangerous_command_is_rejected_with_400() {
    let base = start_test_server().await;

    let response = create_task(&base, "Wipe disk", "Mallory", "rm -rf /").await;
    assert_eq!(response.status(), 400);
    let body: Value = response.json().await.unwrap();
    assert!(body["error"].as_str().unwrap().contains("refused"));

    // Nothing was persisted.
    let all: Value = reqwest::get(format!("{base}/api/tasks"))
        .await
        .unwrap()
        .json()
        .await
        .unwrap();
    assert_eq!(all, json!([]));
}

#[tokio::test]
async fn short_name_is_rejected_with_400() {
    let base = start_test_server().await;
    let response = create_task(&base, "ab", "Mahesh", "echo hi").await;
    assert_eq!(response.status(), 400);
}

#[tokio::test]
async fn find_searches_by_name_substring() {
    let base = start_test_server().await;
    create_task(&base, "Print Hello", "Mahesh", "echo Hello").await;
    create_task(&base, "List files", "Mahesh", "ls").await;

    let hits: Value = reqwest::get(format!("{base}/api/tasks/find?name=hello"))
        .await
        .unwrap()
        .json()
        .await
        .unwrap();
    let hits = hits.as_array().unwrap();
    assert_eq!(hits.len(), 1);
    assert_eq!(hits[0]["name"], "Print Hello");

    // Empty search term is a validation error.
    let response = reqwest::get(format!("{base}/api/tasks/find?name=")).await.unwrap();
    assert_eq!(response.status(), 400);
}

#[tokio::test]
async fn execute_appends_a_record_with_output() {
    let base = start_test_server().await;
    let created: Value = create_task(&base, "Print Hello", "Mahesh", "echo Hello")
        .await
        .json()
        .await
        .unwrap();
    let id = created["id"].as_str().unwrap();

    let updated: Value = reqwest::Client::new()
        .put(format!("{base}/api/tasks/execute/{id}"))
        .send()
        .await
        .unwrap()
        .json()
        .await
        .unwrap();

    let executions = updated["taskExecutions"].as_array().unwrap();
    assert_eq!(executions.len(), 1);
    assert!(executions[0]["output"].as_str().unwrap().contains("Hello"));
    let start = chrono::DateTime::parse_from_rfc3339(executions[0]["startTime"].as_str().unwrap())
        .expect("startTime is RFC 3339");
    let end = chrono::DateTime::parse_from_rfc3339(executions[0]["endTime"].as_str().unwrap())
        .expect("endTime is RFC 3339");
    assert!(end >= start);
}

#[tokio::test]
async fn execute_missing_task_is_404() {
    let base = start_test_server().await;
    let response = reqwest::Client::new()
        .put(format!("{base}/api/tasks/execute/no-such-id"))
        .send()
        .await
        .unwrap();
    assert_eq!(response.status(), 404);
}

#[tokio::test]
async fn delete_removes_the_task() {
    let base = start_test_server().await;
    let created: Value = create_task(&base, "Short lived", "Mahesh", "true")
        .await
        .json()
        .await
        .unwrap();
    let id = created["id"].as_str().unwrap();

    let client = reqwest::Client::new();
    let response = client
        .delete(format!("{base}/api/tasks/{id}"))
        .send()
        .await
        .unwrap();
    assert_eq!(response.status(), 204);

    let missing = reqwest::get(format!("{base}/api/tasks?id={id}")).await.unwrap();
    assert_eq!(missing.status(), 404);

    let again = client
        .delete(format!("{base}/api/tasks/{id}"))
        .send()
        .await
        .unwrap();
    assert_eq!(again.status(), 404);
}
