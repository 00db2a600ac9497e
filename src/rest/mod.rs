// rest/mod.rs — Public REST API server.
//
// Axum HTTP server bridging the browser UI to the task service.
//
// Endpoints:
//   GET    /api/tasks                 (all; ?id= single; ?name= search)
//   GET    /api/tasks/find?name=
//   PUT    /api/tasks
//   DELETE /api/tasks/{id}
//   PUT    /api/tasks/execute/{id}
//   GET    /api/health

pub mod routes;

use anyhow::Result;
use axum::{
    routing::{delete, get, put},
    Router,
};
use std::net::SocketAddr;
use std::sync::Arc;
use tower_http::cors::CorsLayer;
use tracing::info;

use crate::AppContext;

pub async fn start_rest_server(ctx: Arc<AppContext>) -> Result<()> {
    let bind = format!("{}:{}", ctx.config.bind_address, ctx.config.port);
    let addr: SocketAddr = bind.parse()?;

    let router = build_router(ctx);

    info!("REST API listening on http://{}", addr);
    let listener = tokio::net::TcpListener::bind(addr).await?;
    axum::serve(listener, router).await?;
    Ok(())
}

pub fn build_router(ctx: Arc<AppContext>) -> Router {
    Router::new()
        // Health (no auth)
        .route("/api/health", get(routes::health::health))
        // Tasks
        .route(
            "/api/tasks",
            get(routes::tasks::get_tasks).put(routes::tasks::create_task),
        )
        .route("/api/tasks/find", get(routes::tasks::find_tasks))
        .route("/api/tasks/{id}", delete(routes::tasks::delete_task))
        .route("/api/tasks/execute/{id}", put(routes::tasks::run_task))
        // The UI is served from another origin during development.
        .layer(CorsLayer::permissive())
        .with_state(ctx)
}
