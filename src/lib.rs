pub mod config;
pub mod engine;
pub mod model;
pub mod rest;
pub mod security;
pub mod service;
pub mod store;

use std::sync::Arc;

use config::DaemonConfig;
use service::TaskService;

/// Shared application state passed to every REST handler.
pub struct AppContext {
    pub config: Arc<DaemonConfig>,
    pub service: TaskService,
    pub started_at: std::time::Instant,
    /// Fresh per boot; lets a UI detect daemon restarts.
    pub instance_id: String,
}

impl AppContext {
    pub fn new(config: Arc<DaemonConfig>, service: TaskService) -> Self {
        Self {
            config,
            service,
            started_at: std::time::Instant::now(),
            instance_id: uuid::Uuid::new_v4().to_string(),
        }
    }
}
