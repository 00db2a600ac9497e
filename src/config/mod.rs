use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use tracing::error;

const DEFAULT_PORT: u16 = 8080;
const DEFAULT_EXEC_TIMEOUT_SECS: u64 = 60;
const DEFAULT_MAX_OUTPUT_KIB: u64 = 64;

fn default_bind_address() -> String {
    "127.0.0.1".to_string()
}

// ─── ExecutionConfig ──────────────────────────────────────────────────────────

/// Execution engine limits (`[execution]` in config.toml).
#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(default)]
pub struct ExecutionConfig {
    /// Wall-clock timeout for a single run (seconds). Default: 60.
    pub timeout_secs: u64,
    /// Captured-output cap per stream (KiB). Excess is truncated. Default: 64.
    pub max_output_kib: u64,
}

impl Default for ExecutionConfig {
    fn default() -> Self {
        Self {
            timeout_secs: DEFAULT_EXEC_TIMEOUT_SECS,
            max_output_kib: DEFAULT_MAX_OUTPUT_KIB,
        }
    }
}

impl ExecutionConfig {
    pub fn timeout(&self) -> std::time::Duration {
        std::time::Duration::from_secs(self.timeout_secs)
    }

    pub fn max_output_bytes(&self) -> usize {
        (self.max_output_kib as usize) * 1024
    }
}

// ─── DaemonConfig ─────────────────────────────────────────────────────────────

/// Resolved daemon configuration.
#[derive(Debug, Clone)]
pub struct DaemonConfig {
    pub port: u16,
    pub data_dir: PathBuf,
    pub log: String,
    pub bind_address: String,
    pub execution: ExecutionConfig,
}

/// Optional override layer read from `{data_dir}/config.toml`.
#[derive(Debug, Default, Deserialize)]
struct TomlConfig {
    port: Option<u16>,
    log: Option<String>,
    bind_address: Option<String>,
    execution: Option<ExecutionConfig>,
}

impl DaemonConfig {
    /// Build config from CLI/env args + optional TOML file.
    ///
    /// Priority (highest to lowest):
    ///   1. CLI / env — passed as `Some(value)` from clap
    ///   2. TOML file at `{data_dir}/config.toml`
    ///   3. Built-in defaults
    pub fn new(
        port: Option<u16>,
        data_dir: Option<PathBuf>,
        log: Option<String>,
        bind_address: Option<String>,
    ) -> Self {
        let data_dir = data_dir.unwrap_or_else(default_data_dir);

        // Load TOML as the lowest-priority override layer
        let toml = load_toml(&data_dir).unwrap_or_default();

        let port = port.or(toml.port).unwrap_or(DEFAULT_PORT);
        let log = log.or(toml.log).unwrap_or_else(|| "info".to_string());
        let bind_address = bind_address
            .or(toml.bind_address)
            .unwrap_or_else(default_bind_address);
        let execution = toml.execution.unwrap_or_default();

        Self {
            port,
            data_dir,
            log,
            bind_address,
            execution,
        }
    }
}

fn load_toml(data_dir: &Path) -> Option<TomlConfig> {
    let path = data_dir.join("config.toml");
    let contents = std::fs::read_to_string(&path).ok()?;
    match toml::from_str::<TomlConfig>(&contents) {
        Ok(cfg) => Some(cfg),
        Err(e) => {
            error!(path = %path.display(), err = %e, "failed to parse config.toml — using defaults");
            None
        }
    }
}

fn default_data_dir() -> PathBuf {
    #[cfg(target_os = "macos")]
    {
        if let Ok(home) = std::env::var("HOME") {
            return PathBuf::from(home)
                .join("Library")
                .join("Application Support")
                .join("taskd");
        }
    }
    #[cfg(target_os = "linux")]
    {
        if let Ok(dir) = std::env::var("XDG_DATA_HOME") {
            if !dir.is_empty() {
                return PathBuf::from(dir).join("taskd");
            }
        }
        if let Ok(home) = std::env::var("HOME") {
            return PathBuf::from(home).join(".local").join("share").join("taskd");
        }
    }
    PathBuf::from("taskd-data")
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn defaults_when_nothing_is_given() {
        let dir = tempfile::tempdir().unwrap();
        let config = DaemonConfig::new(None, Some(dir.path().to_path_buf()), None, None);
        assert_eq!(config.port, DEFAULT_PORT);
        assert_eq!(config.bind_address, "127.0.0.1");
        assert_eq!(config.execution.timeout_secs, DEFAULT_EXEC_TIMEOUT_SECS);
    }

    #[test]
    fn toml_overrides_defaults_but_not_flags() {
        let dir = tempfile::tempdir().unwrap();
        std::fs::write(
            dir.path().join("config.toml"),
            "port = 9000\n\n[execution]\ntimeout_secs = 5\n",
        )
        .unwrap();

        let from_toml = DaemonConfig::new(None, Some(dir.path().to_path_buf()), None, None);
        assert_eq!(from_toml.port, 9000);
        assert_eq!(from_toml.execution.timeout_secs, 5);

        let from_flag = DaemonConfig::new(Some(9100), Some(dir.path().to_path_buf()), None, None);
        assert_eq!(from_flag.port, 9100);
    }

    #[test]
    fn malformed_toml_falls_back_to_defaults() {
        let dir = tempfile::tempdir().unwrap();
        std::fs::write(dir.path().join("config.toml"), "port = \"not a number").unwrap();
        let config = DaemonConfig::new(None, Some(dir.path().to_path_buf()), None, None);
        assert_eq!(config.port, DEFAULT_PORT);
    }
}
