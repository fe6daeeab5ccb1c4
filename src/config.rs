// src/config.rs
use std::fs;
use std::path::{Path, PathBuf};

use serde::Deserialize;

use crate::error::{MazurkaError, MazurkaResult};

/// Server configuration. Every field has a default so a bare
/// `ServerConfig::default()` is immediately servable; values can also be
/// loaded from a JSON file and overridden by CLI flags.
#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct ServerConfig {
    /// Address to bind the listening socket to.
    pub host: String,
    /// Port to listen on. `0` asks the kernel for an ephemeral port.
    pub port: u16,
    /// Directory served as the document root. Read-only input; nothing is
    /// ever written under it.
    pub document_root: PathBuf,
    /// Number of worker threads draining the request queue.
    pub workers: usize,
    /// Maximum number of queued-but-unclaimed requests before `submit`
    /// reports backpressure.
    pub queue_capacity: usize,
    /// Maximum number of concurrently open client connections.
    pub max_connections: usize,
    /// Accept backlog passed to `listen(2)`.
    pub backlog: i32,
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            host: "0.0.0.0".to_string(),
            port: 8080,
            document_root: PathBuf::from("./public"),
            workers: num_cpus::get(),
            queue_capacity: 10_000,
            max_connections: 8192,
            backlog: 1024,
        }
    }
}

impl ServerConfig {
    /// Load configuration from a JSON file.
    pub fn from_file(path: &Path) -> MazurkaResult<Self> {
        let raw = fs::read_to_string(path)
            .map_err(|e| MazurkaError::Config(format!("{}: {}", path.display(), e)))?;
        let config: ServerConfig = serde_json::from_str(&raw)
            .map_err(|e| MazurkaError::Config(format!("{}: {}", path.display(), e)))?;
        Ok(config)
    }

    pub fn validate(&self) -> MazurkaResult<()> {
        if self.workers == 0 {
            return Err(MazurkaError::Config("workers must be at least 1".into()));
        }
        if self.queue_capacity == 0 {
            return Err(MazurkaError::Config("queue_capacity must be at least 1".into()));
        }
        if self.max_connections == 0 {
            return Err(MazurkaError::Config("max_connections must be at least 1".into()));
        }
        if !self.document_root.is_dir() {
            return Err(MazurkaError::Config(format!(
                "document_root {} is not a directory",
                self.document_root.display()
            )));
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn defaults_are_consistent() {
        let config = ServerConfig::default();
        assert!(config.workers >= 1);
        assert!(config.queue_capacity > 0);
        assert!(config.max_connections > 0);
    }

    #[test]
    fn partial_json_fills_defaults() {
        let config: ServerConfig = serde_json::from_str(r#"{"port": 9000}"#).unwrap();
        assert_eq!(config.port, 9000);
        assert_eq!(config.host, "0.0.0.0");
        assert_eq!(config.queue_capacity, 10_000);
    }

    #[test]
    fn zero_workers_rejected() {
        let config = ServerConfig {
            workers: 0,
            document_root: std::env::temp_dir(),
            ..ServerConfig::default()
        };
        assert!(config.validate().is_err());
    }
}
