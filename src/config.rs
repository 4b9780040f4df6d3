//! Application configuration.
//!
//! Loaded in order of precedence, the way `config/mod.rs` in the teacher
//! loads its settings:
//! 1. Environment variables (highest priority)
//! 2. Config file (`~/.config/gemini-live-proxy/config.toml`)
//! 3. Built-in defaults (lowest priority)

use std::net::SocketAddr;
use std::path::PathBuf;

use serde::Deserialize;

use crate::error::ConfigError;
use crate::mq::RocketMqConfig;
use crate::pool::PoolConfig;
use crate::upstream::UpstreamMode;

/// Version info, surfaced by `--version`.
pub const VERSION: &str = env!("CARGO_PKG_VERSION");

#[derive(Debug, Deserialize, Default)]
struct FileConfig {
    bind_addr: Option<String>,
    log_level: Option<String>,
    use_vertex: Option<bool>,
    vertex_project_id: Option<String>,
    vertex_location: Option<String>,
    vertex_credentials_path: Option<String>,
    development_api_key: Option<String>,
    pool_size: Option<usize>,
    max_workers: Option<usize>,
    creation_concurrency: Option<usize>,
    batch_size: Option<usize>,
    mq_name_server: Option<String>,
    mq_access_key: Option<String>,
    mq_secret_key: Option<String>,
    mq_instance_id: Option<String>,
    mq_group_name: Option<String>,
    mq_topic: Option<String>,
}

#[derive(Debug, Clone)]
pub struct Config {
    pub bind_addr: SocketAddr,
    pub log_level: String,
    pub upstream_mode: UpstreamMode,
    pub pool: PoolConfig,
    pub mq: RocketMqConfig,
}

impl Config {
    pub fn config_path() -> Option<PathBuf> {
        dirs::home_dir().map(|p| p.join(".config").join("gemini-live-proxy").join("config.toml"))
    }

    fn load_file_config() -> FileConfig {
        let Some(path) = Self::config_path() else {
            return FileConfig::default();
        };
        match std::fs::read_to_string(&path) {
            Ok(contents) => toml::from_str(&contents).unwrap_or_else(|e| {
                tracing::warn!(path = %path.display(), error = %e, "failed to parse config file, using defaults");
                FileConfig::default()
            }),
            Err(_) => FileConfig::default(),
        }
    }

    /// Load configuration: env > file > defaults.
    pub fn from_env() -> Self {
        let file = Self::load_file_config();

        let bind_addr_str = std::env::var("GEMINI_PROXY_BIND").ok().or(file.bind_addr).unwrap_or_else(|| "127.0.0.1:8080".to_string());
        let bind_addr = bind_addr_str.parse().unwrap_or_else(|e| {
            tracing::warn!(value = %bind_addr_str, error = %e, "invalid bind address, falling back to 127.0.0.1:8080");
            "127.0.0.1:8080".parse().unwrap()
        });

        let log_level = std::env::var("RUST_LOG").ok().or(file.log_level).unwrap_or_else(|| "info".to_string());

        let use_vertex = std::env::var("VERTEX_API")
            .ok()
            .map(|v| v == "1" || v.eq_ignore_ascii_case("true"))
            .or(file.use_vertex)
            .unwrap_or(false);

        let upstream_mode = if use_vertex {
            UpstreamMode::Vertex {
                project_id: std::env::var("VERTEX_PROJECT_ID")
                    .ok()
                    .or(file.vertex_project_id)
                    .unwrap_or_else(|| "wdtest-001".to_string()),
                location: std::env::var("VERTEX_LOCATION")
                    .ok()
                    .or(file.vertex_location)
                    .unwrap_or_else(|| "us-central1".to_string()),
                credentials_path: std::env::var("VERTEX_CREDENTIALS_PATH")
                    .ok()
                    .or(file.vertex_credentials_path)
                    .unwrap_or_else(|| "./service-account.json".to_string()),
            }
        } else {
            UpstreamMode::Development {
                api_key: std::env::var("GEMINI_API_KEY").ok().or(file.development_api_key).unwrap_or_default(),
            }
        };

        let pool = PoolConfig {
            pool_size: std::env::var("POOL_SIZE").ok().and_then(|v| v.parse().ok()).or(file.pool_size).unwrap_or(crate::pool::DEFAULT_POOL_SIZE),
            max_workers: std::env::var("POOL_MAX_WORKERS").ok().and_then(|v| v.parse().ok()).or(file.max_workers).unwrap_or(crate::pool::DEFAULT_MAX_WORKERS),
            creation_concurrency: std::env::var("POOL_CREATION_CONCURRENCY").ok().and_then(|v| v.parse().ok()).or(file.creation_concurrency).unwrap_or(crate::pool::DEFAULT_CREATION_CONCURRENCY),
            batch_size: std::env::var("POOL_BATCH_SIZE").ok().and_then(|v| v.parse().ok()).or(file.batch_size).unwrap_or(crate::pool::DEFAULT_BATCH_SIZE),
            keepalive_interval: crate::pool::DEFAULT_KEEPALIVE_INTERVAL,
        };

        let mq = RocketMqConfig {
            name_server: std::env::var("ROCKETMQ_NAME_SERVER").ok().or(file.mq_name_server).unwrap_or_else(|| "http://localhost:9876".to_string()),
            access_key: std::env::var("ROCKETMQ_ACCESS_KEY").ok().or(file.mq_access_key).unwrap_or_default(),
            secret_key: std::env::var("ROCKETMQ_SECRET_KEY").ok().or(file.mq_secret_key).unwrap_or_default(),
            instance_id: std::env::var("ROCKETMQ_INSTANCE_ID").ok().or(file.mq_instance_id).unwrap_or_default(),
            group_name: std::env::var("ROCKETMQ_GROUP_NAME").ok().or(file.mq_group_name).unwrap_or_else(|| "gemini-live-proxy".to_string()),
            topic: std::env::var("ROCKETMQ_TOPIC").ok().or(file.mq_topic).unwrap_or_else(|| "live-transcripts".to_string()),
        };

        Self { bind_addr, log_level, upstream_mode, pool, mq }
    }

    /// Catch the configuration mistakes that would otherwise surface as
    /// a confusing upstream connect failure on the first client.
    pub fn validate(&self) -> Result<(), ConfigError> {
        match &self.upstream_mode {
            UpstreamMode::Development { api_key } if api_key.is_empty() => {
                return Err(ConfigError::Missing("GEMINI_API_KEY"));
            }
            UpstreamMode::Vertex { project_id, .. } if project_id.is_empty() => {
                return Err(ConfigError::Missing("VERTEX_PROJECT_ID"));
            }
            _ => {}
        }

        if self.pool.pool_size == 0 {
            return Err(ConfigError::Invalid { field: "pool_size", reason: "must be greater than zero".to_string() });
        }

        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn config_path_is_under_dot_config() {
        if let Some(path) = Config::config_path() {
            assert!(path.ends_with(".config/gemini-live-proxy/config.toml"));
        }
    }

    #[test]
    fn validate_rejects_empty_development_api_key() {
        let config = Config {
            bind_addr: "127.0.0.1:8080".parse().unwrap(),
            log_level: "info".to_string(),
            upstream_mode: UpstreamMode::Development { api_key: String::new() },
            pool: PoolConfig::default(),
            mq: RocketMqConfig {
                name_server: String::new(),
                access_key: String::new(),
                secret_key: String::new(),
                instance_id: String::new(),
                group_name: String::new(),
                topic: String::new(),
            },
        };
        assert!(config.validate().is_err());
    }

    #[test]
    fn validate_rejects_zero_pool_size() {
        let config = Config {
            bind_addr: "127.0.0.1:8080".parse().unwrap(),
            log_level: "info".to_string(),
            upstream_mode: UpstreamMode::Development { api_key: "key".to_string() },
            pool: PoolConfig { pool_size: 0, ..PoolConfig::default() },
            mq: RocketMqConfig {
                name_server: String::new(),
                access_key: String::new(),
                secret_key: String::new(),
                instance_id: String::new(),
                group_name: String::new(),
                topic: String::new(),
            },
        };
        assert!(matches!(config.validate(), Err(ConfigError::Invalid { .. })));
    }

    #[test]
    fn validate_accepts_nonempty_development_api_key() {
        let config = Config {
            bind_addr: "127.0.0.1:8080".parse().unwrap(),
            log_level: "info".to_string(),
            upstream_mode: UpstreamMode::Development { api_key: "key".to_string() },
            pool: PoolConfig::default(),
            mq: RocketMqConfig {
                name_server: String::new(),
                access_key: String::new(),
                secret_key: String::new(),
                instance_id: String::new(),
                group_name: String::new(),
                topic: String::new(),
            },
        };
        assert!(config.validate().is_ok());
    }
}
