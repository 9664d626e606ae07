use serde::Deserialize;
use std::path::PathBuf;
use std::time::Duration;
use yard_orchestrator::CoordinatorConfig;
use yard_sync::SyncConfig;

#[derive(Debug, Clone, Deserialize)]
pub struct Config {
    #[serde(default = "default_bind_addr")]
    pub bind_addr: String,

    #[serde(default = "default_db_path")]
    pub db_path: PathBuf,

    #[serde(default = "default_heartbeat_timeout")]
    pub heartbeat_timeout_secs: u64,

    #[serde(default = "default_heartbeat_sweep")]
    pub heartbeat_sweep_secs: u64,

    #[serde(default = "default_intent_timeout")]
    pub intent_timeout_secs: u64,

    /// YAML file replacing the built-in tech stack catalog.
    #[serde(default = "default_stack_catalog")]
    pub stack_catalog: Option<PathBuf>,

    #[serde(default = "default_driver")]
    pub driver: String,
}

fn env_secs(key: &str, default: u64) -> u64 {
    std::env::var(key)
        .ok()
        .and_then(|s| s.parse().ok())
        .unwrap_or(default)
}

fn default_bind_addr() -> String {
    std::env::var("YARD_API_BIND").unwrap_or_else(|_| "0.0.0.0:3131".to_string())
}

fn default_db_path() -> PathBuf {
    if let Ok(path) = std::env::var("YARD_API_DB_PATH") {
        return PathBuf::from(path);
    }

    dirs::home_dir()
        .unwrap_or_else(|| PathBuf::from("."))
        .join(".yard")
        .join("yard.db")
}

fn default_heartbeat_timeout() -> u64 {
    env_secs("YARD_HEARTBEAT_TIMEOUT_SECS", 45)
}

fn default_heartbeat_sweep() -> u64 {
    env_secs("YARD_HEARTBEAT_SWEEP_SECS", 10)
}

fn default_intent_timeout() -> u64 {
    env_secs("YARD_INTENT_TIMEOUT_SECS", 600) // 10 minutes
}

fn default_stack_catalog() -> Option<PathBuf> {
    std::env::var("YARD_STACK_CATALOG").ok().map(PathBuf::from)
}

fn default_driver() -> String {
    std::env::var("YARD_DRIVER").unwrap_or_else(|_| "mock".to_string())
}

impl Default for Config {
    fn default() -> Self {
        Self {
            bind_addr: default_bind_addr(),
            db_path: default_db_path(),
            heartbeat_timeout_secs: default_heartbeat_timeout(),
            heartbeat_sweep_secs: default_heartbeat_sweep(),
            intent_timeout_secs: default_intent_timeout(),
            stack_catalog: default_stack_catalog(),
            driver: default_driver(),
        }
    }
}

impl Config {
    pub fn from_env() -> Self {
        Self::default()
    }

    pub fn sync_config(&self) -> SyncConfig {
        SyncConfig {
            heartbeat_timeout: Duration::from_secs(self.heartbeat_timeout_secs),
            sweep_interval: Duration::from_secs(self.heartbeat_sweep_secs.max(1)),
            ..SyncConfig::default()
        }
    }

    pub fn coordinator_config(&self) -> CoordinatorConfig {
        CoordinatorConfig {
            intent_timeout: Duration::from_secs(self.intent_timeout_secs),
            ..CoordinatorConfig::default()
        }
    }
}
