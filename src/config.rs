// src/config.rs

use std::env;
use std::fs;
use std::path::{Path, PathBuf};
use std::time::Duration;

use log::debug;
use serde::{Deserialize, Serialize};
use thiserror::Error;

pub const CONFIG_ENV: &str = "HOST_METRICS_CONFIG";

#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("reading config {path}: {source}")]
    Read {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },
    #[error("parsing config {path}: {source}")]
    Parse {
        path: PathBuf,
        #[source]
        source: serde_json::Error,
    },
    #[error("invalid config: {0}")]
    Invalid(String),
}

/// Host metric categories to gather. Expensive, sensitive or privileged
/// categories are off by default.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct MenuConfig {
    #[serde(alias = "cpu_perc")]
    pub cpu_percent: bool,
    #[serde(alias = "virtual_mem")]
    pub virtual_memory: bool,
    #[serde(alias = "swap_mem")]
    pub swap_memory: bool,
    pub disk_usage: bool,
    #[serde(alias = "disk_io_ct")]
    pub disk_io_counters: bool,
    #[serde(alias = "net_io_ct")]
    pub net_io_counters: bool,
    // needs lm-sensors installed
    pub sensors: bool,
    // a long list on most hosts
    pub pids: bool,
    // needs elevated privileges to see other users' sockets
    #[serde(alias = "skt_conns")]
    pub socket_connections: bool,
}

impl Default for MenuConfig {
    fn default() -> Self {
        MenuConfig {
            cpu_percent: true,
            virtual_memory: true,
            swap_memory: true,
            disk_usage: true,
            disk_io_counters: true,
            net_io_counters: true,
            sensors: false,
            pids: false,
            socket_connections: false,
        }
    }
}

impl MenuConfig {
    /// A menu with every category off.
    pub fn none() -> Self {
        MenuConfig {
            cpu_percent: false,
            virtual_memory: false,
            swap_memory: false,
            disk_usage: false,
            disk_io_counters: false,
            net_io_counters: false,
            sensors: false,
            pids: false,
            socket_connections: false,
        }
    }
}

/// Per-process metric categories.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct ProcessMenu {
    pub cpu_percent: bool,
    pub memory_percent: bool,
    pub virtual_memory: bool,
    pub num_ctx_switches: bool,
    pub num_fds: bool,
    pub is_running: bool,
    pub children: bool,
    pub threads: bool,
    pub cmd_line: bool,
}

impl Default for ProcessMenu {
    fn default() -> Self {
        ProcessMenu {
            cpu_percent: true,
            memory_percent: true,
            virtual_memory: true,
            num_ctx_switches: true,
            num_fds: true,
            is_running: true,
            children: false,
            threads: false,
            cmd_line: false,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct SensorsConfig {
    pub command: String,
    pub args: Vec<String>,
}

impl Default for SensorsConfig {
    fn default() -> Self {
        SensorsConfig {
            command: "sensors".to_string(),
            args: vec!["-u".to_string()],
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct ProcessConfig {
    pub menu: ProcessMenu,
    /// Dot-separated path to the pid inside an inbound JSON event.
    pub pid_field: String,
}

impl Default for ProcessConfig {
    fn default() -> Self {
        ProcessConfig {
            menu: ProcessMenu::default(),
            pid_field: "pid".to_string(),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct AgentConfig {
    pub interval_ms: u64,       // Default: 1000
    pub disk_path: PathBuf,     // Default: "/"
    pub menu: MenuConfig,
    pub sensors: SensorsConfig,
    pub process: ProcessConfig,
}

impl Default for AgentConfig {
    fn default() -> Self {
        AgentConfig {
            interval_ms: 1000,
            disk_path: PathBuf::from("/"),
            menu: MenuConfig::default(),
            sensors: SensorsConfig::default(),
            process: ProcessConfig::default(),
        }
    }
}

impl AgentConfig {
    pub fn interval(&self) -> Duration {
        Duration::from_millis(self.interval_ms)
    }

    /// Reads and validates a JSON config file.
    pub fn load(path: &Path) -> Result<Self, ConfigError> {
        let raw = fs::read_to_string(path).map_err(|source| ConfigError::Read {
            path: path.to_path_buf(),
            source,
        })?;
        let config: AgentConfig = serde_json::from_str(&raw).map_err(|source| ConfigError::Parse {
            path: path.to_path_buf(),
            source,
        })?;
        config.validate()?;
        Ok(config)
    }

    /// `$HOST_METRICS_CONFIG`, then the per-user config file, then defaults.
    pub fn discover() -> Result<Self, ConfigError> {
        if let Ok(path) = env::var(CONFIG_ENV) {
            debug!("Loading config from ${}: {}", CONFIG_ENV, path);
            return AgentConfig::load(Path::new(&path));
        }
        if let Some(path) = default_config_path() {
            if path.exists() {
                debug!("Loading config from {}", path.display());
                return AgentConfig::load(&path);
            }
        }
        Ok(AgentConfig::default())
    }

    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.interval_ms == 0 {
            return Err(ConfigError::Invalid("interval_ms must be greater than zero".into()));
        }
        if !self.disk_path.is_absolute() {
            return Err(ConfigError::Invalid(format!(
                "disk_path must be absolute, got {:?}",
                self.disk_path
            )));
        }
        if self.sensors.command.trim().is_empty() {
            return Err(ConfigError::Invalid("sensors.command is empty".into()));
        }
        if self.process.pid_field.split('.').any(|part| part.is_empty()) {
            return Err(ConfigError::Invalid(format!(
                "process.pid_field {:?} is not a valid field path",
                self.process.pid_field
            )));
        }
        Ok(())
    }
}

pub fn default_config_path() -> Option<PathBuf> {
    dirs::config_dir().map(|dir| dir.join("host-metrics").join("config.json"))
}
