/**
 * Ground Station Configuration
 *
 * YAML file with the link address, runtime, target, queue capacities,
 * worker counts and logging settings. Every key is optional; missing keys
 * take the built-in defaults.
 */

use std::path::{Path, PathBuf};
use std::time::Duration;

use serde::{Deserialize, Serialize};
use thiserror::Error;
use tracing_subscriber::EnvFilter;

use crate::command::Position;
use crate::link::LinkAddress;
use crate::logging::LogFormat;

#[derive(Debug, Error)]
pub enum ConfigError{
    #[error("failed to read {}: {source}", path.display())]
    Io{
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("failed to parse config: {0}")]
    Parse(#[from] serde_yaml::Error),

    #[error("invalid config: {0}")]
    Invalid(String),
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct Config{
    pub connection: String,
    pub runtime_secs: u64,
    pub wait_heartbeat_secs: u64,
    pub join_timeout_secs: u64,
    pub target: Position,
    pub queues: QueueConfig,
    pub workers: WorkerConfig,
    pub logging: LoggingConfig,
}

/// Queue capacities; `<= 0` means unbounded.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct QueueConfig{
    pub heartbeat: i64,
    pub telemetry: i64,
    pub report: i64,
    pub inbox: i64, //per message kind, oldest dropped when full
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct WorkerConfig{
    pub heartbeat_sender: usize,
    pub heartbeat_receiver: usize,
    pub telemetry: usize,
    pub command: usize,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct LoggingConfig{
    pub level: String,
    pub format: LogFormat,
}

impl Default for Config{
    fn default() -> Self{
        Config{
            connection: "tcp:localhost:12345".to_string(),
            runtime_secs: 100,
            wait_heartbeat_secs: 30,
            join_timeout_secs: 5,
            target: Position::new(10.0, 20.0, 30.0),
            queues: QueueConfig::default(),
            workers: WorkerConfig::default(),
            logging: LoggingConfig::default(),
        }
    }
}

impl Default for QueueConfig{
    fn default() -> Self{
        QueueConfig{ heartbeat: 10, telemetry: 10, report: 10, inbox: 16 }
    }
}

impl Default for WorkerConfig{
    fn default() -> Self{
        WorkerConfig{ heartbeat_sender: 1, heartbeat_receiver: 1, telemetry: 1, command: 1 }
    }
}

impl Default for LoggingConfig{
    fn default() -> Self{
        LoggingConfig{ level: "info".to_string(), format: LogFormat::Pretty }
    }
}

impl Config{
    pub fn from_file<P: AsRef<Path>>(path: P) -> Result<Self, ConfigError>{
        let path = path.as_ref();
        let content = std::fs::read_to_string(path).map_err(|source| ConfigError::Io{
            path: path.to_path_buf(),
            source,
        })?;
        Self::from_yaml(&content)
    }

    pub fn from_yaml(content: &str) -> Result<Self, ConfigError>{
        let config: Config = serde_yaml::from_str(content)?;
        config.validate()?;
        Ok(config)
    }

    pub fn validate(&self) -> Result<(), ConfigError>{
        self.link_address()?;

        if self.runtime_secs == 0{
            return Err(ConfigError::Invalid("runtime_secs must be greater than 0".into()));
        }
        if self.join_timeout_secs == 0{
            return Err(ConfigError::Invalid("join_timeout_secs must be greater than 0".into()));
        }
        if !self.target.is_finite(){
            return Err(ConfigError::Invalid(format!("target {:?} is not finite", self.target)));
        }

        let counts = [
            ("heartbeat_sender", self.workers.heartbeat_sender),
            ("heartbeat_receiver", self.workers.heartbeat_receiver),
            ("telemetry", self.workers.telemetry),
            ("command", self.workers.command),
        ];
        for (name, count) in counts{
            if count == 0{
                return Err(ConfigError::Invalid(format!("workers.{name} must be at least 1")));
            }
        }

        if let Err(e) = EnvFilter::try_new(&self.logging.level){
            return Err(ConfigError::Invalid(format!("logging.level {:?}: {e}", self.logging.level)));
        }
        Ok(())
    }

    pub fn link_address(&self) -> Result<LinkAddress, ConfigError>{
        self.connection
            .parse()
            .map_err(|e: crate::link::LinkError| ConfigError::Invalid(e.to_string()))
    }

    pub fn runtime(&self) -> Duration{
        Duration::from_secs(self.runtime_secs)
    }

    pub fn wait_heartbeat(&self) -> Duration{
        Duration::from_secs(self.wait_heartbeat_secs)
    }

    pub fn join_timeout(&self) -> Duration{
        Duration::from_secs(self.join_timeout_secs)
    }
}
