//! Settings file management

use std::path::PathBuf;

use serde::{Deserialize, Serialize};

use crate::authn::actor::Capability;
use crate::logs::LogLevel;

/// Service settings
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Settings {
    /// Log level
    #[serde(default)]
    pub log_level: LogLevel,

    /// Log output
    #[serde(default)]
    pub log: LogSettings,

    /// HTTP server
    #[serde(default)]
    pub server: ServerSettings,

    /// SDN controller
    #[serde(default)]
    pub controller: ControllerSettings,

    /// Flow orchestrator
    #[serde(default)]
    pub orchestrator: OrchestratorSettings,

    /// Task registry
    #[serde(default)]
    pub tasks: TaskSettings,

    /// API actors allowed to call the service
    #[serde(default)]
    pub actors: Vec<ActorSettings>,

    /// Optional JSON file overriding the built-in request schemas
    #[serde(default)]
    pub schema_file: Option<PathBuf>,

    /// Optional JSON snapshot of the environment store
    #[serde(default)]
    pub snapshot_file: Option<PathBuf>,

    /// Maximum delay for graceful shutdown
    #[serde(default = "default_shutdown_delay")]
    pub shutdown_delay_secs: u64,
}

fn default_shutdown_delay() -> u64 {
    30
}

impl Default for Settings {
    fn default() -> Self {
        Self {
            log_level: LogLevel::Info,
            log: LogSettings::default(),
            server: ServerSettings::default(),
            controller: ControllerSettings::default(),
            orchestrator: OrchestratorSettings::default(),
            tasks: TaskSettings::default(),
            actors: Vec::new(),
            schema_file: None,
            snapshot_file: None,
            shutdown_delay_secs: default_shutdown_delay(),
        }
    }
}

/// Log output settings
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct LogSettings {
    /// Emit JSON lines instead of plain text
    #[serde(default)]
    pub json: bool,

    /// Also write daily-rotated log files into this directory
    #[serde(default)]
    pub dir: Option<PathBuf>,
}

/// HTTP server settings
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ServerSettings {
    #[serde(default = "default_host")]
    pub host: String,

    #[serde(default = "default_port")]
    pub port: u16,
}

fn default_host() -> String {
    "127.0.0.1".to_string()
}

fn default_port() -> u16 {
    8080
}

impl Default for ServerSettings {
    fn default() -> Self {
        Self {
            host: default_host(),
            port: default_port(),
        }
    }
}

/// Which controller binding to use
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ControllerKind {
    #[default]
    Http,
    Memory,
}

/// SDN controller settings
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ControllerSettings {
    #[serde(default)]
    pub kind: ControllerKind,

    /// Base URL of the controller flow API
    #[serde(default = "default_controller_url")]
    pub base_url: String,

    /// Per-request timeout in seconds
    #[serde(default = "default_controller_timeout")]
    pub timeout_secs: u64,

    /// Retries for transient failures
    #[serde(default = "default_max_retries")]
    pub max_retries: u32,

    #[serde(default = "default_retry_base_delay")]
    pub retry_base_delay_ms: u64,

    #[serde(default = "default_retry_max_delay")]
    pub retry_max_delay_ms: u64,

    /// Bearer token sent to the controller
    #[serde(default)]
    pub token: Option<String>,
}

fn default_controller_url() -> String {
    "http://localhost:8181/sdn/v1".to_string()
}

fn default_controller_timeout() -> u64 {
    10
}

fn default_max_retries() -> u32 {
    2
}

fn default_retry_base_delay() -> u64 {
    200
}

fn default_retry_max_delay() -> u64 {
    5000
}

impl Default for ControllerSettings {
    fn default() -> Self {
        Self {
            kind: ControllerKind::default(),
            base_url: default_controller_url(),
            timeout_secs: default_controller_timeout(),
            max_retries: default_max_retries(),
            retry_base_delay_ms: default_retry_base_delay(),
            retry_max_delay_ms: default_retry_max_delay(),
            token: None,
        }
    }
}

/// Flow orchestrator settings
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct OrchestratorSettings {
    /// Controller calls in flight per task
    #[serde(default = "default_max_in_flight")]
    pub max_in_flight: usize,
}

fn default_max_in_flight() -> usize {
    8
}

impl Default for OrchestratorSettings {
    fn default() -> Self {
        Self {
            max_in_flight: default_max_in_flight(),
        }
    }
}

/// Task registry settings
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TaskSettings {
    /// Tasks kept in memory before the oldest finished one is evicted
    #[serde(default = "default_task_capacity")]
    pub capacity: usize,

    /// Age after which finished tasks are pruned
    #[serde(default = "default_retention")]
    pub retention_secs: u64,

    /// How often the janitor prunes
    #[serde(default = "default_janitor_interval")]
    pub janitor_interval_secs: u64,

    /// Optional JSON snapshot of the registry, rewritten as tasks finish
    #[serde(default)]
    pub snapshot_file: Option<PathBuf>,
}

fn default_task_capacity() -> usize {
    10_000
}

fn default_retention() -> u64 {
    86_400
}

fn default_janitor_interval() -> u64 {
    300
}

impl Default for TaskSettings {
    fn default() -> Self {
        Self {
            capacity: default_task_capacity(),
            retention_secs: default_retention(),
            janitor_interval_secs: default_janitor_interval(),
            snapshot_file: None,
        }
    }
}

/// An API actor and its capabilities
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ActorSettings {
    pub id: String,

    /// Login name, used with Basic authentication
    pub name: String,

    /// Hex SHA-256 digest of the actor token
    pub token_sha256: String,

    #[serde(default)]
    pub capabilities: Vec<Capability>,
}
