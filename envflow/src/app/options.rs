//! Application configuration options

use std::path::PathBuf;
use std::time::Duration;

use crate::orchestrator;
use crate::storage::settings::{ActorSettings, ControllerSettings, Settings};
use crate::workers::task_janitor;

/// Main application options
#[derive(Debug, Clone)]
pub struct AppOptions {
    /// Lifecycle configuration
    pub lifecycle: LifecycleOptions,

    /// Enable the HTTP API
    pub enable_socket_server: bool,

    /// Enable the task janitor
    pub enable_task_janitor: bool,

    /// Server configuration
    pub server: ServerOptions,

    /// SDN controller binding
    pub controller: ControllerSettings,

    /// Flow orchestrator options
    pub orchestrator: orchestrator::Options,

    /// Maximum tasks kept in the registry
    pub task_capacity: usize,

    /// Task janitor options
    pub task_janitor: task_janitor::Options,

    /// API actors
    pub actors: Vec<ActorSettings>,

    /// Schema override file
    pub schema_file: Option<PathBuf>,

    /// Environment store snapshot
    pub snapshot_file: Option<PathBuf>,

    /// Task registry snapshot
    pub task_snapshot_file: Option<PathBuf>,
}

impl Default for AppOptions {
    fn default() -> Self {
        Self {
            lifecycle: LifecycleOptions::default(),
            enable_socket_server: true,
            enable_task_janitor: true,
            server: ServerOptions::default(),
            controller: ControllerSettings::default(),
            orchestrator: orchestrator::Options::default(),
            task_capacity: 10_000,
            task_janitor: task_janitor::Options::default(),
            actors: Vec::new(),
            schema_file: None,
            snapshot_file: None,
            task_snapshot_file: None,
        }
    }
}

impl AppOptions {
    /// Options described by a settings file
    pub fn from_settings(settings: &Settings) -> Self {
        Self {
            lifecycle: LifecycleOptions {
                max_shutdown_delay: Duration::from_secs(settings.shutdown_delay_secs),
            },
            server: ServerOptions {
                host: settings.server.host.clone(),
                port: settings.server.port,
            },
            controller: settings.controller.clone(),
            orchestrator: orchestrator::Options::from(&settings.orchestrator),
            task_capacity: settings.tasks.capacity,
            task_janitor: task_janitor::Options::from(&settings.tasks),
            actors: settings.actors.clone(),
            schema_file: settings.schema_file.clone(),
            snapshot_file: settings.snapshot_file.clone(),
            task_snapshot_file: settings.tasks.snapshot_file.clone(),
            ..Default::default()
        }
    }
}

/// Lifecycle options
#[derive(Debug, Clone)]
pub struct LifecycleOptions {
    /// Maximum delay for graceful shutdown
    pub max_shutdown_delay: Duration,
}

impl Default for LifecycleOptions {
    fn default() -> Self {
        Self {
            max_shutdown_delay: Duration::from_secs(30),
        }
    }
}

/// HTTP server options
#[derive(Debug, Clone)]
pub struct ServerOptions {
    /// Host to bind to
    pub host: String,

    /// Port to listen on
    pub port: u16,
}

impl Default for ServerOptions {
    fn default() -> Self {
        Self {
            host: "127.0.0.1".to_string(),
            port: 8080,
        }
    }
}
