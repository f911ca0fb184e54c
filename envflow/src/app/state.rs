//! Application state management

use std::sync::Arc;

use tracing::{info, warn};

use crate::app::options::AppOptions;
use crate::authn::actor::{ActorDirectory, Authenticator};
use crate::controller::{self, Controller};
use crate::environment::store::EnvironmentStore;
use crate::errors::EnvError;
use crate::filesys::file::File;
use crate::orchestrator::FlowOrchestrator;
use crate::schema::SchemaRegistry;
use crate::server::state::ServerState;
use crate::tasks::registry::TaskRegistry;

/// Main application state
pub struct AppState {
    /// Environment hierarchy and flows
    pub store: Arc<EnvironmentStore>,

    /// Orchestration tasks
    pub tasks: Arc<TaskRegistry>,

    /// SDN controller client
    pub controller: Arc<dyn Controller>,

    /// Flow orchestrator
    pub orchestrator: Arc<FlowOrchestrator>,

    /// API authentication
    pub authenticator: Arc<dyn Authenticator>,

    /// Request schemas
    pub schemas: Arc<SchemaRegistry>,
}

impl AppState {
    /// Initialize application state with the configured controller
    pub async fn init(options: &AppOptions) -> Result<Self, EnvError> {
        let controller = controller::build(&options.controller)?;
        Self::with_controller(options, controller).await
    }

    /// Initialize application state around a given controller client
    pub async fn with_controller(
        options: &AppOptions,
        controller: Arc<dyn Controller>,
    ) -> Result<Self, EnvError> {
        info!("Initializing application state...");

        let store = Arc::new(EnvironmentStore::open(options.snapshot_file.clone().map(File::new)).await?);
        let schemas = Arc::new(SchemaRegistry::load(options.schema_file.as_deref()).await?);
        let tasks = Arc::new(
            TaskRegistry::open(
                options.task_capacity,
                options.task_snapshot_file.clone().map(File::new),
            )
            .await?,
        );

        let actors = ActorDirectory::new(&options.actors);
        if actors.is_empty() {
            warn!("No API actors configured, every authenticated request will be rejected");
        } else {
            info!("Loaded {} API actor(s)", actors.len());
        }

        let orchestrator = Arc::new(FlowOrchestrator::new(
            store.clone(),
            controller.clone(),
            tasks.clone(),
            options.orchestrator.clone(),
        ));

        Ok(Self {
            store,
            tasks,
            controller,
            orchestrator,
            authenticator: Arc::new(actors),
            schemas,
        })
    }

    /// State handed to the HTTP handlers
    pub fn server_state(&self) -> ServerState {
        ServerState::new(
            self.store.clone(),
            self.orchestrator.clone(),
            self.tasks.clone(),
            self.authenticator.clone(),
            self.schemas.clone(),
        )
    }

    /// Wait for running task workers, then persist the store and the tasks
    pub async fn shutdown(&self) -> Result<(), EnvError> {
        info!("Shutting down application state...");
        self.orchestrator.drain().await;
        self.store.save().await?;
        self.tasks.save().await
    }
}
