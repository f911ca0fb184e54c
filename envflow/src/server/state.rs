//! Server state

use std::sync::Arc;

use crate::authn::actor::Authenticator;
use crate::environment::store::EnvironmentStore;
use crate::orchestrator::FlowOrchestrator;
use crate::schema::SchemaRegistry;
use crate::tasks::registry::TaskRegistry;

/// Server state shared across handlers
pub struct ServerState {
    pub store: Arc<EnvironmentStore>,
    pub orchestrator: Arc<FlowOrchestrator>,
    pub tasks: Arc<TaskRegistry>,
    pub authenticator: Arc<dyn Authenticator>,
    pub schemas: Arc<SchemaRegistry>,
}

impl ServerState {
    pub fn new(
        store: Arc<EnvironmentStore>,
        orchestrator: Arc<FlowOrchestrator>,
        tasks: Arc<TaskRegistry>,
        authenticator: Arc<dyn Authenticator>,
        schemas: Arc<SchemaRegistry>,
    ) -> Self {
        Self {
            store,
            orchestrator,
            tasks,
            authenticator,
            schemas,
        }
    }
}
