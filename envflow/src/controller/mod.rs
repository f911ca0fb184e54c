//! SDN controller clients

pub mod http;
pub mod memory;

use std::sync::Arc;

use async_trait::async_trait;

use crate::errors::EnvError;
use crate::storage::settings::{ControllerKind, ControllerSettings};

/// Remote SDN controller
///
/// Calls may time out or fail at any point; implementations report the
/// failure, callers decide what it means for their batch.
#[async_trait]
pub trait Controller: Send + Sync {
    /// Install a flow, returning the controller-assigned flow id
    async fn install(&self, environment_id: u64, flow: &serde_json::Value)
        -> Result<String, EnvError>;

    /// Remove an installed flow
    async fn remove(&self, environment_id: u64, flow_id: &str) -> Result<(), EnvError>;
}

/// Build the controller client selected by the settings
pub fn build(settings: &ControllerSettings) -> Result<Arc<dyn Controller>, EnvError> {
    match settings.kind {
        ControllerKind::Http => {
            let client = http::HttpController::new(http::Options::from_settings(settings)?)?;
            Ok(Arc::new(client))
        }
        ControllerKind::Memory => Ok(Arc::new(memory::MemoryController::new())),
    }
}
