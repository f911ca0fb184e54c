//! Flow models

use serde::{Deserialize, Serialize};

use crate::errors::EnvError;

/// Install status of a flow rule
///
/// Stored rules are `Installed`, or `Failed` when the controller refused to
/// remove them. `Removed` only appears on the rule returned by a delete.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum FlowStatus {
    Pending,
    Installed,
    Failed,
    Removed,
}

/// A single SDN flow rule scoped to one environment
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct FlowRule {
    /// Controller-assigned id, absent until the first successful install
    pub id: Option<String>,
    pub environment_id: u64,
    /// Match/action payload, opaque to envflow
    pub payload: serde_json::Value,
    pub status: FlowStatus,
}

impl FlowRule {
    /// A rule that has not been sent to the controller yet
    pub fn pending(environment_id: u64, payload: serde_json::Value) -> Self {
        Self {
            id: None,
            environment_id,
            payload,
            status: FlowStatus::Pending,
        }
    }

    /// Mark the rule as installed under the given controller id
    pub fn installed(mut self, flow_id: String) -> Self {
        self.id = Some(flow_id);
        self.status = FlowStatus::Installed;
        self
    }

    /// Mark the rule as refused by the controller on its last removal
    pub fn failed(mut self) -> Self {
        self.status = FlowStatus::Failed;
        self
    }

    /// Mark the rule as gone from the controller and the store
    pub fn removed(mut self) -> Self {
        self.status = FlowStatus::Removed;
        self
    }
}

/// Flow batch submitted to the insert and replace endpoints
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct FlowBatch {
    #[serde(default)]
    pub flows: Vec<serde_json::Value>,
}

/// Check that every definition is a non-empty JSON object
pub fn validate_definitions(definitions: &[serde_json::Value]) -> Result<(), EnvError> {
    for (index, definition) in definitions.iter().enumerate() {
        match definition.as_object() {
            Some(map) if !map.is_empty() => {}
            Some(_) => {
                return Err(EnvError::ValidationError(format!(
                    "flow #{} is an empty object",
                    index
                )))
            }
            None => {
                return Err(EnvError::ValidationError(format!(
                    "flow #{} must be a JSON object",
                    index
                )))
            }
        }
    }
    Ok(())
}
