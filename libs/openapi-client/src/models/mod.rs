//! Controller API models

use serde::{Deserialize, Serialize};

/// Flow install request
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct InstallFlowRequest {
    /// Match/action payload, forwarded verbatim
    pub flow: serde_json::Value,
}

/// Flow install response
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct InstallFlowResponse {
    pub flow_id: String,
}

/// Error response
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ErrorResponse {
    pub error: String,
    #[serde(default)]
    pub message: Option<String>,
}
