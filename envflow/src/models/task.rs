//! Orchestration task models

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::tasks::fsm::TaskStatus;

/// Flow operation tracked by a task
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum OperationKind {
    Insert,
    Replace,
    Delete,
    Flush,
}

impl OperationKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            OperationKind::Insert => "insert",
            OperationKind::Replace => "replace",
            OperationKind::Delete => "delete",
            OperationKind::Flush => "flush",
        }
    }
}

/// Phase of a task an outcome belongs to
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Phase {
    Flush,
    Insert,
}

/// Result of one controller call inside a task
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct FlowOutcome {
    pub phase: Phase,
    /// Position of the flow in the submitted batch (insert) or in the
    /// stored flow set (flush)
    pub index: usize,
    pub flow_id: Option<String>,
    pub success: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub detail: Option<String>,
}

impl FlowOutcome {
    pub fn succeeded(phase: Phase, index: usize, flow_id: Option<String>) -> Self {
        Self {
            phase,
            index,
            flow_id,
            success: true,
            detail: None,
        }
    }

    pub fn failed(phase: Phase, index: usize, flow_id: Option<String>, detail: String) -> Self {
        Self {
            phase,
            index,
            flow_id,
            success: false,
            detail: Some(detail),
        }
    }
}

/// One asynchronous orchestration run
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Task {
    pub id: Uuid,
    pub environment_id: u64,
    pub operation: OperationKind,
    pub status: TaskStatus,
    pub actor_id: String,
    pub outcomes: Vec<FlowOutcome>,
    /// Set when the worker aborted before finishing its calls
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
    pub finished_at: Option<DateTime<Utc>>,
}

impl Task {
    pub fn failed_outcomes(&self) -> impl Iterator<Item = &FlowOutcome> {
        self.outcomes.iter().filter(|o| !o.success)
    }

    pub fn is_finished(&self) -> bool {
        self.status.is_terminal()
    }
}
