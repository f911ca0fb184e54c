//! Finite State Machine for orchestration tasks

use serde::{Deserialize, Serialize};

/// Task status
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum TaskStatus {
    /// Accepted, worker not started yet
    Pending,

    /// Worker is driving controller calls
    Running,

    /// Every recorded outcome succeeded
    Succeeded,

    /// At least one outcome failed, or the worker aborted
    Failed,
}

impl TaskStatus {
    pub fn is_terminal(&self) -> bool {
        matches!(self, TaskStatus::Succeeded | TaskStatus::Failed)
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            TaskStatus::Pending => "pending",
            TaskStatus::Running => "running",
            TaskStatus::Succeeded => "succeeded",
            TaskStatus::Failed => "failed",
        }
    }
}

/// Task event
#[derive(Debug, Clone)]
pub enum TaskEvent {
    /// Worker picked the task up
    Start,

    /// An outcome was recorded
    Record { success: bool },

    /// Worker is done; status derives from the recorded outcomes
    Finalize,

    /// Worker could not run at all
    Abort(String),
}

/// Task FSM
#[derive(Debug, Clone)]
pub struct TaskFsm {
    status: TaskStatus,
    recorded: usize,
    failures: usize,
}

impl TaskFsm {
    /// Create a new FSM in pending state
    pub fn new() -> Self {
        Self {
            status: TaskStatus::Pending,
            recorded: 0,
            failures: 0,
        }
    }

    /// Rebuild the machine of a task loaded from disk
    pub fn restore(status: TaskStatus, recorded: usize, failures: usize) -> Self {
        Self {
            status,
            recorded,
            failures,
        }
    }

    /// Get current status
    pub fn status(&self) -> TaskStatus {
        self.status
    }

    /// Number of recorded outcomes
    pub fn recorded(&self) -> usize {
        self.recorded
    }

    /// Number of failed outcomes
    pub fn failures(&self) -> usize {
        self.failures
    }

    /// Process an event and transition state
    pub fn process(&mut self, event: TaskEvent) -> Result<(), String> {
        let new_status = match (&self.status, &event) {
            (TaskStatus::Pending, TaskEvent::Start) => TaskStatus::Running,
            (TaskStatus::Pending, TaskEvent::Abort(_)) => TaskStatus::Failed,

            (TaskStatus::Running, TaskEvent::Record { success }) => {
                self.recorded += 1;
                if !success {
                    self.failures += 1;
                }
                TaskStatus::Running
            }
            (TaskStatus::Running, TaskEvent::Finalize) => {
                if self.failures == 0 {
                    TaskStatus::Succeeded
                } else {
                    TaskStatus::Failed
                }
            }
            (TaskStatus::Running, TaskEvent::Abort(_)) => TaskStatus::Failed,

            // Terminal states are immutable
            (status, event) => {
                return Err(format!("Invalid transition: {:?} -> {:?}", status, event));
            }
        };

        self.status = new_status;
        Ok(())
    }
}

impl Default for TaskFsm {
    fn default() -> Self {
        Self::new()
    }
}
