//! Task registry, kept in memory and mirrored to an optional JSON snapshot

use std::collections::HashMap;
use std::sync::RwLock;
use std::time::Duration;

use chrono::Utc;
use tokio::sync::Mutex;
use tracing::{debug, info, warn};
use uuid::Uuid;

use crate::errors::EnvError;
use crate::filesys::file::File;
use crate::models::task::{FlowOutcome, OperationKind, Task};
use crate::tasks::fsm::{TaskEvent, TaskFsm};

/// Abort reason of tasks that were unfinished when the registry was last saved
pub const INTERRUPTED: &str = "interrupted by a service restart";

struct TaskEntry {
    task: Task,
    fsm: TaskFsm,
}

impl TaskEntry {
    fn apply(&mut self, event: TaskEvent) -> Result<(), EnvError> {
        self.fsm
            .process(event)
            .map_err(|e| EnvError::TaskState(format!("task {}: {}", self.task.id, e)))?;
        let now = Utc::now();
        self.task.status = self.fsm.status();
        self.task.updated_at = now;
        if self.task.status.is_terminal() {
            self.task.finished_at = Some(now);
        }
        Ok(())
    }
}

/// Registry of orchestration tasks
///
/// Every mutation goes through the task state machine, so a finalized task
/// can no longer change.
pub struct TaskRegistry {
    entries: RwLock<HashMap<Uuid, TaskEntry>>,
    capacity: usize,
    snapshot: Option<File>,
    saving: Mutex<()>,
}

impl TaskRegistry {
    /// Create a new task registry
    pub fn new(capacity: usize) -> Self {
        Self {
            entries: RwLock::new(HashMap::new()),
            capacity,
            snapshot: None,
            saving: Mutex::new(()),
        }
    }

    /// Open a registry, loading the snapshot file when it exists.
    ///
    /// Tasks that were pending or running at the time of the snapshot can no
    /// longer make progress; they come back failed.
    pub async fn open(capacity: usize, snapshot: Option<File>) -> Result<Self, EnvError> {
        let mut entries = HashMap::new();
        if let Some(file) = &snapshot {
            if file.exists().await {
                let tasks: Vec<Task> = file.read_json().await?;
                let mut interrupted = 0;
                for task in tasks {
                    let entry = restore(task)?;
                    if entry.task.error.as_deref() == Some(INTERRUPTED) {
                        interrupted += 1;
                    }
                    entries.insert(entry.task.id, entry);
                }
                info!(
                    "Loaded {} task(s) from snapshot {:?}, {} interrupted",
                    entries.len(),
                    file.path(),
                    interrupted
                );
            }
        }

        Ok(Self {
            entries: RwLock::new(entries),
            capacity,
            snapshot,
            saving: Mutex::new(()),
        })
    }

    /// Write the snapshot file, if one is configured
    pub async fn save(&self) -> Result<(), EnvError> {
        let Some(file) = &self.snapshot else {
            return Ok(());
        };
        // One writer at a time, they share the temporary file
        let _saving = self.saving.lock().await;
        let mut tasks: Vec<Task> = {
            let entries = self.entries.read().unwrap_or_else(|e| e.into_inner());
            entries.values().map(|e| e.task.clone()).collect()
        };
        tasks.sort_by(|a, b| a.created_at.cmp(&b.created_at));
        file.write_json_atomic(&tasks).await?;
        debug!("Saved {} task(s) to {:?}", tasks.len(), file.path());
        Ok(())
    }

    /// Register a pending task
    pub fn create(&self, environment_id: u64, operation: OperationKind, actor_id: &str) -> Task {
        let mut entries = self.entries.write().unwrap_or_else(|e| e.into_inner());

        // Evict the oldest finished task if at capacity
        if entries.len() >= self.capacity {
            let oldest = entries
                .values()
                .filter(|e| e.task.is_finished())
                .min_by_key(|e| e.task.updated_at)
                .map(|e| e.task.id);
            match oldest {
                Some(id) => {
                    entries.remove(&id);
                }
                None => warn!(
                    "Task registry over capacity ({}) with no finished task to evict",
                    self.capacity
                ),
            }
        }

        let now = Utc::now();
        let fsm = TaskFsm::new();
        let task = Task {
            id: Uuid::new_v4(),
            environment_id,
            operation,
            status: fsm.status(),
            actor_id: actor_id.to_string(),
            outcomes: Vec::new(),
            error: None,
            created_at: now,
            updated_at: now,
            finished_at: None,
        };

        debug!("Created task {} ({}) for environment {}", task.id, operation.as_str(), environment_id);
        entries.insert(task.id, TaskEntry { task: task.clone(), fsm });
        task
    }

    /// Move a task from pending to running
    pub fn mark_running(&self, task_id: Uuid) -> Result<(), EnvError> {
        self.with_entry(task_id, |entry| entry.apply(TaskEvent::Start))
    }

    /// Append a per-flow outcome to a running task
    pub fn record_outcome(&self, task_id: Uuid, outcome: FlowOutcome) -> Result<(), EnvError> {
        self.with_entry(task_id, |entry| {
            entry.apply(TaskEvent::Record {
                success: outcome.success,
            })?;
            entry.task.outcomes.push(outcome);
            Ok(())
        })
    }

    /// Close a running task; succeeded iff every outcome succeeded
    pub fn finalize(&self, task_id: Uuid) -> Result<Task, EnvError> {
        self.with_entry(task_id, |entry| {
            entry.apply(TaskEvent::Finalize)?;
            Ok(entry.task.clone())
        })
    }

    /// Fail a task that could not complete its work
    pub fn abort(&self, task_id: Uuid, reason: &str) -> Result<Task, EnvError> {
        self.with_entry(task_id, |entry| {
            entry.apply(TaskEvent::Abort(reason.to_string()))?;
            entry.task.error = Some(reason.to_string());
            Ok(entry.task.clone())
        })
    }

    /// Get a snapshot of a task
    pub fn get(&self, task_id: Uuid) -> Result<Task, EnvError> {
        let entries = self.entries.read().unwrap_or_else(|e| e.into_inner());
        entries
            .get(&task_id)
            .map(|e| e.task.clone())
            .ok_or_else(|| EnvError::NotFound(format!("task {}", task_id)))
    }

    /// List tasks, newest first, optionally for one environment
    pub fn list(&self, environment_id: Option<u64>) -> Vec<Task> {
        let entries = self.entries.read().unwrap_or_else(|e| e.into_inner());
        let mut tasks: Vec<Task> = entries
            .values()
            .filter(|e| environment_id.map_or(true, |id| e.task.environment_id == id))
            .map(|e| e.task.clone())
            .collect();
        tasks.sort_by(|a, b| b.created_at.cmp(&a.created_at));
        tasks
    }

    /// Drop finished tasks older than `max_age`, returning how many went
    pub fn prune(&self, max_age: Duration) -> usize {
        let cutoff = match chrono::Duration::from_std(max_age) {
            Ok(age) => Utc::now() - age,
            Err(_) => return 0,
        };
        let mut entries = self.entries.write().unwrap_or_else(|e| e.into_inner());
        let before = entries.len();
        entries.retain(|_, e| match e.task.finished_at {
            Some(finished_at) => finished_at > cutoff,
            None => true,
        });
        before - entries.len()
    }

    /// Get registry size
    pub fn len(&self) -> usize {
        let entries = self.entries.read().unwrap_or_else(|e| e.into_inner());
        entries.len()
    }

    /// Check if registry is empty
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    fn with_entry<T>(
        &self,
        task_id: Uuid,
        f: impl FnOnce(&mut TaskEntry) -> Result<T, EnvError>,
    ) -> Result<T, EnvError> {
        let mut entries = self.entries.write().unwrap_or_else(|e| e.into_inner());
        let entry = entries
            .get_mut(&task_id)
            .ok_or_else(|| EnvError::NotFound(format!("task {}", task_id)))?;
        f(entry)
    }
}

fn restore(mut task: Task) -> Result<TaskEntry, EnvError> {
    let failures = task.failed_outcomes().count();
    let fsm = TaskFsm::restore(task.status, task.outcomes.len(), failures);
    let interrupted = !task.status.is_terminal();
    if interrupted {
        task.error = Some(INTERRUPTED.to_string());
    }
    let mut entry = TaskEntry { task, fsm };
    if interrupted {
        entry.apply(TaskEvent::Abort(INTERRUPTED.to_string()))?;
    }
    Ok(entry)
}
