//! Flow orchestrator
//!
//! Inserts and replacements are accepted synchronously and run by a task
//! worker; deletes and flushes run inline. Every operation on one
//! environment's flow set holds that environment's lock.

pub mod worker;

use std::collections::HashMap;
use std::sync::{Arc, Mutex as StdMutex};

use futures::future::join_all;
use serde_json::Value;
use tokio::sync::{Mutex, OwnedMutexGuard};
use tokio::task::JoinHandle;
use tracing::{info, warn};

use crate::controller::Controller;
use crate::environment::store::{EnvironmentStore, FlowStore};
use crate::errors::{EnvError, ItemFailure};
use crate::models::flow::{validate_definitions, FlowRule};
use crate::models::task::{OperationKind, Task};
use crate::storage::settings::OrchestratorSettings;
use crate::tasks::registry::TaskRegistry;

use self::worker::{Job, WorkerContext};

/// Orchestrator options
#[derive(Debug, Clone)]
pub struct Options {
    /// Controller calls in flight per task
    pub max_in_flight: usize,
}

impl Default for Options {
    fn default() -> Self {
        Self { max_in_flight: 8 }
    }
}

impl From<&OrchestratorSettings> for Options {
    fn from(settings: &OrchestratorSettings) -> Self {
        Self {
            max_in_flight: settings.max_in_flight.max(1),
        }
    }
}

#[derive(Default)]
struct EnvironmentLocks {
    locks: StdMutex<HashMap<u64, Arc<Mutex<()>>>>,
}

impl EnvironmentLocks {
    fn get(&self, environment_id: u64) -> Arc<Mutex<()>> {
        let mut locks = self.locks.lock().unwrap_or_else(|e| e.into_inner());
        locks.entry(environment_id).or_default().clone()
    }
}

/// Coordinates controller calls, the flow store and the task registry
pub struct FlowOrchestrator {
    ctx: WorkerContext,
    locks: EnvironmentLocks,
    workers: StdMutex<Vec<JoinHandle<()>>>,
}

impl FlowOrchestrator {
    pub fn new(
        store: Arc<dyn FlowStore>,
        controller: Arc<dyn Controller>,
        tasks: Arc<TaskRegistry>,
        options: Options,
    ) -> Self {
        Self {
            ctx: WorkerContext {
                store,
                controller,
                tasks,
                max_in_flight: options.max_in_flight.max(1),
            },
            locks: EnvironmentLocks::default(),
            workers: StdMutex::new(Vec::new()),
        }
    }

    pub fn tasks(&self) -> &Arc<TaskRegistry> {
        &self.ctx.tasks
    }

    /// Install a batch of flows; the returned task tracks the controller calls
    pub async fn insert(
        &self,
        environment_id: u64,
        definitions: Vec<Value>,
        actor_id: &str,
    ) -> Result<Task, EnvError> {
        self.submit(environment_id, definitions, actor_id, OperationKind::Insert)
            .await
    }

    /// Replace the flow set: remove every stored flow, then install the batch.
    ///
    /// The install phase runs even when some removals fail.
    pub async fn update(
        &self,
        environment_id: u64,
        definitions: Vec<Value>,
        actor_id: &str,
    ) -> Result<Task, EnvError> {
        self.submit(environment_id, definitions, actor_id, OperationKind::Replace)
            .await
    }

    async fn submit(
        &self,
        environment_id: u64,
        definitions: Vec<Value>,
        actor_id: &str,
        operation: OperationKind,
    ) -> Result<Task, EnvError> {
        validate_definitions(&definitions)?;
        self.ctx.store.resolve(environment_id).await?;

        let task = self.ctx.tasks.create(environment_id, operation, actor_id);
        if let Err(e) = self.ctx.tasks.save().await {
            warn!("Failed to save task snapshot: {}", e);
        }
        let lock = self.locks.get(environment_id);
        let guard = lock.clone().try_lock_owned().ok();
        info!(
            "Accepted {} of {} flow(s) on environment {} as task {} (actor {})",
            operation.as_str(),
            definitions.len(),
            environment_id,
            task.id,
            actor_id
        );

        let job = Job {
            task_id: task.id,
            environment_id,
            operation,
            definitions,
            guard,
            lock,
        };
        let handle = tokio::spawn(worker::run(self.ctx.clone(), job));

        let mut workers = self.workers.lock().unwrap_or_else(|e| e.into_inner());
        workers.retain(|h| !h.is_finished());
        workers.push(handle);

        Ok(task)
    }

    /// Remove one flow from the controller and the store, returning the
    /// rule as it was removed
    pub async fn delete(&self, environment_id: u64, flow_id: &str, actor_id: &str) -> Result<FlowRule, EnvError> {
        let lock = self.locks.get(environment_id);
        let _guard = lock.lock().await;

        let flows = self.ctx.store.list_flows(environment_id).await?;
        let flow = flows
            .into_iter()
            .find(|f| f.id.as_deref() == Some(flow_id))
            .ok_or_else(|| {
                EnvError::NotFound(format!(
                    "flow {} not found in environment {}",
                    flow_id, environment_id
                ))
            })?;

        self.ctx
            .controller
            .remove(environment_id, flow_id)
            .await
            .map_err(|e| EnvError::Upstream(format!("failed to remove flow {}: {}", flow_id, e)))?;
        self.ctx.store.remove_flow(environment_id, flow_id).await?;

        self.ctx.store.checkpoint().await;

        info!(
            "Deleted flow {} from environment {} (actor {})",
            flow_id, environment_id, actor_id
        );
        Ok(flow.removed())
    }

    /// Remove every flow of an environment.
    ///
    /// Flows the controller refused to remove stay stored and are listed in
    /// the `PartialFailure`.
    pub async fn flush(&self, environment_id: u64) -> Result<(), EnvError> {
        let lock = self.locks.get(environment_id);
        let _guard = lock.lock().await;

        let flows = self.ctx.store.list_flows(environment_id).await?;
        if flows.is_empty() {
            return Ok(());
        }
        let total = flows.len();

        let outcomes = worker::flush_phase(&self.ctx, environment_id, flows).await;
        self.ctx.store.checkpoint().await;

        let failures: Vec<ItemFailure> = outcomes
            .into_iter()
            .filter(|o| !o.success)
            .map(|o| ItemFailure {
                id: o.flow_id.unwrap_or_else(|| format!("#{}", o.index)),
                detail: o.detail.unwrap_or_default(),
            })
            .collect();

        if failures.is_empty() {
            info!("Flushed {} flow(s) from environment {}", total, environment_id);
            return Ok(());
        }

        warn!(
            "Flush of environment {}: {} of {} flow(s) could not be removed",
            environment_id,
            failures.len(),
            total
        );
        Err(EnvError::PartialFailure {
            message: format!(
                "{} of {} flow(s) could not be removed from environment {}",
                failures.len(),
                total,
                environment_id
            ),
            failures,
        })
    }

    /// Delete environments from `store` while holding their flow locks.
    ///
    /// `Conflict` while any of them still has an unfinished task; a worker
    /// that is already waiting would otherwise install flows on an
    /// environment that no longer exists.
    pub async fn delete_environments(&self, store: &EnvironmentStore, ids: &[u64]) -> Result<(), EnvError> {
        let _guards = self.lock_all(ids).await;

        for &environment_id in ids {
            let unfinished: Vec<String> = self
                .ctx
                .tasks
                .list(Some(environment_id))
                .iter()
                .filter(|t| !t.is_finished())
                .map(|t| t.id.to_string())
                .collect();
            if !unfinished.is_empty() {
                return Err(EnvError::Conflict(format!(
                    "environment {} has unfinished task(s) {}",
                    environment_id,
                    unfinished.join(", ")
                )));
            }
        }

        store.delete_environments(ids).await
    }

    /// Flow locks of every environment in `ids`, taken in id order
    async fn lock_all(&self, ids: &[u64]) -> Vec<OwnedMutexGuard<()>> {
        let mut sorted = ids.to_vec();
        sorted.sort_unstable();
        sorted.dedup();

        let mut guards = Vec::with_capacity(sorted.len());
        for environment_id in sorted {
            guards.push(self.locks.get(environment_id).lock_owned().await);
        }
        guards
    }

    /// Stored flows of an environment, or the single flow `flow_id`
    pub async fn list_flows(&self, environment_id: u64, flow_id: Option<&str>) -> Result<Vec<FlowRule>, EnvError> {
        let flows = self.ctx.store.list_flows(environment_id).await?;
        match flow_id {
            None => Ok(flows),
            Some(flow_id) => {
                let flow = flows
                    .into_iter()
                    .find(|f| f.id.as_deref() == Some(flow_id))
                    .ok_or_else(|| {
                        EnvError::NotFound(format!(
                            "flow {} not found in environment {}",
                            flow_id, environment_id
                        ))
                    })?;
                Ok(vec![flow])
            }
        }
    }

    /// Number of workers that have not finished yet
    pub fn in_flight(&self) -> usize {
        let workers = self.workers.lock().unwrap_or_else(|e| e.into_inner());
        workers.iter().filter(|h| !h.is_finished()).count()
    }

    /// Wait for every spawned worker to finish
    pub async fn drain(&self) {
        let handles = {
            let mut workers = self.workers.lock().unwrap_or_else(|e| e.into_inner());
            std::mem::take(&mut *workers)
        };
        if handles.is_empty() {
            return;
        }

        info!("Waiting for {} task worker(s) to finish", handles.len());
        for result in join_all(handles).await {
            if let Err(e) = result {
                warn!("Task worker failed: {}", e);
            }
        }
    }
}
