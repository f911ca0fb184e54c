//! Task worker: runs the controller phases of one orchestration task

use std::sync::Arc;

use futures::stream::{self, StreamExt};
use serde_json::Value;
use tokio::sync::{Mutex, OwnedMutexGuard};
use tracing::{debug, info, warn};
use uuid::Uuid;

use crate::controller::Controller;
use crate::environment::store::FlowStore;
use crate::models::flow::FlowRule;
use crate::models::task::{FlowOutcome, OperationKind, Phase};
use crate::tasks::registry::TaskRegistry;

/// Shared handles a worker needs
#[derive(Clone)]
pub struct WorkerContext {
    pub store: Arc<dyn FlowStore>,
    pub controller: Arc<dyn Controller>,
    pub tasks: Arc<TaskRegistry>,
    pub max_in_flight: usize,
}

/// One accepted insert or replace
pub struct Job {
    pub task_id: Uuid,
    pub environment_id: u64,
    pub operation: OperationKind,
    pub definitions: Vec<Value>,
    /// Guard taken at submission when the environment was idle
    pub guard: Option<OwnedMutexGuard<()>>,
    pub lock: Arc<Mutex<()>>,
}

/// Remove every given flow from the controller, then from the store.
///
/// Controller calls run concurrently up to `max_in_flight`; store writes and
/// outcomes follow the order of `flows`.
pub async fn flush_phase(ctx: &WorkerContext, environment_id: u64, flows: Vec<FlowRule>) -> Vec<FlowOutcome> {
    let controller = ctx.controller.clone();
    let results: Vec<(usize, FlowRule, Result<(), String>)> = stream::iter(flows.into_iter().enumerate())
        .map(|(index, flow)| {
            let controller = controller.clone();
            async move {
                let result = match &flow.id {
                    Some(flow_id) => controller
                        .remove(environment_id, flow_id)
                        .await
                        .map_err(|e| e.to_string()),
                    None => Err("flow has no controller id".to_string()),
                };
                (index, flow, result)
            }
        })
        .buffered(ctx.max_in_flight.max(1))
        .collect()
        .await;

    let mut outcomes = Vec::with_capacity(results.len());
    for (index, flow, result) in results {
        let outcome = match (result, flow.id.clone()) {
            (Ok(()), Some(flow_id)) => match ctx.store.remove_flow(environment_id, &flow_id).await {
                Ok(()) => FlowOutcome::succeeded(Phase::Flush, index, Some(flow_id)),
                Err(e) => FlowOutcome::failed(Phase::Flush, index, Some(flow_id), e.to_string()),
            },
            (Ok(()), None) => FlowOutcome::failed(Phase::Flush, index, None, "flow has no controller id".into()),
            (Err(detail), Some(flow_id)) => {
                // Still live on the controller, keep it stored but flag it
                if let Err(e) = ctx.store.persist_flow(environment_id, flow.failed()).await {
                    warn!("Failed to flag flow {} as failed: {}", flow_id, e);
                }
                FlowOutcome::failed(Phase::Flush, index, Some(flow_id), detail)
            }
            (Err(detail), None) => FlowOutcome::failed(Phase::Flush, index, None, detail),
        };
        outcomes.push(outcome);
    }
    outcomes
}

/// Install every definition on the controller and persist the ones that
/// succeeded, in submission order
pub async fn insert_phase(ctx: &WorkerContext, environment_id: u64, definitions: Vec<Value>) -> Vec<FlowOutcome> {
    let controller = ctx.controller.clone();
    let results: Vec<(Value, Result<String, String>)> = stream::iter(definitions)
        .map(|definition| {
            let controller = controller.clone();
            async move {
                let result = controller
                    .install(environment_id, &definition)
                    .await
                    .map_err(|e| e.to_string());
                (definition, result)
            }
        })
        .buffered(ctx.max_in_flight.max(1))
        .collect()
        .await;

    let mut outcomes = Vec::with_capacity(results.len());
    for (index, (definition, result)) in results.into_iter().enumerate() {
        let outcome = match result {
            Ok(flow_id) => {
                let flow = FlowRule::pending(environment_id, definition).installed(flow_id.clone());
                match ctx.store.persist_flow(environment_id, flow).await {
                    Ok(()) => FlowOutcome::succeeded(Phase::Insert, index, Some(flow_id)),
                    Err(e) => FlowOutcome::failed(Phase::Insert, index, Some(flow_id), e.to_string()),
                }
            }
            Err(detail) => FlowOutcome::failed(Phase::Insert, index, None, detail),
        };
        outcomes.push(outcome);
    }
    outcomes
}

fn record(ctx: &WorkerContext, task_id: Uuid, outcomes: Vec<FlowOutcome>) {
    for outcome in outcomes {
        if !outcome.success {
            debug!(
                "Task {}: {:?} flow #{} failed: {}",
                task_id,
                outcome.phase,
                outcome.index,
                outcome.detail.as_deref().unwrap_or_default()
            );
        }
        if let Err(e) = ctx.tasks.record_outcome(task_id, outcome) {
            warn!("Failed to record outcome: {}", e);
        }
    }
}

async fn abort(ctx: &WorkerContext, task_id: Uuid, reason: &str) {
    warn!("Aborting task {}: {}", task_id, reason);
    if let Err(e) = ctx.tasks.abort(task_id, reason) {
        warn!("Failed to abort task {}: {}", task_id, e);
    }
    ctx.store.checkpoint().await;
    save_tasks(ctx).await;
}

async fn save_tasks(ctx: &WorkerContext) {
    if let Err(e) = ctx.tasks.save().await {
        warn!("Failed to save task snapshot: {}", e);
    }
}

/// Run a job to completion and finalize its task
pub async fn run(ctx: WorkerContext, job: Job) {
    let Job {
        task_id,
        environment_id,
        operation,
        definitions,
        guard,
        lock,
    } = job;

    // Serializes this run against every other flow operation on the environment
    let _guard = match guard {
        Some(guard) => guard,
        None => lock.lock_owned().await,
    };

    if let Err(e) = ctx.tasks.mark_running(task_id) {
        warn!("Task {} could not start: {}", task_id, e);
        return;
    }

    // The environment may have been deleted while the task was queued
    if let Err(e) = ctx.store.resolve(environment_id).await {
        abort(&ctx, task_id, &e.to_string()).await;
        return;
    }

    if operation == OperationKind::Replace {
        match ctx.store.list_flows(environment_id).await {
            Ok(flows) => {
                let outcomes = flush_phase(&ctx, environment_id, flows).await;
                record(&ctx, task_id, outcomes);
            }
            Err(e) => {
                abort(&ctx, task_id, &e.to_string()).await;
                return;
            }
        }
    }

    let outcomes = insert_phase(&ctx, environment_id, definitions).await;
    record(&ctx, task_id, outcomes);
    ctx.store.checkpoint().await;

    let finalized = ctx.tasks.finalize(task_id);
    save_tasks(&ctx).await;
    match finalized {
        Ok(task) => info!(
            "Task {} ({} on environment {}) finished {}: {} outcome(s), {} failed",
            task.id,
            task.operation.as_str(),
            task.environment_id,
            task.status.as_str(),
            task.outcomes.len(),
            task.failed_outcomes().count()
        ),
        Err(e) => warn!("Failed to finalize task {}: {}", task_id, e),
    }
}
