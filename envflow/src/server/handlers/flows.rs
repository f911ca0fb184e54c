//! Flow handlers

use std::sync::Arc;

use axum::extract::{Path, State};
use axum::http::StatusCode;
use axum::Json;
use openapi_server::models::{FlowTaskResponse, ResourceId};
use serde_json::{json, Value};
use tracing::info;

use crate::errors::EnvError;
use crate::models::flow::{FlowBatch, FlowRule};
use crate::models::task::Task;
use crate::schema::FLOWS_POST;
use crate::server::pipeline::{Pipeline, RequestContext};
use crate::server::state::ServerState;

fn accepted(id: ResourceId, task: &Task) -> Json<FlowTaskResponse> {
    Json(FlowTaskResponse { id, task_id: task.id })
}

async fn insert(state: &ServerState, environment_id: u64, mut ctx: RequestContext) -> Result<Task, EnvError> {
    Pipeline::write(Some(FLOWS_POST)).run(&mut ctx, state).await?;

    let batch: FlowBatch = ctx.json()?;
    let actor = ctx.actor()?;
    state
        .orchestrator
        .insert(environment_id, batch.flows, &actor.id)
        .await
}

pub async fn list_flows_handler(
    State(state): State<Arc<ServerState>>,
    Path(environment_id): Path<u64>,
    mut ctx: RequestContext,
) -> Result<Json<Vec<FlowRule>>, EnvError> {
    Pipeline::read().run(&mut ctx, &state).await?;

    let flows = state.orchestrator.list_flows(environment_id, None).await?;
    Ok(Json(flows))
}

pub async fn get_flow_handler(
    State(state): State<Arc<ServerState>>,
    Path((environment_id, flow_id)): Path<(u64, String)>,
    mut ctx: RequestContext,
) -> Result<Json<Vec<FlowRule>>, EnvError> {
    Pipeline::read().run(&mut ctx, &state).await?;

    let flows = state
        .orchestrator
        .list_flows(environment_id, Some(&flow_id))
        .await?;
    Ok(Json(flows))
}

pub async fn insert_flows_handler(
    State(state): State<Arc<ServerState>>,
    Path(environment_id): Path<u64>,
    ctx: RequestContext,
) -> Result<(StatusCode, Json<FlowTaskResponse>), EnvError> {
    let task = insert(&state, environment_id, ctx).await?;
    Ok((StatusCode::CREATED, accepted(ResourceId::Environment(environment_id), &task)))
}

pub async fn insert_flow_handler(
    State(state): State<Arc<ServerState>>,
    Path((environment_id, flow_id)): Path<(u64, String)>,
    ctx: RequestContext,
) -> Result<(StatusCode, Json<FlowTaskResponse>), EnvError> {
    let task = insert(&state, environment_id, ctx).await?;
    Ok((StatusCode::CREATED, accepted(ResourceId::Flow(flow_id), &task)))
}

/// `PUT .../flows/{flow_id}` installs the batch without flushing
pub async fn put_flow_handler(
    State(state): State<Arc<ServerState>>,
    Path((environment_id, flow_id)): Path<(u64, String)>,
    ctx: RequestContext,
) -> Result<Json<FlowTaskResponse>, EnvError> {
    let task = insert(&state, environment_id, ctx).await?;
    Ok(accepted(ResourceId::Flow(flow_id), &task))
}

/// `PUT .../flows` replaces the whole flow set
pub async fn replace_flows_handler(
    State(state): State<Arc<ServerState>>,
    Path(environment_id): Path<u64>,
    mut ctx: RequestContext,
) -> Result<Json<FlowTaskResponse>, EnvError> {
    Pipeline::write(Some(FLOWS_POST)).run(&mut ctx, &state).await?;

    let batch: FlowBatch = ctx.json()?;
    let actor = ctx.actor()?;
    let task = state
        .orchestrator
        .update(environment_id, batch.flows, &actor.id)
        .await?;
    Ok(accepted(ResourceId::Environment(environment_id), &task))
}

pub async fn delete_flow_handler(
    State(state): State<Arc<ServerState>>,
    Path((environment_id, flow_id)): Path<(u64, String)>,
    mut ctx: RequestContext,
) -> Result<Json<FlowRule>, EnvError> {
    Pipeline::write(None).run(&mut ctx, &state).await?;

    let actor = ctx.actor()?;
    let removed = state
        .orchestrator
        .delete(environment_id, &flow_id, &actor.id)
        .await?;
    Ok(Json(removed))
}

pub async fn flush_flows_handler(
    State(state): State<Arc<ServerState>>,
    Path(environment_id): Path<u64>,
    mut ctx: RequestContext,
) -> Result<Json<Value>, EnvError> {
    Pipeline::write(None).run(&mut ctx, &state).await?;

    let actor = ctx.actor()?;
    info!("Actor {} flushing environment {}", actor.id, environment_id);
    state.orchestrator.flush(environment_id).await?;
    Ok(Json(json!({})))
}
