//! Environment handlers

use std::sync::Arc;

use axum::extract::{Path, State};
use axum::http::StatusCode;
use axum::Json;
use openapi_server::models::IdResponse;
use serde::{Deserialize, Serialize};
use serde_json::{json, Map, Value};

use crate::environment::projection::Projection;
use crate::environment::search::SearchResult;
use crate::errors::EnvError;
use crate::models::environment::{BaseKind, EnvironmentPayload, NewBaseEnvironment};
use crate::schema::{ENVIRONMENT_POST, ENVIRONMENT_PUT, SIMPLE_ENV_POST};
use crate::server::pipeline::{Pipeline, RequestContext};
use crate::server::state::ServerState;

#[derive(Debug, Deserialize)]
struct EnvironmentBatch {
    environments: Vec<EnvironmentPayload>,
}

/// Parse `1;2;3`
pub fn parse_ids(raw: &str) -> Result<Vec<u64>, EnvError> {
    let ids = raw
        .split(';')
        .map(str::trim)
        .filter(|s| !s.is_empty())
        .map(|s| {
            s.parse::<u64>()
                .map_err(|_| EnvError::ValidationError(format!("invalid environment id: {}", s)))
        })
        .collect::<Result<Vec<_>, _>>()?;
    if ids.is_empty() {
        return Err(EnvError::ValidationError("no environment id given".into()));
    }
    Ok(ids)
}

fn render<T: Serialize>(
    records: &[T],
    details: &[Map<String, Value>],
    projection: &Projection,
) -> Result<Vec<Value>, EnvError> {
    let empty = Map::new();
    records
        .iter()
        .enumerate()
        .map(|(i, record)| {
            let value = serde_json::to_value(record)?;
            Ok(projection.apply(value, details.get(i).unwrap_or(&empty)))
        })
        .collect()
}

fn search_response<T>(main_property: &str, records: Vec<Value>, result: &SearchResult<T>) -> Value {
    json!({
        main_property: records,
        "total": result.total,
        "next_search": result.next_search,
        "prev_search": result.prev_search,
    })
}

fn ids_response(ids: Vec<u64>) -> Json<Vec<IdResponse>> {
    Json(ids.into_iter().map(|id| IdResponse { id }).collect())
}

// ------------------------------------------------------------------
// Base environments
// ------------------------------------------------------------------

async fn search_base(kind: BaseKind, state: &ServerState, mut ctx: RequestContext) -> Result<Json<Value>, EnvError> {
    Pipeline::search().run(&mut ctx, state).await?;

    let result = state.store.search_base(kind, &ctx.search).await?;
    let details = state.store.base_details(kind, &result.query_set).await;
    let records = render(&result.query_set, &details, &ctx.projection)?;
    Ok(Json(search_response(kind.main_property(), records, &result)))
}

async fn create_base(
    kind: BaseKind,
    state: &ServerState,
    mut ctx: RequestContext,
) -> Result<(StatusCode, Json<Vec<IdResponse>>), EnvError> {
    Pipeline::write(Some(SIMPLE_ENV_POST)).run(&mut ctx, state).await?;

    let batch = ctx
        .body
        .as_ref()
        .and_then(|body| body.get(kind.batch_field()))
        .cloned()
        .ok_or_else(|| EnvError::ValidationError(format!("missing field {}", kind.batch_field())))?;
    let batch: Vec<NewBaseEnvironment> = serde_json::from_value(batch)
        .map_err(|e| EnvError::ValidationError(format!("invalid {} batch: {}", kind, e)))?;

    let ids = state.store.create_base(kind, batch).await?;
    Ok((StatusCode::CREATED, ids_response(ids)))
}

pub async fn list_logic_handler(
    State(state): State<Arc<ServerState>>,
    ctx: RequestContext,
) -> Result<Json<Value>, EnvError> {
    search_base(BaseKind::Logic, &state, ctx).await
}

pub async fn create_logic_handler(
    State(state): State<Arc<ServerState>>,
    ctx: RequestContext,
) -> Result<(StatusCode, Json<Vec<IdResponse>>), EnvError> {
    create_base(BaseKind::Logic, &state, ctx).await
}

pub async fn list_l3_handler(
    State(state): State<Arc<ServerState>>,
    ctx: RequestContext,
) -> Result<Json<Value>, EnvError> {
    search_base(BaseKind::L3, &state, ctx).await
}

pub async fn create_l3_handler(
    State(state): State<Arc<ServerState>>,
    ctx: RequestContext,
) -> Result<(StatusCode, Json<Vec<IdResponse>>), EnvError> {
    create_base(BaseKind::L3, &state, ctx).await
}

pub async fn list_dc_handler(
    State(state): State<Arc<ServerState>>,
    ctx: RequestContext,
) -> Result<Json<Value>, EnvError> {
    search_base(BaseKind::Dc, &state, ctx).await
}

pub async fn create_dc_handler(
    State(state): State<Arc<ServerState>>,
    ctx: RequestContext,
) -> Result<(StatusCode, Json<Vec<IdResponse>>), EnvError> {
    create_base(BaseKind::Dc, &state, ctx).await
}

// ------------------------------------------------------------------
// Composite environments
// ------------------------------------------------------------------

pub async fn list_environments_handler(
    State(state): State<Arc<ServerState>>,
    mut ctx: RequestContext,
) -> Result<Json<Value>, EnvError> {
    Pipeline::search().run(&mut ctx, &state).await?;

    let result = state.store.search_environments(&ctx.search).await?;
    let details = state.store.environment_details(&result.query_set).await;
    let records = render(&result.query_set, &details, &ctx.projection)?;
    Ok(Json(search_response("environments", records, &result)))
}

pub async fn get_environments_handler(
    State(state): State<Arc<ServerState>>,
    Path(ids): Path<String>,
    mut ctx: RequestContext,
) -> Result<Json<Value>, EnvError> {
    Pipeline::search().run(&mut ctx, &state).await?;

    let ids = parse_ids(&ids)?;
    let environments = state.store.get_environments(&ids).await?;
    let details = state.store.environment_details(&environments).await;
    let records = render(&environments, &details, &ctx.projection)?;
    Ok(Json(json!({ "environments": records })))
}

pub async fn create_environments_handler(
    State(state): State<Arc<ServerState>>,
    mut ctx: RequestContext,
) -> Result<(StatusCode, Json<Vec<IdResponse>>), EnvError> {
    Pipeline::write(Some(ENVIRONMENT_POST)).run(&mut ctx, &state).await?;

    let batch: EnvironmentBatch = ctx.json()?;
    let ids = state.store.create_environments(batch.environments).await?;
    Ok((StatusCode::CREATED, ids_response(ids)))
}

pub async fn update_environments_handler(
    State(state): State<Arc<ServerState>>,
    mut ctx: RequestContext,
) -> Result<Json<Vec<IdResponse>>, EnvError> {
    Pipeline::write(Some(ENVIRONMENT_PUT)).run(&mut ctx, &state).await?;

    let batch: EnvironmentBatch = ctx.json()?;
    let ids = state.store.update_environments(batch.environments).await?;
    Ok(ids_response(ids))
}

pub async fn delete_environments_handler(
    State(state): State<Arc<ServerState>>,
    Path(ids): Path<String>,
    mut ctx: RequestContext,
) -> Result<Json<Value>, EnvError> {
    Pipeline::write(None).run(&mut ctx, &state).await?;

    let ids = parse_ids(&ids)?;
    state
        .orchestrator
        .delete_environments(&state.store, &ids)
        .await?;
    Ok(Json(json!({})))
}

// ------------------------------------------------------------------
// VIP associations
// ------------------------------------------------------------------

async fn by_vip(vip_id: Option<u64>, state: &ServerState, mut ctx: RequestContext) -> Result<Json<Value>, EnvError> {
    Pipeline::search().run(&mut ctx, state).await?;

    let environments = state.store.environments_by_vip(vip_id).await;
    let details = state.store.environment_details(&environments).await;
    let records = render(&environments, &details, &ctx.projection)?;
    Ok(Json(json!({ "environments": records })))
}

pub async fn list_by_vip_handler(
    State(state): State<Arc<ServerState>>,
    ctx: RequestContext,
) -> Result<Json<Value>, EnvError> {
    by_vip(None, &state, ctx).await
}

pub async fn list_by_vip_id_handler(
    State(state): State<Arc<ServerState>>,
    Path(vip_id): Path<u64>,
    ctx: RequestContext,
) -> Result<Json<Value>, EnvError> {
    by_vip(Some(vip_id), &state, ctx).await
}
