//! Request pipeline
//!
//! Every API request runs an ordered list of stages before the handler
//! touches the domain. The first failing stage ends the request with its
//! error.

use std::collections::HashMap;

use async_trait::async_trait;
use axum::body::Bytes;
use axum::extract::{FromRequest, Query, Request};
use axum::http::{header, HeaderMap, Method, Uri};
use serde::de::DeserializeOwned;
use serde_json::Value;
use tracing::{debug, info};

use crate::authn::actor::{Actor, Capability, Credentials};
use crate::environment::projection::Projection;
use crate::environment::search::SearchParams;
use crate::errors::EnvError;
use crate::server::state::ServerState;

const MAX_BODY_BYTES: usize = 4 * 1024 * 1024;

/// Everything the stages and handlers know about a request
#[derive(Debug)]
pub struct RequestContext {
    pub method: Method,
    pub uri: Uri,
    pub headers: HeaderMap,
    pub query: HashMap<String, String>,
    /// Raw request body, parsed by the `ParseBody` stage
    pub raw_body: Bytes,
    pub body: Option<Value>,
    pub actor: Option<Actor>,
    pub search: SearchParams,
    pub projection: Projection,
}

impl RequestContext {
    /// The authenticated actor
    pub fn actor(&self) -> Result<&Actor, EnvError> {
        self.actor
            .as_ref()
            .ok_or_else(|| EnvError::Unauthenticated("request is not authenticated".into()))
    }

    /// Deserialize the JSON body
    pub fn json<T: DeserializeOwned>(&self) -> Result<T, EnvError> {
        let body = self
            .body
            .clone()
            .ok_or_else(|| EnvError::ValidationError("request body is required".into()))?;
        serde_json::from_value(body)
            .map_err(|e| EnvError::ValidationError(format!("invalid request body: {}", e)))
    }
}

impl<S: Send + Sync> FromRequest<S> for RequestContext {
    type Rejection = EnvError;

    async fn from_request(req: Request, _state: &S) -> Result<Self, Self::Rejection> {
        let (parts, body) = req.into_parts();

        let query = Query::<HashMap<String, String>>::try_from_uri(&parts.uri)
            .map(|Query(query)| query)
            .map_err(|e| EnvError::ValidationError(format!("invalid query string: {}", e)))?;

        let raw_body: Bytes = axum::body::to_bytes(body, MAX_BODY_BYTES)
            .await
            .map_err(|e| EnvError::ValidationError(format!("unreadable request body: {}", e)))?;

        Ok(Self {
            method: parts.method,
            uri: parts.uri,
            headers: parts.headers,
            query,
            raw_body,
            body: None,
            actor: None,
            search: SearchParams::default(),
            projection: Projection::default(),
        })
    }
}

/// One step of the pipeline
#[async_trait]
pub trait Stage: Send + Sync {
    fn name(&self) -> &'static str;

    async fn process(&self, ctx: &mut RequestContext, state: &ServerState) -> Result<(), EnvError>;
}

/// Ordered list of stages
pub struct Pipeline {
    stages: Vec<Box<dyn Stage>>,
}

impl Default for Pipeline {
    fn default() -> Self {
        Self::new()
    }
}

impl Pipeline {
    pub fn new() -> Self {
        Self { stages: Vec::new() }
    }

    pub fn stage(mut self, stage: impl Stage + 'static) -> Self {
        self.stages.push(Box::new(stage));
        self
    }

    /// Authenticated read
    pub fn read() -> Self {
        Self::new()
            .stage(LogRequest)
            .stage(Authenticate)
            .stage(RequireCapability(Capability::Read))
    }

    /// Authenticated read with search and projection parameters
    pub fn search() -> Self {
        Self::read().stage(PrepareSearch)
    }

    /// Authenticated write, validating the body when a schema is given
    pub fn write(schema: Option<&'static str>) -> Self {
        let pipeline = Self::new()
            .stage(LogRequest)
            .stage(Authenticate)
            .stage(RequireCapability(Capability::Write))
            .stage(ParseBody);
        match schema {
            Some(schema) => pipeline.stage(ValidateSchema(schema)),
            None => pipeline,
        }
    }

    pub fn names(&self) -> Vec<&'static str> {
        self.stages.iter().map(|s| s.name()).collect()
    }

    pub async fn run(&self, ctx: &mut RequestContext, state: &ServerState) -> Result<(), EnvError> {
        for stage in &self.stages {
            stage.process(ctx, state).await?;
        }
        Ok(())
    }
}

/// Log the request line
pub struct LogRequest;

#[async_trait]
impl Stage for LogRequest {
    fn name(&self) -> &'static str {
        "log_request"
    }

    async fn process(&self, ctx: &mut RequestContext, _state: &ServerState) -> Result<(), EnvError> {
        info!("{} {}", ctx.method, ctx.uri);
        Ok(())
    }
}

/// Resolve the `Authorization` header to an actor
pub struct Authenticate;

#[async_trait]
impl Stage for Authenticate {
    fn name(&self) -> &'static str {
        "authenticate"
    }

    async fn process(&self, ctx: &mut RequestContext, state: &ServerState) -> Result<(), EnvError> {
        let header = ctx
            .headers
            .get(header::AUTHORIZATION)
            .ok_or_else(|| EnvError::Unauthenticated("missing authorization header".into()))?
            .to_str()
            .map_err(|_| EnvError::Unauthenticated("malformed authorization header".into()))?;

        let credentials = Credentials::parse(header)?;
        let actor = state.authenticator.authenticate(&credentials).await?;
        debug!("Request by actor {} ({})", actor.name, actor.id);
        ctx.actor = Some(actor);
        Ok(())
    }
}

/// Reject actors lacking a capability
pub struct RequireCapability(pub Capability);

#[async_trait]
impl Stage for RequireCapability {
    fn name(&self) -> &'static str {
        "require_capability"
    }

    async fn process(&self, ctx: &mut RequestContext, _state: &ServerState) -> Result<(), EnvError> {
        let actor = ctx.actor()?;
        if !actor.can(self.0) {
            return Err(EnvError::PermissionDenied(format!(
                "actor {} lacks the {} capability",
                actor.name, self.0
            )));
        }
        Ok(())
    }
}

/// Parse the raw body as JSON; a blank body leaves `body` empty
pub struct ParseBody;

#[async_trait]
impl Stage for ParseBody {
    fn name(&self) -> &'static str {
        "parse_body"
    }

    async fn process(&self, ctx: &mut RequestContext, _state: &ServerState) -> Result<(), EnvError> {
        if ctx.raw_body.iter().all(u8::is_ascii_whitespace) {
            ctx.body = None;
            return Ok(());
        }
        ctx.body = Some(serde_json::from_slice(&ctx.raw_body)?);
        Ok(())
    }
}

/// Validate the body against a named schema
pub struct ValidateSchema(pub &'static str);

#[async_trait]
impl Stage for ValidateSchema {
    fn name(&self) -> &'static str {
        "validate_schema"
    }

    async fn process(&self, ctx: &mut RequestContext, state: &ServerState) -> Result<(), EnvError> {
        let body = ctx
            .body
            .as_ref()
            .ok_or_else(|| EnvError::ValidationError("request body is required".into()))?;
        state.schemas.validate(self.0, body)
    }
}

/// Parse the `search` and projection query parameters
pub struct PrepareSearch;

#[async_trait]
impl Stage for PrepareSearch {
    fn name(&self) -> &'static str {
        "prepare_search"
    }

    async fn process(&self, ctx: &mut RequestContext, _state: &ServerState) -> Result<(), EnvError> {
        if let Some(raw) = ctx.query.get("search") {
            ctx.search = SearchParams::parse(raw)?;
        }
        ctx.projection = Projection::from_query(&ctx.query)?;
        Ok(())
    }
}
