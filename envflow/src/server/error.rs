//! HTTP rendering of service errors

use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};
use axum::Json;
use openapi_server::models::{ErrorResponse, FailureDetail};
use tracing::{error, warn};

use crate::errors::EnvError;

impl EnvError {
    pub fn status_code(&self) -> StatusCode {
        match self {
            EnvError::NotFound(_) => StatusCode::NOT_FOUND,
            EnvError::ValidationError(_) | EnvError::JsonError(_) => StatusCode::BAD_REQUEST,
            EnvError::Unauthenticated(_) => StatusCode::UNAUTHORIZED,
            EnvError::PermissionDenied(_) => StatusCode::FORBIDDEN,
            EnvError::Conflict(_) | EnvError::TaskState(_) => StatusCode::CONFLICT,
            EnvError::Upstream(_) | EnvError::HttpError(_) | EnvError::PartialFailure { .. } => {
                StatusCode::BAD_GATEWAY
            }
            EnvError::IoError(_)
            | EnvError::ConfigError(_)
            | EnvError::ServerError(_)
            | EnvError::ShutdownError(_)
            | EnvError::Internal(_) => StatusCode::INTERNAL_SERVER_ERROR,
        }
    }
}

impl IntoResponse for EnvError {
    fn into_response(self) -> Response {
        let status = self.status_code();
        if status.is_server_error() {
            error!("Request failed: {}", self);
        } else {
            warn!("Request rejected: {}", self);
        }

        let failures = match &self {
            EnvError::PartialFailure { failures, .. } => failures
                .iter()
                .map(|f| FailureDetail {
                    id: f.id.clone(),
                    detail: f.detail.clone(),
                })
                .collect(),
            _ => Vec::new(),
        };
        let body = ErrorResponse {
            error: self.kind().to_string(),
            message: self.to_string(),
            failures,
        };
        (status, Json(body)).into_response()
    }
}
