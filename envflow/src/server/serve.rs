//! HTTP server setup

use std::future::Future;
use std::sync::Arc;

use axum::{routing::get, Router};
use tokio::net::TcpListener;
use tokio::task::JoinHandle;
use tower_http::trace::TraceLayer;
use tracing::info;

use crate::app::options::ServerOptions;
use crate::errors::EnvError;
use crate::server::handlers::{environments, flows, service, tasks};
use crate::server::state::ServerState;

/// Build the service router
pub fn router(state: Arc<ServerState>) -> Router {
    let api = Router::new()
        // Base environments
        .route(
            "/environment/logic",
            get(environments::list_logic_handler).post(environments::create_logic_handler),
        )
        .route(
            "/environment/l3",
            get(environments::list_l3_handler).post(environments::create_l3_handler),
        )
        .route(
            "/environment/dc",
            get(environments::list_dc_handler).post(environments::create_dc_handler),
        )
        // VIP associations
        .route(
            "/environment/environment-vip",
            get(environments::list_by_vip_handler),
        )
        .route(
            "/environment/environment-vip/{id}",
            get(environments::list_by_vip_id_handler),
        )
        // Composite environments
        .route(
            "/environment",
            get(environments::list_environments_handler)
                .post(environments::create_environments_handler)
                .put(environments::update_environments_handler),
        )
        .route(
            "/environment/{id}",
            get(environments::get_environments_handler).delete(environments::delete_environments_handler),
        )
        // Flows
        .route(
            "/environment/{id}/flows",
            get(flows::list_flows_handler)
                .post(flows::insert_flows_handler)
                .put(flows::replace_flows_handler)
                .delete(flows::flush_flows_handler),
        )
        .route(
            "/environment/{id}/flows/{flow_id}",
            get(flows::get_flow_handler)
                .post(flows::insert_flow_handler)
                .put(flows::put_flow_handler)
                .delete(flows::delete_flow_handler),
        )
        // Tasks
        .route("/task", get(tasks::list_tasks_handler))
        .route("/task/{id}", get(tasks::get_task_handler));

    Router::new()
        // Health and version
        .route("/health", get(service::health_handler))
        .route("/version", get(service::version_handler))
        .nest("/api/v3", api)
        // State and middleware
        .with_state(state)
        .layer(TraceLayer::new_for_http())
}

/// Start the HTTP server
pub async fn serve(
    options: &ServerOptions,
    state: Arc<ServerState>,
    shutdown_signal: impl Future<Output = ()> + Send + 'static,
) -> Result<JoinHandle<Result<(), EnvError>>, EnvError> {
    let app = router(state);

    let addr = format!("{}:{}", options.host, options.port);
    info!("Starting HTTP server on {}", addr);

    let listener = TcpListener::bind(&addr)
        .await
        .map_err(|e| EnvError::ServerError(e.to_string()))?;

    let handle = tokio::spawn(async move {
        axum::serve(listener, app)
            .with_graceful_shutdown(shutdown_signal)
            .await
            .map_err(|e| EnvError::ServerError(e.to_string()))
    });

    Ok(handle)
}
