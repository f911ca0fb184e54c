//! HTTP API tests, driving the router with `oneshot`

use std::sync::Arc;
use std::time::Duration;

use axum::body::Body;
use axum::http::{Request, StatusCode};
use axum::Router;
use envflow::app::options::AppOptions;
use envflow::app::state::AppState;
use envflow::authn::actor::Capability;
use envflow::controller::memory::MemoryController;
use envflow::server::serve::router;
use envflow::storage::settings::ActorSettings;
use envflow::utils::sha256_hash;
use http_body_util::BodyExt;
use serde_json::{json, Value};
use tower::ServiceExt;

// ---------------------------------------------------------------------------
// Helpers
// ---------------------------------------------------------------------------

const ADMIN: &str = "Bearer admin-token";
const VIEWER: &str = "Bearer viewer-token";

fn actor(id: &str, token: &str, capabilities: Vec<Capability>) -> ActorSettings {
    ActorSettings {
        id: id.to_string(),
        name: id.to_string(),
        token_sha256: sha256_hash(token.as_bytes()),
        capabilities,
    }
}

struct TestApp {
    router: Router,
    controller: Arc<MemoryController>,
}

async fn app() -> TestApp {
    let options = AppOptions {
        actors: vec![
            actor("admin", "admin-token", vec![Capability::Read, Capability::Write]),
            actor("viewer", "viewer-token", vec![Capability::Read]),
        ],
        ..Default::default()
    };
    let controller = Arc::new(MemoryController::new());
    let state = AppState::with_controller(&options, controller.clone())
        .await
        .unwrap();
    TestApp {
        router: router(Arc::new(state.server_state())),
        controller,
    }
}

/// Send a request via `oneshot` and return (status, parsed JSON body).
async fn send(
    app: &TestApp,
    method: &str,
    uri: &str,
    auth: Option<&str>,
    body: Option<Value>,
) -> (StatusCode, Value) {
    let mut builder = Request::builder().method(method).uri(uri);
    if let Some(auth) = auth {
        builder = builder.header("authorization", auth);
    }
    let body = match body {
        Some(body) => {
            builder = builder.header("content-type", "application/json");
            Body::from(serde_json::to_vec(&body).unwrap())
        }
        None => Body::empty(),
    };
    let response = app
        .router
        .clone()
        .oneshot(builder.body(body).unwrap())
        .await
        .unwrap();
    let status = response.status();
    let bytes = response.into_body().collect().await.unwrap().to_bytes();
    let json: Value = serde_json::from_slice(&bytes).unwrap_or(Value::Null);
    (status, json)
}

/// Create one base environment of each kind and a composite over them
async fn create_environment(app: &TestApp) -> u64 {
    let mut refs = Vec::new();
    for (path, field) in [("logic", "logic"), ("l3", "l3"), ("dc", "dc")] {
        let (status, body) = send(
            app,
            "POST",
            &format!("/api/v3/environment/{}", path),
            Some(ADMIN),
            Some(json!({ field: [{ "name": format!("{}-one", field) }] })),
        )
        .await;
        assert_eq!(status, StatusCode::CREATED, "{}", body);
        refs.push(body[0]["id"].as_u64().unwrap());
    }

    let (status, body) = send(
        app,
        "POST",
        "/api/v3/environment",
        Some(ADMIN),
        Some(json!({
            "environments": [{
                "ambiente_logico": refs[0],
                "grupo_l3": refs[1],
                "divisao_dc": refs[2],
            }]
        })),
    )
    .await;
    assert_eq!(status, StatusCode::CREATED, "{}", body);
    body[0]["id"].as_u64().unwrap()
}

/// Poll a task until it reaches a terminal status
async fn wait_for_task(app: &TestApp, task_id: &str) -> Value {
    for _ in 0..200 {
        let (status, task) = send(app, "GET", &format!("/api/v3/task/{}", task_id), Some(VIEWER), None).await;
        assert_eq!(status, StatusCode::OK);
        if task["status"] == "succeeded" || task["status"] == "failed" {
            return task;
        }
        tokio::time::sleep(Duration::from_millis(5)).await;
    }
    panic!("task {} did not finish", task_id);
}

// ---------------------------------------------------------------------------
// Service endpoints
// ---------------------------------------------------------------------------

#[tokio::test]
async fn test_health_needs_no_credentials() {
    let app = app().await;
    let (status, body) = send(&app, "GET", "/health", None, None).await;

    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["status"], "healthy");
    assert_eq!(body["service"], "envflow");
    assert_eq!(body["records"]["environments"], 0);
}

// ---------------------------------------------------------------------------
// Authentication and validation
// ---------------------------------------------------------------------------

#[tokio::test]
async fn test_missing_credentials_are_rejected() {
    let app = app().await;
    let (status, body) = send(&app, "GET", "/api/v3/environment", None, None).await;

    assert_eq!(status, StatusCode::UNAUTHORIZED);
    assert_eq!(body["error"], "unauthenticated");

    let (status, _) = send(&app, "GET", "/api/v3/environment", Some("Bearer wrong"), None).await;
    assert_eq!(status, StatusCode::UNAUTHORIZED);
}

#[tokio::test]
async fn test_read_only_actor_cannot_write() {
    let app = app().await;
    let (status, body) = send(
        &app,
        "POST",
        "/api/v3/environment/logic",
        Some(VIEWER),
        Some(json!({ "logic": [{ "name": "prod" }] })),
    )
    .await;

    assert_eq!(status, StatusCode::FORBIDDEN);
    assert_eq!(body["error"], "permission_denied");
}

#[tokio::test]
async fn test_schema_violations_are_bad_requests() {
    let app = app().await;
    let (status, body) = send(
        &app,
        "POST",
        "/api/v3/environment",
        Some(ADMIN),
        Some(json!({ "environments": [{ "grupo_l3": 1 }] })),
    )
    .await;

    assert_eq!(status, StatusCode::BAD_REQUEST);
    assert_eq!(body["error"], "validation_error");
    assert!(body["message"].as_str().unwrap().contains("ambiente_logico"));
}

#[tokio::test]
async fn test_malformed_json_is_a_bad_request() {
    let app = app().await;
    let request = Request::builder()
        .method("POST")
        .uri("/api/v3/environment/logic")
        .header("authorization", ADMIN)
        .header("content-type", "application/json")
        .body(Body::from("{not json"))
        .unwrap();
    let response = app.router.clone().oneshot(request).await.unwrap();

    assert_eq!(response.status(), StatusCode::BAD_REQUEST);
}

#[tokio::test]
async fn test_malformed_json_without_credentials_is_unauthorized() {
    let app = app().await;
    let request = Request::builder()
        .method("POST")
        .uri("/api/v3/environment/logic")
        .header("content-type", "application/json")
        .body(Body::from("{not json"))
        .unwrap();
    let response = app.router.clone().oneshot(request).await.unwrap();

    assert_eq!(response.status(), StatusCode::UNAUTHORIZED);
}

#[tokio::test]
async fn test_malformed_json_from_reader_is_forbidden() {
    let app = app().await;
    let request = Request::builder()
        .method("POST")
        .uri("/api/v3/environment/logic")
        .header("authorization", VIEWER)
        .header("content-type", "application/json")
        .body(Body::from("{not json"))
        .unwrap();
    let response = app.router.clone().oneshot(request).await.unwrap();

    assert_eq!(response.status(), StatusCode::FORBIDDEN);
}

// ---------------------------------------------------------------------------
// Environments
// ---------------------------------------------------------------------------

#[tokio::test]
async fn test_environment_lifecycle() {
    let app = app().await;
    let id = create_environment(&app).await;

    let (status, body) = send(
        &app,
        "GET",
        &format!("/api/v3/environment/{}?kind=details", id),
        Some(VIEWER),
        None,
    )
    .await;
    assert_eq!(status, StatusCode::OK);
    let environment = &body["environments"][0];
    assert_eq!(environment["name"], "dc-one - logic-one - l3-one");
    assert_eq!(environment["divisao_dc"]["name"], "dc-one");
    assert_eq!(environment["flows"], json!([]));

    let (status, body) = send(&app, "GET", "/api/v3/environment", Some(VIEWER), None).await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["total"], 1);

    let (status, _) = send(&app, "DELETE", &format!("/api/v3/environment/{}", id), Some(ADMIN), None).await;
    assert_eq!(status, StatusCode::OK);

    let (status, body) = send(&app, "GET", &format!("/api/v3/environment/{}", id), Some(VIEWER), None).await;
    assert_eq!(status, StatusCode::NOT_FOUND, "{}", body);
}

#[tokio::test]
async fn test_duplicate_base_name_conflicts() {
    let app = app().await;
    let body = json!({ "dc": [{ "name": "site-a" }] });

    let (status, _) = send(&app, "POST", "/api/v3/environment/dc", Some(ADMIN), Some(body.clone())).await;
    assert_eq!(status, StatusCode::CREATED);
    let (status, body) = send(&app, "POST", "/api/v3/environment/dc", Some(ADMIN), Some(body)).await;
    assert_eq!(status, StatusCode::CONFLICT);
    assert_eq!(body["error"], "conflict");
}

// ---------------------------------------------------------------------------
// Flows
// ---------------------------------------------------------------------------

#[tokio::test]
async fn test_flow_insert_is_tracked_by_a_task() {
    let app = app().await;
    let env = create_environment(&app).await;

    let (status, body) = send(
        &app,
        "POST",
        &format!("/api/v3/environment/{}/flows", env),
        Some(ADMIN),
        Some(json!({ "flows": [{ "name": "A" }, { "name": "B" }] })),
    )
    .await;
    assert_eq!(status, StatusCode::CREATED, "{}", body);
    assert_eq!(body["id"], env);

    let task = wait_for_task(&app, body["task_id"].as_str().unwrap()).await;
    assert_eq!(task["status"], "succeeded");
    assert_eq!(task["outcomes"].as_array().unwrap().len(), 2);

    let (status, flows) = send(&app, "GET", &format!("/api/v3/environment/{}/flows", env), Some(VIEWER), None).await;
    assert_eq!(status, StatusCode::OK);
    let payloads: Vec<&Value> = flows.as_array().unwrap().iter().map(|f| &f["payload"]).collect();
    assert_eq!(payloads, vec![&json!({ "name": "A" }), &json!({ "name": "B" })]);

    let (status, tasks) = send(&app, "GET", &format!("/api/v3/task?environment={}", env), Some(VIEWER), None).await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(tasks["total"], 1);
}

#[tokio::test]
async fn test_environment_with_flows_cannot_be_deleted() {
    let app = app().await;
    let env = create_environment(&app).await;

    let (_, body) = send(
        &app,
        "POST",
        &format!("/api/v3/environment/{}/flows", env),
        Some(ADMIN),
        Some(json!({ "flows": [{ "name": "A" }] })),
    )
    .await;
    wait_for_task(&app, body["task_id"].as_str().unwrap()).await;

    let (status, _) = send(&app, "DELETE", &format!("/api/v3/environment/{}", env), Some(ADMIN), None).await;
    assert_eq!(status, StatusCode::CONFLICT);

    let (status, _) = send(&app, "DELETE", &format!("/api/v3/environment/{}/flows", env), Some(ADMIN), None).await;
    assert_eq!(status, StatusCode::OK);
    assert!(app.controller.installed(env).is_empty());

    let (status, _) = send(&app, "DELETE", &format!("/api/v3/environment/{}", env), Some(ADMIN), None).await;
    assert_eq!(status, StatusCode::OK);
}

#[tokio::test]
async fn test_replace_and_delete_single_flow() {
    let app = app().await;
    let env = create_environment(&app).await;
    let flows_uri = format!("/api/v3/environment/{}/flows", env);

    let (_, body) = send(&app, "POST", &flows_uri, Some(ADMIN), Some(json!({ "flows": [{ "name": "A" }] }))).await;
    wait_for_task(&app, body["task_id"].as_str().unwrap()).await;

    let (status, body) = send(
        &app,
        "PUT",
        &flows_uri,
        Some(ADMIN),
        Some(json!({ "flows": [{ "name": "B" }, { "name": "C" }] })),
    )
    .await;
    assert_eq!(status, StatusCode::OK);
    let task = wait_for_task(&app, body["task_id"].as_str().unwrap()).await;
    assert_eq!(task["operation"], "replace");
    assert_eq!(task["status"], "succeeded");

    let (_, flows) = send(&app, "GET", &flows_uri, Some(VIEWER), None).await;
    let flows = flows.as_array().unwrap().clone();
    assert_eq!(flows.len(), 2);
    let flow_id = flows[0]["id"].as_str().unwrap().to_string();

    let (status, single) = send(&app, "GET", &format!("{}/{}", flows_uri, flow_id), Some(VIEWER), None).await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(single[0]["payload"], json!({ "name": "B" }));

    let (status, removed) = send(&app, "DELETE", &format!("{}/{}", flows_uri, flow_id), Some(ADMIN), None).await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(removed["status"], "removed");
    let (status, _) = send(&app, "DELETE", &format!("{}/{}", flows_uri, flow_id), Some(ADMIN), None).await;
    assert_eq!(status, StatusCode::NOT_FOUND);

    let (_, flows) = send(&app, "GET", &flows_uri, Some(VIEWER), None).await;
    assert_eq!(flows.as_array().unwrap().len(), 1);
}

#[tokio::test]
async fn test_flush_partial_failure_lists_failed_flows() {
    let app = app().await;
    let env = create_environment(&app).await;
    let flows_uri = format!("/api/v3/environment/{}/flows", env);

    let (_, body) = send(
        &app,
        "POST",
        &flows_uri,
        Some(ADMIN),
        Some(json!({ "flows": [{ "name": "A" }, { "name": "B" }] })),
    )
    .await;
    let task = wait_for_task(&app, body["task_id"].as_str().unwrap()).await;
    let stuck = task["outcomes"][0]["flow_id"].as_str().unwrap().to_string();
    app.controller.reject_removal(&stuck);

    let (status, body) = send(&app, "DELETE", &flows_uri, Some(ADMIN), None).await;
    assert_eq!(status, StatusCode::BAD_GATEWAY);
    assert_eq!(body["error"], "partial_failure");
    assert_eq!(body["failures"][0]["id"], stuck.as_str());

    let (_, flows) = send(&app, "GET", &flows_uri, Some(VIEWER), None).await;
    assert_eq!(flows.as_array().unwrap().len(), 1);
}

#[tokio::test]
async fn test_flows_of_unknown_environment() {
    let app = app().await;

    let (status, _) = send(
        &app,
        "POST",
        "/api/v3/environment/999/flows",
        Some(ADMIN),
        Some(json!({ "flows": [{ "name": "A" }] })),
    )
    .await;
    assert_eq!(status, StatusCode::NOT_FOUND);

    let (status, _) = send(&app, "GET", "/api/v3/environment/999/flows", Some(VIEWER), None).await;
    assert_eq!(status, StatusCode::NOT_FOUND);
}
