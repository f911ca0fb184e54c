//! HTTP controller client tests against a mock controller

use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::Duration;

use envflow::controller::http::{HttpController, Options};
use envflow::controller::Controller;
use envflow::errors::EnvError;
use envflow::utils::CooldownOptions;
use mockito::{Matcher, Server};
use serde_json::json;
use url::Url;

fn controller(server: &Server, max_retries: u32) -> HttpController {
    controller_with_timeout(server, max_retries, Duration::from_secs(5))
}

fn controller_with_timeout(server: &Server, max_retries: u32, timeout: Duration) -> HttpController {
    HttpController::new(Options {
        base_url: Url::parse(&format!("{}/api", server.url())).unwrap(),
        timeout,
        max_retries,
        cooldown: CooldownOptions {
            base_delay: Duration::from_millis(1),
            max_delay: Duration::from_millis(5),
            multiplier: 2.0,
        },
        token: Some("controller-token".to_string()),
    })
    .unwrap()
}

#[tokio::test]
async fn test_install_returns_controller_id() {
    let mut server = Server::new_async().await;
    let mock = server
        .mock("POST", "/api/environments/7/flows")
        .match_header("authorization", "Bearer controller-token")
        .match_body(Matcher::Json(json!({ "flow": { "action": "drop" } })))
        .with_status(201)
        .with_header("content-type", "application/json")
        .with_body(r#"{"flow_id":"of-1"}"#)
        .create_async()
        .await;

    let flow_id = controller(&server, 0)
        .install(7, &json!({ "action": "drop" }))
        .await
        .unwrap();

    assert_eq!(flow_id, "of-1");
    mock.assert_async().await;
}

#[tokio::test]
async fn test_install_bad_body_is_upstream_error() {
    let mut server = Server::new_async().await;
    server
        .mock("POST", "/api/environments/7/flows")
        .with_status(200)
        .with_body("not json")
        .create_async()
        .await;

    let err = controller(&server, 0)
        .install(7, &json!({ "action": "drop" }))
        .await
        .unwrap_err();
    assert!(matches!(err, EnvError::Upstream(_)));
}

#[tokio::test]
async fn test_remove_flow() {
    let mut server = Server::new_async().await;
    let mock = server
        .mock("DELETE", "/api/environments/7/flows/of-1")
        .with_status(204)
        .create_async()
        .await;

    controller(&server, 0).remove(7, "of-1").await.unwrap();
    mock.assert_async().await;
}

#[tokio::test]
async fn test_remove_missing_flow_is_ok() {
    let mut server = Server::new_async().await;
    let mock = server
        .mock("DELETE", "/api/environments/7/flows/of-1")
        .with_status(404)
        .expect(1)
        .create_async()
        .await;

    controller(&server, 3).remove(7, "of-1").await.unwrap();
    mock.assert_async().await;
}

#[tokio::test]
async fn test_server_errors_are_retried() {
    let mut server = Server::new_async().await;
    let mock = server
        .mock("POST", "/api/environments/7/flows")
        .with_status(503)
        .expect(3)
        .create_async()
        .await;

    let err = controller(&server, 2)
        .install(7, &json!({ "action": "drop" }))
        .await
        .unwrap_err();

    assert!(matches!(err, EnvError::Upstream(_)));
    mock.assert_async().await;
}

#[tokio::test]
async fn test_client_errors_are_not_retried() {
    let mut server = Server::new_async().await;
    let mock = server
        .mock("POST", "/api/environments/7/flows")
        .with_status(400)
        .with_body("bad match field")
        .expect(1)
        .create_async()
        .await;

    let err = controller(&server, 5)
        .install(7, &json!({ "action": "drop" }))
        .await
        .unwrap_err();

    assert!(err.to_string().contains("bad match field"));
    mock.assert_async().await;
}

#[tokio::test]
async fn test_install_internal_error_is_not_retried() {
    let mut server = Server::new_async().await;
    let mock = server
        .mock("POST", "/api/environments/7/flows")
        .with_status(500)
        .expect(1)
        .create_async()
        .await;

    let err = controller(&server, 3)
        .install(7, &json!({ "action": "drop" }))
        .await
        .unwrap_err();

    assert!(matches!(err, EnvError::Upstream(_)));
    mock.assert_async().await;
}

#[tokio::test]
async fn test_remove_internal_error_is_retried() {
    let mut server = Server::new_async().await;
    let mock = server
        .mock("DELETE", "/api/environments/7/flows/of-1")
        .with_status(500)
        .expect(3)
        .create_async()
        .await;

    let err = controller(&server, 2).remove(7, "of-1").await.unwrap_err();

    assert!(matches!(err, EnvError::Upstream(_)));
    mock.assert_async().await;
}

#[tokio::test(flavor = "multi_thread", worker_threads = 2)]
async fn test_install_timeout_is_not_retried() {
    let mut server = Server::new_async().await;
    let hits = Arc::new(AtomicUsize::new(0));
    let counter = hits.clone();
    server
        .mock("POST", "/api/environments/7/flows")
        .with_status(201)
        .with_header("content-type", "application/json")
        .with_body_from_request(move |_| {
            let hit = counter.fetch_add(1, Ordering::SeqCst);
            if hit == 0 {
                // The controller applies the flow but answers too late
                std::thread::sleep(Duration::from_millis(800));
            }
            format!(r#"{{"flow_id":"of-{}"}}"#, hit).into_bytes()
        })
        .create_async()
        .await;

    let err = controller_with_timeout(&server, 2, Duration::from_millis(200))
        .install(7, &json!({ "action": "drop" }))
        .await
        .unwrap_err();

    assert!(matches!(err, EnvError::Upstream(_)));
    // Let the late response finish before counting
    tokio::time::sleep(Duration::from_millis(900)).await;
    assert_eq!(hits.load(Ordering::SeqCst), 1);
}
