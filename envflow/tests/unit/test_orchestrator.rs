//! Flow orchestrator tests, against the in-memory controller

use envflow::errors::EnvError;
use envflow::models::flow::FlowStatus;
use envflow::models::task::{OperationKind, Phase};
use envflow::tasks::fsm::TaskStatus;
use serde_json::{json, Value};

use crate::common::{seed_environment, Fixture};

fn flow(name: &str) -> Value {
    json!({ "name": name, "match": { "in_port": 1 }, "action": "drop" })
}

async fn seed_flows(fixture: &Fixture, environment_id: u64, names: &[&str]) -> Vec<String> {
    let definitions = names.iter().map(|n| flow(n)).collect();
    let task = fixture
        .orchestrator
        .insert(environment_id, definitions, "tester")
        .await
        .unwrap();
    let task = fixture.settle(&task).await;
    assert_eq!(task.status, TaskStatus::Succeeded);
    task.outcomes
        .iter()
        .map(|o| o.flow_id.clone().unwrap())
        .collect()
}

async fn stored_payloads(fixture: &Fixture, environment_id: u64) -> Vec<Value> {
    fixture
        .orchestrator
        .list_flows(environment_id, None)
        .await
        .unwrap()
        .into_iter()
        .map(|f| f.payload)
        .collect()
}

#[tokio::test]
async fn test_insert_persists_flows_in_order() {
    let fixture = Fixture::new();
    let env = seed_environment(&fixture.store, "a").await;

    let ids = seed_flows(&fixture, env, &["A", "B", "C"]).await;

    assert_eq!(stored_payloads(&fixture, env).await, vec![flow("A"), flow("B"), flow("C")]);
    let stored = fixture.orchestrator.list_flows(env, None).await.unwrap();
    assert!(stored.iter().all(|f| f.status == FlowStatus::Installed));
    assert_eq!(fixture.controller.installed(env).len(), ids.len());
}

#[tokio::test]
async fn test_insert_partial_failure_keeps_successes() {
    let fixture = Fixture::new();
    let env = seed_environment(&fixture.store, "a").await;
    fixture.controller.reject_install(flow("B"));

    let task = fixture
        .orchestrator
        .insert(env, vec![flow("A"), flow("B")], "tester")
        .await
        .unwrap();
    assert_eq!(task.operation, OperationKind::Insert);
    let task = fixture.settle(&task).await;

    assert_eq!(task.status, TaskStatus::Failed);
    assert_eq!(task.outcomes.len(), 2);
    assert!(task.outcomes[0].success);
    assert!(!task.outcomes[1].success);
    assert_eq!(task.outcomes[1].index, 1);
    assert_eq!(stored_payloads(&fixture, env).await, vec![flow("A")]);
}

#[tokio::test]
async fn test_update_replaces_the_flow_set() {
    let fixture = Fixture::new();
    let env = seed_environment(&fixture.store, "a").await;
    seed_flows(&fixture, env, &["A", "B"]).await;

    let task = fixture
        .orchestrator
        .update(env, vec![flow("C")], "tester")
        .await
        .unwrap();
    let task = fixture.settle(&task).await;

    assert_eq!(task.status, TaskStatus::Succeeded);
    let flush = task.outcomes.iter().filter(|o| o.phase == Phase::Flush).count();
    let insert = task.outcomes.iter().filter(|o| o.phase == Phase::Insert).count();
    assert_eq!((flush, insert), (2, 1));
    assert_eq!(stored_payloads(&fixture, env).await, vec![flow("C")]);
    assert_eq!(fixture.controller.installed(env).len(), 1);
}

#[tokio::test]
async fn test_update_installs_even_when_a_removal_fails() {
    let fixture = Fixture::new();
    let env = seed_environment(&fixture.store, "a").await;
    let ids = seed_flows(&fixture, env, &["A", "B"]).await;
    fixture.controller.reject_removal(&ids[0]);

    let task = fixture
        .orchestrator
        .update(env, vec![flow("C")], "tester")
        .await
        .unwrap();
    let task = fixture.settle(&task).await;

    assert_eq!(task.status, TaskStatus::Failed);
    assert_eq!(stored_payloads(&fixture, env).await, vec![flow("A"), flow("C")]);
}

#[tokio::test]
async fn test_flush_then_insert() {
    let fixture = Fixture::new();
    let env = seed_environment(&fixture.store, "a").await;
    seed_flows(&fixture, env, &["A", "B"]).await;

    fixture.orchestrator.flush(env).await.unwrap();
    assert!(stored_payloads(&fixture, env).await.is_empty());

    seed_flows(&fixture, env, &["C"]).await;
    assert_eq!(stored_payloads(&fixture, env).await, vec![flow("C")]);
}

#[tokio::test]
async fn test_flush_is_idempotent() {
    let fixture = Fixture::new();
    let env = seed_environment(&fixture.store, "a").await;

    // Nothing stored yet
    fixture.orchestrator.flush(env).await.unwrap();

    seed_flows(&fixture, env, &["A"]).await;
    fixture.orchestrator.flush(env).await.unwrap();
    fixture.orchestrator.flush(env).await.unwrap();
    assert!(stored_payloads(&fixture, env).await.is_empty());
    assert!(fixture.controller.installed(env).is_empty());
}

#[tokio::test]
async fn test_flush_partial_failure_keeps_refused_flows() {
    let fixture = Fixture::new();
    let env = seed_environment(&fixture.store, "a").await;
    let ids = seed_flows(&fixture, env, &["A", "B"]).await;
    fixture.controller.reject_removal(&ids[1]);

    let err = fixture.orchestrator.flush(env).await.unwrap_err();
    match err {
        EnvError::PartialFailure { failures, .. } => {
            assert_eq!(failures.len(), 1);
            assert_eq!(failures[0].id, ids[1]);
        }
        other => panic!("expected a partial failure, got {:?}", other),
    }
    assert_eq!(stored_payloads(&fixture, env).await, vec![flow("B")]);
    let stuck = fixture.orchestrator.list_flows(env, Some(&ids[1])).await.unwrap();
    assert_eq!(stuck[0].status, FlowStatus::Failed);

    fixture.controller.heal();
    fixture.orchestrator.flush(env).await.unwrap();
    assert!(stored_payloads(&fixture, env).await.is_empty());
}

#[tokio::test]
async fn test_delete_single_flow() {
    let fixture = Fixture::new();
    let env = seed_environment(&fixture.store, "a").await;
    let ids = seed_flows(&fixture, env, &["A", "B"]).await;

    let removed = fixture.orchestrator.delete(env, &ids[0], "tester").await.unwrap();

    assert_eq!(removed.id.as_deref(), Some(ids[0].as_str()));
    assert_eq!(removed.status, FlowStatus::Removed);
    assert_eq!(stored_payloads(&fixture, env).await, vec![flow("B")]);
    assert_eq!(fixture.controller.installed(env), vec![ids[1].clone()]);
}

#[tokio::test]
async fn test_delete_unknown_flow_changes_nothing() {
    let fixture = Fixture::new();
    let env = seed_environment(&fixture.store, "a").await;
    seed_flows(&fixture, env, &["A", "B"]).await;

    let err = fixture
        .orchestrator
        .delete(env, "no-such-flow", "tester")
        .await
        .unwrap_err();

    assert!(matches!(err, EnvError::NotFound(_)));
    assert_eq!(stored_payloads(&fixture, env).await, vec![flow("A"), flow("B")]);
}

#[tokio::test]
async fn test_delete_refused_by_controller_keeps_flow() {
    let fixture = Fixture::new();
    let env = seed_environment(&fixture.store, "a").await;
    let ids = seed_flows(&fixture, env, &["A"]).await;
    fixture.controller.reject_removal(&ids[0]);

    let err = fixture.orchestrator.delete(env, &ids[0], "tester").await.unwrap_err();

    assert!(matches!(err, EnvError::Upstream(_)));
    assert_eq!(stored_payloads(&fixture, env).await, vec![flow("A")]);
}

#[tokio::test]
async fn test_get_single_flow() {
    let fixture = Fixture::new();
    let env = seed_environment(&fixture.store, "a").await;
    let ids = seed_flows(&fixture, env, &["A", "B"]).await;

    let flows = fixture.orchestrator.list_flows(env, Some(&ids[1])).await.unwrap();
    assert_eq!(flows.len(), 1);
    assert_eq!(flows[0].payload, flow("B"));

    let err = fixture.orchestrator.list_flows(env, Some("missing")).await.unwrap_err();
    assert!(matches!(err, EnvError::NotFound(_)));
}

#[tokio::test]
async fn test_rejects_unknown_environment_and_bad_definitions() {
    let fixture = Fixture::new();
    let env = seed_environment(&fixture.store, "a").await;

    let err = fixture
        .orchestrator
        .insert(env + 100, vec![flow("A")], "tester")
        .await
        .unwrap_err();
    assert!(matches!(err, EnvError::NotFound(_)));

    let err = fixture
        .orchestrator
        .insert(env, vec![json!({})], "tester")
        .await
        .unwrap_err();
    assert!(matches!(err, EnvError::ValidationError(_)));

    let err = fixture
        .orchestrator
        .insert(env, vec![json!("not an object")], "tester")
        .await
        .unwrap_err();
    assert!(matches!(err, EnvError::ValidationError(_)));
    assert!(fixture.orchestrator.tasks().is_empty());
}

#[tokio::test]
async fn test_operations_on_one_environment_are_serialized() {
    let fixture = Fixture::new();
    let env = seed_environment(&fixture.store, "a").await;

    let first = fixture
        .orchestrator
        .insert(env, vec![flow("A"), flow("B")], "tester")
        .await
        .unwrap();
    let second = fixture
        .orchestrator
        .update(env, vec![flow("C")], "tester")
        .await
        .unwrap();
    fixture.orchestrator.drain().await;

    assert_eq!(fixture.settle(&first).await.status, TaskStatus::Succeeded);
    assert_eq!(fixture.settle(&second).await.status, TaskStatus::Succeeded);
    assert_eq!(stored_payloads(&fixture, env).await, vec![flow("C")]);
    assert_eq!(fixture.orchestrator.in_flight(), 0);
}

#[tokio::test]
async fn test_environments_do_not_share_flows() {
    let fixture = Fixture::new();
    let first = seed_environment(&fixture.store, "a").await;
    let second = seed_environment(&fixture.store, "b").await;

    seed_flows(&fixture, first, &["A"]).await;
    seed_flows(&fixture, second, &["B"]).await;
    fixture.orchestrator.flush(first).await.unwrap();

    assert!(stored_payloads(&fixture, first).await.is_empty());
    assert_eq!(stored_payloads(&fixture, second).await, vec![flow("B")]);
}

#[tokio::test]
async fn test_queued_insert_on_deleted_environment_installs_nothing() {
    let fixture = Fixture::new();
    let env = seed_environment(&fixture.store, "a").await;

    // Accepted, but the worker has not run yet
    let task = fixture
        .orchestrator
        .insert(env, vec![flow("A")], "tester")
        .await
        .unwrap();
    fixture.store.delete_environments(&[env]).await.unwrap();
    fixture.orchestrator.drain().await;

    let task = fixture.settle(&task).await;
    assert_eq!(task.status, TaskStatus::Failed);
    assert!(task.outcomes.is_empty());
    assert!(task.error.unwrap().contains("not found"));
    assert!(fixture.controller.installed(env).is_empty());
}

#[tokio::test]
async fn test_environment_delete_waits_for_running_insert() {
    let fixture = Fixture::new();
    let env = seed_environment(&fixture.store, "a").await;

    let task = fixture
        .orchestrator
        .insert(env, vec![flow("A")], "tester")
        .await
        .unwrap();
    let err = fixture
        .orchestrator
        .delete_environments(&fixture.store, &[env])
        .await
        .unwrap_err();

    // The insert finished first, so its flow blocks the delete
    assert!(matches!(err, EnvError::Conflict(_)));
    assert_eq!(fixture.settle(&task).await.status, TaskStatus::Succeeded);
    let stored: Vec<Option<String>> = fixture
        .orchestrator
        .list_flows(env, None)
        .await
        .unwrap()
        .into_iter()
        .map(|f| f.id)
        .collect();
    let installed: Vec<Option<String>> = fixture.controller.installed(env).into_iter().map(Some).collect();
    assert_eq!(stored, installed);

    fixture.orchestrator.flush(env).await.unwrap();
    fixture
        .orchestrator
        .delete_environments(&fixture.store, &[env])
        .await
        .unwrap();
}

#[tokio::test]
async fn test_environment_delete_rejects_queued_task() {
    let fixture = Fixture::new();
    let env = seed_environment(&fixture.store, "a").await;

    // The first insert holds the environment; the second waits behind it
    let running = fixture
        .orchestrator
        .insert(env, vec![flow("A")], "tester")
        .await
        .unwrap();
    let queued = fixture
        .orchestrator
        .insert(env, vec![flow("B")], "tester")
        .await
        .unwrap();

    let err = fixture
        .orchestrator
        .delete_environments(&fixture.store, &[env])
        .await
        .unwrap_err();

    match err {
        EnvError::Conflict(message) => assert!(message.contains(&queued.id.to_string()), "{}", message),
        other => panic!("expected a conflict, got {:?}", other),
    }
    fixture.orchestrator.drain().await;
    assert_eq!(fixture.settle(&running).await.status, TaskStatus::Succeeded);
    assert_eq!(fixture.settle(&queued).await.status, TaskStatus::Succeeded);
    assert_eq!(stored_payloads(&fixture, env).await, vec![flow("A"), flow("B")]);
}
