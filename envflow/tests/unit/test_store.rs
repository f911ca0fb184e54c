//! Environment store tests

use envflow::environment::search::SearchParams;
use envflow::environment::store::{EnvironmentStore, FlowStore};
use envflow::errors::EnvError;
use envflow::filesys::file::File;
use envflow::models::environment::{
    BaseKind, EnvironmentConfig, EnvironmentPayload, IpVersion, NewBaseEnvironment,
};
use envflow::models::flow::FlowRule;
use serde_json::json;
use tempfile::tempdir;

use crate::common::{payload, seed_bases, seed_environment};

fn names(names: &[&str]) -> Vec<NewBaseEnvironment> {
    names
        .iter()
        .map(|n| NewBaseEnvironment {
            name: n.to_string(),
        })
        .collect()
}

#[tokio::test]
async fn test_base_names_are_unique_per_kind() {
    let store = EnvironmentStore::new();
    store.create_base(BaseKind::Logic, names(&["Prod"])).await.unwrap();

    let err = store
        .create_base(BaseKind::Logic, names(&[" prod "]))
        .await
        .unwrap_err();
    assert!(matches!(err, EnvError::Conflict(_)));

    // Same name under another kind is fine
    store.create_base(BaseKind::Dc, names(&["Prod"])).await.unwrap();
}

#[tokio::test]
async fn test_base_batch_is_atomic() {
    let store = EnvironmentStore::new();

    let err = store
        .create_base(BaseKind::L3, names(&["core", "edge", "CORE"]))
        .await
        .unwrap_err();
    assert!(matches!(err, EnvError::Conflict(_)));
    let err = store
        .create_base(BaseKind::L3, names(&["core", "  "]))
        .await
        .unwrap_err();
    assert!(matches!(err, EnvError::ValidationError(_)));

    let found = store
        .search_base(BaseKind::L3, &SearchParams::default())
        .await
        .unwrap();
    assert_eq!(found.total, 0);
}

#[tokio::test]
async fn test_environment_name_and_details() {
    let store = EnvironmentStore::new();
    let (logic, l3, dc) = seed_bases(&store, "a").await;
    let father = store
        .create_environments(vec![payload(logic, l3, dc)])
        .await
        .unwrap()[0];

    let (logic_b, l3_b, dc_b) = seed_bases(&store, "b").await;
    let child = store
        .create_environments(vec![EnvironmentPayload {
            father_environment: Some(father),
            ..payload(logic_b, l3_b, dc_b)
        }])
        .await
        .unwrap()[0];

    let environments = store.get_environments(&[father, child]).await.unwrap();
    assert_eq!(environments[0].name, "dc-a - logic-a - l3-a");

    let details = store.environment_details(&environments).await;
    assert_eq!(details[0]["children"], json!([child]));
    assert_eq!(details[1]["father_environment"], json!({ "id": father, "name": environments[0].name }));
    assert_eq!(details[1]["divisao_dc"], json!({ "id": dc_b, "name": "dc-b" }));
}

#[tokio::test]
async fn test_environment_batch_is_atomic() {
    let store = EnvironmentStore::new();
    let (logic, l3, dc) = seed_bases(&store, "a").await;
    let (logic_b, l3_b, dc_b) = seed_bases(&store, "b").await;

    let invalid = EnvironmentPayload {
        min_num_vlan_1: Some(200),
        max_num_vlan_1: Some(100),
        ..payload(logic_b, l3_b, dc_b)
    };
    let err = store
        .create_environments(vec![payload(logic, l3, dc), invalid])
        .await
        .unwrap_err();
    assert!(matches!(err, EnvError::ValidationError(_)));

    let found = store.search_environments(&SearchParams::default()).await.unwrap();
    assert_eq!(found.total, 0);
}

#[tokio::test]
async fn test_environment_rejects_duplicates_and_dangling_references() {
    let store = EnvironmentStore::new();
    let (logic, l3, dc) = seed_bases(&store, "a").await;
    store.create_environments(vec![payload(logic, l3, dc)]).await.unwrap();

    let err = store
        .create_environments(vec![payload(logic, l3, dc)])
        .await
        .unwrap_err();
    assert!(matches!(err, EnvError::Conflict(_)));

    let err = store
        .create_environments(vec![payload(logic, l3, dc + 10)])
        .await
        .unwrap_err();
    assert!(matches!(err, EnvError::NotFound(_)));
}

#[tokio::test]
async fn test_environment_config_must_match_family() {
    let store = EnvironmentStore::new();
    let (logic, l3, dc) = seed_bases(&store, "a").await;

    let config = |subnet: &str, new_prefix: u8, ip_version: IpVersion| EnvironmentConfig {
        subnet: subnet.parse().unwrap(),
        new_prefix,
        ip_version,
    };

    let mismatched = EnvironmentPayload {
        configs: vec![config("10.0.0.0/16", 24, IpVersion::V6)],
        ..payload(logic, l3, dc)
    };
    assert!(store.create_environments(vec![mismatched]).await.is_err());

    let too_wide = EnvironmentPayload {
        configs: vec![config("10.0.0.0/16", 8, IpVersion::V4)],
        ..payload(logic, l3, dc)
    };
    assert!(store.create_environments(vec![too_wide]).await.is_err());

    let valid = EnvironmentPayload {
        configs: vec![
            config("10.0.0.0/16", 24, IpVersion::V4),
            config("fd00::/48", 64, IpVersion::V6),
        ],
        ..payload(logic, l3, dc)
    };
    store.create_environments(vec![valid]).await.unwrap();
}

#[tokio::test]
async fn test_update_rejects_father_cycles() {
    let store = EnvironmentStore::new();
    let (logic, l3, dc) = seed_bases(&store, "a").await;
    let (logic_b, l3_b, dc_b) = seed_bases(&store, "b").await;
    let root = store.create_environments(vec![payload(logic, l3, dc)]).await.unwrap()[0];
    let child = store
        .create_environments(vec![EnvironmentPayload {
            father_environment: Some(root),
            ..payload(logic_b, l3_b, dc_b)
        }])
        .await
        .unwrap()[0];

    let own_father = EnvironmentPayload {
        id: Some(root),
        father_environment: Some(root),
        ..payload(logic, l3, dc)
    };
    let err = store.update_environments(vec![own_father]).await.unwrap_err();
    assert!(matches!(err, EnvError::ValidationError(_)));

    let cycle = EnvironmentPayload {
        id: Some(root),
        father_environment: Some(child),
        ..payload(logic, l3, dc)
    };
    let err = store.update_environments(vec![cycle]).await.unwrap_err();
    assert!(matches!(err, EnvError::ValidationError(_)));

    let missing_id = payload(logic, l3, dc);
    let err = store.update_environments(vec![missing_id]).await.unwrap_err();
    assert!(matches!(err, EnvError::ValidationError(_)));
}

#[tokio::test]
async fn test_update_replaces_attributes() {
    let store = EnvironmentStore::new();
    let (logic, l3, dc) = seed_bases(&store, "a").await;
    let id = store.create_environments(vec![payload(logic, l3, dc)]).await.unwrap()[0];

    store
        .update_environments(vec![EnvironmentPayload {
            id: Some(id),
            vrf: Some("red".to_string()),
            environment_vips: vec![5],
            ..payload(logic, l3, dc)
        }])
        .await
        .unwrap();

    let updated = store.get_environments(&[id]).await.unwrap();
    assert_eq!(updated[0].vrf.as_deref(), Some("red"));
    assert_eq!(store.environments_by_vip(Some(5)).await.len(), 1);
    assert!(store.environments_by_vip(Some(6)).await.is_empty());
    assert_eq!(store.environments_by_vip(None).await.len(), 1);
}

#[tokio::test]
async fn test_delete_requires_no_dependents() {
    let store = EnvironmentStore::new();
    let with_flows = seed_environment(&store, "a").await;
    store
        .persist_flow(
            with_flows,
            FlowRule::pending(with_flows, json!({"a": 1})).installed("flow-1".into()),
        )
        .await
        .unwrap();
    let err = store.delete_environments(&[with_flows]).await.unwrap_err();
    assert!(matches!(err, EnvError::Conflict(_)));

    let (logic, l3, dc) = seed_bases(&store, "b").await;
    let with_vips = store
        .create_environments(vec![EnvironmentPayload {
            environment_vips: vec![3],
            ..payload(logic, l3, dc)
        }])
        .await
        .unwrap()[0];
    let err = store.delete_environments(&[with_vips]).await.unwrap_err();
    assert!(matches!(err, EnvError::Conflict(_)));

    let father = seed_environment(&store, "c").await;
    let (logic, l3, dc) = seed_bases(&store, "d").await;
    let child = store
        .create_environments(vec![EnvironmentPayload {
            father_environment: Some(father),
            ..payload(logic, l3, dc)
        }])
        .await
        .unwrap()[0];
    let err = store.delete_environments(&[father]).await.unwrap_err();
    assert!(matches!(err, EnvError::Conflict(_)));

    // Father and child go together
    store.delete_environments(&[father, child]).await.unwrap();
    assert!(store.get_environments(&[father]).await.is_err());

    store.remove_flow(with_flows, "flow-1").await.unwrap();
    store.delete_environments(&[with_flows]).await.unwrap();
}

#[tokio::test]
async fn test_flow_store_replaces_by_id() {
    let store = EnvironmentStore::new();
    let env = seed_environment(&store, "a").await;

    let first = FlowRule::pending(env, json!({"v": 1})).installed("flow-1".into());
    let second = FlowRule::pending(env, json!({"v": 2})).installed("flow-1".into());
    store.persist_flow(env, first).await.unwrap();
    store.persist_flow(env, second).await.unwrap();

    let flows = store.list_flows(env).await.unwrap();
    assert_eq!(flows.len(), 1);
    assert_eq!(flows[0].payload, json!({"v": 2}));

    let unassigned = FlowRule::pending(env, json!({"v": 3}));
    assert!(matches!(
        store.persist_flow(env, unassigned).await.unwrap_err(),
        EnvError::Internal(_)
    ));
    assert!(matches!(
        store.remove_flow(env, "flow-9").await.unwrap_err(),
        EnvError::NotFound(_)
    ));
    assert!(matches!(
        store.list_flows(env + 1).await.unwrap_err(),
        EnvError::NotFound(_)
    ));
}

#[tokio::test]
async fn test_snapshot_round_trip() {
    let dir = tempdir().unwrap();
    let path = dir.path().join("snapshot.json");

    let store = EnvironmentStore::open(Some(File::new(&path))).await.unwrap();
    let env = seed_environment(&store, "a").await;
    store
        .persist_flow(env, FlowRule::pending(env, json!({"a": 1})).installed("flow-1".into()))
        .await
        .unwrap();
    store.save().await.unwrap();

    let reopened = EnvironmentStore::open(Some(File::new(&path))).await.unwrap();
    assert_eq!(reopened.get_environments(&[env]).await.unwrap().len(), 1);
    assert_eq!(reopened.list_flows(env).await.unwrap().len(), 1);

    // Ids keep counting from where the snapshot left off
    let next = seed_environment(&reopened, "b").await;
    assert!(next > env);
}

#[tokio::test]
async fn test_mutations_write_the_snapshot() {
    let dir = tempdir().unwrap();
    let path = dir.path().join("snapshot.json");

    let store = EnvironmentStore::open(Some(File::new(&path))).await.unwrap();
    let env = seed_environment(&store, "a").await;

    // Reopened without an explicit save
    let reopened = EnvironmentStore::open(Some(File::new(&path))).await.unwrap();
    assert_eq!(reopened.get_environments(&[env]).await.unwrap().len(), 1);

    store.delete_environments(&[env]).await.unwrap();
    let reopened = EnvironmentStore::open(Some(File::new(&path))).await.unwrap();
    assert!(reopened.get_environments(&[env]).await.is_err());
}
