use anyhow::{bail, Result};
use k8s_openapi::api::core::v1::{ConfigMap, Service, ServicePort, ServiceSpec};
use k8s_openapi::apimachinery::pkg::apis::meta::v1::{ObjectMeta, OwnerReference};
use maplit::btreemap;
use serde_json::json;

use crate::error::ReconcileError;
use crate::k8s::fixtures::{MemoryStore, WriteOp};
use crate::k8s::sync::{ensure, is_derivative_of, set_owner_reference, ChildKind, ChildResource, SyncOutcome};

fn owner() -> OwnerReference {
    OwnerReference {
        api_version: "telemetry.io/v1alpha1".into(),
        kind: "TracePipeline".into(),
        name: "p1".into(),
        uid: "uid-p1".into(),
        controller: Some(true),
        block_owner_deletion: Some(true),
    }
}

fn config_map(data: &[(&str, &str)]) -> ChildResource {
    ChildResource::ConfigMap(ConfigMap {
        metadata: ObjectMeta {
            name: Some("collector".into()),
            namespace: Some("default".into()),
            labels: Some(btreemap! { "app.kubernetes.io/name".into() => "collector".into() }),
            ..Default::default()
        },
        data: Some(data.iter().map(|(key, val)| (key.to_string(), val.to_string())).collect()),
        ..Default::default()
    })
}

fn service(ports: &[i32], cluster_ip: Option<&str>) -> ChildResource {
    ChildResource::Service(Service {
        metadata: ObjectMeta {
            name: Some("collector".into()),
            namespace: Some("default".into()),
            ..Default::default()
        },
        spec: Some(ServiceSpec {
            cluster_ip: cluster_ip.map(String::from),
            ports: Some(
                ports
                    .iter()
                    .map(|port| ServicePort { port: *port, ..Default::default() })
                    .collect(),
            ),
            ..Default::default()
        }),
        ..Default::default()
    })
}

#[test]
fn derivative_comparison_ignores_unset_fields() -> Result<()> {
    let desired = json!({"replicas": 1, "template": {"spec": {"priorityClassName": null}}});
    let current = json!({"replicas": 1, "revisionHistoryLimit": 10, "template": {"spec": {"dnsPolicy": "ClusterFirst"}}});
    assert!(is_derivative_of(&desired, &current), "expected server populated fields to be ignored");

    let current = json!({"replicas": 2});
    assert!(!is_derivative_of(&desired, &current), "expected changed replicas to be detected");

    let desired = json!({"ports": [{"port": 4317}, {"port": 4318}]});
    let current = json!({"ports": [{"port": 4317, "protocol": "TCP"}]});
    assert!(!is_derivative_of(&desired, &current), "expected removed array element to be detected");

    let desired = json!({"args": []});
    let current = json!({});
    assert!(is_derivative_of(&desired, &current), "expected empty array to match absent field");
    Ok(())
}

#[test]
fn config_map_with_extra_key_is_not_satisfied() -> Result<()> {
    let desired = config_map(&[("a", "1")]);
    let current = config_map(&[("a", "1"), ("b", "2")]);
    assert!(!desired.is_satisfied_by(&current), "expected extra data key to require an update");

    let current = config_map(&[("a", "1")]);
    assert!(desired.is_satisfied_by(&current), "expected identical data to be satisfied");
    Ok(())
}

#[test]
fn missing_label_or_owner_is_not_satisfied() -> Result<()> {
    let mut desired = config_map(&[("a", "1")]);
    let mut current = desired.clone();
    current.metadata_mut().labels = None;
    assert!(!desired.is_satisfied_by(&current), "expected missing label to require an update");

    set_owner_reference(desired.metadata_mut(), &owner());
    let current = config_map(&[("a", "1")]);
    assert!(!desired.is_satisfied_by(&current), "expected missing owner reference to require an update");

    let mut current = desired.clone();
    current
        .metadata_mut()
        .labels
        .get_or_insert_with(Default::default)
        .insert("extra".into(), "label".into());
    assert!(desired.is_satisfied_by(&current), "expected extra labels on the current object to be tolerated");
    Ok(())
}

#[test]
fn apply_to_preserves_server_populated_fields() -> Result<()> {
    let desired = service(&[4317, 4318], None);
    let mut current = service(&[4317], Some("10.0.0.10"));
    current.metadata_mut().resource_version = Some("42".into());
    current.metadata_mut().uid = Some("uid-svc".into());

    let merged = match desired.apply_to(current) {
        ChildResource::Service(merged) => merged,
        other => bail!("expected a Service, got {:?}", other),
    };

    assert!(
        merged.metadata.resource_version.as_deref() == Some("42") && merged.metadata.uid.as_deref() == Some("uid-svc"),
        "expected identity of current object to be preserved, got {:?}",
        merged.metadata
    );
    let spec = merged.spec.unwrap_or_default();
    assert!(spec.cluster_ip.as_deref() == Some("10.0.0.10"), "expected cluster IP to be preserved, got {:?}", spec.cluster_ip);
    let ports: Vec<i32> = spec.ports.unwrap_or_default().iter().map(|port| port.port).collect();
    assert!(ports == vec![4317, 4318], "expected desired ports, got {:?}", ports);
    Ok(())
}

#[test]
fn set_owner_reference_replaces_other_controllers() -> Result<()> {
    let mut meta = ObjectMeta::default();
    let mut other = owner();
    other.uid = "uid-other".into();
    set_owner_reference(&mut meta, &other);
    set_owner_reference(&mut meta, &owner());
    set_owner_reference(&mut meta, &owner());

    let refs = meta.owner_references.unwrap_or_default();
    assert!(
        refs.len() == 1 && refs[0].uid == "uid-p1",
        "expected a single controller reference to p1, got {:?}",
        refs
    );
    Ok(())
}

#[tokio::test]
async fn ensure_creates_updates_and_skips() -> Result<()> {
    let store = MemoryStore::default();

    let outcome = ensure(&store, &owner(), config_map(&[("a", "1")])).await?;
    assert!(outcome == SyncOutcome::Created, "expected Created, got {:?}", outcome);
    let created = store.child(ChildKind::ConfigMap, "default", "collector");
    let owners = created.as_ref().and_then(|child| child.metadata().owner_references.clone()).unwrap_or_default();
    assert!(owners == vec![owner()], "expected created object to carry the owner reference, got {:?}", owners);

    let outcome = ensure(&store, &owner(), config_map(&[("a", "1")])).await?;
    assert!(outcome == SyncOutcome::Unchanged, "expected Unchanged, got {:?}", outcome);

    let outcome = ensure(&store, &owner(), config_map(&[("a", "2")])).await?;
    assert!(outcome == SyncOutcome::Updated, "expected Updated, got {:?}", outcome);

    let expected_writes = vec![
        WriteOp { op: "create", kind: ChildKind::ConfigMap, name: "collector".into() },
        WriteOp { op: "update", kind: ChildKind::ConfigMap, name: "collector".into() },
    ];
    let writes = store.writes();
    assert!(writes == expected_writes, "unexpected writes, expected {:?}, got {:?}", expected_writes, writes);
    Ok(())
}

#[tokio::test]
async fn ensure_reports_stale_version_as_conflict() -> Result<()> {
    let store = MemoryStore::default();
    ensure(&store, &owner(), config_map(&[("a", "1")])).await?;
    store.conflict_on_update_of(ChildKind::ConfigMap);

    let res = ensure(&store, &owner(), config_map(&[("a", "2")])).await;

    match res {
        Err(ReconcileError::Conflict { kind: ChildKind::ConfigMap, name }) => {
            assert!(name == "collector", "unexpected object name in conflict error, got {}", name);
        }
        other => bail!("expected conflict error, got {:?}", other),
    }
    Ok(())
}
