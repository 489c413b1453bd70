use anyhow::Result;
use k8s_openapi::apimachinery::pkg::apis::meta::v1::{ObjectMeta, OwnerReference};

use crate::error::StoreError;
use crate::k8s::data::{owner_names, pipelines_referencing, SecretKey};
use crate::k8s::fixtures::{otlp_output, pipeline, MemoryStore};
use telemetry_core::crd::{AuthenticationOptions, BasicAuthOptions, ValueType};

fn owner_ref(api_version: &str, kind: &str, name: &str) -> OwnerReference {
    OwnerReference {
        api_version: api_version.into(),
        kind: kind.into(),
        name: name.into(),
        uid: format!("uid-{}", name),
        controller: Some(true),
        block_owner_deletion: Some(true),
    }
}

#[test]
fn owner_names_selects_pipeline_owners_only() -> Result<()> {
    let meta = ObjectMeta {
        owner_references: Some(vec![
            owner_ref("telemetry.io/v1alpha1", "TracePipeline", "p1"),
            owner_ref("apps/v1", "Deployment", "other"),
            owner_ref("example.com/v1", "TracePipeline", "foreign"),
        ]),
        ..Default::default()
    };

    let names = owner_names(&meta);

    assert!(names == vec!["p1".to_string()], "expected only the TracePipeline owner, got {:?}", names);
    assert!(owner_names(&ObjectMeta::default()).is_empty(), "expected no owners without owner references");
    Ok(())
}

#[tokio::test]
async fn secret_mapping_surfaces_list_failures() -> Result<()> {
    let store = MemoryStore::default();
    store.put_pipeline(pipeline("p1", otlp_output(ValueType::literal("http://collector:4317"))));
    store.put_pipeline(pipeline("p2", otlp_output(ValueType::secret_key("default", "s1", "endpoint"))));
    let secrets: Vec<SecretKey> = vec![("default".into(), "s1".into())];

    store.fail_pipeline_lists(true);
    let res = pipelines_referencing(&store, &secrets).await;
    assert!(
        matches!(res, Err(StoreError::Timeout)),
        "expected list failure to be returned for retry, got {:?}",
        res
    );

    store.fail_pipeline_lists(false);
    let names = pipelines_referencing(&store, &secrets).await?;
    assert!(names == vec!["p2".to_string()], "expected p2 to be triggered on retry, got {:?}", names);
    Ok(())
}

#[tokio::test]
async fn secret_mapping_triggers_each_pipeline_once() -> Result<()> {
    let store = MemoryStore::default();
    let mut otlp = otlp_output(ValueType::secret_key("default", "s1", "endpoint"));
    otlp.authentication = Some(AuthenticationOptions {
        basic: Some(BasicAuthOptions {
            user: ValueType::secret_key("default", "s2", "user"),
            password: ValueType::secret_key("default", "s2", "password"),
        }),
    });
    store.put_pipeline(pipeline("p3", otlp));
    let secrets: Vec<SecretKey> = vec![("default".into(), "s1".into()), ("default".into(), "s2".into())];

    let names = pipelines_referencing(&store, &secrets).await?;

    assert!(names == vec!["p3".to_string()], "expected a single trigger of p3, got {:?}", names);
    Ok(())
}
