use anyhow::Result;

use crate::k8s::deps::{affected_pipelines, references_secret};
use crate::k8s::fixtures::{otlp_output, pipeline};
use telemetry_core::crd::{AuthenticationOptions, BasicAuthOptions, TracePipeline, ValueType};

fn names(pipelines: &[TracePipeline], namespace: &str, name: &str) -> Vec<String> {
    affected_pipelines(namespace, name, pipelines).into_iter().map(|obj_ref| obj_ref.name).collect()
}

fn with_auth(name: &str, user: ValueType, password: ValueType) -> TracePipeline {
    let mut otlp = otlp_output(ValueType::literal("http://collector:4317"));
    otlp.authentication = Some(AuthenticationOptions {
        basic: Some(BasicAuthOptions { user, password }),
    });
    pipeline(name, otlp)
}

#[test]
fn secret_change_selects_referencing_pipelines_only() -> Result<()> {
    let pipelines = vec![
        pipeline("p1", otlp_output(ValueType::literal("http://collector:4317"))),
        pipeline("p2", otlp_output(ValueType::secret_key("default", "s1", "endpoint"))),
    ];

    let affected = names(&pipelines, "default", "s1");
    assert!(affected == vec!["p2".to_string()], "expected only p2 to be affected by s1, got {:?}", affected);

    let affected = names(&pipelines, "default", "s2");
    assert!(affected.is_empty(), "expected no pipeline to be affected by s2, got {:?}", affected);

    let affected = names(&pipelines, "other", "s1");
    assert!(affected.is_empty(), "expected namespace to be matched, got {:?}", affected);
    Ok(())
}

#[test]
fn basic_auth_references_are_dependencies() -> Result<()> {
    let pipelines = vec![
        with_auth("user-ref", ValueType::secret_key("default", "creds", "user"), ValueType::literal("pass")),
        with_auth("password-ref", ValueType::literal("user"), ValueType::secret_key("default", "creds", "password")),
        with_auth("unrelated", ValueType::literal("user"), ValueType::literal("pass")),
    ];

    let affected = names(&pipelines, "default", "creds");
    let expected = vec!["user-ref".to_string(), "password-ref".to_string()];
    assert!(affected == expected, "expected {:?} to be affected, got {:?}", expected, affected);
    Ok(())
}

#[test]
fn shadowed_reference_is_still_a_dependency() -> Result<()> {
    let mut endpoint = ValueType::secret_key("default", "s1", "endpoint");
    endpoint.value = "http://collector:4317".into();
    let pipeline = pipeline("p1", otlp_output(endpoint));
    assert!(
        references_secret(&pipeline, "default", "s1"),
        "expected a reference shadowed by a literal to be reported"
    );
    Ok(())
}
