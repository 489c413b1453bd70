use anyhow::{bail, Result};

use crate::error::{ReconcileError, SpecError};
use crate::k8s::fixtures::{otlp_output, secret, MemoryStore};
use crate::k8s::secrets::{fetch_secret_data, resolve, SecretData};
use telemetry_core::crd::{AuthenticationOptions, BasicAuthOptions, ValueType};

#[tokio::test]
async fn literal_values_resolve_without_reads() -> Result<()> {
    let store = MemoryStore::default();
    store.fail_secret_reads();

    let data = fetch_secret_data(&store, &otlp_output(ValueType::literal("http://collector:4317"))).await?;

    let expected = SecretData::with_endpoint("http://collector:4317");
    assert!(data == expected, "expected {:?}, got {:?}", expected, data);
    Ok(())
}

#[tokio::test]
async fn secret_values_resolve_from_referenced_keys() -> Result<()> {
    let store = MemoryStore::default();
    store.put_secret(secret("default", "creds", &[("endpoint", "http://collector:4317"), ("user", "u"), ("password", "p")]));
    let mut otlp = otlp_output(ValueType::secret_key("default", "creds", "endpoint"));
    otlp.authentication = Some(AuthenticationOptions {
        basic: Some(BasicAuthOptions {
            user: ValueType::secret_key("default", "creds", "user"),
            password: ValueType::secret_key("default", "creds", "password"),
        }),
    });

    let data = fetch_secret_data(&store, &otlp).await?;

    assert!(data.endpoint == b"http://collector:4317".to_vec(), "unexpected endpoint, got {:?}", data.endpoint);
    let header = data.basic_auth_header();
    assert!(header.as_deref() == Some("Basic dTpw"), "unexpected basic auth header, got {:?}", header);
    Ok(())
}

#[tokio::test]
async fn missing_key_is_configuration_error() -> Result<()> {
    let store = MemoryStore::default();
    store.put_secret(secret("default", "creds", &[("other", "val")]));

    let res = resolve(&store, &ValueType::secret_key("default", "creds", "endpoint"), "output.otlp.endpoint").await;

    match res {
        Err(ReconcileError::Configuration(SpecError::SecretKeyNotFound { key, .. })) => {
            assert!(key == "endpoint", "unexpected key in error, got {}", key);
        }
        other => bail!("expected SecretKeyNotFound error, got {:?}", other),
    }
    Ok(())
}

#[tokio::test]
async fn store_failure_is_transient_fetch_error() -> Result<()> {
    let store = MemoryStore::default();
    store.fail_secret_reads();

    let res = resolve(&store, &ValueType::secret_key("default", "creds", "endpoint"), "output.otlp.endpoint").await;

    match res {
        Err(err @ ReconcileError::Fetch { .. }) => {
            assert!(err.is_transient(), "expected fetch error to be transient");
        }
        other => bail!("expected fetch error, got {:?}", other),
    }
    Ok(())
}
