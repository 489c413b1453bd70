//! Resolution of secret-backed pipeline values.

use k8s_openapi::api::core::v1::Secret;

use crate::error::{ReconcileError, SpecError};
use crate::k8s::store::ClusterStore;
use telemetry_core::crd::{OtlpOutput, ResolvedValue, SecretKeyRef, ValueType};

/// The resolved values of a pipeline output.
#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct SecretData {
    /// The export endpoint.
    pub endpoint: Vec<u8>,
    /// The basic auth credentials of the export destination, if configured.
    pub basic_auth: Option<BasicAuth>,
}

/// Resolved basic auth credentials.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct BasicAuth {
    pub user: Vec<u8>,
    pub password: Vec<u8>,
}

impl SecretData {
    /// The value of the HTTP `Authorization` header for the configured basic auth credentials.
    pub fn basic_auth_header(&self) -> Option<String> {
        self.basic_auth.as_ref().map(|auth| {
            let mut credentials = Vec::with_capacity(auth.user.len() + auth.password.len() + 1);
            credentials.extend_from_slice(&auth.user);
            credentials.push(b':');
            credentials.extend_from_slice(&auth.password);
            format!("Basic {}", base64::encode(credentials))
        })
    }
}

#[cfg(test)]
impl SecretData {
    /// Build an instance from a literal endpoint without authentication.
    pub fn with_endpoint(endpoint: impl Into<Vec<u8>>) -> Self {
        Self { endpoint: endpoint.into(), basic_auth: None }
    }
}

/// Resolve all values of the given output.
///
/// The output is validated first. An undefined value, a missing secret or a missing key are
/// configuration errors, which are not retried.
#[tracing::instrument(level = "debug", skip(store, otlp))]
pub async fn fetch_secret_data<S: ClusterStore>(store: &S, otlp: &OtlpOutput) -> Result<SecretData, ReconcileError> {
    otlp.validate()?;
    let endpoint = resolve(store, &otlp.endpoint, "output.otlp.endpoint").await?;
    let basic_auth = match otlp.basic_auth() {
        Some(basic) => Some(BasicAuth {
            user: resolve(store, &basic.user, "output.otlp.authentication.basic.user").await?,
            password: resolve(store, &basic.password, "output.otlp.authentication.basic.password").await?,
        }),
        None => None,
    };
    Ok(SecretData { endpoint, basic_auth })
}

/// Resolve a single value, fetching the referenced secret if needed.
///
/// The given field path is reported when the value is undefined.
pub async fn resolve<S: ClusterStore>(store: &S, value: &ValueType, field: &'static str) -> Result<Vec<u8>, ReconcileError> {
    let secret_ref = match value.resolve() {
        Some(ResolvedValue::Literal(literal)) => return Ok(literal.as_bytes().to_vec()),
        Some(ResolvedValue::Secret(secret_ref)) => secret_ref,
        None => return Err(SpecError::UndefinedValue(field).into()),
    };
    let secret = store
        .get_secret(&secret_ref.namespace, &secret_ref.name)
        .await
        .map_err(|source| ReconcileError::Fetch {
            what: format!("Secret {}/{}", secret_ref.namespace, secret_ref.name),
            source,
        })?;
    Ok(secret_value(secret.as_ref(), secret_ref)?)
}

/// Extract the referenced key from the given secret, which is `None` if it does not exist.
pub fn secret_value(secret: Option<&Secret>, secret_ref: &SecretKeyRef) -> Result<Vec<u8>, SpecError> {
    let secret = secret.ok_or_else(|| SpecError::SecretNotFound {
        namespace: secret_ref.namespace.clone(),
        name: secret_ref.name.clone(),
    })?;
    let from_data = secret
        .data
        .as_ref()
        .and_then(|data| data.get(&secret_ref.key))
        .map(|val| val.0.clone());
    // Not persisted by the API server, but set on objects which were never round tripped.
    let from_string_data = || {
        secret
            .string_data
            .as_ref()
            .and_then(|data| data.get(&secret_ref.key))
            .map(|val| val.as_bytes().to_vec())
    };
    from_data.or_else(from_string_data).ok_or_else(|| SpecError::SecretKeyNotFound {
        namespace: secret_ref.namespace.clone(),
        name: secret_ref.name.clone(),
        key: secret_ref.key.clone(),
    })
}
