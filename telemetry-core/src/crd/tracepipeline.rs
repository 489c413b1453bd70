//! TracePipeline CRD.
//!
//! The code here is used to generate the actual CRD used in K8s. See examples/crd.rs.

use kube::CustomResource;
use schemars::JsonSchema;
use serde::{Deserialize, Serialize};

use crate::error::SpecError;

pub type TracePipeline = TracePipelineCRD; // Mostly to resolve a Rust Analyzer issue.

/// CRD spec for the TracePipeline resource.
///
/// A TracePipeline describes where the trace collector managed by the operator should export
/// its data. The operator derives a collector Deployment, its configuration and credentials,
/// and the Services exposing it, from this spec.
#[derive(Clone, Debug, Deserialize, Serialize, PartialEq, CustomResource, JsonSchema)]
#[kube(
    struct = "TracePipelineCRD",
    status = "TracePipelineStatus",
    group = "telemetry.io",
    version = "v1alpha1",
    kind = "TracePipeline",
    derive = "PartialEq",
    apiextensions = "v1",
    shortname = "tp",
    printcolumn = r#"{"name":"Endpoint","type":"string","jsonPath":".spec.output.otlp.endpoint.value"}"#,
    printcolumn = r#"{"name":"Protocol","type":"string","jsonPath":".spec.output.otlp.protocol"}"#
)]
pub struct TracePipelineSpec {
    /// The destination of all traces passing through this pipeline.
    pub output: TracePipelineOutput,
}

/// The output section of a TracePipeline.
#[derive(Clone, Debug, Deserialize, Serialize, PartialEq, JsonSchema)]
pub struct TracePipelineOutput {
    /// Export traces using the OpenTelemetry protocol.
    pub otlp: OtlpOutput,
}

/// An OTLP export destination.
#[derive(Clone, Debug, Deserialize, Serialize, PartialEq, JsonSchema)]
pub struct OtlpOutput {
    /// The OTLP endpoint of the destination, for example `http://collector:4317`.
    pub endpoint: ValueType,
    /// The OTLP transport used by the exporter.
    #[serde(default)]
    pub protocol: OtlpProtocol,
    /// Authentication towards the destination.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub authentication: Option<AuthenticationOptions>,
}

/// The OTLP transport.
#[derive(Clone, Copy, Debug, Deserialize, Serialize, PartialEq, Eq, JsonSchema)]
#[serde(rename_all = "lowercase")]
pub enum OtlpProtocol {
    Grpc,
    Http,
}

impl Default for OtlpProtocol {
    fn default() -> Self {
        OtlpProtocol::Grpc
    }
}

/// Authentication options of an output.
#[derive(Clone, Debug, Default, Deserialize, Serialize, PartialEq, JsonSchema)]
pub struct AuthenticationOptions {
    /// HTTP basic authentication.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub basic: Option<BasicAuthOptions>,
}

/// Credentials for HTTP basic authentication.
#[derive(Clone, Debug, Default, Deserialize, Serialize, PartialEq, JsonSchema)]
pub struct BasicAuthOptions {
    pub user: ValueType,
    pub password: ValueType,
}

/// A value given either literally or by reference to a key of a K8s Secret.
#[derive(Clone, Debug, Default, Deserialize, Serialize, PartialEq, JsonSchema)]
#[serde(rename_all = "camelCase")]
pub struct ValueType {
    /// The literal value.
    #[serde(default, skip_serializing_if = "String::is_empty")]
    pub value: String,
    /// The source of the value, used when no literal value is given.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub value_from: Option<ValueFromSource>,
}

/// The source of a referenced value.
#[derive(Clone, Debug, Default, Deserialize, Serialize, PartialEq, JsonSchema)]
#[serde(rename_all = "camelCase")]
pub struct ValueFromSource {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub secret_key_ref: Option<SecretKeyRef>,
}

/// A reference to a single key of a K8s Secret.
#[derive(Clone, Debug, Default, Deserialize, Serialize, PartialEq, Eq, PartialOrd, Ord, Hash, JsonSchema)]
pub struct SecretKeyRef {
    pub name: String,
    pub namespace: String,
    pub key: String,
}

/// The status of a TracePipeline.
#[derive(Clone, Debug, Default, Deserialize, Serialize, PartialEq, JsonSchema)]
pub struct TracePipelineStatus {}

/// A value resolved to the form in which it is to be fetched.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum ResolvedValue<'a> {
    /// A literal value, usable as is.
    Literal(&'a str),
    /// A key of a K8s Secret which has to be fetched.
    Secret(&'a SecretKeyRef),
}

impl SecretKeyRef {
    /// Check that this reference points at an actual key.
    pub fn is_complete(&self) -> bool {
        !self.name.is_empty() && !self.namespace.is_empty() && !self.key.is_empty()
    }

    /// Check if this reference points into the given secret.
    pub fn points_to(&self, namespace: &str, name: &str) -> bool {
        self.namespace == namespace && self.name == name
    }
}

impl ValueType {
    /// Build a literal value.
    pub fn literal(value: impl Into<String>) -> Self {
        Self { value: value.into(), value_from: None }
    }

    /// Build a value referencing the given key of a K8s Secret.
    pub fn secret_key(namespace: impl Into<String>, name: impl Into<String>, key: impl Into<String>) -> Self {
        Self {
            value: String::new(),
            value_from: Some(ValueFromSource {
                secret_key_ref: Some(SecretKeyRef {
                    name: name.into(),
                    namespace: namespace.into(),
                    key: key.into(),
                }),
            }),
        }
    }

    /// The secret key referenced by this value, if any.
    ///
    /// This is reported even when a literal value shadows the reference.
    pub fn secret_key_ref(&self) -> Option<&SecretKeyRef> {
        self.value_from.as_ref().and_then(|from| from.secret_key_ref.as_ref())
    }

    /// Check if this value is given either literally or by a complete secret reference.
    pub fn is_defined(&self) -> bool {
        self.resolve().is_some()
    }

    /// Resolve the form of this value. A literal value takes precedence over a reference.
    pub fn resolve(&self) -> Option<ResolvedValue<'_>> {
        if !self.value.is_empty() {
            return Some(ResolvedValue::Literal(&self.value));
        }
        self.secret_key_ref()
            .filter(|secret_ref| secret_ref.is_complete())
            .map(ResolvedValue::Secret)
    }

    /// Check if this value references the given secret.
    pub fn references_secret(&self, namespace: &str, name: &str) -> bool {
        self.secret_key_ref()
            .map(|secret_ref| secret_ref.points_to(namespace, name))
            .unwrap_or(false)
    }
}

impl BasicAuthOptions {
    /// Check if both user and password are defined.
    pub fn is_defined(&self) -> bool {
        self.user.is_defined() && self.password.is_defined()
    }
}

impl OtlpOutput {
    /// The basic auth credentials of this output, if any are configured.
    pub fn basic_auth(&self) -> Option<&BasicAuthOptions> {
        self.authentication.as_ref().and_then(|auth| auth.basic.as_ref())
    }

    /// All values of this output which may reference a secret.
    pub fn values(&self) -> impl Iterator<Item = &ValueType> {
        let auth = self.basic_auth().into_iter().flat_map(|basic| [&basic.user, &basic.password]);
        std::iter::once(&self.endpoint).chain(auth)
    }

    /// All secret keys which have to be fetched in order to build this output's credentials.
    ///
    /// The returned references are sorted and deduplicated.
    pub fn required_secret_refs(&self) -> Vec<&SecretKeyRef> {
        let mut refs: Vec<&SecretKeyRef> = self
            .values()
            .filter_map(|value| match value.resolve() {
                Some(ResolvedValue::Secret(secret_ref)) => Some(secret_ref),
                _ => None,
            })
            .collect();
        refs.sort();
        refs.dedup();
        refs
    }

    /// Validate that this output can be realized.
    pub fn validate(&self) -> Result<(), SpecError> {
        if !self.endpoint.is_defined() {
            return Err(SpecError::UndefinedValue("output.otlp.endpoint"));
        }
        if let Some(basic) = self.basic_auth() {
            if !basic.user.is_defined() {
                return Err(SpecError::UndefinedValue("output.otlp.authentication.basic.user"));
            }
            if !basic.password.is_defined() {
                return Err(SpecError::UndefinedValue("output.otlp.authentication.basic.password"));
            }
        }
        Ok(())
    }
}

impl TracePipelineCRD {
    /// Check if any value of this pipeline's output references the given secret.
    pub fn references_secret(&self, namespace: &str, name: &str) -> bool {
        self.spec.output.otlp.values().any(|value| value.references_secret(namespace, name))
    }
}
