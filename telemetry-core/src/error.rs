//! Telemetry error abstractions.

use thiserror::Error;

/// Errors describing a pipeline spec which can not be realized.
///
/// These errors will not resolve on their own. The user has to edit the pipeline or the
/// referenced secrets before another attempt can succeed.
#[derive(Clone, Debug, Error, PartialEq, Eq)]
pub enum SpecError {
    /// A required value has neither a literal value nor a secret reference.
    #[error("{0} must have either a value or a valueFrom secretKeyRef")]
    UndefinedValue(&'static str),
    /// A metadata field required to own child objects is missing.
    #[error("pipeline is missing {0}")]
    MissingMetadata(&'static str),
    /// The referenced secret does not exist.
    #[error("referenced secret {namespace}/{name} not found")]
    SecretNotFound { namespace: String, name: String },
    /// The referenced secret exists, but does not carry the referenced key.
    #[error("key {key} not found in referenced secret {namespace}/{name}")]
    SecretKeyNotFound { namespace: String, name: String, key: String },
    /// A derived object could not be serialized.
    #[error("error serializing collector configuration: {0}")]
    Serialization(String),
}
