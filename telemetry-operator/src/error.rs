//! Operator error abstractions.

use thiserror::Error;

pub use telemetry_core::SpecError;

use crate::k8s::sync::ChildKind;

/// Errors returned by a `ClusterStore`.
#[derive(Debug, Error)]
pub enum StoreError {
    /// The object was modified since it was read, the given resource version is stale.
    #[error("conflict: the object has been modified since it was read")]
    Conflict,
    /// The API call did not complete within the allotted time.
    #[error("timeout while calling the K8s API")]
    Timeout,
    /// The K8s API returned an error.
    #[error("error from K8s API: {0}")]
    Api(#[from] kube::Error),
    /// The object to update does not exist.
    #[error("object not found")]
    NotFound,
}

/// A result type where the error is a `StoreError`.
pub type StoreResult<T> = ::std::result::Result<T, StoreError>;

/// Errors which abort a reconcile pass.
///
/// The variants of this type encode the retry policy of the operator. See `is_transient`.
#[derive(Debug, Error)]
pub enum ReconcileError {
    /// The pipeline spec is malformed, incomplete, or references a missing secret key.
    #[error("invalid pipeline configuration: {0}")]
    Configuration(#[from] SpecError),
    /// A child object was modified concurrently.
    #[error("conflict updating {kind} {name}")]
    Conflict { kind: ChildKind, name: String },
    /// Creating a child object failed.
    #[error("error creating {kind} {name}: {source}")]
    Create {
        kind: ChildKind,
        name: String,
        #[source]
        source: StoreError,
    },
    /// Updating a child object failed.
    #[error("error updating {kind} {name}: {source}")]
    Update {
        kind: ChildKind,
        name: String,
        #[source]
        source: StoreError,
    },
    /// Reading an object failed.
    #[error("error fetching {what}: {source}")]
    Fetch {
        what: String,
        #[source]
        source: StoreError,
    },
}

impl ReconcileError {
    /// Check if this error may resolve by itself, in which case the pass should be retried.
    ///
    /// Configuration errors only resolve once the user edits the pipeline or the referenced
    /// secrets, both of which trigger a new reconcile pass.
    pub fn is_transient(&self) -> bool {
        match self {
            ReconcileError::Configuration(_) => false,
            ReconcileError::Conflict { .. } | ReconcileError::Create { .. } | ReconcileError::Update { .. } | ReconcileError::Fetch { .. } => true,
        }
    }

    /// A short label for this error's class, used for metrics.
    pub fn label(&self) -> &'static str {
        match self {
            ReconcileError::Configuration(_) => "configuration",
            ReconcileError::Conflict { .. } => "conflict",
            ReconcileError::Create { .. } => "create",
            ReconcileError::Update { .. } => "update",
            ReconcileError::Fetch { .. } => "fetch",
        }
    }
}
