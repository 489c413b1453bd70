pub mod crd;
pub mod error;

pub use error::SpecError;

/// The name used by the operator for field management and the `managed-by` label.
pub const OPERATOR_NAME: &str = "telemetry-operator";

/// The canonical K8s label naming the application an object belongs to.
pub const LABEL_APP_NAME: &str = "app.kubernetes.io/name";
/// The canonical K8s label naming the tool managing an object.
pub const LABEL_MANAGED_BY: &str = "app.kubernetes.io/managed-by";
