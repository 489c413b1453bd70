//! Telemetry CRDs.
//!
//! References:
//! - https://kubernetes.io/docs/tasks/extend-kubernetes/custom-resources/custom-resource-definitions/
//! - https://kubernetes.io/docs/tasks/extend-kubernetes/custom-resources/custom-resource-definitions/#additional-printer-columns
//! - https://github.com/prometheus-operator/prometheus-operator/blob/main/Documentation/api.md#servicemonitor

mod service_monitor;
mod tracepipeline;

use kube::Resource;

pub use service_monitor::{ServiceMonitor, ServiceMonitorEndpoint, ServiceMonitorSelector, ServiceMonitorSpec};
pub use tracepipeline::{
    AuthenticationOptions, BasicAuthOptions, OtlpOutput, OtlpProtocol, ResolvedValue, SecretKeyRef, TracePipeline, TracePipelineOutput,
    TracePipelineSpec, TracePipelineStatus, ValueFromSource, ValueType,
};

/// A convenience trait built around the fact that all implementors
/// must have the following attributes.
pub trait RequiredMetadata {
    /// The name of this object.
    fn name(&self) -> &str;
}

impl RequiredMetadata for TracePipeline {
    fn name(&self) -> &str {
        self.meta().name.as_deref().unwrap_or_default()
    }
}

impl RequiredMetadata for ServiceMonitor {
    fn name(&self) -> &str {
        self.meta().name.as_deref().unwrap_or_default()
    }
}
