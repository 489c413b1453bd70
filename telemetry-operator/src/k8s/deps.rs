//! Dependencies between pipelines and the secrets they reference.
//!
//! Dependency edges are never stored. They are recomputed from the current list of pipelines on
//! every secret event, so a pipeline edited to reference a different secret is picked up as soon
//! as it is listed again.

use kube_runtime::reflector::ObjectRef;

use telemetry_core::crd::TracePipeline;

/// Check if the endpoint or basic auth credentials of the given pipeline reference the given secret.
pub fn references_secret(pipeline: &TracePipeline, namespace: &str, name: &str) -> bool {
    pipeline.references_secret(namespace, name)
}

/// Select all pipelines affected by a change to the given secret.
pub fn affected_pipelines(namespace: &str, name: &str, pipelines: &[TracePipeline]) -> Vec<ObjectRef<TracePipeline>> {
    pipelines
        .iter()
        .filter(|pipeline| references_secret(pipeline, namespace, name))
        .map(ObjectRef::from_obj)
        .collect()
}
