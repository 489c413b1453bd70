//! Child object synchronization.
//!
//! Every object derived from a TracePipeline is one of a closed set of kinds. All kinds share the
//! same create-or-update routine, `ensure`, which fetches the current object by name, creates it
//! when absent, and updates it in place only when its mutable fields drifted from the desired
//! state. A pass over unchanged objects therefore issues no writes at all.
//!
//! Objects are never deleted here. Cleanup happens through the owner reference set on every
//! created object, which lets the K8s garbage collector remove children with their pipeline.

use std::collections::BTreeMap;
use std::fmt;

use k8s_openapi::api::apps::v1::Deployment;
use k8s_openapi::api::core::v1::{ConfigMap, Secret, Service};
use k8s_openapi::apimachinery::pkg::apis::meta::v1::{ObjectMeta, OwnerReference};
use kube::Resource;
use serde::Serialize;
use serde_json::Value;

use crate::error::{ReconcileError, StoreError};
use crate::k8s::store::ClusterStore;
use crate::k8s::METRIC_CHILD_WRITES;
use telemetry_core::crd::ServiceMonitor;

/// The kinds of objects managed on behalf of a TracePipeline.
#[derive(Clone, Copy, Debug, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub enum ChildKind {
    Secret,
    ConfigMap,
    Deployment,
    Service,
    ServiceMonitor,
}

impl ChildKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            ChildKind::Secret => "Secret",
            ChildKind::ConfigMap => "ConfigMap",
            ChildKind::Deployment => "Deployment",
            ChildKind::Service => "Service",
            ChildKind::ServiceMonitor => "ServiceMonitor",
        }
    }
}

impl fmt::Display for ChildKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// An object managed on behalf of a TracePipeline.
#[derive(Clone, Debug, PartialEq)]
#[allow(clippy::large_enum_variant)]
pub enum ChildResource {
    Secret(Secret),
    ConfigMap(ConfigMap),
    Deployment(Deployment),
    Service(Service),
    ServiceMonitor(ServiceMonitor),
}

/// The result of ensuring a single child object.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum SyncOutcome {
    /// The object did not exist and was created.
    Created,
    /// The object existed but drifted, and was updated.
    Updated,
    /// The object already matched the desired state.
    Unchanged,
}

impl ChildResource {
    /// The kind of this object.
    pub fn kind(&self) -> ChildKind {
        match self {
            ChildResource::Secret(_) => ChildKind::Secret,
            ChildResource::ConfigMap(_) => ChildKind::ConfigMap,
            ChildResource::Deployment(_) => ChildKind::Deployment,
            ChildResource::Service(_) => ChildKind::Service,
            ChildResource::ServiceMonitor(_) => ChildKind::ServiceMonitor,
        }
    }

    pub fn metadata(&self) -> &ObjectMeta {
        match self {
            ChildResource::Secret(obj) => obj.meta(),
            ChildResource::ConfigMap(obj) => obj.meta(),
            ChildResource::Deployment(obj) => obj.meta(),
            ChildResource::Service(obj) => obj.meta(),
            ChildResource::ServiceMonitor(obj) => obj.meta(),
        }
    }

    pub fn metadata_mut(&mut self) -> &mut ObjectMeta {
        match self {
            ChildResource::Secret(obj) => obj.meta_mut(),
            ChildResource::ConfigMap(obj) => obj.meta_mut(),
            ChildResource::Deployment(obj) => obj.meta_mut(),
            ChildResource::Service(obj) => obj.meta_mut(),
            ChildResource::ServiceMonitor(obj) => obj.meta_mut(),
        }
    }

    pub fn name(&self) -> &str {
        self.metadata().name.as_deref().unwrap_or_default()
    }

    pub fn namespace(&self) -> &str {
        self.metadata().namespace.as_deref().unwrap_or_default()
    }

    /// Check if the given current object already carries all desired state of `self`.
    ///
    /// Secret & ConfigMap data must match exactly, as removed keys are meaningful. For spec
    /// objects only the fields set on the desired object are compared, as the API server
    /// populates defaults on everything left unset. Deployment fields which are only set when
    /// configured are compared exactly, so unsetting them is carried over.
    pub fn is_satisfied_by(&self, current: &ChildResource) -> bool {
        if !metadata_satisfied(self.metadata(), current.metadata()) {
            return false;
        }
        match (self, current) {
            (ChildResource::Secret(desired), ChildResource::Secret(current)) => data_eq(&desired.data, &current.data),
            (ChildResource::ConfigMap(desired), ChildResource::ConfigMap(current)) => {
                data_eq(&desired.data, &current.data) && data_eq(&desired.binary_data, &current.binary_data)
            }
            (ChildResource::Deployment(desired), ChildResource::Deployment(current)) => {
                is_derivative_of(&desired.spec, &current.spec) && optional_pod_fields_eq(desired, current)
            }
            (ChildResource::Service(desired), ChildResource::Service(current)) => is_derivative_of(&desired.spec, &current.spec),
            (ChildResource::ServiceMonitor(desired), ChildResource::ServiceMonitor(current)) => desired.spec == current.spec,
            _ => false,
        }
    }

    /// Apply the desired state of `self` onto the given current object.
    ///
    /// The identity of the current object is preserved: its resource version, UID and all other
    /// server populated metadata stay as they are, as do server populated spec fields of
    /// Services such as the cluster IP.
    pub fn apply_to(self, current: ChildResource) -> ChildResource {
        let desired_meta = self.metadata().clone();
        let mut merged = match (self, current) {
            (ChildResource::Secret(desired), ChildResource::Secret(mut current)) => {
                current.data = desired.data;
                current.string_data = None;
                ChildResource::Secret(current)
            }
            (ChildResource::ConfigMap(desired), ChildResource::ConfigMap(mut current)) => {
                current.data = desired.data;
                current.binary_data = desired.binary_data;
                ChildResource::ConfigMap(current)
            }
            (ChildResource::Deployment(desired), ChildResource::Deployment(mut current)) => {
                current.spec = desired.spec;
                ChildResource::Deployment(current)
            }
            (ChildResource::Service(desired), ChildResource::Service(mut current)) => {
                let spec = current.spec.get_or_insert_with(Default::default);
                if let Some(desired_spec) = desired.spec {
                    spec.ports = desired_spec.ports;
                    spec.selector = desired_spec.selector;
                    spec.type_ = desired_spec.type_;
                }
                ChildResource::Service(current)
            }
            (ChildResource::ServiceMonitor(desired), ChildResource::ServiceMonitor(mut current)) => {
                current.spec = desired.spec;
                ChildResource::ServiceMonitor(current)
            }
            // Not reachable through `ensure`, as objects are fetched by the kind of the desired object.
            (mut desired, current) => {
                desired.metadata_mut().resource_version = current.metadata().resource_version.clone();
                return desired;
            }
        };
        merge_metadata(merged.metadata_mut(), desired_meta);
        merged
    }
}

/// Ensure the given desired object exists in the cluster, owned by the given owner.
#[tracing::instrument(level = "debug", skip(store, owner, desired), fields(kind = %desired.kind(), name = desired.name()))]
pub async fn ensure<S: ClusterStore>(store: &S, owner: &OwnerReference, mut desired: ChildResource) -> Result<SyncOutcome, ReconcileError> {
    set_owner_reference(desired.metadata_mut(), owner);
    let (kind, name) = (desired.kind(), desired.name().to_string());

    let current = store
        .get_child(kind, desired.namespace(), &name)
        .await
        .map_err(|source| ReconcileError::Fetch { what: format!("{} {}", kind, name), source })?;
    let current = match current {
        Some(current) => current,
        None => {
            tracing::info!(%kind, %name, "creating child object");
            store
                .create_child(&desired)
                .await
                .map_err(|source| ReconcileError::Create { kind, name: name.clone(), source })?;
            metrics::increment_counter!(METRIC_CHILD_WRITES, "kind" => kind.as_str(), "op" => "create");
            return Ok(SyncOutcome::Created);
        }
    };

    if desired.is_satisfied_by(&current) {
        tracing::debug!(%kind, %name, "child object is up-to-date");
        return Ok(SyncOutcome::Unchanged);
    }

    tracing::info!(%kind, %name, "updating child object");
    let updated = desired.apply_to(current);
    store.update_child(&updated).await.map_err(|source| match source {
        StoreError::Conflict => ReconcileError::Conflict { kind, name: name.clone() },
        source => ReconcileError::Update { kind, name: name.clone(), source },
    })?;
    metrics::increment_counter!(METRIC_CHILD_WRITES, "kind" => kind.as_str(), "op" => "update");
    Ok(SyncOutcome::Updated)
}

/// Set the given controller owner reference on the given object metadata, replacing any other
/// controller reference.
pub fn set_owner_reference(meta: &mut ObjectMeta, owner: &OwnerReference) {
    let refs = meta.owner_references.get_or_insert_with(Default::default);
    refs.retain(|existing| existing.uid != owner.uid && !existing.controller.unwrap_or(false));
    refs.push(owner.clone());
}

/// Check that the current metadata carries all labels, annotations and owner references of the
/// desired metadata.
fn metadata_satisfied(desired: &ObjectMeta, current: &ObjectMeta) -> bool {
    map_contains(&desired.labels, &current.labels)
        && map_contains(&desired.annotations, &current.annotations)
        && desired.owner_references.iter().flatten().all(|desired_ref| {
            current
                .owner_references
                .iter()
                .flatten()
                .any(|current_ref| current_ref.uid == desired_ref.uid && current_ref.controller == desired_ref.controller)
        })
}

fn map_contains(desired: &Option<BTreeMap<String, String>>, current: &Option<BTreeMap<String, String>>) -> bool {
    let desired = match desired {
        Some(desired) => desired,
        None => return true,
    };
    desired
        .iter()
        .all(|(key, val)| current.as_ref().and_then(|current| current.get(key)) == Some(val))
}

/// Compare the pod template fields of two Deployments which the collector only sets when
/// configured. The API server never defaults these, so an unset desired field must be unset on
/// the current object too.
fn optional_pod_fields_eq(desired: &Deployment, current: &Deployment) -> bool {
    let priority_class = |deployment: &Deployment| {
        deployment
            .spec
            .as_ref()
            .and_then(|spec| spec.template.spec.as_ref())
            .and_then(|pod| pod.priority_class_name.clone())
    };
    priority_class(desired) == priority_class(current)
}

/// Compare two data maps, treating an absent map as empty.
fn data_eq<V: PartialEq>(desired: &Option<BTreeMap<String, V>>, current: &Option<BTreeMap<String, V>>) -> bool {
    match (desired, current) {
        (Some(desired), Some(current)) => desired == current,
        (Some(data), None) | (None, Some(data)) => data.is_empty(),
        (None, None) => true,
    }
}

/// Merge the labels, annotations and owner references of the desired metadata into the current.
fn merge_metadata(current: &mut ObjectMeta, desired: ObjectMeta) {
    if let Some(labels) = desired.labels {
        current.labels.get_or_insert_with(Default::default).extend(labels);
    }
    if let Some(annotations) = desired.annotations {
        current.annotations.get_or_insert_with(Default::default).extend(annotations);
    }
    for owner in desired.owner_references.into_iter().flatten() {
        set_owner_reference(current, &owner);
    }
}

/// Check if `desired` is a derivative of `current`, comparing the JSON representation of both.
///
/// Unset (null) desired fields match anything. Objects match if every field of the desired
/// object matches, and arrays match element-wise when they are of the same length.
pub fn is_derivative_of<T: Serialize>(desired: &T, current: &T) -> bool {
    match (serde_json::to_value(desired), serde_json::to_value(current)) {
        (Ok(desired), Ok(current)) => value_is_derivative_of(&desired, &current),
        _ => false,
    }
}

fn value_is_derivative_of(desired: &Value, current: &Value) -> bool {
    match (desired, current) {
        (Value::Null, _) => true,
        (Value::Object(desired), Value::Object(current)) => desired
            .iter()
            .all(|(key, val)| value_is_derivative_of(val, current.get(key).unwrap_or(&Value::Null))),
        (Value::Object(desired), Value::Null) => desired.values().all(|val| value_is_derivative_of(val, &Value::Null)),
        (Value::Array(desired), Value::Array(current)) => {
            desired.len() == current.len() && desired.iter().zip(current).all(|(desired, current)| value_is_derivative_of(desired, current))
        }
        (Value::Array(desired), Value::Null) => desired.is_empty(),
        (desired, current) => desired == current,
    }
}
