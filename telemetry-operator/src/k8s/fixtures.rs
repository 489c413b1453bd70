use std::collections::BTreeMap;
use std::sync::{Arc, Mutex, MutexGuard};

use async_trait::async_trait;
use k8s_openapi::api::core::v1::Secret;
use k8s_openapi::apimachinery::pkg::apis::meta::v1::ObjectMeta;
use k8s_openapi::ByteString;
use kube::Resource;

use crate::error::{StoreError, StoreResult};
use crate::k8s::store::ClusterStore;
use crate::k8s::sync::{ChildKind, ChildResource};
use telemetry_core::crd::{OtlpOutput, OtlpProtocol, TracePipeline, TracePipelineOutput, TracePipelineSpec, ValueType};

/// A write performed against a `MemoryStore`.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct WriteOp {
    pub op: &'static str,
    pub kind: ChildKind,
    pub name: String,
}

/// An in-memory `ClusterStore` recording all writes.
#[derive(Clone, Default)]
pub struct MemoryStore {
    inner: Arc<Mutex<Inner>>,
}

#[derive(Default)]
struct Inner {
    pipelines: BTreeMap<String, TracePipeline>,
    secrets: BTreeMap<(String, String), Secret>,
    children: BTreeMap<(ChildKind, String, String), ChildResource>,
    writes: Vec<WriteOp>,
    next_version: u64,
    fail_create: Option<ChildKind>,
    conflict_on_update: Option<ChildKind>,
    fail_secret_reads: bool,
    fail_pipeline_lists: bool,
}

impl Inner {
    fn next_version(&mut self) -> String {
        self.next_version += 1;
        self.next_version.to_string()
    }
}

fn child_key(child: &ChildResource) -> (ChildKind, String, String) {
    (child.kind(), child.namespace().to_string(), child.name().to_string())
}

impl MemoryStore {
    fn lock(&self) -> MutexGuard<'_, Inner> {
        self.inner.lock().expect("memory store lock poisoned")
    }

    /// Insert or replace the given pipeline.
    pub fn put_pipeline(&self, pipeline: TracePipeline) {
        let name = pipeline.meta().name.clone().unwrap_or_default();
        self.lock().pipelines.insert(name, pipeline);
    }

    /// Insert or replace the given secret.
    pub fn put_secret(&self, secret: Secret) {
        let meta = secret.meta();
        let key = (meta.namespace.clone().unwrap_or_default(), meta.name.clone().unwrap_or_default());
        self.lock().secrets.insert(key, secret);
    }

    /// Insert or replace the given child object without recording a write, bumping its version.
    ///
    /// This simulates a modification by another actor.
    pub fn put_child(&self, mut child: ChildResource) {
        let mut inner = self.lock();
        child.metadata_mut().resource_version = Some(inner.next_version());
        inner.children.insert(child_key(&child), child);
    }

    /// Fetch a child object directly.
    pub fn child(&self, kind: ChildKind, namespace: &str, name: &str) -> Option<ChildResource> {
        self.lock()
            .children
            .get(&(kind, namespace.to_string(), name.to_string()))
            .cloned()
    }

    /// All stored child objects of the given kind.
    pub fn children_of_kind(&self, kind: ChildKind) -> Vec<ChildResource> {
        self.lock().children.values().filter(|child| child.kind() == kind).cloned().collect()
    }

    /// All stored child objects.
    pub fn children(&self) -> Vec<ChildResource> {
        self.lock().children.values().cloned().collect()
    }

    /// All writes recorded since the last call to `clear_writes`.
    pub fn writes(&self) -> Vec<WriteOp> {
        self.lock().writes.clone()
    }

    pub fn clear_writes(&self) {
        self.lock().writes.clear();
    }

    /// Fail all creations of objects of the given kind.
    pub fn fail_create_of(&self, kind: ChildKind) {
        self.lock().fail_create = Some(kind);
    }

    /// Report a version conflict on all updates of objects of the given kind.
    pub fn conflict_on_update_of(&self, kind: ChildKind) {
        self.lock().conflict_on_update = Some(kind);
    }

    /// Fail all reads of secrets.
    pub fn fail_secret_reads(&self) {
        self.lock().fail_secret_reads = true;
    }

    /// Fail or recover all listings of pipelines.
    pub fn fail_pipeline_lists(&self, fail: bool) {
        self.lock().fail_pipeline_lists = fail;
    }
}

#[async_trait]
impl ClusterStore for MemoryStore {
    async fn get_pipeline(&self, name: &str) -> StoreResult<Option<TracePipeline>> {
        Ok(self.lock().pipelines.get(name).cloned())
    }

    async fn list_pipelines(&self) -> StoreResult<Vec<TracePipeline>> {
        let inner = self.lock();
        if inner.fail_pipeline_lists {
            return Err(StoreError::Timeout);
        }
        Ok(inner.pipelines.values().cloned().collect())
    }

    async fn get_secret(&self, namespace: &str, name: &str) -> StoreResult<Option<Secret>> {
        let inner = self.lock();
        if inner.fail_secret_reads {
            return Err(StoreError::Timeout);
        }
        Ok(inner.secrets.get(&(namespace.to_string(), name.to_string())).cloned())
    }

    async fn get_child(&self, kind: ChildKind, namespace: &str, name: &str) -> StoreResult<Option<ChildResource>> {
        Ok(self.child(kind, namespace, name))
    }

    async fn create_child(&self, child: &ChildResource) -> StoreResult<()> {
        let mut inner = self.lock();
        if inner.fail_create == Some(child.kind()) {
            return Err(StoreError::Timeout);
        }
        let key = child_key(child);
        if inner.children.contains_key(&key) {
            return Err(StoreError::Conflict);
        }
        let mut child = child.clone();
        child.metadata_mut().resource_version = Some(inner.next_version());
        child.metadata_mut().uid = Some(format!("uid-{}-{}", key.0, key.2));
        inner.writes.push(WriteOp { op: "create", kind: key.0, name: key.2.clone() });
        inner.children.insert(key, child);
        Ok(())
    }

    async fn update_child(&self, child: &ChildResource) -> StoreResult<()> {
        let mut inner = self.lock();
        let key = child_key(child);
        let current_version = match inner.children.get(&key) {
            Some(current) => current.metadata().resource_version.clone(),
            None => return Err(StoreError::NotFound),
        };
        if inner.conflict_on_update == Some(child.kind()) || current_version != child.metadata().resource_version {
            return Err(StoreError::Conflict);
        }
        let mut child = child.clone();
        child.metadata_mut().resource_version = Some(inner.next_version());
        inner.writes.push(WriteOp { op: "update", kind: key.0, name: key.2.clone() });
        inner.children.insert(key, child);
        Ok(())
    }
}

/// Build a pipeline exporting to the given output.
pub fn pipeline(name: &str, otlp: OtlpOutput) -> TracePipeline {
    let mut pipeline = TracePipeline::new(name, TracePipelineSpec { output: TracePipelineOutput { otlp } });
    pipeline.metadata.uid = Some(format!("uid-{}", name));
    pipeline
}

/// Build an output with the given endpoint and no authentication.
pub fn otlp_output(endpoint: ValueType) -> OtlpOutput {
    OtlpOutput { endpoint, protocol: OtlpProtocol::Grpc, authentication: None }
}

/// Build a secret holding the given data.
pub fn secret(namespace: &str, name: &str, data: &[(&str, &str)]) -> Secret {
    Secret {
        metadata: ObjectMeta {
            name: Some(name.into()),
            namespace: Some(namespace.into()),
            ..Default::default()
        },
        data: Some(
            data.iter()
                .map(|(key, val)| (key.to_string(), ByteString(val.as_bytes().to_vec())))
                .collect(),
        ),
        ..Default::default()
    }
}
