use std::sync::Arc;

use k8s_openapi::api::core::v1::Secret;
use k8s_openapi::apimachinery::pkg::apis::meta::v1::ObjectMeta;
use kube::Resource;
use kube_runtime::watcher::Event;

use crate::k8s::deps;
use crate::error::StoreResult;
use crate::k8s::store::ClusterStore;
use crate::k8s::{Controller, EventResult, METRIC_WATCHER_ERRORS, WATCHER_ERROR_DELAY};
use telemetry_core::crd::{RequiredMetadata, TracePipeline};

//////////////////////////////////////////////////////////////////////////////
// Pipeline Events ///////////////////////////////////////////////////////////
impl Controller {
    /// Handle `TracePipeline` watcher event.
    #[tracing::instrument(level = "debug", skip(self, res))]
    pub(super) async fn handle_pipeline_event(&mut self, res: EventResult<TracePipeline>) {
        let event = match res {
            Ok(event) => event,
            Err(err) => {
                tracing::error!(error = ?err, "error from TracePipeline k8s watcher");
                metrics::increment_counter!(METRIC_WATCHER_ERRORS, "kind" => "TracePipeline");
                let _ = tokio::time::sleep(WATCHER_ERROR_DELAY).await;
                return;
            }
        };
        match event {
            // Deleted pipelines are reconciled too. The pass finds the pipeline gone and returns,
            // child cleanup is left to the K8s garbage collector.
            Event::Applied(pipeline) | Event::Deleted(pipeline) => self.pipeline_changed(&pipeline),
            Event::Restarted(pipelines) => {
                tracing::debug!("TracePipeline watcher restarted");
                for pipeline in pipelines.iter() {
                    self.pipeline_changed(pipeline);
                }
            }
        }
    }

    fn pipeline_changed(&mut self, pipeline: &TracePipeline) {
        let name = pipeline.name();
        if name.is_empty() {
            return; // Not actually possible as K8s requires name.
        }
        self.enqueue(Arc::new(name.to_string()));
    }
}

//////////////////////////////////////////////////////////////////////////////
// Child Events //////////////////////////////////////////////////////////////
impl Controller {
    /// Handle a watcher event of a child object, triggering a pass of its owning pipeline.
    #[tracing::instrument(level = "debug", skip(self, res))]
    pub(super) async fn handle_child_event<K: Resource>(&mut self, kind: &'static str, res: EventResult<K>) {
        let event = match res {
            Ok(event) => event,
            Err(err) => {
                tracing::error!(error = ?err, "error from {} k8s watcher", kind);
                metrics::increment_counter!(METRIC_WATCHER_ERRORS, "kind" => kind);
                let _ = tokio::time::sleep(WATCHER_ERROR_DELAY).await;
                return;
            }
        };
        let objs = match event {
            Event::Applied(obj) | Event::Deleted(obj) => vec![obj],
            Event::Restarted(objs) => objs,
        };
        for obj in objs.iter() {
            for owner in owner_names(obj.meta()) {
                self.enqueue(Arc::new(owner));
            }
        }
    }
}

/// The names of the TracePipelines owning the object with the given metadata.
pub(super) fn owner_names(meta: &ObjectMeta) -> Vec<String> {
    let api_version = TracePipeline::api_version(&());
    let kind = TracePipeline::kind(&());
    meta.owner_references
        .iter()
        .flatten()
        .filter(|owner| owner.api_version == api_version && owner.kind == kind)
        .map(|owner| owner.name.clone())
        .collect()
}

//////////////////////////////////////////////////////////////////////////////
// Secret Events /////////////////////////////////////////////////////////////
impl Controller {
    /// Handle `Secret` watcher event, triggering a pass of every pipeline referencing the secret.
    #[tracing::instrument(level = "debug", skip(self, res))]
    pub(super) async fn handle_secret_event(&mut self, res: EventResult<Secret>) {
        let event = match res {
            Ok(event) => event,
            Err(err) => {
                tracing::error!(error = ?err, "error from Secret k8s watcher");
                metrics::increment_counter!(METRIC_WATCHER_ERRORS, "kind" => "Secret");
                let _ = tokio::time::sleep(WATCHER_ERROR_DELAY).await;
                return;
            }
        };
        let secrets = match event {
            Event::Applied(secret) | Event::Deleted(secret) => vec![secret],
            Event::Restarted(secrets) => secrets,
        };
        let secrets: Vec<SecretKey> = secrets
            .iter()
            .filter_map(|secret| {
                let meta = secret.meta();
                Some((meta.namespace.clone()?, meta.name.clone()?))
            })
            .collect();
        self.secrets_changed(secrets).await;
    }

    /// Trigger a pass of every pipeline referencing one of the given secrets.
    ///
    /// If the pipelines can not be listed, the mapping is retried after the requeue delay, so a
    /// secret change is never dropped.
    pub(super) async fn secrets_changed(&mut self, secrets: Vec<SecretKey>) {
        if secrets.is_empty() {
            return;
        }
        match pipelines_referencing(self.reconciler.store(), &secrets).await {
            Ok(names) => {
                for name in names {
                    self.enqueue(Arc::new(name));
                }
            }
            Err(err) => {
                let delay = self.config.requeue_after();
                tracing::error!(error = ?err, ?delay, "error listing pipelines for Secret event, retrying");
                self.spawn_secrets_retry(secrets, delay);
            }
        }
    }
}

/// The namespace & name of a Secret.
pub(super) type SecretKey = (String, String);

/// The names of all pipelines referencing one of the given secrets.
///
/// Dependencies are recomputed from the current pipelines on every call.
pub(super) async fn pipelines_referencing<S: ClusterStore>(store: &S, secrets: &[SecretKey]) -> StoreResult<Vec<String>> {
    let pipelines = store.list_pipelines().await?;
    let mut names = Vec::new();
    for (namespace, name) in secrets {
        for pipeline in deps::affected_pipelines(namespace, name, &pipelines) {
            tracing::debug!("secret {}/{} changed, reconciling pipeline {}", namespace, name, pipeline.name);
            if !names.contains(&pipeline.name) {
                names.push(pipeline.name);
            }
        }
    }
    Ok(names)
}
