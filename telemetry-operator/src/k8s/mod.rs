//! Kubernetes controller.
//!
//! This controller observes TracePipelines, the objects derived from them and all Secrets, and
//! turns every observed change into a reconcile pass of the affected pipelines.
//!
//! Watch events only carry names. Every pass reads the current state of the pipeline and its
//! children from the K8s API, so no watched data is cached here. At most one pass runs per
//! pipeline at any time, passes of different pipelines run concurrently.

mod checksum;
mod collector_config;
mod data;
#[cfg(test)]
mod data_test;
mod deps;
#[cfg(test)]
mod deps_test;
mod desired;
#[cfg(test)]
mod fixtures;
mod queue;
mod reconcile;
mod secrets;
#[cfg(test)]
mod secrets_test;
mod store;
pub(crate) mod sync;
#[cfg(test)]
mod sync_test;

use std::sync::Arc;
use std::time::Duration;

use anyhow::Result;
use futures::prelude::*;
use k8s_openapi::api::apps::v1::Deployment;
use k8s_openapi::api::core::v1::{ConfigMap, Secret, Service};
use kube::api::{Api, ListParams};
use kube::client::Client;
use kube_runtime::watcher::{watcher, Error as WatcherError, Event};
use tokio::sync::{broadcast, mpsc};
use tokio::task::JoinHandle;
use tokio_stream::wrappers::{BroadcastStream, ReceiverStream};

use crate::config::Config;
use crate::k8s::data::SecretKey;
use crate::k8s::queue::WorkQueue;
use crate::k8s::reconcile::Reconciler;
use crate::k8s::store::KubeStore;
use telemetry_core::crd::{ServiceMonitor, TracePipeline};
use telemetry_core::{LABEL_MANAGED_BY, OPERATOR_NAME};

pub(crate) const METRIC_RECONCILE_TOTAL: &str = "telemetry_operator_reconcile_total";
pub(crate) const METRIC_RECONCILE_DURATION: &str = "telemetry_operator_reconcile_duration_seconds";
pub(crate) const METRIC_CHILD_WRITES: &str = "telemetry_operator_child_writes_total";
pub(crate) const METRIC_WATCHER_ERRORS: &str = "telemetry_operator_watcher_errors";

/// The delay applied after a watcher error before the watcher is polled again.
const WATCHER_ERROR_DELAY: Duration = Duration::from_secs(10);

type EventResult<T> = std::result::Result<Event<T>, WatcherError>;

/// The result of a reconcile pass, along with the delay before it is to be retried.
type Completion = (Arc<String>, Option<Duration>);

/// Register all metrics emitted by the controller.
pub fn register_metrics() {
    metrics::register_counter!(METRIC_RECONCILE_TOTAL, metrics::Unit::Count, "reconcile passes by result");
    metrics::register_histogram!(METRIC_RECONCILE_DURATION, metrics::Unit::Seconds, "duration of reconcile passes");
    metrics::register_counter!(METRIC_CHILD_WRITES, metrics::Unit::Count, "writes to child objects by kind & operation");
    metrics::register_counter!(METRIC_WATCHER_ERRORS, metrics::Unit::Count, "k8s watcher errors");
}

/// Kubernetes controller for reconciling TracePipelines.
pub struct Controller {
    /// K8s client.
    client: Client,
    /// Runtime config.
    config: Arc<Config>,
    /// A channel used for triggering graceful shutdown.
    shutdown_rx: BroadcastStream<()>,

    /// The reconciler executing the reconcile passes.
    reconciler: Reconciler<KubeStore>,
    /// Pipelines with running passes.
    queue: WorkQueue,

    /// A channel of pipelines to be reconciled.
    tasks_tx: mpsc::Sender<Arc<String>>,
    /// A channel of pipelines to be reconciled.
    tasks_rx: ReceiverStream<Arc<String>>,
    /// A channel of completed reconcile passes.
    completions_tx: mpsc::Sender<Completion>,
    /// A channel of completed reconcile passes.
    completions_rx: ReceiverStream<Completion>,
    /// A channel of changed secrets to be mapped onto pipelines again.
    secrets_tx: mpsc::Sender<Vec<SecretKey>>,
    /// A channel of changed secrets to be mapped onto pipelines again.
    secrets_rx: ReceiverStream<Vec<SecretKey>>,
}

impl Controller {
    /// Create a new instance.
    pub fn new(client: Client, config: Arc<Config>, shutdown_tx: broadcast::Sender<()>) -> Self {
        let reconciler = Reconciler::new(KubeStore::new(client.clone()), config.clone());
        let (tasks_tx, tasks_rx) = mpsc::channel(1000);
        let (completions_tx, completions_rx) = mpsc::channel(1000);
        let (secrets_tx, secrets_rx) = mpsc::channel(1000);
        Self {
            client,
            config,
            shutdown_rx: BroadcastStream::new(shutdown_tx.subscribe()),
            reconciler,
            queue: WorkQueue::default(),
            tasks_tx,
            tasks_rx: ReceiverStream::new(tasks_rx),
            completions_tx,
            completions_rx: ReceiverStream::new(completions_rx),
            secrets_tx,
            secrets_rx: ReceiverStream::new(secrets_rx),
        }
    }

    pub fn spawn(self) -> JoinHandle<Result<()>> {
        tokio::spawn(self.run())
    }

    async fn run(mut self) -> Result<()> {
        // Build watcher streams.
        let params_labels = self.list_params_managed_by_labels();
        let params_spec = ListParams::default();
        let pipelines: Api<TracePipeline> = Api::all(self.client.clone());
        let pipelines_watcher = watcher(pipelines, params_spec.clone());
        let all_secrets: Api<Secret> = Api::all(self.client.clone());
        let all_secrets_watcher = watcher(all_secrets, params_spec);
        let secrets: Api<Secret> = Api::namespaced(self.client.clone(), &self.config.namespace);
        let secrets_watcher = watcher(secrets, params_labels.clone());
        let config_maps: Api<ConfigMap> = Api::namespaced(self.client.clone(), &self.config.namespace);
        let config_maps_watcher = watcher(config_maps, params_labels.clone());
        let deployments: Api<Deployment> = Api::namespaced(self.client.clone(), &self.config.namespace);
        let deployments_watcher = watcher(deployments, params_labels.clone());
        let services: Api<Service> = Api::namespaced(self.client.clone(), &self.config.namespace);
        let services_watcher = watcher(services, params_labels.clone());
        let monitors: Api<ServiceMonitor> = Api::namespaced(self.client.clone(), &self.config.namespace);
        let monitors_watcher = watcher(monitors, params_labels);
        tokio::pin!(
            pipelines_watcher,
            all_secrets_watcher,
            secrets_watcher,
            config_maps_watcher,
            deployments_watcher,
            services_watcher,
            monitors_watcher
        );
        // The ServiceMonitor CRD is only guaranteed to exist when monitoring is enabled.
        let watch_monitors = self.config.create_service_monitor;

        tracing::info!("k8s controller initialized");
        loop {
            tokio::select! {
                Some(k8s_event_res) = pipelines_watcher.next() => self.handle_pipeline_event(k8s_event_res).await,
                Some(k8s_event_res) = all_secrets_watcher.next() => self.handle_secret_event(k8s_event_res).await,
                Some(k8s_event_res) = secrets_watcher.next() => self.handle_child_event("Secret", k8s_event_res).await,
                Some(k8s_event_res) = config_maps_watcher.next() => self.handle_child_event("ConfigMap", k8s_event_res).await,
                Some(k8s_event_res) = deployments_watcher.next() => self.handle_child_event("Deployment", k8s_event_res).await,
                Some(k8s_event_res) = services_watcher.next() => self.handle_child_event("Service", k8s_event_res).await,
                Some(k8s_event_res) = monitors_watcher.next(), if watch_monitors => self.handle_child_event("ServiceMonitor", k8s_event_res).await,
                Some(name) = self.tasks_rx.next() => self.enqueue(name),
                Some((name, requeue)) = self.completions_rx.next() => self.handle_completion(name, requeue),
                Some(secrets) = self.secrets_rx.next() => self.secrets_changed(secrets).await,
                _ = self.shutdown_rx.next() => break,
            }
        }

        tracing::debug!("k8s controller shutdown");
        Ok(())
    }

    /// Trigger a reconcile pass of the given pipeline.
    fn enqueue(&mut self, name: Arc<String>) {
        if self.queue.enqueue(name.clone()) {
            self.dispatch(name);
        } else {
            tracing::debug!("reconcile pass of {} already running, follow-up pass scheduled", name);
        }
    }

    /// Spawn a reconcile pass of the given pipeline, reporting its completion to the controller.
    fn dispatch(&self, name: Arc<String>) {
        let (reconciler, tx) = (self.reconciler.clone(), self.completions_tx.clone());
        tokio::spawn(async move {
            let res = reconciler.reconcile(name.as_str()).await;
            let requeue = reconciler.should_requeue(&res);
            let _res = tx.send((name, requeue)).await;
        });
    }

    fn handle_completion(&mut self, name: Arc<String>, requeue: Option<Duration>) {
        if self.queue.complete(&name) {
            self.dispatch(name);
            return;
        }
        if let Some(delay) = requeue {
            tracing::debug!(?delay, "requeueing pipeline {}", name);
            self.spawn_scheduler_task(name, delay);
        }
    }

    /// Spawn a task which emits a new reconcile trigger after the given delay.
    ///
    /// This indirection is used so that we do not block the controller from making progress and
    /// dead-locking when we hit the task queue cap.
    fn spawn_scheduler_task(&self, name: Arc<String>, delay: Duration) {
        let tx = self.tasks_tx.clone();
        tokio::spawn(async move {
            tokio::time::sleep(delay).await;
            let _res = tx.send(name).await;
        });
    }

    /// Spawn a task which emits the given changed secrets again after the given delay.
    fn spawn_secrets_retry(&self, secrets: Vec<SecretKey>, delay: Duration) {
        let tx = self.secrets_tx.clone();
        tokio::spawn(async move {
            tokio::time::sleep(delay).await;
            let _res = tx.send(secrets).await;
        });
    }

    /// Create a list params object which selects only objects managed by this operator.
    fn list_params_managed_by_labels(&self) -> ListParams {
        ListParams {
            label_selector: Some(format!("{}={}", LABEL_MANAGED_BY, OPERATOR_NAME)),
            ..Default::default()
        }
    }
}
