//! The reconcile pass of a single TracePipeline.

use std::sync::Arc;
use std::time::{Duration, Instant};

use k8s_openapi::apimachinery::pkg::apis::meta::v1::OwnerReference;
use kube::Resource;

use crate::config::Config;
use crate::error::{ReconcileError, SpecError};
use crate::k8s::store::ClusterStore;
use crate::k8s::sync::{self, SyncOutcome};
use crate::k8s::{desired, secrets, METRIC_RECONCILE_DURATION, METRIC_RECONCILE_TOTAL};
use telemetry_core::crd::TracePipeline;

/// The outcome of a successful reconcile pass.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct ReconcileOutcome {
    /// Reconcile this pipeline again after a delay.
    ///
    /// Successful passes never request a retry. The next pass is triggered by a change to the
    /// pipeline, one of its children or one of its referenced secrets.
    pub requeue: bool,
    /// The writes performed by this pass, `None` if the pipeline no longer exists.
    pub report: Option<SyncReport>,
}

/// Per-object outcomes of a reconcile pass.
#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct SyncReport {
    pub created: usize,
    pub updated: usize,
    pub unchanged: usize,
}

impl SyncReport {
    fn record(&mut self, outcome: SyncOutcome) {
        match outcome {
            SyncOutcome::Created => self.created += 1,
            SyncOutcome::Updated => self.updated += 1,
            SyncOutcome::Unchanged => self.unchanged += 1,
        }
    }
}

/// The retry decision for a failed reconcile pass.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum RetryPolicy {
    /// Retry the pass after the given delay.
    Requeue(Duration),
    /// Do not retry until a new trigger arrives.
    Terminal,
}

/// Reconciler of TracePipelines into trace collectors.
pub struct Reconciler<S: ClusterStore> {
    store: S,
    config: Arc<Config>,
}

impl<S: ClusterStore> Clone for Reconciler<S> {
    fn clone(&self) -> Self {
        Self { store: self.store.clone(), config: self.config.clone() }
    }
}

impl<S: ClusterStore> Reconciler<S> {
    /// Create a new instance.
    pub fn new(store: S, config: Arc<Config>) -> Self {
        Self { store, config }
    }

    /// The store used by this reconciler.
    pub fn store(&self) -> &S {
        &self.store
    }

    /// Reconcile the pipeline of the given name, recording the result in metrics.
    #[tracing::instrument(level = "debug", skip(self))]
    pub async fn reconcile(&self, name: &str) -> Result<ReconcileOutcome, ReconcileError> {
        let start = Instant::now();
        let res = self.reconcile_pipeline(name).await;
        metrics::histogram!(METRIC_RECONCILE_DURATION, start.elapsed().as_secs_f64());
        match &res {
            Ok(outcome) => {
                metrics::increment_counter!(METRIC_RECONCILE_TOTAL, "result" => "success");
                if let Some(report) = &outcome.report {
                    tracing::debug!(
                        created = report.created,
                        updated = report.updated,
                        unchanged = report.unchanged,
                        "finished reconciling pipeline {}",
                        name
                    );
                }
            }
            Err(err) => {
                metrics::increment_counter!(METRIC_RECONCILE_TOTAL, "result" => err.label());
                if err.is_transient() {
                    tracing::warn!(error = ?err, "transient error reconciling pipeline {}", name);
                } else {
                    tracing::error!(error = ?err, "error reconciling pipeline {}", name);
                }
            }
        }
        res
    }

    async fn reconcile_pipeline(&self, name: &str) -> Result<ReconcileOutcome, ReconcileError> {
        let pipeline = self
            .store
            .get_pipeline(name)
            .await
            .map_err(|source| ReconcileError::Fetch { what: format!("TracePipeline {}", name), source })?;
        let pipeline = match pipeline {
            Some(pipeline) => pipeline,
            None => {
                tracing::debug!("pipeline {} not found, nothing to reconcile", name);
                return Ok(ReconcileOutcome { requeue: false, report: None });
            }
        };
        let owner = owner_reference(&pipeline)?;

        let secret_data = secrets::fetch_secret_data(&self.store, &pipeline.spec.output.otlp).await?;
        let desired = desired::build(&self.config, &pipeline, &secret_data)?;

        // Children are synced in order, and the first error aborts the pass. Objects synced up to
        // that point stay in place, the next pass picks up where this one stopped.
        let mut report = SyncReport::default();
        for child in desired.into_children() {
            let outcome = sync::ensure(&self.store, &owner, child).await?;
            report.record(outcome);
        }
        Ok(ReconcileOutcome { requeue: false, report: Some(report) })
    }

    /// Decide how to retry after the given error.
    pub fn retry_policy(&self, err: &ReconcileError) -> RetryPolicy {
        if err.is_transient() {
            RetryPolicy::Requeue(self.config.requeue_after())
        } else {
            RetryPolicy::Terminal
        }
    }

    /// Decide if the pipeline should be reconciled again after the given result.
    pub fn should_requeue(&self, res: &Result<ReconcileOutcome, ReconcileError>) -> Option<Duration> {
        match res {
            Ok(outcome) if outcome.requeue => Some(self.config.requeue_after()),
            Ok(_) => None,
            Err(err) => match self.retry_policy(err) {
                RetryPolicy::Requeue(delay) => Some(delay),
                RetryPolicy::Terminal => None,
            },
        }
    }
}

/// Build the controller owner reference pointing at the given pipeline.
///
/// A pipeline without a UID can not own anything, which is reported as missing metadata.
pub fn owner_reference(pipeline: &TracePipeline) -> Result<OwnerReference, SpecError> {
    let meta = pipeline.meta();
    let uid = meta.uid.clone().ok_or(SpecError::MissingMetadata("metadata.uid"))?;
    let name = meta.name.clone().ok_or(SpecError::MissingMetadata("metadata.name"))?;
    Ok(OwnerReference {
        api_version: TracePipeline::api_version(&()).to_string(),
        kind: TracePipeline::kind(&()).to_string(),
        name,
        uid,
        controller: Some(true),
        block_owner_deletion: Some(true),
    })
}
