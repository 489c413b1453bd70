//! Access to cluster state.
//!
//! The reconciler only talks to the cluster through the `ClusterStore` trait, which lets the
//! whole reconcile pass run against an in-memory store in tests.

use std::fmt::Debug;
use std::time::Duration;

use async_trait::async_trait;
use k8s_openapi::api::apps::v1::Deployment;
use k8s_openapi::api::core::v1::{ConfigMap, Secret, Service};
use kube::api::{Api, ListParams, PostParams};
use kube::client::Client;
use kube::Resource;
use serde::de::DeserializeOwned;
use serde::Serialize;
use tokio::time::timeout;

use crate::error::{StoreError, StoreResult};
use crate::k8s::sync::{ChildKind, ChildResource};
use telemetry_core::crd::{ServiceMonitor, TracePipeline};

/// The default timeout to use for API calls.
const API_TIMEOUT: Duration = Duration::from_secs(5);

/// Read & write access to the cluster objects used by the reconciler.
#[async_trait]
pub trait ClusterStore: Clone + Send + Sync + 'static {
    /// Fetch the pipeline of the given name, `None` if it does not exist.
    async fn get_pipeline(&self, name: &str) -> StoreResult<Option<TracePipeline>>;

    /// List all pipelines.
    async fn list_pipelines(&self) -> StoreResult<Vec<TracePipeline>>;

    /// Fetch the given secret, `None` if it does not exist.
    async fn get_secret(&self, namespace: &str, name: &str) -> StoreResult<Option<Secret>>;

    /// Fetch the child object of the given kind, `None` if it does not exist.
    async fn get_child(&self, kind: ChildKind, namespace: &str, name: &str) -> StoreResult<Option<ChildResource>>;

    /// Create the given child object.
    async fn create_child(&self, child: &ChildResource) -> StoreResult<()>;

    /// Update the given child object.
    ///
    /// The update is conditional on the object's resource version. A stale version yields
    /// `StoreError::Conflict`.
    async fn update_child(&self, child: &ChildResource) -> StoreResult<()>;
}

/// A `ClusterStore` backed by the K8s API.
#[derive(Clone)]
pub struct KubeStore {
    /// K8s client.
    client: Client,
}

impl KubeStore {
    /// Create a new instance.
    pub fn new(client: Client) -> Self {
        Self { client }
    }

    async fn get<K>(&self, api: Api<K>, name: &str) -> StoreResult<Option<K>>
    where
        K: Clone + DeserializeOwned + Debug,
    {
        let res = timeout(API_TIMEOUT, api.get(name)).await.map_err(|_| StoreError::Timeout)?;
        match res {
            Ok(obj) => Ok(Some(obj)),
            Err(kube::Error::Api(api_err)) if api_err.code == http::StatusCode::NOT_FOUND => Ok(None),
            Err(err) => Err(StoreError::Api(err)),
        }
    }

    async fn create<K>(&self, obj: &K) -> StoreResult<()>
    where
        K: Resource<DynamicType = ()> + Clone + DeserializeOwned + Serialize + Debug,
    {
        let api: Api<K> = Api::namespaced(self.client.clone(), obj.meta().namespace.as_deref().unwrap_or_default());
        timeout(API_TIMEOUT, api.create(&PostParams::default(), obj))
            .await
            .map_err(|_| StoreError::Timeout)?
            .map(|_| ())
            .map_err(StoreError::from)
    }

    async fn replace<K>(&self, obj: &K) -> StoreResult<()>
    where
        K: Resource<DynamicType = ()> + Clone + DeserializeOwned + Serialize + Debug,
    {
        let api: Api<K> = Api::namespaced(self.client.clone(), obj.meta().namespace.as_deref().unwrap_or_default());
        let name = obj.meta().name.as_deref().unwrap_or_default();
        let res = timeout(API_TIMEOUT, api.replace(name, &PostParams::default(), obj))
            .await
            .map_err(|_| StoreError::Timeout)?;
        match res {
            Ok(_) => Ok(()),
            Err(kube::Error::Api(api_err)) if api_err.code == http::StatusCode::CONFLICT => Err(StoreError::Conflict),
            Err(kube::Error::Api(api_err)) if api_err.code == http::StatusCode::NOT_FOUND => Err(StoreError::NotFound),
            Err(err) => Err(StoreError::Api(err)),
        }
    }
}

#[async_trait]
impl ClusterStore for KubeStore {
    #[tracing::instrument(level = "debug", skip(self))]
    async fn get_pipeline(&self, name: &str) -> StoreResult<Option<TracePipeline>> {
        let api: Api<TracePipeline> = Api::all(self.client.clone());
        self.get(api, name).await
    }

    #[tracing::instrument(level = "debug", skip(self))]
    async fn list_pipelines(&self) -> StoreResult<Vec<TracePipeline>> {
        let api: Api<TracePipeline> = Api::all(self.client.clone());
        let list = timeout(API_TIMEOUT, api.list(&ListParams::default()))
            .await
            .map_err(|_| StoreError::Timeout)??;
        Ok(list.items)
    }

    #[tracing::instrument(level = "debug", skip(self))]
    async fn get_secret(&self, namespace: &str, name: &str) -> StoreResult<Option<Secret>> {
        let api: Api<Secret> = Api::namespaced(self.client.clone(), namespace);
        self.get(api, name).await
    }

    #[tracing::instrument(level = "debug", skip(self))]
    async fn get_child(&self, kind: ChildKind, namespace: &str, name: &str) -> StoreResult<Option<ChildResource>> {
        let client = self.client.clone();
        Ok(match kind {
            ChildKind::Secret => self.get(Api::<Secret>::namespaced(client, namespace), name).await?.map(ChildResource::Secret),
            ChildKind::ConfigMap => self.get(Api::<ConfigMap>::namespaced(client, namespace), name).await?.map(ChildResource::ConfigMap),
            ChildKind::Deployment => self.get(Api::<Deployment>::namespaced(client, namespace), name).await?.map(ChildResource::Deployment),
            ChildKind::Service => self.get(Api::<Service>::namespaced(client, namespace), name).await?.map(ChildResource::Service),
            ChildKind::ServiceMonitor => self
                .get(Api::<ServiceMonitor>::namespaced(client, namespace), name)
                .await?
                .map(ChildResource::ServiceMonitor),
        })
    }

    #[tracing::instrument(level = "debug", skip(self, child), fields(kind = %child.kind(), name = child.name()))]
    async fn create_child(&self, child: &ChildResource) -> StoreResult<()> {
        match child {
            ChildResource::Secret(obj) => self.create(obj).await,
            ChildResource::ConfigMap(obj) => self.create(obj).await,
            ChildResource::Deployment(obj) => self.create(obj).await,
            ChildResource::Service(obj) => self.create(obj).await,
            ChildResource::ServiceMonitor(obj) => self.create(obj).await,
        }
    }

    #[tracing::instrument(level = "debug", skip(self, child), fields(kind = %child.kind(), name = child.name()))]
    async fn update_child(&self, child: &ChildResource) -> StoreResult<()> {
        match child {
            ChildResource::Secret(obj) => self.replace(obj).await,
            ChildResource::ConfigMap(obj) => self.replace(obj).await,
            ChildResource::Deployment(obj) => self.replace(obj).await,
            ChildResource::Service(obj) => self.replace(obj).await,
            ChildResource::ServiceMonitor(obj) => self.replace(obj).await,
        }
    }
}
