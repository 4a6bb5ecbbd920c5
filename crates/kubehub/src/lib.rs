//! dsched kubehub – read-only access to workloads and Pods.
//!
//! The placement engine talks to the cluster only through [`ClusterReader`], so
//! the live client ([`KubeReader`]) and the in-memory double ([`MemoryCluster`])
//! are interchangeable.

#![forbid(unsafe_code)]

use std::fmt::Debug;

use anyhow::{Context, Result};
use k8s_openapi::api::apps::v1::{Deployment, ReplicaSet, StatefulSet};
use k8s_openapi::api::core::v1::Pod;
use k8s_openapi::NamespaceResourceScope;
use kube::{
    api::{Api, ListParams},
    Client, Resource,
};
use serde::de::DeserializeOwned;
use tracing::{debug, info};

mod memory;
mod selector;

pub use memory::MemoryCluster;
pub use selector::PodSelector;

#[derive(Debug, thiserror::Error)]
pub enum ClusterError {
    #[error("{kind} {namespace}/{name} not found")]
    NotFound { kind: String, namespace: String, name: String },
    #[error("kubernetes api: {0}")]
    Api(#[from] kube::Error),
    #[error("invalid label selector: {0}")]
    InvalidSelector(String),
}

/// Read-only view of the cluster used while deciding a placement.
#[async_trait::async_trait]
pub trait ClusterReader: Send + Sync {
    async fn replica_set(&self, namespace: &str, name: &str) -> Result<ReplicaSet, ClusterError>;
    async fn deployment(&self, namespace: &str, name: &str) -> Result<Deployment, ClusterError>;
    async fn stateful_set(&self, namespace: &str, name: &str) -> Result<StatefulSet, ClusterError>;
    async fn list_pods(&self, namespace: &str, selector: &PodSelector) -> Result<Vec<Pod>, ClusterError>;
}

/// Build a client from in-cluster config or the local kubeconfig.
pub async fn connect() -> Result<Client> {
    let client = Client::try_default().await.context("building kubernetes client")?;
    info!(namespace = %client.default_namespace(), "kubernetes client ready");
    Ok(client)
}

/// [`ClusterReader`] backed by the API server.
#[derive(Clone)]
pub struct KubeReader {
    client: Client,
}

impl KubeReader {
    pub fn new(client: Client) -> Self {
        Self { client }
    }

    async fn get_named<K>(&self, namespace: &str, name: &str) -> Result<K, ClusterError>
    where
        K: Resource<Scope = NamespaceResourceScope> + Clone + DeserializeOwned + Debug,
        K::DynamicType: Default,
    {
        let api: Api<K> = Api::namespaced(self.client.clone(), namespace);
        match api.get(name).await {
            Ok(obj) => Ok(obj),
            Err(kube::Error::Api(ae)) if ae.code == 404 => Err(ClusterError::NotFound {
                kind: K::kind(&K::DynamicType::default()).into_owned(),
                namespace: namespace.to_string(),
                name: name.to_string(),
            }),
            Err(e) => Err(ClusterError::Api(e)),
        }
    }
}

#[async_trait::async_trait]
impl ClusterReader for KubeReader {
    async fn replica_set(&self, namespace: &str, name: &str) -> Result<ReplicaSet, ClusterError> {
        self.get_named(namespace, name).await
    }

    async fn deployment(&self, namespace: &str, name: &str) -> Result<Deployment, ClusterError> {
        self.get_named(namespace, name).await
    }

    async fn stateful_set(&self, namespace: &str, name: &str) -> Result<StatefulSet, ClusterError> {
        self.get_named(namespace, name).await
    }

    async fn list_pods(&self, namespace: &str, selector: &PodSelector) -> Result<Vec<Pod>, ClusterError> {
        let api: Api<Pod> = Api::namespaced(self.client.clone(), namespace);
        let rendered = selector.render();
        debug!(ns = %namespace, selector = %rendered, "listing pods");
        let lp = ListParams::default().labels(&rendered);
        let list = api.list(&lp).await?;
        Ok(list.items)
    }
}
