use std::collections::HashMap;

use k8s_openapi::api::apps::v1::{Deployment, ReplicaSet, StatefulSet};
use k8s_openapi::api::core::v1::Pod;
use kube::core::ErrorResponse;
use kube::ResourceExt;

use crate::{ClusterError, ClusterReader, PodSelector};

type Key = (String, String);

fn key_of<K: ResourceExt>(obj: &K) -> Key {
    (obj.namespace().unwrap_or_default(), obj.name_any())
}

/// In-memory [`ClusterReader`] for tests and offline evaluation.
///
/// Objects are keyed by `metadata.namespace`/`metadata.name`; a missing
/// namespace is stored as the empty string.
#[derive(Debug, Clone, Default)]
pub struct MemoryCluster {
    replica_sets: HashMap<Key, ReplicaSet>,
    deployments: HashMap<Key, Deployment>,
    stateful_sets: HashMap<Key, StatefulSet>,
    pods: Vec<Pod>,
    unavailable: bool,
}

impl MemoryCluster {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_replica_set(mut self, rs: ReplicaSet) -> Self {
        self.replica_sets.insert(key_of(&rs), rs);
        self
    }

    pub fn with_deployment(mut self, d: Deployment) -> Self {
        self.deployments.insert(key_of(&d), d);
        self
    }

    pub fn with_stateful_set(mut self, sts: StatefulSet) -> Self {
        self.stateful_sets.insert(key_of(&sts), sts);
        self
    }

    pub fn with_pod(mut self, pod: Pod) -> Self {
        self.pods.push(pod);
        self
    }

    /// Make every read fail as if the API server were unreachable.
    pub fn unavailable(mut self) -> Self {
        self.unavailable = true;
        self
    }

    fn check_available(&self) -> Result<(), ClusterError> {
        if self.unavailable {
            return Err(ClusterError::Api(kube::Error::Api(ErrorResponse {
                status: "Failure".to_string(),
                message: "service unavailable".to_string(),
                reason: "ServiceUnavailable".to_string(),
                code: 503,
            })));
        }
        Ok(())
    }

    fn lookup<T: Clone>(map: &HashMap<Key, T>, kind: &str, namespace: &str, name: &str) -> Result<T, ClusterError> {
        map.get(&(namespace.to_string(), name.to_string())).cloned().ok_or_else(|| ClusterError::NotFound {
            kind: kind.to_string(),
            namespace: namespace.to_string(),
            name: name.to_string(),
        })
    }
}

#[async_trait::async_trait]
impl ClusterReader for MemoryCluster {
    async fn replica_set(&self, namespace: &str, name: &str) -> Result<ReplicaSet, ClusterError> {
        self.check_available()?;
        Self::lookup(&self.replica_sets, "ReplicaSet", namespace, name)
    }

    async fn deployment(&self, namespace: &str, name: &str) -> Result<Deployment, ClusterError> {
        self.check_available()?;
        Self::lookup(&self.deployments, "Deployment", namespace, name)
    }

    async fn stateful_set(&self, namespace: &str, name: &str) -> Result<StatefulSet, ClusterError> {
        self.check_available()?;
        Self::lookup(&self.stateful_sets, "StatefulSet", namespace, name)
    }

    async fn list_pods(&self, namespace: &str, selector: &PodSelector) -> Result<Vec<Pod>, ClusterError> {
        self.check_available()?;
        Ok(self
            .pods
            .iter()
            .filter(|p| p.namespace().as_deref().unwrap_or_default() == namespace)
            .filter(|p| selector.matches(p.labels()))
            .cloned()
            .collect())
    }
}
