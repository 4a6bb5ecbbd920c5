//! dsched placement engine.
//!
//! Resolves the workload owning a Pod, reads its on-demand floor, decides a
//! capacity class and renders the JSON patch that encodes it. Nothing here
//! writes to the cluster; the patch list is the only output.

#![forbid(unsafe_code)]

use std::sync::Arc;

use dsched_core::{CapacityClass, PatchOperation, WorkloadRef};
use dsched_kubehub::ClusterReader;
use k8s_openapi::api::core::v1::Pod;

pub mod decision;
mod error;
pub mod oracle;
pub mod patch;
pub mod resolver;

pub use error::PlacementError;
pub use oracle::Availability;

/// Outcome of one placement decision.
#[derive(Debug, Clone, PartialEq)]
pub struct Placement {
    pub workload: WorkloadRef,
    /// Policy and position the decision was based on; `None` for standalone Pods.
    pub availability: Option<Availability>,
    pub capacity: Option<CapacityClass>,
    pub patches: Vec<PatchOperation>,
}

impl Placement {
    fn standalone() -> Self {
        Self { workload: WorkloadRef::Standalone, availability: None, capacity: None, patches: Vec::new() }
    }
}

/// Entry point wiring resolver, oracle, decision and patch builder over an injected reader.
#[derive(Clone)]
pub struct Placer {
    reader: Arc<dyn ClusterReader>,
}

impl Placer {
    pub fn new(reader: Arc<dyn ClusterReader>) -> Self {
        Self { reader }
    }

    /// Decide where `pod` should run and build the patch steering it there.
    pub async fn decide_and_patch(&self, pod: &Pod) -> Result<Placement, PlacementError> {
        let reader = self.reader.as_ref();
        let workload = resolver::resolve_owner(reader, pod).await?;
        let Some(availability) = oracle::assess(reader, pod, &workload).await? else {
            return Ok(Placement::standalone());
        };
        let capacity = decision::decide(availability.policy, availability.position);
        let patches = patch::build_patches(pod, capacity);
        Ok(Placement { workload, availability: Some(availability), capacity: Some(capacity), patches })
    }
}

pub(crate) fn pod_namespace(pod: &Pod) -> Result<&str, PlacementError> {
    pod.metadata
        .namespace
        .as_deref()
        .filter(|ns| !ns.is_empty())
        .ok_or_else(|| PlacementError::Decode("pod has no namespace".to_string()))
}
