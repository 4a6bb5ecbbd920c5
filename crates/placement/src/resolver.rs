//! Owner resolution: Pod → ReplicaSet → Deployment, or Pod → StatefulSet.

use dsched_core::WorkloadRef;
use dsched_kubehub::ClusterReader;
use k8s_openapi::api::core::v1::Pod;
use kube::ResourceExt;

use crate::{pod_namespace, PlacementError};

/// Resolve the top-level workload owning `pod`.
///
/// Only one level of indirection is followed. When several owner references
/// qualify, the last one wins. Lookup errors are returned as-is, no retry.
pub async fn resolve_owner(reader: &dyn ClusterReader, pod: &Pod) -> Result<WorkloadRef, PlacementError> {
    let mut workload = WorkloadRef::Standalone;
    for owner in pod.owner_references() {
        match owner.kind.as_str() {
            "StatefulSet" => {
                workload = WorkloadRef::StatefulSet { name: owner.name.clone() };
            }
            "ReplicaSet" => {
                let namespace = pod_namespace(pod)?;
                let rs = reader.replica_set(namespace, &owner.name).await?;
                for rs_owner in rs.owner_references() {
                    if rs_owner.kind == "Deployment" {
                        workload = WorkloadRef::Deployment { name: rs_owner.name.clone() };
                    }
                }
            }
            _ => {}
        }
    }
    Ok(workload)
}
