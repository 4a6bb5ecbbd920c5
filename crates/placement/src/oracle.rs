//! Availability lookups: the declared on-demand floor and where this Pod stands against it.
//!
//! Deployment counts are read without coordination; two sibling Pods admitted
//! at the same time can both see the same count and both land on on-demand,
//! overshooting `min_available` by one until the next scale event.

use std::collections::BTreeMap;

use dsched_core::{
    AvailabilityPolicy, CapacityClass, PlacementPosition, WorkloadRef, DESIRED_CAPACITY_LABEL,
    MIN_AVAILABLE_ANNOTATION,
};
use dsched_kubehub::{ClusterReader, PodSelector};
use k8s_openapi::api::core::v1::Pod;
use kube::ResourceExt;

use crate::{pod_namespace, PlacementError};

/// Policy and position observed for one admission.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Availability {
    pub policy: AvailabilityPolicy,
    pub position: PlacementPosition,
}

/// Parse the min-available annotation of `workload`.
pub fn read_policy(
    annotations: &BTreeMap<String, String>,
    workload: &WorkloadRef,
) -> Result<AvailabilityPolicy, PlacementError> {
    let policy_err = |reason: String| PlacementError::Policy {
        annotation: MIN_AVAILABLE_ANNOTATION,
        workload: workload.to_string(),
        reason,
    };
    let raw = annotations
        .get(MIN_AVAILABLE_ANNOTATION)
        .ok_or_else(|| policy_err("is missing".to_string()))?;
    let min_available = raw
        .parse::<u32>()
        .map_err(|e| policy_err(format!("is not a non-negative integer ({:?}): {}", raw, e)))?;
    Ok(AvailabilityPolicy { min_available })
}

/// Ordinal of a StatefulSet Pod named `<owner>-<n>`; anything else counts as 0.
pub fn statefulset_ordinal(pod_name: &str, owner: &str) -> u32 {
    pod_name
        .strip_prefix(owner)
        .and_then(|rest| rest.strip_prefix('-'))
        .and_then(|n| n.parse().ok())
        .unwrap_or(0)
}

/// Fetch policy and position for `workload`. `Standalone` yields `None`.
pub async fn assess(
    reader: &dyn ClusterReader,
    pod: &Pod,
    workload: &WorkloadRef,
) -> Result<Option<Availability>, PlacementError> {
    match workload {
        WorkloadRef::Standalone => Ok(None),
        WorkloadRef::Deployment { name } => {
            let namespace = pod_namespace(pod)?;
            let deployment = reader.deployment(namespace, name).await?;
            let policy = read_policy(deployment.annotations(), workload)?;
            let selector = deployment
                .spec
                .as_ref()
                .map(|s| &s.selector)
                .ok_or_else(|| PlacementError::Decode(format!("{} has no spec.selector", workload)))?;
            let selector = PodSelector::from_label_selector(selector)
                .map_err(|e| PlacementError::Decode(format!("{} {}", workload, e)))?
                .and_equals(DESIRED_CAPACITY_LABEL, CapacityClass::OnDemand.as_str());
            let placed = reader.list_pods(namespace, &selector).await?;
            let count = u32::try_from(placed.len()).unwrap_or(u32::MAX);
            Ok(Some(Availability { policy, position: PlacementPosition::OnDemandCount(count) }))
        }
        WorkloadRef::StatefulSet { name } => {
            let namespace = pod_namespace(pod)?;
            let sts = reader.stateful_set(namespace, name).await?;
            let policy = read_policy(sts.annotations(), workload)?;
            let ordinal = statefulset_ordinal(pod.metadata.name.as_deref().unwrap_or_default(), name);
            Ok(Some(Availability { policy, position: PlacementPosition::Ordinal(ordinal) }))
        }
    }
}
