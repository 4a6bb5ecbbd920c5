//! dsched core types shared by the placement engine and the webhook transport.

#![forbid(unsafe_code)]

use std::collections::BTreeMap;
use std::fmt;

use k8s_openapi::api::core::v1::Affinity;
use serde::Serialize;

/// Workload annotation declaring how many replicas must stay on on-demand capacity.
pub const MIN_AVAILABLE_ANNOTATION: &str = "distributed-scheduling/min-available";
/// Pod label recording the capacity class chosen at admission.
pub const DESIRED_CAPACITY_LABEL: &str = "distributed-scheduling/desired-capacity";
/// Annotation read by the ReplicaSet controller when ranking Pods for scale-down.
pub const POD_DELETION_COST_ANNOTATION: &str = "controller.kubernetes.io/pod-deletion-cost";
/// Node label carrying the capacity class of the machine.
pub const CAPACITY_NODE_LABEL: &str = "node.kubernetes.io/capacity";

/// Weight of the preferred term steering spot Pods (maximum allowed by the API).
pub const SPOT_PREFERENCE_WEIGHT: i32 = 100;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum CapacityClass {
    OnDemand,
    Spot,
}

impl CapacityClass {
    /// Value used both for the node label and the desired-capacity Pod label.
    pub fn as_str(self) -> &'static str {
        match self {
            CapacityClass::OnDemand => "on-demand",
            CapacityClass::Spot => "spot",
        }
    }
}

impl fmt::Display for CapacityClass {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum WorkloadKind {
    Standalone,
    Deployment,
    StatefulSet,
}

impl fmt::Display for WorkloadKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            WorkloadKind::Standalone => "Standalone",
            WorkloadKind::Deployment => "Deployment",
            WorkloadKind::StatefulSet => "StatefulSet",
        };
        f.write_str(s)
    }
}

/// Top-level workload owning a Pod. Built once per admission request.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum WorkloadRef {
    Standalone,
    Deployment { name: String },
    StatefulSet { name: String },
}

impl WorkloadRef {
    pub fn kind(&self) -> WorkloadKind {
        match self {
            WorkloadRef::Standalone => WorkloadKind::Standalone,
            WorkloadRef::Deployment { .. } => WorkloadKind::Deployment,
            WorkloadRef::StatefulSet { .. } => WorkloadKind::StatefulSet,
        }
    }

    pub fn name(&self) -> Option<&str> {
        match self {
            WorkloadRef::Standalone => None,
            WorkloadRef::Deployment { name } | WorkloadRef::StatefulSet { name } => Some(name),
        }
    }
}

impl fmt::Display for WorkloadRef {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self.name() {
            Some(name) => write!(f, "{}/{}", self.kind(), name),
            None => write!(f, "{}", self.kind()),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct AvailabilityPolicy {
    pub min_available: u32,
}

/// Quantity compared against `min_available`.
///
/// - `OnDemandCount`: Pods of a Deployment already labelled on-demand.
/// - `Ordinal`: the fixed index of a StatefulSet replica.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PlacementPosition {
    OnDemandCount(u32),
    Ordinal(u32),
}

impl PlacementPosition {
    pub fn value(self) -> u32 {
        match self {
            PlacementPosition::OnDemandCount(n) | PlacementPosition::Ordinal(n) => n,
        }
    }
}

#[derive(Debug, Clone, Copy, Serialize, PartialEq, Eq)]
#[serde(rename_all = "lowercase")]
pub enum PatchOp {
    Add,
    Replace,
}

/// Typed value of a patch operation; serialized without a tag.
#[derive(Debug, Clone, Serialize, PartialEq)]
#[serde(untagged)]
pub enum PatchValue {
    Affinity(Box<Affinity>),
    Map(BTreeMap<String, String>),
    Text(String),
}

/// One RFC 6902 operation against the Pod's API representation.
#[derive(Debug, Clone, Serialize, PartialEq)]
pub struct PatchOperation {
    pub op: PatchOp,
    pub path: String,
    pub value: PatchValue,
}

impl PatchOperation {
    pub fn add(path: impl Into<String>, value: PatchValue) -> Self {
        Self { op: PatchOp::Add, path: path.into(), value }
    }

    pub fn replace(path: impl Into<String>, value: PatchValue) -> Self {
        Self { op: PatchOp::Replace, path: path.into(), value }
    }
}
