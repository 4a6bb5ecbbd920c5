//! JSON-patch construction for a capacity decision.
//!
//! Node affinity is merged additively into whatever the Pod already carries:
//! required groups are appended to the OR list and preferred terms to the
//! weighted list, so no existing user term is dropped. Label and annotation
//! maps are cloned and replaced as a whole, or added when absent.

use std::collections::BTreeMap;

use dsched_core::{
    CapacityClass, PatchOperation, PatchValue, CAPACITY_NODE_LABEL,
    DESIRED_CAPACITY_LABEL, POD_DELETION_COST_ANNOTATION, SPOT_PREFERENCE_WEIGHT,
};
use k8s_openapi::api::core::v1::{
    Affinity, NodeAffinity, NodeSelector, NodeSelectorRequirement, NodeSelectorTerm, Pod,
    PreferredSchedulingTerm,
};

const AFFINITY_PATH: &str = "/spec/affinity";
const ANNOTATIONS_PATH: &str = "/metadata/annotations";
const LABELS_PATH: &str = "/metadata/labels";

fn capacity_term(class: CapacityClass) -> NodeSelectorTerm {
    NodeSelectorTerm {
        match_expressions: Some(vec![NodeSelectorRequirement {
            key: CAPACITY_NODE_LABEL.to_string(),
            operator: "In".to_string(),
            values: Some(vec![class.as_str().to_string()]),
        }]),
        match_fields: None,
    }
}

/// Node affinity encoding `class`: a hard requirement for on-demand, a
/// weight-100 preference for spot.
pub fn node_affinity_for(class: CapacityClass) -> NodeAffinity {
    match class {
        CapacityClass::OnDemand => NodeAffinity {
            required_during_scheduling_ignored_during_execution: Some(NodeSelector {
                node_selector_terms: vec![capacity_term(class)],
            }),
            preferred_during_scheduling_ignored_during_execution: None,
        },
        CapacityClass::Spot => NodeAffinity {
            required_during_scheduling_ignored_during_execution: None,
            preferred_during_scheduling_ignored_during_execution: Some(vec![PreferredSchedulingTerm {
                weight: SPOT_PREFERENCE_WEIGHT,
                preference: capacity_term(class),
            }]),
        },
    }
}

/// Fold `rule` into a copy of `existing` and pick `add` or `replace` from presence.
pub fn merge_affinity(existing: Option<&Affinity>, rule: NodeAffinity) -> PatchOperation {
    let Some(existing) = existing else {
        let affinity = Affinity { node_affinity: Some(rule), ..Default::default() };
        return PatchOperation::add(AFFINITY_PATH, PatchValue::Affinity(Box::new(affinity)));
    };

    let mut merged = existing.clone();
    match merged.node_affinity.as_mut() {
        None => merged.node_affinity = Some(rule),
        Some(current) => {
            if let Some(required) = rule.required_during_scheduling_ignored_during_execution {
                match current.required_during_scheduling_ignored_during_execution.as_mut() {
                    None => current.required_during_scheduling_ignored_during_execution = Some(required),
                    Some(sel) => sel.node_selector_terms.extend(required.node_selector_terms),
                }
            }
            if let Some(preferred) = rule.preferred_during_scheduling_ignored_during_execution {
                match current.preferred_during_scheduling_ignored_during_execution.as_mut() {
                    None => current.preferred_during_scheduling_ignored_during_execution = Some(preferred),
                    Some(terms) => terms.extend(preferred),
                }
            }
        }
    }
    PatchOperation::replace(AFFINITY_PATH, PatchValue::Affinity(Box::new(merged)))
}

/// Set `key=value` on a string map at `path` without touching the caller's copy.
pub fn stamp_entry(
    path: &str,
    existing: Option<&BTreeMap<String, String>>,
    key: &str,
    value: &str,
) -> PatchOperation {
    match existing {
        None => PatchOperation::add(path, PatchValue::Map(BTreeMap::from([(key.to_string(), value.to_string())]))),
        Some(map) => {
            let mut next = map.clone();
            next.insert(key.to_string(), value.to_string());
            PatchOperation::replace(path, PatchValue::Map(next))
        }
    }
}

/// Patches steering `pod` to `class`, in application order:
/// affinity, deletion-cost annotation (on-demand only), desired-capacity label.
/// Both maps are written whole; the escaped per-key `/metadata/labels/...~1...` path is never emitted.
pub fn build_patches(pod: &Pod, class: CapacityClass) -> Vec<PatchOperation> {
    let existing_affinity = pod.spec.as_ref().and_then(|s| s.affinity.as_ref());
    let mut patches = vec![merge_affinity(existing_affinity, node_affinity_for(class))];
    if class == CapacityClass::OnDemand {
        patches.push(stamp_entry(ANNOTATIONS_PATH, pod.metadata.annotations.as_ref(), POD_DELETION_COST_ANNOTATION, "1"));
    }
    patches.push(stamp_entry(LABELS_PATH, pod.metadata.labels.as_ref(), DESIRED_CAPACITY_LABEL, class.as_str()));
    patches
}

#[cfg(test)]
mod tests {
    use super::*;
    use dsched_core::PatchOp;
    use k8s_openapi::api::core::v1::{PodAffinity, PodSpec};
    use k8s_openapi::apimachinery::pkg::apis::meta::v1::ObjectMeta;

    fn term(key: &str, value: &str) -> NodeSelectorTerm {
        NodeSelectorTerm {
            match_expressions: Some(vec![NodeSelectorRequirement {
                key: key.to_string(),
                operator: "In".to_string(),
                values: Some(vec![value.to_string()]),
            }]),
            match_fields: None,
        }
    }

    fn affinity_of(op: &PatchOperation) -> &Affinity {
        match &op.value {
            PatchValue::Affinity(a) => a,
            other => panic!("expected affinity, got {:?}", other),
        }
    }

    fn map_of(op: &PatchOperation) -> &BTreeMap<String, String> {
        match &op.value {
            PatchValue::Map(m) => m,
            other => panic!("expected map, got {:?}", other),
        }
    }

    #[test]
    fn no_affinity_adds_fresh_tree() {
        let op = merge_affinity(None, node_affinity_for(CapacityClass::OnDemand));
        assert_eq!(op.op, PatchOp::Add);
        assert_eq!(op.path, "/spec/affinity");
        let a = affinity_of(&op);
        let na = a.node_affinity.as_ref().unwrap();
        let terms = &na.required_during_scheduling_ignored_during_execution.as_ref().unwrap().node_selector_terms;
        assert_eq!(terms, &vec![term(CAPACITY_NODE_LABEL, "on-demand")]);
        assert!(na.preferred_during_scheduling_ignored_during_execution.is_none());
        assert!(a.pod_affinity.is_none());
    }

    #[test]
    fn affinity_without_node_branch_keeps_other_branches() {
        let existing = Affinity { pod_affinity: Some(PodAffinity::default()), ..Default::default() };
        let op = merge_affinity(Some(&existing), node_affinity_for(CapacityClass::Spot));
        assert_eq!(op.op, PatchOp::Replace);
        let a = affinity_of(&op);
        assert_eq!(a.pod_affinity, Some(PodAffinity::default()));
        let preferred = a.node_affinity.as_ref().unwrap().preferred_during_scheduling_ignored_during_execution.as_ref().unwrap();
        assert_eq!(preferred.len(), 1);
        assert_eq!(preferred[0].weight, 100);
        assert_eq!(preferred[0].preference, term(CAPACITY_NODE_LABEL, "spot"));
    }

    #[test]
    fn required_groups_are_appended_not_replaced() {
        let existing = Affinity {
            node_affinity: Some(NodeAffinity {
                required_during_scheduling_ignored_during_execution: Some(NodeSelector {
                    node_selector_terms: vec![term("topology.kubernetes.io/zone", "eu-west-1a")],
                }),
                preferred_during_scheduling_ignored_during_execution: Some(vec![PreferredSchedulingTerm {
                    weight: 10,
                    preference: term("disktype", "ssd"),
                }]),
            }),
            ..Default::default()
        };
        let op = merge_affinity(Some(&existing), node_affinity_for(CapacityClass::OnDemand));
        assert_eq!(op.op, PatchOp::Replace);
        let na = affinity_of(&op).node_affinity.as_ref().unwrap();
        let terms = &na.required_during_scheduling_ignored_during_execution.as_ref().unwrap().node_selector_terms;
        assert_eq!(terms, &vec![term("topology.kubernetes.io/zone", "eu-west-1a"), term(CAPACITY_NODE_LABEL, "on-demand")]);
        // untouched side survives
        assert_eq!(na.preferred_during_scheduling_ignored_during_execution.as_ref().unwrap().len(), 1);
        // caller's tree is not mutated
        assert_eq!(
            existing.node_affinity.as_ref().unwrap().required_during_scheduling_ignored_during_execution.as_ref().unwrap().node_selector_terms.len(),
            1
        );
    }

    #[test]
    fn preferred_terms_are_appended() {
        let existing = Affinity {
            node_affinity: Some(NodeAffinity {
                required_during_scheduling_ignored_during_execution: None,
                preferred_during_scheduling_ignored_during_execution: Some(vec![PreferredSchedulingTerm {
                    weight: 10,
                    preference: term("disktype", "ssd"),
                }]),
            }),
            ..Default::default()
        };
        let op = merge_affinity(Some(&existing), node_affinity_for(CapacityClass::Spot));
        let na = affinity_of(&op).node_affinity.as_ref().unwrap();
        let preferred = na.preferred_during_scheduling_ignored_during_execution.as_ref().unwrap();
        assert_eq!(preferred.len(), 2);
        assert_eq!(preferred[0].preference, term("disktype", "ssd"));
        assert_eq!(preferred[1].weight, 100);
        assert!(na.required_during_scheduling_ignored_during_execution.is_none());
    }

    #[test]
    fn node_branch_without_required_side_gets_one() {
        let existing = Affinity { node_affinity: Some(NodeAffinity::default()), ..Default::default() };
        let op = merge_affinity(Some(&existing), node_affinity_for(CapacityClass::OnDemand));
        let na = affinity_of(&op).node_affinity.as_ref().unwrap();
        assert_eq!(na.required_during_scheduling_ignored_during_execution.as_ref().unwrap().node_selector_terms.len(), 1);
    }

    #[test]
    fn stamp_entry_adds_or_replaces_by_presence() {
        let op = stamp_entry("/metadata/annotations", None, POD_DELETION_COST_ANNOTATION, "1");
        assert_eq!(op.op, PatchOp::Add);
        assert_eq!(map_of(&op).len(), 1);

        let existing = BTreeMap::from([("team".to_string(), "payments".to_string())]);
        let op = stamp_entry("/metadata/annotations", Some(&existing), POD_DELETION_COST_ANNOTATION, "1");
        assert_eq!(op.op, PatchOp::Replace);
        let m = map_of(&op);
        assert_eq!(m.get("team").map(String::as_str), Some("payments"));
        assert_eq!(m.get(POD_DELETION_COST_ANNOTATION).map(String::as_str), Some("1"));
        assert_eq!(existing.len(), 1);
    }

    #[test]
    fn on_demand_emits_affinity_annotation_label_in_order() {
        let pod = Pod {
            metadata: ObjectMeta { labels: Some(BTreeMap::from([("app".to_string(), "web".to_string())])), ..Default::default() },
            spec: Some(PodSpec::default()),
            ..Default::default()
        };
        let patches = build_patches(&pod, CapacityClass::OnDemand);
        let paths: Vec<_> = patches.iter().map(|p| (p.op, p.path.as_str())).collect();
        assert_eq!(
            paths,
            vec![
                (PatchOp::Add, "/spec/affinity"),
                (PatchOp::Add, "/metadata/annotations"),
                (PatchOp::Replace, "/metadata/labels"),
            ]
        );
        assert_eq!(map_of(&patches[2]).get(DESIRED_CAPACITY_LABEL).map(String::as_str), Some("on-demand"));
        assert_eq!(map_of(&patches[2]).get("app").map(String::as_str), Some("web"));
    }

    #[test]
    fn spot_skips_deletion_cost() {
        let pod = Pod { spec: Some(PodSpec::default()), ..Default::default() };
        let patches = build_patches(&pod, CapacityClass::Spot);
        assert_eq!(patches.len(), 2);
        assert!(patches.iter().all(|p| p.path != "/metadata/annotations"));
        assert_eq!(patches[1].op, PatchOp::Add);
        assert_eq!(map_of(&patches[1]).get(DESIRED_CAPACITY_LABEL).map(String::as_str), Some("spot"));
    }

    #[test]
    fn maps_are_written_whole_never_per_key() {
        let labelled = Pod {
            metadata: ObjectMeta {
                labels: Some(BTreeMap::from([("app".to_string(), "web".to_string())])),
                annotations: Some(BTreeMap::from([("team".to_string(), "a".to_string())])),
                ..Default::default()
            },
            ..Default::default()
        };
        for pod in [Pod::default(), labelled] {
            for class in [CapacityClass::OnDemand, CapacityClass::Spot] {
                for p in build_patches(&pod, class) {
                    assert!(
                        ["/spec/affinity", "/metadata/annotations", "/metadata/labels"].contains(&p.path.as_str()),
                        "unexpected path {}",
                        p.path
                    );
                }
            }
        }
    }
}
