//! AdmissionReview envelope around the placement engine.

use std::time::Instant;

use dsched_core::PatchOperation;
use dsched_placement::Placer;
use k8s_openapi::api::core::v1::Pod;
use kube::core::admission::{AdmissionRequest, AdmissionResponse, AdmissionReview, Operation};
use kube::core::DynamicObject;
use metrics::{counter, histogram};
use tracing::{debug, info, warn};

/// Explicit admission outcome. A request is only allowed through `Allow`.
#[derive(Debug, Clone, PartialEq)]
pub enum Verdict {
    Allow { patches: Vec<PatchOperation> },
    Deny { reason: String },
}

/// Decode a raw review body; undecodable input yields an invalid (not allowed) response.
pub async fn admit_bytes(placer: &Placer, body: &[u8]) -> AdmissionReview<DynamicObject> {
    counter!("admission_requests_total").increment(1);
    match serde_json::from_slice::<AdmissionReview<Pod>>(body) {
        Ok(review) => admit(placer, review).await,
        Err(e) => {
            warn!(error = %e, "decoding admission review failed");
            counter!("admission_denied_total").increment(1);
            AdmissionResponse::invalid(format!("decoding admission review: {}", e)).into_review()
        }
    }
}

pub async fn admit(placer: &Placer, review: AdmissionReview<Pod>) -> AdmissionReview<DynamicObject> {
    let t0 = Instant::now();
    let req: AdmissionRequest<Pod> = match review.try_into() {
        Ok(req) => req,
        Err(e) => {
            warn!(error = %e, "admission review carries no request");
            counter!("admission_denied_total").increment(1);
            return AdmissionResponse::invalid(e.to_string()).into_review();
        }
    };
    let verdict = evaluate(placer, &req).await;
    match &verdict {
        Verdict::Allow { patches } if !patches.is_empty() => {
            counter!("admission_patched_total").increment(1);
        }
        Verdict::Allow { .. } => {}
        Verdict::Deny { .. } => {
            counter!("admission_denied_total").increment(1);
        }
    }
    let review = respond(&req, verdict);
    histogram!("admission_latency_ms").record(t0.elapsed().as_secs_f64() * 1000.0);
    review
}

async fn evaluate(placer: &Placer, req: &AdmissionRequest<Pod>) -> Verdict {
    if !matches!(req.operation, Operation::Create) {
        debug!(uid = %req.uid, op = ?req.operation, "not a create; passing through");
        return Verdict::Allow { patches: Vec::new() };
    }
    let Some(pod) = req.object.as_ref() else {
        warn!(uid = %req.uid, "admission request carries no pod object");
        return Verdict::Deny { reason: "admission request carries no Pod object".to_string() };
    };
    // generateName Pods arrive without a namespace; the request always has it.
    let mut pod = pod.clone();
    if pod.metadata.namespace.as_deref().map_or(true, str::is_empty) {
        pod.metadata.namespace = req.namespace.clone();
    }

    match placer.decide_and_patch(&pod).await {
        Ok(placement) => {
            info!(
                uid = %req.uid,
                ns = ?pod.metadata.namespace,
                pod = ?pod.metadata.name.as_deref().or(pod.metadata.generate_name.as_deref()),
                workload = %placement.workload,
                position = ?placement.availability.map(|a| a.position),
                capacity = ?placement.capacity,
                patches = placement.patches.len(),
                "pod placement decided"
            );
            Verdict::Allow { patches: placement.patches }
        }
        Err(e) => {
            warn!(uid = %req.uid, ns = ?pod.metadata.namespace, error = %e, "placement failed; denying pod");
            Verdict::Deny { reason: e.to_string() }
        }
    }
}

fn to_json_patch(patches: &[PatchOperation]) -> Result<json_patch::Patch, serde_json::Error> {
    serde_json::from_value(serde_json::to_value(patches)?)
}

/// Render `verdict` as the review answering `req`.
pub fn respond(req: &AdmissionRequest<Pod>, verdict: Verdict) -> AdmissionReview<DynamicObject> {
    let resp = AdmissionResponse::from(req);
    let resp = match verdict {
        Verdict::Allow { patches } if patches.is_empty() => resp,
        Verdict::Allow { patches } => match to_json_patch(&patches) {
            Ok(patch) => match resp.with_patch(patch) {
                Ok(r) => r,
                Err(e) => AdmissionResponse::from(req).deny(format!("encoding patch: {}", e)),
            },
            Err(e) => AdmissionResponse::from(req).deny(format!("encoding patch: {}", e)),
        },
        Verdict::Deny { reason } => resp.deny(reason),
    };
    resp.into_review()
}
