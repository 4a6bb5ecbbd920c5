//! dsched webhook – HTTPS front for the placement engine.
//!
//! `POST /mutate` answers AdmissionReview requests for Pod creation;
//! `GET /healthz` is for kubelet probes.

#![forbid(unsafe_code)]

use axum::{
    body::Bytes,
    extract::State,
    routing::{get, post},
    Json, Router,
};
use dsched_placement::Placer;
use kube::core::{admission::AdmissionReview, DynamicObject};

pub mod admission;
pub mod tls;

pub use admission::Verdict;

pub fn router(placer: Placer) -> Router {
    Router::new()
        .route("/mutate", post(mutate))
        .route("/healthz", get(healthz))
        .with_state(placer)
}

async fn mutate(State(placer): State<Placer>, body: Bytes) -> Json<AdmissionReview<DynamicObject>> {
    Json(admission::admit_bytes(&placer, &body).await)
}

async fn healthz() -> &'static str {
    "ok"
}
