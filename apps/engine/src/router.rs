// [apps/engine/src/router.rs]
//! The admin surface: doctor/status/metrics only. The request surface
//! that creates and manages labs is out of scope for this engine (see
//! SPEC_FULL.md) — it is expected to sit in front of `EngineHandle`
//! from a separate process or module this repo does not own.

use std::sync::Arc;

use axum::extract::State;
use axum::http::StatusCode;
use axum::response::IntoResponse;
use axum::routing::get;
use axum::{Json, Router};
use serde::Serialize;

use crate::doctor::{self, DoctorReport};
use crate::state::EngineState;

pub fn build(state: Arc<EngineState>) -> Router {
    Router::new()
        .route("/healthz", get(healthz))
        .route("/doctor", get(doctor_report))
        .route("/status", get(status))
        .with_state(state)
}

async fn healthz() -> impl IntoResponse {
    StatusCode::OK
}

async fn doctor_report(State(state): State<Arc<EngineState>>) -> impl IntoResponse {
    let report: DoctorReport = doctor::run(&state.config).await;
    let status = if report.is_healthy() { StatusCode::OK } else { StatusCode::SERVICE_UNAVAILABLE };
    (status, Json(report))
}

#[derive(Serialize)]
struct StatusSummary {
    non_terminal_labs: usize,
    runtime: String,
}

async fn status(State(state): State<Arc<EngineState>>) -> impl IntoResponse {
    let labs = state.repository.list_non_terminal().await.unwrap_or_default();
    Json(StatusSummary { non_terminal_labs: labs.len(), runtime: format!("{:?}", state.config.runtime) })
}
