//! A minimal HTTP control plane over the monitoring engine. This
//! module just exists so the store's public API can be exercised
//! end-to-end. Request parsing, JSON encoding, CORS, and API-key auth
//! are treated elsewhere as a thin external collaborator; this router
//! is a deliberately small stand-in for that layer, not a
//! reimplementation of its full surface.

use std::path::PathBuf;
use std::sync::Arc;

use axum::extract::{Path as AxumPath, Query, State};
use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};
use axum::routing::{get, post};
use axum::{Json, Router};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::model::{Incident, IncidentPolicy, Service, Silence};
use crate::store::Store;

#[derive(Clone)]
pub struct AppState {
    pub store: Arc<Store>,
    pub snapshot_path: PathBuf,
}

pub fn router(state: AppState) -> Router {
    Router::new()
        .route("/ping", get(ping))
        .route("/status", get(get_statuses))
        .route("/services", post(add_service))
        .route(
            "/services/:id",
            axum::routing::put(update_service).delete(remove_service),
        )
        .route("/services/:id/history", get(get_history))
        .route("/services/:id/incidents", get(get_incidents))
        .route("/services/:id/analytics", get(get_analytics))
        .route("/services/:id/slo", get(get_slo_report))
        .route(
            "/services/:id/slo-target",
            get(get_slo_target).put(set_slo_target),
        )
        .route("/incidents/open", get(list_open_incidents))
        .route("/policy", get(get_policy).put(set_policy))
        .route(
            "/silences",
            get(list_silences).post(create_silence),
        )
        .route("/silences/:id", axum::routing::delete(delete_silence))
        .with_state(state)
}

async fn ping() -> &'static str {
    "ok"
}

fn persist(state: &AppState) {
    if let Err(err) = crate::save_snapshot(&state.store, &state.snapshot_path) {
        tracing::error!(error = %err, "failed to persist snapshot");
    }
}

async fn get_statuses(State(state): State<AppState>) -> Json<Vec<crate::model::StatusResult>> {
    Json(state.store.get_statuses())
}

async fn add_service(
    State(state): State<AppState>,
    Json(service): Json<Service>,
) -> Response {
    let id = state.store.add_service(service);
    persist(&state);
    (StatusCode::CREATED, Json(serde_json::json!({ "id": id }))).into_response()
}

async fn update_service(
    State(state): State<AppState>,
    AxumPath(id): AxumPath<u64>,
    Json(service): Json<Service>,
) -> Response {
    match state.store.update_service(id, service) {
        Ok(()) => {
            persist(&state);
            StatusCode::NO_CONTENT.into_response()
        }
        Err(err) => (StatusCode::NOT_FOUND, err.to_string()).into_response(),
    }
}

async fn remove_service(State(state): State<AppState>, AxumPath(id): AxumPath<u64>) -> Response {
    state.store.remove_service(id);
    persist(&state);
    StatusCode::NO_CONTENT.into_response()
}

async fn get_history(
    State(state): State<AppState>,
    AxumPath(id): AxumPath<u64>,
) -> Response {
    let (history, found) = state.store.get_history(id);
    if !found {
        return StatusCode::NOT_FOUND.into_response();
    }
    Json(history).into_response()
}

#[derive(Debug, Deserialize)]
struct IncidentFilter {
    #[serde(rename = "openOnly", default)]
    open_only: bool,
    since: Option<DateTime<Utc>>,
    limit: Option<usize>,
}

const DEFAULT_INCIDENT_LIMIT: usize = 500;
const MAX_INCIDENT_LIMIT: usize = 5000;

/// Keeps an incident if it started at or after `since`, or is still
/// open, or ended at or after `since`: anything that could overlap the
/// window.
fn overlaps_since(incident: &Incident, since: DateTime<Utc>) -> bool {
    incident.started_at >= since
        || incident.ended_at.is_none()
        || incident.ended_at.is_some_and(|e| e >= since)
}

async fn get_incidents(
    State(state): State<AppState>,
    AxumPath(id): AxumPath<u64>,
    Query(filter): Query<IncidentFilter>,
) -> Response {
    let (mut incidents, found) = state.store.get_incidents(id);
    if !found {
        return StatusCode::NOT_FOUND.into_response();
    }
    if filter.open_only {
        incidents.retain(|i| i.is_open());
    }
    if let Some(since) = filter.since {
        incidents.retain(|i| overlaps_since(i, since));
    }
    let limit = filter
        .limit
        .unwrap_or(DEFAULT_INCIDENT_LIMIT)
        .min(MAX_INCIDENT_LIMIT);
    incidents.truncate(limit);
    Json(incidents).into_response()
}

async fn list_open_incidents(State(state): State<AppState>) -> Json<Vec<Incident>> {
    Json(state.store.list_open_incidents())
}

#[derive(Debug, Deserialize)]
struct HoursQuery {
    #[serde(default = "default_hours")]
    hours: u64,
}

fn default_hours() -> u64 {
    24
}

async fn get_analytics(
    State(state): State<AppState>,
    AxumPath(id): AxumPath<u64>,
    Query(q): Query<HoursQuery>,
) -> Json<crate::analytics::Analytics> {
    Json(state.store.compute_analytics(id, q.hours))
}

async fn get_slo_report(
    State(state): State<AppState>,
    AxumPath(id): AxumPath<u64>,
    Query(q): Query<HoursQuery>,
) -> Json<crate::analytics::SloReport> {
    Json(state.store.compute_slo_report(id, q.hours))
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
struct SloTargetResponse {
    service_id: u64,
    slo_target: f64,
}

async fn get_slo_target(
    State(state): State<AppState>,
    AxumPath(id): AxumPath<u64>,
) -> Response {
    if !state.store.has_service(id) {
        return StatusCode::NOT_FOUND.into_response();
    }
    Json(SloTargetResponse {
        service_id: id,
        slo_target: state.store.get_service_slo_target(id),
    })
    .into_response()
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct SetSloTargetRequest {
    slo_target: f64,
}

async fn set_slo_target(
    State(state): State<AppState>,
    AxumPath(id): AxumPath<u64>,
    Json(req): Json<SetSloTargetRequest>,
) -> Response {
    match state.store.set_service_slo_target(id, req.slo_target) {
        Ok(()) => {
            persist(&state);
            StatusCode::NO_CONTENT.into_response()
        }
        Err(err) => (StatusCode::NOT_FOUND, err.to_string()).into_response(),
    }
}

async fn get_policy(State(state): State<AppState>) -> Json<IncidentPolicy> {
    Json(state.store.get_policy())
}

async fn set_policy(State(state): State<AppState>, Json(policy): Json<IncidentPolicy>) -> Response {
    state.store.set_policy(policy);
    persist(&state);
    StatusCode::NO_CONTENT.into_response()
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct NewSilenceRequest {
    service_id: Option<u64>,
    tag: Option<String>,
    until: DateTime<Utc>,
    #[serde(default)]
    reason: String,
}

#[derive(Debug, Serialize)]
struct SilenceResponse {
    silence: Silence,
}

async fn list_silences(State(state): State<AppState>) -> Json<Vec<Silence>> {
    Json(state.store.list_silences())
}

async fn create_silence(
    State(state): State<AppState>,
    Json(req): Json<NewSilenceRequest>,
) -> Response {
    let silence = state
        .store
        .new_silence(req.service_id, req.tag, req.until, req.reason);
    persist(&state);
    (StatusCode::CREATED, Json(SilenceResponse { silence })).into_response()
}

async fn delete_silence(State(state): State<AppState>, AxumPath(id): AxumPath<u64>) -> Response {
    if state.store.delete_silence(id) {
        persist(&state);
        StatusCode::NO_CONTENT.into_response()
    } else {
        StatusCode::NOT_FOUND.into_response()
    }
}
