use std::sync::Arc;

use axum::{
    extract::{Path, Query, State},
    http::{header, StatusCode},
    response::IntoResponse,
    Json,
};
use serde::Deserialize;
use serde_json::json;

use autofunnel_core::funnel::compute_journey_funnel;
use autofunnel_core::gtm_export::{export_file_name, export_journey_events, export_journey_to_gtm};
use autofunnel_core::journey::{CreateJourneyRequest, Journey, JourneyUpdate};
use autofunnel_core::store::{JourneyStore, TrackingEventStore};

use crate::{error::AppError, state::AppState};

#[derive(Debug, Deserialize)]
pub struct ByRouteQuery {
    pub route: Option<String>,
}

async fn require_journey(state: &AppState, journey_id: &str) -> Result<Journey, AppError> {
    state
        .db
        .get_journey(journey_id)
        .await?
        .ok_or_else(|| AppError::NotFound(format!("journey {journey_id} not found")))
}

fn attachment(file_name: &str) -> String {
    format!("attachment; filename=\"{file_name}\"")
}

/// `GET /api/journeys`: every journey with steps, newest first.
#[tracing::instrument(skip(state))]
pub async fn list_journeys(
    State(state): State<Arc<AppState>>,
) -> Result<impl IntoResponse, AppError> {
    let journeys = state.db.list_journeys().await?;
    Ok(Json(json!({ "data": journeys })))
}

/// `GET /api/journeys/active`
#[tracing::instrument(skip(state))]
pub async fn list_active_journeys(
    State(state): State<Arc<AppState>>,
) -> Result<impl IntoResponse, AppError> {
    let journeys = state.db.list_active_journeys().await?;
    Ok(Json(json!({ "data": journeys })))
}

/// `GET /api/journeys/by-route?route=/path`: the active journey bound to an
/// exact route. `data` is `null` when none is.
#[tracing::instrument(skip(state))]
pub async fn get_journey_by_route(
    State(state): State<Arc<AppState>>,
    Query(query): Query<ByRouteQuery>,
) -> Result<impl IntoResponse, AppError> {
    let route = query
        .route
        .as_deref()
        .map(str::trim)
        .filter(|r| !r.is_empty())
        .ok_or_else(|| AppError::BadRequest("route query parameter is required".to_string()))?;
    let journey = state.db.get_journey_by_route(route).await?;
    Ok(Json(json!({ "data": journey })))
}

#[tracing::instrument(skip(state))]
pub async fn get_journey(
    State(state): State<Arc<AppState>>,
    Path(journey_id): Path<String>,
) -> Result<impl IntoResponse, AppError> {
    let journey = require_journey(&state, &journey_id).await?;
    Ok(Json(json!({ "data": journey })))
}

/// `POST /api/journeys`: create a journey with its steps in one write.
/// Step orders are normalized to `1..=n` before storage.
#[tracing::instrument(skip(state, req))]
pub async fn create_journey(
    State(state): State<Arc<AppState>>,
    Json(req): Json<CreateJourneyRequest>,
) -> Result<impl IntoResponse, AppError> {
    let journey = state.db.create_journey(req.journey, req.steps).await?;
    state.sync_registration(&journey);
    Ok((StatusCode::CREATED, Json(json!({ "data": journey }))))
}

/// `PUT /api/journeys/{id}`: partial update. A `steps` array replaces the
/// whole step list.
#[tracing::instrument(skip(state, req))]
pub async fn update_journey(
    State(state): State<Arc<AppState>>,
    Path(journey_id): Path<String>,
    Json(req): Json<JourneyUpdate>,
) -> Result<impl IntoResponse, AppError> {
    let journey = state
        .db
        .update_journey(&journey_id, req)
        .await?
        .ok_or_else(|| AppError::NotFound(format!("journey {journey_id} not found")))?;
    state.sync_registration(&journey);
    Ok(Json(json!({ "data": journey })))
}

/// `DELETE /api/journeys/{id}`: removes the journey and its steps.
/// Already-attached click listeners keep firing until the page reloads.
#[tracing::instrument(skip(state))]
pub async fn delete_journey(
    State(state): State<Arc<AppState>>,
    Path(journey_id): Path<String>,
) -> Result<impl IntoResponse, AppError> {
    if !state.db.delete_journey(&journey_id).await? {
        return Err(AppError::NotFound(format!("journey {journey_id} not found")));
    }
    state.registry.unregister(&journey_id);
    Ok(StatusCode::NO_CONTENT)
}

/// `POST /api/journeys/{id}/toggle`: active <-> paused.
#[tracing::instrument(skip(state))]
pub async fn toggle_journey(
    State(state): State<Arc<AppState>>,
    Path(journey_id): Path<String>,
) -> Result<impl IntoResponse, AppError> {
    let journey = state
        .db
        .toggle_journey_status(&journey_id)
        .await?
        .ok_or_else(|| AppError::NotFound(format!("journey {journey_id} not found")))?;
    state.sync_registration(&journey);
    Ok(Json(json!({ "data": journey })))
}

#[tracing::instrument(skip(state))]
pub async fn activate_journey(
    State(state): State<Arc<AppState>>,
    Path(journey_id): Path<String>,
) -> Result<impl IntoResponse, AppError> {
    let journey = state
        .db
        .activate_journey(&journey_id)
        .await?
        .ok_or_else(|| AppError::NotFound(format!("journey {journey_id} not found")))?;
    state.sync_registration(&journey);
    Ok(Json(json!({ "data": journey })))
}

/// `GET /api/journeys/{id}/export/gtm`: a Tag Manager container import file.
#[tracing::instrument(skip(state))]
pub async fn export_gtm(
    State(state): State<Arc<AppState>>,
    Path(journey_id): Path<String>,
) -> Result<impl IntoResponse, AppError> {
    let journey = require_journey(&state, &journey_id).await?;
    let now = chrono::Utc::now();
    let export = export_journey_to_gtm(&journey, now);
    let file_name = export_file_name("gtm", &journey, now);
    Ok((
        [(header::CONTENT_DISPOSITION, attachment(&file_name))],
        Json(export),
    ))
}

/// `GET /api/journeys/{id}/export/events`: the event catalogue for a journey.
#[tracing::instrument(skip(state))]
pub async fn export_events(
    State(state): State<Arc<AppState>>,
    Path(journey_id): Path<String>,
) -> Result<impl IntoResponse, AppError> {
    let journey = require_journey(&state, &journey_id).await?;
    let file_name = export_file_name("events", &journey, chrono::Utc::now());
    Ok((
        [(header::CONTENT_DISPOSITION, attachment(&file_name))],
        Json(export_journey_events(&journey)),
    ))
}

/// `GET /api/journeys/{id}/funnel`: distinct actors reaching each step,
/// computed from the tracking-event ledger.
#[tracing::instrument(skip(state))]
pub async fn journey_funnel(
    State(state): State<Arc<AppState>>,
    Path(journey_id): Path<String>,
) -> Result<impl IntoResponse, AppError> {
    let journey = require_journey(&state, &journey_id).await?;
    let reach = state.db.journey_step_reach(&journey_id).await?;
    let stages = compute_journey_funnel(&journey.steps, &reach);
    Ok(Json(json!({
        "data": {
            "journey_id": journey.id,
            "journey_name": journey.name,
            "steps": stages
        }
    })))
}
