use std::sync::Arc;

use axum::{
    extract::{Path, Query, State},
    http::StatusCode,
    response::IntoResponse,
    Json,
};
use serde::Deserialize;
use serde_json::{json, Map, Value};

use autofunnel_core::event::{Attribution, CanonicalEvent, TrackingContext};
use autofunnel_core::journey::EventType;
use autofunnel_core::store::JourneyStore;
use autofunnel_tracking::bootstrap;
use autofunnel_tracking::conversions::{ConversionPreset, ConversionRequest};
use autofunnel_tracking::SinkSelection;

use crate::{error::AppError, state::AppState};

const MAX_EVENT_NAME_LEN: usize = 200;

#[derive(Debug, Deserialize)]
pub struct CaptureSessionRequest {
    pub session_id: String,
    pub landing_url: String,
    #[serde(default)]
    pub referrer: Option<String>,
}

#[derive(Debug, Deserialize)]
pub struct SessionQuery {
    pub session_id: Option<String>,
}

#[derive(Debug, Deserialize)]
pub struct TrackEventRequest {
    pub event_type: EventType,
    pub event_name: String,
    #[serde(default)]
    pub metadata: Map<String, Value>,
    #[serde(flatten)]
    pub context: TrackingContext,
    /// Route the event with this journey's sink flags.
    #[serde(default)]
    pub journey_id: Option<String>,
    /// Explicit sink selection, ignored when `journey_id` is set.
    #[serde(default)]
    pub sinks: Option<SinkSelection>,
}

#[derive(Debug, Deserialize)]
pub struct ClickRequest {
    pub journey_id: String,
    pub step_order: u32,
    #[serde(flatten)]
    pub context: TrackingContext,
}

#[derive(Debug, Deserialize)]
pub struct PathQuery {
    pub path: Option<String>,
}

fn required_query(value: Option<String>, name: &str) -> Result<String, AppError> {
    value
        .map(|v| v.trim().to_string())
        .filter(|v| !v.is_empty())
        .ok_or_else(|| AppError::BadRequest(format!("{name} query parameter is required")))
}

/// `POST /api/tracking/session`: capture campaign attribution from the
/// landing URL. Only the first capture per session is kept.
#[tracing::instrument(skip(state, req))]
pub async fn capture_session(
    State(state): State<Arc<AppState>>,
    Json(req): Json<CaptureSessionRequest>,
) -> Result<impl IntoResponse, AppError> {
    let session_id = req.session_id.trim();
    if session_id.is_empty() {
        return Err(AppError::unprocessable("session_id", "session_id is required"));
    }
    let captured = match Attribution::from_landing_url(&req.landing_url, req.referrer.as_deref()) {
        Some(attribution) => state.attribution().capture(session_id, &attribution),
        None => false,
    };
    Ok(Json(json!({
        "data": {
            "session_id": session_id,
            "captured": captured,
            "attribution": state.attribution().load(session_id)
        }
    })))
}

/// `GET /api/tracking/session?session_id=`: source/medium/campaign with
/// direct-traffic fallbacks. `data` is `null` when nothing was captured.
#[tracing::instrument(skip(state))]
pub async fn session_summary(
    State(state): State<Arc<AppState>>,
    Query(query): Query<SessionQuery>,
) -> Result<impl IntoResponse, AppError> {
    let session_id = required_query(query.session_id, "session_id")?;
    Ok(Json(json!({ "data": state.attribution().utm_summary(&session_id) })))
}

/// `POST /api/tracking/events`: forward one event to the enabled sinks.
///
/// Sink failures never fail the request; they are listed in the report.
#[tracing::instrument(skip(state, req))]
pub async fn track_event(
    State(state): State<Arc<AppState>>,
    Json(req): Json<TrackEventRequest>,
) -> Result<impl IntoResponse, AppError> {
    let event_name = req.event_name.trim();
    if event_name.is_empty() {
        return Err(AppError::unprocessable("event_name", "event_name is required"));
    }
    if event_name.len() > MAX_EVENT_NAME_LEN {
        return Err(AppError::unprocessable(
            "event_name",
            format!("event_name must be at most {MAX_EVENT_NAME_LEN} characters"),
        ));
    }

    let mut metadata = req.metadata;
    let selection = match req.journey_id.as_deref() {
        Some(journey_id) => {
            let journey = state
                .db
                .get_journey(journey_id)
                .await?
                .ok_or_else(|| AppError::NotFound(format!("journey {journey_id} not found")))?;
            metadata
                .entry("journeyId")
                .or_insert_with(|| journey.id.clone().into());
            SinkSelection::for_journey(&journey)
        }
        None => req.sinks.unwrap_or_default(),
    };

    let event = CanonicalEvent {
        event_type: req.event_type,
        event_name: event_name.to_string(),
        metadata,
    };
    let report = state.forwarder.forward(&event, &req.context, selection).await;
    Ok((StatusCode::ACCEPTED, Json(json!({ "data": report }))))
}

/// `POST /api/tracking/click`: report a click on a registered
/// `button_click` step. The event and sink flags come from the registry.
#[tracing::instrument(skip(state, req))]
pub async fn track_click(
    State(state): State<Arc<AppState>>,
    Json(req): Json<ClickRequest>,
) -> Result<impl IntoResponse, AppError> {
    let binding = state
        .registry
        .click_binding(&req.journey_id, req.step_order)
        .ok_or_else(|| {
            AppError::NotFound(format!(
                "no click binding for journey {} step {}",
                req.journey_id, req.step_order
            ))
        })?;
    let report = state
        .forwarder
        .forward(&binding.event, &req.context, binding.selection)
        .await;
    Ok((StatusCode::ACCEPTED, Json(json!({ "data": report }))))
}

/// `POST /api/tracking/conversions/{preset}`: one of the named conversion
/// helpers. Some presets emit more than one event.
#[tracing::instrument(skip(state, req))]
pub async fn track_conversion(
    State(state): State<Arc<AppState>>,
    Path(preset): Path<String>,
    Json(req): Json<ConversionRequest>,
) -> Result<impl IntoResponse, AppError> {
    let preset: ConversionPreset = preset.parse()?;
    let reports = state.conversions.track(preset, req).await?;
    Ok((StatusCode::ACCEPTED, Json(json!({ "data": reports }))))
}

#[tracing::instrument(skip(state))]
pub async fn registry(State(state): State<Arc<AppState>>) -> impl IntoResponse {
    Json(json!({
        "data": {
            "journeys": state.registry.registered_journeys(),
            "page_events": state.registry.page_events(),
            "form_handlers": state.registry.form_handlers(),
            "click_bindings": state.registry.click_bindings()
        }
    }))
}

/// `POST /api/tracking/reinitialize`: clear the registry and register every
/// active auto-tracked journey again.
#[tracing::instrument(skip(state))]
pub async fn reinitialize(State(state): State<Arc<AppState>>) -> impl IntoResponse {
    let registered = bootstrap::reinitialize(&*state.db, &state.registry).await;
    Json(json!({ "data": { "registered": registered } }))
}

/// `GET /api/tracking/page-event?path=`: the page-view event for a path,
/// exact route first, then patterns.
#[tracing::instrument(skip(state))]
pub async fn page_event(
    State(state): State<Arc<AppState>>,
    Query(query): Query<PathQuery>,
) -> Result<impl IntoResponse, AppError> {
    let path = required_query(query.path, "path")?;
    Ok(Json(json!({ "data": state.registry.page_event_for(&path) })))
}

#[tracing::instrument(skip(state))]
pub async fn form_handler(
    State(state): State<Arc<AppState>>,
    Query(query): Query<PathQuery>,
) -> Result<impl IntoResponse, AppError> {
    let path = required_query(query.path, "path")?;
    Ok(Json(json!({ "data": state.registry.form_handler_for(&path) })))
}

/// `GET /api/tracking/data-layer`: records pushed to the in-process data layer.
#[tracing::instrument(skip(state))]
pub async fn data_layer(State(state): State<Arc<AppState>>) -> impl IntoResponse {
    Json(json!({
        "data": {
            "container_id": state.data_layer.container_id(),
            "records": state.data_layer.records()
        }
    }))
}

/// `GET /api/tracking/pixel-calls`: queued pixel calls. Empty when calls are
/// posted to a collector instead.
#[tracing::instrument(skip(state))]
pub async fn pixel_calls(State(state): State<Arc<AppState>>) -> impl IntoResponse {
    Json(json!({ "data": state.pixel.calls() }))
}
