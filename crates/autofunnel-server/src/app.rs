use std::sync::Arc;

use axum::{
    http::HeaderValue,
    routing::{get, post},
    Router,
};
use tower_http::{
    compression::CompressionLayer,
    cors::{AllowOrigin, Any, CorsLayer},
    trace::TraceLayer,
};

use crate::{routes, state::AppState};

fn cors_layer(origins: &[String]) -> CorsLayer {
    let allowed: Vec<HeaderValue> = origins
        .iter()
        .filter_map(|o| o.trim().parse().ok())
        .collect();
    let layer = CorsLayer::new().allow_methods(Any).allow_headers(Any);
    if allowed.is_empty() {
        layer.allow_origin(Any)
    } else {
        layer.allow_origin(AllowOrigin::list(allowed))
    }
}

/// Construct the Axum [`Router`] with all routes and middleware attached.
///
/// Middleware is applied in outer-to-inner order (outermost runs first on
/// request, last on response):
///
/// 1. `CorsLayer`: origins from `AUTOFUNNEL_CORS_ORIGINS`, any when unset.
/// 2. `CompressionLayer`: gzip for the export downloads.
/// 3. `TraceLayer`: structured request/response logging via `tracing`.
pub fn build_app(state: Arc<AppState>) -> Router {
    let cors = cors_layer(&state.config.cors_origins);
    Router::new()
        .route("/health", get(routes::health::health))
        // Journeys
        .route(
            "/api/journeys",
            get(routes::journeys::list_journeys).post(routes::journeys::create_journey),
        )
        .route("/api/journeys/active", get(routes::journeys::list_active_journeys))
        .route("/api/journeys/by-route", get(routes::journeys::get_journey_by_route))
        .route(
            "/api/journeys/{journey_id}",
            get(routes::journeys::get_journey)
                .put(routes::journeys::update_journey)
                .delete(routes::journeys::delete_journey),
        )
        .route(
            "/api/journeys/{journey_id}/toggle",
            post(routes::journeys::toggle_journey),
        )
        .route(
            "/api/journeys/{journey_id}/activate",
            post(routes::journeys::activate_journey),
        )
        .route(
            "/api/journeys/{journey_id}/export/gtm",
            get(routes::journeys::export_gtm),
        )
        .route(
            "/api/journeys/{journey_id}/export/events",
            get(routes::journeys::export_events),
        )
        .route(
            "/api/journeys/{journey_id}/funnel",
            get(routes::journeys::journey_funnel),
        )
        // Tracking
        .route(
            "/api/tracking/session",
            get(routes::tracking::session_summary).post(routes::tracking::capture_session),
        )
        .route("/api/tracking/events", post(routes::tracking::track_event))
        .route("/api/tracking/click", post(routes::tracking::track_click))
        .route(
            "/api/tracking/conversions/{preset}",
            post(routes::tracking::track_conversion),
        )
        .route("/api/tracking/registry", get(routes::tracking::registry))
        .route(
            "/api/tracking/reinitialize",
            post(routes::tracking::reinitialize),
        )
        .route("/api/tracking/page-event", get(routes::tracking::page_event))
        .route("/api/tracking/form-handler", get(routes::tracking::form_handler))
        .route("/api/tracking/data-layer", get(routes::tracking::data_layer))
        .route("/api/tracking/pixel-calls", get(routes::tracking::pixel_calls))
        .layer(TraceLayer::new_for_http())
        .layer(CompressionLayer::new())
        .layer(cors)
        .with_state(state)
}
