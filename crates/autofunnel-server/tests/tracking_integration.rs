use std::sync::Arc;

use axum::body::Body;
use axum::http::{Request, StatusCode};
use http_body_util::BodyExt;
use serde_json::{json, Value};
use tower::ServiceExt;

use autofunnel_core::config::{Config, SessionConfig, SinkConfig};
use autofunnel_core::journey::{JourneyStatus, NewJourney, NewStep, TriggerType};
use autofunnel_core::store::{JourneyStore, TrackingEventStore};
use autofunnel_duckdb::DuckDbBackend;
use autofunnel_server::app::build_app;
use autofunnel_server::state::AppState;

fn config(sinks: SinkConfig) -> Config {
    Config {
        port: 0,
        data_dir: "/tmp/autofunnel-test".to_string(),
        duckdb_memory_limit: "1GB".to_string(),
        cors_origins: vec![],
        registration_delay_ms: 0,
        sinks,
        sessions: SessionConfig::default(),
    }
}

async fn setup_with(sinks: SinkConfig) -> (Arc<AppState>, axum::Router) {
    let db = DuckDbBackend::open_in_memory().expect("in-memory DuckDB");
    let state = Arc::new(AppState::new(db, config(sinks)).expect("app state"));
    let app = build_app(Arc::clone(&state));
    (state, app)
}

async fn setup() -> (Arc<AppState>, axum::Router) {
    setup_with(SinkConfig {
        gtm_container_id: Some("GTM-TEST".to_string()),
        ..SinkConfig::default()
    })
    .await
}

async fn json_body(response: axum::http::Response<Body>) -> Value {
    let bytes = response
        .into_body()
        .collect()
        .await
        .expect("read body")
        .to_bytes();
    serde_json::from_slice(&bytes).expect("parse JSON")
}

async fn get(app: &axum::Router, uri: &str) -> axum::http::Response<Body> {
    let request = Request::builder()
        .uri(uri)
        .body(Body::empty())
        .expect("build request");
    app.clone().oneshot(request).await.expect("request")
}

async fn post(app: &axum::Router, uri: &str, body: Value) -> axum::http::Response<Body> {
    let request = Request::builder()
        .method("POST")
        .uri(uri)
        .header("content-type", "application/json")
        .body(Body::from(body.to_string()))
        .expect("build request");
    app.clone().oneshot(request).await.expect("request")
}

#[tokio::test]
async fn health_reports_registered_journeys() {
    let (_state, app) = setup().await;
    let response = get(&app, "/health").await;
    assert_eq!(response.status(), StatusCode::OK);
    let body = json_body(response).await;
    assert_eq!(body["status"], "ok");
    assert_eq!(body["registered_journeys"], 0);
}

#[tokio::test]
async fn first_attribution_capture_wins() {
    let (_state, app) = setup().await;

    let response = post(
        &app,
        "/api/tracking/session",
        json!({
            "session_id": "sess-1",
            "landing_url": "https://example.com/financiamientos?utm_source=facebook&utm_medium=cpc&utm_campaign=spring&fbclid=abc"
        }),
    )
    .await;
    assert_eq!(response.status(), StatusCode::OK);
    let body = json_body(response).await;
    assert_eq!(body["data"]["captured"], true);
    assert_eq!(body["data"]["attribution"]["fbclid"], "abc");

    let body = json_body(
        post(
            &app,
            "/api/tracking/session",
            json!({
                "session_id": "sess-1",
                "landing_url": "https://example.com/?utm_source=google"
            }),
        )
        .await,
    )
    .await;
    assert_eq!(body["data"]["captured"], false);

    let summary = json_body(get(&app, "/api/tracking/session?session_id=sess-1").await).await;
    assert_eq!(
        summary["data"],
        json!({ "source": "facebook", "medium": "cpc", "campaign": "spring" })
    );

    let unknown = json_body(get(&app, "/api/tracking/session?session_id=nobody").await).await;
    assert!(unknown["data"].is_null());
}

#[tokio::test]
async fn session_capture_requires_session_id() {
    let (_state, app) = setup().await;
    let response = post(
        &app,
        "/api/tracking/session",
        json!({ "session_id": " ", "landing_url": "https://example.com/" }),
    )
    .await;
    assert_eq!(response.status(), StatusCode::UNPROCESSABLE_ENTITY);
    assert_eq!(json_body(response).await["error"]["field"], "session_id");
}

#[tokio::test]
async fn events_reach_every_sink_with_attribution() {
    let (_state, app) = setup().await;
    post(
        &app,
        "/api/tracking/session",
        json!({
            "session_id": "sess-2",
            "landing_url": "https://example.com/?utm_source=google&gclid=g-1"
        }),
    )
    .await;

    let response = post(
        &app,
        "/api/tracking/events",
        json!({
            "event_type": "Lead",
            "event_name": "Lead Captured",
            "session_id": "sess-2",
            "page_url": "https://example.com/financiamientos",
            "metadata": { "formName": "contact" }
        }),
    )
    .await;
    assert_eq!(response.status(), StatusCode::ACCEPTED);
    let report = json_body(response).await["data"].clone();
    assert_eq!(report["delivered"], json!(["data_layer", "pixel", "event_log"]));
    assert_eq!(report["failed"], json!([]));

    let data_layer = json_body(get(&app, "/api/tracking/data-layer").await).await;
    assert_eq!(data_layer["data"]["container_id"], "GTM-TEST");
    let record = &data_layer["data"]["records"][0];
    assert_eq!(record["event"], "lead_captured");
    assert_eq!(record["utm_source"], "google");
    assert_eq!(record["formName"], "contact");

    let pixel = json_body(get(&app, "/api/tracking/pixel-calls").await).await;
    let call = &pixel["data"][0];
    assert_eq!(call["action"], "track");
    assert_eq!(call["event"], "Lead");
    assert_eq!(call["payload"]["gclid"], "g-1");
}

#[tokio::test]
async fn events_honour_explicit_sink_selection() {
    let (_state, app) = setup().await;
    let response = post(
        &app,
        "/api/tracking/events",
        json!({
            "event_type": "ViewContent",
            "event_name": "View vehicle",
            "session_id": "sess-3",
            "sinks": { "pixel": false }
        }),
    )
    .await;
    let report = json_body(response).await["data"].clone();
    assert_eq!(report["skipped"], json!(["pixel"]));
    assert_eq!(report["delivered"], json!(["data_layer", "event_log"]));

    let pixel = json_body(get(&app, "/api/tracking/pixel-calls").await).await;
    assert_eq!(pixel["data"], json!([]));
}

#[tokio::test]
async fn disabled_sinks_are_never_built() {
    let (state, app) = setup_with(SinkConfig {
        pixel_enabled: false,
        ..SinkConfig::default()
    })
    .await;
    assert_eq!(state.forwarder.sink_names(), vec!["data_layer", "event_log"]);

    let response = post(
        &app,
        "/api/tracking/events",
        json!({ "event_type": "Lead", "event_name": "Lead", "session_id": "s" }),
    )
    .await;
    let report = json_body(response).await["data"].clone();
    assert_eq!(report["delivered"], json!(["data_layer", "event_log"]));
}

#[tokio::test]
async fn events_without_session_get_one_generated() {
    let (_state, app) = setup().await;
    let response = post(
        &app,
        "/api/tracking/events",
        json!({ "event_type": "PageView", "event_name": "Home" }),
    )
    .await;
    let report = json_body(response).await["data"].clone();
    assert!(!report["session_id"].as_str().expect("session id").is_empty());
}

#[tokio::test]
async fn events_reject_blank_names() {
    let (_state, app) = setup().await;
    let response = post(
        &app,
        "/api/tracking/events",
        json!({ "event_type": "Lead", "event_name": "  ", "session_id": "s" }),
    )
    .await;
    assert_eq!(response.status(), StatusCode::UNPROCESSABLE_ENTITY);
    assert_eq!(json_body(response).await["error"]["field"], "event_name");
}

#[tokio::test]
async fn unknown_preset_is_not_found() {
    let (_state, app) = setup().await;
    let response = post(&app, "/api/tracking/conversions/checkout", json!({})).await;
    assert_eq!(response.status(), StatusCode::NOT_FOUND);
}

#[tokio::test]
async fn application_submission_needs_a_user() {
    let (_state, app) = setup().await;
    let response = post(
        &app,
        "/api/tracking/conversions/application-submitted",
        json!({ "session_id": "s" }),
    )
    .await;
    assert_eq!(response.status(), StatusCode::UNPROCESSABLE_ENTITY);
    assert_eq!(json_body(response).await["error"]["field"], "user_id");
}

#[tokio::test]
async fn lead_complete_follows_a_landing_page_conversion() {
    let (_state, app) = setup().await;
    let submit = json!({
        "session_id": "s-9",
        "user_id": "user-9",
        "metadata": { "vehiclePrice": 350000 }
    });

    let reports = json_body(
        post(&app, "/api/tracking/conversions/application-submitted", submit.clone()).await,
    )
    .await;
    assert_eq!(reports["data"].as_array().expect("reports").len(), 1);

    let response = post(
        &app,
        "/api/tracking/conversions/landing-page",
        json!({ "session_id": "s-9", "user_id": "user-9" }),
    )
    .await;
    assert_eq!(response.status(), StatusCode::ACCEPTED);

    let reports = json_body(
        post(&app, "/api/tracking/conversions/application-submitted", submit).await,
    )
    .await;
    let reports = reports["data"].as_array().expect("reports");
    assert_eq!(reports.len(), 2);
    assert_eq!(reports[0]["event_type"], "ApplicationSubmission");
    assert_eq!(reports[1]["event_type"], "LeadComplete");
}

#[tokio::test]
async fn click_without_binding_is_not_found() {
    let (_state, app) = setup().await;
    let response = post(
        &app,
        "/api/tracking/click",
        json!({ "journey_id": "jrn_missing", "step_order": 1, "session_id": "s" }),
    )
    .await;
    assert_eq!(response.status(), StatusCode::NOT_FOUND);
}

#[tokio::test]
async fn click_on_registered_button_reaches_data_layer_and_ledger() {
    let (state, app) = setup().await;

    let response = post(
        &app,
        "/api/journeys",
        json!({
            "name": "Financiamientos",
            "route": "/financiamientos",
            "steps": [
                {
                    "step_name": "Landing viewed",
                    "page_route": "/financiamientos",
                    "event_type": "PageView",
                    "event_name": "Landing Viewed"
                },
                {
                    "step_name": "Apply clicked",
                    "page_route": "/financiamientos",
                    "event_type": "ConversionLandingPage",
                    "event_name": "Apply Clicked",
                    "trigger_type": "button_click",
                    "button_identifier_type": "css_id",
                    "button_identifier": "#apply-now"
                }
            ]
        }),
    )
    .await;
    assert_eq!(response.status(), StatusCode::CREATED);
    let id = json_body(response).await["data"]["id"]
        .as_str()
        .expect("id")
        .to_string();
    let response = post(&app, &format!("/api/journeys/{id}/activate"), json!({})).await;
    assert_eq!(response.status(), StatusCode::OK);

    let response = post(
        &app,
        "/api/tracking/click",
        json!({
            "journey_id": id,
            "step_order": 2,
            "session_id": "sess-click",
            "user_id": "user-7",
            "page_url": "https://example.com/financiamientos"
        }),
    )
    .await;
    assert_eq!(response.status(), StatusCode::ACCEPTED);
    let report = json_body(response).await["data"].clone();
    assert_eq!(report["delivered"], json!(["data_layer", "pixel", "event_log"]));

    let data_layer = json_body(get(&app, "/api/tracking/data-layer").await).await;
    let records = data_layer["data"]["records"].as_array().expect("records");
    assert_eq!(records.len(), 1);
    let record = &records[0];
    assert_eq!(record["eventName"], "Apply Clicked");
    assert_eq!(record["eventType"], "ConversionLandingPage");
    assert_eq!(record["journeyId"], id.as_str());
    assert_eq!(record["journeyName"], "Financiamientos");
    assert_eq!(record["stepName"], "Apply clicked");
    assert_eq!(record["stepOrder"], 2);

    assert!(state
        .db
        .has_tracking_event("user-7", "ConversionLandingPage")
        .await
        .expect("lookup"));
    let reach = state.db.journey_step_reach(&id).await.expect("reach");
    assert_eq!(reach.len(), 1);
    assert_eq!(reach[0].actor_id, "user-7");
    assert_eq!(reach[0].step_order, 2);
}

#[tokio::test]
async fn inspection_queues_keep_only_the_configured_number_of_entries() {
    let (_state, app) = setup_with(SinkConfig {
        queue_capacity: 2,
        ..SinkConfig::default()
    })
    .await;

    for name in ["First", "Second", "Third"] {
        let response = post(
            &app,
            "/api/tracking/events",
            json!({ "event_type": "Lead", "event_name": name, "session_id": "s" }),
        )
        .await;
        assert_eq!(response.status(), StatusCode::ACCEPTED);
    }

    let data_layer = json_body(get(&app, "/api/tracking/data-layer").await).await;
    let names: Vec<&str> = data_layer["data"]["records"]
        .as_array()
        .expect("records")
        .iter()
        .filter_map(|r| r["eventName"].as_str())
        .collect();
    assert_eq!(names, vec!["Second", "Third"]);

    let pixel = json_body(get(&app, "/api/tracking/pixel-calls").await).await;
    let names: Vec<&str> = pixel["data"]
        .as_array()
        .expect("calls")
        .iter()
        .filter_map(|c| c["payload"]["content_name"].as_str())
        .collect();
    assert_eq!(names, vec!["Second", "Third"]);
}

#[tokio::test]
async fn reinitialize_registers_active_auto_tracked_journeys() {
    let (state, app) = setup().await;

    let mut tracked = NewJourney::new("Tracked", "/autos");
    tracked.status = Some(JourneyStatus::Active);
    state
        .db
        .create_journey(
            tracked,
            vec![
                NewStep::pageview("Catalog", "/autos/:id", "ViewContent".into(), "Vehicle Viewed"),
                NewStep::pageview("Apply", "/autos/:id/solicitar", "Lead".into(), "Vehicle Lead")
                    .with_trigger(TriggerType::FormSubmit),
            ],
        )
        .await
        .expect("create tracked");

    let mut manual = NewJourney::new("Manual", "/manual");
    manual.status = Some(JourneyStatus::Active);
    manual.auto_tracking_enabled = Some(false);
    state
        .db
        .create_journey(
            manual,
            vec![NewStep::pageview("Manual", "/manual", "PageView".into(), "Manual View")],
        )
        .await
        .expect("create manual");

    let body = json_body(post(&app, "/api/tracking/reinitialize", json!({})).await).await;
    assert_eq!(body["data"]["registered"], 1);

    let page = json_body(get(&app, "/api/tracking/page-event?path=/autos/42").await).await;
    assert_eq!(page["data"]["eventName"], "Vehicle Viewed");
    let form = json_body(get(&app, "/api/tracking/form-handler?path=/autos/42/solicitar").await).await;
    assert_eq!(form["data"]["eventName"], "Vehicle Lead");

    let none = json_body(get(&app, "/api/tracking/page-event?path=/manual").await).await;
    assert!(none["data"].is_null());

    let response = get(&app, "/api/tracking/page-event").await;
    assert_eq!(response.status(), StatusCode::BAD_REQUEST);
}
