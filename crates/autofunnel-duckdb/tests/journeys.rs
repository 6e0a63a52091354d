use autofunnel_core::error::JourneyError;
use autofunnel_core::journey::{
    ButtonIdentifierType, EventType, JourneyStatus, JourneyUpdate, NewJourney, NewStep,
    TriggerType,
};
use autofunnel_core::store::JourneyStore;
use autofunnel_duckdb::DuckDbBackend;

fn pageview(name: &str, route: &str, event_type: EventType) -> NewStep {
    NewStep::pageview(name, route, event_type, name)
}

fn three_steps() -> Vec<NewStep> {
    vec![
        pageview("Landing", "/financiamientos", EventType::ConversionLandingPage),
        NewStep::pageview("Apply click", "/financiamientos", EventType::Lead, "Apply Clicked")
            .with_button(ButtonIdentifierType::CssId, "apply-now"),
        pageview("Application", "/escritorio/aplicacion", EventType::ApplicationStarted),
    ]
}

async fn step_row_count(db: &DuckDbBackend, journey_id: &str) -> i64 {
    let conn = db.conn_for_test().await;
    conn.query_row(
        "SELECT COUNT(*) FROM journey_steps WHERE journey_id = ?1",
        autofunnel_duckdb::duckdb::params![journey_id],
        |row| row.get(0),
    )
    .expect("count steps")
}

#[tokio::test]
async fn created_steps_read_back_in_contiguous_order() {
    let db = DuckDbBackend::open_in_memory().expect("in-memory db");

    let journey = db
        .create_journey(NewJourney::new("Financing", "/financiamientos"), three_steps())
        .await
        .expect("create journey");

    assert!(journey.id.starts_with("jrn_"));
    assert_eq!(journey.status, JourneyStatus::Draft);
    assert_eq!(journey.landing_page, "/financiamientos");
    assert!(journey.auto_tracking_enabled);
    assert!(journey.gtm_enabled);
    assert!(journey.facebook_pixel_enabled);

    let orders: Vec<u32> = journey.steps.iter().map(|s| s.step_order).collect();
    assert_eq!(orders, vec![1, 2, 3]);
    assert_eq!(journey.steps[1].trigger_type, TriggerType::ButtonClick);
    assert_eq!(
        journey.steps[1].button_identifier_type,
        Some(ButtonIdentifierType::CssId)
    );
    assert_eq!(journey.steps[2].event_type, EventType::ApplicationStarted);

    let steps = db.get_journey_steps(&journey.id).await.expect("steps");
    assert_eq!(steps.len(), 3);
    assert!(steps.iter().all(|s| s.journey_id == journey.id));
}

#[tokio::test]
async fn requested_orders_with_gaps_are_renumbered() {
    let db = DuckDbBackend::open_in_memory().expect("in-memory db");
    let mut first = pageview("First", "/a", EventType::PageView);
    first.step_order = Some(10);
    let mut second = pageview("Second", "/b", EventType::PageView);
    second.step_order = Some(4);

    let journey = db
        .create_journey(NewJourney::new("Gaps", "/a"), vec![first, second])
        .await
        .expect("create journey");

    let names: Vec<&str> = journey.steps.iter().map(|s| s.step_name.as_str()).collect();
    assert_eq!(names, vec!["Second", "First"]);
    let orders: Vec<u32> = journey.steps.iter().map(|s| s.step_order).collect();
    assert_eq!(orders, vec![1, 2]);
}

#[tokio::test]
async fn invalid_journey_is_rejected_before_any_write() {
    let db = DuckDbBackend::open_in_memory().expect("in-memory db");

    let err = db
        .create_journey(NewJourney::new("", "/test"), vec![])
        .await
        .expect_err("empty name must fail");
    assert!(matches!(
        err.downcast_ref::<JourneyError>(),
        Some(JourneyError::Validation { field: "name", .. })
    ));

    let bad_step = pageview("Click", "/test", EventType::Lead).with_trigger(TriggerType::ButtonClick);
    let err = db
        .create_journey(NewJourney::new("Test", "/test"), vec![bad_step])
        .await
        .expect_err("button step without identifier must fail");
    assert!(err.downcast_ref::<JourneyError>().is_some());

    assert!(db.list_journeys().await.expect("list").is_empty());
}

async fn journey_row_count(db: &DuckDbBackend) -> i64 {
    let conn = db.conn_for_test().await;
    conn.query_row(
        "SELECT COUNT(*) FROM customer_journeys",
        autofunnel_duckdb::duckdb::params![],
        |row| row.get(0),
    )
    .expect("count journeys")
}

#[tokio::test]
async fn failed_step_insert_rolls_back_the_journey_row() {
    let db = DuckDbBackend::open_in_memory().expect("in-memory db");

    // Same columns, but only the first step of any journey can be written.
    {
        let conn = db.conn_for_test().await;
        conn.execute_batch(
            r#"
            DROP INDEX idx_journey_steps_journey_order;
            DROP TABLE journey_steps;
            CREATE TABLE journey_steps (
                id                      VARCHAR PRIMARY KEY,
                journey_id              VARCHAR NOT NULL,
                step_order              INTEGER NOT NULL CHECK (step_order < 2),
                step_name               VARCHAR NOT NULL,
                step_description        VARCHAR,
                page_route              VARCHAR NOT NULL,
                page_title              VARCHAR,
                event_type              VARCHAR NOT NULL,
                event_name              VARCHAR NOT NULL,
                event_description       VARCHAR,
                trigger_type            VARCHAR NOT NULL,
                trigger_selector        VARCHAR,
                trigger_conditions      VARCHAR NOT NULL,
                event_metadata          VARCHAR NOT NULL,
                button_identifier_type  VARCHAR,
                button_identifier       VARCHAR,
                created_at              TIMESTAMP NOT NULL,
                updated_at              TIMESTAMP NOT NULL
            );
            "#,
        )
        .expect("replace journey_steps");
    }

    let result = db
        .create_journey(NewJourney::new("Financing", "/financiamientos"), three_steps())
        .await;
    assert!(result.is_err());

    assert_eq!(journey_row_count(&db).await, 0);
    let conn = db.conn_for_test().await;
    let steps: i64 = conn
        .query_row(
            "SELECT COUNT(*) FROM journey_steps",
            autofunnel_duckdb::duckdb::params![],
            |row| row.get(0),
        )
        .expect("count steps");
    assert_eq!(steps, 0);
}

#[tokio::test]
async fn activated_journey_appears_in_active_list() {
    let db = DuckDbBackend::open_in_memory().expect("in-memory db");

    let journey = db
        .create_journey(
            NewJourney::new("Test", "/test"),
            vec![pageview("Visit", "/test", EventType::PageView)],
        )
        .await
        .expect("create journey");
    assert!(db.list_active_journeys().await.expect("active").is_empty());

    let activated = db
        .activate_journey(&journey.id)
        .await
        .expect("activate")
        .expect("journey exists");
    assert_eq!(activated.status, JourneyStatus::Active);

    let active = db.list_active_journeys().await.expect("active");
    assert_eq!(active.len(), 1);
    assert_eq!(active[0].name, "Test");
    assert_eq!(active[0].route, "/test");
    assert_eq!(active[0].steps.len(), 1);

    let by_route = db
        .get_journey_by_route("/test")
        .await
        .expect("by route")
        .expect("active journey on route");
    assert_eq!(by_route.id, journey.id);
}

#[tokio::test]
async fn toggle_flips_active_and_paused() {
    let db = DuckDbBackend::open_in_memory().expect("in-memory db");
    let mut new_journey = NewJourney::new("Toggle", "/toggle");
    new_journey.status = Some(JourneyStatus::Active);
    let journey = db
        .create_journey(new_journey, vec![])
        .await
        .expect("create journey");

    let paused = db
        .toggle_journey_status(&journey.id)
        .await
        .expect("toggle")
        .expect("journey exists");
    assert_eq!(paused.status, JourneyStatus::Paused);
    assert!(db
        .get_journey_by_route("/toggle")
        .await
        .expect("by route")
        .is_none());

    let active = db
        .toggle_journey_status(&journey.id)
        .await
        .expect("toggle")
        .expect("journey exists");
    assert_eq!(active.status, JourneyStatus::Active);
}

#[tokio::test]
async fn toggling_a_draft_or_unknown_journey_changes_nothing() {
    let db = DuckDbBackend::open_in_memory().expect("in-memory db");
    let journey = db
        .create_journey(NewJourney::new("Draft", "/draft"), vec![])
        .await
        .expect("create journey");

    let err = db
        .toggle_journey_status(&journey.id)
        .await
        .expect_err("drafts cannot be toggled");
    assert_eq!(
        err.downcast_ref::<JourneyError>(),
        Some(&JourneyError::NotToggleable(JourneyStatus::Draft))
    );

    let stored = db
        .get_journey(&journey.id)
        .await
        .expect("get")
        .expect("journey exists");
    assert_eq!(stored.status, JourneyStatus::Draft);

    assert!(db
        .toggle_journey_status("jrn_missing")
        .await
        .expect("toggle unknown")
        .is_none());
}

#[tokio::test]
async fn update_replaces_steps_and_merges_columns() {
    let db = DuckDbBackend::open_in_memory().expect("in-memory db");
    let journey = db
        .create_journey(NewJourney::new("Financing", "/financiamientos"), three_steps())
        .await
        .expect("create journey");

    let update = JourneyUpdate {
        description: Some(Some("Paid social funnel".to_string())),
        gtm_enabled: Some(false),
        steps: Some(vec![
            pageview("Only step", "/gracias", EventType::LeadComplete),
            pageview("Second", "/gracias", EventType::PageView),
        ]),
        ..JourneyUpdate::default()
    };
    let updated = db
        .update_journey(&journey.id, update)
        .await
        .expect("update")
        .expect("journey exists");

    assert_eq!(updated.name, "Financing");
    assert_eq!(updated.description.as_deref(), Some("Paid social funnel"));
    assert!(!updated.gtm_enabled);
    assert!(updated.facebook_pixel_enabled);
    let names: Vec<&str> = updated.steps.iter().map(|s| s.step_name.as_str()).collect();
    assert_eq!(names, vec!["Only step", "Second"]);
    assert_eq!(step_row_count(&db, &journey.id).await, 2);

    assert!(db
        .update_journey("jrn_missing", JourneyUpdate::status(JourneyStatus::Active))
        .await
        .expect("update unknown")
        .is_none());
}

#[tokio::test]
async fn update_clears_description_and_moves_default_landing_page() {
    let db = DuckDbBackend::open_in_memory().expect("in-memory db");
    let mut new = NewJourney::new("Financing", "/financiamientos");
    new.description = Some("Paid social funnel".to_string());
    let journey = db.create_journey(new, vec![]).await.expect("create journey");
    assert_eq!(journey.landing_page, "/financiamientos");

    let update: JourneyUpdate =
        serde_json::from_str(r#"{"route": "/creditos", "description": null}"#).expect("parse");
    let updated = db
        .update_journey(&journey.id, update)
        .await
        .expect("update")
        .expect("journey exists");
    assert_eq!(updated.route, "/creditos");
    assert_eq!(updated.landing_page, "/creditos");
    assert_eq!(updated.description, None);

    let pinned = JourneyUpdate {
        landing_page: Some("/promo".to_string()),
        ..JourneyUpdate::default()
    };
    db.update_journey(&journey.id, pinned).await.expect("pin landing page");
    let moved = JourneyUpdate {
        route: Some("/autos".to_string()),
        ..JourneyUpdate::default()
    };
    let updated = db
        .update_journey(&journey.id, moved)
        .await
        .expect("update")
        .expect("journey exists");
    assert_eq!(updated.landing_page, "/promo");

    let reset = JourneyUpdate {
        landing_page: Some(String::new()),
        ..JourneyUpdate::default()
    };
    let updated = db
        .update_journey(&journey.id, reset)
        .await
        .expect("update")
        .expect("journey exists");
    assert_eq!(updated.landing_page, "/autos");
}

#[tokio::test]
async fn update_rejects_return_to_draft() {
    let db = DuckDbBackend::open_in_memory().expect("in-memory db");
    let journey = db
        .create_journey(NewJourney::new("Test", "/test"), vec![])
        .await
        .expect("create journey");
    db.activate_journey(&journey.id).await.expect("activate");

    let err = db
        .update_journey(&journey.id, JourneyUpdate::status(JourneyStatus::Draft))
        .await
        .expect_err("active -> draft is not allowed");
    assert_eq!(
        err.downcast_ref::<JourneyError>(),
        Some(&JourneyError::InvalidTransition {
            from: JourneyStatus::Active,
            to: JourneyStatus::Draft,
        })
    );
}

#[tokio::test]
async fn delete_removes_journey_and_its_steps() {
    let db = DuckDbBackend::open_in_memory().expect("in-memory db");
    let journey = db
        .create_journey(NewJourney::new("Financing", "/financiamientos"), three_steps())
        .await
        .expect("create journey");
    assert_eq!(step_row_count(&db, &journey.id).await, 3);

    assert!(db.delete_journey(&journey.id).await.expect("delete"));
    assert_eq!(step_row_count(&db, &journey.id).await, 0);
    assert!(db.get_journey(&journey.id).await.expect("get").is_none());
    assert!(db.get_journey_steps(&journey.id).await.expect("steps").is_empty());

    assert!(!db.delete_journey(&journey.id).await.expect("delete again"));
}

#[tokio::test]
async fn list_is_newest_first() {
    let db = DuckDbBackend::open_in_memory().expect("in-memory db");
    let older = db
        .create_journey(NewJourney::new("Older", "/older"), vec![])
        .await
        .expect("create older");
    {
        let conn = db.conn_for_test().await;
        conn.execute(
            "UPDATE customer_journeys SET created_at = TIMESTAMP '2025-01-01 00:00:00' WHERE id = ?1",
            autofunnel_duckdb::duckdb::params![older.id],
        )
        .expect("backdate");
    }
    let newer = db
        .create_journey(NewJourney::new("Newer", "/newer"), vec![])
        .await
        .expect("create newer");

    let all = db.list_journeys().await.expect("list");
    let ids: Vec<&str> = all.iter().map(|j| j.id.as_str()).collect();
    assert_eq!(ids, vec![newer.id.as_str(), older.id.as_str()]);
}
