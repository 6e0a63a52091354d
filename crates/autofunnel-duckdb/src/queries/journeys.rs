use anyhow::{anyhow, Result};
use duckdb::{Connection, Error};
use rand::Rng;
use serde_json::{Map, Value};
use tracing::info;

use autofunnel_core::error::JourneyError;
use autofunnel_core::journey::{
    validate_steps, ButtonIdentifierType, EventType, Journey, JourneyStatus, JourneyStep,
    JourneyUpdate, NewJourney, NewStep, StepList, TriggerType,
};

use crate::DuckDbBackend;

fn generate_id(prefix: &str) -> String {
    let mut rng = rand::thread_rng();
    let chars: String = (0..21)
        .map(|_| {
            let idx = rng.gen_range(0..36);
            if idx < 10 {
                (b'0' + idx) as char
            } else {
                (b'a' + idx - 10) as char
            }
        })
        .collect();
    format!("{prefix}_{chars}")
}

fn generate_journey_id() -> String {
    generate_id("jrn")
}

fn generate_step_id() -> String {
    generate_id("jstep")
}

fn parse_json_map(column: &'static str, raw: &str) -> Result<Map<String, Value>> {
    match serde_json::from_str::<Value>(raw)? {
        Value::Object(map) => Ok(map),
        Value::Null => Ok(Map::new()),
        other => Err(JourneyError::InvalidStoredValue {
            column,
            value: other.to_string(),
        }
        .into()),
    }
}

/// Journey columns as read, before enum/flag conversion.
struct JourneyRow {
    id: String,
    name: String,
    route: String,
    landing_page: String,
    description: Option<String>,
    status: String,
    auto_tracking_enabled: bool,
    gtm_enabled: bool,
    facebook_pixel_enabled: bool,
    created_by: Option<String>,
    created_at: String,
    updated_at: String,
}

impl JourneyRow {
    fn from_row(row: &duckdb::Row<'_>) -> Result<Self, duckdb::Error> {
        Ok(Self {
            id: row.get(0)?,
            name: row.get(1)?,
            route: row.get(2)?,
            landing_page: row.get(3)?,
            description: row.get(4)?,
            status: row.get(5)?,
            auto_tracking_enabled: row.get(6)?,
            gtm_enabled: row.get(7)?,
            facebook_pixel_enabled: row.get(8)?,
            created_by: row.get(9)?,
            created_at: row.get(10)?,
            updated_at: row.get(11)?,
        })
    }

    fn into_journey(self, steps: Vec<JourneyStep>) -> Result<Journey> {
        Ok(Journey {
            status: JourneyStatus::parse(&self.status)?,
            id: self.id,
            name: self.name,
            route: self.route,
            landing_page: self.landing_page,
            description: self.description,
            auto_tracking_enabled: self.auto_tracking_enabled,
            gtm_enabled: self.gtm_enabled,
            facebook_pixel_enabled: self.facebook_pixel_enabled,
            created_by: self.created_by,
            created_at: self.created_at,
            updated_at: self.updated_at,
            steps,
        })
    }
}

struct StepRow {
    id: String,
    journey_id: String,
    step_order: i64,
    step_name: String,
    step_description: Option<String>,
    page_route: String,
    page_title: Option<String>,
    event_type: String,
    event_name: String,
    event_description: Option<String>,
    trigger_type: String,
    trigger_selector: Option<String>,
    trigger_conditions: String,
    event_metadata: String,
    button_identifier_type: Option<String>,
    button_identifier: Option<String>,
    created_at: String,
    updated_at: String,
}

impl StepRow {
    fn into_step(self) -> Result<JourneyStep> {
        Ok(JourneyStep {
            id: self.id,
            journey_id: self.journey_id,
            step_order: u32::try_from(self.step_order)?,
            step_name: self.step_name,
            step_description: self.step_description,
            page_route: self.page_route,
            page_title: self.page_title,
            event_type: EventType::from(self.event_type),
            event_name: self.event_name,
            event_description: self.event_description,
            trigger_type: TriggerType::parse(&self.trigger_type)?,
            trigger_selector: self.trigger_selector,
            trigger_conditions: parse_json_map("trigger_conditions", &self.trigger_conditions)?,
            event_metadata: parse_json_map("event_metadata", &self.event_metadata)?,
            button_identifier_type: self
                .button_identifier_type
                .as_deref()
                .map(ButtonIdentifierType::parse)
                .transpose()?,
            button_identifier: self.button_identifier,
            created_at: self.created_at,
            updated_at: self.updated_at,
        })
    }
}

pub(crate) fn load_journey_steps(conn: &Connection, journey_id: &str) -> Result<Vec<JourneyStep>> {
    let mut stmt = conn.prepare(
        r#"
        SELECT
            id,
            journey_id,
            step_order,
            step_name,
            step_description,
            page_route,
            page_title,
            event_type,
            event_name,
            event_description,
            trigger_type,
            trigger_selector,
            trigger_conditions,
            event_metadata,
            button_identifier_type,
            button_identifier,
            CAST(created_at AS VARCHAR),
            CAST(updated_at AS VARCHAR)
        FROM journey_steps
        WHERE journey_id = ?1
        ORDER BY step_order ASC
        "#,
    )?;

    let rows = stmt.query_map(duckdb::params![journey_id], |row| {
        Ok(StepRow {
            id: row.get(0)?,
            journey_id: row.get(1)?,
            step_order: row.get(2)?,
            step_name: row.get(3)?,
            step_description: row.get(4)?,
            page_route: row.get(5)?,
            page_title: row.get(6)?,
            event_type: row.get(7)?,
            event_name: row.get(8)?,
            event_description: row.get(9)?,
            trigger_type: row.get(10)?,
            trigger_selector: row.get(11)?,
            trigger_conditions: row.get(12)?,
            event_metadata: row.get(13)?,
            button_identifier_type: row.get(14)?,
            button_identifier: row.get(15)?,
            created_at: row.get(16)?,
            updated_at: row.get(17)?,
        })
    })?;

    let mut steps = Vec::new();
    for row in rows {
        steps.push(row?.into_step()?);
    }
    Ok(steps)
}

/// Run a journey SELECT (columns in [`JourneyRow`] order), then fetch each
/// journey's steps in a second query.
fn select_journeys(
    conn: &Connection,
    sql: &str,
    params: &[&dyn duckdb::ToSql],
) -> Result<Vec<Journey>> {
    let mut stmt = conn.prepare(sql)?;
    let rows = stmt.query_map(params, JourneyRow::from_row)?;

    let mut raw = Vec::new();
    for row in rows {
        raw.push(row?);
    }

    let mut journeys = Vec::with_capacity(raw.len());
    for row in raw {
        let steps = load_journey_steps(conn, &row.id)?;
        journeys.push(row.into_journey(steps)?);
    }
    Ok(journeys)
}

fn get_journey_with_conn(conn: &Connection, journey_id: &str) -> Result<Option<Journey>> {
    let mut journeys = select_journeys(
        conn,
        r#"
        SELECT
            id, name, route, landing_page, description, status,
            auto_tracking_enabled, gtm_enabled, facebook_pixel_enabled, created_by,
            CAST(created_at AS VARCHAR), CAST(updated_at AS VARCHAR)
        FROM customer_journeys
        WHERE id = ?1
        "#,
        duckdb::params![journey_id],
    )?;
    Ok(journeys.pop())
}

fn current_status(conn: &Connection, journey_id: &str) -> Result<Option<JourneyStatus>> {
    let raw = match conn
        .prepare("SELECT status FROM customer_journeys WHERE id = ?1")?
        .query_row(duckdb::params![journey_id], |row| row.get::<_, String>(0))
    {
        Ok(raw) => raw,
        Err(Error::QueryReturnedNoRows) => return Ok(None),
        Err(error) => return Err(error.into()),
    };
    Ok(Some(JourneyStatus::parse(&raw)?))
}

fn json_text(map: &Map<String, Value>) -> String {
    Value::Object(map.clone()).to_string()
}

/// Insert `steps` for `journey_id`, numbering them 1..N in list order.
fn insert_steps(conn: &Connection, journey_id: &str, steps: Vec<NewStep>) -> Result<usize> {
    let steps = StepList::from_steps(steps).into_steps();
    for (idx, step) in steps.iter().enumerate() {
        conn.execute(
            r#"
            INSERT INTO journey_steps (
                id,
                journey_id,
                step_order,
                step_name,
                step_description,
                page_route,
                page_title,
                event_type,
                event_name,
                event_description,
                trigger_type,
                trigger_selector,
                trigger_conditions,
                event_metadata,
                button_identifier_type,
                button_identifier,
                created_at,
                updated_at
            ) VALUES (
                ?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9, ?10, ?11, ?12, ?13, ?14, ?15, ?16,
                CURRENT_TIMESTAMP, CURRENT_TIMESTAMP
            )
            "#,
            duckdb::params![
                generate_step_id(),
                journey_id,
                (idx + 1) as i64,
                step.step_name.trim(),
                step.step_description,
                step.page_route.trim(),
                step.page_title,
                step.event_type.as_str(),
                step.event_name.trim(),
                step.event_description,
                step.trigger_type.as_str(),
                step.trigger_selector,
                json_text(&step.trigger_conditions),
                json_text(&step.event_metadata),
                step.button_identifier_type.map(|t| t.as_str()),
                step.button_identifier,
            ],
        )?;
    }
    Ok(steps.len())
}

pub async fn list_journeys_inner(db: &DuckDbBackend) -> Result<Vec<Journey>> {
    let conn = db.conn.lock().await;
    select_journeys(
        &conn,
        r#"
        SELECT
            id, name, route, landing_page, description, status,
            auto_tracking_enabled, gtm_enabled, facebook_pixel_enabled, created_by,
            CAST(created_at AS VARCHAR), CAST(updated_at AS VARCHAR)
        FROM customer_journeys
        ORDER BY created_at DESC, id DESC
        "#,
        duckdb::params![],
    )
}

pub async fn list_active_journeys_inner(db: &DuckDbBackend) -> Result<Vec<Journey>> {
    let conn = db.conn.lock().await;
    select_journeys(
        &conn,
        r#"
        SELECT
            id, name, route, landing_page, description, status,
            auto_tracking_enabled, gtm_enabled, facebook_pixel_enabled, created_by,
            CAST(created_at AS VARCHAR), CAST(updated_at AS VARCHAR)
        FROM customer_journeys
        WHERE status = 'active'
        ORDER BY created_at DESC, id DESC
        "#,
        duckdb::params![],
    )
}

pub async fn get_journey_inner(db: &DuckDbBackend, journey_id: &str) -> Result<Option<Journey>> {
    let conn = db.conn.lock().await;
    get_journey_with_conn(&conn, journey_id)
}

pub async fn get_journey_by_route_inner(db: &DuckDbBackend, route: &str) -> Result<Option<Journey>> {
    let conn = db.conn.lock().await;
    let mut journeys = select_journeys(
        &conn,
        r#"
        SELECT
            id, name, route, landing_page, description, status,
            auto_tracking_enabled, gtm_enabled, facebook_pixel_enabled, created_by,
            CAST(created_at AS VARCHAR), CAST(updated_at AS VARCHAR)
        FROM customer_journeys
        WHERE route = ?1 AND status = 'active'
        ORDER BY created_at DESC, id DESC
        LIMIT 1
        "#,
        duckdb::params![route.trim()],
    )?;
    Ok(journeys.pop())
}

pub async fn get_journey_steps_inner(
    db: &DuckDbBackend,
    journey_id: &str,
) -> Result<Vec<JourneyStep>> {
    let conn = db.conn.lock().await;
    load_journey_steps(&conn, journey_id)
}

pub async fn create_journey_inner(
    db: &DuckDbBackend,
    journey: NewJourney,
    steps: Vec<NewStep>,
) -> Result<Journey> {
    journey.validate()?;
    validate_steps(&steps)?;

    let journey_id = generate_journey_id();
    let landing_page = journey.landing_page_or_route();
    let status = journey.status.unwrap_or_default();

    let mut conn = db.conn.lock().await;
    let tx = conn.transaction()?;

    tx.execute(
        r#"
        INSERT INTO customer_journeys (
            id,
            name,
            route,
            landing_page,
            description,
            status,
            auto_tracking_enabled,
            gtm_enabled,
            facebook_pixel_enabled,
            created_by,
            created_at,
            updated_at
        ) VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9, ?10, CURRENT_TIMESTAMP, CURRENT_TIMESTAMP)
        "#,
        duckdb::params![
            &journey_id,
            journey.name.trim(),
            journey.route.trim(),
            landing_page,
            journey.description,
            status.as_str(),
            journey.auto_tracking_enabled.unwrap_or(true),
            journey.gtm_enabled.unwrap_or(true),
            journey.facebook_pixel_enabled.unwrap_or(true),
            journey.created_by,
        ],
    )?;

    // Dropping `tx` on any error below rolls back the journey row too.
    let step_count = insert_steps(&tx, &journey_id, steps)?;
    tx.commit()?;

    info!(journey_id = %journey_id, steps = step_count, "Journey created");

    get_journey_with_conn(&conn, &journey_id)?
        .ok_or_else(|| anyhow!("failed to load created journey"))
}

pub async fn update_journey_inner(
    db: &DuckDbBackend,
    journey_id: &str,
    update: JourneyUpdate,
) -> Result<Option<Journey>> {
    if update.is_empty() {
        return get_journey_inner(db, journey_id).await;
    }
    update.validate()?;

    let mut conn = db.conn.lock().await;
    let tx = conn.transaction()?;

    let Some(current) = get_journey_with_conn(&tx, journey_id)? else {
        return Ok(None);
    };

    let status = update.status.unwrap_or(current.status);
    if !current.status.can_transition_to(status) {
        return Err(JourneyError::InvalidTransition {
            from: current.status,
            to: status,
        }
        .into());
    }

    let route = update.merged_route(&current);
    let landing_page = update.merged_landing_page(&current);
    let description = update.merged_description(&current);

    tx.execute(
        r#"
        UPDATE customer_journeys
        SET name = ?1,
            route = ?2,
            landing_page = ?3,
            description = ?4,
            status = ?5,
            auto_tracking_enabled = ?6,
            gtm_enabled = ?7,
            facebook_pixel_enabled = ?8,
            updated_at = CURRENT_TIMESTAMP
        WHERE id = ?9
        "#,
        duckdb::params![
            update
                .name
                .as_deref()
                .map(str::trim)
                .unwrap_or(&current.name),
            route,
            landing_page,
            description,
            status.as_str(),
            update
                .auto_tracking_enabled
                .unwrap_or(current.auto_tracking_enabled),
            update.gtm_enabled.unwrap_or(current.gtm_enabled),
            update
                .facebook_pixel_enabled
                .unwrap_or(current.facebook_pixel_enabled),
            journey_id,
        ],
    )?;

    if let Some(steps) = update.steps {
        // Full replace, not a diff.
        tx.execute(
            "DELETE FROM journey_steps WHERE journey_id = ?1",
            duckdb::params![journey_id],
        )?;
        let step_count = insert_steps(&tx, journey_id, steps)?;
        info!(journey_id, steps = step_count, "Journey steps replaced");
    }

    tx.commit()?;
    get_journey_with_conn(&conn, journey_id)
}

pub async fn delete_journey_inner(db: &DuckDbBackend, journey_id: &str) -> Result<bool> {
    let mut conn = db.conn.lock().await;
    let tx = conn.transaction()?;

    let exists: i64 = tx
        .prepare("SELECT COUNT(*) FROM customer_journeys WHERE id = ?1")?
        .query_row(duckdb::params![journey_id], |row| row.get(0))?;
    if exists == 0 {
        return Ok(false);
    }

    let removed_steps = tx.execute(
        "DELETE FROM journey_steps WHERE journey_id = ?1",
        duckdb::params![journey_id],
    )?;
    tx.execute(
        "DELETE FROM customer_journeys WHERE id = ?1",
        duckdb::params![journey_id],
    )?;
    tx.commit()?;

    info!(journey_id, steps = removed_steps, "Journey deleted");
    Ok(true)
}

/// Flip active <-> paused with a single conditional statement, so two
/// concurrent toggles can never both read the same starting status.
pub async fn toggle_journey_status_inner(
    db: &DuckDbBackend,
    journey_id: &str,
) -> Result<Option<Journey>> {
    let conn = db.conn.lock().await;

    let changed = conn.execute(
        r#"
        UPDATE customer_journeys
        SET status = CASE status WHEN 'active' THEN 'paused' ELSE 'active' END,
            updated_at = CURRENT_TIMESTAMP
        WHERE id = ?1 AND status IN ('active', 'paused')
        "#,
        duckdb::params![journey_id],
    )?;

    if changed == 0 {
        return match current_status(&conn, journey_id)? {
            None => Ok(None),
            Some(status) => Err(JourneyError::NotToggleable(status).into()),
        };
    }

    let journey = get_journey_with_conn(&conn, journey_id)?;
    if let Some(journey) = &journey {
        info!(journey_id, status = %journey.status, "Journey status toggled");
    }
    Ok(journey)
}

pub async fn activate_journey_inner(
    db: &DuckDbBackend,
    journey_id: &str,
) -> Result<Option<Journey>> {
    update_journey_inner(db, journey_id, JourneyUpdate::status(JourneyStatus::Active)).await
}
