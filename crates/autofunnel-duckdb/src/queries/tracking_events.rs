use anyhow::Result;
use serde_json::Value;
use tracing::debug;

use autofunnel_core::event::TrackingEvent;
use autofunnel_core::funnel::StepReach;

use crate::DuckDbBackend;

/// `metadata.journeyId`, when present as a non-empty string.
fn metadata_journey_id(event: &TrackingEvent) -> Option<String> {
    event
        .metadata
        .get("journeyId")
        .and_then(Value::as_str)
        .filter(|v| !v.is_empty())
        .map(str::to_string)
}

/// `metadata.stepOrder`, accepted as a positive number or numeric string.
///
/// Orders that do not fit the `INTEGER` column are left NULL; the raw value
/// stays in the metadata JSON.
fn metadata_step_order(event: &TrackingEvent) -> Option<i32> {
    let order = match event.metadata.get("stepOrder")? {
        Value::Number(n) => n.as_i64(),
        Value::String(s) => s.trim().parse().ok(),
        _ => None,
    }?;
    match i32::try_from(order) {
        Ok(order) if order > 0 => Some(order),
        Ok(_) => None,
        Err(_) => {
            debug!(event_id = %event.id, step_order = order, "stepOrder out of range, stored as NULL");
            None
        }
    }
}

pub async fn insert_tracking_event_inner(db: &DuckDbBackend, event: &TrackingEvent) -> Result<()> {
    let metadata = Value::Object(event.metadata.clone()).to_string();
    let created_at = event.created_at.format("%Y-%m-%d %H:%M:%S%.f").to_string();

    let conn = db.conn.lock().await;
    conn.execute(
        r#"
        INSERT INTO tracking_events (
            id,
            event_name,
            event_type,
            user_id,
            session_id,
            metadata,
            journey_id,
            step_order,
            utm_source,
            utm_medium,
            utm_campaign,
            utm_term,
            utm_content,
            page_url,
            referrer,
            created_at
        ) VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9, ?10, ?11, ?12, ?13, ?14, ?15, ?16)
        "#,
        duckdb::params![
            event.id,
            event.event_name,
            event.event_type,
            event.user_id,
            event.session_id,
            metadata,
            metadata_journey_id(event),
            metadata_step_order(event),
            event.utm_source,
            event.utm_medium,
            event.utm_campaign,
            event.utm_term,
            event.utm_content,
            event.page_url,
            event.referrer,
            created_at,
        ],
    )?;

    debug!(
        event_id = %event.id,
        event_type = %event.event_type,
        "Tracking event stored"
    );
    Ok(())
}

pub async fn has_tracking_event_inner(
    db: &DuckDbBackend,
    user_id: &str,
    event_type: &str,
) -> Result<bool> {
    let conn = db.conn.lock().await;
    let count: i64 = conn
        .prepare(
            "SELECT COUNT(*) FROM (SELECT 1 FROM tracking_events WHERE user_id = ?1 AND event_type = ?2 LIMIT 1)",
        )?
        .query_row(duckdb::params![user_id, event_type], |row| row.get(0))?;
    Ok(count > 0)
}

/// Anonymous visitors are identified by their session id.
pub async fn journey_step_reach_inner(db: &DuckDbBackend, journey_id: &str) -> Result<Vec<StepReach>> {
    let conn = db.conn.lock().await;
    let mut stmt = conn.prepare(
        r#"
        SELECT DISTINCT
            COALESCE(user_id, session_id) AS actor_id,
            step_order
        FROM tracking_events
        WHERE journey_id = ?1
          AND step_order IS NOT NULL
        ORDER BY step_order ASC, actor_id ASC
        "#,
    )?;

    let rows = stmt.query_map(duckdb::params![journey_id], |row| {
        Ok((row.get::<_, String>(0)?, row.get::<_, i64>(1)?))
    })?;

    let mut reach = Vec::new();
    for row in rows {
        let (actor_id, step_order) = row?;
        reach.push(StepReach {
            actor_id,
            step_order: u32::try_from(step_order)?,
        });
    }
    Ok(reach)
}
