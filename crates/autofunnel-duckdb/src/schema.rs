/// DuckDB initialization SQL.
///
/// Executed once at database open time via `Connection::execute_batch`.
/// All statements use `IF NOT EXISTS` so they are safe to re-run on every
/// startup.
///
/// `memory_limit` comes from `Config.duckdb_memory_limit`
/// (env `AUTOFUNNEL_DUCKDB_MEMORY`, default `"1GB"`).
///
/// NOTE: DuckDB has no `ON DELETE CASCADE`, and it enforces FOREIGN KEY
/// constraints at statement time. `journey_steps.journey_id` is therefore
/// declared without an FK; the repository deletes steps and their journey
/// inside one transaction (children first). See `delete_journey_inner`.
pub fn init_sql(memory_limit: &str) -> String {
    format!(
        r#"SET memory_limit = '{memory_limit}';
SET threads = 2;

-- ===========================================
-- CUSTOMER JOURNEYS
-- ===========================================
CREATE TABLE IF NOT EXISTS customer_journeys (
    id                      VARCHAR PRIMARY KEY,   -- 'jrn_' + 21 base36 chars
    name                    VARCHAR NOT NULL,
    route                   VARCHAR NOT NULL,
    landing_page            VARCHAR NOT NULL,      -- defaults to route
    description             VARCHAR,
    status                  VARCHAR NOT NULL DEFAULT 'draft',  -- 'draft' | 'active' | 'paused'
    auto_tracking_enabled   BOOLEAN NOT NULL DEFAULT true,
    gtm_enabled             BOOLEAN NOT NULL DEFAULT true,
    facebook_pixel_enabled  BOOLEAN NOT NULL DEFAULT true,
    created_by              VARCHAR,
    created_at              TIMESTAMP NOT NULL DEFAULT CURRENT_TIMESTAMP,
    updated_at              TIMESTAMP NOT NULL DEFAULT CURRENT_TIMESTAMP
);
CREATE INDEX IF NOT EXISTS idx_customer_journeys_route
    ON customer_journeys(route);

-- ===========================================
-- JOURNEY STEPS
-- ===========================================
CREATE TABLE IF NOT EXISTS journey_steps (
    id                      VARCHAR PRIMARY KEY,   -- 'jstep_' + 21 base36 chars
    journey_id              VARCHAR NOT NULL,
    step_order              INTEGER NOT NULL,      -- contiguous 1..N per journey
    step_name               VARCHAR NOT NULL,
    step_description        VARCHAR,
    page_route              VARCHAR NOT NULL,
    page_title              VARCHAR,
    event_type              VARCHAR NOT NULL,
    event_name              VARCHAR NOT NULL,
    event_description       VARCHAR,
    trigger_type            VARCHAR NOT NULL DEFAULT 'pageview',
    trigger_selector        VARCHAR,
    trigger_conditions      VARCHAR NOT NULL DEFAULT '{{}}',   -- JSON object
    event_metadata          VARCHAR NOT NULL DEFAULT '{{}}',   -- JSON object
    button_identifier_type  VARCHAR,               -- 'text_contains' | 'css_id' | 'css_class' | 'css_selector'
    button_identifier       VARCHAR,
    created_at              TIMESTAMP NOT NULL DEFAULT CURRENT_TIMESTAMP,
    updated_at              TIMESTAMP NOT NULL DEFAULT CURRENT_TIMESTAMP
);
CREATE INDEX IF NOT EXISTS idx_journey_steps_journey_order
    ON journey_steps(journey_id, step_order);

-- ===========================================
-- TRACKING EVENTS (append-only ledger)
-- ===========================================
CREATE TABLE IF NOT EXISTS tracking_events (
    id              VARCHAR NOT NULL,              -- UUID v4
    event_name      VARCHAR NOT NULL,
    event_type      VARCHAR NOT NULL,
    user_id         VARCHAR,
    session_id      VARCHAR NOT NULL,
    metadata        VARCHAR NOT NULL DEFAULT '{{}}',   -- JSON object

    -- Lifted from metadata.journeyId / metadata.stepOrder for funnel reports
    journey_id      VARCHAR,
    step_order      INTEGER,

    utm_source      VARCHAR,
    utm_medium      VARCHAR,
    utm_campaign    VARCHAR,
    utm_term        VARCHAR,
    utm_content     VARCHAR,
    page_url        VARCHAR,
    referrer        VARCHAR,

    created_at      TIMESTAMP NOT NULL
);
CREATE INDEX IF NOT EXISTS idx_tracking_events_user_type
    ON tracking_events(user_id, event_type);
CREATE INDEX IF NOT EXISTS idx_tracking_events_journey_step
    ON tracking_events(journey_id, step_order);
CREATE INDEX IF NOT EXISTS idx_tracking_events_session_time
    ON tracking_events(session_id, created_at);
"#
    )
}

/// Migrations tracking table SQL.
///
/// Run before [`init_sql`]. Tracks which numbered migrations have been
/// applied so restarts don't re-run them.
pub const MIGRATIONS_TABLE_SQL: &str = r#"
CREATE TABLE IF NOT EXISTS _migrations (
    id          VARCHAR PRIMARY KEY,
    applied_at  TIMESTAMP NOT NULL DEFAULT CURRENT_TIMESTAMP
);
"#;

/// Identifier recorded in `_migrations` once [`init_sql`] has run.
pub const INITIAL_MIGRATION_ID: &str = "0001_customer_journeys";
