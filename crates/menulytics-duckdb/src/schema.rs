/// DuckDB initialization SQL.
///
/// Executed once at database open time via `Connection::execute_batch`.
/// All statements use `IF NOT EXISTS` so they are safe to re-run on every
/// startup.
///
/// `memory_limit` comes from `Config.duckdb_memory_limit`
/// (env `MENULYTICS_DUCKDB_MEMORY`, default `"1GB"`). Always set it
/// explicitly: the DuckDB default is 80% of system RAM.
pub fn init_sql(memory_limit: &str) -> String {
    format!(
        r#"SET memory_limit = '{memory_limit}';
SET threads = 2;

-- ===========================================
-- ANALYTICS EVENTS
-- ===========================================
-- One row per tracked customer action. `id` is generated by the client so
-- re-sent offline batches can be deduplicated on insert.
CREATE TABLE IF NOT EXISTS analytics_events (
    id              VARCHAR PRIMARY KEY,           -- UUID v4, client generated
    location_id     VARCHAR NOT NULL,
    event_type      VARCHAR NOT NULL,              -- 'page_view' | 'qr_scan' | 'category_click' | ...
    session_id      VARCHAR NOT NULL,

    -- Client
    device_type     VARCHAR NOT NULL,              -- 'mobile' | 'tablet' | 'desktop'
    browser         VARCHAR NOT NULL,
    os              VARCHAR NOT NULL,
    screen_size     VARCHAR,
    language        VARCHAR,
    referrer        VARCHAR,
    page_url        VARCHAR,

    metadata        VARCHAR NOT NULL DEFAULT '{{}}', -- JSON object
    created_at      TIMESTAMP NOT NULL
);
-- Summary window scans
CREATE INDEX IF NOT EXISTS idx_analytics_events_location_time
    ON analytics_events(location_id, created_at);
"#
    )
}

pub const MIGRATIONS_TABLE_SQL: &str = r#"
CREATE TABLE IF NOT EXISTS _migrations (
    id          VARCHAR PRIMARY KEY,
    applied_at  TIMESTAMP NOT NULL DEFAULT CURRENT_TIMESTAMP
);
"#;
