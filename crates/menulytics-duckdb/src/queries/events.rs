use anyhow::{anyhow, Context, Result};
use chrono::{DateTime, Utc};

use menulytics_core::analytics::EventQuery;
use menulytics_core::event::{DeviceType, Event, EventType};

use crate::backend::ts_param;
use crate::DuckDbBackend;

/// Columns as stored; enums and JSON are decoded after the row is read so
/// decode failures carry the event id.
struct EventRow {
    id: String,
    location_id: String,
    event_type: String,
    session_id: String,
    device_type: String,
    browser: String,
    os: String,
    screen_size: Option<String>,
    language: Option<String>,
    referrer: Option<String>,
    page_url: Option<String>,
    metadata: String,
    created_at_ms: i64,
}

impl EventRow {
    fn into_event(self) -> Result<Event> {
        let event_type: EventType = self
            .event_type
            .parse()
            .with_context(|| format!("event {}", self.id))?;
        let device_type: DeviceType = self
            .device_type
            .parse()
            .with_context(|| format!("event {}", self.id))?;
        let metadata = serde_json::from_str(&self.metadata)
            .with_context(|| format!("metadata of event {}", self.id))?;
        let created_at = DateTime::<Utc>::from_timestamp_millis(self.created_at_ms)
            .ok_or_else(|| anyhow!("event {}: created_at out of range", self.id))?;

        Ok(Event {
            id: self.id,
            location_id: self.location_id,
            event_type,
            session_id: self.session_id,
            device_type,
            browser: self.browser,
            os: self.os,
            screen_size: self.screen_size,
            language: self.language,
            referrer: self.referrer,
            page_url: self.page_url,
            metadata,
            created_at,
        })
    }
}

pub(crate) async fn select_events_inner(
    db: &DuckDbBackend,
    query: &EventQuery,
) -> Result<Vec<Event>> {
    let conn = db.conn.lock().await;
    let mut stmt = conn.prepare(
        r#"
        SELECT
            id, location_id, event_type, session_id,
            device_type, browser, os, screen_size, language, referrer, page_url,
            metadata, epoch_ms(created_at) AS created_at_ms
        FROM analytics_events
        WHERE location_id = ?1
          AND created_at >= CAST(?2 AS TIMESTAMP)
          AND created_at < CAST(?3 AS TIMESTAMP)
        ORDER BY created_at ASC, id ASC
        "#,
    )?;

    let rows = stmt.query_map(
        duckdb::params![
            query.location_id,
            ts_param(&query.start),
            ts_param(&query.end)
        ],
        |row| {
            Ok(EventRow {
                id: row.get(0)?,
                location_id: row.get(1)?,
                event_type: row.get(2)?,
                session_id: row.get(3)?,
                device_type: row.get(4)?,
                browser: row.get(5)?,
                os: row.get(6)?,
                screen_size: row.get(7)?,
                language: row.get(8)?,
                referrer: row.get(9)?,
                page_url: row.get(10)?,
                metadata: row.get(11)?,
                created_at_ms: row.get(12)?,
            })
        },
    )?;

    let mut events = Vec::new();
    for row in rows {
        events.push(row?.into_event()?);
    }
    Ok(events)
}
