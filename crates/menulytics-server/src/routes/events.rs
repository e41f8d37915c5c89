use std::sync::Arc;

use axum::{
    extract::{Path, Query, State},
    http::{HeaderMap, StatusCode},
    response::IntoResponse,
    Json,
};
use chrono::{DateTime, Duration, Utc};
use serde::Deserialize;
use serde_json::json;

use menulytics_core::{
    analytics::{AnalyticsBackend, EventQuery},
    event::{Event, EventOrBatch},
};

use crate::{
    error::AppError,
    state::{AppState, MAX_BATCH_SIZE},
};

/// Default look-back for `GET /api/locations/{location_id}/events` when
/// `start` is omitted.
const DEFAULT_LIST_DAYS: i64 = 7;

/// `POST /api/events`: ingest a single event or a batch.
///
/// Events arrive fully formed from the tracker: ids, session ids and
/// timestamps are client-generated, so re-sending an offline queue after a
/// lost response is harmless.
///
/// ## Rate limiting
/// [`crate::state::RATE_LIMIT_PER_MINUTE`] requests per minute per
/// `X-Forwarded-For` address.
///
/// ## Response
/// `202 Accepted` with `{ "ok": true }`.
#[tracing::instrument(skip(state, headers, payload))]
pub async fn ingest(
    State(state): State<Arc<AppState>>,
    headers: HeaderMap,
    Json(payload): Json<EventOrBatch>,
) -> Result<impl IntoResponse, AppError> {
    let client_ip = extract_client_ip(&headers);
    if !state.check_rate_limit(&client_ip).await {
        return Err(AppError::RateLimited);
    }

    let events = payload.into_vec();
    if events.len() > MAX_BATCH_SIZE {
        return Err(AppError::BatchTooLarge(events.len()));
    }
    if events.is_empty() {
        return Err(AppError::BadRequest("empty batch".to_string()));
    }
    for event in &events {
        validate_event(event)?;
    }

    let count = events.len();
    state.push_events(events).await?;
    tracing::debug!(count, "Events accepted");

    Ok((StatusCode::ACCEPTED, Json(json!({ "ok": true }))))
}

fn validate_event(event: &Event) -> Result<(), AppError> {
    for (field, value) in [
        ("id", &event.id),
        ("location_id", &event.location_id),
        ("session_id", &event.session_id),
    ] {
        if value.trim().is_empty() {
            return Err(AppError::BadRequest(format!("{field} must not be empty")));
        }
    }
    Ok(())
}

#[derive(Debug, Deserialize)]
pub struct ListEventsQuery {
    pub start: Option<String>,
    pub end: Option<String>,
}

/// `GET /api/locations/{location_id}/events?start=&end=`: raw events in
/// `[start, end)`, oldest first.
///
/// Both bounds are RFC 3339. `end` defaults to now, `start` to seven days
/// before `end`. Pending buffered events are flushed first so a client
/// reading right after a write sees it.
#[tracing::instrument(skip(state))]
pub async fn list_events(
    State(state): State<Arc<AppState>>,
    Path(location_id): Path<String>,
    Query(query): Query<ListEventsQuery>,
) -> Result<impl IntoResponse, AppError> {
    let end = match query.end.as_deref() {
        Some(raw) => parse_timestamp(raw, "end")?,
        None => Utc::now(),
    };
    let start = match query.start.as_deref() {
        Some(raw) => parse_timestamp(raw, "start")?,
        None => end - Duration::days(DEFAULT_LIST_DAYS),
    };
    if end <= start {
        return Err(AppError::BadRequest(
            "end must be after start".to_string(),
        ));
    }

    state.flush_buffer().await;

    let events = state
        .db
        .select_events(&EventQuery {
            location_id,
            start,
            end,
        })
        .await?;

    Ok(Json(json!({ "data": events })))
}

fn parse_timestamp(raw: &str, field: &str) -> Result<DateTime<Utc>, AppError> {
    DateTime::parse_from_rfc3339(raw.trim())
        .map(|dt| dt.with_timezone(&Utc))
        .map_err(|_| AppError::BadRequest(format!("{field} must be an RFC 3339 timestamp")))
}

/// Extract the client IP from `X-Forwarded-For` (first entry).
///
/// Falls back to `"unknown"` when the header is absent.
fn extract_client_ip(headers: &HeaderMap) -> String {
    headers
        .get("x-forwarded-for")
        .and_then(|v| v.to_str().ok())
        .and_then(|s| s.split(',').next())
        .map(|s| s.trim().to_string())
        .filter(|s| !s.is_empty())
        .unwrap_or_else(|| "unknown".to_string())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn client_ip_takes_first_forwarded_entry() {
        let mut headers = HeaderMap::new();
        headers.insert(
            "x-forwarded-for",
            "203.0.113.9, 10.0.0.1".parse().expect("header"),
        );
        assert_eq!(extract_client_ip(&headers), "203.0.113.9");
        assert_eq!(extract_client_ip(&HeaderMap::new()), "unknown");
    }

    #[test]
    fn timestamps_accept_offsets() {
        let parsed = parse_timestamp("2026-03-01T10:00:00+02:00", "start").expect("parse");
        assert_eq!(parsed.to_rfc3339(), "2026-03-01T08:00:00+00:00");
        assert!(parse_timestamp("yesterday", "start").is_err());
    }
}
