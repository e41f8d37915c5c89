use std::sync::Arc;

use axum::{
    extract::{Path, Query, State},
    response::IntoResponse,
    Json,
};
use chrono::Utc;
use chrono_tz::Tz;
use serde::Deserialize;
use serde_json::json;

use menulytics_core::summary::SummaryWindow;

use crate::{error::AppError, state::AppState};

const DEFAULT_SUMMARY_DAYS: u32 = 7;
const MAX_SUMMARY_DAYS: u32 = 365;

#[derive(Debug, Deserialize)]
pub struct SummaryQuery {
    pub days: Option<u32>,
    pub timezone: Option<String>,
}

/// `GET /api/locations/{location_id}/summary?days=7&timezone=`: dashboard
/// summary for the last `days` calendar days.
///
/// Days and hours are bucketed in `timezone` (IANA name), falling back to
/// `MENULYTICS_TIMEZONE`.
#[tracing::instrument(skip(state))]
pub async fn get_summary(
    State(state): State<Arc<AppState>>,
    Path(location_id): Path<String>,
    Query(query): Query<SummaryQuery>,
) -> Result<impl IntoResponse, AppError> {
    let days = query.days.unwrap_or(DEFAULT_SUMMARY_DAYS);
    if !(1..=MAX_SUMMARY_DAYS).contains(&days) {
        return Err(AppError::BadRequest(format!(
            "days must be between 1 and {MAX_SUMMARY_DAYS}"
        )));
    }
    let timezone = parse_timezone(query.timezone.as_deref(), state.config.timezone)?;

    state.flush_buffer().await;

    let window = SummaryWindow::ending_at(days, Utc::now(), timezone);
    let summary = state
        .summaries
        .try_summary_for(&location_id, &window)
        .await?;

    Ok(Json(json!({ "data": summary })))
}

fn parse_timezone(raw: Option<&str>, default: Tz) -> Result<Tz, AppError> {
    match raw.map(str::trim).filter(|s| !s.is_empty()) {
        Some(name) => name
            .parse::<Tz>()
            .map_err(|_| AppError::BadRequest(format!("unknown timezone: {name}"))),
        None => Ok(default),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn blank_timezone_uses_default() {
        assert_eq!(parse_timezone(None, Tz::UTC).expect("tz"), Tz::UTC);
        assert_eq!(parse_timezone(Some("  "), Tz::UTC).expect("tz"), Tz::UTC);
        assert_eq!(
            parse_timezone(Some("Europe/Berlin"), Tz::UTC).expect("tz"),
            Tz::Europe__Berlin
        );
        assert!(parse_timezone(Some("Mars/Olympus"), Tz::UTC).is_err());
    }
}
