use std::sync::Arc;

use axum::{extract::State, http::StatusCode, Json};
use serde::Serialize;

use crate::state::AppState;

#[derive(Debug, Serialize)]
pub struct HealthReport {
    pub status: &'static str,
    pub version: &'static str,
    pub database: &'static str,
    pub buffer: BufferReport,
}

#[derive(Debug, Serialize)]
pub struct BufferReport {
    /// Events accepted but not yet written to DuckDB.
    pub pending: usize,
    /// Pending count that triggers an immediate flush.
    pub flush_at: usize,
}

/// `GET /health`: `200` with `status: "ok"` when DuckDB answers, `503` with
/// `status: "degraded"` otherwise. Both carry the buffer backlog, which grows
/// while writes are failing.
#[tracing::instrument(skip(state))]
pub async fn health(State(state): State<Arc<AppState>>) -> (StatusCode, Json<HealthReport>) {
    let database_up = match state.db.ping().await {
        Ok(()) => true,
        Err(e) => {
            tracing::error!(error = %e, "Health check: DuckDB unreachable");
            false
        }
    };
    let buffer = BufferReport {
        pending: state.buffer.lock().await.len(),
        flush_at: state.config.buffer_max_size,
    };

    let (code, status, database) = if database_up {
        (StatusCode::OK, "ok", "up")
    } else {
        (StatusCode::SERVICE_UNAVAILABLE, "degraded", "down")
    };
    let report = HealthReport {
        status,
        version: env!("CARGO_PKG_VERSION"),
        database,
        buffer,
    };
    (code, Json(report))
}
