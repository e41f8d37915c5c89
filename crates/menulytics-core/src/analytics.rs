//! Analytics backend abstraction.

use chrono::{DateTime, Utc};

use crate::error::CoreError;
use crate::event::Event;

/// Selects `location_id`'s events with `start <= created_at < end`.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct EventQuery {
    pub location_id: String,
    pub start: DateTime<Utc>,
    pub end: DateTime<Utc>,
}

/// The row store the tracker writes to and the summary reads from.
///
/// Implemented by the embedded DuckDB store and by the HTTP client that
/// talks to the ingest server, so the tracker and the summary service never
/// know which one they hold.
#[async_trait::async_trait]
pub trait AnalyticsBackend: Send + Sync + 'static {
    async fn insert_event(&self, event: &Event) -> anyhow::Result<()>;

    /// On `Err` none of `events` may be considered stored.
    /// Re-inserting an event whose `id` is already stored is a no-op.
    ///
    /// Backends signal a payload they will never accept with
    /// [`CoreError::Rejected`] (directly or as context), see [`is_rejection`].
    async fn insert_events(&self, events: &[Event]) -> anyhow::Result<()>;

    /// Matching events ordered by `created_at` ascending.
    async fn select_events(&self, query: &EventQuery) -> anyhow::Result<Vec<Event>>;
}

/// `true` when `err` carries [`CoreError::Rejected`]: retrying the same
/// events cannot succeed.
pub fn is_rejection(err: &anyhow::Error) -> bool {
    let rejected = |e: Option<&CoreError>| matches!(e, Some(CoreError::Rejected(_)));
    rejected(err.downcast_ref::<CoreError>())
        || err
            .chain()
            .any(|cause| rejected(cause.downcast_ref::<CoreError>()))
}
