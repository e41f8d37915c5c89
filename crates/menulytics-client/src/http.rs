use std::time::Duration;

use async_trait::async_trait;
use chrono::{DateTime, SecondsFormat, Utc};
use reqwest::{Client, Response, Url};
use serde::Deserialize;
use tracing::debug;

use menulytics_core::analytics::{AnalyticsBackend, EventQuery};
use menulytics_core::config::TrackerConfig;
use menulytics_core::error::CoreError;
use menulytics_core::event::{Event, MAX_BATCH_SIZE};

use crate::error::ClientError;

/// `{ "data": ... }` envelope used by the read endpoints.
#[derive(Debug, Deserialize)]
struct DataEnvelope<T> {
    data: T,
}

#[derive(Debug, Deserialize)]
struct ErrorEnvelope {
    error: ErrorBody,
}

#[derive(Debug, Deserialize)]
struct ErrorBody {
    message: String,
}

/// Remote analytics backend over the server's JSON API.
///
/// - `insert_event` / `insert_events` → `POST /api/events`, batches split
///   into chunks of at most [`MAX_BATCH_SIZE`]
/// - `select_events` → `GET /api/locations/{location_id}/events`
///
/// Responses that will never succeed on retry (see
/// [`ClientError::is_rejection`]) carry [`CoreError::Rejected`] as context,
/// so the tracker drops those events instead of queueing them.
#[derive(Debug, Clone)]
pub struct HttpBackend {
    client: Client,
    base_url: Url,
}

impl HttpBackend {
    pub fn new(base_url: &str, timeout: Duration) -> Result<Self, ClientError> {
        let base_url = Url::parse(base_url.trim())
            .map_err(|e| ClientError::InvalidBaseUrl(format!("{base_url}: {e}")))?;
        if base_url.cannot_be_a_base() {
            return Err(ClientError::InvalidBaseUrl(base_url.to_string()));
        }
        let client = Client::builder().timeout(timeout).build()?;
        Ok(Self { client, base_url })
    }

    /// `None` when no endpoint is configured.
    pub fn from_config(config: &TrackerConfig) -> Result<Option<Self>, ClientError> {
        config
            .endpoint
            .as_deref()
            .map(|endpoint| Self::new(endpoint, config.http_timeout))
            .transpose()
    }

    fn url(&self, segments: &[&str]) -> Result<Url, ClientError> {
        let mut url = self.base_url.clone();
        url.path_segments_mut()
            .map_err(|_| ClientError::InvalidBaseUrl(self.base_url.to_string()))?
            .pop_if_empty()
            .extend(segments);
        Ok(url)
    }

    async fn post_events<T: serde::Serialize + ?Sized>(&self, body: &T) -> Result<(), ClientError> {
        let response = self
            .client
            .post(self.url(&["api", "events"])?)
            .json(body)
            .send()
            .await?;
        check_status(response).await?;
        Ok(())
    }

    async fn fetch_events(&self, query: &EventQuery) -> Result<Vec<Event>, ClientError> {
        let url = self.url(&["api", "locations", &query.location_id, "events"])?;
        let response = self
            .client
            .get(url)
            .query(&[("start", rfc3339(query.start)), ("end", rfc3339(query.end))])
            .send()
            .await?;
        let envelope: DataEnvelope<Vec<Event>> = check_status(response).await?.json().await?;
        Ok(envelope.data)
    }
}

fn backend_error(err: ClientError) -> anyhow::Error {
    if err.is_rejection() {
        let reason = err.to_string();
        anyhow::Error::new(err).context(CoreError::Rejected(reason))
    } else {
        anyhow::Error::new(err)
    }
}

fn rfc3339(ts: DateTime<Utc>) -> String {
    ts.to_rfc3339_opts(SecondsFormat::Millis, true)
}

async fn check_status(response: Response) -> Result<Response, ClientError> {
    let status = response.status();
    if status.is_success() {
        return Ok(response);
    }
    let body = response.text().await.unwrap_or_default();
    let message = serde_json::from_str::<ErrorEnvelope>(&body)
        .map(|e| e.error.message)
        .unwrap_or(body);
    Err(ClientError::ServerError {
        status: status.as_u16(),
        message,
    })
}

#[async_trait]
impl AnalyticsBackend for HttpBackend {
    async fn insert_event(&self, event: &Event) -> anyhow::Result<()> {
        self.post_events(event).await.map_err(backend_error)?;
        debug!(event_id = %event.id, "Event sent");
        Ok(())
    }

    async fn insert_events(&self, events: &[Event]) -> anyhow::Result<()> {
        if events.is_empty() {
            return Ok(());
        }
        // Earlier chunks stay stored if a later one fails; ids dedupe on resend.
        for chunk in events.chunks(MAX_BATCH_SIZE) {
            self.post_events(chunk).await.map_err(backend_error)?;
            debug!(count = chunk.len(), "Event batch sent");
        }
        Ok(())
    }

    async fn select_events(&self, query: &EventQuery) -> anyhow::Result<Vec<Event>> {
        Ok(self.fetch_events(query).await?)
    }
}
