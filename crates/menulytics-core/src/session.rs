use std::sync::Arc;

use anyhow::Result;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::storage::{get_json, set_json, KeyValueStore};

pub const SESSION_ID_KEY: &str = "menu_session_id";
pub const SESSION_START_KEY: &str = "menu_session_start";

/// A browsing session. `start_time` is bumped on every tracked event, so the
/// timeout is an idle timeout rather than a maximum length.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Session {
    pub id: String,
    pub start_time: DateTime<Utc>,
}

/// Owns the session record in the injected key/value store.
pub struct SessionManager {
    store: Arc<dyn KeyValueStore>,
    timeout: chrono::Duration,
}

impl SessionManager {
    pub fn new(store: Arc<dyn KeyValueStore>, timeout: chrono::Duration) -> Self {
        Self { store, timeout }
    }

    pub fn timeout(&self) -> chrono::Duration {
        self.timeout
    }

    /// Return the stored session if it has been active within the timeout,
    /// otherwise mint and persist a new one.
    pub async fn get_or_create_session(&self, now: DateTime<Utc>) -> Result<Session> {
        let id: Option<String> = get_json(self.store.as_ref(), SESSION_ID_KEY).await?;
        let start_ms: Option<i64> = get_json(self.store.as_ref(), SESSION_START_KEY).await?;

        if let (Some(id), Some(start_ms)) = (id, start_ms) {
            if let Some(start_time) = DateTime::<Utc>::from_timestamp_millis(start_ms) {
                if !id.is_empty() && now - start_time < self.timeout {
                    return Ok(Session { id, start_time });
                }
            }
        }

        let session = Session {
            id: new_session_id(now),
            start_time: now,
        };
        set_json(self.store.as_ref(), SESSION_ID_KEY, &session.id).await?;
        set_json(
            self.store.as_ref(),
            SESSION_START_KEY,
            &session.start_time.timestamp_millis(),
        )
        .await?;
        tracing::debug!(session_id = %session.id, "Started new menu session");
        Ok(session)
    }

    /// Slide the idle window: rewrite the stored start time to `now`.
    pub async fn refresh(&self, now: DateTime<Utc>) -> Result<()> {
        set_json(
            self.store.as_ref(),
            SESSION_START_KEY,
            &now.timestamp_millis(),
        )
        .await
    }
}

/// `"<unix-millis>-<9 hex chars>"`.
fn new_session_id(now: DateTime<Utc>) -> String {
    use rand::RngCore;
    let mut buf = [0u8; 5];
    rand::thread_rng().fill_bytes(&mut buf);
    let suffix = hex::encode(buf);
    format!("{}-{}", now.timestamp_millis(), &suffix[..9])
}
