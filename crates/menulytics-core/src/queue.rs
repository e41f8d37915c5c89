use std::sync::Arc;

use anyhow::Result;
use serde_json::Value;
use tracing::warn;

use crate::event::Event;
use crate::storage::{set_json, KeyValueStore};

pub const OFFLINE_QUEUE_KEY: &str = "analytics_offline_queue";

/// Events that could not be delivered, persisted as one JSON array.
///
/// Every operation is a read-modify-write of the whole array; callers that
/// share a store must serialize access (the tracker holds a mutex for this).
pub struct OfflineQueue {
    store: Arc<dyn KeyValueStore>,
}

impl OfflineQueue {
    pub fn new(store: Arc<dyn KeyValueStore>) -> Self {
        Self { store }
    }

    /// Entries that no longer decode as an [`Event`] are skipped one by one,
    /// so a single bad entry never costs the rest of the queue.
    pub async fn load(&self) -> Result<Vec<Event>> {
        let Some(raw) = self.store.get(OFFLINE_QUEUE_KEY).await? else {
            return Ok(Vec::new());
        };
        let entries: Vec<Value> = match serde_json::from_str(&raw) {
            Ok(entries) => entries,
            Err(e) => {
                warn!(error = %e, "Offline queue is not a JSON array, starting empty");
                return Ok(Vec::new());
            }
        };

        let total = entries.len();
        let events: Vec<Event> = entries
            .into_iter()
            .filter_map(|entry| serde_json::from_value(entry).ok())
            .collect();
        if events.len() < total {
            warn!(
                skipped = total - events.len(),
                kept = events.len(),
                "Skipping unreadable offline events"
            );
        }
        Ok(events)
    }

    pub async fn push(&self, event: Event) -> Result<usize> {
        let mut queued = self.load().await?;
        queued.push(event);
        set_json(self.store.as_ref(), OFFLINE_QUEUE_KEY, &queued).await?;
        Ok(queued.len())
    }

    /// Overwrite the queue with `events`; empty removes the key.
    pub async fn replace(&self, events: &[Event]) -> Result<()> {
        if events.is_empty() {
            self.clear().await
        } else {
            set_json(self.store.as_ref(), OFFLINE_QUEUE_KEY, events).await
        }
    }

    pub async fn len(&self) -> Result<usize> {
        Ok(self.load().await?.len())
    }

    pub async fn is_empty(&self) -> Result<bool> {
        Ok(self.len().await? == 0)
    }

    pub async fn clear(&self) -> Result<()> {
        self.store.remove(OFFLINE_QUEUE_KEY).await
    }
}
