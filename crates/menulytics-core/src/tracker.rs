//! Client-side event emitter with an offline fallback queue.
//!
//! `track` never fails from the caller's point of view: remote errors are
//! logged and the event is queued locally instead. The queue is flushed as a
//! single batch when the tracker goes back online. Events the backend refuses
//! outright are dropped, not queued.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

use anyhow::Result;
use chrono::{DateTime, Utc};
use serde_json::Value;
use tokio::sync::{Mutex, RwLock};
use tracing::{error, info, warn};

use crate::analytics::{is_rejection, AnalyticsBackend};
use crate::config::TrackerConfig;
use crate::device::DeviceInfo;
use crate::error::CoreError;
use crate::event::{Event, EventType};
use crate::preferences;
use crate::queue::OfflineQueue;
use crate::session::{Session, SessionManager};
use crate::storage::KeyValueStore;

/// Facts about the client that are copied onto every event.
#[derive(Debug, Clone, Default)]
pub struct ClientContext {
    pub user_agent: String,
    pub screen_size: Option<String>,
    /// Browser-reported language; the stored preference wins when set.
    pub language: Option<String>,
    pub referrer: Option<String>,
    pub page_url: Option<String>,
}

/// Where a tracked event ended up.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Delivery {
    Sent,
    Queued,
    /// Neither delivered nor queued (local storage failed). Logged.
    Dropped,
    /// Invalid, or refused by the backend. Not queued.
    Rejected,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SyncOutcome {
    /// Nothing to do: no backend, offline, or empty queue.
    Idle,
    Flushed(usize),
    /// Delivery failed; this many events remain queued.
    Failed(usize),
}

pub struct Tracker {
    backend: Option<Arc<dyn AnalyticsBackend>>,
    store: Arc<dyn KeyValueStore>,
    sessions: SessionManager,
    queue: OfflineQueue,
    /// Serializes every read-modify-write of the offline queue, including
    /// the whole load/insert/clear sequence of a flush.
    queue_lock: Mutex<()>,
    online: AtomicBool,
    context: RwLock<ClientContext>,
    device: DeviceInfo,
}

impl Tracker {
    /// `backend = None` means remote delivery is not configured: every event
    /// is queued locally.
    pub fn new(
        store: Arc<dyn KeyValueStore>,
        backend: Option<Arc<dyn AnalyticsBackend>>,
        context: ClientContext,
        config: &TrackerConfig,
    ) -> Self {
        let device = DeviceInfo::from_user_agent(&context.user_agent);
        Self {
            backend,
            sessions: SessionManager::new(Arc::clone(&store), config.session_timeout),
            queue: OfflineQueue::new(Arc::clone(&store)),
            store,
            queue_lock: Mutex::new(()),
            online: AtomicBool::new(true),
            context: RwLock::new(context),
            device,
        }
    }

    pub fn device(&self) -> &DeviceInfo {
        &self.device
    }

    pub fn is_online(&self) -> bool {
        self.online.load(Ordering::SeqCst)
    }

    /// Flush anything left over from a previous run if we start online.
    pub async fn init(&self) -> SyncOutcome {
        if self.is_online() {
            self.sync_offline_events().await
        } else {
            SyncOutcome::Idle
        }
    }

    /// Record a connectivity change. Going from offline to online flushes
    /// the queue and returns the outcome; any other transition returns `None`.
    pub async fn set_online(&self, online: bool) -> Option<SyncOutcome> {
        let was_online = self.online.swap(online, Ordering::SeqCst);
        if online && !was_online {
            info!("Connectivity restored, syncing offline analytics events");
            Some(self.sync_offline_events().await)
        } else {
            None
        }
    }

    pub async fn set_page_url(&self, page_url: Option<String>) {
        self.context.write().await.page_url = page_url;
    }

    pub async fn current_session(&self) -> Result<Session> {
        self.sessions.get_or_create_session(Utc::now()).await
    }

    pub async fn queued_events(&self) -> Result<usize> {
        let _guard = self.queue_lock.lock().await;
        self.queue.len().await
    }

    pub async fn track(&self, event_type: EventType, location_id: &str, metadata: Value) -> Delivery {
        self.track_at(event_type, location_id, metadata, Utc::now())
            .await
    }

    /// `track` with an explicit clock reading.
    pub async fn track_at(
        &self,
        event_type: EventType,
        location_id: &str,
        metadata: Value,
        now: DateTime<Utc>,
    ) -> Delivery {
        let event = match self.build_event(event_type, location_id, metadata, now).await {
            Ok(event) => event,
            Err(e) if is_rejection(&e) => {
                warn!(error = %e, %event_type, "Invalid analytics event, not tracking");
                return Delivery::Rejected;
            }
            Err(e) => {
                error!(error = %e, %event_type, "Failed to build analytics event");
                return Delivery::Dropped;
            }
        };

        if let Err(e) = self.sessions.refresh(now).await {
            warn!(error = %e, "Failed to refresh analytics session");
        }

        if let Some(backend) = self.remote() {
            match backend.insert_event(&event).await {
                Ok(()) => return Delivery::Sent,
                Err(e) if is_rejection(&e) => {
                    warn!(error = %e, event_id = %event.id, "Backend refused analytics event, dropping it");
                    return Delivery::Rejected;
                }
                Err(e) => {
                    warn!(error = %e, event_id = %event.id, "Remote insert failed, queueing event offline");
                }
            }
        }

        self.enqueue(event).await
    }

    /// Store the customer's language choice and record the change.
    pub async fn set_language(&self, location_id: &str, language: &str) -> Delivery {
        if let Err(e) = preferences::set_language(self.store.as_ref(), language).await {
            warn!(error = %e, "Failed to persist language preference");
        }
        self.track(
            EventType::LanguageChange,
            location_id,
            serde_json::json!({ "language": language.trim() }),
        )
        .await
    }

    /// Send the whole offline queue in one batch; clear it only on success.
    ///
    /// If the backend refuses the batch itself, the events are resent one at
    /// a time so the refused ones can be dropped and the rest delivered.
    pub async fn sync_offline_events(&self) -> SyncOutcome {
        let Some(backend) = self.remote() else {
            return SyncOutcome::Idle;
        };

        let _guard = self.queue_lock.lock().await;
        let queued = match self.queue.load().await {
            Ok(queued) => queued,
            Err(e) => {
                error!(error = %e, "Failed to read offline analytics queue");
                return SyncOutcome::Idle;
            }
        };
        if queued.is_empty() {
            return SyncOutcome::Idle;
        }

        let count = queued.len();
        match backend.insert_events(&queued).await {
            Ok(()) => {
                if let Err(e) = self.queue.clear().await {
                    // Re-sending is harmless: inserts are idempotent by event id.
                    error!(error = %e, count, "Offline events synced but queue not cleared");
                }
                info!(count, "Offline analytics events synced");
                SyncOutcome::Flushed(count)
            }
            Err(e) if is_rejection(&e) => {
                warn!(error = %e, count, "Offline batch refused, resending events one by one");
                self.resend_individually(backend, queued).await
            }
            Err(e) => {
                warn!(error = %e, count, "Offline sync failed, keeping queue for next attempt");
                SyncOutcome::Failed(count)
            }
        }
    }

    /// Caller holds `queue_lock`. Stops at the first transient failure and
    /// keeps that event and everything after it.
    async fn resend_individually(
        &self,
        backend: &Arc<dyn AnalyticsBackend>,
        queued: Vec<Event>,
    ) -> SyncOutcome {
        let mut sent = 0;
        let mut dropped = 0;
        let mut kept = Vec::new();
        let mut pending = queued.into_iter();

        for event in pending.by_ref() {
            match backend.insert_event(&event).await {
                Ok(()) => sent += 1,
                Err(e) if is_rejection(&e) => {
                    warn!(error = %e, event_id = %event.id, "Dropping offline event refused by backend");
                    dropped += 1;
                }
                Err(e) => {
                    warn!(error = %e, event_id = %event.id, "Offline resend interrupted");
                    kept.push(event);
                    break;
                }
            }
        }
        kept.extend(pending);

        if let Err(e) = self.queue.replace(&kept).await {
            error!(error = %e, sent, dropped, "Failed to rewrite offline analytics queue");
        }
        info!(sent, dropped, remaining = kept.len(), "Offline events resent individually");

        if kept.is_empty() {
            SyncOutcome::Flushed(sent)
        } else {
            SyncOutcome::Failed(kept.len())
        }
    }

    fn remote(&self) -> Option<&Arc<dyn AnalyticsBackend>> {
        self.backend.as_ref().filter(|_| self.is_online())
    }

    async fn enqueue(&self, event: Event) -> Delivery {
        let _guard = self.queue_lock.lock().await;
        match self.queue.push(event).await {
            Ok(len) => {
                info!(queued = len, "Analytics event queued offline");
                Delivery::Queued
            }
            Err(e) => {
                error!(error = %e, "Failed to queue analytics event");
                Delivery::Dropped
            }
        }
    }

    async fn build_event(
        &self,
        event_type: EventType,
        location_id: &str,
        metadata: Value,
        now: DateTime<Utc>,
    ) -> Result<Event> {
        if location_id.trim().is_empty() {
            return Err(CoreError::Rejected("location_id must not be empty".to_string()).into());
        }
        let session = self.sessions.get_or_create_session(now).await?;
        if session.id.trim().is_empty() {
            return Err(CoreError::Rejected("session_id must not be empty".to_string()).into());
        }
        let stored_language = preferences::get_language(self.store.as_ref()).await?;
        let context = self.context.read().await;

        let metadata = match metadata {
            Value::Null => Value::Object(serde_json::Map::new()),
            other => other,
        };

        Ok(Event {
            id: uuid::Uuid::new_v4().to_string(),
            location_id: location_id.to_string(),
            event_type,
            session_id: session.id,
            device_type: self.device.device_type,
            browser: self.device.browser.clone(),
            os: self.device.os.clone(),
            screen_size: context.screen_size.clone(),
            language: stored_language.or_else(|| context.language.clone()),
            referrer: context.referrer.clone(),
            page_url: context.page_url.clone(),
            metadata,
            created_at: now,
        })
    }
}
