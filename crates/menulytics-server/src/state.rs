use std::collections::{HashMap, VecDeque};
use std::sync::Arc;
use std::time::Duration;

use tokio::sync::Mutex;
use tokio::time::Instant;
use tracing::{debug, error, info};

use menulytics_core::{
    analytics::AnalyticsBackend, config::Config, event::Event, summary::SummaryService,
};
use menulytics_duckdb::DuckDbBackend;

use crate::error::AppError;

/// Largest batch accepted by `POST /api/events`; the HTTP client splits
/// offline queues at the same size.
pub use menulytics_core::event::MAX_BATCH_SIZE;

/// Requests allowed per client IP per [`RATE_LIMIT_WINDOW`].
pub const RATE_LIMIT_PER_MINUTE: usize = 600;

pub const RATE_LIMIT_WINDOW: Duration = Duration::from_secs(60);

/// Pending events beyond `buffer_max_size * OVERLOAD_FACTOR` are refused
/// with 503 until a flush succeeds.
const OVERLOAD_FACTOR: usize = 10;

/// Shared application state injected into every Axum handler via
/// [`axum::extract::State`].
pub struct AppState {
    pub db: Arc<DuckDbBackend>,

    /// Parsed configuration, loaded once at startup from environment variables.
    pub config: Arc<Config>,

    /// Summary reads go through the same backend trait the clients use.
    pub summaries: SummaryService,

    /// In-memory event buffer.
    ///
    /// Lock, drain, release, then write to DuckDB. The lock is held only long
    /// enough to `std::mem::take` the buffer so the DB write does not block
    /// incoming ingest requests.
    pub buffer: Arc<Mutex<Vec<Event>>>,

    /// Per-IP sliding-window rate limiter for `POST /api/events`.
    ///
    /// Key: IP address string. Value: request timestamps within the last
    /// 60 seconds. Clients whose window has emptied are pruned by the flush
    /// loop.
    rate_limiter: Arc<Mutex<HashMap<String, VecDeque<Instant>>>>,
}

impl AppState {
    pub fn new(db: DuckDbBackend, config: Config) -> Self {
        let db = Arc::new(db);
        let summaries = SummaryService::new(
            Some(Arc::clone(&db) as Arc<dyn AnalyticsBackend>),
            config.timezone,
        );
        Self {
            db,
            config: Arc::new(config),
            summaries,
            buffer: Arc::new(Mutex::new(Vec::new())),
            rate_limiter: Arc::new(Mutex::new(HashMap::new())),
        }
    }

    /// Check whether `ip` is within the per-minute rate limit.
    ///
    /// Returns `true` if the request should proceed, `false` if it should be
    /// rejected with 429. Slides the window on every call.
    pub async fn check_rate_limit(&self, ip: &str) -> bool {
        if self.config.rate_limit_disable {
            return true;
        }
        let mut map = self.rate_limiter.lock().await;
        let window = map.entry(ip.to_string()).or_default();
        let now = Instant::now();
        expire_requests(window, now);
        if window.len() >= RATE_LIMIT_PER_MINUTE {
            return false;
        }
        window.push_back(now);
        true
    }

    /// Forget clients with no request inside the window. Returns how many
    /// were removed.
    pub async fn prune_rate_limiter(&self) -> usize {
        let mut map = self.rate_limiter.lock().await;
        let before = map.len();
        let now = Instant::now();
        map.retain(|_, window| {
            expire_requests(window, now);
            !window.is_empty()
        });
        before - map.len()
    }

    /// Number of client IPs currently tracked by the rate limiter.
    pub async fn rate_limited_clients(&self) -> usize {
        self.rate_limiter.lock().await.len()
    }

    /// Append `events` to the in-memory buffer.
    ///
    /// Refuses the whole batch when too many events are already pending
    /// (DuckDB writes are failing or falling behind). An empty buffer takes
    /// any batch, so a large batch alone never trips the guard. Reaching
    /// `config.buffer_max_size` triggers an immediate flush.
    pub async fn push_events(&self, events: Vec<Event>) -> Result<(), AppError> {
        let max_pending = self.config.buffer_max_size.saturating_mul(OVERLOAD_FACTOR);
        let should_flush = {
            let mut buf = self.buffer.lock().await;
            if !buf.is_empty() && buf.len() + events.len() > max_pending {
                return Err(AppError::IngestOverloaded {
                    retry_after_seconds: 5,
                });
            }
            buf.extend(events);
            buf.len() >= self.config.buffer_max_size
        };

        if should_flush {
            self.flush_buffer().await;
        }
        Ok(())
    }

    /// Drain the buffer and write all pending events to DuckDB.
    ///
    /// On failure the batch is put back in front of anything that arrived
    /// meanwhile, so the next flush retries it.
    pub async fn flush_buffer(&self) {
        let batch: Vec<Event> = {
            let mut buf = self.buffer.lock().await;
            std::mem::take(&mut *buf)
        };

        if batch.is_empty() {
            return;
        }

        match self.db.insert_events(&batch).await {
            Ok(written) => {
                info!(count = batch.len(), written, "Buffer flushed to DuckDB");
            }
            Err(e) => {
                error!(count = batch.len(), error = %e, "Buffer flush failed, retrying on next flush");
                let mut buf = self.buffer.lock().await;
                let arrived = std::mem::replace(&mut *buf, batch);
                buf.extend(arrived);
            }
        }
    }

    /// Background loop: flush the buffer on a fixed interval and prune idle
    /// rate limiter entries.
    ///
    /// Spawned as a `tokio::spawn` task in `main.rs`. Runs until the process
    /// exits.
    pub async fn run_buffer_flush_loop(self: Arc<Self>) {
        let interval = self.config.buffer_flush_interval();
        let mut ticker = tokio::time::interval(interval);
        loop {
            ticker.tick().await;
            self.flush_buffer().await;
            let pruned = self.prune_rate_limiter().await;
            if pruned > 0 {
                debug!(pruned, "Pruned idle rate limiter entries");
            }
        }
    }
}

fn expire_requests(window: &mut VecDeque<Instant>, now: Instant) {
    let Some(cutoff) = now.checked_sub(RATE_LIMIT_WINDOW) else {
        return;
    };
    while window.front().is_some_and(|t| *t < cutoff) {
        window.pop_front();
    }
}
