//! Dashboard summary: a single pass over a window of raw events.

use std::collections::HashMap;
use std::hash::Hash;
use std::sync::Arc;

use anyhow::{anyhow, Result};
use chrono::{DateTime, Days, LocalResult, NaiveDate, TimeZone, Timelike, Utc};
use chrono_tz::Tz;
use serde::{Deserialize, Serialize};

use crate::analytics::{AnalyticsBackend, EventQuery};
use crate::event::{DeviceType, Event, EventType, META_CATEGORY_NAME, META_PRODUCT_NAME};

/// Number of entries kept in `top_categories` / `top_products`.
pub const TOP_N: usize = 5;

/// Longest window a summary covers; larger requests are clamped.
pub const MAX_WINDOW_DAYS: u32 = 3660;

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct NamedCount {
    pub name: String,
    pub count: u64,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct DayCount {
    pub date: NaiveDate,
    pub views: u64,
    pub scans: u64,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct DeviceCount {
    pub device: DeviceType,
    pub count: u64,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct HourCount {
    pub hour: u32,
    pub count: u64,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Summary {
    pub days: u32,
    pub timezone: String,
    pub total_views: u64,
    pub total_scans: u64,
    /// Distinct session ids in the window.
    pub unique_users: u64,
    pub top_categories: Vec<NamedCount>,
    pub top_products: Vec<NamedCount>,
    /// One entry per day of the window, oldest first, zero-filled.
    pub views_by_day: Vec<DayCount>,
    /// Raw counts for the device types that occur; callers derive percentages.
    pub device_breakdown: Vec<DeviceCount>,
    /// Always 24 entries, hour 0 through 23 in the window's timezone.
    pub hourly_activity: Vec<HourCount>,
    /// Mean of (last - first event) over sessions with at least two events.
    /// Single-event sessions are left out entirely.
    pub avg_session_duration_seconds: f64,
    /// `true` when this is the canned summary served without a backend.
    pub demo: bool,
}

/// The calendar days `today - (days - 1) ..= today` in `timezone`.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct SummaryWindow {
    pub days: u32,
    pub today: NaiveDate,
    pub timezone: Tz,
}

impl SummaryWindow {
    /// `days` is clamped to `1..=MAX_WINDOW_DAYS`.
    pub fn new(days: u32, today: NaiveDate, timezone: Tz) -> Self {
        Self {
            days: days.clamp(1, MAX_WINDOW_DAYS),
            today,
            timezone,
        }
    }

    pub fn ending_at(days: u32, now: DateTime<Utc>, timezone: Tz) -> Self {
        Self::new(days, now.with_timezone(&timezone).date_naive(), timezone)
    }

    /// Saturates at the earliest representable date.
    pub fn first_day(&self) -> NaiveDate {
        self.today
            .checked_sub_days(Days::new(u64::from(self.days - 1)))
            .unwrap_or(NaiveDate::MIN)
    }

    pub fn dates(&self) -> impl Iterator<Item = NaiveDate> {
        let today = self.today;
        self.first_day()
            .iter_days()
            .take(self.days as usize)
            .take_while(move |date| *date <= today)
    }

    /// UTC `[start, end)` covering the window's local days.
    pub fn bounds(&self) -> Result<(DateTime<Utc>, DateTime<Utc>)> {
        let start = local_midnight_utc(self.timezone, self.first_day())?;
        let next_day = self
            .today
            .succ_opt()
            .ok_or_else(|| anyhow!("invalid_date_boundary"))?;
        let end = local_midnight_utc(self.timezone, next_day)?;
        Ok((start, end))
    }

    pub fn query(&self, location_id: &str) -> Result<EventQuery> {
        let (start, end) = self.bounds()?;
        Ok(EventQuery {
            location_id: location_id.to_string(),
            start,
            end,
        })
    }
}

fn local_midnight_utc(tz: Tz, date: NaiveDate) -> Result<DateTime<Utc>> {
    let midnight = date
        .and_hms_opt(0, 0, 0)
        .ok_or_else(|| anyhow!("invalid_date_boundary"))?;
    let zoned = match tz.from_local_datetime(&midnight) {
        LocalResult::Single(dt) => dt,
        LocalResult::Ambiguous(a, b) => a.min(b),
        // Midnight skipped by a DST jump: the day starts an hour later.
        LocalResult::None => tz
            .from_local_datetime(&(midnight + chrono::Duration::hours(1)))
            .earliest()
            .ok_or_else(|| anyhow!("invalid_timezone_transition"))?,
    };
    Ok(zoned.with_timezone(&Utc))
}

/// Insertion-ordered counter. Ties in [`Tally::top`] keep first-seen order.
struct Tally<K> {
    index: HashMap<K, usize>,
    counts: Vec<(K, u64)>,
}

impl<K: Eq + Hash + Clone> Tally<K> {
    fn new() -> Self {
        Self {
            index: HashMap::new(),
            counts: Vec::new(),
        }
    }

    fn add(&mut self, key: &K) {
        match self.index.get(key) {
            Some(&i) => self.counts[i].1 += 1,
            None => {
                self.index.insert(key.clone(), self.counts.len());
                self.counts.push((key.clone(), 1));
            }
        }
    }

    fn top(mut self, n: usize) -> Vec<(K, u64)> {
        // Stable sort: equal counts stay in first-seen order.
        self.counts.sort_by(|a, b| b.1.cmp(&a.1));
        self.counts.truncate(n);
        self.counts
    }
}

struct SessionSpan {
    first: DateTime<Utc>,
    last: DateTime<Utc>,
    events: usize,
}

/// Reduce `events` into a [`Summary`] for `window`.
///
/// Totals, top lists, devices, hours and sessions count every event passed
/// in; `views_by_day` only has slots for the window's days.
pub fn summarize(events: &[Event], window: &SummaryWindow) -> Summary {
    let tz = window.timezone;
    let mut total_views = 0u64;
    let mut total_scans = 0u64;
    let mut categories: Tally<String> = Tally::new();
    let mut products: Tally<String> = Tally::new();
    let mut devices: Tally<DeviceType> = Tally::new();
    let mut per_day: HashMap<NaiveDate, (u64, u64)> = HashMap::new();
    let mut hours = [0u64; 24];
    let mut sessions: HashMap<&str, SessionSpan> = HashMap::new();

    for event in events {
        let local = event.created_at.with_timezone(&tz);
        let day = per_day.entry(local.date_naive()).or_default();

        match event.event_type {
            EventType::PageView => {
                total_views += 1;
                day.0 += 1;
            }
            EventType::QrScan => {
                total_scans += 1;
                day.1 += 1;
            }
            EventType::CategoryClick => {
                if let Some(name) = event.metadata_str(META_CATEGORY_NAME) {
                    categories.add(&name.to_string());
                }
            }
            EventType::ProductView => {
                if let Some(name) = event.metadata_str(META_PRODUCT_NAME) {
                    products.add(&name.to_string());
                }
            }
            EventType::Search | EventType::LanguageChange => {}
        }

        devices.add(&event.device_type);
        hours[local.hour() as usize] += 1;

        sessions
            .entry(event.session_id.as_str())
            .and_modify(|span| {
                span.first = span.first.min(event.created_at);
                span.last = span.last.max(event.created_at);
                span.events += 1;
            })
            .or_insert(SessionSpan {
                first: event.created_at,
                last: event.created_at,
                events: 1,
            });
    }

    let (duration_total_ms, multi_event_sessions) = sessions
        .values()
        .filter(|span| span.events >= 2)
        .fold((0i64, 0u64), |(total, n), span| {
            (total + (span.last - span.first).num_milliseconds(), n + 1)
        });
    let avg_session_duration_seconds = if multi_event_sessions == 0 {
        0.0
    } else {
        duration_total_ms as f64 / 1000.0 / multi_event_sessions as f64
    };

    Summary {
        days: window.days,
        timezone: tz.name().to_string(),
        total_views,
        total_scans,
        unique_users: sessions.len() as u64,
        top_categories: named(categories.top(TOP_N)),
        top_products: named(products.top(TOP_N)),
        views_by_day: window
            .dates()
            .map(|date| {
                let (views, scans) = per_day.get(&date).copied().unwrap_or((0, 0));
                DayCount { date, views, scans }
            })
            .collect(),
        device_breakdown: devices
            .top(usize::MAX)
            .into_iter()
            .map(|(device, count)| DeviceCount { device, count })
            .collect(),
        hourly_activity: hours
            .iter()
            .enumerate()
            .map(|(hour, &count)| HourCount {
                hour: hour as u32,
                count,
            })
            .collect(),
        avg_session_duration_seconds,
        demo: false,
    }
}

fn named(counts: Vec<(String, u64)>) -> Vec<NamedCount> {
    counts
        .into_iter()
        .map(|(name, count)| NamedCount { name, count })
        .collect()
}

impl Summary {
    /// Canned, deterministic figures for demos and for running without a
    /// configured backend.
    pub fn demo(window: &SummaryWindow) -> Self {
        let views_by_day: Vec<DayCount> = window
            .dates()
            .enumerate()
            .map(|(i, date)| {
                let views = 40 + (i as u64 * 7) % 25;
                DayCount {
                    date,
                    views,
                    scans: views / 3,
                }
            })
            .collect();
        let total_views: u64 = views_by_day.iter().map(|d| d.views).sum();
        let total_scans: u64 = views_by_day.iter().map(|d| d.scans).sum();

        let demo_counts = |names: &[&str], base: u64| -> Vec<NamedCount> {
            names
                .iter()
                .enumerate()
                .map(|(i, name)| NamedCount {
                    name: (*name).to_string(),
                    count: base.saturating_sub(i as u64 * base / 6),
                })
                .collect()
        };

        let hourly_activity = (0u32..24)
            .map(|hour| {
                let count = match hour {
                    12..=14 => 30 + u64::from(hour - 12) * 4,
                    18..=21 => 45 - u64::from(hour - 18) * 5,
                    9..=11 | 15..=17 => 12,
                    22 | 23 => 8,
                    _ => 1,
                };
                HourCount { hour, count }
            })
            .collect();

        Self {
            days: window.days,
            timezone: window.timezone.name().to_string(),
            total_views,
            total_scans,
            unique_users: total_views * 3 / 5,
            top_categories: demo_counts(
                &["Mains", "Starters", "Desserts", "Drinks", "Specials"],
                total_views / 2,
            ),
            top_products: demo_counts(
                &[
                    "Margherita Pizza",
                    "Caesar Salad",
                    "Tiramisu",
                    "Lemonade",
                    "Grilled Salmon",
                ],
                total_views / 4,
            ),
            views_by_day,
            device_breakdown: vec![
                DeviceCount {
                    device: DeviceType::Mobile,
                    count: total_views * 68 / 100,
                },
                DeviceCount {
                    device: DeviceType::Desktop,
                    count: total_views * 22 / 100,
                },
                DeviceCount {
                    device: DeviceType::Tablet,
                    count: total_views * 10 / 100,
                },
            ],
            hourly_activity,
            avg_session_duration_seconds: 245.0,
            demo: true,
        }
    }
}

/// Fetches a window of events and reduces it. Serves [`Summary::demo`] when
/// no backend is configured.
pub struct SummaryService {
    backend: Option<Arc<dyn AnalyticsBackend>>,
    timezone: Tz,
}

impl SummaryService {
    pub fn new(backend: Option<Arc<dyn AnalyticsBackend>>, timezone: Tz) -> Self {
        Self { backend, timezone }
    }

    pub fn window(&self, days: u32) -> SummaryWindow {
        SummaryWindow::ending_at(days, Utc::now(), self.timezone)
    }

    /// Like [`SummaryService::try_summary_for`] but never fails: backend
    /// errors are logged and an empty, zero-filled summary is returned.
    pub async fn summary(&self, location_id: &str, days: u32) -> Summary {
        self.summary_for(location_id, &self.window(days)).await
    }

    pub async fn summary_for(&self, location_id: &str, window: &SummaryWindow) -> Summary {
        match self.try_summary_for(location_id, window).await {
            Ok(summary) => summary,
            Err(e) => {
                tracing::error!(location_id, error = %e, "Summary query failed, serving empty summary");
                summarize(&[], window)
            }
        }
    }

    pub async fn try_summary(&self, location_id: &str, days: u32) -> Result<Summary> {
        self.try_summary_for(location_id, &self.window(days)).await
    }

    pub async fn try_summary_for(
        &self,
        location_id: &str,
        window: &SummaryWindow,
    ) -> Result<Summary> {
        let Some(backend) = &self.backend else {
            return Ok(Summary::demo(window));
        };
        let events = backend.select_events(&window.query(location_id)?).await?;
        Ok(summarize(&events, window))
    }
}
