use std::fmt;
use std::str::FromStr;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::error::CoreError;

/// What the customer did on the menu.
///
/// Wire and storage form is the snake_case name, e.g. `"qr_scan"`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum EventType {
    PageView,
    QrScan,
    CategoryClick,
    ProductView,
    Search,
    LanguageChange,
}

impl EventType {
    pub fn as_str(&self) -> &'static str {
        match self {
            EventType::PageView => "page_view",
            EventType::QrScan => "qr_scan",
            EventType::CategoryClick => "category_click",
            EventType::ProductView => "product_view",
            EventType::Search => "search",
            EventType::LanguageChange => "language_change",
        }
    }
}

impl fmt::Display for EventType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for EventType {
    type Err = CoreError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "page_view" => Ok(EventType::PageView),
            "qr_scan" => Ok(EventType::QrScan),
            "category_click" => Ok(EventType::CategoryClick),
            "product_view" => Ok(EventType::ProductView),
            "search" => Ok(EventType::Search),
            "language_change" => Ok(EventType::LanguageChange),
            other => Err(CoreError::UnknownValue {
                kind: "event type",
                value: other.to_string(),
            }),
        }
    }
}

/// Coarse device class derived from the user-agent.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum DeviceType {
    Mobile,
    Tablet,
    Desktop,
}

impl DeviceType {
    pub fn as_str(&self) -> &'static str {
        match self {
            DeviceType::Mobile => "mobile",
            DeviceType::Tablet => "tablet",
            DeviceType::Desktop => "desktop",
        }
    }
}

impl fmt::Display for DeviceType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for DeviceType {
    type Err = CoreError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "mobile" => Ok(DeviceType::Mobile),
            "tablet" => Ok(DeviceType::Tablet),
            "desktop" => Ok(DeviceType::Desktop),
            other => Err(CoreError::UnknownValue {
                kind: "device type",
                value: other.to_string(),
            }),
        }
    }
}

/// Largest batch the ingest server accepts in one request. Remote backends
/// split bigger batches.
pub const MAX_BATCH_SIZE: usize = 1000;

/// Metadata key carrying the category name on `category_click` events.
pub const META_CATEGORY_NAME: &str = "category_name";
/// Metadata key carrying the dish name on `product_view` events.
pub const META_PRODUCT_NAME: &str = "product_name";

/// A single tracked customer action. Mirrors the `analytics_events` table.
///
/// `id` is generated on the client so that re-sending a queued event is
/// harmless: storage ignores an insert whose id already exists.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Event {
    pub id: String,
    pub location_id: String,
    #[serde(rename = "type")]
    pub event_type: EventType,
    pub session_id: String,
    pub device_type: DeviceType,
    pub browser: String,
    pub os: String,
    pub screen_size: Option<String>,
    pub language: Option<String>,
    pub referrer: Option<String>,
    pub page_url: Option<String>,
    /// Free-form JSON object; see the `META_*` keys for the ones the
    /// summary reads.
    #[serde(default = "empty_metadata")]
    pub metadata: serde_json::Value,
    pub created_at: DateTime<Utc>,
}

fn empty_metadata() -> serde_json::Value {
    serde_json::Value::Object(serde_json::Map::new())
}

impl Event {
    /// Read a string field out of `metadata`, ignoring blanks.
    pub fn metadata_str(&self, key: &str) -> Option<&str> {
        self.metadata
            .get(key)
            .and_then(|v| v.as_str())
            .map(str::trim)
            .filter(|s| !s.is_empty())
    }
}

/// Accepts either a single event or a batch array at `POST /api/events`.
#[derive(Debug, Deserialize)]
#[serde(untagged)]
pub enum EventOrBatch {
    Single(Box<Event>),
    Batch(Vec<Event>),
}

impl EventOrBatch {
    pub fn into_vec(self) -> Vec<Event> {
        match self {
            EventOrBatch::Single(e) => vec![*e],
            EventOrBatch::Batch(v) => v,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn event_type_round_trips_through_str() {
        for t in [
            EventType::PageView,
            EventType::QrScan,
            EventType::CategoryClick,
            EventType::ProductView,
            EventType::Search,
            EventType::LanguageChange,
        ] {
            assert_eq!(t.as_str().parse::<EventType>().expect("parse"), t);
        }
        assert!("checkout".parse::<EventType>().is_err());
    }

    #[test]
    fn event_wire_uses_type_field() {
        let raw = json!({
            "id": "e1",
            "location_id": "loc1",
            "type": "qr_scan",
            "session_id": "s1",
            "device_type": "mobile",
            "browser": "Safari",
            "os": "iOS",
            "screen_size": null,
            "language": "en",
            "referrer": null,
            "page_url": "/menu",
            "created_at": "2026-01-05T12:00:00Z"
        });
        let event: Event = serde_json::from_value(raw).expect("deserialize");
        assert_eq!(event.event_type, EventType::QrScan);
        assert_eq!(event.device_type, DeviceType::Mobile);
        assert!(event.metadata.is_object());
    }

    #[test]
    fn event_or_batch_accepts_both_shapes() {
        let one = json!({
            "id": "e1", "location_id": "l", "type": "page_view", "session_id": "s",
            "device_type": "desktop", "browser": "Chrome", "os": "Linux",
            "screen_size": null, "language": null, "referrer": null, "page_url": null,
            "metadata": {}, "created_at": "2026-01-05T12:00:00Z"
        });
        let single: EventOrBatch = serde_json::from_value(one.clone()).expect("single");
        assert_eq!(single.into_vec().len(), 1);
        let batch: EventOrBatch = serde_json::from_value(json!([one.clone(), one])).expect("batch");
        assert_eq!(batch.into_vec().len(), 2);
    }

    #[test]
    fn metadata_str_skips_blank_values() {
        let raw = json!({
            "id": "e1", "location_id": "l", "type": "category_click", "session_id": "s",
            "device_type": "desktop", "browser": "Chrome", "os": "Linux",
            "screen_size": null, "language": null, "referrer": null, "page_url": null,
            "metadata": {"category_name": "  ", "product_name": "Soup"},
            "created_at": "2026-01-05T12:00:00Z"
        });
        let event: Event = serde_json::from_value(raw).expect("deserialize");
        assert_eq!(event.metadata_str(META_CATEGORY_NAME), None);
        assert_eq!(event.metadata_str(META_PRODUCT_NAME), Some("Soup"));
    }
}
