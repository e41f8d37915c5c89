use std::time::Duration;

use chrono_tz::Tz;

use crate::error::CoreError;

/// Server configuration, loaded once at startup.
#[derive(Debug, Clone)]
pub struct Config {
    pub port: u16,
    pub data_dir: String,
    pub duckdb_memory_limit: String,
    pub cors_origins: Vec<String>,
    /// Default timezone for summary day/hour bucketing when a request does
    /// not name one.
    pub timezone: Tz,
    pub buffer_flush_interval_ms: u64,
    pub buffer_max_size: usize,
    pub rate_limit_disable: bool,
}

impl Config {
    pub fn from_env() -> Result<Self, CoreError> {
        Self::from_lookup(|key| std::env::var(key).ok())
    }

    /// Build a config from an arbitrary variable source. `from_env` passes
    /// the process environment; tests pass a map.
    pub fn from_lookup(lookup: impl Fn(&str) -> Option<String>) -> Result<Self, CoreError> {
        let port = match lookup("MENULYTICS_PORT") {
            Some(raw) => raw.parse().map_err(|e| CoreError::InvalidConfig {
                key: "MENULYTICS_PORT",
                reason: format!("{e}"),
            })?,
            None => 3000,
        };
        let timezone = match lookup("MENULYTICS_TIMEZONE") {
            Some(raw) => raw
                .trim()
                .parse::<Tz>()
                .map_err(|_| CoreError::InvalidTimezone(raw.clone()))?,
            None => Tz::UTC,
        };

        Ok(Self {
            port,
            data_dir: lookup("MENULYTICS_DATA_DIR").unwrap_or_else(|| "./data".to_string()),
            duckdb_memory_limit: lookup("MENULYTICS_DUCKDB_MEMORY")
                .unwrap_or_else(|| "1GB".to_string()),
            cors_origins: lookup("MENULYTICS_CORS_ORIGINS")
                .map(|v| {
                    v.split(',')
                        .map(str::trim)
                        .filter(|s| !s.is_empty())
                        .map(str::to_string)
                        .collect()
                })
                .unwrap_or_default(),
            timezone,
            buffer_flush_interval_ms: lookup("MENULYTICS_BUFFER_FLUSH_MS")
                .and_then(|v| v.parse().ok())
                .unwrap_or(1000),
            buffer_max_size: lookup("MENULYTICS_BUFFER_MAX")
                .and_then(|v| v.parse().ok())
                .unwrap_or(1000),
            rate_limit_disable: lookup("MENULYTICS_RATE_LIMIT_DISABLE")
                .map(|v| v == "true" || v == "1")
                .unwrap_or(false),
        })
    }

    pub fn buffer_flush_interval(&self) -> Duration {
        Duration::from_millis(self.buffer_flush_interval_ms)
    }
}

/// Client-side tracker configuration.
#[derive(Debug, Clone)]
pub struct TrackerConfig {
    /// Base URL of the ingest server. `None` means no remote backend is
    /// configured and every event goes to the offline queue.
    pub endpoint: Option<String>,
    pub session_timeout: chrono::Duration,
    pub http_timeout: Duration,
}

impl Default for TrackerConfig {
    fn default() -> Self {
        Self {
            endpoint: None,
            session_timeout: chrono::Duration::minutes(30),
            http_timeout: Duration::from_millis(10_000),
        }
    }
}

impl TrackerConfig {
    pub fn from_env() -> Self {
        Self::from_lookup(|key| std::env::var(key).ok())
    }

    pub fn from_lookup(lookup: impl Fn(&str) -> Option<String>) -> Self {
        let defaults = Self::default();
        Self {
            endpoint: lookup("MENULYTICS_ENDPOINT")
                .map(|v| v.trim().trim_end_matches('/').to_string())
                .filter(|v| !v.is_empty()),
            session_timeout: lookup("MENULYTICS_SESSION_TIMEOUT_MINUTES")
                .and_then(|v| v.parse::<i64>().ok())
                .filter(|m| *m > 0)
                .map(chrono::Duration::minutes)
                .unwrap_or(defaults.session_timeout),
            http_timeout: lookup("MENULYTICS_HTTP_TIMEOUT_MS")
                .and_then(|v| v.parse::<u64>().ok())
                .map(Duration::from_millis)
                .unwrap_or(defaults.http_timeout),
        }
    }
}

#[cfg(test)]
mod tests {
    use std::collections::HashMap;

    use super::*;

    fn lookup_from(pairs: &[(&str, &str)]) -> impl Fn(&str) -> Option<String> {
        let map: HashMap<String, String> = pairs
            .iter()
            .map(|(k, v)| (k.to_string(), v.to_string()))
            .collect();
        move |key| map.get(key).cloned()
    }

    #[test]
    fn defaults_apply_when_unset() {
        let cfg = Config::from_lookup(lookup_from(&[])).expect("config");
        assert_eq!(cfg.port, 3000);
        assert_eq!(cfg.data_dir, "./data");
        assert_eq!(cfg.timezone, Tz::UTC);
        assert!(cfg.cors_origins.is_empty());
        assert_eq!(cfg.buffer_flush_interval(), Duration::from_millis(1000));
    }

    #[test]
    fn invalid_port_is_rejected() {
        let err = Config::from_lookup(lookup_from(&[("MENULYTICS_PORT", "http")]));
        assert!(err.is_err());
    }

    #[test]
    fn timezone_and_origins_are_parsed() {
        let cfg = Config::from_lookup(lookup_from(&[
            ("MENULYTICS_TIMEZONE", "Europe/Warsaw"),
            ("MENULYTICS_CORS_ORIGINS", "https://a.example, https://b.example,"),
        ]))
        .expect("config");
        assert_eq!(cfg.timezone, chrono_tz::Europe::Warsaw);
        assert_eq!(cfg.cors_origins.len(), 2);
    }

    #[test]
    fn tracker_config_trims_endpoint() {
        let cfg = TrackerConfig::from_lookup(lookup_from(&[
            ("MENULYTICS_ENDPOINT", "http://localhost:3000/"),
            ("MENULYTICS_SESSION_TIMEOUT_MINUTES", "0"),
        ]));
        assert_eq!(cfg.endpoint.as_deref(), Some("http://localhost:3000"));
        assert_eq!(cfg.session_timeout, chrono::Duration::minutes(30));
    }
}
