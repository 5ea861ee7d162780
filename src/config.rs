use std::path::PathBuf;
use std::time::Duration;

use crate::engine::EngineSettings;

/// Process configuration, read from `STAYLINE_*` environment variables.
#[derive(Debug, Clone)]
pub struct Config {
    pub data_dir: PathBuf,
    /// JSON catalog snapshot to load at startup.
    pub catalog_path: Option<PathBuf>,
    pub metrics_port: Option<u16>,
    pub io_timeout: Duration,
    pub compact_threshold: u64,
    pub sweep_interval: Duration,
    pub owner_test_bookings: bool,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            data_dir: PathBuf::from("./data"),
            catalog_path: None,
            metrics_port: None,
            io_timeout: Duration::from_millis(5000),
            compact_threshold: 1000,
            sweep_interval: Duration::from_secs(300),
            owner_test_bookings: false,
        }
    }
}

fn parse_bool(raw: &str) -> Option<bool> {
    match raw.trim().to_ascii_lowercase().as_str() {
        "1" | "true" | "yes" | "on" => Some(true),
        "0" | "false" | "no" | "off" => Some(false),
        _ => None,
    }
}

impl Config {
    pub fn from_env() -> Self {
        Self::from_lookup(|key| std::env::var(key).ok())
    }

    /// Build from any key lookup. Unparseable values fall back to defaults.
    pub fn from_lookup(get: impl Fn(&str) -> Option<String>) -> Self {
        let defaults = Self::default();
        Self {
            data_dir: get("STAYLINE_DATA_DIR")
                .map(PathBuf::from)
                .unwrap_or(defaults.data_dir),
            catalog_path: get("STAYLINE_CATALOG").map(PathBuf::from),
            metrics_port: get("STAYLINE_METRICS_PORT").and_then(|s| s.parse().ok()),
            io_timeout: get("STAYLINE_IO_TIMEOUT_MS")
                .and_then(|s| s.parse().ok())
                .map(Duration::from_millis)
                .unwrap_or(defaults.io_timeout),
            compact_threshold: get("STAYLINE_COMPACT_THRESHOLD")
                .and_then(|s| s.parse().ok())
                .unwrap_or(defaults.compact_threshold),
            sweep_interval: get("STAYLINE_SWEEP_INTERVAL_SECS")
                .and_then(|s| s.parse().ok())
                .filter(|secs: &u64| *secs > 0)
                .map(Duration::from_secs)
                .unwrap_or(defaults.sweep_interval),
            owner_test_bookings: get("STAYLINE_OWNER_TEST_BOOKINGS")
                .and_then(|s| parse_bool(&s))
                .unwrap_or(defaults.owner_test_bookings),
        }
    }

    pub fn wal_path(&self) -> PathBuf {
        self.data_dir.join("calendar.wal")
    }

    pub fn engine_settings(&self) -> EngineSettings {
        EngineSettings {
            io_timeout: self.io_timeout,
            owner_test_bookings: self.owner_test_bookings,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashMap;

    fn lookup(pairs: &[(&str, &str)]) -> impl Fn(&str) -> Option<String> {
        let map: HashMap<String, String> = pairs
            .iter()
            .map(|(k, v)| (k.to_string(), v.to_string()))
            .collect();
        move |key| map.get(key).cloned()
    }

    #[test]
    fn defaults_when_unset() {
        let cfg = Config::from_lookup(lookup(&[]));
        assert_eq!(cfg.data_dir, PathBuf::from("./data"));
        assert_eq!(cfg.io_timeout, Duration::from_secs(5));
        assert_eq!(cfg.compact_threshold, 1000);
        assert!(!cfg.owner_test_bookings);
        assert!(cfg.catalog_path.is_none());
    }

    #[test]
    fn reads_overrides() {
        let cfg = Config::from_lookup(lookup(&[
            ("STAYLINE_DATA_DIR", "/var/lib/stayline"),
            ("STAYLINE_METRICS_PORT", "9100"),
            ("STAYLINE_IO_TIMEOUT_MS", "250"),
            ("STAYLINE_OWNER_TEST_BOOKINGS", "yes"),
            ("STAYLINE_SWEEP_INTERVAL_SECS", "60"),
        ]));
        assert_eq!(cfg.wal_path(), PathBuf::from("/var/lib/stayline/calendar.wal"));
        assert_eq!(cfg.metrics_port, Some(9100));
        assert_eq!(cfg.engine_settings().io_timeout, Duration::from_millis(250));
        assert!(cfg.engine_settings().owner_test_bookings);
        assert_eq!(cfg.sweep_interval, Duration::from_secs(60));
    }

    #[test]
    fn garbage_falls_back() {
        let cfg = Config::from_lookup(lookup(&[
            ("STAYLINE_IO_TIMEOUT_MS", "soon"),
            ("STAYLINE_SWEEP_INTERVAL_SECS", "0"),
            ("STAYLINE_OWNER_TEST_BOOKINGS", "maybe"),
        ]));
        assert_eq!(cfg.io_timeout, Duration::from_secs(5));
        assert_eq!(cfg.sweep_interval, Duration::from_secs(300));
        assert!(!cfg.owner_test_bookings);
    }
}
