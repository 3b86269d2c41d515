use crate::cache::{DEFAULT_MAX_ENTRIES, DEFAULT_TARGET_EVICTION_RATIO};
use crate::types::{DEFAULT_ROLLING_WINDOW, MAX_ROLLING_WINDOW};
use config::{Config, Environment, File};
use serde::Deserialize;
use std::path::PathBuf;
use std::time::Duration;

#[derive(Debug, Deserialize, Clone)]
pub struct AppConfig {
    pub server: ServerConfig,
    #[serde(default)]
    pub analytics: AnalyticsConfig,
    pub source: SourceConfig,
}

#[derive(Debug, Deserialize, Clone)]
pub struct ServerConfig {
    pub host: String,
    pub port: u16,
    #[serde(default)]
    pub cors_origins: Vec<String>,
}

#[derive(Debug, Deserialize, Clone)]
pub struct SourceConfig {
    /// JSON file of daily points.
    pub path: PathBuf,
}

#[derive(Debug, Deserialize, Clone)]
pub struct AnalyticsConfig {
    #[serde(default = "default_max_entries")]
    pub max_entries: usize,
    #[serde(default = "default_target_eviction_ratio")]
    pub target_eviction_ratio: f64,
    #[serde(default = "default_cleanup_interval")]
    pub cleanup_interval_ms: u64,
    #[serde(default = "default_ttl")]
    pub default_ttl_ms: i64,
    #[serde(default = "default_today_ttl")]
    pub today_ttl_ms: i64,
    #[serde(default = "default_fetch_timeout")]
    pub fetch_timeout_ms: u64,
    #[serde(default = "default_window")]
    pub default_window: usize,
}

impl Default for AnalyticsConfig {
    fn default() -> Self {
        Self {
            max_entries: DEFAULT_MAX_ENTRIES,
            target_eviction_ratio: DEFAULT_TARGET_EVICTION_RATIO,
            cleanup_interval_ms: 300_000,
            default_ttl_ms: 3_600_000,
            today_ttl_ms: 300_000,
            fetch_timeout_ms: 10_000,
            default_window: DEFAULT_ROLLING_WINDOW,
        }
    }
}

impl AnalyticsConfig {
    pub fn cleanup_interval(&self) -> Duration {
        Duration::from_millis(self.cleanup_interval_ms)
    }

    pub fn fetch_timeout(&self) -> Duration {
        Duration::from_millis(self.fetch_timeout_ms)
    }

    pub fn validate(&self) -> Result<(), String> {
        if self.max_entries == 0 {
            return Err("analytics.max_entries must be at least 1".to_string());
        }
        if !(self.target_eviction_ratio > 0.0 && self.target_eviction_ratio <= 1.0) {
            return Err(format!(
                "analytics.target_eviction_ratio must be in (0, 1], got {}",
                self.target_eviction_ratio
            ));
        }
        if self.cleanup_interval_ms == 0 {
            return Err("analytics.cleanup_interval_ms must be positive".to_string());
        }
        if self.fetch_timeout_ms == 0 {
            return Err("analytics.fetch_timeout_ms must be positive".to_string());
        }
        if self.default_ttl_ms <= 0 || self.today_ttl_ms <= 0 {
            return Err(
                "analytics.default_ttl_ms and analytics.today_ttl_ms must be positive".to_string(),
            );
        }
        if self.today_ttl_ms > self.default_ttl_ms {
            return Err(
                "analytics.today_ttl_ms should not exceed analytics.default_ttl_ms".to_string(),
            );
        }
        if self.default_window == 0 || self.default_window > MAX_ROLLING_WINDOW {
            return Err(format!(
                "analytics.default_window must be between 1 and {MAX_ROLLING_WINDOW}"
            ));
        }
        Ok(())
    }
}

fn default_max_entries() -> usize {
    DEFAULT_MAX_ENTRIES
}
fn default_target_eviction_ratio() -> f64 {
    DEFAULT_TARGET_EVICTION_RATIO
}
fn default_cleanup_interval() -> u64 {
    300_000 // 5 minutes
}
fn default_ttl() -> i64 {
    3_600_000 // 1 hour
}
fn default_today_ttl() -> i64 {
    300_000
}
fn default_fetch_timeout() -> u64 {
    10_000
}
fn default_window() -> usize {
    DEFAULT_ROLLING_WINDOW
}

impl AppConfig {
    pub fn validate(&self) -> Result<(), String> {
        if self.server.host.is_empty() {
            return Err("server.host must not be empty".to_string());
        }
        self.analytics.validate()
    }

    pub fn load(config_path: Option<&str>) -> Result<Self, config::ConfigError> {
        let mut builder = Config::builder();

        let path = config_path.unwrap_or("config.toml");
        builder = builder.add_source(File::with_name(path).required(false));

        // Overlay with environment variables (SITESTATS__SERVER__PORT=3001, etc.)
        builder = builder.add_source(
            Environment::with_prefix("SITESTATS")
                .separator("__")
                .try_parsing(true),
        );

        builder.build()?.try_deserialize()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;

    #[test]
    fn test_defaults_are_valid() {
        assert!(AnalyticsConfig::default().validate().is_ok());
    }

    #[test]
    fn test_validate_rejects_bad_ratio() {
        let mut cfg = AnalyticsConfig::default();
        cfg.target_eviction_ratio = 0.0;
        assert!(cfg.validate().is_err());
        cfg.target_eviction_ratio = 1.5;
        assert!(cfg.validate().is_err());
        cfg.target_eviction_ratio = f64::NAN;
        assert!(cfg.validate().is_err());
        cfg.target_eviction_ratio = 1.0;
        assert!(cfg.validate().is_ok());
    }

    #[test]
    fn test_validate_rejects_today_ttl_longer_than_default() {
        let cfg = AnalyticsConfig {
            today_ttl_ms: 10_000,
            default_ttl_ms: 5_000,
            ..AnalyticsConfig::default()
        };
        assert!(cfg.validate().is_err());
    }

    #[test]
    fn test_validate_rejects_non_positive_ttls() {
        let zero = AnalyticsConfig {
            today_ttl_ms: 0,
            default_ttl_ms: 0,
            ..AnalyticsConfig::default()
        };
        assert!(zero.validate().is_err());

        let negative = AnalyticsConfig {
            today_ttl_ms: -10,
            default_ttl_ms: 5_000,
            ..AnalyticsConfig::default()
        };
        assert!(negative.validate().is_err());
    }

    #[test]
    fn test_load_from_file_fills_defaults() {
        let mut file = tempfile::Builder::new().suffix(".toml").tempfile().unwrap();
        write!(
            file,
            r#"
[server]
host = "127.0.0.1"
port = 5400

[analytics]
max_entries = 64

[source]
path = "data/daily.json"
"#
        )
        .unwrap();

        let cfg = AppConfig::load(file.path().to_str()).unwrap();
        assert_eq!(cfg.server.port, 5400);
        assert!(cfg.server.cors_origins.is_empty());
        assert_eq!(cfg.analytics.max_entries, 64);
        assert_eq!(cfg.analytics.today_ttl_ms, 300_000);
        assert_eq!(cfg.analytics.cleanup_interval(), Duration::from_secs(300));
        assert_eq!(cfg.source.path, PathBuf::from("data/daily.json"));
        assert!(cfg.validate().is_ok());
    }
}
