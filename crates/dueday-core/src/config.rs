//! Configuration loading.
//!
//! Parsed from a TOML file; every field has a default, so an empty file
//! (or no file at all) is a valid configuration.

use std::path::Path;

use chrono::{Duration, FixedOffset, NaiveTime};
use serde::{Deserialize, Serialize};
use thiserror::Error;

use crate::domain::calendar::parse_offset;

#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("failed to read config: {0}")]
    Io(#[from] std::io::Error),

    #[error("failed to parse config: {0}")]
    Parse(#[from] toml::de::Error),

    #[error("invalid config: {0}")]
    Invalid(String),
}

/// Main configuration structure
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Config {
    /// UTC offset every local-day decision is taken in, e.g. `+03:00`.
    #[serde(default = "default_timezone")]
    pub timezone: String,

    #[serde(default)]
    pub schedule: ScheduleConfig,

    #[serde(default)]
    pub materializer: MaterializerConfig,

    #[serde(default)]
    pub alerts: AlertConfig,

    #[serde(default)]
    pub activity: ActivityConfig,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            timezone: default_timezone(),
            schedule: ScheduleConfig::default(),
            materializer: MaterializerConfig::default(),
            alerts: AlertConfig::default(),
            activity: ActivityConfig::default(),
        }
    }
}

fn default_timezone() -> String {
    "+03:00".to_string()
}

/// Upper bound for the day thresholds (ten years).
const MAX_DAYS: i64 = 3_650;

/// Upper bound for the TTLs (thirty days).
const MAX_TTL_SECS: i64 = 30 * 86_400;

/// Local wall-clock times (`HH:MM`) of the three daily jobs.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ScheduleConfig {
    #[serde(default = "default_reconcile_at")]
    pub reconcile_delays: String,

    #[serde(default = "default_materialize_at")]
    pub materialize_today: String,

    #[serde(default = "default_alerts_at")]
    pub generate_alerts: String,
}

fn default_reconcile_at() -> String {
    "00:05".to_string()
}

fn default_materialize_at() -> String {
    "00:10".to_string()
}

fn default_alerts_at() -> String {
    "08:00".to_string()
}

impl Default for ScheduleConfig {
    fn default() -> Self {
        Self {
            reconcile_delays: default_reconcile_at(),
            materialize_today: default_materialize_at(),
            generate_alerts: default_alerts_at(),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct MaterializerConfig {
    /// Replace the instance set in one store call instead of truncate + insert.
    #[serde(default = "default_true")]
    pub atomic_rebuild: bool,
}

fn default_true() -> bool {
    true
}

impl Default for MaterializerConfig {
    fn default() -> Self {
        Self {
            atomic_rebuild: default_true(),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AlertConfig {
    /// Days without an update before a drawer-class task counts as stale.
    #[serde(default = "default_stale_drawer_days")]
    pub stale_drawer_days: i64,

    /// Days open before a single task is reported as long-open.
    #[serde(default = "default_long_open_days")]
    pub long_open_days: i64,

    #[serde(default = "default_dedupe_ttl_secs")]
    pub dedupe_ttl_secs: i64,
}

fn default_stale_drawer_days() -> i64 {
    14
}

fn default_long_open_days() -> i64 {
    30
}

fn default_dedupe_ttl_secs() -> i64 {
    86_400
}

impl Default for AlertConfig {
    fn default() -> Self {
        Self {
            stale_drawer_days: default_stale_drawer_days(),
            long_open_days: default_long_open_days(),
            dedupe_ttl_secs: default_dedupe_ttl_secs(),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ActivityConfig {
    #[serde(default = "default_activity_ttl_secs")]
    pub ttl_secs: i64,
}

fn default_activity_ttl_secs() -> i64 {
    1_800
}

impl Default for ActivityConfig {
    fn default() -> Self {
        Self {
            ttl_secs: default_activity_ttl_secs(),
        }
    }
}

/// Parse a local `HH:MM` time.
pub fn parse_time_of_day(raw: &str) -> Option<NaiveTime> {
    NaiveTime::parse_from_str(raw.trim(), "%H:%M").ok()
}

impl Config {
    /// Load and validate configuration from a file.
    pub fn load(path: &Path) -> Result<Self, ConfigError> {
        let content = std::fs::read_to_string(path)?;
        Self::from_toml(&content)
    }

    /// Load `path` when given, defaults otherwise.
    pub fn load_or_default(path: Option<&Path>) -> Result<Self, ConfigError> {
        match path {
            Some(path) => Self::load(path),
            None => Ok(Self::default()),
        }
    }

    pub fn from_toml(content: &str) -> Result<Self, ConfigError> {
        let config: Config = toml::from_str(content)?;
        config.validate()?;
        Ok(config)
    }

    pub fn validate(&self) -> Result<(), ConfigError> {
        self.tz()?;
        for (name, raw) in [
            ("schedule.reconcile_delays", &self.schedule.reconcile_delays),
            ("schedule.materialize_today", &self.schedule.materialize_today),
            ("schedule.generate_alerts", &self.schedule.generate_alerts),
        ] {
            if parse_time_of_day(raw).is_none() {
                return Err(ConfigError::Invalid(format!(
                    "{name} must be HH:MM, got {raw:?}"
                )));
            }
        }
        for (name, value, max) in [
            ("alerts.stale_drawer_days", self.alerts.stale_drawer_days, MAX_DAYS),
            ("alerts.long_open_days", self.alerts.long_open_days, MAX_DAYS),
            ("alerts.dedupe_ttl_secs", self.alerts.dedupe_ttl_secs, MAX_TTL_SECS),
            ("activity.ttl_secs", self.activity.ttl_secs, MAX_TTL_SECS),
        ] {
            if !(1..=max).contains(&value) {
                return Err(ConfigError::Invalid(format!(
                    "{name} must be between 1 and {max}, got {value}"
                )));
            }
        }
        Ok(())
    }

    pub fn tz(&self) -> Result<FixedOffset, ConfigError> {
        parse_offset(&self.timezone).ok_or_else(|| {
            ConfigError::Invalid(format!(
                "timezone must be a UTC offset like +03:00, got {:?}",
                self.timezone
            ))
        })
    }

    /// Dedupe TTL, held within the validated range.
    pub fn alert_dedupe_ttl(&self) -> Duration {
        Duration::seconds(self.alerts.dedupe_ttl_secs.clamp(1, MAX_TTL_SECS))
    }

    /// Activity TTL, held within the validated range.
    pub fn activity_ttl(&self) -> Duration {
        Duration::seconds(self.activity.ttl_secs.clamp(1, MAX_TTL_SECS))
    }
}
