//! Pipeline settings: the catalogue of keys with their defaults, validation of
//! operator-provided values, and the typed snapshot each job reads at start.

use crate::quality::Quality;
use crate::server_store::ServerStore;
use anyhow::Result;
use serde::Serialize;
use serde_json::{json, Value as JsonValue};
use std::fmt;
use thiserror::Error;
use tracing::{info, warn};

/// Ten years.
pub const MAX_GRACE_PERIOD_HOURS: u64 = 87_600;
pub const MAX_RETRY_ATTEMPTS: u64 = 20;

#[derive(Debug, Error, PartialEq)]
pub enum SettingsError {
    #[error("Unknown setting: {0}")]
    UnknownKey(String),

    #[error("Invalid value for {key}: {reason}")]
    InvalidValue { key: String, reason: String },
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum SettingKey {
    TargetQuality,
    AllowLowerQualityUntilUpgrade,
    MinQualityToPublish,
    IngestDiscoverCron,
    IngestRefreshCron,
    IngestReverifyCron,
    RateLimitRps,
    GracePeriodHours,
    MaxRetryAttempts,
}

impl SettingKey {
    pub const ALL: [SettingKey; 9] = [
        SettingKey::TargetQuality,
        SettingKey::AllowLowerQualityUntilUpgrade,
        SettingKey::MinQualityToPublish,
        SettingKey::IngestDiscoverCron,
        SettingKey::IngestRefreshCron,
        SettingKey::IngestReverifyCron,
        SettingKey::RateLimitRps,
        SettingKey::GracePeriodHours,
        SettingKey::MaxRetryAttempts,
    ];

    pub fn as_str(&self) -> &'static str {
        match self {
            SettingKey::TargetQuality => "TARGET_QUALITY",
            SettingKey::AllowLowerQualityUntilUpgrade => "ALLOW_LOWER_QUALITY_UNTIL_UPGRADE",
            SettingKey::MinQualityToPublish => "MIN_QUALITY_TO_PUBLISH",
            SettingKey::IngestDiscoverCron => "INGEST_DISCOVER_CRON",
            SettingKey::IngestRefreshCron => "INGEST_REFRESH_CRON",
            SettingKey::IngestReverifyCron => "INGEST_REVERIFY_CRON",
            SettingKey::RateLimitRps => "RATE_LIMIT_RPS",
            SettingKey::GracePeriodHours => "GRACE_PERIOD_HOURS",
            SettingKey::MaxRetryAttempts => "MAX_RETRY_ATTEMPTS",
        }
    }

    pub fn parse(s: &str) -> Option<Self> {
        SettingKey::ALL.iter().copied().find(|k| k.as_str() == s)
    }

    pub fn description(&self) -> &'static str {
        match self {
            SettingKey::TargetQuality => "Target quality for automatic upgrades",
            SettingKey::AllowLowerQualityUntilUpgrade => {
                "Allow publishing lower quality while waiting for upgrade"
            }
            SettingKey::MinQualityToPublish => "Minimum quality to publish to users",
            SettingKey::IngestDiscoverCron => "Cron schedule for catalog discovery",
            SettingKey::IngestRefreshCron => "Cron schedule for quality refresh",
            SettingKey::IngestReverifyCron => "Cron schedule for stream reverification",
            SettingKey::RateLimitRps => "Rate limit for provider API calls (requests per second)",
            SettingKey::GracePeriodHours => "Hours to keep old streams before pruning",
            SettingKey::MaxRetryAttempts => "Maximum retry attempts for failed operations",
        }
    }

    pub fn default_value(&self) -> JsonValue {
        match self {
            SettingKey::TargetQuality => json!(Quality::Uhd2160.as_str()),
            SettingKey::AllowLowerQualityUntilUpgrade => json!(true),
            SettingKey::MinQualityToPublish => json!(Quality::Hd720.as_str()),
            SettingKey::IngestDiscoverCron => json!("*/30 * * * *"),
            SettingKey::IngestRefreshCron => json!("0 */6 * * *"),
            SettingKey::IngestReverifyCron => json!("0 */12 * * *"),
            SettingKey::RateLimitRps => json!(3),
            SettingKey::GracePeriodHours => json!(24),
            SettingKey::MaxRetryAttempts => json!(3),
        }
    }

    /// Checks `value` against this key's type and returns its canonical form.
    ///
    /// Strings holding numbers or booleans are accepted, since the CLI and
    /// older admin clients send everything as text.
    pub fn validate(&self, value: &JsonValue) -> Result<JsonValue, SettingsError> {
        let invalid = |reason: &str| SettingsError::InvalidValue {
            key: self.as_str().to_string(),
            reason: reason.to_string(),
        };

        match self {
            SettingKey::TargetQuality | SettingKey::MinQualityToPublish => value
                .as_str()
                .and_then(Quality::parse)
                .map(|q| json!(q.as_str()))
                .ok_or_else(|| {
                    invalid("expected one of CAM, SD, 720p, 1080p, 1440p, 2160p")
                }),
            SettingKey::AllowLowerQualityUntilUpgrade => match value {
                JsonValue::Bool(b) => Ok(json!(b)),
                JsonValue::String(s) if s.eq_ignore_ascii_case("true") => Ok(json!(true)),
                JsonValue::String(s) if s.eq_ignore_ascii_case("false") => Ok(json!(false)),
                _ => Err(invalid("expected a boolean")),
            },
            SettingKey::IngestDiscoverCron
            | SettingKey::IngestRefreshCron
            | SettingKey::IngestReverifyCron => {
                let expr = value.as_str().map(str::trim).unwrap_or_default();
                let fields = expr.split_whitespace().count();
                if fields == 5 || fields == 6 {
                    Ok(json!(expr))
                } else {
                    Err(invalid("expected a 5-field cron expression"))
                }
            }
            SettingKey::RateLimitRps => {
                let rps = number_of(value).ok_or_else(|| invalid("expected a number"))?;
                if rps > 0.0 && rps.is_finite() {
                    Ok(json!(rps))
                } else {
                    Err(invalid("must be greater than zero"))
                }
            }
            SettingKey::GracePeriodHours | SettingKey::MaxRetryAttempts => {
                let max = if *self == SettingKey::GracePeriodHours {
                    MAX_GRACE_PERIOD_HOURS
                } else {
                    MAX_RETRY_ATTEMPTS
                };
                let n = number_of(value).ok_or_else(|| invalid("expected a number"))?;
                if n.fract() != 0.0 || n < 1.0 {
                    Err(invalid("expected a positive whole number"))
                } else if n > max as f64 {
                    Err(invalid(&format!("must be at most {}", max)))
                } else {
                    Ok(json!(n as u64))
                }
            }
        }
    }
}

impl fmt::Display for SettingKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

fn number_of(value: &JsonValue) -> Option<f64> {
    match value {
        JsonValue::Number(n) => n.as_f64(),
        JsonValue::String(s) => s.trim().parse::<f64>().ok(),
        _ => None,
    }
}

/// Settings snapshot taken at the start of a job run.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct PipelineSettings {
    pub target_quality: Quality,
    pub allow_lower_quality_until_upgrade: bool,
    pub min_quality_to_publish: Quality,
    pub discover_cron: String,
    pub refresh_cron: String,
    pub reverify_cron: String,
    pub rate_limit_rps: f64,
    pub grace_period_hours: u64,
    pub max_retry_attempts: u32,
}

impl Default for PipelineSettings {
    fn default() -> Self {
        Self {
            target_quality: Quality::Uhd2160,
            allow_lower_quality_until_upgrade: true,
            min_quality_to_publish: Quality::Hd720,
            discover_cron: "*/30 * * * *".to_string(),
            refresh_cron: "0 */6 * * *".to_string(),
            reverify_cron: "0 */12 * * *".to_string(),
            rate_limit_rps: 3.0,
            grace_period_hours: 24,
            max_retry_attempts: 3,
        }
    }
}

impl PipelineSettings {
    /// Reads every known key from the store. Missing or invalid values fall
    /// back to the default with a warning; a store failure is an error.
    pub fn load(store: &dyn ServerStore) -> Result<Self> {
        let mut settings = PipelineSettings::default();
        for stored in store.list_settings()? {
            let Some(key) = SettingKey::parse(&stored.key) else {
                continue;
            };
            match key.validate(&stored.value) {
                Ok(value) => settings.apply(key, &value),
                Err(e) => warn!("Ignoring stored setting, using default: {}", e),
            }
        }
        Ok(settings)
    }

    fn apply(&mut self, key: SettingKey, value: &JsonValue) {
        let text = || value.as_str().unwrap_or_default().to_string();
        let quality = || value.as_str().and_then(Quality::parse);
        match key {
            SettingKey::TargetQuality => {
                if let Some(q) = quality() {
                    self.target_quality = q;
                }
            }
            SettingKey::MinQualityToPublish => {
                if let Some(q) = quality() {
                    self.min_quality_to_publish = q;
                }
            }
            SettingKey::AllowLowerQualityUntilUpgrade => {
                self.allow_lower_quality_until_upgrade = value.as_bool().unwrap_or(true);
            }
            SettingKey::IngestDiscoverCron => self.discover_cron = text(),
            SettingKey::IngestRefreshCron => self.refresh_cron = text(),
            SettingKey::IngestReverifyCron => self.reverify_cron = text(),
            SettingKey::RateLimitRps => {
                self.rate_limit_rps = value.as_f64().unwrap_or(self.rate_limit_rps);
            }
            SettingKey::GracePeriodHours => {
                self.grace_period_hours = value.as_u64().unwrap_or(self.grace_period_hours);
            }
            SettingKey::MaxRetryAttempts => {
                if let Some(n) = value.as_u64() {
                    self.max_retry_attempts = n.min(u32::MAX as u64) as u32;
                }
            }
        }
    }

    pub fn cron_for(&self, key: SettingKey) -> Option<&str> {
        match key {
            SettingKey::IngestDiscoverCron => Some(&self.discover_cron),
            SettingKey::IngestRefreshCron => Some(&self.refresh_cron),
            SettingKey::IngestReverifyCron => Some(&self.reverify_cron),
            _ => None,
        }
    }
}

/// Writes every default that is not yet stored. Operator values are left alone.
pub fn initialize_default_settings(store: &dyn ServerStore) -> Result<usize> {
    let mut inserted = 0;
    for key in SettingKey::ALL {
        if store.insert_setting_if_missing(key.as_str(), &key.default_value(), key.description())? {
            inserted += 1;
        }
    }
    if inserted > 0 {
        info!("Initialized {} default pipeline settings", inserted);
    }
    Ok(inserted)
}

/// Validates and stores an operator change. Returns the canonical stored value.
pub fn update_setting(
    store: &dyn ServerStore,
    key: &str,
    value: &JsonValue,
) -> Result<JsonValue> {
    let setting_key =
        SettingKey::parse(key).ok_or_else(|| SettingsError::UnknownKey(key.to_string()))?;
    let canonical = setting_key.validate(value)?;
    store.set_setting(setting_key.as_str(), &canonical, setting_key.description())?;
    info!("Setting {} updated to {}", setting_key, canonical);
    Ok(canonical)
}
