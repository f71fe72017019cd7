//! Runtime configuration for the campaign reconciler.

use chrono::Duration;
use tracing::Level;

/// Default lifetime of changeset specs not attached to a campaign spec.
pub const DEFAULT_CHANGESET_SPEC_TTL_HOURS: i64 = 7 * 24;

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CampaignsConfig {
    /// How long unattached changeset specs live before garbage collection.
    pub changeset_spec_ttl: Duration,
    /// Emit JSON log lines instead of human-readable ones.
    pub log_json: bool,
    pub log_level: Level,
}

impl Default for CampaignsConfig {
    fn default() -> Self {
        Self {
            changeset_spec_ttl: Duration::hours(DEFAULT_CHANGESET_SPEC_TTL_HOURS),
            log_json: false,
            log_level: Level::INFO,
        }
    }
}

impl CampaignsConfig {
    /// Set the changeset spec lifetime
    pub fn with_changeset_spec_ttl(mut self, ttl: Duration) -> Self {
        self.changeset_spec_ttl = ttl;
        self
    }

    /// Enable or disable JSON logs
    pub fn with_log_json(mut self, json: bool) -> Self {
        self.log_json = json;
        self
    }

    pub fn with_log_level(mut self, level: Level) -> Self {
        self.log_level = level;
        self
    }

    /// Create from environment variables
    ///
    /// Reads:
    /// - CAMPAIGNS_CHANGESET_SPEC_TTL_HOURS (optional, default: 168)
    /// - CAMPAIGNS_LOG_FORMAT (optional) - set to "json" for JSON logs
    /// - CAMPAIGNS_LOG_LEVEL (optional, default: "info")
    pub fn from_env() -> std::result::Result<Self, String> {
        Self::from_lookup(|key| std::env::var(key).ok())
    }

    fn from_lookup(lookup: impl Fn(&str) -> Option<String>) -> std::result::Result<Self, String> {
        let mut config = Self::default();

        if let Some(raw) = lookup("CAMPAIGNS_CHANGESET_SPEC_TTL_HOURS") {
            let hours: i64 = raw
                .trim()
                .parse()
                .map_err(|_| format!("CAMPAIGNS_CHANGESET_SPEC_TTL_HOURS is not a number: {raw}"))?;
            if hours <= 0 {
                return Err(format!(
                    "CAMPAIGNS_CHANGESET_SPEC_TTL_HOURS must be positive, got {hours}"
                ));
            }
            config.changeset_spec_ttl = Duration::hours(hours);
        }
        if let Some(format) = lookup("CAMPAIGNS_LOG_FORMAT") {
            config.log_json = format.eq_ignore_ascii_case("json");
        }
        if let Some(level) = lookup("CAMPAIGNS_LOG_LEVEL") {
            config.log_level = level
                .trim()
                .parse()
                .map_err(|_| format!("CAMPAIGNS_LOG_LEVEL is not a log level: {level}"))?;
        }

        Ok(config)
    }
}
