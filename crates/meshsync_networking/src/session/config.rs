//! # Session Configuration
//!
//! Loaded once at startup, from code or from TOML:
//!
//! ```toml
//! display_name = "alpha"
//! creator = true
//! heartbeat_interval_secs = 0.1
//! max_asks_per_tick = 16
//! ```
//!
//! Missing keys take their defaults.

use std::path::Path;

use serde::{Deserialize, Serialize};

use crate::error::{SyncError, SyncResult};

/// Tunables of one session.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct SessionConfig {
    /// Name sent in GREET.
    pub display_name: String,
    /// Whether this peer initialised the lobby.
    pub creator: bool,
    /// Heartbeat period in seconds.
    pub heartbeat_interval_secs: f64,
    /// Entity pool capacity in records.
    pub pool_capacity: usize,
    /// ASKs sent to each reconciled neighbor per heartbeat.
    pub max_asks_per_tick: u16,
    /// Seconds before an unanswered ASK expires.
    pub request_timeout_secs: f64,
    /// Re-issues of an expired ASK before it is abandoned.
    pub max_request_retries: u8,
    /// Whether exactly half of a peer's neighbors blaming it is a majority.
    pub tie_counts_as_majority: bool,
    /// EMA factor for latency samples, in `(0, 1]`.
    pub latency_smoothing: f32,
    /// Send a reliable SYNC straight to every peer that greets.
    pub force_sync_on_greet: bool,
}

impl Default for SessionConfig {
    fn default() -> Self {
        Self {
            display_name: "player".to_owned(),
            creator: false,
            heartbeat_interval_secs: 0.1,
            pool_capacity: 1024,
            max_asks_per_tick: 16,
            request_timeout_secs: 1.0,
            max_request_retries: 2,
            tie_counts_as_majority: true,
            latency_smoothing: 0.125,
            force_sync_on_greet: true,
        }
    }
}

impl SessionConfig {
    /// Default configuration with a display name.
    #[must_use]
    pub fn named(display_name: impl Into<String>) -> Self {
        Self {
            display_name: display_name.into(),
            ..Self::default()
        }
    }

    /// Parses and validates a TOML document.
    ///
    /// # Errors
    ///
    /// [`SyncError::Config`] on syntax errors, unknown keys or bad values.
    pub fn from_toml_str(text: &str) -> SyncResult<Self> {
        let config: Self = toml::from_str(text).map_err(|e| SyncError::Config(e.to_string()))?;
        config.validate()?;
        Ok(config)
    }

    /// Reads, parses and validates a TOML file.
    ///
    /// # Errors
    ///
    /// [`SyncError::Config`] if the file cannot be read or is invalid.
    pub fn load(path: impl AsRef<Path>) -> SyncResult<Self> {
        let path = path.as_ref();
        let text = std::fs::read_to_string(path)
            .map_err(|e| SyncError::Config(format!("{}: {e}", path.display())))?;
        Self::from_toml_str(&text)
    }

    /// Checks every value is usable.
    ///
    /// # Errors
    ///
    /// [`SyncError::Config`] naming the first bad field.
    pub fn validate(&self) -> SyncResult<()> {
        if !(self.heartbeat_interval_secs.is_finite() && self.heartbeat_interval_secs > 0.0) {
            return Err(SyncError::Config(format!(
                "heartbeat_interval_secs must be positive, got {}",
                self.heartbeat_interval_secs
            )));
        }
        if self.pool_capacity == 0 || self.pool_capacity > meshsync_core::memory::MAX_CAPACITY {
            return Err(SyncError::Config(format!(
                "pool_capacity must be in 1..={}, got {}",
                meshsync_core::memory::MAX_CAPACITY,
                self.pool_capacity
            )));
        }
        if self.max_asks_per_tick == 0 {
            return Err(SyncError::Config("max_asks_per_tick must be at least 1".into()));
        }
        if !(self.request_timeout_secs.is_finite() && self.request_timeout_secs > 0.0) {
            return Err(SyncError::Config(format!(
                "request_timeout_secs must be positive, got {}",
                self.request_timeout_secs
            )));
        }
        if !(self.latency_smoothing > 0.0 && self.latency_smoothing <= 1.0) {
            return Err(SyncError::Config(format!(
                "latency_smoothing must be in (0, 1], got {}",
                self.latency_smoothing
            )));
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_defaults_are_valid() {
        let config = SessionConfig::default();
        assert!(config.validate().is_ok());
        assert_eq!(config.max_asks_per_tick, 16);
        assert!(config.tie_counts_as_majority);
    }

    #[test]
    fn test_partial_toml() {
        let config = SessionConfig::from_toml_str(
            r#"
            display_name = "alpha"
            creator = true
            max_asks_per_tick = 4
            "#,
        )
        .unwrap();
        assert_eq!(config.display_name, "alpha");
        assert!(config.creator);
        assert_eq!(config.max_asks_per_tick, 4);
        assert_eq!(config.pool_capacity, 1024);
    }

    #[test]
    fn test_rejects_bad_values() {
        for text in [
            "heartbeat_interval_secs = 0.0",
            "pool_capacity = 0",
            "pool_capacity = 70000",
            "max_asks_per_tick = 0",
            "request_timeout_secs = -1.0",
            "latency_smoothing = 1.5",
            "no_such_key = 1",
            "display_name = ",
        ] {
            assert!(
                matches!(SessionConfig::from_toml_str(text), Err(SyncError::Config(_))),
                "accepted {text:?}"
            );
        }
    }

    #[test]
    fn test_load_missing_file() {
        let err = SessionConfig::load("/definitely/not/here.toml").unwrap_err();
        assert!(matches!(err, SyncError::Config(msg) if msg.contains("here.toml")));
    }
}
