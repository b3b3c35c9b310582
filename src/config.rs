//! TOML application configuration.
//!
//! Every field has a default, so an empty file (or no file at all) yields
//! a working configuration. Durations are plain integers — seconds for the
//! coarse knobs, milliseconds for the backoff delays.

use std::path::Path;
use std::time::Duration;

use serde::Deserialize;

use crate::error::ConfigError;
use crate::lifecycle::{LifecycleConfig, TranslationFallback};
use crate::retry::RetryPolicy;
use crate::room::DEFAULT_MAX_USERS;
use crate::translate::DEFAULT_CACHE_SIZE;

/// Backoff knobs, mirroring [`RetryPolicy`].
#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
#[serde(default)]
pub struct RetrySettings {
    pub max_attempts: u32,
    pub base_delay_ms: u64,
    pub max_jitter_ms: u64,
    /// Retry 4xx responses other than 429. Turn off where client errors
    /// should fail fast.
    pub retry_client_errors: bool,
}

impl Default for RetrySettings {
    fn default() -> Self {
        Self {
            max_attempts: 3,
            base_delay_ms: 1000,
            max_jitter_ms: 1000,
            retry_client_errors: true,
        }
    }
}

/// Translation provider selection and failure policy.
#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
#[serde(default)]
pub struct TranslationSettings {
    /// HTTP endpoint of the provider. `None` selects the echo provider
    /// (messages pass through untranslated).
    pub endpoint: Option<String>,
    /// `"send-original"` (default) or `"fail"`.
    pub fallback: TranslationFallback,
    pub cache_size: usize,
}

impl Default for TranslationSettings {
    fn default() -> Self {
        Self { endpoint: None, fallback: TranslationFallback::default(), cache_size: DEFAULT_CACHE_SIZE }
    }
}

/// Top-level configuration.
#[derive(Debug, Clone, PartialEq, Deserialize)]
#[serde(default)]
pub struct AppConfig {
    pub max_users_per_room: usize,
    /// Delete a room the moment its last member leaves. When off, empty
    /// rooms wait for the sweep.
    pub auto_delete_empty: bool,
    /// Sweep retention window in seconds (default one week).
    pub room_retention_secs: u64,
    /// How often the sweep runs while a session is active.
    pub sweep_interval_secs: u64,
    /// Forced logout after this much inactivity.
    pub idle_timeout_secs: u64,
    /// Delay between the idle notice and the forced leave, so the notice
    /// can render.
    pub idle_grace_secs: u64,
    pub retry: RetrySettings,
    pub translation: TranslationSettings,
}

impl Default for AppConfig {
    fn default() -> Self {
        Self {
            max_users_per_room: DEFAULT_MAX_USERS,
            auto_delete_empty: true,
            room_retention_secs: 7 * 24 * 60 * 60,
            sweep_interval_secs: 5 * 60,
            idle_timeout_secs: 10 * 60,
            idle_grace_secs: 2,
            retry: RetrySettings::default(),
            translation: TranslationSettings::default(),
        }
    }
}

impl AppConfig {
    /// Load from a TOML file.
    pub fn load(path: &Path) -> Result<Self, ConfigError> {
        let raw = std::fs::read_to_string(path)?;
        Ok(toml::from_str(&raw)?)
    }

    pub fn retry_policy(&self) -> RetryPolicy {
        RetryPolicy {
            max_attempts: self.retry.max_attempts,
            base_delay: Duration::from_millis(self.retry.base_delay_ms),
            max_jitter: Duration::from_millis(self.retry.max_jitter_ms),
            retry_client_errors: self.retry.retry_client_errors,
        }
    }

    pub fn lifecycle_config(&self) -> LifecycleConfig {
        LifecycleConfig {
            max_users_per_room: self.max_users_per_room,
            room_retention: Duration::from_secs(self.room_retention_secs),
            translation_fallback: self.translation.fallback,
            retry: self.retry_policy(),
        }
    }

    pub fn idle_timeout(&self) -> Duration {
        Duration::from_secs(self.idle_timeout_secs)
    }

    pub fn idle_grace(&self) -> Duration {
        Duration::from_secs(self.idle_grace_secs)
    }

    pub fn sweep_interval(&self) -> Duration {
        Duration::from_secs(self.sweep_interval_secs)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;

    #[test]
    fn test_defaults() {
        let config = AppConfig::default();
        assert_eq!(config.max_users_per_room, 2);
        assert!(config.auto_delete_empty);
        assert_eq!(config.room_retention_secs, 604_800);
        assert_eq!(config.idle_timeout_secs, 600);
        assert_eq!(config.idle_grace_secs, 2);
        assert_eq!(config.sweep_interval_secs, 300);
    }

    #[test]
    fn test_empty_toml_is_all_defaults() {
        let config: AppConfig = toml::from_str("").expect("parse");
        assert_eq!(config, AppConfig::default());
    }

    #[test]
    fn test_partial_toml_overrides() {
        let config: AppConfig = toml::from_str(
            r#"
            idle_timeout_secs = 1200
            auto_delete_empty = false

            [retry]
            max_attempts = 5
            retry_client_errors = false

            [translation]
            endpoint = "http://localhost:5000/translate"
            fallback = "fail"
            "#,
        )
        .expect("parse");

        assert_eq!(config.idle_timeout_secs, 1200);
        assert!(!config.auto_delete_empty);
        assert_eq!(config.retry.max_attempts, 5);
        assert!(!config.retry.retry_client_errors);
        assert_eq!(
            config.translation.endpoint.as_deref(),
            Some("http://localhost:5000/translate")
        );
        assert_eq!(config.translation.fallback, TranslationFallback::Fail);
        // Untouched sections keep defaults.
        assert_eq!(config.retry.base_delay_ms, 1000);
        assert_eq!(config.max_users_per_room, 2);
    }

    #[test]
    fn test_retry_policy_conversion() {
        let mut config = AppConfig::default();
        config.retry.max_attempts = 4;
        config.retry.base_delay_ms = 250;
        config.retry.max_jitter_ms = 0;
        let policy = config.retry_policy();
        assert_eq!(policy.max_attempts, 4);
        assert_eq!(policy.base_delay, Duration::from_millis(250));
        assert_eq!(policy.max_jitter, Duration::ZERO);
    }

    #[test]
    fn test_lifecycle_config_conversion() {
        let config = AppConfig::default();
        let lc = config.lifecycle_config();
        assert_eq!(lc.max_users_per_room, 2);
        assert_eq!(lc.room_retention, Duration::from_secs(604_800));
        assert_eq!(lc.translation_fallback, TranslationFallback::SendOriginal);
    }

    #[test]
    fn test_load_from_file() {
        let mut file = tempfile::NamedTempFile::new().expect("tempfile");
        writeln!(file, "idle_timeout_secs = 900").expect("write");
        let config = AppConfig::load(file.path()).expect("load");
        assert_eq!(config.idle_timeout_secs, 900);
    }

    #[test]
    fn test_load_missing_file_is_io_error() {
        let err = AppConfig::load(Path::new("/nonexistent/lingoroom.toml")).unwrap_err();
        assert!(matches!(err, crate::error::ConfigError::Io(_)));
    }

    #[test]
    fn test_load_bad_toml_is_parse_error() {
        let mut file = tempfile::NamedTempFile::new().expect("tempfile");
        writeln!(file, "idle_timeout_secs = \"soon\"").expect("write");
        let err = AppConfig::load(file.path()).unwrap_err();
        assert!(matches!(err, crate::error::ConfigError::Parse(_)));
    }
}
