//! Application-level configuration loading: game timings, store selection and limits.

use std::{env, fs, io::ErrorKind, path::PathBuf, time::Duration};

use serde::Deserialize;
use tracing::{info, warn};

use crate::state::flag_ledger::MAX_FLAGS;

/// Default location on disk where the server looks for the JSON configuration.
const DEFAULT_CONFIG_PATH: &str = "config/app.json";
/// Environment variable that overrides [`DEFAULT_CONFIG_PATH`].
const CONFIG_PATH_ENV: &str = "HEARMEOUT_BACK_CONFIG_PATH";
/// Environment variable that overrides the configured storage backend.
const STORAGE_ENV: &str = "HEARMEOUT_STORAGE";
/// Environment variable carrying the Pexels API key.
const PEXELS_KEY_ENV: &str = "PEXELS_API_KEY";
/// Longest session lifetime accepted from the configuration (30 days).
const MAX_SESSION_TTL_MINUTES: u64 = 30 * 24 * 60;

/// Which backend holds the shared session documents.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum StorageBackend {
    /// Process-local maps; sessions vanish on restart.
    Memory,
    /// MongoDB reached through `MONGO_URI` / `MONGO_DB`.
    Mongo,
}

#[derive(Debug, Clone)]
/// Immutable runtime configuration shared across the application.
pub struct AppConfig {
    /// Countdown offered to each player for picking flags.
    pub selection_duration: Duration,
    /// Upper bound of flags per side (never above [`MAX_FLAGS`]).
    pub max_flags: usize,
    /// Lifetime of a session from its creation.
    pub session_ttl: Duration,
    /// Room code regenerations attempted when the store reports a collision.
    pub code_attempts: u32,
    /// Conditional write retries attempted when a concurrent update wins.
    pub write_attempts: u32,
    /// Upper bound for a single lifecycle operation, store round trips included.
    pub operation_timeout: Option<Duration>,
    /// How often expired sessions are purged.
    pub purge_interval: Duration,
    /// Selected storage backend.
    pub storage: StorageBackend,
    /// API key for the image search provider, if any.
    pub pexels_api_key: Option<String>,
}

impl AppConfig {
    /// Load the configuration from disk, falling back to built-in defaults, then apply
    /// environment overrides.
    pub fn load() -> Self {
        let path = resolve_config_path();
        let config = match fs::read_to_string(&path) {
            Ok(contents) => match serde_json::from_str::<RawConfig>(&contents) {
                Ok(raw) => {
                    let config: Self = raw.into();
                    info!(
                        path = %path.display(),
                        storage = ?config.storage,
                        "loaded configuration"
                    );
                    config
                }
                Err(err) => {
                    warn!(
                        path = %path.display(),
                        error = %err,
                        "failed to parse config; falling back to defaults"
                    );
                    Self::default()
                }
            },
            Err(err) if err.kind() == ErrorKind::NotFound => {
                info!(
                    path = %path.display(),
                    "config file not found; using built-in defaults"
                );
                Self::default()
            }
            Err(err) => {
                warn!(
                    path = %path.display(),
                    error = %err,
                    "failed to read config; falling back to defaults"
                );
                Self::default()
            }
        };

        config.with_env_overrides()
    }

    fn with_env_overrides(mut self) -> Self {
        match env::var(STORAGE_ENV).ok().as_deref() {
            Some("memory") => self.storage = StorageBackend::Memory,
            Some("mongo") => self.storage = StorageBackend::Mongo,
            Some(other) => warn!(value = other, "ignoring unknown {STORAGE_ENV} value"),
            None => {}
        }
        if let Some(key) = env::var(PEXELS_KEY_ENV).ok().filter(|key| !key.is_empty()) {
            self.pexels_api_key = Some(key);
        }
        self
    }
}

impl Default for AppConfig {
    fn default() -> Self {
        RawConfig::default().into()
    }
}

#[derive(Debug, Deserialize)]
#[serde(default)]
/// JSON representation of the configuration file located at [`DEFAULT_CONFIG_PATH`].
struct RawConfig {
    selection_seconds: u64,
    max_flags: usize,
    session_ttl_minutes: u64,
    code_attempts: u32,
    write_attempts: u32,
    operation_timeout_ms: u64,
    purge_interval_seconds: u64,
    storage: StorageBackend,
    pexels_api_key: Option<String>,
}

impl Default for RawConfig {
    fn default() -> Self {
        Self {
            selection_seconds: 10 * 60,
            max_flags: MAX_FLAGS,
            session_ttl_minutes: 2 * 60,
            code_attempts: 5,
            write_attempts: 8,
            operation_timeout_ms: 5_000,
            purge_interval_seconds: 5 * 60,
            storage: StorageBackend::Memory,
            pexels_api_key: None,
        }
    }
}

impl From<RawConfig> for AppConfig {
    fn from(value: RawConfig) -> Self {
        Self {
            selection_duration: Duration::from_secs(value.selection_seconds),
            max_flags: value.max_flags.clamp(1, MAX_FLAGS),
            session_ttl: Duration::from_secs(
                value.session_ttl_minutes.min(MAX_SESSION_TTL_MINUTES) * 60,
            ),
            code_attempts: value.code_attempts.max(1),
            write_attempts: value.write_attempts.max(1),
            operation_timeout: (value.operation_timeout_ms > 0)
                .then(|| Duration::from_millis(value.operation_timeout_ms)),
            purge_interval: Duration::from_secs(value.purge_interval_seconds.max(1)),
            storage: value.storage,
            pexels_api_key: value.pexels_api_key.filter(|key| !key.is_empty()),
        }
    }
}

/// Resolve the configuration path taking the environment override into account.
fn resolve_config_path() -> PathBuf {
    env::var_os(CONFIG_PATH_ENV)
        .map(PathBuf::from)
        .filter(|path| !path.as_os_str().is_empty())
        .unwrap_or_else(|| PathBuf::from(DEFAULT_CONFIG_PATH))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn partial_file_keeps_defaults_for_missing_keys() {
        let raw: RawConfig =
            serde_json::from_str(r#"{"selection_seconds": 90, "storage": "mongo"}"#).unwrap();
        let config: AppConfig = raw.into();

        assert_eq!(config.selection_duration, Duration::from_secs(90));
        assert_eq!(config.storage, StorageBackend::Mongo);
        assert_eq!(config.max_flags, MAX_FLAGS);
        assert_eq!(config.session_ttl, Duration::from_secs(7200));
    }

    #[test]
    fn limits_are_clamped() {
        let raw: RawConfig = serde_json::from_str(
            r#"{"max_flags": 12, "code_attempts": 0, "operation_timeout_ms": 0, "pexels_api_key": ""}"#,
        )
        .unwrap();
        let config: AppConfig = raw.into();

        assert_eq!(config.max_flags, MAX_FLAGS);
        assert_eq!(config.code_attempts, 1);
        assert!(config.operation_timeout.is_none());
        assert!(config.pexels_api_key.is_none());
    }

    #[test]
    fn huge_session_ttl_is_capped() {
        let raw: RawConfig =
            serde_json::from_str(&format!(r#"{{"session_ttl_minutes": {}}}"#, u64::MAX)).unwrap();
        let config: AppConfig = raw.into();

        assert_eq!(
            config.session_ttl,
            Duration::from_secs(MAX_SESSION_TTL_MINUTES * 60)
        );
    }
}
