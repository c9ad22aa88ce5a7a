//! Application settings
//!
//! Loaded from `config/default`, an optional `config/{env}` overlay, and
//! `CHECKY__`-prefixed environment variables, in that order of precedence.

use config::{Config, Environment, File};
use serde::{Deserialize, Serialize};
use std::time::Duration;
use thiserror::Error;

use checky_pipeline::TurnTimeouts;

/// Configuration errors
#[derive(Error, Debug)]
pub enum ConfigError {
    #[error("failed to load configuration: {0}")]
    Load(#[from] config::ConfigError),

    #[error("invalid value for {field}: {message}")]
    InvalidValue { field: String, message: String },
}

/// Main application settings
#[derive(Debug, Clone, Serialize, Deserialize, Default)]
pub struct Settings {
    #[serde(default)]
    pub server: ServerConfig,

    #[serde(default)]
    pub session: SessionConfig,

    #[serde(default)]
    pub turn: TurnConfig,

    #[serde(default)]
    pub rate_limit: RateLimitConfig,

    #[serde(default)]
    pub observability: ObservabilityConfig,
}

/// HTTP/WebSocket listener configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ServerConfig {
    #[serde(default = "default_host")]
    pub host: String,

    #[serde(default = "default_port")]
    pub port: u16,

    /// Allowed CORS origins; empty means same-origin only
    #[serde(default)]
    pub cors_origins: Vec<String>,
}

fn default_host() -> String {
    "0.0.0.0".to_string()
}

fn default_port() -> u16 {
    8080
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            host: default_host(),
            port: default_port(),
            cors_origins: Vec::new(),
        }
    }
}

/// Session lifecycle configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SessionConfig {
    #[serde(default = "default_max_sessions")]
    pub max_sessions: usize,

    /// A session with no activity for this long is removed
    #[serde(default = "default_idle_timeout_secs")]
    pub idle_timeout_secs: u64,

    #[serde(default = "default_cleanup_interval_secs")]
    pub cleanup_interval_secs: u64,
}

fn default_max_sessions() -> usize {
    100
}

fn default_idle_timeout_secs() -> u64 {
    300
}

fn default_cleanup_interval_secs() -> u64 {
    60
}

impl Default for SessionConfig {
    fn default() -> Self {
        Self {
            max_sessions: default_max_sessions(),
            idle_timeout_secs: default_idle_timeout_secs(),
            cleanup_interval_secs: default_cleanup_interval_secs(),
        }
    }
}

/// Per-turn timeout configuration, all in milliseconds
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TurnConfig {
    #[serde(default = "default_listen_inactivity_ms")]
    pub listen_inactivity_ms: u64,

    #[serde(default = "default_recognition_timeout_ms")]
    pub recognition_timeout_ms: u64,

    #[serde(default = "default_generation_timeout_ms")]
    pub generation_timeout_ms: u64,

    #[serde(default = "default_synthesis_timeout_ms")]
    pub synthesis_timeout_ms: u64,

    /// Hard deadline for one turn after listening ends
    #[serde(default = "default_overall_deadline_ms")]
    pub overall_deadline_ms: u64,

    #[serde(default = "default_retry_backoff_ms")]
    pub retry_backoff_ms: u64,
}

fn default_listen_inactivity_ms() -> u64 {
    3_000
}

fn default_recognition_timeout_ms() -> u64 {
    5_000
}

fn default_generation_timeout_ms() -> u64 {
    10_000
}

fn default_synthesis_timeout_ms() -> u64 {
    5_000
}

fn default_overall_deadline_ms() -> u64 {
    30_000
}

fn default_retry_backoff_ms() -> u64 {
    250
}

impl Default for TurnConfig {
    fn default() -> Self {
        Self {
            listen_inactivity_ms: default_listen_inactivity_ms(),
            recognition_timeout_ms: default_recognition_timeout_ms(),
            generation_timeout_ms: default_generation_timeout_ms(),
            synthesis_timeout_ms: default_synthesis_timeout_ms(),
            overall_deadline_ms: default_overall_deadline_ms(),
            retry_backoff_ms: default_retry_backoff_ms(),
        }
    }
}

impl TurnConfig {
    /// Convert into the pipeline's timeout set
    pub fn timeouts(&self) -> TurnTimeouts {
        TurnTimeouts {
            listen_inactivity: Duration::from_millis(self.listen_inactivity_ms),
            recognition: Duration::from_millis(self.recognition_timeout_ms),
            generation: Duration::from_millis(self.generation_timeout_ms),
            synthesis: Duration::from_millis(self.synthesis_timeout_ms),
            overall: Duration::from_millis(self.overall_deadline_ms),
            retry_backoff: Duration::from_millis(self.retry_backoff_ms),
        }
    }
}

/// Rate limiting configuration (turn admissions per identity)
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RateLimitConfig {
    #[serde(default = "default_max_turns")]
    pub max_turns: u32,

    #[serde(default = "default_window_secs")]
    pub window_secs: u64,
}

fn default_max_turns() -> u32 {
    10
}

fn default_window_secs() -> u64 {
    60
}

impl Default for RateLimitConfig {
    fn default() -> Self {
        Self {
            max_turns: default_max_turns(),
            window_secs: default_window_secs(),
        }
    }
}

/// Logging configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ObservabilityConfig {
    #[serde(default = "default_log_level")]
    pub log_level: String,

    #[serde(default)]
    pub log_json: bool,
}

fn default_log_level() -> String {
    "info".to_string()
}

impl Default for ObservabilityConfig {
    fn default() -> Self {
        Self {
            log_level: default_log_level(),
            log_json: false,
        }
    }
}

impl Settings {
    /// Validate settings
    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.session.max_sessions == 0 {
            return Err(ConfigError::InvalidValue {
                field: "session.max_sessions".to_string(),
                message: "must be at least 1".to_string(),
            });
        }

        if self.turn.listen_inactivity_ms < 500 || self.turn.listen_inactivity_ms > 30_000 {
            return Err(ConfigError::InvalidValue {
                field: "turn.listen_inactivity_ms".to_string(),
                message: "must be between 500 and 30000".to_string(),
            });
        }

        if self.turn.overall_deadline_ms < 1_000 || self.turn.overall_deadline_ms > 120_000 {
            return Err(ConfigError::InvalidValue {
                field: "turn.overall_deadline_ms".to_string(),
                message: "must be between 1000 and 120000".to_string(),
            });
        }

        let longest_stage = self
            .turn
            .recognition_timeout_ms
            .max(self.turn.generation_timeout_ms)
            .max(self.turn.synthesis_timeout_ms);
        if longest_stage > self.turn.overall_deadline_ms {
            return Err(ConfigError::InvalidValue {
                field: "turn.overall_deadline_ms".to_string(),
                message: "must not be shorter than any stage timeout".to_string(),
            });
        }

        if self.rate_limit.max_turns == 0 || self.rate_limit.window_secs == 0 {
            return Err(ConfigError::InvalidValue {
                field: "rate_limit".to_string(),
                message: "max_turns and window_secs must be at least 1".to_string(),
            });
        }

        Ok(())
    }
}

/// Load settings from files and environment
///
/// Priority: `CHECKY__` env vars > `config/{env}` > `config/default` >
/// built-in defaults.
pub fn load_settings(env: Option<&str>) -> Result<Settings, ConfigError> {
    let mut builder = Config::builder();

    builder = builder.add_source(File::with_name("config/default").required(false));

    if let Some(env_name) = env {
        builder =
            builder.add_source(File::with_name(&format!("config/{}", env_name)).required(false));
    }

    builder = builder.add_source(
        Environment::with_prefix("CHECKY")
            .separator("__")
            .try_parsing(true),
    );

    let config = builder.build()?;
    let settings: Settings = config.try_deserialize()?;

    settings.validate()?;

    Ok(settings)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_default_settings() {
        let settings = Settings::default();
        assert_eq!(settings.server.port, 8080);
        assert_eq!(settings.rate_limit.max_turns, 10);
        assert_eq!(settings.rate_limit.window_secs, 60);
        assert_eq!(settings.session.idle_timeout_secs, 300);
        assert!(settings.validate().is_ok());
    }

    #[test]
    fn test_rejects_zero_rate_limit() {
        let mut settings = Settings::default();
        settings.rate_limit.max_turns = 0;
        assert!(settings.validate().is_err());
    }

    #[test]
    fn test_rejects_deadline_shorter_than_stage() {
        let mut settings = Settings::default();
        settings.turn.overall_deadline_ms = 5_000;
        settings.turn.generation_timeout_ms = 10_000;
        assert!(settings.validate().is_err());
    }

    #[test]
    fn test_turn_timeouts_conversion() {
        let settings = Settings::default();
        let timeouts = settings.turn.timeouts();
        assert_eq!(timeouts.listen_inactivity, Duration::from_secs(3));
        assert_eq!(timeouts.overall, Duration::from_secs(30));
    }
}
