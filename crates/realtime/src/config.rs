//! Application configuration

use std::env;
use std::time::Duration;

/// Log output format
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LogFormat {
    Pretty,
    Json,
}

/// Application configuration loaded from environment variables
#[derive(Debug, Clone)]
pub struct Config {
    // Server
    pub bind_address: String,
    pub cors_allowed_origins: Vec<String>,
    pub log_format: LogFormat,

    // Authentication
    pub jwt_secret: String,
    pub jwt_expiry_hours: i64,
    pub internal_events_token: String,

    // Realtime
    pub heartbeat_timeout_secs: u64,
    pub reaper_interval_secs: u64,
    pub presence_grace_ms: u64,
    pub presence_retention_secs: u64,
}

impl Config {
    /// Load configuration from environment variables
    pub fn from_env() -> Result<Self, ConfigError> {
        let config = Self {
            // Server
            bind_address: env::var("BIND_ADDRESS").unwrap_or_else(|_| "0.0.0.0:4000".to_string()),
            cors_allowed_origins: env::var("CORS_ALLOWED_ORIGINS")
                .unwrap_or_default()
                .split(',')
                .map(str::trim)
                .filter(|origin| !origin.is_empty())
                .map(String::from)
                .collect(),
            log_format: match env::var("LOG_FORMAT").unwrap_or_default().as_str() {
                "json" => LogFormat::Json,
                _ => LogFormat::Pretty,
            },

            // Authentication
            jwt_secret: required_secret("JWT_SECRET")?,
            jwt_expiry_hours: parse_or("JWT_EXPIRY_HOURS", 24),
            internal_events_token: required_secret("INTERNAL_EVENTS_TOKEN")?,

            // Realtime
            heartbeat_timeout_secs: parse_or("HEARTBEAT_TIMEOUT_SECS", 60),
            reaper_interval_secs: parse_or("REAPER_INTERVAL_SECS", 15),
            presence_grace_ms: parse_or("PRESENCE_GRACE_MS", 5000), // 5 seconds default
            presence_retention_secs: parse_or("PRESENCE_RETENTION_SECS", 3600),
        };

        if config.heartbeat_timeout_secs == 0 {
            return Err(ConfigError::Invalid("HEARTBEAT_TIMEOUT_SECS must be greater than zero"));
        }
        if config.reaper_interval_secs == 0 {
            return Err(ConfigError::Invalid("REAPER_INTERVAL_SECS must be greater than zero"));
        }

        Ok(config)
    }

    pub fn heartbeat_timeout(&self) -> Duration {
        Duration::from_secs(self.heartbeat_timeout_secs)
    }

    pub fn reaper_interval(&self) -> Duration {
        Duration::from_secs(self.reaper_interval_secs)
    }

    pub fn presence_grace(&self) -> Duration {
        Duration::from_millis(self.presence_grace_ms)
    }

    pub fn presence_retention(&self) -> Duration {
        Duration::from_secs(self.presence_retention_secs)
    }
}

/// Secrets must be present and at least 32 characters
fn required_secret(name: &'static str) -> Result<String, ConfigError> {
    let secret = env::var(name).map_err(|_| ConfigError::Missing(name))?;
    if secret.len() < 32 {
        return Err(ConfigError::WeakSecret(name));
    }
    Ok(secret)
}

fn parse_or<T: std::str::FromStr>(name: &str, default: T) -> T {
    env::var(name)
        .ok()
        .and_then(|value| value.parse().ok())
        .unwrap_or(default)
}

#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    #[error("Missing required environment variable: {0}")]
    Missing(&'static str),
    #[error("Weak secret: {0} must be at least 32 characters")]
    WeakSecret(&'static str),
    #[error("Invalid configuration: {0}")]
    Invalid(&'static str),
}

#[cfg(test)]
mod tests {
    use super::*;
    use serial_test::serial;

    const VARS: &[&str] = &[
        "BIND_ADDRESS",
        "CORS_ALLOWED_ORIGINS",
        "LOG_FORMAT",
        "JWT_SECRET",
        "JWT_EXPIRY_HOURS",
        "INTERNAL_EVENTS_TOKEN",
        "HEARTBEAT_TIMEOUT_SECS",
        "REAPER_INTERVAL_SECS",
        "PRESENCE_GRACE_MS",
        "PRESENCE_RETENTION_SECS",
    ];

    /// Helper to set required env vars for testing
    fn setup_minimal_config() {
        for var in VARS {
            env::remove_var(var);
        }
        env::set_var("JWT_SECRET", "test-jwt-secret-must-be-at-least-32-characters-long");
        env::set_var("INTERNAL_EVENTS_TOKEN", "test-internal-token-at-least-32-characters");
    }

    fn cleanup_config() {
        for var in VARS {
            env::remove_var(var);
        }
    }

    #[test]
    #[serial]
    fn test_defaults() {
        setup_minimal_config();

        let config = Config::from_env().unwrap();
        assert_eq!(config.bind_address, "0.0.0.0:4000");
        assert_eq!(config.heartbeat_timeout(), Duration::from_secs(60));
        assert_eq!(config.reaper_interval(), Duration::from_secs(15));
        assert_eq!(config.presence_grace(), Duration::from_millis(5000));
        assert_eq!(config.presence_retention(), Duration::from_secs(3600));
        assert_eq!(config.log_format, LogFormat::Pretty);
        assert!(config.cors_allowed_origins.is_empty());

        cleanup_config();
    }

    #[test]
    #[serial]
    fn test_overrides() {
        setup_minimal_config();
        env::set_var("PRESENCE_GRACE_MS", "8000");
        env::set_var("HEARTBEAT_TIMEOUT_SECS", "90");
        env::set_var("LOG_FORMAT", "json");
        env::set_var("CORS_ALLOWED_ORIGINS", "https://app.tripdesk.io, https://admin.tripdesk.io,");

        let config = Config::from_env().unwrap();
        assert_eq!(config.presence_grace(), Duration::from_secs(8));
        assert_eq!(config.heartbeat_timeout(), Duration::from_secs(90));
        assert_eq!(config.log_format, LogFormat::Json);
        assert_eq!(
            config.cors_allowed_origins,
            vec!["https://app.tripdesk.io", "https://admin.tripdesk.io"]
        );

        cleanup_config();
    }

    #[test]
    #[serial]
    fn test_unparseable_values_fall_back() {
        setup_minimal_config();
        env::set_var("PRESENCE_GRACE_MS", "soon");

        let config = Config::from_env().unwrap();
        assert_eq!(config.presence_grace_ms, 5000);

        cleanup_config();
    }

    #[test]
    #[serial]
    fn test_secret_validation() {
        setup_minimal_config();
        env::remove_var("JWT_SECRET");
        assert!(matches!(Config::from_env(), Err(ConfigError::Missing("JWT_SECRET"))));

        env::set_var("JWT_SECRET", "short");
        assert!(matches!(Config::from_env(), Err(ConfigError::WeakSecret("JWT_SECRET"))));

        setup_minimal_config();
        env::set_var("INTERNAL_EVENTS_TOKEN", "tiny");
        assert!(matches!(
            Config::from_env(),
            Err(ConfigError::WeakSecret("INTERNAL_EVENTS_TOKEN"))
        ));

        cleanup_config();
    }

    #[test]
    #[serial]
    fn test_zero_heartbeat_timeout_rejected() {
        setup_minimal_config();
        env::set_var("HEARTBEAT_TIMEOUT_SECS", "0");

        assert!(matches!(Config::from_env(), Err(ConfigError::Invalid(_))));

        cleanup_config();
    }
}
