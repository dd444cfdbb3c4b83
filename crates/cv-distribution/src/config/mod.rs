use std::env;
use std::fmt;
use std::net::{IpAddr, SocketAddr};
use std::path::PathBuf;

use crate::distribution::{
    DistributionConfig, SourceTag, Strategy, UnknownStrategy, WeightedCapacityPolicy,
};

/// Distinguishes runtime behavior for different stages of the service.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AppEnvironment {
    Development,
    Test,
    Production,
}

impl AppEnvironment {
    fn from_str(value: &str) -> Self {
        match value.trim().to_ascii_lowercase().as_str() {
            "prod" | "production" => Self::Production,
            "test" | "ci" => Self::Test,
            _ => Self::Development,
        }
    }
}

/// Top-level configuration for the application.
#[derive(Debug, Clone)]
pub struct AppConfig {
    pub environment: AppEnvironment,
    pub server: ServerConfig,
    pub telemetry: TelemetryConfig,
    pub distribution: DistributionSettings,
}

impl AppConfig {
    pub fn load() -> Result<Self, ConfigError> {
        dotenvy::dotenv().ok();

        let environment = AppEnvironment::from_str(
            &env::var("APP_ENV").unwrap_or_else(|_| "development".to_string()),
        );

        let host = env::var("APP_HOST").unwrap_or_else(|_| "127.0.0.1".to_string());
        let port = env::var("APP_PORT")
            .unwrap_or_else(|_| "3000".to_string())
            .parse::<u16>()
            .map_err(|_| ConfigError::InvalidPort)?;

        let log_level = env::var("APP_LOG_LEVEL").unwrap_or_else(|_| "info".to_string());

        Ok(Self {
            environment,
            server: ServerConfig { host, port },
            telemetry: TelemetryConfig {
                log_level,
                ansi: environment == AppEnvironment::Development,
            },
            distribution: DistributionSettings::from_env()?,
        })
    }
}

/// Settings controlling the HTTP server binding.
#[derive(Debug, Clone)]
pub struct ServerConfig {
    pub host: String,
    pub port: u16,
}

impl ServerConfig {
    pub fn socket_addr(&self) -> Result<SocketAddr, ConfigError> {
        if self.host.eq_ignore_ascii_case("localhost") {
            return Ok(SocketAddr::new(IpAddr::from([127, 0, 0, 1]), self.port));
        }

        let ip: IpAddr = self
            .host
            .parse()
            .map_err(|source| ConfigError::InvalidHost { source })?;

        Ok(SocketAddr::new(ip, self.port))
    }
}

/// Tracing controls.
#[derive(Debug, Clone)]
pub struct TelemetryConfig {
    pub log_level: String,
    /// Colored output; only enabled for local development.
    pub ansi: bool,
}

/// Defaults for automatic runs plus the optional rules file.
#[derive(Debug, Clone, PartialEq)]
pub struct DistributionSettings {
    pub service: DistributionConfig,
    pub rules_path: Option<PathBuf>,
}

impl DistributionSettings {
    fn from_env() -> Result<Self, ConfigError> {
        let default_strategy = match non_empty_var("DISTRIBUTION_STRATEGY") {
            Some(value) => value
                .parse::<Strategy>()
                .map_err(|source| ConfigError::InvalidStrategy { source })?,
            None => Strategy::Weighted,
        };

        let batch_size = match non_empty_var("DISTRIBUTION_BATCH_SIZE") {
            Some(value) => value
                .trim()
                .parse::<usize>()
                .ok()
                .filter(|size| *size > 0)
                .ok_or(ConfigError::InvalidBatchSize)?,
            None => 100,
        };

        let default_source = non_empty_var("DISTRIBUTION_SOURCE")
            .map(SourceTag::new)
            .unwrap_or_else(SourceTag::other);

        let weighted_capacity = match non_empty_var("DISTRIBUTION_WEIGHTED_CAPACITY") {
            Some(value) => value
                .parse::<WeightedCapacityPolicy>()
                .map_err(|_| ConfigError::InvalidCapacityPolicy(value))?,
            None => WeightedCapacityPolicy::Enforce,
        };

        let seed = match non_empty_var("DISTRIBUTION_SEED") {
            Some(value) => Some(
                value
                    .trim()
                    .parse::<u64>()
                    .map_err(|_| ConfigError::InvalidSeed)?,
            ),
            None => None,
        };

        Ok(Self {
            service: DistributionConfig {
                default_strategy,
                batch_size,
                default_source,
                weighted_capacity,
                seed,
            },
            rules_path: non_empty_var("DISTRIBUTION_RULES_PATH").map(PathBuf::from),
        })
    }
}

fn non_empty_var(key: &str) -> Option<String> {
    env::var(key).ok().filter(|value| !value.trim().is_empty())
}

#[derive(Debug)]
pub enum ConfigError {
    InvalidPort,
    InvalidHost { source: std::net::AddrParseError },
    InvalidStrategy { source: UnknownStrategy },
    InvalidBatchSize,
    InvalidSeed,
    InvalidCapacityPolicy(String),
}

impl fmt::Display for ConfigError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ConfigError::InvalidPort => write!(f, "APP_PORT must be a valid u16"),
            ConfigError::InvalidHost { .. } => {
                write!(f, "APP_HOST must parse to an IPv4 or IPv6 address")
            }
            ConfigError::InvalidStrategy { source } => {
                write!(f, "DISTRIBUTION_STRATEGY is invalid: {}", source)
            }
            ConfigError::InvalidBatchSize => {
                write!(f, "DISTRIBUTION_BATCH_SIZE must be a positive integer")
            }
            ConfigError::InvalidSeed => write!(f, "DISTRIBUTION_SEED must be a valid u64"),
            ConfigError::InvalidCapacityPolicy(value) => write!(
                f,
                "DISTRIBUTION_WEIGHTED_CAPACITY must be 'enforce' or 'ignore', got '{}'",
                value
            ),
        }
    }
}

impl std::error::Error for ConfigError {
    fn source(&self) -> Option<&(dyn std::error::Error + 'static)> {
        match self {
            ConfigError::InvalidHost { source } => Some(source),
            ConfigError::InvalidStrategy { source } => Some(source),
            ConfigError::InvalidPort
            | ConfigError::InvalidBatchSize
            | ConfigError::InvalidSeed
            | ConfigError::InvalidCapacityPolicy(_) => None,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::env;
    use std::sync::{Mutex, OnceLock};

    fn env_guard() -> &'static Mutex<()> {
        static GUARD: OnceLock<Mutex<()>> = OnceLock::new();
        GUARD.get_or_init(|| Mutex::new(()))
    }

    fn reset_env() {
        for key in [
            "APP_ENV",
            "APP_HOST",
            "APP_PORT",
            "APP_LOG_LEVEL",
            "DISTRIBUTION_STRATEGY",
            "DISTRIBUTION_BATCH_SIZE",
            "DISTRIBUTION_SOURCE",
            "DISTRIBUTION_WEIGHTED_CAPACITY",
            "DISTRIBUTION_SEED",
            "DISTRIBUTION_RULES_PATH",
        ] {
            env::remove_var(key);
        }
    }

    #[test]
    fn load_uses_defaults_when_env_missing() {
        let _lock = env_guard().lock().expect("env mutex poisoned");
        reset_env();
        let config = AppConfig::load().expect("config loads with defaults");
        assert_eq!(config.environment, AppEnvironment::Development);
        assert_eq!(config.server.host, "127.0.0.1");
        assert_eq!(config.server.port, 3000);
        assert_eq!(config.telemetry.log_level, "info");
        assert_eq!(config.distribution.service, DistributionConfig::default());
        assert_eq!(config.distribution.rules_path, None);
    }

    #[test]
    fn accepts_localhost_host() {
        let _lock = env_guard().lock().expect("env mutex poisoned");
        reset_env();
        env::set_var("APP_HOST", "localhost");
        let config = AppConfig::load().expect("config loads");
        let addr = config.server.socket_addr().expect("localhost resolves");
        assert_eq!(addr, SocketAddr::new(IpAddr::from([127, 0, 0, 1]), 3000));
    }

    #[test]
    fn reads_distribution_overrides() {
        let _lock = env_guard().lock().expect("env mutex poisoned");
        reset_env();
        env::set_var("DISTRIBUTION_STRATEGY", "balanced");
        env::set_var("DISTRIBUTION_BATCH_SIZE", "25");
        env::set_var("DISTRIBUTION_SOURCE", "Google");
        env::set_var("DISTRIBUTION_WEIGHTED_CAPACITY", "ignore");
        env::set_var("DISTRIBUTION_SEED", "42");
        env::set_var("DISTRIBUTION_RULES_PATH", "config/rules.json");

        let config = AppConfig::load().expect("config loads");
        reset_env();

        let service = config.distribution.service;
        assert_eq!(service.default_strategy, Strategy::Balanced);
        assert_eq!(service.batch_size, 25);
        assert_eq!(service.default_source, SourceTag::google());
        assert_eq!(service.weighted_capacity, WeightedCapacityPolicy::Ignore);
        assert_eq!(service.seed, Some(42));
        assert_eq!(
            config.distribution.rules_path,
            Some(PathBuf::from("config/rules.json"))
        );
    }

    #[test]
    fn rejects_unknown_strategy_and_zero_batch() {
        let _lock = env_guard().lock().expect("env mutex poisoned");
        reset_env();
        env::set_var("DISTRIBUTION_STRATEGY", "round_robin");
        let error = AppConfig::load().expect_err("strategy rejected");
        assert!(matches!(error, ConfigError::InvalidStrategy { .. }));

        reset_env();
        env::set_var("DISTRIBUTION_BATCH_SIZE", "0");
        let error = AppConfig::load().expect_err("batch size rejected");
        reset_env();
        assert!(matches!(error, ConfigError::InvalidBatchSize));
    }

    #[test]
    fn rejects_invalid_port() {
        let _lock = env_guard().lock().expect("env mutex poisoned");
        reset_env();
        env::set_var("APP_PORT", "not-a-port");
        let error = AppConfig::load().expect_err("port rejected");
        reset_env();
        assert_eq!(error.to_string(), "APP_PORT must be a valid u16");
    }
}
