//! Configuration management for BeanVault
//!
//! This module handles loading and validating configuration from environment variables,
//! with support for different environments (development, staging, production).

use std::env;
use std::str::FromStr;
use std::time::Duration;

use thiserror::Error;

use crate::monitor::InventoryThresholds;

/// Configuration errors
#[derive(Error, Debug)]
pub enum ConfigError {
    #[error("Missing required environment variable: {0}")]
    MissingEnvVar(String),

    #[error("Invalid environment value: {0}")]
    InvalidValue(String),

    #[error("Invalid port number: {0}")]
    InvalidPort(String),
}

/// Application environment
#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub enum Environment {
    #[default]
    Development,
    Staging,
    Production,
}

impl Environment {
    /// Parse environment from string
    pub fn parse(s: &str) -> Result<Self, ConfigError> {
        match s.to_lowercase().as_str() {
            "dev" | "development" => Ok(Environment::Development),
            "staging" => Ok(Environment::Staging),
            "prod" | "production" => Ok(Environment::Production),
            _ => Err(ConfigError::InvalidValue(format!(
                "Invalid environment: '{}'. Expected: dev, staging, or prod",
                s
            ))),
        }
    }

    /// Check if this is a production environment
    pub fn is_production(&self) -> bool {
        matches!(self, Environment::Production)
    }

    /// Get the environment name as a string
    pub fn as_str(&self) -> &'static str {
        match self {
            Environment::Development => "development",
            Environment::Staging => "staging",
            Environment::Production => "production",
        }
    }
}

/// Application configuration
#[derive(Debug, Clone)]
pub struct Config {
    /// Current environment
    pub environment: Environment,

    /// Server port
    pub port: u16,

    /// Log level (RUST_LOG)
    pub log_level: String,

    /// Database connection URL; redemptions are kept in memory when absent
    pub database_url: Option<String>,

    /// Maximum database connections
    pub db_max_connections: u32,

    /// Metadata pinning gateway; documents are kept in memory when absent
    pub metadata_store_url: Option<String>,

    /// Oracle verification network base URL
    pub oracle_url: String,

    /// Bearer key for the oracle network
    pub oracle_api_key: Option<String>,

    /// Fixed interval between oracle status polls, in milliseconds
    pub oracle_poll_interval_ms: u64,

    /// Maximum number of polls before a request times out
    pub oracle_max_poll_attempts: u32,

    /// Seconds a resolved verification request stays readable
    pub verification_retention_secs: u64,

    /// Identity the service mints with (needs the `mint` capability)
    pub operator_identity: String,

    /// Identity allowed to change inventory thresholds
    pub admin_identity: String,

    /// Identity allowed to advance redemptions
    pub fulfillment_identity: String,

    /// JWT secret used to verify caller tokens
    pub jwt_secret: String,

    /// Initial inventory thresholds
    pub thresholds: InventoryThresholds,

    /// Cron expression for the scheduled inventory sweep
    pub monitor_cron: String,

    /// Start verifications automatically for stale batches
    pub monitor_auto_reverify: bool,

    /// Allowed clock skew when checking that production dates are not in the future
    pub production_date_skew_seconds: i64,

    /// CORS allowed origins
    pub cors_allowed_origins: Option<String>,
}

/// Read an optional variable, falling back to `default`, rejecting unparsable values
fn parse_var<T: FromStr>(key: &str, default: T) -> Result<T, ConfigError> {
    match env::var(key) {
        Ok(raw) if !raw.trim().is_empty() => raw
            .trim()
            .parse::<T>()
            .map_err(|_| ConfigError::InvalidValue(format!("{} has an invalid value: '{}'", key, raw))),
        _ => Ok(default),
    }
}

fn optional_var(key: &str) -> Option<String> {
    env::var(key).ok().filter(|v| !v.trim().is_empty())
}

impl Config {
    /// Load configuration from environment variables
    pub fn from_env() -> Result<Self, ConfigError> {
        // Load .env file if present (ignore errors)
        dotenvy::dotenv().ok();

        let environment = env::var("ENVIRONMENT")
            .map(|s| Environment::parse(&s))
            .unwrap_or(Ok(Environment::Development))?;

        let port = env::var("PORT")
            .unwrap_or_else(|_| "3001".to_string())
            .parse::<u16>()
            .map_err(|_| ConfigError::InvalidPort("PORT must be a valid number".to_string()))?;

        let log_level = env::var("RUST_LOG").unwrap_or_else(|_| "info".to_string());

        let jwt_secret = match optional_var("JWT_SECRET") {
            Some(secret) => secret,
            None if environment.is_production() => {
                return Err(ConfigError::MissingEnvVar("JWT_SECRET".to_string()))
            }
            None => "development-secret-change-in-production".to_string(),
        };

        let defaults = InventoryThresholds::default();
        let thresholds = InventoryThresholds {
            low_inventory_threshold: parse_var(
                "LOW_INVENTORY_THRESHOLD",
                defaults.low_inventory_threshold,
            )?,
            verification_interval_secs: parse_var::<u64>("VERIFICATION_INTERVAL_HOURS", 720)?
                * 3600,
            expiry_warning_window_secs: parse_var::<u64>("EXPIRY_WARNING_DAYS", 30)? * 86_400,
            max_batches_per_sweep: parse_var(
                "MAX_BATCHES_PER_SWEEP",
                defaults.max_batches_per_sweep,
            )?,
        };

        Ok(Config {
            environment,
            port,
            log_level,
            database_url: optional_var("DATABASE_URL"),
            db_max_connections: parse_var("DB_MAX_CONNECTIONS", 5)?,
            metadata_store_url: optional_var("METADATA_STORE_URL"),
            oracle_url: env::var("ORACLE_URL")
                .unwrap_or_else(|_| "http://localhost:8645".to_string()),
            oracle_api_key: optional_var("ORACLE_API_KEY"),
            oracle_poll_interval_ms: parse_var("ORACLE_POLL_INTERVAL_MS", 3_000)?,
            oracle_max_poll_attempts: parse_var("ORACLE_MAX_POLL_ATTEMPTS", 60)?,
            verification_retention_secs: parse_var("VERIFICATION_RETENTION_SECS", 3_600)?,
            operator_identity: env::var("OPERATOR_IDENTITY")
                .unwrap_or_else(|_| "beanvault-operator".to_string()),
            admin_identity: env::var("ADMIN_IDENTITY")
                .unwrap_or_else(|_| "beanvault-admin".to_string()),
            fulfillment_identity: env::var("FULFILLMENT_IDENTITY")
                .unwrap_or_else(|_| "beanvault-fulfillment".to_string()),
            jwt_secret,
            thresholds,
            monitor_cron: env::var("MONITOR_CRON")
                .unwrap_or_else(|_| "0 */15 * * * *".to_string()),
            monitor_auto_reverify: parse_var("MONITOR_AUTO_REVERIFY", false)?,
            production_date_skew_seconds: parse_var("PRODUCTION_DATE_SKEW_SECONDS", 300)?,
            cors_allowed_origins: optional_var("CORS_ALLOWED_ORIGINS"),
        })
    }

    /// Interval between oracle polls
    pub fn oracle_poll_interval(&self) -> Duration {
        Duration::from_millis(self.oracle_poll_interval_ms)
    }

    pub fn verification_retention(&self) -> Duration {
        Duration::from_secs(self.verification_retention_secs)
    }

    /// Database URL with the password masked, for logging
    pub fn database_url_masked(&self) -> Option<String> {
        self.database_url.as_deref().map(mask_password)
    }
}

fn mask_password(url: &str) -> String {
    if let Some(at_pos) = url.find('@') {
        if let Some(colon_pos) = url[..at_pos].rfind(':') {
            let prefix = &url[..colon_pos + 1];
            let suffix = &url[at_pos..];
            return format!("{}****{}", prefix, suffix);
        }
    }
    url.to_string()
}
