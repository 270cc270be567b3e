//! Application configuration module
//! Loads settings from environment variables (after `.env`) and validates them

use crate::payments::PaystackConfig;
use rust_decimal::Decimal;
use std::env;
use std::str::FromStr;
use std::time::Duration;
use uuid::Uuid;

/// Main application configuration
#[derive(Debug, Clone)]
pub struct AppConfig {
    pub server: ServerConfig,
    /// `None` when running with `SKIP_EXTERNALS=true` on the in-memory store.
    pub database: Option<DatabaseConfig>,
    pub logging: LoggingConfig,
    pub paystack: PaystackConfig,
    pub escrow: EscrowConfig,
    pub reconciler: ReconcilerConfig,
    pub skip_externals: bool,
}

#[derive(Debug, Clone)]
pub struct ServerConfig {
    pub host: String,
    pub port: u16,
}

#[derive(Debug, Clone)]
pub struct DatabaseConfig {
    pub url: String,
    pub max_connections: u32,
    pub min_connections: u32,
    pub connection_timeout: u64, // seconds
    pub idle_timeout: u64,       // seconds
    pub run_migrations: bool,
    pub migrations_path: String,
}

impl Default for DatabaseConfig {
    fn default() -> Self {
        Self {
            url: String::new(),
            max_connections: 20,
            min_connections: 5,
            connection_timeout: 30,
            idle_timeout: 600,
            run_migrations: true,
            migrations_path: "./migrations".to_string(),
        }
    }
}

#[derive(Debug, Clone)]
pub struct LoggingConfig {
    pub filter: String,
    pub format: LogFormat,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LogFormat {
    Json,
    Plain,
}

/// Money-movement policy.
#[derive(Debug, Clone)]
pub struct EscrowConfig {
    /// Wallet that receives platform commission and withdrawal fees.
    pub platform_account_id: Uuid,
    /// Applied when a vendor has no commission rate on file.
    pub default_commission_rate: Decimal,
    /// Flat fee deducted from each withdrawal.
    pub withdrawal_fee: Decimal,
    pub min_withdrawal_amount: Decimal,
    pub currency: String,
    /// Re-verify `charge.success` webhooks with the gateway before confirming.
    pub verify_webhook_charges: bool,
}

impl Default for EscrowConfig {
    fn default() -> Self {
        Self {
            platform_account_id: Uuid::nil(),
            default_commission_rate: Decimal::new(10, 2),
            withdrawal_fee: Decimal::new(50, 0),
            min_withdrawal_amount: Decimal::new(1000, 0),
            currency: "NGN".to_string(),
            verify_webhook_charges: false,
        }
    }
}

/// Background re-verification of payments and payouts stuck in flight.
#[derive(Debug, Clone)]
pub struct ReconcilerConfig {
    pub enabled: bool,
    pub poll_interval: Duration,
    pub stale_after: Duration,
    pub batch_size: i64,
    pub max_attempts: u32,
}

impl Default for ReconcilerConfig {
    fn default() -> Self {
        Self {
            enabled: true,
            poll_interval: Duration::from_secs(60),
            stale_after: Duration::from_secs(900),
            batch_size: 50,
            max_attempts: 10,
        }
    }
}

fn parse_var<T: FromStr>(name: &str, default: &str) -> Result<T, ConfigError> {
    env::var(name)
        .unwrap_or_else(|_| default.to_string())
        .trim()
        .parse()
        .map_err(|_| ConfigError::InvalidValue(name.to_string()))
}

fn flag(name: &str, default: bool) -> bool {
    env::var(name)
        .map(|v| matches!(v.trim().to_lowercase().as_str(), "1" | "true" | "yes"))
        .unwrap_or(default)
}

impl AppConfig {
    /// Load configuration from environment variables
    pub fn from_env() -> Result<Self, ConfigError> {
        let _ = dotenv::dotenv().ok();
        let skip_externals = flag("SKIP_EXTERNALS", false);

        let database = if skip_externals {
            None
        } else {
            Some(DatabaseConfig::from_env()?)
        };

        let paystack = match PaystackConfig::from_env() {
            Ok(config) => config,
            Err(_) if skip_externals => PaystackConfig::default(),
            Err(_) => {
                return Err(ConfigError::MissingVariable(
                    "PAYSTACK_SECRET_KEY".to_string(),
                ))
            }
        };

        Ok(AppConfig {
            server: ServerConfig::from_env()?,
            database,
            logging: LoggingConfig::from_env(),
            paystack,
            escrow: EscrowConfig::from_env()?,
            reconciler: ReconcilerConfig::from_env()?,
            skip_externals,
        })
    }

    /// Validate the entire configuration
    pub fn validate(&self) -> Result<(), ConfigError> {
        self.server.validate()?;
        if let Some(database) = &self.database {
            database.validate()?;
        }
        self.escrow.validate()?;
        self.reconciler.validate()?;

        if !self.skip_externals && self.paystack.secret_key.trim().is_empty() {
            return Err(ConfigError::InvalidValue("PAYSTACK_SECRET_KEY".to_string()));
        }
        if self.paystack.timeout_secs == 0 {
            return Err(ConfigError::InvalidValue("PAYSTACK_TIMEOUT_SECS".to_string()));
        }

        Ok(())
    }
}

impl ServerConfig {
    pub fn from_env() -> Result<Self, ConfigError> {
        Ok(ServerConfig {
            host: env::var("SERVER_HOST").unwrap_or_else(|_| "127.0.0.1".to_string()),
            port: parse_var("SERVER_PORT", "8000")?,
        })
    }

    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.port == 0 {
            return Err(ConfigError::InvalidValue(
                "SERVER_PORT cannot be 0".to_string(),
            ));
        }

        if self.host.is_empty() {
            return Err(ConfigError::InvalidValue(
                "SERVER_HOST cannot be empty".to_string(),
            ));
        }

        Ok(())
    }

    pub fn bind_address(&self) -> String {
        format!("{}:{}", self.host, self.port)
    }
}

impl DatabaseConfig {
    pub fn from_env() -> Result<Self, ConfigError> {
        Ok(DatabaseConfig {
            url: env::var("DATABASE_URL")
                .map_err(|_| ConfigError::MissingVariable("DATABASE_URL".to_string()))?,
            max_connections: parse_var("DB_MAX_CONNECTIONS", "20")?,
            min_connections: parse_var("DB_MIN_CONNECTIONS", "5")?,
            connection_timeout: parse_var("DB_CONNECTION_TIMEOUT", "30")?,
            idle_timeout: parse_var("DB_IDLE_TIMEOUT", "600")?,
            run_migrations: flag("RUN_MIGRATIONS", true),
            migrations_path: env::var("MIGRATIONS_PATH")
                .unwrap_or_else(|_| "./migrations".to_string()),
        })
    }

    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.url.is_empty() {
            return Err(ConfigError::InvalidValue("DATABASE_URL".to_string()));
        }

        if self.max_connections == 0 {
            return Err(ConfigError::InvalidValue("DB_MAX_CONNECTIONS".to_string()));
        }

        if self.min_connections > self.max_connections {
            return Err(ConfigError::InvalidValue(
                "DB_MIN_CONNECTIONS must be <= DB_MAX_CONNECTIONS".to_string(),
            ));
        }

        Ok(())
    }
}

impl LoggingConfig {
    /// Never fails, so tracing can start before the rest of the configuration
    /// is read and report its errors.
    pub fn from_env() -> Self {
        Self::from_values(env::var("RUST_LOG").ok(), env::var("LOG_FORMAT").ok())
    }

    fn from_values(filter: Option<String>, format: Option<String>) -> Self {
        LoggingConfig {
            filter: filter
                .filter(|f| !f.trim().is_empty())
                .unwrap_or_else(|| "info".to_string()),
            format: match format.unwrap_or_default().to_lowercase().as_str() {
                "json" => LogFormat::Json,
                _ => LogFormat::Plain,
            },
        }
    }
}

#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    #[error("Missing environment variable: {0}")]
    MissingVariable(String),

    #[error("Invalid value for configuration: {0}")]
    InvalidValue(String),
}
