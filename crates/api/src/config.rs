//! Application configuration loaded from environment variables.

use std::str::FromStr;
use std::time::Duration;

use saga::{DispatcherConfig, ReconcilerConfig};

/// Log output format.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum LogFormat {
    #[default]
    Pretty,
    Json,
}

/// Server configuration with sensible defaults.
///
/// Reads from environment variables (and an optional `.env` file):
/// - `HOST`, `PORT`: bind address (default `0.0.0.0:40051`)
/// - `RUST_LOG`: tracing filter directive (default `info`)
/// - `LOG_FORMAT`: `pretty` or `json`
/// - `DATABASE_URL`, `DATABASE_MAX_CONNECTIONS`: Postgres store; in-memory when unset
/// - `PRODUCT_SERVICE_URL`: Product service; in-memory stock when unset
/// - `USER_SERVICE_URL`, `DEFAULT_NOTIFICATION_EMAIL`: e-mail lookup and its fallback
/// - `RPC_TIMEOUT_MS`: timeout for outbound HTTP calls
/// - `OUTBOX_POLL_INTERVAL_MS`, `OUTBOX_MAX_ATTEMPTS`: outbox dispatcher
/// - `RECONCILE_INTERVAL_MS`, `RECONCILE_BATCH_SIZE`: reconciler
#[derive(Debug, Clone)]
pub struct Config {
    pub host: String,
    pub port: u16,
    pub log_level: String,
    pub log_format: LogFormat,
    pub database_url: Option<String>,
    pub database_max_connections: u32,
    pub product_service_url: Option<String>,
    pub user_service_url: Option<String>,
    pub default_notification_email: String,
    pub rpc_timeout: Duration,
    pub outbox_poll_interval: Duration,
    pub outbox_max_attempts: u32,
    pub reconcile_interval: Duration,
    pub reconcile_batch_size: usize,
    /// Values that could not be parsed and fell back to their default.
    /// Logged once tracing is up.
    pub warnings: Vec<String>,
}

impl Config {
    /// Loads `.env` if present, then reads the process environment.
    pub fn from_env() -> Self {
        _ = dotenvy::dotenv();
        Self::from_lookup(|key| std::env::var(key).ok())
    }

    /// Builds the configuration from an arbitrary variable source.
    pub fn from_lookup(lookup: impl Fn(&str) -> Option<String>) -> Self {
        let defaults = Self::default();
        let mut warnings = Vec::new();

        let text = |key: &str| lookup(key).filter(|v| !v.trim().is_empty());
        let mut number = |key: &str, default: u64| -> u64 {
            parse_or(key, text(key), default, &mut warnings)
        };

        let port = number("PORT", u64::from(defaults.port));
        let database_max_connections = number(
            "DATABASE_MAX_CONNECTIONS",
            u64::from(defaults.database_max_connections),
        );
        let rpc_timeout = number("RPC_TIMEOUT_MS", millis(defaults.rpc_timeout));
        let outbox_poll_interval =
            number("OUTBOX_POLL_INTERVAL_MS", millis(defaults.outbox_poll_interval));
        let outbox_max_attempts =
            number("OUTBOX_MAX_ATTEMPTS", u64::from(defaults.outbox_max_attempts));
        let reconcile_interval =
            number("RECONCILE_INTERVAL_MS", millis(defaults.reconcile_interval));
        let reconcile_batch_size =
            number("RECONCILE_BATCH_SIZE", defaults.reconcile_batch_size as u64);

        // Zero would stall a worker or fail every call.
        let mut nonzero = |key: &str, value: u64, default: u64| -> u64 {
            if value == 0 {
                warnings.push(format!("{key}=0 must be positive, using {default}"));
                default
            } else {
                value
            }
        };
        let database_max_connections = nonzero(
            "DATABASE_MAX_CONNECTIONS",
            database_max_connections,
            u64::from(defaults.database_max_connections),
        );
        let rpc_timeout = nonzero("RPC_TIMEOUT_MS", rpc_timeout, millis(defaults.rpc_timeout));
        let outbox_poll_interval = nonzero(
            "OUTBOX_POLL_INTERVAL_MS",
            outbox_poll_interval,
            millis(defaults.outbox_poll_interval),
        );
        let reconcile_interval = nonzero(
            "RECONCILE_INTERVAL_MS",
            reconcile_interval,
            millis(defaults.reconcile_interval),
        );
        let reconcile_batch_size = nonzero(
            "RECONCILE_BATCH_SIZE",
            reconcile_batch_size,
            defaults.reconcile_batch_size as u64,
        );

        let log_format = match text("LOG_FORMAT").map(|v| v.to_ascii_lowercase()) {
            None => defaults.log_format,
            Some(v) if v == "json" => LogFormat::Json,
            Some(v) if v == "pretty" => LogFormat::Pretty,
            Some(v) => {
                warnings.push(format!("LOG_FORMAT={v} is not json or pretty, using pretty"));
                LogFormat::Pretty
            }
        };

        let port = u16::try_from(port).unwrap_or_else(|_| {
            warnings.push(format!("PORT={port} is out of range, using {}", defaults.port));
            defaults.port
        });

        Self {
            host: text("HOST").unwrap_or(defaults.host),
            port,
            log_level: text("RUST_LOG").unwrap_or(defaults.log_level),
            log_format,
            database_url: text("DATABASE_URL"),
            database_max_connections: clamp_u32(database_max_connections),
            product_service_url: text("PRODUCT_SERVICE_URL"),
            user_service_url: text("USER_SERVICE_URL"),
            default_notification_email: text("DEFAULT_NOTIFICATION_EMAIL")
                .unwrap_or(defaults.default_notification_email),
            rpc_timeout: Duration::from_millis(rpc_timeout),
            outbox_poll_interval: Duration::from_millis(outbox_poll_interval),
            outbox_max_attempts: clamp_u32(outbox_max_attempts),
            reconcile_interval: Duration::from_millis(reconcile_interval),
            reconcile_batch_size: usize::try_from(reconcile_batch_size).unwrap_or(usize::MAX),
            warnings,
        }
    }

    /// Returns the `"host:port"` bind address string.
    pub fn addr(&self) -> String {
        format!("{}:{}", self.host, self.port)
    }

    pub fn dispatcher_config(&self) -> DispatcherConfig {
        DispatcherConfig {
            poll_interval: self.outbox_poll_interval,
            max_attempts: self.outbox_max_attempts,
            ..DispatcherConfig::default()
        }
    }

    pub fn reconciler_config(&self) -> ReconcilerConfig {
        ReconcilerConfig {
            interval: self.reconcile_interval,
            batch_size: self.reconcile_batch_size,
            max_attempts: self.outbox_max_attempts,
        }
    }
}

impl Default for Config {
    fn default() -> Self {
        Self {
            host: "0.0.0.0".to_string(),
            port: 40051,
            log_level: "info".to_string(),
            log_format: LogFormat::Pretty,
            database_url: None,
            database_max_connections: 10,
            product_service_url: None,
            user_service_url: None,
            default_notification_email: String::new(),
            rpc_timeout: Duration::from_millis(5000),
            outbox_poll_interval: Duration::from_millis(1000),
            outbox_max_attempts: 10,
            reconcile_interval: Duration::from_millis(5000),
            reconcile_batch_size: 50,
            warnings: Vec::new(),
        }
    }
}

fn parse_or<T>(key: &str, raw: Option<String>, default: T, warnings: &mut Vec<String>) -> T
where
    T: FromStr + std::fmt::Display,
{
    match raw {
        None => default,
        Some(raw) => raw.trim().parse().unwrap_or_else(|_| {
            warnings.push(format!("{key}={raw} is not a valid number, using {default}"));
            default
        }),
    }
}

fn millis(duration: Duration) -> u64 {
    u64::try_from(duration.as_millis()).unwrap_or(u64::MAX)
}

fn clamp_u32(value: u64) -> u32 {
    u32::try_from(value).unwrap_or(u32::MAX)
}
