//! Application configuration loaded from environment variables.

use std::str::FromStr;
use std::time::Duration;

use event_bus::{RetryPolicy, Topics};
use thiserror::Error;

/// Which services this process runs.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum ServiceRole {
    Orders,
    Inventory,
    Shipping,
    #[default]
    All,
}

impl ServiceRole {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Orders => "orders",
            Self::Inventory => "inventory",
            Self::Shipping => "shipping",
            Self::All => "all",
        }
    }

    pub fn runs_orders(&self) -> bool {
        matches!(self, Self::Orders | Self::All)
    }

    pub fn runs_inventory(&self) -> bool {
        matches!(self, Self::Inventory | Self::All)
    }

    pub fn runs_shipping(&self) -> bool {
        matches!(self, Self::Shipping | Self::All)
    }
}

impl FromStr for ServiceRole {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "orders" => Ok(Self::Orders),
            "inventory" => Ok(Self::Inventory),
            "shipping" => Ok(Self::Shipping),
            "all" => Ok(Self::All),
            other => Err(format!("unknown service role {other:?}")),
        }
    }
}

/// An environment variable held a value that could not be used.
#[derive(Debug, Error, PartialEq, Eq)]
#[error("Invalid value for {var}: {value:?}")]
pub struct ConfigError {
    pub var: &'static str,
    pub value: String,
}

/// Process configuration with defaults for local single-process runs.
///
/// Reads from environment variables:
/// - `HOST`, `PORT`: bind address (default `0.0.0.0:3000`)
/// - `RUST_LOG`: tracing filter directive (default `info`)
/// - `SERVICE_ROLE`: `orders`, `inventory`, `shipping` or `all`
/// - `DATABASE_URL`: PostgreSQL URL; unset runs on in-memory stores
/// - `ORDER_SERVICE_URL`: base URL the shipping callback calls
/// - `ORDER_EVENT_TOPIC`, `INVENTORY_STATUS_TOPIC`,
///   `LOW_STOCK_NOTIFICATION_TOPIC`, `SHIPPING_EVENT_TOPIC`,
///   `ORDER_NOTIFICATION_TOPIC`, `DEAD_LETTER_TOPIC`: topic names
/// - `BUS_PARTITIONS`: partitions per topic
/// - `CONSUMERS_PER_TOPIC`: consumer loops per topic; the topic's partitions
///   are split between them
/// - `LOW_STOCK_ALERT_EMAIL`: recipient of low-stock alerts
/// - `RECONCILE_INTERVAL_SECS`: shipping reconciliation period, above zero
/// - `ORDER_LOOKUP_ATTEMPTS`, `ORDER_LOOKUP_DELAY_MS`: how long the status
///   updater waits for an order to become visible
/// - `CALLBACK_TIMEOUT_MS`: shipping callback timeout, above zero
#[derive(Debug, Clone)]
pub struct Config {
    pub host: String,
    pub port: u16,
    pub log_level: String,
    pub role: ServiceRole,
    pub database_url: Option<String>,
    pub order_service_url: String,
    pub topics: Topics,
    pub partitions: u32,
    pub consumers_per_topic: u32,
    pub low_stock_alert_email: String,
    pub reconcile_interval: Duration,
    pub order_lookup_attempts: u32,
    pub order_lookup_delay: Duration,
    pub callback_timeout: Duration,
}

impl Config {
    /// Loads configuration from environment variables, falling back to defaults.
    pub fn from_env() -> Result<Self, ConfigError> {
        Self::from_lookup(|var| std::env::var(var).ok())
    }

    /// Loads configuration through `lookup`, which returns a variable's value
    /// if it is set.
    pub fn from_lookup<F>(lookup: F) -> Result<Self, ConfigError>
    where
        F: Fn(&str) -> Option<String>,
    {
        let defaults = Self::default();
        let string = |var: &str, default: String| lookup(var).unwrap_or(default);

        Ok(Self {
            host: string("HOST", defaults.host),
            port: parse(&lookup, "PORT", defaults.port)?,
            log_level: string("RUST_LOG", defaults.log_level),
            role: parse(&lookup, "SERVICE_ROLE", defaults.role)?,
            database_url: lookup("DATABASE_URL").filter(|url| !url.trim().is_empty()),
            order_service_url: string("ORDER_SERVICE_URL", defaults.order_service_url),
            topics: Topics {
                order_events: string("ORDER_EVENT_TOPIC", defaults.topics.order_events),
                inventory_status: string("INVENTORY_STATUS_TOPIC", defaults.topics.inventory_status),
                low_stock: string("LOW_STOCK_NOTIFICATION_TOPIC", defaults.topics.low_stock),
                ship_requests: string("SHIPPING_EVENT_TOPIC", defaults.topics.ship_requests),
                order_notices: string("ORDER_NOTIFICATION_TOPIC", defaults.topics.order_notices),
                dead_letters: string("DEAD_LETTER_TOPIC", defaults.topics.dead_letters),
            },
            partitions: parse(&lookup, "BUS_PARTITIONS", defaults.partitions)?.max(1),
            consumers_per_topic: parse(
                &lookup,
                "CONSUMERS_PER_TOPIC",
                defaults.consumers_per_topic,
            )?
            .max(1),
            low_stock_alert_email: string("LOW_STOCK_ALERT_EMAIL", defaults.low_stock_alert_email),
            reconcile_interval: Duration::from_secs(parse_positive(
                &lookup,
                "RECONCILE_INTERVAL_SECS",
                defaults.reconcile_interval.as_secs(),
            )?),
            order_lookup_attempts: parse(
                &lookup,
                "ORDER_LOOKUP_ATTEMPTS",
                defaults.order_lookup_attempts,
            )?,
            order_lookup_delay: Duration::from_millis(parse(
                &lookup,
                "ORDER_LOOKUP_DELAY_MS",
                defaults.order_lookup_delay.as_millis() as u64,
            )?),
            callback_timeout: Duration::from_millis(parse_positive(
                &lookup,
                "CALLBACK_TIMEOUT_MS",
                defaults.callback_timeout.as_millis() as u64,
            )?),
        })
    }

    /// Returns the `"host:port"` bind address string.
    pub fn addr(&self) -> String {
        format!("{}:{}", self.host, self.port)
    }

    /// Retry policy for orders that are not visible yet.
    pub fn lookup_policy(&self) -> RetryPolicy {
        RetryPolicy::fixed(self.order_lookup_attempts, self.order_lookup_delay)
    }
}

fn parse<T, F>(lookup: &F, var: &'static str, default: T) -> Result<T, ConfigError>
where
    T: FromStr,
    F: Fn(&str) -> Option<String>,
{
    match lookup(var) {
        None => Ok(default),
        Some(value) => value.trim().parse().map_err(|_| ConfigError { var, value }),
    }
}

/// Like [`parse`], for durations that must not be zero.
fn parse_positive<F>(lookup: &F, var: &'static str, default: u64) -> Result<u64, ConfigError>
where
    F: Fn(&str) -> Option<String>,
{
    match parse(lookup, var, default)? {
        0 => Err(ConfigError {
            var,
            value: "0".to_string(),
        }),
        value => Ok(value),
    }
}

impl Default for Config {
    fn default() -> Self {
        Self {
            host: "0.0.0.0".to_string(),
            port: 3000,
            log_level: "info".to_string(),
            role: ServiceRole::All,
            database_url: None,
            order_service_url: "http://127.0.0.1:3000".to_string(),
            topics: Topics::default(),
            partitions: 4,
            consumers_per_topic: 4,
            low_stock_alert_email: "inventory-alerts@localhost".to_string(),
            reconcile_interval: Duration::from_secs(30),
            order_lookup_attempts: 3,
            order_lookup_delay: Duration::from_millis(2000),
            callback_timeout: Duration::from_millis(5000),
        }
    }
}
