//! Application configuration loaded from environment variables.

use std::str::FromStr;
use std::time::Duration;

use propagation::{CdcConfig, ConsumerConfig, RelayConfig};
use thiserror::Error;

#[derive(Debug, Error, PartialEq, Eq)]
pub enum ConfigError {
    #[error("Missing required setting {0}")]
    Missing(&'static str),

    #[error("Invalid value for {key}: {value:?}")]
    Invalid { key: &'static str, value: String },
}

/// How committed prescriptions reach the read models.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum Strategy {
    Direct,
    #[default]
    Outbox,
    Cdc,
}

impl FromStr for Strategy {
    type Err = ();

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_ascii_lowercase().as_str() {
            "direct" => Ok(Strategy::Direct),
            "outbox" => Ok(Strategy::Outbox),
            "cdc" => Ok(Strategy::Cdc),
            _ => Err(()),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum LogFormat {
    #[default]
    Text,
    Json,
}

impl FromStr for LogFormat {
    type Err = ();

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_ascii_lowercase().as_str() {
            "text" => Ok(LogFormat::Text),
            "json" => Ok(LogFormat::Json),
            _ => Err(()),
        }
    }
}

/// Service configuration.
///
/// Reads from environment variables:
/// - `HOST`, `PORT`: bind address (default `0.0.0.0:3000`)
/// - `RUST_LOG`: tracing filter directive (default `info`)
/// - `LOG_FORMAT`: `text` or `json` (default `text`)
/// - `DATABASE_URL`: PostgreSQL connection string (required)
/// - `DB_MAX_CONNECTIONS`, `DB_MIN_CONNECTIONS`: pool bounds (default 25 / 5)
/// - `PROPAGATION_STRATEGY`: `direct`, `outbox` or `cdc` (default `outbox`)
/// - `KAFKA_BROKERS`: bootstrap servers; unset means the in-process broker,
///   which only `direct` and `outbox` accept
/// - `KAFKA_GROUP_ID`: consumer group (default `hospital-projector`)
/// - `EVENTS_TOPIC`: topic for published events (default `prescriptions`)
/// - `CDC_TOPICS`: comma separated capture topics
/// - `OUTBOX_POLL_INTERVAL_MS`, `OUTBOX_BATCH_SIZE`, `OUTBOX_MAX_RETRIES`,
///   `OUTBOX_RETENTION_DAYS`, `OUTBOX_CLEANUP_INTERVAL_SECS`,
///   `OUTBOX_MONITOR_INTERVAL_SECS`: relay tuning
/// - `SHUTDOWN_GRACE_SECS`: how long the event source may take to stop (default 2)
#[derive(Debug, Clone)]
pub struct Config {
    pub host: String,
    pub port: u16,
    pub log_level: String,
    pub log_format: LogFormat,
    pub database_url: String,
    pub db_max_connections: u32,
    pub db_min_connections: u32,
    pub strategy: Strategy,
    pub kafka_brokers: Option<String>,
    pub kafka_group_id: String,
    pub events_topic: String,
    pub cdc_topics: Vec<String>,
    pub outbox_poll_interval: Duration,
    pub outbox_batch_size: usize,
    pub outbox_max_retries: u32,
    pub outbox_retention: Duration,
    pub outbox_cleanup_interval: Duration,
    pub outbox_monitor_interval: Duration,
    pub shutdown_grace: Duration,
}

const DAY_SECS: u64 = 24 * 60 * 60;

impl Config {
    /// Loads configuration from environment variables, falling back to defaults.
    pub fn from_env() -> Result<Self, ConfigError> {
        Self::from_lookup(|key| std::env::var(key).ok())
    }

    /// Loads configuration from an arbitrary key lookup.
    pub fn from_lookup<F>(lookup: F) -> Result<Self, ConfigError>
    where
        F: Fn(&str) -> Option<String>,
    {
        let defaults = Self::default();
        let var = |key: &str| lookup(key).filter(|v| !v.trim().is_empty());

        let database_url = var("DATABASE_URL").ok_or(ConfigError::Missing("DATABASE_URL"))?;

        let cdc_topics = match var("CDC_TOPICS") {
            Some(raw) => raw
                .split(',')
                .map(str::trim)
                .filter(|t| !t.is_empty())
                .map(String::from)
                .collect(),
            None => defaults.cdc_topics,
        };

        Ok(Self {
            host: var("HOST").unwrap_or(defaults.host),
            port: parse(&lookup, "PORT", defaults.port)?,
            log_level: var("RUST_LOG").unwrap_or(defaults.log_level),
            log_format: parse(&lookup, "LOG_FORMAT", defaults.log_format)?,
            database_url,
            db_max_connections: parse(&lookup, "DB_MAX_CONNECTIONS", defaults.db_max_connections)?,
            db_min_connections: parse(&lookup, "DB_MIN_CONNECTIONS", defaults.db_min_connections)?,
            strategy: parse(&lookup, "PROPAGATION_STRATEGY", defaults.strategy)?,
            kafka_brokers: var("KAFKA_BROKERS"),
            kafka_group_id: var("KAFKA_GROUP_ID").unwrap_or(defaults.kafka_group_id),
            events_topic: var("EVENTS_TOPIC").unwrap_or(defaults.events_topic),
            cdc_topics,
            outbox_poll_interval: Duration::from_millis(nonzero(
                &lookup,
                "OUTBOX_POLL_INTERVAL_MS",
                2000,
            )?),
            outbox_batch_size: nonzero(&lookup, "OUTBOX_BATCH_SIZE", defaults.outbox_batch_size)?,
            outbox_max_retries: nonzero(&lookup, "OUTBOX_MAX_RETRIES", defaults.outbox_max_retries)?,
            outbox_retention: Duration::from_secs(
                parse::<u64, _>(&lookup, "OUTBOX_RETENTION_DAYS", 7)? * DAY_SECS,
            ),
            outbox_cleanup_interval: Duration::from_secs(nonzero(
                &lookup,
                "OUTBOX_CLEANUP_INTERVAL_SECS",
                3600,
            )?),
            outbox_monitor_interval: Duration::from_secs(nonzero(
                &lookup,
                "OUTBOX_MONITOR_INTERVAL_SECS",
                30,
            )?),
            shutdown_grace: Duration::from_secs(parse(&lookup, "SHUTDOWN_GRACE_SECS", 2)?),
        })
    }

    /// Returns the `"host:port"` bind address string.
    pub fn addr(&self) -> String {
        format!("{}:{}", self.host, self.port)
    }

    pub fn relay_config(&self) -> RelayConfig {
        RelayConfig {
            topic: self.events_topic.clone(),
            poll_interval: self.outbox_poll_interval,
            batch_size: self.outbox_batch_size,
            max_retries: self.outbox_max_retries,
            retention: self.outbox_retention,
            cleanup_interval: self.outbox_cleanup_interval,
            monitor_interval: self.outbox_monitor_interval,
        }
    }

    pub fn consumer_config(&self) -> ConsumerConfig {
        ConsumerConfig::default()
    }

    pub fn cdc_config(&self) -> CdcConfig {
        CdcConfig {
            topics: self.cdc_topics.clone(),
            consumer: self.consumer_config(),
        }
    }
}

/// Parses `key` if set, otherwise returns `default`.
fn parse<T, F>(lookup: &F, key: &'static str, default: T) -> Result<T, ConfigError>
where
    T: FromStr,
    F: Fn(&str) -> Option<String>,
{
    match lookup(key).filter(|v| !v.trim().is_empty()) {
        Some(value) => value
            .trim()
            .parse()
            .map_err(|_| ConfigError::Invalid { key, value }),
        None => Ok(default),
    }
}

/// Like [`parse`], but zero is rejected.
fn nonzero<T, F>(lookup: &F, key: &'static str, default: T) -> Result<T, ConfigError>
where
    T: FromStr + Default + PartialEq,
    F: Fn(&str) -> Option<String>,
{
    let value = parse(lookup, key, default)?;
    if value == T::default() {
        return Err(ConfigError::Invalid {
            key,
            value: lookup(key).unwrap_or_default(),
        });
    }
    Ok(value)
}

impl Default for Config {
    fn default() -> Self {
        let relay = RelayConfig::default();
        Self {
            host: "0.0.0.0".to_string(),
            port: 3000,
            log_level: "info".to_string(),
            log_format: LogFormat::Text,
            database_url: String::new(),
            db_max_connections: 25,
            db_min_connections: 5,
            strategy: Strategy::Outbox,
            kafka_brokers: None,
            kafka_group_id: "hospital-projector".to_string(),
            events_topic: relay.topic,
            cdc_topics: CdcConfig::default().topics,
            outbox_poll_interval: relay.poll_interval,
            outbox_batch_size: relay.batch_size,
            outbox_max_retries: relay.max_retries,
            outbox_retention: relay.retention,
            outbox_cleanup_interval: relay.cleanup_interval,
            outbox_monitor_interval: relay.monitor_interval,
            shutdown_grace: Duration::from_secs(2),
        }
    }
}
