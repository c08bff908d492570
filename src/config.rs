use std::env;
use std::str::FromStr;
use std::time::Duration;

use bigdecimal::BigDecimal;
use thiserror::Error;

use crate::application::consumer::RetryPolicy;
use crate::application::outbox_relay::RelayConfig;
use crate::domain::order::check_money;
use crate::domain::payment::DEFAULT_OPENING_BALANCE;

#[derive(Debug, Error, PartialEq)]
pub enum ConfigError {
    #[error("{0} must be set")]
    Missing(&'static str),
    #[error("{name} has invalid value '{value}'")]
    Invalid { name: &'static str, value: String },
}

/// Per-binary defaults.
#[derive(Debug, Clone, Copy)]
pub struct ServiceDefaults {
    pub name: &'static str,
    pub port: u16,
}

#[derive(Debug, Clone)]
pub struct Config {
    pub database_url: String,
    pub kafka_brokers: String,
    pub host: String,
    pub port: u16,
    pub consumer_group: String,
    pub outbox_poll_interval: Duration,
    pub outbox_max_backoff: Duration,
    pub outbox_batch_size: i64,
    pub consumer_max_attempts: u32,
    pub request_timeout: Duration,
    pub opening_balance: BigDecimal,
}

impl Config {
    /// Read the process environment. Call `dotenvy::dotenv()` first to pick
    /// up a local `.env`.
    pub fn from_env(defaults: ServiceDefaults) -> Result<Self, ConfigError> {
        Self::from_lookup(defaults, |name| env::var(name).ok())
    }

    pub fn from_lookup<F>(defaults: ServiceDefaults, lookup: F) -> Result<Self, ConfigError>
    where
        F: Fn(&str) -> Option<String>,
    {
        let database_url = lookup("DATABASE_URL")
            .filter(|v| !v.trim().is_empty())
            .ok_or(ConfigError::Missing("DATABASE_URL"))?;

        Ok(Self {
            database_url,
            kafka_brokers: lookup("KAFKA_BROKERS").unwrap_or_else(|| "localhost:9092".to_string()),
            host: lookup("HOST").unwrap_or_else(|| "0.0.0.0".to_string()),
            port: parse_or(&lookup, "PORT", defaults.port)?,
            consumer_group: lookup("CONSUMER_GROUP")
                .unwrap_or_else(|| format!("{}-service-group", defaults.name)),
            outbox_poll_interval: Duration::from_millis(parse_or(
                &lookup,
                "OUTBOX_POLL_INTERVAL_MS",
                500,
            )?),
            outbox_max_backoff: Duration::from_millis(parse_or(
                &lookup,
                "OUTBOX_MAX_BACKOFF_MS",
                30_000,
            )?),
            outbox_batch_size: positive(parse_or(&lookup, "OUTBOX_BATCH_SIZE", 100)?, "OUTBOX_BATCH_SIZE")?,
            consumer_max_attempts: positive(
                parse_or(&lookup, "CONSUMER_MAX_ATTEMPTS", 5)?,
                "CONSUMER_MAX_ATTEMPTS",
            )?,
            request_timeout: Duration::from_millis(parse_or(&lookup, "REQUEST_TIMEOUT_MS", 10_000)?),
            opening_balance: money(
                "OPENING_BALANCE",
                &lookup("OPENING_BALANCE").unwrap_or_else(|| DEFAULT_OPENING_BALANCE.to_string()),
            )?,
        })
    }

    pub fn relay(&self) -> RelayConfig {
        RelayConfig {
            batch_size: self.outbox_batch_size,
            poll_interval: self.outbox_poll_interval,
            max_backoff: self.outbox_max_backoff,
            ..RelayConfig::default()
        }
    }

    pub fn retry_policy(&self) -> RetryPolicy {
        RetryPolicy {
            max_attempts: self.consumer_max_attempts,
            ..RetryPolicy::default()
        }
    }
}

fn parse<T: FromStr>(name: &'static str, raw: &str) -> Result<T, ConfigError> {
    raw.trim().parse().map_err(|_| ConfigError::Invalid {
        name,
        value: raw.to_string(),
    })
}

/// An amount that fits the balance column.
fn money(name: &'static str, raw: &str) -> Result<BigDecimal, ConfigError> {
    let value: BigDecimal = parse(name, raw)?;
    check_money(name, &value).map_err(|_| ConfigError::Invalid {
        name,
        value: raw.to_string(),
    })?;
    Ok(value)
}

fn parse_or<T, F>(lookup: &F, name: &'static str, default: T) -> Result<T, ConfigError>
where
    T: FromStr,
    F: Fn(&str) -> Option<String>,
{
    match lookup(name) {
        Some(raw) => parse(name, &raw),
        None => Ok(default),
    }
}

fn positive<T>(value: T, name: &'static str) -> Result<T, ConfigError>
where
    T: PartialOrd + Default + ToString,
{
    if value > T::default() {
        Ok(value)
    } else {
        Err(ConfigError::Invalid {
            name,
            value: value.to_string(),
        })
    }
}

#[cfg(test)]
mod tests {
    use std::collections::HashMap;

    use super::*;

    const ORDER: ServiceDefaults = ServiceDefaults {
        name: "order",
        port: 8080,
    };

    fn config(vars: &[(&str, &str)]) -> Result<Config, ConfigError> {
        let vars: HashMap<String, String> = vars
            .iter()
            .map(|(k, v)| (k.to_string(), v.to_string()))
            .collect();
        Config::from_lookup(ORDER, |name| vars.get(name).cloned())
    }

    #[test]
    fn defaults_apply_when_only_database_url_is_set() {
        let cfg = config(&[("DATABASE_URL", "postgres://localhost/orders")]).unwrap();
        assert_eq!(cfg.port, 8080);
        assert_eq!(cfg.kafka_brokers, "localhost:9092");
        assert_eq!(cfg.consumer_group, "order-service-group");
        assert_eq!(cfg.outbox_poll_interval, Duration::from_millis(500));
        assert_eq!(cfg.outbox_batch_size, 100);
        assert_eq!(cfg.consumer_max_attempts, 5);
        assert_eq!(cfg.request_timeout, Duration::from_secs(10));
        assert_eq!(cfg.opening_balance, BigDecimal::from(1000));
    }

    #[test]
    fn missing_database_url_is_an_error() {
        assert_eq!(config(&[]).unwrap_err(), ConfigError::Missing("DATABASE_URL"));
    }

    #[test]
    fn invalid_numbers_are_reported_by_name() {
        let err = config(&[("DATABASE_URL", "postgres://x"), ("PORT", "eighty")]).unwrap_err();
        assert_eq!(
            err,
            ConfigError::Invalid {
                name: "PORT",
                value: "eighty".to_string()
            }
        );
        assert!(config(&[("DATABASE_URL", "postgres://x"), ("OUTBOX_BATCH_SIZE", "0")]).is_err());
    }

    #[test]
    fn opening_balance_must_fit_the_balance_column() {
        for raw in ["-5", "0.001", "10000000000", "1e10000000"] {
            assert!(
                config(&[("DATABASE_URL", "postgres://x"), ("OPENING_BALANCE", raw)]).is_err(),
                "{raw} accepted"
            );
        }
        let cfg = config(&[("DATABASE_URL", "postgres://x"), ("OPENING_BALANCE", "250.50")])
            .unwrap();
        assert_eq!(cfg.opening_balance, BigDecimal::from_str("250.50").unwrap());
    }

    #[test]
    fn overrides_flow_into_relay_and_retry_settings() {
        let cfg = config(&[
            ("DATABASE_URL", "postgres://x"),
            ("OUTBOX_BATCH_SIZE", "10"),
            ("OUTBOX_MAX_BACKOFF_MS", "2000"),
            ("CONSUMER_MAX_ATTEMPTS", "2"),
        ])
        .unwrap();
        assert_eq!(cfg.relay().batch_size, 10);
        assert_eq!(cfg.relay().max_backoff, Duration::from_secs(2));
        assert_eq!(cfg.retry_policy().max_attempts, 2);
    }
}
