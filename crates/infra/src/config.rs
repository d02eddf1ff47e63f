//! Process configuration, loaded from `STARPORT_*` environment variables.
//!
//! Every setting has a default; an unset or empty variable uses it. A set but
//! malformed variable is an error rather than a silent fallback.

use std::time::Duration;

use thiserror::Error;

pub const BIND_ADDR: &str = "STARPORT_BIND_ADDR";
pub const SETTLEMENT_WORKERS: &str = "STARPORT_SETTLEMENT_WORKERS";
pub const TRANSIT_HOURS: &str = "STARPORT_TRANSIT_HOURS";
pub const SUBSCRIBER_CAPACITY: &str = "STARPORT_SUBSCRIBER_CAPACITY";
pub const STORE_TIMEOUT_MS: &str = "STARPORT_STORE_TIMEOUT_MS";

/// Upper bound for `STARPORT_TRANSIT_HOURS` (ten years).
pub const MAX_TRANSIT_HOURS: i64 = 24 * 365 * 10;

#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum ConfigError {
    #[error("{var}={value:?}: {reason}")]
    Invalid {
        var: &'static str,
        value: String,
        reason: String,
    },
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct StarportConfig {
    /// HTTP listen address.
    pub bind_addr: String,
    /// Number of settlement threads.
    pub settlement_workers: usize,
    /// Cargo ETA offset from creation time.
    pub transit: chrono::Duration,
    /// Per-subscriber queue length in the broadcast hub.
    pub subscriber_capacity: usize,
    /// Store budget for one settlement.
    pub store_timeout: Duration,
}

impl Default for StarportConfig {
    fn default() -> Self {
        Self {
            bind_addr: "0.0.0.0:8080".to_string(),
            settlement_workers: 4,
            transit: chrono::Duration::hours(24),
            subscriber_capacity: 1024,
            store_timeout: Duration::from_millis(5000),
        }
    }
}

impl StarportConfig {
    pub fn from_env() -> Result<Self, ConfigError> {
        Self::from_lookup(|var| std::env::var(var).ok())
    }

    /// Build from an arbitrary variable source.
    pub fn from_lookup<F>(lookup: F) -> Result<Self, ConfigError>
    where
        F: Fn(&str) -> Option<String>,
    {
        let defaults = Self::default();
        let value = |var: &str| lookup(var).map(|v| v.trim().to_string()).filter(|v| !v.is_empty());

        let bind_addr = value(BIND_ADDR).unwrap_or(defaults.bind_addr);

        let settlement_workers = match value(SETTLEMENT_WORKERS) {
            Some(raw) => positive(SETTLEMENT_WORKERS, &raw)?,
            None => defaults.settlement_workers,
        };

        let transit = match value(TRANSIT_HOURS) {
            Some(raw) => chrono::Duration::hours(transit_hours(&raw)?),
            None => defaults.transit,
        };

        let subscriber_capacity = match value(SUBSCRIBER_CAPACITY) {
            Some(raw) => positive(SUBSCRIBER_CAPACITY, &raw)?,
            None => defaults.subscriber_capacity,
        };

        let store_timeout = match value(STORE_TIMEOUT_MS) {
            Some(raw) => Duration::from_millis(positive::<u64>(STORE_TIMEOUT_MS, &raw)?),
            None => defaults.store_timeout,
        };

        Ok(Self {
            bind_addr,
            settlement_workers,
            transit,
            subscriber_capacity,
            store_timeout,
        })
    }
}

fn parse<T>(var: &'static str, raw: &str) -> Result<T, ConfigError>
where
    T: std::str::FromStr,
    T::Err: std::fmt::Display,
{
    raw.parse::<T>().map_err(|e| ConfigError::Invalid {
        var,
        value: raw.to_string(),
        reason: e.to_string(),
    })
}

fn transit_hours(raw: &str) -> Result<i64, ConfigError> {
    let hours = parse::<i64>(TRANSIT_HOURS, raw)?;
    if !(0..=MAX_TRANSIT_HOURS).contains(&hours) {
        return Err(ConfigError::Invalid {
            var: TRANSIT_HOURS,
            value: raw.to_string(),
            reason: format!("must be between 0 and {MAX_TRANSIT_HOURS}"),
        });
    }
    Ok(hours)
}

fn positive<T>(var: &'static str, raw: &str) -> Result<T, ConfigError>
where
    T: std::str::FromStr + PartialEq + Default,
    T::Err: std::fmt::Display,
{
    let parsed = parse::<T>(var, raw)?;
    if parsed == T::default() {
        return Err(ConfigError::Invalid {
            var,
            value: raw.to_string(),
            reason: "must be greater than zero".to_string(),
        });
    }
    Ok(parsed)
}
