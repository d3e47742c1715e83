use std::env;

use crate::error::DispatchError;

#[derive(Debug, Clone)]
pub struct Config {
    pub log_level: String,
    pub log_events: bool,
    pub regions: Vec<(String, usize)>,
    pub drivers: usize,
    pub passengers: usize,
    pub max_sleep_ms: u64,
}

impl Config {
    pub fn from_env() -> Result<Self, DispatchError> {
        let _ = dotenvy::dotenv();

        let regions = match env::var("REGIONS") {
            Ok(raw) => parse_regions(&raw)?,
            Err(_) => default_regions(),
        };

        Ok(Self {
            log_level: env::var("LOG_LEVEL").unwrap_or_else(|_| "info".to_string()),
            log_events: parse_or_default("LOG_EVENTS", true)?,
            regions,
            drivers: parse_or_default("SIM_DRIVERS", 10)?,
            passengers: parse_or_default("SIM_PASSENGERS", 100)?,
            max_sleep_ms: parse_or_default("SIM_MAX_SLEEP_MS", 1000)?,
        })
    }
}

impl Default for Config {
    fn default() -> Self {
        Self {
            log_level: "info".to_string(),
            log_events: true,
            regions: default_regions(),
            drivers: 10,
            passengers: 100,
            max_sleep_ms: 1000,
        }
    }
}

fn default_regions() -> Vec<(String, usize)> {
    vec![("North".to_string(), 50), ("South".to_string(), 50)]
}

/// Parses `North=50,South=50` into a region table.
pub fn parse_regions(raw: &str) -> Result<Vec<(String, usize)>, DispatchError> {
    raw.split(',')
        .map(str::trim)
        .filter(|entry| !entry.is_empty())
        .map(|entry| {
            let (name, capacity) = entry.split_once('=').ok_or_else(|| {
                DispatchError::InvalidConfig(format!("region entry {entry} is not name=capacity"))
            })?;
            let capacity = capacity.trim().parse::<usize>().map_err(|err| {
                DispatchError::InvalidConfig(format!("invalid capacity for {name}: {err}"))
            })?;
            Ok((name.trim().to_string(), capacity))
        })
        .collect()
}

fn parse_or_default<T>(key: &str, default: T) -> Result<T, DispatchError>
where
    T: std::str::FromStr,
    T::Err: std::fmt::Display,
{
    match env::var(key) {
        Ok(raw) => raw
            .parse::<T>()
            .map_err(|err| DispatchError::InvalidConfig(format!("invalid {key}: {err}"))),
        Err(_) => Ok(default),
    }
}
