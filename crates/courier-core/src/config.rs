//! Process configuration loaded from the environment.

use std::{path::PathBuf, str::FromStr, time::Duration};

use thiserror::Error;

/// Default HTTP listen port.
pub const DEFAULT_PORT: u16 = 3000;
/// Default identity store location.
pub const DEFAULT_STORE_PATH: &str = "whatsapp.db";
/// Default bridge sidecar command line.
pub const DEFAULT_BRIDGE_CMD: &str = "whatsapp-bridge";
/// Default delay between a reset and the next startup attempt.
pub const DEFAULT_RESTART_DELAY: Duration = Duration::from_secs(2);
/// Default capacity of the client event channel.
pub const DEFAULT_EVENT_BUFFER: usize = 64;

/// Configuration error.
#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("Invalid value for {key}: {value:?}")]
    Invalid { key: &'static str, value: String },
}

/// Bot configuration.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct BotConfig {
    /// HTTP listen port (`PORT`).
    pub port: u16,
    /// Identity store file (`COURIER_STORE_PATH`).
    pub store_path: PathBuf,
    /// Bridge sidecar command line (`COURIER_BRIDGE_CMD`).
    pub bridge_command: String,
    /// Delay before restarting after a reset (`COURIER_RESTART_DELAY_MS`).
    pub restart_delay: Duration,
    /// Client event channel capacity (`COURIER_EVENT_BUFFER`).
    pub event_buffer: usize,
}

impl Default for BotConfig {
    fn default() -> Self {
        Self {
            port: DEFAULT_PORT,
            store_path: PathBuf::from(DEFAULT_STORE_PATH),
            bridge_command: DEFAULT_BRIDGE_CMD.to_string(),
            restart_delay: DEFAULT_RESTART_DELAY,
            event_buffer: DEFAULT_EVENT_BUFFER,
        }
    }
}

impl BotConfig {
    /// Load from process environment variables.
    ///
    /// # Errors
    /// Returns error if a numeric variable does not parse.
    pub fn from_env() -> Result<Self, ConfigError> {
        Self::from_lookup(|key| std::env::var(key).ok())
    }

    /// Load using an arbitrary variable lookup. Empty values count as unset.
    ///
    /// # Errors
    /// Returns error if a numeric variable does not parse.
    pub fn from_lookup(lookup: impl Fn(&str) -> Option<String>) -> Result<Self, ConfigError> {
        let get = |key: &str| lookup(key).filter(|v| !v.trim().is_empty());
        let defaults = Self::default();

        Ok(Self {
            port: parse_or(get("PORT"), "PORT", defaults.port)?,
            store_path: get("COURIER_STORE_PATH").map_or(defaults.store_path, PathBuf::from),
            bridge_command: get("COURIER_BRIDGE_CMD").unwrap_or(defaults.bridge_command),
            restart_delay: parse_or(
                get("COURIER_RESTART_DELAY_MS"),
                "COURIER_RESTART_DELAY_MS",
                u64::try_from(defaults.restart_delay.as_millis()).unwrap_or(u64::MAX),
            )
            .map(Duration::from_millis)?,
            event_buffer: parse_or(
                get("COURIER_EVENT_BUFFER"),
                "COURIER_EVENT_BUFFER",
                defaults.event_buffer,
            )?
            .max(1),
        })
    }
}

fn parse_or<T: FromStr>(value: Option<String>, key: &'static str, default: T) -> Result<T, ConfigError> {
    match value {
        Some(raw) => raw
            .trim()
            .parse()
            .map_err(|_| ConfigError::Invalid { key, value: raw }),
        None => Ok(default),
    }
}
