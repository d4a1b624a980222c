use std::path::Path;
use std::time::Duration;

use serde::{Deserialize, Serialize};
use thiserror::Error;

use crate::signaling::Awaiting;
use crate::transport::socketio::DEFAULT_PATH;

pub const DEFAULT_SERVER_ADDR: &str = "http://127.0.0.1:3000";
pub const DEFAULT_RELAY_BIND: &str = "0.0.0.0:3000";

pub const ENV_CONFIG_FILE: &str = "RTC_SIGNALING_CONFIG";
pub const ENV_SERVER: &str = "RTC_SIGNALING_SERVER";
pub const ENV_PATH: &str = "RTC_SIGNALING_PATH";
pub const ENV_TIMEOUT_MS: &str = "RTC_SIGNALING_TIMEOUT_MS";
pub const ENV_RELAY_BIND: &str = "RTC_RELAY_BIND";

#[derive(Error, Debug)]
pub enum ConfigError {
    #[error("Cannot read config file: {0}")]
    IoError(#[from] std::io::Error),

    #[error("Cannot parse config: {0}")]
    ParseError(#[from] serde_json::Error),

    #[error("Invalid value for {name}: {value}")]
    InvalidValue { name: &'static str, value: String },
}

/// Upper bound on each waiting phase, in milliseconds. `None` waits forever.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct Timeouts {
    pub connect_ms: Option<u64>,
    pub token_ms: Option<u64>,
    pub receiver_ms: Option<u64>,
    pub offer_ms: Option<u64>,
    pub answer_ms: Option<u64>,
    pub ack_ms: Option<u64>,
}

impl Timeouts {
    pub fn uniform(limit: Duration) -> Self {
        let ms = Some(u64::try_from(limit.as_millis()).unwrap_or(u64::MAX));
        Self {
            connect_ms: ms,
            token_ms: ms,
            receiver_ms: ms,
            offer_ms: ms,
            answer_ms: ms,
            ack_ms: ms,
        }
    }

    pub fn for_phase(&self, awaiting: Awaiting) -> Option<Duration> {
        let ms = match awaiting {
            Awaiting::Connection => self.connect_ms,
            Awaiting::Token => self.token_ms,
            Awaiting::Receiver => self.receiver_ms,
            Awaiting::Offer => self.offer_ms,
            Awaiting::Answer => self.answer_ms,
            Awaiting::Ack => self.ack_ms,
        };
        ms.map(Duration::from_millis)
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct SignalingConfig {
    pub server_addr: String,
    pub socketio_path: String,
    pub timeouts: Timeouts,
}

impl Default for SignalingConfig {
    fn default() -> Self {
        Self {
            server_addr: DEFAULT_SERVER_ADDR.to_string(),
            socketio_path: DEFAULT_PATH.to_string(),
            timeouts: Timeouts::default(),
        }
    }
}

impl SignalingConfig {
    pub fn from_json(json: &str) -> Result<Self, ConfigError> {
        Ok(serde_json::from_str(json)?)
    }

    pub fn from_file(path: impl AsRef<Path>) -> Result<Self, ConfigError> {
        let json = std::fs::read_to_string(path)?;
        Self::from_json(&json)
    }

    /// Defaults, then the JSON file named by `RTC_SIGNALING_CONFIG`, then
    /// the individual `RTC_SIGNALING_*` overrides.
    pub fn from_env() -> Result<Self, ConfigError> {
        let mut config = match std::env::var(ENV_CONFIG_FILE) {
            Ok(path) => Self::from_file(path)?,
            Err(_) => Self::default(),
        };
        config.apply_overrides(|name| std::env::var(name).ok())?;
        Ok(config)
    }

    fn apply_overrides(&mut self, var: impl Fn(&str) -> Option<String>) -> Result<(), ConfigError> {
        if let Some(addr) = var(ENV_SERVER) {
            self.server_addr = addr;
        }
        if let Some(path) = var(ENV_PATH) {
            self.socketio_path = path;
        }
        if let Some(raw) = var(ENV_TIMEOUT_MS) {
            let ms = raw.trim().parse::<u64>().map_err(|_| ConfigError::InvalidValue {
                name: ENV_TIMEOUT_MS,
                value: raw.clone(),
            })?;
            self.timeouts = Timeouts::uniform(Duration::from_millis(ms));
        }
        Ok(())
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct RelayConfig {
    pub bind_addr: String,
}

impl Default for RelayConfig {
    fn default() -> Self {
        Self {
            bind_addr: DEFAULT_RELAY_BIND.to_string(),
        }
    }
}

impl RelayConfig {
    pub fn from_env() -> Self {
        let mut config = Self::default();
        if let Ok(bind) = std::env::var(ENV_RELAY_BIND) {
            config.bind_addr = bind;
        }
        config
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashMap;

    #[test]
    fn test_defaults_wait_forever() {
        let config = SignalingConfig::default();
        assert_eq!(config.server_addr, DEFAULT_SERVER_ADDR);
        assert_eq!(config.socketio_path, "/socket.io/");
        assert_eq!(config.timeouts.for_phase(Awaiting::Answer), None);
    }

    #[test]
    fn test_partial_json() {
        let config = SignalingConfig::from_json(
            r#"{"server_addr":"https://relay.example.com","timeouts":{"answer_ms":30000}}"#,
        )
        .unwrap();
        assert_eq!(config.server_addr, "https://relay.example.com");
        assert_eq!(config.socketio_path, "/socket.io/");
        assert_eq!(
            config.timeouts.for_phase(Awaiting::Answer),
            Some(Duration::from_secs(30))
        );
        assert_eq!(config.timeouts.for_phase(Awaiting::Offer), None);
    }

    #[test]
    fn test_overrides() {
        let vars: HashMap<&str, &str> = [(ENV_SERVER, "http://10.0.0.2:3000"), (ENV_TIMEOUT_MS, "1500")]
            .into_iter()
            .collect();
        let mut config = SignalingConfig::default();
        config
            .apply_overrides(|name| vars.get(name).map(|v| v.to_string()))
            .unwrap();

        assert_eq!(config.server_addr, "http://10.0.0.2:3000");
        assert_eq!(config.timeouts, Timeouts::uniform(Duration::from_millis(1500)));
    }

    #[test]
    fn test_bad_timeout_override() {
        let mut config = SignalingConfig::default();
        let err = config
            .apply_overrides(|name| (name == ENV_TIMEOUT_MS).then(|| "soon".to_string()))
            .unwrap_err();
        assert!(matches!(err, ConfigError::InvalidValue { name: ENV_TIMEOUT_MS, .. }));
    }

    #[test]
    fn test_uniform_saturates() {
        let timeouts = Timeouts::uniform(Duration::MAX);
        assert_eq!(timeouts.ack_ms, Some(u64::MAX));
        assert_eq!(
            Timeouts::uniform(Duration::from_secs(3)).offer_ms,
            Some(3000)
        );
    }

    #[test]
    fn test_relay_default_bind() {
        assert_eq!(RelayConfig::default().bind_addr, "0.0.0.0:3000");
    }
}
