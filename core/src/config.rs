//! Client configuration.
//!
//! Everything has a default, so `ClientConfig::default()` talks to a backend
//! on `127.0.0.1:8000` with a ten second response window. `from_env` layers
//! `DEPOT_*` environment variables on top of the defaults.

use std::num::ParseIntError;
use std::time::Duration;

use thiserror::Error;

use crate::codec::{Framing, UnknownFraming, DEFAULT_MAX_FRAME_LEN};
use crate::connection::Endpoint;
use crate::http::Greeting;

pub const DEFAULT_HOST: &str = "127.0.0.1";
pub const DEFAULT_PORT: u16 = 8000;
pub const DEFAULT_TIMEOUT: Duration = Duration::from_millis(10_000);
pub const DEFAULT_CONNECT_TIMEOUT: Duration = Duration::from_secs(5);

pub const HOST_VAR: &str = "DEPOT_HOST";
pub const PORT_VAR: &str = "DEPOT_PORT";
pub const TIMEOUT_VAR: &str = "DEPOT_TIMEOUT_MS";
pub const FRAMING_VAR: &str = "DEPOT_FRAMING";

#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("{var} must be a port number: {source}")]
    Port {
        var: &'static str,
        #[source]
        source: ParseIntError,
    },
    #[error("{var} must be a whole number of milliseconds: {source}")]
    Timeout {
        var: &'static str,
        #[source]
        source: ParseIntError,
    },
    #[error("{var}: {source}")]
    Framing {
        var: &'static str,
        #[source]
        source: UnknownFraming,
    },
}

/// Backoff used when a send has to re-establish a recycled connection.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ReconnectPolicy {
    pub max_attempts: u32,
    pub initial_delay: Duration,
    pub max_delay: Duration,
}

impl ReconnectPolicy {
    /// Delay before the given zero-based attempt; doubles up to `max_delay`.
    pub fn delay_for(&self, attempt: u32) -> Duration {
        if attempt == 0 {
            return Duration::ZERO;
        }
        let factor = 1u32.checked_shl(attempt - 1).unwrap_or(u32::MAX);
        self.initial_delay
            .checked_mul(factor)
            .map_or(self.max_delay, |delay| delay.min(self.max_delay))
    }
}

impl Default for ReconnectPolicy {
    fn default() -> Self {
        Self {
            max_attempts: 3,
            initial_delay: Duration::from_millis(100),
            max_delay: Duration::from_secs(2),
        }
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct ClientConfig {
    pub endpoint: Endpoint,
    /// How long `send` waits for a response.
    pub timeout: Duration,
    pub connect_timeout: Duration,
    pub framing: Framing,
    /// Written once after each successful connect; `None` disables it.
    pub greeting: Option<Greeting>,
    pub reconnect: ReconnectPolicy,
    pub max_frame_len: usize,
}

impl Default for ClientConfig {
    fn default() -> Self {
        Self {
            endpoint: Endpoint::new(DEFAULT_HOST, DEFAULT_PORT),
            timeout: DEFAULT_TIMEOUT,
            connect_timeout: DEFAULT_CONNECT_TIMEOUT,
            framing: Framing::default(),
            greeting: Some(Greeting::default()),
            reconnect: ReconnectPolicy::default(),
            max_frame_len: DEFAULT_MAX_FRAME_LEN,
        }
    }
}

impl ClientConfig {
    pub fn new(endpoint: Endpoint) -> Self {
        Self {
            endpoint,
            ..Self::default()
        }
    }

    pub fn with_timeout(mut self, timeout: Duration) -> Self {
        self.timeout = timeout;
        self
    }

    pub fn with_framing(mut self, framing: Framing) -> Self {
        self.framing = framing;
        self
    }

    pub fn with_greeting(mut self, greeting: Option<Greeting>) -> Self {
        self.greeting = greeting;
        self
    }

    pub fn with_reconnect(mut self, reconnect: ReconnectPolicy) -> Self {
        self.reconnect = reconnect;
        self
    }

    pub fn from_env() -> Result<Self, ConfigError> {
        Self::from_lookup(|var| std::env::var(var).ok())
    }

    /// Build from an arbitrary variable source. Empty values count as unset.
    pub fn from_lookup<F>(lookup: F) -> Result<Self, ConfigError>
    where
        F: Fn(&str) -> Option<String>,
    {
        let get = |var: &str| lookup(var).filter(|value| !value.trim().is_empty());
        let mut config = Self::default();

        if let Some(host) = get(HOST_VAR) {
            config.endpoint.host = host.trim().to_string();
        }
        if let Some(port) = get(PORT_VAR) {
            config.endpoint.port = port
                .trim()
                .parse()
                .map_err(|source| ConfigError::Port { var: PORT_VAR, source })?;
        }
        if let Some(timeout) = get(TIMEOUT_VAR) {
            let millis: u64 = timeout
                .trim()
                .parse()
                .map_err(|source| ConfigError::Timeout { var: TIMEOUT_VAR, source })?;
            config.timeout = Duration::from_millis(millis);
        }
        if let Some(framing) = get(FRAMING_VAR) {
            config.framing = framing
                .parse()
                .map_err(|source| ConfigError::Framing { var: FRAMING_VAR, source })?;
        }
        Ok(config)
    }
}
