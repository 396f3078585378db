//! Console configuration.
//!
//! Every section is `#[serde(default)]`, so a config file only needs to
//! name the values it changes.

use serde::{Deserialize, Serialize};
use std::net::{IpAddr, Ipv4Addr, SocketAddr};
use std::time::Duration;
use thiserror::Error;

use crate::domain::block::MAX_BLOCK_SIZE;

/// Complete console configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct ConsoleConfig {
    pub session: SessionConfig,
    pub lookup: LookupConfig,
    pub transfer: TransferConfig,
    pub socket: SocketConfig,
    /// Where backend error reports go.
    pub error_output: ErrorOutput,
    /// Default tracing filter when neither `RUST_LOG` nor `QC_LOG_LEVEL` is set.
    pub log_level: String,
}

impl ConsoleConfig {
    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.session.poll_interval.is_zero() {
            return Err(ConfigError::InvalidTimeout(
                "session.poll_interval cannot be 0".into(),
            ));
        }
        if self.lookup.timeout.is_zero() {
            return Err(ConfigError::InvalidTimeout(
                "lookup.timeout cannot be 0".into(),
            ));
        }
        if self.transfer.chunk_size == 0 {
            return Err(ConfigError::InvalidLimit(
                "transfer.chunk_size cannot be 0".into(),
            ));
        }
        if self.transfer.max_block_size == 0 {
            return Err(ConfigError::InvalidLimit(
                "transfer.max_block_size cannot be 0".into(),
            ));
        }
        if self.socket.forward_interval.is_zero() {
            return Err(ConfigError::InvalidTimeout(
                "socket.forward_interval cannot be 0".into(),
            ));
        }
        if self.socket.forward_chunk == 0 {
            return Err(ConfigError::InvalidLimit(
                "socket.forward_chunk cannot be 0".into(),
            ));
        }
        if matches!(&self.socket.api_key, Some(key) if key.trim().is_empty()) {
            return Err(ConfigError::Invalid("socket.api_key cannot be empty".into()));
        }
        Ok(())
    }
}

/// Command session settings.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct SessionConfig {
    /// Upper bound on how long a blocked read waits before checking for
    /// cancellation.
    #[serde(with = "humantime_serde")]
    pub poll_interval: Duration,
    /// Print the banner and help text when a session starts.
    pub show_banner: bool,
}

impl Default for SessionConfig {
    fn default() -> Self {
        Self {
            poll_interval: Duration::from_millis(500),
            show_banner: true,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct LookupConfig {
    /// Timeout of a DHT lookup started by `connect`, `probe` or `get block`.
    #[serde(with = "humantime_serde")]
    pub timeout: Duration,
}

impl Default for LookupConfig {
    fn default() -> Self {
        Self {
            timeout: Duration::from_secs(10),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct TransferConfig {
    /// Bytes compared per step of a verification run.
    pub chunk_size: usize,
    /// Minimum time between two progress lines.
    #[serde(with = "humantime_serde")]
    pub progress_interval: Duration,
    pub max_block_size: u64,
}

impl Default for TransferConfig {
    fn default() -> Self {
        Self {
            chunk_size: 4096,
            progress_interval: Duration::from_secs(1),
            max_block_size: MAX_BLOCK_SIZE,
        }
    }
}

/// The `/console` websocket endpoint.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct SocketConfig {
    pub enabled: bool,
    pub listen: SocketAddr,
    /// Required api key (None = no auth required).
    pub api_key: Option<String>,
    /// Longest pause of the output forwarder when nothing is pending.
    #[serde(with = "humantime_serde")]
    pub forward_interval: Duration,
    /// Largest text frame the forwarder sends at once.
    pub forward_chunk: usize,
    /// Largest inbound message accepted.
    pub max_message_size: usize,
    /// A frame write taking longer than this ends the connection.
    #[serde(with = "humantime_serde")]
    pub write_timeout: Duration,
}

impl Default for SocketConfig {
    fn default() -> Self {
        Self {
            enabled: false,
            listen: SocketAddr::new(IpAddr::V4(Ipv4Addr::LOCALHOST), 8080),
            api_key: None,
            forward_interval: Duration::from_millis(250),
            forward_chunk: 4096,
            max_message_size: 64 * 1024,
            write_timeout: Duration::from_secs(5),
        }
    }
}

/// Target of backend error reports.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum ErrorOutput {
    #[default]
    LogFile,
    CommandLine,
    LogFileAndCommandLine,
    None,
}

impl ErrorOutput {
    /// Maps the numeric choice of the `log error` command.
    pub fn from_index(index: i64) -> Option<Self> {
        match index {
            0 => Some(Self::LogFile),
            1 => Some(Self::CommandLine),
            2 => Some(Self::LogFileAndCommandLine),
            3 => Some(Self::None),
            _ => None,
        }
    }

    pub fn index(self) -> u8 {
        match self {
            Self::LogFile => 0,
            Self::CommandLine => 1,
            Self::LogFileAndCommandLine => 2,
            Self::None => 3,
        }
    }

    pub fn to_log(self) -> bool {
        matches!(self, Self::LogFile | Self::LogFileAndCommandLine)
    }

    pub fn to_console(self) -> bool {
        matches!(self, Self::CommandLine | Self::LogFileAndCommandLine)
    }
}

impl Default for ConsoleConfig {
    fn default() -> Self {
        Self {
            session: SessionConfig::default(),
            lookup: LookupConfig::default(),
            transfer: TransferConfig::default(),
            socket: SocketConfig::default(),
            error_output: ErrorOutput::default(),
            log_level: "info".to_string(),
        }
    }
}

/// Configuration validation errors.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum ConfigError {
    #[error("invalid limit: {0}")]
    InvalidLimit(String),
    #[error("invalid timeout: {0}")]
    InvalidTimeout(String),
    #[error("invalid configuration: {0}")]
    Invalid(String),
}
