//! # Link and Radio Configuration
//!
//! Configuration consumed by [`RadioLink::init`](crate::link::RadioLink::init).
//! The radio part is handed to the transceiver untouched; the link part shapes
//! the packet engine (frame size, retry budget, timeouts, integrity marker).
//!
//! Both structures serialize with serde, so a deployment can keep them in a
//! JSON file:
//!
//! ```json
//! {
//!   "max_frame_size": 96,
//!   "retry_budget": 3,
//!   "ack_timeout_ms": 100,
//!   "radio": { "base_frequency_hz": 868300000, "data_rate_bps": 38400 }
//! }
//! ```

use crate::constants::*;
use serde::{Deserialize, Serialize};
use std::path::Path;
use std::time::Duration;
use thiserror::Error;

/// Configuration errors
#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("Invalid configuration: {0}")]
    Invalid(String),

    #[error("Failed to read configuration file: {0}")]
    Io(#[from] std::io::Error),

    #[error("Failed to parse configuration: {0}")]
    Parse(#[from] serde_json::Error),
}

/// Modulation schemes supported by the transceiver
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum Modulation {
    Fsk2,
    Gfsk,
    Fsk4,
    Ook,
    Msk,
}

/// Hardware CRC appended by the packet handler
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum CrcMode {
    Disabled,
    Crc16,
    Crc16Ibm,
}

/// Analog and packet-handler settings of the transceiver
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct RadioConfig {
    /// Base carrier frequency in Hz
    pub base_frequency_hz: u32,
    /// Spacing between channels in Hz
    pub channel_spacing_hz: u32,
    /// Channel number relative to the base frequency
    pub channel: u8,
    pub modulation: Modulation,
    /// Data rate in bits per second
    pub data_rate_bps: u32,
    /// Frequency deviation in Hz
    pub deviation_hz: u32,
    /// Receiver channel filter bandwidth in Hz
    pub bandwidth_hz: u32,
    /// Preamble length in bytes
    pub preamble_len: u8,
    pub sync_word: Vec<u8>,
    pub crc: CrcMode,
    /// Forward error correction
    pub fec: bool,
    pub whitening: bool,
    /// Transmit power level (device specific index)
    pub tx_power: u8,
    /// Hardware address filtering; disabled by default
    pub address_filtering: bool,
}

impl Default for RadioConfig {
    fn default() -> Self {
        Self {
            base_frequency_hz: 868_300_000,
            channel_spacing_hz: 200_000,
            channel: 0,
            modulation: Modulation::Gfsk,
            data_rate_bps: 38_400,
            deviation_hz: 20_000,
            bandwidth_hz: 100_000,
            preamble_len: 4,
            sync_word: vec![0xD3, 0x91],
            crc: CrcMode::Crc16,
            fec: false,
            whitening: true,
            tx_power: 0x50,
            address_filtering: false,
        }
    }
}

impl RadioConfig {
    /// Carrier frequency of the configured channel
    pub fn carrier_frequency_hz(&self) -> u64 {
        self.base_frequency_hz as u64 + self.channel as u64 * self.channel_spacing_hz as u64
    }
}

/// Packet engine configuration
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct LinkConfig {
    /// Maximum frame size on air (transceiver FIFO capacity)
    pub max_frame_size: usize,
    /// Retransmissions per frame before it is dropped
    pub retry_budget: u8,
    /// How long to wait for an ACK before retransmitting
    pub ack_timeout_ms: u64,
    /// Bound on a single cipher block operation
    pub crypto_timeout_ms: u64,
    /// Bound on worker thread exit during shutdown
    pub shutdown_timeout_ms: u64,
    /// Integrity marker prefixing every frame
    pub marker: [u8; 2],
    pub radio: RadioConfig,
}

impl Default for LinkConfig {
    fn default() -> Self {
        Self {
            max_frame_size: DEFAULT_MAX_FRAME_SIZE,
            retry_budget: DEFAULT_RETRY_BUDGET,
            ack_timeout_ms: DEFAULT_ACK_TIMEOUT_MS,
            crypto_timeout_ms: DEFAULT_CRYPTO_TIMEOUT_MS,
            shutdown_timeout_ms: DEFAULT_SHUTDOWN_TIMEOUT_MS,
            marker: DEFAULT_MARKER,
            radio: RadioConfig::default(),
        }
    }
}

impl LinkConfig {
    /// Parse a configuration from JSON; missing fields take their defaults
    pub fn from_json_str(json: &str) -> Result<Self, ConfigError> {
        let config: Self = serde_json::from_str(json)?;
        config.validate()?;
        Ok(config)
    }

    /// Load a configuration from a JSON file
    pub fn from_json_file(path: impl AsRef<Path>) -> Result<Self, ConfigError> {
        let contents = std::fs::read_to_string(path)?;
        Self::from_json_str(&contents)
    }

    /// Check the invariants the packet engine relies on
    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.max_frame_size % BLOCK_SIZE != 0 {
            return Err(ConfigError::Invalid(format!(
                "max_frame_size {} is not a multiple of the {BLOCK_SIZE}-byte cipher block",
                self.max_frame_size
            )));
        }
        if !(MIN_FRAME_SIZE..=MAX_FRAME_SIZE_LIMIT).contains(&self.max_frame_size) {
            return Err(ConfigError::Invalid(format!(
                "max_frame_size {} outside {MIN_FRAME_SIZE}..={MAX_FRAME_SIZE_LIMIT}",
                self.max_frame_size
            )));
        }
        if self.ack_timeout_ms == 0 {
            return Err(ConfigError::Invalid("ack_timeout_ms must be non-zero".into()));
        }
        if self.crypto_timeout_ms == 0 {
            return Err(ConfigError::Invalid("crypto_timeout_ms must be non-zero".into()));
        }
        if self.radio.sync_word.is_empty() {
            return Err(ConfigError::Invalid("sync_word must not be empty".into()));
        }
        Ok(())
    }

    /// Largest payload accepted by `send()`
    pub fn max_payload(&self) -> usize {
        self.max_frame_size - HEADER_LEN
    }

    pub fn ack_timeout(&self) -> Duration {
        Duration::from_millis(self.ack_timeout_ms)
    }

    pub fn crypto_timeout(&self) -> Duration {
        Duration::from_millis(self.crypto_timeout_ms)
    }

    pub fn shutdown_timeout(&self) -> Duration {
        Duration::from_millis(self.shutdown_timeout_ms)
    }
}
