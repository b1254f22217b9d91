//! # Link Error Handling
//!
//! This module defines the LinkError enum, which represents the different
//! error types that can occur in the subghz-link crate.
//!
//! Only recoverable conditions are errors. Contract violations (an oversized
//! `send()` payload, a TX completion without a frame in flight) are panics.

use crate::config::ConfigError;
use crate::radio::hal::HalError;
use thiserror::Error;

/// Represents the different error types that can occur in the link crate.
#[derive(Debug, Error)]
pub enum LinkError {
    /// Transceiver access failed.
    #[error("Transceiver error: {0}")]
    Hal(#[from] HalError),

    /// The configuration is invalid or could not be loaded.
    #[error("Configuration error: {0}")]
    Config(#[from] ConfigError),

    /// Payload plus header exceeds the maximum frame size.
    #[error("Payload of {len} bytes exceeds maximum of {max}")]
    PayloadTooLarge { len: usize, max: usize },

    /// The cipher engine did not signal completion in time.
    #[error("Cipher engine timed out")]
    CryptoTimeout,

    /// A wait was released because the link is shutting down.
    #[error("Operation cancelled by shutdown")]
    Cancelled,

    /// A worker thread could not be started.
    #[error("Failed to spawn {name} thread: {source}")]
    ThreadSpawn {
        name: &'static str,
        #[source]
        source: std::io::Error,
    },

    /// Worker threads did not exit within the shutdown bound.
    #[error("Worker threads did not stop within {0:?}")]
    ShutdownTimeout(std::time::Duration),
}
