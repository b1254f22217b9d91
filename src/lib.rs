//! # subghz-link - Reliable Packet Link for Sub-GHz Transceivers
//!
//! The subghz-link crate turns an unreliable, half-duplex packet radio into a
//! best-effort reliable link with addressing, acknowledgment, bounded
//! retransmission and link-layer AES-128 encryption.
//!
//! ## Features
//!
//! - Interrupt handling split into an IRQ bridge, an IRQ thread and an action thread
//! - One TX and one RX frame slot, no queueing
//! - ACK matching by 8-bit sequence number with a configurable retry budget
//! - Frame encryption on the transceiver's block cipher engine
//! - A simulated transceiver and shared ether for host testing
//! - Link statistics and JSON configuration
//!
//! ## Usage
//!
//! ```toml
//! [dependencies]
//! subghz-link = "0.1.0"
//! ```
//!
//! ```rust,no_run
//! use subghz_link::{init_logger, Ether, LinkConfig, LinkEvent, RadioLink};
//!
//! init_logger();
//! let ether = Ether::new();
//! let (a, _) = RadioLink::init(ether.attach(1), LinkConfig::default(), [0x2B; 16], 1).unwrap();
//! let (b, mut b_events) = RadioLink::init(ether.attach(2), LinkConfig::default(), [0x2B; 16], 2).unwrap();
//!
//! a.send(2, b"ping");
//! if let Some(LinkEvent::MessageAvailable { .. }) = b_events.blocking_recv() {
//!     let mut source = 0;
//!     let mut buf = [0u8; 64];
//!     let n = b.read(&mut source, &mut buf);
//!     assert_eq!(&buf[..n], b"ping");
//! }
//! ```

pub mod config;
pub mod constants;
pub mod error;
pub mod link;
pub mod logging;
pub mod radio;
pub mod util;

pub use crate::config::{ConfigError, CrcMode, LinkConfig, Modulation, RadioConfig};
pub use crate::error::LinkError;
pub use crate::logging::{init_logger, log_info};

// Core link types
pub use link::cipher::CipherKey;
pub use link::stats::LinkStatsSnapshot;
pub use link::{LinkEvent, RadioLink, SendStatus};

// Transceiver contract and host simulation
pub use radio::hal::sim::{AirPacket, Ether, SimProbe, SimTransceiver};
pub use radio::hal::{HalError, Transceiver};
