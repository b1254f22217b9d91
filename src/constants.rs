//! Link Protocol Constants
//!
//! This module defines the constants shared by the frame codec, the packet
//! engine and the simulated transceiver.

/// Default two-byte integrity marker that prefixes every frame
pub const DEFAULT_MARKER: [u8; 2] = [0xA5, 0x5A];

/// Frame header length: marker (2) + total length (1) + flags (1) + sequence (1)
pub const HEADER_LEN: usize = 5;

/// Offset of the total length byte inside the header
pub const LENGTH_OFFSET: usize = 2;

/// Offset of the flags byte inside the header
pub const FLAGS_OFFSET: usize = 3;

/// Offset of the sequence byte inside the header
pub const SEQUENCE_OFFSET: usize = 4;

/// Default maximum frame size, matching a typical transceiver FIFO depth
pub const DEFAULT_MAX_FRAME_SIZE: usize = 96;

/// Smallest FIFO the link can operate on (two cipher blocks)
pub const MIN_FRAME_SIZE: usize = 32;

/// Largest frame expressible in the one-byte length field
pub const MAX_FRAME_SIZE_LIMIT: usize = 255;

/// Cipher block size in bytes
pub const BLOCK_SIZE: usize = 16;

/// Retransmissions allowed per outgoing frame before it is dropped
pub const DEFAULT_RETRY_BUDGET: u8 = 3;

/// Default ACK retry window in milliseconds
pub const DEFAULT_ACK_TIMEOUT_MS: u64 = 100;

/// Default bound on a single cipher block operation in milliseconds
pub const DEFAULT_CRYPTO_TIMEOUT_MS: u64 = 50;

/// Default bound on worker thread exit during shutdown in milliseconds
pub const DEFAULT_SHUTDOWN_TIMEOUT_MS: u64 = 1000;

/// Bound on the READY transition before reading link metrics in milliseconds
pub const READY_TIMEOUT_MS: u64 = 20;

/// Broadcast destination address
pub const BROADCAST_ADDRESS: u8 = 0xFF;
