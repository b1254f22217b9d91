//! # Link Frame Format
//!
//! Every frame on air carries a five byte header followed by the payload:
//!
//! ```text
//! +---------+---------+--------+-------+----------+-------------+
//! | marker0 | marker1 | length | flags | sequence | payload ... |
//! +---------+---------+--------+-------+----------+-------------+
//! ```
//!
//! - **marker**: fixed two-byte integrity marker. The whole frame is encrypted,
//!   so a frame from a foreign network or sealed with another key fails here.
//! - **length**: header plus payload, before cipher padding. The on-air size is
//!   rounded up to the 16-byte cipher block; the receiver recovers the payload
//!   length from this byte. Earlier firmware stored the padded length here, so
//!   frames are not interchangeable with it.
//! - **flags**: see [`FrameFlags`]
//! - **sequence**: 8-bit wrapping sequence number of the sending buffer
//!
//! An ACK frame carries the acknowledged sequence number as its single
//! payload byte.

use crate::constants::*;
use bitflags::bitflags;
use thiserror::Error;

bitflags! {
    /// Frame flag byte
    #[derive(Clone, Copy, Debug, PartialEq, Eq, Default)]
    pub struct FrameFlags: u8 {
        /// Frame acknowledges the sequence number in its payload
        const ACK        = 0b0000_0001;
        /// Sender hint that this frame was sent before
        const RETRANSMIT = 0b0000_0010;
    }
}

/// Errors that can occur while decoding a frame header
#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum FrameError {
    #[error("Frame too short: {0} bytes")]
    TooShort(usize),

    #[error("Integrity marker mismatch: {0:02X?}")]
    MarkerMismatch([u8; 2]),

    #[error("Length field {length} inconsistent with {available} received bytes")]
    InvalidLength { length: usize, available: usize },
}

/// Decoded frame header
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct FrameHeader {
    /// Header plus payload length, excluding cipher padding
    pub length: usize,
    pub flags: FrameFlags,
    pub sequence: u8,
}

impl FrameHeader {
    pub fn new(payload_len: usize, flags: FrameFlags, sequence: u8) -> Self {
        Self {
            length: HEADER_LEN + payload_len,
            flags,
            sequence,
        }
    }

    pub fn payload_len(&self) -> usize {
        self.length - HEADER_LEN
    }

    pub fn is_ack(&self) -> bool {
        self.flags.contains(FrameFlags::ACK)
    }

    /// Write the header into the first [`HEADER_LEN`] bytes of `out`
    pub fn encode(&self, marker: [u8; 2], out: &mut [u8]) {
        out[0] = marker[0];
        out[1] = marker[1];
        out[LENGTH_OFFSET] = self.length as u8;
        out[FLAGS_OFFSET] = self.flags.bits();
        out[SEQUENCE_OFFSET] = self.sequence;
    }

    /// Validate and decode the header of a decrypted frame of `data.len()` bytes
    pub fn parse(data: &[u8], marker: [u8; 2]) -> Result<Self, FrameError> {
        if data.len() < HEADER_LEN {
            return Err(FrameError::TooShort(data.len()));
        }

        if data[..2] != marker {
            return Err(FrameError::MarkerMismatch([data[0], data[1]]));
        }

        let length = data[LENGTH_OFFSET] as usize;
        if length < HEADER_LEN || length > data.len() {
            return Err(FrameError::InvalidLength {
                length,
                available: data.len(),
            });
        }

        Ok(Self {
            length,
            flags: FrameFlags::from_bits_truncate(data[FLAGS_OFFSET]),
            sequence: data[SEQUENCE_OFFSET],
        })
    }
}

/// Round a frame length up to the cipher block boundary
pub fn padded_len(len: usize) -> usize {
    len.div_ceil(BLOCK_SIZE) * BLOCK_SIZE
}
