//! # TX and RX Frame Slots
//!
//! The link owns exactly one outgoing and one incoming frame slot. Each slot
//! lives behind its own lock in [`RadioLink`](crate::link::RadioLink); the
//! types here only track contents and state bits.
//!
//! TX slot lifecycle:
//!
//! ```text
//! FREE -> (send) -> PENDING_ENCRYPT -> ENCRYPTED/TRANSMITTING -> WAITING_ACK
//!      <-------- (ACK match or retry budget exhausted) <--------+ <-> RETRANSMITTING
//! ```
//!
//! RX slot lifecycle:
//!
//! ```text
//! FREE -> RECEIVING -> PENDING_DECRYPT -> PARSED -> (read / ACK / invalid) -> FREE
//! ```

use crate::constants::HEADER_LEN;
use crate::link::frame::{FrameFlags, FrameHeader};
use bitflags::bitflags;

bitflags! {
    /// TX slot state bits
    #[derive(Clone, Copy, Debug, PartialEq, Eq, Default)]
    pub struct TxState: u8 {
        /// Contents are ciphertext ready for the FIFO
        const ENCRYPTED   = 0b0000_0001;
        /// Transmitted at least once, an ACK is outstanding
        const WAITING_ACK = 0b0000_0010;
    }
}

bitflags! {
    /// RX slot state bits
    #[derive(Clone, Copy, Debug, PartialEq, Eq, Default)]
    pub struct RxState: u8 {
        const DECRYPTED = 0b0000_0001;
        /// Header validated; the payload may be handed to the application
        const PARSED    = 0b0000_0010;
    }
}

/// Coarse TX slot phase, for diagnostics and tests
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TxPhase {
    Free,
    PendingEncrypt,
    Transmitting,
    WaitingAck,
}

/// Coarse RX slot phase, for diagnostics and tests
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RxPhase {
    Free,
    PendingDecrypt,
    Decrypted,
    Parsed,
}

/// Outgoing frame slot
#[derive(Debug)]
pub struct TxBuffer {
    busy: bool,
    pub destination: u8,
    pub sequence: u8,
    pub flags: FrameFlags,
    /// Frame bytes, header included; sized to the transceiver FIFO
    pub data: Vec<u8>,
    /// Stored frame length; grows to the block boundary on encryption
    pub len: usize,
    pub retries: u8,
    pub state: TxState,
}

impl TxBuffer {
    pub fn new(capacity: usize) -> Self {
        Self {
            busy: false,
            destination: 0,
            sequence: 0,
            flags: FrameFlags::empty(),
            data: vec![0; capacity],
            len: 0,
            retries: 0,
            state: TxState::empty(),
        }
    }

    pub fn is_busy(&self) -> bool {
        self.busy
    }

    pub fn capacity(&self) -> usize {
        self.data.len()
    }

    /// Claim the slot for a new frame and assign the next sequence number
    ///
    /// The caller checks `is_busy()` and the payload bound beforehand.
    pub fn fill(
        &mut self,
        marker: [u8; 2],
        destination: u8,
        flags: FrameFlags,
        payload: &[u8],
        retries: u8,
    ) -> u8 {
        debug_assert!(!self.busy);
        debug_assert!(HEADER_LEN + payload.len() <= self.capacity());

        self.sequence = self.sequence.wrapping_add(1);
        self.destination = destination;
        self.flags = flags;
        self.retries = retries;
        self.state = TxState::empty();

        let header = FrameHeader::new(payload.len(), flags, self.sequence);
        header.encode(marker, &mut self.data);
        self.data[HEADER_LEN..header.length].copy_from_slice(payload);
        // Padding bytes must not leak the previous frame
        self.data[header.length..].fill(0);
        self.len = header.length;
        self.busy = true;

        self.sequence
    }

    /// Frame bytes as they go to the FIFO
    pub fn frame(&self) -> &[u8] {
        &self.data[..self.len]
    }

    pub fn release(&mut self) {
        self.busy = false;
        self.retries = 0;
        self.state = TxState::empty();
    }

    pub fn phase(&self) -> TxPhase {
        if !self.busy {
            TxPhase::Free
        } else if self.state.contains(TxState::WAITING_ACK) {
            TxPhase::WaitingAck
        } else if self.state.contains(TxState::ENCRYPTED) {
            TxPhase::Transmitting
        } else {
            TxPhase::PendingEncrypt
        }
    }
}

/// Incoming frame slot
#[derive(Debug)]
pub struct RxBuffer {
    busy: bool,
    pub source: u8,
    pub sequence: u8,
    pub flags: FrameFlags,
    /// Frame bytes as copied from the FIFO; sized to the transceiver FIFO
    pub data: Vec<u8>,
    /// Number of bytes copied from the FIFO
    pub len: usize,
    pub payload_len: usize,
    pub rssi: u8,
    pub lqi: u8,
    pub state: RxState,
}

impl RxBuffer {
    pub fn new(capacity: usize) -> Self {
        Self {
            busy: false,
            source: 0,
            sequence: 0,
            flags: FrameFlags::empty(),
            data: vec![0; capacity],
            len: 0,
            payload_len: 0,
            rssi: 0,
            lqi: 0,
            state: RxState::empty(),
        }
    }

    pub fn is_busy(&self) -> bool {
        self.busy
    }

    pub fn is_parsed(&self) -> bool {
        self.busy && self.state.contains(RxState::PARSED)
    }

    pub fn capacity(&self) -> usize {
        self.data.len()
    }

    /// Start a reception into the slot, discarding any previous contents
    ///
    /// Returns `true` when an unread parsed frame was overwritten.
    pub fn begin(&mut self, source: u8, rssi: u8, lqi: u8) -> bool {
        let overwritten = self.is_parsed();
        self.busy = true;
        self.source = source;
        self.rssi = rssi;
        self.lqi = lqi;
        self.len = 0;
        self.payload_len = 0;
        self.flags = FrameFlags::empty();
        self.state = RxState::empty();
        overwritten
    }

    /// Apply a validated header
    pub fn set_header(&mut self, header: &FrameHeader) {
        self.sequence = header.sequence;
        self.flags = header.flags;
        self.payload_len = header.payload_len();
    }

    /// Stored frame bytes
    pub fn frame(&self) -> &[u8] {
        &self.data[..self.len]
    }

    pub fn payload(&self) -> &[u8] {
        &self.data[HEADER_LEN..HEADER_LEN + self.payload_len]
    }

    pub fn release(&mut self) {
        self.busy = false;
        self.state = RxState::empty();
    }

    pub fn phase(&self) -> RxPhase {
        if !self.busy {
            RxPhase::Free
        } else if self.state.contains(RxState::PARSED) {
            RxPhase::Parsed
        } else if self.state.contains(RxState::DECRYPTED) {
            RxPhase::Decrypted
        } else {
            RxPhase::PendingDecrypt
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::constants::DEFAULT_MARKER;

    #[test]
    fn test_tx_fill_assigns_wrapping_sequence() {
        let mut tx = TxBuffer::new(96);
        tx.sequence = 0xFE;

        assert_eq!(tx.fill(DEFAULT_MARKER, 1, FrameFlags::empty(), b"a", 3), 0xFF);
        tx.release();
        assert_eq!(tx.fill(DEFAULT_MARKER, 1, FrameFlags::empty(), b"b", 3), 0x00);
        assert_eq!(tx.frame(), &[0xA5, 0x5A, 6, 0, 0, b'b']);
    }

    #[test]
    fn test_tx_fill_clears_stale_tail() {
        let mut tx = TxBuffer::new(32);
        tx.fill(DEFAULT_MARKER, 1, FrameFlags::empty(), &[0xEE; 20], 3);
        tx.release();
        tx.fill(DEFAULT_MARKER, 1, FrameFlags::empty(), b"x", 3);
        assert!(tx.data[6..].iter().all(|&b| b == 0));
    }

    #[test]
    fn test_tx_phases() {
        let mut tx = TxBuffer::new(96);
        assert_eq!(tx.phase(), TxPhase::Free);

        tx.fill(DEFAULT_MARKER, 2, FrameFlags::empty(), b"ping", 3);
        assert_eq!(tx.phase(), TxPhase::PendingEncrypt);

        tx.state |= TxState::ENCRYPTED;
        assert_eq!(tx.phase(), TxPhase::Transmitting);

        tx.state |= TxState::WAITING_ACK;
        assert_eq!(tx.phase(), TxPhase::WaitingAck);

        tx.release();
        assert_eq!(tx.phase(), TxPhase::Free);
        assert_eq!(tx.retries, 0);
    }

    #[test]
    fn test_rx_overwrite_reports_unread_frame() {
        let mut rx = RxBuffer::new(96);
        assert!(!rx.begin(1, 0, 0));

        rx.state |= RxState::DECRYPTED | RxState::PARSED;
        assert_eq!(rx.phase(), RxPhase::Parsed);
        assert!(rx.begin(2, 0, 0));
        assert_eq!(rx.phase(), RxPhase::PendingDecrypt);
        assert_eq!(rx.source, 2);
    }

    #[test]
    fn test_rx_payload_view() {
        let mut rx = RxBuffer::new(32);
        rx.begin(9, 0x80, 0x7F);
        rx.data[..8].copy_from_slice(&[0xA5, 0x5A, 8, 0, 4, b'a', b'b', b'c']);
        rx.len = 16;
        let header = FrameHeader::parse(rx.frame(), DEFAULT_MARKER).unwrap();
        rx.set_header(&header);
        assert_eq!(rx.payload(), b"abc");
        assert_eq!(rx.sequence, 4);
    }
}
