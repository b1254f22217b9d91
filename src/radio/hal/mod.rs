//! # Hardware Abstraction Layer for the Transceiver
//!
//! This module defines the contract the packet engine consumes from the radio:
//! register and FIFO access, command strobes, machine state and IRQ flag
//! queries, and the on-chip block cipher. Register-level calibration and
//! analog setup live behind [`Transceiver::configure`].
//!
//! The engine never holds the transceiver across a blocking wait, so an
//! implementation only has to be safe for short, serialized calls.

use crate::config::RadioConfig;
use crate::radio::irq::IrqFlags;
use std::sync::Arc;
use std::time::Duration;
use thiserror::Error;

pub mod sim;

/// Errors that can occur during transceiver operations
#[derive(Debug, Error, Clone, PartialEq)]
pub enum HalError {
    #[error("SPI communication error: {0}")]
    Spi(String),

    #[error("Register access error: 0x{0:02X}")]
    Register(u8),

    #[error("FIFO overflow: {len} bytes exceeds capacity {capacity}")]
    FifoOverflow { len: usize, capacity: usize },

    #[error("Timeout waiting for {0}")]
    Timeout(String),

    #[error("Operation not allowed in state {0:?}")]
    InvalidState(MachineState),

    #[error("Invalid configuration: {0}")]
    InvalidConfig(String),
}

/// Command strobes
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Strobe {
    FlushTx,
    FlushRx,
    /// Go to READY (synthesizer idle, registers and metrics readable)
    Ready,
    /// Transmit the TX FIFO contents
    Tx,
    /// Start reception using the timeout set by [`Transceiver::set_rx_timeout`]
    Rx,
    /// Low-power standby
    Standby,
}

/// Transceiver state machine as reported by the status register
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum MachineState {
    Ready,
    Tx,
    Rx,
    /// Synthesizer locking between READY and TX/RX
    Locking,
    Standby,
}

/// Direction of a cipher engine operation
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CipherOp {
    Encrypt,
    Decrypt,
}

/// Interrupt line callback; runs in interrupt context and must not block
pub type IrqHandler = Arc<dyn Fn() + Send + Sync>;

/// Transceiver contract consumed by the packet engine
pub trait Transceiver: Send {
    /// Apply the analog and packet handler configuration
    fn configure(&mut self, config: &RadioConfig) -> Result<(), HalError>;

    /// Route the interrupt line to `handler`
    fn register_irq_handler(&mut self, handler: IrqHandler) -> Result<(), HalError>;

    /// Read a single register
    fn read_register(&mut self, addr: u8) -> Result<u8, HalError>;

    /// Write a single register
    fn write_register(&mut self, addr: u8, value: u8) -> Result<(), HalError>;

    /// Copy the received packet out of the RX FIFO, returning the byte count
    fn read_fifo(&mut self, buf: &mut [u8]) -> Result<usize, HalError>;

    /// Load the TX FIFO; fails when `data` exceeds the FIFO capacity
    fn write_fifo(&mut self, data: &[u8]) -> Result<(), HalError>;

    /// Issue a command strobe
    fn strobe(&mut self, strobe: Strobe) -> Result<(), HalError>;

    /// Timeout applied by the next [`Strobe::Rx`]; `None` listens forever
    fn set_rx_timeout(&mut self, timeout: Option<Duration>) -> Result<(), HalError>;

    /// Current state machine state
    fn machine_state(&mut self) -> Result<MachineState, HalError>;

    /// Pending interrupt flags
    fn irq_flags(&mut self) -> Result<IrqFlags, HalError>;

    /// Acknowledge the given interrupt flags
    fn clear_irq_flags(&mut self, flags: IrqFlags) -> Result<(), HalError>;

    /// Load the 128-bit cipher key
    fn write_cipher_key(&mut self, key: &[u8; 16]) -> Result<(), HalError>;

    /// Load one 16-byte input block
    fn write_cipher_block(&mut self, block: &[u8; 16]) -> Result<(), HalError>;

    /// Start the cipher; completion raises [`IrqFlags::CRYPTO_DONE`]
    fn start_cipher(&mut self, op: CipherOp) -> Result<(), HalError>;

    /// Read the 16-byte result block
    fn read_cipher_block(&mut self) -> Result<[u8; 16], HalError>;
}
