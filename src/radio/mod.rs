//! # Radio Layer
//!
//! The transceiver contract ([`hal`]), its register map ([`registers`]) and
//! interrupt plumbing ([`irq`]) the packet engine is built on.

pub mod hal;
pub mod irq;
pub mod registers;

pub use hal::{CipherOp, HalError, MachineState, Strobe, Transceiver};
pub use irq::IrqFlags;
