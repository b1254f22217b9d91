//! # Transceiver Register Map
//!
//! Register addresses the packet engine touches directly. Analog and
//! calibration registers stay behind [`Transceiver::configure`] and are not
//! listed here.
//!
//! ## Register Groups
//!
//! - 0x30-0x33: Packet handler addressing
//! - 0x40-0x41: Link quality metrics captured at the end of a reception
//!
//! [`Transceiver::configure`]: crate::radio::hal::Transceiver::configure

// =============================================================================
// Packet Handler Addressing
// =============================================================================

/// Address stamped into outgoing packets as their source
pub const REG_LOCAL_ADDRESS: u8 = 0x30;

/// Destination address of the next transmission
pub const REG_DESTINATION_ADDRESS: u8 = 0x31;

/// Source address of the most recent reception (read-only)
pub const REG_RX_SOURCE_ADDRESS: u8 = 0x32;

/// Hardware address filtering control
pub const REG_ADDRESS_FILTER: u8 = 0x33;

// =============================================================================
// Link Quality
// =============================================================================

/// Received signal strength of the most recent packet (read-only, READY only)
pub const REG_RSSI: u8 = 0x40;

/// Link quality indicator of the most recent packet (read-only, READY only)
pub const REG_LQI: u8 = 0x41;

// =============================================================================
// Bit Fields
// =============================================================================

/// Address filtering off: every packet on the channel is accepted
pub const ADDRESS_FILTER_OFF: u8 = 0x00;

/// Accept packets for the local address and the broadcast address
pub const ADDRESS_FILTER_NODE_BROADCAST: u8 = 0x01;
