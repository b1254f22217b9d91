//! # Utility Modules
//!
//! Common helpers used throughout the crate: hex formatting, rate-limited
//! logging and poison-tolerant locking.

pub mod hex;
pub mod logging;

pub use hex::{decode_hex, encode_hex, format_hex_compact};
pub use logging::{log_frame_hex, LogThrottle};

use std::sync::{Mutex, MutexGuard};

/// Lock a mutex, recovering the guard if a panicking thread poisoned it
///
/// Buffer and bus state stay structurally valid across a panic, so the link
/// keeps operating instead of cascading the panic into every thread.
pub fn lock<T>(mutex: &Mutex<T>) -> MutexGuard<'_, T> {
    mutex.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
}
