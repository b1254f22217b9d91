//! Link statistics
//!
//! Counters are plain relaxed atomics: they are updated from the action
//! thread and the public API and only ever read as a loose snapshot.

use serde::Serialize;
use std::sync::atomic::{AtomicU64, Ordering};

macro_rules! link_counters {
    ($($(#[$doc:meta])* $name:ident),* $(,)?) => {
        /// Live link counters
        #[derive(Debug, Default)]
        pub struct LinkStats {
            $($(#[$doc])* pub $name: AtomicU64,)*
        }

        /// Point-in-time copy of [`LinkStats`]
        #[derive(Debug, Default, Clone, Copy, PartialEq, Eq, Serialize)]
        pub struct LinkStatsSnapshot {
            $($(#[$doc])* pub $name: u64,)*
        }

        impl LinkStats {
            pub fn snapshot(&self) -> LinkStatsSnapshot {
                LinkStatsSnapshot {
                    $($name: self.$name.load(Ordering::Relaxed),)*
                }
            }
        }
    };
}

link_counters! {
    /// Data frames handed to the transceiver (first attempts only)
    frames_sent,
    /// Data frames parsed and offered to the application
    frames_received,
    acks_sent,
    /// ACKs matching the outstanding sequence number
    acks_received,
    retransmissions,
    /// Frames dropped after the retry budget ran out
    retries_exhausted,
    /// `send()` calls dropped because the TX slot was busy
    sends_dropped_busy,
    /// ACKs not sent because the TX slot was busy
    acks_dropped_busy,
    /// Frames rejected by the marker or length check
    frames_discarded,
    /// Unread frames lost to a newer reception
    rx_overwrites,
    crypto_timeouts,
    bus_errors,
}

impl LinkStats {
    pub fn bump(counter: &AtomicU64) {
        counter.fetch_add(1, Ordering::Relaxed);
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_snapshot_reflects_counters() {
        let stats = LinkStats::default();
        LinkStats::bump(&stats.frames_sent);
        LinkStats::bump(&stats.frames_sent);
        LinkStats::bump(&stats.rx_overwrites);

        let snapshot = stats.snapshot();
        assert_eq!(snapshot.frames_sent, 2);
        assert_eq!(snapshot.rx_overwrites, 1);
        assert_eq!(snapshot.acks_received, 0);
    }
}
