//! # Binary Wake Signal
//!
//! One signal per pipeline stage (IRQ wake, action wake, crypto completion).
//! Posting is idempotent until the waiter consumes it: several posts before a
//! wait collapse into a single wake-up. Cancelling releases every current and
//! future waiter with [`WaitStatus::Cancelled`].

use crate::util::lock;
use std::sync::{Condvar, Mutex};
use std::time::{Duration, Instant};

/// Outcome of [`WakeSignal::wait`]
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum WaitStatus {
    Signalled,
    TimedOut,
    Cancelled,
}

#[derive(Debug, Default)]
struct SignalState {
    pending: bool,
    cancelled: bool,
}

/// Binary (non-counting) event signal
#[derive(Debug, Default)]
pub struct WakeSignal {
    state: Mutex<SignalState>,
    cond: Condvar,
}

impl WakeSignal {
    pub fn new() -> Self {
        Self::default()
    }

    /// Wake the waiter; never blocks beyond the internal state lock
    pub fn post(&self) {
        let mut state = lock(&self.state);
        state.pending = true;
        self.cond.notify_one();
    }

    /// Discard a pending post that nobody consumed
    pub fn clear(&self) {
        lock(&self.state).pending = false;
    }

    /// Release all waiters permanently
    pub fn cancel(&self) {
        let mut state = lock(&self.state);
        state.cancelled = true;
        self.cond.notify_all();
    }

    /// Block until posted, cancelled, or `timeout` elapses (`None` waits forever)
    pub fn wait(&self, timeout: Option<Duration>) -> WaitStatus {
        let deadline = timeout.map(|t| Instant::now() + t);
        let mut state = lock(&self.state);

        loop {
            if state.cancelled {
                return WaitStatus::Cancelled;
            }
            if state.pending {
                state.pending = false;
                return WaitStatus::Signalled;
            }

            state = match deadline {
                None => self
                    .cond
                    .wait(state)
                    .unwrap_or_else(|poisoned| poisoned.into_inner()),
                Some(deadline) => {
                    let now = Instant::now();
                    if now >= deadline {
                        return WaitStatus::TimedOut;
                    }
                    self.cond
                        .wait_timeout(state, deadline - now)
                        .map(|(guard, _)| guard)
                        .unwrap_or_else(|poisoned| poisoned.into_inner().0)
                }
            };
        }
    }
}
