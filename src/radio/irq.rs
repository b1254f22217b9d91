//! # Transceiver Interrupt Handling
//!
//! The transceiver raises a single interrupt line. Work is split across three
//! execution contexts so interrupt latency stays minimal:
//!
//! 1. **IRQ bridge** (interrupt context): posts the IRQ wake signal, nothing else
//! 2. **IRQ thread**: reads and clears the flag register, forwards
//!    `CRYPTO_DONE` to the crypto completion signal and folds the remaining
//!    events into the pending-event word
//! 3. **Action thread** (see [`crate::link::engine`]): consumes the pending word
//!
//! ## Flag Layout
//!
//! ```text
//! Bit 7-4: Reserved
//! Bit 3:   CRYPTO_DONE - Cipher engine finished a block
//! Bit 2:   RX_TIMEOUT  - Bounded reception expired without a packet
//! Bit 1:   RX_READY    - Packet available in the RX FIFO
//! Bit 0:   TX_DONE     - Transmission of the TX FIFO completed
//! ```

use crate::link::signal::{WaitStatus, WakeSignal};
use crate::radio::hal::{IrqHandler, Transceiver};
use crate::util::{lock, LogThrottle};
use bitflags::bitflags;
use log::{debug, error, info};
use std::cell::Cell;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex};

bitflags! {
    /// Transceiver interrupt flags
    #[derive(Clone, Copy, Debug, PartialEq, Eq)]
    pub struct IrqFlags: u8 {
        /// Transmission completed
        const TX_DONE     = 0b0000_0001;
        /// Packet received and waiting in the RX FIFO
        const RX_READY    = 0b0000_0010;
        /// Bounded reception expired
        const RX_TIMEOUT  = 0b0000_0100;
        /// Cipher block operation completed
        const CRYPTO_DONE = 0b0000_1000;
    }
}

impl IrqFlags {
    /// Flags that wake the action thread
    pub const ENGINE_EVENTS: Self = Self::TX_DONE
        .union(Self::RX_READY)
        .union(Self::RX_TIMEOUT);

    pub fn tx_done(self) -> bool {
        self.contains(Self::TX_DONE)
    }

    pub fn rx_ready(self) -> bool {
        self.contains(Self::RX_READY)
    }

    pub fn rx_timeout(self) -> bool {
        self.contains(Self::RX_TIMEOUT)
    }

    pub fn crypto_done(self) -> bool {
        self.contains(Self::CRYPTO_DONE)
    }
}

/// Wake signals, pending-event word and termination flag shared by the
/// IRQ bridge, the IRQ thread and the action thread
pub struct IrqPipeline {
    pub irq_wake: WakeSignal,
    pub action_wake: WakeSignal,
    pub crypto_done: WakeSignal,
    pending: critical_section::Mutex<Cell<IrqFlags>>,
    terminate: AtomicBool,
}

impl Default for IrqPipeline {
    fn default() -> Self {
        Self::new()
    }
}

impl IrqPipeline {
    pub fn new() -> Self {
        Self {
            irq_wake: WakeSignal::new(),
            action_wake: WakeSignal::new(),
            crypto_done: WakeSignal::new(),
            pending: critical_section::Mutex::new(Cell::new(IrqFlags::empty())),
            terminate: AtomicBool::new(false),
        }
    }

    /// OR `events` into the pending word
    pub fn publish(&self, events: IrqFlags) {
        critical_section::with(|cs| {
            let cell = self.pending.borrow(cs);
            cell.set(cell.get() | events);
        });
    }

    /// Take and reset the pending word
    pub fn take_pending(&self) -> IrqFlags {
        critical_section::with(|cs| self.pending.borrow(cs).replace(IrqFlags::empty()))
    }

    pub fn is_terminating(&self) -> bool {
        self.terminate.load(Ordering::Acquire)
    }

    /// Set the termination flag and release every wait in the pipeline
    pub fn terminate(&self) {
        self.terminate.store(true, Ordering::Release);
        self.irq_wake.cancel();
        self.action_wake.cancel();
        self.crypto_done.cancel();
    }
}

/// Build the interrupt-context handler: it only wakes the IRQ thread
pub fn irq_bridge(pipeline: Arc<IrqPipeline>) -> IrqHandler {
    Arc::new(move || pipeline.irq_wake.post())
}

/// IRQ processing thread body
pub struct IrqWorker<T: Transceiver> {
    bus: Arc<Mutex<T>>,
    pipeline: Arc<IrqPipeline>,
    throttle: LogThrottle,
}

impl<T: Transceiver> IrqWorker<T> {
    pub fn new(bus: Arc<Mutex<T>>, pipeline: Arc<IrqPipeline>) -> Self {
        Self {
            bus,
            pipeline,
            throttle: LogThrottle::new(60_000, 5),
        }
    }

    pub fn run(mut self) {
        info!("IRQ thread started");

        loop {
            if self.pipeline.irq_wake.wait(None) == WaitStatus::Cancelled
                || self.pipeline.is_terminating()
            {
                break;
            }
            self.service();
        }

        info!("IRQ thread shutting down");
    }

    /// Read, clear and dispatch the hardware flags once
    pub fn service(&mut self) {
        let flags = {
            let mut bus = lock(&self.bus);
            match bus.irq_flags().and_then(|flags| {
                bus.clear_irq_flags(flags)?;
                Ok(flags)
            }) {
                Ok(flags) => flags,
                Err(e) => {
                    if self.throttle.allow() {
                        error!("Failed to service transceiver interrupt: {e}");
                    }
                    return;
                }
            }
        };

        if flags.crypto_done() {
            self.pipeline.crypto_done.post();
        }

        let events = flags & IrqFlags::ENGINE_EVENTS;
        if !events.is_empty() {
            debug!("IRQ events: {events:?}");
            self.pipeline.publish(events);
            self.pipeline.action_wake.post();
        }
    }
}
