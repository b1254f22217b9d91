//! # Reliable Radio Link
//!
//! [`RadioLink`] turns a half-duplex [`Transceiver`] into a best-effort
//! reliable link: addressed frames, acknowledgment, bounded retransmission and
//! AES-128 link-layer encryption.
//!
//! There is exactly one outgoing and one incoming frame slot. `send()` while a
//! frame is in flight is dropped, and a frame that arrives before the previous
//! one was `read()` replaces it. Delivery is reported through [`LinkEvent`]s on
//! the channel returned by [`RadioLink::init`].
//!
//! ```rust,no_run
//! use subghz_link::{Ether, LinkConfig, RadioLink};
//!
//! let ether = Ether::new();
//! let (link, mut events) =
//!     RadioLink::init(ether.attach(1), LinkConfig::default(), [0x2B; 16], 1).unwrap();
//! link.send(0xFF, b"ping");
//! if let Some(event) = events.blocking_recv() {
//!     println!("{event:?}");
//! }
//! link.shutdown().unwrap();
//! ```

pub mod buffer;
pub mod cipher;
pub mod engine;
pub mod frame;
pub mod signal;
pub mod stats;

use crate::config::LinkConfig;
use crate::error::LinkError;
use crate::link::buffer::{RxPhase, TxPhase};
use crate::link::cipher::CipherKey;
use crate::link::engine::{LinkShared, PacketEngine};
use crate::link::frame::FrameFlags;
use crate::link::stats::{LinkStats, LinkStatsSnapshot};
use crate::radio::hal::{Strobe, Transceiver};
use crate::radio::irq::{irq_bridge, IrqPipeline, IrqWorker};
use crate::radio::registers::*;
use crate::util::lock;
use log::{debug, error, info, warn};
use std::sync::atomic::Ordering;
use std::sync::{Arc, Mutex};
use std::thread::{self, JoinHandle};
use std::time::{Duration, Instant};
use tokio::sync::mpsc::{unbounded_channel, UnboundedReceiver};

/// Notifications for the surrounding application
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LinkEvent {
    /// A frame was parsed and can be fetched with [`RadioLink::read`]
    MessageAvailable { source: u8, len: usize },
    /// The peer acknowledged a frame queued by `send()`
    ///
    /// Every data frame requests an ACK, so this always means acknowledged
    /// delivery, never just "on air".
    DataSent { destination: u8, sequence: u8 },
}

/// Outcome of [`RadioLink::try_send`]
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SendStatus {
    /// The frame occupies the TX slot and will be transmitted
    Queued { sequence: u8 },
    /// A frame was already in flight; nothing was queued
    DroppedBusy,
}

/// Handle to a running link
pub struct RadioLink<T: Transceiver + 'static> {
    shared: Arc<LinkShared<T>>,
    irq_thread: Option<JoinHandle<()>>,
    action_thread: Option<JoinHandle<()>>,
}

impl<T: Transceiver + 'static> RadioLink<T> {
    /// Configure the transceiver, start idle listening and spawn the IRQ and
    /// action threads
    pub fn init(
        mut transceiver: T,
        config: LinkConfig,
        key: impl Into<CipherKey>,
        local_address: u8,
    ) -> Result<(Self, UnboundedReceiver<LinkEvent>), LinkError> {
        config.validate()?;
        let key = key.into();
        let pipeline = Arc::new(IrqPipeline::new());

        transceiver.configure(&config.radio)?;
        transceiver.write_register(REG_LOCAL_ADDRESS, local_address)?;
        let filter = if config.radio.address_filtering {
            ADDRESS_FILTER_NODE_BROADCAST
        } else {
            ADDRESS_FILTER_OFF
        };
        transceiver.write_register(REG_ADDRESS_FILTER, filter)?;
        transceiver.write_cipher_key(key.as_bytes())?;
        drop(key);
        transceiver.register_irq_handler(irq_bridge(pipeline.clone()))?;
        transceiver.strobe(Strobe::FlushRx)?;
        transceiver.set_rx_timeout(None)?;
        transceiver.strobe(Strobe::Rx)?;

        let bus = Arc::new(Mutex::new(transceiver));
        let (sender, receiver) = unbounded_channel();
        let shared = Arc::new(LinkShared::new(
            bus.clone(),
            pipeline.clone(),
            config,
            local_address,
            sender,
        ));

        let worker = IrqWorker::new(bus, pipeline.clone());
        let irq_thread = thread::Builder::new()
            .name("subghz-irq".into())
            .spawn(move || worker.run())
            .map_err(|source| LinkError::ThreadSpawn {
                name: "subghz-irq",
                source,
            })?;

        let engine = PacketEngine::new(shared.clone());
        let action_thread = match thread::Builder::new()
            .name("subghz-action".into())
            .spawn(move || engine.run())
        {
            Ok(handle) => handle,
            Err(source) => {
                pipeline.terminate();
                if irq_thread.join().is_err() {
                    error!("IRQ thread panicked");
                }
                return Err(LinkError::ThreadSpawn {
                    name: "subghz-action",
                    source,
                });
            }
        };

        info!(
            "Radio link up: address 0x{local_address:02X}, {} Hz, max frame {} bytes",
            shared.config.radio.carrier_frequency_hz(),
            shared.config.max_frame_size
        );

        Ok((
            Self {
                shared,
                irq_thread: Some(irq_thread),
                action_thread: Some(action_thread),
            },
            receiver,
        ))
    }

    /// Queue `payload` for `destination`, fire-and-forget
    ///
    /// # Panics
    ///
    /// Panics when the payload plus header exceeds the maximum frame size.
    /// A request made while another frame is in flight is silently dropped.
    pub fn send(&self, destination: u8, payload: &[u8]) {
        let max = self.shared.config.max_payload();
        assert!(
            payload.len() <= max,
            "payload of {} bytes exceeds maximum of {max}",
            payload.len()
        );
        self.enqueue(destination, payload);
    }

    /// Like [`send`](Self::send), reporting the outcome instead of panicking
    /// or dropping silently
    pub fn try_send(&self, destination: u8, payload: &[u8]) -> Result<SendStatus, LinkError> {
        let max = self.shared.config.max_payload();
        if payload.len() > max {
            return Err(LinkError::PayloadTooLarge {
                len: payload.len(),
                max,
            });
        }
        Ok(self.enqueue(destination, payload))
    }

    fn enqueue(&self, destination: u8, payload: &[u8]) -> SendStatus {
        let shared = &*self.shared;
        let sequence = {
            let mut tx = lock(&shared.tx);
            if tx.is_busy() {
                LinkStats::bump(&shared.stats.sends_dropped_busy);
                warn!("TX slot busy, dropping {} byte frame to 0x{destination:02X}", payload.len());
                return SendStatus::DroppedBusy;
            }
            tx.fill(
                shared.config.marker,
                destination,
                FrameFlags::empty(),
                payload,
                shared.config.retry_budget,
            )
        };

        debug!("Queued seq={sequence} to 0x{destination:02X}");
        shared.pipeline.action_wake.post();
        SendStatus::Queued { sequence }
    }

    /// Copy the received payload into `buf` and free the RX slot
    ///
    /// Returns 0 when no parsed frame is waiting. A payload longer than `buf`
    /// is truncated.
    pub fn read(&self, source: &mut u8, buf: &mut [u8]) -> usize {
        let mut rx = lock(&self.shared.rx);
        if !rx.is_parsed() {
            return 0;
        }

        let payload = rx.payload();
        let n = payload.len().min(buf.len());
        buf[..n].copy_from_slice(&payload[..n]);
        *source = rx.source;
        rx.release();
        n
    }

    /// Link quality of the most recent valid reception
    pub fn lqi(&self) -> u8 {
        self.shared.last_lqi.load(Ordering::Relaxed)
    }

    /// Signal strength of the most recent valid reception
    pub fn rssi(&self) -> u8 {
        self.shared.last_rssi.load(Ordering::Relaxed)
    }

    pub fn stats(&self) -> LinkStatsSnapshot {
        self.shared.stats.snapshot()
    }

    pub fn tx_phase(&self) -> TxPhase {
        lock(&self.shared.tx).phase()
    }

    pub fn rx_phase(&self) -> RxPhase {
        lock(&self.shared.rx).phase()
    }

    pub fn local_address(&self) -> u8 {
        self.shared.local_address
    }

    pub fn config(&self) -> &LinkConfig {
        &self.shared.config
    }

    /// Stop both threads and power down the transceiver
    pub fn shutdown(mut self) -> Result<(), LinkError> {
        self.stop()
    }

    fn stop(&mut self) -> Result<(), LinkError> {
        info!("Shutting down radio link 0x{:02X}", self.shared.local_address);
        self.shared.pipeline.terminate();

        let timeout = self.shared.config.shutdown_timeout();
        let deadline = Instant::now() + timeout;
        let mut timed_out = false;

        for handle in [self.irq_thread.take(), self.action_thread.take()]
            .into_iter()
            .flatten()
        {
            while !handle.is_finished() && Instant::now() < deadline {
                thread::sleep(Duration::from_millis(1));
            }
            if !handle.is_finished() {
                let name = handle.thread().name().unwrap_or("worker").to_string();
                warn!("{name} thread still running after {timeout:?}, detaching");
                timed_out = true;
                continue;
            }
            if handle.join().is_err() {
                error!("Worker thread panicked");
            }
        }

        lock(&self.shared.bus).strobe(Strobe::Standby)?;

        if timed_out {
            return Err(LinkError::ShutdownTimeout(timeout));
        }
        Ok(())
    }
}

impl<T: Transceiver + 'static> Drop for RadioLink<T> {
    fn drop(&mut self) {
        if self.irq_thread.is_none() && self.action_thread.is_none() {
            return;
        }
        if let Err(e) = self.stop() {
            warn!("Radio link shutdown on drop failed: {e}");
        }
    }
}
