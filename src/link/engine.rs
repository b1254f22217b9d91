//! # Packet Engine
//!
//! The action thread owns every protocol decision. Each wake-up it takes the
//! pending-event word published by the IRQ thread and runs four steps in a
//! fixed order:
//!
//! 1. `TX_DONE`: re-arm reception, bounded by the ACK window when an ACK is
//!    outstanding, otherwise idle listening and the TX slot is freed
//! 2. `RX_READY`: pull the frame out of the FIFO, decrypt, parse, ACK
//! 3. `RX_TIMEOUT`: retransmit or give up
//! 4. TX check: seal and transmit a frame queued by `send()`
//!
//! Step 2 may free the TX slot (ACK match) before step 4 looks at it.
//!
//! Lock order is RX slot, then TX slot, then transceiver. The transceiver lock
//! is never held while waiting on a signal.

use crate::config::LinkConfig;
use crate::constants::READY_TIMEOUT_MS;
use crate::error::LinkError;
use crate::link::buffer::{RxBuffer, RxState, TxBuffer, TxState};
use crate::link::cipher::BlockCipher;
use crate::link::frame::{FrameFlags, FrameHeader};
use crate::link::signal::WaitStatus;
use crate::link::stats::LinkStats;
use crate::link::LinkEvent;
use crate::radio::hal::{HalError, MachineState, Strobe, Transceiver};
use crate::radio::irq::{IrqFlags, IrqPipeline};
use crate::radio::registers::*;
use crate::util::{lock, log_frame_hex, LogThrottle};
use log::{debug, info, trace, warn};
use std::sync::atomic::{AtomicU8, Ordering};
use std::sync::{Arc, Mutex};
use std::time::{Duration, Instant};
use tokio::sync::mpsc::UnboundedSender;

/// State shared by the public handle and both worker threads
pub struct LinkShared<T: Transceiver> {
    pub(crate) bus: Arc<Mutex<T>>,
    pub(crate) pipeline: Arc<IrqPipeline>,
    pub(crate) tx: Mutex<TxBuffer>,
    pub(crate) rx: Mutex<RxBuffer>,
    pub(crate) config: LinkConfig,
    pub(crate) stats: LinkStats,
    pub(crate) local_address: u8,
    /// Metrics of the last marker-validated reception
    pub(crate) last_rssi: AtomicU8,
    pub(crate) last_lqi: AtomicU8,
    pub(crate) events: UnboundedSender<LinkEvent>,
}

impl<T: Transceiver> LinkShared<T> {
    pub fn new(
        bus: Arc<Mutex<T>>,
        pipeline: Arc<IrqPipeline>,
        config: LinkConfig,
        local_address: u8,
        events: UnboundedSender<LinkEvent>,
    ) -> Self {
        Self {
            bus,
            pipeline,
            tx: Mutex::new(TxBuffer::new(config.max_frame_size)),
            rx: Mutex::new(RxBuffer::new(config.max_frame_size)),
            config,
            stats: LinkStats::default(),
            local_address,
            last_rssi: AtomicU8::new(0),
            last_lqi: AtomicU8::new(0),
            events,
        }
    }

    fn emit(&self, event: LinkEvent) {
        if let Err(e) = self.events.send(event) {
            trace!("Event receiver dropped, discarding {:?}", e.0);
        }
    }
}

/// Reception window for the current TX slot state
fn listen_window(tx: &TxBuffer, config: &LinkConfig) -> Option<Duration> {
    if tx.is_busy() && tx.state.contains(TxState::WAITING_ACK) {
        Some(config.ack_timeout())
    } else {
        None
    }
}

/// Put the transceiver in READY and wait for the state machine to settle
fn enter_ready<T: Transceiver>(bus: &mut T) -> Result<(), HalError> {
    bus.strobe(Strobe::Ready)?;
    let deadline = Instant::now() + Duration::from_millis(READY_TIMEOUT_MS);
    loop {
        if bus.machine_state()? == MachineState::Ready {
            return Ok(());
        }
        if Instant::now() >= deadline {
            return Err(HalError::Timeout("READY state".into()));
        }
        std::thread::yield_now();
    }
}

/// Action thread body
pub struct PacketEngine<T: Transceiver> {
    shared: Arc<LinkShared<T>>,
    throttle: LogThrottle,
}

impl<T: Transceiver> PacketEngine<T> {
    pub fn new(shared: Arc<LinkShared<T>>) -> Self {
        Self {
            shared,
            throttle: LogThrottle::new(60_000, 5),
        }
    }

    pub fn run(mut self) {
        info!("Action thread started");

        loop {
            let pipeline = &self.shared.pipeline;
            if pipeline.action_wake.wait(None) == WaitStatus::Cancelled || pipeline.is_terminating() {
                break;
            }

            let events = pipeline.take_pending();
            match self.cycle(events) {
                Ok(()) => {}
                Err(LinkError::Cancelled) => break,
                Err(e) => {
                    LinkStats::bump(&self.shared.stats.bus_errors);
                    crate::log_error_throttled!(self.throttle, "Action cycle failed: {e}");
                    self.recover();
                }
            }
        }

        info!("Action thread shutting down");
    }

    /// Run one wake cycle over `events`
    pub fn cycle(&mut self, events: IrqFlags) -> Result<(), LinkError> {
        if !events.is_empty() {
            trace!("Action cycle: {events:?}");
        }
        if events.tx_done() {
            self.on_tx_done()?;
        }
        if events.rx_ready() {
            self.on_rx_ready()?;
        }
        if events.rx_timeout() {
            self.on_rx_timeout()?;
        }
        self.check_tx()
    }

    fn cipher(&self) -> BlockCipher<'_, T> {
        BlockCipher::new(
            &self.shared.bus,
            &self.shared.pipeline.crypto_done,
            self.shared.config.crypto_timeout(),
        )
    }

    fn listen(&self, timeout: Option<Duration>) -> Result<(), LinkError> {
        let mut bus = lock(&self.shared.bus);
        bus.set_rx_timeout(timeout)?;
        bus.strobe(Strobe::Rx)?;
        Ok(())
    }

    /// Re-arm reception for the current TX slot state; takes the TX lock
    fn resume_listening(&self) -> Result<(), LinkError> {
        let window = listen_window(&lock(&self.shared.tx), &self.shared.config);
        self.listen(window)
    }

    /// Bring the radio back to a listening state after a failed cycle
    fn recover(&mut self) {
        if let Err(e) = self.resume_listening() {
            crate::log_error_throttled!(self.throttle, "Failed to resume listening: {e}");
        }
    }

    fn transmit(&self, tx: &TxBuffer) -> Result<(), LinkError> {
        log_frame_hex("TX", tx.frame());
        let mut bus = lock(&self.shared.bus);
        enter_ready(&mut *bus)?;
        bus.write_register(REG_DESTINATION_ADDRESS, tx.destination)?;
        bus.strobe(Strobe::FlushTx)?;
        bus.write_fifo(tx.frame())?;
        bus.strobe(Strobe::Tx)?;
        Ok(())
    }

    fn on_tx_done(&self) -> Result<(), LinkError> {
        let mut tx = lock(&self.shared.tx);
        assert!(tx.is_busy(), "TX_DONE with no frame in flight");

        if tx.state.contains(TxState::WAITING_ACK) {
            debug!("Frame seq={} on air, waiting for ACK", tx.sequence);
            self.listen(Some(self.shared.config.ack_timeout()))
        } else {
            tx.release();
            self.listen(None)
        }
    }

    fn on_rx_ready(&self) -> Result<(), LinkError> {
        let shared = &*self.shared;
        let mut rx = lock(&shared.rx);

        {
            let mut bus = lock(&shared.bus);
            enter_ready(&mut *bus)?;
            let source = bus.read_register(REG_RX_SOURCE_ADDRESS)?;
            let rssi = bus.read_register(REG_RSSI)?;
            let lqi = bus.read_register(REG_LQI)?;

            if rx.begin(source, rssi, lqi) {
                LinkStats::bump(&shared.stats.rx_overwrites);
                debug!("Unread frame overwritten by reception from 0x{source:02X}");
            }
            let read = bus
                .read_fifo(&mut rx.data)
                .and_then(|n| bus.strobe(Strobe::FlushRx).map(|()| n));
            match read {
                Ok(n) => rx.len = n,
                Err(e) => {
                    rx.release();
                    return Err(e.into());
                }
            }
        }

        if rx.len == 0 {
            rx.release();
            drop(rx);
            return self.resume_listening();
        }

        log_frame_hex("RX", rx.frame());
        match self.cipher().decrypt(&mut rx) {
            Ok(()) => {}
            Err(LinkError::CryptoTimeout) => {
                LinkStats::bump(&shared.stats.crypto_timeouts);
                warn!("Decryption timed out, discarding frame from 0x{:02X}", rx.source);
                rx.release();
                drop(rx);
                return self.resume_listening();
            }
            Err(e) => {
                rx.release();
                return Err(e);
            }
        }

        self.parse(&mut rx)
    }

    /// Validate the decrypted frame and act on it; runs under the RX lock
    fn parse(&self, rx: &mut RxBuffer) -> Result<(), LinkError> {
        let shared = &*self.shared;

        let header = match FrameHeader::parse(rx.frame(), shared.config.marker) {
            Ok(header) => header,
            Err(e) => {
                LinkStats::bump(&shared.stats.frames_discarded);
                debug!("Discarding frame from 0x{:02X}: {e}", rx.source);
                rx.release();
                return self.resume_listening();
            }
        };

        rx.set_header(&header);
        rx.state |= RxState::PARSED;
        shared.last_rssi.store(rx.rssi, Ordering::Relaxed);
        shared.last_lqi.store(rx.lqi, Ordering::Relaxed);

        if header.is_ack() {
            let acked = rx.payload().first().copied();
            rx.release();
            return self.on_ack(acked);
        }

        if header.payload_len() == 0 {
            rx.release();
            return self.resume_listening();
        }

        LinkStats::bump(&shared.stats.frames_received);
        debug!(
            "Frame seq={} from 0x{:02X}, {} bytes",
            rx.sequence,
            rx.source,
            rx.payload_len
        );
        shared.emit(LinkEvent::MessageAvailable {
            source: rx.source,
            len: rx.payload_len,
        });

        if !self.send_ack(rx.source, rx.sequence)? {
            self.resume_listening()?;
        }
        Ok(())
    }

    fn on_ack(&self, acked: Option<u8>) -> Result<(), LinkError> {
        let shared = &*self.shared;
        let mut tx = lock(&shared.tx);

        let matches = tx.is_busy()
            && tx.state.contains(TxState::WAITING_ACK)
            && acked == Some(tx.sequence);
        if !matches {
            debug!("Ignoring ACK for {acked:?}");
            let window = listen_window(&tx, &shared.config);
            return self.listen(window);
        }

        LinkStats::bump(&shared.stats.acks_received);
        debug!("ACK for seq={} from 0x{:02X}", tx.sequence, tx.destination);
        let event = LinkEvent::DataSent {
            destination: tx.destination,
            sequence: tx.sequence,
        };
        tx.release();
        shared.emit(event);
        self.listen(None)
    }

    /// Seal and transmit an ACK for `sequence`; `false` when none was sent
    fn send_ack(&self, destination: u8, sequence: u8) -> Result<bool, LinkError> {
        let shared = &*self.shared;
        let mut tx = lock(&shared.tx);

        if tx.is_busy() {
            LinkStats::bump(&shared.stats.acks_dropped_busy);
            debug!("TX slot busy, not acknowledging seq={sequence} from 0x{destination:02X}");
            return Ok(false);
        }

        tx.fill(shared.config.marker, destination, FrameFlags::ACK, &[sequence], 0);
        match self.cipher().encrypt(&mut tx) {
            Ok(()) => {}
            Err(LinkError::CryptoTimeout) => {
                LinkStats::bump(&shared.stats.crypto_timeouts);
                warn!("Encryption of ACK for seq={sequence} timed out");
                tx.release();
                return Ok(false);
            }
            Err(e) => {
                tx.release();
                return Err(e);
            }
        }

        if let Err(e) = self.transmit(&tx) {
            tx.release();
            return Err(e);
        }
        LinkStats::bump(&shared.stats.acks_sent);
        Ok(true)
    }

    fn on_rx_timeout(&self) -> Result<(), LinkError> {
        let shared = &*self.shared;
        lock(&shared.bus).strobe(Strobe::FlushRx)?;

        let mut tx = lock(&shared.tx);
        if !tx.is_busy() {
            return self.listen(None);
        }
        if !tx.state.contains(TxState::WAITING_ACK) {
            // Step 4 or TX_DONE takes it from here
            return Ok(());
        }

        if tx.retries == 0 {
            LinkStats::bump(&shared.stats.retries_exhausted);
            warn!(
                "No ACK for seq={} to 0x{:02X}, dropping frame",
                tx.sequence, tx.destination
            );
            tx.release();
            return self.listen(None);
        }

        tx.retries -= 1;
        LinkStats::bump(&shared.stats.retransmissions);
        debug!(
            "Retransmitting seq={} ({} retries left)",
            tx.sequence, tx.retries
        );
        self.transmit(&tx)
    }

    fn check_tx(&self) -> Result<(), LinkError> {
        let shared = &*self.shared;
        let mut tx = lock(&shared.tx);
        if !tx.is_busy() || tx.state.contains(TxState::ENCRYPTED) {
            return Ok(());
        }

        match self.cipher().encrypt(&mut tx) {
            Ok(()) => {}
            Err(LinkError::CryptoTimeout) => {
                LinkStats::bump(&shared.stats.crypto_timeouts);
                if tx.retries == 0 {
                    LinkStats::bump(&shared.stats.retries_exhausted);
                    warn!("Encryption of seq={} timed out, dropping frame", tx.sequence);
                    tx.release();
                } else {
                    tx.retries -= 1;
                    warn!("Encryption of seq={} timed out, retrying", tx.sequence);
                    shared.pipeline.action_wake.post();
                }
                return Ok(());
            }
            Err(e) => return Err(e),
        }

        if !tx.flags.contains(FrameFlags::ACK) {
            tx.state |= TxState::WAITING_ACK;
        }
        debug!(
            "Sending seq={} to 0x{:02X}, {} bytes on air",
            tx.sequence, tx.destination, tx.len
        );
        self.transmit(&tx)?;
        LinkStats::bump(&shared.stats.frames_sent);
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::constants::DEFAULT_MARKER;
    use crate::link::buffer::{RxPhase, TxPhase};
    use crate::radio::hal::sim::{Ether, SimProbe, SimTransceiver};
    use crate::radio::irq::{irq_bridge, IrqWorker};
    use std::thread;
    use tokio::sync::mpsc::{unbounded_channel, UnboundedReceiver};

    /// One engine driven by hand, with a live IRQ thread for cipher completions
    struct Harness {
        ether: Ether,
        probe: SimProbe,
        engine: PacketEngine<SimTransceiver>,
        events: UnboundedReceiver<LinkEvent>,
        irq: Option<thread::JoinHandle<()>>,
    }

    impl Harness {
        fn new() -> Self {
            let ether = Ether::new();
            ether.set_airtime(Some(Duration::from_millis(1)));
            let mut radio = ether.attach(1);
            let probe = radio.probe();
            let pipeline = Arc::new(IrqPipeline::new());
            radio.register_irq_handler(irq_bridge(pipeline.clone())).unwrap();
            radio.write_cipher_key(&[0x11; 16]).unwrap();

            let bus = Arc::new(Mutex::new(radio));
            let (sender, events) = unbounded_channel();
            let config = LinkConfig {
                ack_timeout_ms: 500,
                ..LinkConfig::default()
            };
            let shared = Arc::new(LinkShared::new(bus.clone(), pipeline.clone(), config, 1, sender));
            let worker = IrqWorker::new(bus, pipeline);
            let irq = Some(thread::spawn(move || worker.run()));

            Self {
                ether,
                probe,
                engine: PacketEngine::new(shared),
                events,
                irq,
            }
        }

        fn shared(&self) -> &LinkShared<SimTransceiver> {
            &self.engine.shared
        }

        fn queue(&self, payload: &[u8]) {
            lock(&self.shared().tx).fill(DEFAULT_MARKER, 2, FrameFlags::empty(), payload, 2);
        }

        /// Seal a frame with the harness key as a peer would
        fn sealed(&self, flags: FrameFlags, sequence: u8, payload: &[u8]) -> Vec<u8> {
            let mut tx = TxBuffer::new(96);
            tx.sequence = sequence.wrapping_sub(1);
            tx.fill(DEFAULT_MARKER, 1, flags, payload, 0);
            self.engine.cipher().encrypt(&mut tx).unwrap();
            tx.frame().to_vec()
        }

        /// Wait for the IRQ thread to publish `flags`
        fn wait_events(&self, flags: IrqFlags) -> IrqFlags {
            let mut seen = IrqFlags::empty();
            for _ in 0..200 {
                seen |= self.shared().pipeline.take_pending();
                if seen.contains(flags) {
                    break;
                }
                thread::sleep(Duration::from_millis(5));
            }
            seen
        }
    }

    impl Drop for Harness {
        fn drop(&mut self) {
            self.engine.shared.pipeline.terminate();
            if let Some(handle) = self.irq.take() {
                handle.join().unwrap();
            }
        }
    }

    #[test]
    fn test_check_tx_seals_and_transmits() {
        let mut h = Harness::new();
        h.queue(b"hello");
        h.engine.cycle(IrqFlags::empty()).unwrap();

        assert_eq!(lock(&h.shared().tx).phase(), TxPhase::WaitingAck);
        let sent = h.probe.transmitted();
        assert_eq!(sent.len(), 1);
        assert_eq!(sent[0].destination, 2);
        assert_eq!(sent[0].bytes.len(), 16);
        assert_ne!(&sent[0].bytes[..2], &DEFAULT_MARKER);

        let events = h.wait_events(IrqFlags::TX_DONE);
        h.engine.cycle(events).unwrap();
        assert_eq!(h.probe.machine_state(), MachineState::Rx);
        assert_eq!(h.probe.rx_timeout(), Some(Duration::from_millis(500)));
    }

    #[test]
    fn test_retry_budget_then_drop() {
        let mut h = Harness::new();
        h.queue(b"x");
        h.engine.cycle(IrqFlags::empty()).unwrap();

        for _ in 0..2 {
            h.engine.cycle(IrqFlags::RX_TIMEOUT).unwrap();
        }
        assert_eq!(h.probe.tx_count(), 3);
        assert_eq!(lock(&h.shared().tx).retries, 0);

        h.engine.cycle(IrqFlags::RX_TIMEOUT).unwrap();
        assert_eq!(lock(&h.shared().tx).phase(), TxPhase::Free);
        assert_eq!(h.probe.tx_count(), 3);
        assert_eq!(h.probe.rx_timeout(), None);

        let stats = h.shared().stats.snapshot();
        assert_eq!(stats.retransmissions, 2);
        assert_eq!(stats.retries_exhausted, 1);
    }

    #[test]
    fn test_matching_ack_frees_tx_and_emits_data_sent() {
        let mut h = Harness::new();
        h.queue(b"ping");
        h.engine.cycle(IrqFlags::empty()).unwrap();
        let sequence = lock(&h.shared().tx).sequence;
        let events = h.wait_events(IrqFlags::TX_DONE);
        h.engine.cycle(events).unwrap();

        let ack = h.sealed(FrameFlags::ACK, 9, &[sequence]);
        h.ether.inject(2, 1, &ack);
        let events = h.wait_events(IrqFlags::RX_READY);
        h.engine.cycle(events).unwrap();

        assert_eq!(lock(&h.shared().tx).phase(), TxPhase::Free);
        assert_eq!(lock(&h.shared().rx).phase(), RxPhase::Free);
        assert_eq!(
            h.events.try_recv().unwrap(),
            LinkEvent::DataSent {
                destination: 2,
                sequence
            }
        );
    }

    #[test]
    fn test_stale_ack_keeps_waiting() {
        let mut h = Harness::new();
        h.queue(b"ping");
        h.engine.cycle(IrqFlags::empty()).unwrap();
        let sequence = lock(&h.shared().tx).sequence;
        let events = h.wait_events(IrqFlags::TX_DONE);
        h.engine.cycle(events).unwrap();

        let ack = h.sealed(FrameFlags::ACK, 9, &[sequence.wrapping_add(5)]);
        h.ether.inject(2, 1, &ack);
        let events = h.wait_events(IrqFlags::RX_READY);
        h.engine.cycle(events).unwrap();

        assert_eq!(lock(&h.shared().tx).phase(), TxPhase::WaitingAck);
        assert!(h.events.try_recv().is_err());
        assert_eq!(h.probe.machine_state(), MachineState::Rx);
    }

    #[test]
    fn test_data_frame_is_parsed_and_acknowledged() {
        let mut h = Harness::new();
        h.engine.listen(None).unwrap();
        h.probe.set_link_quality(0x9C, 0x42);

        let frame = h.sealed(FrameFlags::empty(), 0x31, b"telemetry");
        h.ether.inject(2, 1, &frame);
        let events = h.wait_events(IrqFlags::RX_READY);
        h.engine.cycle(events).unwrap();

        {
            let rx = lock(&h.shared().rx);
            assert_eq!(rx.phase(), RxPhase::Parsed);
            assert_eq!(rx.payload(), b"telemetry");
            assert_eq!(rx.source, 2);
        }
        assert_eq!(h.shared().last_rssi.load(Ordering::Relaxed), 0x9C);
        assert_eq!(h.shared().last_lqi.load(Ordering::Relaxed), 0x42);
        assert_eq!(
            h.events.try_recv().unwrap(),
            LinkEvent::MessageAvailable { source: 2, len: 9 }
        );

        let sent = h.probe.transmitted();
        assert_eq!(sent.len(), 1);
        assert_eq!(sent[0].destination, 2);
        assert_eq!(lock(&h.shared().tx).phase(), TxPhase::Transmitting);

        // The ACK frees the slot once it is on air
        let events = h.wait_events(IrqFlags::TX_DONE);
        h.engine.cycle(events).unwrap();
        assert_eq!(lock(&h.shared().tx).phase(), TxPhase::Free);
        assert_eq!(h.shared().stats.snapshot().acks_sent, 1);
    }

    #[test]
    fn test_foreign_marker_is_discarded_without_ack() {
        let mut h = Harness::new();
        h.engine.listen(None).unwrap();
        h.probe.set_link_quality(0x10, 0x20);

        h.ether.inject(2, 1, &[0x00; 16]);
        let events = h.wait_events(IrqFlags::RX_READY);
        h.engine.cycle(events).unwrap();

        assert_eq!(lock(&h.shared().rx).phase(), RxPhase::Free);
        assert!(h.probe.transmitted().is_empty());
        assert!(h.events.try_recv().is_err());
        assert_eq!(h.shared().last_rssi.load(Ordering::Relaxed), 0);
        assert_eq!(h.shared().stats.snapshot().frames_discarded, 1);
        assert_eq!(h.probe.machine_state(), MachineState::Rx);
    }

    #[test]
    fn test_busy_tx_drops_ack() {
        let mut h = Harness::new();
        h.queue(b"mine");
        h.engine.cycle(IrqFlags::empty()).unwrap();
        let events = h.wait_events(IrqFlags::TX_DONE);
        h.engine.cycle(events).unwrap();

        let frame = h.sealed(FrameFlags::empty(), 3, b"theirs");
        h.ether.inject(2, 1, &frame);
        let events = h.wait_events(IrqFlags::RX_READY);
        h.engine.cycle(events).unwrap();

        assert_eq!(h.probe.tx_count(), 1);
        assert_eq!(h.shared().stats.snapshot().acks_dropped_busy, 1);
        assert_eq!(lock(&h.shared().rx).phase(), RxPhase::Parsed);
    }

    #[test]
    fn test_encrypt_timeout_consumes_retry_budget() {
        let mut h = Harness::new();
        h.probe.set_cipher_stalled(true);
        h.queue(b"stuck");

        h.engine.cycle(IrqFlags::empty()).unwrap();
        assert_eq!(lock(&h.shared().tx).retries, 1);
        assert_eq!(lock(&h.shared().tx).phase(), TxPhase::PendingEncrypt);

        h.engine.cycle(IrqFlags::empty()).unwrap();
        h.engine.cycle(IrqFlags::empty()).unwrap();
        assert_eq!(lock(&h.shared().tx).phase(), TxPhase::Free);
        assert!(h.probe.transmitted().is_empty());

        let stats = h.shared().stats.snapshot();
        assert_eq!(stats.crypto_timeouts, 3);
        assert_eq!(stats.retries_exhausted, 1);
    }

    #[test]
    fn test_ack_in_same_cycle_as_timeout_prevents_retransmission() {
        let mut h = Harness::new();
        h.queue(b"ping");
        h.engine.cycle(IrqFlags::empty()).unwrap();
        let sequence = lock(&h.shared().tx).sequence;
        let events = h.wait_events(IrqFlags::TX_DONE);
        h.engine.cycle(events).unwrap();

        let ack = h.sealed(FrameFlags::ACK, 9, &[sequence]);
        h.ether.inject(2, 1, &ack);
        let events = h.wait_events(IrqFlags::RX_READY);
        h.engine.cycle(events | IrqFlags::RX_TIMEOUT).unwrap();

        assert_eq!(h.probe.tx_count(), 1);
        assert_eq!(lock(&h.shared().tx).phase(), TxPhase::Free);
        assert_eq!(
            h.events.try_recv().unwrap(),
            LinkEvent::DataSent {
                destination: 2,
                sequence
            }
        );
        assert!(h.events.try_recv().is_err());
        assert_eq!(h.shared().stats.snapshot().retransmissions, 0);
    }

    #[test]
    fn test_oversized_reception_truncated_to_capacity() {
        let mut h = Harness::new();
        h.engine.listen(None).unwrap();

        let mut bytes = h.sealed(FrameFlags::empty(), 4, b"big");
        bytes.extend(std::iter::repeat(0xEE).take(200));
        h.ether.inject(2, 1, &bytes);
        let events = h.wait_events(IrqFlags::RX_READY);
        h.engine.cycle(events).unwrap();

        let rx = lock(&h.shared().rx);
        assert_eq!(rx.len, rx.capacity());
        assert_eq!(rx.phase(), RxPhase::Parsed);
        assert_eq!(rx.payload(), b"big");
    }

    #[test]
    fn test_decrypt_timeout_discards_frame() {
        let mut h = Harness::new();
        h.engine.listen(None).unwrap();
        let frame = h.sealed(FrameFlags::empty(), 6, b"late");
        h.probe.set_cipher_stalled(true);

        h.ether.inject(2, 1, &frame);
        let events = h.wait_events(IrqFlags::RX_READY);
        h.engine.cycle(events).unwrap();

        assert_eq!(lock(&h.shared().rx).phase(), RxPhase::Free);
        assert!(h.events.try_recv().is_err());
        assert!(h.probe.transmitted().is_empty());
        assert_eq!(h.shared().stats.snapshot().crypto_timeouts, 1);
        assert_eq!(h.probe.machine_state(), MachineState::Rx);
    }

    #[test]
    fn test_fifo_read_failure_releases_rx_slot() {
        let mut h = Harness::new();
        h.engine.listen(None).unwrap();
        let frame = h.sealed(FrameFlags::empty(), 2, b"lost");
        h.probe.set_fifo_fault(true);

        h.ether.inject(2, 1, &frame);
        let events = h.wait_events(IrqFlags::RX_READY);
        assert!(matches!(h.engine.cycle(events), Err(LinkError::Hal(_))));
        assert_eq!(lock(&h.shared().rx).phase(), RxPhase::Free);

        h.probe.set_fifo_fault(false);
        h.engine.recover();
        assert_eq!(h.probe.machine_state(), MachineState::Rx);
    }

    #[test]
    #[should_panic(expected = "TX_DONE with no frame in flight")]
    fn test_tx_done_without_frame_panics() {
        let mut h = Harness::new();
        let _ = h.engine.cycle(IrqFlags::TX_DONE);
    }
}
