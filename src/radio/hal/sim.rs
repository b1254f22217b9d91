//! Simulated transceiver for host testing
//!
//! An [`Ether`] is a shared radio medium. Every [`SimTransceiver`] attached to
//! it behaves like a half-duplex packet radio:
//!
//! - a `Tx` strobe occupies the air for the packet's airtime, then raises
//!   `TX_DONE` and delivers the packet to every other station whose state
//!   machine is in RX (stations in TX, READY or STANDBY miss it)
//! - a bounded `Rx` raises `RX_TIMEOUT` when nothing arrives in time
//! - the AES-128 block engine raises `CRYPTO_DONE` after each block
//! - RSSI and LQI are only readable in READY, like on real parts
//!
//! Fault injection: random loss, deterministic drops, raw frame injection,
//! failing FIFO reads and a stalled cipher engine.

use crate::config::RadioConfig;
use crate::constants::{BROADCAST_ADDRESS, DEFAULT_MAX_FRAME_SIZE};
use crate::radio::hal::{CipherOp, HalError, IrqHandler, MachineState, Strobe, Transceiver};
use crate::radio::irq::IrqFlags;
use crate::radio::registers::*;
use crate::util::lock;
use aes::cipher::{generic_array::GenericArray, BlockDecrypt, BlockEncrypt, KeyInit};
use aes::Aes128;
use log::{debug, trace};
use rand::rngs::StdRng;
use rand::{Rng, SeedableRng};
use std::sync::{Arc, Mutex};
use std::thread;
use std::time::Duration;

/// Bytes of preamble, sync word and CRC added around every packet on air
const FRAMING_OVERHEAD_BYTES: u64 = 8;

/// A packet as it went out over the air
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct AirPacket {
    pub source: u8,
    pub destination: u8,
    pub bytes: Vec<u8>,
}

struct EtherSettings {
    airtime: Option<Duration>,
    loss: f64,
    drop_next: usize,
    rng: StdRng,
}

struct EtherInner {
    stations: Mutex<Vec<Arc<Station>>>,
    settings: Mutex<EtherSettings>,
}

impl EtherInner {
    /// Decide once per transmission whether the air eats the packet
    fn lose_packet(&self) -> bool {
        let mut settings = lock(&self.settings);
        if settings.drop_next > 0 {
            settings.drop_next -= 1;
            return true;
        }
        let loss = settings.loss;
        loss > 0.0 && settings.rng.gen_bool(loss.min(1.0))
    }

    fn deliver(&self, from: Option<&Arc<Station>>, packet: &AirPacket) {
        if self.lose_packet() {
            debug!("Ether: packet from 0x{:02X} lost", packet.source);
            return;
        }

        let stations: Vec<Arc<Station>> = lock(&self.stations).clone();
        for station in stations {
            if from.is_some_and(|from| Arc::ptr_eq(from, &station)) {
                continue;
            }
            station.receive(packet);
        }
    }
}

/// Shared simulated radio medium
#[derive(Clone)]
pub struct Ether {
    inner: Arc<EtherInner>,
}

impl Default for Ether {
    fn default() -> Self {
        Self::new()
    }
}

impl Ether {
    pub fn new() -> Self {
        Self::with_seed(0x5EED)
    }

    /// Medium whose random loss sequence is reproducible from `seed`
    pub fn with_seed(seed: u64) -> Self {
        Self {
            inner: Arc::new(EtherInner {
                stations: Mutex::new(Vec::new()),
                settings: Mutex::new(EtherSettings {
                    airtime: None,
                    loss: 0.0,
                    drop_next: 0,
                    rng: StdRng::seed_from_u64(seed),
                }),
            }),
        }
    }

    /// Attach a station with the default FIFO capacity
    pub fn attach(&self, address: u8) -> SimTransceiver {
        self.attach_with_capacity(address, DEFAULT_MAX_FRAME_SIZE)
    }

    pub fn attach_with_capacity(&self, address: u8, fifo_capacity: usize) -> SimTransceiver {
        let station = Arc::new(Station::new(address, fifo_capacity));
        lock(&self.inner.stations).push(station.clone());
        SimTransceiver {
            ether: self.inner.clone(),
            station,
        }
    }

    /// Probability in `0.0..=1.0` that a transmission is lost
    pub fn set_loss(&self, probability: f64) {
        lock(&self.inner.settings).loss = probability.clamp(0.0, 1.0);
    }

    /// Lose the next `count` transmissions
    pub fn drop_next(&self, count: usize) {
        lock(&self.inner.settings).drop_next = count;
    }

    /// Fixed airtime for every packet; `None` derives it from the data rate
    pub fn set_airtime(&self, airtime: Option<Duration>) {
        lock(&self.inner.settings).airtime = airtime;
    }

    /// Put raw bytes on the air immediately, as if sent by `source`
    pub fn inject(&self, source: u8, destination: u8, bytes: &[u8]) {
        let packet = AirPacket {
            source,
            destination,
            bytes: bytes.to_vec(),
        };
        let stations: Vec<Arc<Station>> = lock(&self.inner.stations).clone();
        for station in stations {
            station.receive(&packet);
        }
    }
}

struct StationState {
    registers: [u8; 256],
    machine: MachineState,
    irq: IrqFlags,
    capacity: usize,
    tx_fifo: Vec<u8>,
    rx_fifo: Vec<u8>,
    rx_timeout: Option<Duration>,
    /// Bumped on every state change so stale RX timers do nothing
    rx_generation: u64,
    config: RadioConfig,
    cipher: Option<Aes128>,
    cipher_in: [u8; 16],
    cipher_out: [u8; 16],
    cipher_stalled: bool,
    fifo_fault: bool,
    rssi: u8,
    lqi: u8,
    transmitted: Vec<AirPacket>,
}

struct Station {
    state: Mutex<StationState>,
    handler: Mutex<Option<IrqHandler>>,
}

impl Station {
    fn new(address: u8, capacity: usize) -> Self {
        let mut registers = [0u8; 256];
        registers[REG_LOCAL_ADDRESS as usize] = address;
        Self {
            state: Mutex::new(StationState {
                registers,
                machine: MachineState::Standby,
                irq: IrqFlags::empty(),
                capacity,
                tx_fifo: Vec::new(),
                rx_fifo: Vec::new(),
                rx_timeout: None,
                rx_generation: 0,
                config: RadioConfig::default(),
                cipher: None,
                cipher_in: [0; 16],
                cipher_out: [0; 16],
                cipher_stalled: false,
                fifo_fault: false,
                rssi: 0x80,
                lqi: 0x7F,
                transmitted: Vec::new(),
            }),
            handler: Mutex::new(None),
        }
    }

    /// Assert the interrupt line
    fn fire(&self) {
        let handler = lock(&self.handler).clone();
        if let Some(handler) = handler {
            handler();
        }
    }

    fn raise(&self, flags: IrqFlags) {
        lock(&self.state).irq |= flags;
        self.fire();
    }

    fn receive(&self, packet: &AirPacket) {
        {
            let mut st = lock(&self.state);
            if st.machine != MachineState::Rx {
                trace!("Station 0x{:02X} not listening", st.registers[REG_LOCAL_ADDRESS as usize]);
                return;
            }

            let local = st.registers[REG_LOCAL_ADDRESS as usize];
            let filtering = st.registers[REG_ADDRESS_FILTER as usize] == ADDRESS_FILTER_NODE_BROADCAST;
            if filtering && packet.destination != local && packet.destination != BROADCAST_ADDRESS {
                return;
            }

            st.rx_fifo = packet.bytes.clone();
            st.registers[REG_RX_SOURCE_ADDRESS as usize] = packet.source;
            st.registers[REG_RSSI as usize] = st.rssi;
            st.registers[REG_LQI as usize] = st.lqi;
            st.machine = MachineState::Ready;
            st.rx_generation += 1;
            st.irq |= IrqFlags::RX_READY;
        }
        self.fire();
    }
}

/// Airtime of `len` bytes at the configured data rate
fn airtime_for(config: &RadioConfig, len: usize) -> Duration {
    let bits = (len as u64 + FRAMING_OVERHEAD_BYTES + config.preamble_len as u64) * 8;
    let rate = config.data_rate_bps.max(1) as u64;
    Duration::from_micros(bits * 1_000_000 / rate)
}

/// One station on an [`Ether`]
pub struct SimTransceiver {
    ether: Arc<EtherInner>,
    station: Arc<Station>,
}

impl SimTransceiver {
    /// Observation and fault-injection handle that outlives moving the
    /// transceiver into a link
    pub fn probe(&self) -> SimProbe {
        SimProbe {
            station: self.station.clone(),
        }
    }

    pub fn set_cipher_stalled(&self, stalled: bool) {
        self.probe().set_cipher_stalled(stalled);
    }

    fn start_tx(&mut self) -> Result<(), HalError> {
        let (packet, airtime, generation) = {
            let mut st = lock(&self.station.state);
            if st.tx_fifo.is_empty() {
                return Err(HalError::InvalidState(st.machine));
            }
            st.machine = MachineState::Tx;
            st.rx_generation += 1;
            let generation = st.rx_generation;

            let packet = AirPacket {
                source: st.registers[REG_LOCAL_ADDRESS as usize],
                destination: st.registers[REG_DESTINATION_ADDRESS as usize],
                bytes: st.tx_fifo.clone(),
            };
            st.transmitted.push(packet.clone());
            let airtime = lock(&self.ether.settings)
                .airtime
                .unwrap_or_else(|| airtime_for(&st.config, packet.bytes.len()));
            (packet, airtime, generation)
        };

        let ether = self.ether.clone();
        let station = self.station.clone();
        thread::spawn(move || {
            thread::sleep(airtime);
            {
                let mut st = lock(&station.state);
                // A strobe during the airtime aborted the transmission
                if st.rx_generation != generation {
                    return;
                }
                st.machine = MachineState::Ready;
                st.rx_generation += 1;
                st.irq |= IrqFlags::TX_DONE;
            }
            station.fire();
            ether.deliver(Some(&station), &packet);
        });
        Ok(())
    }

    fn start_rx(&mut self) {
        let (generation, timeout) = {
            let mut st = lock(&self.station.state);
            st.machine = MachineState::Rx;
            st.rx_generation += 1;
            (st.rx_generation, st.rx_timeout)
        };

        if let Some(timeout) = timeout {
            let station = self.station.clone();
            thread::spawn(move || {
                thread::sleep(timeout);
                let expired = {
                    let mut st = lock(&station.state);
                    if st.rx_generation == generation && st.machine == MachineState::Rx {
                        st.machine = MachineState::Ready;
                        st.rx_generation += 1;
                        st.irq |= IrqFlags::RX_TIMEOUT;
                        true
                    } else {
                        false
                    }
                };
                if expired {
                    station.fire();
                }
            });
        }
    }
}

impl Transceiver for SimTransceiver {
    fn configure(&mut self, config: &RadioConfig) -> Result<(), HalError> {
        if config.data_rate_bps == 0 {
            return Err(HalError::InvalidConfig("data rate must be non-zero".into()));
        }
        let mut st = lock(&self.station.state);
        st.config = config.clone();
        st.machine = MachineState::Ready;
        Ok(())
    }

    fn register_irq_handler(&mut self, handler: IrqHandler) -> Result<(), HalError> {
        *lock(&self.station.handler) = Some(handler);
        Ok(())
    }

    fn read_register(&mut self, addr: u8) -> Result<u8, HalError> {
        let st = lock(&self.station.state);
        if matches!(addr, REG_RSSI | REG_LQI) && st.machine != MachineState::Ready {
            return Err(HalError::InvalidState(st.machine));
        }
        Ok(st.registers[addr as usize])
    }

    fn write_register(&mut self, addr: u8, value: u8) -> Result<(), HalError> {
        if matches!(addr, REG_RX_SOURCE_ADDRESS | REG_RSSI | REG_LQI) {
            return Err(HalError::Register(addr));
        }
        lock(&self.station.state).registers[addr as usize] = value;
        Ok(())
    }

    fn read_fifo(&mut self, buf: &mut [u8]) -> Result<usize, HalError> {
        let st = lock(&self.station.state);
        if st.fifo_fault {
            return Err(HalError::Spi("RX FIFO read failed".into()));
        }
        let n = st.rx_fifo.len().min(buf.len());
        buf[..n].copy_from_slice(&st.rx_fifo[..n]);
        Ok(n)
    }

    fn write_fifo(&mut self, data: &[u8]) -> Result<(), HalError> {
        let mut st = lock(&self.station.state);
        if data.len() > st.capacity {
            return Err(HalError::FifoOverflow {
                len: data.len(),
                capacity: st.capacity,
            });
        }
        st.tx_fifo = data.to_vec();
        Ok(())
    }

    fn strobe(&mut self, strobe: Strobe) -> Result<(), HalError> {
        match strobe {
            Strobe::FlushTx => lock(&self.station.state).tx_fifo.clear(),
            Strobe::FlushRx => lock(&self.station.state).rx_fifo.clear(),
            Strobe::Ready | Strobe::Standby => {
                let mut st = lock(&self.station.state);
                st.machine = if strobe == Strobe::Ready {
                    MachineState::Ready
                } else {
                    MachineState::Standby
                };
                st.rx_generation += 1;
            }
            Strobe::Tx => self.start_tx()?,
            Strobe::Rx => self.start_rx(),
        }
        Ok(())
    }

    fn set_rx_timeout(&mut self, timeout: Option<Duration>) -> Result<(), HalError> {
        lock(&self.station.state).rx_timeout = timeout;
        Ok(())
    }

    fn machine_state(&mut self) -> Result<MachineState, HalError> {
        Ok(lock(&self.station.state).machine)
    }

    fn irq_flags(&mut self) -> Result<IrqFlags, HalError> {
        Ok(lock(&self.station.state).irq)
    }

    fn clear_irq_flags(&mut self, flags: IrqFlags) -> Result<(), HalError> {
        lock(&self.station.state).irq.remove(flags);
        Ok(())
    }

    fn write_cipher_key(&mut self, key: &[u8; 16]) -> Result<(), HalError> {
        lock(&self.station.state).cipher = Some(Aes128::new(GenericArray::from_slice(key)));
        Ok(())
    }

    fn write_cipher_block(&mut self, block: &[u8; 16]) -> Result<(), HalError> {
        lock(&self.station.state).cipher_in = *block;
        Ok(())
    }

    fn start_cipher(&mut self, op: CipherOp) -> Result<(), HalError> {
        {
            let mut st = lock(&self.station.state);
            let cipher = st
                .cipher
                .clone()
                .ok_or_else(|| HalError::InvalidConfig("cipher key not loaded".into()))?;

            let mut block = GenericArray::clone_from_slice(&st.cipher_in);
            match op {
                CipherOp::Encrypt => cipher.encrypt_block(&mut block),
                CipherOp::Decrypt => cipher.decrypt_block(&mut block),
            }
            st.cipher_out.copy_from_slice(block.as_slice());

            if st.cipher_stalled {
                return Ok(());
            }
        }
        self.station.raise(IrqFlags::CRYPTO_DONE);
        Ok(())
    }

    fn read_cipher_block(&mut self) -> Result<[u8; 16], HalError> {
        Ok(lock(&self.station.state).cipher_out)
    }
}

/// Observation and fault-injection handle for one simulated station
#[derive(Clone)]
pub struct SimProbe {
    station: Arc<Station>,
}

impl SimProbe {
    /// Number of transmissions started
    pub fn tx_count(&self) -> usize {
        lock(&self.station.state).transmitted.len()
    }

    /// Every packet this station put on the air
    pub fn transmitted(&self) -> Vec<AirPacket> {
        lock(&self.station.state).transmitted.clone()
    }

    pub fn machine_state(&self) -> MachineState {
        lock(&self.station.state).machine
    }

    /// Metrics reported for subsequent receptions
    pub fn set_link_quality(&self, rssi: u8, lqi: u8) {
        let mut st = lock(&self.station.state);
        st.rssi = rssi;
        st.lqi = lqi;
    }

    /// Withhold `CRYPTO_DONE` so cipher waits time out
    pub fn set_cipher_stalled(&self, stalled: bool) {
        lock(&self.station.state).cipher_stalled = stalled;
    }

    /// Fail every RX FIFO read
    pub fn set_fifo_fault(&self, fault: bool) {
        lock(&self.station.state).fifo_fault = fault;
    }

    pub fn rx_timeout(&self) -> Option<Duration> {
        lock(&self.station.state).rx_timeout
    }
}
