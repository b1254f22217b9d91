//! # Link-Layer Encryption Step
//!
//! Frames are sealed with the transceiver's AES-128 engine, one 16-byte block
//! at a time. Each block is loaded, the engine started, and the calling thread
//! blocks on the crypto completion signal (raised by the IRQ thread on
//! `CRYPTO_DONE`) for at most the configured crypto timeout.
//!
//! The transceiver lock is released while waiting: the IRQ thread needs it to
//! read the completion flag.
//!
//! Encryption pads the last partial block with zeros and grows the stored
//! frame length to the block boundary. Decryption leaves the stored length
//! alone; the header's length byte tells the parser where the payload ends.

use crate::error::LinkError;
use crate::link::buffer::{RxBuffer, RxState, TxBuffer, TxState};
use crate::link::frame::padded_len;
use crate::link::signal::{WaitStatus, WakeSignal};
use crate::radio::hal::{CipherOp, Transceiver};
use crate::util::lock;
use std::sync::Mutex;
use std::time::Duration;
use zeroize::{Zeroize, ZeroizeOnDrop};

/// 128-bit link key, wiped from memory on drop
#[derive(Clone, Zeroize, ZeroizeOnDrop)]
pub struct CipherKey([u8; 16]);

impl CipherKey {
    pub fn new(key: [u8; 16]) -> Self {
        Self(key)
    }

    /// Build a key from a slice; `None` unless exactly 16 bytes
    pub fn from_slice(bytes: &[u8]) -> Option<Self> {
        <[u8; 16]>::try_from(bytes).ok().map(Self)
    }

    pub fn as_bytes(&self) -> &[u8; 16] {
        &self.0
    }
}

impl From<[u8; 16]> for CipherKey {
    fn from(key: [u8; 16]) -> Self {
        Self(key)
    }
}

impl std::fmt::Debug for CipherKey {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str("CipherKey(..)")
    }
}

/// Drives the transceiver's block cipher
pub struct BlockCipher<'a, T: Transceiver> {
    bus: &'a Mutex<T>,
    done: &'a WakeSignal,
    timeout: Duration,
}

impl<'a, T: Transceiver> BlockCipher<'a, T> {
    pub fn new(bus: &'a Mutex<T>, done: &'a WakeSignal, timeout: Duration) -> Self {
        Self { bus, done, timeout }
    }

    /// Run `op` over `data` in place; `data.len()` must be block aligned
    pub fn process(&self, op: CipherOp, data: &mut [u8]) -> Result<(), LinkError> {
        for chunk in data.chunks_exact_mut(16) {
            let mut block = [0u8; 16];
            block.copy_from_slice(chunk);

            // A completion left over from a timed-out block must not satisfy this one
            self.done.clear();
            {
                let mut bus = lock(self.bus);
                bus.write_cipher_block(&block)?;
                bus.start_cipher(op)?;
            }

            match self.done.wait(Some(self.timeout)) {
                WaitStatus::Signalled => {}
                WaitStatus::TimedOut => return Err(LinkError::CryptoTimeout),
                WaitStatus::Cancelled => return Err(LinkError::Cancelled),
            }

            let result = lock(self.bus).read_cipher_block()?;
            chunk.copy_from_slice(&result);
            block.zeroize();
        }
        Ok(())
    }

    /// Seal the TX slot; on failure the slot keeps its plaintext
    pub fn encrypt(&self, tx: &mut TxBuffer) -> Result<(), LinkError> {
        let padded = padded_len(tx.len);
        let mut scratch = tx.data[..padded].to_vec();

        let result = self.process(CipherOp::Encrypt, &mut scratch);
        if result.is_ok() {
            tx.data[..padded].copy_from_slice(&scratch);
            tx.len = padded;
            tx.state |= TxState::ENCRYPTED;
        }
        scratch.zeroize();
        result
    }

    /// Open the RX slot in place
    pub fn decrypt(&self, rx: &mut RxBuffer) -> Result<(), LinkError> {
        let padded = padded_len(rx.len).min(rx.capacity());
        rx.data[rx.len..padded].fill(0);
        self.process(CipherOp::Decrypt, &mut rx.data[..padded])?;
        rx.state |= RxState::DECRYPTED;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::constants::DEFAULT_MARKER;
    use crate::link::frame::{FrameFlags, FrameHeader};
    use crate::radio::hal::sim::Ether;
    use crate::radio::irq::{irq_bridge, IrqPipeline, IrqWorker};
    use crate::radio::hal::Transceiver;
    use proptest::prelude::*;
    use std::sync::Arc;
    use std::thread;

    /// A simulated transceiver with a live IRQ thread feeding the crypto signal
    struct Rig {
        bus: Arc<Mutex<crate::radio::hal::sim::SimTransceiver>>,
        pipeline: Arc<IrqPipeline>,
        irq: Option<thread::JoinHandle<()>>,
    }

    impl Rig {
        fn new() -> Self {
            let ether = Ether::new();
            let mut radio = ether.attach(1);
            let pipeline = Arc::new(IrqPipeline::new());
            radio.register_irq_handler(irq_bridge(pipeline.clone())).unwrap();
            radio.write_cipher_key(&[0x2B; 16]).unwrap();
            let bus = Arc::new(Mutex::new(radio));
            let worker = IrqWorker::new(bus.clone(), pipeline.clone());
            let irq = Some(thread::spawn(move || worker.run()));
            Self { bus, pipeline, irq }
        }

        fn cipher(&self) -> BlockCipher<'_, crate::radio::hal::sim::SimTransceiver> {
            BlockCipher::new(&self.bus, &self.pipeline.crypto_done, Duration::from_millis(500))
        }
    }

    impl Drop for Rig {
        fn drop(&mut self) {
            self.pipeline.terminate();
            if let Some(handle) = self.irq.take() {
                handle.join().unwrap();
            }
        }
    }

    #[test]
    fn test_encrypt_pads_to_block_boundary() {
        let rig = Rig::new();
        let mut tx = TxBuffer::new(96);
        tx.fill(DEFAULT_MARKER, 2, FrameFlags::empty(), b"ping", 3);
        assert_eq!(tx.len, 9);

        rig.cipher().encrypt(&mut tx).unwrap();
        assert_eq!(tx.len, 16);
        assert!(tx.state.contains(TxState::ENCRYPTED));
        assert_ne!(&tx.data[..2], &DEFAULT_MARKER);
    }

    #[test]
    fn test_crypto_timeout_keeps_plaintext() {
        let rig = Rig::new();
        rig.bus.lock().unwrap().set_cipher_stalled(true);
        let mut tx = TxBuffer::new(96);
        tx.fill(DEFAULT_MARKER, 2, FrameFlags::empty(), b"ping", 3);
        let before = tx.frame().to_vec();

        let cipher = BlockCipher::new(&rig.bus, &rig.pipeline.crypto_done, Duration::from_millis(20));
        assert!(matches!(cipher.encrypt(&mut tx), Err(LinkError::CryptoTimeout)));
        assert_eq!(tx.frame(), before.as_slice());
        assert!(!tx.state.contains(TxState::ENCRYPTED));
    }

    proptest! {
        #![proptest_config(ProptestConfig::with_cases(16))]
        #[test]
        fn prop_decrypt_inverts_encrypt(payload in proptest::collection::vec(any::<u8>(), 0..=91)) {
            let rig = Rig::new();
            let mut tx = TxBuffer::new(96);
            tx.fill(DEFAULT_MARKER, 7, FrameFlags::empty(), &payload, 3);
            rig.cipher().encrypt(&mut tx).unwrap();

            let mut rx = RxBuffer::new(96);
            rx.begin(1, 0, 0);
            rx.data[..tx.len].copy_from_slice(tx.frame());
            rx.len = tx.len;
            rig.cipher().decrypt(&mut rx).unwrap();
            prop_assert_eq!(rx.len, tx.len);

            let header = FrameHeader::parse(rx.frame(), DEFAULT_MARKER).unwrap();
            rx.set_header(&header);
            prop_assert_eq!(rx.payload(), payload.as_slice());
        }
    }
}
