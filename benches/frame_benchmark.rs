use criterion::{black_box, criterion_group, criterion_main, Criterion};
use std::sync::{Arc, Mutex};
use std::thread;
use std::time::Duration;
use subghz_link::constants::DEFAULT_MARKER;
use subghz_link::link::buffer::TxBuffer;
use subghz_link::link::cipher::BlockCipher;
use subghz_link::link::frame::{FrameFlags, FrameHeader};
use subghz_link::radio::irq::{irq_bridge, IrqPipeline, IrqWorker};
use subghz_link::{Ether, Transceiver};

fn benchmark_header_codec(c: &mut Criterion) {
    let mut frame = [0u8; 96];
    FrameHeader::new(40, FrameFlags::RETRANSMIT, 0x7F).encode(DEFAULT_MARKER, &mut frame);

    c.bench_function("parse_header", |b| {
        b.iter(|| {
            let result = FrameHeader::parse(black_box(&frame), DEFAULT_MARKER);
            let _ = black_box(result);
        })
    });

    c.bench_function("fill_tx_buffer", |b| {
        let mut tx = TxBuffer::new(96);
        let payload = [0x5Au8; 91];
        b.iter(|| {
            tx.fill(DEFAULT_MARKER, 2, FrameFlags::empty(), black_box(&payload), 3);
            tx.release();
        })
    });
}

fn benchmark_cipher_step(c: &mut Criterion) {
    let ether = Ether::new();
    let mut radio = ether.attach(1);
    let pipeline = Arc::new(IrqPipeline::new());
    radio.register_irq_handler(irq_bridge(pipeline.clone())).unwrap();
    radio.write_cipher_key(&[0x2B; 16]).unwrap();
    let bus = Arc::new(Mutex::new(radio));
    let worker = IrqWorker::new(bus.clone(), pipeline.clone());
    let irq = thread::spawn(move || worker.run());

    let cipher = BlockCipher::new(&bus, &pipeline.crypto_done, Duration::from_millis(500));
    let payload = [0xC3u8; 91];
    c.bench_function("encrypt_full_frame", |b| {
        let mut tx = TxBuffer::new(96);
        b.iter(|| {
            tx.fill(DEFAULT_MARKER, 2, FrameFlags::empty(), &payload, 3);
            cipher.encrypt(black_box(&mut tx)).unwrap();
            tx.release();
        })
    });

    pipeline.terminate();
    irq.join().unwrap();
}

criterion_group!(benches, benchmark_header_codec, benchmark_cipher_step);
criterion_main!(benches);
