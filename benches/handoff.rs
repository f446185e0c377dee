//! Frame buffer handoff benchmarks
//!
//! Measures the producer/consumer cost of the three-slot frame buffer, the
//! structure every inbound message passes through.

use criterion::{black_box, criterion_group, criterion_main, Criterion};
use openigtlink_connect::io::{FrameBuffer, RawFrame};
use openigtlink_connect::protocol::header::Timestamp;

fn frame(size: usize) -> RawFrame {
    RawFrame {
        type_name: "IMAGE".into(),
        timestamp: Timestamp::zero(),
        body: vec![0xAB; size],
    }
}

fn bench_push_pull(c: &mut Criterion) {
    let buffer = FrameBuffer::new();
    let payload = frame(4096);

    c.bench_function("frame_buffer_push_pull_4k", |b| {
        b.iter(|| {
            buffer.push_frame(payload.clone());
            black_box(buffer.pull_frame())
        });
    });
}

fn bench_index_bookkeeping(c: &mut Criterion) {
    let buffer = FrameBuffer::new();
    buffer.push_frame(frame(64));

    c.bench_function("frame_buffer_index_cycle", |b| {
        b.iter(|| {
            let slot = buffer.start_push();
            buffer.end_push(slot);
            let slot = buffer.start_pull().unwrap();
            black_box(slot);
            buffer.end_pull();
        });
    });
}

criterion_group!(benches, bench_push_pull, bench_index_bookkeeping);

criterion_main!(benches);
