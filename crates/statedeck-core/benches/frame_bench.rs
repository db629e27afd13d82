//! Criterion benchmarks for the StateDeck frame codec.
//!
//! Broadcasts encode one frame per payload and the event loop decodes every
//! inbound byte, so both directions sit on the hot path.
//!
//! Run with:
//! ```bash
//! cargo bench --package statedeck-core --bench frame_bench
//! ```

use criterion::{black_box, criterion_group, criterion_main, BenchmarkId, Criterion};
use statedeck_core::protocol::frame::encode_masked_frame;
use statedeck_core::{accept_token, decode_frame, decode_frames, encode_frame, Opcode};

// ── Fixtures ──────────────────────────────────────────────────────────────────

/// Payload sizes covering each length encoding.
const SIZES: &[(&str, usize)] = &[
    ("inline_64", 64),
    ("len16_4k", 4 * 1024),
    ("len64_128k", 128 * 1024),
];

fn payload(len: usize) -> Vec<u8> {
    (0..len).map(|i| b'a' + (i % 26) as u8).collect()
}

// ── Benchmark groups ──────────────────────────────────────────────────────────

/// Benchmarks `encode_frame` (server → client, unmasked).
fn bench_encode(c: &mut Criterion) {
    let mut group = c.benchmark_group("encode_frame");
    for (name, len) in SIZES {
        let data = payload(*len);
        group.bench_with_input(BenchmarkId::new("text", name), &data, |b, data| {
            b.iter(|| encode_frame(black_box(Opcode::Text), black_box(data)))
        });
    }
    group.finish();
}

/// Benchmarks `decode_frame` on masked client frames, which includes unmasking.
fn bench_decode_masked(c: &mut Criterion) {
    let mut group = c.benchmark_group("decode_masked_frame");
    for (name, len) in SIZES {
        let bytes = encode_masked_frame(Opcode::Text, &payload(*len), [0x11, 0x22, 0x33, 0x44]);
        group.bench_with_input(BenchmarkId::new("text", name), &bytes, |b, bytes| {
            b.iter(|| decode_frame(black_box(bytes)).expect("decode must succeed"))
        });
    }
    group.finish();
}

/// Benchmarks draining a read buffer holding many small frames.
fn bench_decode_burst(c: &mut Criterion) {
    let mut bytes = Vec::new();
    for i in 0..32u8 {
        bytes.extend(encode_masked_frame(
            Opcode::Text,
            br#"{"messageType":"getPlugins"}"#,
            [i, i, i, i],
        ));
    }

    c.bench_function("decode_frames_burst_32", |b| {
        b.iter(|| decode_frames(black_box(&bytes)).expect("decode must succeed"))
    });
}

fn bench_accept_token(c: &mut Criterion) {
    c.bench_function("accept_token", |b| {
        b.iter(|| accept_token(black_box("dGhlIHNhbXBsZSBub25jZQ==")))
    });
}

criterion_group!(
    benches,
    bench_encode,
    bench_decode_masked,
    bench_decode_burst,
    bench_accept_token
);
criterion_main!(benches);
