use criterion::{criterion_group, criterion_main, Criterion};
use std::hint::black_box;

use quill_collab::codec::{self, WireBytes};
use quill_collab::protocol::ClientFrame;

fn bench_encode_1kb(c: &mut Criterion) {
    let payload: Vec<u8> = (0..1024u32).map(|i| (i % 251) as u8).collect();

    c.bench_function("codec_encode_1KB", |b| {
        b.iter(|| {
            black_box(codec::encode(black_box(&payload)));
        })
    });
}

fn bench_decode_1kb(c: &mut Criterion) {
    let payload: Vec<u8> = (0..1024u32).map(|i| (i % 251) as u8).collect();
    let encoded = codec::encode(&payload);

    c.bench_function("codec_decode_1KB", |b| {
        b.iter(|| {
            black_box(codec::decode(black_box(&encoded)).unwrap());
        })
    });
}

fn bench_wire_bytes_from_int_array(c: &mut Criterion) {
    // The legacy payload shape: a JSON array of byte values.
    let payload: Vec<u8> = (0..1024u32).map(|i| (i % 251) as u8).collect();
    let json = serde_json::to_string(&payload).unwrap();

    c.bench_function("wire_bytes_parse_int_array_1KB", |b| {
        b.iter(|| {
            let bytes: WireBytes = serde_json::from_str(black_box(&json)).unwrap();
            black_box(bytes);
        })
    });
}

fn bench_wire_bytes_from_base64(c: &mut Criterion) {
    let payload: Vec<u8> = (0..1024u32).map(|i| (i % 251) as u8).collect();
    let json = format!("\"{}\"", codec::encode(&payload));

    c.bench_function("wire_bytes_parse_base64_1KB", |b| {
        b.iter(|| {
            let bytes: WireBytes = serde_json::from_str(black_box(&json)).unwrap();
            black_box(bytes);
        })
    });
}

fn bench_update_frame_encode(c: &mut Criterion) {
    let payload = vec![42u8; 256]; // Typical incremental update

    c.bench_function("update_frame_encode_256B", |b| {
        b.iter(|| {
            let frame = ClientFrame::update(black_box(7), black_box(payload.clone()));
            black_box(frame.encode().unwrap());
        })
    });
}

criterion_group!(
    benches,
    bench_encode_1kb,
    bench_decode_1kb,
    bench_wire_bytes_from_int_array,
    bench_wire_bytes_from_base64,
    bench_update_frame_encode,
);
criterion_main!(benches);
