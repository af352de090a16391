//! Benchmarks for LengthPrefixedCodec.
//!
//! Measures encode/decode cost per frame and how the decoder behaves when
//! frames trickle in over several reads.
//!
//! Run benchmarks with:
//! ```sh
//! cargo bench --bench codec_bench
//! ```

use bytes::BytesMut;
use criterion::{BenchmarkId, Criterion, Throughput, criterion_group, criterion_main};
use devgate_protocol::{LengthPrefixedCodec, Message};
use std::hint::black_box;
use tokio_util::codec::{Decoder, Encoder};

fn heartbeat() -> Message {
    Message::new("meter-0001", 0, &b""[..])
}

fn telemetry(payload_size: usize) -> Message {
    Message::new("meter-0001", 7, vec![0xA5; payload_size])
}

fn encode_all(messages: &[Message]) -> BytesMut {
    let mut codec = LengthPrefixedCodec::new();
    let mut buffer = BytesMut::new();
    for msg in messages {
        codec.encode(msg.clone(), &mut buffer).unwrap();
    }
    buffer
}

fn bench_encode(c: &mut Criterion) {
    let mut group = c.benchmark_group("encode");
    group.throughput(Throughput::Elements(1));

    for (name, msg) in [("heartbeat", heartbeat()), ("telemetry_256", telemetry(256))] {
        group.bench_function(name, |b| {
            b.iter(|| {
                let mut codec = LengthPrefixedCodec::new();
                let mut buffer = BytesMut::new();
                codec.encode(black_box(msg.clone()), &mut buffer).unwrap();
                black_box(buffer);
            });
        });
    }

    group.finish();
}

fn bench_decode(c: &mut Criterion) {
    let mut group = c.benchmark_group("decode");
    group.throughput(Throughput::Elements(1));

    for (name, msg) in [("heartbeat", heartbeat()), ("telemetry_256", telemetry(256))] {
        let encoded = encode_all(&[msg]).freeze();

        group.bench_function(name, |b| {
            b.iter(|| {
                let mut codec = LengthPrefixedCodec::new();
                let mut buffer = BytesMut::from(&encoded[..]);
                black_box(codec.decode(&mut buffer).unwrap());
            });
        });
    }

    group.finish();
}

/// Back-to-back frames in one buffer, as after a busy socket read.
fn bench_decode_batch(c: &mut Criterion) {
    let mut group = c.benchmark_group("decode_batch");

    for batch_size in [10usize, 100, 1000] {
        group.throughput(Throughput::Elements(batch_size as u64));

        let messages: Vec<Message> = (0..batch_size).map(|_| telemetry(64)).collect();
        let encoded = encode_all(&messages).freeze();

        group.bench_with_input(BenchmarkId::from_parameter(batch_size), &batch_size, |b, _| {
            b.iter(|| {
                let mut codec = LengthPrefixedCodec::new();
                let mut buffer = BytesMut::from(&encoded[..]);
                let mut count = 0;

                while let Ok(Some(_)) = codec.decode(&mut buffer) {
                    count += 1;
                }

                black_box(count);
            });
        });
    }

    group.finish();
}

fn bench_payload_sizes(c: &mut Criterion) {
    let mut group = c.benchmark_group("payload_sizes");

    for payload_size in [16usize, 1024, 64 * 1024] {
        group.throughput(Throughput::Bytes(payload_size as u64));
        let msg = telemetry(payload_size);

        group.bench_with_input(
            BenchmarkId::from_parameter(payload_size),
            &payload_size,
            |b, _| {
                b.iter(|| {
                    let mut codec = LengthPrefixedCodec::new();
                    let mut buffer = BytesMut::new();
                    codec.encode(black_box(msg.clone()), &mut buffer).unwrap();
                    black_box(codec.decode(&mut buffer).unwrap());
                });
            },
        );
    }

    group.finish();
}

/// A single frame arriving in small chunks. The decoder keeps returning
/// `None` until the last chunk lands in the same accumulating buffer.
fn bench_decode_partial_streaming(c: &mut Criterion) {
    let mut group = c.benchmark_group("decode_partial_streaming");
    group.throughput(Throughput::Elements(1));

    let full_frame = encode_all(&[telemetry(256)]).freeze();

    for chunk_size in [8usize, 16, 32] {
        group.bench_with_input(
            BenchmarkId::from_parameter(format!("chunk_{chunk_size}_bytes")),
            &chunk_size,
            |b, &size| {
                b.iter(|| {
                    let mut codec = LengthPrefixedCodec::new();
                    let mut buffer = BytesMut::with_capacity(full_frame.len());
                    let mut result = None;

                    for chunk in full_frame.chunks(size) {
                        buffer.extend_from_slice(chunk);
                        if let Ok(Some(msg)) = codec.decode(&mut buffer) {
                            result = Some(msg);
                        }
                    }

                    black_box(result);
                });
            },
        );
    }

    group.finish();
}

criterion_group!(
    benches,
    bench_encode,
    bench_decode,
    bench_decode_batch,
    bench_payload_sizes,
    bench_decode_partial_streaming,
);

criterion_main!(benches);
