//! # Wire Codec Benchmark
//!
//! Every heartbeat encodes one SYNC per peer and every reconciliation ask is
//! answered with a 44-byte record, so these two paths dominate traffic:
//! 1. SYNC encode / decode for small and promoted blame vectors
//! 2. ENTITY/RESPONSE encode / decode
//! 3. GREET / NEIGHBORS text parsing
//!
//! Run with: `cargo bench --package meshsync_networking`

#![allow(missing_docs)]

use criterion::{black_box, criterion_group, criterion_main, BenchmarkId, Criterion};
use meshsync_core::EntityRecord;
use meshsync_networking::{ControlMessage, Frame, Message, PeerId, SyncSummary};

fn bench_sync(c: &mut Criterion) {
    let mut group = c.benchmark_group("sync_frame");

    for peers in [3usize, 16, 90] {
        let blames: Vec<u8> = (0..peers).map(|i| u8::from(i % 3 == 0)).collect();
        let summary = SyncSummary {
            allocated: 120,
            guids: 130,
            blames: &blames,
        };

        group.bench_with_input(BenchmarkId::new("encode", peers), &summary, |b, summary| {
            b.iter(|| {
                let frame = Message::Sync(black_box(*summary)).encode(7, 42);
                black_box(frame.map(|f| f.len()))
            });
        });

        let Ok(frame) = Message::Sync(summary).encode(7, 42) else {
            continue;
        };
        let bytes = frame.as_bytes().to_vec();
        group.bench_with_input(BenchmarkId::new("decode", peers), &bytes, |b, bytes| {
            b.iter(|| {
                let Ok(frame) = Frame::decode(black_box(bytes)) else {
                    return 0;
                };
                match Message::decode(&frame) {
                    Ok(Message::Sync(summary)) => summary.blames.len(),
                    _ => 0,
                }
            });
        });
    }

    group.finish();
}

fn bench_response(c: &mut Criterion) {
    let mut group = c.benchmark_group("entity_response");
    let mut record = EntityRecord::new(77, 12);
    record.position_a = [1.0, 2.0, 3.0, 4.0];

    group.bench_function("encode", |b| {
        b.iter(|| {
            let response = Message::EntityResponse {
                index: 12,
                nonce: black_box(9),
                record: Some(&record),
            };
            black_box(response.encode(3, 4).map(|f| f.len()))
        });
    });

    let response = Message::EntityResponse {
        index: 12,
        nonce: 9,
        record: Some(&record),
    };
    if let Ok(frame) = response.encode(3, 4) {
        let bytes = frame.as_bytes().to_vec();
        group.bench_function("decode_and_copy", |b| {
            b.iter(|| {
                let Ok(frame) = Frame::decode(black_box(&bytes)) else {
                    return None;
                };
                match Message::decode(&frame) {
                    Ok(Message::EntityResponse { record, .. }) => record.copied(),
                    _ => None,
                }
            });
        });
    }

    group.finish();
}

fn bench_control(c: &mut Criterion) {
    let mut group = c.benchmark_group("control_text");

    let greet = ControlMessage::Greet {
        creator: true,
        name: "alpha, the host".to_owned(),
    }
    .encode();
    group.bench_function("parse_greet", |b| {
        b.iter(|| black_box(ControlMessage::parse(black_box(greet.as_bytes()))).is_ok());
    });

    let ids = (0..8).map(|i| PeerId::new(format!("peer-{i:02}"))).collect();
    let neighbors = ControlMessage::Neighbors(ids).encode();
    group.bench_function("parse_neighbors_8", |b| {
        b.iter(|| black_box(ControlMessage::parse(black_box(neighbors.as_bytes()))).is_ok());
    });

    group.finish();
}

criterion_group!(benches, bench_sync, bench_response, bench_control);
criterion_main!(benches);
