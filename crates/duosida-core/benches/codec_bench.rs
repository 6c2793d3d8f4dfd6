//! Criterion benchmarks for the field-tree codec and status projection.
//!
//! Run with:
//! ```bash
//! cargo bench --package duosida-core --bench codec_bench
//! ```

use criterion::{black_box, criterion_group, criterion_main, BenchmarkId, Criterion};
use duosida_core::protocol::codec::{decode_message, encode_frame, encode_message, FieldNode};
use duosida_core::protocol::messages::{
    build_handshake, build_set_current, build_status_request, parse_status,
};

const DEVICE_ID: &str = "0310107112122360374";

// ── Fixtures ──────────────────────────────────────────────────────────────────

/// A status response shaped like the ones a charging unit pushes.
fn make_status_response() -> Vec<u8> {
    let readings = vec![
        FieldNode::float(1, 230.4),
        FieldNode::float(2, 15.9),
        FieldNode::float(7, 38.0),
        FieldNode::float(8, 24.5),
        FieldNode::float(9, 4.75),
        FieldNode::varint(17, 2),
        FieldNode::varint(18, 1_700_000_000),
        FieldNode::float(20, 10_500.0),
    ];
    encode_message(&[
        FieldNode::message(
            4,
            vec![
                FieldNode::string(1, "Duosida"),
                FieldNode::string(2, "SmartChargePi"),
                FieldNode::string(5, "V1.1.1"),
            ],
        ),
        FieldNode::message(
            16,
            vec![
                FieldNode::string(2, "DataVendorStatusReq"),
                FieldNode::message(10, readings),
            ],
        ),
        FieldNode::string(100, DEVICE_ID),
        FieldNode::varint(101, 42),
    ])
}

fn requests() -> Vec<(&'static str, Vec<u8>)> {
    let [hello, login] = build_handshake(DEVICE_ID);
    vec![
        ("Hello", hello),
        ("Login", login),
        ("StatusRequest", build_status_request(DEVICE_ID, 3)),
        ("SetCurrent", build_set_current(16, DEVICE_ID, 4).unwrap()),
        ("StatusResponse", make_status_response()),
    ]
}

// ── Benchmarks ────────────────────────────────────────────────────────────────

fn bench_decode(c: &mut Criterion) {
    let mut group = c.benchmark_group("decode");
    for (name, bytes) in requests() {
        group.bench_with_input(BenchmarkId::new("msg", name), &bytes, |b, bytes| {
            b.iter(|| decode_message(black_box(bytes)).unwrap());
        });
    }
    group.finish();
}

fn bench_encode(c: &mut Criterion) {
    let mut group = c.benchmark_group("encode");
    for (name, bytes) in requests() {
        let fields = decode_message(&bytes).unwrap();
        group.bench_with_input(BenchmarkId::new("msg", name), &fields, |b, fields| {
            b.iter(|| encode_message(black_box(fields)));
        });
    }
    group.finish();
}

fn bench_status_hot_path(c: &mut Criterion) {
    let mut group = c.benchmark_group("status_hot_path");
    let response = make_status_response();

    group.bench_function("build_request_and_frame", |b| {
        b.iter(|| encode_frame(&build_status_request(black_box(DEVICE_ID), 3)).unwrap());
    });
    group.bench_function("decode_and_parse", |b| {
        b.iter(|| {
            let fields = decode_message(black_box(&response)).unwrap();
            parse_status(&fields).unwrap()
        });
    });
    group.finish();
}

criterion_group!(benches, bench_decode, bench_encode, bench_status_hot_path);
criterion_main!(benches);
