//! Attribute codec benchmarks.

use std::sync::Arc;

use criterion::{black_box, criterion_group, criterion_main, BenchmarkId, Criterion, Throughput};
use theorydb_bench::{doc_fields, nested_value, random_data};
use theorydb_codec::{from_tagged_json, to_tagged_json, AttributeValue};
use theorydb_core::{
    canonical_json, parse_json, value_to_wire, wire_to_value, EnvelopeCipher, Fields, ItemCodec,
    Record, SystemRandom, Value,
};
use theorydb_testkit::fakes::StubKms;
use theorydb_testkit::fixtures::{Doc, Secret, MASTER_KEY_ID};

/// Benchmark domain to wire conversion.
fn bench_wire(c: &mut Criterion) {
    let mut group = c.benchmark_group("wire");

    for depth in [1usize, 2, 3] {
        let value = nested_value(depth, 5);
        group.bench_with_input(BenchmarkId::new("to_wire", depth), &value, |b, value| {
            b.iter(|| black_box(value_to_wire(black_box(value)).unwrap()));
        });

        let wire = value_to_wire(&value).unwrap();
        group.bench_with_input(BenchmarkId::new("from_wire", depth), &wire, |b, wire| {
            b.iter(|| black_box(wire_to_value(black_box(wire)).unwrap()));
        });
    }

    group.finish();
}

/// Benchmark canonical JSON for JSON-typed attributes.
fn bench_json(c: &mut Criterion) {
    let mut group = c.benchmark_group("json");
    let value = nested_value(3, 4);
    let text = canonical_json(&value).unwrap();

    group.bench_function("canonical", |b| {
        b.iter(|| black_box(canonical_json(black_box(&value)).unwrap()));
    });
    group.bench_function("parse", |b| {
        b.iter(|| black_box(parse_json(black_box(&text)).unwrap()));
    });

    group.finish();
}

/// Benchmark whole-record encoding through a model.
fn bench_item(c: &mut Criterion) {
    let mut group = c.benchmark_group("item");
    let codec = ItemCodec::new(Arc::new(Doc::definition().unwrap()), None).unwrap();

    for (tags, history) in [(0usize, 0usize), (8, 8), (64, 64)] {
        let fields = doc_fields("A", tags, history);
        let id = format!("{tags}x{history}");
        group.bench_with_input(BenchmarkId::new("encode", &id), &fields, |b, fields| {
            b.iter(|| black_box(codec.encode_item(fields.clone()).unwrap()));
        });

        let item = codec.encode_item(fields).unwrap();
        group.bench_with_input(BenchmarkId::new("decode", &id), &item, |b, item| {
            b.iter(|| black_box(codec.decode_item(black_box(item)).unwrap()));
        });
    }

    group.finish();
}

/// Benchmark envelope encryption by plaintext size.
fn bench_envelope(c: &mut Criterion) {
    let mut group = c.benchmark_group("envelope");
    let cipher = EnvelopeCipher::new(Arc::new(StubKms::new()), MASTER_KEY_ID)
        .with_random(Arc::new(SystemRandom));

    for size in [64usize, 1024, 16384] {
        group.throughput(Throughput::Bytes(size as u64));
        let value = AttributeValue::B(random_data(size));

        group.bench_with_input(BenchmarkId::new("seal", size), &value, |b, value| {
            b.iter(|| black_box(cipher.encrypt(black_box(value), "secret").unwrap()));
        });

        let sealed = cipher.encrypt(&value, "secret").unwrap();
        group.bench_with_input(BenchmarkId::new("open", size), &sealed, |b, sealed| {
            b.iter(|| black_box(cipher.decrypt(black_box(sealed), "secret").unwrap()));
        });
    }

    let tagged = to_tagged_json(&AttributeValue::S("top-secret".to_string())).unwrap();
    group.bench_function("tagged_json_parse", |b| {
        b.iter(|| black_box(from_tagged_json(black_box(&tagged)).unwrap()));
    });

    let codec = ItemCodec::new(Arc::new(Secret::definition().unwrap()), Some(cipher.clone())).unwrap();
    group.bench_function("encrypted_record", |b| {
        b.iter(|| {
            let fields = Fields::new()
                .with("pk", "A")
                .with("secret", Value::from("top-secret"));
            let item = codec.encode_item(fields).unwrap();
            black_box(codec.decode_item(&item).unwrap())
        });
    });

    group.finish();
}

criterion_group!(benches, bench_wire, bench_json, bench_item, bench_envelope);
criterion_main!(benches);
