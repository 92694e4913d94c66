use criterion::{Criterion, criterion_group, criterion_main};
use pushcode_core::bytecode::{
    BytecodeBuilder, BytecodeCache, create_push_array, create_push_multiple, create_push_number, validate_bytecode,
};
use std::hint::black_box;

fn bench_scalar_builders(c: &mut Criterion) {
    let builder = BytecodeBuilder::default();
    c.bench_function("push_number", |b| {
        b.iter(|| {
            let bytes = builder.push_number(black_box(3.14159));
            black_box(bytes);
        });
    });
    c.bench_function("push_string_64", |b| {
        let text = "x".repeat(64);
        b.iter(|| {
            let bytes = builder.push_string(black_box(text.as_str()));
            black_box(bytes);
        });
    });
}

fn bench_collection_builders(c: &mut Criterion) {
    // Two SETLIST batches.
    let values: Vec<String> = (0..300).map(|i| format!("item{}", i)).collect();
    c.bench_function("push_array_300", |b| {
        b.iter(|| {
            let bytes = create_push_array(black_box(&values)).unwrap();
            black_box(bytes);
        });
    });

    let mixed: Vec<String> = (0..64)
        .map(|i| match i % 3 {
            0 => i.to_string(),
            1 => "true".to_string(),
            _ => format!("s{}", i),
        })
        .collect();
    c.bench_function("push_multiple_64", |b| {
        b.iter(|| {
            let bytes = create_push_multiple(black_box(&mixed)).unwrap();
            black_box(bytes);
        });
    });
}

fn bench_cache_and_validate(c: &mut Criterion) {
    let mut cache = BytecodeCache::default();
    c.bench_function("cache_get_number_hit", |b| {
        cache.get_number(1.0);
        b.iter(|| {
            black_box(cache.get_number(black_box(1.0)).len());
        });
    });

    let module = create_push_number(2.5);
    c.bench_function("validate_bytecode", |b| {
        b.iter(|| black_box(validate_bytecode(black_box(&module))));
    });
}

criterion_group!(
    benches,
    bench_scalar_builders,
    bench_collection_builders,
    bench_cache_and_validate
);
criterion_main!(benches);
