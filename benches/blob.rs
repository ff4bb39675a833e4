#![allow(unused)]
extern crate peerweave;

use criterion::{criterion_group, criterion_main, BenchmarkId, Criterion, Throughput};
use peerweave::{
    blob::{BlobAssemblyInput, BlobSet, BlobWriter},
    config::BlobWriterConfig,
    TargetArch,
};
use std::hint::black_box;

fn inputs(count: usize) -> Vec<BlobAssemblyInput> {
    (0..count)
        .map(|i| {
            let name = format!("Assembly{i:05}");
            let image = vec![(i % 251) as u8; 4096];
            BlobAssemblyInput::new(name.as_str(), TargetArch::None, image)
        })
        .collect()
}

fn config(limit: Option<usize>) -> BlobWriterConfig {
    BlobWriterConfig {
        max_assemblies_per_shard: limit,
        target_archs: vec![TargetArch::Arm64, TargetArch::X86_64],
        ..BlobWriterConfig::default()
    }
}

/// Encoding a set in memory, single shard against 4 data shards
fn bench_build(c: &mut Criterion) {
    let inputs = inputs(1_000);
    let bytes: usize = inputs.iter().map(|input| input.image.len()).sum();

    let mut group = c.benchmark_group("blob_build");
    group.throughput(Throughput::Bytes(bytes as u64));
    for limit in [None, Some(250)] {
        let writer = BlobWriter::new(config(limit));
        let label = limit.map_or("single".to_string(), |l| format!("per_{l}"));
        group.bench_with_input(BenchmarkId::from_parameter(label), &inputs, |b, inputs| {
            b.iter(|| black_box(writer.build(black_box(inputs)).unwrap()));
        });
    }
    group.finish();
}

/// Opening a written set and resolving every assembly by name
fn bench_open_and_lookup(c: &mut Criterion) {
    let dir = tempfile::tempdir().unwrap();
    let writer = BlobWriter::new(BlobWriterConfig {
        output_dir: dir.path().to_path_buf(),
        ..config(Some(2_500))
    });
    writer.write(&inputs(10_000)).unwrap();

    c.bench_function("blob_open", |b| {
        b.iter(|| black_box(BlobSet::open(black_box(dir.path())).unwrap()));
    });

    let set = BlobSet::open(dir.path()).unwrap();
    let names: Vec<String> = (0..10_000).step_by(7).map(|i| format!("Assembly{i:05}")).collect();
    c.bench_function("blob_lookup_by_name", |b| {
        b.iter(|| {
            for name in &names {
                black_box(set.lookup_by_name(black_box(name)));
            }
        });
    });
}

criterion_group!(benches, bench_build, bench_open_and_lookup);
criterion_main!(benches);
