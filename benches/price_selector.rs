//! Benchmarks for price selection and request dispatch

use criterion::{black_box, criterion_group, criterion_main, Criterion, Throughput};
use std::sync::Arc;
use storage_ops::config::LocalDriverConfig;
use storage_ops::controlplane::backends::softlayer::simulated::default_catalog;
use storage_ops::controlplane::backends::LocalOps;
use storage_ops::pricing::StorageProtocol;
use storage_ops::{
    select_prices, Dispatcher, DiskSpec, DriverRegistry, Labels, Metrics, Operation, StorageTier,
};

fn bench_select_prices(c: &mut Criterion) {
    let mut group = c.benchmark_group("price_selector");
    group.throughput(Throughput::Elements(1));

    let catalog = default_catalog();
    let endurance = DiskSpec::new(StorageTier::Endurance, 2.0, 100).with_snapshot_reserve(20);
    let performance = DiskSpec::new(StorageTier::Performance, 1000.0, 100);

    group.bench_function("endurance_with_snapshot", |b| {
        b.iter(|| select_prices(black_box(&catalog), black_box(&endurance), StorageProtocol::Block))
    });

    group.bench_function("performance", |b| {
        b.iter(|| {
            select_prices(
                black_box(&catalog),
                black_box(&performance),
                StorageProtocol::Block,
            )
        })
    });

    group.finish();
}

fn bench_dispatch(c: &mut Criterion) {
    let mut group = c.benchmark_group("dispatcher");
    group.throughput(Throughput::Elements(1));

    let registry = Arc::new(DriverRegistry::new());
    for name in ["osd", "osd-sched", "kubelet"] {
        let ops = LocalOps::new(LocalDriverConfig {
            name: name.to_string(),
            ..Default::default()
        });
        let _ = registry.register(name, Arc::new(ops));
    }
    let metrics = match Metrics::new() {
        Ok(metrics) => Arc::new(metrics),
        Err(e) => panic!("metrics registry: {}", e),
    };
    let dispatcher = Dispatcher::new(registry, "osd", metrics);

    group.bench_function("resolve_client", |b| {
        b.iter(|| dispatcher.resolve(black_box(Some("kubelet/1.29"))).is_ok())
    });

    group.bench_function("resolve_fallback", |b| {
        b.iter(|| dispatcher.resolve(black_box(Some("unknown/0.1"))).is_ok())
    });

    group.bench_function("execute_create", |b| {
        b.iter(|| {
            tokio_test::block_on(dispatcher.execute(
                None,
                Operation::Create {
                    spec: DiskSpec::new(StorageTier::Endurance, 2.0, 10),
                    labels: Labels::new(),
                },
            ))
            .is_ok()
        })
    });

    group.finish();
}

criterion_group!(benches, bench_select_prices, bench_dispatch);
criterion_main!(benches);
