use std::hint::black_box;
use std::sync::Arc;
use std::time::Duration;

use criterion::{Criterion, criterion_group, criterion_main};
use eventide_core::catalog::Catalog;
use eventide_core::config::EventideConfig;
use eventide_core::sink::NullSink;
use eventide_sim::{DeterministicRng, Scheduler, ShardOptions, SimulationContext, WeightedSampler, run_sharded};

fn small_config() -> EventideConfig {
    let mut config = EventideConfig::default();
    config.simulation.n_users = 100;
    config.simulation.end_time = config.simulation.start_time + chrono::Duration::days(1);
    config
}

fn context() -> Arc<SimulationContext> {
    let catalog = Catalog::demo(Duration::from_secs(900));
    match SimulationContext::new(&small_config(), catalog) {
        Ok(ctx) => Arc::new(ctx),
        Err(error) => panic!("benchmark config rejected: {error}"),
    }
}

fn bench_scheduler_single_shard(c: &mut Criterion) {
    let ctx = context();
    c.bench_function("scheduler_100_users_one_day", |b| {
        b.iter(|| {
            let mut scheduler = Scheduler::new(Arc::clone(&ctx)).unwrap();
            black_box(scheduler.run(&mut NullSink).unwrap())
        });
    });
}

fn bench_sharded_run(c: &mut Criterion) {
    let ctx = context();
    let options = ShardOptions {
        shards: 4,
        ordered: true,
        capacity: 1024,
    };
    c.bench_function("sharded_ordered_merge_4", |b| {
        b.iter(|| black_box(run_sharded(Arc::clone(&ctx), options, &mut NullSink).unwrap()));
    });
}

fn bench_weighted_sampling(c: &mut Criterion) {
    let sampler = WeightedSampler::from_weighted((0..64u64).map(|i| (i, i % 7 + 1))).unwrap();
    let mut rng = DeterministicRng::from_seed(7);
    c.bench_function("weighted_sample_64", |b| {
        b.iter(|| black_box(sampler.sample(&mut rng)));
    });
}

criterion_group!(
    benches,
    bench_scheduler_single_shard,
    bench_sharded_run,
    bench_weighted_sampling
);
criterion_main!(benches);
