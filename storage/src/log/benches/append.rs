use super::{get_log, random_chain};
use criterion::{criterion_group, Criterion};
use std::time::{Duration, Instant};

const ITEMS: [u64; 2] = [10_000, 100_000];

fn bench_append(c: &mut Criterion) {
    for items in ITEMS {
        c.bench_function(&format!("{}/items={items}", module_path!()), |b| {
            b.iter_custom(move |iters| {
                let records = random_chain(items);
                let mut duration = Duration::ZERO;
                for _ in 0..iters {
                    let directory = tempfile::tempdir().unwrap();
                    let mut log = get_log(directory.path());
                    let start = Instant::now();
                    for record in &records {
                        log.append(record).unwrap();
                    }
                    log.flush().unwrap();
                    duration += start.elapsed();
                    log.destroy().unwrap();
                }
                duration
            });
        });
    }
}

criterion_group! {
    name = benches;
    config = Criterion::default().sample_size(10);
    targets = bench_append
}
