use super::{get_log, random_chain};
use criterion::{black_box, criterion_group, Criterion};
use std::time::{Duration, Instant};

/// Number of records in the log being read.
const ITEMS: u64 = 200_000;

fn bench_read_hashes(c: &mut Criterion) {
    c.bench_function(&format!("{}/items={ITEMS}", module_path!()), |b| {
        b.iter_custom(|iters| {
            let directory = tempfile::tempdir().unwrap();
            let mut log = get_log(directory.path());
            for record in random_chain(ITEMS) {
                log.append(&record).unwrap();
            }
            log.flush().unwrap();

            let mut duration = Duration::ZERO;
            for _ in 0..iters {
                let start = Instant::now();
                black_box(log.read_hashes(0, ITEMS).unwrap());
                duration += start.elapsed();
            }
            log.destroy().unwrap();
            duration
        });
    });
}

criterion_group! {
    name = benches;
    config = Criterion::default().sample_size(10);
    targets = bench_read_hashes
}
