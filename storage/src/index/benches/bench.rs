use criterion::criterion_main;
use headerchain_codec::Digest;
use headerchain_runtime::Metrics;
use prometheus_client::registry::Metric;
use sha2::{Digest as _, Sha256};


criterion_main!(insert::benches, lookup::benches);

#[cfg(not(full_bench))]
const N_ITEMS: [usize; 2] = [10_000, 50_000];
#[cfg(full_bench)]
const N_ITEMS: [usize; 4] = [10_000, 50_000, 100_000, 200_000];

#[derive(Clone)]
struct DummyMetrics;

impl Metrics for DummyMetrics {
    fn label(&self) -> String {
        "".to_string()
    }

    fn with_label(&self, _: &str) -> Self {
        Self
    }

    fn encode(&self) -> String {
        "".to_string()
    }

    fn register<N: Into<String>, H: Into<String>>(&self, _: N, _: H, _: impl Metric) {}
}

/// Digests of `items` consecutive heights.
fn digests(items: usize) -> Vec<(Digest, u64)> {
    (0..items)
        .map(|i| {
            let mut out = [0u8; 32];
            out.copy_from_slice(&Sha256::digest((i as u64).to_be_bytes()));
            (Digest::from(out), i as u64)
        })
        .collect()
}
