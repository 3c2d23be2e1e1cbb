use crate::{Error, Metrics, Storage};
use prometheus_client::{encoding::text::encode, registry::Metric, registry::Registry};
use std::sync::{Arc, Mutex};

/// Shared handle to a [Storage] backend and a metrics registry.
///
/// Clones (and labeled children created with [Metrics::with_label]) share the same
/// backend and registry.
#[derive(Clone)]
pub struct Context<S: Storage> {
    label: String,
    storage: S,
    registry: Arc<Mutex<Registry>>,
}

impl<S: Storage> Context<S> {
    /// Create a root context over the provided backend.
    pub fn new(storage: S) -> Self {
        Self {
            label: String::new(),
            storage,
            registry: Arc::new(Mutex::new(Registry::default())),
        }
    }
}

impl<S: Storage> Metrics for Context<S> {
    fn label(&self) -> String {
        self.label.clone()
    }

    fn with_label(&self, label: &str) -> Self {
        let label = if self.label.is_empty() {
            label.to_string()
        } else {
            format!("{}_{}", self.label, label)
        };
        Self {
            label,
            storage: self.storage.clone(),
            registry: self.registry.clone(),
        }
    }

    fn register<N: Into<String>, H: Into<String>>(&self, name: N, help: H, metric: impl Metric) {
        let name = name.into();
        let prefixed_name = if self.label.is_empty() {
            name
        } else {
            format!("{}_{}", self.label, name)
        };
        self.registry
            .lock()
            .unwrap()
            .register(prefixed_name, help, metric);
    }

    fn encode(&self) -> String {
        let mut buffer = String::new();
        encode(&mut buffer, &self.registry.lock().unwrap()).expect("encoding failed");
        buffer
    }
}

impl<S: Storage> Storage for Context<S> {
    type Blob = S::Blob;

    fn open(&self, partition: &str, name: &[u8]) -> Result<(Self::Blob, u64), Error> {
        self.storage.open(partition, name)
    }

    fn remove(&self, partition: &str, name: Option<&[u8]>) -> Result<(), Error> {
        self.storage.remove(partition, name)
    }

    fn scan(&self, partition: &str) -> Result<Vec<Vec<u8>>, Error> {
        self.storage.scan(partition)
    }
}
