use std::collections::HashMap;
use std::sync::Arc;

use async_trait::async_trait;
use parking_lot::RwLock;
use sluice_statsd::metric;

use crate::client::MetricsClient;
use crate::outcome::OutcomeSink;
use crate::publisher::{BatchPublisher, PublisherConfig};
use crate::record::MetricRecord;
use crate::statsd::MetricCounters;

/// Parameters of a [`NamespaceRegistry`].
#[derive(Clone, Debug)]
pub struct RegistryConfig {
    /// The number of buffered metrics across all namespaces above which new metrics replace old
    /// ones instead of growing the buffer.
    pub capacity: usize,

    /// Configuration of every publisher created by the registry.
    pub publisher: PublisherConfig,
}

impl Default for RegistryConfig {
    fn default() -> Self {
        Self {
            capacity: 5000,
            publisher: PublisherConfig::default(),
        }
    }
}

/// Accepts validated metrics from an ingress.
#[async_trait]
pub trait RecordHandler: Send + Sync {
    /// Hands over a metric for `namespace`.
    ///
    /// Never fails. Metrics that cannot be buffered are dropped.
    async fn on_record(&self, namespace: &str, record: MetricRecord);
}

/// Routes metrics to one [`BatchPublisher`] per namespace and bounds the total buffer.
///
/// Publishers are created on the first metric of a namespace and live as long as the registry.
pub struct NamespaceRegistry {
    config: RegistryConfig,
    client: Arc<dyn MetricsClient>,
    sink: Arc<dyn OutcomeSink>,
    publishers: RwLock<HashMap<String, Arc<BatchPublisher>>>,
}

impl NamespaceRegistry {
    /// Creates an empty registry.
    pub fn new(
        config: RegistryConfig,
        client: Arc<dyn MetricsClient>,
        sink: Arc<dyn OutcomeSink>,
    ) -> Self {
        Self {
            config,
            client,
            sink,
            publishers: RwLock::new(HashMap::new()),
        }
    }

    /// Buffers a metric in its namespace.
    ///
    /// If more metrics than the capacity are buffered before this metric is counted, the metric
    /// replaces the oldest metric of its namespace. A namespace without buffered metrics cannot
    /// make room, so the metric is dropped in that case. This also applies to the first metric of
    /// a new namespace.
    pub async fn submit(&self, namespace: &str, record: MetricRecord) {
        let publisher = self.get_or_create(namespace);

        if self.buffered_count() > self.config.capacity {
            publisher.replace(record).await;
        } else {
            publisher.append(record).await;
        }
    }

    fn get_or_create(&self, namespace: &str) -> Arc<BatchPublisher> {
        if let Some(publisher) = self.publishers.read().get(namespace) {
            return Arc::clone(publisher);
        }

        let mut publishers = self.publishers.write();
        // Another submission may have created the publisher in the meantime.
        let publisher = publishers.entry(namespace.to_owned()).or_insert_with(|| {
            sluice_log::debug!(namespace, "creating publisher for new namespace");
            metric!(counter(MetricCounters::PublisherCreated) += 1);

            Arc::new(BatchPublisher::new(
                namespace,
                self.config.publisher.clone(),
                Arc::clone(&self.client),
                Arc::clone(&self.sink),
            ))
        });

        Arc::clone(publisher)
    }

    /// Returns the number of metrics buffered across all namespaces.
    pub fn buffered_count(&self) -> usize {
        self.publishers
            .read()
            .values()
            .map(|publisher| publisher.buffered_count())
            .sum()
    }

    /// Returns the configured capacity.
    pub fn capacity(&self) -> usize {
        self.config.capacity
    }

    /// Returns `true` if new metrics currently replace old ones.
    pub fn is_over_capacity(&self) -> bool {
        self.buffered_count() > self.config.capacity
    }

    /// Returns all known namespaces in lexical order.
    pub fn namespaces(&self) -> Vec<String> {
        let mut namespaces: Vec<_> = self.publishers.read().keys().cloned().collect();
        namespaces.sort_unstable();
        namespaces
    }

    /// Returns the publisher of a namespace, if it has received metrics before.
    pub fn get(&self, namespace: &str) -> Option<Arc<BatchPublisher>> {
        self.publishers.read().get(namespace).cloned()
    }

    /// Stops the flush timers of all publishers.
    ///
    /// Buffered metrics are not flushed.
    pub fn shutdown(&self) {
        let publishers = self.publishers.read();
        sluice_log::info!(
            namespaces = publishers.len(),
            buffered = publishers.values().map(|p| p.buffered_count()).sum::<usize>(),
            "stopping publishers"
        );

        for publisher in publishers.values() {
            publisher.shutdown();
        }
    }
}

impl std::fmt::Debug for NamespaceRegistry {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("NamespaceRegistry")
            .field("config", &self.config)
            .field("namespaces", &self.namespaces())
            .finish()
    }
}

#[async_trait]
impl RecordHandler for NamespaceRegistry {
    async fn on_record(&self, namespace: &str, record: MetricRecord) {
        self.submit(namespace, record).await
    }
}
