use std::sync::Arc;

use parking_lot::Mutex;
use sluice_config::Config;
use sluice_metrics::{
    MetricsClient, NamespaceRegistry, OutcomeSink, PublisherConfig, RegistryConfig,
};
use tokio::task::JoinHandle;

use crate::bus::MessageBus;
use crate::services::{IngestService, StatusProducer, StatusUpstream, UpstreamClient};

/// Indicates the type of failure of the server.
#[derive(Debug, thiserror::Error)]
pub enum ServiceError {
    /// The HTTP client for the remote ingestion service could not be created.
    #[error("could not create the upstream client")]
    UpstreamClient(#[source] reqwest::Error),

    /// The HTTP client for the status upstream relay could not be created.
    #[error("could not create the status upstream client")]
    StatusUpstreamClient(#[source] reqwest::Error),
}

struct StateInner {
    config: Arc<Config>,
    bus: Arc<MessageBus>,
    registry: Arc<NamespaceRegistry>,
    tasks: Mutex<Vec<JoinHandle<()>>>,
}

/// Server state shared by all endpoints.
///
/// Owns the message bus, the namespace registry and the background services feeding them.
#[derive(Clone)]
pub struct ServiceState {
    inner: Arc<StateInner>,
}

impl ServiceState {
    /// Starts all services, publishing to the remote ingestion service configured in `config`.
    ///
    /// Must be called within a tokio runtime.
    pub fn start(config: Arc<Config>) -> Result<Self, ServiceError> {
        let client = UpstreamClient::new(
            config.publish_endpoint().clone(),
            config.publish_region(),
            config.request_timeout(),
        )
        .map_err(ServiceError::UpstreamClient)?;

        Self::start_with_client(config, Arc::new(client))
    }

    /// Starts all services, publishing batches through `client`.
    pub fn start_with_client(
        config: Arc<Config>,
        client: Arc<dyn MetricsClient>,
    ) -> Result<Self, ServiceError> {
        let bus = Arc::new(MessageBus::new(config.max_pending_messages()));

        let upstream = config
            .relay_upstream()
            .map(|url| StatusUpstream::new(url.clone(), config.request_timeout()))
            .transpose()
            .map_err(ServiceError::StatusUpstreamClient)?;
        let (status_tx, status_task) = StatusProducer::new(bus.clone(), config.output_topic())
            .with_upstream(upstream)
            .start();
        let sink: Arc<dyn OutcomeSink> = Arc::new(status_tx);

        let registry_config = RegistryConfig {
            capacity: config.max_metrics_to_retain(),
            publisher: PublisherConfig {
                flush_interval: config.publish_interval(),
                request_timeout: config.request_timeout(),
            },
        };
        let registry = Arc::new(NamespaceRegistry::new(
            registry_config,
            client,
            sink.clone(),
        ));

        let ingest_task = IngestService::new(config.core_name(), registry.clone(), sink)
            .start(&bus, config.input_topic());

        Ok(Self {
            inner: Arc::new(StateInner {
                config,
                bus,
                registry,
                tasks: Mutex::new(vec![ingest_task, status_task]),
            }),
        })
    }

    /// Returns the configuration the services were started with.
    pub fn config(&self) -> &Config {
        &self.inner.config
    }

    /// Returns the local message bus.
    pub fn bus(&self) -> &MessageBus {
        &self.inner.bus
    }

    /// Returns the registry holding all buffered metrics.
    pub fn registry(&self) -> &NamespaceRegistry {
        &self.inner.registry
    }

    /// Stops ingestion, status reporting and the flush timers.
    ///
    /// Metrics still buffered at this point are lost.
    pub fn shutdown(&self) {
        for task in self.inner.tasks.lock().drain(..) {
            task.abort();
        }

        let buffered = self.inner.registry.buffered_count();
        if buffered > 0 {
            sluice_log::warn!(buffered, "shutting down with buffered metrics");
        }
        self.inner.registry.shutdown();
    }
}

impl std::fmt::Debug for ServiceState {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ServiceState")
            .field("registry", &self.inner.registry)
            .finish()
    }
}
