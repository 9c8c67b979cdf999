use std::sync::Arc;
use std::time::Duration;

use sluice_metrics::{Outcome, StatusMessage};
use sluice_statsd::metric;
use tokio::sync::{Semaphore, mpsc};
use tokio::task::{JoinHandle, JoinSet};
use url::Url;

use crate::bus::MessageBus;
use crate::statsd::ServerCounters;

/// Maximum number of status messages forwarded to the upstream relay at the same time.
///
/// Messages exceeding this limit are not forwarded, but still published on the bus.
pub const MAX_PENDING_FORWARDS: usize = 64;

/// Mirrors status messages to an upstream relay over HTTP.
#[derive(Clone, Debug)]
pub struct StatusUpstream {
    client: reqwest::Client,
    url: Url,
}

impl StatusUpstream {
    /// Creates an upstream posting to `url`.
    ///
    /// Every request is bounded by `timeout`, unless it is zero.
    pub fn new(url: Url, timeout: Duration) -> Result<Self, reqwest::Error> {
        let mut builder = reqwest::Client::builder();
        if !timeout.is_zero() {
            builder = builder.timeout(timeout);
        }

        Ok(Self {
            client: builder.build()?,
            url,
        })
    }

    async fn forward(&self, message: &StatusMessage) -> Result<(), reqwest::Error> {
        self.client
            .post(self.url.clone())
            .json(message)
            .send()
            .await?
            .error_for_status()?;
        Ok(())
    }
}

/// Publishes outcomes as [`StatusMessage`]s on the status topic.
///
/// Outcomes are received on an unbounded channel, so reporting never blocks the publishers.
/// Forwarding to the upstream relay runs on separate tasks and never delays the bus.
pub struct StatusProducer {
    bus: Arc<MessageBus>,
    topic: String,
    upstream: Option<StatusUpstream>,
}

impl StatusProducer {
    /// Creates a producer publishing to `topic`.
    pub fn new(bus: Arc<MessageBus>, topic: impl Into<String>) -> Self {
        Self {
            bus,
            topic: topic.into(),
            upstream: None,
        }
    }

    /// Additionally posts every status message to an upstream relay.
    pub fn with_upstream(mut self, upstream: Option<StatusUpstream>) -> Self {
        self.upstream = upstream;
        self
    }

    /// Starts the producer.
    ///
    /// Returns the sender to report outcomes to. The producer stops once all senders are dropped,
    /// every pending outcome is published and all forwards have completed.
    pub fn start(self) -> (mpsc::UnboundedSender<Outcome>, JoinHandle<()>) {
        let (tx, mut rx) = mpsc::unbounded_channel();

        let handle = tokio::spawn(async move {
            let permits = Arc::new(Semaphore::new(MAX_PENDING_FORWARDS));
            let mut forwards = JoinSet::new();

            loop {
                tokio::select! {
                    biased;

                    Some(_) = forwards.join_next(), if !forwards.is_empty() => {}
                    outcome = rx.recv() => match outcome {
                        Some(outcome) => self.publish(outcome, &permits, &mut forwards),
                        None => break,
                    },
                }
            }

            while forwards.join_next().await.is_some() {}
            sluice_log::debug!("status producer stopped");
        });

        (tx, handle)
    }

    fn publish(&self, outcome: Outcome, permits: &Arc<Semaphore>, forwards: &mut JoinSet<()>) {
        let message = StatusMessage::from(outcome);

        match serde_json::to_value(&message) {
            Ok(value) => {
                self.bus.publish(&self.topic, value);
                metric!(
                    counter(ServerCounters::MessagePublished) += 1,
                    source = "status"
                );
            }
            Err(error) => {
                sluice_log::error!(
                    error = &error as &dyn std::error::Error,
                    "failed to serialize status message"
                );
                return;
            }
        }

        let Some(upstream) = &self.upstream else {
            return;
        };

        let Ok(permit) = permits.clone().try_acquire_owned() else {
            sluice_log::warn!(
                url = upstream.url.as_str(),
                "too many pending forwards, not forwarding status message to upstream relay"
            );
            metric!(counter(ServerCounters::StatusUpstreamFailed) += 1);
            return;
        };

        let upstream = upstream.clone();
        forwards.spawn(async move {
            if let Err(error) = upstream.forward(&message).await {
                sluice_log::warn!(
                    error = &error as &dyn std::error::Error,
                    url = upstream.url.as_str(),
                    "failed to forward status message to upstream relay"
                );
                metric!(counter(ServerCounters::StatusUpstreamFailed) += 1);
            }
            drop(permit);
        });
    }
}
