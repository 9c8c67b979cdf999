use std::sync::{Arc, Weak};
use std::time::{Duration, Instant};

use parking_lot::Mutex;
use sluice_statsd::metric;
use tokio::task::JoinHandle;
use tokio::time::MissedTickBehavior;

use crate::client::{MetricsClient, PublishError};
use crate::outcome::{Outcome, OutcomeSink};
use crate::queue::BufferedQueue;
use crate::record::MetricRecord;
use crate::statsd::{MetricCounters, MetricGauges, MetricHistograms, MetricTimers};

/// The maximum number of metrics shipped in a single remote call.
pub const METRIC_BATCH_SIZE: usize = 20;

/// The number of batches a single flush ships at most.
///
/// Derived from the request rate limit of the remote service, with headroom for the flush timer
/// and submissions flushing at the same time.
pub const DEFAULT_MAX_BATCHES_TO_UPLOAD: usize = 50;

/// Queue length above which flushes triggered by a submission ship fewer batches.
pub const DIAL_DOWN_QUEUE_SIZE: usize = DEFAULT_MAX_BATCHES_TO_UPLOAD * METRIC_BATCH_SIZE;

/// The number of batches a submission-triggered flush ships while the queue is backed up.
pub const DIAL_DOWN_MAX_BATCHES: usize = 10;

/// Returns the flush budget for a flush triggered by a submission.
///
/// A long queue usually means the remote service has been unreachable for a while. Submissions
/// then only drain a small share of the queue and leave the rest to the flush timer, which always
/// uses [`DEFAULT_MAX_BATCHES_TO_UPLOAD`].
fn submission_flush_budget(queue_len: usize) -> usize {
    if queue_len > DIAL_DOWN_QUEUE_SIZE {
        DIAL_DOWN_MAX_BATCHES
    } else {
        DEFAULT_MAX_BATCHES_TO_UPLOAD
    }
}

/// Parameters of a [`BatchPublisher`].
#[derive(Clone, Debug)]
pub struct PublisherConfig {
    /// Time between two timer-driven flushes.
    ///
    /// When zero, there is no timer and every appended metric triggers a flush.
    pub flush_interval: Duration,

    /// Time after which a remote call is abandoned and its batch requeued.
    ///
    /// When zero, remote calls are not bounded.
    pub request_timeout: Duration,
}

impl Default for PublisherConfig {
    fn default() -> Self {
        Self {
            flush_interval: Duration::from_secs(20),
            request_timeout: Duration::from_secs(10),
        }
    }
}

/// Counts what happened during a single [`BatchPublisher::flush`].
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub struct FlushStats {
    /// The number of remote calls made.
    pub batches: usize,
    /// Metrics accepted by the remote service.
    pub sent: usize,
    /// Metrics put back into the queue after a transient failure.
    pub requeued: usize,
    /// Metrics dropped after a permanent failure.
    pub dropped: usize,
}

/// State shared between a publisher and its flush timer.
struct Inner {
    namespace: String,
    config: PublisherConfig,
    queue: Mutex<BufferedQueue>,
    client: Arc<dyn MetricsClient>,
    sink: Arc<dyn OutcomeSink>,
}

impl Inner {
    /// Inserts a record and flushes if a full batch is available.
    ///
    /// With `evict_oldest`, the oldest record is removed first. If there is none, the new record
    /// is dropped.
    async fn insert(&self, record: MetricRecord, evict_oldest: bool) {
        let queue_len = {
            let mut queue = self.queue.lock();
            if evict_oldest && queue.pop_oldest().is_none() {
                None
            } else {
                queue.push(record);
                Some(queue.len())
            }
        };

        let Some(queue_len) = queue_len else {
            sluice_log::trace!(
                namespace = self.namespace.as_str(),
                "dropping metric, nothing to replace"
            );
            metric!(counter(MetricCounters::RecordDropped) += 1);
            return;
        };

        if evict_oldest {
            metric!(counter(MetricCounters::RecordReplaced) += 1);
        }
        metric!(counter(MetricCounters::RecordInserted) += 1);

        if queue_len >= METRIC_BATCH_SIZE || self.config.flush_interval.is_zero() {
            self.flush(submission_flush_budget(queue_len)).await;
        }
    }

    async fn flush(&self, max_batches: usize) -> FlushStats {
        let mut stats = FlushStats::default();

        // Metrics appended while flushing are left for the next flush.
        let total = self.queue.lock().len();
        if total == 0 {
            return stats;
        }

        let start = Instant::now();
        let mut tried = 0;
        while tried < total && stats.batches < max_batches {
            let batch = self.queue.lock().pop_batch(METRIC_BATCH_SIZE);
            if !batch.is_empty() {
                self.ship(batch, &mut stats).await;
            }

            // Counts full batches even if the queue ran short, so the loop ends.
            tried += METRIC_BATCH_SIZE;
            stats.batches += 1;
        }

        let buffered = self.queue.lock().len();
        sluice_log::debug!(
            namespace = self.namespace.as_str(),
            batches = stats.batches,
            sent = stats.sent,
            requeued = stats.requeued,
            dropped = stats.dropped,
            buffered,
            "flushed metrics"
        );

        metric!(timer(MetricTimers::FlushDuration) = start.elapsed());
        metric!(
            gauge(MetricGauges::Buffered) = buffered as u64,
            namespace = self.namespace.as_str()
        );

        stats
    }

    /// Sends one batch and settles it according to the result.
    async fn ship(&self, batch: Vec<MetricRecord>, stats: &mut FlushStats) {
        metric!(histogram(MetricHistograms::BatchSize) = batch.len() as u64);

        let start = Instant::now();
        let call = self.client.put_metric_data(&self.namespace, &batch);
        let result = if self.config.request_timeout.is_zero() {
            call.await
        } else {
            match tokio::time::timeout(self.config.request_timeout, call).await {
                Ok(result) => result,
                Err(_) => Err(PublishError::timeout(self.config.request_timeout)),
            }
        };

        match result {
            Ok(correlation_id) => {
                metric!(
                    timer(MetricTimers::PutMetricData) = start.elapsed(),
                    result = "success"
                );
                metric!(counter(MetricCounters::BatchSent) += 1);
                sluice_log::trace!(
                    namespace = self.namespace.as_str(),
                    correlation_id,
                    size = batch.len(),
                    "published batch"
                );

                stats.sent += batch.len();
                self.sink.report(Outcome::Success {
                    namespace: self.namespace.clone(),
                    correlation_id,
                });
            }
            Err(error) if error.is_transient() => {
                metric!(
                    timer(MetricTimers::PutMetricData) = start.elapsed(),
                    result = "transient"
                );
                metric!(counter(MetricCounters::BatchRequeued) += 1);
                sluice_log::debug!(
                    namespace = self.namespace.as_str(),
                    error = &error as &dyn std::error::Error,
                    size = batch.len(),
                    "requeueing batch after transient failure"
                );

                stats.requeued += batch.len();
                let mut queue = self.queue.lock();
                for record in batch {
                    queue.push(record);
                }
            }
            Err(error) => {
                metric!(
                    timer(MetricTimers::PutMetricData) = start.elapsed(),
                    result = "permanent"
                );
                metric!(counter(MetricCounters::BatchFailed) += 1);
                sluice_log::warn!(
                    namespace = self.namespace.as_str(),
                    error = &error as &dyn std::error::Error,
                    size = batch.len(),
                    "dropping batch after permanent failure"
                );

                stats.dropped += batch.len();
                self.sink.report(Outcome::Failure {
                    namespace: Some(self.namespace.clone()),
                    error_kind: error.class().to_owned(),
                    error_message: error.message().to_owned(),
                });
            }
        }
    }
}

/// Buffers the metrics of one namespace and ships them in batches.
///
/// Metrics are shipped oldest first in batches of at most [`METRIC_BATCH_SIZE`]. A flush happens
/// whenever a full batch is available and in regular intervals from a background task, which is
/// stopped when the publisher is dropped or [shut down](Self::shutdown).
///
/// Must be created within a tokio runtime if the flush interval is non-zero.
pub struct BatchPublisher {
    inner: Arc<Inner>,
    timer: Mutex<Option<JoinHandle<()>>>,
}

impl BatchPublisher {
    /// Creates a publisher for `namespace` and starts its flush timer.
    pub fn new(
        namespace: impl Into<String>,
        config: PublisherConfig,
        client: Arc<dyn MetricsClient>,
        sink: Arc<dyn OutcomeSink>,
    ) -> Self {
        let inner = Arc::new(Inner {
            namespace: namespace.into(),
            config,
            queue: Mutex::new(BufferedQueue::new()),
            client,
            sink,
        });

        let timer = spawn_flush_timer(&inner);

        Self {
            inner,
            timer: Mutex::new(timer),
        }
    }

    /// The namespace of all metrics in this publisher.
    pub fn namespace(&self) -> &str {
        &self.inner.namespace
    }

    /// Returns the number of metrics waiting to be shipped.
    pub fn buffered_count(&self) -> usize {
        self.inner.queue.lock().len()
    }

    /// Queues a metric.
    ///
    /// Flushes right away if a full batch is available or the flush interval is zero. When the
    /// queue holds more than [`DIAL_DOWN_QUEUE_SIZE`] metrics, this flush ships at most
    /// [`DIAL_DOWN_MAX_BATCHES`] batches.
    pub async fn append(&self, record: MetricRecord) {
        self.inner.insert(record, false).await
    }

    /// Queues a metric in place of the oldest queued metric.
    ///
    /// If the queue is empty, the metric is dropped.
    pub async fn replace(&self, record: MetricRecord) {
        self.inner.insert(record, true).await
    }

    /// Ships up to `max_batches` batches of the metrics queued when the flush starts.
    pub async fn flush(&self, max_batches: usize) -> FlushStats {
        self.inner.flush(max_batches).await
    }

    /// Stops the flush timer.
    ///
    /// Queued metrics are not flushed. Calls to [`append`](Self::append) keep working.
    pub fn shutdown(&self) {
        if let Some(timer) = self.timer.lock().take() {
            timer.abort();
        }
    }
}

impl Drop for BatchPublisher {
    fn drop(&mut self) {
        self.shutdown();

        let remaining = self.buffered_count();
        if remaining > 0 {
            sluice_log::error!(
                namespace = self.inner.namespace.as_str(),
                "dropping publisher with {remaining} buffered metrics"
            );
        }
    }
}

impl std::fmt::Debug for BatchPublisher {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("BatchPublisher")
            .field("namespace", &self.inner.namespace)
            .field("config", &self.inner.config)
            .field("buffered", &self.buffered_count())
            .finish()
    }
}

/// Spawns the flush timer, unless the interval is zero.
///
/// The task only holds a weak reference, so it never keeps the publisher alive.
fn spawn_flush_timer(inner: &Arc<Inner>) -> Option<JoinHandle<()>> {
    let interval = inner.config.flush_interval;
    if interval.is_zero() {
        return None;
    }

    let inner: Weak<Inner> = Arc::downgrade(inner);
    Some(tokio::spawn(async move {
        let start = tokio::time::Instant::now() + interval;
        let mut ticker = tokio::time::interval_at(start, interval);
        ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);

        loop {
            ticker.tick().await;
            let Some(inner) = inner.upgrade() else {
                break;
            };
            inner.flush(DEFAULT_MAX_BATCHES_TO_UPLOAD).await;
        }
    }))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::testutils::{CapturingSink, MockClient, MockResponse};

    const NAMESPACE: &str = "edge/sensors";

    fn publisher(
        interval: u64,
        client: &Arc<MockClient>,
        sink: &Arc<CapturingSink>,
    ) -> BatchPublisher {
        let config = PublisherConfig {
            flush_interval: Duration::from_secs(interval),
            request_timeout: Duration::from_secs(1),
        };
        BatchPublisher::new(NAMESPACE, config, client.clone(), sink.clone())
    }

    fn record(name: &str, timestamp: f64) -> MetricRecord {
        MetricRecord::new(name, 1.0).with_timestamp(timestamp)
    }

    #[tokio::test(start_paused = true)]
    async fn test_full_batch_triggers_flush() {
        sluice_log::init_test!();
        let client = Arc::new(MockClient::new());
        let sink = Arc::new(CapturingSink::new());
        let publisher = publisher(20, &client, &sink);

        for i in 0..19 {
            publisher.append(record("m", i as f64)).await;
        }
        assert_eq!(client.call_count(), 0);
        assert_eq!(publisher.buffered_count(), 19);

        publisher.append(record("m", 19.0)).await;

        let calls = client.calls();
        assert_eq!(calls.len(), 1);
        assert_eq!(calls[0].namespace, NAMESPACE);
        assert_eq!(calls[0].records.len(), METRIC_BATCH_SIZE);
        assert_eq!(publisher.buffered_count(), 0);

        similar_asserts::assert_eq!(
            sink.outcomes(),
            vec![Outcome::Success {
                namespace: NAMESPACE.to_owned(),
                correlation_id: "request-1".to_owned(),
            }]
        );
    }

    #[tokio::test(start_paused = true)]
    async fn test_zero_interval_ships_every_metric() {
        let client = Arc::new(MockClient::new());
        let sink = Arc::new(CapturingSink::new());
        let publisher = publisher(0, &client, &sink);

        for i in 0..3 {
            publisher.append(record("m", i as f64)).await;
            assert_eq!(publisher.buffered_count(), 0);
        }

        let calls = client.calls();
        assert_eq!(calls.len(), 3);
        assert!(calls.iter().all(|call| call.records.len() == 1));
        assert_eq!(sink.outcomes().len(), 3);
    }

    #[tokio::test(start_paused = true)]
    async fn test_batches_ship_oldest_first() {
        let client = Arc::new(MockClient::new());
        let sink = Arc::new(CapturingSink::new());
        let publisher = publisher(20, &client, &sink);

        publisher.append(record("late", 300.0)).await;
        publisher.append(record("early", 100.0)).await;
        publisher.append(record("same-1", 200.0)).await;
        publisher.append(record("same-2", 200.0)).await;

        publisher.flush(DEFAULT_MAX_BATCHES_TO_UPLOAD).await;

        let calls = client.calls();
        let names: Vec<_> = calls[0].records.iter().map(|r| r.name()).collect();
        assert_eq!(names, ["early", "same-1", "same-2", "late"]);
    }

    #[tokio::test(start_paused = true)]
    async fn test_transient_failure_requeues() {
        let client = Arc::new(MockClient::new());
        client.respond(MockResponse::Err(PublishError::transient(
            "ConnectionError",
            "connection refused",
        )));
        let sink = Arc::new(CapturingSink::new());
        let publisher = publisher(20, &client, &sink);

        for i in 0..20 {
            publisher.append(record("m", i as f64)).await;
        }

        assert_eq!(client.call_count(), 1);
        assert_eq!(publisher.buffered_count(), 20);
        assert!(sink.outcomes().is_empty());

        // The next flush ships the very same records.
        let stats = publisher.flush(DEFAULT_MAX_BATCHES_TO_UPLOAD).await;
        assert_eq!(stats.sent, 20);

        let calls = client.calls();
        assert_eq!(calls[0].records, calls[1].records);
    }

    #[tokio::test(start_paused = true)]
    async fn test_permanent_failure_drops() {
        let client = Arc::new(MockClient::new());
        client.respond(MockResponse::Err(PublishError::permanent(
            "InvalidParameterValue",
            "value out of range",
        )));
        let sink = Arc::new(CapturingSink::new());
        let publisher = publisher(20, &client, &sink);

        for i in 0..25 {
            publisher.append(record("m", i as f64)).await;
        }

        // The first 20 were dropped on the failed call, the rest is still queued.
        assert_eq!(client.call_count(), 1);
        assert_eq!(publisher.buffered_count(), 5);
        assert_eq!(
            sink.outcomes(),
            vec![Outcome::Failure {
                namespace: Some(NAMESPACE.to_owned()),
                error_kind: "InvalidParameterValue".to_owned(),
                error_message: "value out of range".to_owned(),
            }]
        );
    }

    #[tokio::test(start_paused = true)]
    async fn test_timeout_is_transient() {
        let client = Arc::new(MockClient::new());
        client.respond(MockResponse::Hang);
        let sink = Arc::new(CapturingSink::new());
        let publisher = publisher(20, &client, &sink);

        for i in 0..20 {
            publisher.append(record("m", i as f64)).await;
        }

        assert_eq!(client.call_count(), 1);
        assert_eq!(publisher.buffered_count(), 20);
        assert!(sink.outcomes().is_empty());
    }

    #[tokio::test(start_paused = true)]
    async fn test_flush_respects_budget() {
        let client = Arc::new(MockClient::new());
        client.set_default(MockResponse::Err(PublishError::transient(
            "Throttling",
            "rate exceeded",
        )));
        let sink = Arc::new(CapturingSink::new());
        let publisher = publisher(20, &client, &sink);

        for i in 0..100 {
            publisher.append(record("m", i as f64)).await;
        }
        assert_eq!(publisher.buffered_count(), 100);

        client.set_default(MockResponse::Ok);
        client.clear_calls();

        let stats = publisher.flush(2).await;
        assert_eq!(
            stats,
            FlushStats {
                batches: 2,
                sent: 40,
                requeued: 0,
                dropped: 0,
            }
        );
        assert_eq!(client.call_count(), 2);
        assert_eq!(publisher.buffered_count(), 60);
        assert!(client.calls().iter().all(|c| c.records.len() <= METRIC_BATCH_SIZE));
    }

    #[tokio::test(start_paused = true)]
    async fn test_flush_empty_queue() {
        let client = Arc::new(MockClient::new());
        let sink = Arc::new(CapturingSink::new());
        let publisher = publisher(20, &client, &sink);

        let stats = publisher.flush(DEFAULT_MAX_BATCHES_TO_UPLOAD).await;
        assert_eq!(stats, FlushStats::default());
        assert_eq!(client.call_count(), 0);
    }

    #[test]
    fn test_dial_down_budget() {
        assert_eq!(DIAL_DOWN_QUEUE_SIZE, 1000);
        assert_eq!(submission_flush_budget(20), DEFAULT_MAX_BATCHES_TO_UPLOAD);
        assert_eq!(submission_flush_budget(1000), DEFAULT_MAX_BATCHES_TO_UPLOAD);
        assert_eq!(submission_flush_budget(1001), DIAL_DOWN_MAX_BATCHES);
    }

    #[tokio::test(start_paused = true)]
    async fn test_backed_up_queue_dials_down() {
        let client = Arc::new(MockClient::new());
        client.set_default(MockResponse::Err(PublishError::transient(
            "ServiceUnavailable",
            "try again later",
        )));
        let sink = Arc::new(CapturingSink::new());
        let publisher = publisher(100, &client, &sink);

        for i in 0..999 {
            publisher.append(record("m", i as f64)).await;
            client.clear_calls();
        }

        // At the threshold, a submission still gets the full budget.
        publisher.append(record("m", 999.0)).await;
        assert_eq!(publisher.buffered_count(), 1000);
        assert_eq!(client.call_count(), DEFAULT_MAX_BATCHES_TO_UPLOAD);
        client.clear_calls();

        publisher.append(record("m", 1000.0)).await;
        assert_eq!(publisher.buffered_count(), 1001);
        assert_eq!(client.call_count(), DIAL_DOWN_MAX_BATCHES);
        client.clear_calls();

        // The flush timer always uses the full budget.
        tokio::time::sleep(Duration::from_secs(101)).await;
        assert_eq!(client.call_count(), DEFAULT_MAX_BATCHES_TO_UPLOAD);
        assert_eq!(publisher.buffered_count(), 1001);
        assert!(sink.outcomes().is_empty());
    }

    #[tokio::test(start_paused = true)]
    async fn test_replace_evicts_oldest() {
        let client = Arc::new(MockClient::new());
        let sink = Arc::new(CapturingSink::new());
        let publisher = publisher(20, &client, &sink);

        publisher.append(record("a", 1.0)).await;
        publisher.append(record("b", 2.0)).await;
        publisher.replace(record("c", 3.0)).await;
        assert_eq!(publisher.buffered_count(), 2);

        publisher.flush(DEFAULT_MAX_BATCHES_TO_UPLOAD).await;
        let names: Vec<_> = client.calls()[0]
            .records
            .iter()
            .map(|r| r.name().to_owned())
            .collect();
        assert_eq!(names, ["b", "c"]);
    }

    #[tokio::test(start_paused = true)]
    async fn test_replace_on_empty_queue_drops() {
        let client = Arc::new(MockClient::new());
        let sink = Arc::new(CapturingSink::new());
        let publisher = publisher(0, &client, &sink);

        publisher.replace(record("a", 1.0)).await;

        assert_eq!(publisher.buffered_count(), 0);
        assert_eq!(client.call_count(), 0);
        assert!(sink.outcomes().is_empty());
    }

    #[tokio::test(start_paused = true)]
    async fn test_timer_flushes() {
        let client = Arc::new(MockClient::new());
        let sink = Arc::new(CapturingSink::new());
        let publisher = publisher(5, &client, &sink);

        for i in 0..3 {
            publisher.append(record("m", i as f64)).await;
        }

        tokio::time::sleep(Duration::from_secs(4)).await;
        assert_eq!(client.call_count(), 0);

        tokio::time::sleep(Duration::from_secs(2)).await;
        assert_eq!(client.call_count(), 1);
        assert_eq!(client.calls()[0].records.len(), 3);
        assert_eq!(publisher.buffered_count(), 0);

        // The timer keeps firing.
        publisher.append(record("m", 10.0)).await;
        tokio::time::sleep(Duration::from_secs(5)).await;
        assert_eq!(client.call_count(), 2);
    }

    #[tokio::test(start_paused = true)]
    async fn test_shutdown_stops_timer() {
        let client = Arc::new(MockClient::new());
        let sink = Arc::new(CapturingSink::new());
        let publisher = publisher(5, &client, &sink);

        publisher.append(record("m", 1.0)).await;
        publisher.shutdown();

        tokio::time::sleep(Duration::from_secs(30)).await;
        assert_eq!(client.call_count(), 0);
        assert_eq!(publisher.buffered_count(), 1);

        // Submissions still flush once a batch is full.
        for i in 0..19 {
            publisher.append(record("m", i as f64)).await;
        }
        assert_eq!(client.call_count(), 1);
    }

    #[tokio::test(start_paused = true)]
    async fn test_drop_stops_timer() {
        let client = Arc::new(MockClient::new());
        let sink = Arc::new(CapturingSink::new());
        let publisher = publisher(5, &client, &sink);

        publisher.append(record("m", 1.0)).await;
        drop(publisher);

        tokio::time::sleep(Duration::from_secs(30)).await;
        assert_eq!(client.call_count(), 0);
    }
}
