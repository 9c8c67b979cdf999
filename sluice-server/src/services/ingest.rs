use std::sync::Arc;
use std::time::Instant;

use serde_json::Value;
use sluice_metrics::{Outcome, OutcomeSink, PutMetricRequest, RecordHandler};
use sluice_statsd::metric;
use tokio::sync::Semaphore;
use tokio::sync::broadcast::error::RecvError;
use tokio::task::{JoinHandle, JoinSet};

use crate::bus::MessageBus;
use crate::statsd::{ServerCounters, ServerTimers};

/// Name of the dimension identifying the device that submitted a metric.
pub const CORE_NAME_DIMENSION: &str = "coreName";

/// Maximum number of submissions handled at the same time.
pub const MAX_CONCURRENT_SUBMISSIONS: usize = 256;

/// Error class of the failure outcome reported for submissions skipped on the input topic.
pub const LAGGED_ERROR_KIND: &str = "IngestionLagged";

/// Feeds submissions from the input topic into a [`RecordHandler`].
///
/// Every submission is validated, tagged with the [`CORE_NAME_DIMENSION`] and handed over.
/// Submissions failing validation are reported as failure outcomes without a namespace.
///
/// Each submission is handled on its own task, so a slow flush never stops the topic from being
/// drained. Submissions the bus skipped anyway are reported as a single failure outcome.
pub struct IngestService {
    core_name: String,
    handler: Arc<dyn RecordHandler>,
    sink: Arc<dyn OutcomeSink>,
}

impl IngestService {
    /// Creates the service.
    pub fn new(
        core_name: impl Into<String>,
        handler: Arc<dyn RecordHandler>,
        sink: Arc<dyn OutcomeSink>,
    ) -> Self {
        Self {
            core_name: core_name.into(),
            handler,
            sink,
        }
    }

    /// Subscribes to `topic` and handles its messages on background tasks until the bus is gone
    /// or the task is aborted.
    ///
    /// Aborting the returned task also aborts all submissions still being handled.
    pub fn start(self, bus: &MessageBus, topic: &str) -> JoinHandle<()> {
        let mut rx = bus.subscribe(topic);
        let topic = topic.to_owned();
        sluice_log::info!(topic = topic.as_str(), "ingesting metrics");

        let permits = Arc::new(Semaphore::new(MAX_CONCURRENT_SUBMISSIONS));
        let service = Arc::new(self);

        tokio::spawn(async move {
            let mut pending = JoinSet::new();

            loop {
                let message = tokio::select! {
                    biased;

                    Some(_) = pending.join_next(), if !pending.is_empty() => continue,
                    message = rx.recv() => message,
                };

                match message {
                    Ok(message) => {
                        let Ok(permit) = permits.clone().acquire_owned().await else {
                            break;
                        };
                        let service = service.clone();
                        pending.spawn(async move {
                            service.handle(&message).await;
                            drop(permit);
                        });
                    }
                    Err(RecvError::Lagged(skipped)) => service.report_lagged(&topic, skipped),
                    Err(RecvError::Closed) => break,
                }
            }

            while pending.join_next().await.is_some() {}
        })
    }

    fn report_lagged(&self, topic: &str, skipped: u64) {
        sluice_log::warn!(topic, skipped, "ingestion fell behind, skipping messages");
        metric!(
            counter(ServerCounters::MessageLagged) += skipped as i64,
            topic = topic
        );
        self.sink.report(Outcome::Failure {
            namespace: None,
            error_kind: LAGGED_ERROR_KIND.to_owned(),
            error_message: format!("ingestion fell behind, {skipped} submissions were skipped"),
        });
    }

    /// Validates a single submission and hands it to the handler.
    pub async fn handle(&self, message: &Value) {
        let PutMetricRequest {
            namespace,
            mut record,
        } = match PutMetricRequest::parse(message) {
            Ok(request) => request,
            Err(error) => {
                sluice_log::debug!(
                    error = &error as &dyn std::error::Error,
                    "rejecting invalid submission"
                );
                metric!(counter(ServerCounters::RequestRejected) += 1);
                self.sink.report(Outcome::Failure {
                    namespace: None,
                    error_kind: error.class().to_owned(),
                    error_message: error.to_string(),
                });
                return;
            }
        };

        if record
            .add_dimension(CORE_NAME_DIMENSION, self.core_name.as_str())
            .is_err()
        {
            sluice_log::warn!(
                namespace = namespace.as_str(),
                metric = record.name(),
                "metric has no room for the {CORE_NAME_DIMENSION} dimension"
            );
        }

        metric!(counter(ServerCounters::RequestAccepted) += 1);
        let start = Instant::now();
        self.handler.on_record(&namespace, record).await;
        metric!(timer(ServerTimers::IngestDuration) = start.elapsed());
    }
}

#[cfg(test)]
mod tests {
    use std::time::Duration;

    use async_trait::async_trait;
    use parking_lot::Mutex;
    use serde_json::json;
    use sluice_metrics::MetricRecord;
    use sluice_metrics::testutils::CapturingSink;

    use super::*;

    #[derive(Default)]
    struct Handled(Mutex<Vec<(String, MetricRecord)>>);

    #[async_trait]
    impl RecordHandler for Handled {
        async fn on_record(&self, namespace: &str, record: MetricRecord) {
            self.0.lock().push((namespace.to_owned(), record));
        }
    }

    fn service() -> (IngestService, Arc<Handled>, Arc<CapturingSink>) {
        let handled = Arc::new(Handled::default());
        let sink = Arc::new(CapturingSink::new());
        let service = IngestService::new("thing-1", handled.clone(), sink.clone());
        (service, handled, sink)
    }

    #[tokio::test]
    async fn test_adds_core_name() {
        let (service, handled, sink) = service();

        service
            .handle(&json!({
                "request": {
                    "namespace": "edge",
                    "metricData": {
                        "metricName": "temperature",
                        "value": 21.5,
                        "timestamp": 1700000000,
                        "dimensions": [{"name": "room", "value": "kitchen"}]
                    }
                }
            }))
            .await;

        let handled = handled.0.lock();
        assert_eq!(handled.len(), 1);
        assert_eq!(handled[0].0, "edge");
        insta::assert_json_snapshot!(handled[0].1, @r#"
        {
          "MetricName": "temperature",
          "Value": 21.5,
          "Unit": "Count",
          "Timestamp": 1700000000.0,
          "Dimensions": [
            {
              "Name": "room",
              "Value": "kitchen"
            },
            {
              "Name": "coreName",
              "Value": "thing-1"
            }
          ]
        }
        "#);
        assert!(sink.outcomes().is_empty());
    }

    #[tokio::test]
    async fn test_full_dimensions_skip_core_name() {
        let (service, handled, _) = service();

        let dimensions: Vec<_> = (0..10)
            .map(|i| json!({"name": format!("d{i}"), "value": "v"}))
            .collect();
        service
            .handle(&json!({
                "request": {
                    "namespace": "edge",
                    "metricData": {"metricName": "m", "value": 1, "dimensions": dimensions}
                }
            }))
            .await;

        let handled = handled.0.lock();
        let record = &handled[0].1;
        assert_eq!(record.dimensions().len(), 10);
        assert!(
            record
                .dimensions()
                .iter()
                .all(|d| d.name != CORE_NAME_DIMENSION)
        );
    }

    #[tokio::test]
    async fn test_rejects_invalid_submission() {
        let (service, handled, sink) = service();

        service
            .handle(&json!({"request": {"namespace": "edge"}}))
            .await;

        assert!(handled.0.lock().is_empty());
        assert_eq!(
            sink.outcomes(),
            vec![Outcome::Failure {
                namespace: None,
                error_kind: "InvalidRequest".to_owned(),
                error_message: "mandatory field (metricData) is absent in the input".to_owned(),
            }]
        );
    }

    #[tokio::test]
    async fn test_consumes_topic() {
        let (service, handled, _) = service();
        let bus = MessageBus::new(16);
        let task = service.start(&bus, "in");

        let message = json!({
            "request": {"namespace": "edge", "metricData": {"metricName": "m", "value": 1}}
        });
        assert_eq!(bus.publish("in", message), 1);

        for _ in 0..100 {
            if !handled.0.lock().is_empty() {
                break;
            }
            tokio::time::sleep(Duration::from_millis(10)).await;
        }

        assert_eq!(handled.0.lock().len(), 1);
        task.abort();
    }

    /// Records every submission, then never completes.
    #[derive(Default)]
    struct Stalled(Mutex<Vec<String>>);

    #[async_trait]
    impl RecordHandler for Stalled {
        async fn on_record(&self, namespace: &str, _record: MetricRecord) {
            self.0.lock().push(namespace.to_owned());
            std::future::pending::<()>().await;
        }
    }

    fn submission(namespace: &str) -> Value {
        json!({
            "request": {"namespace": namespace, "metricData": {"metricName": "m", "value": 1}}
        })
    }

    #[tokio::test]
    async fn test_slow_handler_keeps_draining() {
        let stalled = Arc::new(Stalled::default());
        let sink = Arc::new(CapturingSink::new());
        let bus = MessageBus::new(4);
        let task = IngestService::new("thing-1", stalled.clone(), sink.clone()).start(&bus, "in");

        for i in 0..10 {
            bus.publish("in", submission(&format!("ns{i}")));

            for _ in 0..100 {
                if stalled.0.lock().len() > i {
                    break;
                }
                tokio::time::sleep(Duration::from_millis(10)).await;
            }
        }

        assert_eq!(stalled.0.lock().len(), 10);
        assert!(sink.outcomes().is_empty());
        task.abort();
    }

    #[tokio::test]
    async fn test_reports_skipped_submissions() {
        let (service, handled, sink) = service();
        let bus = MessageBus::new(2);
        let task = service.start(&bus, "in");

        // The service task has not run yet, so all but the last two messages are skipped.
        for i in 0..10 {
            bus.publish("in", submission(&format!("ns{i}")));
        }

        for _ in 0..100 {
            if handled.0.lock().len() == 2 {
                break;
            }
            tokio::time::sleep(Duration::from_millis(10)).await;
        }

        let namespaces: Vec<_> = handled.0.lock().iter().map(|(ns, _)| ns.clone()).collect();
        assert_eq!(namespaces.len(), 2);
        assert!(namespaces.contains(&"ns8".to_owned()));
        assert!(namespaces.contains(&"ns9".to_owned()));
        assert_eq!(
            sink.outcomes(),
            vec![Outcome::Failure {
                namespace: None,
                error_kind: LAGGED_ERROR_KIND.to_owned(),
                error_message: "ingestion fell behind, 8 submissions were skipped".to_owned(),
            }]
        );
        task.abort();
    }
}
