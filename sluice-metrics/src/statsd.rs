use sluice_statsd::{CounterMetric, GaugeMetric, HistogramMetric, TimerMetric};

/// Counter metrics for the buffering engine.
pub enum MetricCounters {
    /// Incremented for every metric appended to a namespace queue.
    ///
    /// This includes metrics that replaced an older metric.
    RecordInserted,

    /// Incremented every time the registry is over capacity and a new metric evicts the oldest
    /// metric of its namespace.
    RecordReplaced,

    /// Incremented every time the registry is over capacity and a new metric is dropped because
    /// its namespace has nothing to evict.
    RecordDropped,

    /// Incremented for every batch accepted by the remote service.
    BatchSent,

    /// Incremented for every batch put back into its queue after a transient failure.
    BatchRequeued,

    /// Incremented for every batch dropped after a permanent failure.
    BatchFailed,

    /// Incremented when a namespace is seen for the first time.
    PublisherCreated,
}

impl CounterMetric for MetricCounters {
    fn name(&self) -> &'static str {
        match *self {
            Self::RecordInserted => "metrics.records.inserted",
            Self::RecordReplaced => "metrics.records.replaced",
            Self::RecordDropped => "metrics.records.dropped",
            Self::BatchSent => "metrics.batches.sent",
            Self::BatchRequeued => "metrics.batches.requeued",
            Self::BatchFailed => "metrics.batches.failed",
            Self::PublisherCreated => "metrics.publishers.created",
        }
    }
}

/// Gauge metrics for the buffering engine.
pub enum MetricGauges {
    /// The number of metrics buffered in a namespace after a flush.
    ///
    /// Tagged by namespace.
    Buffered,
}

impl GaugeMetric for MetricGauges {
    fn name(&self) -> &'static str {
        match *self {
            Self::Buffered => "metrics.buffered",
        }
    }
}

/// Histogram metrics for the buffering engine.
pub enum MetricHistograms {
    /// The number of metrics in each batch handed to the remote service.
    BatchSize,
}

impl HistogramMetric for MetricHistograms {
    fn name(&self) -> &'static str {
        match *self {
            Self::BatchSize => "metrics.batches.size",
        }
    }
}

/// Timer metrics for the buffering engine.
pub enum MetricTimers {
    /// Time in milliseconds spent on a single flush, including all remote calls.
    FlushDuration,

    /// Time in milliseconds a single remote call takes.
    ///
    /// Tagged by `result`, one of `success`, `transient` or `permanent`.
    PutMetricData,
}

impl TimerMetric for MetricTimers {
    fn name(&self) -> &'static str {
        match *self {
            Self::FlushDuration => "metrics.flush.duration",
            Self::PutMetricData => "metrics.put_metric_data.duration",
        }
    }
}
