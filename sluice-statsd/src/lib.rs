//! A high-level StatsD metric client built on cadence.
//!
//! ## Defining Metrics
//!
//! In order to use metrics, one needs to first define one of the metric traits on a custom enum.
//! The following types of metrics are available: `counter`, `timer`, `gauge` and `histogram`.
//! For explanations on what that means see [Metric Types].
//!
//! The metric traits serve only to provide a type safe metric name. All metric types have exactly
//! the same form, they are different only to ensure that a metric can only be used for the type
//! for which it was defined, (e.g. a counter metric cannot be used as a timer metric).
//!
//! ## Initializing the Client
//!
//! Metrics can be used without initializing a statsd client. In that case, invoking `with_client`
//! or the [`metric!`] macro will become a noop. Only when configured, metrics will actually be
//! collected.
//!
//! To initialize the client, either use [`set_client`] to pass a custom client, or use [`init`]
//! to create a default client with known arguments:
//!
//! ```no_run
//! # use std::collections::BTreeMap;
//! # use sluice_statsd::MetricsClientConfig;
//!
//! sluice_statsd::init(MetricsClientConfig {
//!     prefix: "sluice",
//!     host: "localhost:8125",
//!     buffer_size: None,
//!     default_tags: BTreeMap::new(),
//! })
//! .ok();
//! ```
//!
//! ## Macro Usage
//!
//! The recommended way to record metrics is by using the [`metric!`] macro:
//!
//! ```
//! use sluice_statsd::{metric, CounterMetric};
//!
//! struct MyCounter;
//!
//! impl CounterMetric for MyCounter {
//!     fn name(&self) -> &'static str {
//!         "counter"
//!     }
//! }
//!
//! metric!(counter(MyCounter) += 1);
//! ```
//!
//! [Metric Types]: https://github.com/statsd/statsd/blob/master/docs/metric_types.md

use std::collections::BTreeMap;
use std::net::{ToSocketAddrs, UdpSocket};
use std::ops::Deref;
use std::sync::Arc;

use cadence::{
    BufferedUdpMetricSink, Metric, MetricBuilder, MetricError, QueuingMetricSink, StatsdClient,
};
use parking_lot::RwLock;

/// Maximum number of metric events that can be queued before we start dropping them.
const METRICS_MAX_QUEUE_SIZE: usize = 100_000;

/// Default size of the UDP send buffer, suited for typical MTUs.
const DEFAULT_BUFFER_SIZE: usize = 512;

/// Client configuration object to store globally.
#[derive(Debug)]
pub struct MetricsClient {
    /// The raw statsd client.
    pub statsd_client: StatsdClient,
    /// Default tags to apply to every metric.
    pub default_tags: BTreeMap<String, String>,
}

/// Client configuration used for initialization of [`MetricsClient`].
#[derive(Debug)]
pub struct MetricsClientConfig<'a, A> {
    /// Prefix which is prepended to all metric names.
    pub prefix: &'a str,
    /// Host of the metrics upstream.
    pub host: A,
    /// Size of the UDP buffer in bytes, defaults to 512.
    pub buffer_size: Option<usize>,
    /// Tags that are added to all metrics.
    pub default_tags: BTreeMap<String, String>,
}

impl Deref for MetricsClient {
    type Target = StatsdClient;

    fn deref(&self) -> &StatsdClient {
        &self.statsd_client
    }
}

impl MetricsClient {
    /// Send a metric with the default tags defined on this `MetricsClient`.
    #[inline(always)]
    pub fn send_metric<'a, T>(&'a self, mut metric: MetricBuilder<'a, '_, T>)
    where
        T: Metric + From<String>,
    {
        for (k, v) in &self.default_tags {
            metric = metric.with_tag(k, v);
        }

        if let Err(error) = metric.try_send() {
            sluice_log::error!(
                error = &error as &dyn std::error::Error,
                maximum_capacity = METRICS_MAX_QUEUE_SIZE,
                "error sending a metric",
            );
        }
    }
}

static METRICS_CLIENT: RwLock<Option<Arc<MetricsClient>>> = RwLock::new(None);

thread_local! {
    static CURRENT_CLIENT: std::cell::RefCell<Option<Arc<MetricsClient>>> =
        METRICS_CLIENT.read().clone().into();
}

/// Internal prelude for the macro
#[doc(hidden)]
pub mod _pred {
    pub use cadence::prelude::*;
}

/// The metrics prelude that is necessary to use the client.
pub mod prelude {
    pub use cadence::prelude::*;
}

/// Set a new statsd client.
pub fn set_client(client: MetricsClient) {
    *METRICS_CLIENT.write() = Some(Arc::new(client));
    CURRENT_CLIENT.with(|cell| cell.replace(METRICS_CLIENT.read().clone()));
}

/// Set a test client for the period of the called function (only affects the current thread).
///
/// Returns all metrics emitted on this thread while `f` ran, in their statsd line format.
#[cfg(any(test, feature = "test"))]
pub fn with_capturing_test_client(f: impl FnOnce()) -> Vec<String> {
    let (rx, sink) = cadence::SpyMetricSink::new();
    let test_client = MetricsClient {
        statsd_client: StatsdClient::from_sink("", sink),
        default_tags: Default::default(),
    };

    CURRENT_CLIENT.with(|cell| {
        let old_client = cell.replace(Some(Arc::new(test_client)));
        f();
        cell.replace(old_client);
    });

    rx.try_iter()
        .map(|x| String::from_utf8_lossy(&x).into_owned())
        .collect()
}

/// Disable the client again.
pub fn disable() {
    *METRICS_CLIENT.write() = None;
    CURRENT_CLIENT.with(|cell| cell.replace(None));
}

/// Tell the metrics system to report to statsd.
///
/// Metrics are buffered into UDP packets and sent from a background thread, so that emitting a
/// metric never blocks the caller.
pub fn init<A: ToSocketAddrs>(config: MetricsClientConfig<'_, A>) -> Result<(), MetricError> {
    let addrs: Vec<_> = config.host.to_socket_addrs()?.collect();
    let Some(addr) = addrs.first().copied() else {
        return Err(MetricError::from((
            cadence::ErrorKind::InvalidInput,
            "statsd host does not resolve to an address",
        )));
    };

    sluice_log::info!("reporting metrics to statsd at {addr}");

    let socket = UdpSocket::bind("0.0.0.0:0")?;
    socket.set_nonblocking(true)?;

    let buffer_size = config.buffer_size.unwrap_or(DEFAULT_BUFFER_SIZE);
    let udp_sink = BufferedUdpMetricSink::with_capacity(addr, socket, buffer_size)?;
    let queuing_sink = QueuingMetricSink::with_capacity(udp_sink, METRICS_MAX_QUEUE_SIZE);

    set_client(MetricsClient {
        statsd_client: StatsdClient::from_sink(config.prefix, queuing_sink),
        default_tags: config.default_tags,
    });

    Ok(())
}

/// Invoke a callback with the current statsd client.
///
/// If statsd is not configured the callback is not invoked. For the most part the [`metric!`]
/// macro should be used instead.
#[inline(always)]
pub fn with_client<F, R>(f: F) -> R
where
    F: FnOnce(&MetricsClient) -> R,
    R: Default,
{
    CURRENT_CLIENT.with(|client| {
        if let Some(client) = client.borrow().as_deref() {
            f(client)
        } else {
            R::default()
        }
    })
}

/// A metric for capturing timings.
///
/// Timings are a positive number of milliseconds between a start and end time. Examples include
/// the time it takes to flush a queue or the time a remote call takes to return.
///
/// ## Example
///
/// ```
/// use sluice_statsd::{metric, TimerMetric};
///
/// enum MyTimer {
///     ProcessA,
/// }
///
/// impl TimerMetric for MyTimer {
///     fn name(&self) -> &'static str {
///         match self {
///             Self::ProcessA => "process_a",
///         }
///     }
/// }
///
/// # fn process_a() {}
///
/// // measure time by explicitly setting a std::time::Duration
/// # use std::time::Instant;
/// let start_time = Instant::now();
/// process_a();
/// metric!(timer(MyTimer::ProcessA) = start_time.elapsed());
///
/// // measure time implicitly by enclosing a code block in a metric
/// metric!(timer(MyTimer::ProcessA), {
///     process_a();
/// });
/// ```
pub trait TimerMetric {
    /// Returns the timer metric name that will be sent to statsd.
    fn name(&self) -> &'static str;
}

/// A metric for capturing counters.
///
/// Counters are simple values incremented or decremented by a client. The rates at which these
/// events occur or average values will be determined by the server receiving them.
///
/// ## Example
///
/// ```
/// use sluice_statsd::{metric, CounterMetric};
///
/// enum MyCounter {
///     TotalRequests,
/// }
///
/// impl CounterMetric for MyCounter {
///     fn name(&self) -> &'static str {
///         match self {
///             Self::TotalRequests => "total_requests",
///         }
///     }
/// }
///
/// // add to the counter and provide tags
/// metric!(counter(MyCounter::TotalRequests) += 1, namespace = "ns");
///
/// // subtract from the counter
/// metric!(counter(MyCounter::TotalRequests) -= 1);
/// ```
pub trait CounterMetric {
    /// Returns the counter metric name that will be sent to statsd.
    fn name(&self) -> &'static str;
}

/// A metric for capturing histograms.
///
/// Histograms are values whose distribution is calculated by the server. The distribution
/// calculated for histograms is often similar to that of timers.
///
/// ## Example
///
/// ```
/// use sluice_statsd::{metric, HistogramMetric};
///
/// struct BatchSize;
///
/// impl HistogramMetric for BatchSize {
///     fn name(&self) -> &'static str {
///         "batch_size"
///     }
/// }
///
/// let batch = [1, 2, 3];
/// metric!(histogram(BatchSize) = batch.len() as u64);
/// ```
pub trait HistogramMetric {
    /// Returns the histogram metric name that will be sent to statsd.
    fn name(&self) -> &'static str;
}

/// A metric for capturing gauges.
///
/// Gauge values are an instantaneous measurement of a value determined by the client. They do not
/// change unless changed by the client.
///
/// ## Example
///
/// ```
/// use sluice_statsd::{metric, GaugeMetric};
///
/// struct QueueSize;
///
/// impl GaugeMetric for QueueSize {
///     fn name(&self) -> &'static str {
///         "queue_size"
///     }
/// }
///
/// # use std::collections::VecDeque;
/// let queue = VecDeque::new();
/// # let _hint: &VecDeque<()> = &queue;
///
/// metric!(gauge(QueueSize) = queue.len() as u64);
/// ```
pub trait GaugeMetric {
    /// Returns the gauge metric name that will be sent to statsd.
    fn name(&self) -> &'static str;
}

/// Emits a metric.
///
/// See [crate-level documentation](self) for examples.
#[macro_export]
macro_rules! metric {
    // counter increment
    (counter($id:expr) += $value:expr $(, $($k:ident).* = $v:expr)* $(,)?) => {
        match $value {
            value if value != 0 => {
                $crate::with_client(|client| {
                    use $crate::_pred::*;
                    client.send_metric(
                        client.count_with_tags(&$crate::CounterMetric::name(&$id), value)
                        $(.with_tag(stringify!($($k).*), $v))*
                    )
                })
            },
            _ => {},
        };
    };

    // counter decrement
    (counter($id:expr) -= $value:expr $(, $($k:ident).* = $v:expr)* $(,)?) => {
        match $value {
            value if value != 0 => {
                $crate::with_client(|client| {
                    use $crate::_pred::*;
                    client.send_metric(
                        client.count_with_tags(&$crate::CounterMetric::name(&$id), -value)
                            $(.with_tag(stringify!($($k).*), $v))*
                    )
                })
            },
            _ => {},
        };
    };

    // gauge set
    (gauge($id:expr) = $value:expr $(, $($k:ident).* = $v:expr)* $(,)?) => {
        $crate::with_client(|client| {
            use $crate::_pred::*;
            client.send_metric(
                client.gauge_with_tags(&$crate::GaugeMetric::name(&$id), $value)
                    $(.with_tag(stringify!($($k).*), $v))*
            )
        })
    };

    // histogram
    (histogram($id:expr) = $value:expr $(, $($k:ident).* = $v:expr)* $(,)?) => {
        $crate::with_client(|client| {
            use $crate::_pred::*;
            client.send_metric(
                client.histogram_with_tags(&$crate::HistogramMetric::name(&$id), $value)
                    $(.with_tag(stringify!($($k).*), $v))*
            )
        })
    };

    // timer value
    (timer($id:expr) = $value:expr $(, $($k:ident).* = $v:expr)* $(,)?) => {
        $crate::with_client(|client| {
            use $crate::_pred::*;
            client.send_metric(
                // Durations are reported in fractional milliseconds.
                client.distribution_with_tags(&$crate::TimerMetric::name(&$id), $value.as_nanos() as f64 / 1e6)
                    $(.with_tag(stringify!($($k).*), $v))*
            )
        })
    };

    // timed block
    (timer($id:expr), $($($k:ident).* = $v:expr,)* $block:block) => {{
        let now = std::time::Instant::now();
        let rv = {$block};
        $crate::metric!(timer($id) = now.elapsed() $(, $($k).* = $v)*);
        rv
    }};
}

#[cfg(test)]
mod tests {
    use std::time::Duration;

    use cadence::{NopMetricSink, StatsdClient};

    use crate::{
        CounterMetric, GaugeMetric, HistogramMetric, MetricsClient, TimerMetric, set_client,
        with_capturing_test_client, with_client,
    };

    enum TestGauges {
        Foo,
        Bar,
    }

    impl GaugeMetric for TestGauges {
        fn name(&self) -> &'static str {
            match self {
                Self::Foo => "foo",
                Self::Bar => "bar",
            }
        }
    }

    struct TestCounter;

    impl CounterMetric for TestCounter {
        fn name(&self) -> &'static str {
            "counter"
        }
    }

    struct TestHistogram;

    impl HistogramMetric for TestHistogram {
        fn name(&self) -> &'static str {
            "histogram"
        }
    }

    struct TestTimer;

    impl TimerMetric for TestTimer {
        fn name(&self) -> &'static str {
            "timer"
        }
    }

    #[test]
    fn test_capturing_client() {
        let captures = with_capturing_test_client(|| {
            metric!(
                gauge(TestGauges::Foo) = 123,
                namespace = "ns1",
                host = "host1"
            );
            metric!(
                gauge(TestGauges::Bar) = 456,
                namespace = "ns2",
                host = "host2"
            );
        });

        assert_eq!(
            captures,
            [
                "foo:123|g|#namespace:ns1,host:host1",
                "bar:456|g|#namespace:ns2,host:host2"
            ]
        )
    }

    #[test]
    fn current_client_is_global_client() {
        let client1 = with_client(|c| format!("{c:?}"));
        set_client(MetricsClient {
            statsd_client: StatsdClient::from_sink("", NopMetricSink),
            default_tags: Default::default(),
        });
        let client2 = with_client(|c| format!("{c:?}"));

        // After setting the global client, the current client must change:
        assert_ne!(client1, client2);
    }

    #[test]
    fn test_counter_skips_zero() {
        let captures = with_capturing_test_client(|| {
            metric!(counter(TestCounter) += 10, namespace = "ns");
            metric!(counter(TestCounter) += 0, namespace = "ns");
            metric!(counter(TestCounter) -= 5);
        });
        assert_eq!(captures, ["counter:10|c|#namespace:ns", "counter:-5|c"]);
    }

    #[test]
    fn test_histogram_tags_with_dots() {
        let captures = with_capturing_test_client(|| {
            metric!(histogram(TestHistogram) = 20u64, batch.kind = "full");
        });
        assert_eq!(captures, ["histogram:20|h|#batch.kind:full"]);
    }

    #[test]
    fn test_timer_millis() {
        let captures = with_capturing_test_client(|| {
            metric!(timer(TestTimer) = Duration::from_secs(100), namespace = "ns");
        });
        assert_eq!(captures, ["timer:100000|d|#namespace:ns"]);
    }

    #[test]
    fn test_timed_block() {
        let captures = with_capturing_test_client(|| {
            let value = metric!(timer(TestTimer), namespace = "ns", { 42 });
            assert_eq!(value, 42);
        });
        // just check the tags to not make this flaky
        assert!(captures[0].ends_with("|d|#namespace:ns"));
    }
}
