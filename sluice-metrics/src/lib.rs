//! Buffering and batched publishing of metrics.
//!
//! Metrics enter through the [`NamespaceRegistry`], which keeps one [`BatchPublisher`] per
//! namespace. Every publisher holds a time-ordered queue of [`MetricRecord`]s and ships them to a
//! [`MetricsClient`] in batches of [`METRIC_BATCH_SIZE`], either as soon as a full batch is
//! available or when its flush timer fires. The result of every shipped batch is reported to an
//! [`OutcomeSink`].
//!
//! The total number of buffered metrics is bounded. Once the registry holds more metrics than its
//! capacity, every new metric replaces the oldest metric of its namespace instead of growing the
//! buffer:
//!
//! ```ignore
//! let registry = NamespaceRegistry::new(config, client, sink);
//! registry.submit("edge/temperature", record).await;
//! ```
//!
//! Failed remote calls are classified through [`PublishErrorKind`]. Transient failures put the
//! batch back into the queue, permanent failures drop it and report an [`Outcome::Failure`].

#![warn(missing_docs)]

mod client;
mod outcome;
mod protocol;
mod publisher;
mod queue;
mod record;
mod registry;
mod statsd;

#[cfg(any(test, feature = "test"))]
pub mod testutils;

pub use self::client::*;
pub use self::outcome::*;
pub use self::protocol::*;
pub use self::publisher::*;
pub use self::queue::*;
pub use self::record::*;
pub use self::registry::*;
