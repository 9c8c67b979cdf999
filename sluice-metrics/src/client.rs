use std::time::Duration;

use async_trait::async_trait;

use crate::record::MetricRecord;

/// Classifies a failed remote call.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub enum PublishErrorKind {
    /// The call may succeed when retried, for instance after a connection error or a timeout.
    ///
    /// The batch is put back into its queue.
    Transient,
    /// The call was rejected and will not succeed when retried.
    ///
    /// The batch is dropped and a failure outcome is reported.
    Permanent,
}

/// An error returned by a [`MetricsClient`].
#[derive(Clone, Debug, PartialEq, Eq, thiserror::Error)]
#[error("{class}: {message}")]
pub struct PublishError {
    kind: PublishErrorKind,
    class: String,
    message: String,
}

impl PublishError {
    /// Creates a new error.
    pub fn new(
        kind: PublishErrorKind,
        class: impl Into<String>,
        message: impl Into<String>,
    ) -> Self {
        Self {
            kind,
            class: class.into(),
            message: message.into(),
        }
    }

    /// Creates a retryable error.
    pub fn transient(class: impl Into<String>, message: impl Into<String>) -> Self {
        Self::new(PublishErrorKind::Transient, class, message)
    }

    /// Creates an error that drops the batch.
    pub fn permanent(class: impl Into<String>, message: impl Into<String>) -> Self {
        Self::new(PublishErrorKind::Permanent, class, message)
    }

    /// Creates the error for a call that did not complete within `timeout`.
    pub fn timeout(timeout: Duration) -> Self {
        Self::transient(
            "Timeout",
            format!("no response within {}ms", timeout.as_millis()),
        )
    }

    /// Returns whether the batch should be retried.
    pub fn kind(&self) -> PublishErrorKind {
        self.kind
    }

    /// Returns `true` for [`PublishErrorKind::Transient`] errors.
    pub fn is_transient(&self) -> bool {
        self.kind == PublishErrorKind::Transient
    }

    /// A short descriptor of the error, reported as `error` in status messages.
    pub fn class(&self) -> &str {
        &self.class
    }

    /// The human readable error, reported as `error_message` in status messages.
    pub fn message(&self) -> &str {
        &self.message
    }
}

/// The remote metrics ingestion service.
///
/// Implementations ship one batch of at most [`METRIC_BATCH_SIZE`](crate::METRIC_BATCH_SIZE)
/// records per call and return the correlation id assigned by the service.
#[async_trait]
pub trait MetricsClient: Send + Sync {
    /// Uploads `metrics` to `namespace`.
    async fn put_metric_data(
        &self,
        namespace: &str,
        metrics: &[MetricRecord],
    ) -> Result<String, PublishError>;
}
