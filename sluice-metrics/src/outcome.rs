use std::sync::Arc;

use serde::{Deserialize, Serialize};
use tokio::sync::mpsc;

/// The result of shipping a batch, or of rejecting a submission before it was buffered.
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum Outcome {
    /// A batch was accepted by the remote service.
    Success {
        /// The namespace of the batch.
        namespace: String,
        /// The id the remote service assigned to the call.
        correlation_id: String,
    },
    /// A batch was rejected permanently, or a submission failed validation.
    Failure {
        /// The namespace of the batch, absent for submissions that could not be parsed.
        namespace: Option<String>,
        /// A short descriptor of the error.
        error_kind: String,
        /// The human readable error.
        error_message: String,
    },
}

impl Outcome {
    /// Returns the namespace this outcome refers to.
    pub fn namespace(&self) -> Option<&str> {
        match self {
            Self::Success { namespace, .. } => Some(namespace),
            Self::Failure { namespace, .. } => namespace.as_deref(),
        }
    }

    /// Returns `true` if this is a [`Outcome::Success`].
    pub fn is_success(&self) -> bool {
        matches!(self, Self::Success { .. })
    }
}

/// Whether a [`StatusMessage`] reports success.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Status {
    /// The batch was accepted.
    Success,
    /// The batch or submission was rejected.
    Fail,
}

/// Body of a [`StatusMessage`].
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct StatusResponse {
    /// Success or failure.
    pub status: Status,
    /// The namespace of the batch.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub namespace: Option<String>,
    /// The correlation id of a successful call.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub cloudwatch_rid: Option<String>,
    /// The error descriptor of a failure.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
    /// The error message of a failure.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error_message: Option<String>,
}

/// The message published on the status topic for every [`Outcome`].
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct StatusMessage {
    /// The status details.
    pub response: StatusResponse,
    /// The request id. Submissions carry no id, so this is always empty.
    pub id: String,
}

impl From<Outcome> for StatusMessage {
    fn from(outcome: Outcome) -> Self {
        let response = match outcome {
            Outcome::Success {
                namespace,
                correlation_id,
            } => StatusResponse {
                status: Status::Success,
                namespace: Some(namespace),
                cloudwatch_rid: Some(correlation_id),
                error: None,
                error_message: None,
            },
            Outcome::Failure {
                namespace,
                error_kind,
                error_message,
            } => StatusResponse {
                status: Status::Fail,
                namespace,
                cloudwatch_rid: None,
                error: Some(error_kind),
                error_message: Some(error_message),
            },
        };

        Self {
            response,
            id: String::new(),
        }
    }
}

/// Receives outcomes of shipped batches.
///
/// Reporting is fire-and-forget and must not block.
pub trait OutcomeSink: Send + Sync {
    /// Reports a single outcome.
    fn report(&self, outcome: Outcome);
}

impl OutcomeSink for mpsc::UnboundedSender<Outcome> {
    fn report(&self, outcome: Outcome) {
        if self.send(outcome).is_err() {
            sluice_log::debug!("dropping outcome, status producer has shut down");
        }
    }
}

impl<T: OutcomeSink + ?Sized> OutcomeSink for Arc<T> {
    fn report(&self, outcome: Outcome) {
        (**self).report(outcome)
    }
}
