//! Test doubles for the remote service and the outcome channel.

use std::collections::VecDeque;

use async_trait::async_trait;
use parking_lot::Mutex;

use crate::client::{MetricsClient, PublishError};
use crate::outcome::{Outcome, OutcomeSink};
use crate::record::MetricRecord;

/// A scripted response of the [`MockClient`].
#[derive(Clone, Debug)]
pub enum MockResponse {
    /// Accept the batch with a generated correlation id `request-{n}`.
    Ok,
    /// Fail with the given error.
    Err(PublishError),
    /// Never respond.
    Hang,
}

/// A single call received by the [`MockClient`].
#[derive(Clone, Debug)]
pub struct MockCall {
    /// The namespace passed to the call.
    pub namespace: String,
    /// The metrics passed to the call.
    pub records: Vec<MetricRecord>,
}

/// A [`MetricsClient`] that records every call and answers from a script.
///
/// Scripted responses are consumed in order. Once the script is exhausted, the default response
/// is used, which accepts every batch unless changed with [`set_default`](Self::set_default).
#[derive(Debug)]
pub struct MockClient {
    script: Mutex<VecDeque<MockResponse>>,
    default: Mutex<MockResponse>,
    calls: Mutex<Vec<MockCall>>,
    requests: Mutex<usize>,
}

impl MockClient {
    /// Creates a client that accepts every batch.
    pub fn new() -> Self {
        Self {
            script: Mutex::new(VecDeque::new()),
            default: Mutex::new(MockResponse::Ok),
            calls: Mutex::new(Vec::new()),
            requests: Mutex::new(0),
        }
    }

    /// Queues a response for the next call that has no scripted response yet.
    pub fn respond(&self, response: MockResponse) {
        self.script.lock().push_back(response);
    }

    /// Sets the response used once the script is exhausted.
    pub fn set_default(&self, response: MockResponse) {
        *self.default.lock() = response;
    }

    /// Returns all calls received so far.
    pub fn calls(&self) -> Vec<MockCall> {
        self.calls.lock().clone()
    }

    /// Returns the number of calls received so far.
    pub fn call_count(&self) -> usize {
        self.calls.lock().len()
    }

    /// Forgets all received calls.
    pub fn clear_calls(&self) {
        self.calls.lock().clear();
    }
}

impl Default for MockClient {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl MetricsClient for MockClient {
    async fn put_metric_data(
        &self,
        namespace: &str,
        metrics: &[MetricRecord],
    ) -> Result<String, PublishError> {
        self.calls.lock().push(MockCall {
            namespace: namespace.to_owned(),
            records: metrics.to_vec(),
        });

        let request = {
            let mut requests = self.requests.lock();
            *requests += 1;
            *requests
        };

        let response = self
            .script
            .lock()
            .pop_front()
            .unwrap_or_else(|| self.default.lock().clone());

        match response {
            MockResponse::Ok => Ok(format!("request-{request}")),
            MockResponse::Err(error) => Err(error),
            MockResponse::Hang => std::future::pending().await,
        }
    }
}

/// An [`OutcomeSink`] that keeps every outcome.
#[derive(Debug, Default)]
pub struct CapturingSink {
    outcomes: Mutex<Vec<Outcome>>,
}

impl CapturingSink {
    /// Creates an empty sink.
    pub fn new() -> Self {
        Self::default()
    }

    /// Returns all outcomes reported so far.
    pub fn outcomes(&self) -> Vec<Outcome> {
        self.outcomes.lock().clone()
    }
}

impl OutcomeSink for CapturingSink {
    fn report(&self, outcome: Outcome) {
        self.outcomes.lock().push(outcome);
    }
}
