use sluice_statsd::{CounterMetric, TimerMetric};

/// Counter metrics used by the server.
pub enum ServerCounters {
    /// Number of messages published to the message bus.
    ///
    /// This metric is tagged with:
    /// - `source`: `http` for messages received on the publish endpoint, `status` for status
    ///   messages.
    MessagePublished,

    /// Number of messages a subscriber missed because it fell behind.
    ///
    /// This metric is tagged with:
    /// - `topic`: the topic of the subscriber.
    MessageLagged,

    /// Number of submissions rejected by validation.
    RequestRejected,

    /// Number of submissions handed to the registry.
    RequestAccepted,

    /// Number of status messages that could not be forwarded to the upstream relay.
    StatusUpstreamFailed,

    /// Number of HTTP requests reaching the server, tagged by `route`.
    Requests,
}

impl CounterMetric for ServerCounters {
    fn name(&self) -> &'static str {
        match self {
            Self::MessagePublished => "bus.message.published",
            Self::MessageLagged => "bus.message.lagged",
            Self::RequestRejected => "ingest.request.rejected",
            Self::RequestAccepted => "ingest.request.accepted",
            Self::StatusUpstreamFailed => "status.upstream.failed",
            Self::Requests => "requests",
        }
    }
}

/// Timer metrics used by the server.
pub enum ServerTimers {
    /// Time in milliseconds spent handing a single submission to the registry.
    ///
    /// Includes flushes triggered by the submission.
    IngestDuration,

    /// Time in milliseconds a call to the remote ingestion service takes, from sending the request
    /// until the response body is read.
    UpstreamRequestDuration,
}

impl TimerMetric for ServerTimers {
    fn name(&self) -> &'static str {
        match self {
            Self::IngestDuration => "ingest.duration",
            Self::UpstreamRequestDuration => "upstream.request.duration",
        }
    }
}
