//! HTTP client for the remote metrics ingestion service.

use std::time::{Duration, Instant};

use async_trait::async_trait;
use reqwest::StatusCode;
use reqwest::header::HeaderMap;
use serde::Serialize;
use serde_json::Value;
use sluice_metrics::{MetricRecord, MetricsClient, PublishError};
use sluice_statsd::metric;
use url::Url;

use crate::statsd::ServerTimers;

/// Header carrying the region the metrics are published to.
pub const REGION_HEADER: &str = "x-sluice-region";

/// Response headers that may carry the id of a request, in order of preference.
const REQUEST_ID_HEADERS: &[&str] = &["x-amzn-requestid", "x-request-id"];

/// The body of a single call.
#[derive(Serialize)]
#[serde(rename_all = "PascalCase")]
struct PutMetricDataBody<'a> {
    namespace: &'a str,
    metric_data: &'a [MetricRecord],
}

/// Publishes batches with `POST` requests to a fixed endpoint.
#[derive(Clone, Debug)]
pub struct UpstreamClient {
    client: reqwest::Client,
    endpoint: Url,
    region: Option<String>,
}

impl UpstreamClient {
    /// Creates a client for `endpoint`.
    ///
    /// Requests that take longer than `timeout` fail with a transient error. A zero timeout leaves
    /// requests unbounded.
    pub fn new(
        endpoint: Url,
        region: Option<String>,
        timeout: Duration,
    ) -> Result<Self, reqwest::Error> {
        let mut builder = reqwest::Client::builder();
        if !timeout.is_zero() {
            builder = builder.timeout(timeout);
        }

        Ok(Self {
            client: builder.build()?,
            endpoint,
            region,
        })
    }

    /// The endpoint batches are sent to.
    pub fn endpoint(&self) -> &Url {
        &self.endpoint
    }
}

#[async_trait]
impl MetricsClient for UpstreamClient {
    async fn put_metric_data(
        &self,
        namespace: &str,
        metrics: &[MetricRecord],
    ) -> Result<String, PublishError> {
        let start = Instant::now();
        let body = PutMetricDataBody {
            namespace,
            metric_data: metrics,
        };

        let mut request = self.client.post(self.endpoint.clone()).json(&body);
        if let Some(ref region) = self.region {
            request = request.header(REGION_HEADER, region);
        }

        let response = request.send().await.map_err(send_error)?;
        let status = response.status();
        let header_id = request_id_header(response.headers());
        let text = response.text().await.map_err(send_error)?;

        metric!(
            timer(ServerTimers::UpstreamRequestDuration) = start.elapsed(),
            status_code = status.as_str()
        );

        if !status.is_success() {
            return Err(status_error(status, &text));
        }

        Ok(header_id.unwrap_or_else(|| request_id_from_body(&text)))
    }
}

/// Classifies errors raised before a complete response was received.
fn send_error(error: reqwest::Error) -> PublishError {
    if error.is_timeout() {
        PublishError::transient("Timeout", error.to_string())
    } else if error.is_connect() {
        PublishError::transient("ConnectionError", error.to_string())
    } else if error.is_body() || error.is_decode() {
        PublishError::transient("ResponseError", error.to_string())
    } else {
        PublishError::permanent("RequestError", error.to_string())
    }
}

fn request_id_header(headers: &HeaderMap) -> Option<String> {
    REQUEST_ID_HEADERS
        .iter()
        .filter_map(|name| headers.get(*name))
        .find_map(|value| value.to_str().ok())
        .filter(|value| !value.is_empty())
        .map(str::to_owned)
}

/// Reads the request id from a JSON response, falling back to the raw body.
fn request_id_from_body(body: &str) -> String {
    let parsed = serde_json::from_str::<Value>(body).ok();
    let request_id = parsed.as_ref().and_then(|value| {
        value
            .get("RequestId")
            .or_else(|| value.pointer("/ResponseMetadata/RequestId"))
            .and_then(Value::as_str)
    });

    match request_id {
        Some(request_id) => request_id.to_owned(),
        None => body.trim().to_owned(),
    }
}

/// Turns an error response into a [`PublishError`].
///
/// Throttling and unavailability are transient, everything else is permanent. The error class is
/// taken from the response body if it names one.
fn status_error(status: StatusCode, body: &str) -> PublishError {
    let parsed = serde_json::from_str::<Value>(body).ok();
    let field = |pointers: &[&str]| {
        parsed.as_ref().and_then(|value| {
            pointers
                .iter()
                .find_map(|pointer| value.pointer(pointer).and_then(Value::as_str))
                .map(str::to_owned)
        })
    };

    let class = field(&["/Error/Code", "/__type", "/code"])
        .map(|class| match class.rsplit_once('#') {
            Some((_, class)) => class.to_owned(),
            None => class,
        })
        .unwrap_or_else(|| format!("Http{}", status.as_u16()));

    let message = field(&["/Error/Message", "/message", "/Message"]).unwrap_or_else(|| {
        match status.canonical_reason() {
            Some(reason) => format!("{} {reason}", status.as_u16()),
            None => status.as_str().to_owned(),
        }
    });

    match status {
        StatusCode::TOO_MANY_REQUESTS | StatusCode::SERVICE_UNAVAILABLE => {
            PublishError::transient(class, message)
        }
        _ => PublishError::permanent(class, message),
    }
}
