//! Publishes messages to the local message bus.

use axum::Json;
use axum::body::Bytes;
use axum::extract::{Path, State};
use axum::response::IntoResponse;
use serde::Serialize;
use sluice_statsd::metric;

use crate::endpoints::common::BadPublishRequest;
use crate::service::ServiceState;
use crate::statsd::ServerCounters;

#[derive(Serialize)]
struct PublishResponse {
    receivers: usize,
}

pub async fn handle(
    State(state): State<ServiceState>,
    Path(topic): Path<String>,
    body: Bytes,
) -> Result<impl IntoResponse, BadPublishRequest> {
    if topic.split('/').any(str::is_empty) {
        return Err(BadPublishRequest::InvalidTopic(topic));
    }

    let message = serde_json::from_slice(&body).map_err(BadPublishRequest::InvalidJson)?;
    let receivers = state.bus().publish(&topic, message);
    metric!(
        counter(ServerCounters::MessagePublished) += 1,
        source = "http"
    );

    Ok(Json(PublishResponse { receivers }))
}
