//! A simple health check endpoint for sluice.

use axum::Json;
use axum::extract::{Path, State};
use axum::http::StatusCode;
use axum::response::IntoResponse;
use serde::{Deserialize, Serialize};

use crate::service::ServiceState;

/// The kind of health check.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum IsHealthy {
    /// The process is up and serving requests.
    Live,
    /// The process accepts new metrics without evicting buffered ones.
    Ready,
}

#[derive(Serialize)]
struct Status {
    is_healthy: bool,
}

pub async fn handle(
    State(state): State<ServiceState>,
    Path(kind): Path<IsHealthy>,
) -> impl IntoResponse {
    let is_healthy = match kind {
        IsHealthy::Live => true,
        IsHealthy::Ready => !state.registry().is_over_capacity(),
    };

    let status = if is_healthy {
        StatusCode::OK
    } else {
        StatusCode::SERVICE_UNAVAILABLE
    };

    (status, Json(Status { is_healthy }))
}
