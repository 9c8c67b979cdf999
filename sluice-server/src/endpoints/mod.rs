//! Web server endpoints.
//!
//! Sluice exposes two groups of routes: the publish surface of the local message bus under
//! `/api/topics/` and the health checks under `/api/relay/`.

use axum::Router;
use axum::extract::DefaultBodyLimit;
use axum::routing::{get, post};
use sluice_config::Config;

use crate::service::ServiceState;

mod common;
mod health_check;
mod publish;

pub use self::common::ApiErrorResponse;

/// Builds the router with all endpoints.
pub fn routes(config: &Config) -> Router<ServiceState> {
    Router::new()
        .route("/api/relay/healthcheck/{kind}/", get(health_check::handle))
        .route("/api/topics/{*topic}", post(publish::handle))
        .layer(DefaultBodyLimit::max(config.max_api_payload_size()))
}
