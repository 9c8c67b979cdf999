//! Middlewares applied to all endpoints.

use axum::extract::{MatchedPath, Request};
use axum::middleware::Next;
use axum::response::Response;
use sluice_statsd::metric;

use crate::statsd::ServerCounters;

/// Counts requests by route and status code.
pub async fn metrics(request: Request, next: Next) -> Response {
    let route = request
        .extensions()
        .get::<MatchedPath>()
        .map(|path| path.as_str().to_owned());
    let method = request.method().clone();

    let response = next.run(request).await;

    sluice_log::trace!(
        method = method.as_str(),
        route = route.as_deref().unwrap_or("unknown"),
        status_code = response.status().as_u16(),
        "handled request"
    );
    metric!(
        counter(ServerCounters::Requests) += 1,
        route = route.as_deref().unwrap_or("unknown"),
        method = method.as_str(),
        status_code = response.status().as_str()
    );

    response
}
