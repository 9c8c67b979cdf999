//! The Sluice server components.
//!
//! # Architecture
//!
//! The server wires the buffering engine of `sluice-metrics` to its surroundings:
//!
//! ```text
//!  POST /api/topics/{topic}
//!            |
//!            v
//!      +------------+   input topic   +--------+  on_record   +-------------------+
//!      | MessageBus | --------------> | Ingest | -----------> | NamespaceRegistry |
//!      +------------+                 +--------+              +-------------------+
//!            ^                            |                             |
//!            |         status topic       | rejected                    | batches
//!            |                            v                             v
//!            |                     +----------------+  outcomes  +----------------+
//!            +-------------------- | StatusProducer | <--------- | UpstreamClient |
//!                                  +----------------+            +----------------+
//! ```
//!
//! - The [`MessageBus`](bus::MessageBus) routes JSON messages between named topics. Local
//!   components publish submissions through the HTTP endpoint.
//! - The ingest service subscribes to the input topic, validates every submission and adds the
//!   `coreName` dimension before handing it to the registry. Submissions are handled on separate
//!   tasks, so a slow flush does not hold up the topic.
//! - The registry and its publishers ship batches through the [`UpstreamClient`](services::UpstreamClient)
//!   and report outcomes to the status producer.
//! - The status producer publishes every outcome to the status topic and optionally to an upstream
//!   relay.
//!
//! [`run`] boots all of this from a [`Config`] and blocks until the process is asked to stop.

#![warn(missing_docs)]

pub mod bus;
mod endpoints;
mod middlewares;
mod service;
pub mod services;
mod statsd;

use std::sync::Arc;

use sluice_config::Config;

pub use self::endpoints::ApiErrorResponse;
pub use self::service::*;
pub use self::services::ServerError;
use self::services::HttpServer;

/// Runs the sluice web server and all background services.
///
/// This blocks the current thread until a shutdown signal is received or a fatal error happens.
pub fn run(config: Config) -> Result<(), ServerError> {
    let runtime = tokio::runtime::Builder::new_multi_thread()
        .thread_name("sluice")
        .enable_all()
        .build()
        .map_err(ServerError::RuntimeFailed)?;

    runtime.block_on(async {
        let config = Arc::new(config);
        let state = ServiceState::start(config.clone())?;
        let server = HttpServer::bind(&config).await?;

        let result = server
            .serve(state.clone(), services::shutdown_signal())
            .await;

        state.shutdown();
        result
    })
}
