use std::future::{Future, IntoFuture};
use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Duration;

use sluice_config::Config;
use tokio::net::TcpListener;
use tokio::sync::Notify;

use crate::endpoints;
use crate::middlewares;
use crate::service::{ServiceError, ServiceState};

/// Indicates the type of failure of the server.
#[allow(clippy::enum_variant_names)]
#[derive(Debug, thiserror::Error)]
pub enum ServerError {
    /// Binding failed.
    #[error("bind to interface failed")]
    BindFailed(#[source] std::io::Error),

    /// The async runtime could not be started.
    #[error("could not start the runtime")]
    RuntimeFailed(#[source] std::io::Error),

    /// Serving connections failed.
    #[error("server failed")]
    ServeFailed(#[source] std::io::Error),

    /// A background service could not be started.
    #[error("could not start services")]
    ServiceFailed(#[from] ServiceError),
}

/// Builds the axum application with all routes and middleware.
fn make_app(state: ServiceState) -> axum::Router {
    endpoints::routes(state.config())
        .layer(axum::middleware::from_fn(middlewares::metrics))
        .with_state(state)
}

/// HTTP server hosting the publish and health check endpoints.
pub struct HttpServer {
    listener: TcpListener,
    shutdown_timeout: Duration,
}

impl HttpServer {
    /// Binds to the listen address of the config.
    pub async fn bind(config: &Config) -> Result<Self, ServerError> {
        let listener = TcpListener::bind(config.listen_addr())
            .await
            .map_err(ServerError::BindFailed)?;

        Ok(Self {
            listener,
            shutdown_timeout: config.shutdown_timeout(),
        })
    }

    /// The address the server listens on.
    pub fn local_addr(&self) -> Result<SocketAddr, ServerError> {
        self.listener.local_addr().map_err(ServerError::BindFailed)
    }

    /// Serves requests until `shutdown` resolves.
    ///
    /// Requests in flight when `shutdown` resolves get the configured shutdown timeout to
    /// complete.
    pub async fn serve(
        self,
        state: ServiceState,
        shutdown: impl Future<Output = ()>,
    ) -> Result<(), ServerError> {
        if let Ok(addr) = self.listener.local_addr() {
            sluice_log::info!("spawning http server");
            sluice_log::info!("  listening on http://{addr}/");
        }

        let notify = Arc::new(Notify::new());
        let graceful = {
            let notify = notify.clone();
            async move { notify.notified().await }
        };

        let server = axum::serve(self.listener, make_app(state))
            .with_graceful_shutdown(graceful)
            .into_future();
        tokio::pin!(server);

        tokio::select! {
            result = &mut server => return result.map_err(ServerError::ServeFailed),
            () = shutdown => {}
        }

        sluice_log::info!("shutting down HTTP server");
        notify.notify_one();

        match tokio::time::timeout(self.shutdown_timeout, server).await {
            Ok(result) => result.map_err(ServerError::ServeFailed),
            Err(_) => {
                sluice_log::warn!("pending requests did not complete before the shutdown timeout");
                Ok(())
            }
        }
    }
}

/// Resolves when the process receives `SIGINT` or `SIGTERM`.
pub async fn shutdown_signal() {
    let ctrl_c = async {
        if let Err(error) = tokio::signal::ctrl_c().await {
            sluice_log::error!(
                error = &error as &dyn std::error::Error,
                "failed to listen for ctrl-c"
            );
            std::future::pending::<()>().await;
        }
    };

    #[cfg(unix)]
    let terminate = async {
        use tokio::signal::unix::{SignalKind, signal};

        match signal(SignalKind::terminate()) {
            Ok(mut signal) => {
                signal.recv().await;
            }
            Err(error) => {
                sluice_log::error!(
                    error = &error as &dyn std::error::Error,
                    "failed to listen for SIGTERM"
                );
                std::future::pending::<()>().await;
            }
        }
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        () = ctrl_c => {},
        () = terminate => {},
    }
}
