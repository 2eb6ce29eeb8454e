//! HTTP server setup.
//!
//! # Responsibilities
//! - Wrap the application router with request logging and tracing layers
//! - Serve with the peer address available to the middleware
//! - Shut down in order: stop accepting, drain in-flight requests, then
//!   close the logger

use std::future::Future;
use std::net::SocketAddr;
use std::sync::Arc;

use axum::{middleware, Router};
use tokio::net::TcpListener;
use tower_http::trace::TraceLayer;

use crate::config::schema::ServiceConfig;
use crate::http::middleware::{request_logging, RequestLogging};
use crate::observability::Logger;

/// HTTP server hosting an application router behind the logging pipeline.
pub struct HttpServer {
    router: Router,
    logging: Arc<RequestLogging>,
}

impl HttpServer {
    /// Wrap `app` (with its state already applied) in the logging layers.
    pub fn new(config: &ServiceConfig, logger: Logger, app: Router) -> Self {
        let logging = Arc::new(RequestLogging::new(
            logger,
            config.http.clone(),
            config.environment.is_production(),
            config.timeouts.request(),
        ));
        let router = Self::build_router(app, logging.clone());
        Self { router, logging }
    }

    fn build_router(app: Router, logging: Arc<RequestLogging>) -> Router {
        app.layer(middleware::from_fn_with_state(logging, request_logging))
            .layer(TraceLayer::new_for_http())
    }

    /// Middleware state, for applying reloaded logging options.
    pub fn request_logging(&self) -> Arc<RequestLogging> {
        self.logging.clone()
    }

    /// The fully layered router.
    pub fn router(&self) -> Router {
        self.router.clone()
    }

    /// Serve until `shutdown` resolves, then close the logger.
    pub async fn run<F>(self, listener: TcpListener, shutdown: F) -> std::io::Result<()>
    where
        F: Future<Output = ()> + Send + 'static,
    {
        let addr = listener.local_addr()?;
        tracing::info!(address = %addr, "HTTP server starting");

        let app = self.router.into_make_service_with_connect_info::<SocketAddr>();
        let served = axum::serve(listener, app)
            .with_graceful_shutdown(shutdown)
            .await;

        match &served {
            Ok(()) => tracing::info!("HTTP server stopped"),
            Err(e) => tracing::error!(error = %e, "HTTP server failed"),
        }

        self.logging.logger().close().await;
        served
    }
}
