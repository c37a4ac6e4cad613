//! API route definitions.

use std::future::Future;
use std::net::SocketAddr;

use axum::{
    routing::{get, post},
    Router,
};
use tower_http::cors::{Any, CorsLayer};
use tower_http::trace::TraceLayer;

use super::handlers;
use super::state::ApiState;

/// Port the server listens on unless configured otherwise.
pub const DEFAULT_API_PORT: u16 = 23042;

/// Build the API router with all routes.
pub fn build_router(state: ApiState) -> Router {
    let mut router = Router::new()
        .route("/start/:kind", post(handlers::start_preset))
        .route("/stop", post(handlers::stop_instance))
        .route("/instances", get(handlers::list_instances))
        .route("/instances/:id", get(handlers::get_instance))
        .route("/presets", get(handlers::list_presets))
        .route("/health", get(handlers::health))
        .with_state(state);

    // Add CORS support
    router = router.layer(
        CorsLayer::new()
            .allow_origin(Any)
            .allow_methods(Any)
            .allow_headers(Any),
    );

    // Add request tracing
    router = router.layer(TraceLayer::new_for_http());

    router
}

/// Configuration for the API server.
#[derive(Debug, Clone)]
pub struct ApiServerConfig {
    /// Address to bind the server to.
    pub bind_addr: SocketAddr,
}

impl Default for ApiServerConfig {
    fn default() -> Self {
        Self {
            bind_addr: SocketAddr::from(([0, 0, 0, 0], DEFAULT_API_PORT)),
        }
    }
}

/// API server.
pub struct ApiServer {
    config: ApiServerConfig,
    state: ApiState,
}

impl ApiServer {
    /// Create a new API server.
    pub fn new(config: ApiServerConfig, state: ApiState) -> Self {
        Self { config, state }
    }

    /// Serve until `signal` resolves, then stop accepting connections and
    /// let in-flight requests finish.
    pub async fn serve_with_shutdown<F>(self, signal: F) -> Result<(), std::io::Error>
    where
        F: Future<Output = ()> + Send + 'static,
    {
        let router = build_router(self.state);
        let listener = tokio::net::TcpListener::bind(self.config.bind_addr).await?;

        tracing::info!(
            addr = %self.config.bind_addr,
            "Starting API server"
        );

        axum::serve(listener, router)
            .with_graceful_shutdown(signal)
            .await
    }
}
