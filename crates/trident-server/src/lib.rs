//! HTTP server assembly for Trident

#![allow(clippy::must_use_candidate)]

mod auth;
mod health;

use std::net::SocketAddr;
use std::sync::Arc;

use axum::Router;
use trident_config::Config;
use trident_gateway::Gateway;
use tower_http::trace::TraceLayer;

/// Assembled server with all routes and middleware
pub struct Server {
    router: Router,
    listen_address: SocketAddr,
}

impl Server {
    /// Build the server from configuration
    pub fn new(config: &Config) -> Self {
        Self::with_gateway(config, Gateway::from_config(config))
    }

    /// Build the server around an already assembled gateway
    pub fn with_gateway(config: &Config, gateway: Gateway) -> Self {
        let listen_address = config
            .server
            .listen_address
            .unwrap_or_else(|| SocketAddr::from(([127, 0, 0, 1], 8045)));

        let mut app = trident_gateway::gateway_router(gateway);

        // Health check
        let mut public_paths = Vec::new();
        if config.server.health.enabled {
            app = app.route(&config.server.health.path, axum::routing::get(health::health_handler));
            public_paths.push(config.server.health.path.clone());
        }

        // Apply middleware layers (innermost first)
        app = app.layer(TraceLayer::new_for_http());

        // API key authentication
        if let Some(ref api_key) = config.server.api_key {
            let api_key = Arc::new(api_key.clone());
            let public_paths: Arc<[String]> = public_paths.into();
            app = app.layer(axum::middleware::from_fn(move |req, next| {
                let api_key = Arc::clone(&api_key);
                let public_paths = Arc::clone(&public_paths);
                async move { auth::auth_middleware(api_key, public_paths, req, next).await }
            }));
        }

        Self {
            router: app,
            listen_address,
        }
    }

    /// Get the configured listen address
    #[must_use]
    pub const fn listen_address(&self) -> SocketAddr {
        self.listen_address
    }

    /// Replace the listen address, e.g. from a command line override
    #[must_use]
    pub fn with_listen_address(mut self, listen_address: SocketAddr) -> Self {
        self.listen_address = listen_address;
        self
    }

    /// Consume the server and return the inner router
    ///
    /// Useful for testing when the caller manages the listener
    pub fn into_router(self) -> Router {
        self.router
    }

    /// Start serving requests
    ///
    /// Blocks until the cancellation token is triggered.
    ///
    /// # Errors
    ///
    /// Returns an error if binding the TCP listener or serving fails
    pub async fn serve(self, shutdown: tokio_util::sync::CancellationToken) -> anyhow::Result<()> {
        let listener = tokio::net::TcpListener::bind(self.listen_address).await?;
        let local_addr = listener.local_addr()?;
        tracing::info!(%local_addr, "server listening");

        axum::serve(listener, self.router)
            .with_graceful_shutdown(async move {
                shutdown.cancelled().await;
                tracing::info!("graceful shutdown initiated");
            })
            .await?;

        Ok(())
    }
}
