mod routes;

use axum::{routing::get, Router};
use std::net::SocketAddr;
use std::sync::Arc;
use tower_http::trace::TraceLayer;
use tracing::info;

use crate::{config::Config, Error, Result};

/// Serves the operator's health and metrics endpoints.
pub struct Server {
    addr: String,
    scheduler_name: String,
}

impl Server {
    pub fn new(config: &Config) -> Self {
        Self {
            addr: config.server.addr.clone(),
            scheduler_name: config.controller.scheduler_name.clone(),
        }
    }

    pub fn build_router(self) -> Router {
        let state = Arc::new(self);

        Router::new()
            .route("/health", get(routes::health))
            .route("/metrics", get(routes::metrics))
            .layer(TraceLayer::new_for_http())
            .with_state(state)
    }

    pub async fn start(self) -> Result<()> {
        let addr: SocketAddr = self
            .addr
            .parse()
            .map_err(|e| Error::Config(format!("invalid SERVER_ADDR \"{}\": {}", self.addr, e)))?;
        let app = self.build_router();

        let listener = tokio::net::TcpListener::bind(addr).await?;
        info!("Server listening on {}", addr);
        axum::serve(listener, app).await?;
        Ok(())
    }
}
