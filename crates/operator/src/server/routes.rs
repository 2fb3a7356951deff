use axum::{
    extract::State,
    response::{IntoResponse, Response},
    Json,
};
use http::{header, StatusCode};
use serde_json::json;
use std::sync::Arc;
use tracing::error;

use super::Server;
use crate::metrics::gather_metrics;

pub async fn health(State(server): State<Arc<Server>>) -> Json<serde_json::Value> {
    Json(json!({
        "status": "healthy",
        "scheduler": server.scheduler_name,
    }))
}

pub async fn metrics() -> Response {
    match gather_metrics() {
        Ok(body) => (
            [(header::CONTENT_TYPE, "text/plain; version=0.0.4")],
            body,
        )
            .into_response(),
        Err(e) => {
            error!("Failed to gather metrics: {}", e);
            StatusCode::INTERNAL_SERVER_ERROR.into_response()
        }
    }
}
