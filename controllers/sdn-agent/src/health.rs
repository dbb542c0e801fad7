//! Health and metrics HTTP endpoints.
//!
//! `/healthz` answers 200 once the agent leads and its watchers run, 503
//! before that. `/metrics` is the Prometheus text exposition.

use crate::error::ControllerError;
use crate::metrics::Metrics;
use axum::extract::State;
use axum::http::{StatusCode, header};
use axum::response::{IntoResponse, Response};
use axum::routing::get;
use axum::{Json, Router};
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};
use tokio::net::TcpListener;
use tracing::{error, info};

/// State shared by the HTTP handlers
#[derive(Debug, Clone)]
pub struct HealthState {
    pub metrics: Arc<Metrics>,
    pub ready: Arc<AtomicBool>,
}

impl HealthState {
    pub fn new(metrics: Arc<Metrics>) -> Self {
        Self {
            metrics,
            ready: Arc::new(AtomicBool::new(false)),
        }
    }

    pub fn set_ready(&self, ready: bool) {
        self.ready.store(ready, Ordering::SeqCst);
    }
}

pub fn router(state: HealthState) -> Router {
    Router::new()
        .route("/healthz", get(healthz))
        .route("/metrics", get(metrics))
        .with_state(state)
}

/// Serve the endpoints on all interfaces until the listener fails
pub async fn serve(port: u16, state: HealthState) -> Result<(), ControllerError> {
    let listener = TcpListener::bind(("0.0.0.0", port)).await.map_err(|e| {
        error!("Failed to bind health endpoint on port {}: {}", port, e);
        e
    })?;
    info!("Serving /healthz and /metrics on {}", listener.local_addr()?);
    axum::serve(listener, router(state)).await?;
    Ok(())
}

async fn healthz(State(state): State<HealthState>) -> Response {
    let ready = state.ready.load(Ordering::SeqCst);
    let body = Json(serde_json::json!({
        "status": if ready { "ready" } else { "starting" },
        "leader": state.metrics.leader.get() == 1,
    }));
    let status = if ready { StatusCode::OK } else { StatusCode::SERVICE_UNAVAILABLE };
    (status, body).into_response()
}

async fn metrics(State(state): State<HealthState>) -> Response {
    match state.metrics.encode() {
        Ok(text) => (
            StatusCode::OK,
            [(header::CONTENT_TYPE, "text/plain; version=0.0.4")],
            text,
        )
            .into_response(),
        Err(e) => {
            error!("Failed to encode metrics: {}", e);
            (StatusCode::INTERNAL_SERVER_ERROR, e.to_string()).into_response()
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_healthz_follows_readiness() {
        let state = HealthState::new(Arc::new(Metrics::new().unwrap()));

        let response = healthz(State(state.clone())).await;
        assert_eq!(response.status(), StatusCode::SERVICE_UNAVAILABLE);

        state.set_ready(true);
        let response = healthz(State(state)).await;
        assert_eq!(response.status(), StatusCode::OK);
    }

    #[tokio::test]
    async fn test_metrics_endpoint() {
        let state = HealthState::new(Arc::new(Metrics::new().unwrap()));
        state.metrics.addresses_released.inc();

        let response = metrics(State(state)).await;
        assert_eq!(response.status(), StatusCode::OK);
        assert_eq!(
            response.headers().get(header::CONTENT_TYPE).unwrap(),
            "text/plain; version=0.0.4"
        );
    }
}
