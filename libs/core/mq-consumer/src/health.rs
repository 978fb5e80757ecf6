//! Health check handlers for consumer processes
//!
//! This module provides reusable Axum handlers for:
//! - Liveness probes (`/health`, `/healthz`)
//! - Readiness probes (`/ready`, `/readyz`)
//! - Binding inspection (`/listeners`)
//! - Prometheus metrics (`/metrics`)

use axum::{
    Json,
    extract::State,
    http::{StatusCode, header},
    response::IntoResponse,
};
use serde::{Deserialize, Serialize};
use serde_json::{Value, json};
use std::sync::Arc;

use crate::metrics;
use crate::registry::ListenerRegistry;

/// Shared state for health endpoints.
#[derive(Clone)]
pub struct HealthState {
    /// Registry backing the readiness and binding endpoints.
    pub registry: Arc<ListenerRegistry>,
    /// Application name.
    pub app_name: String,
    /// Application version.
    pub app_version: String,
}

impl HealthState {
    /// Create a new health state.
    pub fn new(
        registry: Arc<ListenerRegistry>,
        app_name: impl Into<String>,
        app_version: impl Into<String>,
    ) -> Self {
        Self {
            registry,
            app_name: app_name.into(),
            app_version: app_version.into(),
        }
    }
}

/// Health response for liveness probes.
#[derive(Debug, Serialize, Deserialize)]
pub struct HealthResponse {
    /// Status (always "healthy" if responding).
    pub status: &'static str,
    /// Application name.
    pub name: String,
    /// Application version.
    pub version: String,
}

/// Liveness probe handler.
///
/// Always returns OK if the server is running.
pub async fn health_handler(State(state): State<HealthState>) -> Json<HealthResponse> {
    Json(HealthResponse {
        status: "healthy",
        name: state.app_name,
        version: state.app_version,
    })
}

/// Readiness probe handler.
///
/// Ready once at least one listener binding is running.
pub async fn ready_handler(
    State(state): State<HealthState>,
) -> Result<(StatusCode, Json<Value>), (StatusCode, Json<Value>)> {
    let count = state.registry.len().await;
    if count > 0 {
        Ok((
            StatusCode::OK,
            Json(json!({
                "status": "ready",
                "listeners": count
            })),
        ))
    } else {
        Err((
            StatusCode::SERVICE_UNAVAILABLE,
            Json(json!({
                "status": "not_ready",
                "listeners": 0
            })),
        ))
    }
}

/// Binding inspection handler.
///
/// Returns every registered binding with its topic, group, and mode.
pub async fn listeners_handler(State(state): State<HealthState>) -> Json<Value> {
    let bindings = state.registry.bindings().await;
    Json(json!({
        "count": bindings.len(),
        "listeners": bindings,
    }))
}

/// Prometheus metrics endpoint handler.
///
/// Returns metrics in Prometheus text format for scraping.
pub async fn metrics_handler() -> impl IntoResponse {
    match metrics::prometheus_handle() {
        Some(handle) => {
            let metrics_output = handle.render();
            (
                StatusCode::OK,
                [(header::CONTENT_TYPE, "text/plain; charset=utf-8")],
                metrics_output,
            )
                .into_response()
        }
        None => (
            StatusCode::SERVICE_UNAVAILABLE,
            [(header::CONTENT_TYPE, "text/plain; charset=utf-8")],
            "Metrics not initialized. Call metrics::init_metrics() at startup.".to_string(),
        )
            .into_response(),
    }
}

/// Create a standard health router.
///
/// This creates an Axum router with standard endpoints:
/// - `/health` - Liveness probe
/// - `/healthz` - Liveness probe (K8s style)
/// - `/ready` - Readiness probe
/// - `/readyz` - Readiness probe (K8s style)
/// - `/listeners` - Binding inspection
/// - `/metrics` - Prometheus metrics
pub fn health_router(state: HealthState) -> axum::Router {
    use axum::routing::get;

    axum::Router::new()
        .route("/health", get(health_handler))
        .route("/healthz", get(health_handler))
        .route("/ready", get(ready_handler))
        .route("/readyz", get(ready_handler))
        .route("/listeners", get(listeners_handler))
        .route("/metrics", get(metrics_handler))
        .with_state(state)
}
