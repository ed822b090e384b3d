//! Health check endpoint handlers.

use axum::{extract::State, Json};
use serde::Serialize;

use crate::app::AppState;

/// Health check response.
#[derive(Debug, Serialize)]
#[serde(rename_all = "snake_case")]
pub struct HealthResponse {
    pub status: String,
    pub version: String,
    pub catalog: CatalogHealth,
}

/// Registry state.
#[derive(Debug, Serialize)]
#[serde(rename_all = "snake_case")]
pub struct CatalogHealth {
    pub widgets: usize,
    pub categories: usize,
    pub feature_flags: usize,
    /// Dependencies that point at unregistered widgets or unmet versions.
    pub unresolved_dependencies: Vec<String>,
}

impl HealthResponse {
    fn new(catalog: CatalogHealth) -> Self {
        let status = if catalog.unresolved_dependencies.is_empty() {
            "healthy"
        } else {
            "degraded"
        };
        Self {
            status: status.to_string(),
            version: env!("CARGO_PKG_VERSION").to_string(),
            catalog,
        }
    }
}

/// Simple status response for liveness probes.
#[derive(Debug, Serialize)]
pub struct StatusResponse {
    pub status: String,
}

/// Full health check endpoint.
///
/// A catalog with dangling dependencies still serves traffic; it reports
/// `degraded` with the offending entries.
pub async fn health_check(State(state): State<AppState>) -> Json<HealthResponse> {
    let widgets = &state.widgets;
    Json(HealthResponse::new(CatalogHealth {
        widgets: widgets.registry().len(),
        categories: widgets.registry().categories().len(),
        feature_flags: widgets.flags().flags().len(),
        unresolved_dependencies: widgets.verify_catalog(),
    }))
}

/// Liveness probe endpoint.
///
/// Returns 200 OK if the process is running.
pub async fn live() -> Json<StatusResponse> {
    Json(StatusResponse {
        status: "alive".to_string(),
    })
}
