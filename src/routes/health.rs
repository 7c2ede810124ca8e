use axum::{extract::State, response::Json};
use serde::Serialize;

use super::ApiResponse;
use crate::cache::CacheBackend;
use crate::state::AppState;

#[derive(Serialize)]
pub struct HealthStatus {
    pub status: &'static str,
    pub version: &'static str,
    /// Whether the shared cache answered a probe read
    pub cache: bool,
}

/// Liveness probe; degraded when the cache backend is unreachable
pub async fn health_check(State(state): State<AppState>) -> Json<ApiResponse<HealthStatus>> {
    let cache = match state.cache.get("health_probe").await {
        Ok(_) => true,
        Err(e) => {
            tracing::warn!("Cache backend unreachable: {}", e);
            false
        }
    };

    Json(ApiResponse::success(HealthStatus {
        status: if cache { "healthy" } else { "degraded" },
        version: env!("CARGO_PKG_VERSION"),
        cache,
    }))
}
