//! 健康路由
//!
//! 单独注册的健康检查端点，穿透探测后端

use crate::proxy::AppState;
use axum::Json;
use axum::extract::State;
use axum::http::StatusCode;
use serde::Serialize;
use tracing::error;

#[derive(Debug, Serialize)]
pub struct HealthResponse {
    pub status: &'static str,
    pub backend: &'static str,
}

/// 健康检查：探测后端健康地址，可达返回 200，否则 503
pub async fn health_check(
    State(state): State<AppState>,
) -> Result<Json<HealthResponse>, (StatusCode, &'static str)> {
    let response = state
        .http_client
        .get(&state.backend_healthcheck_url)
        .send()
        .await
        .map_err(|e| {
            error!(error = %e, "Backend health check failed");
            (StatusCode::SERVICE_UNAVAILABLE, "Backend unhealthy")
        })?;

    if response.status() != StatusCode::OK {
        error!(status = %response.status(), "Backend returned non-OK health status");
        return Err((StatusCode::SERVICE_UNAVAILABLE, "Backend unhealthy"));
    }

    Ok(Json(HealthResponse {
        status: "healthy",
        backend: "reachable",
    }))
}
