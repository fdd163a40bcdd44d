pub mod config;
pub mod plan;
pub mod pnl;
pub mod summary;
pub mod temperature;

use axum::Json;

use super::types::HealthResponse;

pub async fn health() -> Json<HealthResponse> {
    Json(HealthResponse { ok: true })
}
