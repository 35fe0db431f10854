use axum::{Json, extract::State};
use serde::Serialize;
use utoipa::ToSchema;

#[derive(Debug, Serialize, ToSchema)]
pub struct HealthResponse {
    pub status: &'static str,
    pub provider: &'static str,
    pub provider_reachable: bool,
}

#[utoipa::path(
    get,
    path = "/health",
    responses(
        (status = 200, description = "Service health", body = HealthResponse)
    )
)]
pub async fn health_handler(State(state): State<crate::AppState>) -> Json<HealthResponse> {
    let provider_reachable = state.provider.health_check().await.is_ok();
    Json(HealthResponse {
        status: "ok",
        provider: state.provider.name(),
        provider_reachable,
    })
}
