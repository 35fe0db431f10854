use crate::api::error::AppError;
use crate::services::storage::StorageStatistics;
use axum::{Json, extract::State};

#[utoipa::path(
    get,
    path = "/stats",
    responses(
        (status = 200, description = "Storage statistics across tenants", body = StorageStatistics)
    )
)]
pub async fn stats_handler(
    State(state): State<crate::AppState>,
) -> Result<Json<StorageStatistics>, AppError> {
    let stats = state
        .storage
        .statistics()
        .await
        .map_err(|e| AppError::Internal(e.to_string()))?;
    Ok(Json(stats))
}
