use crate::api::error::AppError;
use crate::models::CallbackDelivery;
use crate::services::callbacks::ReceiveOutcome;
use axum::{
    Json,
    extract::{Path, State},
};
use serde::Serialize;
use utoipa::ToSchema;

#[derive(Debug, Serialize, ToSchema)]
pub struct CallbackResponse {
    pub batch_id: String,
    pub outcome: ReceiveOutcome,
}

#[utoipa::path(
    post,
    path = "/callbacks/{batch_id}",
    request_body = CallbackDelivery,
    params(
        ("batch_id" = String, Path, description = "Batch the delivery belongs to")
    ),
    responses(
        (status = 200, description = "Delivery applied or replayed", body = CallbackResponse),
        (status = 404, description = "No pending callbacks for this batch"),
        (status = 409, description = "Batch already resolved as failed/timeout")
    )
)]
pub async fn callback_handler(
    State(state): State<crate::AppState>,
    Path(batch_id): Path<String>,
    Json(delivery): Json<CallbackDelivery>,
) -> Result<Json<CallbackResponse>, AppError> {
    let outcome = state.callbacks.receive(&batch_id, &delivery).await?;
    Ok(Json(CallbackResponse { batch_id, outcome }))
}
