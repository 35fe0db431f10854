use crate::api::error::AppError;
use crate::entities::review_queue_items;
use crate::models::Verdict;
use crate::services::queue::QueueDetail;
use axum::{
    Json,
    extract::{Path, Query, State},
};
use serde::{Deserialize, Serialize};
use utoipa::ToSchema;

#[derive(Debug, Deserialize)]
pub struct QueueListParams {
    pub status: Option<String>,
    pub tenant: Option<String>,
}

#[derive(Debug, Serialize, ToSchema)]
pub struct QueueItemResponse {
    pub id: String,
    pub moderation_record_id: String,
    pub tenant_id: String,
    pub priority: i32,
    pub queue_type: String,
    pub status: String,
    pub flagged_at: String,
    pub reviewed_at: Option<String>,
}

impl From<review_queue_items::Model> for QueueItemResponse {
    fn from(m: review_queue_items::Model) -> Self {
        Self {
            id: m.id,
            moderation_record_id: m.moderation_record_id,
            tenant_id: m.tenant_id,
            priority: m.priority,
            queue_type: m.queue_type,
            status: m.status,
            flagged_at: m.flagged_at.to_rfc3339(),
            reviewed_at: m.reviewed_at.map(|t| t.to_rfc3339()),
        }
    }
}

#[derive(Debug, Serialize, ToSchema)]
pub struct QueueDetailResponse {
    pub item: QueueItemResponse,
    pub verdict: String,
    pub usage_intent: String,
    pub combined_risk_score: f64,
    pub risk_level: String,
    pub policy_violations: serde_json::Value,
    pub raw_signals: serde_json::Value,
    pub original_path: String,
}

impl From<QueueDetail> for QueueDetailResponse {
    fn from(d: QueueDetail) -> Self {
        Self {
            item: d.item.into(),
            verdict: d.record.verdict,
            usage_intent: d.record.usage_intent,
            combined_risk_score: d.record.combined_risk_score,
            risk_level: d.record.risk_level,
            policy_violations: d.record.policy_violations,
            raw_signals: d.record.raw_signals,
            original_path: d.record.original_path,
        }
    }
}

#[derive(Debug, Deserialize, ToSchema)]
pub struct ResolveRequest {
    /// One of: approved, approved_blurred, rejected.
    pub verdict: String,
}

#[utoipa::path(
    get,
    path = "/queue",
    params(
        ("status" = Option<String>, Query, description = "Filter by item status"),
        ("tenant" = Option<String>, Query, description = "Filter by tenant")
    ),
    responses(
        (status = 200, description = "Queue items, highest priority first", body = Vec<QueueItemResponse>)
    )
)]
pub async fn list_queue_handler(
    State(state): State<crate::AppState>,
    Query(params): Query<QueueListParams>,
) -> Result<Json<Vec<QueueItemResponse>>, AppError> {
    let items = state
        .queue
        .list(params.status.as_deref(), params.tenant.as_deref())
        .await?;
    Ok(Json(items.into_iter().map(Into::into).collect()))
}

#[utoipa::path(
    get,
    path = "/queue/{item_id}",
    params(
        ("item_id" = String, Path, description = "Queue item ID")
    ),
    responses(
        (status = 200, description = "Queue item with its moderation record", body = QueueDetailResponse),
        (status = 404, description = "Unknown queue item")
    )
)]
pub async fn queue_detail_handler(
    State(state): State<crate::AppState>,
    Path(item_id): Path<String>,
) -> Result<Json<QueueDetailResponse>, AppError> {
    let detail = state.queue.detail(&item_id).await?;
    Ok(Json(detail.into()))
}

#[utoipa::path(
    put,
    path = "/queue/{item_id}",
    request_body = ResolveRequest,
    params(
        ("item_id" = String, Path, description = "Queue item ID")
    ),
    responses(
        (status = 200, description = "Item resolved", body = QueueDetailResponse),
        (status = 400, description = "Verdict not allowed for resolution"),
        (status = 404, description = "Unknown queue item"),
        (status = 409, description = "Item already resolved or record auto-blocked")
    )
)]
pub async fn resolve_queue_handler(
    State(state): State<crate::AppState>,
    Path(item_id): Path<String>,
    Json(request): Json<ResolveRequest>,
) -> Result<Json<QueueDetailResponse>, AppError> {
    let verdict = Verdict::parse(&request.verdict)
        .ok_or_else(|| AppError::BadRequest(format!("Unknown verdict '{}'", request.verdict)))?;
    let detail = state.queue.resolve(&item_id, verdict).await?;
    Ok(Json(detail.into()))
}
