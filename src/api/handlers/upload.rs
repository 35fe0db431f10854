use crate::api::error::AppError;
use crate::entities::moderation_records;
use crate::models::UsageIntent;
use crate::services::moderation::UploadRequest;
use axum::{
    Json,
    extract::{Multipart, State},
};
use serde::Serialize;
use utoipa::ToSchema;

/// Record summary returned to the uploading site.
#[derive(Debug, Serialize, ToSchema)]
pub struct ModerationRecordResponse {
    pub id: String,
    pub tenant_id: String,
    pub usage_intent: String,
    pub verdict: String,
    pub combined_risk_score: f64,
    pub risk_level: String,
    pub human_review_required: bool,
    pub auto_blocked: bool,
    pub final_location: Option<String>,
    pub created_at: String,
}

impl From<moderation_records::Model> for ModerationRecordResponse {
    fn from(m: moderation_records::Model) -> Self {
        Self {
            id: m.id,
            tenant_id: m.tenant_id,
            usage_intent: m.usage_intent,
            verdict: m.verdict,
            combined_risk_score: m.combined_risk_score,
            risk_level: m.risk_level,
            human_review_required: m.human_review_required,
            auto_blocked: m.auto_blocked,
            final_location: m.final_location,
            created_at: m.created_at.to_rfc3339(),
        }
    }
}

#[utoipa::path(
    post,
    path = "/uploads",
    request_body(content = Vec<u8>, description = "Multipart form: file, tenant, usage_intent, context_type, optional batch_id for asynchronous analysis", content_type = "multipart/form-data"),
    responses(
        (status = 200, description = "Upload moderated", body = ModerationRecordResponse),
        (status = 400, description = "Validation failed"),
        (status = 413, description = "File or image too large")
    )
)]
pub async fn upload_handler(
    State(state): State<crate::AppState>,
    mut multipart: Multipart,
) -> Result<Json<ModerationRecordResponse>, AppError> {
    let mut filename = None;
    let mut bytes = None;
    let mut tenant = None;
    let mut usage_intent = None;
    let mut context_type = "portfolio_image".to_string();
    let mut batch_id = None;

    while let Some(field) = multipart
        .next_field()
        .await
        .map_err(|e| AppError::BadRequest(format!("Invalid multipart body: {}", e)))?
    {
        match field.name().unwrap_or_default() {
            "file" => {
                filename = field.file_name().map(|s| s.to_string());
                bytes = Some(
                    field
                        .bytes()
                        .await
                        .map_err(|e| AppError::BadRequest(format!("Failed to read file: {}", e)))?
                        .to_vec(),
                );
            }
            "tenant" => tenant = Some(read_text(field).await?),
            "usage_intent" => usage_intent = Some(read_text(field).await?),
            "context_type" => context_type = read_text(field).await?,
            "batch_id" => batch_id = Some(read_text(field).await?),
            other => {
                tracing::debug!("Ignoring unknown multipart field '{}'", other);
            }
        }
    }

    let filename = filename.ok_or_else(|| AppError::BadRequest("Missing file".to_string()))?;
    let bytes = bytes.ok_or_else(|| AppError::BadRequest("Missing file".to_string()))?;
    let tenant = tenant.ok_or_else(|| AppError::BadRequest("Missing tenant".to_string()))?;
    let usage_intent = usage_intent
        .as_deref()
        .and_then(UsageIntent::parse)
        .ok_or_else(|| {
            AppError::BadRequest(
                "usage_intent must be one of: public_site, paysite, private".to_string(),
            )
        })?;

    let request = UploadRequest {
        filename,
        bytes,
        tenant,
        usage_intent,
        context_type,
    };

    let record = match batch_id {
        Some(batch_id) => {
            state
                .moderation
                .process_upload_async(request, &batch_id)
                .await?
        }
        None => state.moderation.process_upload(request).await?,
    };

    Ok(Json(record.into()))
}

async fn read_text(field: axum::extract::multipart::Field<'_>) -> Result<String, AppError> {
    field
        .text()
        .await
        .map_err(|e| AppError::BadRequest(format!("Invalid multipart field: {}", e)))
}
