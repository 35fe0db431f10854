use crate::config::ModerationConfig;
use crate::entities::{media_library, moderation_records, prelude::*, review_queue_items};
use crate::models::{AnalysisSignals, RiskLevel, UsageIntent, Verdict};
use crate::services::callbacks::CallbackService;
use crate::services::policy::{PolicyDecision, PolicyEngine};
use crate::services::provider::{AnalysisProvider, BatchItem, ProviderError};
use crate::services::storage::{Category, StorageError, StorageManager};
use crate::utils::validation::{self, ValidationError};
use chrono::Utc;
use sea_orm::{
    ActiveModelTrait, ColumnTrait, DatabaseConnection, DbErr, EntityTrait, QueryFilter, Set,
};
use std::path::Path;
use std::sync::Arc;
use thiserror::Error;
use tokio::sync::Semaphore;
use uuid::Uuid;

#[derive(Debug, Error)]
pub enum ModerationError {
    #[error(transparent)]
    Validation(#[from] ValidationError),

    #[error(transparent)]
    Storage(#[from] StorageError),

    #[error(transparent)]
    Provider(#[from] ProviderError),

    #[error("database error: {0}")]
    Persistence(#[from] DbErr),
}

/// One upload entering the pipeline.
#[derive(Debug, Clone)]
pub struct UploadRequest {
    pub filename: String,
    pub bytes: Vec<u8>,
    pub tenant: String,
    pub usage_intent: UsageIntent,
    pub context_type: String,
}

/// Drives an upload through validation, staging, analysis, policy evaluation,
/// persistence and final placement. Produces exactly one moderation record
/// per accepted upload, terminal verdict included, even when the provider
/// fails.
pub struct ModerationService {
    db: DatabaseConnection,
    config: ModerationConfig,
    storage: Arc<StorageManager>,
    provider: Arc<dyn AnalysisProvider>,
    policy: PolicyEngine,
    callbacks: Arc<CallbackService>,
    analysis_permits: Arc<Semaphore>,
}

impl ModerationService {
    pub fn new(
        db: DatabaseConnection,
        config: ModerationConfig,
        storage: Arc<StorageManager>,
        provider: Arc<dyn AnalysisProvider>,
        callbacks: Arc<CallbackService>,
    ) -> Self {
        let analysis_permits = Arc::new(Semaphore::new(config.max_concurrent_analyses));
        let policy = PolicyEngine::new(config.policy.clone());
        Self {
            db,
            config,
            storage,
            provider,
            policy,
            callbacks,
            analysis_permits,
        }
    }

    /// Synchronous pipeline: the caller gets back the persisted record with a
    /// terminal verdict. Provider exhaustion is not an `Err`: it becomes an
    /// `error` verdict with a mandatory review item.
    pub async fn process_upload(
        &self,
        request: UploadRequest,
    ) -> Result<moderation_records::Model, ModerationError> {
        // Steps 1-2 fail fast: nothing persisted, nothing left on disk
        // outside temp, so the client can simply retry.
        let _validated = validation::validate_upload(&request.filename, &request.bytes, &self.config)?;

        let temp_path = self
            .storage
            .stage_temp(&request.tenant, &request.filename, &request.bytes)
            .await?;
        let staged_name = file_name_of(&temp_path);

        let original_path = self
            .storage
            .relocate(&temp_path, &request.tenant, &staged_name, Category::Originals)
            .await?;

        let analysis = self.analyze_with_retries(&staged_name, &request.bytes).await;

        let (signals, decision) = match analysis {
            Ok(signals) => {
                let decision = self.policy.evaluate(&signals, request.usage_intent);
                (signals, decision)
            }
            Err(e) => {
                tracing::error!(
                    tenant = %request.tenant,
                    file = %staged_name,
                    "Analysis failed after retries: {}",
                    e
                );
                (AnalysisSignals::default(), error_decision(&e))
            }
        };

        let record_id = Uuid::new_v4().to_string();
        let mut record = self
            .persist_record(&record_id, &request, &original_path, &signals, &decision)
            .await?;

        if decision.human_review_required {
            self.upsert_queue_item(&record, &decision).await?;
        }

        // Placement failures after persistence are not fatal: the record and
        // the original are durable, the cleanup cycle picks up strays.
        match self
            .finalize_placement(&request, &original_path, &staged_name, decision.verdict)
            .await
        {
            Ok((final_location, media_path)) => {
                record = self
                    .record_final_state(record, final_location, media_path, &decision)
                    .await?;
            }
            Err(e) => {
                tracing::error!(
                    record_id = %record.id,
                    "Final placement failed, record kept with verdict {}: {}",
                    decision.verdict,
                    e
                );
                self.create_media_row(&record, record.original_path.clone(), &decision)
                    .await?;
            }
        }

        tracing::info!(
            record_id = %record.id,
            tenant = %request.tenant,
            verdict = %decision.verdict,
            risk = decision.combined_risk_score,
            "Moderation completed"
        );

        Ok(record)
    }

    /// Asynchronous pipeline: stages the upload, persists a `pending` record
    /// and registers a callback slot, then hands the image to the provider as
    /// a batch item. The verdict arrives later on the callback endpoint.
    pub async fn process_upload_async(
        &self,
        request: UploadRequest,
        batch_id: &str,
    ) -> Result<moderation_records::Model, ModerationError> {
        let _validated = validation::validate_upload(&request.filename, &request.bytes, &self.config)?;

        let temp_path = self
            .storage
            .stage_temp(&request.tenant, &request.filename, &request.bytes)
            .await?;
        let staged_name = file_name_of(&temp_path);

        let original_path = self
            .storage
            .relocate(&temp_path, &request.tenant, &staged_name, Category::Originals)
            .await?;

        let record_id = Uuid::new_v4().to_string();
        let pending = pending_decision();
        let record = self
            .persist_record(
                &record_id,
                &request,
                &original_path,
                &AnalysisSignals::default(),
                &pending,
            )
            .await?;

        let media = self
            .create_media_row(&record, record.original_path.clone(), &pending)
            .await?;

        self.callbacks
            .register_pending(&media.id, batch_id, &request.tenant)
            .await
            .map_err(|e| ModerationError::Persistence(DbErr::Custom(e.to_string())))?;

        // The record, media row and callback slot are durable at this point.
        // A failed submission is not surfaced to the uploader: the sweep
        // re-issues the batch once the retry deadline elapses.
        if let Err(e) = self
            .provider
            .submit_batch(
                batch_id,
                &[BatchItem {
                    media_id: media.id.clone(),
                    image_url: record.original_path.clone(),
                }],
            )
            .await
        {
            tracing::warn!(
                record_id = %record.id,
                batch_id = %batch_id,
                "Initial batch submission failed, sweep will re-issue: {}",
                e
            );
        }

        tracing::info!(
            record_id = %record.id,
            batch_id = %batch_id,
            "Upload staged for asynchronous analysis"
        );

        Ok(record)
    }

    /// Provider call under a concurrency permit, with a hard per-call timeout
    /// and exponential backoff between retryable failures.
    async fn analyze_with_retries(
        &self,
        filename: &str,
        bytes: &[u8],
    ) -> Result<AnalysisSignals, ProviderError> {
        let _permit = self
            .analysis_permits
            .clone()
            .acquire_owned()
            .await
            .map_err(|_| ProviderError::Unavailable("analysis permits closed".to_string()))?;

        let timeout = self.config.provider_timeout();
        let attempts = self.config.provider_max_retries.max(1);
        let mut last_error = None;

        for attempt in 0..attempts {
            if attempt > 0 {
                let backoff = std::time::Duration::from_millis(
                    self.config.provider_backoff_base_ms << (attempt - 1).min(10),
                );
                tokio::time::sleep(backoff).await;
            }

            let call = self.provider.analyze(filename, bytes, "portfolio_image");
            let result = match tokio::time::timeout(timeout, call).await {
                Ok(result) => result,
                Err(_) => Err(ProviderError::Timeout(timeout)),
            };

            match result {
                Ok(signals) => return Ok(signals),
                Err(e) if e.is_retryable() && attempt + 1 < attempts => {
                    tracing::warn!(
                        "Analysis attempt {}/{} failed, retrying: {}",
                        attempt + 1,
                        attempts,
                        e
                    );
                    last_error = Some(e);
                }
                Err(e) => return Err(e),
            }
        }

        Err(last_error
            .unwrap_or_else(|| ProviderError::Unavailable("no attempts made".to_string())))
    }

    async fn persist_record(
        &self,
        record_id: &str,
        request: &UploadRequest,
        original_path: &Path,
        signals: &AnalysisSignals,
        decision: &PolicyDecision,
    ) -> Result<moderation_records::Model, ModerationError> {
        let now = Utc::now().fixed_offset();
        let nudity = signals.nudity_detection.as_ref();
        let faces = signals.face_analysis.as_ref();
        let pose = signals.pose_analysis.as_ref();

        let record = moderation_records::ActiveModel {
            id: Set(record_id.to_string()),
            tenant_id: Set(request.tenant.clone()),
            context_type: Set(request.context_type.clone()),
            usage_intent: Set(request.usage_intent.as_str().to_string()),
            image_path: Set(original_path.to_string_lossy().to_string()),
            original_path: Set(original_path.to_string_lossy().to_string()),
            nudity_score: Set(nudity.map(|n| n.nudity_score).unwrap_or(0.0)),
            detected_parts: Set(nudity
                .map(|n| serde_json::to_value(&n.detected_parts).unwrap_or_default())
                .unwrap_or_else(|| serde_json::json!([]))),
            pose_classification: Set(pose
                .map(|p| p.pose_classification.clone())
                .unwrap_or_else(|| "unknown".to_string())),
            explicit_pose_score: Set(pose.map(|p| p.explicit_pose_score).unwrap_or(0.0)),
            face_count: Set(faces.map(|f| f.face_count as i32).unwrap_or(0)),
            min_detected_age: Set(faces.and_then(|f| f.min_age).map(|a| a as i32)),
            underage_detected: Set(faces.map(|f| f.underage_detected).unwrap_or(false)),
            age_risk_multiplier: Set(decision.age_risk_multiplier),
            combined_risk_score: Set(decision.combined_risk_score),
            risk_level: Set(decision.risk_level.as_str().to_string()),
            generated_description: Set(signals
                .image_description
                .as_ref()
                .map(|d| d.description.clone())),
            keywords: Set(signals
                .image_description
                .as_ref()
                .map(|d| serde_json::to_value(&d.tags).unwrap_or_default())
                .unwrap_or_else(|| serde_json::json!([]))),
            policy_violations: Set(
                serde_json::to_value(&decision.policy_violations).unwrap_or_default()
            ),
            raw_signals: Set(serde_json::to_value(signals).unwrap_or_default()),
            verdict: Set(decision.verdict.as_str().to_string()),
            human_review_required: Set(decision.human_review_required),
            auto_blocked: Set(decision.auto_blocked),
            confidence_score: Set(decision.confidence_score),
            final_location: Set(None),
            created_at: Set(now),
            updated_at: Set(now),
        };

        Ok(record.insert(&self.db).await?)
    }

    /// At most one active queue item per record; a second flag on the same
    /// record leaves the existing item untouched.
    async fn upsert_queue_item(
        &self,
        record: &moderation_records::Model,
        decision: &PolicyDecision,
    ) -> Result<review_queue_items::Model, ModerationError> {
        let existing = ReviewQueueItems::find()
            .filter(review_queue_items::Column::ModerationRecordId.eq(record.id.clone()))
            .one(&self.db)
            .await?;
        if let Some(item) = existing {
            return Ok(item);
        }

        let (queue_type, priority) = if decision.auto_blocked {
            ("underage", 100)
        } else if decision.verdict == Verdict::Error {
            ("analysis_error", 50)
        } else {
            ("policy_flag", 10)
        };

        let item = review_queue_items::ActiveModel {
            id: Set(Uuid::new_v4().to_string()),
            moderation_record_id: Set(record.id.clone()),
            tenant_id: Set(record.tenant_id.clone()),
            priority: Set(priority),
            queue_type: Set(queue_type.to_string()),
            status: Set("pending".to_string()),
            flagged_at: Set(Utc::now().fixed_offset()),
            reviewed_at: Set(None),
        };
        Ok(item.insert(&self.db).await?)
    }

    /// Places the file per verdict. Returns the path the verdict publishes
    /// (or the resting place for unpublished verdicts) together with the path
    /// the media library row must reference, since orphan reclamation treats
    /// the library's paths as the live set.
    async fn finalize_placement(
        &self,
        request: &UploadRequest,
        original_path: &Path,
        staged_name: &str,
        verdict: Verdict,
    ) -> Result<(String, String), ModerationError> {
        let placement = match verdict {
            Verdict::Approved => {
                let copies = self
                    .storage
                    .duplicate_across(
                        original_path,
                        &request.tenant,
                        staged_name,
                        &[Category::Media, Category::Public],
                    )
                    .await?;
                let public = copies
                    .get(&Category::Public)
                    .map(|p| p.to_string_lossy().to_string())
                    .unwrap_or_else(|| original_path.to_string_lossy().to_string());
                let media = copies
                    .get(&Category::Media)
                    .map(|p| p.to_string_lossy().to_string())
                    .unwrap_or_else(|| public.clone());
                (public, media)
            }
            Verdict::ApprovedBlurred => {
                let blurred = self.blur_image(&request.bytes, staged_name)?;
                let path = self
                    .storage
                    .write_category(
                        &request.tenant,
                        staged_name,
                        Category::PublicBlurred,
                        &blurred,
                    )
                    .await?
                    .to_string_lossy()
                    .to_string();
                (path.clone(), path)
            }
            Verdict::Rejected => {
                let path = self
                    .storage
                    .relocate(original_path, &request.tenant, staged_name, Category::Rejected)
                    .await?
                    .to_string_lossy()
                    .to_string();
                (path.clone(), path)
            }
            // Flagged, error and pending stay in originals awaiting review.
            Verdict::Flagged | Verdict::Error | Verdict::Pending => {
                let path = original_path.to_string_lossy().to_string();
                (path.clone(), path)
            }
        };
        Ok(placement)
    }

    /// Gaussian blur for the publishable copy of mid-band nudity scores. The
    /// unblurred original never leaves `originals`.
    fn blur_image(&self, bytes: &[u8], filename: &str) -> Result<Vec<u8>, ModerationError> {
        crate::utils::imaging::blur(bytes, filename, self.config.blur_sigma).map_err(|e| {
            ModerationError::Validation(ValidationError {
                code: "UNDECODABLE_IMAGE",
                message: format!("Cannot blur image: {}", e),
            })
        })
    }

    async fn record_final_state(
        &self,
        record: moderation_records::Model,
        final_location: String,
        media_path: String,
        decision: &PolicyDecision,
    ) -> Result<moderation_records::Model, ModerationError> {
        self.create_media_row(&record, media_path, decision).await?;

        let mut active: moderation_records::ActiveModel = record.into();
        active.final_location = Set(Some(final_location));
        active.updated_at = Set(Utc::now().fixed_offset());
        Ok(active.update(&self.db).await?)
    }

    /// Durable media reference; its `file_path` set is what orphan
    /// reclamation treats as live.
    async fn create_media_row(
        &self,
        record: &moderation_records::Model,
        file_path: String,
        decision: &PolicyDecision,
    ) -> Result<media_library::Model, ModerationError> {
        let now = Utc::now().fixed_offset();
        let row = media_library::ActiveModel {
            id: Set(Uuid::new_v4().to_string()),
            tenant_id: Set(record.tenant_id.clone()),
            file_path: Set(file_path),
            moderation_record_id: Set(Some(record.id.clone())),
            moderation_status: Set(decision.verdict.as_str().to_string()),
            moderation_score: Set(decision.combined_risk_score),
            created_at: Set(now),
            updated_at: Set(now),
        };
        Ok(row.insert(&self.db).await?)
    }
}

fn file_name_of(path: &Path) -> String {
    path.file_name()
        .and_then(|n| n.to_str())
        .unwrap_or_default()
        .to_string()
}

/// Decision recorded when the provider never produced usable signals.
fn error_decision(error: &ProviderError) -> PolicyDecision {
    PolicyDecision {
        verdict: Verdict::Error,
        combined_risk_score: 0.0,
        risk_level: RiskLevel::Minimal,
        age_risk_multiplier: 1.0,
        human_review_required: true,
        auto_blocked: false,
        policy_violations: vec![],
        reasons: vec![format!("analysis failed: {}", error)],
        confidence_score: 0.0,
    }
}

/// Placeholder decision for records awaiting an asynchronous batch result.
fn pending_decision() -> PolicyDecision {
    PolicyDecision {
        verdict: Verdict::Pending,
        combined_risk_score: 0.0,
        risk_level: RiskLevel::Minimal,
        age_risk_multiplier: 1.0,
        human_review_required: false,
        auto_blocked: false,
        policy_violations: vec![],
        reasons: vec!["awaiting asynchronous analysis".to_string()],
        confidence_score: 0.0,
    }
}
