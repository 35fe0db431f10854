use crate::config::ModerationConfig;
use crate::entities::{media_library, moderation_records, pending_callbacks, prelude::*, review_queue_items};
use crate::models::{CallbackDelivery, Verdict};
use crate::services::provider::{AnalysisProvider, BatchItem};
use crate::utils::keyed_mutex::KeyedMutex;
use chrono::{DateTime, FixedOffset, Utc};
use sea_orm::{
    ActiveModelTrait, ColumnTrait, Condition, DatabaseConnection, DatabaseTransaction, DbErr,
    EntityTrait, QueryFilter, Set, TransactionTrait,
};
use serde::Serialize;
use std::sync::Arc;
use thiserror::Error;
use utoipa::ToSchema;
use uuid::Uuid;

#[derive(Debug, Error)]
pub enum CallbackError {
    #[error("no pending callbacks registered for batch {0}")]
    NotFound(String),

    #[error("callback conflict: {0}")]
    Conflict(String),

    #[error("database error: {0}")]
    Persistence(#[from] DbErr),
}

/// What `receive` did with a delivery.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, ToSchema)]
#[serde(rename_all = "snake_case")]
pub enum ReceiveOutcome {
    /// First delivery: records and media rows updated.
    Applied,
    /// Duplicate delivery of an already-completed batch; nothing changed.
    Replayed,
}

#[derive(Debug, Default, Clone, Serialize, ToSchema)]
pub struct SweepReport {
    pub examined: u64,
    pub retried: u64,
    pub timed_out: u64,
}

/// Tracks asynchronous analysis jobs and applies their results exactly once.
pub struct CallbackService {
    db: DatabaseConnection,
    config: ModerationConfig,
    provider: Arc<dyn AnalysisProvider>,
    record_locks: KeyedMutex,
}

impl CallbackService {
    pub fn new(
        db: DatabaseConnection,
        config: ModerationConfig,
        provider: Arc<dyn AnalysisProvider>,
        record_locks: KeyedMutex,
    ) -> Self {
        Self {
            db,
            config,
            provider,
            record_locks,
        }
    }

    /// Registers a callback slot for `(media_id, batch_id)`. Idempotent: the
    /// pair is unique, re-registration returns the existing row unchanged.
    pub async fn register_pending(
        &self,
        media_id: &str,
        batch_id: &str,
        tenant_slug: &str,
    ) -> Result<pending_callbacks::Model, CallbackError> {
        let txn = self.db.begin().await?;

        if let Some(existing) = PendingCallbacks::find()
            .filter(
                Condition::all()
                    .add(pending_callbacks::Column::MediaId.eq(media_id))
                    .add(pending_callbacks::Column::BatchId.eq(batch_id)),
            )
            .one(&txn)
            .await?
        {
            txn.commit().await?;
            return Ok(existing);
        }

        let now = Utc::now().fixed_offset();
        let first_retry = now + self.config.callback_backoff(0);
        let row = pending_callbacks::ActiveModel {
            id: Set(Uuid::new_v4().to_string()),
            media_id: Set(media_id.to_string()),
            batch_id: Set(batch_id.to_string()),
            tenant_slug: Set(tenant_slug.to_string()),
            status: Set("pending".to_string()),
            retry_count: Set(0),
            max_retries: Set(self.config.callback_max_retries),
            next_retry_at: Set(Some(first_retry)),
            callback_payload: Set(None),
            created_at: Set(now),
            updated_at: Set(now),
        }
        .insert(&txn)
        .await?;

        txn.commit().await?;
        tracing::info!(media_id, batch_id, "Registered pending callback");
        Ok(row)
    }

    /// Applies a provider delivery for a batch. One transaction marks every
    /// pending slot completed (payload stored verbatim) and updates the
    /// linked media and moderation rows. The slots are read inside that same
    /// transaction so concurrent first deliveries serialize on it. A delivery
    /// for an already-completed batch is a successful no-op so provider
    /// retries stay harmless.
    pub async fn receive(
        &self,
        batch_id: &str,
        delivery: &CallbackDelivery,
    ) -> Result<ReceiveOutcome, CallbackError> {
        let txn = self.db.begin().await?;

        let slots = PendingCallbacks::find()
            .filter(pending_callbacks::Column::BatchId.eq(batch_id))
            .all(&txn)
            .await?;

        if slots.is_empty() {
            return Err(CallbackError::NotFound(batch_id.to_string()));
        }

        if slots.iter().all(|s| s.status == "completed") {
            tracing::info!(batch_id, "Duplicate callback delivery ignored");
            return Ok(ReceiveOutcome::Replayed);
        }

        if let Some(dead) = slots
            .iter()
            .find(|s| s.status == "failed" || s.status == "timeout")
        {
            return Err(CallbackError::Conflict(format!(
                "batch {} already resolved as {}",
                batch_id, dead.status
            )));
        }

        let now = Utc::now().fixed_offset();
        let payload = serde_json::to_value(delivery).unwrap_or_default();

        for slot in &slots {
            let mut active: pending_callbacks::ActiveModel = slot.clone().into();
            active.status = Set("completed".to_string());
            active.callback_payload = Set(Some(payload.clone()));
            active.next_retry_at = Set(None);
            active.updated_at = Set(now);
            active.update(&txn).await?;

            self.apply_to_media(&txn, &slot.media_id, delivery, now)
                .await?;
        }

        txn.commit().await?;
        tracing::info!(
            batch_id,
            status = %delivery.moderation_status,
            slots = slots.len(),
            "Callback applied"
        );
        Ok(ReceiveOutcome::Applied)
    }

    async fn apply_to_media(
        &self,
        txn: &DatabaseTransaction,
        media_id: &str,
        delivery: &CallbackDelivery,
        now: DateTime<FixedOffset>,
    ) -> Result<(), CallbackError> {
        let Some(media) = MediaLibrary::find_by_id(media_id).one(txn).await? else {
            tracing::warn!(%media_id, "Callback references a missing media row");
            return Ok(());
        };

        let record_id = media.moderation_record_id.clone();

        let mut active: media_library::ActiveModel = media.into();
        active.moderation_status = Set(delivery.moderation_status.clone());
        active.moderation_score = Set(delivery.moderation_score);
        active.updated_at = Set(now);
        active.update(txn).await?;

        let Some(record_id) = record_id else {
            return Ok(());
        };
        let _guard = self.record_locks.lock(&record_id).await;

        let Some(record) = ModerationRecords::find_by_id(&record_id).one(txn).await? else {
            return Ok(());
        };

        let current = Verdict::parse(&record.verdict).unwrap_or(Verdict::Pending);
        let delivered = Verdict::parse(&delivery.moderation_status);

        match delivered {
            Some(next) if current.can_transition_to(next) => {
                let review = matches!(next, Verdict::Flagged | Verdict::Rejected | Verdict::Error);
                let tenant_id = record.tenant_id.clone();
                let mut active: moderation_records::ActiveModel = record.into();
                active.verdict = Set(next.as_str().to_string());
                active.combined_risk_score = Set(delivery.moderation_score);
                active.human_review_required = Set(review);
                active.updated_at = Set(now);
                active.update(txn).await?;

                // A record flagged by the delivery must surface in the
                // review queue, same as one flagged synchronously.
                if review {
                    let (queue_type, priority) = if next == Verdict::Error {
                        ("analysis_error", 50)
                    } else {
                        ("policy_flag", 10)
                    };
                    self.ensure_queue_item(txn, &record_id, &tenant_id, queue_type, priority, now)
                        .await?;
                }
            }
            Some(next) => {
                tracing::warn!(
                    %record_id,
                    "Callback verdict {} ignored, record already {}",
                    next,
                    current
                );
            }
            None => {
                tracing::warn!(
                    %record_id,
                    "Callback carried unknown status '{}'",
                    delivery.moderation_status
                );
            }
        }

        Ok(())
    }

    /// Retry pass over pending callbacks whose retry deadline elapsed. Each
    /// exhausted slot becomes a `timeout` with a forced review item; the rest
    /// are re-issued to the provider with a doubled, capped backoff.
    pub async fn sweep(&self) -> SweepReport {
        let mut report = SweepReport::default();
        let now = Utc::now().fixed_offset();

        let due = match PendingCallbacks::find()
            .filter(
                Condition::all()
                    .add(pending_callbacks::Column::Status.eq("pending"))
                    .add(pending_callbacks::Column::NextRetryAt.lte(now)),
            )
            .all(&self.db)
            .await
        {
            Ok(rows) => rows,
            Err(e) => {
                tracing::error!("Callback sweep query failed: {}", e);
                return report;
            }
        };

        for slot in due {
            report.examined += 1;
            let outcome = if slot.retry_count >= slot.max_retries {
                report.timed_out += 1;
                self.time_out_slot(slot).await
            } else {
                report.retried += 1;
                self.retry_slot(slot, now).await
            };
            if let Err(e) = outcome {
                tracing::error!("Callback sweep step failed: {}", e);
            }
        }

        if report.examined > 0 {
            tracing::info!(
                "Callback sweep: examined={} retried={} timed_out={}",
                report.examined,
                report.retried,
                report.timed_out
            );
        }
        report
    }

    async fn retry_slot(
        &self,
        slot: pending_callbacks::Model,
        now: DateTime<FixedOffset>,
    ) -> Result<(), CallbackError> {
        let batch_id = slot.batch_id.clone();
        let media_id = slot.media_id.clone();
        let retry_count = slot.retry_count + 1;

        let mut active: pending_callbacks::ActiveModel = slot.into();
        active.retry_count = Set(retry_count);
        active.next_retry_at = Set(Some(now + self.config.callback_backoff(retry_count)));
        active.updated_at = Set(now);
        active.update(&self.db).await?;

        let image_url = MediaLibrary::find_by_id(&media_id)
            .one(&self.db)
            .await?
            .map(|m| m.file_path)
            .unwrap_or_default();

        if let Err(e) = self
            .provider
            .submit_batch(
                &batch_id,
                &[BatchItem {
                    media_id: media_id.clone(),
                    image_url,
                }],
            )
            .await
        {
            tracing::warn!(
                %batch_id,
                %media_id,
                retry = retry_count,
                "Batch re-submission failed, will retry again: {}",
                e
            );
        }
        Ok(())
    }

    /// Exhausted retries: the analysis never arrived. The record goes to
    /// `error` and a review item is forced so the image does not rot
    /// invisibly in `pending`.
    async fn time_out_slot(&self, slot: pending_callbacks::Model) -> Result<(), CallbackError> {
        let txn = self.db.begin().await?;
        let now = Utc::now().fixed_offset();
        let media_id = slot.media_id.clone();

        let mut active: pending_callbacks::ActiveModel = slot.into();
        active.status = Set("timeout".to_string());
        active.next_retry_at = Set(None);
        active.updated_at = Set(now);
        active.update(&txn).await?;

        let record_id = MediaLibrary::find_by_id(&media_id)
            .one(&txn)
            .await?
            .and_then(|m| m.moderation_record_id);

        if let Some(record_id) = record_id {
            let _guard = self.record_locks.lock(&record_id).await;

            if let Some(record) = ModerationRecords::find_by_id(&record_id).one(&txn).await? {
                let tenant_id = record.tenant_id.clone();
                let current = Verdict::parse(&record.verdict).unwrap_or(Verdict::Pending);
                if current.can_transition_to(Verdict::Error) {
                    let mut active: moderation_records::ActiveModel = record.into();
                    active.verdict = Set(Verdict::Error.as_str().to_string());
                    active.human_review_required = Set(true);
                    active.updated_at = Set(now);
                    active.update(&txn).await?;
                }

                self.ensure_queue_item(&txn, &record_id, &tenant_id, "callback_timeout", 50, now)
                    .await?;
            }
        }

        txn.commit().await?;
        tracing::warn!(%media_id, "Pending callback timed out after max retries");
        Ok(())
    }

    /// At most one active queue item per record; a later flag on the same
    /// record leaves the existing item untouched.
    async fn ensure_queue_item(
        &self,
        txn: &DatabaseTransaction,
        record_id: &str,
        tenant_id: &str,
        queue_type: &str,
        priority: i32,
        now: DateTime<FixedOffset>,
    ) -> Result<(), CallbackError> {
        let existing = ReviewQueueItems::find()
            .filter(review_queue_items::Column::ModerationRecordId.eq(record_id))
            .one(txn)
            .await?;
        if existing.is_none() {
            review_queue_items::ActiveModel {
                id: Set(Uuid::new_v4().to_string()),
                moderation_record_id: Set(record_id.to_string()),
                tenant_id: Set(tenant_id.to_string()),
                priority: Set(priority),
                queue_type: Set(queue_type.to_string()),
                status: Set("pending".to_string()),
                flagged_at: Set(now),
                reviewed_at: Set(None),
            }
            .insert(txn)
            .await?;
        }
        Ok(())
    }
}
