use crate::config::ModerationConfig;
use crate::entities::{media_library, moderation_records, prelude::*, review_queue_items};
use crate::models::Verdict;
use crate::services::storage::{Category, StorageError, StorageManager};
use crate::utils::keyed_mutex::KeyedMutex;
use chrono::Utc;
use sea_orm::{
    ActiveModelTrait, ColumnTrait, DatabaseConnection, DbErr, EntityTrait, QueryFilter,
    QueryOrder, Set, TransactionTrait,
};
use std::path::Path;
use std::sync::Arc;
use thiserror::Error;

#[derive(Debug, Error)]
pub enum QueueError {
    #[error("queue item not found: {0}")]
    NotFound(String),

    #[error("queue conflict: {0}")]
    Conflict(String),

    #[error("invalid resolution verdict: {0}")]
    InvalidVerdict(String),

    #[error("image processing failed: {0}")]
    Image(String),

    #[error(transparent)]
    Storage(#[from] StorageError),

    #[error("database error: {0}")]
    Persistence(#[from] DbErr),
}

/// Queue item together with its moderation record, as reviewers see it.
#[derive(Debug, Clone)]
pub struct QueueDetail {
    pub item: review_queue_items::Model,
    pub record: moderation_records::Model,
}

/// Human-review workflow over flagged, errored and auto-blocked records.
pub struct ReviewQueueService {
    db: DatabaseConnection,
    config: ModerationConfig,
    storage: Arc<StorageManager>,
    record_locks: KeyedMutex,
}

impl ReviewQueueService {
    pub fn new(
        db: DatabaseConnection,
        config: ModerationConfig,
        storage: Arc<StorageManager>,
        record_locks: KeyedMutex,
    ) -> Self {
        Self {
            db,
            config,
            storage,
            record_locks,
        }
    }

    /// Pending-first listing, highest priority first, oldest flag first
    /// within a priority band.
    pub async fn list(
        &self,
        status: Option<&str>,
        tenant: Option<&str>,
    ) -> Result<Vec<review_queue_items::Model>, QueueError> {
        let mut query = ReviewQueueItems::find()
            .order_by_desc(review_queue_items::Column::Priority)
            .order_by_asc(review_queue_items::Column::FlaggedAt);

        if let Some(status) = status {
            query = query.filter(review_queue_items::Column::Status.eq(status));
        }
        if let Some(tenant) = tenant {
            query = query.filter(review_queue_items::Column::TenantId.eq(tenant));
        }

        Ok(query.all(&self.db).await?)
    }

    pub async fn detail(&self, item_id: &str) -> Result<QueueDetail, QueueError> {
        let item = ReviewQueueItems::find_by_id(item_id)
            .one(&self.db)
            .await?
            .ok_or_else(|| QueueError::NotFound(item_id.to_string()))?;

        let record = ModerationRecords::find_by_id(&item.moderation_record_id)
            .one(&self.db)
            .await?
            .ok_or_else(|| QueueError::NotFound(item.moderation_record_id.clone()))?;

        Ok(QueueDetail { item, record })
    }

    /// Human override: resolves a pending item with a terminal verdict and
    /// applies it to the record, the media rows and the file placement.
    ///
    /// Two rules are not overridable: an item can be resolved only once, and
    /// an auto-blocked (underage) record can only be confirmed rejected.
    pub async fn resolve(
        &self,
        item_id: &str,
        verdict: Verdict,
    ) -> Result<QueueDetail, QueueError> {
        if !matches!(
            verdict,
            Verdict::Approved | Verdict::ApprovedBlurred | Verdict::Rejected
        ) {
            return Err(QueueError::InvalidVerdict(verdict.to_string()));
        }

        let detail = self.detail(item_id).await?;
        if detail.item.status != "pending" {
            return Err(QueueError::Conflict(format!(
                "queue item {} already resolved as {}",
                item_id, detail.item.status
            )));
        }
        if detail.record.auto_blocked && verdict != Verdict::Rejected {
            return Err(QueueError::Conflict(
                "auto-blocked records can only be confirmed rejected".to_string(),
            ));
        }

        let _guard = self.record_locks.lock(&detail.record.id).await;

        // Re-placement first: if the disk operation fails the review stays
        // pending instead of leaving an approved record without a public
        // copy.
        let (final_location, media_path) = self.place_for_verdict(&detail.record, verdict).await?;

        let txn = self.db.begin().await?;
        let now = Utc::now().fixed_offset();
        let record_id = detail.record.id.clone();

        let mut item: review_queue_items::ActiveModel = detail.item.into();
        item.status = Set(verdict.as_str().to_string());
        item.reviewed_at = Set(Some(now));
        let item = item.update(&txn).await?;

        let mut record: moderation_records::ActiveModel = detail.record.into();
        record.verdict = Set(verdict.as_str().to_string());
        record.human_review_required = Set(false);
        record.final_location = Set(Some(final_location.clone()));
        record.updated_at = Set(now);
        let record = record.update(&txn).await?;

        let media_rows = MediaLibrary::find()
            .filter(media_library::Column::ModerationRecordId.eq(record_id.clone()))
            .all(&txn)
            .await?;
        for media in media_rows {
            let mut active: media_library::ActiveModel = media.into();
            active.moderation_status = Set(verdict.as_str().to_string());
            active.file_path = Set(media_path.clone());
            active.updated_at = Set(now);
            active.update(&txn).await?;
        }

        txn.commit().await?;
        tracing::info!(
            item_id,
            record_id = %record.id,
            verdict = %verdict,
            "Review resolved"
        );

        Ok(QueueDetail { item, record })
    }

    /// Returns the published location for the record together with the path
    /// the media library rows must reference; orphan reclamation treats the
    /// library's paths as the live set.
    async fn place_for_verdict(
        &self,
        record: &moderation_records::Model,
        verdict: Verdict,
    ) -> Result<(String, String), QueueError> {
        let original = Path::new(&record.original_path);
        let filename = original
            .file_name()
            .and_then(|n| n.to_str())
            .unwrap_or_default()
            .to_string();

        let placement = match verdict {
            Verdict::Approved => {
                let copies = self
                    .storage
                    .duplicate_across(
                        original,
                        &record.tenant_id,
                        &filename,
                        &[Category::Media, Category::Public],
                    )
                    .await?;
                let public = copies
                    .get(&Category::Public)
                    .map(|p| p.to_string_lossy().to_string())
                    .unwrap_or_else(|| record.original_path.clone());
                let media = copies
                    .get(&Category::Media)
                    .map(|p| p.to_string_lossy().to_string())
                    .unwrap_or_else(|| public.clone());
                (public, media)
            }
            Verdict::ApprovedBlurred => {
                let bytes = tokio::fs::read(original)
                    .await
                    .map_err(StorageError::from)?;
                let blurred = crate::utils::imaging::blur(&bytes, &filename, self.config.blur_sigma)
                    .map_err(|e| QueueError::Image(e.to_string()))?;
                let path = self
                    .storage
                    .write_category(
                        &record.tenant_id,
                        &filename,
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
                    .relocate(original, &record.tenant_id, &filename, Category::Rejected)
                    .await?
                    .to_string_lossy()
                    .to_string();
                (path.clone(), path)
            }
            _ => {
                let path = record.original_path.clone();
                (path.clone(), path)
            }
        };
        Ok(placement)
    }
}

