use async_trait::async_trait;
use axum::{
    body::Body,
    http::{Request, StatusCode},
};
use http_body_util::BodyExt;
use moderation_backend::config::ModerationConfig;
use moderation_backend::entities::prelude::*;
use moderation_backend::infrastructure::database;
use moderation_backend::models::{CallbackDelivery, UsageIntent, Verdict};
use moderation_backend::services::callbacks::{CallbackError, ReceiveOutcome};
use moderation_backend::services::moderation::UploadRequest;
use moderation_backend::services::provider::{
    AnalysisProvider, BatchItem, ProviderError, benign_signals,
};
use moderation_backend::services::queue::QueueError;
use moderation_backend::{AppState, create_app};
use sea_orm::{Database, EntityTrait};
use serde_json::{Value, json};
use std::path::Path;
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};
use tower::ServiceExt;

async fn setup_test_db() -> sea_orm::DatabaseConnection {
    let db = Database::connect("sqlite::memory:").await.unwrap();
    database::run_migrations(&db).await.unwrap();
    db
}

struct RecordingProvider {
    batches: std::sync::Mutex<Vec<String>>,
    signals: moderation_backend::models::AnalysisSignals,
    fail_submit: AtomicBool,
}

impl RecordingProvider {
    fn new() -> Arc<Self> {
        Arc::new(Self {
            batches: std::sync::Mutex::new(Vec::new()),
            signals: benign_signals(),
            fail_submit: AtomicBool::new(false),
        })
    }

    fn with_nudity(score: f64) -> Arc<Self> {
        let mut signals = benign_signals();
        if let Some(n) = signals.nudity_detection.as_mut() {
            n.nudity_score = score;
            n.has_nudity = true;
        }
        Arc::new(Self {
            batches: std::sync::Mutex::new(Vec::new()),
            signals,
            fail_submit: AtomicBool::new(false),
        })
    }
}

#[async_trait]
impl AnalysisProvider for RecordingProvider {
    async fn analyze(
        &self,
        _filename: &str,
        _bytes: &[u8],
        _context_type: &str,
    ) -> Result<moderation_backend::models::AnalysisSignals, ProviderError> {
        Ok(self.signals.clone())
    }

    async fn submit_batch(
        &self,
        batch_id: &str,
        _items: &[BatchItem],
    ) -> Result<(), ProviderError> {
        if self.fail_submit.load(Ordering::SeqCst) {
            return Err(ProviderError::Unavailable("submit outage".to_string()));
        }
        self.batches.lock().unwrap().push(batch_id.to_string());
        Ok(())
    }

    async fn health_check(&self) -> Result<(), ProviderError> {
        Ok(())
    }

    fn name(&self) -> &'static str {
        "recording"
    }
}

fn png_bytes() -> Vec<u8> {
    let img = image::RgbImage::new(32, 32);
    let mut out = Vec::new();
    image::DynamicImage::ImageRgb8(img)
        .write_to(
            &mut std::io::Cursor::new(&mut out),
            image::ImageFormat::Png,
        )
        .unwrap();
    out
}

fn upload(tenant: &str, intent: UsageIntent) -> UploadRequest {
    UploadRequest {
        filename: "portrait.png".to_string(),
        bytes: png_bytes(),
        tenant: tenant.to_string(),
        usage_intent: intent,
        context_type: "portfolio_image".to_string(),
    }
}

fn test_config(media_root: &Path) -> ModerationConfig {
    let mut config = ModerationConfig::default();
    config.media_root = media_root.to_path_buf();
    config.provider_max_retries = 1;
    config.retry_backoff_base_secs = 0;
    config
}

fn delivery(status: &str, score: f64) -> CallbackDelivery {
    CallbackDelivery {
        moderation_status: status.to_string(),
        moderation_score: score,
        callback_data: json!({"model": "v2"}),
    }
}

fn approved_delivery() -> CallbackDelivery {
    delivery("approved", 12.5)
}

#[tokio::test]
async fn test_async_upload_then_callback_applies_once() {
    let dir = tempfile::tempdir().unwrap();
    let provider = RecordingProvider::new();
    let db = setup_test_db().await;
    let state = AppState::build(db.clone(), test_config(dir.path()), provider.clone());

    let record = state
        .moderation
        .process_upload_async(upload("alice", UsageIntent::Paysite), "batch-1")
        .await
        .unwrap();
    assert_eq!(record.verdict, "pending");
    assert_eq!(provider.batches.lock().unwrap().as_slice(), ["batch-1"]);

    // First delivery applies.
    let outcome = state
        .callbacks
        .receive("batch-1", &approved_delivery())
        .await
        .unwrap();
    assert_eq!(outcome, ReceiveOutcome::Applied);

    let updated = ModerationRecords::find_by_id(&record.id)
        .one(&db)
        .await
        .unwrap()
        .unwrap();
    assert_eq!(updated.verdict, "approved");
    assert_eq!(updated.combined_risk_score, 12.5);

    let media = MediaLibrary::find().all(&db).await.unwrap();
    assert_eq!(media.len(), 1);
    assert_eq!(media[0].moderation_status, "approved");

    // Payload stored verbatim on the callback row.
    let slots = PendingCallbacks::find().all(&db).await.unwrap();
    assert_eq!(slots[0].status, "completed");
    let payload = slots[0].callback_payload.as_ref().unwrap();
    assert_eq!(payload["callback_data"]["model"], "v2");

    // Replay is a harmless no-op.
    let outcome = state
        .callbacks
        .receive("batch-1", &approved_delivery())
        .await
        .unwrap();
    assert_eq!(outcome, ReceiveOutcome::Replayed);
    let after_replay = ModerationRecords::find_by_id(&record.id)
        .one(&db)
        .await
        .unwrap()
        .unwrap();
    assert_eq!(after_replay.updated_at, updated.updated_at);
}

#[tokio::test]
async fn test_flagged_callback_creates_review_item() {
    let dir = tempfile::tempdir().unwrap();
    let db = setup_test_db().await;
    let state = AppState::build(db.clone(), test_config(dir.path()), RecordingProvider::new());

    let record = state
        .moderation
        .process_upload_async(upload("alice", UsageIntent::PublicSite), "batch-7")
        .await
        .unwrap();

    let outcome = state
        .callbacks
        .receive("batch-7", &delivery("flagged", 72.0))
        .await
        .unwrap();
    assert_eq!(outcome, ReceiveOutcome::Applied);

    let updated = ModerationRecords::find_by_id(&record.id)
        .one(&db)
        .await
        .unwrap()
        .unwrap();
    assert_eq!(updated.verdict, "flagged");
    assert!(updated.human_review_required);

    // The record must be reachable through the review queue, exactly once.
    let items = ReviewQueueItems::find().all(&db).await.unwrap();
    assert_eq!(items.len(), 1);
    assert_eq!(items[0].moderation_record_id, record.id);
    assert_eq!(items[0].queue_type, "policy_flag");
    assert_eq!(items[0].status, "pending");

    // Replay does not duplicate the item.
    let outcome = state
        .callbacks
        .receive("batch-7", &delivery("flagged", 72.0))
        .await
        .unwrap();
    assert_eq!(outcome, ReceiveOutcome::Replayed);
    assert_eq!(ReviewQueueItems::find().all(&db).await.unwrap().len(), 1);
}

#[tokio::test]
async fn test_submit_failure_still_stages_upload() {
    let dir = tempfile::tempdir().unwrap();
    let provider = RecordingProvider::new();
    provider.fail_submit.store(true, Ordering::SeqCst);
    let db = setup_test_db().await;
    let state = AppState::build(db.clone(), test_config(dir.path()), provider.clone());

    // The provider rejects the batch, but the record and callback slot are
    // durable, so the uploader still gets the pending record back.
    let record = state
        .moderation
        .process_upload_async(upload("alice", UsageIntent::Paysite), "batch-8")
        .await
        .unwrap();
    assert_eq!(record.verdict, "pending");
    assert_eq!(PendingCallbacks::find().all(&db).await.unwrap().len(), 1);
    assert!(provider.batches.lock().unwrap().is_empty());

    // Once the provider recovers, the sweep re-issues the batch.
    provider.fail_submit.store(false, Ordering::SeqCst);
    let report = state.callbacks.sweep().await;
    assert_eq!(report.retried, 1);
    assert_eq!(provider.batches.lock().unwrap().as_slice(), ["batch-8"]);
}

#[tokio::test]
async fn test_callback_for_unknown_batch_is_not_found() {
    let dir = tempfile::tempdir().unwrap();
    let db = setup_test_db().await;
    let state = AppState::build(db, test_config(dir.path()), RecordingProvider::new());

    let err = state
        .callbacks
        .receive("no-such-batch", &approved_delivery())
        .await
        .unwrap_err();
    assert!(matches!(err, CallbackError::NotFound(_)));
}

#[tokio::test]
async fn test_register_pending_is_idempotent() {
    let dir = tempfile::tempdir().unwrap();
    let db = setup_test_db().await;
    let state = AppState::build(db.clone(), test_config(dir.path()), RecordingProvider::new());

    let first = state
        .callbacks
        .register_pending("media-1", "batch-9", "alice")
        .await
        .unwrap();
    let second = state
        .callbacks
        .register_pending("media-1", "batch-9", "alice")
        .await
        .unwrap();

    assert_eq!(first.id, second.id);
    assert_eq!(PendingCallbacks::find().all(&db).await.unwrap().len(), 1);
}

#[tokio::test]
async fn test_sweep_retries_then_times_out() {
    let dir = tempfile::tempdir().unwrap();
    let provider = RecordingProvider::new();
    let db = setup_test_db().await;
    let mut config = test_config(dir.path());
    config.callback_max_retries = 1;
    let state = AppState::build(db.clone(), config, provider.clone());

    let record = state
        .moderation
        .process_upload_async(upload("alice", UsageIntent::PublicSite), "batch-2")
        .await
        .unwrap();

    // Backoff base is zero, so the slot is due immediately. First sweep
    // re-issues the batch.
    let report = state.callbacks.sweep().await;
    assert_eq!(report.retried, 1);
    assert_eq!(report.timed_out, 0);
    assert_eq!(provider.batches.lock().unwrap().len(), 2);

    // Second sweep exhausts the single retry: timeout + forced review item.
    let report = state.callbacks.sweep().await;
    assert_eq!(report.timed_out, 1);

    let slots = PendingCallbacks::find().all(&db).await.unwrap();
    assert_eq!(slots[0].status, "timeout");

    let updated = ModerationRecords::find_by_id(&record.id)
        .one(&db)
        .await
        .unwrap()
        .unwrap();
    assert_eq!(updated.verdict, "error");
    assert!(updated.human_review_required);

    let items = ReviewQueueItems::find().all(&db).await.unwrap();
    assert_eq!(items.len(), 1);
    assert_eq!(items[0].queue_type, "callback_timeout");

    // A late delivery after timeout conflicts instead of resurrecting.
    let err = state
        .callbacks
        .receive("batch-2", &approved_delivery())
        .await
        .unwrap_err();
    assert!(matches!(err, CallbackError::Conflict(_)));
}

#[tokio::test]
async fn test_review_resolution_publishes_and_is_final() {
    let dir = tempfile::tempdir().unwrap();
    let provider = RecordingProvider::with_nudity(85.0);
    let db = setup_test_db().await;
    let state = AppState::build(db.clone(), test_config(dir.path()), provider);

    let record = state
        .moderation
        .process_upload(upload("alice", UsageIntent::PublicSite))
        .await
        .unwrap();
    assert_eq!(record.verdict, "flagged");

    let items = state.queue.list(Some("pending"), None).await.unwrap();
    assert_eq!(items.len(), 1);

    let resolved = state
        .queue
        .resolve(&items[0].id, Verdict::Approved)
        .await
        .unwrap();
    assert_eq!(resolved.record.verdict, "approved");
    assert!(!resolved.record.human_review_required);
    let location = resolved.record.final_location.as_deref().unwrap();
    assert!(location.contains("/public/"));
    assert!(Path::new(location).exists());

    // Media rows reference the library copy, not the published one.
    let media = MediaLibrary::find().all(&db).await.unwrap();
    assert_eq!(media.len(), 1);
    assert!(media[0].file_path.contains("/media/"));
    assert!(Path::new(&media[0].file_path).exists());

    // Resolving twice conflicts.
    let err = state
        .queue
        .resolve(&items[0].id, Verdict::Rejected)
        .await
        .unwrap_err();
    assert!(matches!(err, QueueError::Conflict(_)));
}

#[tokio::test]
async fn test_auto_blocked_record_cannot_be_approved() {
    let dir = tempfile::tempdir().unwrap();
    // Underage via the provider signals.
    let mut signals = benign_signals();
    if let Some(f) = signals.face_analysis.as_mut() {
        f.faces_detected = true;
        f.face_count = 1;
        f.underage_detected = true;
        f.min_age = Some(15);
    }
    let provider = Arc::new(RecordingProvider {
        batches: std::sync::Mutex::new(Vec::new()),
        signals,
        fail_submit: AtomicBool::new(false),
    });
    let db = setup_test_db().await;
    let state = AppState::build(db, test_config(dir.path()), provider);

    state
        .moderation
        .process_upload(upload("alice", UsageIntent::Private))
        .await
        .unwrap();

    let items = state.queue.list(Some("pending"), None).await.unwrap();
    assert_eq!(items.len(), 1);
    assert_eq!(items[0].queue_type, "underage");

    let err = state
        .queue
        .resolve(&items[0].id, Verdict::Approved)
        .await
        .unwrap_err();
    assert!(matches!(err, QueueError::Conflict(_)));

    // Confirming the rejection is the only way out.
    let resolved = state
        .queue
        .resolve(&items[0].id, Verdict::Rejected)
        .await
        .unwrap();
    assert_eq!(resolved.record.verdict, "rejected");
}

#[tokio::test]
async fn test_http_surface_health_callback_and_queue() {
    let dir = tempfile::tempdir().unwrap();
    let db = setup_test_db().await;
    let state = AppState::build(db, test_config(dir.path()), RecordingProvider::new());
    let app = create_app(state);

    let response = app
        .clone()
        .oneshot(
            Request::builder()
                .uri("/health")
                .body(Body::empty())
                .unwrap(),
        )
        .await
        .unwrap();
    assert_eq!(response.status(), StatusCode::OK);
    let body = response.into_body().collect().await.unwrap().to_bytes();
    let health: Value = serde_json::from_slice(&body).unwrap();
    assert_eq!(health["status"], "ok");
    assert_eq!(health["provider_reachable"], true);

    // Unknown batch surfaces as 404.
    let response = app
        .clone()
        .oneshot(
            Request::builder()
                .method("POST")
                .uri("/callbacks/ghost-batch")
                .header("content-type", "application/json")
                .body(Body::from(
                    serde_json::to_vec(&approved_delivery()).unwrap(),
                ))
                .unwrap(),
        )
        .await
        .unwrap();
    assert_eq!(response.status(), StatusCode::NOT_FOUND);

    // Empty queue lists cleanly.
    let response = app
        .oneshot(
            Request::builder()
                .uri("/queue?status=pending")
                .body(Body::empty())
                .unwrap(),
        )
        .await
        .unwrap();
    assert_eq!(response.status(), StatusCode::OK);
    let body = response.into_body().collect().await.unwrap().to_bytes();
    let items: Value = serde_json::from_slice(&body).unwrap();
    assert_eq!(items, json!([]));
}
