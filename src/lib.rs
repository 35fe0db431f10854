pub mod api;
pub mod config;
pub mod entities;
pub mod infrastructure;
pub mod models;
pub mod services;
pub mod utils;

use crate::config::ModerationConfig;
use crate::services::callbacks::CallbackService;
use crate::services::moderation::ModerationService;
use crate::services::provider::AnalysisProvider;
use crate::services::queue::ReviewQueueService;
use crate::services::storage::StorageManager;
use crate::utils::keyed_mutex::KeyedMutex;
use axum::{
    Router,
    routing::{get, post},
};
use sea_orm::DatabaseConnection;
use std::sync::Arc;
use tower_http::cors::{Any, CorsLayer};
use utoipa::OpenApi;
use utoipa_swagger_ui::SwaggerUi;

#[derive(OpenApi)]
#[openapi(
    paths(
        api::handlers::upload::upload_handler,
        api::handlers::callbacks::callback_handler,
        api::handlers::queue::list_queue_handler,
        api::handlers::queue::queue_detail_handler,
        api::handlers::queue::resolve_queue_handler,
        api::handlers::health::health_handler,
        api::handlers::stats::stats_handler,
    ),
    components(
        schemas(
            api::handlers::upload::ModerationRecordResponse,
            api::handlers::callbacks::CallbackResponse,
            api::handlers::queue::QueueItemResponse,
            api::handlers::queue::QueueDetailResponse,
            api::handlers::queue::ResolveRequest,
            api::handlers::health::HealthResponse,
            models::CallbackDelivery,
            models::AnalysisSignals,
            models::NudityDetection,
            models::FaceAnalysis,
            models::PoseAnalysis,
            models::ImageDescription,
            models::CombinedAssessment,
            models::DetectedPart,
            models::PartRegion,
            models::UsageIntent,
            models::Verdict,
            models::RiskLevel,
            services::storage::StorageStatistics,
            services::storage::TenantStats,
            services::callbacks::ReceiveOutcome,
        )
    ),
    tags(
        (name = "moderation", description = "Upload moderation endpoints"),
        (name = "queue", description = "Human review queue endpoints")
    )
)]
pub struct ApiDoc;

#[derive(Clone)]
pub struct AppState {
    pub db: DatabaseConnection,
    pub config: ModerationConfig,
    pub storage: Arc<StorageManager>,
    pub provider: Arc<dyn AnalysisProvider>,
    pub moderation: Arc<ModerationService>,
    pub callbacks: Arc<CallbackService>,
    pub queue: Arc<ReviewQueueService>,
    pub record_locks: KeyedMutex,
}

impl AppState {
    /// Wires the service graph from already-initialized infrastructure. The
    /// keyed mutex is shared so the orchestrator, callback processor and
    /// review queue serialize writes to the same record.
    pub fn build(
        db: DatabaseConnection,
        config: ModerationConfig,
        provider: Arc<dyn AnalysisProvider>,
    ) -> Self {
        let record_locks = KeyedMutex::new();
        let storage = Arc::new(StorageManager::new(
            config.media_root.clone(),
            config.cleanup_max_age(),
        ));
        let callbacks = Arc::new(CallbackService::new(
            db.clone(),
            config.clone(),
            provider.clone(),
            record_locks.clone(),
        ));
        let moderation = Arc::new(ModerationService::new(
            db.clone(),
            config.clone(),
            storage.clone(),
            provider.clone(),
            callbacks.clone(),
        ));
        let queue = Arc::new(ReviewQueueService::new(
            db.clone(),
            config.clone(),
            storage.clone(),
            record_locks.clone(),
        ));

        Self {
            db,
            config,
            storage,
            provider,
            moderation,
            callbacks,
            queue,
            record_locks,
        }
    }
}

pub fn create_app(state: AppState) -> Router {
    Router::new()
        .merge(SwaggerUi::new("/swagger-ui").url("/api-docs/openapi.json", ApiDoc::openapi()))
        .route("/health", get(api::handlers::health::health_handler))
        .route(
            "/uploads",
            post(api::handlers::upload::upload_handler).layer(
                axum::extract::DefaultBodyLimit::max(
                    // Multipart overhead headroom on top of the file limit.
                    state.config.max_file_size + 10 * 1024 * 1024,
                ),
            ),
        )
        .route(
            "/callbacks/:batch_id",
            post(api::handlers::callbacks::callback_handler),
        )
        .route("/queue", get(api::handlers::queue::list_queue_handler))
        .route(
            "/queue/:item_id",
            get(api::handlers::queue::queue_detail_handler)
                .put(api::handlers::queue::resolve_queue_handler),
        )
        .route("/stats", get(api::handlers::stats::stats_handler))
        .layer(
            CorsLayer::new()
                .allow_origin(Any)
                .allow_methods(Any)
                .allow_headers(Any),
        )
        .with_state(state)
}
