use crate::entities::{media_library, moderation_records, pending_callbacks, review_queue_items};
use sea_orm::{ConnectOptions, ConnectionTrait, Database, DatabaseConnection, Schema};
use std::env;
use std::time::Duration;
use tracing::info;

pub async fn setup_database() -> anyhow::Result<DatabaseConnection> {
    let db_url = env::var("DATABASE_URL")
        .unwrap_or_else(|_| "sqlite://moderation.db?mode=rwc".to_string());

    info!("📂 Database: {}", db_url);
    connect(&db_url).await
}

pub async fn connect(db_url: &str) -> anyhow::Result<DatabaseConnection> {
    let mut opt = ConnectOptions::new(db_url);
    opt.max_connections(100)
        .min_connections(5)
        .connect_timeout(Duration::from_secs(30))
        .acquire_timeout(Duration::from_secs(30))
        .idle_timeout(Duration::from_secs(600))
        .max_lifetime(Duration::from_secs(1800))
        .sqlx_logging(true)
        .sqlx_logging_level(log::LevelFilter::Debug);

    let db = Database::connect(opt).await?;
    info!("✅ Database connected successfully");

    run_migrations(&db).await?;
    Ok(db)
}

/// Schema auto-migration from the entity definitions. Idempotent; works the
/// same against sqlite and postgres.
pub async fn run_migrations(db: &DatabaseConnection) -> anyhow::Result<()> {
    info!("🔄 Running schema auto-migrations...");
    let builder = db.get_database_backend();
    let schema = Schema::new(builder);

    let stmts = vec![
        schema
            .create_table_from_entity(moderation_records::Entity)
            .if_not_exists()
            .to_owned(),
        schema
            .create_table_from_entity(review_queue_items::Entity)
            .if_not_exists()
            .to_owned(),
        schema
            .create_table_from_entity(media_library::Entity)
            .if_not_exists()
            .to_owned(),
        schema
            .create_table_from_entity(pending_callbacks::Entity)
            .if_not_exists()
            .to_owned(),
    ];

    for stmt in stmts {
        let stmt = builder.build(&stmt);
        let _ = db.execute(stmt).await;
    }

    // Lookup indexes for the hot paths: batch delivery, queue listing and
    // the per-tenant live-path snapshot.
    let indexes = [
        "CREATE INDEX IF NOT EXISTS idx_pending_callbacks_batch_id ON pending_callbacks(batch_id);",
        "CREATE INDEX IF NOT EXISTS idx_pending_callbacks_status ON pending_callbacks(status);",
        "CREATE INDEX IF NOT EXISTS idx_review_queue_items_status ON review_queue_items(status);",
        "CREATE INDEX IF NOT EXISTS idx_media_library_tenant_id ON media_library(tenant_id);",
    ];
    for sql in indexes {
        let _ = db
            .execute(sea_orm::Statement::from_string(builder, sql.to_string()))
            .await;
    }

    Ok(())
}
