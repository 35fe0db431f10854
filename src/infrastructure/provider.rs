use crate::config::ModerationConfig;
use crate::services::provider::{AnalysisProvider, HttpAnalysisProvider, StaticAnalysisProvider};
use std::sync::Arc;
use tracing::info;

pub async fn setup_provider(config: &ModerationConfig) -> anyhow::Result<Arc<dyn AnalysisProvider>> {
    let provider: Arc<dyn AnalysisProvider> = match config.provider_kind.as_str() {
        "static" => Arc::new(StaticAnalysisProvider::new()),
        _ => Arc::new(HttpAnalysisProvider::new(
            config.provider_base_url.clone(),
            config.provider_timeout(),
        )?),
    };

    // Warm up the provider connection
    if provider.health_check().await.is_ok() {
        info!("🔍 Analysis provider '{}' reachable", provider.name());
    } else {
        tracing::warn!(
            "⚠️  Analysis provider unreachable! Uploads will fall back to error verdicts with mandatory review."
        );
    }

    Ok(provider)
}
