use crate::models::{
    AnalysisSignals, CombinedAssessment, FaceAnalysis, NudityDetection, PoseAnalysis,
};
use async_trait::async_trait;
use serde::Serialize;
use std::time::Duration;
use thiserror::Error;

#[derive(Debug, Error)]
pub enum ProviderError {
    #[error("analysis provider timed out after {0:?}")]
    Timeout(Duration),

    #[error("analysis provider unavailable: {0}")]
    Unavailable(String),

    #[error("analysis provider returned status {status}: {body}")]
    Status { status: u16, body: String },

    #[error("analysis provider returned an unparseable response: {0}")]
    InvalidResponse(String),
}

impl ProviderError {
    /// Timeouts and availability problems are worth retrying; a malformed
    /// response or a 4xx will not get better on a second attempt.
    pub fn is_retryable(&self) -> bool {
        match self {
            ProviderError::Timeout(_) | ProviderError::Unavailable(_) => true,
            ProviderError::Status { status, .. } => *status >= 500,
            ProviderError::InvalidResponse(_) => false,
        }
    }
}

/// One image of an asynchronous batch submission.
#[derive(Debug, Clone, Serialize)]
pub struct BatchItem {
    pub media_id: String,
    pub image_url: String,
}

/// Content analysis backend. Implementations are wired in at startup behind
/// a trait object so tests and local development can swap the HTTP provider
/// for a canned one.
#[async_trait]
pub trait AnalysisProvider: Send + Sync {
    /// Synchronously analyzes a single image and returns the raw signal
    /// sections. Sections the provider could not produce are `None`.
    async fn analyze(
        &self,
        filename: &str,
        bytes: &[u8],
        context_type: &str,
    ) -> Result<AnalysisSignals, ProviderError>;

    /// Submits a batch for asynchronous analysis. Results arrive later on
    /// the callback endpoint keyed by `(media_id, batch_id)`.
    async fn submit_batch(&self, batch_id: &str, items: &[BatchItem])
        -> Result<(), ProviderError>;

    async fn health_check(&self) -> Result<(), ProviderError>;

    fn name(&self) -> &'static str;
}

/// HTTP analysis provider speaking multipart uploads to an external service.
pub struct HttpAnalysisProvider {
    client: reqwest::Client,
    base_url: String,
    timeout: Duration,
}

impl HttpAnalysisProvider {
    pub fn new(base_url: impl Into<String>, timeout: Duration) -> anyhow::Result<Self> {
        let client = reqwest::Client::builder().timeout(timeout).build()?;
        Ok(Self {
            client,
            base_url: base_url.into().trim_end_matches('/').to_string(),
            timeout,
        })
    }

    fn map_send_error(&self, e: reqwest::Error) -> ProviderError {
        if e.is_timeout() {
            ProviderError::Timeout(self.timeout)
        } else {
            ProviderError::Unavailable(e.to_string())
        }
    }

    async fn check_status(response: reqwest::Response) -> Result<reqwest::Response, ProviderError> {
        let status = response.status();
        if status.is_success() {
            return Ok(response);
        }
        let body = response.text().await.unwrap_or_default();
        Err(ProviderError::Status {
            status: status.as_u16(),
            body: body.chars().take(500).collect(),
        })
    }
}

#[async_trait]
impl AnalysisProvider for HttpAnalysisProvider {
    async fn analyze(
        &self,
        filename: &str,
        bytes: &[u8],
        context_type: &str,
    ) -> Result<AnalysisSignals, ProviderError> {
        let part = reqwest::multipart::Part::bytes(bytes.to_vec())
            .file_name(filename.to_string())
            .mime_str("application/octet-stream")
            .map_err(|e| ProviderError::Unavailable(e.to_string()))?;
        let form = reqwest::multipart::Form::new()
            .part("file", part)
            .text("context_type", context_type.to_string());

        let response = self
            .client
            .post(format!("{}/api/v1/analyze", self.base_url))
            .multipart(form)
            .send()
            .await
            .map_err(|e| self.map_send_error(e))?;

        let response = Self::check_status(response).await?;
        response
            .json::<AnalysisSignals>()
            .await
            .map_err(|e| ProviderError::InvalidResponse(e.to_string()))
    }

    async fn submit_batch(
        &self,
        batch_id: &str,
        items: &[BatchItem],
    ) -> Result<(), ProviderError> {
        let response = self
            .client
            .post(format!("{}/api/v1/analyze/batch", self.base_url))
            .json(&serde_json::json!({
                "batch_id": batch_id,
                "items": items,
            }))
            .send()
            .await
            .map_err(|e| self.map_send_error(e))?;

        Self::check_status(response).await?;
        Ok(())
    }

    async fn health_check(&self) -> Result<(), ProviderError> {
        let response = self
            .client
            .get(format!("{}/health", self.base_url))
            .send()
            .await
            .map_err(|e| self.map_send_error(e))?;
        Self::check_status(response).await?;
        Ok(())
    }

    fn name(&self) -> &'static str {
        "http"
    }
}

/// Canned provider for local development: every image gets the same benign,
/// complete signal set.
pub struct StaticAnalysisProvider {
    signals: AnalysisSignals,
}

impl StaticAnalysisProvider {
    pub fn new() -> Self {
        Self {
            signals: benign_signals(),
        }
    }

    pub fn with_signals(signals: AnalysisSignals) -> Self {
        Self { signals }
    }
}

impl Default for StaticAnalysisProvider {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl AnalysisProvider for StaticAnalysisProvider {
    async fn analyze(
        &self,
        _filename: &str,
        _bytes: &[u8],
        _context_type: &str,
    ) -> Result<AnalysisSignals, ProviderError> {
        Ok(self.signals.clone())
    }

    async fn submit_batch(
        &self,
        _batch_id: &str,
        _items: &[BatchItem],
    ) -> Result<(), ProviderError> {
        Ok(())
    }

    async fn health_check(&self) -> Result<(), ProviderError> {
        Ok(())
    }

    fn name(&self) -> &'static str {
        "static"
    }
}

/// Complete, low-risk signal set used by the static provider.
pub fn benign_signals() -> AnalysisSignals {
    AnalysisSignals {
        nudity_detection: Some(NudityDetection {
            nudity_score: 0.0,
            has_nudity: false,
            detected_parts: vec![],
        }),
        face_analysis: Some(FaceAnalysis {
            faces_detected: false,
            face_count: 0,
            min_age: None,
            max_age: None,
            underage_detected: false,
            suspicious_ages: false,
        }),
        pose_analysis: Some(PoseAnalysis {
            pose_detected: false,
            pose_classification: "no_pose_detected".to_string(),
            explicit_pose_score: 0.0,
        }),
        image_description: None,
        combined_assessment: Some(CombinedAssessment {
            final_risk_score: 0.0,
            risk_level: "minimal".to_string(),
            age_risk_multiplier: 1.0,
            reasoning: vec![],
        }),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_static_provider_returns_complete_signals() {
        let provider = StaticAnalysisProvider::new();
        let signals = provider.analyze("a.jpg", b"bytes", "portfolio").await.unwrap();
        assert!(signals.is_complete());
        assert_eq!(
            signals.nudity_detection.as_ref().unwrap().nudity_score,
            0.0
        );
        assert!(provider.health_check().await.is_ok());
        assert_eq!(provider.name(), "static");
    }

    #[test]
    fn test_retryable_classification() {
        assert!(ProviderError::Timeout(Duration::from_secs(30)).is_retryable());
        assert!(ProviderError::Unavailable("connection refused".into()).is_retryable());
        assert!(
            ProviderError::Status {
                status: 503,
                body: String::new()
            }
            .is_retryable()
        );
        assert!(
            !ProviderError::Status {
                status: 422,
                body: String::new()
            }
            .is_retryable()
        );
        assert!(!ProviderError::InvalidResponse("bad json".into()).is_retryable());
    }
}
