use crate::models::UsageIntent;
use std::env;
use std::path::PathBuf;
use std::str::FromStr;
use std::time::Duration;

fn env_parse<T: FromStr>(key: &str, default: T) -> T {
    env::var(key)
        .ok()
        .and_then(|v| v.parse().ok())
        .unwrap_or(default)
}

fn env_list(key: &str, default: &[&str]) -> Vec<String> {
    env::var(key)
        .ok()
        .map(|v| {
            v.split(',')
                .map(|s| s.trim().to_lowercase())
                .filter(|s| !s.is_empty())
                .collect()
        })
        .unwrap_or_else(|| default.iter().map(|s| s.to_string()).collect())
}

/// Per-usage-intent policy thresholds. All scores are 0-100.
#[derive(Debug, Clone, PartialEq)]
pub struct PolicyRules {
    /// Nudity scores at or below this auto-approve without blurring.
    pub nudity_floor: f64,
    /// Nudity scores above this are flagged for human review. The boundary
    /// is inclusive on the approve side: a score equal to the ceiling is
    /// still blurred-approved, a score strictly above it is flagged.
    pub nudity_ceiling: f64,
    /// Explicit-pose scores above this are flagged regardless of nudity.
    pub pose_score_ceiling: f64,
    /// Keywords in the generated description that count as policy violations
    /// for this intent.
    pub banned_keywords: Vec<String>,
}

/// Policy thresholds keyed by usage intent, plus the weights of the combined
/// risk formula. Operators tune these per deployment; the policy engine never
/// reads the process environment directly.
#[derive(Debug, Clone, PartialEq)]
pub struct PolicyConfig {
    pub public_site: PolicyRules,
    pub paysite: PolicyRules,
    pub private: PolicyRules,

    /// Weight of the nudity score in the combined risk formula.
    pub nudity_weight: f64,
    /// Weight of the explicit-pose score in the combined risk formula.
    pub pose_weight: f64,
    /// Risk multiplier applied when an underage face is detected.
    pub underage_multiplier: f64,
    /// Risk multiplier applied when a face below the suspicious-age
    /// threshold (but not underage) is detected.
    pub suspicious_age_multiplier: f64,
}

impl PolicyConfig {
    pub fn rules_for(&self, intent: UsageIntent) -> &PolicyRules {
        match intent {
            UsageIntent::PublicSite => &self.public_site,
            UsageIntent::Paysite => &self.paysite,
            UsageIntent::Private => &self.private,
        }
    }

    pub fn from_env() -> Self {
        let default = Self::default();
        Self {
            public_site: PolicyRules {
                nudity_floor: env_parse(
                    "PUBLIC_SITE_NUDITY_FLOOR",
                    default.public_site.nudity_floor,
                ),
                nudity_ceiling: env_parse(
                    "PUBLIC_SITE_NUDITY_CEILING",
                    default.public_site.nudity_ceiling,
                ),
                pose_score_ceiling: env_parse(
                    "PUBLIC_SITE_POSE_CEILING",
                    default.public_site.pose_score_ceiling,
                ),
                banned_keywords: env_list("PUBLIC_SITE_BANNED_KEYWORDS", &["sexual", "explicit"]),
            },
            paysite: PolicyRules {
                nudity_floor: env_parse("PAYSITE_NUDITY_FLOOR", default.paysite.nudity_floor),
                nudity_ceiling: env_parse("PAYSITE_NUDITY_CEILING", default.paysite.nudity_ceiling),
                pose_score_ceiling: env_parse(
                    "PAYSITE_POSE_CEILING",
                    default.paysite.pose_score_ceiling,
                ),
                banned_keywords: env_list("PAYSITE_BANNED_KEYWORDS", &["illegal", "violence"]),
            },
            private: PolicyRules {
                nudity_floor: env_parse("PRIVATE_NUDITY_FLOOR", default.private.nudity_floor),
                nudity_ceiling: env_parse("PRIVATE_NUDITY_CEILING", default.private.nudity_ceiling),
                pose_score_ceiling: env_parse(
                    "PRIVATE_POSE_CEILING",
                    default.private.pose_score_ceiling,
                ),
                banned_keywords: env_list("PRIVATE_BANNED_KEYWORDS", &["illegal", "violence"]),
            },
            nudity_weight: env_parse("RISK_NUDITY_WEIGHT", default.nudity_weight),
            pose_weight: env_parse("RISK_POSE_WEIGHT", default.pose_weight),
            underage_multiplier: env_parse("RISK_UNDERAGE_MULTIPLIER", default.underage_multiplier),
            suspicious_age_multiplier: env_parse(
                "RISK_SUSPICIOUS_AGE_MULTIPLIER",
                default.suspicious_age_multiplier,
            ),
        }
    }
}

impl Default for PolicyConfig {
    fn default() -> Self {
        Self {
            public_site: PolicyRules {
                nudity_floor: 15.0,
                nudity_ceiling: 40.0,
                pose_score_ceiling: 25.0,
                banned_keywords: vec!["sexual".into(), "explicit".into()],
            },
            paysite: PolicyRules {
                nudity_floor: 85.0,
                nudity_ceiling: 95.0,
                pose_score_ceiling: 75.0,
                banned_keywords: vec!["illegal".into(), "violence".into()],
            },
            private: PolicyRules {
                nudity_floor: 90.0,
                nudity_ceiling: 100.0,
                pose_score_ceiling: 90.0,
                banned_keywords: vec!["illegal".into(), "violence".into()],
            },
            nudity_weight: 0.7,
            pose_weight: 0.3,
            underage_multiplier: 3.0,
            suspicious_age_multiplier: 1.5,
        }
    }
}

/// Service configuration for uploads, the analysis provider, callbacks and
/// storage cleanup.
#[derive(Debug, Clone)]
pub struct ModerationConfig {
    /// Root directory of the per-tenant media trees.
    pub media_root: PathBuf,

    /// Maximum upload size in bytes (default: 25 MB).
    pub max_file_size: usize,

    /// Maximum accepted image width in pixels (default: 8000).
    pub max_pixel_width: u32,

    /// Maximum accepted image height in pixels (default: 8000).
    pub max_pixel_height: u32,

    /// Lowercase extension allow-list for uploads.
    pub allowed_extensions: Vec<String>,

    /// Analysis Provider kind: "http" or "static" (default: "http").
    pub provider_kind: String,

    /// Base URL of the Analysis Provider.
    pub provider_base_url: String,

    /// Per-call provider timeout in seconds (default: 30).
    pub provider_timeout_secs: u64,

    /// Synchronous provider-call retries before recording an error verdict
    /// (default: 3).
    pub provider_max_retries: u32,

    /// Backoff base for synchronous provider retries, in milliseconds
    /// (default: 500, doubled per attempt).
    pub provider_backoff_base_ms: u64,

    /// Callback-level retry ceiling before a pending callback times out
    /// (default: 5).
    pub callback_max_retries: i32,

    /// Callback retry backoff base in seconds (default: 60, doubled per
    /// retry).
    pub retry_backoff_base_secs: u64,

    /// Callback retry backoff cap in seconds (default: 3600).
    pub retry_backoff_cap_secs: u64,

    /// Age threshold for temp/orphan reclamation in seconds (default: 24 h).
    pub cleanup_max_age_secs: u64,

    /// Interval of the background cleanup/sweep timer in seconds
    /// (default: 1 h).
    pub cleanup_interval_secs: u64,

    /// Bound on simultaneous provider calls (default: 3).
    pub max_concurrent_analyses: usize,

    /// Sigma of the gaussian blur applied to `approved_blurred` copies
    /// (default: 12.0).
    pub blur_sigma: f32,

    pub policy: PolicyConfig,
}

impl Default for ModerationConfig {
    fn default() -> Self {
        Self {
            media_root: PathBuf::from("./data/media"),
            max_file_size: 25 * 1024 * 1024,
            max_pixel_width: 8000,
            max_pixel_height: 8000,
            allowed_extensions: ["jpg", "jpeg", "png", "gif", "webp"]
                .iter()
                .map(|s| s.to_string())
                .collect(),
            provider_kind: "http".to_string(),
            provider_base_url: "http://127.0.0.1:5000".to_string(),
            provider_timeout_secs: 30,
            provider_max_retries: 3,
            provider_backoff_base_ms: 500,
            callback_max_retries: 5,
            retry_backoff_base_secs: 60,
            retry_backoff_cap_secs: 3600,
            cleanup_max_age_secs: 24 * 3600,
            cleanup_interval_secs: 3600,
            max_concurrent_analyses: 3,
            blur_sigma: 12.0,
            policy: PolicyConfig::default(),
        }
    }
}

impl ModerationConfig {
    /// Load configuration from environment variables, falling back to the
    /// documented defaults per field.
    pub fn from_env() -> Self {
        let default = Self::default();

        Self {
            media_root: env::var("MEDIA_ROOT")
                .map(PathBuf::from)
                .unwrap_or(default.media_root),
            max_file_size: env_parse("MAX_FILE_SIZE", default.max_file_size),
            max_pixel_width: env_parse("MAX_PIXEL_WIDTH", default.max_pixel_width),
            max_pixel_height: env_parse("MAX_PIXEL_HEIGHT", default.max_pixel_height),
            allowed_extensions: env_list(
                "ALLOWED_EXTENSIONS",
                &["jpg", "jpeg", "png", "gif", "webp"],
            ),
            provider_kind: env::var("ANALYSIS_PROVIDER").unwrap_or(default.provider_kind),
            provider_base_url: env::var("ANALYSIS_PROVIDER_URL")
                .unwrap_or(default.provider_base_url),
            provider_timeout_secs: env_parse("PROVIDER_TIMEOUT_SECS", default.provider_timeout_secs),
            provider_max_retries: env_parse("PROVIDER_MAX_RETRIES", default.provider_max_retries),
            provider_backoff_base_ms: env_parse(
                "PROVIDER_BACKOFF_BASE_MS",
                default.provider_backoff_base_ms,
            ),
            callback_max_retries: env_parse("CALLBACK_MAX_RETRIES", default.callback_max_retries),
            retry_backoff_base_secs: env_parse(
                "RETRY_BACKOFF_BASE_SECS",
                default.retry_backoff_base_secs,
            ),
            retry_backoff_cap_secs: env_parse(
                "RETRY_BACKOFF_CAP_SECS",
                default.retry_backoff_cap_secs,
            ),
            cleanup_max_age_secs: env_parse("CLEANUP_MAX_AGE_SECS", default.cleanup_max_age_secs),
            cleanup_interval_secs: env_parse(
                "CLEANUP_INTERVAL_SECS",
                default.cleanup_interval_secs,
            ),
            max_concurrent_analyses: env_parse(
                "MAX_CONCURRENT_ANALYSES",
                default.max_concurrent_analyses,
            ),
            blur_sigma: env_parse("BLUR_SIGMA", default.blur_sigma),
            policy: PolicyConfig::from_env(),
        }
    }

    /// Reject configurations that would make the pipeline misbehave instead
    /// of letting a bad threshold surface as a wrong verdict at runtime.
    pub fn validate(&self) -> anyhow::Result<()> {
        if self.max_file_size == 0 {
            anyhow::bail!("MAX_FILE_SIZE must be greater than zero");
        }
        if self.allowed_extensions.is_empty() {
            anyhow::bail!("ALLOWED_EXTENSIONS must not be empty");
        }
        if self.max_concurrent_analyses == 0 {
            anyhow::bail!("MAX_CONCURRENT_ANALYSES must be at least 1");
        }
        if self.retry_backoff_cap_secs < self.retry_backoff_base_secs {
            anyhow::bail!("RETRY_BACKOFF_CAP_SECS must be >= RETRY_BACKOFF_BASE_SECS");
        }
        if self.callback_max_retries < 0 {
            anyhow::bail!("CALLBACK_MAX_RETRIES must not be negative");
        }
        if self.policy.nudity_weight < 0.0 || self.policy.pose_weight < 0.0 {
            anyhow::bail!("risk weights must not be negative");
        }
        for (intent, rules) in [
            (UsageIntent::PublicSite, &self.policy.public_site),
            (UsageIntent::Paysite, &self.policy.paysite),
            (UsageIntent::Private, &self.policy.private),
        ] {
            if rules.nudity_floor > rules.nudity_ceiling {
                anyhow::bail!(
                    "{}: nudity floor {} exceeds ceiling {}",
                    intent,
                    rules.nudity_floor,
                    rules.nudity_ceiling
                );
            }
        }
        Ok(())
    }

    pub fn provider_timeout(&self) -> Duration {
        Duration::from_secs(self.provider_timeout_secs)
    }

    pub fn cleanup_max_age(&self) -> Duration {
        Duration::from_secs(self.cleanup_max_age_secs)
    }

    pub fn cleanup_interval(&self) -> Duration {
        Duration::from_secs(self.cleanup_interval_secs)
    }

    /// Exponential callback backoff: base doubled per retry, capped.
    pub fn callback_backoff(&self, retry_count: i32) -> Duration {
        let exp = retry_count.clamp(0, 20) as u32;
        let secs = self
            .retry_backoff_base_secs
            .saturating_mul(1u64 << exp)
            .min(self.retry_backoff_cap_secs);
        Duration::from_secs(secs)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_default_config_is_valid() {
        let config = ModerationConfig::default();
        assert!(config.validate().is_ok());
        assert_eq!(config.max_file_size, 25 * 1024 * 1024);
        assert_eq!(config.provider_timeout_secs, 30);
        assert_eq!(config.callback_max_retries, 5);
        assert_eq!(config.cleanup_max_age_secs, 24 * 3600);
        assert_eq!(config.max_concurrent_analyses, 3);
    }

    #[test]
    fn test_policy_rules_for_intents() {
        let policy = PolicyConfig::default();
        assert_eq!(
            policy.rules_for(UsageIntent::PublicSite).nudity_ceiling,
            40.0
        );
        assert_eq!(policy.rules_for(UsageIntent::Paysite).nudity_floor, 85.0);
        assert!(
            policy.rules_for(UsageIntent::Private).nudity_ceiling
                >= policy.rules_for(UsageIntent::Paysite).nudity_ceiling
        );
    }

    #[test]
    fn test_invalid_thresholds_rejected() {
        let mut config = ModerationConfig::default();
        config.policy.public_site.nudity_floor = 80.0;
        config.policy.public_site.nudity_ceiling = 40.0;
        assert!(config.validate().is_err());
    }

    #[test]
    fn test_backoff_is_capped() {
        let config = ModerationConfig::default();
        assert_eq!(config.callback_backoff(0), Duration::from_secs(60));
        assert_eq!(config.callback_backoff(1), Duration::from_secs(120));
        assert_eq!(config.callback_backoff(2), Duration::from_secs(240));
        assert_eq!(config.callback_backoff(10), Duration::from_secs(3600));
        assert_eq!(config.callback_backoff(20), Duration::from_secs(3600));
    }
}
