use serde::{Deserialize, Serialize};
use utoipa::ToSchema;

/// Publication context of an image. Determines which policy thresholds apply.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, ToSchema)]
#[serde(rename_all = "snake_case")]
pub enum UsageIntent {
    PublicSite,
    Paysite,
    Private,
}

impl UsageIntent {
    pub fn as_str(&self) -> &'static str {
        match self {
            UsageIntent::PublicSite => "public_site",
            UsageIntent::Paysite => "paysite",
            UsageIntent::Private => "private",
        }
    }

    pub fn parse(s: &str) -> Option<Self> {
        match s {
            "public_site" => Some(UsageIntent::PublicSite),
            "paysite" => Some(UsageIntent::Paysite),
            "private" => Some(UsageIntent::Private),
            _ => None,
        }
    }
}

impl std::fmt::Display for UsageIntent {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Terminal moderation classification of a record.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, ToSchema)]
#[serde(rename_all = "snake_case")]
pub enum Verdict {
    Pending,
    Approved,
    ApprovedBlurred,
    Flagged,
    Rejected,
    Error,
}

impl Verdict {
    pub fn as_str(&self) -> &'static str {
        match self {
            Verdict::Pending => "pending",
            Verdict::Approved => "approved",
            Verdict::ApprovedBlurred => "approved_blurred",
            Verdict::Flagged => "flagged",
            Verdict::Rejected => "rejected",
            Verdict::Error => "error",
        }
    }

    pub fn parse(s: &str) -> Option<Self> {
        match s {
            "pending" => Some(Verdict::Pending),
            "approved" => Some(Verdict::Approved),
            "approved_blurred" => Some(Verdict::ApprovedBlurred),
            "flagged" => Some(Verdict::Flagged),
            "rejected" => Some(Verdict::Rejected),
            "error" => Some(Verdict::Error),
            _ => None,
        }
    }

    pub fn is_terminal(&self) -> bool {
        !matches!(self, Verdict::Pending)
    }

    /// Verdicts move only forward: `pending` to any terminal state, and
    /// `approved` may still be downgraded to `approved_blurred`. Everything
    /// else requires an explicit human override through the review queue.
    pub fn can_transition_to(&self, next: Verdict) -> bool {
        match self {
            Verdict::Pending => next.is_terminal(),
            Verdict::Approved => next == Verdict::ApprovedBlurred,
            _ => false,
        }
    }
}

impl std::fmt::Display for Verdict {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Coarse risk bucket derived from the combined risk score.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, ToSchema)]
#[serde(rename_all = "snake_case")]
pub enum RiskLevel {
    Minimal,
    Low,
    Medium,
    High,
    Critical,
}

impl RiskLevel {
    pub fn from_score(score: f64) -> Self {
        if score >= 80.0 {
            RiskLevel::Critical
        } else if score >= 60.0 {
            RiskLevel::High
        } else if score >= 40.0 {
            RiskLevel::Medium
        } else if score >= 20.0 {
            RiskLevel::Low
        } else {
            RiskLevel::Minimal
        }
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            RiskLevel::Minimal => "minimal",
            RiskLevel::Low => "low",
            RiskLevel::Medium => "medium",
            RiskLevel::High => "high",
            RiskLevel::Critical => "critical",
        }
    }
}

/// Bounding box of a detected body part, in image pixel coordinates.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, ToSchema)]
pub struct PartRegion {
    pub x: i32,
    pub y: i32,
    pub width: i32,
    pub height: i32,
}

/// A single body-part detection with its confidence (0-100).
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, ToSchema)]
pub struct DetectedPart {
    pub label: String,
    pub confidence: f64,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub region: Option<PartRegion>,
}

/// Nudity section of the provider response. Scores are 0-100.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, ToSchema)]
pub struct NudityDetection {
    pub nudity_score: f64,
    pub has_nudity: bool,
    #[serde(default)]
    pub detected_parts: Vec<DetectedPart>,
}

/// Face detection and age estimation section.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, ToSchema)]
pub struct FaceAnalysis {
    pub faces_detected: bool,
    pub face_count: u32,
    pub min_age: Option<u32>,
    pub max_age: Option<u32>,
    pub underage_detected: bool,
    /// Minimum detected age below the suspicious threshold but above the
    /// hard underage cutoff.
    #[serde(default)]
    pub suspicious_ages: bool,
}

/// Pose classification section. `explicit_pose_score` is 0-100.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, ToSchema)]
pub struct PoseAnalysis {
    pub pose_detected: bool,
    pub pose_classification: String,
    pub explicit_pose_score: f64,
}

/// Generated caption and keyword tags.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, ToSchema)]
pub struct ImageDescription {
    pub description: String,
    #[serde(default)]
    pub tags: Vec<String>,
}

/// Provider-side combined assessment, stored verbatim for audit.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, ToSchema)]
pub struct CombinedAssessment {
    pub final_risk_score: f64,
    pub risk_level: String,
    #[serde(default = "default_multiplier")]
    pub age_risk_multiplier: f64,
    #[serde(default)]
    pub reasoning: Vec<String>,
}

fn default_multiplier() -> f64 {
    1.0
}

/// Full analysis payload returned by the Analysis Provider.
///
/// Every section is optional on the wire; the policy engine treats a missing
/// section as an incomplete analysis and fails safe with an `error` verdict.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize, ToSchema)]
pub struct AnalysisSignals {
    pub nudity_detection: Option<NudityDetection>,
    pub face_analysis: Option<FaceAnalysis>,
    pub pose_analysis: Option<PoseAnalysis>,
    pub image_description: Option<ImageDescription>,
    pub combined_assessment: Option<CombinedAssessment>,
}

impl AnalysisSignals {
    /// True when every section required for a policy decision is present.
    pub fn is_complete(&self) -> bool {
        self.nudity_detection.is_some()
            && self.face_analysis.is_some()
            && self.pose_analysis.is_some()
    }
}

/// Payload delivered by the provider for an asynchronous batch.
#[derive(Debug, Clone, Serialize, Deserialize, ToSchema)]
pub struct CallbackDelivery {
    pub moderation_status: String,
    pub moderation_score: f64,
    /// Opaque provider blob, persisted verbatim for audit.
    #[serde(default)]
    pub callback_data: serde_json::Value,
}
