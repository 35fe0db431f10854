use crate::config::PolicyConfig;
use crate::models::{AnalysisSignals, RiskLevel, UsageIntent, Verdict};
use serde::Serialize;
use utoipa::ToSchema;

/// Outcome of evaluating one analysis result against the policy for a usage
/// intent. Pure data; persisting it and moving files is the orchestrator's
/// job.
#[derive(Debug, Clone, Serialize, ToSchema)]
pub struct PolicyDecision {
    pub verdict: Verdict,
    pub combined_risk_score: f64,
    pub risk_level: RiskLevel,
    pub age_risk_multiplier: f64,
    pub human_review_required: bool,
    /// Set only for the non-bypassable underage rejection.
    pub auto_blocked: bool,
    pub policy_violations: Vec<String>,
    /// Human-readable trail of why the verdict came out this way.
    pub reasons: Vec<String>,
    pub confidence_score: f64,
}

/// Maps raw analysis signals to a verdict. Deterministic and side-effect
/// free: same signals, same intent, same config, same decision.
pub struct PolicyEngine {
    config: PolicyConfig,
}

impl PolicyEngine {
    pub fn new(config: PolicyConfig) -> Self {
        Self { config }
    }

    pub fn evaluate(&self, signals: &AnalysisSignals, intent: UsageIntent) -> PolicyDecision {
        let mut reasons = Vec::new();

        // Underage detection overrides everything, including incomplete
        // signals elsewhere in the payload. There is no threshold that makes
        // this pass.
        if let Some(faces) = &signals.face_analysis {
            if faces.underage_detected {
                let multiplier = self.config.underage_multiplier;
                let score = self.combined_score(signals, multiplier);
                reasons.push(format!(
                    "underage face detected (min age {:?})",
                    faces.min_age
                ));
                return PolicyDecision {
                    verdict: Verdict::Rejected,
                    combined_risk_score: score,
                    risk_level: RiskLevel::from_score(score),
                    age_risk_multiplier: multiplier,
                    human_review_required: true,
                    auto_blocked: true,
                    policy_violations: vec!["underage_content".to_string()],
                    reasons,
                    confidence_score: confidence(signals),
                };
            }
        }

        // Fail safe: a decision on partial signals could publish something
        // that a complete analysis would have blocked.
        let (nudity, faces, pose) = match (
            &signals.nudity_detection,
            &signals.face_analysis,
            &signals.pose_analysis,
        ) {
            (Some(n), Some(f), Some(p)) => (n, f, p),
            (n, f, p) => {
                let mut missing = Vec::new();
                if n.is_none() {
                    missing.push("nudity_detection");
                }
                if f.is_none() {
                    missing.push("face_analysis");
                }
                if p.is_none() {
                    missing.push("pose_analysis");
                }
                reasons.push(format!("incomplete analysis: missing {}", missing.join(", ")));
                return PolicyDecision {
                    verdict: Verdict::Error,
                    combined_risk_score: 0.0,
                    risk_level: RiskLevel::Minimal,
                    age_risk_multiplier: 1.0,
                    human_review_required: true,
                    auto_blocked: false,
                    policy_violations: vec![],
                    reasons,
                    confidence_score: 0.0,
                };
            }
        };
        let rules = self.config.rules_for(intent);

        let multiplier = if faces.suspicious_ages {
            self.config.suspicious_age_multiplier
        } else {
            1.0
        };
        let score = self.combined_score(signals, multiplier);
        let risk_level = RiskLevel::from_score(score);

        let mut violations = Vec::new();
        if let Some(description) = &signals.image_description {
            let haystack = format!(
                "{} {}",
                description.description.to_lowercase(),
                description.tags.join(" ").to_lowercase()
            );
            for keyword in &rules.banned_keywords {
                if haystack.contains(keyword.as_str()) {
                    violations.push(format!("banned_keyword:{}", keyword));
                }
            }
        }

        let mut flagged = false;
        if !violations.is_empty() {
            flagged = true;
            reasons.push(format!(
                "description contains banned keywords: {:?}",
                violations
            ));
        }
        if pose.explicit_pose_score > rules.pose_score_ceiling {
            flagged = true;
            reasons.push(format!(
                "explicit pose score {} exceeds {} ceiling {}",
                pose.explicit_pose_score, intent, rules.pose_score_ceiling
            ));
        }
        if nudity.nudity_score > rules.nudity_ceiling {
            flagged = true;
            reasons.push(format!(
                "nudity score {} exceeds {} ceiling {}",
                nudity.nudity_score, intent, rules.nudity_ceiling
            ));
        }
        if risk_level == RiskLevel::Critical {
            flagged = true;
            reasons.push(format!("combined risk score {} is critical", score));
        }

        let verdict = if flagged {
            Verdict::Flagged
        } else if nudity.nudity_score <= rules.nudity_floor {
            reasons.push(format!(
                "nudity score {} within {} auto-approve floor {}",
                nudity.nudity_score, intent, rules.nudity_floor
            ));
            Verdict::Approved
        } else {
            // Between floor and ceiling (ceiling inclusive): publishable only
            // with the blurred copy.
            reasons.push(format!(
                "nudity score {} between {} floor {} and ceiling {}",
                nudity.nudity_score, intent, rules.nudity_floor, rules.nudity_ceiling
            ));
            Verdict::ApprovedBlurred
        };

        PolicyDecision {
            verdict,
            combined_risk_score: score,
            risk_level,
            age_risk_multiplier: multiplier,
            human_review_required: flagged,
            auto_blocked: false,
            policy_violations: violations,
            reasons,
            confidence_score: confidence(signals),
        }
    }

    /// `min(100, (w_n * nudity + w_p * pose) * age_multiplier)`.
    fn combined_score(&self, signals: &AnalysisSignals, multiplier: f64) -> f64 {
        let nudity = signals
            .nudity_detection
            .as_ref()
            .map(|n| n.nudity_score)
            .unwrap_or(0.0);
        let pose = signals
            .pose_analysis
            .as_ref()
            .map(|p| p.explicit_pose_score)
            .unwrap_or(0.0);
        let base = self.config.nudity_weight * nudity + self.config.pose_weight * pose;
        (base * multiplier).min(100.0)
    }
}

/// Mean confidence across detected parts; full confidence when the image had
/// nothing to detect.
fn confidence(signals: &AnalysisSignals) -> f64 {
    let parts = signals
        .nudity_detection
        .as_ref()
        .map(|n| n.detected_parts.as_slice())
        .unwrap_or(&[]);
    if parts.is_empty() {
        100.0
    } else {
        parts.iter().map(|p| p.confidence).sum::<f64>() / parts.len() as f64
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::{FaceAnalysis, ImageDescription, NudityDetection, PoseAnalysis};
    use crate::services::provider::benign_signals;

    fn engine() -> PolicyEngine {
        PolicyEngine::new(PolicyConfig::default())
    }

    fn signals(nudity: f64, pose: f64) -> AnalysisSignals {
        let mut s = benign_signals();
        s.nudity_detection = Some(NudityDetection {
            nudity_score: nudity,
            has_nudity: nudity > 0.0,
            detected_parts: vec![],
        });
        s.pose_analysis = Some(PoseAnalysis {
            pose_detected: pose > 0.0,
            pose_classification: "standing".to_string(),
            explicit_pose_score: pose,
        });
        s
    }

    #[test]
    fn test_underage_rejected_regardless_of_scores() {
        let mut s = signals(0.0, 0.0);
        s.face_analysis = Some(FaceAnalysis {
            faces_detected: true,
            face_count: 1,
            min_age: Some(15),
            max_age: Some(15),
            underage_detected: true,
            suspicious_ages: false,
        });

        for intent in [
            UsageIntent::PublicSite,
            UsageIntent::Paysite,
            UsageIntent::Private,
        ] {
            let decision = engine().evaluate(&s, intent);
            assert_eq!(decision.verdict, Verdict::Rejected);
            assert!(decision.auto_blocked);
            assert!(decision.human_review_required);
            assert_eq!(decision.age_risk_multiplier, 3.0);
            assert!(
                decision
                    .policy_violations
                    .contains(&"underage_content".to_string())
            );
        }
    }

    #[test]
    fn test_missing_signals_fail_safe() {
        let mut s = signals(5.0, 0.0);
        s.pose_analysis = None;

        let decision = engine().evaluate(&s, UsageIntent::Private);
        assert_eq!(decision.verdict, Verdict::Error);
        assert!(decision.human_review_required);
        assert!(!decision.auto_blocked);
    }

    #[test]
    fn test_public_site_ceiling_boundary() {
        // Exactly at the ceiling: still blurred-approved.
        let at = engine().evaluate(&signals(40.0, 0.0), UsageIntent::PublicSite);
        assert_eq!(at.verdict, Verdict::ApprovedBlurred);
        assert!(!at.human_review_required);

        // Strictly above: flagged.
        let above = engine().evaluate(&signals(41.0, 0.0), UsageIntent::PublicSite);
        assert_eq!(above.verdict, Verdict::Flagged);
        assert!(above.human_review_required);
    }

    #[test]
    fn test_paysite_tolerates_high_nudity() {
        let decision = engine().evaluate(&signals(85.0, 0.0), UsageIntent::Paysite);
        assert_eq!(decision.verdict, Verdict::Approved);

        // The same score is far past the public-site ceiling.
        let public = engine().evaluate(&signals(85.0, 0.0), UsageIntent::PublicSite);
        assert_eq!(public.verdict, Verdict::Flagged);
    }

    #[test]
    fn test_pose_ceiling_flags_independently() {
        let decision = engine().evaluate(&signals(5.0, 30.0), UsageIntent::PublicSite);
        assert_eq!(decision.verdict, Verdict::Flagged);
    }

    #[test]
    fn test_combined_score_formula() {
        let decision = engine().evaluate(&signals(50.0, 30.0), UsageIntent::Paysite);
        // 0.7 * 50 + 0.3 * 30 = 44
        assert!((decision.combined_risk_score - 44.0).abs() < 1e-9);
        assert_eq!(decision.risk_level, RiskLevel::Medium);
    }

    #[test]
    fn test_suspicious_age_multiplier_applies() {
        let mut s = signals(50.0, 30.0);
        s.face_analysis = Some(FaceAnalysis {
            faces_detected: true,
            face_count: 1,
            min_age: Some(19),
            max_age: Some(25),
            underage_detected: false,
            suspicious_ages: true,
        });
        let decision = engine().evaluate(&s, UsageIntent::Paysite);
        // 44 * 1.5 = 66
        assert!((decision.combined_risk_score - 66.0).abs() < 1e-9);
        assert_eq!(decision.risk_level, RiskLevel::High);
        assert_eq!(decision.age_risk_multiplier, 1.5);
    }

    #[test]
    fn test_combined_score_is_capped() {
        let mut s = signals(100.0, 100.0);
        s.face_analysis = Some(FaceAnalysis {
            faces_detected: true,
            face_count: 1,
            min_age: Some(19),
            max_age: Some(19),
            underage_detected: false,
            suspicious_ages: true,
        });
        let decision = engine().evaluate(&s, UsageIntent::Private);
        assert_eq!(decision.combined_risk_score, 100.0);
    }

    #[test]
    fn test_banned_keywords_flag() {
        let mut s = signals(5.0, 0.0);
        s.image_description = Some(ImageDescription {
            description: "Explicit content on a beach".to_string(),
            tags: vec!["beach".to_string()],
        });
        let decision = engine().evaluate(&s, UsageIntent::PublicSite);
        assert_eq!(decision.verdict, Verdict::Flagged);
        assert_eq!(
            decision.policy_violations,
            vec!["banned_keyword:explicit".to_string()]
        );

        // Paysite does not ban "explicit".
        let paysite = engine().evaluate(&s, UsageIntent::Paysite);
        assert_eq!(paysite.verdict, Verdict::Approved);
    }

    #[test]
    fn test_decision_is_deterministic() {
        let s = signals(33.0, 10.0);
        let a = engine().evaluate(&s, UsageIntent::PublicSite);
        let b = engine().evaluate(&s, UsageIntent::PublicSite);
        assert_eq!(a.verdict, b.verdict);
        assert_eq!(a.combined_risk_score, b.combined_risk_score);
        assert_eq!(a.reasons, b.reasons);
    }
}
