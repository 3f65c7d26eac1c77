use chrono::{DateTime, Utc};
use kontur_core::codec::canonical_json;
use kontur_core::config::GuardianConfig;
use serde::Serialize;
use serde_json::Value;

/// Upper bound of the accumulated score.
pub const MAX_SCORE: u32 = 100;

// ============================================================================
// Assessment types
// ============================================================================

#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum ThreatLevel {
    Low,
    Medium,
    High,
    Critical,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "UPPERCASE")]
pub enum Recommendation {
    Allow,
    Review,
    Block,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum Severity {
    Medium,
    High,
    Critical,
}

/// One signal that contributed to the score.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct Threat {
    /// `dangerous_operation`, a category name, or `resource_intensive`.
    #[serde(rename = "type")]
    pub kind: String,
    /// The matched operation name or pattern literal, or a reason.
    pub detail: String,
    pub severity: Severity,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct Assessment {
    pub score: u32,
    pub level: ThreatLevel,
    pub threats: Vec<Threat>,
    pub recommendation: Recommendation,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct AuditResult {
    pub audit_id: String,
    pub timestamp: DateTime<Utc>,
    pub operation: String,
    pub assessment: Assessment,
    pub allowed: bool,
    pub requires_approval: bool,
}

// ============================================================================
// PolicyEngine
// ============================================================================

/// Scores operations and keeps a smoothed, decaying threat level.
pub struct PolicyEngine {
    config: GuardianConfig,
    threat_level: f64,
    audits_performed: u64,
}

impl PolicyEngine {
    pub fn new(config: GuardianConfig) -> Self {
        Self {
            config,
            threat_level: 0.0,
            audits_performed: 0,
        }
    }

    pub fn config(&self) -> &GuardianConfig {
        &self.config
    }

    pub fn threat_level(&self) -> f64 {
        self.threat_level
    }

    pub fn audits_performed(&self) -> u64 {
        self.audits_performed
    }

    /// Score `operation` with its arguments and fold the result into the
    /// running threat level.
    pub fn audit(&mut self, operation: &str, args: &Value) -> AuditResult {
        self.audits_performed += 1;

        let analysis = format!("{} {}", operation, canonical_json(args));
        let assessment = self.assess(&analysis);

        self.threat_level = (self.threat_level * self.config.smoothing)
            .max(f64::from(assessment.score) * self.config.sample_scale);

        tracing::debug!(
            "Audit of '{}': score={} level={:?} threat_level={:.3}",
            operation,
            assessment.score,
            assessment.level,
            self.threat_level
        );

        let score = assessment.score;
        AuditResult {
            audit_id: format!("audit-{}", uuid::Uuid::new_v4()),
            timestamp: Utc::now(),
            operation: operation.to_string(),
            assessment,
            allowed: score <= self.config.high_above,
            requires_approval: score > self.config.approval_above,
        }
    }

    /// Score an analysis string without touching engine state.
    pub fn assess(&self, analysis: &str) -> Assessment {
        let cfg = &self.config;
        let mut threats = Vec::new();
        let mut score: u32 = 0;

        let lowered = analysis.to_lowercase();
        for op in &cfg.dangerous_operations {
            if lowered.contains(op.as_str()) {
                threats.push(Threat {
                    kind: "dangerous_operation".to_string(),
                    detail: op.clone(),
                    severity: Severity::High,
                });
                score = score.saturating_add(cfg.dangerous_weight);
            }
        }

        for category in &cfg.categories {
            let severity = if category.is_critical() {
                Severity::Critical
            } else {
                Severity::High
            };
            for pattern in &category.patterns {
                if analysis.contains(pattern.as_str()) {
                    threats.push(Threat {
                        kind: category.name.clone(),
                        detail: pattern.clone(),
                        severity,
                    });
                    score = score.saturating_add(cfg.pattern_weight);
                }
            }
        }

        if analysis.chars().count() > cfg.large_payload_chars {
            threats.push(Threat {
                kind: "resource_intensive".to_string(),
                detail: "large payload".to_string(),
                severity: Severity::Medium,
            });
            score = score.saturating_add(cfg.large_payload_weight);
        }

        let score = score.min(MAX_SCORE);
        let (level, recommendation) = classify(score, cfg);
        Assessment {
            score,
            level,
            threats,
            recommendation,
        }
    }

    /// Periodic floor decay, independent of audits.
    pub fn passive_decay(&mut self) {
        self.threat_level = (self.threat_level - self.config.decay_amount).max(0.0);
    }

    /// Apply [`Self::passive_decay`] when `packet_count` lands on the decay cadence.
    pub fn on_packet(&mut self, packet_count: u64) {
        if self.config.decay_every > 0 && packet_count % self.config.decay_every == 0 {
            self.passive_decay();
            tracing::debug!(
                "Passive decay at packet {}: threat_level={:.3}",
                packet_count,
                self.threat_level
            );
        }
    }
}

/// Map a clamped score to its level and recommendation.
pub fn classify(score: u32, config: &GuardianConfig) -> (ThreatLevel, Recommendation) {
    let level = if score > config.critical_above {
        ThreatLevel::Critical
    } else if score > config.high_above {
        ThreatLevel::High
    } else if score > config.medium_above {
        ThreatLevel::Medium
    } else {
        ThreatLevel::Low
    };
    let recommendation = if score > config.critical_above {
        Recommendation::Block
    } else if score > config.high_above {
        Recommendation::Review
    } else {
        Recommendation::Allow
    };
    (level, recommendation)
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn engine() -> PolicyEngine {
        PolicyEngine::new(GuardianConfig::default())
    }

    #[test]
    fn test_execute_code_with_eval_scores_medium() {
        let mut engine = engine();
        let result = engine.audit("execute_code", &json!({"code": "eval(input())"}));

        assert_eq!(result.assessment.score, 8);
        assert_eq!(result.assessment.level, ThreatLevel::Medium);
        assert_eq!(result.assessment.recommendation, Recommendation::Allow);
        assert!(result.allowed);
        assert!(!result.requires_approval);

        let kinds: Vec<&str> = result.assessment.threats.iter().map(|t| t.kind.as_str()).collect();
        assert_eq!(kinds, vec!["dangerous_operation", "code_injection"]);
        assert_eq!(result.assessment.threats[1].severity, Severity::Critical);
        assert_eq!(engine.audits_performed(), 1);
    }

    #[test]
    fn test_classify_critical_boundary() {
        let cfg = GuardianConfig::default();
        assert_eq!(classify(55, &cfg), (ThreatLevel::Critical, Recommendation::Block));
        assert_eq!(classify(50, &cfg), (ThreatLevel::High, Recommendation::Review));
        assert_eq!(classify(21, &cfg), (ThreatLevel::High, Recommendation::Review));
        assert_eq!(classify(20, &cfg), (ThreatLevel::Medium, Recommendation::Allow));
        assert_eq!(classify(6, &cfg), (ThreatLevel::Medium, Recommendation::Allow));
        assert_eq!(classify(5, &cfg), (ThreatLevel::Low, Recommendation::Allow));
        assert_eq!(classify(0, &cfg), (ThreatLevel::Low, Recommendation::Allow));
    }

    #[test]
    fn test_score_55_blocks_and_requires_approval() {
        let mut cfg = GuardianConfig::default();
        cfg.dangerous_operations = vec!["danger".to_string()];
        cfg.dangerous_weight = 55;
        cfg.categories.clear();
        let mut engine = PolicyEngine::new(cfg);

        let result = engine.audit("danger", &json!({}));
        assert_eq!(result.assessment.score, 55);
        assert_eq!(result.assessment.level, ThreatLevel::Critical);
        assert_eq!(result.assessment.recommendation, Recommendation::Block);
        assert!(!result.allowed);
        assert!(result.requires_approval);
    }

    #[test]
    fn test_score_is_clamped() {
        let mut cfg = GuardianConfig::default();
        cfg.dangerous_weight = 60;
        let mut engine = PolicyEngine::new(cfg);
        let result = engine.audit("execute_code delete_file", &json!({}));
        assert_eq!(result.assessment.score, MAX_SCORE);
    }

    #[test]
    fn test_dangerous_operations_match_case_insensitively() {
        let engine = engine();
        let assessment = engine.assess("EXECUTE_CODE {}");
        assert_eq!(assessment.score, 3);
    }

    #[test]
    fn test_patterns_match_case_sensitively() {
        let engine = engine();
        assert_eq!(engine.assess("run EVAL(x)").score, 0);
        assert_eq!(engine.assess("run eval(x)").score, 5);
    }

    #[test]
    fn test_each_pattern_counts_once() {
        let engine = engine();
        assert_eq!(engine.assess("eval( eval( eval(").score, 5);
    }

    #[test]
    fn test_large_payload_adds_one_point() {
        let mut engine = engine();
        let blob = "a".repeat(10_001);
        let result = engine.audit("noop", &json!({ "blob": blob }));
        assert_eq!(result.assessment.score, 1);
        assert_eq!(result.assessment.threats[0].kind, "resource_intensive");
        assert_eq!(result.assessment.threats[0].severity, Severity::Medium);
    }

    #[test]
    fn test_threat_level_smoothing() {
        let mut engine = engine();
        engine.audit("execute_code", &json!({"code": "eval(x)"}));
        assert!((engine.threat_level() - 0.8).abs() < 1e-9);

        // A clean audit decays instead of resetting.
        engine.audit("noop", &json!({}));
        assert!((engine.threat_level() - 0.76).abs() < 1e-9);
    }

    #[test]
    fn test_passive_decay_every_fiftieth_packet() {
        let mut cfg = GuardianConfig::default();
        cfg.dangerous_weight = 50;
        let mut engine = PolicyEngine::new(cfg);
        engine.audit("execute_code", &json!({}));
        assert!((engine.threat_level() - 5.0).abs() < 1e-9);

        for count in 1..50 {
            engine.on_packet(count);
        }
        assert!((engine.threat_level() - 5.0).abs() < 1e-9);

        engine.on_packet(50);
        assert!((engine.threat_level() - 3.0).abs() < 1e-9);
        engine.on_packet(100);
        engine.on_packet(150);
        assert_eq!(engine.threat_level(), 0.0);
    }

    #[test]
    fn test_audit_result_serialization() {
        let mut engine = engine();
        let result = engine.audit("execute_code", &json!({"code": "eval(x)"}));
        let value = serde_json::to_value(&result).unwrap();

        assert!(value["audit_id"].as_str().unwrap().starts_with("audit-"));
        assert_eq!(value["assessment"]["level"], "medium");
        assert_eq!(value["assessment"]["recommendation"], "ALLOW");
        assert_eq!(value["assessment"]["threats"][1]["type"], "code_injection");
        assert_eq!(value["assessment"]["threats"][1]["severity"], "critical");
    }
}
