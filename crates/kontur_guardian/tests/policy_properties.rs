//! Invariants of the threat scoring that must hold for any input.

use kontur_core::config::GuardianConfig;
use kontur_guardian::{classify, PolicyEngine, Recommendation, ThreatLevel, MAX_SCORE};
use proptest::prelude::*;
use serde_json::json;

proptest! {
    #[test]
    fn decision_fields_follow_the_score(op in "[a-z_(). ]{0,40}", arg in "[a-zA-Z_(). -]{0,60}") {
        let mut engine = PolicyEngine::new(GuardianConfig::default());
        let result = engine.audit(&op, &json!({ "value": arg }));
        let score = result.assessment.score;

        prop_assert!(score <= MAX_SCORE);
        prop_assert_eq!(result.allowed, score <= 20);
        prop_assert_eq!(result.requires_approval, score > 10);
        prop_assert_eq!(
            result.assessment.recommendation == Recommendation::Block,
            result.assessment.level == ThreatLevel::Critical
        );
    }

    #[test]
    fn levels_are_monotonic_in_score(a in 0u32..=100, b in 0u32..=100) {
        let cfg = GuardianConfig::default();
        let (lo, hi) = if a <= b { (a, b) } else { (b, a) };
        prop_assert!(classify(lo, &cfg).0 <= classify(hi, &cfg).0);
    }

    #[test]
    fn threat_level_stays_within_bounds(
        ops in prop::collection::vec("(execute_code|delete_file|eval\\(|rm -rf|noop| )*", 1..20),
        ticks in 1u64..400,
    ) {
        let mut engine = PolicyEngine::new(GuardianConfig::default());
        for op in ops {
            engine.audit(&op, &json!({}));
            prop_assert!(engine.threat_level() <= f64::from(MAX_SCORE) * 0.1 + 1e-9);
        }
        for count in 1..=ticks {
            engine.on_packet(count);
            prop_assert!(engine.threat_level() >= 0.0);
        }
    }
}
