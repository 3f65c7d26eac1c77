//! Threat policy engine and the guardian organ that serves it.
//!
//! Every audit scores an operation against configured signals, maps the score
//! to a decision and folds it into a running threat level that decays both on
//! each audit and periodically with the packet count.

pub mod organ;
pub mod policy;

pub use organ::GuardianOrgan;
pub use policy::{
    classify, Assessment, AuditResult, PolicyEngine, Recommendation, Severity, Threat, ThreatLevel,
    MAX_SCORE,
};
