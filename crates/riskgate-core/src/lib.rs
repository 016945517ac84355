//! # riskgate-core
//!
//! Deterministic risk scoring for text flowing into and out of AI agents.
//!
//! This crate answers, for every request:
//! - How risky is each stage (input, agent state, output)?
//! - How risky is the request overall, given who is asking?
//! - Is the verdict ambiguous enough to ask a slower, semantic analysis?
//!
//! ## Key Guarantees
//!
//! 1. **Deterministic**: same rule set, same input, same scores
//! 2. **No network calls**: all scoring is rule-based
//! 3. **Total**: detector faults degrade to zero risk, never to an error
//! 4. **Compiled once**: patterns are compiled when a rule set loads
//!
//! ## Example
//!
//! ```rust,ignore
//! use riskgate_core::{RequestContext, RuleEngine, RuleSet, StageInputs};
//!
//! let engine = RuleEngine::new(RuleSet::from_file("rules.yaml")?)?;
//! let evaluation = engine.evaluate(
//!     &StageInputs::input("My email is john@example.com"),
//!     &RequestContext::for_user("u-42"),
//! );
//!
//! if let Some(block) = &evaluation.hard_block {
//!     println!("BLOCKED: {}", block.reason());
//! } else if let Some(agg) = &evaluation.aggregated {
//!     println!("{} ({:.2})", agg.overall_risk_level, agg.overall_risk_score);
//! }
//! ```

pub mod aggregator;
pub mod config;
pub mod detectors;
pub mod engine;
pub mod layers;
pub mod rules;
pub mod trust;
pub mod types;

// Re-export main types at crate root
pub use aggregator::RiskAggregator;
pub use config::{
    AggregationConfig, ConfigError, EscalationConfig, InputGuardConfig, LayerWeights,
    OutputGuardConfig, ScoringConfig, StateMonitorConfig,
};
pub use detectors::{Detector, DetectorError, DetectorFault};
pub use engine::{HardBlock, RuleEngine, RuleEvaluation, StageInputs, StageResult};
pub use layers::{LayerAssessment, LayerScorer};
pub use rules::{PatternDef, PatternLibrary, RuleSet, BUILTIN_RULE_VERSION};
pub use trust::{TrustConfig, TrustLedger, TrustRecord};
pub use types::{
    AgentAction, AgentStateSnapshot, AggregatedRiskScore, Entity, EntityCategory,
    FallbackReason, Layer, LayerDetail, OutputPayload, RequestContext, RiskBreakdown, RiskLevel,
    RiskScore, RiskThresholds, ShadowAgentResult, ShadowAgentType, ShadowDetail, Span,
    StagePayload, Threat,
};
