//! Shadow agent trait and common types.

use async_trait::async_trait;
use riskgate_core::{
    Entity, RequestContext, RiskScore, RiskThresholds, ShadowAgentResult, ShadowAgentType,
    StagePayload,
};
use std::time::Duration;
use thiserror::Error;

use crate::providers::{ProviderError, TokenUsage};

/// Errors from shadow agents.
#[derive(Error, Debug)]
pub enum AgentError {
    #[error("Provider call failed: {0}")]
    Provider(#[from] ProviderError),

    #[error("Invalid verdict: {0}")]
    InvalidResponse(String),

    #[error("Timeout after {0:?}")]
    Timeout(Duration),

    #[error("Internal error: {0}")]
    Internal(String),
}

/// Everything a shadow agent sees about one stage.
#[derive(Debug, Clone)]
pub struct AnalysisRequest {
    pub agent_type: ShadowAgentType,
    /// The stage payload; input text is already redacted
    pub payload: StagePayload,
    /// Rule-based score of the stage
    pub rule_score: RiskScore,
    pub findings: Vec<Entity>,
    pub context: RequestContext,
    pub thresholds: RiskThresholds,
    pub rule_version: String,
}

/// A verdict together with what it cost.
#[derive(Debug, Clone)]
pub struct ShadowAnalysis {
    pub result: ShadowAgentResult,
    pub usage: TokenUsage,
}

/// A slower, semantically aware second opinion on one stage.
///
/// # Isolation Contract
/// - MUST NOT see other agents' results
/// - MUST NOT mutate shared state
/// - An invalid or out-of-range verdict is an error, never a guess
#[async_trait]
pub trait ShadowAgent: Send + Sync {
    fn agent_type(&self) -> ShadowAgentType;

    async fn analyze(&self, request: &AnalysisRequest) -> Result<ShadowAnalysis, AgentError>;

    /// Per-call timeout enforced by the orchestrator.
    fn timeout(&self) -> Duration {
        Duration::from_secs(5)
    }
}
