//! Turning a shadow call's outcome into a result.
//!
//! A failed shadow call is not an error for the request: it becomes a
//! fallback result carrying the rule-based score of the stage.

use riskgate_core::{FallbackReason, RiskScore, ShadowAgentResult, ShadowAgentType};

use super::CallError;
use crate::agents::AgentError;
use crate::providers::ProviderError;

/// What one shadow agent produced for a request.
#[derive(Debug, Clone)]
pub enum ShadowOutcome {
    /// Fresh verdict from the agent
    Analyzed(ShadowAgentResult),

    /// Verdict served from the result cache
    Cached(ShadowAgentResult),

    /// No usable verdict; the rule-based score stands
    Fallback { reason: FallbackReason, detail: String },
}

impl ShadowOutcome {
    pub fn fallback(reason: FallbackReason, detail: impl Into<String>) -> Self {
        Self::Fallback {
            reason,
            detail: detail.into(),
        }
    }

    /// Classify the outcome of a breaker-guarded agent call.
    pub fn from_call(result: Result<ShadowAgentResult, CallError<AgentError>>) -> Self {
        match result {
            Ok(analysis) => Self::Analyzed(analysis),
            Err(CallError::Open) => Self::fallback(FallbackReason::CircuitOpen, "circuit open"),
            Err(CallError::Timeout(after)) => {
                Self::fallback(FallbackReason::Timeout, format!("timed out after {:?}", after))
            }
            Err(CallError::Failed(e)) => {
                let reason = match &e {
                    AgentError::InvalidResponse(_) => FallbackReason::InvalidResponse,
                    AgentError::Timeout(_) | AgentError::Provider(ProviderError::Timeout(_)) => {
                        FallbackReason::Timeout
                    }
                    _ => FallbackReason::ProviderError,
                };
                Self::fallback(reason, e.to_string())
            }
        }
    }

    pub fn is_fallback(&self) -> bool {
        matches!(self, Self::Fallback { .. })
    }

    /// The result to report, given the rule-based score of the stage.
    pub fn into_result(self, agent_type: ShadowAgentType, rule_score: &RiskScore) -> ShadowAgentResult {
        match self {
            Self::Analyzed(result) => result,
            Self::Cached(mut result) => {
                result.cached = true;
                result.fallback_used = false;
                result.fallback_reason = None;
                result
            }
            Self::Fallback { reason, detail } => {
                tracing::warn!(
                    agent = %agent_type,
                    reason = %reason,
                    detail = %detail,
                    "Shadow analysis failed, using rule-based score"
                );
                ShadowAgentResult::fallback(agent_type, rule_score, reason)
            }
        }
    }
}
