//! Shadow agent backed by an LLM provider.

use async_trait::async_trait;
use riskgate_core::{ShadowAgentResult, ShadowAgentType};
use serde_json::json;
use std::sync::Arc;
use std::time::{Duration, Instant};

use super::parser::parse_verdict;
use super::{AgentError, AnalysisRequest, ShadowAgent, ShadowAnalysis};
use crate::prompts::{agent_prompt, BASE_SYSTEM_PROMPT};
use crate::providers::{ChatMessage, CompletionConfig, LlmProvider};

pub struct LlmShadowAgent {
    agent_type: ShadowAgentType,
    provider: Arc<dyn LlmProvider>,
    completion: CompletionConfig,
    timeout: Duration,
}

impl LlmShadowAgent {
    pub fn new(
        agent_type: ShadowAgentType,
        provider: Arc<dyn LlmProvider>,
        completion: CompletionConfig,
    ) -> Self {
        Self {
            agent_type,
            provider,
            completion,
            timeout: Duration::from_secs(5),
        }
    }

    pub fn with_timeout(mut self, timeout: Duration) -> Self {
        self.timeout = timeout;
        self
    }

    /// One agent per stage, all sharing a provider.
    pub fn for_all(
        provider: Arc<dyn LlmProvider>,
        completion: &CompletionConfig,
        timeout: Duration,
    ) -> Vec<Arc<dyn ShadowAgent>> {
        ShadowAgentType::ALL
            .iter()
            .map(|agent_type| {
                Arc::new(
                    LlmShadowAgent::new(*agent_type, Arc::clone(&provider), completion.clone())
                        .with_timeout(timeout),
                ) as Arc<dyn ShadowAgent>
            })
            .collect()
    }

    fn messages(&self, request: &AnalysisRequest) -> Result<Vec<ChatMessage>, AgentError> {
        let findings: Vec<_> = request
            .findings
            .iter()
            .map(|e| {
                json!({
                    "category": e.category,
                    "rule_id": e.rule_id,
                    "confidence": e.confidence,
                })
            })
            .collect();

        let document = json!({
            "stage": self.agent_type,
            "payload": request.payload,
            "rule_assessment": {
                "risk_score": request.rule_score.risk_score,
                "risk_level": request.rule_score.risk_level,
                "risk_factors": request.rule_score.risk_factors,
                "findings": findings,
            },
            "context": {
                "user_role": request.context.user_role,
                "trust_score": request.context.trust_score,
                "prior_violations": request.context.prior_violations,
                "strict_mode": request.context.strict_mode,
            },
        });
        let user = serde_json::to_string_pretty(&document)
            .map_err(|e| AgentError::Internal(e.to_string()))?;

        Ok(vec![
            ChatMessage::system(BASE_SYSTEM_PROMPT),
            ChatMessage::system(agent_prompt(self.agent_type)),
            ChatMessage::user(user),
        ])
    }
}

#[async_trait]
impl ShadowAgent for LlmShadowAgent {
    fn agent_type(&self) -> ShadowAgentType {
        self.agent_type
    }

    async fn analyze(&self, request: &AnalysisRequest) -> Result<ShadowAnalysis, AgentError> {
        let messages = self.messages(request)?;
        let started = Instant::now();
        let response = self.provider.complete(&messages, &self.completion).await?;
        let latency_ms = started.elapsed().as_millis() as u64;

        let verdict = parse_verdict(&response.content)?;
        tracing::debug!(
            agent = %self.agent_type,
            provider = self.provider.name(),
            model = %response.model,
            risk_score = verdict.risk_score,
            confidence = verdict.confidence,
            threats = verdict.threats.len(),
            latency_ms,
            "Shadow verdict received"
        );

        Ok(ShadowAnalysis {
            result: ShadowAgentResult {
                agent_type: self.agent_type,
                layer: self.agent_type.layer(),
                risk_score: verdict.risk_score,
                risk_level: request.thresholds.classify(verdict.risk_score),
                confidence: verdict.confidence,
                threats: verdict.threats,
                reasoning: verdict.reasoning,
                provider: self.provider.name().to_string(),
                model: response.model,
                tokens_used: response.usage.total(),
                latency_ms,
                fallback_used: false,
                fallback_reason: None,
                cached: false,
            },
            usage: response.usage,
        })
    }

    fn timeout(&self) -> Duration {
        self.timeout
    }
}
