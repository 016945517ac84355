//! Shadow escalation orchestrator.
//!
//! When aggregation flags a request as ambiguous, the orchestrator asks a
//! shadow agent for a second opinion on every stage that ran:
//! - Cache lookup first; a hit costs nothing
//! - Otherwise one call per agent through that agent's circuit breaker
//! - All agents run concurrently under one escalation deadline
//! - Any failure becomes a fallback carrying the rule-based score
//! - Successful verdicts replace their layer and aggregation is re-run

use futures::future::join_all;
use riskgate_core::{
    AggregatedRiskScore, FallbackReason, Layer, RequestContext, RiskAggregator, RiskScore,
    ShadowAgentResult, ShadowAgentType, ShadowDetail, StagePayload, StageResult,
};
use std::collections::BTreeMap;
use std::sync::Arc;
use std::time::Duration;
use tokio::time::Instant;

use crate::agents::{AnalysisRequest, LlmShadowAgent, ShadowAgent};
use crate::cache::{CacheKey, ShadowCache};
use crate::config::RuntimeConfig;
use crate::providers::LlmProvider;
use crate::resilience::{CircuitBreaker, CircuitSnapshot, LlmUsage, ShadowOutcome};
use crate::RuntimeError;

/// Result of one escalation.
#[derive(Debug, Clone)]
pub struct EscalationOutcome {
    /// Re-aggregated score, with shadow details attached
    pub aggregated: AggregatedRiskScore,
    /// One result per consulted agent, fallbacks included
    pub results: Vec<ShadowAgentResult>,
    pub usage: LlmUsage,
}

/// Inputs the orchestrator needs from the rule evaluation.
#[derive(Debug, Clone, Copy)]
pub struct EscalationInput<'a> {
    pub aggregated: &'a AggregatedRiskScore,
    pub stages: &'a [StageResult],
    /// Sent to the input agent in place of the raw text
    pub redacted_input: Option<&'a str>,
    pub context: &'a RequestContext,
    pub rule_version: &'a str,
}

struct AgentSlot {
    agent: Arc<dyn ShadowAgent>,
    breaker: CircuitBreaker,
}

pub struct ShadowOrchestrator {
    slots: BTreeMap<ShadowAgentType, AgentSlot>,
    cache: Option<ShadowCache>,
}

impl ShadowOrchestrator {
    pub fn builder() -> ShadowOrchestratorBuilder {
        ShadowOrchestratorBuilder::new()
    }

    pub fn agent_types(&self) -> Vec<ShadowAgentType> {
        self.slots.keys().copied().collect()
    }

    pub fn breaker(&self, agent: ShadowAgentType) -> Option<&CircuitBreaker> {
        self.slots.get(&agent).map(|slot| &slot.breaker)
    }

    pub fn breaker_snapshots(&self) -> Vec<CircuitSnapshot> {
        self.slots.values().map(|slot| slot.breaker.snapshot()).collect()
    }

    pub fn cache(&self) -> Option<&ShadowCache> {
        self.cache.as_ref()
    }

    /// Consult the shadow agents and re-aggregate.
    ///
    /// Never fails: every agent that cannot answer before `deadline`
    /// contributes a fallback result instead.
    pub async fn escalate(
        &self,
        input: EscalationInput<'_>,
        aggregator: &RiskAggregator,
        deadline: Instant,
    ) -> EscalationOutcome {
        let requests: Vec<(AnalysisRequest, &AgentSlot)> = input
            .stages
            .iter()
            .filter_map(|stage| {
                let agent_type = agent_for(stage.assessment.score.layer)?;
                let slot = self.slots.get(&agent_type)?;
                Some((analysis_request(agent_type, stage, &input, aggregator), slot))
            })
            .collect();

        let budget: Duration = requests.iter().map(|(_, slot)| slot.agent.timeout()).sum();
        let deadline = deadline.min(Instant::now() + budget);

        tracing::info!(
            request_id = %input.context.request_id,
            reason = ?input.aggregated.escalation_reason,
            score = input.aggregated.overall_risk_score,
            agents = requests.len(),
            budget_ms = budget.as_millis() as u64,
            "Escalating to shadow agents"
        );

        let runs = requests
            .iter()
            .map(|(request, slot)| self.run_agent(request, slot, input.rule_version, deadline));
        let outcomes = join_all(runs).await;

        let mut usage = LlmUsage::default();
        let mut results = Vec::with_capacity(outcomes.len());
        for (result, agent_usage) in outcomes {
            usage.merge(&agent_usage);
            results.push(result);
        }

        let aggregated = self.reaggregate(&input, aggregator, &results);
        tracing::info!(
            request_id = %input.context.request_id,
            before = input.aggregated.overall_risk_score,
            after = aggregated.overall_risk_score,
            level = %aggregated.overall_risk_level,
            fallbacks = results.iter().filter(|r| r.fallback_used).count(),
            "Shadow escalation complete"
        );

        EscalationOutcome {
            aggregated,
            results,
            usage,
        }
    }

    async fn run_agent(
        &self,
        request: &AnalysisRequest,
        slot: &AgentSlot,
        rule_version: &str,
        deadline: Instant,
    ) -> (ShadowAgentResult, LlmUsage) {
        let agent_type = request.agent_type;
        match tokio::time::timeout_at(deadline, self.consult(request, slot, rule_version)).await {
            Ok(done) => done,
            Err(_) => {
                // The breaker permit was dropped unreported; the deadline is
                // not held against the agent.
                let outcome = ShadowOutcome::fallback(
                    FallbackReason::DeadlineExceeded,
                    "escalation deadline reached",
                );
                (
                    outcome.into_result(agent_type, &request.rule_score),
                    LlmUsage::default(),
                )
            }
        }
    }

    async fn consult(
        &self,
        request: &AnalysisRequest,
        slot: &AgentSlot,
        rule_version: &str,
    ) -> (ShadowAgentResult, LlmUsage) {
        let agent_type = request.agent_type;
        let mut usage = LlmUsage::default();

        let key = self
            .cache
            .as_ref()
            .and_then(|_| CacheKey::new(rule_version, agent_type, &request.payload));
        if let (Some(cache), Some(key)) = (&self.cache, &key) {
            if let Some(hit) = cache.get(key).await {
                tracing::debug!(agent = %agent_type, key = key.as_str(), "Shadow cache hit");
                usage.record_cache_hit();
                return (
                    ShadowOutcome::Cached(hit).into_result(agent_type, &request.rule_score),
                    usage,
                );
            }
        }

        let call = slot
            .breaker
            .call(slot.agent.timeout(), slot.agent.analyze(request))
            .await
            .map(|analysis| {
                usage.add(&analysis.usage, &analysis.result.model);
                analysis.result
            });
        let result = ShadowOutcome::from_call(call).into_result(agent_type, &request.rule_score);

        if let (Some(cache), Some(key)) = (&self.cache, key) {
            cache.insert(key, result.clone()).await;
        }
        (result, usage)
    }

    fn reaggregate(
        &self,
        input: &EscalationInput<'_>,
        aggregator: &RiskAggregator,
        results: &[ShadowAgentResult],
    ) -> AggregatedRiskScore {
        let verdicts: Vec<RiskScore> = results
            .iter()
            .filter(|r| !r.fallback_used)
            .map(|r| r.to_risk_score(aggregator.thresholds()))
            .collect();

        let mut aggregated = if verdicts.is_empty() {
            input.aggregated.clone()
        } else {
            let mut scores: Vec<RiskScore> = input
                .stages
                .iter()
                .map(|s| s.assessment.score.clone())
                .collect();
            scores.extend(verdicts);
            aggregator.aggregate(&scores, input.context)
        };

        // The request was escalated; that stays on record.
        aggregated.should_escalate = input.aggregated.should_escalate;
        aggregated.escalation_reason = input.aggregated.escalation_reason.clone();
        aggregated.risk_breakdown.shadow = results.iter().map(ShadowDetail::from).collect();
        aggregated
    }
}

impl std::fmt::Debug for ShadowOrchestrator {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ShadowOrchestrator")
            .field("agents", &self.agent_types())
            .field("cache", &self.cache)
            .finish()
    }
}

fn agent_for(layer: Layer) -> Option<ShadowAgentType> {
    ShadowAgentType::ALL
        .into_iter()
        .find(|agent| agent.base_layer() == layer)
}

fn analysis_request(
    agent_type: ShadowAgentType,
    stage: &StageResult,
    input: &EscalationInput<'_>,
    aggregator: &RiskAggregator,
) -> AnalysisRequest {
    let payload = match (&stage.payload, input.redacted_input) {
        (StagePayload::Input { .. }, Some(redacted)) => StagePayload::input(redacted),
        (payload, _) => payload.clone(),
    };
    AnalysisRequest {
        agent_type,
        payload,
        rule_score: stage.assessment.score.clone(),
        findings: stage.assessment.entities.clone(),
        context: input.context.clone(),
        thresholds: aggregator.thresholds().clone(),
        rule_version: input.rule_version.to_string(),
    }
}

/// Builder for [`ShadowOrchestrator`].
pub struct ShadowOrchestratorBuilder {
    config: RuntimeConfig,
    agents: Vec<Arc<dyn ShadowAgent>>,
}

impl ShadowOrchestratorBuilder {
    pub fn new() -> Self {
        Self {
            config: RuntimeConfig::default(),
            agents: Vec::new(),
        }
    }

    pub fn config(mut self, config: RuntimeConfig) -> Self {
        self.config = config;
        self
    }

    /// Register one agent.
    pub fn agent(mut self, agent: Arc<dyn ShadowAgent>) -> Self {
        self.agents.push(agent);
        self
    }

    /// Register an LLM agent per stage, all backed by `provider`.
    ///
    /// Uses the completion settings and agent timeout from the config set
    /// so far.
    pub fn provider(mut self, provider: Arc<dyn LlmProvider>) -> Self {
        self.agents.extend(LlmShadowAgent::for_all(
            provider,
            &self.config.completion,
            self.config.shadow.agent_timeout,
        ));
        self
    }

    /// Build the orchestrator. Agents not enabled in the config are left out.
    pub fn build(self) -> Result<ShadowOrchestrator, RuntimeError> {
        self.config.validate()?;

        let mut slots = BTreeMap::new();
        for agent in self.agents {
            let agent_type = agent.agent_type();
            if !self.config.shadow.enabled_agents.contains(&agent_type) {
                tracing::debug!(agent = %agent_type, "Shadow agent disabled by config");
                continue;
            }
            if slots.contains_key(&agent_type) {
                return Err(RuntimeError::DuplicateAgent(agent_type));
            }
            let breaker = CircuitBreaker::new(
                format!("shadow_{}", agent_type),
                self.config.circuit_breaker.clone(),
            );
            slots.insert(agent_type, AgentSlot { agent, breaker });
        }
        if slots.is_empty() {
            return Err(RuntimeError::NoAgents);
        }

        Ok(ShadowOrchestrator {
            slots,
            cache: ShadowCache::from_config(&self.config.cache),
        })
    }
}

impl Default for ShadowOrchestratorBuilder {
    fn default() -> Self {
        Self::new()
    }
}
