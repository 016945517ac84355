//! The request pipeline.
//!
//! `GuardPipeline::evaluate` runs the rule engine over the stages of a
//! request, escalates ambiguous verdicts to the shadow agents, decides
//! whether to block and writes one audit record. It never returns an error:
//! remote failures become fallbacks and audit failures are logged.

use chrono::Utc;
use parking_lot::RwLock;
use riskgate_core::{
    AgentStateSnapshot, AggregatedRiskScore, OutputPayload, RequestContext, RiskLevel, RiskScore,
    RuleEngine, RuleSet, ShadowAgentResult, StageInputs,
};
use serde::Serialize;
use std::sync::Arc;
use std::time::Duration;
use tokio::time::Instant;

use crate::audit::{AuditRecord, AuditSink, Decision, TracingAuditSink};
use crate::orchestrator::{EscalationInput, ShadowOrchestrator};
use crate::resilience::{LlmUsage, UsageMeter};
use crate::RuntimeError;

pub const DEFAULT_REQUEST_DEADLINE: Duration = Duration::from_secs(10);

/// Block reason when the final risk level is critical.
pub const CRITICAL_BLOCK_REASON: &str = "critical_risk_level";

/// One request to evaluate.
#[derive(Debug, Clone, Default)]
pub struct EvaluationRequest {
    pub stages: StageInputs,
    pub context: RequestContext,
    /// Overrides the pipeline's request deadline
    pub deadline: Option<Duration>,
}

impl EvaluationRequest {
    pub fn new(input: impl Into<String>) -> Self {
        Self {
            stages: StageInputs::input(input),
            ..Default::default()
        }
    }

    pub fn with_state(mut self, state: AgentStateSnapshot) -> Self {
        self.stages.state = Some(state);
        self
    }

    pub fn with_output(mut self, output: OutputPayload) -> Self {
        self.stages.output = Some(output);
        self
    }

    pub fn with_context(mut self, context: RequestContext) -> Self {
        self.context = context;
        self
    }

    pub fn with_deadline(mut self, deadline: Duration) -> Self {
        self.deadline = Some(deadline);
        self
    }
}

/// What the caller gets back.
#[derive(Debug, Clone, Serialize)]
pub struct PipelineResult {
    pub request_id: String,
    pub blocked: bool,
    pub block_reason: Option<String>,
    pub risk_scores: Vec<RiskScore>,
    /// Absent when a hard block stopped the request
    pub aggregated_risk: Option<AggregatedRiskScore>,
    pub shadow_agent_escalated: bool,
    pub shadow_agent_analyses: Vec<ShadowAgentResult>,
    pub redacted_input: Option<String>,
    pub rule_version: String,
    pub llm_usage: LlmUsage,
    pub latency_ms: u64,
}

impl PipelineResult {
    pub fn risk_level(&self) -> Option<RiskLevel> {
        self.aggregated_risk.as_ref().map(|a| a.overall_risk_level)
    }
}

pub struct GuardPipeline {
    engine: RwLock<Arc<RuleEngine>>,
    shadow: Option<ShadowOrchestrator>,
    audit: Arc<dyn AuditSink>,
    usage: UsageMeter,
    request_deadline: Duration,
}

impl GuardPipeline {
    /// Rule-only pipeline auditing through `tracing`.
    pub fn new(engine: RuleEngine) -> Self {
        Self {
            engine: RwLock::new(Arc::new(engine)),
            shadow: None,
            audit: Arc::new(TracingAuditSink),
            usage: UsageMeter::new(),
            request_deadline: DEFAULT_REQUEST_DEADLINE,
        }
    }

    pub fn builtin() -> Result<Self, RuntimeError> {
        Ok(Self::new(RuleEngine::builtin()?))
    }

    pub fn with_shadow(mut self, shadow: ShadowOrchestrator) -> Self {
        self.shadow = Some(shadow);
        self
    }

    pub fn with_audit_sink(mut self, audit: Arc<dyn AuditSink>) -> Self {
        self.audit = audit;
        self
    }

    pub fn with_request_deadline(mut self, deadline: Duration) -> Self {
        self.request_deadline = deadline;
        self
    }

    /// The rule engine new requests will use.
    pub fn engine(&self) -> Arc<RuleEngine> {
        self.engine.read().clone()
    }

    pub fn shadow(&self) -> Option<&ShadowOrchestrator> {
        self.shadow.as_ref()
    }

    /// LLM usage over the pipeline's lifetime.
    pub fn usage_total(&self) -> LlmUsage {
        self.usage.total()
    }

    /// Replace the rule engine. Requests already running finish on the
    /// engine they started with. Returns the previous version.
    pub fn swap_rules(&self, engine: RuleEngine) -> String {
        let engine = Arc::new(engine);
        let previous = std::mem::replace(&mut *self.engine.write(), engine.clone());
        tracing::info!(
            from = previous.version(),
            to = engine.version(),
            "Rule set swapped"
        );
        previous.version().to_string()
    }

    /// Compile and swap in a rule set. The running engine is kept when the
    /// rule set is invalid.
    pub fn load_rules(&self, rules: RuleSet) -> Result<String, RuntimeError> {
        let engine = RuleEngine::new(rules)?;
        Ok(self.swap_rules(engine))
    }

    pub async fn evaluate(&self, request: EvaluationRequest) -> PipelineResult {
        let started = Instant::now();
        let deadline = started + request.deadline.unwrap_or(self.request_deadline);
        let engine = self.engine();
        let context = &request.context;

        let evaluation = engine.evaluate(&request.stages, context);
        let risk_scores = evaluation.risk_scores();

        let mut result = PipelineResult {
            request_id: context.request_id.clone(),
            blocked: false,
            block_reason: None,
            risk_scores,
            aggregated_risk: None,
            shadow_agent_escalated: false,
            shadow_agent_analyses: Vec::new(),
            redacted_input: evaluation.redacted_input.clone(),
            rule_version: engine.version().to_string(),
            llm_usage: LlmUsage::default(),
            latency_ms: 0,
        };

        if let Some(block) = &evaluation.hard_block {
            result.blocked = true;
            result.block_reason = Some(block.reason());
        } else if let Some(aggregated) = &evaluation.aggregated {
            let mut aggregated = aggregated.clone();
            match (&self.shadow, aggregated.should_escalate) {
                (Some(shadow), true) => {
                    let input = EscalationInput {
                        aggregated: &aggregated,
                        stages: &evaluation.stages,
                        redacted_input: evaluation.redacted_input.as_deref(),
                        context,
                        rule_version: engine.version(),
                    };
                    let outcome = shadow.escalate(input, engine.aggregator(), deadline).await;
                    self.usage.record(&outcome.usage);
                    result.shadow_agent_escalated = true;
                    result.shadow_agent_analyses = outcome.results;
                    result.llm_usage = outcome.usage;
                    aggregated = outcome.aggregated;
                }
                (None, true) => {
                    tracing::debug!(
                        request_id = %context.request_id,
                        "Escalation requested but no shadow agents configured"
                    );
                }
                _ => {}
            }

            if aggregated.overall_risk_level == RiskLevel::Critical {
                result.blocked = true;
                result.block_reason = Some(CRITICAL_BLOCK_REASON.to_string());
            }
            result.aggregated_risk = Some(aggregated);
        }

        result.latency_ms = started.elapsed().as_millis() as u64;
        tracing::debug!(
            request_id = %result.request_id,
            blocked = result.blocked,
            escalated = result.shadow_agent_escalated,
            latency_ms = result.latency_ms,
            "Request decided"
        );

        let record = self.audit_record(&result, evaluation.hard_block.clone(), context);
        if let Err(e) = self.audit.record(&record).await {
            tracing::error!(
                request_id = %result.request_id,
                error = %e,
                "Failed to write audit record"
            );
        }
        result
    }

    fn audit_record(
        &self,
        result: &PipelineResult,
        hard_block: Option<riskgate_core::HardBlock>,
        context: &RequestContext,
    ) -> AuditRecord {
        AuditRecord {
            request_id: result.request_id.clone(),
            timestamp: Utc::now(),
            rule_version: result.rule_version.clone(),
            decision: if result.blocked {
                Decision::Block
            } else {
                Decision::Allow
            },
            block_reason: result.block_reason.clone(),
            hard_block,
            risk_scores: result.risk_scores.clone(),
            aggregated_risk: result.aggregated_risk.clone(),
            shadow_escalated: result.shadow_agent_escalated,
            shadow_results: result.shadow_agent_analyses.clone(),
            llm_usage: result.llm_usage.clone(),
            circuit_breakers: self
                .shadow
                .as_ref()
                .map(|s| s.breaker_snapshots())
                .unwrap_or_default(),
            context: context.clone(),
            latency_ms: result.latency_ms,
        }
    }
}

impl std::fmt::Debug for GuardPipeline {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("GuardPipeline")
            .field("rule_version", &self.engine().version())
            .field("shadow", &self.shadow)
            .field("request_deadline", &self.request_deadline)
            .finish_non_exhaustive()
    }
}
