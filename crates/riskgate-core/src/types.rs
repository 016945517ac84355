//! Core types for risk evaluation.
//!
//! Everything that crosses a module boundary lives here: layers, risk
//! levels, per-stage scores, the aggregated score, request context,
//! detector findings and shadow analysis results.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::fmt;
use uuid::Uuid;

// =============================================================================
// LAYERS & LEVELS
// =============================================================================

/// A point in the pipeline where risk is assessed.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Layer {
    InputGuard,
    StateMonitor,
    OutputGuard,
    ShadowInput,
    ShadowState,
    ShadowOutput,
}

impl Layer {
    /// The rule-based layers, in pipeline order.
    pub const RULE_LAYERS: [Layer; 3] = [Layer::InputGuard, Layer::StateMonitor, Layer::OutputGuard];

    pub fn as_str(&self) -> &'static str {
        match self {
            Layer::InputGuard => "input_guard",
            Layer::StateMonitor => "state_monitor",
            Layer::OutputGuard => "output_guard",
            Layer::ShadowInput => "shadow_input",
            Layer::ShadowState => "shadow_state",
            Layer::ShadowOutput => "shadow_output",
        }
    }

    pub fn is_shadow(&self) -> bool {
        matches!(
            self,
            Layer::ShadowInput | Layer::ShadowState | Layer::ShadowOutput
        )
    }

    /// The rule-based layer this layer stands for.
    ///
    /// Rule layers map to themselves.
    pub fn base(&self) -> Layer {
        match self {
            Layer::InputGuard | Layer::ShadowInput => Layer::InputGuard,
            Layer::StateMonitor | Layer::ShadowState => Layer::StateMonitor,
            Layer::OutputGuard | Layer::ShadowOutput => Layer::OutputGuard,
        }
    }

    /// The shadow counterpart of a layer.
    pub fn shadow(&self) -> Layer {
        match self.base() {
            Layer::InputGuard => Layer::ShadowInput,
            Layer::StateMonitor => Layer::ShadowState,
            _ => Layer::ShadowOutput,
        }
    }
}

impl fmt::Display for Layer {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Five-band risk classification.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum RiskLevel {
    None,
    Low,
    Medium,
    High,
    Critical,
}

impl RiskLevel {
    pub fn as_str(&self) -> &'static str {
        match self {
            RiskLevel::None => "none",
            RiskLevel::Low => "low",
            RiskLevel::Medium => "medium",
            RiskLevel::High => "high",
            RiskLevel::Critical => "critical",
        }
    }
}

impl fmt::Display for RiskLevel {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Lower bounds of the LOW, MEDIUM, HIGH and CRITICAL bands.
///
/// NONE always starts at 0.0 and CRITICAL always ends at 1.0 inclusive,
/// so four strictly increasing boundaries partition `[0, 1]` exactly.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct RiskThresholds {
    pub low: f64,
    pub medium: f64,
    pub high: f64,
    pub critical: f64,
}

impl Default for RiskThresholds {
    fn default() -> Self {
        Self {
            low: 0.2,
            medium: 0.5,
            high: 0.8,
            critical: 0.95,
        }
    }
}

impl RiskThresholds {
    /// Classify a score into its band. Out-of-range input is clamped first.
    pub fn classify(&self, score: f64) -> RiskLevel {
        let score = clamp_unit(score);
        if score >= self.critical {
            RiskLevel::Critical
        } else if score >= self.high {
            RiskLevel::High
        } else if score >= self.medium {
            RiskLevel::Medium
        } else if score >= self.low {
            RiskLevel::Low
        } else {
            RiskLevel::None
        }
    }

    /// Half-open `[lower, upper)` range of a band; CRITICAL's upper bound is 1.0 inclusive.
    pub fn band(&self, level: RiskLevel) -> (f64, f64) {
        match level {
            RiskLevel::None => (0.0, self.low),
            RiskLevel::Low => (self.low, self.medium),
            RiskLevel::Medium => (self.medium, self.high),
            RiskLevel::High => (self.high, self.critical),
            RiskLevel::Critical => (self.critical, 1.0),
        }
    }
}

/// Clamp to `[0, 1]`, mapping NaN to zero.
pub fn clamp_unit(value: f64) -> f64 {
    if value.is_nan() {
        0.0
    } else {
        value.clamp(0.0, 1.0)
    }
}

// =============================================================================
// FINDINGS
// =============================================================================

/// Category of a detector finding.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum EntityCategory {
    Email,
    Phone,
    CreditCard,
    Ssn,
    Iban,
    IpAddress,
    Credential,
    InjectionDirect,
    InjectionJailbreak,
    InjectionDelimiter,
    InjectionExtraction,
    DataLeak,
    SystemPromptLeak,
    LoopDetected,
    CostOverrun,
    NoProgress,
    ValidationFailure,
}

impl EntityCategory {
    pub fn as_str(&self) -> &'static str {
        match self {
            EntityCategory::Email => "email",
            EntityCategory::Phone => "phone",
            EntityCategory::CreditCard => "credit_card",
            EntityCategory::Ssn => "ssn",
            EntityCategory::Iban => "iban",
            EntityCategory::IpAddress => "ip_address",
            EntityCategory::Credential => "credential",
            EntityCategory::InjectionDirect => "injection_direct",
            EntityCategory::InjectionJailbreak => "injection_jailbreak",
            EntityCategory::InjectionDelimiter => "injection_delimiter",
            EntityCategory::InjectionExtraction => "injection_extraction",
            EntityCategory::DataLeak => "data_leak",
            EntityCategory::SystemPromptLeak => "system_prompt_leak",
            EntityCategory::LoopDetected => "loop_detected",
            EntityCategory::CostOverrun => "cost_overrun",
            EntityCategory::NoProgress => "no_progress",
            EntityCategory::ValidationFailure => "validation_failure",
        }
    }

    pub fn is_pii(&self) -> bool {
        matches!(
            self,
            EntityCategory::Email
                | EntityCategory::Phone
                | EntityCategory::CreditCard
                | EntityCategory::Ssn
                | EntityCategory::Iban
                | EntityCategory::IpAddress
                | EntityCategory::Credential
        )
    }

    pub fn is_injection(&self) -> bool {
        matches!(
            self,
            EntityCategory::InjectionDirect
                | EntityCategory::InjectionJailbreak
                | EntityCategory::InjectionDelimiter
                | EntityCategory::InjectionExtraction
        )
    }

    /// Placeholder written over a redacted span.
    pub fn redaction_label(&self) -> String {
        format!("[REDACTED_{}]", self.as_str().to_uppercase())
    }
}

impl fmt::Display for EntityCategory {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Byte range in the inspected text.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub struct Span {
    pub start: usize,
    pub end: usize,
}

impl Span {
    pub fn new(start: usize, end: usize) -> Self {
        Self { start, end }
    }

    pub fn len(&self) -> usize {
        self.end.saturating_sub(self.start)
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    pub fn overlaps(&self, other: &Span) -> bool {
        self.start < other.end && other.start < self.end
    }
}

/// A single detector finding. Matched text is never stored, only its span.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Entity {
    pub category: EntityCategory,
    pub span: Span,
    pub confidence: f64,
    pub severity: f64,
    /// Pattern or rule that produced the finding
    pub rule_id: String,
}

impl Entity {
    pub fn new(
        category: EntityCategory,
        span: Span,
        confidence: f64,
        severity: f64,
        rule_id: impl Into<String>,
    ) -> Self {
        Self {
            category,
            span,
            confidence: clamp_unit(confidence),
            severity: clamp_unit(severity),
            rule_id: rule_id.into(),
        }
    }

    /// Severity-weighted confidence.
    pub fn weight(&self) -> f64 {
        self.severity * self.confidence
    }
}

// =============================================================================
// SCORES
// =============================================================================

/// Risk assessment of one pipeline stage.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RiskScore {
    pub layer: Layer,
    pub risk_score: f64,
    pub risk_level: RiskLevel,
    pub risk_factors: BTreeMap<String, f64>,
    pub explanation: String,
    pub timestamp: DateTime<Utc>,
}

impl RiskScore {
    /// Build a score, clamping it and every factor into `[0, 1]`.
    pub fn new(
        layer: Layer,
        risk_score: f64,
        risk_factors: BTreeMap<String, f64>,
        explanation: impl Into<String>,
        thresholds: &RiskThresholds,
    ) -> Self {
        let risk_score = clamp_unit(risk_score);
        Self {
            layer,
            risk_score,
            risk_level: thresholds.classify(risk_score),
            risk_factors: risk_factors
                .into_iter()
                .map(|(name, value)| (name, clamp_unit(value)))
                .collect(),
            explanation: explanation.into(),
            timestamp: Utc::now(),
        }
    }

    /// Zero-risk score carrying one explanatory factor.
    pub fn zero(layer: Layer, factor: impl Into<String>, explanation: impl Into<String>) -> Self {
        let mut risk_factors = BTreeMap::new();
        risk_factors.insert(factor.into(), 0.0);
        Self {
            layer,
            risk_score: 0.0,
            risk_level: RiskLevel::None,
            risk_factors,
            explanation: explanation.into(),
            timestamp: Utc::now(),
        }
    }

    pub fn factor(&self, name: &str) -> f64 {
        self.risk_factors.get(name).copied().unwrap_or(0.0)
    }
}

/// Per-layer detail kept for audit.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct LayerDetail {
    pub source_layer: Layer,
    pub risk_score: f64,
    pub risk_level: RiskLevel,
    pub weight: f64,
    pub contribution: f64,
    pub risk_factors: BTreeMap<String, f64>,
}

/// Summary of one shadow analysis inside the breakdown.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ShadowDetail {
    pub agent_type: ShadowAgentType,
    pub layer: Layer,
    pub risk_score: f64,
    pub confidence: f64,
    pub fallback_used: bool,
    pub fallback_reason: Option<FallbackReason>,
    pub cached: bool,
    pub threat_count: usize,
}

impl From<&ShadowAgentResult> for ShadowDetail {
    fn from(result: &ShadowAgentResult) -> Self {
        Self {
            agent_type: result.agent_type,
            layer: result.layer,
            risk_score: result.risk_score,
            confidence: result.confidence,
            fallback_used: result.fallback_used,
            fallback_reason: result.fallback_reason,
            cached: result.cached,
            threat_count: result.threats.len(),
        }
    }
}

/// Nested score detail for the audit trail.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct RiskBreakdown {
    /// Weighted combination before context adjustment
    pub base_score: f64,
    /// Weights after renormalization over present layers
    pub effective_weights: BTreeMap<Layer, f64>,
    pub trust_multiplier: f64,
    pub strict_multiplier: f64,
    /// Keyed by rule layer; `source_layer` tells whether a shadow score replaced it
    pub layers: BTreeMap<Layer, LayerDetail>,
    #[serde(default)]
    pub shadow: Vec<ShadowDetail>,
}

/// Combined risk across all available layers for one request.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AggregatedRiskScore {
    pub overall_risk_score: f64,
    pub overall_risk_level: RiskLevel,
    pub layer_scores: BTreeMap<Layer, f64>,
    pub risk_breakdown: RiskBreakdown,
    pub should_escalate: bool,
    pub escalation_reason: Option<String>,
    pub timestamp: DateTime<Utc>,
}

// =============================================================================
// REQUEST CONTEXT
// =============================================================================

/// Per-request metadata. Read-only inside the pipeline.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RequestContext {
    pub request_id: String,
    #[serde(default)]
    pub user_id: Option<String>,
    #[serde(default)]
    pub user_role: Option<String>,
    #[serde(default)]
    pub session_id: Option<String>,
    #[serde(default = "default_trust_score")]
    pub trust_score: f64,
    #[serde(default)]
    pub prior_violations: u32,
    #[serde(default)]
    pub prior_escalations: u32,
    #[serde(default)]
    pub strict_mode: bool,
    #[serde(default)]
    pub metadata: BTreeMap<String, String>,
}

fn default_trust_score() -> f64 {
    0.5
}

impl Default for RequestContext {
    fn default() -> Self {
        Self {
            request_id: Uuid::new_v4().to_string(),
            user_id: None,
            user_role: None,
            session_id: None,
            trust_score: default_trust_score(),
            prior_violations: 0,
            prior_escalations: 0,
            strict_mode: false,
            metadata: BTreeMap::new(),
        }
    }
}

impl RequestContext {
    pub fn for_user(user_id: impl Into<String>) -> Self {
        Self {
            user_id: Some(user_id.into()),
            ..Default::default()
        }
    }

    pub fn with_trust_score(mut self, trust_score: f64) -> Self {
        self.trust_score = clamp_unit(trust_score);
        self
    }

    pub fn with_strict_mode(mut self, strict_mode: bool) -> Self {
        self.strict_mode = strict_mode;
        self
    }

    pub fn with_role(mut self, role: impl Into<String>) -> Self {
        self.user_role = Some(role.into());
        self
    }

    pub fn with_metadata(mut self, key: impl Into<String>, value: impl Into<String>) -> Self {
        self.metadata.insert(key.into(), value.into());
        self
    }
}

// =============================================================================
// STAGE PAYLOADS
// =============================================================================

/// One step taken by the agent between input and output.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct AgentAction {
    pub tool: String,
    #[serde(default)]
    pub arguments: String,
    #[serde(default)]
    pub made_progress: bool,
}

impl AgentAction {
    pub fn new(tool: impl Into<String>, arguments: impl Into<String>, made_progress: bool) -> Self {
        Self {
            tool: tool.into(),
            arguments: arguments.into(),
            made_progress,
        }
    }

    /// Identity used for repetition checks.
    pub fn signature(&self) -> String {
        format!("{}({})", self.tool, self.arguments.trim())
    }
}

/// Execution state observed by the state monitor.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct AgentStateSnapshot {
    #[serde(default)]
    pub actions: Vec<AgentAction>,
    #[serde(default)]
    pub tokens_used: u64,
    #[serde(default)]
    pub token_budget: Option<u64>,
    #[serde(default)]
    pub cost_usd: f64,
    #[serde(default)]
    pub cost_budget_usd: Option<f64>,
    #[serde(default)]
    pub iterations: u32,
}

/// Agent output plus what the output guard compares it against.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct OutputPayload {
    pub text: String,
    /// The (possibly redacted) input the agent answered
    #[serde(default)]
    pub input_text: Option<String>,
    #[serde(default)]
    pub expected_schema: Option<serde_json::Value>,
    #[serde(default)]
    pub system_prompt: Option<String>,
}

impl OutputPayload {
    pub fn text(text: impl Into<String>) -> Self {
        Self {
            text: text.into(),
            ..Default::default()
        }
    }
}

/// Typed input of one stage.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "stage", rename_all = "snake_case")]
pub enum StagePayload {
    Input { text: String },
    State(AgentStateSnapshot),
    Output(OutputPayload),
}

impl StagePayload {
    pub fn input(text: impl Into<String>) -> Self {
        StagePayload::Input { text: text.into() }
    }

    /// The rule layer that scores this payload.
    pub fn layer(&self) -> Layer {
        match self {
            StagePayload::Input { .. } => Layer::InputGuard,
            StagePayload::State(_) => Layer::StateMonitor,
            StagePayload::Output(_) => Layer::OutputGuard,
        }
    }
}

// =============================================================================
// SHADOW ANALYSIS
// =============================================================================

/// Which stage a shadow agent re-examines.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ShadowAgentType {
    Input,
    State,
    Output,
}

impl ShadowAgentType {
    pub const ALL: [ShadowAgentType; 3] = [
        ShadowAgentType::Input,
        ShadowAgentType::State,
        ShadowAgentType::Output,
    ];

    pub fn as_str(&self) -> &'static str {
        match self {
            ShadowAgentType::Input => "input",
            ShadowAgentType::State => "state",
            ShadowAgentType::Output => "output",
        }
    }

    /// Layer this agent's results are reported under.
    pub fn layer(&self) -> Layer {
        match self {
            ShadowAgentType::Input => Layer::ShadowInput,
            ShadowAgentType::State => Layer::ShadowState,
            ShadowAgentType::Output => Layer::ShadowOutput,
        }
    }

    /// Rule layer this agent re-examines.
    pub fn base_layer(&self) -> Layer {
        self.layer().base()
    }
}

impl fmt::Display for ShadowAgentType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Why the rule-based score was used instead of a shadow verdict.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum FallbackReason {
    CircuitOpen,
    Timeout,
    ProviderError,
    InvalidResponse,
    DeadlineExceeded,
}

impl fmt::Display for FallbackReason {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            FallbackReason::CircuitOpen => "circuit_open",
            FallbackReason::Timeout => "timeout",
            FallbackReason::ProviderError => "provider_error",
            FallbackReason::InvalidResponse => "invalid_response",
            FallbackReason::DeadlineExceeded => "deadline_exceeded",
        };
        f.write_str(s)
    }
}

/// A threat reported by a shadow agent.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Threat {
    pub category: String,
    pub description: String,
    #[serde(default)]
    pub severity: f64,
}

/// Result of one shadow analysis (or its fallback).
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ShadowAgentResult {
    pub agent_type: ShadowAgentType,
    pub layer: Layer,
    pub risk_score: f64,
    pub risk_level: RiskLevel,
    pub confidence: f64,
    pub threats: Vec<Threat>,
    pub reasoning: String,
    pub provider: String,
    pub model: String,
    pub tokens_used: u32,
    pub latency_ms: u64,
    pub fallback_used: bool,
    pub fallback_reason: Option<FallbackReason>,
    #[serde(default)]
    pub cached: bool,
}

impl ShadowAgentResult {
    /// Deterministic stand-in built from the rule-based score of the stage.
    pub fn fallback(agent_type: ShadowAgentType, rule_score: &RiskScore, reason: FallbackReason) -> Self {
        Self {
            agent_type,
            layer: agent_type.layer(),
            risk_score: rule_score.risk_score,
            risk_level: rule_score.risk_level,
            confidence: 1.0,
            threats: Vec::new(),
            reasoning: format!(
                "Shadow analysis unavailable ({}); using rule-based {} score",
                reason, rule_score.layer
            ),
            provider: "rules".to_string(),
            model: "rules".to_string(),
            tokens_used: 0,
            latency_ms: 0,
            fallback_used: true,
            fallback_reason: Some(reason),
            cached: false,
        }
    }

    /// The score this result contributes to re-aggregation.
    ///
    /// A fallback reproduces the rule-based score under the rule layer, so
    /// nothing is replaced.
    pub fn to_risk_score(&self, thresholds: &RiskThresholds) -> RiskScore {
        let layer = if self.fallback_used {
            self.agent_type.base_layer()
        } else {
            self.layer
        };
        let mut factors = BTreeMap::new();
        factors.insert("shadow_risk".to_string(), self.risk_score);
        factors.insert("shadow_confidence".to_string(), self.confidence);
        RiskScore::new(layer, self.risk_score, factors, self.reasoning.clone(), thresholds)
    }
}
