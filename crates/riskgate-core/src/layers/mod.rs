//! Layer scorers: one per pipeline stage.
//!
//! A scorer runs its stage's detectors, combines their sub-signals with
//! the stage weights and returns a [`LayerAssessment`]. Scorers are total:
//! detector faults and payloads of the wrong kind become zero-risk factors,
//! never errors.

mod input;
mod output;
mod state;

pub use input::InputGuard;
pub use output::OutputGuard;
pub use state::StateMonitor;

use std::collections::BTreeMap;

use crate::detectors::DetectorFault;
use crate::types::{Entity, Layer, RiskScore, RiskThresholds, StagePayload};

/// Factor recorded when a scorer receives another stage's payload.
pub const MALFORMED_INPUT: &str = "malformed_input";

/// Scores one stage of the pipeline.
pub trait LayerScorer: Send + Sync {
    fn layer(&self) -> Layer;

    fn score(&self, payload: &StagePayload) -> LayerAssessment;
}

/// Everything a scorer learned about one stage.
#[derive(Debug, Clone)]
pub struct LayerAssessment {
    pub score: RiskScore,
    pub entities: Vec<Entity>,
    /// Input text with PII replaced, when the stage redacts
    pub redacted_text: Option<String>,
    pub faults: Vec<DetectorFault>,
}

impl LayerAssessment {
    pub(crate) fn malformed(layer: Layer, received: &StagePayload) -> Self {
        tracing::warn!(
            layer = %layer,
            received = %received.layer(),
            "Scorer received a payload for another stage"
        );
        Self {
            score: RiskScore::zero(
                layer,
                MALFORMED_INPUT,
                format!("Expected a {} payload, got {}", layer, received.layer()),
            ),
            entities: Vec::new(),
            redacted_text: None,
            faults: Vec::new(),
        }
    }

    pub fn categories(&self) -> impl Iterator<Item = crate::types::EntityCategory> + '_ {
        self.entities.iter().map(|e| e.category)
    }
}

/// A named, weighted sub-signal of a stage.
#[derive(Debug, Clone, Copy)]
pub(crate) struct Signal {
    pub name: &'static str,
    pub weight: f64,
    pub value: f64,
}

impl Signal {
    pub fn new(name: &'static str, weight: f64, value: f64) -> Self {
        Self {
            name,
            weight,
            value: crate::types::clamp_unit(value),
        }
    }
}

/// Combine signals into a stage score.
///
/// The score is the weighted sum, raised to the dominant signal's value
/// when `floor` is set. Faulted detectors are listed as zero factors.
pub(crate) fn combine(
    layer: Layer,
    signals: &[Signal],
    dominant: &'static str,
    floor: bool,
    faults: &[DetectorFault],
    thresholds: &RiskThresholds,
) -> RiskScore {
    let weighted: f64 = signals.iter().map(|s| s.weight * s.value).sum();
    let dominant_value = signals
        .iter()
        .find(|s| s.name == dominant)
        .map(|s| s.value)
        .unwrap_or(0.0);
    let score = if floor {
        weighted.max(dominant_value)
    } else {
        weighted
    };

    let mut factors: BTreeMap<String, f64> = signals
        .iter()
        .map(|s| (s.name.to_string(), s.value))
        .collect();
    for fault in faults {
        factors.insert(fault.factor_name(), 0.0);
    }

    RiskScore::new(
        layer,
        score,
        factors,
        explain(signals, faults),
        thresholds,
    )
}

fn explain(signals: &[Signal], faults: &[DetectorFault]) -> String {
    let mut parts: Vec<String> = signals
        .iter()
        .filter(|s| s.value > 0.0)
        .map(|s| format!("{}={:.2}", s.name, s.value))
        .collect();
    if parts.is_empty() {
        parts.push("no risk signals".to_string());
    }
    let mut explanation = parts.join(", ");
    if !faults.is_empty() {
        let names: Vec<&str> = faults.iter().map(|f| f.detector).collect();
        explanation.push_str(&format!("; faulted detectors: {}", names.join(", ")));
    }
    explanation
}

/// Sort findings by category then position so merges are order-independent.
pub(crate) fn merge_entities(groups: Vec<Vec<Entity>>) -> Vec<Entity> {
    let mut all: Vec<Entity> = groups.into_iter().flatten().collect();
    all.sort_by(|a, b| {
        (a.category, a.span, &a.rule_id).cmp(&(b.category, b.span, &b.rule_id))
    });
    all
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_combine_weighted_and_floor() {
        let signals = [Signal::new("a", 0.5, 0.2), Signal::new("b", 0.5, 0.9)];
        let t = RiskThresholds::default();

        let plain = combine(Layer::InputGuard, &signals, "b", false, &[], &t);
        assert!((plain.risk_score - 0.55).abs() < 1e-9);

        let floored = combine(Layer::InputGuard, &signals, "b", true, &[], &t);
        assert!((floored.risk_score - 0.9).abs() < 1e-9);
        assert_eq!(floored.factor("a"), 0.2);
    }

    #[test]
    fn test_combine_is_order_independent() {
        let t = RiskThresholds::default();
        let a = [Signal::new("x", 0.6, 0.4), Signal::new("y", 0.3, 0.7), Signal::new("z", 0.1, 0.3)];
        let b = [a[2], a[0], a[1]];
        let sa = combine(Layer::StateMonitor, &a, "x", true, &[], &t);
        let sb = combine(Layer::StateMonitor, &b, "x", true, &[], &t);
        assert!((sa.risk_score - sb.risk_score).abs() < 1e-12);
        assert_eq!(sa.risk_factors, sb.risk_factors);
    }

    #[test]
    fn test_faults_recorded_as_factors() {
        let fault = DetectorFault {
            detector: "pii",
            message: "boom".to_string(),
        };
        let score = combine(
            Layer::InputGuard,
            &[Signal::new("pii_risk", 1.0, 0.0)],
            "pii_risk",
            true,
            &[fault],
            &RiskThresholds::default(),
        );
        assert_eq!(score.risk_score, 0.0);
        assert!(score.risk_factors.contains_key("detector_fault:pii"));
        assert!(score.explanation.contains("faulted detectors: pii"));
    }
}
