//! State monitor: loops, budget utilisation and stalled progress.

use crate::config::StateMonitorConfig;
use crate::detectors::{run_guarded, StateDetector, StateSignals};
use crate::types::{Layer, RiskThresholds, StagePayload};

use super::{combine, merge_entities, LayerAssessment, LayerScorer, Signal};

pub struct StateMonitor {
    detector: StateDetector,
    config: StateMonitorConfig,
    thresholds: RiskThresholds,
}

impl StateMonitor {
    pub fn new(config: StateMonitorConfig, thresholds: RiskThresholds) -> Self {
        Self {
            detector: StateDetector::new(config.clone()),
            config,
            thresholds,
        }
    }
}

impl LayerScorer for StateMonitor {
    fn layer(&self) -> Layer {
        Layer::StateMonitor
    }

    fn score(&self, payload: &StagePayload) -> LayerAssessment {
        let StagePayload::State(snapshot) = payload else {
            return LayerAssessment::malformed(self.layer(), payload);
        };

        let (signals, fault): (StateSignals, _) =
            run_guarded("state", || Ok(self.detector.detect(snapshot)));
        let faults: Vec<_> = fault.into_iter().collect();
        let weights = &self.config.weights;

        let score = combine(
            Layer::StateMonitor,
            &[
                Signal::new("loop_risk", weights.looping, signals.loop_risk),
                Signal::new("cost_risk", weights.cost, signals.cost_risk),
                Signal::new("progress_risk", weights.progress, signals.progress_risk),
            ],
            "loop_risk",
            self.config.dominant_floor,
            &faults,
            &self.thresholds,
        );

        tracing::debug!(
            score = score.risk_score,
            level = %score.risk_level,
            actions = snapshot.actions.len(),
            iterations = snapshot.iterations,
            "State monitor scored"
        );

        LayerAssessment {
            score,
            entities: merge_entities(vec![signals.entities]),
            redacted_text: None,
            faults,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::types::{AgentAction, AgentStateSnapshot, RiskLevel};

    fn monitor() -> StateMonitor {
        StateMonitor::new(StateMonitorConfig::default(), RiskThresholds::default())
    }

    #[test]
    fn test_healthy_run_scores_zero() {
        let snapshot = AgentStateSnapshot {
            actions: vec![
                AgentAction::new("search", "q=rust", true),
                AgentAction::new("fetch", "url=a", true),
            ],
            tokens_used: 100,
            token_budget: Some(10_000),
            ..Default::default()
        };
        let assessment = monitor().score(&StagePayload::State(snapshot));
        assert!(assessment.score.risk_score < 0.2);
        assert_eq!(assessment.score.risk_level, RiskLevel::None);
    }

    #[test]
    fn test_stuck_loop_scores_at_least_loop_risk() {
        let snapshot = AgentStateSnapshot {
            actions: (0..6).map(|_| AgentAction::new("fetch", "url=a", false)).collect(),
            tokens_used: 5_000,
            token_budget: Some(10_000),
            ..Default::default()
        };
        let assessment = monitor().score(&StagePayload::State(snapshot));
        let score = &assessment.score;
        // 0.6*0.6 + 0.3*0.5 + 0.1*0.3 = 0.54, floored to the loop risk
        assert_eq!(score.factor("loop_risk"), 0.6);
        assert_eq!(score.factor("progress_risk"), 0.3);
        assert!((score.risk_score - 0.6).abs() < 1e-9);
        assert_eq!(score.risk_level, RiskLevel::Medium);
    }

    #[test]
    fn test_input_payload_is_malformed() {
        let assessment = monitor().score(&StagePayload::input("hello"));
        assert!(assessment.score.risk_factors.contains_key("malformed_input"));
    }
}
