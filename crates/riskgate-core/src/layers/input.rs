//! Input guard: PII and prompt injection in user input.

use crate::config::InputGuardConfig;
use crate::detectors::{detect_guarded, injection_risk, pii_risk, redact, InjectionDetector, PiiDetector};
use crate::types::{Layer, RiskThresholds, StagePayload};

use super::{combine, merge_entities, LayerAssessment, LayerScorer, Signal};

pub struct InputGuard {
    pii: PiiDetector,
    injection: InjectionDetector,
    config: InputGuardConfig,
    thresholds: RiskThresholds,
}

impl InputGuard {
    pub fn new(
        pii: PiiDetector,
        injection: InjectionDetector,
        config: InputGuardConfig,
        thresholds: RiskThresholds,
    ) -> Self {
        Self {
            pii,
            injection,
            config,
            thresholds,
        }
    }

    pub fn pii_detector(&self) -> &PiiDetector {
        &self.pii
    }

    fn assess(&self, text: &str) -> LayerAssessment {
        let ((pii_entities, pii_fault), (injection_entities, injection_fault)) = rayon::join(
            || detect_guarded(&self.pii, text),
            || detect_guarded(&self.injection, text),
        );

        let pii = pii_risk(&pii_entities, self.config.pii_normalization);
        let injection = injection_risk(&injection_entities);
        let faults: Vec<_> = pii_fault.into_iter().chain(injection_fault).collect();

        let score = combine(
            Layer::InputGuard,
            &[
                Signal::new("pii_risk", self.config.weights.pii, pii),
                Signal::new("injection_risk", self.config.weights.injection, injection),
            ],
            "injection_risk",
            self.config.dominant_floor,
            &faults,
            &self.thresholds,
        );

        let redacted_text = self.config.redact.then(|| redact(text, &pii_entities));

        tracing::debug!(
            score = score.risk_score,
            level = %score.risk_level,
            pii_findings = pii_entities.len(),
            injection_findings = injection_entities.len(),
            "Input guard scored"
        );

        LayerAssessment {
            score,
            entities: merge_entities(vec![pii_entities, injection_entities]),
            redacted_text,
            faults,
        }
    }
}

impl LayerScorer for InputGuard {
    fn layer(&self) -> Layer {
        Layer::InputGuard
    }

    fn score(&self, payload: &StagePayload) -> LayerAssessment {
        match payload {
            StagePayload::Input { text } => self.assess(text),
            other => LayerAssessment::malformed(self.layer(), other),
        }
    }
}
