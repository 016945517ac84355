//! Output guard: leaks, structural validity and PII introduced by the agent.

use crate::config::OutputGuardConfig;
use crate::detectors::{
    detect_guarded, leak_risk, pii_risk, run_guarded, Detector, LeakDetector, OutputValidator,
    PiiDetector, PromptEchoDetector, ValidationOutcome,
};
use crate::types::{Entity, Layer, OutputPayload, RiskThresholds, StagePayload};

use super::{combine, merge_entities, LayerAssessment, LayerScorer, Signal};

pub struct OutputGuard {
    leak: LeakDetector,
    pii: PiiDetector,
    validator: OutputValidator,
    config: OutputGuardConfig,
    thresholds: RiskThresholds,
    max_text_bytes: usize,
}

impl OutputGuard {
    pub fn new(
        leak: LeakDetector,
        pii: PiiDetector,
        config: OutputGuardConfig,
        thresholds: RiskThresholds,
        max_text_bytes: usize,
    ) -> Self {
        Self {
            leak,
            pii,
            validator: OutputValidator::new(config.empty_output_risk, max_text_bytes),
            config,
            thresholds,
            max_text_bytes,
        }
    }

    fn leaks(&self, output: &OutputPayload) -> (Vec<Entity>, Vec<crate::detectors::DetectorFault>) {
        let (mut entities, fault) = detect_guarded(&self.leak, &output.text);
        let mut faults: Vec<_> = fault.into_iter().collect();

        if let Some(prompt) = output.system_prompt.as_deref() {
            let echo = PromptEchoDetector::new(prompt, self.config.prompt_leak_ngram, self.max_text_bytes);
            let (echoed, fault) = detect_guarded(&echo as &dyn Detector, &output.text);
            entities.extend(echoed);
            faults.extend(fault);
        }
        (entities, faults)
    }

    /// PII in the output whose text does not occur in the input.
    fn new_pii(&self, output: &OutputPayload) -> (Vec<Entity>, Option<crate::detectors::DetectorFault>) {
        let (found, fault) = detect_guarded(&self.pii, &output.text);
        let input = output.input_text.as_deref().unwrap_or("");
        let fresh = found
            .into_iter()
            .filter(|e| {
                output
                    .text
                    .get(e.span.start..e.span.end)
                    .map(|matched| !input.contains(matched))
                    .unwrap_or(true)
            })
            .collect();
        (fresh, fault)
    }

    fn assess(&self, output: &OutputPayload) -> LayerAssessment {
        let ((leak_entities, leak_faults), ((pii_entities, pii_fault), (validation, validation_fault))) =
            rayon::join(
                || self.leaks(output),
                || {
                    rayon::join(
                        || self.new_pii(output),
                        || {
                            run_guarded::<ValidationOutcome, _>("validation", || {
                                self.validator
                                    .validate(&output.text, output.expected_schema.as_ref())
                            })
                        },
                    )
                },
            );

        let mut faults = leak_faults;
        faults.extend(pii_fault);
        faults.extend(validation_fault);

        let weights = &self.config.weights;
        let score = combine(
            Layer::OutputGuard,
            &[
                Signal::new("leak_risk", weights.leak, leak_risk(&leak_entities)),
                Signal::new("validation_risk", weights.validation, validation.risk),
                Signal::new(
                    "new_pii_risk",
                    weights.new_pii,
                    pii_risk(&pii_entities, self.config.pii_normalization),
                ),
            ],
            "leak_risk",
            self.config.dominant_floor,
            &faults,
            &self.thresholds,
        );

        if !validation.errors.is_empty() {
            tracing::debug!(errors = ?validation.errors, "Output failed validation");
        }
        tracing::debug!(
            score = score.risk_score,
            level = %score.risk_level,
            leak_findings = leak_entities.len(),
            new_pii_findings = pii_entities.len(),
            "Output guard scored"
        );

        LayerAssessment {
            score,
            entities: merge_entities(vec![leak_entities, pii_entities, validation.entities]),
            redacted_text: None,
            faults,
        }
    }
}

impl LayerScorer for OutputGuard {
    fn layer(&self) -> Layer {
        Layer::OutputGuard
    }

    fn score(&self, payload: &StagePayload) -> LayerAssessment {
        match payload {
            StagePayload::Output(output) => self.assess(output),
            other => LayerAssessment::malformed(self.layer(), other),
        }
    }
}
