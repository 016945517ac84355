//! Risk aggregation across layers.
//!
//! Combines the per-stage scores of one request into a single
//! [`AggregatedRiskScore`]:
//!
//! 1. One score per rule layer; a shadow score replaces its rule layer.
//! 2. Weighted sum with weights renormalized over the layers present.
//! 3. Trust modifier, then strict-mode multiplier, each clamped to `[0, 1]`.
//! 4. Band classification and the escalation decision.
//!
//! Aggregation is a pure function of its inputs apart from the timestamp.

use chrono::Utc;
use std::collections::BTreeMap;

use crate::config::{AggregationConfig, EscalationConfig};
use crate::types::{
    clamp_unit, AggregatedRiskScore, Layer, LayerDetail, RiskBreakdown, RiskScore,
    RiskThresholds, RequestContext,
};

/// Trust scores below this value raise the aggregate.
pub const TRUST_NEUTRAL: f64 = 0.5;

/// Context-adjusted score with the multipliers that produced it.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Adjustment {
    pub score: f64,
    pub trust_multiplier: f64,
    pub strict_multiplier: f64,
}

#[derive(Debug, Clone)]
pub struct RiskAggregator {
    aggregation: AggregationConfig,
    escalation: EscalationConfig,
    thresholds: RiskThresholds,
}

impl RiskAggregator {
    pub fn new(
        aggregation: AggregationConfig,
        escalation: EscalationConfig,
        thresholds: RiskThresholds,
    ) -> Self {
        Self {
            aggregation,
            escalation,
            thresholds,
        }
    }

    pub fn thresholds(&self) -> &RiskThresholds {
        &self.thresholds
    }

    pub fn escalation(&self) -> &EscalationConfig {
        &self.escalation
    }

    /// Aggregate scores for a request that has not been blocked.
    pub fn aggregate(&self, scores: &[RiskScore], context: &RequestContext) -> AggregatedRiskScore {
        self.aggregate_for(scores, context, false)
    }

    /// Aggregate scores; a terminally blocked request never escalates.
    pub fn aggregate_for(
        &self,
        scores: &[RiskScore],
        context: &RequestContext,
        terminally_blocked: bool,
    ) -> AggregatedRiskScore {
        let selected = select_layers(scores);

        let total_weight: f64 = selected
            .keys()
            .map(|layer| self.aggregation.layer_weights.weight(*layer))
            .sum();
        let effective_weight = |layer: Layer| -> f64 {
            if total_weight > 0.0 {
                self.aggregation.layer_weights.weight(layer) / total_weight
            } else {
                1.0 / selected.len() as f64
            }
        };

        let mut layers = BTreeMap::new();
        let mut effective_weights = BTreeMap::new();
        let mut layer_scores = BTreeMap::new();
        let mut base_score = 0.0;
        for (base, score) in &selected {
            let weight = effective_weight(*base);
            let contribution = weight * score.risk_score;
            base_score += contribution;
            effective_weights.insert(*base, weight);
            layer_scores.insert(score.layer, score.risk_score);
            layers.insert(
                *base,
                LayerDetail {
                    source_layer: score.layer,
                    risk_score: score.risk_score,
                    risk_level: score.risk_level,
                    weight,
                    contribution,
                    risk_factors: score.risk_factors.clone(),
                },
            );
        }
        let base_score = clamp_unit(base_score);

        let adjustment = self.adjust(base_score, context);
        let overall_risk_level = self.thresholds.classify(adjustment.score);

        let should_escalate = self.escalation.enabled
            && !terminally_blocked
            && adjustment.score >= self.escalation.shadow_threshold
            && adjustment.score < self.escalation.critical_threshold;

        let escalation_reason = if should_escalate {
            driving_layer(&layers).map(|layer| format!("{}_above_shadow_threshold", layer))
        } else {
            None
        };

        tracing::debug!(
            base = base_score,
            adjusted = adjustment.score,
            level = %overall_risk_level,
            should_escalate,
            layers = selected.len(),
            "Aggregated risk"
        );

        AggregatedRiskScore {
            overall_risk_score: adjustment.score,
            overall_risk_level,
            layer_scores,
            risk_breakdown: RiskBreakdown {
                base_score,
                effective_weights,
                trust_multiplier: adjustment.trust_multiplier,
                strict_multiplier: adjustment.strict_multiplier,
                layers,
                shadow: Vec::new(),
            },
            should_escalate,
            escalation_reason,
            timestamp: Utc::now(),
        }
    }

    /// Apply the trust modifier then the strict multiplier.
    pub fn adjust(&self, base_score: f64, context: &RequestContext) -> Adjustment {
        let mut score = clamp_unit(base_score);

        let trust = clamp_unit(context.trust_score);
        let trust_multiplier = if self.aggregation.trust_adjustment && trust < TRUST_NEUTRAL {
            1.0 + (1.0 - trust) * self.aggregation.trust_factor
        } else {
            1.0
        };
        score = clamp_unit(score * trust_multiplier);

        let strict_multiplier = if self.aggregation.strict_adjustment && context.strict_mode {
            self.aggregation.strict_multiplier
        } else {
            1.0
        };
        score = clamp_unit(score * strict_multiplier);

        Adjustment {
            score,
            trust_multiplier,
            strict_multiplier,
        }
    }
}

impl Default for RiskAggregator {
    fn default() -> Self {
        Self::new(
            AggregationConfig::default(),
            EscalationConfig::default(),
            RiskThresholds::default(),
        )
    }
}

/// One score per rule layer, shadow scores taking precedence.
fn select_layers(scores: &[RiskScore]) -> BTreeMap<Layer, &RiskScore> {
    let mut selected: BTreeMap<Layer, &RiskScore> = BTreeMap::new();
    for score in scores {
        let base = score.layer.base();
        match selected.get(&base) {
            Some(existing) if existing.layer.is_shadow() && !score.layer.is_shadow() => {}
            _ => {
                selected.insert(base, score);
            }
        }
    }
    selected
}

/// Source layer with the largest weighted contribution; earlier layers win ties.
fn driving_layer(layers: &BTreeMap<Layer, LayerDetail>) -> Option<Layer> {
    layers
        .values()
        .fold(None::<&LayerDetail>, |best, detail| match best {
            Some(b) if b.contribution >= detail.contribution => Some(b),
            _ => Some(detail),
        })
        .map(|detail| detail.source_layer)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::types::RiskLevel;
    use proptest::prelude::*;

    fn score(layer: Layer, value: f64) -> RiskScore {
        RiskScore::new(layer, value, BTreeMap::new(), "test", &RiskThresholds::default())
    }

    fn without_timestamp(mut agg: AggregatedRiskScore) -> AggregatedRiskScore {
        agg.timestamp = chrono::DateTime::<Utc>::MIN_UTC;
        agg
    }

    #[test]
    fn test_single_layer_renormalizes() {
        let agg = RiskAggregator::default().aggregate(
            &[score(Layer::InputGuard, 0.285)],
            &RequestContext::default(),
        );
        assert!((agg.overall_risk_score - 0.285).abs() < 1e-9);
        assert_eq!(agg.overall_risk_level, RiskLevel::Low);
        assert!(!agg.should_escalate);
        assert_eq!(agg.risk_breakdown.effective_weights[&Layer::InputGuard], 1.0);
    }

    #[test]
    fn test_weighted_sum_over_all_layers() {
        let agg = RiskAggregator::default().aggregate(
            &[
                score(Layer::InputGuard, 0.5),
                score(Layer::StateMonitor, 1.0),
                score(Layer::OutputGuard, 0.0),
            ],
            &RequestContext::default(),
        );
        // 0.4*0.5 + 0.2*1.0 + 0.4*0.0
        assert!((agg.overall_risk_score - 0.4).abs() < 1e-9);
    }

    #[test]
    fn test_trust_modifier_scenario() {
        let aggregator = RiskAggregator::default();
        let context = RequestContext::default().with_trust_score(0.2);
        let adjusted = aggregator.adjust(0.6, &context);
        assert!((adjusted.score - 0.696).abs() < 1e-9);
        assert!(adjusted.score > 0.6);
        assert_eq!(aggregator.thresholds().classify(adjusted.score), RiskLevel::Medium);

        let agg = aggregator.aggregate(&[score(Layer::InputGuard, 0.6)], &context);
        assert!((agg.overall_risk_score - 0.696).abs() < 1e-9);
        assert_eq!(agg.overall_risk_level, RiskLevel::Medium);
    }

    #[test]
    fn test_trust_then_strict_order() {
        let aggregator = RiskAggregator::default();
        let context = RequestContext::default()
            .with_trust_score(0.0)
            .with_strict_mode(true);
        let adjusted = aggregator.adjust(0.5, &context);
        // 0.5 * 1.2 = 0.6, then * 1.2 = 0.72
        assert!((adjusted.score - 0.72).abs() < 1e-9);
        assert_eq!(adjusted.trust_multiplier, 1.2);
        assert_eq!(adjusted.strict_multiplier, 1.2);

        let saturated = aggregator.adjust(0.95, &context);
        assert_eq!(saturated.score, 1.0);
    }

    #[test]
    fn test_high_trust_is_not_discounted() {
        let context = RequestContext::default().with_trust_score(0.9);
        let adjusted = RiskAggregator::default().adjust(0.6, &context);
        assert_eq!(adjusted.score, 0.6);
    }

    #[test]
    fn test_escalation_band_and_reason() {
        let agg = RiskAggregator::default().aggregate(
            &[score(Layer::InputGuard, 0.9), score(Layer::StateMonitor, 0.1)],
            &RequestContext::default(),
        );
        assert!(agg.should_escalate);
        assert_eq!(
            agg.escalation_reason.as_deref(),
            Some("input_guard_above_shadow_threshold")
        );
    }

    #[test]
    fn test_critical_and_blocked_do_not_escalate() {
        let aggregator = RiskAggregator::default();
        let critical = aggregator.aggregate(&[score(Layer::InputGuard, 0.97)], &RequestContext::default());
        assert!(!critical.should_escalate);
        assert_eq!(critical.overall_risk_level, RiskLevel::Critical);

        let blocked = aggregator.aggregate_for(
            &[score(Layer::InputGuard, 0.7)],
            &RequestContext::default(),
            true,
        );
        assert!(!blocked.should_escalate);
        assert!(blocked.escalation_reason.is_none());
    }

    #[test]
    fn test_disabled_escalation() {
        let escalation = EscalationConfig {
            enabled: false,
            ..Default::default()
        };
        let aggregator = RiskAggregator::new(
            AggregationConfig::default(),
            escalation,
            RiskThresholds::default(),
        );
        let agg = aggregator.aggregate(&[score(Layer::InputGuard, 0.7)], &RequestContext::default());
        assert!(!agg.should_escalate);
    }

    #[test]
    fn test_shadow_replaces_base_layer() {
        let agg = RiskAggregator::default().aggregate(
            &[
                score(Layer::ShadowInput, 0.2),
                score(Layer::InputGuard, 0.9),
                score(Layer::OutputGuard, 0.4),
            ],
            &RequestContext::default(),
        );
        // input weight 0.4 and output weight 0.4 renormalize to 0.5 each
        assert!((agg.overall_risk_score - 0.3).abs() < 1e-9);
        assert_eq!(
            agg.risk_breakdown.layers[&Layer::InputGuard].source_layer,
            Layer::ShadowInput
        );
        assert!(agg.layer_scores.contains_key(&Layer::ShadowInput));
        assert!(!agg.layer_scores.contains_key(&Layer::InputGuard));
    }

    #[test]
    fn test_no_layers() {
        let agg = RiskAggregator::default().aggregate(&[], &RequestContext::default());
        assert_eq!(agg.overall_risk_score, 0.0);
        assert_eq!(agg.overall_risk_level, RiskLevel::None);
    }

    fn layer_strategy() -> impl Strategy<Value = Layer> {
        prop_oneof![
            Just(Layer::InputGuard),
            Just(Layer::StateMonitor),
            Just(Layer::OutputGuard),
            Just(Layer::ShadowInput),
            Just(Layer::ShadowState),
            Just(Layer::ShadowOutput),
        ]
    }

    proptest! {
        #[test]
        fn prop_overall_score_in_unit_interval(
            values in proptest::collection::vec((layer_strategy(), -1.0f64..2.0), 0..6),
            trust in 0.0f64..=1.0,
            strict in any::<bool>(),
        ) {
            let scores: Vec<_> = values.iter().map(|(l, v)| score(*l, *v)).collect();
            let context = RequestContext::default().with_trust_score(trust).with_strict_mode(strict);
            let agg = RiskAggregator::default().aggregate(&scores, &context);
            prop_assert!((0.0..=1.0).contains(&agg.overall_risk_score));
            prop_assert!((0.0..=1.0).contains(&agg.risk_breakdown.base_score));
        }

        #[test]
        fn prop_aggregation_is_idempotent(
            values in proptest::collection::vec((layer_strategy(), 0.0f64..=1.0), 1..6),
            trust in 0.0f64..=1.0,
        ) {
            let scores: Vec<_> = values.iter().map(|(l, v)| score(*l, *v)).collect();
            let context = RequestContext::default().with_trust_score(trust);
            let aggregator = RiskAggregator::default();
            let first = without_timestamp(aggregator.aggregate(&scores, &context));
            let second = without_timestamp(aggregator.aggregate(&scores, &context));
            prop_assert_eq!(first, second);
        }

        #[test]
        fn prop_low_trust_never_lowers_score(base in 0.0f64..=1.0, trust in 0.0f64..=1.0) {
            let aggregator = RiskAggregator::default();
            let context = RequestContext::default().with_trust_score(trust);
            prop_assert!(aggregator.adjust(base, &context).score >= base);
        }
    }
}
