//! Scoring configuration.
//!
//! Every struct here has a `Default` matching the documented defaults and
//! is validated once, when a rule set is loaded. Invalid weight sums or
//! non-monotonic thresholds are fatal; there is no per-request fallback.

use serde::{Deserialize, Serialize};
use thiserror::Error;

use crate::types::{EntityCategory, Layer, RiskThresholds};

/// Tolerance when checking that weights sum to 1.0.
pub const WEIGHT_TOLERANCE: f64 = 1e-9;

/// Errors raised while loading or validating configuration.
#[derive(Error, Debug)]
pub enum ConfigError {
    #[error("{stage} weights must sum to 1.0, got {sum}")]
    InvalidWeights { stage: String, sum: f64 },

    #[error("{field} must be in [0, 1], got {value}")]
    OutOfRange { field: String, value: f64 },

    #[error("Risk thresholds must be strictly increasing within (0, 1]: {0}")]
    NonMonotonicThresholds(String),

    #[error("Invalid value for {field}: {reason}")]
    InvalidValue { field: String, reason: String },

    #[error("Pattern '{id}' failed to compile: {source}")]
    InvalidPattern {
        id: String,
        #[source]
        source: regex::Error,
    },

    #[error("Duplicate pattern id: {0}")]
    DuplicatePatternId(String),

    #[error("Failed to read rule set: {0}")]
    Io(#[from] std::io::Error),

    #[error("Failed to parse YAML: {0}")]
    Yaml(#[from] serde_yaml::Error),

    #[error("Failed to parse JSON: {0}")]
    Json(#[from] serde_json::Error),
}

/// Check that a named weight set lies in `[0, 1]` and sums to 1.0.
pub fn check_weights(stage: &str, weights: &[(&str, f64)]) -> Result<(), ConfigError> {
    for (name, value) in weights {
        check_unit(&format!("{}.{}", stage, name), *value)?;
    }
    let sum: f64 = weights.iter().map(|(_, w)| w).sum();
    if (sum - 1.0).abs() > WEIGHT_TOLERANCE {
        return Err(ConfigError::InvalidWeights {
            stage: stage.to_string(),
            sum,
        });
    }
    Ok(())
}

fn check_unit(field: &str, value: f64) -> Result<(), ConfigError> {
    if !(0.0..=1.0).contains(&value) {
        return Err(ConfigError::OutOfRange {
            field: field.to_string(),
            value,
        });
    }
    Ok(())
}

fn check_positive(field: &str, value: f64) -> Result<(), ConfigError> {
    if !(value > 0.0 && value.is_finite()) {
        return Err(ConfigError::InvalidValue {
            field: field.to_string(),
            reason: format!("must be a positive number, got {}", value),
        });
    }
    Ok(())
}

impl RiskThresholds {
    /// Bands must be contiguous and non-empty: `0 < low < medium < high < critical <= 1`.
    pub fn validate(&self) -> Result<(), ConfigError> {
        let bounds = [self.low, self.medium, self.high, self.critical];
        let ordered = self.low > 0.0
            && bounds.windows(2).all(|pair| pair[0] < pair[1])
            && self.critical <= 1.0;
        if !ordered {
            return Err(ConfigError::NonMonotonicThresholds(format!(
                "low={}, medium={}, high={}, critical={}",
                self.low, self.medium, self.high, self.critical
            )));
        }
        Ok(())
    }
}

// =============================================================================
// STAGE CONFIGURATION
// =============================================================================

/// Input guard weights: `pii·pii_risk + injection·injection_risk`.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct InputWeights {
    pub pii: f64,
    pub injection: f64,
}

impl Default for InputWeights {
    fn default() -> Self {
        Self {
            pii: 0.5,
            injection: 0.5,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct InputGuardConfig {
    pub weights: InputWeights,
    /// Divisor applied to the summed severity·confidence of PII findings
    pub pii_normalization: f64,
    /// Score is at least the injection risk when enabled
    pub dominant_floor: bool,
    /// Replace PII spans before the text reaches later stages
    pub redact: bool,
    /// Capacity of the Luhn checksum memo
    pub luhn_cache_capacity: u64,
}

impl Default for InputGuardConfig {
    fn default() -> Self {
        Self {
            weights: InputWeights::default(),
            pii_normalization: 1.0,
            dominant_floor: true,
            redact: true,
            luhn_cache_capacity: 10_000,
        }
    }
}

/// State monitor weights: `loop·loop_risk + cost·cost_risk + progress·progress_risk`.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct StateWeights {
    #[serde(rename = "loop")]
    pub looping: f64,
    pub cost: f64,
    pub progress: f64,
}

impl Default for StateWeights {
    fn default() -> Self {
        Self {
            looping: 0.6,
            cost: 0.3,
            progress: 0.1,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct StateMonitorConfig {
    pub weights: StateWeights,
    /// Number of most recent actions inspected for repetition
    pub loop_window: usize,
    /// Identical actions within the window that count as a loop
    pub loop_repeat_threshold: usize,
    /// Number of most recent actions that must all lack progress
    pub progress_window: usize,
    /// Fixed risk reported when no progress is observed
    pub progress_flag_value: f64,
    /// Score is at least the loop risk when enabled
    pub dominant_floor: bool,
}

impl Default for StateMonitorConfig {
    fn default() -> Self {
        Self {
            weights: StateWeights::default(),
            loop_window: 10,
            loop_repeat_threshold: 3,
            progress_window: 5,
            progress_flag_value: 0.3,
            dominant_floor: true,
        }
    }
}

/// Output guard weights: `leak·leak_risk + validation·validation_risk + new_pii·new_pii_risk`.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct OutputWeights {
    pub leak: f64,
    pub validation: f64,
    pub new_pii: f64,
}

impl Default for OutputWeights {
    fn default() -> Self {
        Self {
            leak: 0.5,
            validation: 0.3,
            new_pii: 0.2,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct OutputGuardConfig {
    pub weights: OutputWeights,
    pub pii_normalization: f64,
    /// Word n-gram length used to spot system prompt echoes
    pub prompt_leak_ngram: usize,
    /// Risk assigned to empty output
    pub empty_output_risk: f64,
    /// Score is at least the leak risk when enabled
    pub dominant_floor: bool,
}

impl Default for OutputGuardConfig {
    fn default() -> Self {
        Self {
            weights: OutputWeights::default(),
            pii_normalization: 1.0,
            prompt_leak_ngram: 8,
            empty_output_risk: 0.5,
            dominant_floor: true,
        }
    }
}

// =============================================================================
// AGGREGATION & ESCALATION
// =============================================================================

/// Weight of each rule layer in the overall score. Shadow layers inherit
/// the weight of the layer they replace.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct LayerWeights {
    pub input_guard: f64,
    pub state_monitor: f64,
    pub output_guard: f64,
}

impl Default for LayerWeights {
    fn default() -> Self {
        Self {
            input_guard: 0.4,
            state_monitor: 0.2,
            output_guard: 0.4,
        }
    }
}

impl LayerWeights {
    pub fn weight(&self, layer: Layer) -> f64 {
        match layer.base() {
            Layer::InputGuard => self.input_guard,
            Layer::StateMonitor => self.state_monitor,
            _ => self.output_guard,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct AggregationConfig {
    pub layer_weights: LayerWeights,
    pub trust_adjustment: bool,
    /// `k` in `1 + (1 - trust)·k`
    pub trust_factor: f64,
    pub strict_adjustment: bool,
    pub strict_multiplier: f64,
}

impl Default for AggregationConfig {
    fn default() -> Self {
        Self {
            layer_weights: LayerWeights::default(),
            trust_adjustment: true,
            trust_factor: 0.2,
            strict_adjustment: true,
            strict_multiplier: 1.2,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct EscalationConfig {
    pub enabled: bool,
    /// Lower bound (inclusive) of the escalation band
    pub shadow_threshold: f64,
    /// Upper bound (exclusive); at or above this the rules alone decide
    pub critical_threshold: f64,
}

impl Default for EscalationConfig {
    fn default() -> Self {
        Self {
            enabled: true,
            shadow_threshold: 0.5,
            critical_threshold: 0.95,
        }
    }
}

// =============================================================================
// TOP LEVEL
// =============================================================================

/// Every tunable of the deterministic pipeline.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct ScoringConfig {
    pub thresholds: RiskThresholds,
    pub input_guard: InputGuardConfig,
    pub state_monitor: StateMonitorConfig,
    pub output_guard: OutputGuardConfig,
    pub aggregation: AggregationConfig,
    pub escalation: EscalationConfig,
    /// Categories that block regardless of aggregate score
    pub hard_block: Vec<EntityCategory>,
    /// Texts longer than this are rejected by detectors
    pub max_text_bytes: usize,
}

impl Default for ScoringConfig {
    fn default() -> Self {
        Self {
            thresholds: RiskThresholds::default(),
            input_guard: InputGuardConfig::default(),
            state_monitor: StateMonitorConfig::default(),
            output_guard: OutputGuardConfig::default(),
            aggregation: AggregationConfig::default(),
            escalation: EscalationConfig::default(),
            hard_block: vec![EntityCategory::CreditCard],
            max_text_bytes: 1024 * 1024,
        }
    }
}

impl ScoringConfig {
    /// Validate every section.
    pub fn validate(&self) -> Result<(), ConfigError> {
        self.thresholds.validate()?;

        let input = &self.input_guard;
        check_weights(
            "input_guard",
            &[("pii", input.weights.pii), ("injection", input.weights.injection)],
        )?;
        check_positive("input_guard.pii_normalization", input.pii_normalization)?;
        if input.luhn_cache_capacity == 0 {
            return Err(ConfigError::InvalidValue {
                field: "input_guard.luhn_cache_capacity".to_string(),
                reason: "must be at least 1".to_string(),
            });
        }

        let state = &self.state_monitor;
        check_weights(
            "state_monitor",
            &[
                ("loop", state.weights.looping),
                ("cost", state.weights.cost),
                ("progress", state.weights.progress),
            ],
        )?;
        if state.loop_repeat_threshold < 2 || state.loop_window < state.loop_repeat_threshold {
            return Err(ConfigError::InvalidValue {
                field: "state_monitor.loop_repeat_threshold".to_string(),
                reason: format!(
                    "must be >= 2 and <= loop_window ({}), got {}",
                    state.loop_window, state.loop_repeat_threshold
                ),
            });
        }
        if state.progress_window == 0 {
            return Err(ConfigError::InvalidValue {
                field: "state_monitor.progress_window".to_string(),
                reason: "must be at least 1".to_string(),
            });
        }
        check_unit("state_monitor.progress_flag_value", state.progress_flag_value)?;

        let output = &self.output_guard;
        check_weights(
            "output_guard",
            &[
                ("leak", output.weights.leak),
                ("validation", output.weights.validation),
                ("new_pii", output.weights.new_pii),
            ],
        )?;
        check_positive("output_guard.pii_normalization", output.pii_normalization)?;
        check_unit("output_guard.empty_output_risk", output.empty_output_risk)?;
        if output.prompt_leak_ngram < 3 {
            return Err(ConfigError::InvalidValue {
                field: "output_guard.prompt_leak_ngram".to_string(),
                reason: format!("must be at least 3, got {}", output.prompt_leak_ngram),
            });
        }

        let agg = &self.aggregation;
        check_weights(
            "aggregation.layer_weights",
            &[
                ("input_guard", agg.layer_weights.input_guard),
                ("state_monitor", agg.layer_weights.state_monitor),
                ("output_guard", agg.layer_weights.output_guard),
            ],
        )?;
        if !(agg.trust_factor >= 0.0 && agg.trust_factor.is_finite()) {
            return Err(ConfigError::InvalidValue {
                field: "aggregation.trust_factor".to_string(),
                reason: format!("must be a non-negative number, got {}", agg.trust_factor),
            });
        }
        check_positive("aggregation.strict_multiplier", agg.strict_multiplier)?;

        let esc = &self.escalation;
        check_unit("escalation.shadow_threshold", esc.shadow_threshold)?;
        check_unit("escalation.critical_threshold", esc.critical_threshold)?;
        if esc.shadow_threshold >= esc.critical_threshold {
            return Err(ConfigError::NonMonotonicThresholds(format!(
                "escalation.shadow_threshold ({}) must be below escalation.critical_threshold ({})",
                esc.shadow_threshold, esc.critical_threshold
            )));
        }

        if self.max_text_bytes == 0 {
            return Err(ConfigError::InvalidValue {
                field: "max_text_bytes".to_string(),
                reason: "must be at least 1".to_string(),
            });
        }

        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use proptest::prelude::*;

    #[test]
    fn test_defaults_validate() {
        assert!(ScoringConfig::default().validate().is_ok());
    }

    #[test]
    fn test_weight_sum_rejected() {
        let mut config = ScoringConfig::default();
        config.input_guard.weights.pii = 0.7;
        let err = config.validate().unwrap_err();
        assert!(matches!(err, ConfigError::InvalidWeights { ref stage, .. } if stage == "input_guard"));
    }

    #[test]
    fn test_layer_weight_sum_rejected() {
        let mut config = ScoringConfig::default();
        config.aggregation.layer_weights.state_monitor = 0.5;
        assert!(matches!(
            config.validate(),
            Err(ConfigError::InvalidWeights { .. })
        ));
    }

    #[test]
    fn test_non_monotonic_thresholds_rejected() {
        let mut config = ScoringConfig::default();
        config.thresholds.high = 0.4;
        assert!(matches!(
            config.validate(),
            Err(ConfigError::NonMonotonicThresholds(_))
        ));

        let mut config = ScoringConfig::default();
        config.thresholds.low = 0.0;
        assert!(config.validate().is_err());
    }

    #[test]
    fn test_escalation_band_must_be_ordered() {
        let mut config = ScoringConfig::default();
        config.escalation.shadow_threshold = 0.96;
        assert!(matches!(
            config.validate(),
            Err(ConfigError::NonMonotonicThresholds(_))
        ));
    }

    #[test]
    fn test_partial_yaml_uses_defaults() {
        let yaml = r#"
thresholds:
  critical: 0.9
escalation:
  shadow_threshold: 0.8
"#;
        let config: ScoringConfig = serde_yaml::from_str(yaml).unwrap();
        assert_eq!(config.thresholds.critical, 0.9);
        assert_eq!(config.thresholds.low, 0.2);
        assert_eq!(config.escalation.shadow_threshold, 0.8);
        assert_eq!(config.state_monitor.weights.looping, 0.6);
        assert!(config.validate().is_ok());
    }

    #[test]
    fn test_state_weights_use_loop_key() {
        let yaml = "weights:\n  loop: 0.5\n  cost: 0.4\n  progress: 0.1\n";
        let config: StateMonitorConfig = serde_yaml::from_str(yaml).unwrap();
        assert_eq!(config.weights.looping, 0.5);
    }

    proptest! {
        #[test]
        fn prop_valid_thresholds_partition_unit_interval(
            mut cuts in proptest::collection::vec(0.01f64..1.0, 4)
        ) {
            cuts.sort_by(|a, b| a.partial_cmp(b).unwrap());
            prop_assume!(cuts.windows(2).all(|p| p[0] < p[1]));
            let t = RiskThresholds { low: cuts[0], medium: cuts[1], high: cuts[2], critical: cuts[3] };
            prop_assert!(t.validate().is_ok());

            let levels = [
                crate::types::RiskLevel::None,
                crate::types::RiskLevel::Low,
                crate::types::RiskLevel::Medium,
                crate::types::RiskLevel::High,
                crate::types::RiskLevel::Critical,
            ];
            // contiguous: each band starts where the previous one ends
            let mut expected_start = 0.0;
            for level in levels {
                let (lo, hi) = t.band(level);
                prop_assert_eq!(lo, expected_start);
                prop_assert!(lo < hi || (level == crate::types::RiskLevel::Critical && lo <= hi));
                expected_start = hi;
            }
            prop_assert_eq!(expected_start, 1.0);
        }

        #[test]
        fn prop_every_score_falls_in_its_band(score in 0.0f64..=1.0) {
            let t = RiskThresholds::default();
            let level = t.classify(score);
            let (lo, hi) = t.band(level);
            prop_assert!(score >= lo);
            prop_assert!(score < hi || (level == crate::types::RiskLevel::Critical && score <= hi));
        }

        #[test]
        fn prop_weights_off_by_more_than_tolerance_rejected(a in 0.0f64..1.0, delta in 0.001f64..0.5) {
            let b = 1.0 - a + delta;
            prop_assume!(b <= 1.0);
            prop_assert!(check_weights("stage", &[("a", a), ("b", b)]).is_err());
            prop_assert!(check_weights("stage", &[("a", a), ("b", 1.0 - a)]).is_ok());
        }
    }
}
