//! Versioned rule sets.
//!
//! A rule set bundles pattern definitions with the scoring configuration
//! and carries an opaque version string assigned by whoever produced it.
//! It is parsed from YAML or JSON, validated, and compiled exactly once;
//! the compiled form is immutable and shared read-only across requests.

mod defaults;

use regex::Regex;
use serde::{Deserialize, Serialize};
use std::collections::HashSet;
use std::fs;
use std::path::Path;

use crate::config::{ConfigError, ScoringConfig};
use crate::types::EntityCategory;

pub use defaults::{injection_patterns, leak_patterns, pii_patterns};

/// Version assigned to the built-in rule set.
pub const BUILTIN_RULE_VERSION: &str = "builtin-1";

/// A single detection pattern as written in a rule file.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PatternDef {
    /// Unique identifier (e.g., "pii.email")
    pub id: String,
    pub category: EntityCategory,
    /// Regular expression (Rust `regex` syntax)
    pub pattern: String,
    /// Confidence assigned to each match
    pub confidence: f64,
    /// Severity weight of the finding
    #[serde(default = "default_severity")]
    pub severity: f64,
}

fn default_severity() -> f64 {
    1.0
}

impl PatternDef {
    pub fn new(
        id: impl Into<String>,
        category: EntityCategory,
        pattern: impl Into<String>,
        confidence: f64,
        severity: f64,
    ) -> Self {
        Self {
            id: id.into(),
            category,
            pattern: pattern.into(),
            confidence,
            severity,
        }
    }
}

/// Pattern families grouped by the detector that runs them.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct PatternLibrary {
    pub pii: Vec<PatternDef>,
    pub injection: Vec<PatternDef>,
    pub leak: Vec<PatternDef>,
}

impl Default for PatternLibrary {
    fn default() -> Self {
        Self {
            pii: pii_patterns(),
            injection: injection_patterns(),
            leak: leak_patterns(),
        }
    }
}

/// Immutable, versioned bundle of patterns and scoring parameters.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RuleSet {
    pub version: String,
    #[serde(default)]
    pub patterns: PatternLibrary,
    #[serde(default)]
    pub scoring: ScoringConfig,
}

impl Default for RuleSet {
    fn default() -> Self {
        Self {
            version: BUILTIN_RULE_VERSION.to_string(),
            patterns: PatternLibrary::default(),
            scoring: ScoringConfig::default(),
        }
    }
}

impl RuleSet {
    /// Parse and validate a rule set from YAML.
    pub fn from_yaml(yaml: &str) -> Result<Self, ConfigError> {
        let rules: RuleSet = serde_yaml::from_str(yaml)?;
        rules.validate()?;
        Ok(rules)
    }

    /// Parse and validate a rule set from JSON.
    pub fn from_json(json: &str) -> Result<Self, ConfigError> {
        let rules: RuleSet = serde_json::from_str(json)?;
        rules.validate()?;
        Ok(rules)
    }

    /// Load from a file; `.json` files are parsed as JSON, everything else as YAML.
    pub fn from_file(path: impl AsRef<Path>) -> Result<Self, ConfigError> {
        let path = path.as_ref();
        let content = fs::read_to_string(path)?;
        match path.extension().and_then(|ext| ext.to_str()) {
            Some("json") => Self::from_json(&content),
            _ => Self::from_yaml(&content),
        }
    }

    /// Serialize to YAML.
    pub fn to_yaml(&self) -> Result<String, ConfigError> {
        Ok(serde_yaml::to_string(self)?)
    }

    /// Validate scoring parameters and pattern definitions.
    ///
    /// Patterns are test-compiled here so that a bad rule set is rejected
    /// before anything is swapped in.
    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.version.trim().is_empty() {
            return Err(ConfigError::InvalidValue {
                field: "version".to_string(),
                reason: "must not be empty".to_string(),
            });
        }
        self.scoring.validate()?;

        let mut seen = HashSet::new();
        for def in self.all_patterns() {
            if !seen.insert(def.id.as_str()) {
                return Err(ConfigError::DuplicatePatternId(def.id.clone()));
            }
            CompiledPattern::compile(def)?;
        }
        Ok(())
    }

    fn all_patterns(&self) -> impl Iterator<Item = &PatternDef> {
        self.patterns
            .pii
            .iter()
            .chain(self.patterns.injection.iter())
            .chain(self.patterns.leak.iter())
    }
}

/// A pattern ready to run.
#[derive(Debug, Clone)]
pub struct CompiledPattern {
    pub id: String,
    pub category: EntityCategory,
    pub regex: Regex,
    pub confidence: f64,
    pub severity: f64,
}

impl CompiledPattern {
    pub fn compile(def: &PatternDef) -> Result<Self, ConfigError> {
        for (field, value) in [("confidence", def.confidence), ("severity", def.severity)] {
            if !(0.0..=1.0).contains(&value) {
                return Err(ConfigError::OutOfRange {
                    field: format!("{}.{}", def.id, field),
                    value,
                });
            }
        }
        let regex = Regex::new(&def.pattern).map_err(|source| ConfigError::InvalidPattern {
            id: def.id.clone(),
            source,
        })?;
        Ok(Self {
            id: def.id.clone(),
            category: def.category,
            regex,
            confidence: def.confidence,
            severity: def.severity,
        })
    }
}

/// Compile a family of pattern definitions.
pub fn compile_all(defs: &[PatternDef]) -> Result<Vec<CompiledPattern>, ConfigError> {
    defs.iter().map(CompiledPattern::compile).collect()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_builtin_rule_set_is_valid() {
        let rules = RuleSet::default();
        assert!(rules.validate().is_ok());
        assert_eq!(rules.version, BUILTIN_RULE_VERSION);
    }

    #[test]
    fn test_minimal_yaml_uses_builtin_patterns() {
        let rules = RuleSet::from_yaml("version: \"2025-06-01.3\"\n").unwrap();
        assert_eq!(rules.version, "2025-06-01.3");
        assert_eq!(rules.patterns.pii.len(), pii_patterns().len());
    }

    #[test]
    fn test_custom_patterns_replace_family() {
        let yaml = r#"
version: "canary-7"
patterns:
  injection:
    - id: "inj.custom"
      category: injection_direct
      pattern: "(?i)sudo mode"
      confidence: 0.7
"#;
        let rules = RuleSet::from_yaml(yaml).unwrap();
        assert_eq!(rules.patterns.injection.len(), 1);
        assert_eq!(rules.patterns.injection[0].severity, 1.0);
        assert!(!rules.patterns.leak.is_empty());
    }

    #[test]
    fn test_invalid_regex_rejected() {
        let yaml = r#"
version: "bad"
patterns:
  pii:
    - id: "pii.broken"
      category: email
      pattern: "([a-z"
      confidence: 0.5
"#;
        let err = RuleSet::from_yaml(yaml).unwrap_err();
        assert!(matches!(err, ConfigError::InvalidPattern { ref id, .. } if id == "pii.broken"));
    }

    #[test]
    fn test_duplicate_ids_rejected() {
        let mut rules = RuleSet::default();
        let dup = rules.patterns.pii[0].clone();
        rules.patterns.leak.push(dup);
        assert!(matches!(
            rules.validate(),
            Err(ConfigError::DuplicatePatternId(_))
        ));
    }

    #[test]
    fn test_out_of_range_confidence_rejected() {
        let mut rules = RuleSet::default();
        rules.patterns.injection[0].confidence = 1.5;
        assert!(matches!(rules.validate(), Err(ConfigError::OutOfRange { .. })));
    }

    #[test]
    fn test_invalid_scoring_rejected_at_load() {
        let yaml = r#"
version: "v2"
scoring:
  output_guard:
    weights:
      leak: 0.9
      validation: 0.3
      new_pii: 0.2
"#;
        assert!(matches!(
            RuleSet::from_yaml(yaml),
            Err(ConfigError::InvalidWeights { .. })
        ));
    }

    #[test]
    fn test_yaml_roundtrip_preserves_version() {
        let rules = RuleSet::default();
        let yaml = rules.to_yaml().unwrap();
        let parsed = RuleSet::from_yaml(&yaml).unwrap();
        assert_eq!(parsed, rules);
    }
}
