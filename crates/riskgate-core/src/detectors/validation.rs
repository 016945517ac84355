//! Structural validation of agent output against an expected JSON schema.

use serde_json::Value;

use crate::types::{Entity, EntityCategory, Span};

use super::{check_size, DetectorError};

/// Result of validating one output.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct ValidationOutcome {
    pub risk: f64,
    pub errors: Vec<String>,
    pub entities: Vec<Entity>,
}

impl ValidationOutcome {
    fn failure(risk: f64, rule_id: &str, span: Span, errors: Vec<String>) -> Self {
        Self {
            risk,
            errors,
            entities: vec![Entity::new(
                EntityCategory::ValidationFailure,
                span,
                1.0,
                risk,
                rule_id,
            )],
        }
    }
}

#[derive(Debug, Clone)]
pub struct OutputValidator {
    empty_output_risk: f64,
    max_text_bytes: usize,
}

impl OutputValidator {
    pub fn new(empty_output_risk: f64, max_text_bytes: usize) -> Self {
        Self {
            empty_output_risk,
            max_text_bytes,
        }
    }

    /// Empty output scores `empty_output_risk`. With a schema, output that
    /// is not JSON scores 1.0 and each schema violation adds 0.1 on top of 0.5.
    pub fn validate(&self, text: &str, schema: Option<&Value>) -> Result<ValidationOutcome, DetectorError> {
        check_size(text, self.max_text_bytes)?;

        if text.trim().is_empty() {
            return Ok(ValidationOutcome::failure(
                self.empty_output_risk,
                "validation.empty",
                Span::new(0, text.len()),
                vec!["output is empty".to_string()],
            ));
        }
        let Some(schema) = schema else {
            return Ok(ValidationOutcome::default());
        };

        let validator = jsonschema::options()
            .build(schema)
            .map_err(|e| DetectorError::InvalidSchema(e.to_string()))?;

        let body = strip_code_fence(text);
        let instance: Value = match serde_json::from_str(body) {
            Ok(v) => v,
            Err(e) => {
                return Ok(ValidationOutcome::failure(
                    1.0,
                    "validation.unparseable",
                    Span::new(0, text.len()),
                    vec![format!("output is not valid JSON: {}", e)],
                ))
            }
        };

        let errors: Vec<String> = validator
            .iter_errors(&instance)
            .map(|e| format!("{} at {}", e, e.instance_path))
            .collect();
        if errors.is_empty() {
            return Ok(ValidationOutcome::default());
        }
        let risk = (0.5 + 0.1 * errors.len() as f64).min(1.0);
        Ok(ValidationOutcome::failure(
            risk,
            "validation.schema",
            Span::new(0, text.len()),
            errors,
        ))
    }
}

/// Drop a surrounding Markdown code fence, if any.
fn strip_code_fence(text: &str) -> &str {
    let trimmed = text.trim();
    let Some(rest) = trimmed.strip_prefix("```") else {
        return trimmed;
    };
    let rest = rest.strip_suffix("```").unwrap_or(rest);
    // skip the language tag line
    match rest.find('\n') {
        Some(newline) => rest[newline + 1..].trim(),
        None => rest.trim(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn validator() -> OutputValidator {
        OutputValidator::new(0.5, 1024 * 1024)
    }

    fn schema() -> Value {
        json!({
            "type": "object",
            "required": ["answer", "sources"],
            "properties": {
                "answer": {"type": "string"},
                "sources": {"type": "array", "items": {"type": "string"}}
            }
        })
    }

    #[test]
    fn test_no_schema_is_clean() {
        let outcome = validator().validate("free text", None).unwrap();
        assert_eq!(outcome.risk, 0.0);
    }

    #[test]
    fn test_empty_output() {
        let outcome = validator().validate("   ", None).unwrap();
        assert_eq!(outcome.risk, 0.5);
        assert_eq!(outcome.entities[0].rule_id, "validation.empty");
    }

    #[test]
    fn test_valid_json_in_fence() {
        let text = "```json\n{\"answer\": \"42\", \"sources\": [\"a\"]}\n```";
        let outcome = validator().validate(text, Some(&schema())).unwrap();
        assert_eq!(outcome.risk, 0.0);
    }

    #[test]
    fn test_truncated_json_is_max_risk() {
        let outcome = validator()
            .validate("{\"answer\": \"42\", \"sour", Some(&schema()))
            .unwrap();
        assert_eq!(outcome.risk, 1.0);
    }

    #[test]
    fn test_schema_violations_scale() {
        let outcome = validator()
            .validate("{\"answer\": 42}", Some(&schema()))
            .unwrap();
        assert_eq!(outcome.errors.len(), 2);
        assert!((outcome.risk - 0.7).abs() < 1e-9);
    }

    #[test]
    fn test_invalid_schema_is_detector_error() {
        let bad = json!({"type": 12});
        assert!(matches!(
            validator().validate("{}", Some(&bad)),
            Err(DetectorError::InvalidSchema(_))
        ));
    }
}
