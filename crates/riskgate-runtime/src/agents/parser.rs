//! Strict parsing of shadow verdicts.
//!
//! The model must answer with one JSON object. A code fence around it is
//! tolerated; prose around it is not. Nothing is repaired or guessed.

use lazy_static::lazy_static;
use regex::Regex;
use riskgate_core::Threat;
use serde::Deserialize;

use super::AgentError;

lazy_static! {
    static ref FENCED: Regex = Regex::new(r"(?s)^```(?:json)?\s*(.*?)\s*```$").unwrap();
}

/// A parsed and range-checked verdict.
#[derive(Debug, Clone, PartialEq, Deserialize)]
pub struct Verdict {
    pub risk_score: f64,
    pub confidence: f64,
    #[serde(default)]
    pub threats: Vec<Threat>,
    #[serde(default)]
    pub reasoning: String,
}

pub fn parse_verdict(content: &str) -> Result<Verdict, AgentError> {
    let trimmed = content.trim();
    let body = FENCED
        .captures(trimmed)
        .and_then(|c| c.get(1))
        .map(|m| m.as_str())
        .unwrap_or(trimmed);

    if !body.starts_with('{') {
        return Err(AgentError::InvalidResponse(
            "verdict is not a JSON object".to_string(),
        ));
    }

    let verdict: Verdict = serde_json::from_str(body)
        .map_err(|e| AgentError::InvalidResponse(format!("malformed verdict: {}", e)))?;

    check_unit("risk_score", verdict.risk_score)?;
    check_unit("confidence", verdict.confidence)?;
    for threat in &verdict.threats {
        check_unit("threats.severity", threat.severity)?;
    }
    Ok(verdict)
}

fn check_unit(field: &str, value: f64) -> Result<(), AgentError> {
    if value.is_finite() && (0.0..=1.0).contains(&value) {
        Ok(())
    } else {
        Err(AgentError::InvalidResponse(format!(
            "{} out of range: {}",
            field, value
        )))
    }
}
