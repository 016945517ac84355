//! Out-of-band trust bookkeeping.
//!
//! The pipeline only reads `RequestContext::trust_score`. Whatever sits
//! around the pipeline (the gateway, a moderation job) decides when a user
//! earned or lost trust and records it here between requests.

use parking_lot::RwLock;
use serde::{Deserialize, Serialize};
use std::collections::HashMap;

use crate::config::ConfigError;
use crate::types::{clamp_unit, RequestContext};

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct TrustConfig {
    /// Trust assigned to users seen for the first time
    pub initial_trust: f64,
    pub violation_step: f64,
    pub clean_step: f64,
    pub escalation_step: f64,
}

impl Default for TrustConfig {
    fn default() -> Self {
        Self {
            initial_trust: 0.5,
            violation_step: 0.1,
            clean_step: 0.01,
            escalation_step: 0.02,
        }
    }
}

impl TrustConfig {
    pub fn validate(&self) -> Result<(), ConfigError> {
        for (field, value) in [
            ("trust.initial_trust", self.initial_trust),
            ("trust.violation_step", self.violation_step),
            ("trust.clean_step", self.clean_step),
            ("trust.escalation_step", self.escalation_step),
        ] {
            if !(0.0..=1.0).contains(&value) {
                return Err(ConfigError::OutOfRange {
                    field: field.to_string(),
                    value,
                });
            }
        }
        Ok(())
    }
}

/// Trust state of one user.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TrustRecord {
    pub trust_score: f64,
    pub violations: u32,
    pub escalations: u32,
    pub clean_requests: u64,
}

#[derive(Debug, Default)]
pub struct TrustLedger {
    config: TrustConfig,
    records: RwLock<HashMap<String, TrustRecord>>,
}

impl TrustLedger {
    pub fn new(config: TrustConfig) -> Self {
        Self {
            config,
            records: RwLock::new(HashMap::new()),
        }
    }

    fn fresh(&self) -> TrustRecord {
        TrustRecord {
            trust_score: clamp_unit(self.config.initial_trust),
            violations: 0,
            escalations: 0,
            clean_requests: 0,
        }
    }

    pub fn record(&self, user_id: &str) -> TrustRecord {
        self.records
            .read()
            .get(user_id)
            .cloned()
            .unwrap_or_else(|| self.fresh())
    }

    pub fn trust_score(&self, user_id: &str) -> f64 {
        self.record(user_id).trust_score
    }

    fn update(&self, user_id: &str, f: impl FnOnce(&mut TrustRecord)) -> f64 {
        let mut records = self.records.write();
        let fresh = self.fresh();
        let record = records.entry(user_id.to_string()).or_insert(fresh);
        let before = record.trust_score;
        f(record);
        record.trust_score = clamp_unit(record.trust_score);
        tracing::debug!(
            user_id,
            before,
            after = record.trust_score,
            "Trust score updated"
        );
        record.trust_score
    }

    /// Lower trust after a blocked or flagged request.
    pub fn record_violation(&self, user_id: &str) -> f64 {
        let step = self.config.violation_step;
        self.update(user_id, |r| {
            r.violations += 1;
            r.trust_score -= step;
        })
    }

    /// Slowly restore trust after an allowed request.
    pub fn record_clean(&self, user_id: &str) -> f64 {
        let step = self.config.clean_step;
        self.update(user_id, |r| {
            r.clean_requests += 1;
            r.trust_score += step;
        })
    }

    /// Lower trust slightly after a request needed escalation.
    pub fn record_escalation(&self, user_id: &str) -> f64 {
        let step = self.config.escalation_step;
        self.update(user_id, |r| {
            r.escalations += 1;
            r.trust_score -= step;
        })
    }

    pub fn set_trust(&self, user_id: &str, trust_score: f64) -> f64 {
        self.update(user_id, |r| r.trust_score = trust_score)
    }

    /// Request context carrying the user's current trust and counters.
    pub fn context_for(&self, user_id: &str) -> RequestContext {
        let record = self.record(user_id);
        RequestContext {
            trust_score: record.trust_score,
            prior_violations: record.violations,
            prior_escalations: record.escalations,
            ..RequestContext::for_user(user_id)
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_unknown_user_has_initial_trust() {
        let ledger = TrustLedger::new(TrustConfig::default());
        assert_eq!(ledger.trust_score("nobody"), 0.5);
    }

    #[test]
    fn test_violation_and_recovery() {
        let ledger = TrustLedger::new(TrustConfig::default());
        assert!((ledger.record_violation("u1") - 0.4).abs() < 1e-9);
        assert!((ledger.record_violation("u1") - 0.3).abs() < 1e-9);
        assert!((ledger.record_clean("u1") - 0.31).abs() < 1e-9);
        assert!((ledger.record_escalation("u1") - 0.29).abs() < 1e-9);

        let context = ledger.context_for("u1");
        assert_eq!(context.user_id.as_deref(), Some("u1"));
        assert_eq!(context.prior_violations, 2);
        assert_eq!(context.prior_escalations, 1);
        assert!((context.trust_score - 0.29).abs() < 1e-9);
    }

    #[test]
    fn test_trust_clamped() {
        let ledger = TrustLedger::new(TrustConfig::default());
        for _ in 0..20 {
            ledger.record_violation("u2");
        }
        assert_eq!(ledger.trust_score("u2"), 0.0);
        assert_eq!(ledger.set_trust("u2", 3.0), 1.0);
    }

    #[test]
    fn test_invalid_step_rejected() {
        let config = TrustConfig {
            violation_step: 1.5,
            ..Default::default()
        };
        assert!(config.validate().is_err());
    }
}
