//! Detectors: pure functions from text to findings.
//!
//! Each detector owns its compiled patterns and holds no mutable state
//! besides the memo caches it explicitly owns. Detectors may fail; the
//! layer scorers run them through [`run_guarded`] so that a failing or
//! panicking detector contributes nothing instead of aborting the stage.

pub mod checksum;
pub mod injection;
pub mod leak;
pub mod pii;
pub mod state;
pub mod validation;

use std::panic::{catch_unwind, AssertUnwindSafe};
use thiserror::Error;

use crate::types::Entity;

pub use checksum::{iban_valid, luhn_valid, LuhnCache};
pub use injection::{injection_risk, InjectionDetector};
pub use leak::{leak_risk, LeakDetector, PromptEchoDetector};
pub use pii::{pii_risk, redact, PiiDetector};
pub use state::{StateDetector, StateSignals};
pub use validation::{OutputValidator, ValidationOutcome};

/// Errors a detector can report.
#[derive(Error, Debug, Clone, PartialEq)]
pub enum DetectorError {
    #[error("Input of {len} bytes exceeds limit of {limit} bytes")]
    InputTooLarge { len: usize, limit: usize },

    #[error("Invalid schema: {0}")]
    InvalidSchema(String),

    #[error("Detector failed: {0}")]
    Internal(String),
}

/// A text detector.
pub trait Detector: Send + Sync {
    /// Stable name used in fault factors and logs.
    fn name(&self) -> &'static str;

    /// Inspect `text` and return findings ordered by span start.
    fn detect(&self, text: &str) -> Result<Vec<Entity>, DetectorError>;
}

/// A detector that failed while scoring a stage.
#[derive(Debug, Clone, PartialEq)]
pub struct DetectorFault {
    pub detector: &'static str,
    pub message: String,
}

impl DetectorFault {
    /// Name of the risk factor recording this fault.
    pub fn factor_name(&self) -> String {
        format!("detector_fault:{}", self.detector)
    }
}

/// Reject texts above the configured size limit.
pub fn check_size(text: &str, limit: usize) -> Result<(), DetectorError> {
    if text.len() > limit {
        return Err(DetectorError::InputTooLarge {
            len: text.len(),
            limit,
        });
    }
    Ok(())
}

/// Run a detector body, converting errors and panics into a fault.
///
/// On fault the default value (no findings) is returned alongside it.
pub fn run_guarded<T, F>(name: &'static str, f: F) -> (T, Option<DetectorFault>)
where
    T: Default,
    F: FnOnce() -> Result<T, DetectorError>,
{
    match catch_unwind(AssertUnwindSafe(f)) {
        Ok(Ok(value)) => (value, None),
        Ok(Err(e)) => {
            tracing::warn!(detector = name, error = %e, "Detector failed, contributing zero");
            (
                T::default(),
                Some(DetectorFault {
                    detector: name,
                    message: e.to_string(),
                }),
            )
        }
        Err(panic) => {
            let message = panic
                .downcast_ref::<&str>()
                .map(|s| s.to_string())
                .or_else(|| panic.downcast_ref::<String>().cloned())
                .unwrap_or_else(|| "panic".to_string());
            tracing::error!(detector = name, panic = %message, "Detector panicked, contributing zero");
            (
                T::default(),
                Some(DetectorFault {
                    detector: name,
                    message,
                }),
            )
        }
    }
}

/// Run a [`Detector`] under [`run_guarded`].
pub fn detect_guarded(detector: &dyn Detector, text: &str) -> (Vec<Entity>, Option<DetectorFault>) {
    run_guarded(detector.name(), || detector.detect(text))
}

#[cfg(test)]
mod tests {
    use super::*;

    struct Exploding;

    impl Detector for Exploding {
        fn name(&self) -> &'static str {
            "exploding"
        }

        fn detect(&self, _text: &str) -> Result<Vec<Entity>, DetectorError> {
            panic!("boom")
        }
    }

    #[test]
    fn test_panicking_detector_becomes_fault() {
        let (entities, fault) = detect_guarded(&Exploding, "anything");
        assert!(entities.is_empty());
        let fault = fault.unwrap();
        assert_eq!(fault.factor_name(), "detector_fault:exploding");
        assert_eq!(fault.message, "boom");
    }

    #[test]
    fn test_error_becomes_fault() {
        let (value, fault): (Vec<Entity>, _) =
            run_guarded("sized", || Err(DetectorError::InputTooLarge { len: 10, limit: 5 }));
        assert!(value.is_empty());
        assert!(fault.unwrap().message.contains("exceeds limit"));
    }

    #[test]
    fn test_check_size() {
        assert!(check_size("abc", 3).is_ok());
        assert!(check_size("abcd", 3).is_err());
    }
}
