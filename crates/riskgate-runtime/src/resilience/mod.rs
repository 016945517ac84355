//! Resilience patterns for riskgate-runtime.
//!
//! This module provides:
//! - Circuit breaker per remote capability
//! - Explicit fallback outcomes for shadow calls
//! - Token and cost accounting

mod circuit_breaker;
mod fallback;
mod usage;

pub use circuit_breaker::{
    CallError, CallPermit, CircuitBreaker, CircuitBreakerConfig, CircuitSnapshot, CircuitState,
};
pub use fallback::ShadowOutcome;
pub use usage::{estimate_cost, LlmUsage, UsageMeter};
