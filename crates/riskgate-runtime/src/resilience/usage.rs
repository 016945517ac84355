//! Token and cost accounting for shadow calls.

use parking_lot::Mutex;
use serde::{Deserialize, Serialize};

use crate::providers::TokenUsage;

/// Accumulated LLM usage, per escalation or over the pipeline's lifetime.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct LlmUsage {
    pub total_tokens: u32,
    pub prompt_tokens: u32,
    pub completion_tokens: u32,

    /// Provider calls actually made (cache hits and fallbacks excluded)
    pub llm_calls: u32,

    /// Estimated cost in USD
    pub estimated_cost: f64,

    /// Shadow results served from the result cache
    pub cache_hits: u32,

    /// Prompt tokens served from the provider's prompt cache
    pub cache_read_tokens: u32,
}

impl LlmUsage {
    /// Add token usage from a provider response.
    pub fn add(&mut self, usage: &TokenUsage, model: &str) {
        self.prompt_tokens += usage.prompt_tokens;
        self.completion_tokens += usage.completion_tokens;
        self.total_tokens += usage.total();
        self.cache_read_tokens += usage.cache_read_tokens;
        self.llm_calls += 1;
        self.estimated_cost += estimate_cost(usage, model);
    }

    pub fn record_cache_hit(&mut self) {
        self.cache_hits += 1;
    }

    pub fn merge(&mut self, other: &LlmUsage) {
        self.total_tokens += other.total_tokens;
        self.prompt_tokens += other.prompt_tokens;
        self.completion_tokens += other.completion_tokens;
        self.llm_calls += other.llm_calls;
        self.estimated_cost += other.estimated_cost;
        self.cache_hits += other.cache_hits;
        self.cache_read_tokens += other.cache_read_tokens;
    }

    pub fn is_empty(&self) -> bool {
        self.llm_calls == 0 && self.cache_hits == 0
    }
}

/// Estimate the USD cost of one call.
pub fn estimate_cost(usage: &TokenUsage, model: &str) -> f64 {
    // USD per million tokens: input, output, cached input
    let (input_rate, output_rate, cache_read_rate) = match model {
        m if m.contains("haiku") => (1.0, 5.0, 0.1),
        m if m.contains("opus") => (5.0, 25.0, 0.5),
        m if m.contains("sonnet") => (3.0, 15.0, 0.3),
        m if m.contains("gpt-4o-mini") => (0.15, 0.6, 0.075),
        m if m.contains("gpt-4o") => (2.5, 10.0, 1.25),
        // Self-hosted and unknown models are not billed per token
        _ => (0.0, 0.0, 0.0),
    };

    let uncached_prompt = usage.prompt_tokens.saturating_sub(usage.cache_read_tokens);
    let per_million = |tokens: u32, rate: f64| tokens as f64 / 1_000_000.0 * rate;

    per_million(uncached_prompt, input_rate)
        + per_million(usage.completion_tokens, output_rate)
        + per_million(usage.cache_read_tokens, cache_read_rate)
}

/// Running total shared by every request of a pipeline.
#[derive(Debug, Default)]
pub struct UsageMeter {
    total: Mutex<LlmUsage>,
}

impl UsageMeter {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn record(&self, usage: &LlmUsage) {
        if !usage.is_empty() {
            self.total.lock().merge(usage);
        }
    }

    pub fn total(&self) -> LlmUsage {
        self.total.lock().clone()
    }
}
