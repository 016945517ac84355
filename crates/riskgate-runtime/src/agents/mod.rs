//! Shadow agents for escalated requests.
//!
//! Each stage has an agent that can take a semantic second look when the
//! rule-based score is ambiguous.

mod llm;
mod parser;
mod traits;

pub use llm::LlmShadowAgent;
pub use parser::{parse_verdict, Verdict};
pub use traits::{AgentError, AnalysisRequest, ShadowAgent, ShadowAnalysis};
