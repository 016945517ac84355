//! LLM provider abstractions for riskgate-runtime.
//!
//! Shadow agents talk to a model only through [`LlmProvider`]. Providers
//! are constructed by the caller and injected, so the pipeline never picks
//! a backend by name.
//!
//! ## Security
//!
//! All providers use the [`secrets`] module for credential handling.
//! See [`ApiCredential`].

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use std::time::Duration;
use thiserror::Error;

pub mod secrets;

#[cfg(feature = "anthropic")]
mod anthropic;
#[cfg(feature = "openai")]
mod openai;

pub use secrets::{ApiCredential, CredentialSource};

#[cfg(feature = "anthropic")]
pub use anthropic::{AnthropicProvider, ANTHROPIC_API_KEY_ENV};
#[cfg(feature = "openai")]
pub use openai::{OpenAiProvider, OPENAI_API_KEY_ENV};

/// Default HTTP timeout for provider clients.
///
/// Shadow calls are also bounded by the agent timeout, which is shorter.
pub const DEFAULT_HTTP_TIMEOUT: Duration = Duration::from_secs(30);

/// Errors from LLM providers.
#[derive(Error, Debug)]
pub enum ProviderError {
    #[error("HTTP request failed: {0}")]
    HttpError(String),

    #[error("Rate limit exceeded, retry after {retry_after:?}")]
    RateLimited { retry_after: Option<Duration> },

    #[error("API error: {status} - {message}")]
    ApiError { status: u16, message: String },

    #[error("JSON parse error: {0}")]
    ParseError(String),

    #[error("Authentication failed")]
    AuthError,

    #[error("Timeout after {0:?}")]
    Timeout(Duration),

    #[error("Provider not configured: {0}")]
    NotConfigured(String),
}

/// Settings for a completion request.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct CompletionConfig {
    pub model: String,

    /// Maximum tokens to generate
    pub max_tokens: u32,

    /// 0.0 for deterministic sampling
    pub temperature: f32,

    /// Mark the system prompt cacheable (Anthropic)
    pub prompt_caching: bool,
}

impl Default for CompletionConfig {
    fn default() -> Self {
        Self {
            model: "claude-haiku-4-5".to_string(),
            max_tokens: 600,
            temperature: 0.0,
            prompt_caching: true,
        }
    }
}

impl CompletionConfig {
    pub fn new(model: impl Into<String>) -> Self {
        Self {
            model: model.into(),
            ..Default::default()
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Role {
    System,
    User,
    Assistant,
}

/// A chat message for completion.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ChatMessage {
    pub role: Role,
    pub content: String,
}

impl ChatMessage {
    pub fn system(content: impl Into<String>) -> Self {
        Self {
            role: Role::System,
            content: content.into(),
        }
    }

    pub fn user(content: impl Into<String>) -> Self {
        Self {
            role: Role::User,
            content: content.into(),
        }
    }

    pub fn assistant(content: impl Into<String>) -> Self {
        Self {
            role: Role::Assistant,
            content: content.into(),
        }
    }
}

/// Response from a completion.
#[derive(Debug, Clone)]
pub struct CompletionResponse {
    pub content: String,
    pub usage: TokenUsage,
    /// Model that actually served the request
    pub model: String,
    pub stop_reason: Option<String>,
}

/// Token usage from a completion.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct TokenUsage {
    pub prompt_tokens: u32,
    pub completion_tokens: u32,
    /// Prompt tokens served from the provider's prompt cache
    pub cache_read_tokens: u32,
}

impl TokenUsage {
    pub fn total(&self) -> u32 {
        self.prompt_tokens + self.completion_tokens
    }
}

/// Provider abstraction allows swapping LLM backends.
///
/// Only shadow agents call this; rule scoring never does.
#[async_trait]
pub trait LlmProvider: Send + Sync {
    async fn complete(
        &self,
        messages: &[ChatMessage],
        config: &CompletionConfig,
    ) -> Result<CompletionResponse, ProviderError>;

    /// Check if the provider is usable.
    async fn health_check(&self) -> bool;

    /// Provider name for audit records and logs.
    fn name(&self) -> &str;
}

/// Split the system message from the conversation.
///
/// Several system messages are joined with a blank line.
#[cfg(any(feature = "anthropic", test))]
pub(crate) fn split_system(messages: &[ChatMessage]) -> (Option<String>, Vec<&ChatMessage>) {
    let mut system: Vec<&str> = Vec::new();
    let mut rest = Vec::new();
    for message in messages {
        match message.role {
            Role::System => system.push(&message.content),
            _ => rest.push(message),
        }
    }
    let system = (!system.is_empty()).then(|| system.join("\n\n"));
    (system, rest)
}

#[cfg(test)]
pub(crate) mod testing {
    //! Scripted provider for tests.

    use super::*;
    use parking_lot::Mutex;
    use std::collections::VecDeque;
    use std::sync::atomic::{AtomicUsize, Ordering};

    #[derive(Clone)]
    pub enum Reply {
        Text(String),
        Fail(fn() -> ProviderError),
    }

    /// Replays scripted replies in order; the last reply repeats.
    pub struct ScriptedProvider {
        replies: Mutex<VecDeque<Reply>>,
        last: Mutex<Option<Reply>>,
        delay: Option<Duration>,
        calls: AtomicUsize,
        pub seen: Mutex<Vec<Vec<ChatMessage>>>,
    }

    impl ScriptedProvider {
        pub fn replying(content: impl Into<String>) -> Self {
            Self::script(vec![Reply::Text(content.into())])
        }

        pub fn failing(error: fn() -> ProviderError) -> Self {
            Self::script(vec![Reply::Fail(error)])
        }

        pub fn script(replies: Vec<Reply>) -> Self {
            Self {
                replies: Mutex::new(replies.into()),
                last: Mutex::new(None),
                delay: None,
                calls: AtomicUsize::new(0),
                seen: Mutex::new(Vec::new()),
            }
        }

        pub fn with_delay(mut self, delay: Duration) -> Self {
            self.delay = Some(delay);
            self
        }

        pub fn calls(&self) -> usize {
            self.calls.load(Ordering::SeqCst)
        }

        fn next(&self) -> Reply {
            let mut replies = self.replies.lock();
            let mut last = self.last.lock();
            match replies.pop_front() {
                Some(reply) => {
                    *last = Some(reply.clone());
                    reply
                }
                None => last
                    .clone()
                    .unwrap_or(Reply::Fail(|| ProviderError::NotConfigured("empty script".into()))),
            }
        }
    }

    #[async_trait]
    impl LlmProvider for ScriptedProvider {
        async fn complete(
            &self,
            messages: &[ChatMessage],
            config: &CompletionConfig,
        ) -> Result<CompletionResponse, ProviderError> {
            self.calls.fetch_add(1, Ordering::SeqCst);
            self.seen.lock().push(messages.to_vec());
            if let Some(delay) = self.delay {
                tokio::time::sleep(delay).await;
            }
            let content = match self.next() {
                Reply::Text(content) => content,
                Reply::Fail(make) => return Err(make()),
            };
            Ok(CompletionResponse {
                content,
                usage: TokenUsage {
                    prompt_tokens: 400,
                    completion_tokens: 60,
                    cache_read_tokens: 0,
                },
                model: config.model.clone(),
                stop_reason: Some("end_turn".to_string()),
            })
        }

        async fn health_check(&self) -> bool {
            true
        }

        fn name(&self) -> &str {
            "scripted"
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_chat_message_roles() {
        assert_eq!(ChatMessage::system("s").role, Role::System);
        assert_eq!(ChatMessage::user("u").role, Role::User);
        assert_eq!(ChatMessage::assistant("a").role, Role::Assistant);
        assert_eq!(
            serde_json::to_value(ChatMessage::user("hi")).unwrap(),
            serde_json::json!({"role": "user", "content": "hi"})
        );
    }

    #[test]
    fn test_split_system_joins_system_messages() {
        let messages = vec![
            ChatMessage::system("base"),
            ChatMessage::system("agent"),
            ChatMessage::user("payload"),
        ];
        let (system, rest) = split_system(&messages);
        assert_eq!(system.as_deref(), Some("base\n\nagent"));
        assert_eq!(rest.len(), 1);
        assert_eq!(rest[0].content, "payload");
    }

    #[test]
    fn test_token_usage_total() {
        let usage = TokenUsage {
            prompt_tokens: 100,
            completion_tokens: 50,
            cache_read_tokens: 20,
        };
        assert_eq!(usage.total(), 150);
    }
}
