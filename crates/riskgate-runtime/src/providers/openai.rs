//! OpenAI-compatible chat completions provider.
//!
//! Also serves self-hosted servers that expose the same endpoint (vLLM,
//! llama.cpp, Ollama); those usually need no key.

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use std::time::Duration;

use super::{
    secrets::{ApiCredential, CredentialSource},
    ChatMessage, CompletionConfig, CompletionResponse, LlmProvider, ProviderError, TokenUsage,
    DEFAULT_HTTP_TIMEOUT,
};

/// Environment variable name for the OpenAI API key.
pub const OPENAI_API_KEY_ENV: &str = "OPENAI_API_KEY";

const DEFAULT_BASE_URL: &str = "https://api.openai.com/v1";
const CREDENTIAL_NAME: &str = "OpenAI API key";

pub struct OpenAiProvider {
    credential: Option<ApiCredential>,
    base_url: String,
    timeout: Duration,
    client: reqwest::Client,
}

impl std::fmt::Debug for OpenAiProvider {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("OpenAiProvider")
            .field("credential", &self.credential)
            .field("base_url", &self.base_url)
            .finish()
    }
}

impl OpenAiProvider {
    pub fn new(api_key: impl Into<String>) -> Result<Self, ProviderError> {
        Self::build(
            Some(ApiCredential::new(
                api_key,
                CredentialSource::Programmatic,
                CREDENTIAL_NAME,
            )),
            DEFAULT_BASE_URL,
        )
    }

    /// Reads `OPENAI_API_KEY`.
    pub fn from_env() -> Result<Self, ProviderError> {
        Self::build(
            Some(ApiCredential::from_env(OPENAI_API_KEY_ENV, CREDENTIAL_NAME)?),
            DEFAULT_BASE_URL,
        )
    }

    /// A self-hosted server at `base_url`, e.g. `http://localhost:11434/v1`.
    pub fn local(base_url: impl Into<String>) -> Result<Self, ProviderError> {
        Self::build(None, &base_url.into())
    }

    fn build(credential: Option<ApiCredential>, base_url: &str) -> Result<Self, ProviderError> {
        Ok(Self {
            credential,
            base_url: base_url.trim_end_matches('/').to_string(),
            timeout: DEFAULT_HTTP_TIMEOUT,
            client: build_client(DEFAULT_HTTP_TIMEOUT)?,
        })
    }

    pub fn with_base_url(mut self, url: impl Into<String>) -> Self {
        self.base_url = url.into().trim_end_matches('/').to_string();
        self
    }

    pub fn with_timeout(mut self, timeout: Duration) -> Result<Self, ProviderError> {
        self.client = build_client(timeout)?;
        self.timeout = timeout;
        Ok(self)
    }

    fn request_body<'a>(
        &self,
        messages: &'a [ChatMessage],
        config: &CompletionConfig,
    ) -> ChatRequest<'a> {
        ChatRequest {
            model: config.model.clone(),
            messages,
            max_tokens: config.max_tokens,
            temperature: config.temperature,
        }
    }
}

fn build_client(timeout: Duration) -> Result<reqwest::Client, ProviderError> {
    reqwest::Client::builder()
        .timeout(timeout)
        .build()
        .map_err(|e| ProviderError::HttpError(e.to_string()))
}

#[derive(Debug, Serialize)]
struct ChatRequest<'a> {
    model: String,
    messages: &'a [ChatMessage],
    max_tokens: u32,
    temperature: f32,
}

#[derive(Debug, Deserialize)]
struct ChatResponse {
    choices: Vec<Choice>,
    #[serde(default)]
    model: String,
    #[serde(default)]
    usage: Option<Usage>,
}

#[derive(Debug, Deserialize)]
struct Choice {
    message: ResponseMessage,
    #[serde(default)]
    finish_reason: Option<String>,
}

#[derive(Debug, Deserialize)]
struct ResponseMessage {
    #[serde(default)]
    content: Option<String>,
}

#[derive(Debug, Deserialize)]
struct Usage {
    prompt_tokens: u32,
    completion_tokens: u32,
    #[serde(default)]
    prompt_tokens_details: Option<PromptDetails>,
}

#[derive(Debug, Deserialize)]
struct PromptDetails {
    #[serde(default)]
    cached_tokens: u32,
}

#[derive(Debug, Deserialize)]
struct ErrorBody {
    error: ErrorDetail,
}

#[derive(Debug, Deserialize)]
struct ErrorDetail {
    message: String,
}

fn into_completion(body: ChatResponse, requested_model: &str) -> Result<CompletionResponse, ProviderError> {
    let choice = body
        .choices
        .into_iter()
        .next()
        .ok_or_else(|| ProviderError::ParseError("response has no choices".to_string()))?;
    let usage = body
        .usage
        .map(|u| TokenUsage {
            prompt_tokens: u.prompt_tokens,
            completion_tokens: u.completion_tokens,
            cache_read_tokens: u.prompt_tokens_details.map(|d| d.cached_tokens).unwrap_or(0),
        })
        .unwrap_or_default();
    let model = if body.model.is_empty() {
        requested_model.to_string()
    } else {
        body.model
    };

    Ok(CompletionResponse {
        content: choice.message.content.unwrap_or_default(),
        usage,
        model,
        stop_reason: choice.finish_reason,
    })
}

#[async_trait]
impl LlmProvider for OpenAiProvider {
    async fn complete(
        &self,
        messages: &[ChatMessage],
        config: &CompletionConfig,
    ) -> Result<CompletionResponse, ProviderError> {
        let mut request = self
            .client
            .post(format!("{}/chat/completions", self.base_url))
            .json(&self.request_body(messages, config));
        if let Some(credential) = &self.credential {
            request = request.bearer_auth(credential.expose());
        }

        let response = request.send().await.map_err(|e| {
            if e.is_timeout() {
                ProviderError::Timeout(self.timeout)
            } else {
                ProviderError::HttpError(e.to_string())
            }
        })?;

        let status = response.status();
        if status == reqwest::StatusCode::TOO_MANY_REQUESTS {
            let retry_after = response
                .headers()
                .get("retry-after")
                .and_then(|v| v.to_str().ok())
                .and_then(|v| v.parse::<u64>().ok())
                .map(Duration::from_secs);
            return Err(ProviderError::RateLimited { retry_after });
        }
        if status == reqwest::StatusCode::UNAUTHORIZED {
            return Err(ProviderError::AuthError);
        }
        if !status.is_success() {
            let text = response.text().await.unwrap_or_default();
            let message = serde_json::from_str::<ErrorBody>(&text)
                .map(|body| body.error.message)
                .unwrap_or(text);
            return Err(ProviderError::ApiError {
                status: status.as_u16(),
                message,
            });
        }

        let body: ChatResponse = response
            .json()
            .await
            .map_err(|e| ProviderError::ParseError(e.to_string()))?;
        into_completion(body, &config.model)
    }

    async fn health_check(&self) -> bool {
        self.credential.as_ref().map(|c| !c.is_empty()).unwrap_or(true)
    }

    fn name(&self) -> &str {
        if self.credential.is_some() {
            "openai"
        } else {
            "openai-compatible"
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_request_keeps_system_message_inline() {
        let provider = OpenAiProvider::new("key").unwrap();
        let messages = [ChatMessage::system("rules"), ChatMessage::user("payload")];
        let value = serde_json::to_value(
            provider.request_body(&messages, &CompletionConfig::new("gpt-4o-mini")),
        )
        .unwrap();
        assert_eq!(value["model"], "gpt-4o-mini");
        assert_eq!(value["messages"][0], json!({"role": "system", "content": "rules"}));
        assert_eq!(value["messages"][1]["role"], "user");
    }

    #[test]
    fn test_response_conversion() {
        let body: ChatResponse = serde_json::from_value(json!({
            "model": "gpt-4o-mini-2024-07-18",
            "choices": [{"message": {"role": "assistant", "content": "{}"}, "finish_reason": "stop"}],
            "usage": {"prompt_tokens": 120, "completion_tokens": 8,
                      "prompt_tokens_details": {"cached_tokens": 64}}
        }))
        .unwrap();
        let response = into_completion(body, "gpt-4o-mini").unwrap();
        assert_eq!(response.content, "{}");
        assert_eq!(response.usage.total(), 128);
        assert_eq!(response.usage.cache_read_tokens, 64);
        assert_eq!(response.stop_reason.as_deref(), Some("stop"));
    }

    #[test]
    fn test_local_server_response_without_usage() {
        let body: ChatResponse = serde_json::from_value(json!({
            "choices": [{"message": {"content": "ok"}}]
        }))
        .unwrap();
        let response = into_completion(body, "llama3.1").unwrap();
        assert_eq!(response.model, "llama3.1");
        assert_eq!(response.usage, TokenUsage::default());
    }

    #[test]
    fn test_empty_choices_is_parse_error() {
        let body: ChatResponse = serde_json::from_value(json!({"choices": []})).unwrap();
        assert!(matches!(
            into_completion(body, "m"),
            Err(ProviderError::ParseError(_))
        ));
    }

    #[tokio::test]
    async fn test_local_provider_needs_no_key() {
        let provider = OpenAiProvider::local("http://localhost:11434/v1/").unwrap();
        assert_eq!(provider.base_url, "http://localhost:11434/v1");
        assert_eq!(provider.name(), "openai-compatible");
        assert!(provider.health_check().await);
    }

    #[test]
    fn test_api_key_not_in_debug_output() {
        let secret_key = "sk-proj-super-secret-12345";
        let provider = OpenAiProvider::new(secret_key).unwrap();
        let debug_output = format!("{:?}", provider);
        assert!(!debug_output.contains(secret_key));
        assert!(debug_output.contains("[REDACTED]"));
    }
}
