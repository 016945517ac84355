//! Anthropic Messages API provider.
//!
//! The system prompt is sent as a separate block and marked cacheable, so
//! repeated escalations of the same agent only pay for the payload.

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use std::time::Duration;

use super::{
    secrets::{ApiCredential, CredentialSource},
    split_system, ChatMessage, CompletionConfig, CompletionResponse, LlmProvider, ProviderError,
    Role, TokenUsage, DEFAULT_HTTP_TIMEOUT,
};

/// Environment variable name for the Anthropic API key.
pub const ANTHROPIC_API_KEY_ENV: &str = "ANTHROPIC_API_KEY";

const DEFAULT_BASE_URL: &str = "https://api.anthropic.com/v1";
const API_VERSION: &str = "2023-06-01";
const CREDENTIAL_NAME: &str = "Anthropic API key";

pub struct AnthropicProvider {
    credential: ApiCredential,
    base_url: String,
    timeout: Duration,
    client: reqwest::Client,
}

impl std::fmt::Debug for AnthropicProvider {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("AnthropicProvider")
            .field("credential", &self.credential)
            .field("base_url", &self.base_url)
            .finish()
    }
}

fn build_client(timeout: Duration) -> Result<reqwest::Client, ProviderError> {
    reqwest::Client::builder()
        .timeout(timeout)
        .build()
        .map_err(|e| ProviderError::HttpError(e.to_string()))
}

impl AnthropicProvider {
    pub fn new(api_key: impl Into<String>) -> Result<Self, ProviderError> {
        Self::with_credential(ApiCredential::new(
            api_key,
            CredentialSource::Programmatic,
            CREDENTIAL_NAME,
        ))
    }

    /// Reads `ANTHROPIC_API_KEY`.
    pub fn from_env() -> Result<Self, ProviderError> {
        Self::with_credential(ApiCredential::from_env(ANTHROPIC_API_KEY_ENV, CREDENTIAL_NAME)?)
    }

    /// Use a configured key, falling back to `ANTHROPIC_API_KEY`.
    pub fn from_config(api_key: Option<&str>) -> Result<Self, ProviderError> {
        Self::with_credential(ApiCredential::from_config_or_env(
            api_key,
            ANTHROPIC_API_KEY_ENV,
            CREDENTIAL_NAME,
        )?)
    }

    pub fn with_credential(credential: ApiCredential) -> Result<Self, ProviderError> {
        Ok(Self {
            credential,
            base_url: DEFAULT_BASE_URL.to_string(),
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

    fn request_body(&self, messages: &[ChatMessage], config: &CompletionConfig) -> MessagesRequest {
        let (system, conversation) = split_system(messages);
        let cache_control = config.prompt_caching.then(CacheControl::ephemeral);

        MessagesRequest {
            model: config.model.clone(),
            max_tokens: config.max_tokens,
            system: system.map(|text| {
                vec![TextBlock {
                    kind: "text",
                    text,
                    cache_control,
                }]
            }),
            messages: conversation
                .into_iter()
                .map(|message| RequestMessage {
                    role: match message.role {
                        Role::Assistant => "assistant",
                        _ => "user",
                    },
                    content: message.content.clone(),
                })
                .collect(),
            temperature: config.temperature,
        }
    }
}

#[derive(Debug, Serialize)]
struct MessagesRequest {
    model: String,
    max_tokens: u32,
    #[serde(skip_serializing_if = "Option::is_none")]
    system: Option<Vec<TextBlock>>,
    messages: Vec<RequestMessage>,
    temperature: f32,
}

#[derive(Debug, Serialize)]
struct TextBlock {
    #[serde(rename = "type")]
    kind: &'static str,
    text: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    cache_control: Option<CacheControl>,
}

#[derive(Debug, Clone, Copy, Serialize)]
struct CacheControl {
    #[serde(rename = "type")]
    kind: &'static str,
}

impl CacheControl {
    fn ephemeral() -> Self {
        Self { kind: "ephemeral" }
    }
}

#[derive(Debug, Serialize)]
struct RequestMessage {
    role: &'static str,
    content: String,
}

#[derive(Debug, Deserialize)]
struct MessagesResponse {
    content: Vec<ResponseBlock>,
    model: String,
    stop_reason: Option<String>,
    usage: Usage,
}

#[derive(Debug, Deserialize)]
struct ResponseBlock {
    #[serde(default)]
    text: Option<String>,
}

#[derive(Debug, Deserialize)]
struct Usage {
    input_tokens: u32,
    output_tokens: u32,
    #[serde(default)]
    cache_creation_input_tokens: u32,
    #[serde(default)]
    cache_read_input_tokens: u32,
}

#[derive(Debug, Deserialize)]
struct ErrorBody {
    error: ErrorDetail,
}

#[derive(Debug, Deserialize)]
struct ErrorDetail {
    message: String,
}

impl From<MessagesResponse> for CompletionResponse {
    fn from(body: MessagesResponse) -> Self {
        let content = body
            .content
            .into_iter()
            .filter_map(|block| block.text)
            .collect::<Vec<_>>()
            .join("");
        CompletionResponse {
            content,
            usage: TokenUsage {
                prompt_tokens: body.usage.input_tokens
                    + body.usage.cache_creation_input_tokens
                    + body.usage.cache_read_input_tokens,
                completion_tokens: body.usage.output_tokens,
                cache_read_tokens: body.usage.cache_read_input_tokens,
            },
            model: body.model,
            stop_reason: body.stop_reason,
        }
    }
}

#[async_trait]
impl LlmProvider for AnthropicProvider {
    async fn complete(
        &self,
        messages: &[ChatMessage],
        config: &CompletionConfig,
    ) -> Result<CompletionResponse, ProviderError> {
        let request = self.request_body(messages, config);

        let response = self
            .client
            .post(format!("{}/messages", self.base_url))
            .header("x-api-key", self.credential.expose())
            .header("anthropic-version", API_VERSION)
            .json(&request)
            .send()
            .await
            .map_err(|e| {
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
        if status == reqwest::StatusCode::UNAUTHORIZED || status == reqwest::StatusCode::FORBIDDEN {
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

        let body: MessagesResponse = response
            .json()
            .await
            .map_err(|e| ProviderError::ParseError(e.to_string()))?;
        Ok(body.into())
    }

    async fn health_check(&self) -> bool {
        !self.credential.is_empty()
    }

    fn name(&self) -> &str {
        "anthropic"
    }
}
