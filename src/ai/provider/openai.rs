//! OpenAI Backend
//!
//! Chat Completions API with `response_format: json_object`. The API rejects
//! JSON mode unless the word "json" appears in the messages; building the
//! prompt is the caller's job, so a missing mention is only logged.

use async_trait::async_trait;
use secrecy::{ExposeSecret, SecretString};
use serde::{Deserialize, Serialize};
use tracing::{debug, warn};

use super::{LlmBackend, error_from_response, http_client, normalize_base, secret_api_key};
use crate::ai::request::{AiRequest, RawResponse};
use crate::config::{BackendKind, BackendSettings};
use crate::types::{ErrorCategory, LlmError, Result};

const DEFAULT_API_BASE: &str = "https://api.openai.com/v1";
const PROVIDER: &str = "openai";
const TRUNCATION_REASON: &str = "length";

/// OpenAI backend with secure API key handling
pub struct OpenAiBackend {
    /// API key stored securely - never exposed in logs or debug output
    api_key: Option<SecretString>,
    api_base: String,
    model: String,
    temperature: f32,
    max_tokens: u32,
    client: reqwest::Client,
}

impl std::fmt::Debug for OpenAiBackend {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("OpenAiBackend")
            .field("api_key", &self.api_key.as_ref().map(|_| "[REDACTED]"))
            .field("api_base", &self.api_base)
            .field("model", &self.model)
            .field("temperature", &self.temperature)
            .field("max_tokens", &self.max_tokens)
            .finish()
    }
}

impl OpenAiBackend {
    pub fn new(settings: &BackendSettings, timeout_secs: u64) -> Result<Self> {
        let api_key = secret_api_key(settings);
        if api_key.is_none() {
            warn!(
                target: "docsift::openai",
                "OpenAI API key not found. Set OPENAI_API_KEY or ai.openai.api_key"
            );
        }

        let api_base = settings
            .base_url
            .as_deref()
            .map(normalize_base)
            .unwrap_or_else(|| DEFAULT_API_BASE.to_string());

        Ok(Self {
            api_key,
            api_base,
            model: settings.model.clone(),
            temperature: settings.temperature,
            max_tokens: settings.max_output_tokens,
            client: http_client(timeout_secs)?,
        })
    }

    fn key(&self) -> std::result::Result<&SecretString, LlmError> {
        self.api_key.as_ref().ok_or_else(|| {
            LlmError::with_provider(ErrorCategory::Auth, "API key not configured", PROVIDER)
        })
    }

    fn build_request(&self, request: &AiRequest) -> ChatCompletionRequest {
        let content = if request.images().is_empty() {
            MessageContent::Text(request.prompt().to_string())
        } else {
            let mut parts = vec![ContentPart::Text {
                text: request.prompt().to_string(),
            }];
            parts.extend(request.images().iter().map(|image| ContentPart::ImageUrl {
                image_url: ImageUrl {
                    url: image.to_data_uri(),
                },
            }));
            MessageContent::Parts(parts)
        };

        ChatCompletionRequest {
            model: self.model.clone(),
            messages: vec![ChatMessage {
                role: "user".to_string(),
                content,
            }],
            temperature: self.temperature,
            max_tokens: self.max_tokens,
            response_format: ResponseFormat {
                format_type: "json_object".to_string(),
            },
        }
    }
}

#[async_trait]
impl LlmBackend for OpenAiBackend {
    fn kind(&self) -> BackendKind {
        BackendKind::OpenAi
    }

    fn model(&self) -> &str {
        &self.model
    }

    fn max_output_tokens(&self) -> u32 {
        self.max_tokens
    }

    fn is_configured(&self) -> bool {
        self.api_key.is_some()
    }

    async fn send(&self, request: &AiRequest) -> std::result::Result<RawResponse, LlmError> {
        let key = self.key()?;
        if !mentions_json(request.prompt()) {
            warn!(
                target: "docsift::openai",
                stage = request.stage(),
                "Prompt does not mention JSON; the API may reject json_object mode"
            );
        }

        let body = self.build_request(request);
        let url = format!("{}/chat/completions", self.api_base);

        debug!(
            target: "docsift::openai",
            model = %self.model,
            images = request.images().len(),
            "Sending chat completion request"
        );

        let response = self
            .client
            .post(&url)
            .bearer_auth(key.expose_secret())
            .json(&body)
            .send()
            .await
            .map_err(|e| LlmError::from_transport(e, PROVIDER))?;

        if !response.status().is_success() {
            return Err(error_from_response(response, PROVIDER).await);
        }

        let body: ChatCompletionResponse = response
            .json()
            .await
            .map_err(|e| LlmError::from_transport(e, PROVIDER))?;

        Ok(into_raw_response(body, self.max_tokens))
    }

    async fn list_models(&self) -> std::result::Result<Vec<String>, LlmError> {
        let key = self.key()?;
        let url = format!("{}/models", self.api_base);

        let response = self
            .client
            .get(&url)
            .bearer_auth(key.expose_secret())
            .send()
            .await
            .map_err(|e| LlmError::from_transport(e, PROVIDER))?;

        if !response.status().is_success() {
            return Err(error_from_response(response, PROVIDER).await);
        }

        let body: ModelList = response
            .json()
            .await
            .map_err(|e| LlmError::from_transport(e, PROVIDER))?;
        Ok(body.data.into_iter().map(|m| m.id).collect())
    }
}

fn mentions_json(prompt: &str) -> bool {
    prompt.to_lowercase().contains("json")
}

fn into_raw_response(body: ChatCompletionResponse, token_limit: u32) -> RawResponse {
    let Some(choice) = body.choices.into_iter().next() else {
        return RawResponse::new("", token_limit);
    };

    let truncated = choice.finish_reason.as_deref() == Some(TRUNCATION_REASON);
    RawResponse::new(choice.message.content.unwrap_or_default(), token_limit)
        .with_finish_reason(choice.finish_reason, truncated)
}

// Request/Response types

#[derive(Debug, Serialize)]
struct ChatCompletionRequest {
    model: String,
    messages: Vec<ChatMessage>,
    temperature: f32,
    max_tokens: u32,
    response_format: ResponseFormat,
}

#[derive(Debug, Serialize)]
struct ChatMessage {
    role: String,
    content: MessageContent,
}

#[derive(Debug, Serialize)]
#[serde(untagged)]
enum MessageContent {
    Text(String),
    Parts(Vec<ContentPart>),
}

#[derive(Debug, Serialize)]
#[serde(tag = "type", rename_all = "snake_case")]
enum ContentPart {
    Text { text: String },
    ImageUrl { image_url: ImageUrl },
}

#[derive(Debug, Serialize)]
struct ImageUrl {
    url: String,
}

#[derive(Debug, Serialize)]
struct ResponseFormat {
    #[serde(rename = "type")]
    format_type: String,
}

#[derive(Debug, Deserialize)]
struct ChatCompletionResponse {
    #[serde(default)]
    choices: Vec<Choice>,
}

#[derive(Debug, Deserialize)]
struct Choice {
    message: ResponseMessage,
    finish_reason: Option<String>,
}

#[derive(Debug, Deserialize)]
struct ResponseMessage {
    content: Option<String>,
}

#[derive(Debug, Deserialize)]
struct ModelList {
    #[serde(default)]
    data: Vec<ModelEntry>,
}

#[derive(Debug, Deserialize)]
struct ModelEntry {
    id: String,
}
