//! Anthropic Backend
//!
//! Messages API has no forced-JSON mode, so the assistant turn is prefilled
//! with `{`. The model continues from inside the object; the returned text is
//! normalized back into a complete candidate before parsing.

use async_trait::async_trait;
use secrecy::{ExposeSecret, SecretString};
use serde::{Deserialize, Serialize};
use tracing::{debug, warn};

use super::{LlmBackend, error_from_response, http_client, normalize_base, secret_api_key};
use crate::ai::request::{AiRequest, RawResponse};
use crate::ai::validation::strip_code_fences;
use crate::config::{BackendKind, BackendSettings};
use crate::constants::provider as provider_constants;
use crate::types::{ErrorCategory, LlmError, Result};

const DEFAULT_API_BASE: &str = "https://api.anthropic.com/v1";
const PROVIDER: &str = "anthropic";
const TRUNCATION_REASON: &str = "max_tokens";
const PREFILL: &str = "{";

/// Anthropic backend with secure API key handling
pub struct AnthropicBackend {
    /// API key stored securely - never exposed in logs or debug output
    api_key: Option<SecretString>,
    api_base: String,
    model: String,
    temperature: f32,
    max_tokens: u32,
    client: reqwest::Client,
}

impl std::fmt::Debug for AnthropicBackend {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("AnthropicBackend")
            .field("api_key", &self.api_key.as_ref().map(|_| "[REDACTED]"))
            .field("api_base", &self.api_base)
            .field("model", &self.model)
            .field("temperature", &self.temperature)
            .field("max_tokens", &self.max_tokens)
            .finish()
    }
}

impl AnthropicBackend {
    pub fn new(settings: &BackendSettings, timeout_secs: u64) -> Result<Self> {
        let api_key = secret_api_key(settings);
        if api_key.is_none() {
            warn!(
                target: "docsift::anthropic",
                "Anthropic API key not found. Set ANTHROPIC_API_KEY or ai.anthropic.api_key"
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

    fn authorized(
        &self,
        builder: reqwest::RequestBuilder,
    ) -> std::result::Result<reqwest::RequestBuilder, LlmError> {
        Ok(builder
            .header("x-api-key", self.key()?.expose_secret())
            .header("anthropic-version", provider_constants::ANTHROPIC_VERSION))
    }

    fn build_request(&self, request: &AiRequest) -> MessagesRequest {
        let mut blocks: Vec<ContentBlock> = request
            .images()
            .iter()
            .map(|image| ContentBlock::Image {
                source: ImageSource {
                    source_type: "base64".to_string(),
                    media_type: image.mime_type.clone(),
                    data: image.to_base64(),
                },
            })
            .collect();
        blocks.push(ContentBlock::Text {
            text: request.prompt().to_string(),
        });

        MessagesRequest {
            model: self.model.clone(),
            max_tokens: self.max_tokens,
            temperature: self.temperature,
            messages: vec![
                Message {
                    role: "user".to_string(),
                    content: MessageContent::Blocks(blocks),
                },
                Message {
                    role: "assistant".to_string(),
                    content: MessageContent::Text(PREFILL.to_string()),
                },
            ],
        }
    }
}

#[async_trait]
impl LlmBackend for AnthropicBackend {
    fn kind(&self) -> BackendKind {
        BackendKind::Anthropic
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
        let body = self.build_request(request);
        let url = format!("{}/messages", self.api_base);

        debug!(
            target: "docsift::anthropic",
            model = %self.model,
            images = request.images().len(),
            "Sending prefilled messages request"
        );

        let response = self
            .authorized(self.client.post(&url))?
            .json(&body)
            .send()
            .await
            .map_err(|e| LlmError::from_transport(e, PROVIDER))?;

        if !response.status().is_success() {
            return Err(error_from_response(response, PROVIDER).await);
        }

        let body: MessagesResponse = response
            .json()
            .await
            .map_err(|e| LlmError::from_transport(e, PROVIDER))?;

        Ok(into_raw_response(body, self.max_tokens))
    }

    async fn list_models(&self) -> std::result::Result<Vec<String>, LlmError> {
        let url = format!("{}/models", self.api_base);

        let response = self
            .authorized(self.client.get(&url))?
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

/// Restore the prefilled brace the API leaves out of the completion
fn restore_prefill(completion: &str) -> String {
    let stripped = strip_code_fences(completion);
    if stripped.is_empty() || stripped.starts_with(PREFILL) {
        stripped.to_string()
    } else {
        format!("{}{}", PREFILL, stripped)
    }
}

fn into_raw_response(body: MessagesResponse, token_limit: u32) -> RawResponse {
    let completion: String = body
        .content
        .into_iter()
        .filter_map(|block| match block {
            ResponseBlock::Text { text } => Some(text),
            ResponseBlock::Other => None,
        })
        .collect();

    let truncated = body.stop_reason.as_deref() == Some(TRUNCATION_REASON);
    RawResponse::new(restore_prefill(&completion), token_limit)
        .with_finish_reason(body.stop_reason, truncated)
}

// Request/Response types

#[derive(Debug, Serialize)]
struct MessagesRequest {
    model: String,
    max_tokens: u32,
    temperature: f32,
    messages: Vec<Message>,
}

#[derive(Debug, Serialize)]
struct Message {
    role: String,
    content: MessageContent,
}

#[derive(Debug, Serialize)]
#[serde(untagged)]
enum MessageContent {
    Text(String),
    Blocks(Vec<ContentBlock>),
}

#[derive(Debug, Serialize)]
#[serde(tag = "type", rename_all = "snake_case")]
enum ContentBlock {
    Text { text: String },
    Image { source: ImageSource },
}

#[derive(Debug, Serialize)]
struct ImageSource {
    #[serde(rename = "type")]
    source_type: String,
    media_type: String,
    data: String,
}

#[derive(Debug, Deserialize)]
struct MessagesResponse {
    #[serde(default)]
    content: Vec<ResponseBlock>,
    stop_reason: Option<String>,
}

#[derive(Debug, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
enum ResponseBlock {
    Text {
        text: String,
    },
    #[serde(other)]
    Other,
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

#[cfg(test)]
mod tests {
    use super::*;
    use crate::ai::request::ImagePayload;
    use serde_json::json;

    fn backend() -> AnthropicBackend {
        let settings = BackendSettings {
            api_key: Some("sk-ant-test".to_string()),
            ..BackendSettings::defaults_for(BackendKind::Anthropic)
        };
        AnthropicBackend::new(&settings, 30).unwrap()
    }

    #[test]
    fn test_request_prefills_assistant_turn() {
        let request = AiRequest::new("tag this", "test")
            .with_images(vec![ImagePayload::new("image/png", vec![1, 2, 3])]);
        let body = serde_json::to_value(backend().build_request(&request)).unwrap();

        let messages = body["messages"].as_array().unwrap();
        assert_eq!(messages.len(), 2);
        assert_eq!(messages[1], json!({"role": "assistant", "content": "{"}));

        let blocks = &messages[0]["content"];
        assert_eq!(
            blocks[0],
            json!({"type": "image", "source": {"type": "base64", "media_type": "image/png", "data": "AQID"}})
        );
        assert_eq!(blocks[1], json!({"type": "text", "text": "tag this"}));
        assert_eq!(body["max_tokens"], 8192);
    }

    #[test]
    fn test_restore_prefill() {
        assert_eq!(restore_prefill(r#""a": 1}"#), r#"{"a": 1}"#);
        assert_eq!(restore_prefill(r#"{"a": 1}"#), r#"{"a": 1}"#);
        assert_eq!(restore_prefill("```json\n{\"a\": 1}\n```"), r#"{"a": 1}"#);
        assert_eq!(restore_prefill("```\n\"a\": 1}\n```"), r#"{"a": 1}"#);
        assert_eq!(restore_prefill("   "), "");
    }

    #[test]
    fn test_response_normalized_and_truncation_flagged() {
        let body: MessagesResponse = serde_json::from_value(json!({
            "content": [{"type": "text", "text": "\"a\": {\"b\": 1"}],
            "stop_reason": "max_tokens"
        }))
        .unwrap();

        let raw = into_raw_response(body, 8192);
        assert_eq!(raw.text, "{\"a\": {\"b\": 1");
        assert!(raw.truncated);
    }

    #[test]
    fn test_non_text_blocks_ignored() {
        let body: MessagesResponse = serde_json::from_value(json!({
            "content": [
                {"type": "thinking", "thinking": "..."},
                {"type": "text", "text": "\"ok\": true}"}
            ],
            "stop_reason": "end_turn"
        }))
        .unwrap();

        let raw = into_raw_response(body, 8192);
        assert_eq!(raw.text, r#"{"ok": true}"#);
        assert!(!raw.truncated);
    }

    #[test]
    fn test_missing_key_is_unconfigured() {
        let backend =
            AnthropicBackend::new(&BackendSettings::defaults_for(BackendKind::Anthropic), 30)
                .unwrap();
        assert!(!backend.is_configured());
        assert!(backend.authorized(backend.client.get("http://localhost")).is_err());
    }
}
