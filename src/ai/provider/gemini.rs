//! Gemini Backend
//!
//! Google Generative Language API with native JSON output
//! (`responseMimeType: application/json`). The output-token ceiling is read
//! from model metadata at construction; a failed lookup falls back to a safe
//! default and never aborts construction.

use async_trait::async_trait;
use secrecy::{ExposeSecret, SecretString};
use serde::{Deserialize, Serialize};
use std::time::Duration;
use tracing::{debug, info, warn};

use super::{LlmBackend, error_from_response, http_client, normalize_base, secret_api_key};
use crate::ai::request::{AiRequest, RawResponse};
use crate::config::{BackendKind, BackendSettings};
use crate::constants::{network as net_constants, provider as provider_constants};
use crate::types::{ErrorCategory, LlmError, Result};

const DEFAULT_API_BASE: &str = "https://generativelanguage.googleapis.com/v1beta";
const PROVIDER: &str = "gemini";
const API_KEY_HEADER: &str = "x-goog-api-key";
const TRUNCATION_REASON: &str = "MAX_TOKENS";

/// Gemini backend with secure API key handling
pub struct GeminiBackend {
    /// API key stored securely - never exposed in logs or debug output
    api_key: Option<SecretString>,
    api_base: String,
    model: String,
    temperature: f32,
    max_output_tokens: u32,
    client: reqwest::Client,
}

impl std::fmt::Debug for GeminiBackend {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("GeminiBackend")
            .field("api_key", &self.api_key.as_ref().map(|_| "[REDACTED]"))
            .field("api_base", &self.api_base)
            .field("model", &self.model)
            .field("temperature", &self.temperature)
            .field("max_output_tokens", &self.max_output_tokens)
            .finish()
    }
}

impl GeminiBackend {
    /// Build without touching the network
    pub fn new(settings: &BackendSettings, timeout_secs: u64) -> Result<Self> {
        let api_base = settings
            .base_url
            .as_deref()
            .map(normalize_base)
            .unwrap_or_else(|| DEFAULT_API_BASE.to_string());

        Ok(Self {
            api_key: secret_api_key(settings),
            api_base,
            model: settings.model.clone(),
            temperature: settings.temperature,
            max_output_tokens: settings.max_output_tokens,
            client: http_client(timeout_secs)?,
        })
    }

    /// Build and refine the output-token ceiling from model metadata
    pub async fn connect(settings: &BackendSettings, timeout_secs: u64) -> Result<Self> {
        let mut backend = Self::new(settings, timeout_secs)?;
        if backend.is_configured() {
            backend.max_output_tokens = backend.resolve_output_limit().await;
        } else {
            warn!(
                target: "docsift::gemini",
                "Gemini API key not found. Set GEMINI_API_KEY or ai.gemini.api_key"
            );
        }
        Ok(backend)
    }

    async fn resolve_output_limit(&self) -> u32 {
        match self.fetch_model_info().await {
            Ok(info) => {
                let limit = effective_output_limit(info.output_token_limit);
                info!(
                    target: "docsift::gemini",
                    model = %self.model,
                    reported = ?info.output_token_limit,
                    effective = limit,
                    "Resolved output token limit"
                );
                limit
            }
            Err(err) => {
                warn!(
                    target: "docsift::gemini",
                    model = %self.model,
                    fallback = provider_constants::FALLBACK_OUTPUT_TOKENS,
                    "Model metadata lookup failed, using fallback limit: {}",
                    err
                );
                provider_constants::FALLBACK_OUTPUT_TOKENS
            }
        }
    }

    async fn fetch_model_info(&self) -> std::result::Result<ModelInfo, LlmError> {
        let key = self.key()?;
        let url = format!("{}/models/{}", self.api_base, self.model);

        let response = self
            .client
            .get(&url)
            .header(API_KEY_HEADER, key.expose_secret())
            .timeout(Duration::from_secs(net_constants::METADATA_TIMEOUT_SECS))
            .send()
            .await
            .map_err(|e| LlmError::from_transport(e, PROVIDER))?;

        if !response.status().is_success() {
            return Err(error_from_response(response, PROVIDER).await);
        }

        response
            .json()
            .await
            .map_err(|e| LlmError::from_transport(e, PROVIDER))
    }

    fn key(&self) -> std::result::Result<&SecretString, LlmError> {
        self.api_key.as_ref().ok_or_else(|| {
            LlmError::with_provider(ErrorCategory::Auth, "API key not configured", PROVIDER)
        })
    }

    fn build_request(&self, request: &AiRequest) -> GenerateContentRequest {
        let mut parts = vec![Part::Text {
            text: request.prompt().to_string(),
        }];
        parts.extend(request.images().iter().map(|image| Part::InlineData {
            inline_data: InlineData {
                mime_type: image.mime_type.clone(),
                data: image.to_base64(),
            },
        }));

        GenerateContentRequest {
            contents: vec![Content {
                role: "user".to_string(),
                parts,
            }],
            generation_config: GenerationConfig {
                response_mime_type: "application/json".to_string(),
                max_output_tokens: self.max_output_tokens,
                temperature: self.temperature,
            },
        }
    }
}

#[async_trait]
impl LlmBackend for GeminiBackend {
    fn kind(&self) -> BackendKind {
        BackendKind::Gemini
    }

    fn model(&self) -> &str {
        &self.model
    }

    fn max_output_tokens(&self) -> u32 {
        self.max_output_tokens
    }

    fn is_configured(&self) -> bool {
        self.api_key.is_some()
    }

    async fn send(&self, request: &AiRequest) -> std::result::Result<RawResponse, LlmError> {
        let key = self.key()?;
        let body = self.build_request(request);
        let url = format!("{}/models/{}:generateContent", self.api_base, self.model);

        debug!(
            target: "docsift::gemini",
            model = %self.model,
            images = request.images().len(),
            "Sending generateContent request"
        );

        let response = self
            .client
            .post(&url)
            .header(API_KEY_HEADER, key.expose_secret())
            .json(&body)
            .send()
            .await
            .map_err(|e| LlmError::from_transport(e, PROVIDER))?;

        if !response.status().is_success() {
            return Err(error_from_response(response, PROVIDER).await);
        }

        let body: GenerateContentResponse = response
            .json()
            .await
            .map_err(|e| LlmError::from_transport(e, PROVIDER))?;

        let raw = into_raw_response(body, self.max_output_tokens);
        debug!(
            target: "docsift::gemini",
            chars = raw.text.len(),
            finish_reason = raw.finish_reason.as_deref().unwrap_or("-"),
            "Received response"
        );
        Ok(raw)
    }

    async fn list_models(&self) -> std::result::Result<Vec<String>, LlmError> {
        let key = self.key()?;
        let url = format!("{}/models", self.api_base);

        let response = self
            .client
            .get(&url)
            .header(API_KEY_HEADER, key.expose_secret())
            .query(&[("pageSize", "1000")])
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
        Ok(generative_model_names(body))
    }
}

/// Metadata limit raised to the floor; low-tier models report less than they accept
fn effective_output_limit(reported: Option<u32>) -> u32 {
    reported
        .unwrap_or(provider_constants::FALLBACK_OUTPUT_TOKENS)
        .max(provider_constants::OUTPUT_TOKEN_FLOOR)
}

fn into_raw_response(body: GenerateContentResponse, token_limit: u32) -> RawResponse {
    let Some(candidate) = body.candidates.into_iter().next() else {
        if let Some(reason) = body.prompt_feedback.and_then(|f| f.block_reason) {
            warn!(target: "docsift::gemini", reason = %reason, "Prompt blocked");
        }
        return RawResponse::new("", token_limit);
    };

    let text: String = candidate
        .content
        .map(|c| c.parts.into_iter().filter_map(|p| p.text).collect())
        .unwrap_or_default();
    let truncated = candidate.finish_reason.as_deref() == Some(TRUNCATION_REASON);

    RawResponse::new(text, token_limit).with_finish_reason(candidate.finish_reason, truncated)
}

fn generative_model_names(list: ModelList) -> Vec<String> {
    list.models
        .into_iter()
        .filter(|m| {
            m.supported_generation_methods
                .iter()
                .any(|method| method == "generateContent")
        })
        .map(|m| m.name.trim_start_matches("models/").to_string())
        .collect()
}

// Request/Response types

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
struct GenerateContentRequest {
    contents: Vec<Content>,
    generation_config: GenerationConfig,
}

#[derive(Debug, Serialize)]
struct Content {
    role: String,
    parts: Vec<Part>,
}

#[derive(Debug, Serialize)]
#[serde(untagged)]
enum Part {
    Text { text: String },
    InlineData { inline_data: InlineData },
}

#[derive(Debug, Serialize)]
struct InlineData {
    mime_type: String,
    data: String,
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
struct GenerationConfig {
    response_mime_type: String,
    max_output_tokens: u32,
    temperature: f32,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct GenerateContentResponse {
    #[serde(default)]
    candidates: Vec<Candidate>,
    prompt_feedback: Option<PromptFeedback>,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct Candidate {
    content: Option<ResponseContent>,
    finish_reason: Option<String>,
}

#[derive(Debug, Deserialize)]
struct ResponseContent {
    #[serde(default)]
    parts: Vec<ResponsePart>,
}

#[derive(Debug, Deserialize)]
struct ResponsePart {
    text: Option<String>,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct PromptFeedback {
    block_reason: Option<String>,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct ModelInfo {
    output_token_limit: Option<u32>,
}

#[derive(Debug, Deserialize)]
struct ModelList {
    #[serde(default)]
    models: Vec<ModelEntry>,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct ModelEntry {
    name: String,
    #[serde(default)]
    supported_generation_methods: Vec<String>,
}
