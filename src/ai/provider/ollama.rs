//! Ollama Local Backend
//!
//! Locally-running Ollama server with `format: "json"`. No quotas, so the
//! provider runs it unthrottled; failures are connectivity problems.

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use tracing::{debug, warn};

use super::{LlmBackend, error_from_response, http_client};
use crate::ai::request::{AiRequest, RawResponse};
use crate::config::{BackendKind, BackendSettings};
use crate::types::{DocsiftError, ErrorCategory, LlmError, Result};

const DEFAULT_API_BASE: &str = "http://localhost:11434";
const PROVIDER: &str = "ollama";
const TRUNCATION_REASON: &str = "length";

/// Ollama local backend
#[derive(Debug)]
pub struct OllamaBackend {
    /// `None` when the endpoint was explicitly blanked out
    api_base: Option<String>,
    model: String,
    temperature: f32,
    num_predict: u32,
    client: reqwest::Client,
}

impl OllamaBackend {
    pub fn new(settings: &BackendSettings, timeout_secs: u64) -> Result<Self> {
        let api_base = match settings.base_url.as_deref().map(str::trim) {
            Some("") => {
                warn!(target: "docsift::ollama", "Ollama endpoint is empty, backend disabled");
                None
            }
            Some(endpoint) => Some(Self::validate_endpoint(endpoint)?),
            None => Some(DEFAULT_API_BASE.to_string()),
        };

        Ok(Self {
            api_base,
            model: settings.model.clone(),
            temperature: settings.temperature,
            num_predict: settings.max_output_tokens,
            client: http_client(timeout_secs)?,
        })
    }

    /// Validate endpoint URL (SSRF prevention)
    ///
    /// Only allows http/https schemes and warns for non-localhost endpoints.
    /// A bare `host:port` (the `OLLAMA_HOST` form) is read as plain http.
    fn validate_endpoint(endpoint: &str) -> Result<String> {
        let endpoint = if endpoint.contains("://") {
            endpoint.to_string()
        } else {
            format!("http://{}", endpoint)
        };
        let url = url::Url::parse(&endpoint).map_err(|e| {
            DocsiftError::Config(format!("Invalid Ollama endpoint URL '{}': {}", endpoint, e))
        })?;

        if !matches!(url.scheme(), "http" | "https") {
            return Err(DocsiftError::Config(format!(
                "Ollama endpoint must use http or https scheme, got: {}",
                url.scheme()
            )));
        }

        if let Some(host) = url.host_str()
            && !matches!(host, "localhost" | "127.0.0.1" | "0.0.0.0" | "[::1]" | "::1")
        {
            warn!(
                target: "docsift::ollama",
                "Ollama endpoint is not localhost: {}. Ensure this is intentional.",
                host
            );
        }

        let mut result = url.to_string();
        if result.ends_with('/') {
            result.pop();
        }
        Ok(result)
    }

    fn base(&self) -> std::result::Result<&str, LlmError> {
        self.api_base.as_deref().ok_or_else(|| {
            LlmError::with_provider(
                ErrorCategory::BadRequest,
                "endpoint not configured",
                PROVIDER,
            )
        })
    }

    fn build_request(&self, request: &AiRequest) -> GenerateRequest {
        GenerateRequest {
            model: self.model.clone(),
            prompt: request.prompt().to_string(),
            stream: false,
            format: "json".to_string(),
            images: request.images().iter().map(|i| i.to_base64()).collect(),
            options: GenerateOptions {
                temperature: self.temperature,
                num_predict: self.num_predict,
            },
        }
    }

    fn connection_error(&self, err: reqwest::Error) -> LlmError {
        if err.is_connect() {
            warn!(
                target: "docsift::ollama",
                endpoint = self.api_base.as_deref().unwrap_or("-"),
                "Failed to connect to Ollama. Is it running? Start with: ollama serve"
            );
        }
        LlmError::from_transport(err, PROVIDER)
    }
}

#[async_trait]
impl LlmBackend for OllamaBackend {
    fn kind(&self) -> BackendKind {
        BackendKind::Ollama
    }

    fn model(&self) -> &str {
        &self.model
    }

    fn max_output_tokens(&self) -> u32 {
        self.num_predict
    }

    fn is_configured(&self) -> bool {
        self.api_base.is_some()
    }

    async fn send(&self, request: &AiRequest) -> std::result::Result<RawResponse, LlmError> {
        let url = format!("{}/api/generate", self.base()?);
        let body = self.build_request(request);

        debug!(
            target: "docsift::ollama",
            model = %self.model,
            images = request.images().len(),
            "Sending generate request"
        );

        let response = self
            .client
            .post(&url)
            .json(&body)
            .send()
            .await
            .map_err(|e| self.connection_error(e))?;

        if !response.status().is_success() {
            return Err(error_from_response(response, PROVIDER).await);
        }

        let body: GenerateResponse = response
            .json()
            .await
            .map_err(|e| LlmError::from_transport(e, PROVIDER))?;

        Ok(into_raw_response(body, self.num_predict))
    }

    async fn list_models(&self) -> std::result::Result<Vec<String>, LlmError> {
        let url = format!("{}/api/tags", self.base()?);

        let response = self
            .client
            .get(&url)
            .send()
            .await
            .map_err(|e| self.connection_error(e))?;

        if !response.status().is_success() {
            return Err(error_from_response(response, PROVIDER).await);
        }

        let tags: TagsResponse = response
            .json()
            .await
            .map_err(|e| LlmError::from_transport(e, PROVIDER))?;

        if !tags.models.iter().any(|m| m.name == self.model) {
            warn!(
                target: "docsift::ollama",
                "Configured model '{}' not found. Pull with: ollama pull {}",
                self.model,
                self.model
            );
        }
        Ok(tags.models.into_iter().map(|m| m.name).collect())
    }
}

fn into_raw_response(body: GenerateResponse, token_limit: u32) -> RawResponse {
    let truncated = body.done_reason.as_deref() == Some(TRUNCATION_REASON);
    RawResponse::new(body.response, token_limit).with_finish_reason(body.done_reason, truncated)
}

// Request/Response types

#[derive(Debug, Serialize)]
struct GenerateRequest {
    model: String,
    prompt: String,
    stream: bool,
    format: String,
    #[serde(skip_serializing_if = "Vec::is_empty")]
    images: Vec<String>,
    options: GenerateOptions,
}

#[derive(Debug, Serialize)]
struct GenerateOptions {
    temperature: f32,
    num_predict: u32,
}

#[derive(Debug, Deserialize)]
struct GenerateResponse {
    #[serde(default)]
    response: String,
    done_reason: Option<String>,
}

#[derive(Debug, Deserialize)]
struct TagsResponse {
    #[serde(default)]
    models: Vec<TagModel>,
}

#[derive(Debug, Deserialize)]
struct TagModel {
    name: String,
}
