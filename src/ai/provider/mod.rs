//! LLM Provider Abstraction
//!
//! Two layers:
//!
//! - [`LlmBackend`]: one wire format. Sends a request, returns raw text plus
//!   the truncation flag, or a classified [`LlmError`].
//! - [`Provider`]: backend-agnostic pipeline over a backend. Owns the rate
//!   policy, the repair parser and the logical retry loop, and exposes the
//!   [`StructuredProvider`] capability set.
//!
//! ## Modules
//!
//! - `gemini`, `openai`, `anthropic`: cloud backends, full adaptive rate stack
//! - `ollama`: local backend, unthrottled

mod anthropic;
mod gemini;
mod ollama;
mod openai;

pub use anthropic::AnthropicBackend;
pub use gemini::GeminiBackend;
pub use ollama::OllamaBackend;
pub use openai::OpenAiBackend;

pub use crate::types::{ErrorCategory, ErrorClassifier, LlmError};

use async_trait::async_trait;
use secrecy::SecretString;
use serde_json::Value;
use std::borrow::Cow;
use std::sync::Arc;
use std::time::Duration;
use tracing::{debug, info, trace, warn};

use super::rate::{AdaptiveRateController, RateRegistry};
use super::request::{AiRequest, RawResponse};
use super::retry::RetryOrchestrator;
use super::validation::{ParseOutcome, RepairTier, parse_model_output, preview};
use crate::config::{AiConfig, BackendKind, BackendSettings};
use crate::constants::{network as net_constants, retry as retry_constants};
use crate::types::{DocsiftError, Result};

// =============================================================================
// Structured Output
// =============================================================================

/// A structured value recovered from backend output
#[derive(Debug, Clone, PartialEq)]
pub struct StructuredOutput {
    pub value: Value,
    /// Repair tier that produced the value
    pub tier: RepairTier,
    /// Backend hit its output limit; the value parsed but may be missing content
    pub possibly_incomplete: bool,
    /// Logical attempts used (1-based)
    pub logical_attempts: u32,
}

/// Shared provider type for concurrent callers.
pub type SharedProvider = Arc<dyn StructuredProvider + Send + Sync>;

// =============================================================================
// Traits
// =============================================================================

/// One backend wire format
#[async_trait]
pub trait LlmBackend: Send + Sync {
    fn kind(&self) -> BackendKind;

    /// Model name currently in use
    fn model(&self) -> &str;

    /// Output-token ceiling reported on every response
    fn max_output_tokens(&self) -> u32;

    /// Credential (cloud) or endpoint (local) present
    fn is_configured(&self) -> bool;

    /// One network attempt, no retries
    async fn send(&self, request: &AiRequest) -> std::result::Result<RawResponse, LlmError>;

    async fn list_models(&self) -> std::result::Result<Vec<String>, LlmError>;
}

/// Capability set every provider exposes to callers
#[async_trait]
pub trait StructuredProvider: Send + Sync {
    /// Provider name for logging
    fn name(&self) -> &str;

    fn model(&self) -> &str;

    fn is_configured(&self) -> bool;

    /// Available models; empty when unconfigured or unreachable
    async fn list_models(&self) -> Vec<String>;

    /// Structured value for `request`, or `None` on any terminal failure
    async fn generate_structured(&self, request: &AiRequest) -> Option<StructuredOutput>;

    /// Current proactive delay in seconds
    fn current_adaptive_delay(&self) -> f64;
}

// =============================================================================
// Provider
// =============================================================================

/// How network attempts are paced
#[derive(Debug, Clone)]
pub enum RatePolicy {
    /// Bounded retries through the shared adaptive controller
    Adaptive(RetryOrchestrator),
    /// Single attempt, no rate-limit bookkeeping
    Unthrottled,
}

/// Backend plus rate policy plus logical retry loop
pub struct Provider {
    backend: Box<dyn LlmBackend>,
    policy: RatePolicy,
    max_logical_attempts: u32,
    logical_pause: Duration,
}

impl std::fmt::Debug for Provider {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Provider")
            .field("backend", &self.backend.kind())
            .field("model", &self.backend.model())
            .field("policy", &self.policy)
            .field("max_logical_attempts", &self.max_logical_attempts)
            .finish()
    }
}

impl Provider {
    pub fn new(backend: Box<dyn LlmBackend>, policy: RatePolicy) -> Self {
        Self {
            backend,
            policy,
            max_logical_attempts: retry_constants::MAX_LOGICAL_ATTEMPTS,
            logical_pause: Duration::from_millis(retry_constants::LOGICAL_RETRY_PAUSE_MS),
        }
    }

    pub fn adaptive(backend: Box<dyn LlmBackend>, controller: Arc<AdaptiveRateController>) -> Self {
        Self::new(backend, RatePolicy::Adaptive(RetryOrchestrator::new(controller)))
    }

    pub fn unthrottled(backend: Box<dyn LlmBackend>) -> Self {
        Self::new(backend, RatePolicy::Unthrottled)
    }

    /// Provider that never sends anything
    pub fn inert(kind: BackendKind, model: impl Into<String>) -> Self {
        Self::unthrottled(Box::new(InertBackend {
            kind,
            model: model.into(),
        }))
    }

    pub fn kind(&self) -> BackendKind {
        self.backend.kind()
    }

    /// Network-level call for one logical attempt
    async fn transport(&self, request: &AiRequest) -> Option<RawResponse> {
        match &self.policy {
            RatePolicy::Adaptive(retry) => {
                let backend = self.backend.as_ref();
                retry.execute(move |_| backend.send(request)).await
            }
            RatePolicy::Unthrottled => match self.backend.send(request).await {
                Ok(raw) => Some(raw),
                Err(err) => {
                    warn!(
                        target: "docsift::provider",
                        provider = self.backend.kind().as_str(),
                        category = %err.category,
                        "Backend call failed: {}",
                        err.message
                    );
                    None
                }
            },
        }
    }
}

#[async_trait]
impl StructuredProvider for Provider {
    fn name(&self) -> &str {
        self.backend.kind().as_str()
    }

    fn model(&self) -> &str {
        self.backend.model()
    }

    fn is_configured(&self) -> bool {
        self.backend.is_configured()
    }

    async fn list_models(&self) -> Vec<String> {
        if !self.backend.is_configured() {
            return Vec::new();
        }

        match self.backend.list_models().await {
            Ok(models) => models,
            Err(err) => {
                warn!(
                    target: "docsift::provider",
                    provider = self.name(),
                    "Failed to list models: {}",
                    err
                );
                Vec::new()
            }
        }
    }

    async fn generate_structured(&self, request: &AiRequest) -> Option<StructuredOutput> {
        if !self.backend.is_configured() {
            debug!(
                target: "docsift::provider",
                provider = self.name(),
                "Backend not configured, skipping request"
            );
            return None;
        }
        if !request.is_well_formed() {
            warn!(
                target: "docsift::provider",
                provider = self.name(),
                stage = request.stage(),
                "Rejecting request with empty prompt"
            );
            return None;
        }

        let mut current = Cow::Borrowed(request);

        for attempt in 1..=self.max_logical_attempts {
            info!(
                target: "docsift::provider",
                provider = self.name(),
                model = self.model(),
                stage = request.stage(),
                request_id = %request.id(),
                attempt,
                images = request.images().len(),
                "Generating structured output"
            );
            trace!(
                target: "docsift::prompt",
                request_id = %request.id(),
                attempt,
                "PROMPT:\n{}",
                current.prompt()
            );

            let raw = self.transport(&current).await?;

            trace!(
                target: "docsift::prompt",
                request_id = %request.id(),
                attempt,
                finish_reason = raw.finish_reason.as_deref().unwrap_or("-"),
                "RESPONSE:\n{}",
                raw.text
            );

            match parse_model_output(&raw.text) {
                ParseOutcome::Parsed(parsed) => {
                    if raw.truncated {
                        warn!(
                            target: "docsift::provider",
                            provider = self.name(),
                            stage = request.stage(),
                            token_limit = raw.token_limit,
                            tier = %parsed.tier,
                            "Output truncated at token limit, repaired result may be incomplete"
                        );
                    } else if parsed.tier.was_repaired() {
                        debug!(
                            target: "docsift::provider",
                            provider = self.name(),
                            tier = %parsed.tier,
                            "Recovered output with repair"
                        );
                    }

                    return Some(StructuredOutput {
                        value: parsed.value,
                        tier: parsed.tier,
                        possibly_incomplete: raw.truncated,
                        logical_attempts: attempt,
                    });
                }
                ParseOutcome::Failed(failure) => {
                    warn!(
                        target: "docsift::provider",
                        provider = self.name(),
                        stage = request.stage(),
                        attempt,
                        max_attempts = self.max_logical_attempts,
                        truncated = raw.truncated,
                        "Unusable response ({}): {}",
                        failure,
                        preview(&raw.text)
                    );

                    if attempt < self.max_logical_attempts {
                        current = Cow::Owned(request.with_failure_context(&failure, attempt));
                        tokio::time::sleep(self.logical_pause).await;
                    }
                }
            }
        }

        warn!(
            target: "docsift::provider",
            provider = self.name(),
            stage = request.stage(),
            attempts = self.max_logical_attempts,
            "No usable structured output"
        );
        None
    }

    fn current_adaptive_delay(&self) -> f64 {
        match &self.policy {
            RatePolicy::Adaptive(retry) => retry.controller().extra_delay_secs(),
            RatePolicy::Unthrottled => 0.0,
        }
    }
}

/// Backend used when construction could not produce a working one
#[derive(Debug)]
struct InertBackend {
    kind: BackendKind,
    model: String,
}

#[async_trait]
impl LlmBackend for InertBackend {
    fn kind(&self) -> BackendKind {
        self.kind
    }

    fn model(&self) -> &str {
        &self.model
    }

    fn max_output_tokens(&self) -> u32 {
        0
    }

    fn is_configured(&self) -> bool {
        false
    }

    async fn send(&self, _request: &AiRequest) -> std::result::Result<RawResponse, LlmError> {
        Err(LlmError::with_provider(
            ErrorCategory::BadRequest,
            "backend not configured",
            self.kind.as_str(),
        ))
    }

    async fn list_models(&self) -> std::result::Result<Vec<String>, LlmError> {
        Ok(Vec::new())
    }
}

// =============================================================================
// Construction
// =============================================================================

/// Build the provider for `kind`; cloud kinds share the registry's controller
pub async fn create_provider(
    kind: BackendKind,
    config: &AiConfig,
    registry: &RateRegistry,
) -> Result<Provider> {
    let settings = config.settings(kind);
    let timeout_secs = config.timeout_secs;

    let provider = match kind {
        BackendKind::Gemini => Provider::adaptive(
            Box::new(GeminiBackend::connect(settings, timeout_secs).await?),
            registry.controller(kind),
        ),
        BackendKind::OpenAi => Provider::adaptive(
            Box::new(OpenAiBackend::new(settings, timeout_secs)?),
            registry.controller(kind),
        ),
        BackendKind::Anthropic => Provider::adaptive(
            Box::new(AnthropicBackend::new(settings, timeout_secs)?),
            registry.controller(kind),
        ),
        BackendKind::Ollama => {
            Provider::unthrottled(Box::new(OllamaBackend::new(settings, timeout_secs)?))
        }
    };

    Ok(provider)
}

// =============================================================================
// Shared HTTP helpers
// =============================================================================

pub(crate) fn http_client(timeout_secs: u64) -> Result<reqwest::Client> {
    reqwest::Client::builder()
        .timeout(Duration::from_secs(timeout_secs))
        .connect_timeout(Duration::from_secs(net_constants::CONNECTION_TIMEOUT_SECS))
        .build()
        .map_err(|e| DocsiftError::Config(format!("Failed to create HTTP client: {}", e)))
}

/// Classify a non-2xx response, keeping the Retry-After hint
pub(crate) async fn error_from_response(response: reqwest::Response, provider: &str) -> LlmError {
    let status = response.status().as_u16();
    let retry_after = response
        .headers()
        .get(reqwest::header::RETRY_AFTER)
        .and_then(|v| v.to_str().ok())
        .and_then(|v| v.trim().parse::<u64>().ok())
        .map(Duration::from_secs);
    let body = response.text().await.unwrap_or_default();
    let body: String = body.chars().take(net_constants::MAX_ERROR_BODY_CHARS).collect();

    let err = ErrorClassifier::classify_http_status(status, &body, provider);
    match retry_after {
        Some(duration) => err.retry_after(duration),
        None => err,
    }
}

/// Non-empty API key from settings, wrapped for runtime protection
pub(crate) fn secret_api_key(settings: &BackendSettings) -> Option<SecretString> {
    settings
        .api_key
        .as_deref()
        .map(str::trim)
        .filter(|key| !key.is_empty())
        .map(|key| SecretString::from(key.to_string()))
}

/// Drop a trailing slash so paths can be appended with `/`
pub(crate) fn normalize_base(base: &str) -> String {
    base.trim_end_matches('/').to_string()
}

// =============================================================================
// Tests
// =============================================================================

#[cfg(test)]
pub(crate) mod tests {
    use super::*;
    use std::collections::VecDeque;
    use std::sync::Mutex;
    use std::sync::atomic::{AtomicU32, Ordering};

    /// Replays scripted responses and records every prompt it is sent
    #[derive(Default)]
    pub(crate) struct Script {
        responses: Mutex<VecDeque<std::result::Result<RawResponse, LlmError>>>,
        prompts: Mutex<Vec<String>>,
        sends: AtomicU32,
    }

    impl Script {
        pub(crate) fn new(
            responses: impl IntoIterator<Item = std::result::Result<RawResponse, LlmError>>,
        ) -> Arc<Self> {
            Arc::new(Self {
                responses: Mutex::new(responses.into_iter().collect()),
                ..Default::default()
            })
        }

        pub(crate) fn prompts(&self) -> Vec<String> {
            self.prompts.lock().unwrap().clone()
        }

        pub(crate) fn sends(&self) -> u32 {
            self.sends.load(Ordering::SeqCst)
        }
    }

    pub(crate) struct ScriptedBackend {
        kind: BackendKind,
        configured: bool,
        script: Arc<Script>,
    }

    impl ScriptedBackend {
        pub(crate) fn new(kind: BackendKind, script: Arc<Script>) -> Self {
            Self {
                kind,
                configured: true,
                script,
            }
        }

        pub(crate) fn unconfigured(kind: BackendKind, script: Arc<Script>) -> Self {
            Self {
                kind,
                configured: false,
                script,
            }
        }
    }

    #[async_trait]
    impl LlmBackend for ScriptedBackend {
        fn kind(&self) -> BackendKind {
            self.kind
        }

        fn model(&self) -> &str {
            "scripted"
        }

        fn max_output_tokens(&self) -> u32 {
            1024
        }

        fn is_configured(&self) -> bool {
            self.configured
        }

        async fn send(&self, request: &AiRequest) -> std::result::Result<RawResponse, LlmError> {
            self.script.sends.fetch_add(1, Ordering::SeqCst);
            self.script
                .prompts
                .lock()
                .unwrap()
                .push(request.prompt().to_string());
            self.script
                .responses
                .lock()
                .unwrap()
                .pop_front()
                .unwrap_or_else(|| Err(LlmError::new(ErrorCategory::Network, "script exhausted")))
        }

        async fn list_models(&self) -> std::result::Result<Vec<String>, LlmError> {
            Ok(vec!["scripted".to_string(), "scripted-large".to_string()])
        }
    }

    pub(crate) fn ok(text: &str) -> std::result::Result<RawResponse, LlmError> {
        Ok(RawResponse::new(text, 1024))
    }

    fn truncated(text: &str) -> std::result::Result<RawResponse, LlmError> {
        Ok(RawResponse::new(text, 1024).with_finish_reason(Some("MAX_TOKENS".to_string()), true))
    }

    fn rate_limited() -> std::result::Result<RawResponse, LlmError> {
        Err(ErrorClassifier::classify_http_status(
            429,
            "Too Many Requests",
            "scripted",
        ))
    }

    fn adaptive(script: &Arc<Script>) -> Provider {
        Provider::adaptive(
            Box::new(ScriptedBackend::new(BackendKind::Gemini, Arc::clone(script))),
            Arc::new(AdaptiveRateController::new("test")),
        )
    }

    #[tokio::test(start_paused = true)]
    async fn test_clean_response_single_attempt() {
        let script = Script::new([ok(r#"{"colors": ["red", "blue"]}"#)]);
        let provider = adaptive(&script);

        let output = provider
            .generate_structured(&AiRequest::new("list two colors", "test"))
            .await
            .unwrap();

        assert_eq!(output.value["colors"], serde_json::json!(["red", "blue"]));
        assert_eq!(output.tier, RepairTier::Direct);
        assert_eq!(output.logical_attempts, 1);
        assert!(!output.possibly_incomplete);
        assert_eq!(script.sends(), 1);
    }

    #[tokio::test(start_paused = true)]
    async fn test_trailing_comma_repaired_without_logical_retry() {
        let script = Script::new([ok(r#"{"a": 1,}"#)]);
        let provider = adaptive(&script);

        let output = provider
            .generate_structured(&AiRequest::new("give me a", "test"))
            .await
            .unwrap();

        assert_eq!(output.value, serde_json::json!({"a": 1}));
        assert_eq!(output.tier, RepairTier::Heuristic);
        assert_eq!(output.logical_attempts, 1);
        assert_eq!(script.sends(), 1);
    }

    #[tokio::test(start_paused = true)]
    async fn test_truncated_output_closed_and_flagged() {
        let script = Script::new([truncated(r#"{"a": {"b": 1"#)]);
        let provider = adaptive(&script);

        let output = provider
            .generate_structured(&AiRequest::new("nested", "test"))
            .await
            .unwrap();

        assert_eq!(output.value, serde_json::json!({"a": {"b": 1}}));
        assert_eq!(output.tier, RepairTier::Closed);
        assert!(output.possibly_incomplete);
    }

    #[tokio::test(start_paused = true)]
    async fn test_garbage_exhausts_logical_attempts() {
        let script = Script::new([
            ok("hello, no braces"),
            ok("hello, no braces"),
            ok("hello, no braces"),
        ]);
        let provider = adaptive(&script);

        let result = provider
            .generate_structured(&AiRequest::new("list two colors", "test"))
            .await;

        assert!(result.is_none());
        let prompts = script.prompts();
        assert_eq!(prompts.len(), 3);
        assert_eq!(prompts[0], "list two colors");
        assert_ne!(prompts[0], prompts[1]);
        assert_ne!(prompts[1], prompts[2]);
        for prompt in &prompts[1..] {
            assert!(prompt.starts_with("list two colors"));
            assert!(prompt.contains("no JSON object found"));
            // Context is rebuilt from the original, never stacked
            assert_eq!(prompt.matches("COULD NOT BE USED").count(), 1);
        }
    }

    #[tokio::test(start_paused = true)]
    async fn test_logical_retry_recovers_on_second_attempt() {
        let script = Script::new([ok(""), ok(r#"{"ok": true}"#)]);
        let provider = adaptive(&script);

        let output = provider
            .generate_structured(&AiRequest::new("status", "test"))
            .await
            .unwrap();

        assert_eq!(output.value, serde_json::json!({"ok": true}));
        assert_eq!(output.logical_attempts, 2);
        assert!(script.prompts()[1].contains("empty response"));
    }

    #[tokio::test(start_paused = true)]
    async fn test_rate_limits_then_success_decays_delay() {
        let script = Script::new([
            rate_limited(),
            rate_limited(),
            rate_limited(),
            ok(r#"{"done": 1}"#),
        ]);
        let provider = adaptive(&script);

        let output = provider
            .generate_structured(&AiRequest::new("work", "test"))
            .await
            .unwrap();

        assert_eq!(output.value, serde_json::json!({"done": 1}));
        assert_eq!(output.logical_attempts, 1);
        assert_eq!(script.sends(), 4);
        assert_eq!(provider.current_adaptive_delay(), 4.0);
    }

    #[tokio::test(start_paused = true)]
    async fn test_transport_exhaustion_skips_logical_retry() {
        let script = Script::new([]);
        let provider = adaptive(&script);

        let result = provider
            .generate_structured(&AiRequest::new("work", "test"))
            .await;

        assert!(result.is_none());
        assert_eq!(script.sends(), retry_constants::MAX_NETWORK_ATTEMPTS);
        // Only the original prompt was ever sent
        assert!(script.prompts().iter().all(|p| p == "work"));
    }

    #[tokio::test(start_paused = true)]
    async fn test_unthrottled_single_attempt_and_zero_delay() {
        let script = Script::new([rate_limited()]);
        let provider = Provider::unthrottled(Box::new(ScriptedBackend::new(
            BackendKind::Ollama,
            Arc::clone(&script),
        )));

        let result = provider
            .generate_structured(&AiRequest::new("local", "test"))
            .await;

        assert!(result.is_none());
        assert_eq!(script.sends(), 1);
        assert_eq!(provider.current_adaptive_delay(), 0.0);
    }

    #[tokio::test]
    async fn test_unconfigured_provider_is_inert() {
        let script = Script::new([ok(r#"{"a": 1}"#)]);
        let provider = Provider::adaptive(
            Box::new(ScriptedBackend::unconfigured(
                BackendKind::OpenAi,
                Arc::clone(&script),
            )),
            Arc::new(AdaptiveRateController::new("test")),
        );

        assert!(!provider.is_configured());
        assert!(
            provider
                .generate_structured(&AiRequest::new("x", "test"))
                .await
                .is_none()
        );
        assert!(provider.list_models().await.is_empty());
        assert_eq!(script.sends(), 0);
    }

    #[tokio::test]
    async fn test_inert_provider() {
        let provider = Provider::inert(BackendKind::Anthropic, "claude");
        assert_eq!(provider.name(), "anthropic");
        assert_eq!(provider.model(), "claude");
        assert!(
            provider
                .generate_structured(&AiRequest::new("x", "test"))
                .await
                .is_none()
        );
    }

    #[tokio::test]
    async fn test_empty_prompt_sends_nothing() {
        let script = Script::new([ok(r#"{"a": 1}"#)]);
        let provider = adaptive(&script);

        assert!(
            provider
                .generate_structured(&AiRequest::new("  ", "test"))
                .await
                .is_none()
        );
        assert_eq!(script.sends(), 0);
    }

    #[tokio::test]
    async fn test_list_models_delegates() {
        let provider = adaptive(&Script::new([]));
        assert_eq!(provider.list_models().await, vec!["scripted", "scripted-large"]);
    }

    #[tokio::test(start_paused = true)]
    async fn test_providers_of_same_kind_share_controller() {
        let registry = RateRegistry::new();
        let first_script = Script::new([rate_limited(), ok(r#"{"n": 1}"#)]);
        let second_script = Script::new([ok(r#"{"n": 2}"#)]);

        let first = Provider::adaptive(
            Box::new(ScriptedBackend::new(BackendKind::Gemini, Arc::clone(&first_script))),
            registry.controller(BackendKind::Gemini),
        );
        let second = Provider::adaptive(
            Box::new(ScriptedBackend::new(BackendKind::Gemini, Arc::clone(&second_script))),
            registry.controller(BackendKind::Gemini),
        );

        let first_request = AiRequest::new("one", "test");
        let second_request = AiRequest::new("two", "test");
        let (a, b) = futures::join!(
            first.generate_structured(&first_request),
            second.generate_structured(&second_request),
        );

        assert!(a.is_some());
        assert!(b.is_some());
        // One signal (2.0) then two successes: 1.0, 0.5
        assert_eq!(first.current_adaptive_delay(), 0.5);
        assert_eq!(second.current_adaptive_delay(), 0.5);
    }

    #[test]
    fn test_preview_truncates_long_text() {
        let long = "x".repeat(500);
        let short = preview(&long);
        assert!(short.ends_with("..."));
        assert_eq!(
            short.chars().count(),
            crate::constants::repair::PREVIEW_CHARS + 3
        );
        assert_eq!(preview("short"), "short");
    }

    #[test]
    fn test_secret_api_key_ignores_blank() {
        use secrecy::ExposeSecret;

        let mut settings = BackendSettings::defaults_for(BackendKind::OpenAi);
        assert!(secret_api_key(&settings).is_none());

        settings.api_key = Some("  ".to_string());
        assert!(secret_api_key(&settings).is_none());

        settings.api_key = Some(" sk-live ".to_string());
        let key = secret_api_key(&settings).unwrap();
        assert_eq!(key.expose_secret(), "sk-live");
    }

    #[test]
    fn test_normalize_base() {
        assert_eq!(normalize_base("http://localhost:11434/"), "http://localhost:11434");
        assert_eq!(normalize_base("https://api.example.com/v1"), "https://api.example.com/v1");
    }
}
