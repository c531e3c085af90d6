//! Configuration Types
//!
//! All configuration structures with sensible defaults.
//! Supports global (<config dir>/docsift/) and project (./docsift.toml) level configuration.

use serde::{Deserialize, Serialize};

use crate::constants::{network as net_constants, provider as provider_constants};

/// Root configuration structure
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct Config {
    /// Configuration version
    pub version: String,

    /// AI backend settings
    pub ai: AiConfig,

    /// Diagnostic output settings
    pub logging: LoggingConfig,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            version: "1.0".to_string(),
            ai: AiConfig::default(),
            logging: LoggingConfig::default(),
        }
    }
}

impl Config {
    /// Validate configuration values are within acceptable ranges.
    /// Returns `DocsiftError::Config` on validation failure.
    pub fn validate(&self) -> crate::types::Result<()> {
        if self.ai.timeout_secs == 0 {
            return Err(crate::types::DocsiftError::Config(
                "ai.timeout_secs must be greater than 0".to_string(),
            ));
        }

        for kind in BackendKind::ALL {
            let settings = self.ai.settings(kind);
            if !(0.0..=2.0).contains(&settings.temperature) {
                return Err(crate::types::DocsiftError::Config(format!(
                    "ai.{}.temperature must be between 0.0 and 2.0, got {}",
                    kind, settings.temperature
                )));
            }
        }

        Ok(())
    }
}

// =============================================================================
// Backend Selection
// =============================================================================

/// Enumerated backend identifiers
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, Default)]
#[serde(rename_all = "lowercase")]
pub enum BackendKind {
    /// Google Gemini (cloud, native structured output)
    #[default]
    Gemini,
    /// OpenAI Chat Completions (cloud, JSON response mode)
    OpenAi,
    /// Anthropic Messages (cloud, assistant prefill)
    Anthropic,
    /// Local Ollama server (unthrottled)
    Ollama,
}

impl BackendKind {
    pub const ALL: [BackendKind; 4] = [
        BackendKind::Gemini,
        BackendKind::OpenAi,
        BackendKind::Anthropic,
        BackendKind::Ollama,
    ];

    pub fn as_str(&self) -> &'static str {
        match self {
            BackendKind::Gemini => "gemini",
            BackendKind::OpenAi => "openai",
            BackendKind::Anthropic => "anthropic",
            BackendKind::Ollama => "ollama",
        }
    }

    /// Cloud backends are quota-limited and go through the adaptive rate controller
    pub fn is_cloud(&self) -> bool {
        !matches!(self, BackendKind::Ollama)
    }
}

impl std::fmt::Display for BackendKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

impl std::str::FromStr for BackendKind {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_lowercase().as_str() {
            "gemini" | "google" => Ok(BackendKind::Gemini),
            "openai" => Ok(BackendKind::OpenAi),
            "anthropic" | "claude" => Ok(BackendKind::Anthropic),
            "ollama" | "local" => Ok(BackendKind::Ollama),
            _ => Err(format!(
                "Unknown backend: {}. Valid values: gemini, openai, anthropic, ollama",
                s
            )),
        }
    }
}

// =============================================================================
// AI Configuration
// =============================================================================

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct AiConfig {
    /// Selected backend
    pub backend: BackendKind,

    /// Request timeout in seconds
    pub timeout_secs: u64,

    pub gemini: BackendSettings,
    pub openai: BackendSettings,
    pub anthropic: BackendSettings,
    pub ollama: BackendSettings,
}

impl Default for AiConfig {
    fn default() -> Self {
        Self {
            backend: BackendKind::default(),
            timeout_secs: net_constants::DEFAULT_TIMEOUT_SECS,
            gemini: BackendSettings::defaults_for(BackendKind::Gemini),
            openai: BackendSettings::defaults_for(BackendKind::OpenAi),
            anthropic: BackendSettings::defaults_for(BackendKind::Anthropic),
            ollama: BackendSettings::defaults_for(BackendKind::Ollama),
        }
    }
}

impl AiConfig {
    /// Settings section for a backend
    pub fn settings(&self, kind: BackendKind) -> &BackendSettings {
        match kind {
            BackendKind::Gemini => &self.gemini,
            BackendKind::OpenAi => &self.openai,
            BackendKind::Anthropic => &self.anthropic,
            BackendKind::Ollama => &self.ollama,
        }
    }

    pub fn settings_mut(&mut self, kind: BackendKind) -> &mut BackendSettings {
        match kind {
            BackendKind::Gemini => &mut self.gemini,
            BackendKind::OpenAi => &mut self.openai,
            BackendKind::Anthropic => &mut self.anthropic,
            BackendKind::Ollama => &mut self.ollama,
        }
    }
}

/// Per-backend credential, endpoint and model settings
///
/// Note: API keys are never serialized to output and are redacted in debug
/// output. Each backend converts the key to `SecretString` internally.
#[derive(Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct BackendSettings {
    /// API key (cloud backends)
    #[serde(skip_serializing)]
    pub api_key: Option<String>,

    /// API base URL (custom endpoints, or the Ollama server)
    pub base_url: Option<String>,

    /// Model name
    pub model: String,

    /// Output-token budget; cloud backends may refine it at construction
    pub max_output_tokens: u32,

    /// Temperature for generation
    pub temperature: f32,
}

impl std::fmt::Debug for BackendSettings {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("BackendSettings")
            .field("api_key", &self.api_key.as_ref().map(|_| "[REDACTED]"))
            .field("base_url", &self.base_url)
            .field("model", &self.model)
            .field("max_output_tokens", &self.max_output_tokens)
            .field("temperature", &self.temperature)
            .finish()
    }
}

impl Default for BackendSettings {
    fn default() -> Self {
        Self::defaults_for(BackendKind::Gemini)
    }
}

impl BackendSettings {
    pub fn defaults_for(kind: BackendKind) -> Self {
        let (model, max_output_tokens) = match kind {
            BackendKind::Gemini => (
                "gemini-2.5-flash",
                provider_constants::FALLBACK_OUTPUT_TOKENS,
            ),
            BackendKind::OpenAi => ("gpt-4o-mini", provider_constants::OPENAI_OUTPUT_TOKENS),
            BackendKind::Anthropic => (
                "claude-sonnet-4-20250514",
                provider_constants::ANTHROPIC_OUTPUT_TOKENS,
            ),
            BackendKind::Ollama => ("llama3:latest", provider_constants::OLLAMA_OUTPUT_TOKENS),
        };

        Self {
            api_key: None,
            base_url: None,
            model: model.to_string(),
            max_output_tokens,
            temperature: 0.0,
        }
    }
}

// =============================================================================
// Logging Configuration
// =============================================================================

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct LoggingConfig {
    /// Default filter directive when RUST_LOG is unset
    pub level: String,

    /// Capture raw prompts and responses on the `docsift::prompt` channel
    pub capture_prompts: bool,
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self {
            level: "info".to_string(),
            capture_prompts: false,
        }
    }
}

impl LoggingConfig {
    /// Filter directive for the subscriber, honoring prompt capture
    pub fn filter_directive(&self) -> String {
        if self.capture_prompts {
            format!("{},docsift::prompt=trace", self.level)
        } else {
            self.level.clone()
        }
    }
}

// =============================================================================
// Tests
// =============================================================================
