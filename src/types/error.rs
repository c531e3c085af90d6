//! Unified Error Type System
//!
//! Centralized error types for the crate.
//! Provides error classification for the retry layers.
//!
//! ## Error Categories
//!
//! - **RateLimit**: API rate limiting (absorbed into adaptive backoff)
//! - **Transient**: Temporary server issues (flat pause, retry)
//! - **Network**: Connectivity issues (flat pause, retry)
//! - **Auth**: Authentication failures
//! - **ParseError**: Model output could not be parsed (logical retry)
//!
//! Nothing in this module crosses the public entry point: the dispatcher
//! turns every failure into an absent result plus a log line.

use std::time::Duration;
use thiserror::Error;

// =============================================================================
// Error Categories
// =============================================================================

/// Error categories used for retry decisions and diagnostics
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ErrorCategory {
    /// Rate limited or quota exhausted
    RateLimit,
    /// Context/token limit exceeded
    TokenLimit,
    /// Authentication failed
    Auth,
    /// Network/connectivity issues
    Network,
    /// Provider or model unavailable
    Unavailable,
    /// Invalid request
    BadRequest,
    /// Parsing the backend response failed
    ParseError,
    /// Temporary server issues
    Transient,
    /// Unknown error
    Unknown,
}

impl std::fmt::Display for ErrorCategory {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::RateLimit => write!(f, "RATE_LIMIT"),
            Self::TokenLimit => write!(f, "TOKEN_LIMIT"),
            Self::Auth => write!(f, "AUTH"),
            Self::Network => write!(f, "NETWORK"),
            Self::Unavailable => write!(f, "UNAVAILABLE"),
            Self::BadRequest => write!(f, "BAD_REQUEST"),
            Self::ParseError => write!(f, "PARSE_ERROR"),
            Self::Transient => write!(f, "TRANSIENT"),
            Self::Unknown => write!(f, "UNKNOWN"),
        }
    }
}

impl ErrorCategory {
    /// Rate-limit signals feed the adaptive controller instead of the flat pause
    pub fn is_rate_limit(&self) -> bool {
        matches!(self, Self::RateLimit)
    }
}

// =============================================================================
// LLM Error
// =============================================================================

/// Transport-level LLM error with category and context
#[derive(Debug, Clone)]
pub struct LlmError {
    /// Error category for routing decisions
    pub category: ErrorCategory,
    /// Detailed error message
    pub message: String,
    /// Provider that produced the error
    pub provider: Option<String>,
    /// HTTP status, when the failure came from a response
    pub status: Option<u16>,
    /// Retry hint from the backend (Retry-After header)
    pub retry_after: Option<Duration>,
}

impl std::fmt::Display for LlmError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        if let Some(provider) = &self.provider {
            write!(f, "[{}:{}] {}", provider, self.category, self.message)
        } else {
            write!(f, "[{}] {}", self.category, self.message)
        }
    }
}

impl std::error::Error for LlmError {}

impl LlmError {
    pub fn new(category: ErrorCategory, message: impl Into<String>) -> Self {
        Self {
            category,
            message: message.into(),
            provider: None,
            status: None,
            retry_after: None,
        }
    }

    pub fn with_provider(
        category: ErrorCategory,
        message: impl Into<String>,
        provider: impl Into<String>,
    ) -> Self {
        Self {
            category,
            message: message.into(),
            provider: Some(provider.into()),
            status: None,
            retry_after: None,
        }
    }

    pub fn status(mut self, status: u16) -> Self {
        self.status = Some(status);
        self
    }

    pub fn retry_after(mut self, duration: Duration) -> Self {
        self.retry_after = Some(duration);
        self
    }

    pub fn is_rate_limit(&self) -> bool {
        self.category.is_rate_limit()
    }

    /// Classify a reqwest transport error (no response received).
    ///
    /// The request URL is dropped from the message; it may carry credentials.
    pub fn from_transport(err: reqwest::Error, provider: &str) -> Self {
        let err = err.without_url();
        if err.is_timeout() {
            Self::with_provider(
                ErrorCategory::Network,
                format!("request timed out: {}", err),
                provider,
            )
        } else if err.is_connect() {
            Self::with_provider(
                ErrorCategory::Network,
                format!("connection failed: {}", err),
                provider,
            )
        } else if err.is_decode() {
            Self::with_provider(
                ErrorCategory::ParseError,
                format!("failed to decode response: {}", err),
                provider,
            )
        } else {
            ErrorClassifier::classify(&err.to_string(), provider)
        }
    }
}

// =============================================================================
// Error Classifier
// =============================================================================

/// Error classifier shared by every backend
pub struct ErrorClassifier;

impl ErrorClassifier {
    /// Classify an error message from any provider
    pub fn classify(message: &str, provider: &str) -> LlmError {
        let lower = message.to_lowercase();

        // Rate limiting patterns (Gemini reports quota as RESOURCE_EXHAUSTED)
        if lower.contains("resource_exhausted")
            || lower.contains("resource exhausted")
            || lower.contains("rate limit")
            || lower.contains("rate_limit")
            || lower.contains("too many requests")
            || lower.contains("quota")
        {
            return LlmError::with_provider(ErrorCategory::RateLimit, message, provider);
        }

        if lower.contains("context length")
            || lower.contains("context too long")
            || (lower.contains("token")
                && (lower.contains("limit") || lower.contains("exceed") || lower.contains("maximum")))
        {
            return LlmError::with_provider(ErrorCategory::TokenLimit, message, provider);
        }

        if lower.contains("unauthorized")
            || lower.contains("api key")
            || lower.contains("invalid key")
            || lower.contains("permission denied")
        {
            return LlmError::with_provider(ErrorCategory::Auth, message, provider);
        }

        if lower.contains("connection")
            || lower.contains("dns")
            || lower.contains("timed out")
            || lower.contains("timeout")
            || lower.contains("unreachable")
        {
            return LlmError::with_provider(ErrorCategory::Network, message, provider);
        }

        if lower.contains("overloaded")
            || lower.contains("service unavailable")
            || lower.contains("internal error")
            || lower.contains("temporar")
        {
            return LlmError::with_provider(ErrorCategory::Transient, message, provider);
        }

        LlmError::with_provider(ErrorCategory::Unknown, message, provider)
    }

    /// Classify an HTTP status, falling back to the body for rate-limit keywords.
    ///
    /// Some backends report quota exhaustion with a non-429 status and a
    /// `RESOURCE_EXHAUSTED` marker in the body, so the body is always checked.
    pub fn classify_http_status(status: u16, body: &str, provider: &str) -> LlmError {
        let category = match status {
            429 => ErrorCategory::RateLimit,
            401 | 403 => ErrorCategory::Auth,
            400 | 422 => ErrorCategory::BadRequest,
            404 => ErrorCategory::Unavailable,
            413 => ErrorCategory::TokenLimit,
            500..=599 => ErrorCategory::Transient,
            _ => ErrorCategory::Unknown,
        };

        let category = if category != ErrorCategory::RateLimit
            && Self::classify(body, provider).is_rate_limit()
        {
            ErrorCategory::RateLimit
        } else {
            category
        };

        LlmError::with_provider(category, format!("HTTP {}: {}", status, body), provider)
            .status(status)
    }
}

// =============================================================================
// Application Error
// =============================================================================

#[derive(Debug, Error)]
pub enum DocsiftError {
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),

    /// Structured LLM error with category
    #[error("LLM error: {0}")]
    Llm(LlmError),

    #[error("Config error: {0}")]
    Config(String),
}

impl From<LlmError> for DocsiftError {
    fn from(err: LlmError) -> Self {
        DocsiftError::Llm(err)
    }
}

pub type Result<T> = std::result::Result<T, DocsiftError>;

// =============================================================================
// Tests
// =============================================================================

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_error_category_display() {
        assert_eq!(ErrorCategory::RateLimit.to_string(), "RATE_LIMIT");
        assert_eq!(ErrorCategory::Transient.to_string(), "TRANSIENT");
        assert_eq!(ErrorCategory::Auth.to_string(), "AUTH");
    }

    #[test]
    fn test_classify_http_429() {
        let err = ErrorClassifier::classify_http_status(429, "slow down", "openai");
        assert!(err.is_rate_limit());
        assert_eq!(err.status, Some(429));
    }

    #[test]
    fn test_classify_resource_exhausted_in_body() {
        let body = r#"{"error": {"code": 400, "status": "RESOURCE_EXHAUSTED"}}"#;
        let err = ErrorClassifier::classify_http_status(400, body, "gemini");
        assert!(err.is_rate_limit());
    }

    #[test]
    fn test_classify_server_error_is_transient() {
        let err = ErrorClassifier::classify_http_status(503, "unavailable", "anthropic");
        assert_eq!(err.category, ErrorCategory::Transient);
        assert!(!err.is_rate_limit());
    }

    #[test]
    fn test_classify_auth() {
        let err = ErrorClassifier::classify_http_status(401, "bad key", "openai");
        assert_eq!(err.category, ErrorCategory::Auth);
    }

    #[test]
    fn test_classify_message_patterns() {
        assert!(ErrorClassifier::classify("Quota exceeded for project", "g").is_rate_limit());
        assert_eq!(
            ErrorClassifier::classify("Connection timed out after 30s", "ollama").category,
            ErrorCategory::Network
        );
        assert_eq!(
            ErrorClassifier::classify("Something weird happened", "x").category,
            ErrorCategory::Unknown
        );
    }

    #[test]
    fn test_llm_error_display() {
        let err = LlmError::with_provider(ErrorCategory::RateLimit, "Too many requests", "openai");
        assert_eq!(err.to_string(), "[openai:RATE_LIMIT] Too many requests");

        let err_no_provider = LlmError::new(ErrorCategory::Network, "Connection failed");
        assert_eq!(err_no_provider.to_string(), "[NETWORK] Connection failed");
    }
}
