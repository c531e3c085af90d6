//! Global Constants
//!
//! Centralized constants for retry bounds, backoff tuning and provider defaults.
//! All magic numbers should be defined here with documentation.

/// Adaptive rate controller constants
pub mod rate {
    /// Upper bound for the proactive extra delay (seconds)
    pub const MAX_EXTRA_DELAY_SECS: f64 = 256.0;

    /// Minimum extra delay after any rate-limit signal (seconds)
    pub const MIN_SIGNAL_DELAY_SECS: f64 = 2.0;

    /// Growth factor applied on every rate-limit signal
    pub const GROWTH_FACTOR: f64 = 2.0;

    /// Decay factor applied on every success
    pub const DECAY_FACTOR: f64 = 0.5;

    /// Extra delay below this value snaps to zero after decay
    pub const SNAP_TO_ZERO_SECS: f64 = 0.2;

    /// Base of the exponential reactive backoff (seconds)
    pub const BACKOFF_BASE_SECS: f64 = 2.0;

    /// Exponent cap so the backoff term cannot overflow
    pub const MAX_BACKOFF_EXPONENT: u32 = 16;
}

/// Network-level retry constants
pub mod retry {
    /// Maximum network attempts per request
    pub const MAX_NETWORK_ATTEMPTS: u32 = 5;

    /// Flat pause after a non rate-limit failure (milliseconds)
    pub const GENERIC_FAILURE_PAUSE_MS: u64 = 1000;

    /// Maximum logical (re-prompted) attempts per request
    pub const MAX_LOGICAL_ATTEMPTS: u32 = 3;

    /// Pause between logical attempts (milliseconds)
    pub const LOGICAL_RETRY_PAUSE_MS: u64 = 1000;
}

/// Repair parser constants
pub mod repair {
    /// Characters of raw text shown in diagnostics
    pub const PREVIEW_CHARS: usize = 200;
}

/// Provider defaults
pub mod provider {
    /// Output-token budget used when metadata lookup fails
    pub const FALLBACK_OUTPUT_TOKENS: u32 = 65_536;

    /// Output-token floor applied to reported model limits
    pub const OUTPUT_TOKEN_FLOOR: u32 = 65_536;

    /// Default OpenAI output-token budget
    pub const OPENAI_OUTPUT_TOKENS: u32 = 16_384;

    /// Default Anthropic output-token budget
    pub const ANTHROPIC_OUTPUT_TOKENS: u32 = 8_192;

    /// Default Ollama output-token budget
    pub const OLLAMA_OUTPUT_TOKENS: u32 = 8_192;

    /// Anthropic API version header value
    pub const ANTHROPIC_VERSION: &str = "2023-06-01";
}

/// HTTP/Network constants
pub mod network {
    /// Default request timeout (seconds)
    pub const DEFAULT_TIMEOUT_SECS: u64 = 300;

    /// Connection timeout (seconds)
    pub const CONNECTION_TIMEOUT_SECS: u64 = 30;

    /// Timeout for metadata lookups during construction (seconds)
    pub const METADATA_TIMEOUT_SECS: u64 = 15;

    /// Maximum bytes of an error body kept for diagnostics
    pub const MAX_ERROR_BODY_CHARS: usize = 2_000;
}
