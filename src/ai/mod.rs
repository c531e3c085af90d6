//! AI Request Layer
//!
//! Provider-agnostic structured-output client: adaptive rate limiting,
//! bounded network and logical retries, and tiered JSON repair.

pub mod dispatcher;
pub mod provider;
pub mod rate;
pub mod request;
pub mod retry;
pub mod validation;

pub use dispatcher::Dispatcher;
pub use provider::{
    AnthropicBackend, ErrorCategory, ErrorClassifier, GeminiBackend, LlmBackend, LlmError,
    OllamaBackend, OpenAiBackend, Provider, RatePolicy, SharedProvider, StructuredOutput,
    StructuredProvider, create_provider,
};
pub use rate::{AdaptiveRateController, AdaptiveSnapshot, RateRegistry};
pub use request::{AiRequest, ImagePayload, RawResponse};
pub use retry::RetryOrchestrator;
pub use validation::{
    JsonRepairer, ParseFailure, ParseOutcome, ParsedValue, RepairTier, parse_model_output,
};
