//! docsift - Structured-Output LLM Client
//!
//! Turns a text (and optional image) prompt into parsed structured data from
//! a large-language-model backend, surviving rate limits, transient network
//! errors, truncated output and broken JSON.
//!
//! ## Core Features
//!
//! - **Adaptive Rate Control**: shared per-backend delay that doubles on 429s
//!   and halves on success, plus a reactive cooldown
//! - **Two Retry Layers**: bounded network retries (same payload) and logical
//!   retries (re-prompt naming the parse failure)
//! - **Tiered JSON Repair**: direct, balanced, heuristic and truncation-closing
//! - **Backends**: Gemini, OpenAI, Anthropic (prefill) and local Ollama
//!
//! ## Quick Start
//!
//! ```ignore
//! use docsift::{ConfigLoader, Dispatcher, RateRegistry};
//!
//! let config = ConfigLoader::load()?;
//! let registry = RateRegistry::new();
//! let dispatcher = Dispatcher::from_config(&config.ai, &registry).await;
//! let value = dispatcher.generate("List two colors as JSON", "demo", Vec::new()).await;
//! ```
//!
//! ## Modules
//!
//! - [`ai`]: dispatcher, providers, rate control, retries, JSON repair
//! - [`config`]: configuration types and layered loading
//! - [`types`]: error types and classification

pub mod ai;
pub mod cli;
pub mod config;
pub mod constants;
pub mod types;

// =============================================================================
// Core Re-exports
// =============================================================================

// Configuration
pub use config::{AiConfig, BackendKind, BackendSettings, Config, ConfigLoader};

// Error Types
pub use types::error::{DocsiftError, ErrorCategory, LlmError, Result};

// =============================================================================
// AI Re-exports
// =============================================================================

pub use ai::{
    // Entry point
    Dispatcher,
    // Providers
    Provider,
    SharedProvider,
    StructuredOutput,
    StructuredProvider,
    // Rate control
    AdaptiveRateController,
    RateRegistry,
    RetryOrchestrator,
    // Requests
    AiRequest,
    ImagePayload,
    // Repair
    ParseFailure,
    ParseOutcome,
    RepairTier,
    parse_model_output,
};
