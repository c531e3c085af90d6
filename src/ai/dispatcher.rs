//! Dispatcher
//!
//! Selects the configured backend once and exposes the single
//! "prompt in, structured data or nothing out" entry point.

use serde_json::Value;
use std::sync::Arc;
use tracing::{info, warn};

use super::provider::{
    Provider, SharedProvider, StructuredOutput, StructuredProvider, create_provider,
};
use super::rate::RateRegistry;
use super::request::{AiRequest, ImagePayload};
use crate::config::{AiConfig, BackendKind};

#[derive(Clone)]
pub struct Dispatcher {
    provider: SharedProvider,
}

impl std::fmt::Debug for Dispatcher {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Dispatcher")
            .field("provider", &self.provider.name())
            .field("model", &self.provider.model())
            .finish()
    }
}

impl Dispatcher {
    /// Build the provider selected by `config.backend`. Never fails: a backend
    /// that cannot be constructed becomes an inert provider.
    pub async fn from_config(config: &AiConfig, registry: &RateRegistry) -> Self {
        Self::for_backend(config.backend, config, registry).await
    }

    /// Same as [`Dispatcher::from_config`] with an explicit backend
    pub async fn for_backend(
        kind: BackendKind,
        config: &AiConfig,
        registry: &RateRegistry,
    ) -> Self {
        let provider = match create_provider(kind, config, registry).await {
            Ok(provider) => provider,
            Err(err) => {
                warn!(
                    target: "docsift::provider",
                    backend = kind.as_str(),
                    "Backend construction failed, requests will return no result: {}",
                    err
                );
                Provider::inert(kind, config.settings(kind).model.clone())
            }
        };

        info!(
            target: "docsift::provider",
            backend = kind.as_str(),
            model = provider.model(),
            configured = provider.is_configured(),
            "Dispatcher ready"
        );

        Self::with_provider(Arc::new(provider))
    }

    pub fn with_provider(provider: SharedProvider) -> Self {
        Self { provider }
    }

    pub fn provider(&self) -> &SharedProvider {
        &self.provider
    }

    /// Structured data for `prompt`, or `None`. Never errors.
    pub async fn generate(
        &self,
        prompt: &str,
        stage: &str,
        images: Vec<ImagePayload>,
    ) -> Option<Value> {
        self.generate_detailed(prompt, stage, images)
            .await
            .map(|output| output.value)
    }

    /// Like [`Dispatcher::generate`] but keeps the repair diagnostics
    pub async fn generate_detailed(
        &self,
        prompt: &str,
        stage: &str,
        images: Vec<ImagePayload>,
    ) -> Option<StructuredOutput> {
        let request = AiRequest::new(prompt, stage).with_images(images);
        let output = self.provider.generate_structured(&request).await;

        if let Some(output) = &output
            && output.possibly_incomplete
        {
            warn!(
                target: "docsift::provider",
                stage,
                request_id = %request.id(),
                "Result recovered from truncated output; review before relying on it"
            );
        }
        output
    }

    pub async fn list_models(&self) -> Vec<String> {
        self.provider.list_models().await
    }

    pub fn current_adaptive_delay(&self) -> f64 {
        self.provider.current_adaptive_delay()
    }
}
