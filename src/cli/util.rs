//! CLI Common Utilities
//!
//! Shared configuration loading and dispatcher construction for commands.

use crate::ai::{Dispatcher, RateRegistry};
use crate::config::{BackendKind, Config, ConfigLoader};
use crate::types::Result;

/// Command-line overrides applied on top of loaded configuration
#[derive(Debug, Clone, Default)]
pub struct BackendOverrides {
    pub backend: Option<BackendKind>,
    pub model: Option<String>,
}

impl BackendOverrides {
    pub fn apply(&self, config: &mut Config) {
        if let Some(backend) = self.backend {
            config.ai.backend = backend;
        }
        if let Some(model) = &self.model {
            config.ai.settings_mut(config.ai.backend).model = model.clone();
        }
    }
}

/// Command execution context
///
/// Holds the effective configuration and the rate registry shared by every
/// dispatcher a command builds.
#[derive(Debug, Clone)]
pub struct CommandContext {
    pub config: Config,
    pub registry: RateRegistry,
}

impl CommandContext {
    /// Load configuration from all sources and apply overrides
    pub fn load(overrides: &BackendOverrides) -> Result<Self> {
        let mut config = ConfigLoader::load()?;
        overrides.apply(&mut config);
        Ok(Self::with_config(config))
    }

    pub fn with_config(config: Config) -> Self {
        Self {
            config,
            registry: RateRegistry::new(),
        }
    }

    pub async fn dispatcher(&self) -> Dispatcher {
        Dispatcher::from_config(&self.config.ai, &self.registry).await
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_overrides_apply_to_selected_backend() {
        let mut config = Config::default();
        let overrides = BackendOverrides {
            backend: Some(BackendKind::Ollama),
            model: Some("qwen2.5:7b".to_string()),
        };

        overrides.apply(&mut config);

        assert_eq!(config.ai.backend, BackendKind::Ollama);
        assert_eq!(config.ai.ollama.model, "qwen2.5:7b");
        assert_eq!(config.ai.gemini.model, "gemini-2.5-flash");
    }

    #[test]
    fn test_empty_overrides_keep_config() {
        let mut config = Config::default();
        BackendOverrides::default().apply(&mut config);
        assert_eq!(config.ai.backend, BackendKind::Gemini);
    }
}
