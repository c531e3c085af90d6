//! Configuration Loader (Figment-based)
//!
//! Loads and merges configuration from multiple sources using Figment:
//! 1. Built-in defaults (Serialized)
//! 2. Global config (<config dir>/docsift/config.toml)
//! 3. Project config (./docsift.toml)
//! 4. Environment variables (DOCSIFT_* prefix, `__` separates sections)
//!
//! Standard vendor variables (`GEMINI_API_KEY`, `OPENAI_API_KEY`,
//! `ANTHROPIC_API_KEY`, `OLLAMA_HOST`) fill any credential or endpoint the
//! layers above left empty.

use directories::ProjectDirs;
use figment::{
    Figment,
    providers::{Env, Format, Serialized, Toml},
};
use std::fs;
use std::path::{Path, PathBuf};

use tracing::{debug, info};

use super::types::{BackendKind, Config};
use crate::types::{DocsiftError, Result};

/// Configuration loader
pub struct ConfigLoader;

impl ConfigLoader {
    /// Load configuration with full resolution chain:
    /// defaults → global → project → env vars
    pub fn load() -> Result<Config> {
        let global = Self::global_config_path();
        Self::load_with(global.as_deref(), &Self::project_config_path())
    }

    /// Load configuration from explicit global/project paths plus environment
    pub fn load_with(global_path: Option<&Path>, project_path: &Path) -> Result<Config> {
        let mut figment = Figment::new().merge(Serialized::defaults(Config::default()));

        if let Some(global_path) = global_path
            && global_path.exists()
        {
            debug!("Loading global config from: {}", global_path.display());
            figment = figment.merge(Toml::file(global_path));
        }

        if project_path.exists() {
            debug!("Loading project config from: {}", project_path.display());
            figment = figment.merge(Toml::file(project_path));
        }

        // e.g. DOCSIFT_AI__BACKEND -> ai.backend, DOCSIFT_AI__OPENAI__MODEL -> ai.openai.model
        figment = figment.merge(Env::prefixed("DOCSIFT_").split("__"));

        let mut config: Config = figment
            .extract()
            .map_err(|e| DocsiftError::Config(format!("Configuration error: {}", e)))?;

        Self::apply_env_fallbacks(&mut config, |name| std::env::var(name).ok());

        config.validate()?;

        Ok(config)
    }

    /// Load configuration from a specific file only (no environment)
    pub fn load_from_file(path: &Path) -> Result<Config> {
        let config: Config = Figment::new()
            .merge(Serialized::defaults(Config::default()))
            .merge(Toml::file(path))
            .extract()
            .map_err(|e| DocsiftError::Config(format!("Configuration error: {}", e)))?;

        config.validate()?;
        Ok(config)
    }

    /// Fill empty credentials/endpoints from the vendors' standard variables
    pub fn apply_env_fallbacks<F>(config: &mut Config, lookup: F)
    where
        F: Fn(&str) -> Option<String>,
    {
        let key_vars: [(BackendKind, &[&str]); 3] = [
            (BackendKind::Gemini, &["GEMINI_API_KEY", "GOOGLE_API_KEY"]),
            (BackendKind::OpenAi, &["OPENAI_API_KEY"]),
            (BackendKind::Anthropic, &["ANTHROPIC_API_KEY"]),
        ];

        for (kind, vars) in key_vars {
            let settings = config.ai.settings_mut(kind);
            if settings.api_key.as_deref().is_none_or(str::is_empty) {
                settings.api_key = vars
                    .iter()
                    .find_map(|var| lookup(var).filter(|v| !v.is_empty()));
            }
        }

        let ollama = config.ai.settings_mut(BackendKind::Ollama);
        if ollama.base_url.is_none() {
            ollama.base_url = lookup("OLLAMA_HOST").filter(|v| !v.is_empty());
        }
    }

    // =========================================================================
    // Path Management
    // =========================================================================

    /// Get path to global config directory
    pub fn global_dir() -> Option<PathBuf> {
        ProjectDirs::from("", "", "docsift").map(|dirs| dirs.config_dir().to_path_buf())
    }

    /// Get path to global config file
    pub fn global_config_path() -> Option<PathBuf> {
        Self::global_dir().map(|dir| dir.join("config.toml"))
    }

    /// Get path to project config file
    pub fn project_config_path() -> PathBuf {
        PathBuf::from("docsift.toml")
    }

    // =========================================================================
    // Config Commands
    // =========================================================================

    /// Render the effective configuration (API keys are never included)
    pub fn render(config: &Config, as_json: bool) -> Result<String> {
        if as_json {
            Ok(serde_json::to_string_pretty(config)?)
        } else {
            toml::to_string_pretty(config).map_err(|e| DocsiftError::Config(e.to_string()))
        }
    }

    /// Initialize global configuration file
    pub fn init_global(force: bool) -> Result<PathBuf> {
        let global_dir = Self::global_dir().ok_or_else(|| {
            DocsiftError::Config("Cannot determine global config directory".to_string())
        })?;
        Self::init_at(&global_dir.join("config.toml"), force)
    }

    /// Write the default config template to `path`
    pub fn init_at(path: &Path, force: bool) -> Result<PathBuf> {
        if let Some(parent) = path.parent() {
            fs::create_dir_all(parent)?;
        }

        if !path.exists() || force {
            fs::write(path, Self::default_config_template())?;
            info!("Created config: {}", path.display());
        } else {
            info!("Config exists: {}", path.display());
        }

        Ok(path.to_path_buf())
    }

    /// Default config content (TOML)
    fn default_config_template() -> String {
        r#"# docsift configuration
# Project settings in ./docsift.toml override these.
# API keys may also come from GEMINI_API_KEY, OPENAI_API_KEY, ANTHROPIC_API_KEY.

version = "1.0"

[ai]
# gemini | openai | anthropic | ollama
backend = "gemini"
timeout_secs = 300

[ai.gemini]
model = "gemini-2.5-flash"

[ai.openai]
model = "gpt-4o-mini"

[ai.anthropic]
model = "claude-sonnet-4-20250514"

[ai.ollama]
base_url = "http://localhost:11434"
model = "llama3:latest"

[logging]
level = "info"
capture_prompts = false
"#
        .to_string()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    #[test]
    fn test_load_from_file_overrides_defaults() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("docsift.toml");
        fs::write(
            &path,
            r#"
[ai]
backend = "ollama"

[ai.ollama]
model = "qwen2.5:7b"
"#,
        )
        .unwrap();

        let config = ConfigLoader::load_from_file(&path).unwrap();
        assert_eq!(config.ai.backend, BackendKind::Ollama);
        assert_eq!(config.ai.ollama.model, "qwen2.5:7b");
        // Untouched sections keep their defaults
        assert_eq!(config.ai.openai.model, "gpt-4o-mini");
    }

    #[test]
    fn test_default_template_parses() {
        let dir = TempDir::new().unwrap();
        let path = ConfigLoader::init_at(&dir.path().join("nested/config.toml"), false).unwrap();

        let config = ConfigLoader::load_from_file(&path).unwrap();
        assert_eq!(config.ai.backend, BackendKind::Gemini);
        assert_eq!(
            config.ai.ollama.base_url.as_deref(),
            Some("http://localhost:11434")
        );
    }

    #[test]
    fn test_init_does_not_overwrite_without_force() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("config.toml");
        fs::write(&path, "version = \"custom\"").unwrap();

        ConfigLoader::init_at(&path, false).unwrap();
        assert_eq!(fs::read_to_string(&path).unwrap(), "version = \"custom\"");

        ConfigLoader::init_at(&path, true).unwrap();
        assert!(fs::read_to_string(&path).unwrap().contains("[ai.gemini]"));
    }

    #[test]
    fn test_env_fallbacks_fill_only_missing_values() {
        let mut config = Config::default();
        config.ai.openai.api_key = Some("from-config".to_string());

        ConfigLoader::apply_env_fallbacks(&mut config, |name| match name {
            "GOOGLE_API_KEY" => Some("google-key".to_string()),
            "OPENAI_API_KEY" => Some("from-env".to_string()),
            "OLLAMA_HOST" => Some("http://gpu-box:11434".to_string()),
            _ => None,
        });

        assert_eq!(config.ai.gemini.api_key.as_deref(), Some("google-key"));
        assert_eq!(config.ai.openai.api_key.as_deref(), Some("from-config"));
        assert_eq!(config.ai.anthropic.api_key, None);
        assert_eq!(
            config.ai.ollama.base_url.as_deref(),
            Some("http://gpu-box:11434")
        );
    }

    #[test]
    fn test_render_never_contains_keys() {
        let mut config = Config::default();
        config.ai.anthropic.api_key = Some("sk-ant-secret".to_string());

        let toml_out = ConfigLoader::render(&config, false).unwrap();
        let json_out = ConfigLoader::render(&config, true).unwrap();
        assert!(!toml_out.contains("sk-ant-secret"));
        assert!(!json_out.contains("sk-ant-secret"));
    }
}
