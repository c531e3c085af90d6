//! Config Command
//!
//! Manage docsift configuration.
//!
//! Usage:
//!   docsift config show [-f json|toml]
//!   docsift config path
//!   docsift config init [--project] [--force]

use crate::cli::Output;
use crate::config::{BackendKind, ConfigLoader};
use crate::types::{DocsiftError, Result};

/// Show the merged effective configuration (API keys are never printed)
pub fn show(format: &str) -> Result<()> {
    let as_json = match format {
        "json" => true,
        "toml" | "text" => false,
        other => {
            return Err(DocsiftError::Config(format!(
                "Unknown format '{}'. Valid values: toml, json",
                other
            )));
        }
    };

    let config = ConfigLoader::load()?;
    println!("{}", ConfigLoader::render(&config, as_json)?);

    let output = Output::new();
    for kind in BackendKind::ALL.into_iter().filter(|k| k.is_cloud()) {
        let status = if config.ai.settings(kind).api_key.is_some() {
            "set"
        } else {
            "missing"
        };
        output.field(&format!("{} key", kind), status);
    }
    Ok(())
}

/// Show configuration file paths
pub fn path() -> Result<()> {
    let output = Output::new();
    match ConfigLoader::global_config_path() {
        Some(global) => {
            let marker = if global.exists() { "" } else { " (not created)" };
            output.field("global", &format!("{}{}", global.display(), marker));
        }
        None => output.field("global", "(unavailable)"),
    }

    let project = ConfigLoader::project_config_path();
    let marker = if project.exists() { "" } else { " (not created)" };
    output.field("project", &format!("{}{}", project.display(), marker));
    Ok(())
}

/// Write the default config template, globally or in the current directory
pub fn init(project: bool, force: bool) -> Result<()> {
    let path = if project {
        ConfigLoader::init_at(&ConfigLoader::project_config_path(), force)?
    } else {
        ConfigLoader::init_global(force)?
    };

    Output::new().success(&format!("Configuration ready: {}", path.display()));
    Ok(())
}
