//! Models Command
//!
//! Usage:
//!   docsift models [--backend B]

use crate::cli::{BackendOverrides, CommandContext, Output};
use crate::types::Result;

pub async fn run(overrides: BackendOverrides) -> Result<bool> {
    let ctx = CommandContext::load(&overrides)?;
    let output = Output::new();
    let dispatcher = ctx.dispatcher().await;
    let provider = dispatcher.provider();

    if !provider.is_configured() {
        output.error(&format!(
            "Backend '{}' is not configured (missing API key or endpoint)",
            provider.name()
        ));
        return Ok(false);
    }

    let models = dispatcher.list_models().await;
    if models.is_empty() {
        output.warning(&format!("No models reported by '{}'", provider.name()));
        return Ok(false);
    }

    output.section(&format!("{} models", provider.name()));
    for model in &models {
        if model == provider.model() {
            output.list_item(&format!("{} (configured)", model));
        } else {
            output.list_item(model);
        }
    }
    Ok(true)
}
