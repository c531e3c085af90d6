//! Ask Command
//!
//! Send one prompt through the dispatcher and print the structured result.
//!
//! Usage:
//!   docsift ask <PROMPT> [--stage S] [--image PATH]... [--backend B] [--model M]

use std::path::PathBuf;

use crate::ai::ImagePayload;
use crate::cli::{BackendOverrides, CommandContext, Output};
use crate::types::Result;

#[derive(Debug, Clone)]
pub struct AskOptions {
    pub prompt: String,
    pub stage: String,
    pub images: Vec<PathBuf>,
    pub overrides: BackendOverrides,
    /// Print tier and truncation details to stderr
    pub show_details: bool,
}

/// Returns `false` when no structured result could be produced
pub async fn run(options: AskOptions) -> Result<bool> {
    let ctx = CommandContext::load(&options.overrides)?;
    let output = Output::new();

    let images = options
        .images
        .iter()
        .map(|path| ImagePayload::from_path(path))
        .collect::<Result<Vec<_>>>()?;

    let dispatcher = ctx.dispatcher().await;
    if !dispatcher.provider().is_configured() {
        output.error(&format!(
            "Backend '{}' is not configured (missing API key or endpoint)",
            dispatcher.provider().name()
        ));
        return Ok(false);
    }

    match dispatcher
        .generate_detailed(&options.prompt, &options.stage, images)
        .await
    {
        Some(result) => {
            if options.show_details {
                eprintln!(
                    "backend={} model={} tier={} attempts={} adaptive_delay={:.2}s",
                    dispatcher.provider().name(),
                    dispatcher.provider().model(),
                    result.tier,
                    result.logical_attempts,
                    dispatcher.current_adaptive_delay()
                );
            }
            if result.possibly_incomplete {
                output.warning("Output was truncated by the backend; result may be incomplete");
            }
            output.json(&result.value);
            Ok(true)
        }
        None => {
            output.error("No structured result (see log for details)");
            Ok(false)
        }
    }
}
