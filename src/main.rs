use clap::{Parser, Subcommand};
use std::path::PathBuf;
use std::process::ExitCode;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

use docsift::cli::BackendOverrides;
use docsift::cli::commands::ask::AskOptions;
use docsift::config::{BackendKind, ConfigLoader};

#[derive(Parser)]
#[command(name = "docsift")]
#[command(
    version,
    about = "Structured JSON from LLM backends, with adaptive rate limiting and repair"
)]
struct Cli {
    #[command(subcommand)]
    command: Commands,

    #[arg(long, global = true)]
    verbose: bool,

    #[arg(long, short, global = true)]
    quiet: bool,
}

#[derive(Subcommand)]
enum Commands {
    /// Send a prompt and print the structured result
    Ask {
        #[arg(help = "Prompt text")]
        prompt: String,
        #[arg(long, default_value = "cli", help = "Diagnostic stage label")]
        stage: String,
        #[arg(long = "image", help = "Attach an image (repeatable)")]
        images: Vec<PathBuf>,
        #[arg(long, help = "Backend: gemini, openai, anthropic, ollama")]
        backend: Option<BackendKind>,
        #[arg(long, help = "Model to use")]
        model: Option<String>,
        #[arg(long, help = "Print repair tier and attempt count to stderr")]
        details: bool,
    },

    /// List models available from a backend
    Models {
        #[arg(long, help = "Backend: gemini, openai, anthropic, ollama")]
        backend: Option<BackendKind>,
    },

    /// Manage configuration
    Config {
        #[command(subcommand)]
        action: ConfigAction,
    },
}

#[derive(Subcommand)]
enum ConfigAction {
    /// Show current configuration (merged from all sources)
    Show {
        #[arg(
            short = 'f',
            long,
            default_value = "toml",
            help = "Output format: toml, json"
        )]
        format: String,
    },
    /// Show configuration file paths
    Path,
    /// Initialize configuration
    Init {
        #[arg(long, help = "Write ./docsift.toml instead of the global config")]
        project: bool,
        #[arg(long, help = "Overwrite existing config")]
        force: bool,
    },
}

/// Set up panic handler for graceful error reporting
fn setup_panic_handler() {
    let default_hook = std::panic::take_hook();

    std::panic::set_hook(Box::new(move |panic_info| {
        let message = if let Some(s) = panic_info.payload().downcast_ref::<&str>() {
            s.to_string()
        } else if let Some(s) = panic_info.payload().downcast_ref::<String>() {
            s.clone()
        } else {
            "Unknown panic".to_string()
        };

        eprintln!("\n\x1b[1;31m━━━ PANIC ━━━\x1b[0m");
        eprintln!("\x1b[31mdocsift encountered an unexpected error:\x1b[0m");
        eprintln!("  {}", message);

        if let Some(location) = panic_info.location() {
            eprintln!(
                "\x1b[90mLocation: {}:{}:{}\x1b[0m",
                location.file(),
                location.line(),
                location.column()
            );
        }
        eprintln!();

        // Call default hook for backtrace (if RUST_BACKTRACE=1)
        default_hook(panic_info);
    }));
}

fn main() -> ExitCode {
    setup_panic_handler();

    match run_cli() {
        Ok(true) => ExitCode::SUCCESS,
        Ok(false) => ExitCode::FAILURE,
        Err(e) => {
            eprintln!("\x1b[31mError:\x1b[0m {}", e);
            ExitCode::FAILURE
        }
    }
}

/// Default filter: CLI flags win, then the configured logging level
fn default_filter(cli: &Cli) -> String {
    if cli.verbose {
        "debug".to_string()
    } else if cli.quiet {
        "error".to_string()
    } else {
        ConfigLoader::load()
            .map(|config| config.logging.filter_directive())
            .unwrap_or_else(|_| "info".to_string())
    }
}

fn run_cli() -> anyhow::Result<bool> {
    let cli = Cli::parse();

    let filter = default_filter(&cli);
    tracing_subscriber::registry()
        .with(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| filter.into()),
        )
        .with(tracing_subscriber::fmt::layer().with_writer(std::io::stderr))
        .init();

    let runtime = tokio::runtime::Runtime::new()?;

    let succeeded = match cli.command {
        Commands::Ask {
            prompt,
            stage,
            images,
            backend,
            model,
            details,
        } => runtime.block_on(docsift::cli::commands::ask::run(AskOptions {
            prompt,
            stage,
            images,
            overrides: BackendOverrides { backend, model },
            show_details: details,
        }))?,
        Commands::Models { backend } => runtime.block_on(docsift::cli::commands::models::run(
            BackendOverrides {
                backend,
                model: None,
            },
        ))?,
        Commands::Config { action } => {
            match action {
                ConfigAction::Show { format } => docsift::cli::commands::config::show(&format)?,
                ConfigAction::Path => docsift::cli::commands::config::path()?,
                ConfigAction::Init { project, force } => {
                    docsift::cli::commands::config::init(project, force)?
                }
            }
            true
        }
    };

    Ok(succeeded)
}
