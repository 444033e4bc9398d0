//! Concierge - conversational assistant with session memory and knowledge retrieval
//!
//! Main entry point for the Concierge CLI.

use std::path::PathBuf;

use anyhow::Result;
use clap::{Parser, Subcommand};
use concierge_config::{ConciergeConfig, load_config_with_options};
use tracing_appender::non_blocking::WorkerGuard;

mod bootstrap;
mod commands;

use commands::{ask, calc, chat, config, knowledge, search, sessions};

/// Crates whose logs the console shows at the configured level.
const LOG_TARGETS: &[&str] = &[
    "concierge",
    "concierge_domain",
    "concierge_llm",
    "concierge_memory",
    "concierge_session",
    "concierge_config",
];

// ─────────────────────────────────────────────────────────────────────────────
// CLI Structure
// ─────────────────────────────────────────────────────────────────────────────

/// Concierge - conversational assistant with session memory and knowledge retrieval
#[derive(Parser)]
#[command(name = "concierge")]
#[command(author, version, about, long_about = None)]
#[command(propagate_version = true)]
pub struct Cli {
    /// Enable verbose output
    #[arg(short, long, global = true)]
    pub verbose: bool,

    /// Output as JSON (for scripting)
    #[arg(long, global = true)]
    pub json: bool,

    /// Configuration file applied on top of discovered files
    #[arg(long = "config", value_name = "PATH", global = true, env = "CONCIERGE_CONFIG")]
    pub config_file: Option<PathBuf>,

    #[command(subcommand)]
    pub command: Commands,
}

#[derive(Subcommand)]
pub enum Commands {
    /// Enter interactive chat mode (REPL)
    Chat(chat::ChatArgs),

    /// Send a single message
    Ask(ask::AskArgs),

    /// Manage the knowledge catalog
    Knowledge(knowledge::KnowledgeArgs),

    /// Search the knowledge catalog
    Search(search::SearchArgs),

    /// Inspect and manage conversation sessions
    Sessions(sessions::SessionsArgs),

    /// Evaluate an arithmetic expression
    Calc(calc::CalcArgs),

    /// Configuration management
    Config(config::ConfigArgs),
}

// ─────────────────────────────────────────────────────────────────────────────
// Main
// ─────────────────────────────────────────────────────────────────────────────

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();

    let loaded = load_config_with_options(None, None, cli.config_file.as_deref())?;
    let _guard = init_tracing(&loaded.config, cli.verbose);

    for warning in &loaded.warnings {
        tracing::warn!("{}", warning);
    }
    for source in loaded.sources.iter().filter(|s| s.loaded) {
        tracing::debug!(path = %source.path.display(), "Loaded config file");
    }

    let ctx = commands::Context {
        config: loaded.config,
        sources: loaded.sources,
        json_output: cli.json,
        verbose: cli.verbose,
    };

    match cli.command {
        Commands::Chat(args) => chat::run(args, &ctx).await,
        Commands::Ask(args) => ask::run(args, &ctx).await,
        Commands::Knowledge(args) => knowledge::run(args, &ctx).await,
        Commands::Search(args) => search::run(args, &ctx).await,
        Commands::Sessions(args) => sessions::run(args, &ctx).await,
        Commands::Calc(args) => calc::run(args, &ctx),
        Commands::Config(args) => config::run(args, &ctx),
    }
}

/// Console (human-readable, stderr) plus optional rotating JSON file.
///
/// The returned guard flushes the file writer on drop.
fn init_tracing(config: &ConciergeConfig, verbose: bool) -> Option<WorkerGuard> {
    use tracing_subscriber::prelude::*;
    use tracing_subscriber::{EnvFilter, fmt};

    let logging = config.logging_config();
    let level = if verbose { "debug" } else { logging.level.as_str() };
    let default_filter = LOG_TARGETS
        .iter()
        .map(|target| format!("{}={}", target, level))
        .chain(std::iter::once("warn".to_string()))
        .collect::<Vec<_>>()
        .join(",");
    let console_filter =
        EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(&default_filter));

    let console = fmt::layer()
        .compact()
        .with_target(verbose)
        .with_writer(std::io::stderr)
        .with_filter(console_filter);

    let log_dir = if logging.file {
        config
            .storage_config()
            .resolve_data_dir()
            .ok()
            .map(|dir| dir.join("logs"))
    } else {
        None
    };

    match log_dir {
        Some(dir) => {
            let appender = tracing_appender::rolling::daily(dir, "concierge.log");
            let (non_blocking, guard) = tracing_appender::non_blocking(appender);
            let file_filter = LOG_TARGETS
                .iter()
                .map(|target| format!("{}=debug", target))
                .chain(std::iter::once("info".to_string()))
                .collect::<Vec<_>>()
                .join(",");
            tracing_subscriber::registry()
                .with(console)
                .with(
                    fmt::layer()
                        .json()
                        .with_writer(non_blocking)
                        .with_filter(EnvFilter::new(file_filter)),
                )
                .init();
            Some(guard)
        }
        None => {
            tracing_subscriber::registry().with(console).init();
            None
        }
    }
}
