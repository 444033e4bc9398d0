//! Config command - configuration management.

use anyhow::Result;
use clap::{Args, Subcommand};
use console::{Style, style};

use concierge_config::{ConciergeConfig, resolve_api_key, user_config_path};

use super::Context;

const MASK: &str = "********";

/// Arguments for the config command.
#[derive(Args, Debug)]
pub struct ConfigArgs {
    #[command(subcommand)]
    pub command: ConfigCommand,
}

#[derive(Subcommand, Debug)]
pub enum ConfigCommand {
    /// Show the effective configuration and where it came from
    Show,

    /// Show the user configuration file path
    Path,
}

/// Run the config command.
pub fn run(args: ConfigArgs, ctx: &Context) -> Result<()> {
    match args.command {
        ConfigCommand::Show => cmd_show(ctx),
        ConfigCommand::Path => cmd_path(ctx),
    }
}

fn cmd_show(ctx: &Context) -> Result<()> {
    let masked = masked(&ctx.config);

    if ctx.json_output {
        println!("{}", serde_json::to_string_pretty(&masked)?);
        return Ok(());
    }

    let dim = Style::new().dim();
    println!("{}", style("Configuration Sources").bold());
    println!("{}", dim.apply_to("─".repeat(50)));
    if ctx.sources.iter().all(|s| !s.loaded) {
        println!("  {}", dim.apply_to("(no config files loaded, using defaults)"));
    }
    for source in &ctx.sources {
        let marker = if source.loaded {
            style("loaded").green()
        } else {
            style("absent").dim()
        };
        println!("  {:<8} {}", marker, source.path.display());
    }
    println!();

    let llm = ctx.config.llm_config();
    let key_status = match resolve_api_key(llm.provider.env_var(), llm.api_key.as_deref()) {
        Some(secret) => style(format!("key from {}", secret.source)).green(),
        None if llm.provider.requires_api_key() => {
            style(format!("no key (set {})", llm.provider.env_var())).red()
        }
        None => style("no key needed".to_string()).dim(),
    };
    println!("{}", style("Generation Backend").bold());
    println!("{}", dim.apply_to("─".repeat(50)));
    println!("  Provider:  {}  {}", style(llm.provider.display_name()).cyan(), key_status);
    println!();

    println!("{}", style("Effective Configuration").bold());
    println!("{}", dim.apply_to("─".repeat(50)));
    println!("{}", masked.to_toml()?);
    Ok(())
}

fn cmd_path(ctx: &Context) -> Result<()> {
    match user_config_path() {
        Some(path) => {
            if ctx.json_output {
                let out = serde_json::json!({
                    "path": path.display().to_string(),
                    "exists": path.exists(),
                });
                println!("{}", serde_json::to_string_pretty(&out)?);
            } else {
                println!("{}", path.display());
            }
            Ok(())
        }
        None => anyhow::bail!("Could not determine the user configuration directory"),
    }
}

/// Copy of `config` with plaintext API keys hidden.
fn masked(config: &ConciergeConfig) -> ConciergeConfig {
    let mut config = config.clone();
    if let Some(ref mut llm) = config.llm
        && llm.api_key.is_some()
    {
        llm.api_key = Some(MASK.to_string());
    }
    if let Some(ref mut embedding) = config.embedding
        && embedding.api_key.is_some()
    {
        embedding.api_key = Some(MASK.to_string());
    }
    config
}
