//! Search command - query the knowledge catalog.

use anyhow::Result;
use clap::Args;
use console::{Style, style};

use concierge_domain::SearchMode;

use super::{Context, truncate};

/// Arguments for the search command.
#[derive(Args, Debug)]
pub struct SearchArgs {
    /// Search query
    #[arg(required = true)]
    pub query: String,

    /// Strategy: vector, keyword, or hybrid (default from config)
    #[arg(short, long)]
    pub mode: Option<String>,

    /// Maximum results to return (default from config)
    #[arg(short, long)]
    pub limit: Option<usize>,
}

/// Run the search command.
pub async fn run(args: SearchArgs, ctx: &Context) -> Result<()> {
    let app = ctx.open_app().await?;
    let config = app.services.config();

    let mode = match args.mode {
        Some(ref mode) => mode.parse::<SearchMode>()?,
        None => config.retrieval_mode,
    };
    let limit = args.limit.unwrap_or(config.retrieval_limit);

    let dim = Style::new().dim();
    if ctx.verbose {
        eprintln!(
            "{}",
            dim.apply_to(format!(
                "Searching: \"{}\" (mode: {}, limit: {})",
                args.query, mode, limit
            ))
        );
    }

    let hits = app.services.retrieval().search(&args.query, limit, mode).await?;

    if ctx.json_output {
        println!("{}", serde_json::to_string_pretty(&hits)?);
        return Ok(());
    }

    if hits.is_empty() {
        println!("{}", dim.apply_to("No results found"));
        return Ok(());
    }

    println!("{}", style("Knowledge Search Results").bold());
    println!("{}", dim.apply_to("─".repeat(50)));
    println!();
    for (i, hit) in hits.iter().enumerate() {
        println!("{}. {}", style(i + 1).cyan(), style(&hit.entry.title).bold());
        println!("   {}", truncate(&hit.entry.body, 70));
        println!(
            "   {}",
            dim.apply_to(format!(
                "(id: {}, {} score: {:.3})",
                hit.entry.id, hit.matched_by, hit.score
            ))
        );
        println!();
    }
    Ok(())
}
