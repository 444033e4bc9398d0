//! Sessions command - inspect and manage conversation sessions.

use anyhow::Result;
use clap::{Args, Subcommand};
use console::{Style, style};

use concierge_memory::Role;

use super::{Context, truncate};

/// Arguments for the sessions command.
#[derive(Args, Debug)]
pub struct SessionsArgs {
    #[command(subcommand)]
    pub command: SessionsCommand,
}

#[derive(Subcommand, Debug)]
pub enum SessionsCommand {
    /// List sessions, most recently active first
    List {
        /// Only sessions owned by this user
        #[arg(short, long)]
        user: Option<String>,

        /// Maximum sessions to show
        #[arg(short, long, default_value = "20")]
        limit: usize,

        /// Sessions to skip
        #[arg(long, default_value = "0")]
        offset: usize,
    },

    /// Show a session's recent turns
    Show {
        /// Session ID
        id: String,

        /// Turns to show
        #[arg(short, long, default_value = "20")]
        limit: usize,

        /// Most recent turns to skip
        #[arg(long, default_value = "0")]
        offset: usize,
    },

    /// Delete a session and everything recorded for it
    Delete {
        /// Session ID
        id: String,
    },

    /// Delete sessions idle for longer than the given number of days
    Purge {
        /// Idle days (default from config)
        #[arg(long)]
        days: Option<u32>,
    },
}

/// Run the sessions command.
pub async fn run(args: SessionsArgs, ctx: &Context) -> Result<()> {
    let app = ctx.open_app().await?;
    let sessions = app.services.sessions();
    let dim = Style::new().dim();

    match args.command {
        SessionsCommand::List {
            user,
            limit,
            offset,
        } => {
            let records = sessions.list(user.as_deref(), limit, offset)?;
            if ctx.json_output {
                println!("{}", serde_json::to_string_pretty(&records)?);
                return Ok(());
            }
            if records.is_empty() {
                println!("{}", dim.apply_to("No sessions"));
                return Ok(());
            }

            println!("{}", style("Sessions").bold());
            println!("{}", dim.apply_to("─".repeat(50)));
            for record in &records {
                let owner = record.owner_id.as_deref().unwrap_or("-");
                println!(
                    "{}  {}  {}",
                    style(&record.session_id).cyan(),
                    record.title,
                    dim.apply_to(format!(
                        "({} turns, owner {}, active {})",
                        record.turn_count,
                        owner,
                        record.updated_at.format("%Y-%m-%d %H:%M")
                    ))
                );
            }
            Ok(())
        }
        SessionsCommand::Show { id, limit, offset } => {
            let record = sessions.get(&id)?;
            let turns = sessions.history(&id, limit, offset)?;
            let summary = sessions.latest_summary(&id)?;

            if ctx.json_output {
                let out = serde_json::json!({
                    "session": record,
                    "turns": turns,
                    "summary": summary,
                });
                println!("{}", serde_json::to_string_pretty(&out)?);
                return Ok(());
            }

            println!("{}", style(&record.title).bold());
            println!("{}", dim.apply_to("─".repeat(50)));
            println!("  ID:       {}", record.session_id);
            if let Some(ref owner) = record.owner_id {
                println!("  Owner:    {}", owner);
            }
            println!("  Turns:    {}", style(record.turn_count).cyan());
            println!(
                "  Created:  {}",
                dim.apply_to(record.created_at.format("%Y-%m-%d %H:%M:%S UTC"))
            );
            if let Some(summary) = summary {
                println!(
                    "  Summary:  {} {}",
                    truncate(&summary.summary, 60),
                    dim.apply_to(format!("(through turn {})", summary.covers_turns))
                );
            }
            println!();

            for turn in turns {
                let who = match turn.role {
                    Role::User => style("user").green(),
                    Role::Assistant => style("assistant").cyan(),
                    Role::System => style("system").dim(),
                };
                println!(
                    "{} {}",
                    dim.apply_to(turn.created_at.format("%Y-%m-%d %H:%M:%S")),
                    who
                );
                println!("  {}", turn.content);
            }
            Ok(())
        }
        SessionsCommand::Delete { id } => {
            let deleted = sessions.delete(&id).await?;
            if ctx.json_output {
                println!("{}", serde_json::json!({ "session_id": id, "deleted": deleted }));
            } else if deleted {
                println!("Deleted session {}", id);
            } else {
                anyhow::bail!("No session with id {}", id);
            }
            Ok(())
        }
        SessionsCommand::Purge { days } => {
            let days = days.unwrap_or(app.services.config().inactive_days);
            let removed = sessions.purge_inactive(days).await?;
            if ctx.json_output {
                println!(
                    "{}",
                    serde_json::json!({ "days": days, "removed": removed })
                );
            } else {
                println!(
                    "Removed {} session(s) idle for more than {} days",
                    removed.len(),
                    days
                );
            }
            Ok(())
        }
    }
}
