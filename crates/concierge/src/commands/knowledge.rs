//! Knowledge command - manage the knowledge catalog.

use std::path::PathBuf;

use anyhow::{Context as _, Result};
use clap::{Args, Subcommand};
use console::{Style, style};

use concierge_domain::{KnowledgeDraft, KnowledgeEntry};
use concierge_memory::EntryId;

use super::{Context, truncate};

/// Arguments for the knowledge command.
#[derive(Args, Debug)]
pub struct KnowledgeArgs {
    #[command(subcommand)]
    pub command: KnowledgeCommand,
}

#[derive(Subcommand, Debug)]
pub enum KnowledgeCommand {
    /// Add an entry
    Add {
        /// Entry title
        #[arg(long)]
        title: String,

        /// Entry body
        #[arg(long)]
        body: String,

        /// Category label
        #[arg(long)]
        category: Option<String>,

        /// Tag (repeatable)
        #[arg(long = "tag")]
        tags: Vec<String>,
    },

    /// Show one entry
    Get {
        /// Entry ID
        id: String,
    },

    /// Replace fields of an entry
    Update {
        /// Entry ID
        id: String,

        /// New title
        #[arg(long)]
        title: Option<String>,

        /// New body
        #[arg(long)]
        body: Option<String>,

        /// New category
        #[arg(long)]
        category: Option<String>,

        /// Replacement tags (repeatable)
        #[arg(long = "tag")]
        tags: Vec<String>,
    },

    /// Delete an entry
    Delete {
        /// Entry ID
        id: String,
    },

    /// List entries, most recently updated first
    List {
        /// Only entries in this category
        #[arg(short, long)]
        category: Option<String>,

        /// Maximum entries to show
        #[arg(short, long, default_value = "20")]
        limit: usize,

        /// Entries to skip
        #[arg(long, default_value = "0")]
        offset: usize,
    },

    /// List the categories in use
    Categories,

    /// Add entries from a JSON file holding an array of
    /// `{title, body, category?, tags?}` objects
    Import {
        /// Path to the JSON file
        file: PathBuf,
    },

    /// Rebuild the vector index from the catalog
    Resync,

    /// Insert the starter entries into an empty catalog
    Seed,
}

/// Run the knowledge command.
pub async fn run(args: KnowledgeArgs, ctx: &Context) -> Result<()> {
    let app = ctx.open_app().await?;
    let knowledge = app.services.knowledge();

    match args.command {
        KnowledgeCommand::Add {
            title,
            body,
            category,
            tags,
        } => {
            let mut draft = KnowledgeDraft::new(title, body).with_tags(tags);
            if let Some(category) = category {
                draft = draft.with_category(category);
            }
            let entry = knowledge.create(draft).await?;
            print_entry(&entry, ctx)
        }
        KnowledgeCommand::Get { id } => {
            let entry = knowledge.get(parse_id(&id)?)?;
            print_entry(&entry, ctx)
        }
        KnowledgeCommand::Update {
            id,
            title,
            body,
            category,
            tags,
        } => {
            let id = parse_id(&id)?;
            let current = knowledge.get(id)?;
            let draft = KnowledgeDraft {
                title: title.unwrap_or(current.title),
                body: body.unwrap_or(current.body),
                category: category.or(current.category),
                tags: if tags.is_empty() {
                    current.tags
                } else {
                    tags.into_iter().collect()
                },
            };
            let entry = knowledge.update(id, draft).await?;
            print_entry(&entry, ctx)
        }
        KnowledgeCommand::Delete { id } => {
            let deleted = knowledge.delete(parse_id(&id)?).await?;
            if ctx.json_output {
                println!("{}", serde_json::json!({ "id": id, "deleted": deleted }));
            } else if deleted {
                println!("Deleted {}", id);
            } else {
                anyhow::bail!("No knowledge entry with id {}", id);
            }
            Ok(())
        }
        KnowledgeCommand::List {
            category,
            limit,
            offset,
        } => {
            let entries = knowledge.list(category.as_deref(), limit, offset)?;
            if ctx.json_output {
                println!("{}", serde_json::to_string_pretty(&entries)?);
                return Ok(());
            }

            let dim = Style::new().dim();
            if entries.is_empty() {
                println!("{}", dim.apply_to("No knowledge entries"));
                return Ok(());
            }
            println!(
                "{} {}",
                style("Knowledge Entries").bold(),
                dim.apply_to(format!("({} total)", knowledge.count()?))
            );
            println!("{}", dim.apply_to("─".repeat(50)));
            for entry in &entries {
                println!(
                    "{}  {}  {}",
                    dim.apply_to(entry.id),
                    style(&entry.title).cyan(),
                    dim.apply_to(truncate(&entry.body, 50))
                );
            }
            Ok(())
        }
        KnowledgeCommand::Categories => {
            let categories = knowledge.categories()?;
            if ctx.json_output {
                println!("{}", serde_json::to_string_pretty(&categories)?);
            } else if categories.is_empty() {
                println!("{}", Style::new().dim().apply_to("No categories"));
            } else {
                for category in &categories {
                    println!("{}", style(category).cyan());
                }
            }
            Ok(())
        }
        KnowledgeCommand::Import { file } => {
            let raw = std::fs::read_to_string(&file)
                .with_context(|| format!("Failed to read {}", file.display()))?;
            let drafts: Vec<KnowledgeDraft> = serde_json::from_str(&raw)
                .with_context(|| format!("Invalid knowledge file {}", file.display()))?;
            let created = knowledge.create_many(drafts).await?;
            if ctx.json_output {
                println!("{}", serde_json::to_string_pretty(&created)?);
            } else {
                println!("Imported {} entries", created.len());
            }
            Ok(())
        }
        KnowledgeCommand::Resync => {
            let report = knowledge.resync().await?;
            if ctx.json_output {
                println!("{}", serde_json::to_string_pretty(&report)?);
            } else {
                println!("Vector index rebuilt: {}", report);
            }
            Ok(())
        }
        KnowledgeCommand::Seed => {
            let inserted = knowledge.seed_defaults().await?;
            if ctx.json_output {
                println!("{}", serde_json::json!({ "inserted": inserted }));
            } else if inserted == 0 {
                println!(
                    "{}",
                    Style::new().dim().apply_to("Catalog not empty; nothing seeded")
                );
            } else {
                println!("Seeded {} entries", inserted);
            }
            Ok(())
        }
    }
}

fn parse_id(id: &str) -> Result<EntryId> {
    EntryId::parse(id).with_context(|| format!("Invalid entry id '{}'", id))
}

fn print_entry(entry: &KnowledgeEntry, ctx: &Context) -> Result<()> {
    if ctx.json_output {
        println!("{}", serde_json::to_string_pretty(entry)?);
        return Ok(());
    }

    let dim = Style::new().dim();
    println!("{}", style(&entry.title).bold());
    println!("{}", dim.apply_to("─".repeat(50)));
    println!("  ID:        {}", entry.id);
    if let Some(ref category) = entry.category {
        println!("  Category:  {}", style(category).cyan());
    }
    if !entry.tags.is_empty() {
        let tags: Vec<&str> = entry.tags.iter().map(String::as_str).collect();
        println!("  Tags:      {}", tags.join(", "));
    }
    println!(
        "  Updated:   {}",
        dim.apply_to(entry.updated_at.format("%Y-%m-%d %H:%M:%S UTC"))
    );
    println!();
    println!("{}", entry.body);
    Ok(())
}
