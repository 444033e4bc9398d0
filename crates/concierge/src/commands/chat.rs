//! Chat command - interactive REPL mode.

use anyhow::Result;
use clap::Args;

use super::Context;
use super::repl::Repl;

/// Arguments for the chat command.
#[derive(Args, Debug)]
pub struct ChatArgs {
    /// Resume an existing session
    #[arg(short, long)]
    pub session: Option<String>,

    /// Owner of new sessions
    #[arg(short, long)]
    pub user: Option<String>,

    /// Source hint selecting a domain prompt (e.g. product, support)
    #[arg(long)]
    pub source: Option<String>,
}

/// Run the chat command (REPL).
pub async fn run(args: ChatArgs, ctx: &Context) -> Result<()> {
    let app = ctx.open_app().await?;
    let mut repl = Repl::new(app, args.session, args.user, args.source, ctx.verbose)?;
    repl.run().await
}
