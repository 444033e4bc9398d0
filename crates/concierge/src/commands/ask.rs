//! Ask command - one-shot message to the assistant.

use std::io::Write;

use anyhow::Result;
use clap::Args;
use console::Style;
use futures::StreamExt;
use tokio_util::sync::CancellationToken;

use concierge_domain::{TurnEvent, TurnOptions, TurnOutcome, TurnRequest};

use super::{Context, print_error};

/// Arguments for the ask command.
#[derive(Args, Debug)]
pub struct AskArgs {
    /// The message to send
    #[arg(required = true)]
    pub message: String,

    /// Continue an existing session
    #[arg(short, long)]
    pub session: Option<String>,

    /// Owner of a new session
    #[arg(short, long)]
    pub user: Option<String>,

    /// Source hint selecting a domain prompt (e.g. product, support)
    #[arg(long)]
    pub source: Option<String>,

    /// Skip knowledge retrieval
    #[arg(long)]
    pub no_knowledge: bool,

    /// Wait for the full reply instead of streaming
    #[arg(long)]
    pub no_stream: bool,
}

impl AskArgs {
    pub(crate) fn request(&self) -> TurnRequest {
        let mut request = TurnRequest::new(&self.message);
        if let Some(ref session) = self.session {
            request = request.with_session(session);
        }
        if let Some(ref user) = self.user {
            request = request.with_owner(user);
        }
        if let Some(ref source) = self.source {
            request = request.with_source(source);
        }
        request
    }
}

/// Run the ask command.
pub async fn run(args: AskArgs, ctx: &Context) -> Result<()> {
    let app = ctx.open_app().await?;
    let dim = Style::new().dim();

    let cancel = CancellationToken::new();
    let watcher = cancel.clone();
    tokio::spawn(async move {
        if tokio::signal::ctrl_c().await.is_ok() {
            watcher.cancel();
        }
    });

    let mut options = TurnOptions::default().with_cancellation(cancel);
    if args.no_knowledge {
        options = options.without_knowledge();
    }

    let request = args.request();
    if ctx.verbose {
        eprintln!(
            "{}",
            dim.apply_to(format!("Provider: {}", app.services.chat().backend().name()))
        );
        if let Some(ref session) = request.session_id {
            eprintln!("{}", dim.apply_to(format!("Session: {}", session)));
        }
    }

    if args.no_stream {
        let outcome = app.services.chat().send(request, options).await?;
        return print_outcome(&outcome, ctx);
    }

    let mut stream = app.services.chat().stream(request, options).await?;
    let mut has_output = false;

    while let Some(event) = stream.next().await {
        if ctx.json_output {
            println!("{}", serde_json::to_string(&event)?);
            if let TurnEvent::Failed { kind, message, .. } = event {
                anyhow::bail!("{} error: {}", kind, message);
            }
            continue;
        }

        match event {
            TurnEvent::Started { session_id } => {
                if ctx.verbose {
                    eprintln!("{}", dim.apply_to(format!("Session: {}", session_id)));
                }
            }
            TurnEvent::Delta { text } => {
                print!("{}", text);
                std::io::stdout().flush()?;
                has_output = true;
            }
            TurnEvent::Completed { outcome } => {
                if has_output {
                    println!();
                }
                if ctx.verbose {
                    print_footer(&outcome);
                }
            }
            TurnEvent::Failed {
                kind,
                message,
                fallback,
                ..
            } => {
                if has_output {
                    println!();
                }
                println!("{}", fallback);
                print_error(format!("{} error: {}", kind, message));
                anyhow::bail!("turn failed");
            }
        }
    }

    Ok(())
}

fn print_outcome(outcome: &TurnOutcome, ctx: &Context) -> Result<()> {
    if ctx.json_output {
        println!("{}", serde_json::to_string_pretty(outcome)?);
    } else {
        println!("{}", outcome.message);
        if ctx.verbose {
            print_footer(outcome);
        }
    }

    match outcome.failure {
        Some(ref failure) => {
            if !ctx.json_output {
                print_error(format!("{} error: {}", failure.kind, failure.message));
            }
            anyhow::bail!("turn failed")
        }
        None => Ok(()),
    }
}

/// Session, usage, and knowledge details shown with `--verbose`.
pub(crate) fn print_footer(outcome: &TurnOutcome) {
    let dim = Style::new().dim();
    eprintln!(
        "{}",
        dim.apply_to(format!(
            "[session {} | turns {} | tokens {} in / {} out]",
            outcome.session_id,
            outcome.turn_count,
            outcome.usage.input_tokens,
            outcome.usage.output_tokens
        ))
    );
    for knowledge in &outcome.knowledge {
        eprintln!("{}", dim.apply_to(format!("  used: {}", knowledge.title)));
    }
    if outcome.summary_scheduled {
        eprintln!("{}", dim.apply_to("  summary scheduled"));
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn args(extra: &[&str]) -> AskArgs {
        use clap::Parser;

        #[derive(Parser)]
        struct Harness {
            #[command(flatten)]
            ask: AskArgs,
        }

        let argv = std::iter::once("ask")
            .chain(extra.iter().copied())
            .collect::<Vec<_>>();
        Harness::parse_from(argv).ask
    }

    #[test]
    fn test_request_carries_session_owner_and_source() {
        let request = args(&["hi", "--session", "s1", "--user", "alice", "--source", "support"])
            .request();
        assert_eq!(request.message, "hi");
        assert_eq!(request.session_id.as_deref(), Some("s1"));
        assert_eq!(request.owner_id.as_deref(), Some("alice"));
        assert_eq!(request.source(), Some("support"));
    }

    #[test]
    fn test_request_defaults() {
        let request = args(&["hello"]).request();
        assert!(request.session_id.is_none());
        assert!(request.owner_id.is_none());
        assert!(request.source().is_none());
    }
}
