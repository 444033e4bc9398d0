//! REPL (Read-Eval-Print Loop) implementation for interactive chat.

use std::io::Write;

use anyhow::Result;
use console::{Style, Term, style};
use futures::StreamExt;
use rustyline::error::ReadlineError;
use rustyline::history::DefaultHistory;
use rustyline::{Config, Editor};
use tokio_util::sync::CancellationToken;

use concierge_domain::{SearchMode, TurnEvent, TurnOptions, TurnRequest};
use concierge_memory::Role;

use crate::bootstrap::App;

use super::ask::print_footer;
use super::truncate;

/// Outcome of a slash command.
enum ControlFlow {
    Continue,
    Exit,
}

/// REPL state and configuration.
pub struct Repl {
    app: App,
    session_id: Option<String>,
    owner_id: Option<String>,
    source: Option<String>,
    editor: Editor<(), DefaultHistory>,
    term: Term,
    verbose: bool,
}

impl Repl {
    /// Create a new REPL instance.
    pub fn new(
        app: App,
        session_id: Option<String>,
        owner_id: Option<String>,
        source: Option<String>,
        verbose: bool,
    ) -> Result<Self> {
        let config = Config::builder()
            .history_ignore_space(true)
            .auto_add_history(true)
            .build();

        let editor = Editor::with_config(config)?;

        Ok(Self {
            app,
            session_id,
            owner_id,
            source,
            editor,
            term: Term::stdout(),
            verbose,
        })
    }

    /// Run the REPL loop.
    pub async fn run(&mut self) -> Result<()> {
        self.print_welcome();

        loop {
            let prompt = self.format_prompt();

            match self.editor.readline(&prompt) {
                Ok(line) => {
                    let line = line.trim();

                    if line.is_empty() {
                        continue;
                    }

                    if line.starts_with('/') {
                        match self.handle_slash_command(line).await {
                            Ok(ControlFlow::Continue) => continue,
                            Ok(ControlFlow::Exit) => break,
                            Err(e) => {
                                self.print_error(&format!("Command error: {}", e));
                                continue;
                            }
                        }
                    }

                    if let Err(e) = self.send_message(line).await {
                        self.print_error(&format!("Error: {}", e));
                    }
                }
                Err(ReadlineError::Interrupted) => {
                    println!();
                    self.print_dim("(Interrupted - type /quit to exit)");
                    continue;
                }
                Err(ReadlineError::Eof) => {
                    println!();
                    break;
                }
                Err(e) => {
                    self.print_error(&format!("Input error: {}", e));
                    break;
                }
            }
        }

        self.print_dim("Goodbye!");
        Ok(())
    }

    fn request(&self, message: &str) -> TurnRequest {
        let mut request = TurnRequest::new(message);
        if let Some(ref session) = self.session_id {
            request = request.with_session(session);
        }
        if let Some(ref owner) = self.owner_id {
            request = request.with_owner(owner);
        }
        if let Some(ref source) = self.source {
            request = request.with_source(source);
        }
        request
    }

    /// Send a message and stream the response. Ctrl+C cancels the reply.
    async fn send_message(&mut self, message: &str) -> Result<()> {
        let cancel = CancellationToken::new();
        let options = TurnOptions::default().with_cancellation(cancel.clone());
        let mut stream = self
            .app
            .services
            .chat()
            .stream(self.request(message), options)
            .await?;

        loop {
            let event = tokio::select! {
                event = stream.next() => event,
                _ = tokio::signal::ctrl_c() => {
                    cancel.cancel();
                    continue;
                }
            };
            let Some(event) = event else { break };

            match event {
                TurnEvent::Started { session_id } => {
                    self.session_id = Some(session_id);
                }
                TurnEvent::Delta { text } => {
                    print!("{}", text);
                    std::io::stdout().flush()?;
                }
                TurnEvent::Completed { outcome } => {
                    println!();
                    if self.verbose {
                        print_footer(&outcome);
                    }
                    println!();
                }
                TurnEvent::Failed {
                    kind,
                    message,
                    partial,
                    fallback,
                } => {
                    if !partial.is_empty() {
                        println!();
                    }
                    println!("{}", fallback);
                    self.print_error(&format!("{} error: {}", kind, message));
                    println!();
                }
            }
        }

        Ok(())
    }

    /// Handle a slash command.
    async fn handle_slash_command(&mut self, input: &str) -> Result<ControlFlow> {
        let parts: Vec<&str> = input[1..].split_whitespace().collect();
        let cmd = parts.first().copied().unwrap_or("");
        let args = parts.get(1..).unwrap_or_default();

        match cmd {
            "quit" | "q" | "exit" => {
                return Ok(ControlFlow::Exit);
            }
            "help" | "h" | "?" => {
                self.print_help();
            }
            "clear" | "cls" => {
                self.term.clear_screen()?;
            }
            "new" => {
                self.session_id = None;
                self.print_dim("Started new session");
            }
            "session" => {
                if let Some(ref id) = self.session_id {
                    println!("Current session: {}", id);
                } else {
                    self.print_dim("No active session (will create on first message)");
                }
            }
            "history" => {
                let limit = args.first().and_then(|n| n.parse().ok()).unwrap_or(10);
                self.show_history(limit)?;
            }
            "search" if !args.is_empty() => {
                let query = args.join(" ");
                self.search_knowledge(&query).await?;
            }
            "" => {
                self.print_dim("Type /help for available commands");
            }
            _ => {
                self.print_error(&format!("Unknown command: /{}", cmd));
                self.print_dim("Type /help for available commands");
            }
        }

        Ok(ControlFlow::Continue)
    }

    fn show_history(&self, limit: usize) -> Result<()> {
        let Some(ref session_id) = self.session_id else {
            self.print_dim("No active session");
            return Ok(());
        };

        let dim = Style::new().dim();
        let turns = self.app.services.sessions().history(session_id, limit, 0)?;
        if turns.is_empty() {
            self.print_dim("No turns yet");
        }
        for turn in turns {
            let who = match turn.role {
                Role::User => style("you").green(),
                Role::Assistant => style("assistant").cyan(),
                Role::System => style("system").dim(),
            };
            println!(
                "{} {} {}",
                dim.apply_to(turn.created_at.format("%H:%M:%S")),
                who,
                truncate(&turn.content, 100)
            );
        }
        Ok(())
    }

    async fn search_knowledge(&self, query: &str) -> Result<()> {
        let dim = Style::new().dim();
        println!("Searching: {}", dim.apply_to(query));

        let limit = self.app.services.config().retrieval_limit;
        match self
            .app
            .services
            .retrieval()
            .search(query, limit, SearchMode::Hybrid)
            .await
        {
            Ok(hits) if hits.is_empty() => self.print_dim("No results found"),
            Ok(hits) => {
                for (i, hit) in hits.iter().enumerate() {
                    println!(
                        "{}. {} {}",
                        i + 1,
                        hit.entry.title,
                        dim.apply_to(format!("({} {:.3})", hit.matched_by, hit.score))
                    );
                }
            }
            Err(e) => {
                self.print_error(&format!("Search failed: {}", e));
            }
        }

        Ok(())
    }

    fn print_welcome(&self) {
        let dim = Style::new().dim();
        println!();
        println!("{}", style("Concierge Chat").bold().cyan());
        println!("{}", dim.apply_to("─".repeat(40)));
        println!(
            "{}",
            dim.apply_to("Type your message and press Enter to chat.")
        );
        println!(
            "{}",
            dim.apply_to("Use /help for commands, Ctrl+D to exit.")
        );
        println!();
    }

    fn print_help(&self) {
        let dim = Style::new().dim();
        println!();
        println!("{}", style("Available Commands").bold());
        println!("{}", dim.apply_to("─".repeat(40)));
        println!("  {}  - Exit the REPL", style("/quit, /q").cyan());
        println!("  {}  - Show this help", style("/help, /h, /?").cyan());
        println!("  {}  - Clear the screen", style("/clear").cyan());
        println!("  {}  - Start a new session", style("/new").cyan());
        println!("  {}  - Show current session ID", style("/session").cyan());
        println!("  {}  - Show recent turns", style("/history [n]").cyan());
        println!("  {}  - Search knowledge", style("/search <query>").cyan());
        println!();
        println!("{}", dim.apply_to("Keyboard shortcuts:"));
        println!("  {} - Cancel the current reply", dim.apply_to("Ctrl+C"));
        println!("  {} - Exit the REPL", dim.apply_to("Ctrl+D"));
        println!();
    }

    fn format_prompt(&self) -> String {
        match self.session_id {
            Some(ref id) => format!("[{}] > ", id.chars().take(8).collect::<String>()),
            None => "> ".to_string(),
        }
    }

    fn print_dim(&self, message: &str) {
        let dim = Style::new().dim();
        println!("{}", dim.apply_to(message));
    }

    fn print_error(&self, message: &str) {
        let red = Style::new().red();
        eprintln!("{}", red.apply_to(message));
    }
}
