//! CLI command handlers.

pub mod ask;
pub mod calc;
pub mod chat;
pub mod config;
pub mod knowledge;
pub mod repl;
pub mod search;
pub mod sessions;

use anyhow::Result;
use concierge_config::{ConciergeConfig, ConfigSource};

use crate::bootstrap::App;

/// Shared context for all commands.
#[derive(Debug, Clone)]
pub struct Context {
    /// Effective configuration after layering.
    pub config: ConciergeConfig,
    /// Files considered while loading `config`.
    pub sources: Vec<ConfigSource>,
    /// Output as JSON for scripting.
    pub json_output: bool,
    /// Verbose output enabled.
    pub verbose: bool,
}

impl Context {
    /// Open stores and build services from the loaded configuration.
    pub async fn open_app(&self) -> Result<App> {
        App::open(self.config.clone()).await
    }
}

/// Shorten `s` to at most `max` characters, marking the cut with "...".
pub(crate) fn truncate(s: &str, max: usize) -> String {
    let single_line = s.replace('\n', " ");
    if single_line.chars().count() <= max {
        return single_line;
    }
    let kept: String = single_line.chars().take(max.saturating_sub(3)).collect();
    format!("{}...", kept)
}

/// Print a red `Error:` line to stderr.
pub(crate) fn print_error(message: impl std::fmt::Display) {
    let red = console::Style::new().red();
    eprintln!("{} {}", red.apply_to("Error:"), message);
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_truncate_short_text_unchanged() {
        assert_eq!(truncate("hello", 10), "hello");
    }

    #[test]
    fn test_truncate_counts_characters() {
        assert_eq!(truncate("退货政策说明", 5), "退货...");
        assert_eq!(truncate("line one\nline two", 40), "line one line two");
    }
}
