//! Per-turn state machine.
//!
//! ```text
//! Received → HistoryLoaded → ContextAssembled → Generating → Persisted → SummaryCheck → Done
//!     └──────────────┴────────────────┴──────────────┴────────────┴──────────────┴──→ Error
//! ```
//!
//! `Done` and `Error` are terminal.

use serde::{Deserialize, Serialize};
use tracing::trace;

use crate::error::{DomainError, ErrorKind, Result};

/// Where a conversation turn is in its lifecycle.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum TurnState {
    Received,
    HistoryLoaded,
    ContextAssembled,
    Generating,
    Persisted,
    SummaryCheck,
    Done,
    Error,
}

impl TurnState {
    /// True for `Done` and `Error`.
    pub fn is_terminal(self) -> bool {
        matches!(self, TurnState::Done | TurnState::Error)
    }

    /// The state that follows on success.
    pub fn successor(self) -> Option<TurnState> {
        match self {
            TurnState::Received => Some(TurnState::HistoryLoaded),
            TurnState::HistoryLoaded => Some(TurnState::ContextAssembled),
            TurnState::ContextAssembled => Some(TurnState::Generating),
            TurnState::Generating => Some(TurnState::Persisted),
            TurnState::Persisted => Some(TurnState::SummaryCheck),
            TurnState::SummaryCheck => Some(TurnState::Done),
            TurnState::Done | TurnState::Error => None,
        }
    }

    /// Whether `self → to` is a legal transition.
    pub fn can_transition_to(self, to: TurnState) -> bool {
        if self.is_terminal() {
            return false;
        }
        to == TurnState::Error || self.successor() == Some(to)
    }
}

/// Why a turn ended in `Error` after the user's message was accepted.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TurnFailure {
    pub kind: ErrorKind,
    pub message: String,
}

/// Tracks one turn's progress and rejects illegal transitions.
#[derive(Debug, Clone)]
pub struct TurnMachine {
    session_id: String,
    state: TurnState,
    trail: Vec<TurnState>,
}

impl TurnMachine {
    pub fn new(session_id: impl Into<String>) -> Self {
        Self {
            session_id: session_id.into(),
            state: TurnState::Received,
            trail: vec![TurnState::Received],
        }
    }

    pub fn state(&self) -> TurnState {
        self.state
    }

    /// Every state visited so far, in order.
    pub fn trail(&self) -> &[TurnState] {
        &self.trail
    }

    /// Move to `to`, which must be the successor or `Error`.
    pub fn advance(&mut self, to: TurnState) -> Result<()> {
        if !self.state.can_transition_to(to) {
            return Err(DomainError::Internal(format!(
                "illegal turn transition {:?} -> {:?}",
                self.state, to
            )));
        }
        trace!(session_id = %self.session_id, from = ?self.state, to = ?to, "Turn transition");
        self.state = to;
        self.trail.push(to);
        Ok(())
    }

    /// Move to `Error` unless already terminal.
    pub fn fail(&mut self) {
        if !self.state.is_terminal() {
            trace!(session_id = %self.session_id, from = ?self.state, "Turn failed");
            self.state = TurnState::Error;
            self.trail.push(TurnState::Error);
        }
    }
}
