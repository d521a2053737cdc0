//! One question/answer exchange against a snapshot.
//!
//! [`QueryCoordinator`] models the exchange lifecycle:
//!
//! ```text
//!  Idle ──open──► AwaitingQuestion ──ask──► Analyzing ──complete──► Answered
//!   ▲                    ▲                                             │
//!   │                    └────────────── reset_question ───────────────┘
//!   └───────────────────────── close (from any state) ─────────────────┘
//! ```
//!
//! The coordinator holds pure state; the machine performs the actual
//! collaborator call and feeds the outcome back through
//! [`complete`](QueryCoordinator::complete). An epoch tag guards every
//! completion so a result that lands after `close` (or after a newer
//! exchange began) is discarded, never applied.

use std::time::SystemTime;

use async_trait::async_trait;

use crate::capture::Snapshot;
use crate::error::{notice, PeerError};

// ── Collaborator seam ────────────────────────────────────────────

/// External AI-analysis collaborator. Treated as slow and unreliable;
/// failures surface as a fixed fallback answer, never as raw errors.
#[async_trait]
pub trait ScreenAnalyzer: Send + Sync {
    async fn analyze(&self, snapshot: &Snapshot, question: &str) -> Result<String, PeerError>;
}

// ── Exchange data ────────────────────────────────────────────────

/// A completed question/answer pair. At most one is retained — there is
/// no history list.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct QAInteraction {
    pub question: String,
    pub answer: String,
    pub asked_at: SystemTime,
}

/// Lifecycle state of the exchange.
#[derive(Debug)]
pub enum ExchangeState {
    /// No exchange open.
    Idle,

    /// A snapshot is held; waiting for the user's question.
    AwaitingQuestion { snapshot: Snapshot },

    /// Exactly one collaborator call in flight.
    Analyzing {
        snapshot: Snapshot,
        question: String,
        asked_at: SystemTime,
    },

    /// The last exchange, retained until the next ask or close.
    Answered {
        snapshot: Snapshot,
        interaction: QAInteraction,
    },
}

/// What the caller must now run against the collaborator.
#[derive(Debug, Clone)]
pub struct PendingAnalysis {
    pub snapshot: Snapshot,
    pub question: String,
    pub epoch: u64,
}

// ── QueryCoordinator ─────────────────────────────────────────────

/// Owns the snapshot→question→answer exchange layered on a live view.
#[derive(Debug)]
pub struct QueryCoordinator {
    state: ExchangeState,
    epoch: u64,
}

impl QueryCoordinator {
    pub fn new() -> Self {
        Self {
            state: ExchangeState::Idle,
            epoch: 0,
        }
    }

    pub fn state(&self) -> &ExchangeState {
        &self.state
    }

    pub fn is_open(&self) -> bool {
        !matches!(self.state, ExchangeState::Idle)
    }

    pub fn is_analyzing(&self) -> bool {
        matches!(self.state, ExchangeState::Analyzing { .. })
    }

    /// The completed interaction, if the exchange is answered.
    pub fn interaction(&self) -> Option<&QAInteraction> {
        match &self.state {
            ExchangeState::Answered { interaction, .. } => Some(interaction),
            _ => None,
        }
    }

    /// Open an exchange over `snapshot`, discarding any prior
    /// question/answer. Valid from idle or answered; otherwise a no-op.
    pub fn open(&mut self, snapshot: Snapshot) {
        match self.state {
            ExchangeState::Idle | ExchangeState::Answered { .. } => {
                self.state = ExchangeState::AwaitingQuestion { snapshot };
            }
            _ => tracing::debug!("open ignored: exchange busy"),
        }
    }

    /// Accept a question and move to analyzing.
    ///
    /// Returns the work the caller must run, or `None` when the ask is a
    /// no-op: blank question, no open exchange, or an exchange already
    /// analyzing (guard, not a queue — exactly one call in flight).
    pub fn begin_ask(&mut self, question: &str) -> Option<PendingAnalysis> {
        let question = question.trim();
        if question.is_empty() {
            return None;
        }
        match &self.state {
            ExchangeState::AwaitingQuestion { snapshot } => {
                let snapshot = snapshot.clone();
                self.epoch += 1;
                self.state = ExchangeState::Analyzing {
                    snapshot: snapshot.clone(),
                    question: question.to_owned(),
                    asked_at: SystemTime::now(),
                };
                Some(PendingAnalysis {
                    snapshot,
                    question: question.to_owned(),
                    epoch: self.epoch,
                })
            }
            ExchangeState::Analyzing { .. } => {
                tracing::debug!("ask ignored: analysis already in flight");
                None
            }
            _ => None,
        }
    }

    /// Apply a collaborator outcome.
    ///
    /// Ignored unless the exchange is still analyzing under the same
    /// epoch — a completion arriving after `close` or after a newer ask
    /// is stale and must be discarded. Failures become the fixed
    /// fallback answer. Returns whether the outcome was applied.
    pub fn complete(&mut self, epoch: u64, outcome: Result<String, PeerError>) -> bool {
        if epoch != self.epoch || !self.is_analyzing() {
            tracing::debug!("discarding stale analysis result (epoch {epoch})");
            return false;
        }
        let ExchangeState::Analyzing {
            snapshot,
            question,
            asked_at,
        } = std::mem::replace(&mut self.state, ExchangeState::Idle)
        else {
            return false;
        };

        let answer = match outcome {
            Ok(text) => text,
            Err(e) => {
                tracing::warn!("analysis failed: {e}");
                notice::ANALYSIS_FALLBACK.to_owned()
            }
        };
        self.state = ExchangeState::Answered {
            snapshot,
            interaction: QAInteraction {
                question,
                answer,
                asked_at,
            },
        };
        true
    }

    /// Discard only the answer, enabling a follow-up question against
    /// the same snapshot. Valid from answered; otherwise a no-op.
    pub fn reset_question(&mut self) {
        if matches!(self.state, ExchangeState::Answered { .. }) {
            if let ExchangeState::Answered { snapshot, .. } =
                std::mem::replace(&mut self.state, ExchangeState::Idle)
            {
                self.state = ExchangeState::AwaitingQuestion { snapshot };
            }
        }
    }

    /// Close the exchange from any state, discarding snapshot, question,
    /// and answer. Bumps the epoch so any in-flight completion is stale.
    pub fn close(&mut self) {
        self.epoch += 1;
        self.state = ExchangeState::Idle;
    }
}

impl Default for QueryCoordinator {
    fn default() -> Self {
        Self::new()
    }
}

// ── Tests ────────────────────────────────────────────────────────
