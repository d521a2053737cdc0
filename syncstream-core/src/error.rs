//! Domain-specific error types for SyncStream.
//!
//! Every external-collaborator failure is normalized into a [`PeerError`]
//! at its call site before it can influence session state. All fallible
//! operations return `Result<T, PeerError>`; no panics on invalid input.

use std::time::Duration;

use thiserror::Error;

/// The canonical error type wrapping any collaborator failure.
#[derive(Debug, Clone, Error, PartialEq, Eq)]
pub enum PeerError {
    /// The user declined the display-capture permission prompt.
    ///
    /// Recovery is silent: back to idle with no visible message.
    #[error("display capture was declined")]
    Permission,

    /// The display-capture API is absent or unsupported on this device.
    #[error("display capture unsupported: {0}")]
    Unsupported(String),

    /// Registration, dial, or an established connection failed.
    #[error("transport error: {0}")]
    Transport(String),

    /// No response within the connect deadline.
    #[error("timed out after {0:?}")]
    Timeout(Duration),

    /// The AI-analysis collaborator failed. Never fatal; surfaced as a
    /// fallback answer inside the exchange.
    #[error("analysis failed: {0}")]
    Analysis(String),
}

/// Discriminant-only view of [`PeerError`] for dispatching on the
/// recovery policy without caring about payloads.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ErrorKind {
    Permission,
    Unsupported,
    Transport,
    Timeout,
    Analysis,
}

impl PeerError {
    /// The taxonomy kind of this error.
    pub fn kind(&self) -> ErrorKind {
        match self {
            Self::Permission => ErrorKind::Permission,
            Self::Unsupported(_) => ErrorKind::Unsupported,
            Self::Transport(_) => ErrorKind::Transport,
            Self::Timeout(_) => ErrorKind::Timeout,
            Self::Analysis(_) => ErrorKind::Analysis,
        }
    }
}

// ── User-visible notices ─────────────────────────────────────────

/// Fixed user-facing strings for every recoverable failure path.
///
/// Owned by the core so every surface shows identical wording.
pub mod notice {
    /// Capture API missing — shown on return to idle.
    pub const CAPTURE_UNSUPPORTED: &str = "Screen capture is not supported on this device.";

    /// Sender-side transport failure — shown on return to idle.
    pub const SENDER_FAILED: &str = "Connection error; please restart sharing.";

    /// Receiver dial failed — shown on return to code entry.
    pub const CONNECT_FAILED: &str = "Could not connect; check the code and try again.";

    /// Receiver dial exceeded the deadline — shown on return to code entry.
    pub const CONNECT_TIMED_OUT: &str = "Connection timed out.";

    /// The sender closed the connection while we were viewing.
    pub const HOST_ENDED: &str = "Host ended the session.";

    /// Analysis collaborator failed — placed in the answer slot.
    pub const ANALYSIS_FALLBACK: &str = "Could not analyze the screen right now; try again.";
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn error_display_messages() {
        let e = PeerError::Unsupported("no capture API".into());
        assert!(e.to_string().contains("no capture API"));

        let e = PeerError::Timeout(Duration::from_secs(10));
        assert!(e.to_string().contains("10"));
    }

    #[test]
    fn kind_matches_variant() {
        assert_eq!(PeerError::Permission.kind(), ErrorKind::Permission);
        assert_eq!(
            PeerError::Transport("x".into()).kind(),
            ErrorKind::Transport
        );
        assert_eq!(
            PeerError::Timeout(Duration::from_secs(1)).kind(),
            ErrorKind::Timeout
        );
    }
}
