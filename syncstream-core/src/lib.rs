//! # syncstream-core
//!
//! Core library for SyncStream: ephemeral one-to-one screen sharing
//! rendezvoused by a short human-relayed code, with snapshot-based AI
//! analysis on the viewing side.
//!
//! This crate contains:
//! - **Codes**: `ConnectionCode` and `RendezvousIdentity` generation/namespacing
//! - **Media**: `VideoFrame`, `MediaStreamHandle`, and the `DisplayCapture` seam
//! - **Capture**: `capture_frame` — still snapshots out of a live surface
//! - **Analysis**: `QueryCoordinator` and the `ScreenAnalyzer` seam
//! - **Transport**: the `PeerTransport` seam plus an in-memory rendezvous
//! - **Sessions**: sender/receiver establishment logic
//! - **Machine**: `ConnectionStateMachine` — states, transitions, reset
//! - **Error**: `PeerError` — typed, `thiserror`-based error hierarchy

pub mod analysis;
pub mod capture;
pub mod code;
pub mod error;
pub mod machine;
pub mod media;
pub mod session;
pub mod transport;

// ── Re-exports for ergonomic usage ───────────────────────────────

pub use analysis::{ExchangeState, QAInteraction, QueryCoordinator, ScreenAnalyzer};
pub use capture::{capture_frame, Snapshot};
pub use code::{ConnectionCode, RendezvousIdentity, IDENTITY_PREFIX};
pub use error::{notice, ErrorKind, PeerError};
pub use machine::{AppEvent, AppState, ConnectionStateMachine, MachineConfig};
pub use media::{
    CaptureOptions, CaptureStream, DisplayCapture, MediaStreamHandle, MediaStreamSource,
    VideoFrame,
};
pub use session::{Role, Session};
pub use transport::{
    InboundConnection, MemoryRendezvous, PeerTransport, TransportEvent, TransportLink,
};
