//! Transport/rendezvous collaborator seam.
//!
//! The peer-to-peer transport is external; this module pins down the
//! interface the sessions program against. Notifications arrive as
//! [`TransportEvent`]s on a per-link channel; the state machine attaches
//! exactly one forwarding subscription per link and tears it down
//! inside reset.

pub mod memory;

use std::fmt;

use async_trait::async_trait;
use tokio::sync::mpsc;

use crate::code::RendezvousIdentity;
use crate::error::PeerError;
use crate::media::MediaStreamHandle;

pub use memory::MemoryRendezvous;

// ── Events ───────────────────────────────────────────────────────

/// Notifications a transport link emits toward its owner.
#[derive(Debug)]
pub enum TransportEvent {
    /// A remote peer wants to connect (sender side).
    Inbound(InboundConnection),

    /// The remote stream arrived (receiver side).
    StreamReceived(MediaStreamHandle),

    /// The remote end closed the connection.
    Closed,

    /// The transport failed; already normalized.
    Error(PeerError),
}

/// An inbound connection request, answerable exactly once with a
/// local stream.
pub struct InboundConnection {
    answer: Box<dyn FnOnce(MediaStreamHandle) + Send>,
}

impl InboundConnection {
    pub fn new(answer: impl FnOnce(MediaStreamHandle) + Send + 'static) -> Self {
        Self {
            answer: Box::new(answer),
        }
    }

    /// Answer the request with `stream`, establishing the connection.
    pub fn answer(self, stream: MediaStreamHandle) {
        (self.answer)(stream);
    }
}

impl fmt::Debug for InboundConnection {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("InboundConnection").finish_non_exhaustive()
    }
}

// ── TransportLink ────────────────────────────────────────────────

/// An active handle onto the transport: the event stream plus a close
/// control. Dropping the link closes it, so teardown is deterministic
/// whichever path releases it.
pub struct TransportLink {
    events: Option<mpsc::Receiver<TransportEvent>>,
    close: Option<Box<dyn FnOnce() + Send>>,
}

impl TransportLink {
    pub fn new(
        events: mpsc::Receiver<TransportEvent>,
        close: impl FnOnce() + Send + 'static,
    ) -> Self {
        Self {
            events: Some(events),
            close: Some(Box::new(close)),
        }
    }

    /// Take the event stream for the single live subscription.
    /// Yields `Some` exactly once.
    pub fn take_events(&mut self) -> Option<mpsc::Receiver<TransportEvent>> {
        self.events.take()
    }

    /// Destroy the link, notifying the remote end. Idempotent.
    pub fn close(&mut self) {
        if let Some(close) = self.close.take() {
            close();
        }
    }
}

impl Drop for TransportLink {
    fn drop(&mut self) {
        self.close();
    }
}

impl fmt::Debug for TransportLink {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("TransportLink")
            .field("events_taken", &self.events.is_none())
            .field("closed", &self.close.is_none())
            .finish()
    }
}

// ── Collaborator trait ───────────────────────────────────────────

/// External rendezvous transport: register under an identity and wait,
/// or dial a registered identity.
#[async_trait]
pub trait PeerTransport: Send + Sync {
    /// Register `identity` on the shared namespace and listen for
    /// inbound connection requests.
    async fn register(&self, identity: RendezvousIdentity) -> Result<TransportLink, PeerError>;

    /// Dial `target` from a fresh `local` identity. `placeholder` is the
    /// empty stream payload an outbound dial carries before a real
    /// stream exists — an opaque transport contract detail, forwarded
    /// verbatim.
    async fn dial(
        &self,
        local: RendezvousIdentity,
        target: RendezvousIdentity,
        placeholder: MediaStreamHandle,
    ) -> Result<TransportLink, PeerError>;
}
