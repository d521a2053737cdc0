//! Single-process rendezvous transport.
//!
//! Pairs peers through a shared registry map, delivering the same event
//! sequences a networked transport would: inbound requests, answered
//! streams, close notifications, and dial errors. Backs the integration
//! tests and the demo binary.

use std::collections::HashMap;
use std::sync::{Arc, Mutex};

use async_trait::async_trait;
use tokio::sync::mpsc;

use crate::code::RendezvousIdentity;
use crate::error::PeerError;
use crate::media::MediaStreamHandle;
use crate::transport::{InboundConnection, PeerTransport, TransportEvent, TransportLink};

const LINK_EVENT_CAPACITY: usize = 16;

type EventTx = mpsc::Sender<TransportEvent>;

/// Slot holding the counterpart's event sender once two links pair up.
type RemoteSlot = Arc<Mutex<Option<EventTx>>>;

struct PeerEntry {
    events: EventTx,
    remote: RemoteSlot,
}

/// In-memory rendezvous: every identity registered on the same instance
/// is dialable from that instance.
#[derive(Clone, Default)]
pub struct MemoryRendezvous {
    peers: Arc<Mutex<HashMap<RendezvousIdentity, PeerEntry>>>,
}

impl MemoryRendezvous {
    pub fn new() -> Self {
        Self::default()
    }

    /// Number of currently registered identities.
    pub fn registered(&self) -> usize {
        self.peers.lock().expect("registry poisoned").len()
    }
}

fn notify_closed(remote: &RemoteSlot) {
    if let Some(peer) = remote.lock().expect("slot poisoned").take() {
        let _ = peer.try_send(TransportEvent::Closed);
    }
}

#[async_trait]
impl PeerTransport for MemoryRendezvous {
    async fn register(&self, identity: RendezvousIdentity) -> Result<TransportLink, PeerError> {
        let (tx, rx) = mpsc::channel(LINK_EVENT_CAPACITY);
        let remote: RemoteSlot = Arc::new(Mutex::new(None));

        {
            let mut peers = self.peers.lock().expect("registry poisoned");
            if peers.contains_key(&identity) {
                return Err(PeerError::Transport(format!(
                    "identity {identity} is already registered"
                )));
            }
            peers.insert(
                identity.clone(),
                PeerEntry {
                    events: tx,
                    remote: Arc::clone(&remote),
                },
            );
        }

        let peers = Arc::clone(&self.peers);
        Ok(TransportLink::new(rx, move || {
            peers.lock().expect("registry poisoned").remove(&identity);
            notify_closed(&remote);
        }))
    }

    async fn dial(
        &self,
        _local: RendezvousIdentity,
        target: RendezvousIdentity,
        _placeholder: MediaStreamHandle,
    ) -> Result<TransportLink, PeerError> {
        let (tx, rx) = mpsc::channel(LINK_EVENT_CAPACITY);
        let remote: RemoteSlot = Arc::new(Mutex::new(None));

        let entry = {
            let peers = self.peers.lock().expect("registry poisoned");
            peers
                .get(&target)
                .map(|e| (e.events.clone(), Arc::clone(&e.remote)))
        };

        match entry {
            Some((callee_tx, callee_remote)) => {
                // Answering wires both remote slots so a later close on
                // either side reaches the other.
                let dialer_tx = tx.clone();
                let dialer_remote = Arc::clone(&remote);
                let callee_tx_for_pair = callee_tx.clone();
                let request = InboundConnection::new(move |stream| {
                    *callee_remote.lock().expect("slot poisoned") = Some(dialer_tx.clone());
                    *dialer_remote.lock().expect("slot poisoned") = Some(callee_tx_for_pair);
                    let _ = dialer_tx.try_send(TransportEvent::StreamReceived(stream));
                });
                let _ = callee_tx.try_send(TransportEvent::Inbound(request));
            }
            None => {
                let _ = tx.try_send(TransportEvent::Error(PeerError::Transport(format!(
                    "no peer registered as {target}"
                ))));
            }
        }

        Ok(TransportLink::new(rx, move || {
            notify_closed(&remote);
        }))
    }
}

// ── Tests ────────────────────────────────────────────────────────
