//! Role-specific session establishment.
//!
//! A [`Session`] is the transient bundle backing one sender–receiver
//! pairing attempt: role, code, stream references, the active transport
//! link, and the forwarding subscriptions. At most one is alive per app
//! instance; it is created on role selection and destroyed only through
//! the state machine's reset path.

pub mod receiver;
pub mod sender;

use tokio::sync::mpsc;
use tokio::task::JoinHandle;

use crate::code::ConnectionCode;
use crate::machine::AppEvent;
use crate::media::{CaptureStream, MediaStreamHandle};
use crate::transport::{TransportEvent, TransportLink};

/// Which side of the pairing this instance is.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Role {
    Sender,
    Receiver,
}

/// The transient per-pairing state bundle.
#[derive(Debug)]
pub struct Session {
    pub role: Role,
    /// Generated (sender) or entered (receiver) code.
    pub code: Option<ConnectionCode>,
    /// The held capture stream — sender only.
    pub local_stream: Option<MediaStreamHandle>,
    /// The viewed stream — receiver only.
    pub remote_stream: Option<MediaStreamHandle>,
    /// Capture control surface — sender only.
    pub capture: Option<CaptureStream>,
    /// The active transport handle.
    pub link: Option<TransportLink>,
    /// Forwarding tasks: transport subscription, capture-ended watcher,
    /// dial deadline. All aborted on teardown.
    pub subscriptions: Vec<JoinHandle<()>>,
}

impl Session {
    fn new(role: Role) -> Self {
        Self {
            role,
            code: None,
            local_stream: None,
            remote_stream: None,
            capture: None,
            link: None,
            subscriptions: Vec::new(),
        }
    }

    /// Release everything this session holds: stop the capture device,
    /// abort every subscription, close the transport link, drop the
    /// stream references.
    pub fn teardown(mut self) {
        if let Some(capture) = self.capture.take() {
            capture.stop();
        }
        for task in self.subscriptions.drain(..) {
            task.abort();
        }
        if let Some(mut link) = self.link.take() {
            link.close();
        }
    }

    /// Tear down only the current dial attempt, keeping the session (and
    /// its role) alive for another code entry.
    pub fn clear_attempt(&mut self) {
        for task in self.subscriptions.drain(..) {
            task.abort();
        }
        if let Some(mut link) = self.link.take() {
            link.close();
        }
        self.remote_stream = None;
    }
}

/// Attach the single live subscription for a link: a task that maps
/// transport notifications into the machine's input path.
pub(crate) fn spawn_link_subscription(
    mut events: mpsc::Receiver<TransportEvent>,
    machine: mpsc::Sender<AppEvent>,
) -> JoinHandle<()> {
    tokio::spawn(async move {
        while let Some(event) = events.recv().await {
            let mapped = match event {
                TransportEvent::Inbound(request) => AppEvent::InboundConnection(request),
                TransportEvent::StreamReceived(stream) => AppEvent::StreamReceived(stream),
                TransportEvent::Closed => AppEvent::RemoteClosed,
                TransportEvent::Error(e) => AppEvent::TransportFailed(e),
            };
            if machine.send(mapped).await.is_err() {
                break;
            }
        }
    })
}
