//! Sender-side session establishment.
//!
//! Activation acquires the display capture, generates the code,
//! registers its namespaced identity with the transport, and wires the
//! notifications the machine reacts to. The first inbound connection
//! request is unconditionally answered with the held capture stream.
//!
//! Single-viewer semantics only: how a second concurrent inbound
//! request behaves is transport-dependent and deliberately out of
//! scope.

use tokio::sync::mpsc;
use tracing::{debug, info};

use crate::code::{ConnectionCode, RendezvousIdentity};
use crate::error::PeerError;
use crate::machine::AppEvent;
use crate::media::{CaptureOptions, DisplayCapture};
use crate::session::{spawn_link_subscription, Role, Session};
use crate::transport::{InboundConnection, PeerTransport};

/// Activate the sender role.
///
/// On success the returned session holds the capture stream, the
/// generated code, and the registered link, ready to wait for one
/// viewer. On failure everything acquired so far is released; the
/// caller maps the error kind onto the recovery policy (permission →
/// silent, anything else → visible message).
pub(crate) async fn activate(
    capture: &dyn DisplayCapture,
    transport: &dyn PeerTransport,
    machine: &mpsc::Sender<AppEvent>,
) -> Result<Session, PeerError> {
    let mut capture_stream = capture
        .request_display_capture(CaptureOptions::default())
        .await?;

    let code = ConnectionCode::generate();
    let identity = RendezvousIdentity::namespace(&code);

    let mut link = match transport.register(identity.clone()).await {
        Ok(link) => link,
        Err(e) => {
            capture_stream.stop();
            return Err(e);
        }
    };
    info!("sender registered as {identity}");

    let mut session = Session::new(Role::Sender);

    if let Some(events) = link.take_events() {
        session
            .subscriptions
            .push(spawn_link_subscription(events, machine.clone()));
    }

    // The OS-level "stop sharing" action ends the track out from under
    // us; route it into the machine as a capture-ended trigger.
    if let Some(ended) = capture_stream.take_ended() {
        let machine = machine.clone();
        session.subscriptions.push(tokio::spawn(async move {
            if ended.await.is_ok() {
                let _ = machine.send(AppEvent::CaptureEnded).await;
            }
        }));
    }

    session.local_stream = Some(capture_stream.stream().clone());
    session.capture = Some(capture_stream);
    session.code = Some(code);
    session.link = Some(link);
    Ok(session)
}

/// Answer an inbound connection request with the held capture stream.
///
/// Returns `false` when the session holds no stream to answer with (the
/// request is dropped).
pub(crate) fn answer_inbound(session: &Session, request: InboundConnection) -> bool {
    match &session.local_stream {
        Some(stream) => {
            debug!("answering inbound connection with stream {}", stream.id());
            request.answer(stream.clone());
            true
        }
        None => {
            debug!("inbound connection dropped: no local stream held");
            false
        }
    }
}
