//! Receiver-side session establishment.
//!
//! A dial races three mutually exclusive outcomes: the remote stream
//! arrives, the transport reports an explicit error, or the deadline
//! elapses. All three resolve through the machine's single input path;
//! the deadline event carries the dial epoch so a late timer firing
//! after the race was already decided is a no-op.

use std::time::Duration;

use tokio::sync::mpsc;
use tracing::info;

use crate::code::{ConnectionCode, RendezvousIdentity};
use crate::error::PeerError;
use crate::machine::AppEvent;
use crate::media::MediaStreamHandle;
use crate::session::{spawn_link_subscription, Role, Session};
use crate::transport::PeerTransport;

/// Begin the receiver role: an empty session awaiting a code.
pub(crate) fn begin() -> Session {
    Session::new(Role::Receiver)
}

/// Dial the sender registered under `code`.
///
/// Creates a fresh ephemeral identity, issues the outbound request with
/// an empty placeholder stream, and starts the deadline timer tagged
/// with `epoch`. The link subscription and the timer are installed into
/// `session`; outcomes arrive as machine events.
pub(crate) async fn dial(
    transport: &dyn PeerTransport,
    session: &mut Session,
    code: ConnectionCode,
    machine: &mpsc::Sender<AppEvent>,
    epoch: u64,
    deadline: Duration,
) -> Result<(), PeerError> {
    let local = RendezvousIdentity::ephemeral();
    let target = RendezvousIdentity::namespace(&code);

    let mut link = transport
        .dial(local, target.clone(), MediaStreamHandle::placeholder())
        .await?;
    info!("dialing {target}");

    if let Some(events) = link.take_events() {
        session
            .subscriptions
            .push(spawn_link_subscription(events, machine.clone()));
    }

    let timer = machine.clone();
    session.subscriptions.push(tokio::spawn(async move {
        tokio::time::sleep(deadline).await;
        let _ = timer.send(AppEvent::ConnectDeadline { epoch }).await;
    }));

    session.code = Some(code);
    session.link = Some(link);
    Ok(())
}
