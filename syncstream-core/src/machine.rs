//! Top-level connection state machine.
//!
//! Owns the one live [`AppState`], the optional [`Session`], the last
//! user-visible notice, and the analysis exchange. Every input — user
//! action, transport notification, timer — arrives as an [`AppEvent`]
//! on one channel and is processed to completion before the next is
//! taken, so no two transitions ever interleave.
//!
//! The transition function is total: an event that is not valid for the
//! current state is a logged no-op, never an error. Reset is the single
//! teardown choke point and is idempotent.

use std::fmt;
use std::sync::Arc;
use std::time::Duration;

use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tracing::{debug, info, warn};

use crate::analysis::{QueryCoordinator, ScreenAnalyzer};
use crate::capture;
use crate::code::ConnectionCode;
use crate::error::{notice, ErrorKind, PeerError};
use crate::media::{DisplayCapture, MediaStreamHandle};
use crate::session::{receiver, sender, Role, Session};
use crate::transport::{InboundConnection, PeerTransport};

// ── AppState ─────────────────────────────────────────────────────

/// The application's lifecycle state. Exactly one value is live at any
/// time, owned exclusively by [`ConnectionStateMachine`].
///
/// ```text
///            ┌── start-as-sender ──► SenderWaiting ──► SenderSharing
///  Idle ─────┤                            │                 │
///    ▲       └── start-as-receiver ──► ReceiverEnteringCode │
///    │                                    │    ▲            │
///    │                              submit│    │timeout/err │
///    │                                    ▼    │            │
///    │                             ReceiverConnecting       │
///    │                                    │stream           │
///    │                                    ▼                 │
///    └──────── reset (any state) ── ReceiverViewing ────────┘
/// ```
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum AppState {
    /// Role selection. Initial state; every state can reach it.
    #[default]
    Idle,

    /// Sender holds a capture stream and waits for one viewer.
    SenderWaiting,

    /// Sender answered an inbound connection and is broadcasting.
    SenderSharing,

    /// Receiver is entering the 4-digit code.
    ReceiverEnteringCode,

    /// Outbound dial in flight, bounded by the connect deadline.
    ReceiverConnecting,

    /// Receiver is viewing the remote stream.
    ReceiverViewing,
}

impl fmt::Display for AppState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            Self::Idle => "Idle",
            Self::SenderWaiting => "SenderWaiting",
            Self::SenderSharing => "SenderSharing",
            Self::ReceiverEnteringCode => "ReceiverEnteringCode",
            Self::ReceiverConnecting => "ReceiverConnecting",
            Self::ReceiverViewing => "ReceiverViewing",
        };
        f.write_str(name)
    }
}

impl AppState {
    pub fn is_idle(&self) -> bool {
        matches!(self, Self::Idle)
    }

    /// `true` once a peer connection is established, on either side.
    pub fn is_connected(&self) -> bool {
        matches!(self, Self::SenderSharing | Self::ReceiverViewing)
    }
}

// ── AppEvent ─────────────────────────────────────────────────────

/// Every input the machine consumes, user-facing and internal alike.
#[derive(Debug)]
pub enum AppEvent {
    // ── User triggers (surface owned elsewhere) ──────────────
    StartSender,
    StartReceiver,
    SubmitCode(String),
    Cancel,
    Disconnect,
    OpenAnalysis,
    AskQuestion(String),
    CloseAnalysis,
    ResetQuestion,

    // ── Collaborator notifications ───────────────────────────
    /// A remote peer wants to connect (sender side).
    InboundConnection(InboundConnection),
    /// The remote stream arrived (receiver side).
    StreamReceived(MediaStreamHandle),
    /// A transport failure, already normalized.
    TransportFailed(PeerError),
    /// The remote end closed the connection.
    RemoteClosed,
    /// The capture stream ended through an external signal.
    CaptureEnded,
    /// The dial deadline elapsed. Stale once `epoch` is superseded.
    ConnectDeadline { epoch: u64 },
    /// The analysis collaborator finished. Stale once `epoch` is
    /// superseded.
    AnalysisDone {
        epoch: u64,
        outcome: Result<String, PeerError>,
    },
}

// ── MachineConfig ────────────────────────────────────────────────

/// Tunables for the state machine.
#[derive(Debug, Clone)]
pub struct MachineConfig {
    /// Hard upper bound on how long a dial may sit in
    /// `ReceiverConnecting` without a user-visible resolution.
    pub connect_timeout: Duration,
}

impl Default for MachineConfig {
    fn default() -> Self {
        Self {
            connect_timeout: Duration::from_secs(10),
        }
    }
}

// ── ConnectionStateMachine ───────────────────────────────────────

const EVENT_CAPACITY: usize = 64;

/// The single owner of all connection-lifecycle state.
pub struct ConnectionStateMachine {
    state: AppState,
    session: Option<Session>,
    notice: Option<String>,
    exchange: QueryCoordinator,
    /// In-flight analysis call, aborted when the exchange closes.
    analysis_task: Option<JoinHandle<()>>,
    /// Monotone per-dial tag; deadline events carry the epoch they were
    /// armed under so late timers are recognizably stale.
    dial_epoch: u64,
    config: MachineConfig,

    capture: Arc<dyn DisplayCapture>,
    transport: Arc<dyn PeerTransport>,
    analyzer: Arc<dyn ScreenAnalyzer>,

    events_tx: mpsc::Sender<AppEvent>,
    events_rx: mpsc::Receiver<AppEvent>,
}

impl ConnectionStateMachine {
    pub fn new(
        capture: Arc<dyn DisplayCapture>,
        transport: Arc<dyn PeerTransport>,
        analyzer: Arc<dyn ScreenAnalyzer>,
        config: MachineConfig,
    ) -> Self {
        let (events_tx, events_rx) = mpsc::channel(EVENT_CAPACITY);
        Self {
            state: AppState::Idle,
            session: None,
            notice: None,
            exchange: QueryCoordinator::new(),
            analysis_task: None,
            dial_epoch: 0,
            config,
            capture,
            transport,
            analyzer,
            events_tx,
            events_rx,
        }
    }

    // ── Observers ────────────────────────────────────────────

    pub fn state(&self) -> AppState {
        self.state
    }

    /// The last user-visible notice, if any.
    pub fn notice(&self) -> Option<&str> {
        self.notice.as_deref()
    }

    /// The generated (sender) or entered (receiver) code.
    pub fn code(&self) -> Option<&ConnectionCode> {
        self.session.as_ref().and_then(|s| s.code.as_ref())
    }

    /// The remote stream being viewed, if any.
    pub fn remote_stream(&self) -> Option<&MediaStreamHandle> {
        self.session.as_ref().and_then(|s| s.remote_stream.as_ref())
    }

    pub fn exchange(&self) -> &QueryCoordinator {
        &self.exchange
    }

    /// A sender for feeding events into the machine's input path.
    pub fn events(&self) -> mpsc::Sender<AppEvent> {
        self.events_tx.clone()
    }

    // ── Driving ──────────────────────────────────────────────

    /// Receive and process exactly one event. Returns `false` once
    /// every event sender is gone.
    pub async fn step(&mut self) -> bool {
        match self.events_rx.recv().await {
            Some(event) => {
                self.handle(event).await;
                true
            }
            None => false,
        }
    }

    /// Drain events until every sender is gone.
    pub async fn run(mut self) {
        while self.step().await {}
    }

    /// Process one event to completion.
    ///
    /// Total over (state, event): invalid combinations are logged
    /// no-ops.
    pub async fn handle(&mut self, event: AppEvent) {
        match event {
            AppEvent::StartSender => self.on_start_sender().await,
            AppEvent::StartReceiver => self.on_start_receiver(),
            AppEvent::SubmitCode(input) => self.on_submit_code(input).await,
            AppEvent::Cancel | AppEvent::Disconnect => self.reset(),
            AppEvent::OpenAnalysis => self.on_open_analysis(),
            AppEvent::AskQuestion(question) => self.on_ask(question),
            AppEvent::CloseAnalysis => self.close_exchange(),
            AppEvent::ResetQuestion => self.exchange.reset_question(),
            AppEvent::InboundConnection(request) => self.on_inbound(request),
            AppEvent::StreamReceived(stream) => self.on_stream_received(stream),
            AppEvent::TransportFailed(e) => self.on_transport_failed(e),
            AppEvent::RemoteClosed => self.on_remote_closed(),
            AppEvent::CaptureEnded => self.on_capture_ended(),
            AppEvent::ConnectDeadline { epoch } => self.on_connect_deadline(epoch),
            AppEvent::AnalysisDone { epoch, outcome } => self.on_analysis_done(epoch, outcome),
        }
    }

    // ── Role activation ──────────────────────────────────────

    async fn on_start_sender(&mut self) {
        if !self.state.is_idle() {
            return self.ignored("start-as-sender");
        }
        self.notice = None;

        let capture = Arc::clone(&self.capture);
        let transport = Arc::clone(&self.transport);
        match sender::activate(capture.as_ref(), transport.as_ref(), &self.events_tx).await {
            Ok(session) => {
                if let Some(code) = &session.code {
                    info!("sharing under code {code}");
                }
                self.session = Some(session);
                self.transition(AppState::SenderWaiting);
            }
            Err(e) => match e.kind() {
                // Declining the permission prompt is a choice, not a
                // failure: return to idle with no message.
                ErrorKind::Permission => debug!("capture declined; staying idle"),
                ErrorKind::Unsupported => {
                    warn!("cannot share: {e}");
                    self.notice = Some(notice::CAPTURE_UNSUPPORTED.to_owned());
                }
                _ => {
                    warn!("sender activation failed: {e}");
                    self.notice = Some(notice::SENDER_FAILED.to_owned());
                }
            },
        }
    }

    fn on_start_receiver(&mut self) {
        if !self.state.is_idle() {
            return self.ignored("start-as-receiver");
        }
        self.notice = None;
        self.session = Some(receiver::begin());
        self.transition(AppState::ReceiverEnteringCode);
    }

    async fn on_submit_code(&mut self, input: String) {
        if !matches!(self.state, AppState::ReceiverEnteringCode) {
            return self.ignored("submit-code");
        }
        // The surface should prevent invalid submission; re-check
        // defensively and treat the submit itself as a no-op.
        let Some(code) = ConnectionCode::parse(&input) else {
            debug!("submit ignored: not a 4-digit code");
            return;
        };
        let Some(session) = self.session.as_mut() else {
            return;
        };

        self.notice = None;
        self.dial_epoch += 1;
        let dialed = receiver::dial(
            self.transport.as_ref(),
            session,
            code,
            &self.events_tx,
            self.dial_epoch,
            self.config.connect_timeout,
        )
        .await;

        match dialed {
            Ok(()) => self.transition(AppState::ReceiverConnecting),
            Err(e) => {
                warn!("dial failed: {e}");
                session.clear_attempt();
                self.notice = Some(notice::CONNECT_FAILED.to_owned());
            }
        }
    }

    // ── Connection progress ──────────────────────────────────

    fn on_inbound(&mut self, request: InboundConnection) {
        if !matches!(self.state, AppState::SenderWaiting) {
            // Includes a second concurrent viewer while sharing:
            // single-viewer semantics, the request is dropped.
            return self.ignored("inbound connection");
        }
        let answered = match self.session.as_ref() {
            Some(session) => sender::answer_inbound(session, request),
            None => false,
        };
        if answered {
            self.transition(AppState::SenderSharing);
        }
    }

    fn on_stream_received(&mut self, stream: MediaStreamHandle) {
        if !matches!(self.state, AppState::ReceiverConnecting) {
            return self.ignored("remote stream");
        }
        if let Some(session) = self.session.as_mut() {
            session.remote_stream = Some(stream);
        }
        self.notice = None;
        self.transition(AppState::ReceiverViewing);
    }

    fn on_transport_failed(&mut self, e: PeerError) {
        match self.state {
            AppState::ReceiverConnecting | AppState::ReceiverViewing => {
                warn!("transport failed: {e}");
                self.fail_attempt(notice::CONNECT_FAILED);
            }
            AppState::SenderWaiting | AppState::SenderSharing => {
                warn!("transport failed: {e}");
                self.reset();
                self.notice = Some(notice::SENDER_FAILED.to_owned());
            }
            _ => self.ignored("transport failure"),
        }
    }

    fn on_remote_closed(&mut self) {
        match self.state {
            AppState::ReceiverViewing => {
                info!("host ended the session");
                self.reset();
                self.notice = Some(notice::HOST_ENDED.to_owned());
            }
            AppState::ReceiverConnecting => {
                self.fail_attempt(notice::CONNECT_FAILED);
            }
            // A departing viewer does not stop the broadcast.
            _ => self.ignored("remote close"),
        }
    }

    fn on_capture_ended(&mut self) {
        let is_sender = self
            .session
            .as_ref()
            .is_some_and(|s| s.role == Role::Sender);
        if is_sender {
            info!("capture ended externally; resetting");
            self.reset();
        } else {
            self.ignored("capture ended");
        }
    }

    fn on_connect_deadline(&mut self, epoch: u64) {
        // Re-validate against the sole source of truth: the race may
        // already have been decided, or a newer dial may be in flight.
        if !matches!(self.state, AppState::ReceiverConnecting) || epoch != self.dial_epoch {
            return self.ignored("stale connect deadline");
        }
        info!("connect deadline elapsed");
        self.fail_attempt(notice::CONNECT_TIMED_OUT);
    }

    /// Abandon the current dial/view and fall back to code entry with a
    /// visible notice.
    fn fail_attempt(&mut self, message: &str) {
        self.close_exchange();
        if let Some(session) = self.session.as_mut() {
            session.clear_attempt();
        }
        self.transition(AppState::ReceiverEnteringCode);
        self.notice = Some(message.to_owned());
    }

    // ── Analysis exchange ────────────────────────────────────

    fn on_open_analysis(&mut self) {
        if !matches!(self.state, AppState::ReceiverViewing) {
            return self.ignored("open-analysis");
        }
        let frame = self
            .session
            .as_ref()
            .and_then(|s| s.remote_stream.as_ref())
            .map(|s| s.current_frame());
        match frame.as_ref().and_then(capture::capture_frame) {
            Some(snapshot) => self.exchange.open(snapshot),
            None => debug!("open-analysis ignored: no decoded content yet"),
        }
    }

    fn on_ask(&mut self, question: String) {
        let Some(pending) = self.exchange.begin_ask(&question) else {
            return;
        };
        let analyzer = Arc::clone(&self.analyzer);
        let events = self.events_tx.clone();
        self.analysis_task = Some(tokio::spawn(async move {
            let outcome = analyzer
                .analyze(&pending.snapshot, &pending.question)
                .await;
            let _ = events
                .send(AppEvent::AnalysisDone {
                    epoch: pending.epoch,
                    outcome,
                })
                .await;
        }));
    }

    fn on_analysis_done(&mut self, epoch: u64, outcome: Result<String, PeerError>) {
        self.analysis_task = None;
        self.exchange.complete(epoch, outcome);
    }

    fn close_exchange(&mut self) {
        if let Some(task) = self.analysis_task.take() {
            task.abort();
        }
        self.exchange.close();
    }

    // ── Reset ────────────────────────────────────────────────

    /// The universal teardown path. Regardless of originating state:
    /// stops the held capture device, destroys the transport handle,
    /// clears stream references and the code, clears the notice, closes
    /// any open analysis exchange — then the state becomes idle.
    /// Idempotent: from idle this is an observable no-op.
    pub fn reset(&mut self) {
        if let Some(session) = self.session.take() {
            session.teardown();
        }
        self.notice = None;
        self.close_exchange();
        if !self.state.is_idle() {
            self.transition(AppState::Idle);
        }
    }

    // ── Internals ────────────────────────────────────────────

    fn transition(&mut self, to: AppState) {
        debug!("state {} -> {to}", self.state);
        self.state = to;
    }

    fn ignored(&self, what: &str) {
        debug!("{what} is a no-op in state {}", self.state);
    }
}

impl fmt::Debug for ConnectionStateMachine {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ConnectionStateMachine")
            .field("state", &self.state)
            .field("notice", &self.notice)
            .field("dial_epoch", &self.dial_epoch)
            .finish_non_exhaustive()
    }
}

// ── Tests ────────────────────────────────────────────────────────

#[cfg(test)]
mod tests {
    use super::*;
    use crate::transport::MemoryRendezvous;
    use async_trait::async_trait;
    use crate::capture::Snapshot;
    use crate::media::{CaptureOptions, CaptureStream};

    struct DeniedCapture;

    #[async_trait]
    impl DisplayCapture for DeniedCapture {
        async fn request_display_capture(
            &self,
            _options: CaptureOptions,
        ) -> Result<CaptureStream, PeerError> {
            Err(PeerError::Permission)
        }
    }

    struct EchoAnalyzer;

    #[async_trait]
    impl ScreenAnalyzer for EchoAnalyzer {
        async fn analyze(
            &self,
            _snapshot: &Snapshot,
            question: &str,
        ) -> Result<String, PeerError> {
            Ok(question.to_owned())
        }
    }

    fn machine() -> ConnectionStateMachine {
        ConnectionStateMachine::new(
            Arc::new(DeniedCapture),
            Arc::new(MemoryRendezvous::new()),
            Arc::new(EchoAnalyzer),
            MachineConfig::default(),
        )
    }

    #[tokio::test]
    async fn events_invalid_for_idle_are_no_ops() {
        let mut m = machine();
        m.handle(AppEvent::SubmitCode("1234".into())).await;
        m.handle(AppEvent::StreamReceived(MediaStreamHandle::placeholder()))
            .await;
        m.handle(AppEvent::RemoteClosed).await;
        m.handle(AppEvent::CaptureEnded).await;
        m.handle(AppEvent::ConnectDeadline { epoch: 7 }).await;
        m.handle(AppEvent::OpenAnalysis).await;
        m.handle(AppEvent::AskQuestion("q".into())).await;

        assert_eq!(m.state(), AppState::Idle);
        assert!(m.notice().is_none());
        assert!(m.code().is_none());
    }

    #[tokio::test]
    async fn declined_capture_recovers_silently() {
        let mut m = machine();
        m.handle(AppEvent::StartSender).await;
        assert_eq!(m.state(), AppState::Idle);
        assert!(m.notice().is_none());
    }

    #[tokio::test]
    async fn reset_from_idle_is_idempotent() {
        let mut m = machine();
        m.reset();
        m.reset();
        assert_eq!(m.state(), AppState::Idle);
        assert!(m.notice().is_none());
        assert!(m.code().is_none());
        assert!(!m.exchange().is_open());
    }

    #[tokio::test]
    async fn invalid_code_submission_is_a_no_op() {
        let mut m = machine();
        m.handle(AppEvent::StartReceiver).await;
        assert_eq!(m.state(), AppState::ReceiverEnteringCode);

        for bad in ["", "12", "12345", "abcd", "12 4"] {
            m.handle(AppEvent::SubmitCode(bad.into())).await;
            assert_eq!(m.state(), AppState::ReceiverEnteringCode);
            assert!(m.notice().is_none());
        }
    }

    #[tokio::test]
    async fn dialing_unknown_code_falls_back_to_code_entry() {
        let mut m = machine();
        m.handle(AppEvent::StartReceiver).await;
        m.handle(AppEvent::SubmitCode("9999".into())).await;
        assert_eq!(m.state(), AppState::ReceiverConnecting);

        // The memory transport reports the missing peer on the link;
        // drive the machine until the failure lands.
        while m.state() == AppState::ReceiverConnecting {
            assert!(m.step().await);
        }
        assert_eq!(m.state(), AppState::ReceiverEnteringCode);
        assert_eq!(m.notice(), Some(notice::CONNECT_FAILED));
    }

    #[tokio::test]
    async fn stale_deadline_changes_nothing() {
        let mut m = machine();
        m.handle(AppEvent::StartReceiver).await;
        m.handle(AppEvent::SubmitCode("9999".into())).await;
        let armed_epoch = m.dial_epoch;
        while m.state() == AppState::ReceiverConnecting {
            assert!(m.step().await);
        }
        let notice_before = m.notice().map(str::to_owned);

        m.handle(AppEvent::ConnectDeadline { epoch: armed_epoch })
            .await;
        assert_eq!(m.state(), AppState::ReceiverEnteringCode);
        assert_eq!(m.notice().map(str::to_owned), notice_before);
    }
}
