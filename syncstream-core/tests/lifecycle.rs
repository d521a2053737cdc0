//! Integration tests — full pairing lifecycle, the receiver's
//! three-way connect race, reset guarantees, and the analysis exchange,
//! driven over the in-memory rendezvous.

use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use async_trait::async_trait;
use bytes::Bytes;
use tokio::sync::{oneshot, Semaphore};
use tokio::time::timeout;

use syncstream_core::{
    notice, AppEvent, AppState, CaptureOptions, CaptureStream, ConnectionStateMachine,
    DisplayCapture, MachineConfig, MediaStreamSource, MemoryRendezvous, PeerError,
    PeerTransport, RendezvousIdentity, ScreenAnalyzer, Snapshot, VideoFrame,
};

// ── Test doubles ─────────────────────────────────────────────────

/// Capture collaborator that always grants a solid-color stream.
struct GrantedCapture {
    frame: VideoFrame,
    ended_tx: Mutex<Option<oneshot::Sender<()>>>,
    stop_flag: Mutex<Option<Arc<AtomicBool>>>,
}

impl GrantedCapture {
    fn new(width: u32, height: u32) -> Self {
        let pixels = vec![0x40u8; (width * height * 4) as usize];
        Self {
            frame: VideoFrame::new(width, height, Bytes::from(pixels)),
            ended_tx: Mutex::new(None),
            stop_flag: Mutex::new(None),
        }
    }

    /// Simulate the OS-level "stop sharing" action.
    fn end_capture(&self) {
        if let Some(tx) = self.ended_tx.lock().unwrap().take() {
            let _ = tx.send(());
        }
    }

    /// Whether the device was told to stop.
    fn stopped(&self) -> bool {
        self.stop_flag
            .lock()
            .unwrap()
            .as_ref()
            .is_some_and(|f| f.load(Ordering::SeqCst))
    }
}

#[async_trait]
impl DisplayCapture for GrantedCapture {
    async fn request_display_capture(
        &self,
        _options: CaptureOptions,
    ) -> Result<CaptureStream, PeerError> {
        let (source, handle) = MediaStreamSource::new();
        source.publish(self.frame.clone());

        let (ended_tx, ended_rx) = oneshot::channel();
        *self.ended_tx.lock().unwrap() = Some(ended_tx);

        let stop = Arc::new(AtomicBool::new(false));
        *self.stop_flag.lock().unwrap() = Some(Arc::clone(&stop));

        Ok(CaptureStream::new(handle, ended_rx, stop))
    }
}

/// Capture collaborator on a device without a capture API.
struct UnsupportedCapture;

#[async_trait]
impl DisplayCapture for UnsupportedCapture {
    async fn request_display_capture(
        &self,
        _options: CaptureOptions,
    ) -> Result<CaptureStream, PeerError> {
        Err(PeerError::Unsupported("no display-capture API".into()))
    }
}

/// Analyzer that returns a fixed answer immediately.
struct FixedAnalyzer(&'static str);

#[async_trait]
impl ScreenAnalyzer for FixedAnalyzer {
    async fn analyze(&self, _snapshot: &Snapshot, _question: &str) -> Result<String, PeerError> {
        Ok(self.0.to_owned())
    }
}

/// Analyzer that counts invocations and blocks until released.
struct GatedAnalyzer {
    calls: AtomicUsize,
    gate: Semaphore,
}

impl GatedAnalyzer {
    fn new() -> Self {
        Self {
            calls: AtomicUsize::new(0),
            gate: Semaphore::new(0),
        }
    }

    fn release(&self) {
        self.gate.add_permits(1);
    }

    fn calls(&self) -> usize {
        self.calls.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl ScreenAnalyzer for GatedAnalyzer {
    async fn analyze(&self, _snapshot: &Snapshot, _question: &str) -> Result<String, PeerError> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        let _permit = self
            .gate
            .acquire()
            .await
            .map_err(|_| PeerError::Analysis("gate closed".into()))?;
        Ok("gated answer".to_owned())
    }
}

// ── Helpers ──────────────────────────────────────────────────────

fn sender_machine(
    capture: Arc<dyn DisplayCapture>,
    rendezvous: &MemoryRendezvous,
) -> ConnectionStateMachine {
    ConnectionStateMachine::new(
        capture,
        Arc::new(rendezvous.clone()),
        Arc::new(FixedAnalyzer("unused")),
        MachineConfig::default(),
    )
}

fn receiver_machine(
    rendezvous: &MemoryRendezvous,
    analyzer: Arc<dyn ScreenAnalyzer>,
) -> ConnectionStateMachine {
    ConnectionStateMachine::new(
        Arc::new(UnsupportedCapture),
        Arc::new(rendezvous.clone()),
        analyzer,
        MachineConfig::default(),
    )
}

/// Drive a machine until `pred` holds. Generous deadline: under paused
/// time it must sit beyond the 10-second dial deadline.
async fn pump_until(
    machine: &mut ConnectionStateMachine,
    pred: impl Fn(&ConnectionStateMachine) -> bool,
) {
    timeout(Duration::from_secs(30), async {
        while !pred(machine) {
            assert!(machine.step().await, "machine event channel closed");
        }
    })
    .await
    .expect("machine did not reach the expected state");
}

/// Establish a full sender/receiver pairing and return both machines.
async fn connect_pair(
    capture: Arc<GrantedCapture>,
    analyzer: Arc<dyn ScreenAnalyzer>,
) -> (ConnectionStateMachine, ConnectionStateMachine) {
    let rendezvous = MemoryRendezvous::new();
    let mut sender = sender_machine(capture, &rendezvous);
    let mut receiver = receiver_machine(&rendezvous, analyzer);

    sender.handle(AppEvent::StartSender).await;
    assert_eq!(sender.state(), AppState::SenderWaiting);
    let code = sender.code().expect("sender has a code").to_string();

    receiver.handle(AppEvent::StartReceiver).await;
    receiver.handle(AppEvent::SubmitCode(code)).await;
    assert_eq!(receiver.state(), AppState::ReceiverConnecting);

    pump_until(&mut sender, |m| m.state() == AppState::SenderSharing).await;
    pump_until(&mut receiver, |m| m.state() == AppState::ReceiverViewing).await;
    (sender, receiver)
}

fn assert_fully_reset(machine: &ConnectionStateMachine) {
    assert_eq!(machine.state(), AppState::Idle);
    assert!(machine.code().is_none());
    assert!(machine.remote_stream().is_none());
    assert!(!machine.exchange().is_open());
}

// ── Pairing lifecycle ────────────────────────────────────────────

#[tokio::test]
async fn sender_and_receiver_pair_by_code() {
    let capture = Arc::new(GrantedCapture::new(8, 6));
    let (sender, receiver) =
        connect_pair(Arc::clone(&capture), Arc::new(FixedAnalyzer("unused"))).await;

    assert!(sender.state().is_connected());
    assert!(receiver.state().is_connected());
    // The viewed stream carries the sender's frames.
    let frame = receiver.remote_stream().unwrap().current_frame();
    assert_eq!((frame.width, frame.height), (8, 6));
}

#[tokio::test]
async fn declined_capture_is_silent_and_unsupported_is_not() {
    let rendezvous = MemoryRendezvous::new();
    let mut m = sender_machine(Arc::new(UnsupportedCapture), &rendezvous);

    m.handle(AppEvent::StartSender).await;
    assert_eq!(m.state(), AppState::Idle);
    assert_eq!(m.notice(), Some(notice::CAPTURE_UNSUPPORTED));
    assert_eq!(rendezvous.registered(), 0);
}

#[tokio::test]
async fn capture_ended_signal_resets_the_sender() {
    let capture = Arc::new(GrantedCapture::new(4, 4));
    let (mut sender, _receiver) =
        connect_pair(Arc::clone(&capture), Arc::new(FixedAnalyzer("unused"))).await;

    capture.end_capture();
    pump_until(&mut sender, |m| m.state() == AppState::Idle).await;
    assert_fully_reset(&sender);
    assert!(capture.stopped());
}

#[tokio::test]
async fn host_disconnect_notifies_the_viewer() {
    let capture = Arc::new(GrantedCapture::new(4, 4));
    let (mut sender, mut receiver) =
        connect_pair(capture, Arc::new(FixedAnalyzer("unused"))).await;

    sender.handle(AppEvent::Cancel).await;
    assert_fully_reset(&sender);

    pump_until(&mut receiver, |m| m.state() == AppState::Idle).await;
    assert_eq!(receiver.notice(), Some(notice::HOST_ENDED));
    assert!(receiver.remote_stream().is_none());
}

#[tokio::test]
async fn viewer_disconnect_leaves_the_sender_sharing() {
    let capture = Arc::new(GrantedCapture::new(4, 4));
    let (mut sender, mut receiver) =
        connect_pair(capture, Arc::new(FixedAnalyzer("unused"))).await;

    receiver.handle(AppEvent::Disconnect).await;
    assert_fully_reset(&receiver);

    // Single-viewer semantics: the broadcast itself keeps running
    // until the sender stops or capture ends.
    sender.handle(AppEvent::RemoteClosed).await;
    assert_eq!(sender.state(), AppState::SenderSharing);
}

// ── The receiver's three-way race ────────────────────────────────

#[tokio::test(start_paused = true)]
async fn silence_times_out_to_code_entry() {
    let rendezvous = MemoryRendezvous::new();
    // A registered peer that never answers: the dial stays silent, so
    // only the deadline can resolve the race.
    let code = syncstream_core::ConnectionCode::parse("9999").unwrap();
    let _mute_peer = rendezvous
        .register(RendezvousIdentity::namespace(&code))
        .await
        .unwrap();

    let mut receiver = receiver_machine(&rendezvous, Arc::new(FixedAnalyzer("unused")));
    receiver.handle(AppEvent::StartReceiver).await;
    receiver.handle(AppEvent::SubmitCode("9999".into())).await;
    assert_eq!(receiver.state(), AppState::ReceiverConnecting);

    pump_until(&mut receiver, |m| {
        m.state() == AppState::ReceiverEnteringCode
    })
    .await;
    assert_eq!(receiver.notice(), Some(notice::CONNECT_TIMED_OUT));
    assert!(receiver.remote_stream().is_none());
}

#[tokio::test]
async fn dial_error_returns_to_code_entry_with_message() {
    let rendezvous = MemoryRendezvous::new();
    let mut receiver = receiver_machine(&rendezvous, Arc::new(FixedAnalyzer("unused")));

    receiver.handle(AppEvent::StartReceiver).await;
    receiver.handle(AppEvent::SubmitCode("1234".into())).await;

    pump_until(&mut receiver, |m| {
        m.state() == AppState::ReceiverEnteringCode
    })
    .await;
    assert_eq!(receiver.notice(), Some(notice::CONNECT_FAILED));

    // The failed attempt left the session reusable: submitting again
    // re-dials.
    receiver.handle(AppEvent::SubmitCode("1234".into())).await;
    assert_eq!(receiver.state(), AppState::ReceiverConnecting);
}

#[tokio::test(start_paused = true)]
async fn deadline_after_success_is_a_no_op() {
    let capture = Arc::new(GrantedCapture::new(4, 4));
    let (_sender, mut receiver) =
        connect_pair(capture, Arc::new(FixedAnalyzer("unused"))).await;

    // Let the stored 10s deadline fire well after the stream arrived.
    tokio::time::sleep(Duration::from_secs(15)).await;
    while let Ok(stepped) =
        timeout(Duration::from_millis(50), receiver.step()).await
    {
        assert!(stepped);
    }

    assert_eq!(receiver.state(), AppState::ReceiverViewing);
    assert!(receiver.notice().is_none());
}

// ── Reset guarantees ─────────────────────────────────────────────

#[tokio::test]
async fn reset_clears_every_reachable_state() {
    // SenderWaiting
    let rendezvous = MemoryRendezvous::new();
    let capture = Arc::new(GrantedCapture::new(4, 4));
    let mut sender = sender_machine(Arc::clone(&capture) as Arc<dyn DisplayCapture>, &rendezvous);
    sender.handle(AppEvent::StartSender).await;
    assert_eq!(sender.state(), AppState::SenderWaiting);
    sender.handle(AppEvent::Cancel).await;
    assert_fully_reset(&sender);
    assert!(capture.stopped());
    assert_eq!(rendezvous.registered(), 0);

    // ReceiverEnteringCode
    let mut receiver = receiver_machine(&rendezvous, Arc::new(FixedAnalyzer("unused")));
    receiver.handle(AppEvent::StartReceiver).await;
    receiver.handle(AppEvent::Cancel).await;
    assert_fully_reset(&receiver);

    // SenderSharing and ReceiverViewing, including an open exchange.
    let capture = Arc::new(GrantedCapture::new(4, 4));
    let (mut sender, mut receiver) =
        connect_pair(capture, Arc::new(FixedAnalyzer("answer"))).await;
    receiver.handle(AppEvent::OpenAnalysis).await;
    assert!(receiver.exchange().is_open());

    receiver.handle(AppEvent::Cancel).await;
    assert_fully_reset(&receiver);
    sender.handle(AppEvent::Cancel).await;
    assert_fully_reset(&sender);

    // ReceiverConnecting
    let code = syncstream_core::ConnectionCode::parse("8888").unwrap();
    let _mute_peer = rendezvous
        .register(RendezvousIdentity::namespace(&code))
        .await
        .unwrap();
    let mut receiver = receiver_machine(&rendezvous, Arc::new(FixedAnalyzer("unused")));
    receiver.handle(AppEvent::StartReceiver).await;
    receiver.handle(AppEvent::SubmitCode("8888".into())).await;
    assert_eq!(receiver.state(), AppState::ReceiverConnecting);
    receiver.handle(AppEvent::Cancel).await;
    assert_fully_reset(&receiver);
}

// ── Analysis exchange over a live view ───────────────────────────

#[tokio::test]
async fn snapshot_question_answer_roundtrip() {
    let capture = Arc::new(GrantedCapture::new(8, 8));
    let (_sender, mut receiver) =
        connect_pair(capture, Arc::new(FixedAnalyzer("A login screen."))).await;

    receiver.handle(AppEvent::OpenAnalysis).await;
    assert!(receiver.exchange().is_open());

    receiver
        .handle(AppEvent::AskQuestion("what is this?".into()))
        .await;
    pump_until(&mut receiver, |m| m.exchange().interaction().is_some()).await;

    let interaction = receiver.exchange().interaction().unwrap();
    assert_eq!(interaction.question, "what is this?");
    assert_eq!(interaction.answer, "A login screen.");

    // A second ask before reset-question is ignored.
    receiver
        .handle(AppEvent::AskQuestion("another?".into()))
        .await;
    assert_eq!(
        receiver.exchange().interaction().unwrap().question,
        "what is this?"
    );

    // After reset-question, a follow-up runs against the same snapshot.
    receiver.handle(AppEvent::ResetQuestion).await;
    receiver
        .handle(AppEvent::AskQuestion("and now?".into()))
        .await;
    pump_until(&mut receiver, |m| m.exchange().interaction().is_some()).await;
    assert_eq!(
        receiver.exchange().interaction().unwrap().question,
        "and now?"
    );
}

#[tokio::test]
async fn ask_while_analyzing_invokes_the_collaborator_once() {
    let capture = Arc::new(GrantedCapture::new(8, 8));
    let analyzer = Arc::new(GatedAnalyzer::new());
    let (_sender, mut receiver) =
        connect_pair(capture, Arc::clone(&analyzer) as Arc<dyn ScreenAnalyzer>).await;

    receiver.handle(AppEvent::OpenAnalysis).await;
    receiver.handle(AppEvent::AskQuestion("first".into())).await;
    assert!(receiver.exchange().is_analyzing());

    // Second ask while the first is still in flight: guard, not queue.
    receiver
        .handle(AppEvent::AskQuestion("second".into()))
        .await;
    assert!(receiver.exchange().is_analyzing());

    analyzer.release();
    pump_until(&mut receiver, |m| m.exchange().interaction().is_some()).await;
    assert_eq!(
        receiver.exchange().interaction().unwrap().question,
        "first"
    );
    assert_eq!(analyzer.calls(), 1);
}

#[tokio::test]
async fn analysis_completing_after_close_is_discarded() {
    let capture = Arc::new(GrantedCapture::new(8, 8));
    let analyzer = Arc::new(GatedAnalyzer::new());
    let (_sender, mut receiver) =
        connect_pair(capture, Arc::clone(&analyzer) as Arc<dyn ScreenAnalyzer>).await;

    receiver.handle(AppEvent::OpenAnalysis).await;
    receiver.handle(AppEvent::AskQuestion("q".into())).await;
    receiver.handle(AppEvent::CloseAnalysis).await;
    assert!(!receiver.exchange().is_open());

    // Even if a result were to land now, the exchange stays closed.
    analyzer.release();
    while let Ok(stepped) =
        timeout(Duration::from_millis(100), receiver.step()).await
    {
        assert!(stepped);
    }
    assert!(!receiver.exchange().is_open());
    assert_eq!(receiver.state(), AppState::ReceiverViewing);
}
