//! Media stream model and the display-capture collaborator seam.
//!
//! Streams are opaque references: a [`MediaStreamHandle`] is the read
//! side of a `watch` channel of decoded frames, and a
//! [`MediaStreamSource`] is the write side held by whatever produces
//! them. The actual acquisition mechanics live behind the
//! [`DisplayCapture`] trait.

use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::Arc;

use async_trait::async_trait;
use bytes::Bytes;
use tokio::sync::{oneshot, watch};

use crate::error::PeerError;

// ── VideoFrame ───────────────────────────────────────────────────

/// One decoded video frame: tightly packed RGBA8 pixels.
///
/// A default frame is 0×0 — "no decoded content yet".
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct VideoFrame {
    pub width: u32,
    pub height: u32,
    pub pixels: Bytes,
}

impl VideoFrame {
    pub fn new(width: u32, height: u32, pixels: Bytes) -> Self {
        Self {
            width,
            height,
            pixels,
        }
    }

    /// `true` when the frame has no decoded content.
    pub fn is_empty(&self) -> bool {
        self.width == 0 || self.height == 0
    }
}

// ── MediaStreamHandle / MediaStreamSource ────────────────────────

static NEXT_STREAM_ID: AtomicU64 = AtomicU64::new(1);

/// Cloneable read handle onto a live media stream.
///
/// Reading never blocks: [`current_frame`](Self::current_frame) returns
/// whatever was most recently published.
#[derive(Debug, Clone)]
pub struct MediaStreamHandle {
    id: u64,
    frames: watch::Receiver<VideoFrame>,
}

impl MediaStreamHandle {
    pub fn id(&self) -> u64 {
        self.id
    }

    /// The most recently decoded frame.
    pub fn current_frame(&self) -> VideoFrame {
        self.frames.borrow().clone()
    }

    /// A stream with no producer and no content.
    ///
    /// Used as the placeholder payload an outbound dial carries before a
    /// real stream exists — an opaque transport contract detail.
    pub fn placeholder() -> Self {
        let (_, handle) = MediaStreamSource::new();
        handle
    }
}

/// Write side of a media stream, held by the producing device.
#[derive(Debug)]
pub struct MediaStreamSource {
    frames: watch::Sender<VideoFrame>,
}

impl MediaStreamSource {
    /// Create a stream pair. The handle starts with an empty frame.
    pub fn new() -> (Self, MediaStreamHandle) {
        let (tx, rx) = watch::channel(VideoFrame::default());
        let handle = MediaStreamHandle {
            id: NEXT_STREAM_ID.fetch_add(1, Ordering::Relaxed),
            frames: rx,
        };
        (Self { frames: tx }, handle)
    }

    /// Publish the next decoded frame to every handle.
    pub fn publish(&self, frame: VideoFrame) {
        let _ = self.frames.send(frame);
    }
}

// ── Capture collaborator ─────────────────────────────────────────

/// Options forwarded to the display-capture collaborator.
#[derive(Debug, Clone)]
pub struct CaptureOptions {
    /// Include the pointer in the captured surface.
    pub show_cursor: bool,
    /// Capture system audio alongside video.
    pub with_audio: bool,
}

impl Default for CaptureOptions {
    fn default() -> Self {
        Self {
            show_cursor: true,
            with_audio: false,
        }
    }
}

/// A granted display capture: the live stream plus its control surface.
#[derive(Debug)]
pub struct CaptureStream {
    stream: MediaStreamHandle,
    /// Fires once if capture ends through an external signal (the
    /// OS-level "stop sharing" action). Taken by the session that
    /// consumes it.
    ended: Option<oneshot::Receiver<()>>,
    /// Raised to tell the device to stop producing frames.
    stop: Arc<AtomicBool>,
}

impl CaptureStream {
    pub fn new(
        stream: MediaStreamHandle,
        ended: oneshot::Receiver<()>,
        stop: Arc<AtomicBool>,
    ) -> Self {
        Self {
            stream,
            ended: Some(ended),
            stop,
        }
    }

    pub fn stream(&self) -> &MediaStreamHandle {
        &self.stream
    }

    /// Take the external-end notification. Yields `Some` exactly once.
    pub fn take_ended(&mut self) -> Option<oneshot::Receiver<()>> {
        self.ended.take()
    }

    /// Signal the capture device to stop.
    pub fn stop(&self) {
        self.stop.store(true, Ordering::SeqCst);
    }

    /// Whether the device has been told to stop.
    pub fn is_stopped(&self) -> bool {
        self.stop.load(Ordering::SeqCst)
    }
}

/// External collaborator that acquires a display-capture stream.
///
/// May suspend indefinitely on a user permission dialog. Failure modes
/// are normalized: [`PeerError::Permission`] when the user declines,
/// [`PeerError::Unsupported`] when the capture API is absent.
#[async_trait]
pub trait DisplayCapture: Send + Sync {
    async fn request_display_capture(
        &self,
        options: CaptureOptions,
    ) -> Result<CaptureStream, PeerError>;
}

// ── Tests ────────────────────────────────────────────────────────
