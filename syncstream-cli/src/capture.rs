//! Synthetic display-capture device.
//!
//! Stands in for a platform capture API: always grants permission and
//! produces a moving gradient test pattern at a fixed cadence until the
//! stop flag is raised. Lets the demo (and any platform without real
//! capture plumbing) exercise the full sender path.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use bytes::Bytes;
use tokio::sync::oneshot;
use tracing::debug;

use syncstream_core::{
    CaptureOptions, CaptureStream, DisplayCapture, MediaStreamSource, PeerError, VideoFrame,
};

const FRAME_INTERVAL: Duration = Duration::from_millis(100);

/// Always-granted capture device producing a test pattern.
pub struct SyntheticCapture {
    width: u32,
    height: u32,
}

impl SyntheticCapture {
    pub fn new(width: u32, height: u32) -> Self {
        Self { width, height }
    }

    fn pattern_frame(&self, tick: u64) -> VideoFrame {
        let mut pixels = Vec::with_capacity((self.width * self.height * 4) as usize);
        for y in 0..self.height {
            for x in 0..self.width {
                pixels.push((x as u64 * 255 / self.width.max(1) as u64) as u8);
                pixels.push((y as u64 * 255 / self.height.max(1) as u64) as u8);
                pixels.push((tick * 16 % 256) as u8);
                pixels.push(0xff);
            }
        }
        VideoFrame::new(self.width, self.height, Bytes::from(pixels))
    }
}

#[async_trait]
impl DisplayCapture for SyntheticCapture {
    async fn request_display_capture(
        &self,
        _options: CaptureOptions,
    ) -> Result<CaptureStream, PeerError> {
        let (source, handle) = MediaStreamSource::new();
        let stop = Arc::new(AtomicBool::new(false));
        let (ended_tx, ended_rx) = oneshot::channel();

        // First frame is available immediately so a snapshot taken
        // right after connecting already has decoded content.
        source.publish(self.pattern_frame(0));

        let stop_flag = Arc::clone(&stop);
        let width = self.width;
        let height = self.height;
        let device = SyntheticCapture::new(width, height);
        tokio::spawn(async move {
            // Held so the channel only reports "ended" if this device
            // were to signal it; stopping through the flag just ends
            // frame production.
            let _ended_tx = ended_tx;
            let mut tick: u64 = 1;
            while !stop_flag.load(Ordering::SeqCst) {
                source.publish(device.pattern_frame(tick));
                tick += 1;
                tokio::time::sleep(FRAME_INTERVAL).await;
            }
            debug!("synthetic capture stopped after {tick} frames");
        });

        Ok(CaptureStream::new(handle, ended_rx, stop))
    }
}

// ── Tests ────────────────────────────────────────────────────────

#[cfg(test)]
mod tests {
    use super::*;
    use syncstream_core::capture_frame;

    #[tokio::test]
    async fn grants_a_stream_with_decoded_content() {
        let device = SyntheticCapture::new(16, 9);
        let capture = device
            .request_display_capture(CaptureOptions::default())
            .await
            .unwrap();

        let frame = capture.stream().current_frame();
        assert_eq!((frame.width, frame.height), (16, 9));
        assert!(capture_frame(&frame).is_some());
        capture.stop();
    }

    #[tokio::test]
    async fn stop_halts_frame_production() {
        let device = SyntheticCapture::new(4, 4);
        let capture = device
            .request_display_capture(CaptureOptions::default())
            .await
            .unwrap();
        capture.stop();
        assert!(capture.is_stopped());
    }
}
