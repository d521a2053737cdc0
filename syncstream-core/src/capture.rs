//! Frame capture bridge: still images out of a live stream.
//!
//! [`capture_frame`] reads whatever a surface currently shows and turns
//! it into an embeddable PNG payload. Pure with respect to session
//! state and idempotent — repeated calls independently reflect the
//! frame on screen at call time.

use bytes::Bytes;
use image::codecs::png::PngEncoder;
use image::{ExtendedColorType, ImageEncoder};

use crate::media::VideoFrame;

// ── Snapshot ─────────────────────────────────────────────────────

/// An immutable still image captured at a point in time.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Snapshot {
    width: u32,
    height: u32,
    png: Bytes,
}

impl Snapshot {
    pub fn width(&self) -> u32 {
        self.width
    }

    pub fn height(&self) -> u32 {
        self.height
    }

    /// The encoded PNG payload.
    pub fn png_bytes(&self) -> &Bytes {
        &self.png
    }
}

// ── capture_frame ────────────────────────────────────────────────

/// Capture the currently decoded frame of a surface as a [`Snapshot`].
///
/// Returns `None` when the surface has no decoded content yet (zero
/// width or height) or when the pixel buffer does not match the
/// declared dimensions.
pub fn capture_frame(frame: &VideoFrame) -> Option<Snapshot> {
    if frame.is_empty() {
        return None;
    }
    let expected = frame.width as usize * frame.height as usize * 4;
    if frame.pixels.len() != expected {
        return None;
    }

    let mut png = Vec::new();
    PngEncoder::new(&mut png)
        .write_image(
            &frame.pixels,
            frame.width,
            frame.height,
            ExtendedColorType::Rgba8,
        )
        .ok()?;

    Some(Snapshot {
        width: frame.width,
        height: frame.height,
        png: Bytes::from(png),
    })
}

// ── Tests ────────────────────────────────────────────────────────

#[cfg(test)]
mod tests {
    use super::*;

    fn solid_frame(width: u32, height: u32) -> VideoFrame {
        let pixels = vec![0x7fu8; (width * height * 4) as usize];
        VideoFrame::new(width, height, Bytes::from(pixels))
    }

    #[test]
    fn empty_surface_yields_none() {
        assert!(capture_frame(&VideoFrame::default()).is_none());
        assert!(capture_frame(&solid_frame(0, 4)).is_none());
        assert!(capture_frame(&solid_frame(4, 0)).is_none());
    }

    #[test]
    fn nonzero_surface_yields_png_payload() {
        let snapshot = capture_frame(&solid_frame(4, 2)).unwrap();
        assert_eq!(snapshot.width(), 4);
        assert_eq!(snapshot.height(), 2);
        assert!(!snapshot.png_bytes().is_empty());
        // PNG signature
        assert_eq!(&snapshot.png_bytes()[..4], &[0x89, b'P', b'N', b'G']);
    }

    #[test]
    fn mismatched_buffer_yields_none() {
        let frame = VideoFrame::new(4, 4, Bytes::from(vec![0u8; 7]));
        assert!(capture_frame(&frame).is_none());
    }

    #[test]
    fn capture_is_idempotent() {
        let frame = solid_frame(3, 3);
        assert_eq!(capture_frame(&frame), capture_frame(&frame));
    }
}
