//! Thumbnail generation for images and videos.
//!
//! Images are decoded and downscaled directly. Videos are probed for their
//! duration, one frame is pulled from the middle (capped at ten seconds in)
//! and that frame is downscaled the same way. Every preview is a JPEG no
//! taller than the configured height.

use crate::error::StoreError;
use crate::media_tool::{MediaTool, MediaToolError};
use image::imageops::FilterType;
use image::{DynamicImage, ImageFormat};
use std::io::Cursor;
use std::path::Path;
use std::sync::Arc;
use std::time::Instant;
use thiserror::Error;
use tracing::{debug, instrument, warn};
use uuid::Uuid;

/// Latest point in a video a preview frame is taken from, in seconds.
pub const MAX_CAPTURE_SECONDS: f64 = 10.0;

#[derive(Debug, Error)]
pub enum PreviewError {
    #[error("no preview for mime type {0}")]
    Unsupported(String),

    #[error("failed to decode or encode image: {0}")]
    Image(#[from] image::ImageError),

    #[error(transparent)]
    Tool(#[from] MediaToolError),

    #[error("preview task failed: {0}")]
    Task(#[from] tokio::task::JoinError),
}

impl From<PreviewError> for StoreError {
    fn from(err: PreviewError) -> Self {
        match err {
            PreviewError::Task(e) => StoreError::Task(e),
            _ => StoreError::UnsupportedMime,
        }
    }
}

/// Instant to grab a video frame at, given its probed duration.
pub fn capture_instant(duration: Option<f64>) -> f64 {
    match duration {
        Some(seconds) if seconds.is_finite() && seconds > 0.0 => {
            (seconds / 2.0).min(MAX_CAPTURE_SECONDS)
        }
        _ => 0.0,
    }
}

/// Scale to `height` keeping the aspect ratio, never enlarging, and encode
/// as JPEG.
pub fn downscale(bytes: &[u8], height: u32) -> Result<Vec<u8>, PreviewError> {
    let image = image::load_from_memory(bytes)?;

    let image = if image.height() > height {
        let ratio = f64::from(height) / f64::from(image.height());
        let width = ((f64::from(image.width()) * ratio).round() as u32).max(1);
        image.resize_exact(width, height, FilterType::Triangle)
    } else {
        image
    };

    // JPEG has no alpha channel.
    let rgb = DynamicImage::ImageRgb8(image.to_rgb8());
    let mut buf = Cursor::new(Vec::new());
    rgb.write_to(&mut buf, ImageFormat::Jpeg)?;
    Ok(buf.into_inner())
}

pub struct PreviewGenerator {
    height: u32,
    tool: Arc<dyn MediaTool>,
}

impl PreviewGenerator {
    pub fn new(height: u32, tool: Arc<dyn MediaTool>) -> Self {
        Self { height, tool }
    }

    /// Build a preview for content `id`. `source` is the already-written
    /// primary blob, read by the media tools for videos.
    #[instrument(skip(self, bytes, source), fields(size = bytes.len()))]
    pub async fn generate(
        &self,
        id: Uuid,
        bytes: &[u8],
        mime: &str,
        source: &Path,
    ) -> Result<Vec<u8>, PreviewError> {
        let started = Instant::now();

        let still = if mime.starts_with("image/") {
            bytes.to_vec()
        } else if mime.starts_with("video/") {
            let duration = self.tool.probe_duration(source).await?;
            let at = capture_instant(duration);
            debug!(?duration, at, "Extracting video frame");
            self.tool.extract_frame(source, at).await?
        } else {
            warn!(mime, "No preview available for mime type");
            return Err(PreviewError::Unsupported(mime.to_string()));
        };

        let height = self.height;
        let preview = tokio::task::spawn_blocking(move || downscale(&still, height)).await??;

        metrics::histogram!("store.preview.duration_seconds")
            .record(started.elapsed().as_secs_f64());
        debug!(preview_size = preview.len(), "Preview generated");

        Ok(preview)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::media_tool::MockMediaTool;
    use image::{GenericImageView, Rgba, RgbaImage};

    fn png(width: u32, height: u32) -> Vec<u8> {
        let img = RgbaImage::from_pixel(width, height, Rgba([200, 40, 40, 128]));
        let mut buf = Cursor::new(Vec::new());
        img.write_to(&mut buf, ImageFormat::Png).unwrap();
        buf.into_inner()
    }

    fn dimensions(jpeg: &[u8]) -> (u32, u32) {
        assert_eq!(image::guess_format(jpeg).unwrap(), ImageFormat::Jpeg);
        image::load_from_memory(jpeg).unwrap().dimensions()
    }

    #[test]
    fn test_capture_instant() {
        assert_eq!(capture_instant(Some(4.0)), 2.0);
        assert_eq!(capture_instant(Some(600.0)), MAX_CAPTURE_SECONDS);
        assert_eq!(capture_instant(None), 0.0);
        assert_eq!(capture_instant(Some(f64::NAN)), 0.0);
    }

    #[test]
    fn test_downscale_keeps_aspect() {
        assert_eq!(dimensions(&downscale(&png(400, 200), 100).unwrap()), (200, 100));
    }

    #[test]
    fn test_downscale_never_enlarges() {
        assert_eq!(dimensions(&downscale(&png(40, 20), 100).unwrap()), (40, 20));
    }

    #[test]
    fn test_downscale_rejects_garbage() {
        assert!(matches!(downscale(b"not an image", 100), Err(PreviewError::Image(_))));
    }

    #[tokio::test]
    async fn test_image_preview_skips_media_tools() {
        let mut tool = MockMediaTool::new();
        tool.expect_probe_duration().never();
        tool.expect_extract_frame().never();

        let generator = PreviewGenerator::new(50, Arc::new(tool));
        let preview = generator
            .generate(Uuid::now_v7(), &png(100, 100), "image/png", Path::new("unused"))
            .await
            .unwrap();
        assert_eq!(dimensions(&preview), (50, 50));
    }

    #[tokio::test]
    async fn test_video_preview_uses_capped_midpoint() {
        let frame = png(320, 180);
        let mut tool = MockMediaTool::new();
        tool.expect_probe_duration()
            .times(1)
            .returning(|_| Ok(Some(120.0)));
        tool.expect_extract_frame()
            .withf(|_, at| *at == MAX_CAPTURE_SECONDS)
            .times(1)
            .returning(move |_, _| Ok(frame.clone()));

        let generator = PreviewGenerator::new(90, Arc::new(tool));
        let preview = generator
            .generate(Uuid::now_v7(), b"video bytes", "video/mp4", Path::new("blobs/clip"))
            .await
            .unwrap();
        assert_eq!(dimensions(&preview), (160, 90));
    }

    #[tokio::test]
    async fn test_video_without_duration_captures_first_frame() {
        let frame = png(16, 16);
        let mut tool = MockMediaTool::new();
        tool.expect_probe_duration().returning(|_| Ok(None));
        tool.expect_extract_frame()
            .withf(|_, at| *at == 0.0)
            .returning(move |_, _| Ok(frame.clone()));

        let generator = PreviewGenerator::new(256, Arc::new(tool));
        let result = generator
            .generate(Uuid::now_v7(), b"video bytes", "video/webm", Path::new("blobs/clip"))
            .await;
        assert!(result.is_ok());
    }

    #[tokio::test]
    async fn test_tool_failure_maps_to_unsupported_mime() {
        let mut tool = MockMediaTool::new();
        tool.expect_probe_duration()
            .returning(|_| Err(MediaToolError::EmptyOutput("ffprobe".to_string())));

        let generator = PreviewGenerator::new(256, Arc::new(tool));
        let err = generator
            .generate(Uuid::now_v7(), b"video bytes", "video/mp4", Path::new("blobs/clip"))
            .await
            .unwrap_err();
        assert!(matches!(err, PreviewError::Tool(_)));
        assert!(matches!(StoreError::from(err), StoreError::UnsupportedMime));
    }

    #[tokio::test]
    async fn test_unknown_mime_is_unsupported() {
        let generator = PreviewGenerator::new(256, Arc::new(MockMediaTool::new()));
        let err = generator
            .generate(Uuid::now_v7(), b"%PDF", "application/pdf", Path::new("x"))
            .await
            .unwrap_err();
        assert!(matches!(err, PreviewError::Unsupported(_)));
    }
}
