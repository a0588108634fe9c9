//! External media tools used to pull still frames out of videos.

use async_trait::async_trait;
use std::io::ErrorKind;
use std::path::{Path, PathBuf};
use std::process::Stdio;
use thiserror::Error;
use tokio::process::Command;
use tracing::{debug, instrument};

/// Failure of an external media tool invocation.
#[derive(Debug, Error)]
pub enum MediaToolError {
    #[error("media tool not found: {0}")]
    NotFound(PathBuf),

    #[error("{tool} exited with {status}: {stderr}")]
    Failed {
        tool: String,
        status: String,
        stderr: String,
    },

    #[error("{0} produced no output")]
    EmptyOutput(String),

    #[error("failed to run media tool: {0}")]
    Io(#[from] std::io::Error),
}

/// Duration probe and single-frame extractor.
#[cfg_attr(test, mockall::automock)]
#[async_trait]
pub trait MediaTool: Send + Sync {
    /// Duration of the media file in seconds, `None` when the probe reports
    /// nothing numeric.
    async fn probe_duration(&self, path: &Path) -> Result<Option<f64>, MediaToolError>;

    /// One encoded still frame captured `at` seconds into the file.
    async fn extract_frame(&self, path: &Path, at: f64) -> Result<Vec<u8>, MediaToolError>;
}

/// `ffprobe` / `ffmpeg` subprocess implementation.
#[derive(Debug, Clone)]
pub struct FfmpegTool {
    ffprobe: PathBuf,
    ffmpeg: PathBuf,
}

impl FfmpegTool {
    pub fn new(ffprobe: impl Into<PathBuf>, ffmpeg: impl Into<PathBuf>) -> Self {
        Self {
            ffprobe: ffprobe.into(),
            ffmpeg: ffmpeg.into(),
        }
    }

    async fn run(&self, program: &Path, command: &mut Command) -> Result<Vec<u8>, MediaToolError> {
        let output = command
            .stdin(Stdio::null())
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            .kill_on_drop(true)
            .output()
            .await
            .map_err(|e| match e.kind() {
                ErrorKind::NotFound => MediaToolError::NotFound(program.to_path_buf()),
                _ => MediaToolError::Io(e),
            })?;

        if !output.status.success() {
            return Err(MediaToolError::Failed {
                tool: program.display().to_string(),
                status: output.status.to_string(),
                stderr: String::from_utf8_lossy(&output.stderr).trim().to_string(),
            });
        }

        Ok(output.stdout)
    }
}

/// Parse probe output, treating anything non-numeric as unknown.
pub fn parse_duration(stdout: &str) -> Option<f64> {
    stdout
        .trim()
        .parse::<f64>()
        .ok()
        .filter(|seconds| seconds.is_finite() && *seconds >= 0.0)
}

#[async_trait]
impl MediaTool for FfmpegTool {
    #[instrument(skip(self))]
    async fn probe_duration(&self, path: &Path) -> Result<Option<f64>, MediaToolError> {
        let stdout = self
            .run(
                &self.ffprobe,
                Command::new(&self.ffprobe)
                    .args(["-v", "error", "-show_entries", "format=duration"])
                    .args(["-of", "default=noprint_wrappers=1:nokey=1"])
                    .arg(path),
            )
            .await?;

        let duration = parse_duration(&String::from_utf8_lossy(&stdout));
        debug!(?duration, "Probed duration");
        Ok(duration)
    }

    #[instrument(skip(self))]
    async fn extract_frame(&self, path: &Path, at: f64) -> Result<Vec<u8>, MediaToolError> {
        let frame = self
            .run(
                &self.ffmpeg,
                Command::new(&self.ffmpeg)
                    .args(["-v", "error", "-ss"])
                    .arg(format!("{at:.3}"))
                    .arg("-i")
                    .arg(path)
                    .args(["-frames:v", "1", "-f", "image2pipe", "-vcodec", "png", "-"]),
            )
            .await?;

        if frame.is_empty() {
            return Err(MediaToolError::EmptyOutput(self.ffmpeg.display().to_string()));
        }

        debug!(size = frame.len(), "Extracted frame");
        Ok(frame)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_duration() {
        assert_eq!(parse_duration("12.5\n"), Some(12.5));
        assert_eq!(parse_duration("N/A"), None);
        assert_eq!(parse_duration(""), None);
        assert_eq!(parse_duration("-3"), None);
        assert_eq!(parse_duration("inf"), None);
    }

    #[tokio::test]
    async fn test_missing_binary_is_not_found() {
        let tool = FfmpegTool::new("/nonexistent/ffprobe", "/nonexistent/ffmpeg");

        let result = tool.probe_duration(Path::new("clip.mp4")).await;
        assert!(matches!(result, Err(MediaToolError::NotFound(_))));

        let result = tool.extract_frame(Path::new("clip.mp4"), 1.0).await;
        assert!(matches!(result, Err(MediaToolError::NotFound(_))));
    }
}
