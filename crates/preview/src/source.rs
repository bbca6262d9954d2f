//! Pull-based video sources.

use crate::error::{PreviewError, Result};
use async_trait::async_trait;
use image::RgbImage;
use std::process::Stdio;
use std::time::Duration;
use tokio::io::AsyncReadExt;
use tokio::process::{Child, ChildStdout, Command};
use tracing::{debug, info, warn};

/// A decodable stream that hands out one frame per `grab`.
#[async_trait]
pub trait FrameSource: Send {
    async fn open(&mut self, url: &str) -> Result<()>;

    /// Next decoded frame, waiting for it if necessary
    async fn grab(&mut self) -> Result<RgbImage>;

    /// Release the underlying stream. Safe to call more than once.
    async fn release(&mut self);
}

/// [`FrameSource`] backed by an `ffmpeg` child process decoding to raw RGB.
pub struct FfmpegSource {
    ffmpeg_bin: String,
    ffprobe_bin: String,
    io_timeout: Option<Duration>,
    child: Option<Child>,
    stdout: Option<ChildStdout>,
    width: u32,
    height: u32,
}

impl Default for FfmpegSource {
    fn default() -> Self {
        Self::new()
    }
}

impl FfmpegSource {
    pub fn new() -> Self {
        Self::with_binaries("ffmpeg", "ffprobe")
    }

    pub fn with_binaries(ffmpeg: impl Into<String>, ffprobe: impl Into<String>) -> Self {
        Self {
            ffmpeg_bin: ffmpeg.into(),
            ffprobe_bin: ffprobe.into(),
            io_timeout: None,
            child: None,
            stdout: None,
            width: 0,
            height: 0,
        }
    }

    /// Give up on a network stream that stays silent for `timeout`
    pub fn with_io_timeout(mut self, timeout: Duration) -> Self {
        self.io_timeout = Some(timeout);
        self
    }

    async fn read_dimensions(&self, url: &str) -> Result<(u32, u32)> {
        let mut cmd = Command::new(&self.ffprobe_bin);
        cmd.args(["-v", "error"])
            .args(input_args(url, self.io_timeout))
            .kill_on_drop(true);
        cmd.args([
            "-select_streams",
            "v:0",
            "-show_entries",
            "stream=width,height",
            "-of",
            "csv=p=0",
            url,
        ]);

        let output = cmd
            .output()
            .await
            .map_err(|e| PreviewError::StreamOpen(format!("failed to execute ffprobe: {e}")))?;
        if !output.status.success() {
            return Err(PreviewError::StreamOpen(format!(
                "ffprobe exited with {}",
                output.status
            )));
        }

        let text = String::from_utf8_lossy(&output.stdout);
        parse_dimensions(&text).ok_or_else(|| {
            PreviewError::StreamOpen(format!("unexpected ffprobe output: {}", text.trim()))
        })
    }
}

#[async_trait]
impl FrameSource for FfmpegSource {
    async fn open(&mut self, url: &str) -> Result<()> {
        self.release().await;

        let (width, height) = self.read_dimensions(url).await?;

        let mut cmd = Command::new(&self.ffmpeg_bin);
        cmd.args(["-loglevel", "error", "-nostdin"])
            .args(input_args(url, self.io_timeout));
        cmd.args(["-i", url, "-an", "-f", "rawvideo", "-pix_fmt", "rgb24", "pipe:1"])
            .stdin(Stdio::null())
            .stdout(Stdio::piped())
            .stderr(Stdio::null())
            .kill_on_drop(true);

        let mut child = cmd
            .spawn()
            .map_err(|e| PreviewError::StreamOpen(format!("failed to spawn ffmpeg: {e}")))?;
        let stdout = child
            .stdout
            .take()
            .ok_or_else(|| PreviewError::StreamOpen("ffmpeg stdout not captured".to_string()))?;

        info!(width, height, "ffmpeg preview stream opened");

        self.width = width;
        self.height = height;
        self.stdout = Some(stdout);
        self.child = Some(child);
        Ok(())
    }

    async fn grab(&mut self) -> Result<RgbImage> {
        let stdout = self
            .stdout
            .as_mut()
            .ok_or_else(|| PreviewError::Read("stream is not open".to_string()))?;

        let mut buf = vec![0u8; self.width as usize * self.height as usize * 3];
        match stdout.read_exact(&mut buf).await {
            Ok(_) => {}
            Err(e) if e.kind() == std::io::ErrorKind::UnexpectedEof => {
                return Err(PreviewError::Ended)
            }
            Err(e) => return Err(PreviewError::Read(e.to_string())),
        }

        RgbImage::from_raw(self.width, self.height, buf)
            .ok_or_else(|| PreviewError::Read("frame buffer has the wrong size".to_string()))
    }

    async fn release(&mut self) {
        self.stdout = None;
        if let Some(mut child) = self.child.take() {
            if let Err(e) = child.kill().await {
                warn!(error = %e, "failed to stop ffmpeg");
            }
            debug!("ffmpeg preview stream released");
        }
    }
}

fn is_rtsp(url: &str) -> bool {
    url.starts_with("rtsp://") || url.starts_with("rtsps://")
}

fn is_network(url: &str) -> bool {
    url.contains("://") && !url.starts_with("file://")
}

/// Input options placed before `-i`: TCP transport for RTSP and, for network
/// inputs, a socket timeout in microseconds.
fn input_args(url: &str, io_timeout: Option<Duration>) -> Vec<String> {
    let mut args = Vec::new();
    if is_rtsp(url) {
        args.extend(["-rtsp_transport".to_string(), "tcp".to_string()]);
    }
    if let Some(timeout) = io_timeout.filter(|_| is_network(url)) {
        let option = if is_rtsp(url) { "-timeout" } else { "-rw_timeout" };
        args.extend([option.to_string(), timeout.as_micros().to_string()]);
    }
    args
}

/// Parse ffprobe's `width,height` CSV line
fn parse_dimensions(output: &str) -> Option<(u32, u32)> {
    let line = output.lines().map(str::trim).find(|l| !l.is_empty())?;
    let mut parts = line.split(',').map(str::trim).filter(|p| !p.is_empty());
    let width: u32 = parts.next()?.parse().ok()?;
    let height: u32 = parts.next()?.parse().ok()?;
    (width > 0 && height > 0).then_some((width, height))
}
