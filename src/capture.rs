//! Stream capture (SPEC_FULL.md §4.4): resolves a playable media URL from the
//! configured video source via an external resolver subprocess, connects an
//! ffmpeg decode pipeline, and yields raw BGR24 frames at the configured
//! sampling interval.
//!
//! Grounded in the reconnect/backoff policy of the original `StreamCapture`:
//! a precondition failure retries the resolver once before falling back to a
//! lower-resolution format string, and a resolver or connect failure after
//! that enters a fixed cooldown before the caller may retry again.

use crate::error::{CaptureError, Result};
use crate::frame::Frame;
use chrono::Utc;
use std::process::Stdio;
use std::time::Duration;
use tokio::io::{AsyncReadExt, BufReader};
use tokio::process::{Child, ChildStdout, Command};
use tracing::{debug, info, warn};

/// Cooldown imposed after capture exhausts its resolver fallback, mirroring the
/// original daemon's fixed five-minute backoff before another connect is attempted.
pub const RECONNECT_COOLDOWN: Duration = Duration::from_secs(300);

const PRIMARY_FORMAT: &str = "best[height<=1080]";
const FALLBACK_FORMAT: &str = "best[height<=480]";

/// Resolves a playable direct media URL for `source` using an external resolver
/// (a `yt-dlp`-compatible binary invoked with `-f <format> -g`).
async fn resolve_url(source: &str, format: &str) -> Result<String> {
    let output = Command::new("yt-dlp")
        .args(["-f", format, "-g", source])
        .stdin(Stdio::null())
        .stderr(Stdio::piped())
        .output()
        .await
        .map_err(|e| CaptureError::ResolverFailed {
            details: e.to_string(),
        })?;

    if !output.status.success() {
        let stderr = String::from_utf8_lossy(&output.stderr).to_string();
        return Err(CaptureError::ResolverFailed { details: stderr }.into());
    }

    let url = String::from_utf8_lossy(&output.stdout)
        .lines()
        .next()
        .unwrap_or_default()
        .trim()
        .to_string();

    if url.is_empty() {
        return Err(CaptureError::ResolverFailed {
            details: "resolver returned an empty URL".to_string(),
        }
        .into());
    }

    Ok(url)
}

/// Resolve with one retry at the primary format, then one attempt at a reduced
/// format before giving up (SPEC_FULL.md §4.4 precondition-check-failed policy).
async fn resolve_with_fallback(source: &str) -> Result<String> {
    match resolve_url(source, PRIMARY_FORMAT).await {
        Ok(url) => Ok(url),
        Err(_) => match resolve_url(source, PRIMARY_FORMAT).await {
            Ok(url) => Ok(url),
            Err(_) => resolve_url(source, FALLBACK_FORMAT)
                .await
                .map_err(|_| CaptureError::PreconditionExhausted.into()),
        },
    }
}

/// A connected decode pipeline, reading raw BGR24 frames from ffmpeg's stdout.
pub struct StreamCapture {
    width: u32,
    height: u32,
    frame_interval: u32,
    child: Option<Child>,
    stdout: Option<BufReader<ChildStdout>>,
    frame_number: u64,
}

impl StreamCapture {
    pub fn new(width: u32, height: u32, frame_interval: u32) -> Self {
        Self {
            width,
            height,
            frame_interval,
            child: None,
            stdout: None,
            frame_number: 0,
        }
    }

    pub fn is_connected(&self) -> bool {
        self.child.is_some()
    }

    /// Resolve `source` and spawn the decode pipeline.
    pub async fn connect(&mut self, source: &str) -> Result<()> {
        let url = resolve_with_fallback(source).await?;

        let mut cmd = Command::new("ffmpeg");
        cmd.args(["-i", &url])
            .args([
                "-f",
                "rawvideo",
                "-pix_fmt",
                "bgr24",
                "-s",
                &format!("{}x{}", self.width, self.height),
            ])
            .arg("-")
            .stdin(Stdio::null())
            .stdout(Stdio::piped())
            .stderr(Stdio::null());

        let mut child = cmd.spawn().map_err(|e| CaptureError::ConnectFailed {
            details: e.to_string(),
        })?;

        let stdout = child.stdout.take().ok_or_else(|| CaptureError::ConnectFailed {
            details: "ffmpeg spawned without a stdout pipe".to_string(),
        })?;

        self.child = Some(child);
        self.stdout = Some(BufReader::new(stdout));
        self.frame_number = 0;
        info!(source, "stream capture connected");
        Ok(())
    }

    pub async fn disconnect(&mut self) {
        self.stdout = None;
        if let Some(mut child) = self.child.take() {
            let _ = child.kill().await;
        }
    }

    /// Tear down and reconnect to the same source.
    pub async fn reconnect(&mut self, source: &str) -> Result<()> {
        self.disconnect().await;
        self.connect(source).await
    }

    /// Read one raw BGR24 frame. Returns `Ok(None)` on clean EOF (pipeline ended);
    /// a short read is treated as a transient hiccup and reported as an error so the
    /// caller can decide whether to reconnect.
    pub async fn read_frame(&mut self) -> Result<Option<Frame>> {
        let frame_len = self.width as usize * self.height as usize * 3;
        let mut buf = vec![0u8; frame_len];

        let stdout = self
            .stdout
            .as_mut()
            .ok_or_else(|| CaptureError::ConnectFailed {
                details: "not connected".to_string(),
            })?;

        let mut read = 0;
        while read < frame_len {
            let n = stdout.read(&mut buf[read..]).await?;
            if n == 0 {
                if read == 0 {
                    return Ok(None);
                }
                return Err(CaptureError::TransientRead.into());
            }
            read += n;
        }

        let frame_number = self.frame_number;
        self.frame_number += 1;
        Ok(Some(Frame::new(buf, self.width, self.height, frame_number, Utc::now())))
    }

    /// Read frames, yielding only every `frame_interval`-th one to the caller while
    /// still draining the pipe at full rate so ffmpeg's stdout buffer never backs up.
    pub async fn next_sampled_frame(&mut self) -> Result<Option<Frame>> {
        loop {
            match self.read_frame().await? {
                None => return Ok(None),
                Some(frame) => {
                    if self.frame_interval <= 1 || frame.frame_number % self.frame_interval as u64 == 0 {
                        return Ok(Some(frame));
                    }
                    debug!(frame_number = frame.frame_number, "skipping frame, below sampling interval");
                }
            }
        }
    }
}

/// Attempts a reconnect, retrying once on the same source before surfacing the
/// error up to the caller (who is responsible for honoring [`RECONNECT_COOLDOWN`]).
pub async fn reconnect_with_retry(capture: &mut StreamCapture, source: &str) -> Result<()> {
    match capture.reconnect(source).await {
        Ok(()) => Ok(()),
        Err(_) => {
            warn!("reconnect failed, retrying once more before cooldown");
            capture
                .reconnect(source)
                .await
                .map_err(|_| CaptureError::ReconnectFailed { attempts: 2 }.into())
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn fresh_capture_is_not_connected() {
        let capture = StreamCapture::new(640, 480, 1);
        assert!(!capture.is_connected());
    }

    #[test]
    fn frame_length_matches_dimensions() {
        let capture = StreamCapture::new(64, 48, 1);
        assert_eq!(capture.width as usize * capture.height as usize * 3, 64 * 48 * 3);
    }
}
