//! Visit recorder (SPEC_FULL.md §4.5): pipes raw BGR24 frames into an ffmpeg
//! subprocess for the duration of a visit, then atomically publishes the
//! finished MP4.
//!
//! Grounded in the original visit recorder's stderr-to-file discipline (never
//! pipe stderr — an unread stderr pipe will deadlock ffmpeg once its buffer
//! fills) and its non-blocking writable check before every frame write, which
//! lets the recorder drop a frame under backpressure instead of blocking the
//! capture loop.

use crate::encoder::{EncoderCommand, EncoderKind};
use crate::error::{RecorderError, Result};
use chrono::{DateTime, Utc};
use std::path::{Path, PathBuf};
use std::process::Stdio;
use std::time::Duration;
use tokio::fs::File as TokioFile;
use tokio::io::AsyncWriteExt;
use tokio::process::Child;
use tokio::time::timeout;
use tracing::{info, warn};

const STDIN_WRITABLE_TIMEOUT: Duration = Duration::from_millis(500);
/// Grace period for the encoder to flush and exit once stdin is closed before
/// it's killed outright (SPEC_FULL.md §4.5/§5).
const STOP_DRAIN_TIMEOUT: Duration = Duration::from_secs(30);

/// One completed recorder event, kept both in the `.events.log` sidecar and
/// in-memory so `stop_recording` can hand the full list back to the caller.
#[derive(Debug, Clone)]
pub struct RecordedEvent {
    pub label: String,
    pub detail: String,
    pub at: DateTime<Utc>,
}

/// Metadata a finalized visit recording hands back to the caller (SPEC_FULL.md
/// §3 VisitRecording) — everything the clip manager and event store need that
/// isn't derivable from the MP4 file alone.
#[derive(Debug, Clone)]
pub struct VisitRecording {
    pub final_path: PathBuf,
    pub recording_start: DateTime<Utc>,
    pub visit_start: DateTime<Utc>,
    pub visit_end: DateTime<Utc>,
    pub frame_count: u64,
    pub fps: u32,
    pub duration_seconds: i64,
    pub recording_duration_seconds: i64,
    pub events: Vec<RecordedEvent>,
}

pub struct VisitRecorder {
    child: Option<Child>,
    final_path: Option<PathBuf>,
    tmp_path: Option<PathBuf>,
    recording_start: Option<DateTime<Utc>>,
    visit_start: Option<DateTime<Utc>>,
    fps: u32,
    frames_written: u64,
    frames_dropped: u64,
    events: Vec<RecordedEvent>,
}

impl VisitRecorder {
    pub fn new() -> Self {
        Self {
            child: None,
            final_path: None,
            tmp_path: None,
            recording_start: None,
            visit_start: None,
            fps: 0,
            frames_written: 0,
            frames_dropped: 0,
            events: Vec::new(),
        }
    }

    pub fn is_recording(&self) -> bool {
        self.child.is_some()
    }

    pub fn frames_written(&self) -> u64 {
        self.frames_written
    }

    pub fn frames_dropped(&self) -> u64 {
        self.frames_dropped
    }

    /// When the current (or most recently stopped) recording's encoder was
    /// spawned. `None` if nothing has been recorded yet this process.
    pub fn recording_start(&self) -> Option<DateTime<Utc>> {
        self.recording_start
    }

    /// Start encoding to a `.tmp` sibling of `final_path`; the real name appears
    /// only once `stop_recording` renames it in, so partial files are never mistaken
    /// for finished visits. `visit_start` is the behavior-level start of the visit
    /// this recording belongs to, which may predate the recording itself (a
    /// startup-confirmed visit records from confirmation time onward but the
    /// visit is considered to have begun at first detection).
    pub async fn start_recording(
        &mut self,
        final_path: &Path,
        visit_start: DateTime<Utc>,
        width: u32,
        height: u32,
        fps: u32,
        crf: u32,
        encoder: EncoderKind,
    ) -> Result<()> {
        if self.is_recording() {
            return Err(RecorderError::AlreadyRecording.into());
        }

        let tmp_path = final_path.with_extension("mp4.tmp");
        if let Some(parent) = final_path.parent() {
            tokio::fs::create_dir_all(parent).await?;
        }

        let stderr_path = final_path.with_extension("encoder.log");
        let stderr_file = std::fs::File::create(&stderr_path)?;

        let mut cmd = EncoderCommand::raw_input_to_mp4(encoder, width, height, fps, crf, &tmp_path);
        cmd.stdin(Stdio::piped())
            .stdout(Stdio::null())
            .stderr(Stdio::from(stderr_file));

        let child = cmd.spawn().map_err(|e| RecorderError::Spawn(e.to_string()))?;

        info!(?tmp_path, ?encoder, "visit recording started");
        self.child = Some(child);
        self.final_path = Some(final_path.to_path_buf());
        self.tmp_path = Some(tmp_path);
        self.recording_start = Some(Utc::now());
        self.visit_start = Some(visit_start);
        self.fps = fps;
        self.frames_written = 0;
        self.frames_dropped = 0;
        self.events.clear();
        Ok(())
    }

    /// Write one raw BGR24 frame, dropping it (rather than blocking the capture
    /// loop) if the encoder's stdin isn't writable within
    /// [`STDIN_WRITABLE_TIMEOUT`].
    pub async fn write_frame(&mut self, raw_bgr24: &[u8]) -> Result<()> {
        let child = self.child.as_mut().ok_or(RecorderError::NotRecording)?;
        let stdin = child
            .stdin
            .as_mut()
            .ok_or_else(|| RecorderError::Spawn("encoder stdin unavailable".to_string()))?;

        match timeout(STDIN_WRITABLE_TIMEOUT, stdin.write_all(raw_bgr24)).await {
            Ok(Ok(())) => {
                self.frames_written += 1;
                Ok(())
            }
            Ok(Err(e)) => Err(e.into()),
            Err(_) => {
                self.frames_dropped += 1;
                warn!(
                    dropped = self.frames_dropped,
                    "encoder stdin not writable in time, frame dropped"
                );
                Err(RecorderError::Stall {
                    timeout: STDIN_WRITABLE_TIMEOUT,
                }
                .into())
            }
        }
    }

    /// Log a named event alongside the visit for later correlation (arrival,
    /// roosting transition, notification sent, etc). Appended to a sidecar file
    /// next to the in-progress recording and kept in-memory so it rides along
    /// in the next `stop_recording`'s [`VisitRecording`].
    pub async fn log_event(&mut self, label: &str, detail: &str) -> Result<()> {
        let Some(final_path) = &self.final_path else {
            return Err(RecorderError::NotRecording.into());
        };
        let at = Utc::now();
        let events_path = final_path.with_extension("events.log");
        let line = format!("{} {} {}\n", at.to_rfc3339(), label, detail);
        let mut file = TokioFile::options()
            .create(true)
            .append(true)
            .open(events_path)
            .await?;
        file.write_all(line.as_bytes()).await?;
        self.events.push(RecordedEvent {
            label: label.to_string(),
            detail: detail.to_string(),
            at,
        });
        Ok(())
    }

    /// Close the encoder's stdin and wait up to [`STOP_DRAIN_TIMEOUT`] for it to
    /// exit, killing it if it doesn't. The `.tmp` file is renamed into place
    /// regardless of how the encoder exited — a nonzero exit or a forced kill
    /// still leaves recoverable partial footage, and the caller shouldn't lose
    /// it just because ffmpeg complained on the way out.
    pub async fn stop_recording(&mut self, visit_end: DateTime<Utc>) -> Result<VisitRecording> {
        let mut child = self.child.take().ok_or(RecorderError::NotRecording)?;
        let tmp_path = self.tmp_path.take().ok_or(RecorderError::NotRecording)?;
        let final_path = self.final_path.take().ok_or(RecorderError::NotRecording)?;
        let recording_start = self.recording_start.ok_or(RecorderError::NotRecording)?;
        let visit_start = self.visit_start.take().unwrap_or(recording_start);
        let fps = self.fps;
        let events = std::mem::take(&mut self.events);

        drop(child.stdin.take());

        match timeout(STOP_DRAIN_TIMEOUT, child.wait()).await {
            Ok(Ok(status)) if status.success() => {}
            Ok(Ok(status)) => {
                warn!(code = ?status.code(), "encoder exited nonzero, keeping partial recording");
            }
            Ok(Err(e)) => {
                warn!(error = %e, "error waiting on encoder, keeping partial recording");
            }
            Err(_) => {
                warn!(timeout = ?STOP_DRAIN_TIMEOUT, "encoder did not exit within drain timeout, killing it");
                let _ = child.kill().await;
            }
        }

        tokio::fs::rename(&tmp_path, &final_path).await?;

        let now = Utc::now();
        let duration_seconds = (visit_end - visit_start).num_seconds().max(0);
        let recording_duration_seconds = (now - recording_start).num_seconds().max(0);

        info!(
            ?final_path,
            frames_written = self.frames_written,
            frames_dropped = self.frames_dropped,
            "visit recording finalized"
        );

        Ok(VisitRecording {
            final_path,
            recording_start,
            visit_start,
            visit_end,
            frame_count: self.frames_written,
            fps,
            duration_seconds,
            recording_duration_seconds,
            events,
        })
    }

    /// Force-stop on shutdown: best-effort finalize, swallowing errors so an
    /// in-flight encode never blocks process exit.
    pub async fn force_stop(&mut self) {
        if !self.is_recording() {
            return;
        }
        if let Err(e) = self.stop_recording(Utc::now()).await {
            warn!(error = %e, "visit recorder force-stop did not finalize cleanly");
        }
    }
}

impl Default for VisitRecorder {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn fresh_recorder_is_not_recording() {
        let recorder = VisitRecorder::new();
        assert!(!recorder.is_recording());
        assert_eq!(recorder.frames_written(), 0);
        assert_eq!(recorder.recording_start(), None);
    }

    #[tokio::test]
    async fn write_frame_without_recording_errors() {
        let mut recorder = VisitRecorder::new();
        let result = recorder.write_frame(&[0u8; 12]).await;
        assert!(result.is_err());
    }

    #[tokio::test]
    async fn stop_without_recording_errors() {
        let mut recorder = VisitRecorder::new();
        let result = recorder.stop_recording(Utc::now()).await;
        assert!(result.is_err());
    }

    #[tokio::test]
    async fn log_event_without_recording_errors() {
        let mut recorder = VisitRecorder::new();
        let result = recorder.log_event("roosting", "state change").await;
        assert!(result.is_err());
    }
}
