//! Clip extraction (SPEC_FULL.md §4.6): arrival and departure clips
//! stream-copy-remuxed out of the finalized visit file, plus debounced
//! state-change clips carved from the rolling frame buffer, all run on a
//! small bounded worker pool so extraction never blocks the capture loop.
//!
//! Grounded in the original buffer-backed clip manager for the worker pool
//! and state-change debounce shape; the remux path is new — arrival and
//! departure windows can reach well outside what a short ring buffer holds
//! (a startup-confirmed visit's arrival point may be tens of minutes before
//! the departure clip is cut), so those two carve their window out of the
//! visit's own file with a `-c copy` remux instead.

use crate::encoder::{EncoderCommand, EncoderKind};
use crate::ring_buffer::FrameBuffer;
use crate::time::{local_date_string, local_time_string};
use chrono::{DateTime, Utc};
use chrono_tz::Tz;
use parking_lot::Mutex;
use std::collections::HashMap;
use std::path::PathBuf;
use std::process::Stdio;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::{mpsc, Semaphore};
use tracing::{error, info};

const WORKER_COUNT: usize = 2;
const QUEUE_CAPACITY: usize = 32;

#[derive(Debug, Clone)]
pub enum ClipKind {
    Arrival,
    Departure,
    StateChange(String),
}

impl ClipKind {
    fn label(&self) -> &str {
        match self {
            ClipKind::Arrival => "arrival",
            ClipKind::Departure => "departure",
            ClipKind::StateChange(label) => label,
        }
    }
}

/// Where a clip job pulls its frames from.
enum ExtractionSource {
    /// Carved from the rolling JPEG buffer and re-encoded (state-change clips,
    /// which fire while the visit file is still being written).
    Buffer { start: DateTime<Utc>, end: DateTime<Utc> },
    /// Stream-copy remuxed out of a finalized visit file (arrival/departure).
    Remux {
        visit_file: PathBuf,
        start_offset_seconds: f64,
        duration_seconds: f64,
    },
}

struct ClipJob {
    kind: ClipKind,
    output: PathBuf,
    source: ExtractionSource,
}

#[derive(Clone)]
pub struct ClipManagerConfig {
    pub arrival_before: u32,
    pub arrival_after: u32,
    pub departure_before: u32,
    pub departure_after: u32,
    pub state_change_before: u32,
    pub state_change_after: u32,
    pub state_change_cooldown: u32,
    pub fps: u32,
    pub crf: u32,
    pub clips_dir: PathBuf,
    pub timezone: Tz,
}

/// Accepts clip requests and fans them out to a bounded pool of concurrent
/// ffmpeg extractions. Dropped (queue-full) requests are logged, never
/// silently lost from the caller's perspective, but never block it either.
pub struct ClipManager {
    sender: mpsc::Sender<ClipJob>,
    /// label -> generation counter, for the state-change debounce. A pending
    /// clip only fires if its generation is still current when its cooldown
    /// elapses; clearing the map (on departure) cancels everything pending.
    pending_state_changes: Arc<Mutex<HashMap<String, u64>>>,
    state_change_cooldown: Duration,
    config: ClipManagerConfig,
}

impl ClipManager {
    pub fn new(buffer: Arc<FrameBuffer>, encoder: EncoderKind, config: ClipManagerConfig) -> Self {
        let (sender, receiver) = mpsc::channel(QUEUE_CAPACITY);
        spawn_worker_pool(receiver, buffer, encoder, config.clone());

        Self {
            sender,
            pending_state_changes: Arc::new(Mutex::new(HashMap::new())),
            state_change_cooldown: Duration::from_secs(config.state_change_cooldown as u64),
            config,
        }
    }

    /// Schedules the arrival clip, remuxed out of `visit_file` centered on
    /// `visit_start`'s offset into the recording. Returns the clip's eventual
    /// path immediately; extraction happens in the background.
    pub fn schedule_arrival_clip(&self, visit_file: PathBuf, recording_start: DateTime<Utc>, visit_start: DateTime<Utc>) -> PathBuf {
        let offset = seconds_between(recording_start, visit_start);
        let start_offset = (offset - self.config.arrival_before as f64).max(0.0);
        let duration = (self.config.arrival_before + self.config.arrival_after) as f64;
        let output = clip_output_path(&self.config, &ClipKind::Arrival, visit_start);
        self.enqueue(ClipJob {
            kind: ClipKind::Arrival,
            output: output.clone(),
            source: ExtractionSource::Remux {
                visit_file,
                start_offset_seconds: start_offset,
                duration_seconds: duration,
            },
        });
        output
    }

    /// Schedules the departure clip, remuxed out of `visit_file` centered on
    /// `last_detection`'s offset into the recording (SPEC_FULL.md §4.6:
    /// `last_detection_offset = visit_end - recording_start`), not on whatever
    /// later frame actually tripped the exit timeout.
    pub fn schedule_departure_clip(&self, visit_file: PathBuf, recording_start: DateTime<Utc>, last_detection: DateTime<Utc>) -> PathBuf {
        let offset = seconds_between(recording_start, last_detection);
        let start_offset = (offset - self.config.departure_before as f64).max(0.0);
        let duration = (self.config.departure_before + self.config.departure_after) as f64;
        let output = clip_output_path(&self.config, &ClipKind::Departure, last_detection);
        self.enqueue(ClipJob {
            kind: ClipKind::Departure,
            output: output.clone(),
            source: ExtractionSource::Remux {
                visit_file,
                start_offset_seconds: start_offset,
                duration_seconds: duration,
            },
        });
        output
    }

    /// Schedules a state-change clip on a trailing-edge debounce: every call
    /// for the same `label` resets the timer, and only the call that survives
    /// uninterrupted for `state_change_cooldown` actually cuts a clip.
    pub fn schedule_state_change_clip(&self, label: &str, at: DateTime<Utc>) {
        let generation = {
            let mut pending = self.pending_state_changes.lock();
            let entry = pending.entry(label.to_string()).or_insert(0);
            *entry += 1;
            *entry
        };

        let label = label.to_string();
        let pending_map = Arc::clone(&self.pending_state_changes);
        let cooldown = self.state_change_cooldown;
        let config = self.config.clone();
        let sender = self.sender.clone();

        tokio::spawn(async move {
            tokio::time::sleep(cooldown).await;

            let still_current = pending_map.lock().get(&label).copied() == Some(generation);
            if !still_current {
                return;
            }

            let start = at - chrono::Duration::seconds(config.state_change_before as i64);
            let end = at + chrono::Duration::seconds(config.state_change_after as i64);
            let output = clip_output_path(&config, &ClipKind::StateChange(label.clone()), at);
            let job = ClipJob {
                kind: ClipKind::StateChange(label),
                output,
                source: ExtractionSource::Buffer { start, end },
            };
            if sender.try_send(job).is_err() {
                error!("clip worker queue full, dropping state-change clip request");
            }
        });
    }

    /// Cancels every state-change clip still waiting out its debounce window.
    /// Called on departure so a roosting/activity clip never fires after the
    /// subject has already left.
    pub fn cancel_pending_state_changes(&self) {
        self.pending_state_changes.lock().clear();
    }

    fn enqueue(&self, job: ClipJob) {
        if self.sender.try_send(job).is_err() {
            error!("clip worker queue full, dropping clip request");
        }
    }
}

fn seconds_between(from: DateTime<Utc>, to: DateTime<Utc>) -> f64 {
    (to - from).num_milliseconds() as f64 / 1000.0
}

fn clip_output_path(config: &ClipManagerConfig, kind: &ClipKind, anchor: DateTime<Utc>) -> PathBuf {
    let date = local_date_string(anchor, config.timezone);
    let time = local_time_string(anchor, config.timezone);
    config
        .clips_dir
        .join(date)
        .join(format!("{}_{}.mp4", time, kind.label()))
}

async fn remux_clip(visit_file: &std::path::Path, start_offset_seconds: f64, duration_seconds: f64, output: &std::path::Path) -> crate::error::Result<()> {
    if let Some(parent) = output.parent() {
        tokio::fs::create_dir_all(parent).await?;
    }

    let mut cmd = EncoderCommand::remux_range(visit_file, start_offset_seconds.max(0.0), duration_seconds.max(0.0), output);
    cmd.stdin(Stdio::null()).stdout(Stdio::null()).stderr(Stdio::null());

    let status = cmd
        .status()
        .await
        .map_err(|e| crate::error::ClipError::ExtractionFailed { details: e.to_string() })?;
    if !status.success() {
        return Err(crate::error::ClipError::ExtractionFailed {
            details: format!("ffmpeg exited with {:?}", status.code()),
        }
        .into());
    }

    info!(?output, "clip remuxed from visit file");
    Ok(())
}

/// Drains `receiver` on a dedicated task, bounding concurrent extractions to
/// [`WORKER_COUNT`] via a semaphore rather than spawning a fixed set of
/// worker loops, since only one task may own an `mpsc::Receiver`.
fn spawn_worker_pool(
    mut receiver: mpsc::Receiver<ClipJob>,
    buffer: Arc<FrameBuffer>,
    encoder: EncoderKind,
    config: ClipManagerConfig,
) {
    tokio::spawn(async move {
        let semaphore = Arc::new(Semaphore::new(WORKER_COUNT));
        while let Some(job) = receiver.recv().await {
            let permit = semaphore.clone().acquire_owned().await;
            let buffer = buffer.clone();
            let fps = config.fps;
            let crf = config.crf;
            tokio::spawn(async move {
                let _permit = permit;
                let label = job.kind.label().to_string();
                let result = match job.source {
                    ExtractionSource::Buffer { start, end } => {
                        buffer.extract_clip(start, end, &job.output, fps, crf, encoder).await
                    }
                    ExtractionSource::Remux {
                        visit_file,
                        start_offset_seconds,
                        duration_seconds,
                    } => remux_clip(&visit_file, start_offset_seconds, duration_seconds, &job.output).await,
                };
                if let Err(e) = result {
                    error!(label, error = %e, "clip extraction failed");
                }
            });
        }
    });
}

#[cfg(test)]
mod tests {
    use super::*;

    fn cfg() -> ClipManagerConfig {
        ClipManagerConfig {
            arrival_before: 15,
            arrival_after: 30,
            departure_before: 30,
            departure_after: 15,
            state_change_before: 15,
            state_change_after: 30,
            state_change_cooldown: 300,
            fps: 30,
            crf: 23,
            clips_dir: PathBuf::from("clips"),
            timezone: chrono_tz::UTC,
        }
    }

    #[test]
    fn clip_kind_labels() {
        assert_eq!(ClipKind::Arrival.label(), "arrival");
        assert_eq!(ClipKind::StateChange("roosting".to_string()).label(), "roosting");
    }

    #[test]
    fn output_path_uses_local_date_and_label() {
        let config = cfg();
        let ts = DateTime::parse_from_rfc3339("2026-01-02T03:04:05Z").unwrap().with_timezone(&Utc);
        let path = clip_output_path(&config, &ClipKind::Arrival, ts);
        assert_eq!(path, PathBuf::from("clips/2026-01-02/030405_arrival.mp4"));
    }

    #[tokio::test]
    async fn arrival_and_departure_both_schedule_without_panicking() {
        let buffer = Arc::new(FrameBuffer::new(5, 1, 80));
        let manager = ClipManager::new(buffer, EncoderKind::SoftwareX264, cfg());
        let now = Utc::now();
        let visit_file = PathBuf::from("visit.mp4");
        let arrival_path = manager.schedule_arrival_clip(visit_file.clone(), now, now);
        assert_eq!(arrival_path, PathBuf::from("clips").join(local_date_string(now, chrono_tz::UTC)).join(format!("{}_arrival.mp4", local_time_string(now, chrono_tz::UTC))));
        manager.schedule_departure_clip(visit_file, now, now + chrono::Duration::seconds(5));
    }

    #[tokio::test]
    async fn rescheduling_bumps_the_debounce_generation() {
        let buffer = Arc::new(FrameBuffer::new(5, 1, 80));
        let manager = ClipManager::new(buffer, EncoderKind::SoftwareX264, cfg());
        let now = Utc::now();
        manager.schedule_state_change_clip("roosting", now);
        manager.schedule_state_change_clip("roosting", now + chrono::Duration::seconds(10));
        let generation = *manager.pending_state_changes.lock().get("roosting").unwrap();
        assert_eq!(generation, 2, "each reschedule before the cooldown elapses should cancel the prior one");
    }

    #[tokio::test]
    async fn departure_clears_pending_state_change_debounces() {
        let buffer = Arc::new(FrameBuffer::new(5, 1, 80));
        let manager = ClipManager::new(buffer, EncoderKind::SoftwareX264, cfg());
        manager.schedule_state_change_clip("roosting", Utc::now());
        manager.cancel_pending_state_changes();
        assert!(manager.pending_state_changes.lock().is_empty());
    }
}
