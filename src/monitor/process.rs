use super::types::ComponentState;
use super::Monitor;
use crate::detector::matches_target;
use crate::error::Result;
use crate::events::VisitRecord;
use crate::frame::{Detection, Frame};
use crate::recorder::VisitRecording;
use crate::state_machine::BehaviorEvent;
use crate::time::{format_duration, local_date_string, local_time_string};
use chrono::{DateTime, Utc};
use std::path::PathBuf;
use tracing::{info, warn};

/// Tracks one in-progress visit's running totals between its arrival and
/// departure events, since those span many frames and several clip/recorder
/// calls before a single [`VisitRecord`] can be finalized.
pub(super) struct VisitAccumulator {
    id: String,
    start_time: DateTime<Utc>,
    peak_confidence: f64,
    thumbnail_path: Option<String>,
    arrival_clip_path: Option<String>,
}

impl Monitor {
    /// Drains the capture pipeline until cancelled, routing each sampled frame
    /// through detection, the behavior state machine, the visit recorder, and
    /// the clip/notification/event side effects those transitions trigger.
    pub(super) async fn process_loop(&self) -> Result<()> {
        self.set_component_state("capture", ComponentState::Running).await;

        loop {
            if self.cancellation_token.is_cancelled() {
                return Ok(());
            }

            let read_result = {
                let mut capture = self.capture.lock().await;
                capture.next_sampled_frame().await
            };

            match read_result {
                Ok(Some(frame)) => self.handle_frame(frame).await?,
                Ok(None) => {
                    warn!("capture pipeline ended unexpectedly, reconnecting");
                    self.reconnect_with_cooldown().await;
                }
                Err(e) => {
                    warn!(error = %e, "capture read failed, reconnecting");
                    self.reconnect_with_cooldown().await;
                }
            }
        }
    }

    async fn reconnect_with_cooldown(&self) {
        let mut capture = self.capture.lock().await;
        let source = self.config.stream.video_source.clone();
        if crate::capture::reconnect_with_retry(&mut capture, &source).await.is_err() {
            drop(capture);
            warn!(cooldown = ?crate::capture::RECONNECT_COOLDOWN, "reconnect exhausted, cooling down");
            tokio::time::sleep(crate::capture::RECONNECT_COOLDOWN).await;
        }
    }

    async fn handle_frame(&self, frame: Frame) -> Result<()> {
        self.buffer.add_frame(&frame)?;

        let detections = self.detector.detect(&frame).await?;
        let confidence_threshold = self
            .config
            .stream
            .detection_confidence_ir
            .unwrap_or(self.config.stream.detection_confidence);
        let above_confidence: Vec<_> = detections
            .iter()
            .filter(|d| d.confidence >= confidence_threshold)
            .cloned()
            .collect();
        let detected = matches_target(
            &above_confidence,
            &self.config.detection.animal_classes,
            self.config.detection.detect_any_animal,
        );

        if detected {
            self.track_peak_confidence(&above_confidence).await;
        }

        let (events, last_detection) = {
            let mut state_machine = self.state_machine.lock().await;
            let events = state_machine.update(detected, frame.timestamp);
            (events, state_machine.last_detection())
        };

        for event in events {
            // DEPARTED is stamped with the subject's last actual detection, not
            // the frame that tripped the exit timeout.
            let ts = match event {
                BehaviorEvent::Departed => last_detection.unwrap_or(frame.timestamp),
                _ => frame.timestamp,
            };
            self.handle_behavior_event(event, ts).await?;
        }

        {
            let mut recorder = self.recorder.lock().await;
            if recorder.is_recording() {
                if let Err(e) = recorder.write_frame(&frame.data).await {
                    warn!(error = %e, "dropped frame writing to visit recorder");
                }
            }
        }

        Ok(())
    }

    pub(super) async fn handle_behavior_event(&self, event: BehaviorEvent, now: DateTime<Utc>) -> Result<()> {
        match event {
            BehaviorEvent::Arrived | BehaviorEvent::StartupConfirmed => {
                self.begin_visit_accumulator(now).await;
                let (visit_file, recording_start) = self.start_visit_recording(now).await?;

                let thumbnail = match self.save_thumbnail(now).await {
                    Ok(path) => path,
                    Err(e) => {
                        warn!(error = %e, "failed to save arrival thumbnail");
                        None
                    }
                };
                let arrival_clip = self
                    .clip_manager
                    .schedule_arrival_clip(visit_file, recording_start, now);

                {
                    let mut visit = self.visit.lock().await;
                    if let Some(acc) = visit.as_mut() {
                        acc.thumbnail_path = thumbnail;
                        acc.arrival_clip_path = Some(arrival_clip.display().to_string());
                    }
                }

                self.notification_gate
                    .maybe_notify(self.notifier.as_ref(), "arrival", "presence detected", now)
                    .await;
            }
            BehaviorEvent::Departed => {
                self.clip_manager.cancel_pending_state_changes();
                let recording = self.stop_visit_recording(now).await?;
                let departure_clip = recording.as_ref().map(|r| {
                    self.clip_manager
                        .schedule_departure_clip(r.final_path.clone(), r.recording_start, now)
                        .display()
                        .to_string()
                });

                self.notification_gate
                    .maybe_notify(self.notifier.as_ref(), "departure", "subject left frame", now)
                    .await;

                self.finalize_visit_record(now, recording, departure_clip).await?;
            }
            BehaviorEvent::Roosting => {
                self.clip_manager.schedule_state_change_clip("roosting", now);
                self.log_recorder_event("roosting", "state change").await;
            }
            BehaviorEvent::ActivityStart => {
                self.clip_manager.schedule_state_change_clip("activity", now);
                self.log_recorder_event("activity_start", "state change").await;
            }
            BehaviorEvent::ActivityEnd => {
                self.log_recorder_event("activity_end", "state change").await;
            }
        }
        Ok(())
    }

    /// Starts the visit recording and returns the path it's recording to and
    /// the recording's own start time (which may lag `visit_start` for a
    /// startup-confirmed visit).
    async fn start_visit_recording(&self, visit_start: DateTime<Utc>) -> Result<(PathBuf, DateTime<Utc>)> {
        let encoder = self.encoder_probe.detect(false).await;
        let date = local_date_string(visit_start, self.timezone);
        let time = local_time_string(visit_start, self.timezone);
        let path = self.config.clips_dir_path().join(date).join(format!("{time}_visit.mp4"));

        let mut recorder = self.recorder.lock().await;
        if recorder.is_recording() {
            let recording_start = recorder.recording_start().unwrap_or(visit_start);
            return Ok((path, recording_start));
        }
        recorder
            .start_recording(
                &path,
                visit_start,
                self.config.stream.width,
                self.config.stream.height,
                self.config.clip.fps,
                self.config.clip.crf,
                encoder,
            )
            .await?;
        let recording_start = recorder.recording_start().unwrap_or(visit_start);
        info!(?path, "visit recording started");
        Ok((path, recording_start))
    }

    async fn stop_visit_recording(&self, visit_end: DateTime<Utc>) -> Result<Option<VisitRecording>> {
        let mut recorder = self.recorder.lock().await;
        if !recorder.is_recording() {
            return Ok(None);
        }
        Ok(Some(recorder.stop_recording(visit_end).await?))
    }

    /// Grabs the most recently buffered frame's JPEG bytes as the visit's
    /// thumbnail, writing them straight through with no re-encode.
    async fn save_thumbnail(&self, at: DateTime<Utc>) -> Result<Option<String>> {
        let Some(frame) = self.buffer.recent(1.0).into_iter().last() else {
            return Ok(None);
        };
        let date = local_date_string(at, self.timezone);
        let time = local_time_string(at, self.timezone);
        let path = self.config.clips_dir_path().join(&date).join(format!("{time}_thumb.jpg"));
        if let Some(parent) = path.parent() {
            tokio::fs::create_dir_all(parent).await?;
        }
        tokio::fs::write(&path, frame.jpeg_data.as_slice()).await?;
        Ok(Some(path.display().to_string()))
    }

    async fn begin_visit_accumulator(&self, start_time: DateTime<Utc>) {
        let date = local_date_string(start_time, self.timezone).replace('-', "");
        let time = local_time_string(start_time, self.timezone);
        let id = format!("{date}_{time}");

        let mut visit = self.visit.lock().await;
        *visit = Some(VisitAccumulator {
            id,
            start_time,
            peak_confidence: 0.0,
            thumbnail_path: None,
            arrival_clip_path: None,
        });
    }

    async fn track_peak_confidence(&self, detections: &[Detection]) {
        let Some(max_confidence) = detections.iter().map(|d| d.confidence).fold(None, |acc: Option<f64>, c| {
            Some(acc.map_or(c, |a| a.max(c)))
        }) else {
            return;
        };
        let mut visit = self.visit.lock().await;
        if let Some(acc) = visit.as_mut() {
            if max_confidence > acc.peak_confidence {
                acc.peak_confidence = max_confidence;
            }
        }
    }

    async fn finalize_visit_record(
        &self,
        end_time: DateTime<Utc>,
        recording: Option<VisitRecording>,
        departure_clip_path: Option<String>,
    ) -> Result<()> {
        let Some(acc) = self.visit.lock().await.take() else {
            warn!("departure fired with no in-progress visit accumulator, skipping event record");
            return Ok(());
        };

        let duration_seconds = (end_time - acc.start_time).num_seconds().max(0);
        let record = VisitRecord {
            id: acc.id,
            start_time: acc.start_time,
            end_time: Some(end_time),
            duration_seconds,
            duration_str: format_duration(duration_seconds),
            peak_confidence: (acc.peak_confidence * 1000.0).round() / 1000.0,
            thumbnail_path: acc.thumbnail_path,
            arrival_clip_path: acc.arrival_clip_path,
            departure_clip_path,
        };

        if let Some(recording) = &recording {
            info!(
                frame_count = recording.frame_count,
                recording_duration_seconds = recording.recording_duration_seconds,
                events_logged = recording.events.len(),
                "visit recording finalized"
            );
        }

        self.event_store.append(&record).await
    }

    async fn log_recorder_event(&self, label: &str, detail: &str) {
        let mut recorder = self.recorder.lock().await;
        if recorder.is_recording() {
            if let Err(e) = recorder.log_event(label, detail).await {
                warn!(error = %e, "failed to log recorder event");
            }
        }
    }
}
