use super::types::ComponentState;
use super::Monitor;
use crate::detector::matches_target;
use crate::error::Result;
use chrono::{DateTime, Utc};
use std::time::Duration;
use tracing::{error, info};

impl Monitor {
    /// Register component states before anything starts.
    pub async fn initialize(&mut self) -> Result<()> {
        info!("initializing monitor components");
        let mut states = self.component_states.lock().await;
        states.insert("capture".to_string(), ComponentState::Stopped);
        states.insert("recorder".to_string(), ComponentState::Stopped);
        drop(states);
        Ok(())
    }

    /// Connect the capture pipeline and run the arrival-confirmation window
    /// before normal operation begins. The processing loop itself starts once
    /// [`Monitor::run`] is called.
    pub async fn start(&mut self) -> Result<()> {
        info!("starting monitor");
        self.set_component_state("capture", ComponentState::Starting).await;

        let source = self.config.stream.video_source.clone();
        {
            let mut capture = self.capture.lock().await;
            capture.connect(&source).await.map_err(|e| {
                error!(error = %e, "failed to connect stream capture");
                e
            })?;
        }
        self.set_component_state("capture", ComponentState::Running).await;

        self.run_arrival_confirmation_window().await?;

        info!("monitor started");
        Ok(())
    }

    /// Watches the stream for `arrival.confirmation_seconds` right after
    /// connecting. If the subject is present for at least
    /// `arrival.confirmation_ratio` of that window, the visit is treated as
    /// already in progress (confirmed straight into ROOSTING, no ARRIVED
    /// event); otherwise the machine resets to ABSENT so a normal arrival can
    /// be detected later (SPEC_FULL.md §4.7 PENDING_STARTUP, §4.9 init).
    async fn run_arrival_confirmation_window(&mut self) -> Result<()> {
        let window = Duration::from_secs(self.config.arrival.confirmation_seconds as u64);
        let deadline = tokio::time::Instant::now() + window;
        let now = Utc::now();

        {
            let mut state_machine = self.state_machine.lock().await;
            state_machine.enter_pending_startup(now);
        }

        let mut total_frames = 0u32;
        let mut detected_frames = 0u32;
        let mut first_detection: Option<DateTime<Utc>> = None;

        while tokio::time::Instant::now() < deadline {
            let frame = {
                let mut capture = self.capture.lock().await;
                capture.read_frame().await?
            };
            let Some(frame) = frame else {
                break;
            };

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

            total_frames += 1;
            if detected {
                detected_frames += 1;
                if first_detection.is_none() {
                    first_detection = Some(frame.timestamp);
                }
            }
        }

        let ratio = if total_frames == 0 {
            0.0
        } else {
            detected_frames as f64 / total_frames as f64
        };
        info!(total_frames, detected_frames, ratio, "arrival confirmation window complete");

        let confirmed = ratio >= self.config.arrival.confirmation_ratio;
        let events = {
            let mut state_machine = self.state_machine.lock().await;
            if confirmed {
                let visit_start = first_detection.unwrap_or(now);
                state_machine.confirm_startup_presence(visit_start)
            } else {
                state_machine.reset_to_absent(Utc::now());
                Vec::new()
            }
        };

        for event in events {
            let visit_start = first_detection.unwrap_or(now);
            self.handle_behavior_event(event, visit_start).await?;
        }

        Ok(())
    }
}
