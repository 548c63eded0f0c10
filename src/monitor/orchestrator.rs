use super::types::{ComponentState, ShutdownReason};
use crate::capture::StreamCapture;
use crate::clip_manager::{ClipManager, ClipManagerConfig};
use crate::config::KanyoConfig;
use crate::detector::Detector;
use crate::encoder::EncoderProbe;
use crate::error::Result;
use crate::events::EventStore;
use crate::notifications::{NotificationGate, Notifier};
use crate::recorder::VisitRecorder;
use crate::ring_buffer::FrameBuffer;
use crate::state_machine::BehaviorStateMachine;
use crate::time::parse_timezone;
use chrono_tz::Tz;
use std::collections::HashMap;
use std::sync::Arc;
use tokio::sync::{oneshot, Mutex};
use tokio_util::sync::CancellationToken;

/// Coordinates one stream's capture → detect → behavior state machine → clip
/// pipeline end to end (SPEC_FULL.md §4.9).
pub struct Monitor {
    pub(super) config: KanyoConfig,
    pub(super) timezone: Tz,

    pub(super) detector: Arc<dyn Detector>,
    pub(super) notifier: Arc<dyn Notifier>,

    pub(super) buffer: Arc<FrameBuffer>,
    pub(super) event_store: Arc<EventStore>,
    pub(super) clip_manager: Arc<ClipManager>,
    pub(super) notification_gate: Arc<NotificationGate>,
    pub(super) encoder_probe: Arc<EncoderProbe>,

    pub(super) capture: Mutex<StreamCapture>,
    pub(super) recorder: Mutex<VisitRecorder>,
    pub(super) state_machine: Mutex<BehaviorStateMachine>,
    pub(super) visit: Mutex<Option<super::process::VisitAccumulator>>,

    pub(super) component_states: Arc<Mutex<HashMap<String, ComponentState>>>,
    pub(super) shutdown_sender: Option<oneshot::Sender<ShutdownReason>>,
    pub(super) shutdown_receiver: Option<oneshot::Receiver<ShutdownReason>>,
    pub(super) cancellation_token: CancellationToken,
}

impl Monitor {
    pub async fn new(config: KanyoConfig, detector: Arc<dyn Detector>, notifier: Arc<dyn Notifier>) -> Result<Self> {
        let timezone = parse_timezone(&config.stream.timezone);

        let buffer = Arc::new(FrameBuffer::new(
            config.buffer.buffer_seconds,
            config.clip.fps,
            config.buffer.jpeg_quality,
        ));

        let event_store = Arc::new(EventStore::new(config.clips_dir_path(), timezone));

        let encoder_probe = Arc::new(EncoderProbe::new());
        let encoder = encoder_probe.detect(false).await;

        let clip_manager = Arc::new(ClipManager::new(
            Arc::clone(&buffer),
            encoder,
            ClipManagerConfig {
                arrival_before: config.clip.arrival_before,
                arrival_after: config.clip.arrival_after,
                departure_before: config.clip.departure_before,
                departure_after: config.clip.departure_after,
                state_change_before: config.clip.state_change_before,
                state_change_after: config.clip.state_change_after,
                state_change_cooldown: config.clip.state_change_cooldown,
                fps: config.clip.fps,
                crf: config.clip.crf,
                clips_dir: config.clips_dir_path(),
                timezone,
            },
        ));

        let notification_gate = Arc::new(NotificationGate::new(config.notification.cooldown_minutes));

        let state_machine = BehaviorStateMachine::new(
            config.behavior.exit_timeout,
            config.behavior.roosting_threshold,
            config.behavior.roosting_exit_timeout,
            config.behavior.activity_timeout,
        );

        let capture = StreamCapture::new(config.stream.width, config.stream.height, config.stream.frame_interval);
        let recorder = VisitRecorder::new();

        let (shutdown_sender, shutdown_receiver) = oneshot::channel();

        Ok(Self {
            config,
            timezone,
            detector,
            notifier,
            buffer,
            event_store,
            clip_manager,
            notification_gate,
            encoder_probe,
            capture: Mutex::new(capture),
            recorder: Mutex::new(recorder),
            state_machine: Mutex::new(state_machine),
            visit: Mutex::new(None),
            component_states: Arc::new(Mutex::new(HashMap::new())),
            shutdown_sender: Some(shutdown_sender),
            shutdown_receiver: Some(shutdown_receiver),
            cancellation_token: CancellationToken::new(),
        })
    }
}
