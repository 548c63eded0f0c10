#![allow(dead_code)]

use crate::error::ConfigError;
use config::{Config, Environment, File};
use serde::{Deserialize, Serialize};
use std::path::Path;
use tracing::{debug, info};

#[derive(Debug, Deserialize, Serialize, Clone)]
pub struct KanyoConfig {
    pub stream: StreamConfig,
    pub behavior: BehaviorConfig,
    pub buffer: BufferConfig,
    pub clip: ClipConfig,
    pub arrival: ArrivalConfig,
    pub notification: NotificationConfig,
    pub detection: DetectionConfig,
    pub runtime: RuntimeConfig,
}

#[derive(Debug, Deserialize, Serialize, Clone)]
pub struct StreamConfig {
    /// Video source URL or local path. Required; validated non-empty.
    #[serde(default)]
    pub video_source: String,

    /// IANA timezone name (or a legacy numeric UTC offset, see `crate::time`).
    #[serde(default = "default_timezone")]
    pub timezone: String,

    /// Minimum detector confidence to count as a positive detection.
    #[serde(default = "default_detection_confidence")]
    pub detection_confidence: f64,

    /// Optional lower confidence threshold used for infrared/night frames.
    pub detection_confidence_ir: Option<f64>,

    /// Run the detector on every Nth frame during normal operation.
    #[serde(default = "default_frame_interval")]
    pub frame_interval: u32,

    /// Decoded frame width in pixels, must match the source's actual output.
    #[serde(default = "default_width")]
    pub width: u32,

    /// Decoded frame height in pixels, must match the source's actual output.
    #[serde(default = "default_height")]
    pub height: u32,

    /// Stream identifier used for the per-stream data directory.
    #[serde(default = "default_stream_id")]
    pub stream_id: String,

    /// Root directory under which `clips/` and `logs/` live for this stream.
    #[serde(default = "default_data_root")]
    pub data_root: String,
}

#[derive(Debug, Deserialize, Serialize, Clone)]
pub struct BehaviorConfig {
    #[serde(default = "default_exit_timeout")]
    pub exit_timeout: u64,

    #[serde(default = "default_roosting_threshold")]
    pub roosting_threshold: u64,

    #[serde(default = "default_roosting_exit_timeout")]
    pub roosting_exit_timeout: u64,

    #[serde(default = "default_activity_timeout")]
    pub activity_timeout: u64,
}

#[derive(Debug, Deserialize, Serialize, Clone)]
pub struct BufferConfig {
    #[serde(default = "default_buffer_seconds")]
    pub buffer_seconds: u32,

    #[serde(default = "default_jpeg_quality")]
    pub jpeg_quality: u8,
}

#[derive(Debug, Deserialize, Serialize, Clone)]
pub struct ClipConfig {
    #[serde(default = "default_clip_arrival_before")]
    pub arrival_before: u32,
    #[serde(default = "default_clip_arrival_after")]
    pub arrival_after: u32,
    #[serde(default = "default_clip_departure_before")]
    pub departure_before: u32,
    #[serde(default = "default_clip_departure_after")]
    pub departure_after: u32,
    #[serde(default = "default_clip_state_change_before")]
    pub state_change_before: u32,
    #[serde(default = "default_clip_state_change_after")]
    pub state_change_after: u32,
    #[serde(default = "default_clip_state_change_cooldown")]
    pub state_change_cooldown: u32,
    #[serde(default = "default_clip_fps")]
    pub fps: u32,
    #[serde(default = "default_clip_crf")]
    pub crf: u32,
    #[serde(default = "default_clips_dir")]
    pub clips_dir: String,
}

#[derive(Debug, Deserialize, Serialize, Clone)]
pub struct ArrivalConfig {
    #[serde(default = "default_arrival_confirmation_seconds")]
    pub confirmation_seconds: u32,
    #[serde(default = "default_arrival_confirmation_ratio")]
    pub confirmation_ratio: f64,
}

#[derive(Debug, Deserialize, Serialize, Clone)]
pub struct NotificationConfig {
    #[serde(default = "default_notification_cooldown_minutes")]
    pub cooldown_minutes: u32,
}

#[derive(Debug, Deserialize, Serialize, Clone)]
pub struct DetectionConfig {
    #[serde(default = "default_animal_classes")]
    pub animal_classes: Vec<u32>,
    #[serde(default = "default_detect_any_animal")]
    pub detect_any_animal: bool,
}

#[derive(Debug, Deserialize, Serialize, Clone)]
pub struct RuntimeConfig {
    pub max_runtime_seconds: Option<u64>,
}

impl KanyoConfig {
    /// Load configuration from default sources (file + environment variables).
    pub fn load() -> Result<Self, ConfigError> {
        Self::load_from_file("kanyo.toml")
    }

    /// Load configuration from a specific file path, layered as defaults → file → env.
    pub fn load_from_file<P: AsRef<Path>>(path: P) -> Result<Self, ConfigError> {
        let path_str = path.as_ref().to_string_lossy();
        debug!("Loading configuration from: {}", path_str);

        let settings = Config::builder()
            .set_default("stream.video_source", "")
            .map_err(wrap)?
            .set_default("stream.timezone", default_timezone())
            .map_err(wrap)?
            .set_default("stream.detection_confidence", default_detection_confidence())
            .map_err(wrap)?
            .set_default("stream.frame_interval", default_frame_interval())
            .map_err(wrap)?
            .set_default("stream.width", default_width())
            .map_err(wrap)?
            .set_default("stream.height", default_height())
            .map_err(wrap)?
            .set_default("stream.stream_id", default_stream_id())
            .map_err(wrap)?
            .set_default("stream.data_root", default_data_root())
            .map_err(wrap)?
            .set_default("behavior.exit_timeout", default_exit_timeout())
            .map_err(wrap)?
            .set_default("behavior.roosting_threshold", default_roosting_threshold())
            .map_err(wrap)?
            .set_default(
                "behavior.roosting_exit_timeout",
                default_roosting_exit_timeout(),
            )
            .map_err(wrap)?
            .set_default("behavior.activity_timeout", default_activity_timeout())
            .map_err(wrap)?
            .set_default("buffer.buffer_seconds", default_buffer_seconds())
            .map_err(wrap)?
            .set_default("buffer.jpeg_quality", default_jpeg_quality() as i64)
            .map_err(wrap)?
            .set_default("clip.arrival_before", default_clip_arrival_before())
            .map_err(wrap)?
            .set_default("clip.arrival_after", default_clip_arrival_after())
            .map_err(wrap)?
            .set_default("clip.departure_before", default_clip_departure_before())
            .map_err(wrap)?
            .set_default("clip.departure_after", default_clip_departure_after())
            .map_err(wrap)?
            .set_default(
                "clip.state_change_before",
                default_clip_state_change_before(),
            )
            .map_err(wrap)?
            .set_default(
                "clip.state_change_after",
                default_clip_state_change_after(),
            )
            .map_err(wrap)?
            .set_default(
                "clip.state_change_cooldown",
                default_clip_state_change_cooldown(),
            )
            .map_err(wrap)?
            .set_default("clip.fps", default_clip_fps())
            .map_err(wrap)?
            .set_default("clip.crf", default_clip_crf())
            .map_err(wrap)?
            .set_default("clip.clips_dir", default_clips_dir())
            .map_err(wrap)?
            .set_default(
                "arrival.confirmation_seconds",
                default_arrival_confirmation_seconds(),
            )
            .map_err(wrap)?
            .set_default(
                "arrival.confirmation_ratio",
                default_arrival_confirmation_ratio(),
            )
            .map_err(wrap)?
            .set_default(
                "notification.cooldown_minutes",
                default_notification_cooldown_minutes(),
            )
            .map_err(wrap)?
            .set_default(
                "detection.animal_classes",
                default_animal_classes()
                    .into_iter()
                    .map(|c| c as i64)
                    .collect::<Vec<_>>(),
            )
            .map_err(wrap)?
            .set_default("detection.detect_any_animal", default_detect_any_animal())
            .map_err(wrap)?
            .add_source(File::with_name(&path_str).required(false))
            .add_source(Environment::with_prefix("KANYO").separator("_"))
            .build()
            .map_err(wrap)?;

        let config: KanyoConfig = settings.try_deserialize().map_err(wrap)?;

        info!("Configuration loaded successfully");
        debug!("Final configuration: {:#?}", config);

        Ok(config)
    }

    /// Validate every timing invariant and required field, collecting all violations
    /// rather than failing on the first (§10.1 of SPEC_FULL.md).
    pub fn validate(&self) -> Result<(), ConfigError> {
        let mut problems = Vec::new();

        if self.stream.video_source.trim().is_empty() {
            problems.push("stream.video_source is required".to_string());
        }
        if self.buffer.buffer_seconds == 0 {
            problems.push("buffer.buffer_seconds must be greater than 0".to_string());
        }
        if self.clip.fps == 0 {
            problems.push("clip.fps must be greater than 0".to_string());
        }
        if self.stream.frame_interval == 0 {
            problems.push("stream.frame_interval must be greater than 0".to_string());
        }
        if self.stream.width == 0 || self.stream.height == 0 {
            problems.push("stream.width and stream.height must be greater than 0".to_string());
        }

        if self.behavior.roosting_threshold <= self.behavior.exit_timeout {
            problems.push(format!(
                "behavior.roosting_threshold ({}) must be greater than behavior.exit_timeout ({})",
                self.behavior.roosting_threshold, self.behavior.exit_timeout
            ));
        }
        if self.behavior.activity_timeout >= self.behavior.roosting_exit_timeout {
            problems.push(format!(
                "behavior.activity_timeout ({}) must be less than behavior.roosting_exit_timeout ({})",
                self.behavior.activity_timeout, self.behavior.roosting_exit_timeout
            ));
        }
        if self.behavior.exit_timeout >= self.behavior.roosting_exit_timeout {
            problems.push(format!(
                "behavior.exit_timeout ({}) must be less than behavior.roosting_exit_timeout ({})",
                self.behavior.exit_timeout, self.behavior.roosting_exit_timeout
            ));
        }

        if problems.is_empty() {
            Ok(())
        } else {
            Err(ConfigError::InvariantViolation(problems.join("; ")))
        }
    }

    pub fn clips_dir_path(&self) -> std::path::PathBuf {
        std::path::Path::new(&self.stream.data_root)
            .join(&self.stream.stream_id)
            .join(&self.clip.clips_dir)
    }

    pub fn logs_dir_path(&self) -> std::path::PathBuf {
        std::path::Path::new(&self.stream.data_root)
            .join(&self.stream.stream_id)
            .join("logs")
    }
}

fn wrap(e: config::ConfigError) -> ConfigError {
    ConfigError::Message(e.to_string())
}

impl Default for KanyoConfig {
    fn default() -> Self {
        Self {
            stream: StreamConfig {
                video_source: String::new(),
                timezone: default_timezone(),
                detection_confidence: default_detection_confidence(),
                detection_confidence_ir: None,
                frame_interval: default_frame_interval(),
                width: default_width(),
                height: default_height(),
                stream_id: default_stream_id(),
                data_root: default_data_root(),
            },
            behavior: BehaviorConfig {
                exit_timeout: default_exit_timeout(),
                roosting_threshold: default_roosting_threshold(),
                roosting_exit_timeout: default_roosting_exit_timeout(),
                activity_timeout: default_activity_timeout(),
            },
            buffer: BufferConfig {
                buffer_seconds: default_buffer_seconds(),
                jpeg_quality: default_jpeg_quality(),
            },
            clip: ClipConfig {
                arrival_before: default_clip_arrival_before(),
                arrival_after: default_clip_arrival_after(),
                departure_before: default_clip_departure_before(),
                departure_after: default_clip_departure_after(),
                state_change_before: default_clip_state_change_before(),
                state_change_after: default_clip_state_change_after(),
                state_change_cooldown: default_clip_state_change_cooldown(),
                fps: default_clip_fps(),
                crf: default_clip_crf(),
                clips_dir: default_clips_dir(),
            },
            arrival: ArrivalConfig {
                confirmation_seconds: default_arrival_confirmation_seconds(),
                confirmation_ratio: default_arrival_confirmation_ratio(),
            },
            notification: NotificationConfig {
                cooldown_minutes: default_notification_cooldown_minutes(),
            },
            detection: DetectionConfig {
                animal_classes: default_animal_classes(),
                detect_any_animal: default_detect_any_animal(),
            },
            runtime: RuntimeConfig {
                max_runtime_seconds: None,
            },
        }
    }
}

fn default_timezone() -> String {
    "UTC".to_string()
}
fn default_detection_confidence() -> f64 {
    0.5
}
fn default_frame_interval() -> u32 {
    30
}
fn default_width() -> u32 {
    640
}
fn default_height() -> u32 {
    480
}
fn default_stream_id() -> String {
    "default".to_string()
}
fn default_data_root() -> String {
    "./data".to_string()
}

fn default_exit_timeout() -> u64 {
    300
}
fn default_roosting_threshold() -> u64 {
    1800
}
fn default_roosting_exit_timeout() -> u64 {
    600
}
fn default_activity_timeout() -> u64 {
    180
}

fn default_buffer_seconds() -> u32 {
    60
}
fn default_jpeg_quality() -> u8 {
    85
}

fn default_clip_arrival_before() -> u32 {
    15
}
fn default_clip_arrival_after() -> u32 {
    30
}
fn default_clip_departure_before() -> u32 {
    30
}
fn default_clip_departure_after() -> u32 {
    15
}
fn default_clip_state_change_before() -> u32 {
    15
}
fn default_clip_state_change_after() -> u32 {
    30
}
fn default_clip_state_change_cooldown() -> u32 {
    300
}
fn default_clip_fps() -> u32 {
    30
}
fn default_clip_crf() -> u32 {
    23
}
fn default_clips_dir() -> String {
    "clips".to_string()
}

fn default_arrival_confirmation_seconds() -> u32 {
    10
}
fn default_arrival_confirmation_ratio() -> f64 {
    0.3
}

fn default_notification_cooldown_minutes() -> u32 {
    5
}

fn default_animal_classes() -> Vec<u32> {
    (14..=23).collect()
}
fn default_detect_any_animal() -> bool {
    true
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn default_config_fails_validation_on_missing_source() {
        let config = KanyoConfig::default();
        assert!(config.validate().is_err());
    }

    #[test]
    fn valid_config_passes() {
        let mut config = KanyoConfig::default();
        config.stream.video_source = "https://example.com/stream".to_string();
        assert!(config.validate().is_ok());
    }

    #[test]
    fn rejects_roosting_threshold_not_greater_than_exit_timeout() {
        let mut config = KanyoConfig::default();
        config.stream.video_source = "x".to_string();
        config.behavior.roosting_threshold = config.behavior.exit_timeout;
        let err = config.validate().unwrap_err();
        assert!(err.to_string().contains("roosting_threshold"));
    }

    #[test]
    fn rejects_activity_timeout_not_less_than_roosting_exit_timeout() {
        let mut config = KanyoConfig::default();
        config.stream.video_source = "x".to_string();
        config.behavior.activity_timeout = config.behavior.roosting_exit_timeout;
        assert!(config.validate().is_err());
    }

    #[test]
    fn rejects_exit_timeout_not_less_than_roosting_exit_timeout() {
        let mut config = KanyoConfig::default();
        config.stream.video_source = "x".to_string();
        config.behavior.exit_timeout = config.behavior.roosting_exit_timeout;
        assert!(config.validate().is_err());
    }

    #[test]
    fn collects_multiple_violations() {
        let mut config = KanyoConfig::default();
        config.behavior.roosting_threshold = 10;
        config.behavior.exit_timeout = 10;
        let err = config.validate().unwrap_err().to_string();
        assert!(err.contains("video_source"));
        assert!(err.contains("roosting_threshold"));
    }

    #[test]
    fn toml_round_trip_preserves_defaults() {
        let config = KanyoConfig::default();
        let text = toml::to_string_pretty(&config).expect("serialize");
        let parsed: KanyoConfig = toml::from_str(&text).expect("deserialize");
        assert_eq!(parsed.behavior.exit_timeout, config.behavior.exit_timeout);
        assert_eq!(parsed.clip.fps, config.clip.fps);
    }

    #[test]
    fn environment_variable_override() {
        std::env::set_var("KANYO_STREAM_FRAME_INTERVAL", "5");
        std::env::set_var("KANYO_STREAM_VIDEO_SOURCE", "rtsp://example");
        assert_eq!(
            std::env::var("KANYO_STREAM_FRAME_INTERVAL").unwrap(),
            "5"
        );
        std::env::remove_var("KANYO_STREAM_FRAME_INTERVAL");
        std::env::remove_var("KANYO_STREAM_VIDEO_SOURCE");
    }
}
