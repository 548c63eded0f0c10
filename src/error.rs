#![allow(dead_code)]

use std::time::Duration;
use thiserror::Error;

/// Top-level error type for the kanyo daemon.
#[derive(Error, Debug)]
pub enum KanyoError {
    #[error("Configuration error: {0}")]
    Config(#[from] ConfigError),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("Serialization error: {0}")]
    Serialization(#[from] toml::ser::Error),

    #[error("Deserialization error: {0}")]
    Deserialization(#[from] toml::de::Error),

    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),

    #[error("Stream capture error: {0}")]
    Capture(#[from] CaptureError),

    #[error("Visit recorder error: {0}")]
    Recorder(#[from] RecorderError),

    #[error("Event store error: {0}")]
    EventStore(#[from] EventStoreError),

    #[error("Clip extraction error: {0}")]
    Clip(#[from] ClipError),

    #[error("Frame buffer error: {0}")]
    Buffer(#[from] BufferError),

    #[error("System error: {message}")]
    System { message: String },

    #[error("Component error in {component}: {message}")]
    Component { component: String, message: String },

    #[error("Graceful shutdown requested")]
    Shutdown,
}

/// Configuration-related failures. Always fatal at startup (§7.1).
#[derive(Error, Debug, Clone)]
pub enum ConfigError {
    #[error("missing required configuration key: {key}")]
    MissingKey { key: String },

    #[error("invalid value for {key}: {details}")]
    InvalidValue { key: String, details: String },

    #[error("timing invariant violated: {0}")]
    InvariantViolation(String),

    #[error("{0}")]
    Message(String),
}

/// URL resolution and stream capture failures (§7.2, §7.3).
#[derive(Error, Debug, Clone)]
pub enum CaptureError {
    #[error("resolver subprocess failed: {details}")]
    ResolverFailed { details: String },

    #[error("resolver precondition check failed, fallback exhausted")]
    PreconditionExhausted,

    #[error("connect failed: {details}")]
    ConnectFailed { details: String },

    #[error("stream read returned no frame (transient)")]
    TransientRead,

    #[error("reconnect failed after {attempts} attempt(s)")]
    ReconnectFailed { attempts: u32 },
}

/// Visit recorder / encoder subprocess failures (§7.4, §7.5).
#[derive(Error, Debug, Clone)]
pub enum RecorderError {
    #[error("no hardware or software encoder available")]
    NoEncoderAvailable,

    #[error("encoder subprocess exited nonzero: {details}")]
    EncoderExited { details: String },

    #[error("encoder stdin not writable within {timeout:?}, frame dropped")]
    Stall { timeout: Duration },

    #[error("failed to spawn encoder subprocess: {0}")]
    Spawn(String),

    #[error("no active recording")]
    NotRecording,

    #[error("recording already in progress")]
    AlreadyRecording,
}

/// Event store failures (§7.6).
#[derive(Error, Debug, Clone)]
pub enum EventStoreError {
    #[error("event file corrupt, renamed to .bak: {path}")]
    CorruptFile { path: String },

    #[error("failed to write event file {path}: {details}")]
    WriteFailed { path: String, details: String },
}

/// Clip extraction failures (§7.7). Never propagated past the clip manager boundary.
#[derive(Error, Debug, Clone)]
pub enum ClipError {
    #[error("extraction subprocess exited nonzero: {details}")]
    ExtractionFailed { details: String },

    #[error("no frames in requested range")]
    EmptyRange,

    #[error("worker pool has shut down")]
    PoolClosed,
}

/// Frame ring buffer failures.
#[derive(Error, Debug, Clone)]
pub enum BufferError {
    #[error("JPEG encoding failed: {details}")]
    EncodeFailed { details: String },

    #[error("JPEG decoding failed: {details}")]
    DecodeFailed { details: String },
}

impl KanyoError {
    pub fn system<S: Into<String>>(message: S) -> Self {
        Self::System {
            message: message.into(),
        }
    }

    pub fn component<S: Into<String>>(component: S, message: S) -> Self {
        Self::Component {
            component: component.into(),
            message: message.into(),
        }
    }

    /// Whether the detection loop may simply log and continue past this error.
    pub fn is_recoverable(&self) -> bool {
        match self {
            KanyoError::Capture(CaptureError::TransientRead) => true,
            KanyoError::Capture(CaptureError::ResolverFailed { .. }) => true,
            KanyoError::Recorder(RecorderError::Stall { .. }) => true,
            KanyoError::Recorder(RecorderError::EncoderExited { .. }) => true,
            KanyoError::EventStore(EventStoreError::CorruptFile { .. }) => true,
            KanyoError::Clip(_) => true,
            KanyoError::Io(_) => true,
            KanyoError::Config(_) => false,
            KanyoError::Shutdown => false,
            _ => false,
        }
    }

    pub fn component_name(&self) -> String {
        match self {
            KanyoError::Capture(_) => "capture".to_string(),
            KanyoError::Recorder(_) => "recorder".to_string(),
            KanyoError::EventStore(_) => "event_store".to_string(),
            KanyoError::Clip(_) => "clip".to_string(),
            KanyoError::Buffer(_) => "buffer".to_string(),
            KanyoError::Config(_) => "config".to_string(),
            KanyoError::Component { component, .. } => component.clone(),
            _ => "system".to_string(),
        }
    }

    pub fn severity(&self) -> ErrorSeverity {
        match self {
            KanyoError::Shutdown => ErrorSeverity::Info,
            KanyoError::Config(_) => ErrorSeverity::Critical,
            KanyoError::Recorder(RecorderError::Stall { .. }) => ErrorSeverity::Warning,
            KanyoError::Clip(_) => ErrorSeverity::Warning,
            _ if self.is_recoverable() => ErrorSeverity::Warning,
            _ => ErrorSeverity::Error,
        }
    }
}

/// Error severity levels for structured logging.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ErrorSeverity {
    Info,
    Warning,
    Error,
    Critical,
}

impl ErrorSeverity {
    pub fn to_tracing_level(&self) -> tracing::Level {
        match self {
            ErrorSeverity::Info => tracing::Level::INFO,
            ErrorSeverity::Warning => tracing::Level::WARN,
            ErrorSeverity::Error => tracing::Level::ERROR,
            ErrorSeverity::Critical => tracing::Level::ERROR,
        }
    }
}

pub type Result<T> = std::result::Result<T, KanyoError>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn error_display_formatting() {
        let e = KanyoError::Capture(CaptureError::TransientRead);
        assert_eq!(
            e.to_string(),
            "Stream capture error: stream read returned no frame (transient)"
        );

        let e = KanyoError::system("boom");
        assert_eq!(e.to_string(), "System error: boom");
    }

    #[test]
    fn recoverable_classification() {
        assert!(KanyoError::Capture(CaptureError::TransientRead).is_recoverable());
        assert!(KanyoError::Recorder(RecorderError::Stall {
            timeout: Duration::from_millis(500)
        })
        .is_recoverable());
        assert!(!KanyoError::Shutdown.is_recoverable());
        assert!(!KanyoError::Config(ConfigError::Message("bad".into())).is_recoverable());
    }

    #[test]
    fn component_name_extraction() {
        assert_eq!(
            KanyoError::Capture(CaptureError::TransientRead).component_name(),
            "capture"
        );
        assert_eq!(
            KanyoError::component("custom", "oops").component_name(),
            "custom"
        );
    }

    #[test]
    fn severity_levels() {
        assert_eq!(KanyoError::Shutdown.severity(), ErrorSeverity::Info);
        assert_eq!(
            KanyoError::Config(ConfigError::Message("x".into())).severity(),
            ErrorSeverity::Critical
        );
        assert_eq!(
            ErrorSeverity::Critical.to_tracing_level(),
            tracing::Level::ERROR
        );
    }
}
