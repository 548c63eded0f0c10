pub mod capture;
pub mod clip_manager;
pub mod config;
pub mod detector;
pub mod encoder;
pub mod error;
pub mod events;
pub mod frame;
pub mod logging;
pub mod monitor;
pub mod notifications;
pub mod recorder;
pub mod ring_buffer;
pub mod state_machine;
pub mod time;

pub use config::KanyoConfig;
pub use detector::{Detector, StubDetector};
pub use error::{KanyoError, Result};
pub use monitor::{ComponentState, Monitor, ShutdownReason};
pub use notifications::{LoggingNotifier, NotificationGate, Notifier};
