//! Notification gate (SPEC_FULL.md §4.8): rate-limits outbound visit
//! notifications per stream so a flapping detector doesn't spam the
//! configured channel.

use crate::logging::EVENT_LEVEL;
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use parking_lot::Mutex;
use tracing::event;

#[async_trait]
pub trait Notifier: Send + Sync {
    async fn notify(&self, subject: &str, body: &str);
}

/// Default notifier: logs the notification instead of delivering anywhere,
/// matching SPEC_FULL.md §10.6's pluggable-collaborator stance on
/// out-of-scope integrations.
pub struct LoggingNotifier;

#[async_trait]
impl Notifier for LoggingNotifier {
    async fn notify(&self, subject: &str, body: &str) {
        event!(EVENT_LEVEL, subject, body, "notification");
    }
}

/// Tracks the last time a notification went out and suppresses repeats inside
/// the configured cooldown window.
pub struct NotificationGate {
    cooldown: chrono::Duration,
    last_sent: Mutex<Option<DateTime<Utc>>>,
}

impl NotificationGate {
    pub fn new(cooldown_minutes: u32) -> Self {
        Self {
            cooldown: chrono::Duration::minutes(cooldown_minutes as i64),
            last_sent: Mutex::new(None),
        }
    }

    /// Send through `notifier` unless still within the cooldown of the last send.
    /// Returns whether the notification was actually sent.
    pub async fn maybe_notify(&self, notifier: &dyn Notifier, subject: &str, body: &str, now: DateTime<Utc>) -> bool {
        {
            let mut last_sent = self.last_sent.lock();
            if let Some(last) = *last_sent {
                if now - last < self.cooldown {
                    return false;
                }
            }
            *last_sent = Some(now);
        }
        notifier.notify(subject, body).await;
        true
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicUsize, Ordering};

    struct CountingNotifier(AtomicUsize);

    #[async_trait]
    impl Notifier for CountingNotifier {
        async fn notify(&self, _subject: &str, _body: &str) {
            self.0.fetch_add(1, Ordering::SeqCst);
        }
    }

    #[tokio::test]
    async fn suppresses_repeats_within_cooldown() {
        let gate = NotificationGate::new(5);
        let notifier = CountingNotifier(AtomicUsize::new(0));
        let t0 = Utc::now();

        assert!(gate.maybe_notify(&notifier, "s", "b", t0).await);
        assert!(!gate.maybe_notify(&notifier, "s", "b", t0 + chrono::Duration::minutes(1)).await);
        assert_eq!(notifier.0.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn sends_again_after_cooldown_elapses() {
        let gate = NotificationGate::new(5);
        let notifier = CountingNotifier(AtomicUsize::new(0));
        let t0 = Utc::now();

        assert!(gate.maybe_notify(&notifier, "s", "b", t0).await);
        assert!(gate.maybe_notify(&notifier, "s", "b", t0 + chrono::Duration::minutes(6)).await);
        assert_eq!(notifier.0.load(Ordering::SeqCst), 2);
    }
}
