//! Behavior state machine (SPEC_FULL.md §4.7).
//!
//! Five states, driven purely by per-frame detection booleans plus elapsed
//! time. Absence is tracked with a sticky `last_absence_start`: once the
//! subject is gone, the clock for every exit/roosting/activity timeout keeps
//! running from that moment, not from "now", so a flapping detector can't
//! keep resetting the timers. Roosting and Activity share that same clock,
//! so an activity spike never grants the visit a fresh departure timeout.

use chrono::{DateTime, Utc};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum BehaviorState {
    Absent,
    PendingStartup,
    Visiting,
    Roosting,
    Activity,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum BehaviorEvent {
    Arrived,
    Departed,
    Roosting,
    ActivityStart,
    ActivityEnd,
    StartupConfirmed,
}

pub struct BehaviorStateMachine {
    state: BehaviorState,
    exit_timeout: u64,
    roosting_threshold: u64,
    roosting_exit_timeout: u64,
    activity_timeout: u64,
    last_absence_start: Option<DateTime<Utc>>,
    visit_start: Option<DateTime<Utc>>,
    last_activity_seen: Option<DateTime<Utc>>,
    last_detection: Option<DateTime<Utc>>,
}

impl BehaviorStateMachine {
    pub fn new(exit_timeout: u64, roosting_threshold: u64, roosting_exit_timeout: u64, activity_timeout: u64) -> Self {
        Self {
            state: BehaviorState::Absent,
            exit_timeout,
            roosting_threshold,
            roosting_exit_timeout,
            activity_timeout,
            last_absence_start: None,
            visit_start: None,
            last_activity_seen: None,
            last_detection: None,
        }
    }

    pub fn state(&self) -> BehaviorState {
        self.state
    }

    pub fn visit_start(&self) -> Option<DateTime<Utc>> {
        self.visit_start
    }

    /// Timestamp of the most recent positive detection, regardless of current
    /// state. `Departed` is stamped with this, not the frame that triggered the
    /// timeout, since the subject was last actually seen here.
    pub fn last_detection(&self) -> Option<DateTime<Utc>> {
        self.last_detection
    }

    /// Startup grace period: on boot, presence detected within the confirmation
    /// window is treated as the continuation of a visit already in progress
    /// rather than a fresh arrival (SPEC_FULL.md §4.7 PENDING_STARTUP).
    pub fn enter_pending_startup(&mut self, now: DateTime<Utc>) {
        self.state = BehaviorState::PendingStartup;
        self.last_absence_start = Some(now);
    }

    /// Confirms presence found during the startup window. Enters ROOSTING
    /// directly (no ARRIVED is emitted — the visit was already in progress
    /// before the daemon booted) with `visit_start` set to the first detection
    /// observed during the window, not the confirmation time, so downstream
    /// durations aren't measured from zero.
    pub fn confirm_startup_presence(&mut self, visit_start: DateTime<Utc>) -> Vec<BehaviorEvent> {
        if self.state != BehaviorState::PendingStartup {
            return Vec::new();
        }
        self.state = BehaviorState::Roosting;
        self.visit_start = Some(visit_start);
        self.last_absence_start = None;
        self.last_activity_seen = Some(visit_start);
        vec![BehaviorEvent::StartupConfirmed]
    }

    pub fn reset_to_absent(&mut self, now: DateTime<Utc>) {
        self.state = BehaviorState::Absent;
        self.visit_start = None;
        self.last_activity_seen = None;
        self.last_absence_start = Some(now);
    }

    /// Advance the machine with one frame's detection result. Returns the events
    /// emitted by this transition, in order, if any.
    pub fn update(&mut self, detected: bool, now: DateTime<Utc>) -> Vec<BehaviorEvent> {
        let mut events = Vec::new();

        if detected {
            self.last_detection = Some(now);
            self.last_absence_start = None;
        } else if self.last_absence_start.is_none() {
            self.last_absence_start = Some(now);
        }

        match self.state {
            BehaviorState::Absent => {
                if detected {
                    self.state = BehaviorState::Visiting;
                    self.visit_start = Some(now);
                    events.push(BehaviorEvent::Arrived);
                }
            }
            BehaviorState::PendingStartup => {
                // Only `confirm_startup_presence` / `reset_to_absent` in the monitor
                // loop leave this state; frame updates while pending are tracked but
                // not acted on here.
            }
            BehaviorState::Visiting => {
                if !detected {
                    let absent_for = self.absence_seconds(now);
                    if absent_for >= self.exit_timeout {
                        events.push(BehaviorEvent::Departed);
                        self.state = BehaviorState::Absent;
                        self.visit_start = None;
                        self.last_activity_seen = None;
                    }
                } else if let Some(start) = self.visit_start {
                    let present_for = (now - start).num_seconds().max(0) as u64;
                    if present_for >= self.roosting_threshold {
                        events.push(BehaviorEvent::Roosting);
                        self.state = BehaviorState::Roosting;
                    }
                }
            }
            BehaviorState::Roosting => {
                if !detected {
                    let absent_for = self.absence_seconds(now);
                    if absent_for >= self.roosting_exit_timeout {
                        events.push(BehaviorEvent::Departed);
                        self.state = BehaviorState::Absent;
                        self.visit_start = None;
                        self.last_activity_seen = None;
                    } else if absent_for >= self.activity_timeout {
                        events.push(BehaviorEvent::ActivityStart);
                        self.state = BehaviorState::Activity;
                    }
                } else {
                    self.last_activity_seen = Some(now);
                }
            }
            BehaviorState::Activity => {
                if detected {
                    events.push(BehaviorEvent::ActivityEnd);
                    self.state = BehaviorState::Roosting;
                    self.last_activity_seen = Some(now);
                } else {
                    let absent_for = self.absence_seconds(now);
                    if absent_for >= self.roosting_exit_timeout {
                        events.push(BehaviorEvent::Departed);
                        self.state = BehaviorState::Absent;
                        self.visit_start = None;
                        self.last_activity_seen = None;
                    }
                }
            }
        }

        events
    }

    fn absence_seconds(&self, now: DateTime<Utc>) -> u64 {
        match self.last_absence_start {
            Some(start) => (now - start).num_seconds().max(0) as u64,
            None => 0,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::Duration;

    fn machine() -> BehaviorStateMachine {
        // roosting_threshold(1800) > exit_timeout(300); activity_timeout(180) < roosting_exit_timeout(600) < roosting_threshold
        BehaviorStateMachine::new(300, 1800, 600, 180)
    }

    #[test]
    fn absent_to_visiting_on_first_detection() {
        let mut m = machine();
        let t0 = Utc::now();
        let events = m.update(true, t0);
        assert_eq!(events, vec![BehaviorEvent::Arrived]);
        assert_eq!(m.state(), BehaviorState::Visiting);
        assert_eq!(m.visit_start(), Some(t0));
    }

    #[test]
    fn departs_only_after_exit_timeout_elapses() {
        let mut m = machine();
        let t0 = Utc::now();
        m.update(true, t0);
        let events = m.update(false, t0 + Duration::seconds(100));
        assert!(events.is_empty());
        assert_eq!(m.state(), BehaviorState::Visiting);

        let events = m.update(false, t0 + Duration::seconds(301));
        assert_eq!(events, vec![BehaviorEvent::Departed]);
        assert_eq!(m.state(), BehaviorState::Absent);
    }

    #[test]
    fn transitions_to_roosting_after_threshold() {
        let mut m = machine();
        let t0 = Utc::now();
        m.update(true, t0);
        let events = m.update(true, t0 + Duration::seconds(1801));
        assert_eq!(events, vec![BehaviorEvent::Roosting]);
        assert_eq!(m.state(), BehaviorState::Roosting);
    }

    #[test]
    fn roosting_exit_uses_longer_timeout_than_visiting() {
        let mut m = machine();
        let t0 = Utc::now();
        m.update(true, t0);
        m.update(true, t0 + Duration::seconds(1801));
        assert_eq!(m.state(), BehaviorState::Roosting);

        let events = m.update(false, t0 + Duration::seconds(1801 + 179));
        assert!(events.is_empty(), "roosting exit should not fire before activity_timeout either");

        let events = m.update(false, t0 + Duration::seconds(1801 + 601));
        assert_eq!(events, vec![BehaviorEvent::Departed]);
    }

    #[test]
    fn roosting_to_activity_on_sustained_absence_then_back_on_redetection() {
        let mut m = machine();
        let t0 = Utc::now();
        m.update(true, t0);
        m.update(true, t0 + Duration::seconds(1801));
        assert_eq!(m.state(), BehaviorState::Roosting);

        // absent 181s: past activity_timeout(180), short of roosting_exit_timeout(600)
        let events = m.update(false, t0 + Duration::seconds(1801 + 181));
        assert_eq!(events, vec![BehaviorEvent::ActivityStart]);
        assert_eq!(m.state(), BehaviorState::Activity);

        // detection resumes: ends the activity spike, back to roosting
        let events = m.update(true, t0 + Duration::seconds(1801 + 200));
        assert_eq!(events, vec![BehaviorEvent::ActivityEnd]);
        assert_eq!(m.state(), BehaviorState::Roosting);
    }

    #[test]
    fn activity_departs_when_absence_reaches_roosting_exit_timeout() {
        let mut m = machine();
        let t0 = Utc::now();
        m.update(true, t0);
        m.update(true, t0 + Duration::seconds(1801));
        let events = m.update(false, t0 + Duration::seconds(1801 + 181));
        assert_eq!(events, vec![BehaviorEvent::ActivityStart]);
        assert_eq!(m.state(), BehaviorState::Activity);

        // same sticky absence clock, never redetected: departs once it crosses
        // roosting_exit_timeout, no return to roosting first.
        let events = m.update(false, t0 + Duration::seconds(1801 + 601));
        assert_eq!(events, vec![BehaviorEvent::Departed]);
        assert_eq!(m.state(), BehaviorState::Absent);
    }

    #[test]
    fn last_detection_is_exposed_and_used_for_departure_stamping() {
        let mut m = machine();
        let t0 = Utc::now();
        m.update(true, t0);
        let last_seen = t0 + Duration::seconds(50);
        m.update(true, last_seen);
        assert_eq!(m.last_detection(), Some(last_seen));

        let events = m.update(false, last_seen + Duration::seconds(301));
        assert_eq!(events, vec![BehaviorEvent::Departed]);
        // last_detection stays pinned to the last true positive, not the frame
        // that tipped the machine over the exit timeout.
        assert_eq!(m.last_detection(), Some(last_seen));
    }

    #[test]
    fn startup_confirmation_seeds_roosting_without_arrival_event() {
        let mut m = machine();
        let t0 = Utc::now();
        m.enter_pending_startup(t0);
        let first_detection = t0 + Duration::seconds(3);
        let events = m.confirm_startup_presence(first_detection);
        assert_eq!(events, vec![BehaviorEvent::StartupConfirmed]);
        assert_eq!(m.state(), BehaviorState::Roosting);
        assert_eq!(m.visit_start(), Some(first_detection));
    }

    #[test]
    fn startup_reset_returns_to_absent() {
        let mut m = machine();
        let t0 = Utc::now();
        m.enter_pending_startup(t0);
        m.reset_to_absent(t0 + Duration::seconds(10));
        assert_eq!(m.state(), BehaviorState::Absent);
        assert_eq!(m.visit_start(), None);
    }
}
