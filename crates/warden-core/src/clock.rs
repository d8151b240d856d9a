//! Clock capability: current time plus cancellable delayed wakeups.
//!
//! A scheduled timer does not run a closure. When it elapses, whoever owns
//! the clock feeds its [`TimerHandle`] back to the manager as
//! [`crate::manager::SessionInput::TimerFired`]. The manager compares the
//! handle with the one it has armed, so a wakeup that was already in flight
//! when its timer got cancelled is recognized as stale and ignored.

use std::fmt;
use std::sync::{Arc, Mutex, MutexGuard};
use std::time::Duration;

use chrono::{DateTime, TimeDelta, Utc};
use serde::{Deserialize, Serialize};

/// The three timers a session can have armed.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum TimerKind {
    SessionDuration,
    Inactivity,
    WarningCountdown,
}

impl TimerKind {
    pub fn as_str(self) -> &'static str {
        match self {
            Self::SessionDuration => "session_duration",
            Self::Inactivity => "inactivity",
            Self::WarningCountdown => "warning_countdown",
        }
    }
}

impl fmt::Display for TimerKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Identity of one scheduled wakeup. Ids are unique per clock.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct TimerHandle {
    pub id: u64,
    pub kind: TimerKind,
}

/// Time source and timer scheduler.
pub trait Clock: Send {
    fn now(&self) -> DateTime<Utc>;

    /// Arrange for `kind` to fire after `after`. The returned handle is what
    /// comes back when it fires.
    fn schedule(&mut self, kind: TimerKind, after: Duration) -> TimerHandle;

    /// Cancel a pending timer. Cancelling a fired or unknown handle is a no-op.
    fn cancel(&mut self, handle: TimerHandle);
}

/// Convert a std duration into a chrono delta, saturating on overflow.
pub fn to_delta(duration: Duration) -> TimeDelta {
    TimeDelta::from_std(duration).unwrap_or(TimeDelta::MAX)
}

// ─── Manual clock ────────────────────────────────────────────────────

#[derive(Debug)]
struct ManualState {
    now: DateTime<Utc>,
    next_id: u64,
    pending: Vec<(DateTime<Utc>, TimerHandle)>,
}

/// Virtual clock that only moves when told to.
///
/// Clones share the same timeline, so a test can keep one clone while the
/// manager owns another.
#[derive(Debug, Clone)]
pub struct ManualClock {
    state: Arc<Mutex<ManualState>>,
}

impl ManualClock {
    pub fn new(start: DateTime<Utc>) -> Self {
        Self {
            state: Arc::new(Mutex::new(ManualState {
                now: start,
                next_id: 1,
                pending: Vec::new(),
            })),
        }
    }

    fn lock(&self) -> MutexGuard<'_, ManualState> {
        self.state.lock().unwrap_or_else(|e| e.into_inner())
    }

    /// Remove and return the earliest timer due at or before `until`,
    /// moving the clock forward to its deadline.
    ///
    /// Ties fire in scheduling order.
    pub fn pop_due(&self, until: DateTime<Utc>) -> Option<TimerHandle> {
        let mut state = self.lock();
        let index = state
            .pending
            .iter()
            .enumerate()
            .filter(|(_, (deadline, _))| *deadline <= until)
            .min_by_key(|(_, (deadline, handle))| (*deadline, handle.id))
            .map(|(index, _)| index)?;
        let (deadline, handle) = state.pending.remove(index);
        if deadline > state.now {
            state.now = deadline;
        }
        Some(handle)
    }

    /// Move the clock to `to` without firing anything. Never moves backwards.
    pub fn set_now(&self, to: DateTime<Utc>) {
        let mut state = self.lock();
        if to > state.now {
            state.now = to;
        }
    }

    /// Deadline of a pending timer, if it is still pending.
    pub fn deadline(&self, handle: TimerHandle) -> Option<DateTime<Utc>> {
        self.lock()
            .pending
            .iter()
            .find(|(_, pending)| *pending == handle)
            .map(|(deadline, _)| *deadline)
    }

    /// Kinds of all pending timers, earliest first.
    pub fn pending_kinds(&self) -> Vec<TimerKind> {
        let mut pending = self.lock().pending.clone();
        pending.sort_by_key(|(deadline, handle)| (*deadline, handle.id));
        pending.into_iter().map(|(_, handle)| handle.kind).collect()
    }
}

impl Clock for ManualClock {
    fn now(&self) -> DateTime<Utc> {
        self.lock().now
    }

    fn schedule(&mut self, kind: TimerKind, after: Duration) -> TimerHandle {
        let mut state = self.lock();
        let handle = TimerHandle {
            id: state.next_id,
            kind,
        };
        state.next_id += 1;
        let deadline = state
            .now
            .checked_add_signed(to_delta(after))
            .unwrap_or(DateTime::<Utc>::MAX_UTC);
        state.pending.push((deadline, handle));
        handle
    }

    fn cancel(&mut self, handle: TimerHandle) {
        self.lock().pending.retain(|(_, pending)| *pending != handle);
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn ts(s: &str) -> DateTime<Utc> {
        DateTime::parse_from_rfc3339(s)
            .expect("valid RFC3339")
            .with_timezone(&Utc)
    }

    fn t0() -> DateTime<Utc> {
        ts("2026-02-25T12:00:00Z")
    }

    #[test]
    fn fires_in_deadline_order() {
        let mut clock = ManualClock::new(t0());
        let late = clock.schedule(TimerKind::SessionDuration, Duration::from_secs(60));
        let early = clock.schedule(TimerKind::Inactivity, Duration::from_secs(10));

        let until = t0() + TimeDelta::seconds(120);
        assert_eq!(clock.pop_due(until), Some(early));
        assert_eq!(clock.now(), t0() + TimeDelta::seconds(10));
        assert_eq!(clock.pop_due(until), Some(late));
        assert_eq!(clock.now(), t0() + TimeDelta::seconds(60));
        assert_eq!(clock.pop_due(until), None);
    }

    #[test]
    fn timers_past_horizon_stay_pending() {
        let mut clock = ManualClock::new(t0());
        let handle = clock.schedule(TimerKind::WarningCountdown, Duration::from_secs(30));

        assert_eq!(clock.pop_due(t0() + TimeDelta::seconds(29)), None);
        assert_eq!(clock.now(), t0());
        assert_eq!(clock.deadline(handle), Some(t0() + TimeDelta::seconds(30)));
    }

    #[test]
    fn cancelled_timer_never_fires() {
        let mut clock = ManualClock::new(t0());
        let handle = clock.schedule(TimerKind::Inactivity, Duration::from_secs(5));
        clock.cancel(handle);
        clock.cancel(handle);

        assert_eq!(clock.pop_due(t0() + TimeDelta::hours(1)), None);
        assert!(clock.pending_kinds().is_empty());
    }

    #[test]
    fn ties_fire_in_scheduling_order() {
        let mut clock = ManualClock::new(t0());
        let first = clock.schedule(TimerKind::SessionDuration, Duration::from_secs(5));
        let second = clock.schedule(TimerKind::WarningCountdown, Duration::from_secs(5));

        let until = t0() + TimeDelta::seconds(5);
        assert_eq!(clock.pop_due(until), Some(first));
        assert_eq!(clock.pop_due(until), Some(second));
    }

    #[test]
    fn clones_share_timeline() {
        let clock = ManualClock::new(t0());
        let mut owned = clock.clone();
        owned.schedule(TimerKind::Inactivity, Duration::from_secs(1));

        assert_eq!(clock.pending_kinds(), vec![TimerKind::Inactivity]);
        clock.set_now(t0() + TimeDelta::seconds(3));
        assert_eq!(owned.now(), t0() + TimeDelta::seconds(3));
        clock.set_now(t0());
        assert_eq!(owned.now(), t0() + TimeDelta::seconds(3));
    }
}
