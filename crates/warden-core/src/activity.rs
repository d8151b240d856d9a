//! Activity detector: turns raw interaction signals into throttled
//! "activity observed" events.
//!
//! A signal inside the throttle window of the last emission is dropped; the
//! first qualifying signal after the window is emitted and restarts it. The
//! detector is inert until [`ActivityDetector::start_listening`] and again
//! after [`ActivityDetector::stop_listening`], so unauthenticated users cost
//! nothing.

use std::collections::BTreeSet;
use std::time::Duration;

use chrono::{DateTime, TimeDelta, Utc};

use crate::clock::to_delta;
use crate::policy::ActivitySignal;

#[derive(Debug, Clone)]
pub struct ActivityDetector {
    signals: BTreeSet<ActivitySignal>,
    throttle: TimeDelta,
    listening: bool,
    last_emitted_at: Option<DateTime<Utc>>,
}

impl ActivityDetector {
    pub fn new(signals: BTreeSet<ActivitySignal>, throttle: Duration) -> Self {
        Self {
            signals,
            throttle: to_delta(throttle),
            listening: false,
            last_emitted_at: None,
        }
    }

    /// Register for signals. Called when a session becomes supervised.
    pub fn start_listening(&mut self) {
        self.listening = true;
        self.last_emitted_at = None;
    }

    /// Deregister. Called on termination; the throttle window is forgotten.
    pub fn stop_listening(&mut self) {
        self.listening = false;
        self.last_emitted_at = None;
    }

    pub fn is_listening(&self) -> bool {
        self.listening
    }

    pub fn last_emitted_at(&self) -> Option<DateTime<Utc>> {
        self.last_emitted_at
    }

    /// Feed one raw signal. Returns `true` when it counts as a new activity.
    pub fn observe(&mut self, signal: ActivitySignal, now: DateTime<Utc>) -> bool {
        if !self.listening || !self.signals.contains(&signal) {
            return false;
        }
        if let Some(last) = self.last_emitted_at
            && now.signed_duration_since(last) <= self.throttle
        {
            return false;
        }
        self.last_emitted_at = Some(now);
        true
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use proptest::prelude::*;

    fn ts(s: &str) -> DateTime<Utc> {
        DateTime::parse_from_rfc3339(s)
            .expect("valid RFC3339")
            .with_timezone(&Utc)
    }

    fn t0() -> DateTime<Utc> {
        ts("2026-02-25T12:00:00Z")
    }

    fn detector() -> ActivityDetector {
        let mut detector = ActivityDetector::new(
            ActivitySignal::ALL.into_iter().collect(),
            Duration::from_secs(2),
        );
        detector.start_listening();
        detector
    }

    #[test]
    fn inert_until_listening() {
        let mut detector = ActivityDetector::new(
            ActivitySignal::ALL.into_iter().collect(),
            Duration::from_secs(2),
        );
        assert!(!detector.observe(ActivitySignal::Click, t0()));
        detector.start_listening();
        assert!(detector.observe(ActivitySignal::Click, t0()));
    }

    #[test]
    fn burst_inside_window_coalesced() {
        let mut detector = detector();
        assert!(detector.observe(ActivitySignal::MouseMove, t0()));
        for ms in [1, 100, 500, 1999] {
            assert!(!detector.observe(ActivitySignal::MouseMove, t0() + TimeDelta::milliseconds(ms)));
        }
        assert!(detector.observe(ActivitySignal::KeyPress, t0() + TimeDelta::milliseconds(2001)));
    }

    #[test]
    fn signal_on_window_edge_is_dropped() {
        let mut detector = detector();
        assert!(detector.observe(ActivitySignal::Click, t0()));
        assert!(!detector.observe(ActivitySignal::Click, t0() + TimeDelta::seconds(2)));
        assert_eq!(detector.last_emitted_at(), Some(t0()));
        assert!(detector.observe(ActivitySignal::Click, t0() + TimeDelta::milliseconds(2001)));
    }

    #[test]
    fn unconfigured_signal_ignored() {
        let mut detector = ActivityDetector::new(
            [ActivitySignal::KeyPress].into_iter().collect(),
            Duration::from_secs(2),
        );
        detector.start_listening();
        assert!(!detector.observe(ActivitySignal::MouseMove, t0()));
        assert!(detector.observe(ActivitySignal::KeyPress, t0()));
    }

    #[test]
    fn stop_listening_forgets_window() {
        let mut detector = detector();
        assert!(detector.observe(ActivitySignal::Scroll, t0()));
        detector.stop_listening();
        assert!(!detector.observe(ActivitySignal::Scroll, t0() + TimeDelta::seconds(5)));
        assert_eq!(detector.last_emitted_at(), None);

        detector.start_listening();
        assert!(detector.observe(ActivitySignal::Scroll, t0() + TimeDelta::milliseconds(5_001)));
    }

    proptest! {
        /// Signals spaced strictly closer than the window yield exactly one
        /// emission per elapsed window.
        #[test]
        fn one_emission_per_window(gaps in proptest::collection::vec(1i64..2000, 1..200)) {
            let mut detector = detector();
            let mut now = t0();
            let mut emitted = vec![now];
            assert!(detector.observe(ActivitySignal::MouseMove, now));

            for gap in gaps {
                now += TimeDelta::milliseconds(gap);
                if detector.observe(ActivitySignal::MouseMove, now) {
                    emitted.push(now);
                }
            }

            for pair in emitted.windows(2) {
                prop_assert!(pair[1] - pair[0] >= TimeDelta::seconds(2));
                // The next emission comes from the first signal after the window,
                // which is less than one gap (< 2s) past the window edge.
                prop_assert!(pair[1] - pair[0] < TimeDelta::seconds(4));
            }
        }
    }
}
