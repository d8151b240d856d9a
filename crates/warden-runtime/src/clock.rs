//! Tokio-backed clock: each timer is a sleeping task that posts
//! `TimerFired` into the session input channel.

use std::collections::HashMap;
use std::time::Duration;

use chrono::{DateTime, Utc};
use tokio::sync::mpsc::UnboundedSender;
use tokio::task::JoinHandle;
use tokio::time::Instant;
use warden_core::clock::to_delta;
use warden_core::{Clock, SessionInput, TimerHandle, TimerKind};

pub struct TokioClock {
    /// Wall-clock reading taken together with `origin`; `now()` advances it
    /// by tokio's monotonic time so paused-time tests stay consistent.
    wall_origin: DateTime<Utc>,
    origin: Instant,
    next_id: u64,
    tasks: HashMap<u64, JoinHandle<()>>,
    inputs: UnboundedSender<SessionInput>,
}

impl TokioClock {
    pub fn new(inputs: UnboundedSender<SessionInput>) -> Self {
        Self {
            wall_origin: Utc::now(),
            origin: Instant::now(),
            next_id: 1,
            tasks: HashMap::new(),
            inputs,
        }
    }

    pub fn pending(&self) -> usize {
        self.tasks.values().filter(|t| !t.is_finished()).count()
    }
}

impl Clock for TokioClock {
    fn now(&self) -> DateTime<Utc> {
        self.wall_origin
            .checked_add_signed(to_delta(self.origin.elapsed()))
            .unwrap_or(DateTime::<Utc>::MAX_UTC)
    }

    fn schedule(&mut self, kind: TimerKind, after: Duration) -> TimerHandle {
        self.tasks.retain(|_, task| !task.is_finished());

        let handle = TimerHandle {
            id: self.next_id,
            kind,
        };
        self.next_id += 1;

        let inputs = self.inputs.clone();
        let task = tokio::spawn(async move {
            tokio::time::sleep(after).await;
            if inputs.send(SessionInput::TimerFired(handle)).is_err() {
                tracing::debug!("{kind} timer fired after the session loop stopped");
            }
        });
        self.tasks.insert(handle.id, task);
        tracing::trace!("scheduled {kind} timer #{} in {after:?}", handle.id);
        handle
    }

    fn cancel(&mut self, handle: TimerHandle) {
        if let Some(task) = self.tasks.remove(&handle.id) {
            task.abort();
        }
    }
}

impl Drop for TokioClock {
    fn drop(&mut self) {
        for task in self.tasks.values() {
            task.abort();
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tokio::sync::mpsc;

    #[tokio::test(start_paused = true)]
    async fn fires_after_delay() {
        let (tx, mut rx) = mpsc::unbounded_channel();
        let mut clock = TokioClock::new(tx);
        let handle = clock.schedule(TimerKind::Inactivity, Duration::from_secs(600));

        tokio::time::sleep(Duration::from_secs(599)).await;
        assert!(rx.try_recv().is_err());

        tokio::time::sleep(Duration::from_secs(2)).await;
        assert_eq!(rx.recv().await, Some(SessionInput::TimerFired(handle)));
    }

    #[tokio::test(start_paused = true)]
    async fn cancelled_timer_is_silent() {
        let (tx, mut rx) = mpsc::unbounded_channel();
        let mut clock = TokioClock::new(tx);
        let handle = clock.schedule(TimerKind::WarningCountdown, Duration::from_secs(5));
        assert_eq!(clock.pending(), 1);
        clock.cancel(handle);
        clock.cancel(handle);

        tokio::time::sleep(Duration::from_secs(10)).await;
        assert!(rx.try_recv().is_err());
        assert_eq!(clock.pending(), 0);
    }

    #[tokio::test(start_paused = true)]
    async fn now_follows_tokio_time() {
        let (tx, _rx) = mpsc::unbounded_channel();
        let clock = TokioClock::new(tx);
        let start = clock.now();
        tokio::time::sleep(Duration::from_secs(3600)).await;
        let elapsed = clock.now() - start;
        assert!(elapsed >= chrono::TimeDelta::seconds(3600));
        assert!(elapsed < chrono::TimeDelta::seconds(3601));
    }

    #[tokio::test(start_paused = true)]
    async fn handles_are_unique() {
        let (tx, _rx) = mpsc::unbounded_channel();
        let mut clock = TokioClock::new(tx);
        let a = clock.schedule(TimerKind::Inactivity, Duration::from_secs(1));
        let b = clock.schedule(TimerKind::Inactivity, Duration::from_secs(1));
        assert_ne!(a, b);
    }
}
