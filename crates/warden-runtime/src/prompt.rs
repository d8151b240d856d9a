//! Terminal prompt surface.
//!
//! The warning countdown printed here is cosmetic: it ticks once per second
//! and, when it reaches zero, reports `WarningOutcome::Timeout`, which the
//! manager ignores. The session only closes when its own countdown timer
//! fires.

use std::time::Duration;

use tokio::sync::mpsc::UnboundedSender;
use tokio::task::JoinHandle;
use warden_core::{ClosedPrompt, PromptSurface, SessionInput, WarningOutcome, WarningPrompt};

pub struct ConsolePrompt {
    inputs: UnboundedSender<SessionInput>,
    countdown: Option<JoinHandle<()>>,
}

impl ConsolePrompt {
    pub fn new(inputs: UnboundedSender<SessionInput>) -> Self {
        Self {
            inputs,
            countdown: None,
        }
    }

    fn stop_countdown(&mut self) -> bool {
        match self.countdown.take() {
            Some(task) => {
                let running = !task.is_finished();
                task.abort();
                running
            }
            None => false,
        }
    }
}

impl PromptSurface for ConsolePrompt {
    fn show_warning(&mut self, prompt: &WarningPrompt) {
        self.stop_countdown();
        println!();
        println!("warning: {}", prompt.message);
        if prompt.can_extend {
            println!("  type `extend` to stay signed in or `logout` to leave");
        }

        let inputs = self.inputs.clone();
        let total = prompt.countdown_secs;
        self.countdown = Some(tokio::spawn(async move {
            let mut ticker = tokio::time::interval(Duration::from_secs(1));
            ticker.tick().await;
            let mut remaining = total;
            while remaining > 0 {
                ticker.tick().await;
                remaining -= 1;
                if announce(remaining) {
                    println!("  {remaining}s left");
                }
            }
            let _ = inputs.send(SessionInput::WarningResolved(WarningOutcome::Timeout));
        }));
    }

    fn dismiss_warning(&mut self) {
        if self.stop_countdown() {
            println!("  warning dismissed");
        }
    }

    fn show_closed(&mut self, prompt: &ClosedPrompt) {
        self.stop_countdown();
        println!();
        println!("session closed: {}", prompt.message);
        println!("  type `login <user> <token>` to sign in again");
    }
}

impl Drop for ConsolePrompt {
    fn drop(&mut self) {
        self.stop_countdown();
    }
}

/// Seconds worth printing: every half minute, at ten, and the last five.
fn announce(remaining: u64) -> bool {
    remaining > 0 && (remaining <= 5 || remaining == 10 || remaining % 30 == 0)
}
