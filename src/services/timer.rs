use std::time::Duration;

use tokio::{
    sync::mpsc,
    task::JoinHandle,
    time::{Instant, MissedTickBehavior, interval_at},
};

const TICK: Duration = Duration::from_secs(1);
const EVENT_BUFFER: usize = 16;

/// Signal emitted by a running [`Countdown`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TimerEvent {
    /// One second elapsed; `remaining_secs` is what is left on the clock.
    Tick {
        /// Whole seconds remaining.
        remaining_secs: u64,
    },
    /// The counter reached zero. Nothing follows until the countdown is restarted.
    Expired,
}

/// Once-per-second countdown. It only reports elapsed time; reacting to
/// expiry is up to whoever reads the events.
pub struct Countdown {
    duration: Duration,
    events: mpsc::Sender<TimerEvent>,
    task: Option<JoinHandle<()>>,
}

impl Countdown {
    /// Create an inactive countdown and the receiver of its events.
    pub fn new(duration: Duration) -> (Self, mpsc::Receiver<TimerEvent>) {
        let (events, receiver) = mpsc::channel(EVENT_BUFFER);
        (
            Self {
                duration,
                events,
                task: None,
            },
            receiver,
        )
    }

    /// Configured starting duration.
    pub fn duration(&self) -> Duration {
        self.duration
    }

    /// Start counting down from the full duration. Restarting an active
    /// countdown resets it.
    pub fn start(&mut self) {
        self.stop();
        let events = self.events.clone();
        let mut remaining_secs = self.duration.as_secs();
        self.task = Some(tokio::spawn(async move {
            let mut ticker = interval_at(Instant::now() + TICK, TICK);
            ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);
            while remaining_secs > 0 {
                ticker.tick().await;
                remaining_secs -= 1;
                if events
                    .send(TimerEvent::Tick { remaining_secs })
                    .await
                    .is_err()
                {
                    return;
                }
            }
            let _ = events.send(TimerEvent::Expired).await;
        }));
    }

    /// Stop counting. Stopping an inactive countdown does nothing.
    pub fn stop(&mut self) {
        if let Some(task) = self.task.take() {
            task.abort();
        }
    }

    /// Whether the countdown is still running.
    pub fn is_active(&self) -> bool {
        self.task.as_ref().is_some_and(|task| !task.is_finished())
    }
}

impl Drop for Countdown {
    fn drop(&mut self) {
        self.stop();
    }
}
