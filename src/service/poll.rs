//! Poll rate control for jobs that are waited on by polling.

use log::trace;
use std::time::{Duration, Instant};

pub const SLEEP_MIN: Duration = Duration::from_millis(100);
pub const SLEEP_MAX: Duration = Duration::from_secs(10);
pub const SLEEP_INC_RATE: f64 = 1.1;

/// Geometric back-off between polls.
///
/// Each snooze sleeps for the current duration and then grows it by
/// [`SLEEP_INC_RATE`], up to [`SLEEP_MAX`]. Call [`PollController::reset`]
/// whenever a job finishes so the next wait starts short again.
#[derive(Debug, Clone)]
pub struct PollController {
    sleep: Duration,
    num_polls: u64,
    started: Option<Instant>,
}

impl Default for PollController {
    fn default() -> Self {
        Self::new()
    }
}

impl PollController {
    pub fn new() -> Self {
        Self {
            sleep: SLEEP_MIN,
            num_polls: 0,
            started: None,
        }
    }

    pub fn reset(&mut self) {
        self.sleep = SLEEP_MIN;
    }

    /// Duration the next snooze will sleep for.
    pub fn current(&self) -> Duration {
        self.sleep
    }

    pub fn num_polls(&self) -> u64 {
        self.num_polls
    }

    /// Advance the controller and return how long to sleep.
    pub fn next_delay(&mut self) -> Duration {
        let started = *self.started.get_or_insert_with(Instant::now);
        self.num_polls += 1;
        let elapsed = started.elapsed().as_secs_f64();
        if elapsed > 0.0 {
            trace!(
                "Poll rate control: sleeping for {:?} (current poll rate: {:.2} polls/s)",
                self.sleep,
                self.num_polls as f64 / elapsed
            );
        }
        let delay = self.sleep;
        self.sleep = self.sleep.mul_f64(SLEEP_INC_RATE).min(SLEEP_MAX);
        delay
    }

    pub async fn snooze(&mut self) {
        let delay = self.next_delay();
        tokio::time::sleep(delay).await;
    }
}
