//! Wall clock ceiling for a running program

use std::future::Future;
use std::pin::Pin;
use std::task::{Context, Poll};
use std::time::Duration;

use tokio::time::{Instant, Sleep, sleep_until};

/// Resolves once the ceiling has elapsed. Dropping it cancels the timer.
#[derive(Debug)]
pub(crate) struct Deadline {
    sleep: Pin<Box<Sleep>>,
    started: Instant,
    limit: Duration,
}

impl Deadline {
    /// Start the timer now
    pub fn start(limit: Duration) -> Self {
        let started = Instant::now();
        Self {
            sleep: Box::pin(sleep_until(started + limit)),
            started,
            limit,
        }
    }

    pub fn limit(&self) -> Duration {
        self.limit
    }

    /// Time since the timer started
    pub fn elapsed(&self) -> Duration {
        self.started.elapsed()
    }
}

impl Future for Deadline {
    type Output = ();

    fn poll(mut self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<()> {
        self.sleep.as_mut().poll(cx)
    }
}
