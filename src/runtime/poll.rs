use std::future;

use tokio::time::{self, Duration, Interval, MissedTickBehavior};

/// Fixed-interval trigger for background refreshes.
///
/// When disabled, [`PollScheduler::tick`] never resolves, so callers select on
/// it unconditionally.
#[derive(Debug)]
pub struct PollScheduler {
    interval: Option<Interval>,
}

impl PollScheduler {
    pub fn new(period: Option<Duration>) -> Self {
        let interval = period.map(|period| {
            let mut interval = time::interval_at(time::Instant::now() + period, period);
            interval.set_missed_tick_behavior(MissedTickBehavior::Delay);
            interval
        });
        Self { interval }
    }

    pub fn disabled() -> Self {
        Self { interval: None }
    }

    pub fn is_enabled(&self) -> bool {
        self.interval.is_some()
    }

    pub fn period(&self) -> Option<Duration> {
        self.interval.as_ref().map(Interval::period)
    }

    pub async fn tick(&mut self) {
        match self.interval.as_mut() {
            Some(interval) => {
                interval.tick().await;
            }
            None => future::pending::<()>().await,
        }
    }
}
