use std::time::Duration;

use tokio::time::{self, Instant, Interval, MissedTickBehavior};
use tracing::{info, warn};

/// Period used when the configured one is zero.
pub const DEFAULT_POLL_INTERVAL: Duration = Duration::from_secs(5);

/// Degraded-mode schedule. At most one interval exists; the first tick
/// fires immediately after `start`.
#[derive(Debug)]
pub struct FallbackPoller {
    period: Duration,
    ticker: Option<Interval>,
    cycles: u64,
}

impl FallbackPoller {
    pub fn new(period: Duration) -> Self {
        let period = if period.is_zero() {
            warn!(target = "inbox.poller", default_ms = DEFAULT_POLL_INTERVAL.as_millis() as u64, "zero poll interval, using default");
            DEFAULT_POLL_INTERVAL
        } else {
            period
        };
        Self {
            period,
            ticker: None,
            cycles: 0,
        }
    }

    pub fn is_running(&self) -> bool {
        self.ticker.is_some()
    }

    /// Cycles fired since the poller was created.
    pub fn cycles(&self) -> u64 {
        self.cycles
    }

    /// Returns `false` if the poller was already running.
    pub fn start(&mut self) -> bool {
        if self.ticker.is_some() {
            return false;
        }
        let mut ticker = time::interval_at(Instant::now(), self.period);
        ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);
        self.ticker = Some(ticker);
        info!(target = "inbox.poller", period_ms = self.period.as_millis() as u64, "fallback polling started");
        true
    }

    /// Returns `false` if the poller was not running.
    pub fn stop(&mut self) -> bool {
        if self.ticker.take().is_none() {
            return false;
        }
        info!(target = "inbox.poller", cycles = self.cycles, "fallback polling stopped");
        true
    }

    /// Resolves on the next cycle. Never resolves while stopped, so it can
    /// sit in a `select!` unconditionally.
    pub async fn tick(&mut self) {
        match self.ticker.as_mut() {
            Some(ticker) => {
                ticker.tick().await;
                self.cycles += 1;
            }
            None => std::future::pending().await,
        }
    }
}
