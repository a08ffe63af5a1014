//! Time source for schedulers and sweeps.
//!
//! Cron fires are tied to wall time, not process uptime, so the clock hands
//! out `DateTime<Utc>` and sleeps until a wall-clock deadline. [`ManualClock`]
//! lets tests step time forward deterministically.

use async_trait::async_trait;
use chrono::{DateTime, Duration, Utc};
use tokio::sync::watch;

/// Injectable wall clock.
#[async_trait]
pub trait Clock: Send + Sync {
    fn now(&self) -> DateTime<Utc>;

    /// Resolve once `now() >= deadline`. Callers race this against their
    /// cancellation token, so it must be cancel-safe.
    async fn sleep_until(&self, deadline: DateTime<Utc>);
}

/// The real clock.
#[derive(Debug, Default, Clone, Copy)]
pub struct SystemClock;

/// Longest single sleep; wall time is re-read after each slice so clock
/// adjustments (NTP steps, suspend) do not push fires far off schedule.
const MAX_SLEEP_SLICE: std::time::Duration = std::time::Duration::from_secs(60);

#[async_trait]
impl Clock for SystemClock {
    fn now(&self) -> DateTime<Utc> {
        Utc::now()
    }

    async fn sleep_until(&self, deadline: DateTime<Utc>) {
        loop {
            let now = Utc::now();
            if now >= deadline {
                return;
            }
            let wait = (deadline - now).to_std().unwrap_or_default();
            tokio::time::sleep(wait.min(MAX_SLEEP_SLICE)).await;
        }
    }
}

/// A clock that only moves when told to.
#[derive(Debug)]
pub struct ManualClock {
    now: watch::Sender<DateTime<Utc>>,
}

impl ManualClock {
    pub fn new(start: DateTime<Utc>) -> Self {
        let (now, _) = watch::channel(start);
        Self { now }
    }

    /// Move time forward and wake every sleeper whose deadline has passed.
    pub fn advance(&self, by: Duration) {
        self.now.send_modify(|t| *t += by);
    }

    pub fn set(&self, to: DateTime<Utc>) {
        self.now.send_replace(to);
    }
}

#[async_trait]
impl Clock for ManualClock {
    fn now(&self) -> DateTime<Utc> {
        *self.now.borrow()
    }

    async fn sleep_until(&self, deadline: DateTime<Utc>) {
        let mut rx = self.now.subscribe();
        loop {
            if *rx.borrow_and_update() >= deadline {
                return;
            }
            if rx.changed().await.is_err() {
                return;
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;
    use std::sync::Arc;

    #[tokio::test]
    async fn test_manual_clock_wakes_on_advance() {
        let start = Utc.with_ymd_and_hms(2026, 3, 2, 9, 0, 0).unwrap();
        let clock = Arc::new(ManualClock::new(start));

        let sleeper = {
            let clock = clock.clone();
            tokio::spawn(async move {
                clock.sleep_until(start + Duration::minutes(5)).await;
                clock.now()
            })
        };

        tokio::task::yield_now().await;
        clock.advance(Duration::minutes(2));
        tokio::task::yield_now().await;
        assert!(!sleeper.is_finished());

        clock.advance(Duration::minutes(3));
        let woke_at = tokio::time::timeout(std::time::Duration::from_secs(2), sleeper)
            .await
            .unwrap()
            .unwrap();
        assert_eq!(woke_at, start + Duration::minutes(5));
    }

    #[tokio::test]
    async fn test_sleep_until_past_deadline_returns_immediately() {
        let start = Utc.with_ymd_and_hms(2026, 3, 2, 9, 0, 0).unwrap();
        let clock = ManualClock::new(start);
        clock.sleep_until(start - Duration::seconds(1)).await;
        SystemClock.sleep_until(Utc::now() - Duration::seconds(1)).await;
    }
}
