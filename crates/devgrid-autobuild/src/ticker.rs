//! Tick sources for the executor loop.

use std::time::Duration;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use tokio::sync::mpsc;
use tokio::time::{Interval, MissedTickBehavior};

/// Yields the instant each tick evaluates at. `None` ends the loop.
#[async_trait]
pub trait TickSource: Send {
    async fn next_tick(&mut self) -> Option<DateTime<Utc>>;
}

/// Wall-clock ticks at a fixed period.
pub struct IntervalTicker {
    interval: Interval,
}

impl IntervalTicker {
    pub fn new(period: Duration) -> Self {
        let mut interval = tokio::time::interval(period);
        // A slow tick delays the next one instead of causing a burst.
        interval.set_missed_tick_behavior(MissedTickBehavior::Delay);
        Self { interval }
    }
}

#[async_trait]
impl TickSource for IntervalTicker {
    async fn next_tick(&mut self) -> Option<DateTime<Utc>> {
        self.interval.tick().await;
        Some(Utc::now())
    }
}

/// Ticks fed by hand through a [`TickSender`].
pub struct ManualTicker {
    rx: mpsc::Receiver<DateTime<Utc>>,
}

/// Feeds a [`ManualTicker`]. Dropping every sender ends the loop.
#[derive(Clone)]
pub struct TickSender {
    tx: mpsc::Sender<DateTime<Utc>>,
}

impl ManualTicker {
    pub fn channel() -> (TickSender, ManualTicker) {
        let (tx, rx) = mpsc::channel(1);
        (TickSender { tx }, ManualTicker { rx })
    }
}

impl TickSender {
    /// Queue a tick at `at`. Returns false if the loop has gone away.
    pub async fn tick(&self, at: DateTime<Utc>) -> bool {
        self.tx.send(at).await.is_ok()
    }
}

#[async_trait]
impl TickSource for ManualTicker {
    async fn next_tick(&mut self) -> Option<DateTime<Utc>> {
        self.rx.recv().await
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;

    #[tokio::test]
    async fn manual_ticker_yields_fed_instants_then_ends() {
        let (sender, mut ticker) = ManualTicker::channel();
        let at = Utc.with_ymd_and_hms(2024, 1, 1, 12, 0, 0).unwrap();

        assert!(sender.tick(at).await);
        assert_eq!(ticker.next_tick().await, Some(at));

        drop(sender);
        assert_eq!(ticker.next_tick().await, None);
    }

    #[tokio::test]
    async fn interval_ticker_yields_wall_clock() {
        let mut ticker = IntervalTicker::new(Duration::from_millis(5));
        let before = Utc::now();
        let first = ticker.next_tick().await.unwrap();
        let second = ticker.next_tick().await.unwrap();
        assert!(first >= before);
        assert!(second >= first);
    }
}
