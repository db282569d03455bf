//! Background revalidation triggers.
//!
//! A [`Scheduler`] turns timer ticks and focus changes into [`SyncEvent`]s on
//! an mpsc channel consumed by [`SyncController::run`](super::sync::SyncController::run).
//! Timers come from `tokio::time`, so a paused test runtime drives them
//! deterministically.

use std::time::Duration;

use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tokio::time::{Instant, MissedTickBehavior};
use tracing::debug;

const EVENT_CHANNEL_CAPACITY: usize = 16;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SyncEvent {
    /// The polling interval elapsed.
    Tick,
    /// The board view came back into focus; treat the data as stale.
    FocusRegained,
}

/// Owns the polling timer for one board view. Dropping it closes the event channel.
pub struct Scheduler {
    tx: mpsc::Sender<SyncEvent>,
    ticker: Option<JoinHandle<()>>,
}

impl Scheduler {
    pub fn new() -> (Self, mpsc::Receiver<SyncEvent>) {
        let (tx, rx) = mpsc::channel(EVENT_CHANNEL_CAPACITY);
        (Self { tx, ticker: None }, rx)
    }

    /// Emit [`SyncEvent::Tick`] every `interval`, starting one interval from now.
    /// Replaces any previously scheduled ticker.
    pub fn schedule_tick(&mut self, interval: Duration) {
        self.cancel();
        let tx = self.tx.clone();
        self.ticker = Some(tokio::spawn(async move {
            let mut ticker = tokio::time::interval_at(Instant::now() + interval, interval);
            ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);
            loop {
                ticker.tick().await;
                if tx.send(SyncEvent::Tick).await.is_err() {
                    return;
                }
            }
        }));
        debug!(?interval, "revalidation ticker scheduled");
    }

    /// Queue a [`SyncEvent::FocusRegained`]. Returns `false` if the consumer is
    /// gone or already has a backlog.
    pub fn on_focus_regained(&self) -> bool {
        self.tx.try_send(SyncEvent::FocusRegained).is_ok()
    }

    /// Stop the ticker. Focus events can still be sent.
    pub fn cancel(&mut self) {
        if let Some(ticker) = self.ticker.take() {
            ticker.abort();
        }
    }

    pub fn is_ticking(&self) -> bool {
        self.ticker.as_ref().is_some_and(|t| !t.is_finished())
    }
}

impl Drop for Scheduler {
    fn drop(&mut self) {
        self.cancel();
    }
}
