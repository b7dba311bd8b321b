// src/session/countdown.rs

use std::future::Future;
use std::time::Duration;

use chrono::{DateTime, Utc};
use tokio::{sync::watch, task::JoinHandle};
use tracing::info;

use crate::{attempt::timer, config::COUNTDOWN_TICK_SECS};

/// One-second countdown for an attempt.
///
/// Each tick recomputes the remaining time from the stored `started_at`.
/// When it reaches zero the expiry callback runs once and the task ends.
/// Dropping the countdown abandons it.
pub struct Countdown {
    remaining: watch::Receiver<i64>,
    handle: JoinHandle<()>,
}

impl Countdown {
    pub fn spawn<F, Fut>(started_at: DateTime<Utc>, duration_minutes: i32, on_expire: F) -> Self
    where
        F: FnOnce() -> Fut + Send + 'static,
        Fut: Future<Output = ()> + Send + 'static,
    {
        let initial = timer::remaining_seconds(started_at, duration_minutes, Utc::now());
        let (tx, rx) = watch::channel(initial);

        let handle = tokio::spawn(async move {
            let mut interval = tokio::time::interval(Duration::from_secs(COUNTDOWN_TICK_SECS));
            loop {
                interval.tick().await;
                let remaining = timer::remaining_seconds(started_at, duration_minutes, Utc::now());
                tx.send_replace(remaining);
                if remaining == 0 {
                    info!("Time is up, submitting attempt");
                    on_expire().await;
                    break;
                }
            }
        });

        Self {
            remaining: rx,
            handle,
        }
    }

    /// Seconds left as of the last tick.
    pub fn remaining(&self) -> i64 {
        *self.remaining.borrow()
    }

    pub fn subscribe(&self) -> watch::Receiver<i64> {
        self.remaining.clone()
    }

    /// True once the expiry callback has completed (or the task was aborted).
    pub fn is_finished(&self) -> bool {
        self.handle.is_finished()
    }
}

impl Drop for Countdown {
    fn drop(&mut self) {
        self.handle.abort();
    }
}
