// crates/core/src/timeline.rs
//! Cancellable timer scopes.
//!
//! A [`Timeline`] wraps a `CancellationToken`. One-shot and repeating
//! callbacks scheduled on it, and on any child timeline, stop firing as soon
//! as it is cancelled. The lifecycle engine keeps one timeline per job; the
//! bus and the connection manager use them for delivery and retry timers.
//!
//! Callbacks run on spawned Tokio tasks, so scheduling requires a runtime.

use std::future::Future;
use std::ops::ControlFlow;
use std::time::Duration;

use tokio::time::{Instant, MissedTickBehavior};
use tokio_util::sync::CancellationToken;

#[derive(Debug, Clone, Default)]
pub struct Timeline {
    token: CancellationToken,
}

impl Timeline {
    pub fn new() -> Self {
        Self::default()
    }

    /// A timeline cancelled together with `self`, but cancellable on its own.
    pub fn child(&self) -> Self {
        Self {
            token: self.token.child_token(),
        }
    }

    pub fn cancel(&self) {
        self.token.cancel();
    }

    pub fn is_cancelled(&self) -> bool {
        self.token.is_cancelled()
    }

    /// Run `f` once after `delay` unless cancelled first.
    pub fn schedule<F>(&self, delay: Duration, f: F)
    where
        F: FnOnce() + Send + 'static,
    {
        let token = self.token.clone();
        tokio::spawn(async move {
            tokio::select! {
                biased;
                _ = token.cancelled() => {}
                _ = tokio::time::sleep(delay) => {
                    if !token.is_cancelled() {
                        f();
                    }
                }
            }
        });
    }

    /// Run `f` every `period` (first run after one period) until it returns
    /// `Break` or the timeline is cancelled.
    pub fn every<F>(&self, period: Duration, mut f: F)
    where
        F: FnMut() -> ControlFlow<()> + Send + 'static,
    {
        let token = self.token.clone();
        tokio::spawn(async move {
            let mut ticker = tokio::time::interval_at(Instant::now() + period, period);
            ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);
            loop {
                tokio::select! {
                    biased;
                    _ = token.cancelled() => break,
                    _ = ticker.tick() => {
                        if token.is_cancelled() || f().is_break() {
                            break;
                        }
                    }
                }
            }
        });
    }

    /// Drive `fut` until it completes or the timeline is cancelled.
    pub fn spawn<F>(&self, fut: F)
    where
        F: Future<Output = ()> + Send + 'static,
    {
        let token = self.token.clone();
        tokio::spawn(async move {
            tokio::select! {
                biased;
                _ = token.cancelled() => {}
                _ = fut => {}
            }
        });
    }
}
