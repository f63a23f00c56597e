//! Per-auction expiry timers.
//!
//! Every client computes the countdown for itself from the replicated
//! `end_time`, so closure needs no remote authority: the transition is
//! guarded by the mirror's `closed` flag and fires exactly once per client
//! no matter how many ticks race in. A clock-skewed client may close a
//! little early or late, but the store's price check inside settlement is
//! the real enforcement boundary, never this timer.

use crate::auction::{AuctionId, AuctionIdRef, TimestampMs};
use crate::mirror::SharedMirror;
use crate::router::SharedRouter;
use parking_lot::Mutex;
use std::collections::BTreeMap;
use std::sync::Arc;
use std::time::{Duration, SystemTime, UNIX_EPOCH};
use tracing::{debug, info};

pub trait Clock: Send + Sync {
    fn now_ms(&self) -> TimestampMs;
}

pub type SharedClock = Arc<dyn Clock>;

pub struct SystemClock;

impl Clock for SystemClock {
    fn now_ms(&self) -> TimestampMs {
        SystemTime::now()
            .duration_since(UNIX_EPOCH)
            .expect("system clock before unix epoch")
            .as_millis() as TimestampMs
    }
}

/// Ticks with less than this left are tagged urgent.
pub const URGENT_WINDOW_MS: u64 = 30 * 60 * 1000;

const TICK_INTERVAL: Duration = Duration::from_secs(1);

/// What one tick of an auction's timer decided.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum TickOutcome {
    /// Still counting down; the timer keeps running.
    Open,
    /// Closure fired now or already had; the timer stops.
    Closed,
    /// No longer mirrored; the timer stops.
    Gone,
}

pub struct ExpiryScheduler {
    mirror: SharedMirror,
    router: SharedRouter,
    clock: SharedClock,
    timers: Mutex<BTreeMap<AuctionId, tokio::task::JoinHandle<()>>>,
}

impl ExpiryScheduler {
    pub fn new(mirror: SharedMirror, router: SharedRouter, clock: SharedClock) -> Self {
        Self {
            mirror,
            router,
            clock,
            timers: Mutex::new(BTreeMap::new()),
        }
    }

    /// Start the 1 Hz timer for `id`. Idempotent while a timer is live.
    pub fn schedule(self: Arc<Self>, id: AuctionId) {
        let mut timers = self.timers.lock();
        if timers.contains_key(&id) {
            return;
        }

        let task = tokio::spawn({
            let scheduler = Arc::clone(&self);
            let id = id.clone();
            async move {
                // First tick fires immediately, like the countdown the
                // seller sees starting the moment a card appears.
                let mut interval = tokio::time::interval(TICK_INTERVAL);
                loop {
                    interval.tick().await;
                    match scheduler.tick(&id) {
                        TickOutcome::Open => {}
                        TickOutcome::Closed | TickOutcome::Gone => break,
                    }
                }
                scheduler.timers.lock().remove(&id);
            }
        });
        timers.insert(id, task);
    }

    /// One step of the per-auction state machine. Safe to invoke from
    /// stray or duplicate ticks; the mirror's closed flag keeps the
    /// closure transition exactly-once.
    pub fn tick(&self, id: AuctionIdRef<'_>) -> TickOutcome {
        let record = match self.mirror.get(id) {
            Some(record) => record,
            None => return TickOutcome::Gone,
        };
        if record.closed {
            return TickOutcome::Closed;
        }

        let now = self.clock.now_ms();
        if now > record.end_time {
            if self.mirror.mark_closed(id) {
                info!(id, "auction closed");
                self.router.closed(id);
            }
            return TickOutcome::Closed;
        }

        let remaining_ms = record.end_time - now;
        self.router
            .tick(id, remaining_ms, remaining_ms < URGENT_WINDOW_MS);
        TickOutcome::Open
    }

    pub fn cancel(&self, id: AuctionIdRef<'_>) {
        if let Some(task) = self.timers.lock().remove(id) {
            debug!(id, "expiry timer canceled");
            task.abort();
        }
    }

    pub fn cancel_all(&self) {
        for (_, task) in std::mem::take(&mut *self.timers.lock()) {
            task.abort();
        }
    }

    pub fn is_scheduled(&self, id: AuctionIdRef<'_>) -> bool {
        self.timers.lock().contains_key(id)
    }
}
