//! Test support: a manual clock, a sink that records everything it is
//! shown, and a few builders shared by the per-component test files.

mod settlement;

use crate::auction::{
    Amount, AuctionId, AuctionIdRef, AuctionRecord, TimestampMs, SELLER_PLACEHOLDER,
};
use crate::expiry::Clock;
use crate::router::EngineSink;
use parking_lot::Mutex;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Duration;

pub const FAR_FUTURE: TimestampMs = u64::MAX / 2;

pub struct ManualClock(AtomicU64);

impl ManualClock {
    pub fn new(now_ms: TimestampMs) -> Arc<Self> {
        Arc::new(Self(AtomicU64::new(now_ms)))
    }

    pub fn advance(&self, ms: u64) {
        self.0.fetch_add(ms, Ordering::SeqCst);
    }
}

impl Clock for ManualClock {
    fn now_ms(&self) -> TimestampMs {
        self.0.load(Ordering::SeqCst)
    }
}

#[derive(Clone, Debug, PartialEq, Eq)]
pub enum SinkEvent {
    Created(AuctionId),
    Updated(AuctionId, Amount, u64),
    Closed(AuctionId),
    Tick(AuctionId, u64, bool),
}

#[derive(Default)]
pub struct CapturingSink(Mutex<Vec<SinkEvent>>);

impl CapturingSink {
    pub fn new_shared() -> Arc<Self> {
        Arc::new(Self::default())
    }

    pub fn events(&self) -> Vec<SinkEvent> {
        self.0.lock().clone()
    }
}

impl EngineSink for CapturingSink {
    fn on_created(&self, id: AuctionIdRef<'_>, _record: &AuctionRecord) {
        self.0.lock().push(SinkEvent::Created(id.to_owned()));
    }

    fn on_updated(&self, id: AuctionIdRef<'_>, record: &AuctionRecord) {
        self.0.lock().push(SinkEvent::Updated(
            id.to_owned(),
            record.current_price,
            record.bid_count,
        ));
    }

    fn on_closed(&self, id: AuctionIdRef<'_>) {
        self.0.lock().push(SinkEvent::Closed(id.to_owned()));
    }

    fn on_tick(&self, id: AuctionIdRef<'_>, remaining_ms: u64, urgent: bool) {
        self.0
            .lock()
            .push(SinkEvent::Tick(id.to_owned(), remaining_ms, urgent));
    }
}

pub fn listing(min_price: Amount, end_time: TimestampMs) -> AuctionRecord {
    AuctionRecord {
        name: "lot".to_owned(),
        description: "test lot".to_owned(),
        min_price,
        current_price: min_price,
        bid_count: 0,
        end_time,
        highest_bidder: SELLER_PLACEHOLDER.to_owned(),
        closed: false,
    }
}

/// Poll `condition` for up to ~3 seconds, yielding between attempts.
pub async fn wait_until(mut condition: impl FnMut() -> bool) -> bool {
    for _ in 0..300 {
        if condition() {
            return true;
        }
        tokio::time::sleep(Duration::from_millis(10)).await;
    }
    false
}
