mod auction;
mod event;
mod expiry;
mod mirror;
mod router;
mod service;
mod settlement;
mod store;

use crate::auction::{AuctionDraft, AuctionIdRef, AuctionRecord};
use crate::router::EngineSink;
use crate::settlement::BidOutcome;
use anyhow::Result;
use std::sync::Arc;
use std::time::Duration;
use tracing::{debug, info, warn};

/// Console stand-in for the presentation layer.
struct LogSink;

impl EngineSink for LogSink {
    fn on_created(&self, id: AuctionIdRef<'_>, record: &AuctionRecord) {
        info!(id, name = %record.name, price = record.current_price, "auction listed");
    }

    fn on_updated(&self, id: AuctionIdRef<'_>, record: &AuctionRecord) {
        info!(
            id,
            price = record.current_price,
            bids = record.bid_count,
            bidder = %record.highest_bidder,
            "auction updated"
        );
    }

    fn on_closed(&self, id: AuctionIdRef<'_>) {
        info!(id, "auction closed");
    }

    fn on_tick(&self, id: AuctionIdRef<'_>, remaining_ms: u64, urgent: bool) {
        debug!(id, remaining_ms, urgent, "tick");
    }
}

async fn run() -> Result<()> {
    let store = store::InMemoryRemoteStore::new_shared();
    let engine = service::Engine::start(store, Arc::new(expiry::SystemClock));
    let _console = engine.subscribe(Arc::new(LogSink));

    let id = engine
        .create_auction(AuctionDraft {
            name: "demo lot".to_owned(),
            description: "seeded by the demo binary".to_owned(),
            min_price: 1000,
            duration_ms: 2 * 60 * 1000,
        })
        .await?;

    // The mirror learns about the listing from the change feed, not from
    // the create call, so give the pump a moment before bidding.
    tokio::time::sleep(Duration::from_millis(50)).await;
    match engine.submit_bid(&id, 1100, "console").await? {
        BidOutcome::Accepted { resulting_price } => {
            info!(resulting_price, "opening bid settled")
        }
        BidOutcome::Rejected(reason) => warn!(%reason, "opening bid rejected"),
    }

    let (stop_sender, mut stop) = tokio::sync::watch::channel(false);
    ctrlc::set_handler(move || {
        let _ = stop_sender.send(true);
    })?;

    info!(%id, "demo auction runs for two minutes, ctrl-c to stop");
    stop.changed().await?;
    engine.shutdown();
    Ok(())
}

fn main() -> Result<()> {
    tracing_subscriber::fmt::init();

    let runtime = tokio::runtime::Runtime::new()?;
    runtime.block_on(run())
}

#[cfg(test)]
mod tests;
