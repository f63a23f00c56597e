//! Engine wiring.
//!
//! One pump task serializes every mirror mutation: change-feed events are
//! applied in delivery order, timers are started and stopped, and sinks are
//! notified, all from the same loop. Settlement and the per-auction timers
//! never touch the mirror's entries directly except through the operations
//! the mirror itself serializes.

use crate::auction::{Amount, AuctionDraft, AuctionId, AuctionIdRef, AuctionRecord, DraftError};
use crate::event::ChangeEvent;
use crate::expiry::{ExpiryScheduler, SharedClock};
use crate::mirror::{LocalMirror, SharedMirror};
use crate::router::{EventRouter, SharedRouter, SharedSink, SubscriptionHandle};
use crate::settlement::{BidOutcome, BidSettlement};
use crate::store::{SharedRemoteStore, StoreError};
use std::sync::Arc;
use thiserror::Error;
use tokio::sync::mpsc::UnboundedReceiver;
use tracing::{debug, info};

#[derive(Error, Debug)]
pub enum SellerError {
    #[error(transparent)]
    InvalidDraft(#[from] DraftError),
    #[error(transparent)]
    Store(#[from] StoreError),
}

/// Aborts the wrapped task when dropped.
struct TaskHandle(tokio::task::JoinHandle<()>);

impl TaskHandle {
    fn abort(&self) {
        self.0.abort();
    }
}

impl Drop for TaskHandle {
    fn drop(&mut self) {
        self.0.abort();
    }
}

pub struct Engine {
    store: SharedRemoteStore,
    mirror: SharedMirror,
    router: SharedRouter,
    scheduler: Arc<ExpiryScheduler>,
    settlement: BidSettlement,
    clock: SharedClock,
    pump: TaskHandle,
}

impl Engine {
    /// Wire everything up and start following the store's change feed.
    /// Must run inside a tokio runtime.
    pub fn start(store: SharedRemoteStore, clock: SharedClock) -> Self {
        let mirror = LocalMirror::new_shared();
        let router = EventRouter::new_shared();
        let scheduler = Arc::new(ExpiryScheduler::new(
            mirror.clone(),
            router.clone(),
            clock.clone(),
        ));
        let settlement = BidSettlement::new(store.clone(), mirror.clone());

        let feed = store.subscribe_changes();
        let pump = TaskHandle(tokio::spawn(pump_changes(
            feed,
            mirror.clone(),
            router.clone(),
            scheduler.clone(),
        )));

        Self {
            store,
            mirror,
            router,
            scheduler,
            settlement,
            clock,
            pump,
        }
    }

    pub async fn submit_bid(
        &self,
        id: AuctionIdRef<'_>,
        amount: Amount,
        bidder: &str,
    ) -> Result<BidOutcome, StoreError> {
        self.settlement.submit_bid(id, amount, bidder).await
    }

    /// Seller action: validate the draft and push the new listing to the
    /// store. The mirror learns about it from the change feed, not from
    /// this call.
    pub async fn create_auction(&self, draft: AuctionDraft) -> Result<AuctionId, SellerError> {
        let record = draft.into_record(self.clock.now_ms())?;
        let id = self.store.create(record).await?;
        info!(%id, "auction listed");
        Ok(id)
    }

    /// Seller action: remove a listing.
    pub async fn delete_auction(&self, id: AuctionIdRef<'_>) -> Result<(), StoreError> {
        self.store.delete(id).await
    }

    pub fn subscribe(&self, sink: SharedSink) -> SubscriptionHandle {
        self.router.subscribe(sink)
    }

    pub fn subscribe_auction(&self, id: AuctionId, sink: SharedSink) -> SubscriptionHandle {
        self.router.subscribe_auction(id, sink)
    }

    pub fn unsubscribe(&self, handle: SubscriptionHandle) {
        self.router.unsubscribe(handle)
    }

    pub fn auction(&self, id: AuctionIdRef<'_>) -> Option<AuctionRecord> {
        self.mirror.get(id)
    }

    pub fn auctions(&self) -> Vec<(AuctionId, AuctionRecord)> {
        self.mirror.list()
    }

    pub fn shutdown(&self) {
        self.pump.abort();
        self.scheduler.cancel_all();
    }
}

impl Drop for Engine {
    fn drop(&mut self) {
        self.scheduler.cancel_all();
    }
}

async fn pump_changes(
    mut feed: UnboundedReceiver<ChangeEvent>,
    mirror: SharedMirror,
    router: SharedRouter,
    scheduler: Arc<ExpiryScheduler>,
) {
    while let Some(event) = feed.recv().await {
        match event {
            ChangeEvent::Created { id, record } => {
                mirror.on_created(&id, record.clone());
                // Routing before scheduling keeps the per-id ordering
                // guarantee: no timer event can precede the created one.
                router.created(&id, &record);
                scheduler.clone().schedule(id);
            }
            ChangeEvent::Updated { id, patch } => {
                if let Some(merged) = mirror.on_updated(&id, &patch) {
                    router.updated(&id, &merged);
                }
            }
            ChangeEvent::Removed { id } => {
                mirror.on_removed(&id);
                scheduler.cancel(&id);
                router.detach_auction(&id);
            }
        }
    }
    debug!("change feed ended");
}
