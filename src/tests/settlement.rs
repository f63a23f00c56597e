use super::{listing, FAR_FUTURE};
use crate::auction::{Amount, AuctionId, AuctionIdRef, AuctionRecord, ANONYMOUS_BIDDER, BID_INCREMENT};
use crate::event::ChangeEvent;
use crate::mirror::{LocalMirror, SharedMirror};
use crate::settlement::{BidOutcome, BidRejection, BidSettlement};
use crate::store::{
    InMemoryRemoteStore, Proposal, RemoteStore, SharedRemoteStore, StoreError, TransactResult,
};
use anyhow::Result;
use async_trait::async_trait;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::mpsc::UnboundedReceiver;

async fn world(
    min_price: Amount,
) -> Result<(Arc<InMemoryRemoteStore>, SharedMirror, BidSettlement, AuctionId)> {
    let store = Arc::new(InMemoryRemoteStore::new());
    let mirror = LocalMirror::new_shared();

    let id = store.create(listing(min_price, FAR_FUTURE)).await?;
    let record = store.get(&id).await?.expect("just created");
    mirror.on_created(&id, record);

    let shared: SharedRemoteStore = store.clone();
    let settlement = BidSettlement::new(shared, mirror.clone());
    Ok((store, mirror, settlement, id))
}

/// Wraps the in-memory store and counts `transact` calls, to prove local
/// rejections never reach the store.
struct CountingStore {
    inner: InMemoryRemoteStore,
    transacts: AtomicU64,
}

#[async_trait]
impl RemoteStore for CountingStore {
    async fn create(&self, record: AuctionRecord) -> Result<AuctionId, StoreError> {
        self.inner.create(record).await
    }

    async fn delete(&self, id: AuctionIdRef<'_>) -> Result<(), StoreError> {
        self.inner.delete(id).await
    }

    async fn get(&self, id: AuctionIdRef<'_>) -> Result<Option<AuctionRecord>, StoreError> {
        self.inner.get(id).await
    }

    async fn transact(
        &self,
        id: AuctionIdRef<'_>,
        proposal: Proposal<'_>,
    ) -> Result<TransactResult, StoreError> {
        self.transacts.fetch_add(1, Ordering::SeqCst);
        self.inner.transact(id, proposal).await
    }

    fn subscribe_changes(&self) -> UnboundedReceiver<ChangeEvent> {
        self.inner.subscribe_changes()
    }
}

/// Never answers; used to prove the settle timeout surfaces as
/// store unavailability.
struct StalledStore;

#[async_trait]
impl RemoteStore for StalledStore {
    async fn create(&self, _record: AuctionRecord) -> Result<AuctionId, StoreError> {
        futures::future::pending().await
    }

    async fn delete(&self, _id: AuctionIdRef<'_>) -> Result<(), StoreError> {
        futures::future::pending().await
    }

    async fn get(&self, _id: AuctionIdRef<'_>) -> Result<Option<AuctionRecord>, StoreError> {
        futures::future::pending().await
    }

    async fn transact(
        &self,
        _id: AuctionIdRef<'_>,
        _proposal: Proposal<'_>,
    ) -> Result<TransactResult, StoreError> {
        futures::future::pending().await
    }

    fn subscribe_changes(&self) -> UnboundedReceiver<ChangeEvent> {
        tokio::sync::mpsc::unbounded_channel().1
    }
}

#[tokio::test]
async fn invalid_amounts_are_rejected_without_a_store_call() -> Result<()> {
    let store = Arc::new(CountingStore {
        inner: InMemoryRemoteStore::new(),
        transacts: AtomicU64::new(0),
    });
    let mirror = LocalMirror::new_shared();
    let id = store.create(listing(1000, FAR_FUTURE)).await?;
    mirror.on_created(&id, store.get(&id).await?.expect("just created"));
    let shared: SharedRemoteStore = store.clone();
    let settlement = BidSettlement::new(shared, mirror);

    for amount in [0, 50, 1050, 1101] {
        assert_eq!(
            settlement.submit_bid(&id, amount, "alice").await?,
            BidOutcome::Rejected(BidRejection::InvalidAmount)
        );
    }
    assert_eq!(store.transacts.load(Ordering::SeqCst), 0);
    Ok(())
}

#[tokio::test]
async fn bids_for_unmirrored_auctions_are_rejected_locally() -> Result<()> {
    let (_store, _mirror, settlement, _id) = world(1000).await?;

    assert_eq!(
        settlement.submit_bid("auction-404", 1100, "alice").await?,
        BidOutcome::Rejected(BidRejection::UnknownAuction("auction-404".to_owned()))
    );
    Ok(())
}

#[tokio::test]
async fn bids_for_locally_closed_auctions_are_rejected_locally() -> Result<()> {
    let (_store, mirror, settlement, id) = world(1000).await?;
    mirror.mark_closed(&id);

    assert_eq!(
        settlement.submit_bid(&id, 1100, "alice").await?,
        BidOutcome::Rejected(BidRejection::UnknownAuction(id))
    );
    Ok(())
}

#[tokio::test]
async fn a_bid_equal_to_the_current_price_is_too_low() -> Result<()> {
    let (_store, _mirror, settlement, id) = world(1000).await?;

    assert_eq!(
        settlement.submit_bid(&id, 1000, "alice").await?,
        BidOutcome::Rejected(BidRejection::BidTooLow { next_min_bid: 1100 })
    );
    Ok(())
}

#[tokio::test]
async fn an_accepted_bid_settles_price_count_and_bidder_atomically() -> Result<()> {
    let (store, _mirror, settlement, id) = world(1000).await?;

    assert_eq!(
        settlement.submit_bid(&id, 1100, "alice").await?,
        BidOutcome::Accepted {
            resulting_price: 1100
        }
    );

    let record = store.get(&id).await?.expect("still listed");
    assert_eq!(record.current_price, 1100);
    assert_eq!(record.bid_count, 1);
    assert_eq!(record.highest_bidder, "alice");
    Ok(())
}

#[tokio::test]
async fn a_blank_bidder_name_settles_as_anonymous() -> Result<()> {
    let (store, _mirror, settlement, id) = world(1000).await?;

    settlement.submit_bid(&id, 1100, "   ").await?;
    assert_eq!(
        store.get(&id).await?.expect("still listed").highest_bidder,
        ANONYMOUS_BIDDER
    );
    Ok(())
}

#[tokio::test]
async fn a_deletion_mid_flight_reports_the_auction_gone() -> Result<()> {
    let (store, _mirror, settlement, id) = world(1000).await?;

    // the mirror has not yet seen the removal when the bid goes out
    store.delete(&id).await?;
    assert_eq!(
        settlement.submit_bid(&id, 1100, "alice").await?,
        BidOutcome::Rejected(BidRejection::AuctionGone)
    );
    Ok(())
}

#[tokio::test]
async fn a_stalled_store_resolves_as_unavailable_instead_of_hanging() -> Result<()> {
    let mirror = LocalMirror::new_shared();
    mirror.on_created("a", listing(1000, FAR_FUTURE));
    let settlement = BidSettlement::new(Arc::new(StalledStore), mirror)
        .with_settle_timeout(Duration::from_millis(50));

    assert!(matches!(
        settlement.submit_bid("a", 1100, "alice").await,
        Err(StoreError::Unavailable(_))
    ));
    Ok(())
}

#[tokio::test]
async fn catalog_scenario_two_racing_bidders() -> Result<()> {
    let (store, _mirror, settlement, id) = world(1000).await?;

    assert_eq!(
        settlement.submit_bid(&id, 1000, "early").await?,
        BidOutcome::Rejected(BidRejection::BidTooLow { next_min_bid: 1100 })
    );
    assert_eq!(
        settlement.submit_bid(&id, 1100, "first").await?,
        BidOutcome::Accepted {
            resulting_price: 1100
        }
    );

    let (low, high) = tokio::join!(
        settlement.submit_bid(&id, 1200, "low"),
        settlement.submit_bid(&id, 1300, "high"),
    );
    let (low, high) = (low?, high?);

    // the 1300 bid always ends up on top; whether 1200 settled underneath
    // it first depends on who won the race
    assert_eq!(
        high,
        BidOutcome::Accepted {
            resulting_price: 1300
        }
    );
    let record = store.get(&id).await?.expect("still listed");
    assert_eq!(record.current_price, 1300);
    assert_eq!(record.highest_bidder, "high");
    match low {
        BidOutcome::Accepted {
            resulting_price: 1200,
        } => assert_eq!(record.bid_count, 3),
        BidOutcome::Rejected(BidRejection::BidTooLow { next_min_bid: 1400 }) => {
            assert_eq!(record.bid_count, 2)
        }
        other => panic!("unexpected outcome for the losing bid: {other:?}"),
    }
    Ok(())
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn no_lost_updates_across_concurrent_bidders() -> Result<()> {
    const BIDDERS: u64 = 8;

    let (store, _mirror, settlement, id) = world(1000).await?;
    let mut feed = store.subscribe_changes();

    let bidders: Vec<_> = (0..BIDDERS)
        .map(|n| {
            tokio::spawn({
                let settlement = settlement.clone();
                let id = id.clone();
                async move {
                    let mut amount = 1000 + BID_INCREMENT;
                    for _ in 0..1000 {
                        match settlement
                            .submit_bid(&id, amount, &format!("bidder-{n}"))
                            .await?
                        {
                            BidOutcome::Accepted { .. } => return Ok(()),
                            BidOutcome::Rejected(BidRejection::BidTooLow { next_min_bid }) => {
                                amount = next_min_bid
                            }
                            BidOutcome::Rejected(other) => {
                                anyhow::bail!("unexpected rejection: {other}")
                            }
                        }
                    }
                    anyhow::bail!("bidder starved")
                }
            })
        })
        .collect();

    for bidder in bidders {
        bidder.await??;
    }

    let record = store.get(&id).await?.expect("still listed");
    assert_eq!(record.bid_count, BIDDERS);
    assert_eq!(record.current_price, 1000 + BIDDERS * BID_INCREMENT);

    // audit the commit order off the change feed: every settlement raised
    // the price by exactly one increment over its predecessor
    let mut last_price = 1000;
    let mut commits = 0;
    while let Ok(event) = feed.try_recv() {
        match event {
            ChangeEvent::Created { .. } => {}
            ChangeEvent::Updated { patch, .. } => {
                let price = patch.current_price.expect("price changes on every commit");
                assert_eq!(price, last_price + BID_INCREMENT);
                assert_eq!(price % BID_INCREMENT, 0);
                assert_eq!(patch.bid_count, Some(commits + 1));
                last_price = price;
                commits += 1;
            }
            ChangeEvent::Removed { .. } => panic!("nothing was removed"),
        }
    }
    assert_eq!(commits, BIDDERS);
    Ok(())
}
