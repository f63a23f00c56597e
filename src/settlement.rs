//! Bid settlement.
//!
//! Applies a bid against the remote store with an optimistic
//! read-modify-write: the proposal only wins if the bid still beats the
//! authoritative price at commit time, and the store reruns it on conflict.
//! Losing the race is a normal outcome of the protocol, not a fault, so
//! rejections come back as values and only store unavailability is an error.

use crate::auction::{
    is_valid_bid_amount, Amount, AuctionId, AuctionIdRef, AuctionRecord, ANONYMOUS_BIDDER,
    BID_INCREMENT,
};
use crate::mirror::SharedMirror;
use crate::store::{SharedRemoteStore, StoreError, TransactStep};
use std::time::Duration;
use thiserror::Error;
use tracing::debug;

const DEFAULT_SETTLE_TIMEOUT: Duration = Duration::from_secs(10);

#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum BidRejection {
    /// Not a positive multiple of the bid increment. Caught locally,
    /// before any remote call.
    #[error("bid must be a positive multiple of {BID_INCREMENT}")]
    InvalidAmount,
    /// Not a currently known, open auction. Caught locally.
    #[error("unknown auction: {0}")]
    UnknownAuction(AuctionId),
    /// The record disappeared mid-flight (seller deleted it).
    #[error("auction no longer exists")]
    AuctionGone,
    /// Lost the race or bid below the minimum. `next_min_bid` is the
    /// minimum as observed by the final transaction attempt.
    #[error("bid too low, next valid bid is {next_min_bid}")]
    BidTooLow { next_min_bid: Amount },
}

#[derive(Clone, Debug, PartialEq, Eq)]
pub enum BidOutcome {
    Accepted { resulting_price: Amount },
    Rejected(BidRejection),
}

#[derive(Clone)]
pub struct BidSettlement {
    store: SharedRemoteStore,
    mirror: SharedMirror,
    settle_timeout: Duration,
}

impl BidSettlement {
    pub fn new(store: SharedRemoteStore, mirror: SharedMirror) -> Self {
        Self {
            store,
            mirror,
            settle_timeout: DEFAULT_SETTLE_TIMEOUT,
        }
    }

    pub fn with_settle_timeout(mut self, settle_timeout: Duration) -> Self {
        self.settle_timeout = settle_timeout;
        self
    }

    /// Submit a bid and suspend until the store commits or finally aborts.
    ///
    /// The enforcement boundary is the store's price check inside the
    /// transaction, not any local state: the mirror lookups here only stop
    /// bids that cannot possibly settle from ever leaving the client.
    pub async fn submit_bid(
        &self,
        id: AuctionIdRef<'_>,
        amount: Amount,
        bidder: &str,
    ) -> Result<BidOutcome, StoreError> {
        if !is_valid_bid_amount(amount) {
            debug!(id, amount, "bid rejected locally, invalid amount");
            return Ok(BidOutcome::Rejected(BidRejection::InvalidAmount));
        }
        match self.mirror.get(id) {
            Some(record) if !record.closed => {}
            _ => {
                debug!(id, "bid rejected locally, not an open mirrored auction");
                return Ok(BidOutcome::Rejected(BidRejection::UnknownAuction(
                    id.to_owned(),
                )));
            }
        }

        let bidder = match bidder.trim() {
            "" => ANONYMOUS_BIDDER.to_owned(),
            name => name.to_owned(),
        };

        // Pure function of the observed record; the store may run it any
        // number of times against fresh reads before settling.
        let proposal = move |current: Option<&AuctionRecord>| match current {
            None => TransactStep::Abort,
            Some(record) => {
                if amount < record.next_min_bid() {
                    TransactStep::Abort
                } else {
                    let mut next = record.clone();
                    next.current_price = amount;
                    next.bid_count += 1;
                    next.highest_bidder = bidder.clone();
                    TransactStep::Write(next)
                }
            }
        };

        let result = tokio::time::timeout(self.settle_timeout, self.store.transact(id, &proposal))
            .await
            .map_err(|_| StoreError::Unavailable("bid settlement timed out".to_owned()))??;

        if result.committed {
            debug!(id, amount, "bid settled");
            return Ok(BidOutcome::Accepted {
                resulting_price: amount,
            });
        }

        Ok(BidOutcome::Rejected(match result.value {
            None => {
                debug!(id, "bid lost, auction gone");
                BidRejection::AuctionGone
            }
            Some(record) => {
                let next_min_bid = record.next_min_bid();
                debug!(id, amount, next_min_bid, "bid lost, too low");
                BidRejection::BidTooLow { next_min_bid }
            }
        }))
    }
}
