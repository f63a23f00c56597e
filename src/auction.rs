use serde::{Deserialize, Serialize};
use thiserror::Error;

pub type AuctionId = String;
pub type AuctionIdRef<'a> = &'a str;
pub type Amount = u64;
pub type TimestampMs = u64;

/// Bids move in fixed steps; amounts that are not a multiple of this
/// are rejected before any remote call.
pub const BID_INCREMENT: Amount = 100;

/// `highest_bidder` value of a freshly listed auction, before any bid settled.
pub const SELLER_PLACEHOLDER: &str = "seller";

/// Recorded in place of a blank bidder name.
pub const ANONYMOUS_BIDDER: &str = "anonymous";

pub fn is_valid_bid_amount(amount: Amount) -> bool {
    amount > 0 && amount % BID_INCREMENT == 0
}

/// The persisted shape of one auction, keyed in the remote store by an
/// opaque id that is not part of the value itself.
///
/// `current_price` and `bid_count` only ever change together, through the
/// store's transaction primitive, and are monotonically non-decreasing.
/// `closed` is a client-local fact derived from `end_time` and is never
/// written to the store, hence the serde skip.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct AuctionRecord {
    pub name: String,
    pub description: String,
    pub min_price: Amount,
    pub current_price: Amount,
    pub bid_count: u64,
    pub end_time: TimestampMs,
    pub highest_bidder: String,
    #[serde(skip)]
    pub closed: bool,
}

impl AuctionRecord {
    pub fn next_min_bid(&self) -> Amount {
        self.current_price + BID_INCREMENT
    }
}

#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum DraftError {
    #[error("minimum price must be a positive multiple of {BID_INCREMENT}")]
    InvalidMinPrice,
    #[error("auction duration must be positive")]
    InvalidDuration,
}

/// Seller input for listing a new auction.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct AuctionDraft {
    pub name: String,
    pub description: String,
    pub min_price: Amount,
    pub duration_ms: u64,
}

impl AuctionDraft {
    pub fn into_record(self, now_ms: TimestampMs) -> Result<AuctionRecord, DraftError> {
        if !is_valid_bid_amount(self.min_price) {
            return Err(DraftError::InvalidMinPrice);
        }
        if self.duration_ms == 0 {
            return Err(DraftError::InvalidDuration);
        }

        Ok(AuctionRecord {
            name: self.name,
            description: self.description,
            min_price: self.min_price,
            current_price: self.min_price,
            bid_count: 0,
            end_time: now_ms + self.duration_ms,
            highest_bidder: SELLER_PLACEHOLDER.to_owned(),
            closed: false,
        })
    }
}

/// Set of changed fields carried by an update notification.
///
/// Only the mutable triple appears here; every other field of
/// [`AuctionRecord`] is immutable after creation, so a diff can never
/// produce it.
#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct AuctionPatch {
    pub current_price: Option<Amount>,
    pub bid_count: Option<u64>,
    pub highest_bidder: Option<String>,
}

impl AuctionPatch {
    pub fn diff(old: &AuctionRecord, new: &AuctionRecord) -> Self {
        Self {
            current_price: (old.current_price != new.current_price).then_some(new.current_price),
            bid_count: (old.bid_count != new.bid_count).then_some(new.bid_count),
            highest_bidder: (old.highest_bidder != new.highest_bidder)
                .then(|| new.highest_bidder.clone()),
        }
    }

    pub fn is_empty(&self) -> bool {
        self.current_price.is_none() && self.bid_count.is_none() && self.highest_bidder.is_none()
    }

    /// Merge field by field; fields absent from the patch are left unchanged.
    pub fn apply_to(&self, record: &mut AuctionRecord) {
        if let Some(current_price) = self.current_price {
            record.current_price = current_price;
        }
        if let Some(bid_count) = self.bid_count {
            record.bid_count = bid_count;
        }
        if let Some(highest_bidder) = &self.highest_bidder {
            record.highest_bidder = highest_bidder.clone();
        }
    }
}
