use crate::auction::{AuctionId, AuctionPatch, AuctionRecord};

/// One notification from the remote store's change feed.
///
/// The feed delivers every create, update and delete across all ids,
/// including ones caused by this client's own calls. Per id, delivery
/// order matches the store's commit order.
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum ChangeEvent {
    Created { id: AuctionId, record: AuctionRecord },
    Updated { id: AuctionId, patch: AuctionPatch },
    Removed { id: AuctionId },
}
