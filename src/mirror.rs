//! Local mirror of the remote auction table.
//!
//! Eventually consistent with the store via the change feed; the single
//! source of truth for everything client-side that wants a fast read.
//! Read-your-own-writes is not guaranteed: a settled bid becomes visible
//! here only once the feed echoes it back.

use crate::auction::{AuctionId, AuctionIdRef, AuctionPatch, AuctionRecord};
use parking_lot::RwLock;
use std::collections::BTreeMap;
use std::sync::Arc;
use tracing::{debug, warn};

pub struct LocalMirror {
    records: RwLock<BTreeMap<AuctionId, AuctionRecord>>,
}

pub type SharedMirror = Arc<LocalMirror>;

impl LocalMirror {
    pub fn new() -> Self {
        Self {
            records: RwLock::new(BTreeMap::new()),
        }
    }

    pub fn new_shared() -> SharedMirror {
        Arc::new(Self::new())
    }

    pub fn on_created(&self, id: AuctionIdRef<'_>, record: AuctionRecord) {
        if self
            .records
            .write()
            .insert(id.to_owned(), record)
            .is_some()
        {
            debug!(id, "created event replaced an existing mirror entry");
        }
    }

    /// Merge the patch into the entry for `id` and return the merged
    /// snapshot. The merge happens under the write lock, so readers never
    /// observe a torn update.
    pub fn on_updated(
        &self,
        id: AuctionIdRef<'_>,
        patch: &AuctionPatch,
    ) -> Option<AuctionRecord> {
        let mut records = self.records.write();
        match records.get_mut(id) {
            Some(record) => {
                patch.apply_to(record);
                Some(record.clone())
            }
            None => {
                // Per-key feed ordering means this is a straggler for a
                // removed auction, not a gap.
                warn!(id, "update for unmirrored auction dropped");
                None
            }
        }
    }

    pub fn on_removed(&self, id: AuctionIdRef<'_>) -> bool {
        self.records.write().remove(id).is_some()
    }

    pub fn get(&self, id: AuctionIdRef<'_>) -> Option<AuctionRecord> {
        self.records.read().get(id).cloned()
    }

    pub fn list(&self) -> Vec<(AuctionId, AuctionRecord)> {
        self.records
            .read()
            .iter()
            .map(|(id, record)| (id.clone(), record.clone()))
            .collect()
    }

    /// Flip `closed` for `id`. Returns true only for the call that actually
    /// performed the transition, which is what makes closure exactly-once
    /// no matter how many stray ticks race in after expiry.
    pub fn mark_closed(&self, id: AuctionIdRef<'_>) -> bool {
        let mut records = self.records.write();
        match records.get_mut(id) {
            Some(record) if !record.closed => {
                record.closed = true;
                true
            }
            _ => false,
        }
    }
}

impl Default for LocalMirror {
    fn default() -> Self {
        Self::new()
    }
}
