//! The remote store seam.
//!
//! The authoritative copy of every auction lives in a replicated key-value
//! store reachable by all clients. This module only defines the contract we
//! consume (plus an in-memory stand-in for tests and the demo binary); the
//! store itself is somebody else's problem.
//!
//! The one property everything here leans on: `transact` is an atomic
//! read-modify-write. The proposal callback may be invoked any number of
//! times, each time against a freshly read value, until it either commits
//! cleanly or aborts. It therefore must be a pure function of its input:
//! no side effects, no captured mutable state.

mod in_memory;

pub use self::in_memory::InMemoryRemoteStore;

use crate::auction::{AuctionId, AuctionIdRef, AuctionRecord};
use crate::event::ChangeEvent;
use async_trait::async_trait;
use std::sync::Arc;
use thiserror::Error;
use tokio::sync::mpsc::UnboundedReceiver;

#[derive(Error, Debug)]
pub enum StoreError {
    /// Delete of a record that does not exist.
    #[error("no such record")]
    NotFound,
    /// Transport or backing-store failure. The only infrastructural error
    /// in the taxonomy; surfaced verbatim, never retried here.
    #[error("store unavailable: {0}")]
    Unavailable(String),
}

/// What a proposal wants done with the record it was shown.
pub enum TransactStep {
    Write(AuctionRecord),
    Abort,
}

/// Outcome of a `transact` call.
///
/// On commit, `value` is the record as written. On abort, `value` is the
/// record as observed by the final attempt (`None` if it was gone), so the
/// caller can report why the proposal gave up against the freshest state.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct TransactResult {
    pub committed: bool,
    pub value: Option<AuctionRecord>,
}

/// See the module docs: pure, possibly invoked many times on conflict.
pub type Proposal<'a> = &'a (dyn Fn(Option<&AuctionRecord>) -> TransactStep + Send + Sync);

#[async_trait]
pub trait RemoteStore: Send + Sync {
    async fn create(&self, record: AuctionRecord) -> Result<AuctionId, StoreError>;

    async fn delete(&self, id: AuctionIdRef<'_>) -> Result<(), StoreError>;

    async fn get(&self, id: AuctionIdRef<'_>) -> Result<Option<AuctionRecord>, StoreError>;

    /// Atomic read-modify-write with internal conflict retry.
    async fn transact(
        &self,
        id: AuctionIdRef<'_>,
        proposal: Proposal<'_>,
    ) -> Result<TransactResult, StoreError>;

    /// Subscribe to the change feed. Existing records are replayed to the
    /// new subscriber as `Created` events before any live ones arrive.
    fn subscribe_changes(&self) -> UnboundedReceiver<ChangeEvent>;
}

pub type SharedRemoteStore = Arc<dyn RemoteStore + 'static>;
