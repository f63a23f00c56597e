use super::*;
use crate::auction::{AuctionId, AuctionIdRef, AuctionPatch, AuctionRecord};
use crate::event::ChangeEvent;
use async_trait::async_trait;
use parking_lot::{Mutex, RwLock};
use std::collections::BTreeMap;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use tokio::sync::mpsc;
use tokio::sync::mpsc::UnboundedReceiver;
use tracing::debug;

struct Versioned {
    version: u64,
    record: AuctionRecord,
}

/// Fake in-memory remote store.
///
/// Implements the same optimistic concurrency as the real thing: each entry
/// carries a version, and a `transact` write only lands if the version is
/// unchanged since the proposal read it. A conflicting writer in between
/// sends the proposal back around the loop against the fresh value.
pub struct InMemoryRemoteStore {
    items: RwLock<BTreeMap<AuctionId, Versioned>>,
    subscribers: Mutex<Vec<mpsc::UnboundedSender<ChangeEvent>>>,
    next_id: AtomicU64,
}

impl InMemoryRemoteStore {
    pub fn new() -> Self {
        Self {
            items: RwLock::new(BTreeMap::new()),
            subscribers: Mutex::new(Vec::new()),
            next_id: AtomicU64::new(0),
        }
    }

    pub fn new_shared() -> SharedRemoteStore {
        Arc::new(Self::new())
    }

    fn publish(&self, event: ChangeEvent) {
        self.subscribers
            .lock()
            .retain(|subscriber| subscriber.send(event.clone()).is_ok());
    }
}

impl Default for InMemoryRemoteStore {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl RemoteStore for InMemoryRemoteStore {
    async fn create(&self, record: AuctionRecord) -> Result<AuctionId, StoreError> {
        let id = format!("auction-{}", self.next_id.fetch_add(1, Ordering::Relaxed));

        self.items.write().insert(
            id.clone(),
            Versioned {
                version: 0,
                record: record.clone(),
            },
        );
        self.publish(ChangeEvent::Created {
            id: id.clone(),
            record,
        });

        Ok(id)
    }

    async fn delete(&self, id: AuctionIdRef<'_>) -> Result<(), StoreError> {
        if self.items.write().remove(id).is_none() {
            return Err(StoreError::NotFound);
        }
        self.publish(ChangeEvent::Removed { id: id.to_owned() });
        Ok(())
    }

    async fn get(&self, id: AuctionIdRef<'_>) -> Result<Option<AuctionRecord>, StoreError> {
        Ok(self.items.read().get(id).map(|entry| entry.record.clone()))
    }

    async fn transact(
        &self,
        id: AuctionIdRef<'_>,
        proposal: Proposal<'_>,
    ) -> Result<TransactResult, StoreError> {
        loop {
            let observed = {
                let items = self.items.read();
                items
                    .get(id)
                    .map(|entry| (entry.version, entry.record.clone()))
            };

            let step = proposal(observed.as_ref().map(|(_, record)| record));

            // Model the round-trip a real store pays between read and
            // write, so concurrent proposals genuinely interleave.
            tokio::task::yield_now().await;

            let new_record = match step {
                TransactStep::Abort => {
                    return Ok(TransactResult {
                        committed: false,
                        value: observed.map(|(_, record)| record),
                    })
                }
                TransactStep::Write(record) => record,
            };

            let committed = {
                let mut items = self.items.write();
                match (items.get_mut(id), &observed) {
                    (Some(entry), Some((version, _))) if entry.version == *version => {
                        entry.version += 1;
                        entry.record = new_record.clone();
                        true
                    }
                    (None, None) => {
                        // Proposal tried to write a record that never
                        // existed; transact does not create.
                        return Ok(TransactResult {
                            committed: false,
                            value: None,
                        });
                    }
                    _ => false,
                }
            };

            if !committed {
                debug!(id, "transact conflict, rerunning proposal");
                continue;
            }

            let (_, old_record) = observed.expect("committed over an observed record");
            let patch = AuctionPatch::diff(&old_record, &new_record);
            if !patch.is_empty() {
                self.publish(ChangeEvent::Updated {
                    id: id.to_owned(),
                    patch,
                });
            }

            return Ok(TransactResult {
                committed: true,
                value: Some(new_record),
            });
        }
    }

    fn subscribe_changes(&self) -> UnboundedReceiver<ChangeEvent> {
        let (sender, receiver) = mpsc::unbounded_channel();

        // Holding the items lock while registering closes the window where
        // a concurrent create would be neither replayed nor delivered live.
        let items = self.items.read();
        for (id, entry) in items.iter() {
            let _ = sender.send(ChangeEvent::Created {
                id: id.clone(),
                record: entry.record.clone(),
            });
        }
        self.subscribers.lock().push(sender);

        receiver
    }
}
