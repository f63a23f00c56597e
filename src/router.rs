//! Fan-out of mirror changes and expiry events to presentation sinks.
//!
//! Sinks only ever receive owned snapshots or ids; nothing handed out here
//! can mutate mirror state. A subscription is either global or scoped to a
//! single auction id. Scoped subscriptions are the replacement for a shared
//! "currently selected auction" variable: the bid-panel equivalent
//! subscribes to the one auction it shows and is detached automatically
//! when that auction closes or is removed.

use crate::auction::{AuctionId, AuctionIdRef, AuctionRecord};
use parking_lot::Mutex;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;

pub trait EngineSink: Send + Sync {
    fn on_created(&self, id: AuctionIdRef<'_>, record: &AuctionRecord);
    fn on_updated(&self, id: AuctionIdRef<'_>, record: &AuctionRecord);
    fn on_closed(&self, id: AuctionIdRef<'_>);
    fn on_tick(&self, id: AuctionIdRef<'_>, remaining_ms: u64, urgent: bool);
}

pub type SharedSink = Arc<dyn EngineSink + 'static>;

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct SubscriptionHandle(u64);

struct Subscription {
    handle: SubscriptionHandle,
    scope: Option<AuctionId>,
    sink: SharedSink,
}

impl Subscription {
    fn delivers_for(&self, id: AuctionIdRef<'_>) -> bool {
        match &self.scope {
            None => true,
            Some(scope) => scope == id,
        }
    }
}

pub struct EventRouter {
    subscriptions: Mutex<Vec<Subscription>>,
    next_handle: AtomicU64,
}

pub type SharedRouter = Arc<EventRouter>;

impl EventRouter {
    pub fn new() -> Self {
        Self {
            subscriptions: Mutex::new(Vec::new()),
            next_handle: AtomicU64::new(0),
        }
    }

    pub fn new_shared() -> SharedRouter {
        Arc::new(Self::new())
    }

    pub fn subscribe(&self, sink: SharedSink) -> SubscriptionHandle {
        self.register(None, sink)
    }

    pub fn subscribe_auction(&self, id: AuctionId, sink: SharedSink) -> SubscriptionHandle {
        self.register(Some(id), sink)
    }

    pub fn unsubscribe(&self, handle: SubscriptionHandle) {
        self.subscriptions
            .lock()
            .retain(|subscription| subscription.handle != handle);
    }

    fn register(&self, scope: Option<AuctionId>, sink: SharedSink) -> SubscriptionHandle {
        let handle = SubscriptionHandle(self.next_handle.fetch_add(1, Ordering::Relaxed));
        self.subscriptions.lock().push(Subscription {
            handle,
            scope,
            sink,
        });
        handle
    }

    // Deliveries happen outside the lock so a sink may freely call back
    // into the router.
    fn sinks_for(&self, id: AuctionIdRef<'_>) -> Vec<SharedSink> {
        self.subscriptions
            .lock()
            .iter()
            .filter(|subscription| subscription.delivers_for(id))
            .map(|subscription| subscription.sink.clone())
            .collect()
    }

    pub fn created(&self, id: AuctionIdRef<'_>, record: &AuctionRecord) {
        for sink in self.sinks_for(id) {
            sink.on_created(id, record);
        }
    }

    pub fn updated(&self, id: AuctionIdRef<'_>, record: &AuctionRecord) {
        for sink in self.sinks_for(id) {
            sink.on_updated(id, record);
        }
    }

    pub fn tick(&self, id: AuctionIdRef<'_>, remaining_ms: u64, urgent: bool) {
        for sink in self.sinks_for(id) {
            sink.on_tick(id, remaining_ms, urgent);
        }
    }

    /// Deliver the closure and tear down subscriptions scoped to `id`;
    /// `on_closed` doubles as the detach instruction for those sinks.
    pub fn closed(&self, id: AuctionIdRef<'_>) {
        let mut interested = Vec::new();
        self.subscriptions.lock().retain(|subscription| {
            let delivers = subscription.delivers_for(id);
            if delivers {
                interested.push(subscription.sink.clone());
            }
            !(delivers && subscription.scope.is_some())
        });
        for sink in interested {
            sink.on_closed(id);
        }
    }

    /// Drop subscriptions scoped to a removed auction. No callback: removal
    /// is not one of the routed event kinds, the teardown is purely a
    /// resource release.
    pub fn detach_auction(&self, id: AuctionIdRef<'_>) {
        self.subscriptions
            .lock()
            .retain(|subscription| subscription.scope.as_deref() != Some(id));
    }
}

impl Default for EventRouter {
    fn default() -> Self {
        Self::new()
    }
}
