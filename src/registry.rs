//! Live stream subscribers.
//!
//! The registry is a set of [`SubscriberId`]s. Its size is the only input
//! the [`AdaptiveScheduler`](crate::scheduler::AdaptiveScheduler) uses to
//! pick a poll period. Every method takes the lock only for the set
//! operation itself, so `size()` never observes a half-applied mutation.
//!
//! Stream handlers do not call [`add`](SubscriberRegistry::add) and
//! [`remove`](SubscriberRegistry::remove) directly but hold a
//! [`Subscription`], which deregisters when dropped. A subscriber task that
//! ends for any reason (client went away, write failure, panic, shutdown)
//! therefore always leaves the registry.

use std::{
    collections::HashSet,
    fmt,
    net::SocketAddr,
    sync::{
        atomic::{AtomicU64, Ordering},
        Arc, Mutex, PoisonError,
    },
};

use tokio::sync::Notify;

use crate::events::{self, Event};

/// Identifier of one stream connection, unique for the process lifetime.
#[derive(Copy, Clone, Debug, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct SubscriberId(u64);

impl fmt::Display for SubscriberId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "#{}", self.0)
    }
}

#[derive(Debug, Default)]
pub struct SubscriberRegistry {
    members: Mutex<HashSet<SubscriberId>>,
    next_id: AtomicU64,
    connects: Notify,
    events: Option<events::Sender>,
}

impl SubscriberRegistry {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Reports connects and disconnects on `events`.
    #[must_use]
    pub fn with_events(mut self, events: events::Sender) -> Self {
        self.events = Some(events);
        self
    }

    /// Adds `id`. Returns `false` if it was present already.
    pub fn add(&self, id: SubscriberId) -> bool {
        self.members
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .insert(id)
    }

    /// Removes `id`. Returns `false` if it was not present; removing twice
    /// is harmless.
    pub fn remove(&self, id: SubscriberId) -> bool {
        self.members
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .remove(&id)
    }

    #[must_use]
    pub fn size(&self) -> usize {
        self.members
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .len()
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.size() == 0
    }

    /// Registers a new connection from `peer` and wakes the scheduler.
    #[must_use]
    pub fn subscribe(self: &Arc<Self>, peer: Option<SocketAddr>) -> Subscription {
        let id = SubscriberId(self.next_id.fetch_add(1, Ordering::Relaxed));
        self.add(id);

        match peer {
            Some(peer) => debug!("subscriber {id} connected from {peer}"),
            None => debug!("subscriber {id} connected"),
        }
        events::emit(self.events.as_ref(), Event::Connected(id));

        // Stores a permit when the scheduler is busy, so the connect is
        // not lost.
        self.connects.notify_one();

        Subscription {
            id,
            peer,
            registry: Arc::clone(self),
        }
    }

    /// Completes at the next [`subscribe`](Self::subscribe), or right away
    /// if one happened since the last call.
    ///
    /// Intended for a single waiter, the scheduler.
    pub async fn connected(&self) {
        self.connects.notified().await;
    }
}

/// Membership of one stream connection in the registry.
///
/// Removes itself from the registry when dropped.
#[must_use = "dropping a subscription deregisters it"]
pub struct Subscription {
    id: SubscriberId,
    peer: Option<SocketAddr>,
    registry: Arc<SubscriberRegistry>,
}

impl Subscription {
    #[must_use]
    pub fn id(&self) -> SubscriberId {
        self.id
    }

    #[must_use]
    pub fn peer(&self) -> Option<SocketAddr> {
        self.peer
    }
}

impl fmt::Debug for Subscription {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Subscription")
            .field("id", &self.id)
            .field("peer", &self.peer)
            .finish_non_exhaustive()
    }
}

impl Drop for Subscription {
    fn drop(&mut self) {
        if self.registry.remove(self.id) {
            debug!(
                "subscriber {} disconnected; {} remaining",
                self.id,
                self.registry.size()
            );
            events::emit(self.registry.events.as_ref(), Event::Disconnected(self.id));
        }
    }
}
