//! The shared state of a running feed.
//!
//! A [`Feed`] bundles everything the poller, the HTTP handlers and the
//! subscriber tasks share: the token guard, the upstream, the snapshot
//! store, the subscriber registry and the broadcaster. It is created once
//! in `main` and handed around as an `Arc<Feed>`; there is no global
//! state.
//!
//! Subscriber tasks do not poll on their own. They wait on a
//! [`watch`](tokio::sync::watch) tick that [`Feed::cycle`] bumps after
//! every merge, and then write whatever the store holds.

use std::sync::Arc;

use tokio::sync::watch;
use tokio_util::sync::CancellationToken;

use crate::{
    broadcast::{Broadcaster, FrameSink},
    error::{Error, ErrorKind, Result},
    guard::TokenGuard,
    registry::{SubscriberId, SubscriberRegistry, Subscription},
    snapshot::{Snapshot, SnapshotStore},
    upstream::Upstream,
};

pub struct Feed {
    guard: Arc<TokenGuard>,
    upstream: Arc<dyn Upstream>,
    store: SnapshotStore,
    registry: Arc<SubscriberRegistry>,
    broadcaster: Broadcaster,
    tick: watch::Sender<u64>,
}

impl Feed {
    #[must_use]
    pub fn new(
        guard: Arc<TokenGuard>,
        upstream: Arc<dyn Upstream>,
        store: SnapshotStore,
        registry: Arc<SubscriberRegistry>,
    ) -> Self {
        let (tick, _) = watch::channel(0);

        Self {
            guard,
            upstream,
            store,
            registry,
            broadcaster: Broadcaster::new(),
            tick,
        }
    }

    #[must_use]
    pub fn guard(&self) -> &Arc<TokenGuard> {
        &self.guard
    }

    #[must_use]
    pub fn registry(&self) -> &Arc<SubscriberRegistry> {
        &self.registry
    }

    #[must_use]
    pub fn snapshot(&self) -> Arc<Snapshot> {
        self.store.load()
    }

    /// Number of completed cycles, observable by waiting for changes.
    #[must_use]
    pub fn ticks(&self) -> watch::Receiver<u64> {
        self.tick.subscribe()
    }

    /// Runs one fetch and merge, then wakes every subscriber task.
    ///
    /// The merge happens while the token lock is still held, so merges
    /// are applied in the order the fetches were made. Subscribers are
    /// woken on failure too: they then receive the snapshot with
    /// `is_playing` cleared.
    ///
    /// # Errors
    ///
    /// Returns the fetch error after it was merged.
    pub async fn cycle(&self) -> Result<Arc<Snapshot>> {
        let upstream = &self.upstream;
        let store = &self.store;

        let outcome = self
            .guard
            .with_client(|client| async move {
                let fetched = upstream.fetch(&client).await;
                let snapshot = store.merge(&fetched);
                Ok(fetched.map(|_| snapshot))
            })
            .await;

        let result = match outcome {
            Ok(merged) => merged,
            Err(e) => {
                // Failed before reaching the upstream.
                self.store.mark_stopped();
                Err(e)
            }
        };

        self.tick.send_modify(|n| *n = n.wrapping_add(1));
        result
    }

    /// Streams snapshots to one subscriber until it goes away, a write
    /// fails, or `shutdown` fires.
    ///
    /// The current snapshot is written right away, then one frame per
    /// cycle. `subscription` is released on return.
    pub async fn serve<S>(
        &self,
        mut sink: S,
        subscription: Subscription,
        shutdown: CancellationToken,
    ) where
        S: FrameSink,
    {
        let id = subscription.id();
        let mut ticks = self.tick.subscribe();

        if let Err(e) = self.broadcaster.write(&self.store.load(), &mut sink).await {
            log_write_failure(id, &e);
            return;
        }

        loop {
            tokio::select! {
                biased;

                () = shutdown.cancelled() => break,

                () = sink.closed() => break,

                changed = ticks.changed() => {
                    if changed.is_err() {
                        break;
                    }

                    let snapshot = self.store.load();
                    if let Err(e) = self.broadcaster.write(&snapshot, &mut sink).await {
                        log_write_failure(id, &e);
                        break;
                    }
                }
            }
        }

        drop(subscription);
    }
}

fn log_write_failure(id: SubscriberId, e: &Error) {
    log!(write_failure_level(e), "writing to subscriber {id} failed: {e}");
}

/// A client hanging up is routine, anything else is not.
fn write_failure_level(e: &Error) -> log::Level {
    if e.kind == ErrorKind::Aborted {
        log::Level::Debug
    } else {
        log::Level::Warn
    }
}
