mod common;

use std::sync::{
    atomic::{AtomicUsize, Ordering},
    Arc,
};

use async_trait::async_trait;
use tokio_stream::StreamExt;
use tokio_util::sync::CancellationToken;

use spinfeed::{
    broadcast::{ChannelSink, FrameSink},
    error::{Error, Result},
    snapshot::Snapshot,
};

use common::{CountingUpstream, MemoryStore};

/// Accepts `budget` frames, then fails every write.
struct BrokenAfter {
    budget: usize,
    written: Arc<AtomicUsize>,
}

#[async_trait]
impl FrameSink for BrokenAfter {
    async fn send(&mut self, _: &str) -> Result<()> {
        if self.written.load(Ordering::SeqCst) >= self.budget {
            return Err(Error::aborted("connection reset by peer"));
        }
        self.written.fetch_add(1, Ordering::SeqCst);
        Ok(())
    }

    async fn flush(&mut self) -> Result<()> {
        Ok(())
    }
}

fn parse(frame: &str) -> Snapshot {
    let json = frame.strip_prefix("data: ").unwrap().trim_end();
    serde_json::from_str(json).unwrap()
}

#[tokio::test]
async fn broken_subscriber_does_not_affect_others() {
    let guard = common::guard(Arc::new(MemoryStore::default()), Some(common::valid_token()));
    let feed = common::feed(guard, Arc::new(CountingUpstream::default()));
    let shutdown = CancellationToken::new();

    let (healthy, mut body) = ChannelSink::channel();
    let healthy_task = tokio::spawn({
        let feed = Arc::clone(&feed);
        let subscription = feed.registry().subscribe(None);
        let shutdown = shutdown.clone();
        async move { feed.serve(healthy, subscription, shutdown).await }
    });

    let written = Arc::new(AtomicUsize::new(0));
    let broken = BrokenAfter {
        budget: 2,
        written: Arc::clone(&written),
    };
    let broken_task = tokio::spawn({
        let feed = Arc::clone(&feed);
        let subscription = feed.registry().subscribe(None);
        let shutdown = shutdown.clone();
        async move { feed.serve(broken, subscription, shutdown).await }
    });

    assert!(parse(&body.next().await.unwrap()).is_placeholder());

    for n in 1..=5 {
        feed.cycle().await.unwrap();
        let frame = parse(&body.next().await.unwrap());
        assert_eq!(frame.item.id, format!("t{n}"));
        assert!(frame.is_playing);
    }

    // The broken subscriber took the initial frame and one update, then left.
    broken_task.await.unwrap();
    assert_eq!(written.load(Ordering::SeqCst), 2);
    assert_eq!(feed.registry().size(), 1);

    shutdown.cancel();
    healthy_task.await.unwrap();
    assert!(feed.registry().is_empty());
}

#[tokio::test]
async fn subscribers_see_fallback_after_failed_poll() {
    let store = Arc::new(MemoryStore::default());
    let guard = common::guard(store, Some(common::valid_token()));
    let feed = common::feed(guard, Arc::new(CountingUpstream::default()));
    feed.cycle().await.unwrap();

    let (sink, mut body) = ChannelSink::channel();
    let subscription = feed.registry().subscribe(None);
    let shutdown = CancellationToken::new();
    let task = tokio::spawn({
        let feed = Arc::clone(&feed);
        let shutdown = shutdown.clone();
        async move { feed.serve(sink, subscription, shutdown).await }
    });

    let first = parse(&body.next().await.unwrap());
    assert!(first.is_playing);
    assert_eq!(first.item.id, "t1");

    // A halted guard fails every further poll before it reaches upstream.
    let halted = feed.guard().halted();
    feed.guard().halt("test");
    assert!(halted.is_cancelled());
    assert!(feed.cycle().await.is_err());

    let second = parse(&body.next().await.unwrap());
    assert!(!second.is_playing);
    assert_eq!(second.item.id, "t1");
    assert_eq!(second.item.name, "Track t1");

    shutdown.cancel();
    task.await.unwrap();
}
