mod common;

use std::{
    sync::{
        atomic::{AtomicUsize, Ordering},
        Arc,
    },
    time::Duration,
};

use common::MemoryStore;

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn operations_never_interleave() {
    let store = Arc::new(MemoryStore::default());
    let guard = common::guard(Arc::clone(&store), Some(common::expired_token()));

    let inside = Arc::new(AtomicUsize::new(0));
    let overlaps = Arc::new(AtomicUsize::new(0));

    let mut tasks = Vec::new();
    for _ in 0..16 {
        let guard = Arc::clone(&guard);
        let inside = Arc::clone(&inside);
        let overlaps = Arc::clone(&overlaps);

        tasks.push(tokio::spawn(async move {
            guard
                .with_client(|_| async move {
                    if inside.fetch_add(1, Ordering::SeqCst) != 0 {
                        overlaps.fetch_add(1, Ordering::SeqCst);
                    }
                    tokio::time::sleep(Duration::from_millis(2)).await;
                    inside.fetch_sub(1, Ordering::SeqCst);
                    Ok(())
                })
                .await
        }));
    }

    for task in tasks {
        task.await.unwrap().unwrap();
    }

    assert_eq!(overlaps.load(Ordering::SeqCst), 0);

    // The expired token was refreshed and persisted exactly once.
    let saved = store.saved.lock().unwrap();
    assert_eq!(saved.len(), 1);
    assert_eq!(saved[0].access_token, "access-1");
}
