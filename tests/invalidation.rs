//! Invalidator behavior: push notifications, ETag polling, reseeding.

mod common;

use common::{build_targz, build_zip, MemoryStore, StoreCall};
use std::sync::Arc;
use std::time::Duration;

use bytes::Bytes;
use meg::cache::MegCaches;
use meg::format::FormatRegistry;
use meg::invalidator::{BucketNotification, ChangeKind, Invalidator};
use meg::planner::Planner;
use meg::store::ObjectStore;
use tokio::sync::mpsc;
use tokio_util::sync::CancellationToken;

struct Rig {
    store: Arc<MemoryStore>,
    caches: Arc<MegCaches>,
    planner: Planner,
    invalidator: Invalidator,
}

fn rig() -> Rig {
    let store = Arc::new(MemoryStore::new());
    let caches = Arc::new(MegCaches::in_memory());
    let planner = Planner::new(
        Arc::clone(&store) as Arc<dyn ObjectStore>,
        Arc::clone(&caches),
        Arc::new(FormatRegistry::with_defaults()),
    );
    let invalidator = Invalidator::new(
        Arc::clone(&store) as Arc<dyn ObjectStore>,
        Arc::clone(&caches),
    );
    Rig {
        store,
        caches,
        planner,
        invalidator,
    }
}

#[tokio::test]
async fn modify_notification_forces_a_refetch() {
    let rig = rig();
    rig.store.put(
        "docs.zip",
        build_zip(&[("a/b.txt", b"hello\n")]),
        Some("application/zip"),
    );

    let first = rig.planner.fetch_entry("docs.zip", "a/b.txt", None).await.unwrap();
    assert_eq!(first.body.as_ref(), b"hello\n");

    rig.invalidator
        .apply(BucketNotification {
            change: ChangeKind::Modify,
            path: "docs.zip".to_string(),
            etag: None,
        })
        .await;

    // The index cache is cold again: the next request re-reads the store.
    rig.store.clear_calls();
    rig.store
        .replace("docs.zip", build_zip(&[("a/b.txt", b"rewritten\n")]));
    let second = rig.planner.fetch_entry("docs.zip", "a/b.txt", None).await.unwrap();

    assert_eq!(second.body.as_ref(), b"rewritten\n");
    let ranged_reads = rig
        .store
        .calls()
        .iter()
        .filter(|c| matches!(c, StoreCall::Get { range: Some(_), .. }))
        .count();
    assert!(ranged_reads >= 2, "expected fresh index and entry reads");
}

#[tokio::test]
async fn delete_notification_purges_and_forgets_the_etag() {
    let rig = rig();
    rig.store.put(
        "src.tar.gz",
        build_targz(&[("README", b"MEG")]),
        Some("application/gzip"),
    );

    rig.planner.fetch_entry("src.tar.gz", "README", None).await.unwrap();
    assert!(rig.caches.archives.get("src.tar.gz").await.is_some());
    assert!(rig.caches.etags.get("src.tar.gz").is_some());

    rig.invalidator
        .apply(BucketNotification {
            change: ChangeKind::Delete,
            path: "src.tar.gz".to_string(),
            etag: None,
        })
        .await;

    assert!(rig.caches.archives.get("src.tar.gz").await.is_none());
    assert!(rig.caches.etags.get("src.tar.gz").is_none());
}

#[tokio::test]
async fn create_notification_purges_nothing() {
    let rig = rig();
    rig.caches
        .archives
        .set("kept.zip", Bytes::from_static(b"cached"), None)
        .await;

    rig.invalidator
        .apply(BucketNotification {
            change: ChangeKind::Create,
            path: "kept.zip".to_string(),
            etag: None,
        })
        .await;

    assert!(rig.caches.archives.get("kept.zip").await.is_some());
}

#[tokio::test]
async fn poll_refreshes_a_cached_body_when_the_etag_changes() {
    let rig = rig();
    rig.store.put(
        "src.tar.gz",
        build_targz(&[("README", b"MEG")]),
        Some("application/gzip"),
    );

    // Prime: whole-archive fetch caches the body and records the ETag.
    rig.planner.fetch_entry("src.tar.gz", "README", None).await.unwrap();

    let updated = build_targz(&[("README", b"MEG v2")]);
    rig.store.replace("src.tar.gz", updated.clone());

    rig.invalidator.poll_cycle().await;

    // The body cache was refreshed in place with the new bytes.
    let cached = rig.caches.archives.get("src.tar.gz").await.unwrap();
    assert_eq!(cached.as_ref(), updated.as_slice());

    // Served content reflects the change without another download.
    rig.store.clear_calls();
    let entry = rig.planner.fetch_entry("src.tar.gz", "README", None).await.unwrap();
    assert_eq!(entry.body.as_ref(), b"MEG v2");
    assert_eq!(rig.store.full_get_count(), 0);
}

#[tokio::test]
async fn poll_is_a_noop_while_the_etag_holds() {
    let rig = rig();
    rig.store.put(
        "src.tar.gz",
        build_targz(&[("README", b"MEG")]),
        Some("application/gzip"),
    );
    rig.planner.fetch_entry("src.tar.gz", "README", None).await.unwrap();
    let before = rig.caches.archives.get("src.tar.gz").await.unwrap();

    rig.store.clear_calls();
    rig.invalidator.poll_cycle().await;

    let conditional = rig
        .store
        .calls()
        .iter()
        .any(|c| matches!(c, StoreCall::Get { conditional: true, .. }));
    assert!(conditional, "poll must revalidate with If-None-Match");
    let after = rig.caches.archives.get("src.tar.gz").await.unwrap();
    assert_eq!(before, after);
}

#[tokio::test]
async fn poll_reseeds_an_empty_etag_map_from_cached_archives() {
    let rig = rig();
    rig.store.put(
        "docs.zip",
        build_zip(&[("a/b.txt", b"hello\n")]),
        Some("application/zip"),
    );

    // A cached body without a recorded ETag (e.g. after a restart of the
    // invalidator against a warm remote cache).
    rig.caches
        .archives
        .set("docs.zip", Bytes::from_static(b"stale"), None)
        .await;
    assert!(rig.caches.etags.is_empty());

    rig.invalidator.poll_cycle().await;

    assert!(rig.caches.etags.get("docs.zip").is_some());
}

#[tokio::test]
async fn push_listener_stops_on_cancellation() {
    let rig = rig();
    let (tx, rx) = mpsc::channel(4);
    let cancel = CancellationToken::new();

    let task = rig.invalidator.spawn(Some(rx), cancel.clone());
    tx.send(BucketNotification {
        change: ChangeKind::Create,
        path: "whatever".to_string(),
        etag: None,
    })
    .await
    .unwrap();

    cancel.cancel();
    tokio::time::timeout(Duration::from_secs(1), task)
        .await
        .expect("listener should stop promptly")
        .unwrap();
}
