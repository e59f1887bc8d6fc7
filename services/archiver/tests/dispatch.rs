mod common;

use camlog_archiver::config::{DispatchConfig, FetchConfig, RetentionMode};
use camlog_archiver::{
    Archiver, CameraRecord, DigestLogFetcher, Dispatcher, LocalStore, LogFetcher,
    RetentionSweeper, RunSummary,
};
use common::{
    cameras, closed_port, spawn_camera, CountingFetcher, MemoryStore, PASSWORD, USERNAME,
};
use std::sync::Arc;
use std::time::Duration;
use tokio_util::sync::CancellationToken;

fn sweeper() -> RetentionSweeper {
    RetentionSweeper::new(chrono::Duration::days(30), RetentionMode::ExactKey)
}

fn dispatcher(
    fetcher: Arc<dyn LogFetcher>,
    store: Arc<MemoryStore>,
    max_workers: usize,
) -> Dispatcher {
    let archiver = Arc::new(Archiver::new(fetcher, store, sweeper(), "txt"));
    let config = DispatchConfig {
        max_workers,
        coalesce_duplicates: false,
    };
    Dispatcher::new(archiver, &config)
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn hundred_cameras_on_ten_workers() {
    let fetcher = Arc::new(CountingFetcher::new(Duration::from_millis(20)));
    let store = Arc::new(MemoryStore::default());

    let summary = dispatcher(fetcher.clone(), store.clone(), 10)
        .run(cameras(100), CancellationToken::new())
        .await;

    assert_eq!(summary.total, 100);
    assert_eq!(summary.succeeded, 100);
    assert_eq!(fetcher.calls(), 100);
    assert_eq!(store.puts(), 100);
    assert!(fetcher.max_in_flight() <= 10, "{} fetches overlapped", fetcher.max_in_flight());
    assert!(fetcher.max_in_flight() > 1);
}

#[tokio::test]
async fn cancelled_before_start_skips_every_task() {
    let fetcher = Arc::new(CountingFetcher::new(Duration::ZERO));
    let store = Arc::new(MemoryStore::default());
    let cancel = CancellationToken::new();
    cancel.cancel();

    let summary = dispatcher(fetcher.clone(), store.clone(), 4)
        .run(cameras(12), cancel)
        .await;

    assert_eq!(summary.total, 12);
    assert_eq!(summary.skipped, 12);
    assert_eq!(fetcher.calls(), 0);
    assert_eq!(store.puts(), 0);
}

#[tokio::test]
async fn cancellation_lets_started_task_finish() {
    let cancel = CancellationToken::new();
    let fetcher = Arc::new(CountingFetcher::new(Duration::from_millis(5)).cancelling(cancel.clone()));
    let store = Arc::new(MemoryStore::default());

    let summary = dispatcher(fetcher.clone(), store.clone(), 1)
        .run(cameras(5), cancel)
        .await;

    assert_eq!(
        summary,
        RunSummary {
            total: 5,
            succeeded: 1,
            skipped: 4,
            ..RunSummary::default()
        }
    );
    assert_eq!(fetcher.calls(), 1);
    assert_eq!(store.puts(), 1);
}

#[tokio::test]
async fn bad_status_never_writes() {
    let fetcher = Arc::new(
        CountingFetcher::new(Duration::ZERO)
            .failing("10.0.0.0", 401)
            .failing("10.0.0.1", 404)
            .failing("10.0.0.2", 500),
    );
    let store = Arc::new(MemoryStore::default());

    let summary = dispatcher(fetcher.clone(), store.clone(), 2)
        .run(cameras(4), CancellationToken::new())
        .await;

    assert_eq!(summary.fetch_failed, 3);
    assert_eq!(summary.succeeded, 1);
    assert_eq!(store.puts(), 1);
    assert_eq!(store.keys().len(), 1);
    assert!(store.keys()[0].contains("/10.0.0.3_80/"));
}

#[tokio::test]
async fn panicking_task_does_not_stop_siblings() {
    let fetcher = Arc::new(CountingFetcher::new(Duration::ZERO).panicking("10.0.0.1"));
    let store = Arc::new(MemoryStore::default());

    let summary = dispatcher(fetcher.clone(), store.clone(), 3)
        .run(cameras(6), CancellationToken::new())
        .await;

    assert_eq!(summary.total, 6);
    assert_eq!(summary.panicked, 1);
    assert_eq!(summary.succeeded, 5);
    assert_eq!(store.puts(), 5);
}

#[tokio::test]
async fn duplicate_rows_are_processed_unless_coalesced() {
    let duplicated = vec![
        CameraRecord::new("10.0.0.9", 80, "root", "pass"),
        CameraRecord::new("10.0.0.9", 80, "root", "pass"),
    ];

    let fetcher = Arc::new(CountingFetcher::new(Duration::ZERO));
    let store = Arc::new(MemoryStore::default());
    let summary = dispatcher(fetcher.clone(), store.clone(), 2)
        .run(duplicated.clone(), CancellationToken::new())
        .await;
    assert_eq!(summary.total, 2);
    assert_eq!(fetcher.calls(), 2);

    let fetcher = Arc::new(CountingFetcher::new(Duration::ZERO));
    let archiver = Arc::new(Archiver::new(
        fetcher.clone(),
        Arc::new(MemoryStore::default()),
        sweeper(),
        "txt",
    ));
    let config = DispatchConfig {
        max_workers: 2,
        coalesce_duplicates: true,
    };
    let summary = Dispatcher::new(archiver, &config)
        .run(duplicated, CancellationToken::new())
        .await;
    assert_eq!(summary.total, 1);
    assert_eq!(fetcher.calls(), 1);
}

#[tokio::test]
async fn three_cameras_two_succeed_one_refused() {
    let first = spawn_camera().await;
    let second = spawn_camera().await;
    let refused = closed_port().await;
    let cameras = vec![
        CameraRecord::new("127.0.0.1", first.port(), USERNAME, PASSWORD),
        CameraRecord::new("127.0.0.1", second.port(), USERNAME, PASSWORD),
        CameraRecord::new("127.0.0.1", refused, USERNAME, PASSWORD),
    ];

    let dir = tempfile::tempdir().unwrap();
    let store = Arc::new(LocalStore::new(dir.path()));
    let fetcher = Arc::new(DigestLogFetcher::new(&FetchConfig::default()).unwrap());
    let archiver = Arc::new(Archiver::new(fetcher, store.clone(), sweeper(), "txt"));
    let dispatcher = Dispatcher::new(archiver, &DispatchConfig::default());

    let summary = dispatcher.run(cameras, CancellationToken::new()).await;

    assert_eq!(summary.total, 3);
    assert_eq!(summary.succeeded, 2);
    assert_eq!(summary.fetch_failed, 1);

    use camlog_archiver::BlobStore;
    let written = store.list("").await.unwrap();
    assert_eq!(written.len(), 2);
    for port in [first.port(), second.port()] {
        let partition = format!("/127.0.0.1_{}/", port);
        assert!(
            written.iter().any(|key| key.contains(&partition)),
            "no archive for port {port}: {written:?}"
        );
    }
}
