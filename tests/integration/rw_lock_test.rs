//! Copyright (c) 2025, Kirky.X
//!
//! MIT License
//!
//! 多读单写锁集成测试

use rand::Rng;
use starcache::lock::{LockStats, ReadWriteLock};
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;
use tokio::sync::Notify;

#[path = "../common/mod.rs"]
mod common;

type Log = Arc<Mutex<Vec<&'static str>>>;

fn record(log: &Log, entry: &'static str) {
    log.lock().unwrap().push(entry);
}

/// 测试写者执行期间提交的读者在写者结束后才运行
#[tokio::test]
async fn test_readers_wait_for_running_writer() {
    common::setup_logging();

    let lock = Arc::new(ReadWriteLock::new("scenario"));
    let log: Log = Arc::new(Mutex::new(Vec::new()));

    let writer = {
        let (lock, log) = (lock.clone(), log.clone());
        tokio::spawn(async move {
            lock.write(|| async {
                record(&log, "writer-start");
                tokio::time::sleep(Duration::from_millis(20)).await;
                record(&log, "writer-end");
            })
            .await
        })
    };
    common::wait_until("writer to start", || lock.stats().writer_active).await;

    let mut readers = Vec::new();
    for (queued, name) in [(1, "reader1"), (2, "reader2")] {
        let (task_lock, task_log) = (lock.clone(), log.clone());
        readers.push(tokio::spawn(async move {
            task_lock
                .read(|| async { record(&task_log, name) })
                .await
        }));
        common::wait_until("reader to queue", || lock.stats().read_queue_depth == queued).await;
    }

    writer.await.unwrap();
    for reader in readers {
        reader.await.unwrap();
    }

    assert_eq!(
        *log.lock().unwrap(),
        vec!["writer-start", "writer-end", "reader1", "reader2"]
    );
    assert_eq!(lock.stats(), LockStats::default());
}

/// 测试写者排队后新到达的读者必须等待写者完成
///
/// 写者请求时已在运行的读者先完成
#[tokio::test]
async fn test_new_readers_wait_behind_queued_writer() {
    let lock = Arc::new(ReadWriteLock::new("fairness"));
    let log: Log = Arc::new(Mutex::new(Vec::new()));
    let release = Arc::new(Notify::new());

    let first_reader = {
        let (lock, log, release) = (lock.clone(), log.clone(), release.clone());
        tokio::spawn(async move {
            lock.read(|| async {
                record(&log, "reader-a-start");
                release.notified().await;
                record(&log, "reader-a-end");
            })
            .await
        })
    };
    common::wait_until("first reader to run", || lock.stats().reader_count == 1).await;

    let writer = {
        let (lock, log) = (lock.clone(), log.clone());
        tokio::spawn(async move { lock.write(|| async { record(&log, "writer") }).await })
    };
    common::wait_until("writer to queue", || lock.stats().write_queue_depth == 1).await;

    let late_reader = {
        let (lock, log) = (lock.clone(), log.clone());
        tokio::spawn(async move { lock.read(|| async { record(&log, "reader-b") }).await })
    };
    common::wait_until("late reader to queue", || lock.stats().read_queue_depth == 1).await;

    let stats = lock.stats();
    assert_eq!(stats.reader_count, 1);
    assert!(!stats.writer_active);

    release.notify_one();
    first_reader.await.unwrap();
    writer.await.unwrap();
    late_reader.await.unwrap();

    assert_eq!(
        *log.lock().unwrap(),
        vec!["reader-a-start", "reader-a-end", "writer", "reader-b"]
    );
}

/// 测试多个读者可以同时执行
#[tokio::test]
async fn test_readers_overlap() {
    let lock = ReadWriteLock::new("shared");
    let lock_ref = &lock;

    let (first, second) = tokio::join!(
        lock.read(move || async move {
            tokio::time::sleep(Duration::from_millis(10)).await;
            lock_ref.stats().reader_count
        }),
        lock.read(move || async move {
            tokio::time::sleep(Duration::from_millis(10)).await;
            lock_ref.stats().reader_count
        }),
    );

    assert_eq!(first.max(second), 2);
    assert_eq!(lock.stats().reader_count, 0);
}

/// 测试随机交错下写操作不与任何读写重叠
#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn test_writes_never_overlap() {
    let lock = Arc::new(ReadWriteLock::new("random"));
    let readers = Arc::new(AtomicUsize::new(0));
    let writers = Arc::new(AtomicUsize::new(0));
    let max_readers = Arc::new(AtomicUsize::new(0));

    let plan: Vec<(bool, u64)> = {
        let mut rng = rand::thread_rng();
        (0..48)
            .map(|_| (rng.gen_bool(0.3), rng.gen_range(0..3)))
            .collect()
    };

    let handles: Vec<_> = plan
        .into_iter()
        .map(|(is_write, delay)| {
            let lock = lock.clone();
            let readers = readers.clone();
            let writers = writers.clone();
            let max_readers = max_readers.clone();
            tokio::spawn(async move {
                if is_write {
                    lock.write(|| async move {
                        assert_eq!(writers.fetch_add(1, Ordering::SeqCst), 0);
                        assert_eq!(readers.load(Ordering::SeqCst), 0);
                        tokio::time::sleep(Duration::from_millis(delay)).await;
                        writers.fetch_sub(1, Ordering::SeqCst);
                    })
                    .await
                } else {
                    lock.read(|| async move {
                        let now = readers.fetch_add(1, Ordering::SeqCst) + 1;
                        max_readers.fetch_max(now, Ordering::SeqCst);
                        assert_eq!(writers.load(Ordering::SeqCst), 0);
                        tokio::time::sleep(Duration::from_millis(delay)).await;
                        readers.fetch_sub(1, Ordering::SeqCst);
                    })
                    .await
                }
            })
        })
        .collect();

    for handle in handles {
        handle.await.unwrap();
    }
    assert_eq!(lock.stats(), LockStats::default());
    assert!(max_readers.load(Ordering::SeqCst) >= 1);
}
