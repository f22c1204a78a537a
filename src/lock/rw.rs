//! Copyright (c) 2025, Kirky.X
//!
//! MIT License
//!
//! 该模块定义了多读单写锁。

use serde::Serialize;
use std::future::Future;
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use tokio::sync::RwLock;
use tracing::trace;

/// 锁状态统计
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct LockStats {
    /// 当前正在执行的读者数
    pub reader_count: usize,
    /// 是否有写者正在执行
    pub writer_active: bool,
    /// 排队中的读者数
    pub read_queue_depth: usize,
    /// 排队中的写者数
    pub write_queue_depth: usize,
}

/// 计数守卫：构造时加一，析构时减一
struct Counted<'a>(&'a AtomicUsize);

impl<'a> Counted<'a> {
    fn new(counter: &'a AtomicUsize) -> Self {
        counter.fetch_add(1, Ordering::SeqCst);
        Self(counter)
    }
}

impl Drop for Counted<'_> {
    fn drop(&mut self) {
        self.0.fetch_sub(1, Ordering::SeqCst);
    }
}

struct WriterFlag<'a>(&'a AtomicBool);

impl Drop for WriterFlag<'_> {
    fn drop(&mut self) {
        self.0.store(false, Ordering::SeqCst);
    }
}

/// 多读单写锁
///
/// 读操作之间可以并发，写操作独占。等待队列是 FIFO 的：
/// 写者一旦排队，之后到达的读者必须等它完成；写者请求时已经在运行的读者先执行完毕。
#[derive(Debug)]
pub struct ReadWriteLock {
    name: &'static str,
    inner: RwLock<()>,
    readers: AtomicUsize,
    writer_active: AtomicBool,
    read_waiting: AtomicUsize,
    write_waiting: AtomicUsize,
}

impl ReadWriteLock {
    /// 创建新的读写锁
    pub fn new(name: &'static str) -> Self {
        Self {
            name,
            inner: RwLock::new(()),
            readers: AtomicUsize::new(0),
            writer_active: AtomicBool::new(false),
            read_waiting: AtomicUsize::new(0),
            write_waiting: AtomicUsize::new(0),
        }
    }

    /// 以共享模式执行 `work`
    pub async fn read<F, Fut, T>(&self, work: F) -> T
    where
        F: FnOnce() -> Fut,
        Fut: Future<Output = T>,
    {
        let _guard = {
            let _queued = Counted::new(&self.read_waiting);
            self.inner.read().await
        };
        let _running = Counted::new(&self.readers);
        trace!(lock = self.name, "read lock acquired");
        work().await
    }

    /// 以独占模式执行 `work`
    pub async fn write<F, Fut, T>(&self, work: F) -> T
    where
        F: FnOnce() -> Fut,
        Fut: Future<Output = T>,
    {
        let _guard = {
            let _queued = Counted::new(&self.write_waiting);
            self.inner.write().await
        };
        self.writer_active.store(true, Ordering::SeqCst);
        let _active = WriterFlag(&self.writer_active);
        trace!(lock = self.name, "write lock acquired");
        work().await
    }

    /// 当前锁状态
    pub fn stats(&self) -> LockStats {
        LockStats {
            reader_count: self.readers.load(Ordering::SeqCst),
            writer_active: self.writer_active.load(Ordering::SeqCst),
            read_queue_depth: self.read_waiting.load(Ordering::SeqCst),
            write_queue_depth: self.write_waiting.load(Ordering::SeqCst),
        }
    }

    /// 锁名称
    pub fn name(&self) -> &'static str {
        self.name
    }
}
