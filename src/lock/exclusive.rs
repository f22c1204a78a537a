//! Copyright (c) 2025, Kirky.X
//!
//! MIT License
//!
//! 该模块定义了排他锁：带 FIFO 等待队列，一次只运行一个工作单元。

use std::future::Future;
use std::sync::atomic::{AtomicUsize, Ordering};
use tokio::sync::Mutex;
use tracing::trace;

/// 排他锁
///
/// 底层使用 tokio 的公平互斥锁，等待者严格按请求顺序获得锁。
#[derive(Debug)]
pub struct ExclusiveLock {
    /// 锁名称（用于日志）
    name: &'static str,
    inner: Mutex<()>,
    /// 正在排队的等待者数量
    waiting: AtomicUsize,
}

/// 排队计数守卫，获取成功或等待被取消时都会减一
struct QueueSlot<'a>(&'a AtomicUsize);

impl<'a> QueueSlot<'a> {
    fn enter(counter: &'a AtomicUsize) -> Self {
        counter.fetch_add(1, Ordering::SeqCst);
        Self(counter)
    }
}

impl Drop for QueueSlot<'_> {
    fn drop(&mut self) {
        self.0.fetch_sub(1, Ordering::SeqCst);
    }
}

impl ExclusiveLock {
    /// 创建新的排他锁
    pub fn new(name: &'static str) -> Self {
        Self {
            name,
            inner: Mutex::new(()),
            waiting: AtomicUsize::new(0),
        }
    }

    /// 在锁内执行 `work`
    ///
    /// 锁空闲时立即执行，否则排队等待。`work` 的返回值（包括错误）原样返回，
    /// 任何退出路径上都会先释放锁，再轮到下一个等待者。
    pub async fn acquire<F, Fut, T>(&self, work: F) -> T
    where
        F: FnOnce() -> Fut,
        Fut: Future<Output = T>,
    {
        let _guard = {
            let _slot = QueueSlot::enter(&self.waiting);
            self.inner.lock().await
        };
        trace!(lock = self.name, "exclusive lock acquired");
        work().await
    }

    /// 锁当前是否被持有
    pub fn is_locked(&self) -> bool {
        self.inner.try_lock().is_err()
    }

    /// 排队等待的工作数量
    pub fn queue_length(&self) -> usize {
        self.waiting.load(Ordering::SeqCst)
    }

    /// 锁名称
    pub fn name(&self) -> &'static str {
        self.name
    }
}
