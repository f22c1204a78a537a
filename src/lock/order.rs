//! Copyright (c) 2025, Kirky.X
//!
//! MIT License
//!
//! 该模块定义了有序锁上下文。
//!
//! 资源类别有固定的全局顺序：
//! `Unlocked < Accounts < World < Messages < Battles < Storage`。
//! [`LockContext<L>`] 的类型参数记录调用链上已持有的最高级别，
//! 只有 `L: LockBefore<Next>` 时才能获取 `Next` 级别的锁，因此逆序获取无法通过编译：
//!
//! ```compile_fail
//! use starcache::lock::{Accounts, LockContext, ResourceLock, World};
//!
//! async fn inverted(accounts: &ResourceLock<Accounts>, world: &ResourceLock<World>) {
//!     let mut ctx = LockContext::new();
//!     ctx.write(world, |mut world_ctx| async move {
//!         world_ctx.write(accounts, |_| async {}).await;
//!     })
//!     .await;
//! }
//! ```
//!
//! 获取锁需要 `&mut self`，嵌套获取期间外层上下文被可变借用，
//! 闭包内无法再用它获取更早的锁：
//!
//! ```compile_fail
//! use starcache::lock::{Accounts, LockContext, ResourceLock, World};
//!
//! async fn reuse_outer(accounts: &ResourceLock<Accounts>, world: &ResourceLock<World>) {
//!     let mut ctx = LockContext::new();
//!     ctx.write(world, |_world_ctx| async {
//!         ctx.write(accounts, |_| async {}).await;
//!     })
//!     .await;
//! }
//! ```
//!
//! 类型检查只覆盖同一条上下文链。在持锁期间另建 `LockContext::new()`
//! 再获取更早级别的锁，会在调试构建中触发任务内的顺序断言。
//!
//! 传给 `work` 的上下文在锁释放时失效。即使 `work` 把它返回出去，
//! 它也不再证明持有任何锁：[`LockContext::holds`] 返回 `false`，
//! 缓存操作会以 [`crate::error::CacheError::LockNotHeld`] 拒绝它。

use super::exclusive::ExclusiveLock;
use super::rw::{LockStats, ReadWriteLock};
use std::fmt;
use std::future::Future;
use std::marker::PhantomData;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

tokio::task_local! {
    /// 当前任务持有的最高锁级别，未进入任何锁区时不存在
    static HELD_RANK: u8;
}

/// 当前任务持有的最高锁级别，0 表示未持有
fn held_rank() -> u8 {
    HELD_RANK.try_with(|rank| *rank).unwrap_or(0)
}

/// 锁区结束时使对应上下文失效
struct ReleaseOnDrop(Arc<AtomicBool>);

impl Drop for ReleaseOnDrop {
    fn drop(&mut self) {
        self.0.store(false, Ordering::Release);
    }
}

mod sealed {
    pub trait Sealed {}
}

/// 锁级别
pub trait LockLevel: sealed::Sealed + Send + Sync + 'static {
    /// 在全局顺序中的位置
    const RANK: u8;
    /// 级别名称
    const NAME: &'static str;

    /// 该级别在持有位图中的位
    fn bit() -> u8 {
        if Self::RANK == 0 {
            0
        } else {
            1 << (Self::RANK - 1)
        }
    }
}

/// `Self` 在全局顺序中严格位于 `Next` 之前
pub trait LockBefore<Next: LockLevel>: LockLevel {}

macro_rules! lock_levels {
    ($($(#[$meta:meta])* $name:ident = $rank:expr),+ $(,)?) => {
        $(
            $(#[$meta])*
            #[derive(Debug)]
            pub enum $name {}

            impl sealed::Sealed for $name {}

            impl LockLevel for $name {
                const RANK: u8 = $rank;
                const NAME: &'static str = stringify!($name);
            }
        )+
    };
}

macro_rules! lock_order {
    () => {};
    ($first:ident $(, $rest:ident)*) => {
        $( impl LockBefore<$rest> for $first {} )*
        lock_order!($($rest),*);
    };
}

lock_levels! {
    /// 未持有任何锁
    Unlocked = 0,
    /// 账户缓存
    Accounts = 1,
    /// 世界对象缓存
    World = 2,
    /// 消息缓存
    Messages = 3,
    /// 战斗缓存
    Battles = 4,
    /// 持久化存储
    Storage = 5,
}

lock_order!(Unlocked, Accounts, World, Messages, Battles, Storage);

const LEVEL_NAMES: [&str; 5] = ["Accounts", "World", "Messages", "Battles", "Storage"];

/// 获取模式
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LockMode {
    /// 共享读
    Read,
    /// 独占写
    Write,
}

#[derive(Debug)]
enum LockKind {
    Exclusive(ExclusiveLock),
    Shared(ReadWriteLock),
}

/// 归属于某个锁级别的资源锁
///
/// 只能通过 [`LockContext`] 获取。
pub struct ResourceLock<N: LockLevel> {
    kind: LockKind,
    _level: PhantomData<fn() -> N>,
}

impl<N: LockLevel> fmt::Debug for ResourceLock<N> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ResourceLock")
            .field("level", &N::NAME)
            .field("kind", &self.kind)
            .finish()
    }
}

impl<N: LockLevel> ResourceLock<N> {
    /// 排他锁：读请求也按独占方式执行
    pub fn exclusive() -> Self {
        Self {
            kind: LockKind::Exclusive(ExclusiveLock::new(N::NAME)),
            _level: PhantomData,
        }
    }

    /// 多读单写锁
    pub fn read_write() -> Self {
        Self {
            kind: LockKind::Shared(ReadWriteLock::new(N::NAME)),
            _level: PhantomData,
        }
    }

    /// 当前锁状态
    pub fn stats(&self) -> LockStats {
        match &self.kind {
            LockKind::Exclusive(lock) => LockStats {
                reader_count: 0,
                writer_active: lock.is_locked(),
                read_queue_depth: 0,
                write_queue_depth: lock.queue_length(),
            },
            LockKind::Shared(lock) => lock.stats(),
        }
    }

    async fn run<F, Fut, T>(&self, mode: LockMode, work: F) -> T
    where
        F: FnOnce() -> Fut,
        Fut: Future<Output = T>,
    {
        match (&self.kind, mode) {
            (LockKind::Exclusive(lock), _) => lock.acquire(work).await,
            (LockKind::Shared(lock), LockMode::Read) => lock.read(work).await,
            (LockKind::Shared(lock), LockMode::Write) => lock.write(work).await,
        }
    }
}

/// 有序锁上下文
///
/// 在请求开始时以空状态创建，并显式传递给每个需要加锁的函数。
/// 不可克隆；持有它即证明调用链已获取到 `L` 为止的锁。
pub struct LockContext<L: LockLevel = Unlocked> {
    held: u8,
    exclusive: u8,
    /// 获取该上下文的锁区是否仍在进行，根上下文为 `None`
    live: Option<Arc<AtomicBool>>,
    _level: PhantomData<fn() -> L>,
}

impl LockContext<Unlocked> {
    /// 创建不持有任何锁的上下文
    pub fn new() -> Self {
        Self {
            held: 0,
            exclusive: 0,
            live: None,
            _level: PhantomData,
        }
    }
}

impl Default for LockContext<Unlocked> {
    fn default() -> Self {
        Self::new()
    }
}

impl<L: LockLevel> fmt::Debug for LockContext<L> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("LockContext")
            .field("level", &L::NAME)
            .field("held", &self.held_levels())
            .finish()
    }
}

impl<L: LockLevel> LockContext<L> {
    /// 获取 `lock` 并在持锁状态下执行 `work`
    ///
    /// `work` 接收更新后的上下文。任何退出路径上都会释放锁，
    /// 释放前该上下文即失效。
    /// 执行期间 `self` 被可变借用，`work` 只能通过新上下文继续获取更晚的锁。
    ///
    /// # Panics
    ///
    /// 调试构建中，若当前任务已持有不早于 `N` 的锁（例如持锁期间另建根上下文
    /// 逆序获取），会在等待之前 panic。
    pub async fn use_lock_with_acquire<N, F, Fut, T>(
        &mut self,
        lock: &ResourceLock<N>,
        mode: LockMode,
        work: F,
    ) -> T
    where
        N: LockLevel,
        L: LockBefore<N>,
        F: FnOnce(LockContext<N>) -> Fut,
        Fut: Future<Output = T>,
    {
        let previous = held_rank();
        #[cfg(debug_assertions)]
        {
            assert!(
                N::RANK > previous,
                "Lock ordering violation: acquiring {} (rank {}) while this task holds rank {}",
                N::NAME,
                N::RANK,
                previous
            );
        }

        let exclusive_now = !matches!((&lock.kind, mode), (LockKind::Shared(_), LockMode::Read));
        let live = Arc::new(AtomicBool::new(true));
        let next = LockContext {
            held: self.held | N::bit(),
            exclusive: if exclusive_now {
                self.exclusive | N::bit()
            } else {
                self.exclusive
            },
            live: Some(live.clone()),
            _level: PhantomData,
        };
        let release = ReleaseOnDrop(live);
        let guarded = move || {
            let running = work(next);
            async move {
                let _release = release;
                running.await
            }
        };
        HELD_RANK
            .scope(previous.max(N::RANK), lock.run(mode, guarded))
            .await
    }

    /// 以共享模式获取
    pub async fn read<N, F, Fut, T>(&mut self, lock: &ResourceLock<N>, work: F) -> T
    where
        N: LockLevel,
        L: LockBefore<N>,
        F: FnOnce(LockContext<N>) -> Fut,
        Fut: Future<Output = T>,
    {
        self.use_lock_with_acquire(lock, LockMode::Read, work).await
    }

    /// 以独占模式获取
    pub async fn write<N, F, Fut, T>(&mut self, lock: &ResourceLock<N>, work: F) -> T
    where
        N: LockLevel,
        L: LockBefore<N>,
        F: FnOnce(LockContext<N>) -> Fut,
        Fut: Future<Output = T>,
    {
        self.use_lock_with_acquire(lock, LockMode::Write, work).await
    }

    /// 获取该上下文的锁区是否仍在进行
    pub fn is_live(&self) -> bool {
        self.live
            .as_ref()
            .map_or(true, |live| live.load(Ordering::Acquire))
    }

    /// 是否持有 `R` 级别的锁
    pub fn holds<R: LockLevel>(&self) -> bool {
        R::RANK > 0 && self.is_live() && self.held & R::bit() != 0
    }

    /// 是否以独占模式持有 `R` 级别的锁
    pub fn holds_exclusive<R: LockLevel>(&self) -> bool {
        R::RANK > 0 && self.is_live() && self.exclusive & R::bit() != 0
    }

    /// 已持有的级别名称，按全局顺序排列
    pub fn held_levels(&self) -> Vec<&'static str> {
        if !self.is_live() {
            return Vec::new();
        }
        LEVEL_NAMES
            .iter()
            .enumerate()
            .filter(|(i, _)| self.held & (1 << i) != 0)
            .map(|(_, name)| *name)
            .collect()
    }
}
