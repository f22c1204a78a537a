//! Copyright (c) 2025, Kirky.X
//!
//! MIT License
//!
//! 该模块定义了通用写回缓存：内存中的 ID→条目 映射、脏标记、后台刷新和排空式关闭。

use super::entry::{CacheEntry, EntryState};
use super::flusher::FlushTask;
use super::stats::{CacheStats, FlushReport};
use crate::config::CacheConfig;
use crate::error::{CacheError, Result};
use crate::lock::{LockBefore, LockContext, LockLevel, ResourceLock, Storage};
use crate::metrics::GLOBAL_METRICS;
use crate::storage::{Entity, EntityStore, IdOf, LoadOutcome};
use dashmap::mapref::entry::Entry;
use dashmap::DashMap;
use std::future::Future;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Instant;
use tokio::sync::Mutex;
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, instrument, warn};

/// 缓存生命周期
#[derive(Debug)]
enum Lifecycle {
    /// 正常运行，可能带有后台刷新任务
    Running(Option<FlushTask>),
    /// 已停止接收写入，最终刷新尚未成功
    Draining,
    /// 已完全关闭
    Stopped,
}

/// 条目被驱逐后调用的回调
pub type EvictionListener<T> = Box<dyn Fn(&T) + Send + Sync>;

/// 与后台刷新任务共享的缓存状态
struct CacheCore<T: Entity, N: LockLevel> {
    name: &'static str,
    store: Arc<dyn EntityStore<Entity = T>>,
    entries: DashMap<IdOf<T>, CacheEntry<T>>,
    /// 实体类别锁
    lock: ResourceLock<N>,
    /// 存储锁，所有写入存储的操作都在其中串行执行
    storage: ResourceLock<Storage>,
    hits: AtomicU64,
    misses: AtomicU64,
    closed: AtomicBool,
    config: CacheConfig,
    on_evict: Option<EvictionListener<T>>,
}

impl<T: Entity, N: LockBefore<Storage>> CacheCore<T, N> {
    fn dirty_count(&self) -> usize {
        self.entries.iter().filter(|e| e.is_dirty()).count()
    }

    fn stats(&self) -> CacheStats {
        CacheStats {
            cache: self.name,
            cache_size: self.entries.len(),
            hits: self.hits.load(Ordering::Relaxed),
            misses: self.misses.load(Ordering::Relaxed),
            dirty_count: self.dirty_count(),
            lock: self.lock.stats(),
            storage_queue_depth: self.storage.stats().write_queue_depth,
        }
    }

    async fn flush_with<L: LockBefore<Storage>>(&self, ctx: &mut LockContext<L>) -> FlushReport {
        ctx.write(&self.storage, |_storage| async move {
            self.flush_dirty_locked().await
        })
        .await
    }

    /// 在持有存储锁时写回所有脏条目
    async fn flush_dirty_locked(&self) -> FlushReport {
        let started = Instant::now();
        let dirty: Vec<IdOf<T>> = self
            .entries
            .iter()
            .filter(|e| e.state() == EntryState::Dirty)
            .map(|e| *e.key())
            .collect();

        let mut report = FlushReport::default();
        for id in dirty {
            let snapshot = match self.entries.get_mut(&id) {
                Some(mut entry) => entry.begin_flush(),
                None => None,
            };
            let Some((value, version)) = snapshot else {
                continue;
            };

            let saved = self.store.save(&value).await;
            if let Some(mut entry) = self.entries.get_mut(&id) {
                entry.finish_flush(version, saved.is_ok());
            }
            match saved {
                Ok(()) => report.persisted += 1,
                Err(e) => {
                    warn!("{} 条目 {} 持久化失败: {}", self.name, id, e);
                    report.failures.push((id.to_string(), e));
                }
            }
        }

        GLOBAL_METRICS.record_flush(
            self.name,
            started.elapsed().as_secs_f64(),
            report.persisted,
            report.failures.len(),
        );
        GLOBAL_METRICS.set_dirty_entries(self.name, self.dirty_count());
        if report.persisted > 0 || !report.is_clean() {
            debug!(
                "{} 刷新完成: persisted={}, failed={}",
                self.name,
                report.persisted,
                report.failures.len()
            );
        }
        report
    }

    async fn remove_locked(&self, id: IdOf<T>) -> Result<bool> {
        let cached = self.entries.remove(&id).is_some();
        self.store.delete_by_id(id).await?;
        GLOBAL_METRICS.record_request(self.name, "remove", "ok");
        Ok(cached)
    }

    async fn evict_locked(&self, id: IdOf<T>) -> Result<bool> {
        let snapshot = match self.entries.get_mut(&id) {
            Some(mut entry) => entry.begin_flush(),
            None => return Ok(false),
        };
        if let Some((value, version)) = snapshot {
            let saved = self.store.save(&value).await;
            if let Some(mut entry) = self.entries.get_mut(&id) {
                entry.finish_flush(version, saved.is_ok());
            }
            saved?;
        }
        if let Some((_, entry)) = self.entries.remove(&id) {
            if let Some(listener) = &self.on_evict {
                listener(entry.value());
            }
        }
        debug!("{} 驱逐条目 {}", self.name, id);
        Ok(true)
    }

    /// 后台周期刷新：失败只记录日志，条目保持为脏等待下次重试
    async fn periodic_flush(&self) {
        let mut ctx = LockContext::new();
        let report = self.flush_with(&mut ctx).await;
        if !report.is_clean() {
            warn!(
                "{} 周期刷新有 {} 个条目失败，将在下次重试",
                self.name,
                report.failures.len()
            );
        }
        if self.config.log_stats {
            let stats = self.stats();
            info!(
                cache = self.name,
                size = stats.cache_size,
                hits = stats.hits,
                misses = stats.misses,
                dirty = stats.dirty_count,
                "缓存统计"
            );
        }
    }

    fn ensure_open(&self) -> Result<()> {
        if self.closed.load(Ordering::SeqCst) {
            return Err(CacheError::ShutDown(self.name.to_string()));
        }
        Ok(())
    }
}

/// 通用写回缓存
///
/// `N` 是该缓存所属的锁级别。所有访问条目的操作都要求调用方出示
/// `LockContext<N>`，即已通过有序锁上下文持有该类别的锁；
/// 修改类操作还要求以写模式持有。
pub struct WriteBackCache<T: Entity, N: LockLevel> {
    core: Arc<CacheCore<T, N>>,
    lifecycle: Mutex<Lifecycle>,
    auto_persisting: AtomicBool,
    cancel: CancellationToken,
}

impl<T: Entity, N: LockBefore<Storage>> WriteBackCache<T, N> {
    /// 创建写回缓存
    ///
    /// 启用自动持久化时会立即启动后台刷新任务，必须在 tokio 运行时中调用。
    /// 超出允许范围的刷新间隔会被限制到边界值。
    ///
    /// # 参数
    ///
    /// * `name` - 缓存名称
    /// * `store` - 持久化存储
    /// * `config` - 缓存配置
    pub fn new(
        name: &'static str,
        store: Arc<dyn EntityStore<Entity = T>>,
        config: CacheConfig,
    ) -> Self {
        Self::build(name, store, config, None)
    }

    /// 创建带驱逐回调的写回缓存
    ///
    /// 每个被 [`WriteBackCache::evict`] 移出的条目都会以其最后的值调用 `listener`。
    pub fn with_eviction_listener(
        name: &'static str,
        store: Arc<dyn EntityStore<Entity = T>>,
        config: CacheConfig,
        listener: impl Fn(&T) + Send + Sync + 'static,
    ) -> Self {
        Self::build(name, store, config, Some(Box::new(listener)))
    }

    fn build(
        name: &'static str,
        store: Arc<dyn EntityStore<Entity = T>>,
        config: CacheConfig,
        on_evict: Option<EvictionListener<T>>,
    ) -> Self {
        let config = config.clamped(name);
        let core = Arc::new(CacheCore {
            name,
            store,
            entries: DashMap::new(),
            lock: ResourceLock::read_write(),
            storage: ResourceLock::exclusive(),
            hits: AtomicU64::new(0),
            misses: AtomicU64::new(0),
            closed: AtomicBool::new(false),
            config: config.clone(),
            on_evict,
        });
        let cancel = CancellationToken::new();

        let task = if config.enable_auto_persistence {
            let tick_core = core.clone();
            Some(FlushTask::spawn(
                name,
                config.persistence_interval(),
                cancel.child_token(),
                move || {
                    let core = tick_core.clone();
                    async move { core.periodic_flush().await }
                },
            ))
        } else {
            debug!("{} 自动持久化已关闭", name);
            None
        };

        Self {
            core,
            auto_persisting: AtomicBool::new(task.is_some()),
            lifecycle: Mutex::new(Lifecycle::Running(task)),
            cancel,
        }
    }

    pub fn name(&self) -> &'static str {
        self.core.name
    }

    pub fn config(&self) -> &CacheConfig {
        &self.core.config
    }

    /// 该缓存的类别锁
    pub fn lock(&self) -> &ResourceLock<N> {
        &self.core.lock
    }

    /// 以共享模式获取类别锁并执行 `work`
    pub async fn read<L, F, Fut, R>(&self, ctx: &mut LockContext<L>, work: F) -> R
    where
        L: LockBefore<N>,
        F: FnOnce(LockContext<N>) -> Fut,
        Fut: Future<Output = R>,
    {
        ctx.read(&self.core.lock, work).await
    }

    /// 以独占模式获取类别锁并执行 `work`
    pub async fn write<L, F, Fut, R>(&self, ctx: &mut LockContext<L>, work: F) -> R
    where
        L: LockBefore<N>,
        F: FnOnce(LockContext<N>) -> Fut,
        Fut: Future<Output = R>,
    {
        ctx.write(&self.core.lock, work).await
    }

    /// 拒绝锁区已结束的上下文
    fn ensure_held(&self, ctx: &LockContext<N>) -> Result<()> {
        if !ctx.is_live() {
            warn!("{} 缓存收到已失效的 {} 锁上下文", self.core.name, N::NAME);
            return Err(CacheError::LockNotHeld(format!(
                "{} ({} cache)",
                N::NAME,
                self.core.name
            )));
        }
        Ok(())
    }

    fn ensure_writer(&self, ctx: &LockContext<N>) -> Result<()> {
        self.ensure_held(ctx)?;
        debug_assert!(
            ctx.holds_exclusive::<N>(),
            "{} cache mutated without holding its write lock",
            self.core.name
        );
        Ok(())
    }

    /// 获取实体，未命中时回源加载
    ///
    /// 上下文已失效时返回 `StorageError(CacheError::LockNotHeld)`。
    #[instrument(skip(self, ctx), level = "debug", fields(cache = self.core.name))]
    pub async fn get(&self, ctx: &LockContext<N>, id: IdOf<T>) -> LoadOutcome<T> {
        if let Err(e) = self.ensure_held(ctx) {
            return LoadOutcome::StorageError(e);
        }
        let core = &self.core;
        if let Some(entry) = core.entries.get(&id) {
            core.hits.fetch_add(1, Ordering::Relaxed);
            GLOBAL_METRICS.record_request(core.name, "get", "hit");
            return LoadOutcome::Found(entry.value().value().clone());
        }

        core.misses.fetch_add(1, Ordering::Relaxed);
        GLOBAL_METRICS.record_request(core.name, "get", "miss");
        match core.store.load(id).await {
            LoadOutcome::Found(value) => {
                let entry = core
                    .entries
                    .entry(id)
                    .or_insert_with(|| CacheEntry::clean(value));
                LoadOutcome::Found(entry.value().value().clone())
            }
            LoadOutcome::NotFound => LoadOutcome::NotFound,
            LoadOutcome::StorageError(e) => {
                error!("{} 加载 {} 失败: {}", core.name, id, e);
                GLOBAL_METRICS.record_request(core.name, "get", "error");
                LoadOutcome::StorageError(e)
            }
        }
    }

    /// 只查内存，不回源
    pub fn peek(&self, ctx: &LockContext<N>, id: IdOf<T>) -> Result<Option<T>> {
        self.ensure_held(ctx)?;
        Ok(self.core.entries.get(&id).map(|e| e.value().value().clone()))
    }

    /// 写入实体并标记为脏
    pub fn put(&self, ctx: &LockContext<N>, entity: T) -> Result<()> {
        self.ensure_writer(ctx)?;
        self.core.ensure_open()?;
        let id = entity.id();
        match self.core.entries.entry(id) {
            Entry::Occupied(mut slot) => slot.get_mut().replace(entity),
            Entry::Vacant(slot) => {
                slot.insert(CacheEntry::dirty(entity));
            }
        }
        GLOBAL_METRICS.record_request(self.core.name, "put", "ok");
        debug!("{} 条目 {} 已更新", self.core.name, id);
        Ok(())
    }

    /// 原地修改实体，未命中时先回源加载
    ///
    /// 实体不存在时返回 `Ok(None)`。
    pub async fn modify<R, F>(&self, ctx: &LockContext<N>, id: IdOf<T>, f: F) -> Result<Option<R>>
    where
        F: FnOnce(&mut T) -> R,
    {
        self.ensure_writer(ctx)?;
        self.core.ensure_open()?;
        if self.get(ctx, id).await.into_result()?.is_none() {
            return Ok(None);
        }
        let result = self
            .core
            .entries
            .get_mut(&id)
            .map(|mut entry| entry.mutate(f));
        GLOBAL_METRICS.record_request(self.core.name, "modify", "ok");
        Ok(result)
    }

    /// 通过存储插入新实体（ID由存储分配），并作为干净条目缓存
    pub async fn insert_new(&self, ctx: &mut LockContext<N>, entity: T) -> Result<T> {
        self.ensure_writer(ctx)?;
        self.core.ensure_open()?;
        let core = &self.core;
        let inserted = ctx
            .write(&core.storage, |_storage| async move {
                core.store.insert(entity).await
            })
            .await?;
        core.entries
            .insert(inserted.id(), CacheEntry::clean(inserted.clone()));
        debug!("{} 插入新条目 {}", core.name, inserted.id());
        Ok(inserted)
    }

    /// 从缓存和存储中删除实体，返回缓存中是否存在该条目
    pub async fn remove(&self, ctx: &mut LockContext<N>, id: IdOf<T>) -> Result<bool> {
        self.ensure_writer(ctx)?;
        self.core.ensure_open()?;
        let core = &self.core;
        ctx.write(&core.storage, |_storage| async move { core.remove_locked(id).await })
            .await
    }

    /// 驱逐条目，脏条目先写回存储
    ///
    /// 返回条目是否被驱逐。保存失败时条目保留在缓存中并返回错误。
    pub async fn evict(&self, ctx: &mut LockContext<N>, id: IdOf<T>) -> Result<bool> {
        self.ensure_writer(ctx)?;
        let core = &self.core;
        ctx.write(&core.storage, |_storage| async move { core.evict_locked(id).await })
            .await
    }

    /// 批量放入从存储读取的干净条目，已存在的条目不覆盖
    ///
    /// 返回新放入的条目数。
    pub fn prime(&self, ctx: &LockContext<N>, entities: Vec<T>) -> Result<usize> {
        self.ensure_held(ctx)?;
        let mut added = 0;
        for entity in entities {
            if let Entry::Vacant(slot) = self.core.entries.entry(entity.id()) {
                slot.insert(CacheEntry::clean(entity));
                added += 1;
            }
        }
        Ok(added)
    }

    /// 从存储加载全部实体
    pub async fn preload(&self, ctx: &LockContext<N>) -> Result<usize> {
        self.ensure_held(ctx)?;
        let all = self.core.store.load_all().await?;
        let added = self.prime(ctx, all)?;
        info!("{} 预加载 {} 个条目", self.core.name, added);
        Ok(added)
    }

    /// 全部实体的副本
    pub fn snapshot(&self, ctx: &LockContext<N>) -> Result<Vec<T>> {
        self.ensure_held(ctx)?;
        Ok(self
            .core
            .entries
            .iter()
            .map(|e| e.value().value().clone())
            .collect())
    }

    /// 满足条件的实体副本
    pub fn find<P>(&self, ctx: &LockContext<N>, predicate: P) -> Result<Vec<T>>
    where
        P: Fn(&T) -> bool,
    {
        self.ensure_held(ctx)?;
        Ok(self
            .core
            .entries
            .iter()
            .filter(|e| predicate(e.value().value()))
            .map(|e| e.value().value().clone())
            .collect())
    }

    /// 条目状态（诊断用）
    pub fn entry_state(&self, id: IdOf<T>) -> Option<EntryState> {
        self.core.entries.get(&id).map(|e| e.state())
    }

    pub fn len(&self) -> usize {
        self.core.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.core.entries.is_empty()
    }

    pub fn dirty_count(&self) -> usize {
        self.core.dirty_count()
    }

    pub fn stats(&self) -> CacheStats {
        self.core.stats()
    }

    /// 后台刷新任务是否在运行
    pub fn is_auto_persisting(&self) -> bool {
        self.auto_persisting.load(Ordering::SeqCst)
    }

    /// 是否已开始关闭（不再接受写入）
    pub fn is_shut_down(&self) -> bool {
        self.core.closed.load(Ordering::SeqCst)
    }

    /// 立即写回所有脏条目
    ///
    /// 任一条目失败时返回 [`CacheError::Persistence`]，失败条目保持为脏。
    #[instrument(skip(self, ctx), level = "debug", fields(cache = self.core.name))]
    pub async fn flush_to_database<L: LockBefore<Storage>>(
        &self,
        ctx: &mut LockContext<L>,
    ) -> Result<usize> {
        self.core.flush_with(ctx).await.into_result(self.core.name)
    }

    /// 等待此前触发的所有存储写入完成，不停止缓存
    ///
    /// 存储锁是 FIFO 的，排在所有已提交写入之后获取一次即可。
    pub async fn wait_for_pending_writes<L: LockBefore<Storage>>(&self, ctx: &mut LockContext<L>) {
        ctx.write(&self.core.storage, |_storage| async {}).await
    }

    /// 排空式关闭
    ///
    /// 获取类别写锁等待进行中的操作，停止接收写入，停止后台任务并等待
    /// 正在进行的刷新，最后同步写回所有脏条目。重复调用是无操作。
    /// 最终刷新失败时返回错误，缓存保持在排空状态，再次调用会重试。
    #[instrument(skip(self, ctx), level = "info", fields(cache = self.core.name))]
    pub async fn shutdown<L: LockBefore<N>>(&self, ctx: &mut LockContext<L>) -> Result<()> {
        let mut lifecycle = self.lifecycle.lock().await;
        if matches!(*lifecycle, Lifecycle::Stopped) {
            debug!("{} 已关闭，忽略重复关闭", self.core.name);
            return Ok(());
        }

        let task = match std::mem::replace(&mut *lifecycle, Lifecycle::Draining) {
            Lifecycle::Running(task) => task,
            _ => None,
        };
        let core = &self.core;
        let auto_persisting = &self.auto_persisting;
        let result = ctx
            .write(&core.lock, |mut locked| async move {
                core.closed.store(true, Ordering::SeqCst);
                if let Some(task) = task {
                    task.stop().await;
                    auto_persisting.store(false, Ordering::SeqCst);
                }
                core.flush_with(&mut locked).await.into_result(core.name)
            })
            .await;

        match result {
            Ok(persisted) => {
                *lifecycle = Lifecycle::Stopped;
                info!("{} 已关闭，最终写回 {} 个条目", core.name, persisted);
                Ok(())
            }
            Err(e) => {
                error!("{} 关闭时写回失败: {}", core.name, e);
                Err(e)
            }
        }
    }
}

impl<T: Entity, N: LockLevel> Drop for WriteBackCache<T, N> {
    fn drop(&mut self) {
        self.cancel.cancel();
    }
}
