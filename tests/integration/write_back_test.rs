//! Copyright (c) 2025, Kirky.X
//!
//! MIT License
//!
//! 通用写回缓存集成测试

use async_trait::async_trait;
use starcache::cache::{EntryState, WriteBackCache};
use starcache::config::{CacheConfig, MIN_PERSISTENCE_INTERVAL_MS};
use starcache::entity::{Account, AccountId};
use starcache::error::{CacheError, Result};
use starcache::lock::{Accounts, LockContext, World};
use starcache::storage::memory::MemoryStore;
use starcache::storage::{EntityStore, LoadOutcome};
use std::sync::Arc;
use std::time::Duration;

#[path = "../common/mod.rs"]
mod common;

fn seeded_store(count: u64) -> Arc<MemoryStore<Account>> {
    let store = Arc::new(MemoryStore::<Account>::new("accounts"));
    for id in 1..=count {
        store.seed(Account::new(format!("pilot-{}", id)), id);
    }
    store
}

fn manual_cache(store: &Arc<MemoryStore<Account>>) -> WriteBackCache<Account, Accounts> {
    WriteBackCache::new("accounts", store.clone(), CacheConfig::manual())
}

/// 加载总是失败的存储
#[derive(Debug)]
struct UnreachableStore;

#[async_trait]
impl EntityStore for UnreachableStore {
    type Entity = Account;

    async fn load(&self, _id: AccountId) -> LoadOutcome<Account> {
        LoadOutcome::StorageError(CacheError::Storage("connection refused".to_string()))
    }

    async fn load_all(&self) -> Result<Vec<Account>> {
        Err(CacheError::Storage("connection refused".to_string()))
    }

    async fn save(&self, _entity: &Account) -> Result<()> {
        Err(CacheError::Storage("connection refused".to_string()))
    }

    async fn delete_by_id(&self, _id: AccountId) -> Result<()> {
        Err(CacheError::Storage("connection refused".to_string()))
    }

    async fn insert(&self, _entity: Account) -> Result<Account> {
        Err(CacheError::Storage("connection refused".to_string()))
    }
}

/// 测试未命中时回源加载，再次读取命中缓存
#[tokio::test]
async fn test_load_on_miss_then_hit() {
    common::setup_logging();
    let store = seeded_store(1);
    let cache = manual_cache(&store);
    let cache = &cache;
    let mut ctx = LockContext::new();

    for _ in 0..2 {
        let outcome = cache
            .read(&mut ctx, |locked| async move { cache.get(&locked, AccountId(1)).await })
            .await;
        assert!(outcome.is_found());
    }

    let stats = cache.stats();
    assert_eq!(stats.misses, 1);
    assert_eq!(stats.hits, 1);
    assert_eq!(stats.cache_size, 1);
    assert_eq!(stats.dirty_count, 0);
    assert_eq!(store.load_count(), 1);
    assert_eq!(cache.entry_state(AccountId(1)), Some(EntryState::Clean));
}

/// 测试三种加载结果可区分
#[tokio::test]
async fn test_load_outcomes_are_distinguished() {
    let store = seeded_store(0);
    let cache = manual_cache(&store);
    let cache = &cache;
    let mut ctx = LockContext::new();

    let missing = cache
        .read(&mut ctx, |locked| async move { cache.get(&locked, AccountId(42)).await })
        .await;
    assert!(matches!(missing, LoadOutcome::NotFound));
    assert!(cache.is_empty());

    let broken: WriteBackCache<Account, Accounts> =
        WriteBackCache::new("accounts", Arc::new(UnreachableStore), CacheConfig::manual());
    let broken = &broken;
    let failed = broken
        .read(&mut ctx, |locked| async move { broken.get(&locked, AccountId(1)).await })
        .await;
    assert!(matches!(failed, LoadOutcome::StorageError(CacheError::Storage(_))));
    assert!(failed.into_result().is_err());
}

/// 测试写入后立即读取得到新值，刷新前存储不变
#[tokio::test]
async fn test_read_after_write_before_flush() {
    let store = seeded_store(1);
    let cache = manual_cache(&store);
    let cache = &cache;
    let mut ctx = LockContext::new();

    let mut account = store.get(AccountId(1)).unwrap();
    account.iron = 120.0;
    cache
        .write(&mut ctx, |locked| async move { cache.put(&locked, account) })
        .await
        .unwrap();

    let reread = cache
        .read(&mut ctx, |locked| async move { cache.get(&locked, AccountId(1)).await })
        .await
        .into_result()
        .unwrap()
        .unwrap();
    assert_eq!(reread.iron, 120.0);
    assert_eq!(store.get(AccountId(1)).unwrap().iron, 0.0);
    assert_eq!(cache.entry_state(AccountId(1)), Some(EntryState::Dirty));

    assert_eq!(cache.flush_to_database(&mut ctx).await.unwrap(), 1);
    assert_eq!(store.get(AccountId(1)).unwrap().iron, 120.0);
    assert_eq!(cache.dirty_count(), 0);

    // 干净条目不会再次写入
    assert_eq!(cache.flush_to_database(&mut ctx).await.unwrap(), 0);
    assert_eq!(store.save_count(), 1);
}

/// 测试保存失败时条目保持为脏并返回持久化错误
#[tokio::test]
async fn test_failed_flush_keeps_entries_dirty() {
    let store = seeded_store(2);
    let cache = manual_cache(&store);
    let cache = &cache;
    let mut ctx = LockContext::new();

    cache
        .write(&mut ctx, |locked| async move {
            for id in [AccountId(1), AccountId(2)] {
                cache.modify(&locked, id, |a| a.xp += 1).await?;
            }
            Ok::<_, CacheError>(())
        })
        .await
        .unwrap();

    store.set_fail_saves(true);
    let err = cache.flush_to_database(&mut ctx).await.unwrap_err();
    match err {
        CacheError::Persistence { cache: name, failed, .. } => {
            assert_eq!(name, "accounts");
            assert_eq!(failed, 2);
        }
        other => panic!("unexpected error: {}", other),
    }
    assert_eq!(cache.dirty_count(), 2);

    store.set_fail_saves(false);
    assert_eq!(cache.flush_to_database(&mut ctx).await.unwrap(), 2);
    assert_eq!(store.get(AccountId(2)).unwrap().xp, 1);
}

/// 测试保存期间发生的修改使条目保持为脏
#[tokio::test]
async fn test_mutation_during_save_stays_dirty() {
    let store = seeded_store(1);
    store.set_save_delay(Duration::from_millis(40));
    let cache = manual_cache(&store);
    let cache = &cache;

    cache
        .write(&mut LockContext::new(), |locked| async move {
            cache.modify(&locked, AccountId(1), |a| a.iron = 1.0).await
        })
        .await
        .unwrap();

    let (flushed, modified) = tokio::join!(
        async {
            let mut ctx = LockContext::new();
            cache.flush_to_database(&mut ctx).await
        },
        async {
            tokio::time::sleep(Duration::from_millis(10)).await;
            assert_eq!(cache.entry_state(AccountId(1)), Some(EntryState::Flushing));
            let mut ctx = LockContext::new();
            cache
                .write(&mut ctx, |locked| async move {
                    cache.modify(&locked, AccountId(1), |a| a.iron = 2.0).await
                })
                .await
        },
    );
    assert_eq!(flushed.unwrap(), 1);
    assert_eq!(modified.unwrap(), Some(()));

    assert_eq!(store.get(AccountId(1)).unwrap().iron, 1.0);
    assert_eq!(cache.entry_state(AccountId(1)), Some(EntryState::Dirty));

    cache.flush_to_database(&mut LockContext::new()).await.unwrap();
    assert_eq!(store.get(AccountId(1)).unwrap().iron, 2.0);
    assert_eq!(cache.entry_state(AccountId(1)), Some(EntryState::Clean));
}

/// 测试等待挂起写入直到进行中的刷新完成
#[tokio::test]
async fn test_wait_for_pending_writes() {
    let store = seeded_store(1);
    store.set_save_delay(Duration::from_millis(30));
    let cache = manual_cache(&store);
    let cache = &cache;

    cache
        .write(&mut LockContext::new(), |locked| async move {
            cache.modify(&locked, AccountId(1), |a| a.xp = 9).await
        })
        .await
        .unwrap();

    let (flushed, observed) = tokio::join!(
        async { cache.flush_to_database(&mut LockContext::new()).await },
        async {
            cache.wait_for_pending_writes(&mut LockContext::new()).await;
            store.get(AccountId(1)).unwrap().xp
        },
    );
    assert_eq!(flushed.unwrap(), 1);
    assert_eq!(observed, 9);
    assert!(!cache.is_shut_down());
}

/// 测试后台刷新定期写回
#[tokio::test]
async fn test_periodic_flush_persists() {
    let store = seeded_store(1);
    let cache: WriteBackCache<Account, Accounts> =
        WriteBackCache::new("accounts", store.clone(), CacheConfig::with_interval(20));
    let cache = &cache;
    assert!(cache.is_auto_persisting());

    cache
        .write(&mut LockContext::new(), |locked| async move {
            cache.modify(&locked, AccountId(1), |a| a.iron = 33.0).await
        })
        .await
        .unwrap();

    common::wait_until("background flush", || store.save_count() == 1).await;
    assert_eq!(store.get(AccountId(1)).unwrap().iron, 33.0);
    assert_eq!(cache.dirty_count(), 0);
}

/// 测试后台刷新失败时条目保持为脏，存储恢复后下个周期重试成功
#[tokio::test]
async fn test_periodic_flush_retries_after_failure() {
    let store = seeded_store(1);
    store.set_fail_saves(true);
    let cache: WriteBackCache<Account, Accounts> =
        WriteBackCache::new("accounts", store.clone(), CacheConfig::with_interval(10));
    let cache = &cache;

    cache
        .write(&mut LockContext::new(), |locked| async move {
            cache.modify(&locked, AccountId(1), |a| a.xp = 5).await
        })
        .await
        .unwrap();

    tokio::time::sleep(Duration::from_millis(50)).await;
    assert_eq!(cache.dirty_count(), 1);
    assert_eq!(store.save_count(), 0);

    store.set_fail_saves(false);
    common::wait_until("retry after failure", || store.save_count() == 1).await;
    assert_eq!(cache.dirty_count(), 0);
    assert_eq!(store.get(AccountId(1)).unwrap().xp, 5);
}

/// 测试驱逐先写回脏条目
#[tokio::test]
async fn test_evict_persists_dirty_entry() {
    let store = seeded_store(1);
    let cache = manual_cache(&store);
    let cache = &cache;
    let mut ctx = LockContext::new();

    let evicted = cache
        .write(&mut ctx, |mut locked| async move {
            cache.modify(&locked, AccountId(1), |a| a.xp = 77).await?;
            cache.evict(&mut locked, AccountId(1)).await
        })
        .await
        .unwrap();

    assert!(evicted);
    assert_eq!(cache.entry_state(AccountId(1)), None);
    assert_eq!(store.get(AccountId(1)).unwrap().xp, 77);
}

/// 测试插入使用存储分配的ID，删除同时删除存储
#[tokio::test]
async fn test_insert_and_remove_go_through_store() {
    let store = seeded_store(3);
    let cache = manual_cache(&store);
    let cache = &cache;
    let mut ctx = LockContext::new();

    let created = cache
        .write(&mut ctx, |mut locked| async move {
            cache.insert_new(&mut locked, Account::new("newcomer")).await
        })
        .await
        .unwrap();
    assert_eq!(created.id, AccountId(4));
    assert_eq!(cache.entry_state(created.id), Some(EntryState::Clean));

    let removed = cache
        .write(&mut ctx, |mut locked| async move {
            cache.remove(&mut locked, created.id).await
        })
        .await
        .unwrap();
    assert!(removed);
    assert!(store.get(AccountId(4)).is_none());
    assert_eq!(store.delete_count(), 1);
}

/// 测试零刷新间隔被限制到最小值，后台刷新照常工作
#[tokio::test]
async fn test_zero_interval_is_clamped() {
    let store = seeded_store(1);
    let cache: WriteBackCache<Account, Accounts> =
        WriteBackCache::new("accounts", store.clone(), CacheConfig::with_interval(0));
    let cache = &cache;
    assert_eq!(cache.config().persistence_interval_ms, MIN_PERSISTENCE_INTERVAL_MS);
    assert!(cache.is_auto_persisting());

    cache
        .write(&mut LockContext::new(), |locked| async move {
            cache.modify(&locked, AccountId(1), |a| a.xp = 3).await
        })
        .await
        .unwrap();
    common::wait_until("clamped background flush", || store.save_count() == 1).await;
    assert_eq!(store.get(AccountId(1)).unwrap().xp, 3);
}

/// 测试锁区结束后保留下来的上下文被所有条目操作拒绝
#[tokio::test]
async fn test_kept_context_is_rejected() {
    let store = seeded_store(1);
    let cache = manual_cache(&store);
    let cache = &cache;
    let mut ctx = LockContext::new();

    let kept = cache.write(&mut ctx, |locked| async move { locked }).await;
    assert!(!kept.is_live());

    let read = cache.get(&kept, AccountId(1)).await.into_result();
    assert!(matches!(read, Err(CacheError::LockNotHeld(_))));
    assert!(matches!(cache.peek(&kept, AccountId(1)), Err(CacheError::LockNotHeld(_))));
    assert!(matches!(cache.snapshot(&kept), Err(CacheError::LockNotHeld(_))));
    assert!(matches!(
        cache.put(&kept, Account::new("forged")),
        Err(CacheError::LockNotHeld(_))
    ));
    let modified = cache.modify(&kept, AccountId(1), |a| a.xp = 99).await;
    assert!(matches!(modified, Err(CacheError::LockNotHeld(_))));

    assert!(cache.is_empty());
    assert_eq!(cache.dirty_count(), 0);

    // 上下文只在自己的锁区内有效，下一次获取得到新的有效上下文
    let xp = cache
        .read(&mut ctx, |locked| async move {
            assert!(locked.holds::<Accounts>());
            assert!(!locked.holds::<World>());
            cache.get(&locked, AccountId(1)).await.into_result()
        })
        .await
        .unwrap()
        .map(|account| account.xp);
    assert_eq!(xp, Some(0));
}
