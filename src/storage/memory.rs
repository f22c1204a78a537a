//! Copyright (c) 2025, Kirky.X
//!
//! MIT License
//!
//! 基于内存的实体存储，用于测试和模拟。支持注入保存失败和保存延迟。

use super::{Entity, EntityStore, IdOf, LoadOutcome, MessageStore};
use crate::entity::{Account, AccountId, Battle, Message, SpaceObject};
use crate::error::{CacheError, Result};
use async_trait::async_trait;
use dashmap::DashMap;
use std::sync::atomic::{AtomicBool, AtomicU64, AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::Duration;
use tracing::debug;

/// 内存实体存储
#[derive(Debug)]
pub struct MemoryStore<T: Entity> {
    name: &'static str,
    rows: DashMap<IdOf<T>, T>,
    next_id: AtomicU64,
    loads: AtomicUsize,
    saves: AtomicUsize,
    deletes: AtomicUsize,
    fail_saves: AtomicBool,
    save_delay_ms: AtomicU64,
}

impl<T: Entity> MemoryStore<T> {
    /// 创建空存储
    pub fn new(name: &'static str) -> Self {
        Self {
            name,
            rows: DashMap::new(),
            next_id: AtomicU64::new(1),
            loads: AtomicUsize::new(0),
            saves: AtomicUsize::new(0),
            deletes: AtomicUsize::new(0),
            fail_saves: AtomicBool::new(false),
            save_delay_ms: AtomicU64::new(0),
        }
    }

    /// 直接写入一行（不计入保存次数），原始ID会推进ID分配器
    pub fn seed(&self, entity: T, raw_id: u64) {
        let mut entity = entity;
        entity.set_id(IdOf::<T>::from(raw_id));
        self.next_id.fetch_max(raw_id + 1, Ordering::SeqCst);
        self.rows.insert(entity.id(), entity);
    }

    /// 让后续的保存全部失败
    pub fn set_fail_saves(&self, fail: bool) {
        self.fail_saves.store(fail, Ordering::SeqCst);
    }

    /// 为每次保存增加延迟
    pub fn set_save_delay(&self, delay: Duration) {
        self.save_delay_ms
            .store(delay.as_millis() as u64, Ordering::SeqCst);
    }

    /// 直接读取一行（不经过缓存，不计入加载次数）
    pub fn get(&self, id: IdOf<T>) -> Option<T> {
        self.rows.get(&id).map(|row| row.value().clone())
    }

    /// 全部行
    pub fn rows(&self) -> Vec<T> {
        self.rows.iter().map(|row| row.value().clone()).collect()
    }

    /// 行数
    pub fn len(&self) -> usize {
        self.rows.len()
    }

    /// 是否为空
    pub fn is_empty(&self) -> bool {
        self.rows.is_empty()
    }

    /// 成功保存的次数
    pub fn save_count(&self) -> usize {
        self.saves.load(Ordering::SeqCst)
    }

    /// 加载次数
    pub fn load_count(&self) -> usize {
        self.loads.load(Ordering::SeqCst)
    }

    /// 删除次数
    pub fn delete_count(&self) -> usize {
        self.deletes.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl<T: Entity> EntityStore for MemoryStore<T> {
    type Entity = T;

    async fn load(&self, id: IdOf<T>) -> LoadOutcome<T> {
        self.loads.fetch_add(1, Ordering::SeqCst);
        match self.rows.get(&id) {
            Some(row) => LoadOutcome::Found(row.value().clone()),
            None => LoadOutcome::NotFound,
        }
    }

    async fn load_all(&self) -> Result<Vec<T>> {
        self.loads.fetch_add(1, Ordering::SeqCst);
        Ok(self.rows())
    }

    async fn save(&self, entity: &T) -> Result<()> {
        let delay = self.save_delay_ms.load(Ordering::SeqCst);
        if delay > 0 {
            tokio::time::sleep(Duration::from_millis(delay)).await;
        }
        if self.fail_saves.load(Ordering::SeqCst) {
            return Err(CacheError::Storage(format!(
                "{} store rejected save of {}",
                self.name,
                entity.id()
            )));
        }
        self.rows.insert(entity.id(), entity.clone());
        self.saves.fetch_add(1, Ordering::SeqCst);
        debug!("{} store saved {}", self.name, entity.id());
        Ok(())
    }

    async fn delete_by_id(&self, id: IdOf<T>) -> Result<()> {
        self.rows.remove(&id);
        self.deletes.fetch_add(1, Ordering::SeqCst);
        Ok(())
    }

    async fn insert(&self, entity: T) -> Result<T> {
        let mut entity = entity;
        let raw_id = self.next_id.fetch_add(1, Ordering::SeqCst);
        entity.set_id(IdOf::<T>::from(raw_id));
        self.rows.insert(entity.id(), entity.clone());
        Ok(entity)
    }
}

#[async_trait]
impl MessageStore for MemoryStore<Message> {
    async fn load_for_recipient(&self, recipient: AccountId) -> Result<Vec<Message>> {
        self.loads.fetch_add(1, Ordering::SeqCst);
        Ok(self
            .rows
            .iter()
            .filter(|row| row.value().recipient_id == recipient)
            .map(|row| row.value().clone())
            .collect())
    }

    fn as_entity_store(self: Arc<Self>) -> Arc<dyn EntityStore<Entity = Message>> {
        self
    }
}

/// 四个实体缓存各自的内存存储
#[derive(Debug, Clone)]
pub struct MemoryStores {
    pub accounts: Arc<MemoryStore<Account>>,
    pub world: Arc<MemoryStore<SpaceObject>>,
    pub messages: Arc<MemoryStore<Message>>,
    pub battles: Arc<MemoryStore<Battle>>,
}

impl MemoryStores {
    pub fn new() -> Self {
        Self {
            accounts: Arc::new(MemoryStore::new("accounts")),
            world: Arc::new(MemoryStore::new("world")),
            messages: Arc::new(MemoryStore::new("messages")),
            battles: Arc::new(MemoryStore::new("battles")),
        }
    }

    /// 全部存储成功保存的次数
    pub fn total_saves(&self) -> usize {
        self.accounts.save_count()
            + self.world.save_count()
            + self.messages.save_count()
            + self.battles.save_count()
    }
}

impl Default for MemoryStores {
    fn default() -> Self {
        Self::new()
    }
}
