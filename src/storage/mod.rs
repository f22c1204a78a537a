//! Copyright (c) 2025, Kirky.X
//!
//! MIT License
//!
//! 持久化存储接口
//!
//! 缓存在未命中时通过 [`EntityStore::load`] 回源加载，在刷新时通过
//! [`EntityStore::save`] 写回。具体的数据库实现由上层提供。

pub mod memory;

use crate::entity::{AccountId, Message};
use crate::error::{CacheError, Result};
use async_trait::async_trait;
use std::fmt;
use std::hash::Hash;
use std::sync::Arc;

/// 可缓存的实体
pub trait Entity: Clone + Send + Sync + fmt::Debug + 'static {
    /// 实体ID类型，存储分配的原始ID通过 `From<u64>` 转换
    type Id: Copy + Eq + Hash + fmt::Debug + fmt::Display + From<u64> + Send + Sync + 'static;

    /// 实体ID
    fn id(&self) -> Self::Id;

    /// 设置实体ID（插入时由存储分配）
    fn set_id(&mut self, id: Self::Id);
}

/// 实体ID类型简写
pub type IdOf<T> = <T as Entity>::Id;

/// 回源加载结果
///
/// 区分找到、不存在和存储失败三种情况，调用方必须分别处理。
#[derive(Debug)]
pub enum LoadOutcome<T> {
    /// 找到实体
    Found(T),
    /// 实体不存在
    NotFound,
    /// 访问失败：存储出错，或出示的锁上下文已失效
    StorageError(CacheError),
}

impl<T> LoadOutcome<T> {
    /// 转换为 `Result<Option<T>>`
    pub fn into_result(self) -> Result<Option<T>> {
        match self {
            LoadOutcome::Found(value) => Ok(Some(value)),
            LoadOutcome::NotFound => Ok(None),
            LoadOutcome::StorageError(e) => Err(e),
        }
    }

    /// 是否找到实体
    pub fn is_found(&self) -> bool {
        matches!(self, LoadOutcome::Found(_))
    }

    /// 映射找到的值
    pub fn map<U, F: FnOnce(T) -> U>(self, f: F) -> LoadOutcome<U> {
        match self {
            LoadOutcome::Found(value) => LoadOutcome::Found(f(value)),
            LoadOutcome::NotFound => LoadOutcome::NotFound,
            LoadOutcome::StorageError(e) => LoadOutcome::StorageError(e),
        }
    }
}

impl<T> From<Result<Option<T>>> for LoadOutcome<T> {
    fn from(result: Result<Option<T>>) -> Self {
        match result {
            Ok(Some(value)) => LoadOutcome::Found(value),
            Ok(None) => LoadOutcome::NotFound,
            Err(e) => LoadOutcome::StorageError(e),
        }
    }
}

/// 实体存储trait
///
/// `load` 必须能对不同ID并发调用；`save` 必须幂等。
#[async_trait]
pub trait EntityStore: Send + Sync + fmt::Debug {
    /// 存储的实体类型
    type Entity: Entity;

    /// 根据ID加载实体
    async fn load(&self, id: IdOf<Self::Entity>) -> LoadOutcome<Self::Entity>;

    /// 加载全部实体（用于启动时预加载）
    async fn load_all(&self) -> Result<Vec<Self::Entity>>;

    /// 保存实体
    async fn save(&self, entity: &Self::Entity) -> Result<()>;

    /// 根据ID删除实体
    async fn delete_by_id(&self, id: IdOf<Self::Entity>) -> Result<()>;

    /// 插入新实体，返回带有存储分配ID的实体
    async fn insert(&self, entity: Self::Entity) -> Result<Self::Entity>;
}

/// 消息存储trait
#[async_trait]
pub trait MessageStore: EntityStore<Entity = Message> {
    /// 加载某个收件人的全部消息
    async fn load_for_recipient(&self, recipient: AccountId) -> Result<Vec<Message>>;

    /// 作为通用实体存储使用
    fn as_entity_store(self: Arc<Self>) -> Arc<dyn EntityStore<Entity = Message>>;
}
