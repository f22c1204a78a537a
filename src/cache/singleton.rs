//! Copyright (c) 2025, Kirky.X
//!
//! MIT License
//!
//! 进程级默认实例槽位。实例只能由显式初始化创建，可在测试之间完全重置。

use crate::error::{CacheError, Result};
use std::future::Future;
use std::sync::{Arc, PoisonError, RwLock};
use tokio::sync::Mutex;

/// 实例槽位
#[derive(Debug)]
pub struct InstanceSlot<T> {
    name: &'static str,
    slot: RwLock<Option<Arc<T>>>,
    /// 串行化并发的初始化
    init: Mutex<()>,
}

impl<T> InstanceSlot<T> {
    pub fn new(name: &'static str) -> Self {
        Self {
            name,
            slot: RwLock::new(None),
            init: Mutex::new(()),
        }
    }

    fn current(&self) -> Option<Arc<T>> {
        self.slot
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .clone()
    }

    /// 获取实例，未初始化时返回 [`CacheError::NotInitialized`]
    pub fn get(&self) -> Result<Arc<T>> {
        self.current()
            .ok_or_else(|| CacheError::NotInitialized(self.name.to_string()))
    }

    pub fn is_initialized(&self) -> bool {
        self.current().is_some()
    }

    /// 获取实例，不存在时执行 `init` 创建
    ///
    /// 重复调用是幂等的：已有实例时直接返回，不会再次执行 `init`。
    pub async fn get_or_try_init<F, Fut>(&self, init: F) -> Result<Arc<T>>
    where
        F: FnOnce() -> Fut,
        Fut: Future<Output = Result<T>>,
    {
        if let Some(existing) = self.current() {
            return Ok(existing);
        }
        let _guard = self.init.lock().await;
        if let Some(existing) = self.current() {
            return Ok(existing);
        }
        let instance = Arc::new(init().await?);
        *self.slot.write().unwrap_or_else(PoisonError::into_inner) = Some(instance.clone());
        Ok(instance)
    }

    /// 丢弃实例（不刷新），返回被丢弃的实例
    pub fn reset(&self) -> Option<Arc<T>> {
        self.slot
            .write()
            .unwrap_or_else(PoisonError::into_inner)
            .take()
    }
}
