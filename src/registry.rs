//! Copyright (c) 2025, Kirky.X
//!
//! MIT License
//!
//! 该模块负责按锁顺序初始化、关闭和重置全部实体缓存。

use crate::cache::CacheStats;
use crate::config::Config;
use crate::entity::{
    Account, AccountCache, Battle, BattleCache, MessageCache, SpaceObject, WorldCache,
};
use crate::error::{CacheError, Result};
use crate::lock::LockContext;
use crate::storage::memory::MemoryStores;
use crate::storage::{EntityStore, MessageStore};
use std::sync::Arc;
use tracing::{info, instrument, warn};

/// 实体缓存使用的存储
#[derive(Debug, Clone)]
pub struct Stores {
    pub accounts: Arc<dyn EntityStore<Entity = Account>>,
    pub world: Arc<dyn EntityStore<Entity = SpaceObject>>,
    pub messages: Arc<dyn MessageStore>,
    pub battles: Arc<dyn EntityStore<Entity = Battle>>,
}

impl From<&MemoryStores> for Stores {
    fn from(memory: &MemoryStores) -> Self {
        Self {
            accounts: memory.accounts.clone(),
            world: memory.world.clone(),
            messages: memory.messages.clone(),
            battles: memory.battles.clone(),
        }
    }
}

/// 全部实体缓存的默认实例
#[derive(Clone)]
pub struct CacheRegistry {
    pub accounts: Arc<AccountCache>,
    pub world: Arc<WorldCache>,
    pub messages: Arc<MessageCache>,
    pub battles: Arc<BattleCache>,
}

impl CacheRegistry {
    /// 按锁顺序初始化全部默认实例
    ///
    /// 已初始化的缓存保持不变，因此可以安全地重复调用。
    #[instrument(skip_all, level = "info")]
    pub async fn initialize(ctx: &mut LockContext, config: &Config, stores: Stores) -> Result<Self> {
        config.validate().map_err(CacheError::ConfigError)?;

        let accounts = AccountCache::initialize(ctx, &config.accounts, stores.accounts).await?;
        let world = WorldCache::initialize(ctx, &config.world, stores.world).await?;
        let messages = MessageCache::initialize(ctx, &config.messages, stores.messages).await?;
        let battles = BattleCache::initialize(ctx, &config.battles, stores.battles).await?;

        info!("全部实体缓存已初始化");
        Ok(Self {
            accounts,
            world,
            messages,
            battles,
        })
    }

    /// 获取已初始化的默认实例
    pub fn from_instances() -> Result<Self> {
        Ok(Self {
            accounts: AccountCache::get_instance()?,
            world: WorldCache::get_instance()?,
            messages: MessageCache::get_instance()?,
            battles: BattleCache::get_instance()?,
        })
    }

    /// 全部缓存的统计
    pub fn stats(&self) -> Vec<CacheStats> {
        vec![
            self.accounts.get_stats(),
            self.world.get_stats(),
            self.messages.get_stats(),
            self.battles.get_stats(),
        ]
    }

    /// 写回全部缓存的脏条目，返回写回总数
    pub async fn flush_all(&self, ctx: &mut LockContext) -> Result<usize> {
        let mut persisted = self.accounts.flush_to_database(ctx).await?;
        persisted += self.world.flush_to_database(ctx).await?;
        persisted += self.messages.flush_to_database(ctx).await?;
        persisted += self.battles.flush_to_database(ctx).await?;
        Ok(persisted)
    }

    /// 关闭全部缓存
    ///
    /// 每个缓存都会尝试关闭；任一失败时汇总返回 [`CacheError::ShutdownError`]，
    /// 失败的缓存保持排空状态，再次调用会重试。
    #[instrument(skip_all, level = "info")]
    pub async fn shutdown_all(&self, ctx: &mut LockContext) -> Result<()> {
        info!("开始关闭所有实体缓存...");
        let results = [
            ("accounts", self.accounts.shutdown(ctx).await),
            ("world", self.world.shutdown(ctx).await),
            ("messages", self.messages.shutdown(ctx).await),
            ("battles", self.battles.shutdown(ctx).await),
        ];

        let errors: Vec<String> = results
            .into_iter()
            .filter_map(|(name, result)| match result {
                Ok(()) => None,
                Err(e) => {
                    warn!("关闭缓存 {} 时出错: {}", name, e);
                    Some(format!("{}: {}", name, e))
                }
            })
            .collect();

        if errors.is_empty() {
            info!("所有实体缓存已成功关闭");
            Ok(())
        } else {
            Err(CacheError::ShutdownError(format!(
                "部分缓存关闭失败: {}",
                errors.join(", ")
            )))
        }
    }

    /// 丢弃全部默认实例（不刷新）
    #[doc(hidden)]
    pub fn reset_all() {
        AccountCache::reset_instance();
        WorldCache::reset_instance();
        MessageCache::reset_instance();
        BattleCache::reset_instance();
    }
}
