//! Copyright (c) 2025, Kirky.X
//!
//! MIT License
//!
//! 世界对象（飞船、小行星、残骸等）及世界缓存。启动时预加载全部对象。

use crate::cache::{InstanceSlot, WriteBackCache};
use crate::config::CacheConfig;
use crate::entity::account::{AccountCache, AccountId, ACCOUNTS_CACHE};
use crate::error::{CacheError, Result};
use crate::lock::{Accounts, LockBefore, LockContext, World};
use crate::storage::{Entity, EntityStore, LoadOutcome};
use chrono::{DateTime, Utc};
use lazy_static::lazy_static;
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use tracing::{debug, info, instrument};

pub const WORLD_CACHE: &str = "world";

entity_id!(
    /// 世界对象ID
    ObjectId
);

/// 世界对象种类
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ObjectKind {
    PlayerShip,
    Asteroid,
    Shipwreck,
    EscapePod,
}

/// 世界中的对象
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SpaceObject {
    pub id: ObjectId,
    pub kind: ObjectKind,
    pub x: f64,
    pub y: f64,
    pub speed: f64,
    /// 航向（度）
    pub angle: f64,
    pub owner_id: Option<AccountId>,
    pub last_position_update: DateTime<Utc>,
}

impl SpaceObject {
    /// 创建尚未分配ID的静止对象
    pub fn new(kind: ObjectKind, x: f64, y: f64) -> Self {
        Self {
            id: ObjectId::default(),
            kind,
            x,
            y,
            speed: 0.0,
            angle: 0.0,
            owner_id: None,
            last_position_update: Utc::now(),
        }
    }

    pub fn player_ship(owner: AccountId, x: f64, y: f64) -> Self {
        Self {
            owner_id: Some(owner),
            ..Self::new(ObjectKind::PlayerShip, x, y)
        }
    }
}

impl Entity for SpaceObject {
    type Id = ObjectId;

    fn id(&self) -> ObjectId {
        self.id
    }

    fn set_id(&mut self, id: ObjectId) {
        self.id = id;
    }
}

lazy_static! {
    static ref INSTANCE: InstanceSlot<WorldCache> = InstanceSlot::new(WORLD_CACHE);
}

/// 世界缓存
pub struct WorldCache {
    objects: WriteBackCache<SpaceObject, World>,
}

impl WorldCache {
    /// 创建独立实例（不预加载）
    pub fn new(config: CacheConfig, store: Arc<dyn EntityStore<Entity = SpaceObject>>) -> Self {
        Self {
            objects: WriteBackCache::new(WORLD_CACHE, store, config),
        }
    }

    /// 初始化默认实例并预加载全部对象
    ///
    /// 幂等：已初始化时直接返回现有实例。预加载失败时不会注册实例。
    #[instrument(skip_all, level = "info")]
    pub async fn initialize<L: LockBefore<World>>(
        ctx: &mut LockContext<L>,
        config: &CacheConfig,
        store: Arc<dyn EntityStore<Entity = SpaceObject>>,
    ) -> Result<Arc<Self>> {
        config
            .validate(WORLD_CACHE)
            .map_err(CacheError::ConfigError)?;
        let config = config.clone();
        INSTANCE
            .get_or_try_init(move || async move {
                let cache = Self::new(config, store);
                let loaded = cache.preload(ctx).await?;
                info!("世界缓存初始化完成，{} 个对象", loaded);
                Ok(cache)
            })
            .await
    }

    /// 从存储预加载全部对象
    pub async fn preload<L: LockBefore<World>>(&self, ctx: &mut LockContext<L>) -> Result<usize> {
        self.objects
            .write(ctx, |locked| async move { self.objects.preload(&locked).await })
            .await
    }

    /// 获取对象
    #[instrument(skip(self, ctx), level = "debug")]
    pub async fn get_object_by_id_with_lock<L: LockBefore<World>>(
        &self,
        ctx: &mut LockContext<L>,
        id: ObjectId,
    ) -> LoadOutcome<SpaceObject> {
        self.objects
            .read(ctx, |locked| async move { self.objects.get(&locked, id).await })
            .await
    }

    /// 写入对象并标记为脏
    pub async fn update_object_in_cache<L: LockBefore<World>>(
        &self,
        ctx: &mut LockContext<L>,
        object: SpaceObject,
    ) -> Result<()> {
        self.objects
            .write(ctx, |locked| async move { self.objects.put(&locked, object) })
            .await
    }

    /// 插入新对象，ID由存储分配
    pub async fn insert_object<L: LockBefore<World>>(
        &self,
        ctx: &mut LockContext<L>,
        object: SpaceObject,
    ) -> Result<SpaceObject> {
        self.objects
            .write(ctx, |mut locked| async move {
                self.objects.insert_new(&mut locked, object).await
            })
            .await
    }

    /// 删除对象（同时从存储删除），返回缓存中是否存在
    pub async fn delete_object<L: LockBefore<World>>(
        &self,
        ctx: &mut LockContext<L>,
        id: ObjectId,
    ) -> Result<bool> {
        self.objects
            .write(ctx, |mut locked| async move {
                self.objects.remove(&mut locked, id).await
            })
            .await
    }

    /// 全部对象的副本
    pub async fn get_all_objects<L: LockBefore<World>>(
        &self,
        ctx: &mut LockContext<L>,
    ) -> Result<Vec<SpaceObject>> {
        self.objects
            .read(ctx, |locked| async move { self.objects.snapshot(&locked) })
            .await
    }

    /// 原地修改对象，对象不存在时返回 `None`
    pub async fn modify_object<L, R, F>(
        &self,
        ctx: &mut LockContext<L>,
        id: ObjectId,
        f: F,
    ) -> Result<Option<R>>
    where
        L: LockBefore<World>,
        F: FnOnce(&mut SpaceObject) -> R,
    {
        self.objects
            .write(ctx, |locked| async move { self.objects.modify(&locked, id, f).await })
            .await
    }

    /// 为账户创建飞船并记录到账户上
    ///
    /// 先持有账户锁，再获取世界锁插入飞船，释放世界锁后更新账户。
    /// 账户已有飞船时返回现有飞船。
    #[instrument(skip(self, ctx, accounts), level = "debug")]
    pub async fn spawn_player_ship<L: LockBefore<Accounts>>(
        &self,
        ctx: &mut LockContext<L>,
        accounts: &AccountCache,
        owner: AccountId,
        x: f64,
        y: f64,
    ) -> Result<SpaceObject> {
        accounts
            .with_accounts_locked(ctx, |mut accounts_ctx| async move {
                let account = accounts
                    .get_account_under_lock(&accounts_ctx, owner)
                    .await
                    .into_result()?
                    .ok_or_else(|| CacheError::NotFound {
                        cache: ACCOUNTS_CACHE.to_string(),
                        id: owner.to_string(),
                    })?;

                if let Some(ship_id) = account.ship_id {
                    let existing = self
                        .get_object_by_id_with_lock(&mut accounts_ctx, ship_id)
                        .await
                        .into_result()?;
                    if let Some(ship) = existing {
                        return Ok(ship);
                    }
                }

                let ship = self
                    .insert_object(&mut accounts_ctx, SpaceObject::player_ship(owner, x, y))
                    .await?;
                let ship_id = ship.id;
                accounts
                    .modify_account_under_lock(&accounts_ctx, owner, |account| {
                        account.ship_id = Some(ship_id)
                    })
                    .await?;
                debug!("账户 {} 的飞船 {} 已生成", owner, ship_id);
                Ok::<_, CacheError>(ship)
            })
            .await
    }
}

entity_cache_common!(WorldCache, objects, SpaceObject, World, INSTANCE);
