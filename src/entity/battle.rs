//! Copyright (c) 2025, Kirky.X
//!
//! MIT License
//!
//! 战斗及战斗缓存。启动时预加载全部战斗。

use crate::cache::{InstanceSlot, WriteBackCache};
use crate::config::CacheConfig;
use crate::entity::account::AccountId;
use crate::entity::message::{EventStats, MessageBody, MessageCache};
use crate::error::{CacheError, Result};
use crate::lock::{Battles, LockBefore, LockContext, Messages};
use crate::storage::{Entity, EntityStore, LoadOutcome};
use chrono::{DateTime, Utc};
use lazy_static::lazy_static;
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use tracing::{debug, info, instrument};

pub const BATTLES_CACHE: &str = "battles";

entity_id!(
    /// 战斗ID
    BattleId
);

/// 战斗中的一次攻击
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct BattleEvent {
    pub timestamp: DateTime<Utc>,
    pub attacker_id: AccountId,
    pub target_id: AccountId,
    pub damage: f64,
}

impl BattleEvent {
    pub fn hit(attacker_id: AccountId, target_id: AccountId, damage: f64) -> Self {
        Self {
            timestamp: Utc::now(),
            attacker_id,
            target_id,
            damage,
        }
    }
}

/// 两名玩家之间的战斗
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Battle {
    pub id: BattleId,
    pub attacker_id: AccountId,
    pub defender_id: AccountId,
    pub started_at: DateTime<Utc>,
    pub ended_at: Option<DateTime<Utc>>,
    pub winner_id: Option<AccountId>,
    pub events: Vec<BattleEvent>,
}

impl Battle {
    /// 创建尚未分配ID的进行中战斗
    pub fn new(attacker_id: AccountId, defender_id: AccountId) -> Self {
        Self {
            id: BattleId::default(),
            attacker_id,
            defender_id,
            started_at: Utc::now(),
            ended_at: None,
            winner_id: None,
            events: Vec::new(),
        }
    }

    pub fn is_ongoing(&self) -> bool {
        self.ended_at.is_none()
    }

    pub fn involves(&self, account: AccountId) -> bool {
        self.attacker_id == account || self.defender_id == account
    }

    /// 某个参与者在本场战斗中的统计
    pub fn stats_for(&self, account: AccountId) -> EventStats {
        let mut stats = EventStats::single();
        for event in &self.events {
            if event.attacker_id == account {
                stats.damage_dealt += event.damage;
            }
            if event.target_id == account {
                stats.damage_received += event.damage;
            }
        }
        match self.winner_id {
            Some(winner) if winner == account => stats.victories = 1,
            Some(_) => stats.defeats = 1,
            None => {}
        }
        stats
    }
}

impl Entity for Battle {
    type Id = BattleId;

    fn id(&self) -> BattleId {
        self.id
    }

    fn set_id(&mut self, id: BattleId) {
        self.id = id;
    }
}

lazy_static! {
    static ref INSTANCE: InstanceSlot<BattleCache> = InstanceSlot::new(BATTLES_CACHE);
}

/// 战斗缓存
pub struct BattleCache {
    battles: WriteBackCache<Battle, Battles>,
}

impl BattleCache {
    pub fn new(config: CacheConfig, store: Arc<dyn EntityStore<Entity = Battle>>) -> Self {
        Self {
            battles: WriteBackCache::new(BATTLES_CACHE, store, config),
        }
    }

    /// 初始化默认实例并预加载全部战斗
    #[instrument(skip_all, level = "info")]
    pub async fn initialize<L: LockBefore<Battles>>(
        ctx: &mut LockContext<L>,
        config: &CacheConfig,
        store: Arc<dyn EntityStore<Entity = Battle>>,
    ) -> Result<Arc<Self>> {
        config
            .validate(BATTLES_CACHE)
            .map_err(CacheError::ConfigError)?;
        let config = config.clone();
        INSTANCE
            .get_or_try_init(move || async move {
                let cache = Self::new(config, store);
                let loaded = cache.preload(ctx).await?;
                info!("战斗缓存初始化完成，{} 场战斗", loaded);
                Ok(cache)
            })
            .await
    }

    /// 从存储预加载全部战斗
    pub async fn preload<L: LockBefore<Battles>>(&self, ctx: &mut LockContext<L>) -> Result<usize> {
        self.battles
            .write(ctx, |locked| async move { self.battles.preload(&locked).await })
            .await
    }

    /// 开始战斗
    ///
    /// 任一方已在进行中的战斗里时不创建，返回 `None`。
    #[instrument(skip(self, ctx), level = "debug")]
    pub async fn start_battle<L: LockBefore<Battles>>(
        &self,
        ctx: &mut LockContext<L>,
        attacker: AccountId,
        defender: AccountId,
    ) -> Result<Option<Battle>> {
        self.battles
            .write(ctx, |mut locked| async move {
                let busy = self.battles.find(&locked, |battle| {
                    battle.is_ongoing() && (battle.involves(attacker) || battle.involves(defender))
                })?;
                if !busy.is_empty() {
                    debug!("{} 或 {} 已在战斗中", attacker, defender);
                    return Ok(None);
                }
                let battle = self
                    .battles
                    .insert_new(&mut locked, Battle::new(attacker, defender))
                    .await?;
                Ok::<_, CacheError>(Some(battle))
            })
            .await
    }

    /// 获取战斗
    pub async fn get_battle_by_id_with_lock<L: LockBefore<Battles>>(
        &self,
        ctx: &mut LockContext<L>,
        id: BattleId,
    ) -> LoadOutcome<Battle> {
        self.battles
            .read(ctx, |locked| async move { self.battles.get(&locked, id).await })
            .await
    }

    /// 写入战斗并标记为脏
    pub async fn update_battle_in_cache<L: LockBefore<Battles>>(
        &self,
        ctx: &mut LockContext<L>,
        battle: Battle,
    ) -> Result<()> {
        self.battles
            .write(ctx, |locked| async move { self.battles.put(&locked, battle) })
            .await
    }

    /// 账户正在进行的战斗
    pub async fn get_ongoing_battle_for_account<L: LockBefore<Battles>>(
        &self,
        ctx: &mut LockContext<L>,
        account: AccountId,
    ) -> Result<Option<Battle>> {
        self.battles
            .read(ctx, |locked| async move {
                let ongoing = self
                    .battles
                    .find(&locked, |battle| battle.is_ongoing() && battle.involves(account))?;
                Ok::<_, CacheError>(ongoing.into_iter().next())
            })
            .await
    }

    /// 记录一次攻击，战斗不存在或已结束时返回 `false`
    pub async fn record_event<L: LockBefore<Battles>>(
        &self,
        ctx: &mut LockContext<L>,
        id: BattleId,
        event: BattleEvent,
    ) -> Result<bool> {
        self.battles
            .write(ctx, |locked| async move {
                let recorded = self
                    .battles
                    .modify(&locked, id, |battle| {
                        if !battle.is_ongoing() {
                            return false;
                        }
                        battle.events.push(event);
                        true
                    })
                    .await?;
                Ok::<_, CacheError>(recorded.unwrap_or(false))
            })
            .await
    }

    /// 结束战斗，返回结束后的战斗
    ///
    /// 战斗不存在或已结束时返回 `None`。
    pub async fn end_battle<L: LockBefore<Battles>>(
        &self,
        ctx: &mut LockContext<L>,
        id: BattleId,
        winner: Option<AccountId>,
    ) -> Result<Option<Battle>> {
        self.battles
            .write(ctx, |locked| async move {
                self.end_battle_under_lock(&locked, id, winner).await
            })
            .await
    }

    /// 在已持有战斗写锁时结束战斗
    pub async fn end_battle_under_lock(
        &self,
        ctx: &LockContext<Battles>,
        id: BattleId,
        winner: Option<AccountId>,
    ) -> Result<Option<Battle>> {
        let ended = self
            .battles
            .modify(ctx, id, |battle| {
                if !battle.is_ongoing() {
                    return None;
                }
                battle.ended_at = Some(Utc::now());
                battle.winner_id = winner;
                Some(battle.clone())
            })
            .await?;
        Ok(ended.flatten())
    }

    /// 结束战斗并向双方投递战斗结果事件
    ///
    /// 先获取消息锁，再获取战斗锁结束战斗；释放战斗锁后在消息锁内投递事件，
    /// 因此战斗结束和结果消息对其他请求同时可见。
    #[instrument(skip(self, ctx, messages), level = "debug")]
    pub async fn finish_battle_and_notify<L: LockBefore<Messages>>(
        &self,
        ctx: &mut LockContext<L>,
        messages: &MessageCache,
        id: BattleId,
        winner: Option<AccountId>,
    ) -> Result<Option<Battle>> {
        messages
            .with_messages_locked(ctx, |mut messages_ctx| async move {
                let ended = self
                    .battles
                    .write(&mut messages_ctx, |locked| async move {
                        self.end_battle_under_lock(&locked, id, winner).await
                    })
                    .await?;
                let Some(battle) = ended else {
                    return Ok(None);
                };

                for participant in [battle.attacker_id, battle.defender_id] {
                    let stats = battle.stats_for(participant);
                    messages
                        .send_message_under_lock(
                            &mut messages_ctx,
                            participant,
                            MessageBody::Event(stats),
                        )
                        .await?;
                }
                debug!("战斗 {} 结束，已通知双方", battle.id);
                Ok::<_, CacheError>(Some(battle))
            })
            .await
    }
}

entity_cache_common!(BattleCache, battles, Battle, Battles, INSTANCE);
