//! Copyright (c) 2025, Kirky.X
//!
//! MIT License
//!
//! 玩家账户及账户缓存。

use crate::cache::{InstanceSlot, WriteBackCache};
use crate::config::CacheConfig;
use crate::entity::world::ObjectId;
use crate::error::{CacheError, Result};
use crate::lock::{Accounts, LockBefore, LockContext};
use crate::storage::{Entity, EntityStore, LoadOutcome};
use chrono::{DateTime, Utc};
use lazy_static::lazy_static;
use serde::{Deserialize, Serialize};
use std::future::Future;
use std::sync::Arc;
use tracing::{debug, info, instrument};

pub const ACCOUNTS_CACHE: &str = "accounts";

entity_id!(
    /// 账户ID
    AccountId
);

/// 玩家账户
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Account {
    pub id: AccountId,
    pub username: String,
    /// 铁矿存量
    pub iron: f64,
    pub xp: u64,
    /// 玩家飞船在世界中的对象ID
    pub ship_id: Option<ObjectId>,
    pub created_at: DateTime<Utc>,
    pub last_updated: DateTime<Utc>,
}

impl Account {
    /// 创建尚未分配ID的账户
    pub fn new(username: impl Into<String>) -> Self {
        let now = Utc::now();
        Self {
            id: AccountId::default(),
            username: username.into(),
            iron: 0.0,
            xp: 0,
            ship_id: None,
            created_at: now,
            last_updated: now,
        }
    }

    fn touch(&mut self) {
        self.last_updated = Utc::now();
    }
}

impl Entity for Account {
    type Id = AccountId;

    fn id(&self) -> AccountId {
        self.id
    }

    fn set_id(&mut self, id: AccountId) {
        self.id = id;
    }
}

lazy_static! {
    static ref INSTANCE: InstanceSlot<AccountCache> = InstanceSlot::new(ACCOUNTS_CACHE);
}

/// 账户缓存
///
/// 所有操作通过有序锁上下文获取 `Accounts` 锁；账户位于锁顺序的最前端，
/// 持有账户锁的调用方可以继续获取其他任何缓存的锁。
pub struct AccountCache {
    accounts: WriteBackCache<Account, Accounts>,
}

impl AccountCache {
    /// 创建独立实例（不注册为默认实例）
    pub fn new(config: CacheConfig, store: Arc<dyn EntityStore<Entity = Account>>) -> Self {
        Self {
            accounts: WriteBackCache::new(ACCOUNTS_CACHE, store, config),
        }
    }

    /// 初始化默认实例
    ///
    /// 幂等：已初始化时直接返回现有实例，忽略新的配置和存储。
    #[instrument(skip_all, level = "info")]
    pub async fn initialize<L: LockBefore<Accounts>>(
        _ctx: &mut LockContext<L>,
        config: &CacheConfig,
        store: Arc<dyn EntityStore<Entity = Account>>,
    ) -> Result<Arc<Self>> {
        config
            .validate(ACCOUNTS_CACHE)
            .map_err(CacheError::ConfigError)?;
        let config = config.clone();
        INSTANCE
            .get_or_try_init(move || async move {
                info!("初始化账户缓存");
                Ok(Self::new(config, store))
            })
            .await
    }

    /// 获取账户
    #[instrument(skip(self, ctx), level = "debug")]
    pub async fn get_account_by_id_with_lock<L: LockBefore<Accounts>>(
        &self,
        ctx: &mut LockContext<L>,
        id: AccountId,
    ) -> LoadOutcome<Account> {
        self.accounts
            .read(ctx, |locked| async move { self.accounts.get(&locked, id).await })
            .await
    }

    /// 写入账户并标记为脏
    #[instrument(skip(self, ctx, account), level = "debug", fields(id = %account.id))]
    pub async fn update_account_in_cache<L: LockBefore<Accounts>>(
        &self,
        ctx: &mut LockContext<L>,
        account: Account,
    ) -> Result<()> {
        self.accounts
            .write(ctx, |locked| async move { self.accounts.put(&locked, account) })
            .await
    }

    /// 创建账户，ID由存储分配
    #[instrument(skip(self, ctx), level = "debug")]
    pub async fn create_account<L: LockBefore<Accounts>>(
        &self,
        ctx: &mut LockContext<L>,
        username: &str,
    ) -> Result<Account> {
        let account = Account::new(username);
        let created = self
            .accounts
            .write(ctx, |mut locked| async move {
                self.accounts.insert_new(&mut locked, account).await
            })
            .await?;
        debug!("账户 {} 已创建: {}", created.id, created.username);
        Ok(created)
    }

    /// 增加铁矿，返回新的存量；账户不存在时返回 `None`
    pub async fn credit_iron<L: LockBefore<Accounts>>(
        &self,
        ctx: &mut LockContext<L>,
        id: AccountId,
        amount: f64,
    ) -> Result<Option<f64>> {
        self.accounts
            .write(ctx, |locked| async move {
                self.modify_account_under_lock(&locked, id, |account| {
                    account.iron += amount;
                    account.iron
                })
                .await
            })
            .await
    }

    /// 在已持有账户锁时读取账户
    pub async fn get_account_under_lock(
        &self,
        ctx: &LockContext<Accounts>,
        id: AccountId,
    ) -> LoadOutcome<Account> {
        self.accounts.get(ctx, id).await
    }

    /// 在已持有账户写锁时写入账户
    pub fn update_account_under_lock(
        &self,
        ctx: &LockContext<Accounts>,
        account: Account,
    ) -> Result<()> {
        self.accounts.put(ctx, account)
    }

    /// 在已持有账户写锁时原地修改账户
    pub async fn modify_account_under_lock<R, F>(
        &self,
        ctx: &LockContext<Accounts>,
        id: AccountId,
        f: F,
    ) -> Result<Option<R>>
    where
        F: FnOnce(&mut Account) -> R,
    {
        self.accounts
            .modify(ctx, id, |account| {
                let result = f(account);
                account.touch();
                result
            })
            .await
    }

    /// 以写模式持有账户锁执行 `work`
    ///
    /// 跨缓存操作的入口：`work` 收到的上下文可以继续获取世界、消息和战斗的锁。
    pub async fn with_accounts_locked<L, F, Fut, R>(&self, ctx: &mut LockContext<L>, work: F) -> R
    where
        L: LockBefore<Accounts>,
        F: FnOnce(LockContext<Accounts>) -> Fut,
        Fut: Future<Output = R>,
    {
        self.accounts.write(ctx, work).await
    }
}

entity_cache_common!(AccountCache, accounts, Account, Accounts, INSTANCE);
