//! Copyright (c) 2025, Kirky.X
//!
//! MIT License
//!
//! 玩家消息及消息缓存。
//!
//! 战斗等事件以事件消息的形式投递给玩家。汇总操作把收件人所有未读事件消息的
//! 统计折叠进该收件人唯一的汇总消息，并将被汇总的消息原地标记为已读（不删除）。
//! 没有未读事件时返回 [`SummaryOutcome::NothingToSummarize`]，不会重复累加。

use crate::cache::{InstanceSlot, WriteBackCache};
use crate::config::CacheConfig;
use crate::entity::account::{AccountCache, AccountId, ACCOUNTS_CACHE};
use crate::error::{CacheError, Result};
use crate::lock::{Accounts, LockBefore, LockContext, Messages};
use crate::storage::{Entity, MessageStore};
use chrono::{DateTime, Utc};
use dashmap::DashSet;
use lazy_static::lazy_static;
use serde::{Deserialize, Serialize};
use std::future::Future;
use std::sync::Arc;
use tracing::{debug, info, instrument};

pub const MESSAGES_CACHE: &str = "messages";

entity_id!(
    /// 消息ID
    MessageId
);

/// 事件统计
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct EventStats {
    /// 事件数
    pub events: u32,
    pub victories: u32,
    pub defeats: u32,
    pub damage_dealt: f64,
    pub damage_received: f64,
}

impl EventStats {
    /// 单个事件的统计
    pub fn single() -> Self {
        Self {
            events: 1,
            ..Default::default()
        }
    }

    /// 累加另一份统计
    pub fn absorb(&mut self, other: &EventStats) {
        self.events += other.events;
        self.victories += other.victories;
        self.defeats += other.defeats;
        self.damage_dealt += other.damage_dealt;
        self.damage_received += other.damage_received;
    }
}

/// 消息内容
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", content = "data", rename_all = "snake_case")]
pub enum MessageBody {
    /// 普通文本
    Text(String),
    /// 单个事件
    Event(EventStats),
    /// 已汇总事件的累计统计
    Summary(EventStats),
}

/// 玩家消息
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Message {
    pub id: MessageId,
    pub recipient_id: AccountId,
    pub created_at: DateTime<Utc>,
    pub is_read: bool,
    pub body: MessageBody,
}

impl Message {
    /// 创建尚未分配ID的未读消息
    pub fn new(recipient_id: AccountId, body: MessageBody) -> Self {
        Self {
            id: MessageId::default(),
            recipient_id,
            created_at: Utc::now(),
            is_read: false,
            body,
        }
    }

    pub fn text(recipient_id: AccountId, text: impl Into<String>) -> Self {
        Self::new(recipient_id, MessageBody::Text(text.into()))
    }

    /// 未读的事件消息的统计
    fn pending_event(&self) -> Option<&EventStats> {
        match &self.body {
            MessageBody::Event(stats) if !self.is_read => Some(stats),
            _ => None,
        }
    }

    pub fn is_summary(&self) -> bool {
        matches!(self.body, MessageBody::Summary(_))
    }

    /// 把一批统计折叠进汇总消息并重新置为未读，返回新的累计值
    ///
    /// 不是汇总消息时不做修改，返回 `None`。
    fn fold_summary(&mut self, batch: &EventStats) -> Option<EventStats> {
        let MessageBody::Summary(totals) = &mut self.body else {
            return None;
        };
        totals.absorb(batch);
        let totals = totals.clone();
        self.is_read = false;
        self.created_at = Utc::now();
        Some(totals)
    }
}

impl Entity for Message {
    type Id = MessageId;

    fn id(&self) -> MessageId {
        self.id
    }

    fn set_id(&mut self, id: MessageId) {
        self.id = id;
    }
}

/// 汇总结果
#[derive(Debug, Clone, PartialEq)]
pub enum SummaryOutcome {
    /// 没有未读事件消息，状态未改变
    NothingToSummarize,
    /// 本次汇总了 `consumed` 条消息
    Summarized {
        summary_id: MessageId,
        consumed: usize,
        /// 汇总消息中的累计统计
        totals: EventStats,
    },
}

lazy_static! {
    static ref INSTANCE: InstanceSlot<MessageCache> = InstanceSlot::new(MESSAGES_CACHE);
}

/// 消息缓存
///
/// 按收件人懒加载：第一次访问某个收件人的消息时从存储读取其全部消息。
/// 收件人的任一消息被驱逐后，下次访问会重新加载。
pub struct MessageCache {
    messages: WriteBackCache<Message, Messages>,
    store: Arc<dyn MessageStore>,
    /// 已从存储加载过的收件人
    loaded: Arc<DashSet<AccountId>>,
}

impl MessageCache {
    /// 创建独立实例（不注册为默认实例）
    pub fn new(config: CacheConfig, store: Arc<dyn MessageStore>) -> Self {
        let loaded = Arc::new(DashSet::new());
        let forget = loaded.clone();
        let messages = WriteBackCache::with_eviction_listener(
            MESSAGES_CACHE,
            store.clone().as_entity_store(),
            config,
            move |message: &Message| {
                forget.remove(&message.recipient_id);
            },
        );
        Self {
            messages,
            store,
            loaded,
        }
    }

    /// 初始化默认实例
    ///
    /// 幂等：已初始化时直接返回现有实例。
    #[instrument(skip_all, level = "info")]
    pub async fn initialize<L: LockBefore<Messages>>(
        _ctx: &mut LockContext<L>,
        config: &CacheConfig,
        store: Arc<dyn MessageStore>,
    ) -> Result<Arc<Self>> {
        config
            .validate(MESSAGES_CACHE)
            .map_err(CacheError::ConfigError)?;
        let config = config.clone();
        INSTANCE
            .get_or_try_init(move || async move {
                info!("初始化消息缓存");
                Ok(Self::new(config, store))
            })
            .await
    }

    /// 确保收件人的消息已在缓存中
    async fn ensure_loaded(&self, ctx: &LockContext<Messages>, recipient: AccountId) -> Result<()> {
        if self.loaded.contains(&recipient) {
            return Ok(());
        }
        let rows = self.store.load_for_recipient(recipient).await?;
        let added = self.messages.prime(ctx, rows)?;
        self.loaded.insert(recipient);
        debug!("收件人 {} 加载了 {} 条消息", recipient, added);
        Ok(())
    }

    /// 收件人的全部消息，按创建时间排序
    async fn messages_of(
        &self,
        ctx: &LockContext<Messages>,
        recipient: AccountId,
    ) -> Result<Vec<Message>> {
        self.ensure_loaded(ctx, recipient).await?;
        let mut found = self
            .messages
            .find(ctx, |message| message.recipient_id == recipient)?;
        found.sort_by(|a, b| a.created_at.cmp(&b.created_at).then(a.id.cmp(&b.id)));
        Ok(found)
    }

    /// 投递消息
    #[instrument(skip(self, ctx, body), level = "debug")]
    pub async fn send_message<L: LockBefore<Messages>>(
        &self,
        ctx: &mut LockContext<L>,
        recipient: AccountId,
        body: MessageBody,
    ) -> Result<Message> {
        self.messages
            .write(ctx, |mut locked| async move {
                self.send_message_under_lock(&mut locked, recipient, body).await
            })
            .await
    }

    /// 在已持有消息写锁时投递消息
    pub async fn send_message_under_lock(
        &self,
        ctx: &mut LockContext<Messages>,
        recipient: AccountId,
        body: MessageBody,
    ) -> Result<Message> {
        self.messages
            .insert_new(ctx, Message::new(recipient, body))
            .await
    }

    /// 收件人的全部消息
    pub async fn get_messages_for_user<L: LockBefore<Messages>>(
        &self,
        ctx: &mut LockContext<L>,
        recipient: AccountId,
    ) -> Result<Vec<Message>> {
        self.messages
            .read(ctx, |locked| async move { self.messages_of(&locked, recipient).await })
            .await
    }

    /// 收件人的未读消息
    pub async fn get_unread_messages<L: LockBefore<Messages>>(
        &self,
        ctx: &mut LockContext<L>,
        recipient: AccountId,
    ) -> Result<Vec<Message>> {
        let all = self.get_messages_for_user(ctx, recipient).await?;
        Ok(all.into_iter().filter(|message| !message.is_read).collect())
    }

    /// 把收件人的全部未读消息标记为已读，返回标记数量
    pub async fn mark_as_read<L: LockBefore<Messages>>(
        &self,
        ctx: &mut LockContext<L>,
        recipient: AccountId,
    ) -> Result<usize> {
        self.messages
            .write(ctx, |locked| async move {
                let unread: Vec<MessageId> = self
                    .messages_of(&locked, recipient)
                    .await?
                    .into_iter()
                    .filter(|message| !message.is_read)
                    .map(|message| message.id)
                    .collect();
                for id in &unread {
                    self.messages
                        .modify(&locked, *id, |message| message.is_read = true)
                        .await?;
                }
                Ok::<_, CacheError>(unread.len())
            })
            .await
    }

    /// 汇总收件人的未读事件消息
    #[instrument(skip(self, ctx), level = "debug")]
    pub async fn summarize_messages<L: LockBefore<Messages>>(
        &self,
        ctx: &mut LockContext<L>,
        recipient: AccountId,
    ) -> Result<SummaryOutcome> {
        self.messages
            .write(ctx, |mut locked| async move {
                self.summarize_under_lock(&mut locked, recipient).await
            })
            .await
    }

    /// 为已锁定的账户汇总消息
    ///
    /// 调用方已持有账户锁，账户不存在时返回 [`CacheError::NotFound`]。
    pub async fn summarize_for_account(
        &self,
        ctx: &mut LockContext<Accounts>,
        accounts: &AccountCache,
        account_id: AccountId,
    ) -> Result<SummaryOutcome> {
        if accounts
            .get_account_under_lock(ctx, account_id)
            .await
            .into_result()?
            .is_none()
        {
            return Err(CacheError::NotFound {
                cache: ACCOUNTS_CACHE.to_string(),
                id: account_id.to_string(),
            });
        }
        self.summarize_messages(ctx, account_id).await
    }

    /// 在已持有消息写锁时汇总
    pub async fn summarize_under_lock(
        &self,
        ctx: &mut LockContext<Messages>,
        recipient: AccountId,
    ) -> Result<SummaryOutcome> {
        let mine = self.messages_of(ctx, recipient).await?;

        let mut batch = EventStats::default();
        let mut consumed = Vec::new();
        for message in &mine {
            if let Some(stats) = message.pending_event() {
                batch.absorb(stats);
                consumed.push(message.id);
            }
        }
        if consumed.is_empty() {
            debug!("收件人 {} 没有需要汇总的消息", recipient);
            return Ok(SummaryOutcome::NothingToSummarize);
        }

        let existing = mine.iter().find(|message| message.is_summary()).map(|m| m.id);
        let folded = match existing {
            Some(summary_id) => self
                .messages
                .modify(ctx, summary_id, |summary| summary.fold_summary(&batch))
                .await?
                .flatten()
                .map(|totals| (summary_id, totals)),
            None => None,
        };
        let (summary_id, totals) = match folded {
            Some(folded) => folded,
            None => {
                let summary = Message::new(recipient, MessageBody::Summary(batch.clone()));
                let created = self.messages.insert_new(ctx, summary).await?;
                (created.id, batch)
            }
        };

        for id in &consumed {
            self.messages
                .modify(ctx, *id, |message| message.is_read = true)
                .await?;
        }

        debug!(
            "收件人 {} 汇总了 {} 条消息，累计 {} 个事件",
            recipient,
            consumed.len(),
            totals.events
        );
        Ok(SummaryOutcome::Summarized {
            summary_id,
            consumed: consumed.len(),
            totals,
        })
    }

    /// 以写模式持有消息锁执行 `work`
    pub async fn with_messages_locked<L, F, Fut, R>(&self, ctx: &mut LockContext<L>, work: F) -> R
    where
        L: LockBefore<Messages>,
        F: FnOnce(LockContext<Messages>) -> Fut,
        Fut: Future<Output = R>,
    {
        self.messages.write(ctx, work).await
    }
}

entity_cache_common!(MessageCache, messages, Message, Messages, INSTANCE);
