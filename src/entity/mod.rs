//! Copyright (c) 2025, Kirky.X
//!
//! MIT License
//!
//! 游戏实体及其缓存。
//!
//! 每个实体缓存在 [`WriteBackCache`](crate::cache::WriteBackCache) 之上提供领域操作，
//! 并拥有一个进程级默认实例，通过 `initialize` 创建、`reset_instance` 丢弃。

/// 定义由存储分配的实体ID
macro_rules! entity_id {
    ($(#[$meta:meta])* $name:ident) => {
        $(#[$meta])*
        #[derive(
            Debug,
            Clone,
            Copy,
            Default,
            PartialEq,
            Eq,
            Hash,
            PartialOrd,
            Ord,
            serde::Serialize,
            serde::Deserialize,
        )]
        #[serde(transparent)]
        pub struct $name(pub u64);

        impl From<u64> for $name {
            fn from(raw: u64) -> Self {
                Self(raw)
            }
        }

        impl std::fmt::Display for $name {
            fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
                write!(f, "{}", self.0)
            }
        }
    };
}

/// 各实体缓存共有的实例管理与持久化操作
macro_rules! entity_cache_common {
    ($cache:ident, $field:ident, $entity:ty, $level:ty, $slot:ident) => {
        impl $cache {
            /// 获取默认实例，未初始化时返回 [`CacheError::NotInitialized`](crate::error::CacheError::NotInitialized)
            pub fn get_instance() -> $crate::error::Result<::std::sync::Arc<Self>> {
                $slot.get()
            }

            /// 默认实例是否已初始化
            pub fn is_initialized() -> bool {
                $slot.is_initialized()
            }

            /// 丢弃默认实例，不刷新脏条目
            ///
            /// 需要保留数据时先调用 `shutdown`。
            pub fn reset_instance() {
                if $slot.reset().is_some() {
                    ::tracing::debug!("{} 默认实例已重置", stringify!($cache));
                }
            }

            /// 底层写回缓存
            pub fn cache(&self) -> &$crate::cache::WriteBackCache<$entity, $level> {
                &self.$field
            }

            /// 缓存统计
            pub fn get_stats(&self) -> $crate::cache::CacheStats {
                self.$field.stats()
            }

            /// 立即写回所有脏条目，返回写回数量
            pub async fn flush_to_database<L: $crate::lock::LockBefore<$crate::lock::Storage>>(
                &self,
                ctx: &mut $crate::lock::LockContext<L>,
            ) -> $crate::error::Result<usize> {
                self.$field.flush_to_database(ctx).await
            }

            /// 等待此前触发的所有写入完成
            pub async fn wait_for_pending_writes<L: $crate::lock::LockBefore<$crate::lock::Storage>>(
                &self,
                ctx: &mut $crate::lock::LockContext<L>,
            ) {
                self.$field.wait_for_pending_writes(ctx).await
            }

            /// 排空式关闭，重复调用是无操作
            pub async fn shutdown<L: $crate::lock::LockBefore<$level>>(
                &self,
                ctx: &mut $crate::lock::LockContext<L>,
            ) -> $crate::error::Result<()> {
                self.$field.shutdown(ctx).await
            }
        }
    };
}

pub mod account;
pub mod battle;
pub mod message;
pub mod world;

pub use account::{Account, AccountCache, AccountId};
pub use battle::{Battle, BattleCache, BattleEvent, BattleId};
pub use message::{EventStats, Message, MessageBody, MessageCache, MessageId, SummaryOutcome};
pub use world::{ObjectId, ObjectKind, SpaceObject, WorldCache};
