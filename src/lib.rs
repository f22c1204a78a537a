//! starcache - 游戏服务器的并发安全写回缓存层
//!
//! 位于请求处理器与持久化存储之间，提供：
//!
//! - FIFO 排他锁与多读单写锁
//! - 编译期保证获取顺序的有序锁上下文，跨缓存操作不会死锁
//! - 带脏标记、后台刷新和排空式关闭的通用写回缓存
//! - 账户、世界、消息、战斗四个实体缓存

#![doc(html_root_url = "https://docs.rs/starcache/0.1.0")]

pub use serde;
pub use serde::{Deserialize, Serialize};
pub use tokio;

pub mod cache;
pub mod cli;
pub mod config;
pub mod entity;
pub mod error;
pub mod lock;
pub mod metrics;
pub mod registry;
pub mod storage;
pub mod telemetry;

// Re-export commonly used items
pub use cache::{CacheStats, WriteBackCache};
pub use config::{CacheConfig, Config};
pub use entity::{AccountCache, BattleCache, MessageCache, SummaryOutcome, WorldCache};
pub use error::{CacheError, Result};
pub use lock::LockContext;
pub use registry::{CacheRegistry, Stores};
pub use storage::{EntityStore, LoadOutcome};

/// starcache 版本号
pub const VERSION: &str = env!("CARGO_PKG_VERSION");
