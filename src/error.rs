//! Copyright (c) 2025, Kirky.X
//!
//! MIT License
//!
//! 该模块定义了缓存层的错误类型和处理机制。

use thiserror::Error;

/// 缓存层错误类型枚举
///
/// 锁顺序违规不在此列：同一上下文链上它在编译期由 [`crate::lock::LockContext`]
/// 拒绝，另建根上下文的逆序获取由调试断言发现。
#[derive(Error, Debug)]
pub enum CacheError {
    /// 持久化失败（刷新时有条目未能写入存储）
    #[error("Persistence failure in {cache} cache: {failed} entries not saved ({reason})")]
    Persistence {
        /// 缓存名称
        cache: String,
        /// 未能保存的条目数
        failed: usize,
        /// 第一个失败原因
        reason: String,
    },

    /// 存储后端返回的原始错误
    #[error("Storage error: {0}")]
    Storage(String),

    /// 缓存尚未初始化
    #[error("{0} cache is not initialized")]
    NotInitialized(String),

    /// 缓存已关闭，不再接受写入
    #[error("{0} cache has been shut down")]
    ShutDown(String),

    /// 跨缓存操作所需的实体不存在
    #[error("{cache} entity {id} not found")]
    NotFound {
        /// 缓存名称
        cache: String,
        /// 实体ID
        id: String,
    },

    /// 出示的锁上下文所属锁区已经结束
    #[error("{0} lock is no longer held by this context")]
    LockNotHeld(String),

    /// 关闭一组缓存时有缓存失败
    #[error("Shutdown error: {0}")]
    ShutdownError(String),

    /// 配置错误
    #[error("Configuration error: {0}")]
    ConfigError(String),

    /// IO错误
    #[error("IO error: {0}")]
    IoError(#[from] std::io::Error),

    /// TOML解析错误
    #[error("TOML error: {0}")]
    TomlError(#[from] toml::de::Error),
}

impl CacheError {
    /// 是否为持久化相关错误（API 层应映射为 5xx）
    pub fn is_persistence(&self) -> bool {
        matches!(
            self,
            CacheError::Persistence { .. } | CacheError::Storage(_) | CacheError::ShutdownError(_)
        )
    }
}

/// 缓存操作结果类型别名
pub type Result<T> = std::result::Result<T, CacheError>;
