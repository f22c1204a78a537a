//! Copyright (c) 2025, Kirky.X
//!
//! MIT License

use crate::error::{CacheError, Result};
use crate::lock::LockStats;
use serde::Serialize;

/// 缓存统计快照
#[derive(Debug, Clone, Serialize)]
pub struct CacheStats {
    /// 缓存名称
    pub cache: &'static str,
    /// 条目数
    pub cache_size: usize,
    /// 命中次数
    pub hits: u64,
    /// 未命中次数
    pub misses: u64,
    /// 尚未持久化的条目数
    pub dirty_count: usize,
    /// 资源锁状态
    pub lock: LockStats,
    /// 等待存储锁的写入数
    pub storage_queue_depth: usize,
}

/// 一次刷新的结果
#[derive(Debug, Default)]
pub struct FlushReport {
    /// 成功保存的条目数
    pub persisted: usize,
    /// 保存失败的条目（ID, 错误）
    pub failures: Vec<(String, CacheError)>,
}

impl FlushReport {
    pub fn is_clean(&self) -> bool {
        self.failures.is_empty()
    }

    /// 有失败时转换为持久化错误
    pub fn into_result(self, cache: &str) -> Result<usize> {
        match self.failures.first() {
            None => Ok(self.persisted),
            Some((id, cause)) => Err(CacheError::Persistence {
                cache: cache.to_string(),
                failed: self.failures.len(),
                reason: format!("{}: {}", id, cause),
            }),
        }
    }
}
