//! Copyright (c) 2025, Kirky.X
//!
//! MIT License
//!
//! 该模块定义了缓存条目及其脏状态。

use serde::Serialize;
use std::time::Instant;

/// 条目状态
///
/// `Absent → Loading → Clean → Dirty → Flushing → Clean | Dirty`。
/// `Absent` 和 `Loading` 不在映射表中体现：加载完成前条目不存在。
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub enum EntryState {
    /// 与存储一致
    Clean,
    /// 有未持久化的修改
    Dirty,
    /// 正在写入存储
    Flushing,
}

/// 缓存条目
#[derive(Debug)]
pub struct CacheEntry<T> {
    value: T,
    state: EntryState,
    /// 每次修改递增，用于发现与保存并发的修改
    version: u64,
    last_write: Instant,
    last_persisted: Option<Instant>,
}

impl<T: Clone> CacheEntry<T> {
    /// 从存储加载的干净条目
    pub(crate) fn clean(value: T) -> Self {
        let now = Instant::now();
        Self {
            value,
            state: EntryState::Clean,
            version: 0,
            last_write: now,
            last_persisted: Some(now),
        }
    }

    /// 尚未持久化的新条目
    pub(crate) fn dirty(value: T) -> Self {
        Self {
            value,
            state: EntryState::Dirty,
            version: 1,
            last_write: Instant::now(),
            last_persisted: None,
        }
    }

    pub fn value(&self) -> &T {
        &self.value
    }

    pub fn state(&self) -> EntryState {
        self.state
    }

    /// 是否有尚未确认持久化的修改
    pub fn is_dirty(&self) -> bool {
        self.state != EntryState::Clean
    }

    pub fn version(&self) -> u64 {
        self.version
    }

    pub fn last_write(&self) -> Instant {
        self.last_write
    }

    pub fn last_persisted(&self) -> Option<Instant> {
        self.last_persisted
    }

    /// 替换值并标记为脏
    pub(crate) fn replace(&mut self, value: T) {
        self.value = value;
        self.mark_dirty();
    }

    /// 原地修改并标记为脏
    pub(crate) fn mutate<R>(&mut self, f: impl FnOnce(&mut T) -> R) -> R {
        let result = f(&mut self.value);
        self.mark_dirty();
        result
    }

    fn mark_dirty(&mut self) {
        self.state = EntryState::Dirty;
        self.version += 1;
        self.last_write = Instant::now();
    }

    /// 开始刷新：仅脏条目返回快照和版本
    pub(crate) fn begin_flush(&mut self) -> Option<(T, u64)> {
        if self.state != EntryState::Dirty {
            return None;
        }
        self.state = EntryState::Flushing;
        Some((self.value.clone(), self.version))
    }

    /// 结束刷新，返回条目是否变为干净
    ///
    /// 保存期间发生的修改会让条目保持为脏，等待下一次刷新。
    pub(crate) fn finish_flush(&mut self, version: u64, saved: bool) -> bool {
        if self.state != EntryState::Flushing {
            return false;
        }
        if saved && self.version == version {
            self.state = EntryState::Clean;
            self.last_persisted = Some(Instant::now());
            true
        } else {
            self.state = EntryState::Dirty;
            false
        }
    }
}
