//! Copyright (c) 2025, Kirky.X
//!
//! MIT License
//!
//! 该模块定义了通用写回缓存及其配套组件。

pub mod entry;
pub mod flusher;
pub mod singleton;
pub mod stats;
pub mod write_back;

pub use entry::{CacheEntry, EntryState};
pub use flusher::FlushTask;
pub use singleton::InstanceSlot;
pub use stats::{CacheStats, FlushReport};
pub use write_back::{EvictionListener, WriteBackCache};
