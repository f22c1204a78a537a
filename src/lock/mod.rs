//! Copyright (c) 2025, Kirky.X
//!
//! MIT License
//!
//! 该模块定义了缓存层的锁原语：排他锁、多读单写锁和有序锁上下文。

pub mod exclusive;
pub mod order;
pub mod rw;

pub use exclusive::ExclusiveLock;
pub use order::{
    Accounts, Battles, LockBefore, LockContext, LockLevel, LockMode, Messages, ResourceLock,
    Storage, Unlocked, World,
};
pub use rw::{LockStats, ReadWriteLock};
