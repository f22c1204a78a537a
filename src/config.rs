//! Copyright (c) 2025, Kirky.X
//!
//! MIT License
//!
//! 该模块定义了缓存层的配置结构和解析逻辑。

use crate::error::{CacheError, Result};
use serde::{Deserialize, Serialize};
use std::path::Path;
use std::time::Duration;
use tracing::warn;

pub const CONFIG_VERSION: u32 = 1;

/// 最小持久化间隔（毫秒）
pub const MIN_PERSISTENCE_INTERVAL_MS: u64 = 10;
/// 最大持久化间隔（毫秒）
pub const MAX_PERSISTENCE_INTERVAL_MS: u64 = 3_600_000;

/// 单个实体缓存的配置
#[derive(Debug, Deserialize, Serialize, Clone, PartialEq, Eq)]
#[serde(default)]
pub struct CacheConfig {
    /// 后台刷新间隔（毫秒）
    pub persistence_interval_ms: u64,
    /// 是否启用后台自动持久化，测试中关闭以获得确定的写入时机
    pub enable_auto_persistence: bool,
    /// 每次后台刷新后是否输出统计日志
    pub log_stats: bool,
}

impl Default for CacheConfig {
    fn default() -> Self {
        Self {
            persistence_interval_ms: 30_000,
            enable_auto_persistence: true,
            log_stats: false,
        }
    }
}

impl CacheConfig {
    /// 关闭自动持久化的配置，写入只在显式刷新和关闭时发生
    pub fn manual() -> Self {
        Self {
            enable_auto_persistence: false,
            ..Default::default()
        }
    }

    /// 以给定间隔自动持久化的配置
    pub fn with_interval(interval_ms: u64) -> Self {
        Self {
            persistence_interval_ms: interval_ms,
            ..Default::default()
        }
    }

    /// 刷新间隔
    pub fn persistence_interval(&self) -> Duration {
        Duration::from_millis(self.persistence_interval_ms)
    }

    /// 把启用时的刷新间隔限制在允许范围内
    pub fn clamped(&self, name: &str) -> Self {
        let mut config = self.clone();
        if self.enable_auto_persistence {
            config.persistence_interval_ms = self
                .persistence_interval_ms
                .clamp(MIN_PERSISTENCE_INTERVAL_MS, MAX_PERSISTENCE_INTERVAL_MS);
            if config.persistence_interval_ms != self.persistence_interval_ms {
                warn!(
                    "Cache '{}' persistence_interval_ms {} out of range, using {}",
                    name, self.persistence_interval_ms, config.persistence_interval_ms
                );
            }
        }
        config
    }

    /// 验证配置
    pub fn validate(&self, name: &str) -> std::result::Result<(), String> {
        if self.enable_auto_persistence
            && !(MIN_PERSISTENCE_INTERVAL_MS..=MAX_PERSISTENCE_INTERVAL_MS)
                .contains(&self.persistence_interval_ms)
        {
            return Err(format!(
                "Cache '{}' persistence_interval_ms must be between {} and {} ms",
                name, MIN_PERSISTENCE_INTERVAL_MS, MAX_PERSISTENCE_INTERVAL_MS
            ));
        }
        Ok(())
    }
}

/// 全部实体缓存的配置
#[derive(Debug, Deserialize, Serialize, Clone, Default, PartialEq, Eq)]
#[serde(default)]
pub struct Config {
    #[serde(skip_serializing_if = "Option::is_none")]
    pub config_version: Option<u32>,
    /// 账户缓存
    pub accounts: CacheConfig,
    /// 世界对象缓存
    pub world: CacheConfig,
    /// 消息缓存
    pub messages: CacheConfig,
    /// 战斗缓存
    pub battles: CacheConfig,
}

impl Config {
    /// 所有缓存都关闭自动持久化的配置
    pub fn manual() -> Self {
        Self {
            config_version: Some(CONFIG_VERSION),
            accounts: CacheConfig::manual(),
            world: CacheConfig::manual(),
            messages: CacheConfig::manual(),
            battles: CacheConfig::manual(),
        }
    }

    /// 从TOML字符串解析并验证
    pub fn from_toml_str(content: &str) -> Result<Self> {
        let config: Config = toml::from_str(content)?;
        config.validate().map_err(CacheError::ConfigError)?;
        Ok(config)
    }

    /// 从TOML文件加载并验证
    pub fn from_file(path: impl AsRef<Path>) -> Result<Self> {
        let content = std::fs::read_to_string(path)?;
        Self::from_toml_str(&content)
    }

    /// 验证配置
    pub fn validate(&self) -> std::result::Result<(), String> {
        if let Some(version) = self.config_version {
            if version > CONFIG_VERSION {
                return Err(format!(
                    "Configuration version {} is not supported. Current version is {}.",
                    version, CONFIG_VERSION
                ));
            }
        }

        self.accounts.validate("accounts")?;
        self.world.validate("world")?;
        self.messages.validate("messages")?;
        self.battles.validate("battles")?;
        Ok(())
    }
}
