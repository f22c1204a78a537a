//! Copyright (c) 2025, Kirky.X
//!
//! MIT License
//!
//! 该模块定义了日志输出的初始化。

use tracing_subscriber::{fmt, layer::SubscriberExt, util::SubscriberInitExt, EnvFilter, Registry};

/// 初始化全局 tracing subscriber
///
/// 此函数应该在应用程序启动时调用一次。`RUST_LOG` 优先于 `default_filter`。
/// 已有全局 subscriber 时不做任何修改，返回 `false`。
///
/// # 参数
///
/// * `default_filter` - 未设置 `RUST_LOG` 时使用的过滤规则，例如 `"starcache=info"`
pub fn init_tracing(default_filter: &str) -> bool {
    let filter =
        EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(default_filter));

    Registry::default()
        .with(filter)
        .with(fmt::layer().with_target(false))
        .try_init()
        .is_ok()
}
