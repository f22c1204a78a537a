//! Copyright (c) 2025, Kirky.X
//!
//! MIT License
//!
//! 该模块定义了后台刷新任务，按固定间隔将脏条目写回存储。

use std::future::Future;
use std::time::Duration;
use tokio::task::JoinHandle;
use tokio::time::{interval_at, Instant, MissedTickBehavior};
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

/// 后台刷新任务句柄
///
/// 由缓存初始化时创建，`stop` 会取消任务并等待正在进行的刷新结束。
#[derive(Debug)]
pub struct FlushTask {
    name: &'static str,
    cancel: CancellationToken,
    handle: JoinHandle<()>,
}

impl FlushTask {
    /// 启动刷新任务
    ///
    /// # 参数
    ///
    /// * `name` - 缓存名称
    /// * `period` - 刷新间隔
    /// * `cancel` - 取消令牌
    /// * `tick` - 每个周期执行的刷新
    pub fn spawn<F, Fut>(
        name: &'static str,
        period: Duration,
        cancel: CancellationToken,
        tick: F,
    ) -> Self
    where
        F: Fn() -> Fut + Send + 'static,
        Fut: Future<Output = ()> + Send + 'static,
    {
        let token = cancel.clone();
        let handle = tokio::spawn(async move {
            let mut interval = interval_at(Instant::now() + period, period);
            interval.set_missed_tick_behavior(MissedTickBehavior::Delay);
            loop {
                tokio::select! {
                    biased;
                    _ = token.cancelled() => {
                        debug!("{} 刷新任务收到关闭信号", name);
                        break;
                    }
                    _ = interval.tick() => {
                        tick().await;
                    }
                }
            }
        });
        info!("{} 后台刷新已启动，间隔 {}ms", name, period.as_millis());
        Self {
            name,
            cancel,
            handle,
        }
    }

    /// 停止任务并等待正在进行的刷新完成
    pub async fn stop(self) {
        self.cancel.cancel();
        if let Err(e) = self.handle.await {
            warn!("{} 刷新任务异常退出: {}", self.name, e);
        }
    }
}
