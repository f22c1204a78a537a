//! Copyright (c) 2025, Kirky.X
//!
//! MIT License
//!
//! 该模块定义了缓存层的指标收集和监控功能。

use lazy_static::lazy_static;
use std::collections::HashMap;
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};
use tracing::{span, Level};

/// 指标收集器
///
/// 用于收集和存储缓存层的各种运行时指标
#[derive(Clone, Debug, Default)]
pub struct Metrics {
    /// 请求总数统计
    /// key: "cache:op:result"
    pub requests_total: Arc<Mutex<HashMap<String, u64>>>,
    /// 刷新耗时
    /// key: cache -> (total_duration_secs, count)
    pub flush_duration: Arc<Mutex<HashMap<String, (f64, u64)>>>,
    /// 已持久化的条目总数
    pub persisted_total: Arc<Mutex<HashMap<String, u64>>>,
    /// 持久化失败总数
    pub persistence_failures: Arc<Mutex<HashMap<String, u64>>>,
    /// 当前脏条目数
    pub dirty_entries: Arc<Mutex<HashMap<String, usize>>>,
}

lazy_static! {
    /// 全局指标实例
    pub static ref GLOBAL_METRICS: Metrics = Metrics::default();
}

fn locked<T>(mutex: &Mutex<T>) -> MutexGuard<'_, T> {
    mutex.lock().unwrap_or_else(PoisonError::into_inner)
}

impl Metrics {
    /// 记录请求指标
    ///
    /// # 参数
    ///
    /// * `cache` - 缓存名称
    /// * `op` - 操作类型（get/put/modify/remove）
    /// * `result` - 操作结果（hit/miss/error/ok）
    pub fn record_request(&self, cache: &str, op: &str, result: &str) {
        let span = span!(Level::TRACE, "cache_request", cache, op, result);
        let _enter = span.enter();
        let key = format!("{}:{}:{}", cache, op, result);
        *locked(&self.requests_total).entry(key).or_insert(0) += 1;
    }

    /// 记录一次刷新
    pub fn record_flush(&self, cache: &str, duration_secs: f64, persisted: usize, failed: usize) {
        {
            let mut map = locked(&self.flush_duration);
            let entry = map.entry(cache.to_string()).or_insert((0.0, 0));
            entry.0 += duration_secs;
            entry.1 += 1;
        }
        *locked(&self.persisted_total)
            .entry(cache.to_string())
            .or_insert(0) += persisted as u64;
        if failed > 0 {
            *locked(&self.persistence_failures)
                .entry(cache.to_string())
                .or_insert(0) += failed as u64;
        }
    }

    /// 设置脏条目数
    pub fn set_dirty_entries(&self, cache: &str, count: usize) {
        locked(&self.dirty_entries).insert(cache.to_string(), count);
    }

    /// 读取请求计数
    pub fn request_count(&self, cache: &str, op: &str, result: &str) -> u64 {
        let key = format!("{}:{}:{}", cache, op, result);
        locked(&self.requests_total).get(&key).copied().unwrap_or(0)
    }
}

/// 获取指标字符串
///
/// 将所有指标格式化为 Prometheus 文本格式
pub fn get_metrics_string() -> String {
    let metrics = &GLOBAL_METRICS;
    let reqs = locked(&metrics.requests_total);
    let dur = locked(&metrics.flush_duration);
    let persisted = locked(&metrics.persisted_total);
    let failures = locked(&metrics.persistence_failures);
    let dirty = locked(&metrics.dirty_entries);

    let mut output = String::new();
    for (k, v) in reqs.iter() {
        let parts: Vec<&str> = k.split(':').collect();
        if parts.len() == 3 {
            output.push_str(&format!(
                "cache_requests_total{{cache=\"{}\", op=\"{}\", result=\"{}\"}} {}\n",
                parts[0], parts[1], parts[2], v
            ));
        }
    }
    for (k, (total, count)) in dur.iter() {
        output.push_str(&format!(
            "cache_flush_duration_seconds_sum{{cache=\"{}\"}} {}\n",
            k, total
        ));
        output.push_str(&format!(
            "cache_flush_duration_seconds_count{{cache=\"{}\"}} {}\n",
            k, count
        ));
    }
    for (k, v) in persisted.iter() {
        output.push_str(&format!("cache_persisted_total{{cache=\"{}\"}} {}\n", k, v));
    }
    for (k, v) in failures.iter() {
        output.push_str(&format!(
            "cache_persistence_failures_total{{cache=\"{}\"}} {}\n",
            k, v
        ));
    }
    for (k, v) in dirty.iter() {
        output.push_str(&format!("cache_dirty_entries{{cache=\"{}\"}} {}\n", k, v));
    }
    output
}
