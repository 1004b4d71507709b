//! 链路性能指标
//!
//! 原子计数器，链路线程写入，任意线程读取快照，不引入锁竞争。

use serde::Serialize;
use std::sync::atomic::{AtomicU64, Ordering};

/// 控制器链路实时指标
///
/// # 使用示例
///
/// ```rust
/// use polctl_driver::LinkMetrics;
/// use std::sync::atomic::Ordering;
///
/// let metrics = LinkMetrics::default();
/// metrics.commands_total.fetch_add(1, Ordering::Relaxed);
/// assert_eq!(metrics.snapshot().commands_total, 1);
/// ```
#[derive(Debug, Default)]
pub struct LinkMetrics {
    /// 已执行的命令总数
    pub commands_total: AtomicU64,
    /// 成功应答数
    pub commands_succeeded: AtomicU64,
    /// 失败数（含超时、拒绝、断链、无法解析）
    pub commands_failed: AtomicU64,
    /// 应答超时次数
    pub timeouts: AtomicU64,
    /// 控制器明确拒绝的次数
    pub rejections: AtomicU64,
    /// 断链后的重连尝试次数
    pub reconnects: AtomicU64,
    /// 建立会话失败次数
    pub connection_failures: AtomicU64,
}

impl LinkMetrics {
    pub fn new() -> Self {
        Self::default()
    }

    /// 获取指标快照
    ///
    /// 不同计数器之间可能有微小的时间差。
    pub fn snapshot(&self) -> LinkMetricsSnapshot {
        LinkMetricsSnapshot {
            commands_total: self.commands_total.load(Ordering::Relaxed),
            commands_succeeded: self.commands_succeeded.load(Ordering::Relaxed),
            commands_failed: self.commands_failed.load(Ordering::Relaxed),
            timeouts: self.timeouts.load(Ordering::Relaxed),
            rejections: self.rejections.load(Ordering::Relaxed),
            reconnects: self.reconnects.load(Ordering::Relaxed),
            connection_failures: self.connection_failures.load(Ordering::Relaxed),
        }
    }

    /// 重置所有计数器
    pub fn reset(&self) {
        self.commands_total.store(0, Ordering::Relaxed);
        self.commands_succeeded.store(0, Ordering::Relaxed);
        self.commands_failed.store(0, Ordering::Relaxed);
        self.timeouts.store(0, Ordering::Relaxed);
        self.rejections.store(0, Ordering::Relaxed);
        self.reconnects.store(0, Ordering::Relaxed);
        self.connection_failures.store(0, Ordering::Relaxed);
    }
}

/// 指标快照（不可变）
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub struct LinkMetricsSnapshot {
    pub commands_total: u64,
    pub commands_succeeded: u64,
    pub commands_failed: u64,
    pub timeouts: u64,
    pub rejections: u64,
    pub reconnects: u64,
    pub connection_failures: u64,
}

impl LinkMetricsSnapshot {
    /// 成功率（百分比），无命令时为 0.0
    pub fn success_rate(&self) -> f64 {
        if self.commands_total == 0 {
            return 0.0;
        }
        (self.commands_succeeded as f64 / self.commands_total as f64) * 100.0
    }
}
