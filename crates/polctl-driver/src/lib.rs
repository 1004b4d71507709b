//! # polctl-driver
//!
//! 偏振仪器控制核心：
//!
//! - 消息客户端：单一请求/应答链路，命令逐条执行，带超时和健康检查
//! - 操作注册表：慢动作异步执行，按 ID 轮询状态
//! - 命令历史：最近 200 条命令及应答，持久化到 JSON Lines 文件
//! - 遥测缓存：后台读取计数流，按新鲜度令牌去重
//!
//! # 线程模型
//!
//! ```text
//! 调用方 ──submit──▶ [FIFO 队列] ──▶ polctl-link 线程 ──▶ 控制器
//!                                        │
//!                                        ├──▶ HistoryLog ──▶ polctl-history 线程 ──▶ 文件
//!                                        └──▶ JobObserver（操作状态）
//!
//! polctl-telemetry 线程 ──▶ CountsStore ──▶ ArcSwap<LatestCounts> ◀── poll()
//! ```

mod bridge;
mod builder;
mod client;
pub mod config;
mod error;
pub mod history;
pub mod hooks;
pub mod metrics;
pub mod operations;
mod pipeline;
#[cfg(feature = "redis-store")]
mod redis_store;
pub mod sim;
pub mod store;
pub mod telemetry;
pub mod transport;
#[cfg(feature = "zmq-link")]
mod zmq_link;

pub use bridge::{Bridge, BridgeHealth, Submitted};
pub use builder::BridgeBuilder;
pub use client::{LinkHealth, MessagingClient, PendingReply};
pub use config::BridgeConfig;
pub use error::DriverError;
pub use history::{HistoryEntry, HistoryLog, HistoryStats};
pub use hooks::JobObserver;
pub use metrics::{LinkMetrics, LinkMetricsSnapshot};
pub use operations::{
    Operation, OperationId, OperationRegistry, OperationState, OperationsSummary, RetentionPolicy,
};
pub use pipeline::LinkConfig;
#[cfg(feature = "redis-store")]
pub use redis_store::RedisCountsStore;
pub use store::{CountsStore, StoreError};
pub use telemetry::{
    LatestCounts, PollResult, RefreshResult, TelemetryCache, TelemetryConfig, TelemetryHealth,
    TelemetryPoller, TelemetryStats,
};
pub use transport::{Connector, Transport, TransportError};
#[cfg(feature = "zmq-link")]
pub use zmq_link::ZmqConnector;

pub use polctl_protocol as protocol;
