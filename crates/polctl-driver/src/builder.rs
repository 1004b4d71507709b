//! Builder 模式实现
//!
//! 链式构造 [`Bridge`]。

use crate::bridge::Bridge;
use crate::client::MessagingClient;
use crate::config::BridgeConfig;
use crate::error::DriverError;
use crate::history::HistoryLog;
use crate::operations::OperationRegistry;
use crate::pipeline::LinkConfig;
use crate::store::CountsStore;
use crate::telemetry::{TelemetryCache, TelemetryConfig, TelemetryPoller};
use crate::transport::Connector;
use std::sync::Arc;
use tracing::info;

/// Bridge Builder（链式构造）
///
/// 未指定连接器或计数存储时，按配置创建 ZeroMQ 链路（`zmq-link` feature）
/// 和 Redis 存储（`redis-store` feature）。
///
/// # Example
///
/// ```
/// use polctl_driver::BridgeBuilder;
/// use polctl_driver::sim::{MemoryCountsStore, SimulatedController};
/// use std::sync::Arc;
///
/// let bridge = BridgeBuilder::new()
///     .connector(Arc::new(SimulatedController::new()))
///     .counts_store(Box::new(MemoryCountsStore::new()))
///     .history_in_memory()
///     .build()
///     .unwrap();
/// assert!(bridge.history().is_empty());
/// ```
pub struct BridgeBuilder {
    config: BridgeConfig,
    connector: Option<Arc<dyn Connector>>,
    counts_store: Option<Box<dyn CountsStore>>,
    history_in_memory: bool,
    start_poller: bool,
}

impl Default for BridgeBuilder {
    fn default() -> Self {
        Self::new()
    }
}

impl BridgeBuilder {
    pub fn new() -> Self {
        Self {
            config: BridgeConfig::default(),
            connector: None,
            counts_store: None,
            history_in_memory: false,
            start_poller: true,
        }
    }

    pub fn config(mut self, config: BridgeConfig) -> Self {
        self.config = config;
        self
    }

    /// 使用指定的控制器连接器
    pub fn connector(mut self, connector: Arc<dyn Connector>) -> Self {
        self.connector = Some(connector);
        self
    }

    /// 使用指定的计数存储
    pub fn counts_store(mut self, store: Box<dyn CountsStore>) -> Self {
        self.counts_store = Some(store);
        self
    }

    /// 命令历史不落盘
    pub fn history_in_memory(mut self) -> Self {
        self.history_in_memory = true;
        self
    }

    /// 不启动遥测轮询线程（由调用方驱动 `refresh`）
    pub fn manual_telemetry(mut self) -> Self {
        self.start_poller = false;
        self
    }

    pub fn build(self) -> Result<Bridge, DriverError> {
        self.config.validate()?;
        let config = self.config;

        let connector = match self.connector {
            Some(connector) => connector,
            None => default_connector(&config)?,
        };
        let counts_store = match self.counts_store {
            Some(store) => store,
            None => default_counts_store(&config)?,
        };

        let history = Arc::new(if self.history_in_memory {
            HistoryLog::in_memory(config.history.capacity)
        } else {
            HistoryLog::open(&config.history.path, config.history.capacity)?
        });

        let link = Arc::new(MessagingClient::new(
            connector,
            Arc::clone(&history),
            LinkConfig {
                timeout: config.controller.timeout(),
                health_timeout: config.controller.health_timeout(),
            },
        )?);
        let operations = OperationRegistry::new(Arc::clone(&link), config.operations.policy());

        let telemetry = Arc::new(TelemetryCache::new(
            counts_store,
            TelemetryConfig {
                prefix: config.counts_store.prefix.clone(),
                require_trimmed: config.counts_store.require_trimmed,
                refresh_interval: config.counts_store.refresh_interval(),
                ..TelemetryConfig::default()
            },
        ));
        let poller = if self.start_poller {
            Some(TelemetryPoller::spawn(Arc::clone(&telemetry))?)
        } else {
            None
        };

        info!("Bridge ready, controller at {}", link.endpoint());
        Ok(Bridge::from_parts(poller, operations, link, history, telemetry))
    }
}

#[cfg(feature = "zmq-link")]
fn default_connector(config: &BridgeConfig) -> Result<Arc<dyn Connector>, DriverError> {
    Ok(Arc::new(crate::zmq_link::ZmqConnector::new(
        config.controller.endpoint(),
    )))
}

#[cfg(not(feature = "zmq-link"))]
fn default_connector(config: &BridgeConfig) -> Result<Arc<dyn Connector>, DriverError> {
    Err(DriverError::Config(format!(
        "no connector for {}: built without the `zmq-link` feature",
        config.controller.endpoint()
    )))
}

#[cfg(feature = "redis-store")]
fn default_counts_store(config: &BridgeConfig) -> Result<Box<dyn CountsStore>, DriverError> {
    let store = crate::redis_store::RedisCountsStore::open(
        &config.counts_store.url,
        config.counts_store.stream.clone(),
    )?;
    Ok(Box::new(store))
}

#[cfg(not(feature = "redis-store"))]
fn default_counts_store(config: &BridgeConfig) -> Result<Box<dyn CountsStore>, DriverError> {
    Err(DriverError::Config(format!(
        "no counts store for {}: built without the `redis-store` feature",
        config.counts_store.url
    )))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[cfg(feature = "zmq-link")]
    #[test]
    fn test_default_connector_is_zmq_link() {
        let connector = default_connector(&BridgeConfig::default()).unwrap();
        assert_eq!(connector.endpoint(), "tcp://127.0.0.1:5555");
    }

    #[cfg(feature = "zmq-link")]
    #[test]
    fn test_build_without_connector_uses_config_endpoint() {
        let mut config = BridgeConfig::default();
        config.controller.port = 6001;
        let bridge = BridgeBuilder::new()
            .config(config)
            .counts_store(Box::new(crate::sim::MemoryCountsStore::new()))
            .history_in_memory()
            .manual_telemetry()
            .build();
        assert!(bridge.is_ok());
    }

    #[cfg(not(feature = "zmq-link"))]
    #[test]
    fn test_missing_link_feature_is_config_error() {
        let err = default_connector(&BridgeConfig::default()).err().unwrap();
        assert!(matches!(err, DriverError::Config(_)));
    }
}
