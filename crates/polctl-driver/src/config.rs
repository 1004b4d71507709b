//! 配置文件
//!
//! TOML 格式，所有字段都有默认值，空文件即合法配置：
//!
//! ```toml
//! [controller]
//! host = "127.0.0.1"
//! port = 5555
//! timeout_secs = 120
//! health_timeout_secs = 3
//!
//! [counts_store]
//! url = "redis://127.0.0.1:6379/0"
//! stream = "monitor:counts"
//! prefix = "VV"
//! refresh_interval_ms = 200
//! require_trimmed = true
//!
//! [history]
//! path = "logs/command_history.jsonl"
//! capacity = 200
//!
//! [operations]
//! max_tracked = 50
//! retain_terminal = 25
//! ttl_secs = 600
//! stale_after_secs = 600
//! ```

use crate::error::DriverError;
use crate::operations::RetentionPolicy;
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use std::time::Duration;
use tracing::debug;

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct BridgeConfig {
    pub controller: ControllerConfig,
    pub counts_store: CountsStoreConfig,
    pub history: HistoryConfig,
    pub operations: OperationsConfig,
}

/// 控制器链路
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct ControllerConfig {
    pub host: String,
    pub port: u16,
    /// 单条命令的应答期限（硬件动作可能持续数分钟）
    pub timeout_secs: u64,
    /// 健康探测的应答期限
    pub health_timeout_secs: u64,
}

impl Default for ControllerConfig {
    fn default() -> Self {
        Self {
            host: "127.0.0.1".to_string(),
            port: 5555,
            timeout_secs: 120,
            health_timeout_secs: 3,
        }
    }
}

impl ControllerConfig {
    pub fn endpoint(&self) -> String {
        format!("tcp://{}:{}", self.host, self.port)
    }

    pub fn timeout(&self) -> Duration {
        Duration::from_secs(self.timeout_secs)
    }

    pub fn health_timeout(&self) -> Duration {
        Duration::from_secs(self.health_timeout_secs)
    }
}

/// 计数流存储
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct CountsStoreConfig {
    pub url: String,
    pub stream: String,
    /// 取哪一组计数（如 `VV`、`HH`）
    pub prefix: String,
    pub refresh_interval_ms: u64,
    /// 只接受 `isTrim` 非 0 的记录
    pub require_trimmed: bool,
}

impl Default for CountsStoreConfig {
    fn default() -> Self {
        Self {
            url: "redis://127.0.0.1:6379/0".to_string(),
            stream: "monitor:counts".to_string(),
            prefix: "VV".to_string(),
            refresh_interval_ms: 200,
            require_trimmed: true,
        }
    }
}

impl CountsStoreConfig {
    pub fn refresh_interval(&self) -> Duration {
        Duration::from_millis(self.refresh_interval_ms)
    }
}

/// 命令历史
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct HistoryConfig {
    pub path: PathBuf,
    pub capacity: usize,
}

impl Default for HistoryConfig {
    fn default() -> Self {
        Self {
            path: PathBuf::from("logs/command_history.jsonl"),
            capacity: 200,
        }
    }
}

/// 操作注册表保留策略
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct OperationsConfig {
    pub max_tracked: usize,
    pub retain_terminal: usize,
    pub ttl_secs: u64,
    pub stale_after_secs: u64,
}

impl Default for OperationsConfig {
    fn default() -> Self {
        let policy = RetentionPolicy::default();
        Self {
            max_tracked: policy.max_tracked,
            retain_terminal: policy.retain_terminal,
            ttl_secs: policy.ttl.as_secs(),
            stale_after_secs: policy.stale_after.as_secs(),
        }
    }
}

impl OperationsConfig {
    pub fn policy(&self) -> RetentionPolicy {
        RetentionPolicy {
            max_tracked: self.max_tracked,
            retain_terminal: self.retain_terminal,
            ttl: Duration::from_secs(self.ttl_secs),
            stale_after: Duration::from_secs(self.stale_after_secs),
        }
    }
}

impl BridgeConfig {
    /// 从文件加载；文件不存在时返回默认配置
    pub fn load(path: &Path) -> Result<Self, DriverError> {
        if !path.exists() {
            debug!("Config file {} not found, using defaults", path.display());
            return Ok(Self::default());
        }
        let text = std::fs::read_to_string(path)?;
        Self::from_toml_str(&text)
            .map_err(|e| DriverError::Config(format!("{}: {}", path.display(), e)))
    }

    pub fn from_toml_str(text: &str) -> Result<Self, DriverError> {
        let config: BridgeConfig =
            toml::from_str(text).map_err(|e| DriverError::Config(e.to_string()))?;
        config.validate()?;
        Ok(config)
    }

    pub fn to_toml_string(&self) -> Result<String, DriverError> {
        toml::to_string_pretty(self).map_err(|e| DriverError::Config(e.to_string()))
    }

    pub fn validate(&self) -> Result<(), DriverError> {
        let invalid = |msg: &str| Err(DriverError::Config(msg.to_string()));

        if self.controller.host.trim().is_empty() {
            return invalid("controller.host must not be empty");
        }
        if self.controller.timeout_secs == 0 {
            return invalid("controller.timeout_secs must be greater than 0");
        }
        if self.controller.health_timeout_secs == 0 {
            return invalid("controller.health_timeout_secs must be greater than 0");
        }
        if self.controller.health_timeout_secs > self.controller.timeout_secs {
            return invalid("controller.health_timeout_secs must not exceed timeout_secs");
        }
        if self.counts_store.refresh_interval_ms == 0 {
            return invalid("counts_store.refresh_interval_ms must be greater than 0");
        }
        if self.counts_store.prefix.is_empty() {
            return invalid("counts_store.prefix must not be empty");
        }
        if self.history.capacity == 0 {
            return invalid("history.capacity must be greater than 0");
        }
        if self.operations.max_tracked == 0 {
            return invalid("operations.max_tracked must be greater than 0");
        }
        if self.operations.retain_terminal > self.operations.max_tracked {
            return invalid("operations.retain_terminal must not exceed max_tracked");
        }
        Ok(())
    }
}
