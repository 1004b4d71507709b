//! 命令类型定义模块
//!
//! `Command` 是发往控制器的一条请求：名称 + 有序参数 + 发出时间。
//! 构造完成后不可修改（所有 builder 方法消费 `self`）。

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};
use std::fmt;

/// 有序参数表
///
/// 工作区启用了 `serde_json/preserve_order`，插入顺序即发送顺序。
pub type Params = Map<String, Value>;

/// 控制器命令
///
/// # Example
///
/// ```
/// use polctl_protocol::Command;
///
/// let cmd = Command::new("home")
///     .with_param("party", "alice")
///     .with_label("Home Alice");
/// assert_eq!(cmd.name(), "home");
/// assert_eq!(cmd.describe(), "Home Alice");
/// ```
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Command {
    name: String,
    params: Params,
    /// 人类可读描述（写入命令历史）
    label: Option<String>,
    issued_at: DateTime<Utc>,
}

impl Command {
    /// 创建无参数命令，发出时间为当前时刻
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            params: Params::new(),
            label: None,
            issued_at: Utc::now(),
        }
    }

    /// 追加一个参数（保持插入顺序）
    #[must_use]
    pub fn with_param(mut self, key: impl Into<String>, value: impl Into<Value>) -> Self {
        self.params.insert(key.into(), value.into());
        self
    }

    /// 设置历史记录中显示的描述
    #[must_use]
    pub fn with_label(mut self, label: impl Into<String>) -> Self {
        self.label = Some(label.into());
        self
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn params(&self) -> &Params {
        &self.params
    }

    pub fn label(&self) -> Option<&str> {
        self.label.as_deref()
    }

    pub fn issued_at(&self) -> DateTime<Utc> {
        self.issued_at
    }

    /// 历史记录中使用的命令文本
    ///
    /// 有描述时使用描述，否则为 `name {params}`（无参数时仅名称）。
    pub fn describe(&self) -> String {
        if let Some(label) = &self.label {
            return label.clone();
        }
        if self.params.is_empty() {
            self.name.clone()
        } else {
            format!("{} {}", self.name, Value::Object(self.params.clone()))
        }
    }
}

impl fmt::Display for Command {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.describe())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_params_keep_insertion_order() {
        let cmd = Command::new("goto")
            .with_param("party", "alice")
            .with_param("waveplate", "HWP1")
            .with_param("position", 45.0);

        let keys: Vec<_> = cmd.params().keys().cloned().collect();
        assert_eq!(keys, vec!["party", "waveplate", "position"]);
    }

    #[test]
    fn test_describe_without_label() {
        let cmd = Command::new("set_power").with_param("power", 0.5);
        assert_eq!(cmd.describe(), r#"set_power {"power":0.5}"#);

        let cmd = Command::new("info");
        assert_eq!(cmd.describe(), "info");
    }

    #[test]
    fn test_describe_prefers_label() {
        let cmd = Command::new("calibrate")
            .with_param("party", "bob")
            .with_label("Calibrate Bob");
        assert_eq!(cmd.to_string(), "Calibrate Bob");
    }
}
