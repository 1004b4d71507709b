//! 命令结果类型
//!
//! 硬件层面的失败（超时、拒绝、断链）是 `send` 的正常返回值，
//! 而不是 `Err`：一次失败的电机移动同样需要被记录和展示。

use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::fmt;
use thiserror::Error;

/// 失败分类
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum FailureKind {
    /// 链路断开或重连失败
    Connection,
    /// 超时未收到应答（硬件副作用未知）
    Timeout,
    /// 控制器返回了明确的错误载荷
    Rejected,
    /// 应答无法解析
    Protocol,
}

impl fmt::Display for FailureKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            FailureKind::Connection => "ConnectionError",
            FailureKind::Timeout => "TimeoutError",
            FailureKind::Rejected => "RejectedError",
            FailureKind::Protocol => "ProtocolError",
        };
        f.write_str(name)
    }
}

/// 命令失败原因
#[derive(Error, Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[error("{kind}: {message}")]
pub struct CommandFailure {
    pub kind: FailureKind,
    pub message: String,
}

impl CommandFailure {
    pub fn new(kind: FailureKind, message: impl Into<String>) -> Self {
        Self {
            kind,
            message: message.into(),
        }
    }

    pub fn connection(message: impl Into<String>) -> Self {
        Self::new(FailureKind::Connection, message)
    }

    pub fn timeout(message: impl Into<String>) -> Self {
        Self::new(FailureKind::Timeout, message)
    }

    pub fn rejected(message: impl Into<String>) -> Self {
        Self::new(FailureKind::Rejected, message)
    }

    pub fn protocol(message: impl Into<String>) -> Self {
        Self::new(FailureKind::Protocol, message)
    }

    /// 硬件动作是否可能仍在执行或已经完成
    ///
    /// 超时只说明应答没有回来，不说明动作被中止。
    pub fn side_effect_unknown(&self) -> bool {
        self.kind == FailureKind::Timeout
    }
}

/// 命令结果
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "status", rename_all = "snake_case")]
pub enum CommandOutcome {
    Success { payload: Value },
    Failure(CommandFailure),
}

impl CommandOutcome {
    pub fn success(payload: Value) -> Self {
        CommandOutcome::Success { payload }
    }

    pub fn failure(failure: CommandFailure) -> Self {
        CommandOutcome::Failure(failure)
    }

    pub fn is_error(&self) -> bool {
        matches!(self, CommandOutcome::Failure(_))
    }

    pub fn payload(&self) -> Option<&Value> {
        match self {
            CommandOutcome::Success { payload } => Some(payload),
            CommandOutcome::Failure(_) => None,
        }
    }

    pub fn failure_ref(&self) -> Option<&CommandFailure> {
        match self {
            CommandOutcome::Success { .. } => None,
            CommandOutcome::Failure(failure) => Some(failure),
        }
    }

    pub fn error_message(&self) -> Option<String> {
        self.failure_ref().map(ToString::to_string)
    }

    /// 写入命令历史的应答文本
    pub fn render(&self) -> String {
        match self {
            CommandOutcome::Success { payload } => match payload {
                Value::String(text) => text.clone(),
                other => other.to_string(),
            },
            CommandOutcome::Failure(failure) => failure.to_string(),
        }
    }
}

impl From<CommandFailure> for CommandOutcome {
    fn from(failure: CommandFailure) -> Self {
        CommandOutcome::Failure(failure)
    }
}
