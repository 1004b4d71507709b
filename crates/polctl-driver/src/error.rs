//! 驱动层错误类型定义
//!
//! 硬件命令本身的失败（超时、拒绝、断链）不在这里：它们作为
//! [`CommandOutcome`](polctl_protocol::CommandOutcome) 正常返回并写入历史。
//! `DriverError` 只描述核心组件自身无法完成调用的情况。

use crate::store::StoreError;
use polctl_protocol::ProtocolError;
use thiserror::Error;

/// 驱动层错误类型
#[derive(Error, Debug)]
pub enum DriverError {
    /// 操作 ID 未知或已被淘汰
    #[error("Operation not found: {0}")]
    NotFound(String),

    /// 历史或遥测后端不可用
    #[error("Store unavailable: {0}")]
    StoreUnavailable(String),

    /// 计数存储错误
    #[error("Counts store error: {0}")]
    Store(#[from] StoreError),

    /// 协议解析错误
    #[error("Protocol error: {0}")]
    Protocol(#[from] ProtocolError),

    /// 命令通道已关闭（链路线程退出）
    #[error("Command channel closed")]
    ChannelClosed,

    /// 等待超时
    #[error("Operation timeout")]
    Timeout,

    /// 配置无效
    #[error("Invalid configuration: {0}")]
    Config(String),

    /// 文件或线程创建失败
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_driver_error_display() {
        let msg = DriverError::NotFound("op-42".to_string()).to_string();
        assert_eq!(msg, "Operation not found: op-42");

        let msg = DriverError::StoreUnavailable("disk full".to_string()).to_string();
        assert!(msg.contains("disk full"));

        assert_eq!(DriverError::ChannelClosed.to_string(), "Command channel closed");
    }

    #[test]
    fn test_driver_error_from_conversions() {
        let err: DriverError = StoreError::Unavailable("connection refused".to_string()).into();
        assert!(matches!(err, DriverError::Store(_)));

        let err: DriverError = ProtocolError::InvalidStreamId("x-y".to_string()).into();
        assert!(matches!(err, DriverError::Protocol(_)));

        let io = std::io::Error::new(std::io::ErrorKind::PermissionDenied, "denied");
        let err: DriverError = io.into();
        assert!(err.to_string().contains("denied"));
    }
}
