//! 控制器链路抽象
//!
//! - [`Transport`]: 一个活动的请求/应答会话，一问一答
//! - [`Connector`]: 打开新会话的工厂
//!
//! 链路线程独占当前会话。超时或断链后会话被丢弃，由 `Connector` 重新建立。

use std::time::Duration;
use thiserror::Error;

/// 会话层错误
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum TransportError {
    /// 在期限内没有收到应答
    #[error("No reply within {0:?}")]
    Timeout(Duration),

    /// 会话不可用（连接被拒绝、对端关闭等）
    #[error("Link disconnected: {0}")]
    Disconnected(String),
}

/// 一个请求/应答会话
///
/// `request` 发送一条报文并阻塞等待应答，最长 `timeout`。
/// 返回 `Timeout` 后会话不再可用（REQ 套接字在收到应答前不能再次发送）。
pub trait Transport: Send {
    fn request(&mut self, message: &str, timeout: Duration) -> Result<String, TransportError>;
}

/// 会话工厂
pub trait Connector: Send + Sync {
    /// 打开一个新会话
    fn connect(&self) -> Result<Box<dyn Transport>, TransportError>;

    /// 对端地址（用于健康报告和日志）
    fn endpoint(&self) -> String;
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_transport_error_display() {
        let err = TransportError::Timeout(Duration::from_secs(2));
        assert_eq!(err.to_string(), "No reply within 2s");

        let err = TransportError::Disconnected("connection refused".to_string());
        assert_eq!(err.to_string(), "Link disconnected: connection refused");
    }
}
