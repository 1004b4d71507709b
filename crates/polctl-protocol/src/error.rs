//! 协议层错误类型定义

use thiserror::Error;

/// 协议层错误类型
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum ProtocolError {
    /// 未知的参与方名称
    #[error("Unknown party '{0}' (expected alice, bob or source)")]
    UnknownParty(String),

    /// 未知的移动方向
    #[error("Unknown direction '{0}' (expected forward, backward or goto)")]
    UnknownDirection(String),

    /// 流 ID 格式错误（期望 `<ms>-<seq>`）
    #[error("Invalid stream id: {0}")]
    InvalidStreamId(String),

    /// 计数记录中缺少指定前缀
    #[error("Prefix '{prefix}' not found in counts data (available: {available:?})")]
    MissingPrefix {
        prefix: String,
        available: Vec<String>,
    },

    /// 计数字段无法解析
    #[error("Invalid counts field '{field}': {value}")]
    InvalidCounts { field: String, value: String },
}

#[cfg(test)]
mod tests {
    use super::ProtocolError;

    #[test]
    fn test_protocol_error_display() {
        let err = ProtocolError::UnknownParty("carol".to_string());
        assert!(err.to_string().contains("carol"));

        let err = ProtocolError::MissingPrefix {
            prefix: "VV".to_string(),
            available: vec!["HH".to_string()],
        };
        let msg = err.to_string();
        assert!(msg.contains("VV") && msg.contains("HH"), "message: {}", msg);
    }
}
