//! 计数流存储抽象

use polctl_protocol::StreamRecord;
use thiserror::Error;

/// 存储层错误
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum StoreError {
    /// 无法连接或读取超时
    #[error("Counts store unavailable: {0}")]
    Unavailable(String),

    /// 记录格式错误（流 ID 或字段无法解码）
    #[error("Malformed stream record: {0}")]
    Malformed(String),
}

/// 计数流存储
///
/// 只需要读取最新的一条记录；新鲜度由调用方比较流 ID 判断。
pub trait CountsStore: Send {
    /// 流中最新的一条记录，流为空时返回 `None`
    fn newest(&mut self) -> Result<Option<StreamRecord>, StoreError>;

    /// 连通性检查
    fn ping(&mut self) -> Result<(), StoreError>;

    /// 存储描述（用于日志）
    fn describe(&self) -> String;
}
