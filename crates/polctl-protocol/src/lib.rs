//! # polctl-protocol
//!
//! 偏振控制器链路的纯数据层：
//!
//! - `command` - 下发给控制器的命令（不可变）
//! - `outcome` - 命令结果（成功载荷 / 失败原因）
//! - `wire` - 控制器 JSON 请求/应答编解码
//! - `instrument` - 仪器动作目录（波片、激光、校准等）
//! - `counts` - 计数流记录与计数快照
//!
//! **依赖原则**: 本 crate 不包含线程和 I/O，只定义类型和纯函数。

pub mod command;
pub mod counts;
mod error;
pub mod instrument;
pub mod outcome;
pub mod wire;

pub use command::{Command, Params};
pub use counts::{CountsSnapshot, RawCounts, StreamId, StreamRecord};
pub use error::ProtocolError;
pub use instrument::{Action, Direction, Party};
pub use outcome::{CommandFailure, CommandOutcome, FailureKind};
