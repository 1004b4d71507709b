//! 链路钩子
//!
//! 链路线程在执行每条命令的前后调用 [`JobObserver`]。
//! 操作注册表借此推进操作状态，无需额外线程等待应答。

use polctl_protocol::{Command, CommandOutcome};

/// 命令执行观察者
///
/// 回调在链路线程上同步执行，期间下一条命令不会开始。
/// 实现应尽快返回：只更新内存状态，禁止 I/O 和长时间阻塞。
pub trait JobObserver: Send + Sync {
    /// 命令即将发往控制器
    fn on_started(&self, command: &Command);

    /// 命令已结束，结果已写入命令历史
    fn on_finished(&self, command: &Command, outcome: &CommandOutcome);
}
