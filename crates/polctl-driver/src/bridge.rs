//! 核心组件的组合门面
//!
//! 持有消息客户端、操作注册表、命令历史和遥测缓存。
//! 慢动作走注册表异步执行，查询类动作同步发送。

use crate::client::{LinkHealth, MessagingClient};
use crate::error::DriverError;
use crate::history::{HistoryLog, HistoryStats};
use crate::operations::{Operation, OperationId, OperationRegistry, OperationsSummary};
use crate::telemetry::{PollResult, TelemetryCache, TelemetryPoller, TelemetryStats};
use polctl_protocol::{Action, Command, CommandOutcome};
use serde::Serialize;
use std::sync::Arc;
use std::time::Duration;

/// `execute` 的结果
#[derive(Debug, Clone, PartialEq)]
pub enum Submitted {
    /// 已登记为操作，轮询 `status` 获取结果
    Operation(OperationId),
    /// 已同步完成
    Immediate(CommandOutcome),
}

/// 整体健康报告
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct BridgeHealth {
    pub link: LinkHealth,
    pub counts_store_reachable: bool,
    pub telemetry: TelemetryStats,
    pub operations: OperationsSummary,
    pub history: HistoryStats,
}

pub struct Bridge {
    // 先停轮询线程
    poller: Option<TelemetryPoller>,
    operations: OperationRegistry,
    link: Arc<MessagingClient>,
    history: Arc<HistoryLog>,
    telemetry: Arc<TelemetryCache>,
}

impl Bridge {
    pub(crate) fn from_parts(
        poller: Option<TelemetryPoller>,
        operations: OperationRegistry,
        link: Arc<MessagingClient>,
        history: Arc<HistoryLog>,
        telemetry: Arc<TelemetryCache>,
    ) -> Self {
        Self {
            poller,
            operations,
            link,
            history,
            telemetry,
        }
    }

    /// 执行一个仪器动作
    pub fn execute(&self, action: &Action) -> Result<Submitted, DriverError> {
        let command = action.to_command();
        if action.is_slow() {
            self.operations.dispatch(command).map(Submitted::Operation)
        } else {
            Ok(Submitted::Immediate(self.link.send(command)))
        }
    }

    pub fn dispatch(&self, command: Command) -> Result<OperationId, DriverError> {
        self.operations.dispatch(command)
    }

    pub fn send(&self, command: Command) -> CommandOutcome {
        self.link.send(command)
    }

    pub fn status(&self, id: &str) -> Result<Operation, DriverError> {
        self.operations.status(id)
    }

    pub fn wait(&self, id: &str, timeout: Duration) -> Result<Operation, DriverError> {
        self.operations.wait(id, timeout)
    }

    pub fn poll_counts(&self) -> PollResult {
        self.telemetry.poll()
    }

    pub fn health(&self) -> BridgeHealth {
        BridgeHealth {
            link: self.link.health_check(),
            counts_store_reachable: self.telemetry.store_reachable(),
            telemetry: self.telemetry.stats(),
            operations: self.operations.summary(),
            history: self.history.stats(),
        }
    }

    pub fn operations(&self) -> &OperationRegistry {
        &self.operations
    }

    pub fn link(&self) -> &MessagingClient {
        &self.link
    }

    pub fn history(&self) -> &HistoryLog {
        &self.history
    }

    pub fn telemetry(&self) -> &TelemetryCache {
        &self.telemetry
    }

    pub fn is_polling(&self) -> bool {
        self.poller.is_some()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::builder::BridgeBuilder;
    use crate::operations::OperationState;
    use crate::sim::{MemoryCountsStore, SimulatedController};
    use polctl_protocol::Party;

    fn bridge(sim: &SimulatedController, store: &MemoryCountsStore) -> Bridge {
        BridgeBuilder::new()
            .connector(Arc::new(sim.clone()))
            .counts_store(Box::new(store.clone()))
            .history_in_memory()
            .manual_telemetry()
            .build()
            .unwrap()
    }

    #[test]
    fn test_execute_routes_slow_and_instant() {
        let sim = SimulatedController::new();
        let bridge = bridge(&sim, &MemoryCountsStore::new());

        let submitted = bridge.execute(&Action::Home { party: Party::Bob }).unwrap();
        let Submitted::Operation(id) = submitted else {
            panic!("home should be tracked as an operation");
        };
        let op = bridge.wait(id.as_str(), Duration::from_secs(5)).unwrap();
        assert_eq!(op.state, OperationState::Completed);

        let Submitted::Immediate(outcome) = bridge.execute(&Action::CurrentPath).unwrap() else {
            panic!("current path should run immediately");
        };
        assert_eq!(outcome.payload().unwrap()["message"], "H");

        let commands: Vec<_> = bridge.history().list().into_iter().map(|e| e.command).collect();
        assert_eq!(commands, vec!["Current Path", "Home Bob"]);
    }

    #[test]
    fn test_health_report() {
        let sim = SimulatedController::new();
        let store = MemoryCountsStore::new();
        let bridge = bridge(&sim, &store);
        assert!(!bridge.is_polling());

        let health = bridge.health();
        assert!(health.link.link_up);
        assert!(health.counts_store_reachable);
        assert_eq!(health.operations.total, 0);
        assert_eq!(health.history.total, 0);

        store.publish_counts("VV", 100, 100, 3);
        bridge.telemetry().refresh();
        assert!(bridge.poll_counts().has_new_data);
    }
}
