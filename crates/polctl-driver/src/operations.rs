//! 操作注册表
//!
//! 慢动作（移动、归零、校准……）在真实硬件上可能持续数分钟。
//! `dispatch` 立即返回操作 ID，调用方随后轮询 `status`。
//!
//! 状态只向前推进：`Pending → Running → Completed | Failed`。
//! 推进由链路线程通过 [`JobObserver`] 回调驱动，注册表不另起线程。

use crate::client::MessagingClient;
use crate::error::DriverError;
use crate::hooks::JobObserver;
use chrono::{DateTime, Utc};
use parking_lot::{Condvar, Mutex};
use polctl_protocol::{Command, CommandOutcome};
use serde::Serialize;
use std::collections::HashMap;
use std::fmt;
use std::sync::{Arc, Weak};
use std::time::{Duration, Instant};
use tracing::{debug, info, warn};
use uuid::Uuid;

const TARGET: &str = "polctl::operations";

/// 操作 ID（UUID v4 文本）
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize)]
#[serde(transparent)]
pub struct OperationId(String);

impl OperationId {
    fn generate() -> Self {
        Self(Uuid::new_v4().to_string())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for OperationId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl From<&str> for OperationId {
    fn from(value: &str) -> Self {
        Self(value.to_string())
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum OperationState {
    Pending,
    Running,
    Completed,
    Failed,
}

impl OperationState {
    pub fn is_terminal(&self) -> bool {
        matches!(self, OperationState::Completed | OperationState::Failed)
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            OperationState::Pending => "pending",
            OperationState::Running => "running",
            OperationState::Completed => "completed",
            OperationState::Failed => "failed",
        }
    }
}

impl fmt::Display for OperationState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// 一个被跟踪的操作（快照）
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct Operation {
    pub id: OperationId,
    pub command: Command,
    pub state: OperationState,
    pub created_at: DateTime<Utc>,
    pub started_at: Option<DateTime<Utc>>,
    pub completed_at: Option<DateTime<Utc>>,
    /// 终态时存在
    pub outcome: Option<CommandOutcome>,
}

impl Operation {
    fn pending(id: OperationId, command: Command) -> Self {
        Self {
            id,
            command,
            state: OperationState::Pending,
            created_at: Utc::now(),
            started_at: None,
            completed_at: None,
            outcome: None,
        }
    }

    fn mark_running(&mut self) -> bool {
        if self.state != OperationState::Pending {
            return false;
        }
        self.state = OperationState::Running;
        self.started_at = Some(Utc::now());
        true
    }

    fn finish(&mut self, outcome: CommandOutcome) -> bool {
        if self.state.is_terminal() {
            return false;
        }
        self.state = if outcome.is_error() {
            OperationState::Failed
        } else {
            OperationState::Completed
        };
        self.completed_at = Some(Utc::now());
        self.outcome = Some(outcome);
        true
    }

    /// 运行时长（未开始时为 0）
    pub fn running_for(&self, now: DateTime<Utc>) -> Duration {
        let Some(started) = self.started_at else {
            return Duration::ZERO;
        };
        let end = self.completed_at.unwrap_or(now);
        (end - started).to_std().unwrap_or(Duration::ZERO)
    }

    fn expired(&self, now: DateTime<Utc>, ttl: Duration) -> bool {
        match self.completed_at {
            Some(done) if self.state.is_terminal() => {
                (now - done).to_std().is_ok_and(|age| age > ttl)
            },
            _ => false,
        }
    }
}

/// 保留策略
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RetentionPolicy {
    /// 超过此数量时淘汰较旧的终态操作
    pub max_tracked: usize,
    /// 淘汰后保留的最新终态操作数
    pub retain_terminal: usize,
    /// 终态操作的最长保留时间
    pub ttl: Duration,
    /// Running 超过此时长视为滞留
    pub stale_after: Duration,
}

impl Default for RetentionPolicy {
    fn default() -> Self {
        Self {
            max_tracked: 50,
            retain_terminal: 25,
            ttl: Duration::from_secs(600),
            stale_after: Duration::from_secs(600),
        }
    }
}

/// 注册表概况
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct OperationsSummary {
    pub total: usize,
    pub pending: usize,
    pub running: usize,
    pub completed: usize,
    pub failed: usize,
    /// Running 超过 `stale_after` 的操作
    pub stale: Vec<OperationId>,
    pub healthy: bool,
}

struct RegistryInner {
    ops: Mutex<HashMap<OperationId, Operation>>,
    changed: Condvar,
    policy: RetentionPolicy,
}

impl RegistryInner {
    fn on_started(&self, id: &OperationId) {
        let mut ops = self.ops.lock();
        if let Some(op) = ops.get_mut(id) {
            if op.mark_running() {
                info!(target: TARGET, "Operation {} running: {}", id, op.command);
            }
        }
        self.changed.notify_all();
    }

    fn on_finished(&self, id: &OperationId, outcome: &CommandOutcome) {
        let mut ops = self.ops.lock();
        match ops.get_mut(id) {
            Some(op) => {
                if op.finish(outcome.clone()) {
                    match outcome.failure_ref() {
                        None => info!(target: TARGET, "Operation {} completed: {}", id, op.command),
                        Some(failure) => warn!(
                            target: TARGET,
                            "Operation {} failed: {}: {}", id, op.command, failure
                        ),
                    }
                }
            },
            None => warn!(target: TARGET, "Finished operation {} is no longer tracked", id),
        }
        evict(&mut ops, &self.policy, Utc::now());
        self.changed.notify_all();
    }
}

/// 淘汰终态操作；非终态操作从不淘汰
fn evict(ops: &mut HashMap<OperationId, Operation>, policy: &RetentionPolicy, now: DateTime<Utc>) {
    let before = ops.len();
    ops.retain(|_, op| !op.expired(now, policy.ttl));

    if ops.len() > policy.max_tracked {
        let mut terminal: Vec<(DateTime<Utc>, OperationId)> = ops
            .values()
            .filter_map(|op| match (op.state.is_terminal(), op.completed_at) {
                (true, Some(done)) => Some((done, op.id.clone())),
                _ => None,
            })
            .collect();
        terminal.sort_by(|a, b| b.0.cmp(&a.0));
        for (_, id) in terminal.into_iter().skip(policy.retain_terminal) {
            ops.remove(&id);
        }
    }

    let evicted = before - ops.len();
    if evicted > 0 {
        debug!(target: TARGET, "Evicted {} finished operations, {} tracked", evicted, ops.len());
    }
}

/// 把链路线程的回调转给注册表
struct OperationObserver {
    id: OperationId,
    registry: Weak<RegistryInner>,
}

impl JobObserver for OperationObserver {
    fn on_started(&self, _command: &Command) {
        if let Some(registry) = self.registry.upgrade() {
            registry.on_started(&self.id);
        }
    }

    fn on_finished(&self, _command: &Command, outcome: &CommandOutcome) {
        if let Some(registry) = self.registry.upgrade() {
            registry.on_finished(&self.id, outcome);
        }
    }
}

/// 操作注册表
pub struct OperationRegistry {
    inner: Arc<RegistryInner>,
    link: Arc<MessagingClient>,
}

impl OperationRegistry {
    pub fn new(link: Arc<MessagingClient>, policy: RetentionPolicy) -> Self {
        Self {
            inner: Arc::new(RegistryInner {
                ops: Mutex::new(HashMap::new()),
                changed: Condvar::new(),
                policy,
            }),
            link,
        }
    }

    /// 登记并排队一个慢动作，立即返回操作 ID
    ///
    /// 多次 `dispatch` 按调用顺序在控制器上执行。
    pub fn dispatch(&self, command: Command) -> Result<OperationId, DriverError> {
        let id = OperationId::generate();
        let observer = Arc::new(OperationObserver {
            id: id.clone(),
            registry: Arc::downgrade(&self.inner),
        });
        let label = command.describe();

        // 持锁排队：登记顺序与执行顺序一致
        let mut ops = self.inner.ops.lock();
        ops.insert(id.clone(), Operation::pending(id.clone(), command.clone()));
        if let Err(e) = self.link.submit(command, Some(observer)) {
            ops.remove(&id);
            return Err(e);
        }
        drop(ops);

        info!(target: TARGET, "Operation {} dispatched: {}", id, label);
        Ok(id)
    }

    /// 查询操作状态
    pub fn status(&self, id: &str) -> Result<Operation, DriverError> {
        self.inner
            .ops
            .lock()
            .get(&OperationId::from(id))
            .cloned()
            .ok_or_else(|| DriverError::NotFound(id.to_string()))
    }

    /// 所有被跟踪的操作，新的在前
    pub fn list(&self) -> Vec<Operation> {
        let mut ops: Vec<Operation> = self.inner.ops.lock().values().cloned().collect();
        ops.sort_by(|a, b| b.created_at.cmp(&a.created_at));
        ops
    }

    pub fn summary(&self) -> OperationsSummary {
        let now = Utc::now();
        let ops = self.inner.ops.lock();
        let count = |state: OperationState| ops.values().filter(|op| op.state == state).count();

        let mut stale: Vec<OperationId> = ops
            .values()
            .filter(|op| {
                op.state == OperationState::Running
                    && op.running_for(now) > self.inner.policy.stale_after
            })
            .map(|op| op.id.clone())
            .collect();
        stale.sort();

        OperationsSummary {
            total: ops.len(),
            pending: count(OperationState::Pending),
            running: count(OperationState::Running),
            completed: count(OperationState::Completed),
            failed: count(OperationState::Failed),
            healthy: stale.is_empty(),
            stale,
        }
    }

    /// 阻塞直到操作进入终态，最多等待 `timeout`
    pub fn wait(&self, id: &str, timeout: Duration) -> Result<Operation, DriverError> {
        let key = OperationId::from(id);
        let deadline = Instant::now() + timeout;
        let mut ops = self.inner.ops.lock();
        loop {
            match ops.get(&key) {
                None => return Err(DriverError::NotFound(id.to_string())),
                Some(op) if op.state.is_terminal() => return Ok(op.clone()),
                Some(_) => {},
            }
            if self.inner.changed.wait_until(&mut ops, deadline).timed_out() {
                return match ops.get(&key) {
                    Some(op) if op.state.is_terminal() => Ok(op.clone()),
                    Some(_) => Err(DriverError::Timeout),
                    None => Err(DriverError::NotFound(id.to_string())),
                };
            }
        }
    }

    pub fn policy(&self) -> RetentionPolicy {
        self.inner.policy
    }

    pub fn len(&self) -> usize {
        self.inner.ops.lock().len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}
