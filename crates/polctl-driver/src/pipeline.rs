//! 链路线程循环
//!
//! 链路线程独占控制器会话，按到达顺序逐条执行命令：
//!
//! 1. 标记 in-flight，通知观察者 `on_started`
//! 2. 完成一次请求/应答（或失败）
//! 3. 写入命令历史
//! 4. 清除 in-flight，通知观察者 `on_finished`
//! 5. 把结果交给等待方
//!
//! 同一时刻最多只有一条命令在控制器上执行。

use crate::history::HistoryLog;
use crate::hooks::JobObserver;
use crate::metrics::LinkMetrics;
use crate::transport::{Connector, Transport, TransportError};
use crossbeam_channel::{Receiver, Sender};
use polctl_protocol::wire;
use polctl_protocol::{Command, CommandFailure, CommandOutcome, FailureKind};
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};
use std::time::Duration;
use tracing::{debug, error, info, trace, warn};

/// 链路配置
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct LinkConfig {
    /// 单条命令的应答期限
    pub timeout: Duration,
    /// 健康探测的应答期限
    pub health_timeout: Duration,
}

impl Default for LinkConfig {
    fn default() -> Self {
        Self {
            timeout: Duration::from_secs(120),
            health_timeout: Duration::from_secs(3),
        }
    }
}

/// 排队中的一条命令
pub(crate) struct Job {
    pub command: Command,
    pub observer: Option<Arc<dyn JobObserver>>,
    pub reply: Sender<CommandOutcome>,
}

/// 链路线程与调用方共享的状态
#[derive(Debug, Default)]
pub(crate) struct LinkShared {
    pub link_up: AtomicBool,
    pub in_flight: AtomicBool,
    pub metrics: LinkMetrics,
}

impl LinkShared {
    pub fn set_link_up(&self, up: bool) {
        let was = self.link_up.swap(up, Ordering::AcqRel);
        if was != up {
            if up {
                info!("Controller link up");
            } else {
                warn!("Controller link down");
            }
        }
    }
}

/// 链路线程主循环
///
/// 所有发送端关闭后处理完剩余命令再退出。
pub(crate) fn link_loop(
    connector: Arc<dyn Connector>,
    jobs: Receiver<Job>,
    shared: Arc<LinkShared>,
    history: Arc<HistoryLog>,
    config: LinkConfig,
) {
    let mut session: Option<Box<dyn Transport>> = None;

    for job in jobs.iter() {
        shared.in_flight.store(true, Ordering::Release);
        if let Some(observer) = &job.observer {
            observer.on_started(&job.command);
        }

        let outcome = exchange(&mut session, connector.as_ref(), &job.command, &config, &shared);
        record_outcome(&shared.metrics, &outcome);

        history.append(job.command.describe(), outcome.render(), outcome.is_error());

        shared.in_flight.store(false, Ordering::Release);
        if let Some(observer) = &job.observer {
            observer.on_finished(&job.command, &outcome);
        }

        // 等待方可能已放弃（dispatch 不等待应答）
        let _ = job.reply.send(outcome);
    }

    debug!("Link worker exiting");
}

fn exchange(
    session: &mut Option<Box<dyn Transport>>,
    connector: &dyn Connector,
    command: &Command,
    config: &LinkConfig,
    shared: &LinkShared,
) -> CommandOutcome {
    shared.metrics.commands_total.fetch_add(1, Ordering::Relaxed);

    let mut transport = match session.take() {
        Some(transport) => transport,
        None => match connector.connect() {
            Ok(transport) => transport,
            Err(e) => {
                shared.metrics.connection_failures.fetch_add(1, Ordering::Relaxed);
                shared.set_link_up(false);
                error!("Cannot reach controller at {}: {}", connector.endpoint(), e);
                return CommandFailure::connection(format!(
                    "controller at {} unreachable: {}",
                    connector.endpoint(),
                    e
                ))
                .into();
            },
        },
    };

    let request = wire::encode_request(command);
    trace!("-> {}", request);

    match transport.request(&request, config.timeout) {
        Ok(reply) => {
            trace!("<- {}", reply);
            *session = Some(transport);
            shared.set_link_up(true);
            wire::decode_reply(&reply)
        },
        Err(TransportError::Timeout(waited)) => {
            // REQ 会话在收到应答前不能再次发送，丢弃后下次重建；
            // 迟到的应答也因此不会被当作后续命令的应答
            drop(transport);
            shared.metrics.timeouts.fetch_add(1, Ordering::Relaxed);
            warn!("No reply to '{}' within {:?}", command.name(), waited);
            CommandFailure::timeout(format!(
                "no reply to '{}' within {:?}; the action may still be in progress or may have completed",
                command.name(),
                waited
            ))
            .into()
        },
        Err(TransportError::Disconnected(reason)) => {
            drop(transport);
            shared.set_link_up(false);
            warn!("Link dropped during '{}': {}", command.name(), reason);

            // 重连一次，命令本身不重发
            shared.metrics.reconnects.fetch_add(1, Ordering::Relaxed);
            match connector.connect() {
                Ok(fresh) => {
                    info!("Reconnected to {}", connector.endpoint());
                    *session = Some(fresh);
                },
                Err(e) => {
                    shared.metrics.connection_failures.fetch_add(1, Ordering::Relaxed);
                    error!("Reconnect to {} failed: {}", connector.endpoint(), e);
                },
            }

            CommandFailure::connection(format!(
                "link to {} dropped during '{}': {}; the command was not retried",
                connector.endpoint(),
                command.name(),
                reason
            ))
            .into()
        },
    }
}

fn record_outcome(metrics: &LinkMetrics, outcome: &CommandOutcome) {
    match outcome.failure_ref() {
        None => {
            metrics.commands_succeeded.fetch_add(1, Ordering::Relaxed);
        },
        Some(failure) => {
            metrics.commands_failed.fetch_add(1, Ordering::Relaxed);
            if failure.kind == FailureKind::Rejected {
                metrics.rejections.fetch_add(1, Ordering::Relaxed);
            }
        },
    }
}
