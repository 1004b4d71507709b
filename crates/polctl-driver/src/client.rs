//! 消息客户端（对外 API）
//!
//! 所有命令经同一个 FIFO 队列交给链路线程，逐条执行。
//! 调用方线程只负责排队和等待，不接触会话本身。

use crate::error::DriverError;
use crate::history::HistoryLog;
use crate::hooks::JobObserver;
use crate::metrics::LinkMetricsSnapshot;
use crate::pipeline::{Job, LinkConfig, LinkShared, link_loop};
use crate::transport::Connector;
use crossbeam_channel::{Receiver, Sender, bounded, unbounded};
use polctl_protocol::wire;
use polctl_protocol::{Command, CommandFailure, CommandOutcome};
use serde::Serialize;
use std::sync::Arc;
use std::sync::atomic::Ordering;
use std::thread::{self, JoinHandle};
use std::time::Duration;
use tracing::{debug, error};

/// 链路健康状态
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct LinkHealth {
    pub link_up: bool,
    pub endpoint: String,
    /// 本次是否实际探测；为 `false` 时是最近一次已知状态
    pub probed: bool,
}

/// 尚未返回的应答
pub struct PendingReply {
    rx: Receiver<CommandOutcome>,
}

impl PendingReply {
    /// 阻塞直到链路线程给出结果
    pub fn wait(self) -> CommandOutcome {
        self.rx.recv().unwrap_or_else(|_| worker_stopped())
    }

    /// 最多等待 `timeout`，超时返回 `None`（命令仍在队列或执行中）
    pub fn wait_timeout(&self, timeout: Duration) -> Option<CommandOutcome> {
        self.rx.recv_timeout(timeout).ok()
    }
}

fn worker_stopped() -> CommandOutcome {
    CommandFailure::connection("link worker stopped before replying").into()
}

/// 消息客户端
pub struct MessagingClient {
    /// Drop 时先关闭，链路线程才能收到 `Disconnected` 退出
    job_tx: Option<Sender<Job>>,
    shared: Arc<LinkShared>,
    connector: Arc<dyn Connector>,
    config: LinkConfig,
    worker: Option<JoinHandle<()>>,
}

impl MessagingClient {
    /// 启动链路线程
    ///
    /// 不立即连接，第一次发送命令时建立会话。
    pub fn new(
        connector: Arc<dyn Connector>,
        history: Arc<HistoryLog>,
        config: LinkConfig,
    ) -> Result<Self, DriverError> {
        let (job_tx, job_rx) = unbounded();
        let shared = Arc::new(LinkShared::default());

        let worker = {
            let connector = Arc::clone(&connector);
            let shared = Arc::clone(&shared);
            thread::Builder::new()
                .name("polctl-link".to_string())
                .spawn(move || link_loop(connector, job_rx, shared, history, config))?
        };

        debug!("Link worker started for {}", connector.endpoint());
        Ok(Self {
            job_tx: Some(job_tx),
            shared,
            connector,
            config,
            worker: Some(worker),
        })
    }

    /// 发送命令并等待结果
    ///
    /// 硬件层面的失败以 [`CommandOutcome::Failure`] 返回，每条命令恰好产生一条历史记录。
    pub fn send(&self, command: Command) -> CommandOutcome {
        match self.submit(command, None) {
            Ok(pending) => pending.wait(),
            Err(_) => worker_stopped(),
        }
    }

    /// 排队命令，立即返回
    ///
    /// 命令按调用顺序执行。
    pub fn submit(
        &self,
        command: Command,
        observer: Option<Arc<dyn JobObserver>>,
    ) -> Result<PendingReply, DriverError> {
        let job_tx = self.job_tx.as_ref().ok_or(DriverError::ChannelClosed)?;
        let (reply_tx, reply_rx) = bounded(1);
        job_tx
            .send(Job {
                command,
                observer,
                reply: reply_tx,
            })
            .map_err(|_| DriverError::ChannelClosed)?;
        Ok(PendingReply { rx: reply_rx })
    }

    /// 链路健康检查
    ///
    /// 链路线程空闲且队列为空时用独立会话发送 `test` 探测，最长 `health_timeout`；
    /// 有命令在执行或排队时不探测，直接返回最近一次已知状态。
    pub fn health_check(&self) -> LinkHealth {
        let endpoint = self.connector.endpoint();
        if self.is_busy() || self.queue_len() > 0 {
            return LinkHealth {
                link_up: self.shared.link_up.load(Ordering::Acquire),
                endpoint,
                probed: false,
            };
        }

        let link_up = self.probe();
        self.shared.set_link_up(link_up);
        LinkHealth {
            link_up,
            endpoint,
            probed: true,
        }
    }

    fn probe(&self) -> bool {
        let mut session = match self.connector.connect() {
            Ok(session) => session,
            Err(e) => {
                debug!("Health probe could not connect: {}", e);
                return false;
            },
        };
        let request = wire::encode_request(&Command::new("test"));
        match session.request(&request, self.config.health_timeout) {
            Ok(reply) => match wire::decode_reply(&reply) {
                CommandOutcome::Success { payload } => wire::is_test_ok(&payload),
                CommandOutcome::Failure(failure) => {
                    debug!("Health probe failed: {}", failure);
                    false
                },
            },
            Err(e) => {
                debug!("Health probe failed: {}", e);
                false
            },
        }
    }

    /// 是否有命令正在执行
    pub fn is_busy(&self) -> bool {
        self.shared.in_flight.load(Ordering::Acquire)
    }

    /// 排队等待的命令数（不含正在执行的）
    pub fn queue_len(&self) -> usize {
        self.job_tx.as_ref().map_or(0, Sender::len)
    }

    pub fn endpoint(&self) -> String {
        self.connector.endpoint()
    }

    pub fn metrics(&self) -> LinkMetricsSnapshot {
        self.shared.metrics.snapshot()
    }

    pub fn config(&self) -> LinkConfig {
        self.config
    }
}

impl Drop for MessagingClient {
    fn drop(&mut self) {
        self.job_tx.take();
        if let Some(handle) = self.worker.take()
            && handle.join().is_err()
        {
            error!("Link worker thread panicked");
        }
    }
}
