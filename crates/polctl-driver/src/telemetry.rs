//! 计数遥测缓存
//!
//! 后台线程周期性读取计数流的最新记录，解码为 [`CountsSnapshot`] 后存入
//! `ArcSwap`，读取方无锁获取。
//!
//! # 新鲜度
//!
//! 每个快照带有其流 ID 作为令牌。`poll` 只有在令牌与上次交付给调用方的
//! 令牌不同时才报告 `has_new_data = true`，因此同一份数据不会被报告两次，
//! 没有数据时也不会返回全零快照。读取失败只影响统计，不影响 `poll`。

use crate::error::DriverError;
use crate::store::CountsStore;
use arc_swap::ArcSwapOption;
use chrono::{DateTime, Utc};
use crossbeam_channel::{RecvTimeoutError, Sender, bounded};
use parking_lot::Mutex;
use polctl_protocol::{CountsSnapshot, StreamId};
use serde::Serialize;
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::thread::{self, JoinHandle};
use std::time::Duration;
use tracing::{debug, error, trace, warn};

const TARGET: &str = "polctl::telemetry";

/// 连续失败达到此次数时健康状态为 `failing`
pub const FAILING_THRESHOLD: u64 = 5;

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TelemetryConfig {
    /// 计数组前缀（如 `VV`）
    pub prefix: String,
    /// 只接受已修剪的记录
    pub require_trimmed: bool,
    pub refresh_interval: Duration,
    /// 读取失败后的等待时间
    pub error_backoff: Duration,
}

impl Default for TelemetryConfig {
    fn default() -> Self {
        Self {
            prefix: "VV".to_string(),
            require_trimmed: true,
            refresh_interval: Duration::from_millis(200),
            error_backoff: Duration::from_secs(1),
        }
    }
}

/// `poll` 的结果
#[derive(Debug, Clone, Copy, PartialEq, Serialize)]
pub struct PollResult {
    pub has_new_data: bool,
    /// 仅在 `has_new_data` 时存在
    pub snapshot: Option<CountsSnapshot>,
    pub token: Option<StreamId>,
}

impl PollResult {
    fn unchanged() -> Self {
        Self {
            has_new_data: false,
            snapshot: None,
            token: None,
        }
    }
}

/// 一轮读取的结果
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RefreshResult {
    /// 发布了新快照
    Fresh(StreamId),
    /// 没有新记录，或记录被过滤/无法解码
    Unchanged,
    /// 存储不可用
    Failed,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum TelemetryHealth {
    NotStarted,
    NoDataYet,
    Healthy,
    Warning,
    Stale,
    Failing,
}

impl TelemetryHealth {
    pub fn as_str(&self) -> &'static str {
        match self {
            TelemetryHealth::NotStarted => "not_started",
            TelemetryHealth::NoDataYet => "no_data_yet",
            TelemetryHealth::Healthy => "healthy",
            TelemetryHealth::Warning => "warning",
            TelemetryHealth::Stale => "stale",
            TelemetryHealth::Failing => "failing",
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct TelemetryStats {
    pub total_reads: u64,
    pub failed_reads: u64,
    pub filtered_reads: u64,
    pub decode_errors: u64,
    pub consecutive_failures: u64,
    pub last_token: Option<StreamId>,
    pub last_successful_read: Option<DateTime<Utc>>,
    pub health: TelemetryHealth,
}

/// 最新快照
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct LatestCounts {
    pub token: StreamId,
    pub snapshot: CountsSnapshot,
    pub received_at: DateTime<Utc>,
}

#[derive(Debug, Default)]
struct TelemetryCounters {
    total_reads: AtomicU64,
    failed_reads: AtomicU64,
    filtered_reads: AtomicU64,
    decode_errors: AtomicU64,
    consecutive_failures: AtomicU64,
}

/// 轮询线程私有状态
#[derive(Default)]
struct ReaderState {
    /// 最近处理过的流 ID（含被过滤的记录）
    last_seen: Option<StreamId>,
    last_success: Option<DateTime<Utc>>,
}

/// 遥测缓存
pub struct TelemetryCache {
    store: Mutex<Box<dyn CountsStore>>,
    config: TelemetryConfig,
    latest: ArcSwapOption<LatestCounts>,
    /// 最近一次交付给调用方的令牌
    delivered: Mutex<Option<StreamId>>,
    reader: Mutex<ReaderState>,
    counters: TelemetryCounters,
    started: AtomicBool,
}

impl TelemetryCache {
    pub fn new(store: Box<dyn CountsStore>, config: TelemetryConfig) -> Self {
        Self {
            store: Mutex::new(store),
            config,
            latest: ArcSwapOption::empty(),
            delivered: Mutex::new(None),
            reader: Mutex::new(ReaderState::default()),
            counters: TelemetryCounters::default(),
            started: AtomicBool::new(false),
        }
    }

    /// 执行一轮读取
    pub fn refresh(&self) -> RefreshResult {
        self.started.store(true, Ordering::Relaxed);
        self.counters.total_reads.fetch_add(1, Ordering::Relaxed);

        let result = self.store.lock().newest();
        let record = match result {
            Ok(Some(record)) => record,
            Ok(None) => {
                self.note_success();
                return RefreshResult::Unchanged;
            },
            Err(e) => {
                self.counters.failed_reads.fetch_add(1, Ordering::Relaxed);
                let failures = self.counters.consecutive_failures.fetch_add(1, Ordering::Relaxed) + 1;
                if failures == FAILING_THRESHOLD {
                    error!(target: TARGET, "Counts store failing ({} consecutive errors): {}", failures, e);
                } else {
                    debug!(target: TARGET, "Counts read failed: {}", e);
                }
                return RefreshResult::Failed;
            },
        };

        {
            let mut reader = self.reader.lock();
            reader.last_success = Some(Utc::now());
            if reader.last_seen == Some(record.id) {
                drop(reader);
                self.counters.consecutive_failures.store(0, Ordering::Relaxed);
                return RefreshResult::Unchanged;
            }
            reader.last_seen = Some(record.id);
        }
        self.counters.consecutive_failures.store(0, Ordering::Relaxed);

        if self.config.require_trimmed && !record.counts.is_trimmed() {
            self.counters.filtered_reads.fetch_add(1, Ordering::Relaxed);
            trace!(target: TARGET, "Skipping untrimmed record {}", record.id);
            return RefreshResult::Unchanged;
        }

        match record.counts.snapshot(&self.config.prefix) {
            Ok(snapshot) => {
                self.latest.store(Some(Arc::new(LatestCounts {
                    token: record.id,
                    snapshot,
                    received_at: Utc::now(),
                })));
                trace!(target: TARGET, "Published counts {}", record.id);
                RefreshResult::Fresh(record.id)
            },
            Err(e) => {
                self.counters.decode_errors.fetch_add(1, Ordering::Relaxed);
                warn!(target: TARGET, "Cannot decode counts record {}: {}", record.id, e);
                RefreshResult::Unchanged
            },
        }
    }

    fn note_success(&self) {
        self.counters.consecutive_failures.store(0, Ordering::Relaxed);
        self.reader.lock().last_success = Some(Utc::now());
    }

    /// 非阻塞查询最新快照
    ///
    /// 同一令牌只报告一次 `has_new_data = true`。
    pub fn poll(&self) -> PollResult {
        let Some(latest) = self.latest.load_full() else {
            return PollResult::unchanged();
        };
        let mut delivered = self.delivered.lock();
        if *delivered == Some(latest.token) {
            return PollResult::unchanged();
        }
        *delivered = Some(latest.token);
        PollResult {
            has_new_data: true,
            snapshot: Some(latest.snapshot),
            token: Some(latest.token),
        }
    }

    /// 查看最新快照，不影响 `poll`
    pub fn latest(&self) -> Option<LatestCounts> {
        self.latest.load_full().map(|latest| *latest)
    }

    /// 下一次 `poll` 重新报告当前快照
    pub fn redeliver(&self) {
        *self.delivered.lock() = None;
    }

    pub fn store_reachable(&self) -> bool {
        self.store.lock().ping().is_ok()
    }

    pub fn config(&self) -> &TelemetryConfig {
        &self.config
    }

    pub fn stats(&self) -> TelemetryStats {
        let (last_token, last_successful_read) = {
            let reader = self.reader.lock();
            (reader.last_seen, reader.last_success)
        };
        let consecutive_failures = self.counters.consecutive_failures.load(Ordering::Relaxed);
        TelemetryStats {
            total_reads: self.counters.total_reads.load(Ordering::Relaxed),
            failed_reads: self.counters.failed_reads.load(Ordering::Relaxed),
            filtered_reads: self.counters.filtered_reads.load(Ordering::Relaxed),
            decode_errors: self.counters.decode_errors.load(Ordering::Relaxed),
            consecutive_failures,
            last_token,
            last_successful_read,
            health: self.health(consecutive_failures, last_successful_read, Utc::now()),
        }
    }

    fn health(
        &self,
        consecutive_failures: u64,
        last_success: Option<DateTime<Utc>>,
        now: DateTime<Utc>,
    ) -> TelemetryHealth {
        if !self.started.load(Ordering::Relaxed) {
            return TelemetryHealth::NotStarted;
        }
        if consecutive_failures >= FAILING_THRESHOLD {
            return TelemetryHealth::Failing;
        }
        let Some(last) = last_success else {
            return TelemetryHealth::NoDataYet;
        };
        let age = (now - last).to_std().unwrap_or(Duration::ZERO);
        if age <= Duration::from_secs(10) {
            TelemetryHealth::Healthy
        } else if age <= Duration::from_secs(60) {
            TelemetryHealth::Warning
        } else {
            TelemetryHealth::Stale
        }
    }
}

/// 后台轮询线程
///
/// Drop 时通知线程退出并等待。
pub struct TelemetryPoller {
    stop_tx: Option<Sender<()>>,
    handle: Option<JoinHandle<()>>,
}

impl TelemetryPoller {
    pub fn spawn(cache: Arc<TelemetryCache>) -> Result<Self, DriverError> {
        let (stop_tx, stop_rx) = bounded::<()>(1);
        let handle = thread::Builder::new()
            .name("polctl-telemetry".to_string())
            .spawn(move || {
                debug!(target: TARGET, "Telemetry poller started ({})", cache.store.lock().describe());
                loop {
                    let wait = match cache.refresh() {
                        RefreshResult::Failed => cache.config.error_backoff,
                        RefreshResult::Fresh(_) | RefreshResult::Unchanged => {
                            cache.config.refresh_interval
                        },
                    };
                    match stop_rx.recv_timeout(wait) {
                        Err(RecvTimeoutError::Timeout) => continue,
                        Ok(()) | Err(RecvTimeoutError::Disconnected) => break,
                    }
                }
                debug!(target: TARGET, "Telemetry poller stopped");
            })?;
        Ok(Self {
            stop_tx: Some(stop_tx),
            handle: Some(handle),
        })
    }
}

impl Drop for TelemetryPoller {
    fn drop(&mut self) {
        self.stop_tx.take();
        if let Some(handle) = self.handle.take()
            && handle.join().is_err()
        {
            error!(target: TARGET, "Telemetry poller panicked");
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::sim::MemoryCountsStore;
    use polctl_protocol::RawCounts;

    fn cache(store: &MemoryCountsStore) -> TelemetryCache {
        TelemetryCache::new(Box::new(store.clone()), TelemetryConfig::default())
    }

    #[test]
    fn test_poll_before_any_data() {
        let store = MemoryCountsStore::new();
        let cache = cache(&store);
        assert_eq!(cache.stats().health, TelemetryHealth::NotStarted);

        assert_eq!(cache.refresh(), RefreshResult::Unchanged);
        let result = cache.poll();
        assert!(!result.has_new_data);
        assert!(result.snapshot.is_none());
        assert_eq!(cache.stats().health, TelemetryHealth::Healthy);
    }

    #[test]
    fn test_same_token_reported_once() {
        let store = MemoryCountsStore::new();
        let cache = cache(&store);
        let id = store.publish_counts("VV", 10_000, 8_000, 400);

        assert_eq!(cache.refresh(), RefreshResult::Fresh(id));
        let first = cache.poll();
        assert!(first.has_new_data);
        assert_eq!(first.token, Some(id));
        assert_eq!(first.snapshot.unwrap().coincidences, 400);

        // 记录未变，再次读取也不算新数据
        assert_eq!(cache.refresh(), RefreshResult::Unchanged);
        assert!(!cache.poll().has_new_data);

        cache.redeliver();
        assert!(cache.poll().has_new_data);
    }

    #[test]
    fn test_untrimmed_records_filtered() {
        let store = MemoryCountsStore::new();
        let cache = cache(&store);
        store.publish(RawCounts::from_pairs([
            ("isTrim", "0"),
            ("VV", r#"{"As": 1, "Bs": 1, "C": 1}"#),
        ]));

        assert_eq!(cache.refresh(), RefreshResult::Unchanged);
        assert!(!cache.poll().has_new_data);
        assert_eq!(cache.stats().filtered_reads, 1);

        // 同一条记录不重复计数
        cache.refresh();
        assert_eq!(cache.stats().filtered_reads, 1);
    }

    #[test]
    fn test_missing_prefix_is_decode_error() {
        let store = MemoryCountsStore::new();
        let cache = cache(&store);
        store.publish_counts("HH", 1, 1, 1);

        assert_eq!(cache.refresh(), RefreshResult::Unchanged);
        assert_eq!(cache.stats().decode_errors, 1);
        assert!(cache.latest().is_none());
    }

    #[test]
    fn test_failures_do_not_touch_poll() {
        let store = MemoryCountsStore::new();
        let cache = cache(&store);
        store.publish_counts("VV", 100, 100, 10);
        cache.refresh();
        assert!(cache.poll().has_new_data);

        store.fail_next_reads(FAILING_THRESHOLD as u32);
        for _ in 0..FAILING_THRESHOLD {
            assert_eq!(cache.refresh(), RefreshResult::Failed);
        }
        let stats = cache.stats();
        assert_eq!(stats.health, TelemetryHealth::Failing);
        assert_eq!(stats.failed_reads, FAILING_THRESHOLD);

        let result = cache.poll();
        assert!(!result.has_new_data);
        assert!(cache.latest().is_some());

        assert_eq!(cache.refresh(), RefreshResult::Unchanged);
        assert_eq!(cache.stats().consecutive_failures, 0);
    }

    #[test]
    fn test_health_thresholds() {
        let store = MemoryCountsStore::new();
        let cache = cache(&store);
        cache.started.store(true, Ordering::Relaxed);
        let now = Utc::now();

        assert_eq!(cache.health(0, None, now), TelemetryHealth::NoDataYet);
        assert_eq!(cache.health(0, Some(now), now), TelemetryHealth::Healthy);
        assert_eq!(
            cache.health(0, Some(now - chrono::Duration::seconds(30)), now),
            TelemetryHealth::Warning
        );
        assert_eq!(
            cache.health(0, Some(now - chrono::Duration::seconds(120)), now),
            TelemetryHealth::Stale
        );
        assert_eq!(cache.health(7, Some(now), now), TelemetryHealth::Failing);
    }

    #[test]
    fn test_store_reachable() {
        let store = MemoryCountsStore::new();
        let cache = cache(&store);
        assert!(cache.store_reachable());
        store.set_reachable(false);
        assert!(!cache.store_reachable());
    }
}
