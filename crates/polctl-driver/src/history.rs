//! 命令历史
//!
//! 最近 N 条（默认 200）命令及其应答，新的在前。
//!
//! # 持久化
//!
//! - 内存列表是权威数据，追加操作从不失败
//! - 文件写入在独立线程完成，经 `bounded(1024)` 通道投递，使用 `try_send`：
//!   队列满或写线程退出时只计数丢弃，条目仍保留在内存中
//! - 文件为 JSON Lines，每行一条 `{"id","timestamp","command","response","isError"}`
//! - 启动时读取文件末尾最多 `capacity` 条合法记录，跳过损坏行
//! - 文件行数超过 `2 × capacity` 时写线程压缩文件（写临时文件后重命名）

use crate::error::DriverError;
use chrono::{DateTime, Utc};
use crossbeam_channel::{Receiver, Sender, TrySendError, bounded};
use parking_lot::Mutex;
use serde::{Deserialize, Serialize};
use std::collections::VecDeque;
use std::fs::{self, File, OpenOptions};
use std::io::{self, BufRead, BufReader, BufWriter, Write};
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::sync::atomic::{AtomicU64, Ordering};
use std::thread::{self, JoinHandle};
use std::time::Duration;
use tracing::{debug, error, info, warn};

/// 默认容量
pub const DEFAULT_CAPACITY: usize = 200;

/// 加载时允许 ID 超前当前时间的上限（一天）
const MAX_ID_SKEW_MS: u64 = 24 * 60 * 60 * 1000;

/// 写线程队列容量
const WRITER_QUEUE_CAPACITY: usize = 1024;

/// `clear` 等待写线程确认的期限
const CLEAR_TIMEOUT: Duration = Duration::from_secs(5);

/// 一条历史记录
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct HistoryEntry {
    /// 毫秒时间戳，严格递增
    pub id: u64,
    pub timestamp: DateTime<Utc>,
    pub command: String,
    pub response: String,
    #[serde(rename = "isError", default)]
    pub is_error: bool,
}

/// 历史统计
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct HistoryStats {
    pub total: usize,
    pub errors: usize,
    pub successes: usize,
    pub capacity: usize,
    pub file: Option<PathBuf>,
    pub file_exists: bool,
    /// 未能进入写队列的条目数
    pub dropped_writes: u64,
    /// 写文件失败的次数
    pub failed_writes: u64,
}

struct Entries {
    /// 新的在前
    items: VecDeque<HistoryEntry>,
    last_id: u64,
}

impl Entries {
    fn next_id(&mut self, now: DateTime<Utc>) -> u64 {
        let millis = now.timestamp_millis().max(0) as u64;
        let id = millis.max(self.last_id.saturating_add(1));
        self.last_id = id;
        id
    }
}

/// 加载记录中可信的最大 ID
///
/// ID 是毫秒时间戳，超前当前时间 [`MAX_ID_SKEW_MS`] 以上的视为损坏并忽略，
/// 否则后续 ID 会被钉在异常值上。
fn seed_last_id(entries: &VecDeque<HistoryEntry>, now: DateTime<Utc>) -> u64 {
    let limit = (now.timestamp_millis().max(0) as u64).saturating_add(MAX_ID_SKEW_MS);
    let mut last_id = 0;
    for entry in entries {
        if entry.id > limit {
            warn!("Ignoring implausible history id {} when seeding ids", entry.id);
            continue;
        }
        last_id = last_id.max(entry.id);
    }
    last_id
}

/// 命令历史
pub struct HistoryLog {
    entries: Mutex<Entries>,
    capacity: usize,
    writer: Option<HistoryWriter>,
    dropped_writes: AtomicU64,
}

impl HistoryLog {
    /// 仅内存，不持久化
    pub fn in_memory(capacity: usize) -> Self {
        Self {
            entries: Mutex::new(Entries {
                items: VecDeque::with_capacity(capacity),
                last_id: 0,
            }),
            capacity: capacity.max(1),
            writer: None,
            dropped_writes: AtomicU64::new(0),
        }
    }

    /// 打开文件支持的历史并启动写线程
    ///
    /// 文件不可读时记录错误并以空历史启动。
    pub fn open(path: impl Into<PathBuf>, capacity: usize) -> Result<Self, DriverError> {
        if capacity == 0 {
            return Err(DriverError::Config(
                "history capacity must be greater than 0".to_string(),
            ));
        }
        let path = path.into();

        let loaded = match load_tail(&path, capacity) {
            Ok(loaded) => loaded,
            Err(e) => {
                error!(
                    "History store unavailable, starting empty ({}): {}",
                    path.display(),
                    e
                );
                LoadedHistory::default()
            },
        };
        info!(
            "Loaded {} history entries from {}",
            loaded.entries.len(),
            path.display()
        );

        let last_id = seed_last_id(&loaded.entries, Utc::now());
        let items: VecDeque<HistoryEntry> = loaded.entries.iter().rev().cloned().collect();

        let writer = HistoryWriter::spawn(FileSink {
            path,
            capacity,
            tail: loaded.entries,
            lines_on_disk: loaded.lines_on_disk,
            failed_writes: Arc::new(AtomicU64::new(0)),
        })?;

        Ok(Self {
            entries: Mutex::new(Entries { items, last_id }),
            capacity,
            writer: Some(writer),
            dropped_writes: AtomicU64::new(0),
        })
    }

    /// 追加一条记录
    ///
    /// 持久化失败不会影响调用方，条目至少保留在内存中。
    pub fn append(
        &self,
        command: impl Into<String>,
        response: impl Into<String>,
        is_error: bool,
    ) -> HistoryEntry {
        let now = Utc::now();
        let mut entries = self.entries.lock();
        let entry = HistoryEntry {
            id: entries.next_id(now),
            timestamp: now,
            command: command.into(),
            response: response.into(),
            is_error,
        };
        entries.items.push_front(entry.clone());
        entries.items.truncate(self.capacity);

        // 持锁投递，保证文件顺序与内存顺序一致
        if let Some(writer) = &self.writer {
            match writer.tx.try_send(WriterMessage::Append(entry.clone())) {
                Ok(()) => {},
                Err(TrySendError::Full(_)) => {
                    self.dropped_writes.fetch_add(1, Ordering::Relaxed);
                    warn!("History writer queue full, entry {} kept in memory only", entry.id);
                },
                Err(TrySendError::Disconnected(_)) => {
                    self.dropped_writes.fetch_add(1, Ordering::Relaxed);
                    warn!("History writer stopped, entry {} kept in memory only", entry.id);
                },
            }
        }
        entry
    }

    /// 全部记录，新的在前
    pub fn list(&self) -> Vec<HistoryEntry> {
        self.entries.lock().items.iter().cloned().collect()
    }

    /// 最近 `limit` 条，新的在前
    pub fn recent(&self, limit: usize) -> Vec<HistoryEntry> {
        self.entries.lock().items.iter().take(limit).cloned().collect()
    }

    pub fn latest(&self) -> Option<HistoryEntry> {
        self.entries.lock().items.front().cloned()
    }

    pub fn len(&self) -> usize {
        self.entries.lock().items.len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    pub fn capacity(&self) -> usize {
        self.capacity
    }

    pub fn stats(&self) -> HistoryStats {
        let (total, errors) = {
            let entries = self.entries.lock();
            let errors = entries.items.iter().filter(|e| e.is_error).count();
            (entries.items.len(), errors)
        };
        let file = self.writer.as_ref().map(|w| w.path.clone());
        let file_exists = file.as_deref().is_some_and(Path::exists);
        HistoryStats {
            total,
            errors,
            successes: total - errors,
            capacity: self.capacity,
            file,
            file_exists,
            dropped_writes: self.dropped_writes.load(Ordering::Relaxed),
            failed_writes: self
                .writer
                .as_ref()
                .map_or(0, |w| w.failed_writes.load(Ordering::Relaxed)),
        }
    }

    /// 清空内存和文件
    pub fn clear(&self) -> Result<(), DriverError> {
        let mut entries = self.entries.lock();
        entries.items.clear();

        let Some(writer) = &self.writer else {
            return Ok(());
        };
        let (ack_tx, ack_rx) = bounded(1);
        writer
            .tx
            .send_timeout(WriterMessage::Clear(ack_tx), CLEAR_TIMEOUT)
            .map_err(|_| DriverError::StoreUnavailable("history writer not responding".to_string()))?;
        drop(entries);

        match ack_rx.recv_timeout(CLEAR_TIMEOUT) {
            Ok(Ok(())) => {
                info!("Command history cleared");
                Ok(())
            },
            Ok(Err(reason)) => Err(DriverError::StoreUnavailable(reason)),
            Err(_) => Err(DriverError::StoreUnavailable(
                "history writer did not confirm clear".to_string(),
            )),
        }
    }

    /// 等待已排队的写入落盘
    pub fn flush(&self, timeout: Duration) -> Result<(), DriverError> {
        let Some(writer) = &self.writer else {
            return Ok(());
        };
        let (ack_tx, ack_rx) = bounded(1);
        writer
            .tx
            .send_timeout(WriterMessage::Flush(ack_tx), timeout)
            .map_err(|_| DriverError::Timeout)?;
        ack_rx.recv_timeout(timeout).map_err(|_| DriverError::Timeout)
    }
}

enum WriterMessage {
    Append(HistoryEntry),
    Flush(Sender<()>),
    Clear(Sender<Result<(), String>>),
}

/// 写线程句柄，析构时关闭队列并等待线程退出
struct HistoryWriter {
    tx: Sender<WriterMessage>,
    path: PathBuf,
    failed_writes: Arc<AtomicU64>,
    handle: Option<JoinHandle<()>>,
}

impl HistoryWriter {
    fn spawn(sink: FileSink) -> Result<Self, DriverError> {
        let (tx, rx) = bounded(WRITER_QUEUE_CAPACITY);
        let path = sink.path.clone();
        let failed_writes = Arc::clone(&sink.failed_writes);
        let handle = thread::Builder::new()
            .name("polctl-history".to_string())
            .spawn(move || writer_loop(rx, sink))?;
        Ok(Self {
            tx,
            path,
            failed_writes,
            handle: Some(handle),
        })
    }
}

impl Drop for HistoryWriter {
    fn drop(&mut self) {
        // 替换发送端使接收端断开，写线程处理完剩余消息后退出
        let (closed, _) = bounded(0);
        drop(std::mem::replace(&mut self.tx, closed));
        if let Some(handle) = self.handle.take() {
            if handle.join().is_err() {
                error!("History writer thread panicked");
            }
        }
    }
}

fn writer_loop(rx: Receiver<WriterMessage>, mut sink: FileSink) {
    if sink.needs_compaction() {
        sink.compact();
    }
    for message in rx.iter() {
        match message {
            WriterMessage::Append(entry) => sink.append(entry),
            WriterMessage::Flush(ack) => {
                let _ = ack.send(());
            },
            WriterMessage::Clear(ack) => {
                let _ = ack.send(sink.clear().map_err(|e| e.to_string()));
            },
        }
    }
    debug!("History writer exiting");
}

struct FileSink {
    path: PathBuf,
    capacity: usize,
    /// 文件中最新的 `capacity` 条，旧的在前
    tail: VecDeque<HistoryEntry>,
    lines_on_disk: usize,
    failed_writes: Arc<AtomicU64>,
}

impl FileSink {
    fn append(&mut self, entry: HistoryEntry) {
        let result = self.write_line(&entry);
        self.tail.push_back(entry);
        while self.tail.len() > self.capacity {
            self.tail.pop_front();
        }

        match result {
            Ok(()) => {
                self.lines_on_disk += 1;
                if self.needs_compaction() {
                    self.compact();
                }
            },
            Err(e) => {
                self.failed_writes.fetch_add(1, Ordering::Relaxed);
                error!(
                    "History store unavailable ({}): {}",
                    self.path.display(),
                    e
                );
            },
        }
    }

    fn write_line(&self, entry: &HistoryEntry) -> io::Result<()> {
        if let Some(parent) = self.path.parent().filter(|p| !p.as_os_str().is_empty()) {
            fs::create_dir_all(parent)?;
        }
        let line = serde_json::to_string(entry)?;
        let mut file = OpenOptions::new()
            .create(true)
            .append(true)
            .open(&self.path)?;
        writeln!(file, "{}", line)
    }

    fn needs_compaction(&self) -> bool {
        self.lines_on_disk > self.capacity * 2
    }

    fn compact(&mut self) {
        match self.rewrite() {
            Ok(()) => {
                debug!(
                    "Compacted history file from {} to {} lines",
                    self.lines_on_disk,
                    self.tail.len()
                );
                self.lines_on_disk = self.tail.len();
            },
            Err(e) => {
                self.failed_writes.fetch_add(1, Ordering::Relaxed);
                error!("Failed to compact history file {}: {}", self.path.display(), e);
            },
        }
    }

    fn rewrite(&self) -> io::Result<()> {
        let mut temp_path = self.path.clone().into_os_string();
        temp_path.push(".tmp");
        let temp_path = PathBuf::from(temp_path);

        let mut out = BufWriter::new(File::create(&temp_path)?);
        for entry in &self.tail {
            writeln!(out, "{}", serde_json::to_string(entry)?)?;
        }
        out.into_inner().map_err(io::IntoInnerError::into_error)?.sync_all()?;
        fs::rename(&temp_path, &self.path)
    }

    fn clear(&mut self) -> io::Result<()> {
        self.tail.clear();
        self.lines_on_disk = 0;
        match fs::remove_file(&self.path) {
            Ok(()) => Ok(()),
            Err(e) if e.kind() == io::ErrorKind::NotFound => Ok(()),
            Err(e) => Err(e),
        }
    }
}

#[derive(Default)]
struct LoadedHistory {
    /// 旧的在前
    entries: VecDeque<HistoryEntry>,
    lines_on_disk: usize,
}

fn load_tail(path: &Path, capacity: usize) -> io::Result<LoadedHistory> {
    let file = match File::open(path) {
        Ok(file) => file,
        Err(e) if e.kind() == io::ErrorKind::NotFound => {
            debug!("No history file at {}", path.display());
            return Ok(LoadedHistory::default());
        },
        Err(e) => return Err(e),
    };

    let mut loaded = LoadedHistory::default();
    for (index, line) in BufReader::new(file).lines().enumerate() {
        let line = line?;
        if line.trim().is_empty() {
            continue;
        }
        loaded.lines_on_disk += 1;
        match serde_json::from_str::<HistoryEntry>(&line) {
            Ok(entry) => {
                loaded.entries.push_back(entry);
                if loaded.entries.len() > capacity {
                    loaded.entries.pop_front();
                }
            },
            Err(e) => warn!(
                "Skipping malformed history line {} in {}: {}",
                index + 1,
                path.display(),
                e
            ),
        }
    }
    Ok(loaded)
}
