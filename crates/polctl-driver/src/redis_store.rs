//! Redis Stream 计数存储
//!
//! 使用 `XREVRANGE <stream> + - COUNT 1` 读取最新记录。
//! 连接在出错后丢弃，下一轮读取时重新建立。

use crate::store::{CountsStore, StoreError};
use polctl_protocol::{ProtocolError, RawCounts, StreamId, StreamRecord};
use redis::Commands;
use redis::streams::StreamRangeReply;
use std::time::Duration;
use tracing::{debug, warn};

const CONNECT_TIMEOUT: Duration = Duration::from_secs(2);
const IO_TIMEOUT: Duration = Duration::from_secs(2);

pub struct RedisCountsStore {
    client: redis::Client,
    stream: String,
    connection: Option<redis::Connection>,
}

impl RedisCountsStore {
    /// 解析 URL（不立即连接）
    pub fn open(url: &str, stream: impl Into<String>) -> Result<Self, StoreError> {
        let client = redis::Client::open(url).map_err(unavailable)?;
        Ok(Self {
            client,
            stream: stream.into(),
            connection: None,
        })
    }

    fn connection(&mut self) -> Result<&mut redis::Connection, StoreError> {
        if self.connection.is_none() {
            let connection = self
                .client
                .get_connection_with_timeout(CONNECT_TIMEOUT)
                .map_err(unavailable)?;
            connection.set_read_timeout(Some(IO_TIMEOUT)).map_err(unavailable)?;
            connection.set_write_timeout(Some(IO_TIMEOUT)).map_err(unavailable)?;
            debug!("Connected to counts store {}", self.describe());
            self.connection = Some(connection);
        }
        self.connection
            .as_mut()
            .ok_or_else(|| StoreError::Unavailable("no connection".to_string()))
    }

    fn read_newest(&mut self) -> Result<Option<StreamRecord>, StoreError> {
        let stream = self.stream.clone();
        let connection = self.connection()?;
        let reply: StreamRangeReply = connection
            .xrevrange_count(&stream, "+", "-", 1)
            .map_err(unavailable)?;

        let Some(entry) = reply.ids.into_iter().next() else {
            return Ok(None);
        };

        let id: StreamId = entry
            .id
            .parse()
            .map_err(|e: ProtocolError| StoreError::Malformed(e.to_string()))?;

        let mut pairs = Vec::with_capacity(entry.map.len());
        for (field, value) in &entry.map {
            let text: String = redis::from_redis_value(value)
                .map_err(|e| StoreError::Malformed(format!("field {}: {}", field, e)))?;
            pairs.push((field.clone(), text));
        }

        Ok(Some(StreamRecord {
            id,
            counts: RawCounts::from_pairs(pairs),
        }))
    }
}

impl CountsStore for RedisCountsStore {
    fn newest(&mut self) -> Result<Option<StreamRecord>, StoreError> {
        let result = self.read_newest();
        if let Err(StoreError::Unavailable(reason)) = &result {
            warn!("Counts store read failed, dropping connection: {}", reason);
            self.connection = None;
        }
        result
    }

    fn ping(&mut self) -> Result<(), StoreError> {
        let result = self.connection().and_then(|connection| {
            redis::cmd("PING")
                .query::<String>(connection)
                .map(|_| ())
                .map_err(unavailable)
        });
        if result.is_err() {
            self.connection = None;
        }
        result
    }

    fn describe(&self) -> String {
        let info = self.client.get_connection_info();
        format!("{} stream={}", info.addr, self.stream)
    }
}

fn unavailable(err: redis::RedisError) -> StoreError {
    StoreError::Unavailable(err.to_string())
}
