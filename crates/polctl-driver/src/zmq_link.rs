//! ZeroMQ REQ 链路
//!
//! 每个会话一个 REQ 套接字，`LINGER = 0`，`IMMEDIATE = 1`。
//! 对端未连上时发送不会进入队列，而是在发送期限内失败并报告断开；
//! 应答期限按单次调用设置。

use crate::transport::{Connector, Transport, TransportError};
use std::time::Duration;
use tracing::debug;

/// 发送阶段等待对端连上的最长时间
const SEND_GRACE: Duration = Duration::from_secs(2);

/// ZeroMQ 会话工厂
pub struct ZmqConnector {
    context: zmq::Context,
    endpoint: String,
}

impl ZmqConnector {
    pub fn new(endpoint: impl Into<String>) -> Self {
        Self {
            context: zmq::Context::new(),
            endpoint: endpoint.into(),
        }
    }
}

impl Connector for ZmqConnector {
    fn connect(&self) -> Result<Box<dyn Transport>, TransportError> {
        let socket = self.context.socket(zmq::REQ).map_err(disconnected)?;
        socket.set_linger(0).map_err(disconnected)?;
        socket.set_immediate(true).map_err(disconnected)?;
        socket.connect(&self.endpoint).map_err(disconnected)?;
        debug!("Opened REQ session to {}", self.endpoint);
        Ok(Box::new(ZmqTransport {
            socket,
            endpoint: self.endpoint.clone(),
        }))
    }

    fn endpoint(&self) -> String {
        self.endpoint.clone()
    }
}

struct ZmqTransport {
    socket: zmq::Socket,
    endpoint: String,
}

impl Transport for ZmqTransport {
    fn request(&mut self, message: &str, timeout: Duration) -> Result<String, TransportError> {
        self.socket
            .set_sndtimeo(millis(timeout.min(SEND_GRACE)))
            .map_err(disconnected)?;
        self.socket.set_rcvtimeo(millis(timeout)).map_err(disconnected)?;

        self.socket
            .send(message, 0)
            .map_err(|e| send_error(e, &self.endpoint))?;

        match self.socket.recv_string(0) {
            Ok(Ok(text)) => Ok(text),
            Ok(Err(bytes)) => Ok(String::from_utf8_lossy(&bytes).into_owned()),
            Err(e) => Err(recv_error(e, timeout)),
        }
    }
}

fn millis(duration: Duration) -> i32 {
    i32::try_from(duration.as_millis()).unwrap_or(i32::MAX)
}

/// 发送失败：`IMMEDIATE` 下 `EAGAIN` 表示没有已连上的对端，报文未送出
fn send_error(err: zmq::Error, endpoint: &str) -> TransportError {
    match err {
        zmq::Error::EAGAIN => {
            TransportError::Disconnected(format!("controller at {} is not connected", endpoint))
        },
        e => disconnected(e),
    }
}

/// 接收失败：`EAGAIN` 表示报文已送出但期限内没有应答
fn recv_error(err: zmq::Error, timeout: Duration) -> TransportError {
    match err {
        zmq::Error::EAGAIN => TransportError::Timeout(timeout),
        e => disconnected(e),
    }
}

fn disconnected(err: zmq::Error) -> TransportError {
    TransportError::Disconnected(err.to_string())
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::time::Instant;

    #[test]
    fn test_send_eagain_is_disconnected() {
        let err = send_error(zmq::Error::EAGAIN, "tcp://127.0.0.1:5555");
        match err {
            TransportError::Disconnected(reason) => assert!(reason.contains("tcp://127.0.0.1:5555")),
            other => panic!("unexpected error: {:?}", other),
        }
    }

    #[test]
    fn test_recv_eagain_is_timeout() {
        let timeout = Duration::from_secs(3);
        assert!(matches!(
            recv_error(zmq::Error::EAGAIN, timeout),
            TransportError::Timeout(t) if t == timeout
        ));
        assert!(matches!(
            recv_error(zmq::Error::ETERM, timeout),
            TransportError::Disconnected(_)
        ));
    }

    #[test]
    fn test_absent_controller_fails_fast() {
        // 本地回环上没有监听者的端口
        let connector = ZmqConnector::new("tcp://127.0.0.1:1");
        let mut session = connector.connect().unwrap();

        let started = Instant::now();
        let err = session.request(r#"{"command":"test"}"#, Duration::from_secs(30)).unwrap_err();
        assert!(matches!(err, TransportError::Disconnected(_)), "got {:?}", err);
        assert!(started.elapsed() < Duration::from_secs(10));
    }
}
