//! 模拟硬件
//!
//! - [`SimulatedController`]: 内存中的控制器，实现 [`Connector`]，
//!   可脚本化延迟、静默（超时）、断链和拒绝，并记录每条命令的到达/结束时刻
//! - [`MemoryCountsStore`]: 内存计数流，实现 [`CountsStore`]，可注入读取失败
//!
//! 用于测试和 CLI 的 `--simulate` 模式。

use crate::store::{CountsStore, StoreError};
use crate::transport::{Connector, Transport, TransportError};
use parking_lot::Mutex;
use polctl_protocol::wire::TEST_OK_MESSAGE;
use polctl_protocol::{Party, RawCounts, StreamId, StreamRecord};
use serde_json::{Map, Value, json};
use std::collections::{BTreeMap, HashMap, VecDeque};
use std::sync::Arc;
use std::thread;
use std::time::{Duration, Instant};

const SETTINGS: [&str; 6] = ["H", "V", "D", "A", "R", "L"];
const COMMANDS: [&str; 14] = [
    "test",
    "info",
    "commands",
    "positions",
    "get_motor_info",
    "get_current_path",
    "set_polarization",
    "calibrate",
    "home",
    "set_power",
    "set_pc_to_bell_angles",
    "forward",
    "backward",
    "goto",
];

/// 单条命令的脚本化行为
#[derive(Debug, Clone, PartialEq)]
pub enum SimBehavior {
    /// 按仪器模型正常执行
    Normal,
    /// 返回 `{"error": ...}`
    Reject(String),
    /// 不应答，直到调用方超时
    Silent,
    /// 会话断开
    Disconnect,
    /// 返回原始文本
    Raw(String),
}

/// 一次请求的记录
#[derive(Debug, Clone)]
pub struct SimExchange {
    pub command: String,
    pub params: Value,
    pub started: Instant,
    pub finished: Instant,
}

struct InstrumentModel {
    positions: BTreeMap<(Party, String), f64>,
    power: f64,
    current_path: String,
    bell_angles: Vec<f64>,
}

impl InstrumentModel {
    fn new() -> Self {
        let mut positions = BTreeMap::new();
        for party in [Party::Alice, Party::Bob] {
            for waveplate in ["HWP1", "QWP1", "QWP2"] {
                positions.insert((party, waveplate.to_string()), 0.0);
            }
        }
        positions.insert((Party::Source, "HWP1".to_string()), 0.0);
        Self {
            positions,
            power: 0.0,
            current_path: "H".to_string(),
            bell_angles: vec![0.0, 22.5, 45.0, 67.5],
        }
    }

    fn execute(&mut self, name: &str, params: &Value) -> Value {
        let party = || {
            params
                .get("party")
                .and_then(Value::as_str)
                .and_then(|p| p.parse::<Party>().ok())
        };

        match name {
            "test" => json!({ "message": TEST_OK_MESSAGE }),
            "info" => {
                let settings: Map<String, Value> = SETTINGS
                    .iter()
                    .map(|s| (s.to_string(), json!({ "path": s })))
                    .collect();
                json!({ "message": { "settings": settings, "power": self.power } })
            },
            "commands" => json!({ "message": COMMANDS }),
            "positions" => json!({ "message": self.positions_json() }),
            "get_motor_info" => {
                let mut info: BTreeMap<&str, Vec<&str>> = BTreeMap::new();
                for (party, waveplate) in self.positions.keys() {
                    info.entry(party.as_str()).or_default().push(waveplate.as_str());
                }
                json!({ "message": info })
            },
            "get_current_path" => json!({ "message": self.current_path }),
            "set_polarization" => {
                let setting = params.get("setting").and_then(Value::as_str).unwrap_or("");
                if !SETTINGS.contains(&setting) {
                    return json!({ "error": format!("Unknown polarization setting: {}", setting) });
                }
                self.current_path = setting.to_string();
                json!({ "message": format!("Polarization set to {}", setting) })
            },
            "calibrate" | "home" => {
                let Some(party) = party() else {
                    return json!({ "error": "Missing or unknown party" });
                };
                for ((p, _), position) in self.positions.iter_mut() {
                    if *p == party {
                        *position = 0.0;
                    }
                }
                let verb = if name == "home" { "Homed" } else { "Calibrated" };
                json!({ "message": format!("{} {}", verb, party) })
            },
            "set_power" => match params.get("power").and_then(Value::as_f64) {
                Some(power) => {
                    self.power = power;
                    json!({ "message": format!("Power set to {}", power) })
                },
                None => json!({ "error": "Missing power" }),
            },
            "set_pc_to_bell_angles" => {
                if let Some(angles) = params.get("angles").and_then(Value::as_array) {
                    self.bell_angles = angles.iter().filter_map(Value::as_f64).collect();
                }
                json!({ "message": { "bell_angles": self.bell_angles } })
            },
            "forward" | "backward" | "goto" => self.move_waveplate(name, party(), params),
            other => json!({ "error": format!("Unknown command: {}", other) }),
        }
    }

    fn move_waveplate(&mut self, name: &str, party: Option<Party>, params: &Value) -> Value {
        let Some(party) = party else {
            return json!({ "error": "Missing or unknown party" });
        };
        let waveplate = params.get("waveplate").and_then(Value::as_str).unwrap_or("");
        let Some(amount) = params.get("position").and_then(Value::as_f64) else {
            return json!({ "error": "Missing position" });
        };
        let Some(position) = self.positions.get_mut(&(party, waveplate.to_string())) else {
            return json!({ "error": format!("Unknown waveplate {} on {}", waveplate, party) });
        };

        *position = match name {
            "forward" => *position + amount,
            "backward" => *position - amount,
            _ => amount,
        };
        json!({ "message": { "party": party.as_str(), "waveplate": waveplate, "position": *position } })
    }

    fn positions_json(&self) -> Value {
        let mut out: BTreeMap<&str, BTreeMap<&str, f64>> = BTreeMap::new();
        for ((party, waveplate), position) in &self.positions {
            out.entry(party.as_str())
                .or_default()
                .insert(waveplate.as_str(), *position);
        }
        json!(out)
    }
}

struct SimState {
    latency: Duration,
    scripted: VecDeque<SimBehavior>,
    overrides: HashMap<String, SimBehavior>,
    refuse_connections: bool,
    connections: u64,
    exchanges: Vec<SimExchange>,
    model: InstrumentModel,
}

/// 模拟控制器
///
/// 克隆共享同一状态，测试可以在交给客户端后继续编排行为。
///
/// ```rust
/// use polctl_driver::sim::{SimBehavior, SimulatedController};
/// use std::time::Duration;
///
/// let sim = SimulatedController::new().with_latency(Duration::from_millis(10));
/// sim.script_next(SimBehavior::Silent);
/// ```
#[derive(Clone)]
pub struct SimulatedController {
    state: Arc<Mutex<SimState>>,
    endpoint: String,
}

impl Default for SimulatedController {
    fn default() -> Self {
        Self::new()
    }
}

impl SimulatedController {
    pub fn new() -> Self {
        Self {
            state: Arc::new(Mutex::new(SimState {
                latency: Duration::ZERO,
                scripted: VecDeque::new(),
                overrides: HashMap::new(),
                refuse_connections: false,
                connections: 0,
                exchanges: Vec::new(),
                model: InstrumentModel::new(),
            })),
            endpoint: "sim://controller".to_string(),
        }
    }

    /// 每条命令的处理耗时
    #[must_use]
    pub fn with_latency(self, latency: Duration) -> Self {
        self.set_latency(latency);
        self
    }

    pub fn set_latency(&self, latency: Duration) {
        self.state.lock().latency = latency;
    }

    /// 下一条命令（不论名称）使用指定行为，按调用顺序排队
    pub fn script_next(&self, behavior: SimBehavior) {
        self.state.lock().scripted.push_back(behavior);
    }

    /// 指定命令名的持续行为
    pub fn set_behavior(&self, command: &str, behavior: SimBehavior) {
        self.state.lock().overrides.insert(command.to_string(), behavior);
    }

    pub fn clear_behavior(&self, command: &str) {
        self.state.lock().overrides.remove(command);
    }

    /// 拒绝建立新会话
    pub fn refuse_connections(&self, refuse: bool) {
        self.state.lock().refuse_connections = refuse;
    }

    /// 已建立的会话数
    pub fn connection_count(&self) -> u64 {
        self.state.lock().connections
    }

    /// 已处理请求的记录（按结束顺序）
    pub fn exchanges(&self) -> Vec<SimExchange> {
        self.state.lock().exchanges.clone()
    }

    /// 已处理的命令名
    pub fn received_commands(&self) -> Vec<String> {
        self.state.lock().exchanges.iter().map(|e| e.command.clone()).collect()
    }

    pub fn position(&self, party: Party, waveplate: &str) -> Option<f64> {
        self.state
            .lock()
            .model
            .positions
            .get(&(party, waveplate.to_string()))
            .copied()
    }

    pub fn current_path(&self) -> String {
        self.state.lock().model.current_path.clone()
    }

    pub fn power(&self) -> f64 {
        self.state.lock().model.power
    }
}

impl Connector for SimulatedController {
    fn connect(&self) -> Result<Box<dyn Transport>, TransportError> {
        let mut state = self.state.lock();
        if state.refuse_connections {
            return Err(TransportError::Disconnected("connection refused".to_string()));
        }
        state.connections += 1;
        Ok(Box::new(SimSession {
            state: Arc::clone(&self.state),
        }))
    }

    fn endpoint(&self) -> String {
        self.endpoint.clone()
    }
}

struct SimSession {
    state: Arc<Mutex<SimState>>,
}

impl SimSession {
    fn record(&self, command: String, params: Value, started: Instant) {
        self.state.lock().exchanges.push(SimExchange {
            command,
            params,
            started,
            finished: Instant::now(),
        });
    }
}

impl Transport for SimSession {
    fn request(&mut self, message: &str, timeout: Duration) -> Result<String, TransportError> {
        let started = Instant::now();
        let request: Value = serde_json::from_str(message).unwrap_or(Value::Null);
        let name = request
            .get("cmd")
            .and_then(Value::as_str)
            .unwrap_or_default()
            .to_string();
        let params = request.get("params").cloned().unwrap_or_else(|| json!({}));

        let (behavior, latency) = {
            let mut state = self.state.lock();
            let behavior = state
                .scripted
                .pop_front()
                .or_else(|| state.overrides.get(&name).cloned())
                .unwrap_or(SimBehavior::Normal);
            (behavior, state.latency)
        };

        match behavior {
            SimBehavior::Silent => {
                thread::sleep(timeout);
                self.record(name, params, started);
                Err(TransportError::Timeout(timeout))
            },
            SimBehavior::Disconnect => {
                self.record(name, params, started);
                Err(TransportError::Disconnected("simulated link drop".to_string()))
            },
            SimBehavior::Reject(reason) => {
                thread::sleep(latency.min(timeout));
                self.record(name, params, started);
                Ok(json!({ "error": reason }).to_string())
            },
            SimBehavior::Raw(text) => {
                thread::sleep(latency.min(timeout));
                self.record(name, params, started);
                Ok(text)
            },
            SimBehavior::Normal => {
                // 动作照常执行，只是应答赶不上期限
                let reply = self.state.lock().model.execute(&name, &params);
                if latency > timeout {
                    thread::sleep(timeout);
                    self.record(name, params, started);
                    return Err(TransportError::Timeout(timeout));
                }
                thread::sleep(latency);
                self.record(name, params, started);
                Ok(reply.to_string())
            },
        }
    }
}

/// 只保留最新一条记录
struct MemoryStream {
    newest: Option<StreamRecord>,
    published: usize,
    last_id: StreamId,
    failing_reads: u32,
    reachable: bool,
}

/// 内存计数流
///
/// 克隆共享同一条流。
#[derive(Clone)]
pub struct MemoryCountsStore {
    inner: Arc<Mutex<MemoryStream>>,
}

impl Default for MemoryCountsStore {
    fn default() -> Self {
        Self::new()
    }
}

impl MemoryCountsStore {
    pub fn new() -> Self {
        Self {
            inner: Arc::new(Mutex::new(MemoryStream {
                newest: None,
                published: 0,
                last_id: StreamId::ZERO,
                failing_reads: 0,
                reachable: true,
            })),
        }
    }

    /// 追加一条记录，返回其流 ID（严格递增）
    pub fn publish(&self, counts: RawCounts) -> StreamId {
        let mut inner = self.inner.lock();
        let now_ms = chrono::Utc::now().timestamp_millis().max(0) as u64;
        let id = if now_ms > inner.last_id.ms {
            StreamId::new(now_ms, 0)
        } else {
            StreamId::new(inner.last_id.ms, inner.last_id.seq + 1)
        };
        inner.last_id = id;
        inner.newest = Some(StreamRecord { id, counts });
        inner.published += 1;
        id
    }

    /// 追加一条已修剪的计数记录
    pub fn publish_counts(&self, prefix: &str, alice: u64, bob: u64, coincidences: u64) -> StreamId {
        let group = json!({ "As": alice, "Bs": bob, "C": coincidences }).to_string();
        self.publish(RawCounts::from_pairs([
            ("isTrim", "1".to_string()),
            (prefix, group),
        ]))
    }

    /// 接下来 `count` 次读取返回不可用
    pub fn fail_next_reads(&self, count: u32) {
        self.inner.lock().failing_reads = count;
    }

    pub fn set_reachable(&self, reachable: bool) {
        self.inner.lock().reachable = reachable;
    }

    /// 累计发布的记录数
    pub fn published(&self) -> usize {
        self.inner.lock().published
    }
}

impl CountsStore for MemoryCountsStore {
    fn newest(&mut self) -> Result<Option<StreamRecord>, StoreError> {
        let mut inner = self.inner.lock();
        if !inner.reachable {
            return Err(StoreError::Unavailable("memory store offline".to_string()));
        }
        if inner.failing_reads > 0 {
            inner.failing_reads -= 1;
            return Err(StoreError::Unavailable("simulated read failure".to_string()));
        }
        Ok(inner.newest.clone())
    }

    fn ping(&mut self) -> Result<(), StoreError> {
        if self.inner.lock().reachable {
            Ok(())
        } else {
            Err(StoreError::Unavailable("memory store offline".to_string()))
        }
    }

    fn describe(&self) -> String {
        "memory".to_string()
    }
}
