//! 计数流数据类型
//!
//! 控制器把符合计数（singles / coincidences）写入一个追加型流，
//! 每条记录带有 `<ms>-<seq>` 形式的流 ID。流 ID 由存储端保证严格递增，
//! 因此直接作为"新鲜度令牌"使用。

use crate::error::ProtocolError;
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};
use std::fmt;
use std::str::FromStr;

/// 流记录 ID（新鲜度令牌）
///
/// 按 `(ms, seq)` 排序。
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub struct StreamId {
    pub ms: u64,
    pub seq: u64,
}

impl StreamId {
    pub const ZERO: StreamId = StreamId { ms: 0, seq: 0 };

    pub const fn new(ms: u64, seq: u64) -> Self {
        Self { ms, seq }
    }
}

impl fmt::Display for StreamId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}-{}", self.ms, self.seq)
    }
}

impl FromStr for StreamId {
    type Err = ProtocolError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let invalid = || ProtocolError::InvalidStreamId(s.to_string());
        let (ms, seq) = match s.split_once('-') {
            Some((ms, seq)) => (ms, seq),
            None => (s, "0"),
        };
        let ms = ms.parse::<u64>().map_err(|_| invalid())?;
        let seq = seq.parse::<u64>().map_err(|_| invalid())?;
        Ok(StreamId { ms, seq })
    }
}

/// 一条流记录的原始字段
///
/// 存储端每个字段值都是字符串；能解析为 JSON 的按 JSON 保存，否则保留原文。
#[derive(Debug, Clone, Default, PartialEq)]
pub struct RawCounts {
    fields: Map<String, Value>,
}

impl RawCounts {
    pub fn from_fields(fields: Map<String, Value>) -> Self {
        Self { fields }
    }

    /// 从字符串键值对解码
    pub fn from_pairs<K, V, I>(pairs: I) -> Self
    where
        K: Into<String>,
        V: AsRef<str>,
        I: IntoIterator<Item = (K, V)>,
    {
        let fields = pairs
            .into_iter()
            .map(|(key, raw)| {
                let raw = raw.as_ref();
                let value = serde_json::from_str::<Value>(raw)
                    .unwrap_or_else(|_| Value::String(raw.to_string()));
                (key.into(), value)
            })
            .collect();
        Self { fields }
    }

    pub fn fields(&self) -> &Map<String, Value> {
        &self.fields
    }

    /// 数据是否已经过修剪（`isTrim` 非 0）
    pub fn is_trimmed(&self) -> bool {
        match self.fields.get("isTrim") {
            Some(Value::Bool(flag)) => *flag,
            Some(Value::Number(n)) => n.as_f64().is_some_and(|v| v != 0.0),
            Some(Value::String(s)) => !matches!(s.trim(), "" | "0" | "false"),
            _ => false,
        }
    }

    /// 提取指定前缀（如 `VV`）下的计数并计算效率
    pub fn snapshot(&self, prefix: &str) -> Result<CountsSnapshot, ProtocolError> {
        let Some(group) = self.fields.get(prefix) else {
            return Err(ProtocolError::MissingPrefix {
                prefix: prefix.to_string(),
                available: self.fields.keys().cloned().collect(),
            });
        };

        let alice = count_field(group, "As")?;
        let bob = count_field(group, "Bs")?;
        let coincidences = count_field(group, "C")?;
        Ok(CountsSnapshot::from_counts(alice, bob, coincidences))
    }
}

/// 读取计数字段；缺失视为 0
fn count_field(group: &Value, field: &str) -> Result<u64, ProtocolError> {
    let invalid = |value: &Value| ProtocolError::InvalidCounts {
        field: field.to_string(),
        value: value.to_string(),
    };

    match group.get(field) {
        None | Some(Value::Null) => Ok(0),
        Some(value @ Value::Number(n)) => {
            if let Some(v) = n.as_u64() {
                Ok(v)
            } else if let Some(v) = n.as_f64().filter(|v| v.is_finite() && *v >= 0.0) {
                Ok(v.trunc() as u64)
            } else {
                Err(invalid(value))
            }
        },
        Some(value @ Value::String(s)) => s.trim().parse::<u64>().map_err(|_| invalid(value)),
        Some(other) => Err(invalid(other)),
    }
}

/// 一条流记录
#[derive(Debug, Clone, PartialEq)]
pub struct StreamRecord {
    pub id: StreamId,
    pub counts: RawCounts,
}

/// 计数快照
///
/// 效率为百分比，保留一位小数；分母为 0 时为 0。
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct CountsSnapshot {
    pub alice_singles: u64,
    pub bob_singles: u64,
    pub coincidences: u64,
    pub alice_efficiency: f64,
    pub bob_efficiency: f64,
    pub joint_efficiency: f64,
}

impl CountsSnapshot {
    pub fn from_counts(alice_singles: u64, bob_singles: u64, coincidences: u64) -> Self {
        let c = coincidences as f64;
        let a = alice_singles as f64;
        let b = bob_singles as f64;

        let alice_efficiency = if bob_singles > 0 {
            round1(100.0 * c / b)
        } else {
            0.0
        };
        let bob_efficiency = if alice_singles > 0 {
            round1(100.0 * c / a)
        } else {
            0.0
        };
        let joint_efficiency = if alice_singles > 0 && bob_singles > 0 {
            round1(100.0 * c / (a * b).sqrt())
        } else {
            0.0
        };

        Self {
            alice_singles,
            bob_singles,
            coincidences,
            alice_efficiency,
            bob_efficiency,
            joint_efficiency,
        }
    }
}

fn round1(value: f64) -> f64 {
    (value * 10.0).round() / 10.0
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_stream_id_parse_and_order() {
        let a: StreamId = "1700000000000-0".parse().unwrap();
        let b: StreamId = "1700000000000-1".parse().unwrap();
        let c: StreamId = "1700000000001".parse().unwrap();
        assert!(a < b && b < c);
        assert_eq!(c, StreamId::new(1_700_000_000_001, 0));
        assert_eq!(b.to_string(), "1700000000000-1");
        assert!("abc-1".parse::<StreamId>().is_err());
    }

    #[test]
    fn test_snapshot_efficiencies() {
        let snap = CountsSnapshot::from_counts(10_000, 8_000, 400);
        assert_eq!(snap.alice_efficiency, 5.0);
        assert_eq!(snap.bob_efficiency, 4.0);
        // 400 / sqrt(8e7) * 100 = 4.472...
        assert_eq!(snap.joint_efficiency, 4.5);
    }

    #[test]
    fn test_snapshot_zero_denominators() {
        let snap = CountsSnapshot::from_counts(0, 0, 0);
        assert_eq!(snap.alice_efficiency, 0.0);
        assert_eq!(snap.bob_efficiency, 0.0);
        assert_eq!(snap.joint_efficiency, 0.0);
    }

    #[test]
    fn test_raw_counts_from_pairs() {
        let raw = RawCounts::from_pairs([
            ("isTrim", "1"),
            ("VV", r#"{"As": 1200, "Bs": "1000", "C": 50.0}"#),
            ("note", "not json"),
        ]);
        assert!(raw.is_trimmed());
        assert_eq!(raw.fields()["note"], json!("not json"));

        let snap = raw.snapshot("VV").unwrap();
        assert_eq!(snap.alice_singles, 1200);
        assert_eq!(snap.bob_singles, 1000);
        assert_eq!(snap.coincidences, 50);
    }

    #[test]
    fn test_missing_prefix_and_untrimmed() {
        let raw = RawCounts::from_pairs([("isTrim", "0"), ("HH", "{}")]);
        assert!(!raw.is_trimmed());
        assert!(matches!(
            raw.snapshot("VV"),
            Err(ProtocolError::MissingPrefix { .. })
        ));
        // 缺失字段按 0 处理
        let snap = raw.snapshot("HH").unwrap();
        assert_eq!(snap.coincidences, 0);
    }
}
