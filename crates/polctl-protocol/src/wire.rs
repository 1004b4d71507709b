//! 控制器报文编解码
//!
//! 请求格式：`{"cmd": <name>, "params": {...}}`
//!
//! 应答解析规则：
//! - 空应答 → Protocol 失败
//! - 纯文本 `timeout`（不区分大小写）→ Timeout 失败
//! - 含 `timeout` 的非 JSON 文本 → Timeout 失败
//! - 其他非 JSON 文本 → Protocol 失败
//! - 带 `error` 字段的 JSON 对象 → Rejected 失败
//! - 其余 JSON → 成功，载荷为解析后的值

use crate::command::Command;
use crate::outcome::{CommandFailure, CommandOutcome};
use serde_json::{Value, json};

/// 控制器在 `test` 命令成功时返回的消息
pub const TEST_OK_MESSAGE: &str = "Test successful";

/// 编码请求报文
pub fn encode_request(command: &Command) -> String {
    json!({
        "cmd": command.name(),
        "params": command.params(),
    })
    .to_string()
}

/// 解码应答报文
pub fn decode_reply(raw: &str) -> CommandOutcome {
    let trimmed = raw.trim();
    if trimmed.is_empty() {
        return CommandFailure::protocol("empty reply from controller").into();
    }

    if trimmed.eq_ignore_ascii_case("timeout") {
        return CommandFailure::timeout("controller reported timeout; hardware may be unavailable")
            .into();
    }

    match serde_json::from_str::<Value>(trimmed) {
        Ok(Value::Object(map)) if map.contains_key("error") => {
            let reason = match &map["error"] {
                Value::String(text) => text.clone(),
                other => other.to_string(),
            };
            CommandFailure::rejected(reason).into()
        },
        Ok(payload) => CommandOutcome::success(payload),
        Err(_) => {
            let lowered = trimmed.to_ascii_lowercase();
            if lowered.contains("timeout") {
                CommandFailure::timeout(format!("controller reported timeout: {}", trimmed)).into()
            } else {
                CommandFailure::protocol(format!("invalid reply format: {:?}", trimmed)).into()
            }
        },
    }
}

/// `test` 命令的应答是否表示链路健康
pub fn is_test_ok(payload: &Value) -> bool {
    payload.get("message").and_then(Value::as_str) == Some(TEST_OK_MESSAGE)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::outcome::FailureKind;

    fn kind(outcome: &CommandOutcome) -> Option<FailureKind> {
        outcome.failure_ref().map(|f| f.kind)
    }

    #[test]
    fn test_encode_request_shape() {
        let cmd = Command::new("goto")
            .with_param("party", "alice")
            .with_param("waveplate", "HWP1")
            .with_param("position", 45.0);

        assert_eq!(
            encode_request(&cmd),
            r#"{"cmd":"goto","params":{"party":"alice","waveplate":"HWP1","position":45.0}}"#
        );
        assert_eq!(
            encode_request(&Command::new("info")),
            r#"{"cmd":"info","params":{}}"#
        );
    }

    #[test]
    fn test_decode_success_payload() {
        let outcome = decode_reply(r#"{"message": "Homed alice"}"#);
        assert!(!outcome.is_error());
        assert_eq!(outcome.payload().unwrap()["message"], "Homed alice");
    }

    #[test]
    fn test_decode_error_key_is_rejected() {
        let outcome = decode_reply(r#"{"error": "unknown waveplate HWP9"}"#);
        assert_eq!(kind(&outcome), Some(FailureKind::Rejected));
        assert_eq!(
            outcome.failure_ref().unwrap().message,
            "unknown waveplate HWP9"
        );
    }

    #[test]
    fn test_decode_timeout_text() {
        assert_eq!(kind(&decode_reply("timeout")), Some(FailureKind::Timeout));
        assert_eq!(kind(&decode_reply("  TIMEOUT\n")), Some(FailureKind::Timeout));
        assert_eq!(
            kind(&decode_reply("motor server timeout after 30s")),
            Some(FailureKind::Timeout)
        );
    }

    #[test]
    fn test_decode_garbage_is_protocol_error() {
        assert_eq!(kind(&decode_reply("")), Some(FailureKind::Protocol));
        assert_eq!(kind(&decode_reply("   ")), Some(FailureKind::Protocol));
        assert_eq!(kind(&decode_reply("<html>")), Some(FailureKind::Protocol));
    }

    #[test]
    fn test_is_test_ok() {
        assert!(is_test_ok(&json!({"message": "Test successful"})));
        assert!(!is_test_ok(&json!({"message": "busy"})));
        assert!(!is_test_ok(&json!("Test successful")));
    }
}
