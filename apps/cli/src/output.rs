//! 结果输出

use anyhow::Result;
use polctl_protocol::CommandOutcome;
use serde_json::Value;

/// 打印命令结果
///
/// 失败时返回错误，进程以非零状态退出。
pub fn report_outcome(outcome: &CommandOutcome, json: bool) -> Result<()> {
    if json {
        println!("{}", serde_json::to_string_pretty(outcome)?);
    }

    match outcome {
        CommandOutcome::Success { payload } => {
            if !json {
                println!("✅ {}", render_payload(payload));
            }
            Ok(())
        },
        CommandOutcome::Failure(failure) => {
            if failure.side_effect_unknown() {
                eprintln!("⚠️  未收到应答，动作可能仍在执行或已经完成，请先查询状态再重试");
            }
            Err(failure.clone().into())
        },
    }
}

/// 字符串原样输出，其余按 JSON 缩进
pub fn render_payload(payload: &Value) -> String {
    match payload {
        Value::String(text) => text.clone(),
        Value::Object(map) if map.len() == 1 && map.contains_key("message") => {
            render_payload(&map["message"])
        },
        other => serde_json::to_string_pretty(other).unwrap_or_else(|_| other.to_string()),
    }
}
