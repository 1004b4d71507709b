//! 即时查询命令

use crate::output::report_outcome;
use anyhow::{Context, Result};
use clap::{Args, ValueEnum};
use polctl_driver::{Bridge, Submitted};
use polctl_protocol::{Action, CommandOutcome};
use serde_json::{Value, json};

/// 查询项
#[derive(ValueEnum, Clone, Copy, Debug, PartialEq, Eq)]
pub enum QueryTarget {
    /// 控制器连通性测试
    Test,
    /// 控制器信息
    Info,
    /// 支持的命令列表
    Commands,
    /// 所有波片位置
    Positions,
    /// 电机信息
    MotorInfo,
    /// 当前偏振路径
    CurrentPath,
    /// 可用偏振路径（取自 `info` 应答的 settings）
    Paths,
}

impl QueryTarget {
    pub fn action(self) -> Action {
        match self {
            QueryTarget::Test => Action::Test,
            QueryTarget::Info | QueryTarget::Paths => Action::Info,
            QueryTarget::Commands => Action::ListCommands,
            QueryTarget::Positions => Action::Positions,
            QueryTarget::MotorInfo => Action::MotorInfo,
            QueryTarget::CurrentPath => Action::CurrentPath,
        }
    }
}

#[derive(Args, Debug)]
pub struct QueryCommand {
    #[arg(value_enum)]
    pub target: QueryTarget,

    /// 以 JSON 输出完整结果
    #[arg(long)]
    pub json: bool,
}

impl QueryCommand {
    pub fn execute(&self, bridge: &Bridge) -> Result<()> {
        match bridge.execute(&self.target.action()).context("发送查询失败")? {
            Submitted::Immediate(outcome) if self.target == QueryTarget::Paths => {
                report_paths(&outcome, self.json)
            },
            Submitted::Immediate(outcome) => report_outcome(&outcome, self.json),
            Submitted::Operation(id) => anyhow::bail!("查询被登记为操作 {}", id),
        }
    }
}

/// `info` 应答中 `message.settings` 的键，按控制器给出的顺序
pub fn available_paths(payload: &Value) -> Vec<String> {
    payload
        .get("message")
        .and_then(|m| m.get("settings"))
        .and_then(Value::as_object)
        .map(|settings| settings.keys().cloned().collect())
        .unwrap_or_default()
}

fn report_paths(outcome: &CommandOutcome, json: bool) -> Result<()> {
    let Some(payload) = outcome.payload() else {
        return report_outcome(outcome, json);
    };
    let paths = available_paths(payload);
    if json {
        let settings = payload
            .get("message")
            .and_then(|m| m.get("settings"))
            .cloned()
            .unwrap_or_else(|| json!({}));
        let report = json!({ "paths": paths, "settings": settings });
        println!("{}", serde_json::to_string_pretty(&report)?);
    } else if paths.is_empty() {
        println!("⚠️  控制器没有报告任何偏振路径");
    } else {
        println!("✅ 可用偏振路径: {}", paths.join(", "));
    }
    Ok(())
}
