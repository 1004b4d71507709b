//! 计数命令
//!
//! 读取最新的符合计数；`--watch` 时只在出现新记录时输出一行

use anyhow::{Context, Result};
use clap::Args;
use polctl_driver::protocol::{CountsSnapshot, StreamId};
use polctl_driver::{Bridge, RefreshResult};
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};
use std::thread;

#[derive(Args, Debug)]
pub struct CountsCommand {
    /// 持续输出新数据，Ctrl+C 结束
    #[arg(short, long)]
    pub watch: bool,

    /// 以 JSON 输出
    #[arg(long)]
    pub json: bool,
}

impl CountsCommand {
    pub fn execute(&self, bridge: &Bridge) -> Result<()> {
        if self.watch {
            return self.watch_loop(bridge);
        }

        let telemetry = bridge.telemetry();
        if telemetry.refresh() == RefreshResult::Failed {
            eprintln!("⚠️  计数存储不可用，显示最近一次缓存");
        }
        match telemetry.latest() {
            Some(latest) => println!("{}", self.render(latest.token, &latest.snapshot)),
            None => println!("（暂无计数数据）"),
        }
        Ok(())
    }

    fn watch_loop(&self, bridge: &Bridge) -> Result<()> {
        let running = Arc::new(AtomicBool::new(true));
        {
            let running = Arc::clone(&running);
            ctrlc::set_handler(move || running.store(false, Ordering::SeqCst))
                .context("设置 Ctrl+C 处理失败")?;
        }

        let telemetry = bridge.telemetry();
        let interval = telemetry.config().refresh_interval;
        // 先把当前快照输出一次
        telemetry.redeliver();

        println!("👀 等待新计数（Ctrl+C 结束）...");
        while running.load(Ordering::SeqCst) {
            let poll = bridge.poll_counts();
            if poll.has_new_data
                && let (Some(token), Some(snapshot)) = (poll.token, poll.snapshot)
            {
                println!("{}", self.render(token, &snapshot));
            }
            thread::sleep(interval);
        }

        println!("\n⏹️  已停止");
        Ok(())
    }

    fn render(&self, token: StreamId, snapshot: &CountsSnapshot) -> String {
        if self.json {
            serde_json::json!({ "token": token.to_string(), "counts": snapshot }).to_string()
        } else {
            render_counts(token, snapshot)
        }
    }
}

fn render_counts(token: StreamId, s: &CountsSnapshot) -> String {
    format!(
        "[{}] A {:>8}  B {:>8}  C {:>7}  ηA {:>5.1}%  ηB {:>5.1}%  η {:>5.1}%",
        token,
        s.alice_singles,
        s.bob_singles,
        s.coincidences,
        s.alice_efficiency,
        s.bob_efficiency,
        s.joint_efficiency
    )
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_render_counts_line() {
        let snapshot = CountsSnapshot::from_counts(10_000, 8_000, 2_000);
        let line = render_counts(StreamId::new(1700000000000, 3), &snapshot);
        assert!(line.starts_with("[1700000000000-3]"));
        assert!(line.contains("A    10000"));
        assert!(line.contains("ηA  25.0%"));
        assert!(line.contains("ηB  20.0%"));
    }

    #[test]
    fn test_render_json_line() {
        let cmd = CountsCommand {
            watch: false,
            json: true,
        };
        let line = cmd.render(StreamId::new(5, 0), &CountsSnapshot::from_counts(1, 1, 1));
        let value: serde_json::Value = serde_json::from_str(&line).unwrap();
        assert_eq!(value["token"], "5-0");
        assert_eq!(value["counts"]["coincidences"], 1);
    }
}
