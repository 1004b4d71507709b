//! 健康检查命令
//!
//! 汇总控制器链路、计数流、操作注册表和命令历史的状态

use anyhow::Result;
use clap::Args;
use polctl_driver::{Bridge, BridgeHealth};
use std::fmt::Write as _;

/// 健康检查参数
#[derive(Args, Debug)]
pub struct HealthCommand {
    /// 以 JSON 输出
    #[arg(long)]
    pub json: bool,
}

impl HealthCommand {
    pub fn execute(&self, bridge: &Bridge) -> Result<()> {
        let health = bridge.health();
        if self.json {
            println!("{}", serde_json::to_string_pretty(&health)?);
        } else {
            print!("{}", render(&health));
        }
        Ok(())
    }
}

fn mark(ok: bool) -> &'static str {
    if ok { "✅" } else { "❌" }
}

fn render(health: &BridgeHealth) -> String {
    let mut out = String::new();

    let link = &health.link;
    let _ = writeln!(
        out,
        "{} 控制器 {}{}",
        mark(link.link_up),
        link.endpoint,
        if link.probed { "" } else { "（执行中，显示最近状态）" }
    );

    let telemetry = &health.telemetry;
    let _ = writeln!(
        out,
        "{} 计数流: {}（读取 {} 次，失败 {} 次）",
        mark(health.counts_store_reachable),
        telemetry.health.as_str(),
        telemetry.total_reads,
        telemetry.failed_reads
    );
    if let Some(token) = telemetry.last_token {
        let _ = writeln!(out, "   最新记录: {}", token);
    }

    let ops = &health.operations;
    let _ = writeln!(
        out,
        "{} 操作: 共 {}（等待 {}，执行中 {}，完成 {}，失败 {}）",
        mark(ops.healthy),
        ops.total,
        ops.pending,
        ops.running,
        ops.completed,
        ops.failed
    );
    for id in &ops.stale {
        let _ = writeln!(out, "   ⚠️  长时间未完成: {}", id);
    }

    let history = &health.history;
    let file = match &history.file {
        Some(path) => path.display().to_string(),
        None => "仅内存".to_string(),
    };
    let _ = writeln!(
        out,
        "📜 历史: {}/{} 条（错误 {}），{}",
        history.total, history.capacity, history.errors, file
    );

    out
}

#[cfg(test)]
mod tests {
    use super::*;
    use polctl_driver::BridgeBuilder;
    use polctl_driver::sim::{MemoryCountsStore, SimulatedController};
    use std::sync::Arc;

    #[test]
    fn test_render_simulated_health() {
        let bridge = BridgeBuilder::new()
            .connector(Arc::new(SimulatedController::new()))
            .counts_store(Box::new(MemoryCountsStore::new()))
            .history_in_memory()
            .manual_telemetry()
            .build()
            .unwrap();

        let text = render(&bridge.health());
        assert!(text.contains("✅ 控制器 sim://controller"));
        assert!(text.contains("计数流: not_started"));
        assert!(text.contains("仅内存"));
    }

    #[test]
    fn test_render_unreachable_controller() {
        let sim = SimulatedController::new();
        sim.refuse_connections(true);
        let bridge = BridgeBuilder::new()
            .connector(Arc::new(sim))
            .counts_store(Box::new(MemoryCountsStore::new()))
            .history_in_memory()
            .manual_telemetry()
            .build()
            .unwrap();

        assert!(render(&bridge.health()).starts_with("❌ 控制器"));
    }
}
