//! 命令历史
//!
//! 查看、统计或清空最近的命令记录

use anyhow::{Context, Result};
use clap::Args;
use polctl_driver::{Bridge, HistoryEntry, HistoryStats};

/// 历史命令参数
#[derive(Args, Debug)]
pub struct HistoryCommand {
    /// 显示条数
    #[arg(short, long, default_value_t = 20)]
    pub limit: usize,

    /// 只显示统计信息
    #[arg(long, conflicts_with = "clear")]
    pub stats: bool,

    /// 清空历史（内存和文件）
    #[arg(long)]
    pub clear: bool,

    /// 以 JSON 输出
    #[arg(long)]
    pub json: bool,
}

impl HistoryCommand {
    pub fn execute(&self, bridge: &Bridge) -> Result<()> {
        let history = bridge.history();

        if self.clear {
            history.clear().context("清空历史失败")?;
            println!("🧹 历史已清空");
            return Ok(());
        }

        if self.stats {
            let stats = history.stats();
            if self.json {
                println!("{}", serde_json::to_string_pretty(&stats)?);
            } else {
                print!("{}", render_stats(&stats));
            }
            return Ok(());
        }

        let entries = history.recent(self.limit);
        if self.json {
            println!("{}", serde_json::to_string_pretty(&entries)?);
        } else if entries.is_empty() {
            println!("（暂无历史记录）");
        } else {
            for entry in &entries {
                println!("{}", render_entry(entry));
            }
        }
        Ok(())
    }
}

fn render_entry(entry: &HistoryEntry) -> String {
    format!(
        "{} {} #{:<4} {:<32} {}",
        entry.timestamp.format("%Y-%m-%d %H:%M:%S"),
        if entry.is_error { "❌" } else { "✅" },
        entry.id,
        entry.command,
        entry.response
    )
}

fn render_stats(stats: &HistoryStats) -> String {
    let file = match &stats.file {
        Some(path) if stats.file_exists => path.display().to_string(),
        Some(path) => format!("{}（尚未创建）", path.display()),
        None => "仅内存".to_string(),
    };
    format!(
        "📜 共 {} 条 / 上限 {}\n   成功 {}，错误 {}\n   文件: {}\n   丢弃写入 {}，写入失败 {}\n",
        stats.total,
        stats.capacity,
        stats.successes,
        stats.errors,
        file,
        stats.dropped_writes,
        stats.failed_writes
    )
}
