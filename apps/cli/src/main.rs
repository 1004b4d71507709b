//! # polctl CLI
//!
//! 偏振仪器控制核心的命令行前端。每次调用是一个独立进程：
//! 读取配置，建立控制核心，执行一个命令，退出前等待队列中的命令完成。
//!
//! ```bash
//! # 不连接硬件，使用内置模拟控制器
//! polctl-cli --simulate move alice HWP1 45
//!
//! # 查看最近的命令历史
//! polctl-cli history --limit 10
//!
//! # 持续显示计数
//! polctl-cli counts --watch
//! ```

use anyhow::{Context, Result};
use clap::{Parser, Subcommand};
use std::path::{Path, PathBuf};
use tracing_appender::non_blocking::WorkerGuard;
use tracing_subscriber::EnvFilter;
use tracing_subscriber::filter::Directive;
use tracing_subscriber::prelude::*;

mod commands;
mod context;
mod output;
mod validation;

use commands::{
    ActionCommand, ConfigCommand, CountsCommand, HealthCommand, HistoryCommand, QueryCommand,
};
use context::Session;

/// polctl CLI - 偏振仪器控制
#[derive(Parser, Debug)]
#[command(name = "polctl-cli")]
#[command(about = "Command-line front end for the polarization instrument", long_about = None)]
#[command(version)]
struct Cli {
    /// 配置文件路径
    #[arg(long, global = true, env = "POLCTL_CONFIG")]
    config: Option<PathBuf>,

    /// 使用内置模拟控制器和内存计数流
    #[arg(long, global = true)]
    simulate: bool,

    /// 日志目录（按天轮转）
    #[arg(long, global = true)]
    log_dir: Option<PathBuf>,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand, Debug)]
enum Commands {
    /// 链路、计数流、操作和历史的健康状态
    Health(HealthCommand),

    /// 命令历史
    History(HistoryCommand),

    #[command(flatten)]
    Action(ActionCommand),

    /// 即时查询
    Query(QueryCommand),

    /// 最新计数
    Counts(CountsCommand),

    /// 配置管理
    #[command(subcommand)]
    Config(ConfigCommand),
}

fn init_logging(log_dir: Option<&Path>) -> Result<Option<WorkerGuard>> {
    let filter = EnvFilter::from_default_env()
        .add_directive("polctl=info".parse::<Directive>().context("无效的日志过滤规则")?);
    // 终端日志走 stderr，stdout 只留命令输出
    let stderr_layer = tracing_subscriber::fmt::layer().with_writer(std::io::stderr);

    let Some(dir) = log_dir else {
        tracing_subscriber::registry().with(filter).with(stderr_layer).init();
        return Ok(None);
    };

    std::fs::create_dir_all(dir)
        .with_context(|| format!("创建日志目录失败: {}", dir.display()))?;
    let (writer, guard) =
        tracing_appender::non_blocking(tracing_appender::rolling::daily(dir, "polctl.log"));
    let file_layer = tracing_subscriber::fmt::layer().with_ansi(false).with_writer(writer);
    tracing_subscriber::registry()
        .with(filter)
        .with(stderr_layer)
        .with(file_layer)
        .init();
    Ok(Some(guard))
}

fn main() -> Result<()> {
    let cli = Cli::parse();

    // guard 析构时把剩余日志写入文件
    let _log_guard = init_logging(cli.log_dir.as_deref())?;

    let config_path = context::resolve_config_path(cli.config.as_deref())?;
    if let Commands::Config(cmd) = &cli.command {
        return cmd.execute(&config_path);
    }

    let config = context::load_config(&config_path)?;
    let session = Session::open(config, cli.simulate)?;
    let bridge = session.bridge();

    match &cli.command {
        Commands::Health(cmd) => cmd.execute(bridge),
        Commands::History(cmd) => cmd.execute(bridge),
        Commands::Action(cmd) => cmd.execute(bridge),
        Commands::Query(cmd) => cmd.execute(bridge),
        Commands::Counts(cmd) => cmd.execute(bridge),
        Commands::Config(_) => Ok(()),
    }
}
