//! 运行环境
//!
//! 定位配置文件并构造 [`Bridge`]。`--simulate` 时换成内置模拟控制器
//! 和内存计数流，并在后台持续写入模拟计数。

use anyhow::{Context, Result};
use polctl_driver::sim::{MemoryCountsStore, SimulatedController};
use polctl_driver::{Bridge, BridgeBuilder, BridgeConfig};
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};
use std::thread::{self, JoinHandle};
use std::time::Duration;
use tracing::{debug, info};

/// 模拟计数的写入周期
const SIM_FEED_PERIOD: Duration = Duration::from_millis(250);

/// 默认配置文件：`<config_dir>/polctl/config.toml`
pub fn default_config_path() -> Result<PathBuf> {
    let mut path = dirs::config_dir().ok_or_else(|| anyhow::anyhow!("无法确定配置目录"))?;
    path.push("polctl");
    path.push("config.toml");
    Ok(path)
}

/// 命令行参数（含 `POLCTL_CONFIG`）优先，否则使用默认位置
pub fn resolve_config_path(explicit: Option<&Path>) -> Result<PathBuf> {
    match explicit {
        Some(path) => Ok(path.to_path_buf()),
        None => default_config_path(),
    }
}

/// 加载配置，文件不存在时使用默认值
pub fn load_config(path: &Path) -> Result<BridgeConfig> {
    BridgeConfig::load(path).with_context(|| format!("加载配置失败: {}", path.display()))
}

/// 一次 CLI 调用持有的控制核心
pub struct Session {
    // 先停模拟计数源，再关闭核心
    feed: Option<SimFeed>,
    bridge: Bridge,
}

impl Session {
    pub fn open(config: BridgeConfig, simulate: bool) -> Result<Self> {
        if !simulate {
            let bridge = BridgeBuilder::new()
                .config(config)
                .build()
                .context("初始化控制核心失败")?;
            return Ok(Self { feed: None, bridge });
        }

        let store = MemoryCountsStore::new();
        let feed = SimFeed::start(store.clone(), config.counts_store.prefix.clone())?;
        let bridge = BridgeBuilder::new()
            .config(config)
            .connector(Arc::new(SimulatedController::new()))
            .counts_store(Box::new(store))
            .history_in_memory()
            .build()
            .context("初始化模拟环境失败")?;
        info!("Running against the built-in simulated controller");

        Ok(Self {
            feed: Some(feed),
            bridge,
        })
    }

    pub fn bridge(&self) -> &Bridge {
        &self.bridge
    }

    pub fn is_simulated(&self) -> bool {
        self.feed.is_some()
    }
}

/// 模拟计数源
struct SimFeed {
    stop: Arc<AtomicBool>,
    handle: Option<JoinHandle<()>>,
}

impl SimFeed {
    fn start(store: MemoryCountsStore, prefix: String) -> Result<Self> {
        // 先写一条，启动后立即有数据可读
        publish_sample(&store, &prefix, 0);

        let stop = Arc::new(AtomicBool::new(false));
        let handle = {
            let stop = Arc::clone(&stop);
            thread::Builder::new()
                .name("polctl-sim-feed".to_string())
                .spawn(move || {
                    let mut n = 1u64;
                    while !stop.load(Ordering::Acquire) {
                        thread::sleep(SIM_FEED_PERIOD);
                        publish_sample(&store, &prefix, n);
                        n += 1;
                    }
                    debug!("Simulated counts feed stopped after {} samples", n);
                })
                .context("启动模拟计数源失败")?
        };

        Ok(Self {
            stop,
            handle: Some(handle),
        })
    }
}

impl Drop for SimFeed {
    fn drop(&mut self) {
        self.stop.store(true, Ordering::Release);
        if let Some(handle) = self.handle.take() {
            let _ = handle.join();
        }
    }
}

/// 确定性的小幅波动，便于肉眼确认数据在刷新
fn sample_counts(n: u64) -> (u64, u64, u64) {
    let jitter = (n * 7919) % 400;
    (12_000 + jitter, 11_500 + jitter / 2, 2_300 + jitter / 4)
}

fn publish_sample(store: &MemoryCountsStore, prefix: &str, n: u64) {
    let (alice, bob, coincidences) = sample_counts(n);
    store.publish_counts(prefix, alice, bob, coincidences);
}
