//! 配置管理命令
//!
//! 显示配置文件位置和生效配置，或写入一份默认配置

use anyhow::{Context, Result};
use clap::Subcommand;
use polctl_driver::BridgeConfig;
use std::fs;
use std::path::Path;

/// 配置命令
#[derive(Subcommand, Debug)]
pub enum ConfigCommand {
    /// 显示配置文件路径
    Path,

    /// 显示生效的配置（文件不存在时为默认值）
    Show,

    /// 写入默认配置
    Init {
        /// 覆盖已有文件
        #[arg(long)]
        force: bool,
    },
}

impl ConfigCommand {
    pub fn execute(&self, path: &Path) -> Result<()> {
        match self {
            ConfigCommand::Path => {
                let note = if path.exists() { "" } else { "（不存在，使用默认值）" };
                println!("{}{}", path.display(), note);
                Ok(())
            },
            ConfigCommand::Show => {
                let config = crate::context::load_config(path)?;
                print!("{}", config.to_toml_string()?);
                Ok(())
            },
            ConfigCommand::Init { force } => {
                init_config(path, *force)?;
                println!("✅ 已写入默认配置: {}", path.display());
                Ok(())
            },
        }
    }
}

fn init_config(path: &Path, force: bool) -> Result<()> {
    if path.exists() && !force {
        anyhow::bail!("{} 已存在，使用 --force 覆盖", path.display());
    }
    if let Some(parent) = path.parent() {
        fs::create_dir_all(parent).context("创建配置目录失败")?;
    }
    let content = BridgeConfig::default().to_toml_string()?;
    fs::write(path, content).context("写入配置文件失败")?;
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::tempdir;

    #[test]
    fn test_init_writes_loadable_defaults() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("polctl").join("config.toml");

        init_config(&path, false).unwrap();
        let loaded = BridgeConfig::load(&path).unwrap();
        assert_eq!(loaded, BridgeConfig::default());
    }

    #[test]
    fn test_init_refuses_to_overwrite() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("config.toml");
        fs::write(&path, "[history]\ncapacity = 50\n").unwrap();

        assert!(init_config(&path, false).is_err());
        assert_eq!(BridgeConfig::load(&path).unwrap().history.capacity, 50);

        init_config(&path, true).unwrap();
        assert_eq!(BridgeConfig::load(&path).unwrap().history.capacity, 200);
    }
}
