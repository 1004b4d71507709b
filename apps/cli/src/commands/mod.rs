//! 命令模块
//!
//! 每个子命令一个模块

pub mod action;
pub mod config;
pub mod counts;
pub mod health;
pub mod history;
pub mod query;

pub use action::ActionCommand;
pub use config::ConfigCommand;
pub use counts::CountsCommand;
pub use health::HealthCommand;
pub use history::HistoryCommand;
pub use query::QueryCommand;
