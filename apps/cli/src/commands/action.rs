//! 仪器动作命令
//!
//! 参数先经 [`crate::validation`] 校验，再交给控制核心。慢动作登记为操作后
//! 打印操作 ID，随后轮询状态直到终态。

use crate::output::report_outcome;
use crate::validation;
use anyhow::{Context, Result};
use clap::{Args, Subcommand};
use polctl_driver::{Bridge, DriverError, Operation, OperationId, OperationState, Submitted};
use polctl_protocol::{Action, Direction};
use std::time::Duration;

/// 状态轮询间隔
const STATUS_POLL_INTERVAL: Duration = Duration::from_millis(500);

/// 仪器动作
#[derive(Subcommand, Debug)]
pub enum ActionCommand {
    /// 切换偏振路径（H, V, D, A, R, L）
    Polarization {
        setting: String,
    },

    /// 校准某一方的波片
    Calibrate {
        /// alice / bob / source
        party: String,
    },

    /// 电机归零
    Home {
        /// alice / bob / source
        party: String,
    },

    /// 设置激光功率（0.0 - 1.0）
    Power {
        #[arg(allow_negative_numbers = true)]
        power: f64,
    },

    /// 设置 Bell 测量角度（逗号分隔，省略时使用控制器默认值）
    BellAngles {
        #[arg(allow_hyphen_values = true)]
        angles: Option<String>,
    },

    /// 移动单个波片
    Move(MoveCommand),
}

/// 波片移动参数
#[derive(Args, Debug)]
pub struct MoveCommand {
    /// alice / bob / source
    pub party: String,

    /// 波片名称（如 HWP1, QWP2）
    pub waveplate: String,

    /// 角度（度），默认是绝对位置
    #[arg(allow_negative_numbers = true)]
    pub degrees: f64,

    /// 相对正向移动
    #[arg(long, conflicts_with = "backward")]
    pub forward: bool,

    /// 相对反向移动
    #[arg(long)]
    pub backward: bool,
}

impl MoveCommand {
    fn direction(&self) -> Direction {
        if self.forward {
            Direction::Forward
        } else if self.backward {
            Direction::Backward
        } else {
            Direction::Goto
        }
    }
}

impl ActionCommand {
    /// 校验参数并生成动作
    pub fn to_action(&self) -> Result<Action> {
        let action = match self {
            ActionCommand::Polarization { setting } => Action::SetPolarization {
                setting: validation::validate_setting(setting)?,
            },
            ActionCommand::Calibrate { party } => Action::Calibrate {
                party: validation::parse_party(party)?,
            },
            ActionCommand::Home { party } => Action::Home {
                party: validation::parse_party(party)?,
            },
            ActionCommand::Power { power } => Action::SetPower {
                power: validation::validate_power(*power)?,
            },
            ActionCommand::BellAngles { angles } => Action::SetBellAngles {
                angles: validation::parse_angle_list(angles.as_deref().unwrap_or(""))?,
            },
            ActionCommand::Move(args) => Action::MoveWaveplate {
                party: validation::parse_party(&args.party)?,
                waveplate: validation::validate_waveplate(&args.waveplate)?,
                position: validation::validate_angle(args.degrees)?,
                direction: args.direction(),
            },
        };
        Ok(action)
    }

    pub fn execute(&self, bridge: &Bridge) -> Result<()> {
        let action = self.to_action()?;
        run_action(bridge, &action)
    }
}

/// 执行动作并等待结果
pub fn run_action(bridge: &Bridge, action: &Action) -> Result<()> {
    match bridge.execute(action).context("提交命令失败")? {
        Submitted::Immediate(outcome) => report_outcome(&outcome, false),
        Submitted::Operation(id) => {
            println!("⏳ 操作已提交: {}", id);
            let op = follow(bridge, &id)?;
            let outcome = op
                .outcome
                .ok_or_else(|| anyhow::anyhow!("操作 {} 已结束但没有结果", id))?;
            report_outcome(&outcome, false)
        },
    }
}

/// 轮询状态直到终态，状态变化时打印一行
fn follow(bridge: &Bridge, id: &OperationId) -> Result<Operation> {
    let mut last_state: Option<OperationState> = None;
    loop {
        let op = match bridge.wait(id.as_str(), STATUS_POLL_INTERVAL) {
            Ok(op) => op,
            Err(DriverError::Timeout) => bridge.status(id.as_str())?,
            Err(e) => return Err(e.into()),
        };

        if last_state != Some(op.state) {
            println!("   {} {}", op.state, op.command.describe());
            last_state = Some(op.state);
        }
        if op.state.is_terminal() {
            return Ok(op);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use polctl_driver::BridgeBuilder;
    use polctl_driver::sim::{MemoryCountsStore, SimBehavior, SimulatedController};
    use polctl_protocol::Party;
    use std::sync::Arc;

    fn bridge(sim: &SimulatedController) -> Bridge {
        BridgeBuilder::new()
            .connector(Arc::new(sim.clone()))
            .counts_store(Box::new(MemoryCountsStore::new()))
            .history_in_memory()
            .manual_telemetry()
            .build()
            .unwrap()
    }

    #[test]
    fn test_move_defaults_to_goto() {
        let cmd = ActionCommand::Move(MoveCommand {
            party: "alice".to_string(),
            waveplate: "HWP1".to_string(),
            degrees: 45.0,
            forward: false,
            backward: false,
        });
        assert_eq!(
            cmd.to_action().unwrap(),
            Action::MoveWaveplate {
                party: Party::Alice,
                waveplate: "HWP1".to_string(),
                position: 45.0,
                direction: Direction::Goto,
            }
        );
    }

    #[test]
    fn test_invalid_input_never_reaches_controller() {
        let sim = SimulatedController::new();
        let bridge = bridge(&sim);

        let cmd = ActionCommand::Power { power: 1.5 };
        assert!(cmd.execute(&bridge).is_err());

        let cmd = ActionCommand::Move(MoveCommand {
            party: "bob".to_string(),
            waveplate: " ".to_string(),
            degrees: 10.0,
            forward: true,
            backward: false,
        });
        assert!(cmd.execute(&bridge).is_err());

        assert!(sim.received_commands().is_empty());
        assert!(bridge.history().is_empty());
    }

    #[test]
    fn test_slow_action_waits_for_completion() {
        let sim = SimulatedController::new();
        let bridge = bridge(&sim);

        ActionCommand::Polarization {
            setting: "D".to_string(),
        }
        .execute(&bridge)
        .unwrap();

        assert_eq!(sim.current_path(), "D");
        let op = &bridge.operations().list()[0];
        assert_eq!(op.state, OperationState::Completed);
        assert_eq!(bridge.history().latest().unwrap().command, "Set Polarization: D");
    }

    #[test]
    fn test_rejected_action_is_error() {
        let sim = SimulatedController::new();
        sim.script_next(SimBehavior::Reject("motor stalled".to_string()));
        let bridge = bridge(&sim);

        let err = ActionCommand::Home {
            party: "source".to_string(),
        }
        .execute(&bridge)
        .unwrap_err();
        assert!(err.to_string().contains("motor stalled"));
    }
}
