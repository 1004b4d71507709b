//! 仪器动作目录
//!
//! 每个 [`Action`] 对应控制器的一条命令，并给出写入历史的描述文本。
//! 慢动作（归零、校准、移动等，真实硬件上可能持续数秒到数分钟）
//! 通过操作注册表异步执行；查询类动作直接同步发送。
//!
//! 本模块不做数值范围校验，校验由调用方在下发前完成。

use crate::command::Command;
use crate::error::ProtocolError;
use std::fmt;
use std::str::FromStr;

/// 参与方（电机服务器）
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub enum Party {
    Alice,
    Bob,
    Source,
}

impl Party {
    pub const ALL: [Party; 3] = [Party::Alice, Party::Bob, Party::Source];

    /// 报文中使用的小写名称
    pub fn as_str(&self) -> &'static str {
        match self {
            Party::Alice => "alice",
            Party::Bob => "bob",
            Party::Source => "source",
        }
    }

    /// 首字母大写的显示名称
    pub fn title(&self) -> &'static str {
        match self {
            Party::Alice => "Alice",
            Party::Bob => "Bob",
            Party::Source => "Source",
        }
    }
}

impl fmt::Display for Party {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for Party {
    type Err = ProtocolError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "alice" => Ok(Party::Alice),
            "bob" => Ok(Party::Bob),
            "source" => Ok(Party::Source),
            _ => Err(ProtocolError::UnknownParty(s.to_string())),
        }
    }
}

/// 波片移动方式
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Direction {
    /// 相对正向移动
    Forward,
    /// 相对反向移动
    Backward,
    /// 移动到绝对角度
    Goto,
}

impl Direction {
    /// 控制器命令名
    pub fn command_name(&self) -> &'static str {
        match self {
            Direction::Forward => "forward",
            Direction::Backward => "backward",
            Direction::Goto => "goto",
        }
    }
}

impl FromStr for Direction {
    type Err = ProtocolError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "forward" => Ok(Direction::Forward),
            "backward" => Ok(Direction::Backward),
            "goto" => Ok(Direction::Goto),
            _ => Err(ProtocolError::UnknownDirection(s.to_string())),
        }
    }
}

/// 仪器动作
#[derive(Debug, Clone, PartialEq)]
pub enum Action {
    /// 切换偏振路径
    SetPolarization { setting: String },
    /// 校准某一方的波片
    Calibrate { party: Party },
    /// 设置激光功率（0.0 - 1.0）
    SetPower { power: f64 },
    /// 某一方的电机归零
    Home { party: Party },
    /// 设置 Bell 测量角度（为空时使用控制器默认值）
    SetBellAngles { angles: Option<Vec<f64>> },
    /// 移动单个波片（角度单位：度）
    MoveWaveplate {
        party: Party,
        waveplate: String,
        position: f64,
        direction: Direction,
    },
    Test,
    Info,
    ListCommands,
    Positions,
    MotorInfo,
    CurrentPath,
}

impl Action {
    /// 是否为需要异步跟踪的物理动作
    pub fn is_slow(&self) -> bool {
        matches!(
            self,
            Action::SetPolarization { .. }
                | Action::Calibrate { .. }
                | Action::SetPower { .. }
                | Action::Home { .. }
                | Action::SetBellAngles { .. }
                | Action::MoveWaveplate { .. }
        )
    }

    /// 生成控制器命令
    pub fn to_command(&self) -> Command {
        match self {
            Action::SetPolarization { setting } => Command::new("set_polarization")
                .with_param("setting", setting.as_str())
                .with_label(format!("Set Polarization: {}", setting)),
            Action::Calibrate { party } => Command::new("calibrate")
                .with_param("party", party.as_str())
                .with_label(format!("Calibrate {}", party.title())),
            Action::SetPower { power } => Command::new("set_power")
                .with_param("power", *power)
                .with_label(format!("Set Laser Power: {}", power)),
            Action::Home { party } => Command::new("home")
                .with_param("party", party.as_str())
                .with_label(format!("Home {}", party.title())),
            Action::SetBellAngles { angles } => {
                let cmd = Command::new("set_pc_to_bell_angles").with_label("Set Bell Angles");
                match angles {
                    Some(angles) if !angles.is_empty() => cmd.with_param("angles", angles.clone()),
                    _ => cmd,
                }
            },
            Action::MoveWaveplate {
                party,
                waveplate,
                position,
                direction,
            } => {
                let label = match direction {
                    Direction::Goto => {
                        format!("Move {} to {}° on {}", waveplate, position, party)
                    },
                    Direction::Forward | Direction::Backward => format!(
                        "Move {} {} {}° on {}",
                        waveplate,
                        direction.command_name(),
                        position,
                        party
                    ),
                };
                Command::new(direction.command_name())
                    .with_param("party", party.as_str())
                    .with_param("waveplate", waveplate.as_str())
                    .with_param("position", *position)
                    .with_label(label)
            },
            Action::Test => Command::new("test").with_label("Test"),
            Action::Info => Command::new("info").with_label("Info"),
            Action::ListCommands => Command::new("commands").with_label("Commands"),
            Action::Positions => Command::new("positions").with_label("Positions"),
            Action::MotorInfo => Command::new("get_motor_info").with_label("Motor Info"),
            Action::CurrentPath => Command::new("get_current_path").with_label("Current Path"),
        }
    }
}
