//! 输入验证模块
//!
//! 参数在下发到控制核心之前在这里完成范围检查，核心本身不再校验。

use anyhow::{Context, Result};
use polctl_protocol::Party;

/// 激光功率范围
pub const POWER_RANGE: (f64, f64) = (0.0, 1.0);

/// 波片角度范围（度）
pub const ANGLE_RANGE: (f64, f64) = (-360.0, 360.0);

/// 解析参与方名称（alice / bob / source）
pub fn parse_party(name: &str) -> Result<Party> {
    name.parse::<Party>()
        .with_context(|| format!("未知的参与方 '{}'（可选: alice, bob, source）", name))
}

/// 验证激光功率
///
/// # 错误
/// NaN、无穷大或超出 [0, 1] 时返回错误
pub fn validate_power(power: f64) -> Result<f64> {
    if !power.is_finite() {
        anyhow::bail!("功率 {} 不是有效数值", power);
    }
    let (min, max) = POWER_RANGE;
    if !(min..=max).contains(&power) {
        anyhow::bail!("功率 {} 超出范围 [{}, {}]", power, min, max);
    }
    Ok(power)
}

/// 验证波片角度（度）
pub fn validate_angle(degrees: f64) -> Result<f64> {
    if !degrees.is_finite() {
        anyhow::bail!("角度 {} 不是有效数值", degrees);
    }
    let (min, max) = ANGLE_RANGE;
    if !(min..=max).contains(&degrees) {
        anyhow::bail!("角度 {}° 超出范围 [{}, {}]", degrees, min, max);
    }
    Ok(degrees)
}

/// 验证波片名称，返回去除首尾空白后的名称
pub fn validate_waveplate(name: &str) -> Result<String> {
    let name = name.trim();
    if name.is_empty() {
        anyhow::bail!("波片名称不能为空");
    }
    Ok(name.to_string())
}

/// 验证偏振设置
pub fn validate_setting(setting: &str) -> Result<String> {
    let setting = setting.trim();
    if setting.is_empty() {
        anyhow::bail!("偏振设置不能为空");
    }
    Ok(setting.to_string())
}

/// 解析逗号分隔的角度列表
///
/// 空字符串表示使用控制器默认角度，返回 `None`。
pub fn parse_angle_list(input: &str) -> Result<Option<Vec<f64>>> {
    if input.trim().is_empty() {
        return Ok(None);
    }

    let angles = input
        .split(',')
        .enumerate()
        .map(|(i, part)| {
            let value = part
                .trim()
                .parse::<f64>()
                .with_context(|| format!("第 {} 个角度 '{}' 无法解析", i + 1, part.trim()))?;
            validate_angle(value)
        })
        .collect::<Result<Vec<_>>>()?;

    Ok(Some(angles))
}
