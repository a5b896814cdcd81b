//! 评分校验模块
//!
//! 复习评分为 0-5 的整数，越界或非整数输入在进入调度引擎前被拒绝。

use serde::{Deserialize, Serialize};

use crate::error::{SrsError, SrsResult};

/// 及格线：评分低于此值视为遗忘 (lapse)
pub const PASS_THRESHOLD: u8 = 3;

/// 复习评分 (0-5)
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct Grade(u8);

impl Grade {
    /// 校验整数评分
    ///
    /// 负数或大于 5 的输入返回 `InvalidGrade`。
    pub fn validate(raw: i64) -> SrsResult<Self> {
        if !(0..=5).contains(&raw) {
            return Err(SrsError::InvalidGrade(format!("评分必须在 0-5 之间: {}", raw)));
        }
        Ok(Grade(raw as u8))
    }

    /// 校验浮点输入
    ///
    /// 非整数值（如 3.5）同样返回 `InvalidGrade`。
    pub fn validate_f64(raw: f64) -> SrsResult<Self> {
        if !raw.is_finite() || raw.fract() != 0.0 {
            return Err(SrsError::InvalidGrade(format!("评分必须为整数: {}", raw)));
        }
        Self::validate(raw as i64)
    }

    /// 从受信存储值构造，越界值截断到合法范围
    ///
    /// 仅用于读取本库自己写入的数据库行。
    pub fn from_stored(raw: i64) -> Self {
        Grade(raw.clamp(0, 5) as u8)
    }

    /// 评分值
    pub fn value(self) -> u8 {
        self.0
    }

    /// 是否及格（grade >= 3）
    pub fn is_pass(self) -> bool {
        self.0 >= PASS_THRESHOLD
    }
}

impl std::fmt::Display for Grade {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.0)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_validate_accepts_range() {
        for raw in 0..=5 {
            let grade = Grade::validate(raw).expect("0-5 should be valid");
            assert_eq!(grade.value(), raw as u8);
        }
    }

    #[test]
    fn test_validate_rejects_out_of_range() {
        assert!(matches!(Grade::validate(-1), Err(SrsError::InvalidGrade(_))));
        assert!(matches!(Grade::validate(6), Err(SrsError::InvalidGrade(_))));
        assert!(matches!(Grade::validate(100), Err(SrsError::InvalidGrade(_))));
    }

    #[test]
    fn test_validate_f64_rejects_non_integral() {
        assert!(matches!(Grade::validate_f64(3.5), Err(SrsError::InvalidGrade(_))));
        assert!(matches!(Grade::validate_f64(f64::NAN), Err(SrsError::InvalidGrade(_))));
        assert!(Grade::validate_f64(4.0).is_ok());
    }

    #[test]
    fn test_pass_threshold() {
        assert!(!Grade::validate(0).unwrap().is_pass());
        assert!(!Grade::validate(2).unwrap().is_pass());
        assert!(Grade::validate(3).unwrap().is_pass());
        assert!(Grade::validate(5).unwrap().is_pass());
    }
}
