//! 定点小数运算模块
//!
//! 易化因子与间隔天数使用千分位定点数（i64），而非二进制浮点数。
//! 两台设备独立计算同一次状态转移时，必须得到逐位一致的结果，
//! 浮点舍入在不同平台上不保证一致，整数运算保证。

use serde::{Deserialize, Serialize};
use std::fmt;
use std::ops::{Add, Sub};

/// 定点数精度：千分位
const SCALE: i64 = 1000;

/// 千分位定点小数
///
/// 内部表示为千分之一的整数计数，序列化为原始 i64。
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Serialize, Deserialize, Default)]
pub struct Fixed(i64);

/// 易化因子下限 (1.3)
pub const EASE_FLOOR: Fixed = Fixed(1300);

/// 新卡片默认易化因子 (2.5)
pub const DEFAULT_EASE: Fixed = Fixed(2500);

impl Fixed {
    pub const ZERO: Fixed = Fixed(0);
    pub const ONE: Fixed = Fixed(SCALE);

    /// 从整数构造
    pub fn from_int(v: i64) -> Self {
        Fixed(v * SCALE)
    }

    /// 从千分位原始值构造
    pub fn from_millis(raw: i64) -> Self {
        Fixed(raw)
    }

    /// 千分位原始值
    pub fn raw(self) -> i64 {
        self.0
    }

    /// 定点乘法，第三位小数处四舍五入（远离零方向）
    pub fn mul(self, other: Fixed) -> Fixed {
        let product = (self.0 as i128) * (other.0 as i128);
        let half = (SCALE as i128) / 2;
        let rounded = if product >= 0 {
            (product + half) / (SCALE as i128)
        } else {
            (product - half) / (SCALE as i128)
        };
        Fixed(rounded as i64)
    }

    /// 四舍五入到整数（远离零方向的 half-up）
    pub fn round_to_int(self) -> i64 {
        if self.0 >= 0 {
            (self.0 + SCALE / 2) / SCALE
        } else {
            (self.0 - SCALE / 2) / SCALE
        }
    }

    /// 取两者较大值
    pub fn max(self, other: Fixed) -> Fixed {
        if self >= other {
            self
        } else {
            other
        }
    }

    /// 是否为非负
    pub fn is_non_negative(self) -> bool {
        self.0 >= 0
    }

    /// 展示用浮点值（仅用于日志与展示，不参与计算）
    pub fn to_f64(self) -> f64 {
        self.0 as f64 / SCALE as f64
    }

    /// 按天数换算为毫秒（用于 due_at 推导）
    pub fn days_to_millis(self) -> i64 {
        // raw 为千分之一天，1 天 = 86_400_000 毫秒
        self.0 * 86_400
    }
}

impl Add for Fixed {
    type Output = Fixed;
    fn add(self, rhs: Fixed) -> Fixed {
        Fixed(self.0 + rhs.0)
    }
}

impl Sub for Fixed {
    type Output = Fixed;
    fn sub(self, rhs: Fixed) -> Fixed {
        Fixed(self.0 - rhs.0)
    }
}

impl fmt::Display for Fixed {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let sign = if self.0 < 0 { "-" } else { "" };
        let abs = self.0.abs();
        write!(f, "{}{}.{:03}", sign, abs / SCALE, abs % SCALE)
    }
}
