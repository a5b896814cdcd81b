//! 调度引擎模块
//!
//! SM-2 族间隔重复算法的纯函数实现：
//! `(旧状态, 评分, 复习时间) -> 新状态`。
//! 无 I/O、无共享状态、无随机性，全部算术使用定点数，
//! 保证任意两台设备对同一输入得到逐位一致的输出。

use chrono::{DateTime, Duration, Utc};

use crate::fixed::{Fixed, EASE_FLOOR};
use crate::grade::Grade;
use crate::models::CardState;

/// 间隔天数上限（100 年）
///
/// 易化因子没有上界，间隔按 interval × ease 指数增长，
/// 必须封顶才能保证 due_at = last_reviewed_at + interval 始终可表示。
pub const MAX_INTERVAL_DAYS: i64 = 36_500;

/// 调度引擎
///
/// 重放安全不由本函数提供（同一输入重复应用会推进 repetitions），
/// 而由上层 SyncCoordinator 按 (device_id, local_revision) 去重保证。
pub struct SchedulingEngine;

impl SchedulingEngine {
    /// 应用一次评分，返回新的卡片状态
    pub fn schedule(state: &CardState, grade: Grade, now: DateTime<Utc>) -> CardState {
        let mut next = state.clone();

        if grade.is_pass() {
            next.repetitions = state.repetitions + 1;
            next.ease_factor = Self::ease_after_pass(state.ease_factor, grade);
            next.interval_days = match next.repetitions {
                1 => Fixed::from_int(1),
                2 => Fixed::from_int(6),
                _ => {
                    let grown = state.interval_days.mul(next.ease_factor).round_to_int();
                    Fixed::from_int(grown.clamp(1, MAX_INTERVAL_DAYS))
                }
            };
        } else {
            // 遗忘：重置连击，间隔回到 1 天，易化因子下调 0.2
            next.repetitions = 0;
            next.interval_days = Fixed::from_int(1);
            next.ease_factor = (state.ease_factor - Fixed::from_millis(200)).max(EASE_FLOOR);
        }

        next.last_reviewed_at = Some(now);
        next.due_at = Some(now + Duration::milliseconds(next.interval_days.days_to_millis()));
        next.last_grade = Some(grade);
        next.revision = state.revision + 1;
        next.is_dirty = true;

        next
    }

    /// 及格评分后的易化因子
    ///
    /// ease' = max(1.3, ease + (0.1 - (5-q)(0.08 + (5-q)×0.02)))，
    /// 增量以千分位整数精确计算：q=5 → +0.100，q=4 → 0，q=3 → -0.140。
    fn ease_after_pass(ease: Fixed, grade: Grade) -> Fixed {
        let d = (5 - grade.value()) as i64;
        let delta = Fixed::from_millis(100 - d * (80 + d * 20));
        (ease + delta).max(EASE_FLOOR)
    }
}
