//! 学习统计聚合模块
//!
//! 纯读侧：每次从事件历史即时计算，不做缓存，
//! 保证同步应用新事件后统计立即反映最新状态。

use chrono::{DateTime, Duration, NaiveDate, Utc};
use serde::{Deserialize, Serialize};
use std::collections::HashSet;

use crate::models::ReviewEvent;

/// 学习统计快照
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct StudyStatistics {
    /// 历史复习总次数
    pub total_reviews: u32,
    /// 历史通过次数（评分 >= 3）
    pub total_passed: u32,
    /// 连续学习天数
    pub streak_days: u32,
    /// 滚动窗口天数
    pub window_days: u32,
    /// 窗口内复习次数
    pub window_reviews: u32,
    /// 窗口内通过次数
    pub window_passed: u32,
    /// 窗口内正确率（窗口内无复习时为 0）
    pub window_accuracy: f64,
}

/// 学习统计聚合器
#[derive(Debug, Clone)]
pub struct StudyStatisticsAggregator {
    window_days: u32,
}

impl Default for StudyStatisticsAggregator {
    fn default() -> Self {
        Self { window_days: 7 }
    }
}

impl StudyStatisticsAggregator {
    /// 创建指定滚动窗口的聚合器
    pub fn new(window_days: u32) -> Self {
        Self { window_days }
    }

    /// 从事件历史计算统计快照
    pub fn aggregate(&self, events: &[ReviewEvent], now: DateTime<Utc>) -> StudyStatistics {
        let total_reviews = events.len() as u32;
        let total_passed = events.iter().filter(|e| e.grade.is_pass()).count() as u32;

        let window_start = now - Duration::days(self.window_days as i64);
        let (window_reviews, window_passed) = events
            .iter()
            .filter(|e| e.client_timestamp >= window_start && e.client_timestamp <= now)
            .fold((0u32, 0u32), |(total, passed), e| {
                (total + 1, passed + u32::from(e.grade.is_pass()))
            });

        let window_accuracy = if window_reviews > 0 {
            window_passed as f64 / window_reviews as f64
        } else {
            0.0
        };

        StudyStatistics {
            total_reviews,
            total_passed,
            streak_days: Self::streak_days(events, now),
            window_days: self.window_days,
            window_reviews,
            window_passed,
            window_accuracy,
        }
    }

    /// 连续学习天数
    ///
    /// 某一天有至少一次复习即算学习日；连续段以今天或昨天结尾才计入
    /// （今天还没复习不中断昨天收尾的连续段）。
    fn streak_days(events: &[ReviewEvent], now: DateTime<Utc>) -> u32 {
        let study_dates: HashSet<NaiveDate> = events
            .iter()
            .map(|e| e.client_timestamp.date_naive())
            .collect();

        let today = now.date_naive();
        let mut cursor = if study_dates.contains(&today) {
            today
        } else if study_dates.contains(&(today - Duration::days(1))) {
            today - Duration::days(1)
        } else {
            return 0;
        };

        let mut streak = 0u32;
        while study_dates.contains(&cursor) {
            streak += 1;
            match cursor.pred_opt() {
                Some(prev) => cursor = prev,
                None => break,
            }
        }

        streak
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::grade::Grade;

    fn event_at(ts: DateTime<Utc>, grade: i64) -> ReviewEvent {
        ReviewEvent::new("card-1", Grade::validate(grade).unwrap(), ts, "device-a")
    }

    fn day(base: DateTime<Utc>, offset: i64) -> DateTime<Utc> {
        base + Duration::days(offset)
    }

    fn now() -> DateTime<Utc> {
        // 固定基准时刻，测试不依赖墙钟
        DateTime::from_timestamp(1_700_000_000, 0).unwrap()
    }

    #[test]
    fn test_empty_history() {
        let stats = StudyStatisticsAggregator::default().aggregate(&[], now());

        assert_eq!(stats.total_reviews, 0);
        assert_eq!(stats.streak_days, 0);
        assert_eq!(stats.window_accuracy, 0.0);
    }

    #[test]
    fn test_totals_and_window_accuracy() {
        let now = now();
        let events = vec![
            event_at(day(now, -30), 5), // 窗口外
            event_at(day(now, -3), 4),
            event_at(day(now, -2), 2),
            event_at(day(now, -1), 3),
            event_at(now, 5),
        ];

        let stats = StudyStatisticsAggregator::new(7).aggregate(&events, now);

        assert_eq!(stats.total_reviews, 5);
        assert_eq!(stats.total_passed, 4);
        assert_eq!(stats.window_reviews, 4);
        assert_eq!(stats.window_passed, 3);
        assert!((stats.window_accuracy - 0.75).abs() < 1e-9);
    }

    #[test]
    fn test_streak_counts_consecutive_days() {
        let now = now();
        let events = vec![
            event_at(day(now, -2), 4),
            event_at(day(now, -1), 4),
            event_at(now, 4),
        ];

        let stats = StudyStatisticsAggregator::default().aggregate(&events, now);
        assert_eq!(stats.streak_days, 3);
    }

    #[test]
    fn test_streak_survives_today_without_review() {
        let now = now();
        let events = vec![event_at(day(now, -2), 4), event_at(day(now, -1), 4)];

        // 今天还没复习，昨天收尾的连续段不中断
        let stats = StudyStatisticsAggregator::default().aggregate(&events, now);
        assert_eq!(stats.streak_days, 2);
    }

    #[test]
    fn test_streak_broken_by_gap() {
        let now = now();
        let events = vec![
            event_at(day(now, -5), 4),
            event_at(day(now, -4), 4),
            // -3、-2 缺席
            event_at(day(now, -1), 4),
        ];

        let stats = StudyStatisticsAggregator::default().aggregate(&events, now);
        assert_eq!(stats.streak_days, 1);
    }

    #[test]
    fn test_streak_zero_when_last_review_too_old() {
        let now = now();
        let events = vec![event_at(day(now, -3), 4), event_at(day(now, -2), 4)];

        let stats = StudyStatisticsAggregator::default().aggregate(&events, now);
        assert_eq!(stats.streak_days, 0);
    }

    #[test]
    fn test_multiple_reviews_same_day_count_once_for_streak() {
        let now = now();
        let events = vec![
            event_at(now, 4),
            event_at(now + Duration::hours(1), 2),
            event_at(now + Duration::hours(2), 5),
        ];

        let stats = StudyStatisticsAggregator::default().aggregate(&events, now + Duration::hours(3));
        assert_eq!(stats.streak_days, 1);
        assert_eq!(stats.total_reviews, 3);
    }
}
