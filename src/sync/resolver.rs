//! 冲突裁决模块
//!
//! 仅当两台设备在同一同步点之后对同一张卡各自产生了复习事件时触发。
//! 策略：最新时间戳获胜，时间戳完全相同时按 device_id 字典序取大者。
//! 裁决只做整体替换，绝不对两份调度状态做算术合并（如平均易化因子），
//! 因为任一侧还有未推送事件时合并结果不可复现。

use crate::models::{datetime_to_millis, CardState};

/// 裁决结果
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Winner {
    /// 本地状态保留
    Local,
    /// 远端（服务端）状态覆盖本地
    Remote,
}

/// 冲突裁决器
pub struct ConflictResolver;

impl ConflictResolver {
    /// 裁决本地与远端的分歧状态
    ///
    /// 比较键为 (last_reviewed_at 毫秒, 设备 ID)；未复习过的状态
    /// 视为最小键。键完全相等时远端获胜，保证两侧收敛到同一份状态。
    pub fn resolve(
        local: &CardState,
        local_device: &str,
        remote: &CardState,
        remote_device: &str,
    ) -> Winner {
        let local_key = Self::conflict_key(local, local_device);
        let remote_key = Self::conflict_key(remote, remote_device);

        if local_key > remote_key {
            Winner::Local
        } else {
            Winner::Remote
        }
    }

    fn conflict_key<'a>(state: &CardState, device: &'a str) -> (i64, &'a str) {
        let ts = state
            .last_reviewed_at
            .map(datetime_to_millis)
            .unwrap_or(i64::MIN);
        (ts, device)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::millis_to_datetime;

    fn state_reviewed_at(card_id: &str, ts_ms: i64) -> CardState {
        let mut state = CardState::new_default(card_id);
        state.last_reviewed_at = Some(millis_to_datetime(ts_ms));
        state.revision = 1;
        state
    }

    #[test]
    fn test_later_timestamp_wins() {
        let local = state_reviewed_at("card-x", 100);
        let remote = state_reviewed_at("card-x", 105);

        assert_eq!(
            ConflictResolver::resolve(&local, "device-a", &remote, "device-b"),
            Winner::Remote
        );
        assert_eq!(
            ConflictResolver::resolve(&remote, "device-b", &local, "device-a"),
            Winner::Local
        );
    }

    #[test]
    fn test_equal_timestamp_breaks_tie_on_device_id() {
        let local = state_reviewed_at("card-x", 100);
        let remote = state_reviewed_at("card-x", 100);

        // 字典序较大的设备获胜
        assert_eq!(
            ConflictResolver::resolve(&local, "device-b", &remote, "device-a"),
            Winner::Local
        );
        assert_eq!(
            ConflictResolver::resolve(&local, "device-a", &remote, "device-b"),
            Winner::Remote
        );
    }

    #[test]
    fn test_resolution_is_symmetric() {
        // 两侧各自以对方为 remote 裁决，结论指向同一份状态
        let a = state_reviewed_at("card-x", 100);
        let b = state_reviewed_at("card-x", 105);

        let on_a = ConflictResolver::resolve(&a, "device-a", &b, "device-b");
        let on_b = ConflictResolver::resolve(&b, "device-b", &a, "device-a");

        assert_eq!(on_a, Winner::Remote); // a 侧认为 b 胜
        assert_eq!(on_b, Winner::Local); // b 侧认为自己胜
    }

    #[test]
    fn test_never_reviewed_loses() {
        let local = CardState::new_default("card-x");
        let remote = state_reviewed_at("card-x", 1);

        assert_eq!(
            ConflictResolver::resolve(&local, "device-z", &remote, "device-a"),
            Winner::Remote
        );
    }

    #[test]
    fn test_identical_key_prefers_remote() {
        let local = state_reviewed_at("card-x", 100);
        let remote = state_reviewed_at("card-x", 100);

        assert_eq!(
            ConflictResolver::resolve(&local, "device-a", &remote, "device-a"),
            Winner::Remote
        );
    }
}
