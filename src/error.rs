//! 错误类型定义
//!
//! 本地复习流程（校验 → 调度 → 落库）对合法输入永不失败，
//! 只有同步协调器的网络调用会产生可恢复错误。

use thiserror::Error;

/// SRS 引擎错误类型
#[derive(Error, Debug)]
pub enum SrsError {
    /// 评分非法：非整数、负数或大于 5
    #[error("非法评分: {0}")]
    InvalidGrade(String),

    /// 本地并发写入冲突（契约违规，正确集成下不应出现）
    #[error("本地并发写入冲突: card_id={card_id}, 期望 revision={expected}, 实际 revision={actual}")]
    ConcurrentLocalWrite {
        card_id: String,
        expected: i64,
        actual: i64,
    },

    /// 同步网络故障（瞬时，带退避重试）
    #[error("同步网络故障: {0}")]
    SyncNetworkFailure(String),

    /// 同步被服务端拒绝（如认证失败，需用户处理后才恢复同步）
    #[error("同步被服务端拒绝: {0}")]
    SyncAuthorityRejected(String),

    /// 数据库错误
    #[error("数据库错误: {0}")]
    Database(#[from] rusqlite::Error),

    /// 迁移错误
    #[error("迁移错误: {0}")]
    Migration(String),

    /// 序列化错误
    #[error("序列化错误: {0}")]
    Serialization(String),

    /// 数据未找到
    #[error("数据未找到: {0}")]
    NotFound(String),

    /// 锁获取失败
    #[error("锁获取失败: {0}")]
    LockError(String),
}

impl SrsError {
    /// 是否为可通过重试恢复的瞬时错误
    pub fn is_transient(&self) -> bool {
        matches!(self, Self::SyncNetworkFailure(_))
    }
}

pub type SrsResult<T> = Result<T, SrsError>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_network_failure_is_transient() {
        assert!(SrsError::SyncNetworkFailure("timeout".into()).is_transient());
        assert!(!SrsError::SyncAuthorityRejected("401".into()).is_transient());
        assert!(!SrsError::InvalidGrade("7".into()).is_transient());
    }
}
