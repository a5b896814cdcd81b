//! 同步协议模块
//!
//! 负责本地变更日志与服务端的双向同步，包括：
//! - 按阶段推进的同步状态机（推送 → 拉取 → 裁决 → 应用）
//! - 离线队列推送与事件去重（at-least-once 推送、exactly-once 生效）
//! - 冲突裁决与多设备收敛

// ============================================================
// 子模块声明
// ============================================================

pub mod coordinator;
pub mod http;
pub mod resolver;
pub mod transport;

// ============================================================
// 重新导出主要类型
// ============================================================

pub use coordinator::{CancelToken, SyncCoordinator};
pub use http::{HttpTransport, HttpTransportConfig};
pub use resolver::{ConflictResolver, Winner};
pub use transport::{
    MemoryAuthority, PullRequest, PullResponse, PushAck, PushBatch, RemoteCard, SyncTransport,
};

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// 同步配置
#[derive(Debug, Clone)]
pub struct SyncConfig {
    /// 单批推送的事件数上限
    pub batch_size: usize,
    /// 瞬时故障的最大重试次数
    pub max_retries: u32,
    /// 重试退避基准间隔（毫秒）
    pub base_retry_delay_ms: u64,
    /// 重试退避上限（毫秒）
    pub max_retry_delay_ms: u64,
    /// 单次网络操作超时（毫秒）
    pub operation_timeout_ms: u64,
}

impl Default for SyncConfig {
    fn default() -> Self {
        Self {
            batch_size: 100,
            max_retries: 3,
            base_retry_delay_ms: 1000,
            max_retry_delay_ms: 30_000,
            operation_timeout_ms: 30_000,
        }
    }
}

/// 同步周期阶段
///
/// `Idle → Pushing → Pulling → Resolving → Applying → Idle`，
/// 任一阶段可进入 `Failed`，退避后回到 `Idle`。
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum SyncPhase {
    Idle,
    Pushing,
    Pulling,
    Resolving,
    Applying,
    Failed,
}

/// 同步结果
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SyncReport {
    /// 本次周期是否被并入了已在进行的周期
    pub coalesced: bool,
    /// 推送并确认的事件数
    pub pushed_events: usize,
    /// 推送的状态快照数
    pub pushed_states: usize,
    /// 拉取并应用的快照数
    pub pulled: usize,
    /// 触发冲突裁决的卡片数
    pub conflicts_resolved: usize,
    /// 同步完成时间
    pub sync_time: DateTime<Utc>,
}

impl Default for SyncReport {
    fn default() -> Self {
        Self {
            coalesced: false,
            pushed_events: 0,
            pushed_states: 0,
            pulled: 0,
            conflicts_resolved: 0,
            sync_time: Utc::now(),
        }
    }
}

impl SyncReport {
    /// 标记为已并入进行中周期的空结果
    pub fn coalesced() -> Self {
        Self {
            coalesced: true,
            ..Default::default()
        }
    }

    /// 合并后续周期的结果
    pub fn merge(&mut self, other: SyncReport) {
        self.pushed_events += other.pushed_events;
        self.pushed_states += other.pushed_states;
        self.pulled += other.pulled;
        self.conflicts_resolved += other.conflicts_resolved;
        self.sync_time = other.sync_time;
    }
}
