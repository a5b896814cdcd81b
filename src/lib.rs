//! 闪卡间隔重复调度与多设备同步引擎
//!
//! 核心能力：
//! - SM-2 族确定性调度：定点数运算，任意设备对同一输入产生逐位一致的结果
//! - 离线优先持久化：复习永不等待网络，事件先落本地变更日志
//! - 推送-拉取同步协议：at-least-once 推送、exactly-once 生效、
//!   最新时间戳获胜的冲突裁决，多设备最终收敛
//!
//! 本地复习流程（`ReviewService`）是同步的；网络同步（`SyncCoordinator`）
//! 是异步的，二者共享同一个 `DatabaseManager`。

// ============================================================
// 模块声明
// ============================================================

pub mod error;
pub mod fixed;
pub mod grade;
pub mod models;
pub mod scheduler;
pub mod service;
pub mod stats;
pub mod storage;
pub mod sync;

// ============================================================
// 重新导出主要类型
// ============================================================

pub use error::{SrsError, SrsResult};
pub use fixed::{Fixed, DEFAULT_EASE, EASE_FLOOR};
pub use grade::{Grade, PASS_THRESHOLD};
pub use models::{CardState, ReviewEvent};
pub use scheduler::{SchedulingEngine, MAX_INTERVAL_DAYS};
pub use service::ReviewService;
pub use stats::{StudyStatistics, StudyStatisticsAggregator};
pub use storage::{CardStateStore, ChangeLog, DatabaseManager, PendingSyncCount};
pub use sync::{
    CancelToken, ConflictResolver, HttpTransport, MemoryAuthority, SyncConfig, SyncCoordinator,
    SyncPhase, SyncReport, SyncTransport, Winner,
};
