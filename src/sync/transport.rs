//! 同步传输层
//!
//! 定义推送/拉取的批次结构与 `SyncTransport` 抽象，
//! 以及进程内参考实现 `MemoryAuthority`（测试与嵌入式场景使用）。
//! 服务端按 `(device_id, local_revision)` 去重事件（at-least-once 推送、
//! exactly-once 生效），按"最新时间戳获胜 + device_id 字典序"裁决状态快照。

use serde::{Deserialize, Serialize};
use std::collections::{HashMap, HashSet};
use std::sync::{Arc, Mutex};

use crate::error::{SrsError, SrsResult};
use crate::models::{datetime_to_millis, CardState, ReviewEvent};

// ============================================================
// 批次结构
// ============================================================

/// 推送批次：待确认事件 + 脏状态快照
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PushBatch {
    /// 发起推送的设备 ID
    pub device_id: String,
    /// 待确认的复习事件（按 local_revision 升序）
    pub events: Vec<ReviewEvent>,
    /// 有未同步修改的卡片状态快照
    pub states: Vec<CardState>,
}

/// 推送确认
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PushAck {
    /// 已确认到的 local_revision（0 表示本批无事件）
    pub acked_through: i64,
    /// 本批中被判定为重放的事件数
    pub duplicates: usize,
}

/// 拉取请求
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PullRequest {
    /// 发起拉取的设备 ID
    pub device_id: String,
    /// 上次同步已确认的服务端水位线
    pub since_watermark: i64,
}

/// 服务端裁决后的单卡快照
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RemoteCard {
    /// 权威卡片状态
    pub state: CardState,
    /// 产生该状态的设备 ID（冲突裁决的并列裁决依据）
    pub origin_device: String,
    /// 服务端修订号
    pub sync_revision: i64,
}

/// 拉取响应
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PullResponse {
    /// 水位线之后发生变化的卡片快照
    pub cards: Vec<RemoteCard>,
    /// 新的服务端水位线
    pub watermark: i64,
}

// ============================================================
// SyncTransport - 传输抽象
// ============================================================

/// 同步传输抽象
///
/// 推送与拉取各为一次请求/应答调用，线格式由具体实现决定。
#[allow(async_fn_in_trait)]
pub trait SyncTransport {
    /// 推送待确认事件与脏状态
    async fn push(&self, batch: PushBatch) -> SrsResult<PushAck>;

    /// 拉取水位线之后的权威快照
    async fn pull(&self, request: PullRequest) -> SrsResult<PullResponse>;
}

// ============================================================
// MemoryAuthority - 进程内参考服务端
// ============================================================

/// 服务端单卡记录
#[derive(Debug, Clone)]
struct AuthorityCard {
    state: CardState,
    origin_device: String,
    sync_revision: i64,
}

#[derive(Debug, Default)]
struct AuthorityInner {
    cards: HashMap<String, AuthorityCard>,
    /// 已生效事件的去重集合
    seen: HashSet<(String, i64)>,
    /// 全量事件历史（含落选事件，供审计）
    history: Vec<ReviewEvent>,
    /// 全局服务端修订号，每次接受状态变更时递增
    sync_revision: i64,
    /// 测试钩子：接下来 n 次请求返回网络错误
    fail_next: u32,
    /// 测试钩子：模拟认证失效
    rejected: bool,
}

/// 进程内同步服务端
///
/// 克隆共享同一份内部状态，可同时接入多台设备的协调器。
#[derive(Debug, Clone, Default)]
pub struct MemoryAuthority {
    inner: Arc<Mutex<AuthorityInner>>,
}

impl MemoryAuthority {
    /// 创建空的服务端
    pub fn new() -> Self {
        Self::default()
    }

    /// 测试钩子：令接下来 n 次请求失败（模拟网络故障）
    pub fn fail_next_requests(&self, n: u32) {
        self.lock().fail_next = n;
    }

    /// 测试钩子：模拟认证失效
    pub fn set_rejected(&self, rejected: bool) {
        self.lock().rejected = rejected;
    }

    /// 查看某张卡的权威状态
    pub fn card_state(&self, card_id: &str) -> Option<CardState> {
        self.lock().cards.get(card_id).map(|c| c.state.clone())
    }

    /// 审计历史长度（含落选事件）
    pub fn history_len(&self) -> usize {
        self.lock().history.len()
    }

    /// 当前服务端水位线
    pub fn watermark(&self) -> i64 {
        self.lock().sync_revision
    }

    fn lock(&self) -> std::sync::MutexGuard<'_, AuthorityInner> {
        // 内部锁只在同步代码段持有，poisoning 仅在测试 panic 时出现
        self.inner.lock().unwrap_or_else(|e| e.into_inner())
    }

    fn check_gates(inner: &mut AuthorityInner) -> SrsResult<()> {
        if inner.rejected {
            return Err(SrsError::SyncAuthorityRejected("认证失效".to_string()));
        }
        if inner.fail_next > 0 {
            inner.fail_next -= 1;
            return Err(SrsError::SyncNetworkFailure("模拟网络故障".to_string()));
        }
        Ok(())
    }

    /// 状态快照的裁决键：(last_reviewed_at 毫秒, 设备 ID)
    fn snapshot_key(state: &CardState, device: &str) -> (i64, String) {
        (
            state
                .last_reviewed_at
                .map(datetime_to_millis)
                .unwrap_or(i64::MIN),
            device.to_string(),
        )
    }
}

impl SyncTransport for MemoryAuthority {
    async fn push(&self, batch: PushBatch) -> SrsResult<PushAck> {
        let mut inner = self.lock();
        Self::check_gates(&mut inner)?;

        // 事件去重：同一 (device_id, local_revision) 只生效一次
        let mut duplicates = 0;
        let mut acked_through = 0;
        for event in &batch.events {
            acked_through = acked_through.max(event.local_revision);
            if !inner.seen.insert(event.dedup_key()) {
                duplicates += 1;
                continue;
            }
            inner.history.push(event.clone());
        }

        // 状态快照裁决：最新时间戳获胜，并列取 device_id 字典序大者
        for state in batch.states {
            let incoming_key = Self::snapshot_key(&state, &batch.device_id);
            let current_key = inner
                .cards
                .get(&state.card_id)
                .map(|c| Self::snapshot_key(&c.state, &c.origin_device));

            let accept = match current_key {
                None => true,
                Some(existing) => incoming_key > existing,
            };

            if accept {
                inner.sync_revision += 1;
                let sync_revision = inner.sync_revision;
                let mut normalized = state;
                normalized.is_dirty = false;
                normalized.synced_revision = normalized.revision;
                log::info!(
                    "服务端接受状态: card_id={}, device={}, sync_revision={}",
                    normalized.card_id,
                    batch.device_id,
                    sync_revision
                );
                inner.cards.insert(
                    normalized.card_id.clone(),
                    AuthorityCard {
                        state: normalized,
                        origin_device: batch.device_id.clone(),
                        sync_revision,
                    },
                );
            }
        }

        Ok(PushAck {
            acked_through,
            duplicates,
        })
    }

    async fn pull(&self, request: PullRequest) -> SrsResult<PullResponse> {
        let mut inner = self.lock();
        Self::check_gates(&mut inner)?;

        let mut cards: Vec<RemoteCard> = inner
            .cards
            .values()
            .filter(|c| c.sync_revision > request.since_watermark)
            .map(|c| RemoteCard {
                state: c.state.clone(),
                origin_device: c.origin_device.clone(),
                sync_revision: c.sync_revision,
            })
            .collect();
        cards.sort_by(|a, b| a.sync_revision.cmp(&b.sync_revision));

        Ok(PullResponse {
            cards,
            watermark: inner.sync_revision,
        })
    }
}
