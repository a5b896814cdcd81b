//! 同步协调器模块
//!
//! 驱动一个同步周期的状态机：
//! `Idle → Pushing → Pulling → Resolving → Applying → Idle`，
//! 任一阶段失败进入 `Failed`，指数退避（带抖动）后回到 `Idle` 重试。
//!
//! 并发契约：每台设备同一时刻至多一个周期在途（单槽锁），
//! 周期进行中到达的同步请求并入下一周期而非无限排队。
//! 网络挂起点不持有任何本地锁：推送内容先以原子快照取出，
//! 应答返回后按 revision 水位线对账。

use chrono::Utc;
use rand::Rng;
use std::future::Future;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex as StdMutex};
use std::time::Duration;
use tokio::sync::Mutex as AsyncMutex;

use crate::error::{SrsError, SrsResult};
use crate::models::datetime_to_millis;
use crate::storage::{CardStateStore, ChangeLog, DatabaseManager, META_LAST_SYNC_MS};
use crate::sync::resolver::{ConflictResolver, Winner};
use crate::sync::transport::{PullRequest, PushBatch, SyncTransport};
use crate::sync::{SyncConfig, SyncPhase, SyncReport};

/// 取消令牌
///
/// 从协调器获取后可跨线程触发在途周期的取消。
#[derive(Debug, Clone)]
pub struct CancelToken(Arc<AtomicBool>);

impl CancelToken {
    /// 请求取消在途周期
    pub fn cancel(&self) {
        self.0.store(true, Ordering::SeqCst);
    }
}

/// 同步协调器
pub struct SyncCoordinator<T: SyncTransport> {
    device_id: String,
    db: Arc<DatabaseManager>,
    store: CardStateStore,
    log: ChangeLog,
    transport: T,
    config: SyncConfig,
    phase: StdMutex<SyncPhase>,
    /// 单槽锁：同一时刻至多一个周期在途
    cycle_lock: AsyncMutex<()>,
    /// 周期进行中收到的同步请求，并入下一周期
    rerun_requested: AtomicBool,
    cancelled: Arc<AtomicBool>,
}

impl<T: SyncTransport> SyncCoordinator<T> {
    /// 创建同步协调器
    pub fn new(
        device_id: impl Into<String>,
        db: Arc<DatabaseManager>,
        transport: T,
        config: SyncConfig,
    ) -> Self {
        let conn = db.shared_connection();
        Self {
            device_id: device_id.into(),
            db,
            store: CardStateStore::new(Arc::clone(&conn)),
            log: ChangeLog::new(conn),
            transport,
            config,
            phase: StdMutex::new(SyncPhase::Idle),
            cycle_lock: AsyncMutex::new(()),
            rerun_requested: AtomicBool::new(false),
            cancelled: Arc::new(AtomicBool::new(false)),
        }
    }

    /// 当前阶段
    pub fn phase(&self) -> SyncPhase {
        *self.phase.lock().unwrap_or_else(|e| e.into_inner())
    }

    /// 取消在途周期
    ///
    /// Applying 阶段逐卡原子应用，取消不会留下半写状态；
    /// 未应用完的快照在下个周期按同一水位线重新拉取。
    pub fn cancel(&self) {
        self.cancelled.store(true, Ordering::SeqCst);
    }

    /// 获取可跨线程使用的取消令牌
    pub fn cancel_token(&self) -> CancelToken {
        CancelToken(Arc::clone(&self.cancelled))
    }

    /// 发起一次同步
    ///
    /// 已有周期在途时不排队：置并入标记并立即返回，
    /// 在途周期结束后自动补跑一轮。
    pub async fn sync(&self) -> SrsResult<SyncReport> {
        let _guard = match self.cycle_lock.try_lock() {
            Ok(guard) => guard,
            Err(_) => {
                self.rerun_requested.store(true, Ordering::SeqCst);
                log::debug!("同步周期进行中，请求并入下一周期");
                return Ok(SyncReport::coalesced());
            }
        };

        self.cancelled.store(false, Ordering::SeqCst);

        let mut report = self.cycle_with_retry().await?;
        while self.rerun_requested.swap(false, Ordering::SeqCst) {
            let next = self.cycle_with_retry().await?;
            report.merge(next);
        }

        Ok(report)
    }

    // ========== 重试与退避 ==========

    async fn cycle_with_retry(&self) -> SrsResult<SyncReport> {
        let mut attempt: u32 = 0;

        loop {
            match self.run_cycle().await {
                Ok(report) => return Ok(report),
                Err(e) if e.is_transient() && attempt < self.config.max_retries => {
                    attempt += 1;
                    self.set_phase(SyncPhase::Failed);
                    let delay = backoff_delay(&self.config, attempt);
                    log::warn!(
                        "同步失败（第 {} 次重试，{}ms 后）: {}",
                        attempt,
                        delay.as_millis(),
                        e
                    );
                    tokio::time::sleep(delay).await;
                    self.set_phase(SyncPhase::Idle);
                }
                Err(e) => {
                    self.set_phase(SyncPhase::Failed);
                    log::error!("同步失败，放弃本轮: {}", e);
                    self.set_phase(SyncPhase::Idle);
                    return Err(e);
                }
            }
        }
    }

    // ========== 单个同步周期 ==========

    async fn run_cycle(&self) -> SrsResult<SyncReport> {
        let mut report = SyncReport::default();

        // ---- Pushing：推送待确认事件与脏状态 ----
        self.set_phase(SyncPhase::Pushing);
        let mut first_batch = true;
        loop {
            // 网络调用前取原子快照，锁不跨越挂起点
            let events = self.log.pending(self.config.batch_size as i64)?;
            let states = if first_batch {
                self.store.dirty_states()?
            } else {
                Vec::new()
            };

            if events.is_empty() && states.is_empty() {
                break;
            }

            let batch = PushBatch {
                device_id: self.device_id.clone(),
                events: events.clone(),
                states: states.clone(),
            };

            let ack = self.with_timeout(self.transport.push(batch)).await?;

            if ack.acked_through > 0 {
                self.log.acknowledge(ack.acked_through)?;
            }
            // 推送期间产生的新修改保持 dirty（按快照 revision 对账）
            for state in &states {
                self.store.mark_synced(&state.card_id, state.revision)?;
            }

            if ack.duplicates > 0 {
                log::info!("服务端判重 {} 条事件（重放安全）", ack.duplicates);
            }

            report.pushed_events += events.len();
            report.pushed_states += states.len();
            first_batch = false;
        }

        if self.is_cancelled() {
            self.set_phase(SyncPhase::Idle);
            return Ok(report);
        }

        // ---- Pulling：按水位线增量拉取权威快照 ----
        self.set_phase(SyncPhase::Pulling);
        let watermark = self.db.pull_watermark()?;
        let response = self
            .with_timeout(self.transport.pull(PullRequest {
                device_id: self.device_id.clone(),
                since_watermark: watermark,
            }))
            .await?;

        // ---- Resolving：仅对本地也推进过的卡片触发裁决 ----
        self.set_phase(SyncPhase::Resolving);
        // 记录裁决时读到的本地 revision，应用阶段据此检测并发本地写入
        let mut to_apply: Vec<(&_, i64)> = Vec::new();
        for remote in &response.cards {
            match self.store.try_get(&remote.state.card_id)? {
                None => to_apply.push((remote, 0)),
                Some(local) => {
                    let diverged = local.revision > local.synced_revision;
                    if !diverged {
                        // 本地无分歧，权威状态无条件获胜
                        to_apply.push((remote, local.revision));
                    } else {
                        report.conflicts_resolved += 1;
                        match ConflictResolver::resolve(
                            &local,
                            &self.device_id,
                            &remote.state,
                            &remote.origin_device,
                        ) {
                            Winner::Remote => to_apply.push((remote, local.revision)),
                            Winner::Local => {
                                log::info!(
                                    "冲突裁决: card_id={} 本地获胜，等待下轮推送",
                                    local.card_id
                                );
                            }
                        }
                    }
                }
            }
        }

        // ---- Applying：逐卡原子应用，水位线最后推进 ----
        self.set_phase(SyncPhase::Applying);
        for (remote, observed_revision) in to_apply {
            if self.is_cancelled() {
                // 水位线未推进，剩余快照下个周期重新拉取
                log::info!("同步周期被取消，已应用 {} 张卡片", report.pulled);
                self.set_phase(SyncPhase::Idle);
                return Ok(report);
            }

            let mut resolved = remote.state.clone();
            resolved.is_dirty = false;
            resolved.synced_revision = resolved.revision;
            if self.store.apply_authoritative(&resolved, observed_revision)? {
                report.pulled += 1;
            } else {
                // 裁决后本地又提交了复习，保留本地修改，下轮推送后重新裁决
                log::info!(
                    "应用期间本地状态已推进，跳过: card_id={}",
                    resolved.card_id
                );
            }
        }

        self.db.set_pull_watermark(response.watermark)?;
        self.db
            .set_sync_metadata(META_LAST_SYNC_MS, &datetime_to_millis(Utc::now()).to_string())?;

        report.sync_time = Utc::now();
        self.set_phase(SyncPhase::Idle);

        log::info!(
            "同步完成: 推送事件 {} 条, 推送状态 {} 条, 拉取 {} 条, 裁决冲突 {} 个",
            report.pushed_events,
            report.pushed_states,
            report.pulled,
            report.conflicts_resolved
        );

        Ok(report)
    }

    // ========== 辅助方法 ==========

    async fn with_timeout<F, O>(&self, fut: F) -> SrsResult<O>
    where
        F: Future<Output = SrsResult<O>>,
    {
        let limit = Duration::from_millis(self.config.operation_timeout_ms);
        match tokio::time::timeout(limit, fut).await {
            Ok(result) => result,
            Err(_) => Err(SrsError::SyncNetworkFailure(format!(
                "操作超时 ({}ms)",
                self.config.operation_timeout_ms
            ))),
        }
    }

    fn set_phase(&self, phase: SyncPhase) {
        let mut guard = self.phase.lock().unwrap_or_else(|e| e.into_inner());
        if *guard != phase {
            log::debug!("同步阶段: {:?} -> {:?}", *guard, phase);
            *guard = phase;
        }
    }

    fn is_cancelled(&self) -> bool {
        self.cancelled.load(Ordering::SeqCst)
    }
}

/// 指数退避延迟：base × 2^(attempt-1)，封顶后叠加抖动
fn backoff_delay(config: &SyncConfig, attempt: u32) -> Duration {
    let exp = config
        .base_retry_delay_ms
        .saturating_mul(1u64 << (attempt - 1).min(16))
        .min(config.max_retry_delay_ms);
    let jitter = rand::thread_rng().gen_range(0..=config.base_retry_delay_ms / 2);
    Duration::from_millis(exp + jitter)
}
