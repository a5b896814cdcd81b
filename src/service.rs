//! 复习服务模块
//!
//! 面向调用方的同步门面：提交复习、查询到期卡片、读取统计。
//! 提交复习为本地事务（状态写入 + 事件追加原子提交），
//! 永不等待网络，网络同步完全由 `SyncCoordinator` 负责。

use chrono::{DateTime, Utc};
use std::sync::Arc;
use uuid::Uuid;

use crate::error::SrsResult;
use crate::grade::Grade;
use crate::models::{CardState, ReviewEvent};
use crate::scheduler::SchedulingEngine;
use crate::stats::{StudyStatistics, StudyStatisticsAggregator};
use crate::storage::{
    CardStateStore, ChangeLog, DatabaseManager, PendingSyncCount, META_DEVICE_ID,
};

/// 复习服务
pub struct ReviewService {
    db: Arc<DatabaseManager>,
    store: CardStateStore,
    log: ChangeLog,
    aggregator: StudyStatisticsAggregator,
    device_id: String,
}

impl ReviewService {
    /// 创建复习服务
    ///
    /// 设备 ID 从 sync_metadata 读取，首次运行时生成 UUID 并持久化，
    /// 之后进程重启保持不变。
    pub fn new(db: Arc<DatabaseManager>) -> SrsResult<Self> {
        let device_id = match db.get_sync_metadata(META_DEVICE_ID)? {
            Some(id) => id,
            None => {
                let id = Uuid::new_v4().to_string();
                db.set_sync_metadata(META_DEVICE_ID, &id)?;
                log::info!("首次运行，生成设备 ID: {}", id);
                id
            }
        };

        Self::with_device_id(db, device_id)
    }

    /// 用指定设备 ID 创建复习服务（测试与迁移场景）
    pub fn with_device_id(
        db: Arc<DatabaseManager>,
        device_id: impl Into<String>,
    ) -> SrsResult<Self> {
        let device_id = device_id.into();
        db.set_sync_metadata(META_DEVICE_ID, &device_id)?;

        let conn = db.shared_connection();
        Ok(Self {
            store: CardStateStore::new(Arc::clone(&conn)),
            log: ChangeLog::new(conn),
            db,
            aggregator: StudyStatisticsAggregator::default(),
            device_id,
        })
    }

    /// 本设备 ID
    pub fn device_id(&self) -> &str {
        &self.device_id
    }

    /// 底层数据库管理器（供同步协调器共用）
    pub fn database(&self) -> Arc<DatabaseManager> {
        Arc::clone(&self.db)
    }

    // ========== 复习流程 ==========

    /// 提交一次复习
    ///
    /// 调度计算 + 状态写入 + 事件追加在单个本地事务内完成，
    /// 断电恢复后要么全部可见要么全部不可见。
    pub fn submit_review(&self, card_id: &str, grade: Grade) -> SrsResult<CardState> {
        self.submit_review_at(card_id, grade, Utc::now())
    }

    /// 以指定时刻提交复习（补录与测试场景）
    pub fn submit_review_at(
        &self,
        card_id: &str,
        grade: Grade,
        now: DateTime<Utc>,
    ) -> SrsResult<CardState> {
        let next = self.db.transaction(|conn| {
            let current = CardStateStore::try_get_with_conn(conn, card_id)?
                .unwrap_or_else(|| CardState::new_default(card_id));

            let next = SchedulingEngine::schedule(&current, grade, now);
            CardStateStore::put_with_conn(conn, &next, current.revision)?;

            let event = ReviewEvent::new(card_id, grade, now, &self.device_id);
            ChangeLog::append_with_conn(conn, &event)?;

            Ok(next)
        })?;

        log::debug!(
            "复习提交: card_id={}, grade={}, 下次到期 {:?}",
            card_id,
            grade.value(),
            next.due_at
        );

        Ok(next)
    }

    // ========== 查询 ==========

    /// 当前卡片状态（未见过的卡片返回默认状态）
    pub fn card_state(&self, card_id: &str) -> SrsResult<CardState> {
        self.store.get(card_id)
    }

    /// 到期卡片 ID，按到期时间升序
    pub fn get_due_cards(&self, as_of: DateTime<Utc>) -> SrsResult<Vec<String>> {
        self.store.get_due_cards(as_of)
    }

    /// 学习统计快照（即时计算，不缓存）
    pub fn statistics(&self) -> SrsResult<StudyStatistics> {
        self.statistics_at(Utc::now())
    }

    /// 以指定时刻计算学习统计
    pub fn statistics_at(&self, now: DateTime<Utc>) -> SrsResult<StudyStatistics> {
        let events = self.log.history()?;
        Ok(self.aggregator.aggregate(&events, now))
    }

    /// 完整复习历史（含已同步归档的事件）
    pub fn review_history(&self) -> SrsResult<Vec<ReviewEvent>> {
        self.log.history()
    }

    /// 待同步记录数
    pub fn pending_sync(&self) -> SrsResult<PendingSyncCount> {
        self.db.pending_sync_count()
    }

    // ========== 内容联动 ==========

    /// 内容子系统删除卡片时调用
    ///
    /// 移除调度状态；历史事件保留在变更日志中（统计不回溯修改）。
    pub fn on_card_deleted(&self, card_id: &str) -> SrsResult<bool> {
        let removed = self.store.remove(card_id)?;
        if removed {
            log::info!("卡片已删除，调度状态移除: card_id={}", card_id);
        }
        Ok(removed)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::fixed::{Fixed, DEFAULT_EASE};
    use crate::models::millis_to_datetime;

    fn setup_service() -> ReviewService {
        let db = Arc::new(DatabaseManager::in_memory().expect("in-memory db"));
        ReviewService::with_device_id(db, "device-test").unwrap()
    }

    fn grade(g: i64) -> Grade {
        Grade::validate(g).unwrap()
    }

    #[test]
    fn test_submit_review_updates_state_and_log() {
        let service = setup_service();

        let state = service
            .submit_review_at("card-1", grade(4), millis_to_datetime(0))
            .unwrap();

        assert_eq!(state.repetitions, 1);
        assert_eq!(state.interval_days, Fixed::from_int(1));
        assert_eq!(state.revision, 1);
        assert!(state.is_dirty);

        // 事件与状态同事务落盘
        let history = service.review_history().unwrap();
        assert_eq!(history.len(), 1);
        assert_eq!(history[0].card_id, "card-1");
        assert_eq!(history[0].device_id, "device-test");

        let pending = service.pending_sync().unwrap();
        assert_eq!(pending.pending_events, 1);
        assert_eq!(pending.dirty_cards, 1);
    }

    #[test]
    fn test_review_chain_matches_reference_scenario() {
        let service = setup_service();
        let day = 86_400_000i64;

        // 第 0、1、7 天分别评分 4、4、5
        service
            .submit_review_at("card-1", grade(4), millis_to_datetime(0))
            .unwrap();
        service
            .submit_review_at("card-1", grade(4), millis_to_datetime(day))
            .unwrap();
        let state = service
            .submit_review_at("card-1", grade(5), millis_to_datetime(7 * day))
            .unwrap();

        assert_eq!(state.repetitions, 3);
        assert_eq!(state.interval_days, Fixed::from_int(16));
        assert_eq!(state.revision, 3);
    }

    #[test]
    fn test_unseen_card_starts_from_default() {
        let service = setup_service();

        let state = service.card_state("never-reviewed").unwrap();
        assert_eq!(state.repetitions, 0);
        assert_eq!(state.ease_factor, DEFAULT_EASE);
        assert!(state.due_at.is_none());
    }

    #[test]
    fn test_due_cards_after_reviews() {
        let service = setup_service();
        let day = 86_400_000i64;

        service
            .submit_review_at("card-a", grade(4), millis_to_datetime(0))
            .unwrap();
        service
            .submit_review_at("card-b", grade(4), millis_to_datetime(0))
            .unwrap();

        // 都在 1 天后到期
        assert!(service.get_due_cards(millis_to_datetime(0)).unwrap().is_empty());
        assert_eq!(
            service.get_due_cards(millis_to_datetime(day)).unwrap(),
            vec!["card-a", "card-b"]
        );
    }

    #[test]
    fn test_statistics_reflect_history() {
        let service = setup_service();
        let now = millis_to_datetime(10 * 86_400_000);

        service
            .submit_review_at("card-1", grade(4), now - chrono::Duration::days(1))
            .unwrap();
        service.submit_review_at("card-2", grade(2), now).unwrap();
        service.submit_review_at("card-3", grade(5), now).unwrap();

        let stats = service.statistics_at(now).unwrap();
        assert_eq!(stats.total_reviews, 3);
        assert_eq!(stats.total_passed, 2);
        assert_eq!(stats.streak_days, 2);
    }

    #[test]
    fn test_on_card_deleted_keeps_history() {
        let service = setup_service();

        service
            .submit_review_at("card-1", grade(4), millis_to_datetime(0))
            .unwrap();

        assert!(service.on_card_deleted("card-1").unwrap());
        assert!(!service.on_card_deleted("card-1").unwrap());

        // 状态回到默认，历史事件保留
        assert_eq!(service.card_state("card-1").unwrap().revision, 0);
        assert_eq!(service.review_history().unwrap().len(), 1);
    }

    #[test]
    fn test_device_id_persists_across_restart() {
        let db = Arc::new(DatabaseManager::in_memory().unwrap());

        let first = ReviewService::new(Arc::clone(&db)).unwrap();
        let id = first.device_id().to_string();
        assert!(!id.is_empty());
        drop(first);

        let second = ReviewService::new(db).unwrap();
        assert_eq!(second.device_id(), id);
    }
}
