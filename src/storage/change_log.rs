//! 变更日志仓储模块
//!
//! 每设备 append-only 的复习事件日志，是离线操作的持久化边界：
//! 追加永远在本地成功，推送确认前不删除，确认后归档（供统计与审计）。

use rusqlite::{params, Connection};
use std::sync::{Arc, Mutex, MutexGuard};

use crate::error::{SrsError, SrsResult};
use crate::models::{datetime_to_millis, ReviewEvent};

/// 变更日志仓储
pub struct ChangeLog {
    conn: Arc<Mutex<Connection>>,
}

impl ChangeLog {
    /// 创建新的变更日志仓储
    pub fn new(conn: Arc<Mutex<Connection>>) -> Self {
        Self { conn }
    }

    // ========== 追加操作 ==========

    /// 追加复习事件，返回数据库分配的 local_revision
    pub fn append(&self, event: &ReviewEvent) -> SrsResult<i64> {
        let conn = self.get_connection()?;
        Self::append_with_conn(&conn, event)
    }

    /// 在既有连接/事务上追加事件
    pub fn append_with_conn(conn: &Connection, event: &ReviewEvent) -> SrsResult<i64> {
        conn.execute(
            r#"
            INSERT INTO change_log (
                card_id, grade, client_ts_ms, device_id, status, created_at_ms
            ) VALUES (?1, ?2, ?3, ?4, 'pending', ?5)
            "#,
            params![
                event.card_id,
                event.grade.value() as i64,
                datetime_to_millis(event.client_timestamp),
                event.device_id,
                datetime_to_millis(chrono::Utc::now()),
            ],
        )?;
        Ok(conn.last_insert_rowid())
    }

    // ========== 查询操作 ==========

    /// 待推送事件，按 local_revision 升序（可重入，限量）
    pub fn pending(&self, limit: i64) -> SrsResult<Vec<ReviewEvent>> {
        let conn = self.get_connection()?;

        let mut stmt = conn.prepare(
            r#"
            SELECT * FROM change_log
            WHERE status = 'pending'
            ORDER BY local_revision ASC
            LIMIT ?1
            "#,
        )?;

        let events = stmt
            .query_map([limit], |row| ReviewEvent::from_row(row))?
            .filter_map(|r| r.ok())
            .collect();

        Ok(events)
    }

    /// 待推送事件数
    pub fn pending_count(&self) -> SrsResult<i64> {
        let conn = self.get_connection()?;

        let count = conn.query_row(
            "SELECT COUNT(*) FROM change_log WHERE status = 'pending'",
            [],
            |row| row.get(0),
        )?;

        Ok(count)
    }

    /// 全部事件历史（含已归档），按 local_revision 升序
    pub fn history(&self) -> SrsResult<Vec<ReviewEvent>> {
        let conn = self.get_connection()?;

        let mut stmt = conn.prepare("SELECT * FROM change_log ORDER BY local_revision ASC")?;

        let events = stmt
            .query_map([], |row| ReviewEvent::from_row(row))?
            .filter_map(|r| r.ok())
            .collect();

        Ok(events)
    }

    /// 指定时间之后的事件历史
    pub fn history_since(&self, since: chrono::DateTime<chrono::Utc>) -> SrsResult<Vec<ReviewEvent>> {
        let conn = self.get_connection()?;

        let mut stmt = conn.prepare(
            r#"
            SELECT * FROM change_log
            WHERE client_ts_ms >= ?1
            ORDER BY local_revision ASC
            "#,
        )?;

        let events = stmt
            .query_map([datetime_to_millis(since)], |row| ReviewEvent::from_row(row))?
            .filter_map(|r| r.ok())
            .collect();

        Ok(events)
    }

    // ========== 确认与清理 ==========

    /// 确认推送：将 local_revision <= up_to 的待推送事件归档
    pub fn acknowledge(&self, up_to_local_revision: i64) -> SrsResult<usize> {
        let conn = self.get_connection()?;

        let affected = conn.execute(
            r#"
            UPDATE change_log
            SET status = 'acked'
            WHERE status = 'pending' AND local_revision <= ?1
            "#,
            [up_to_local_revision],
        )?;

        Ok(affected)
    }

    /// 清理已归档事件（显式调用，统计历史随之截断）
    pub fn prune_acknowledged(&self, before: chrono::DateTime<chrono::Utc>) -> SrsResult<usize> {
        let conn = self.get_connection()?;

        let affected = conn.execute(
            "DELETE FROM change_log WHERE status = 'acked' AND client_ts_ms < ?1",
            [datetime_to_millis(before)],
        )?;

        Ok(affected)
    }

    // ========== 辅助方法 ==========

    fn get_connection(&self) -> SrsResult<MutexGuard<'_, Connection>> {
        self.conn
            .lock()
            .map_err(|e| SrsError::LockError(e.to_string()))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::grade::Grade;
    use crate::models::millis_to_datetime;
    use crate::storage::DatabaseManager;

    fn setup_log() -> (DatabaseManager, ChangeLog) {
        let db = DatabaseManager::in_memory().expect("in-memory db");
        let log = ChangeLog::new(db.shared_connection());
        (db, log)
    }

    fn event(card_id: &str, grade: i64, ts_ms: i64) -> ReviewEvent {
        ReviewEvent::new(
            card_id,
            Grade::validate(grade).unwrap(),
            millis_to_datetime(ts_ms),
            "device-a",
        )
    }

    #[test]
    fn test_append_assigns_monotonic_revisions() {
        let (_db, log) = setup_log();

        let r1 = log.append(&event("card-1", 4, 100)).unwrap();
        let r2 = log.append(&event("card-2", 3, 200)).unwrap();
        let r3 = log.append(&event("card-1", 5, 300)).unwrap();

        assert!(r1 < r2 && r2 < r3);

        let pending = log.pending(10).unwrap();
        assert_eq!(pending.len(), 3);
        assert_eq!(pending[0].local_revision, r1);
        assert_eq!(pending[2].local_revision, r3);
    }

    #[test]
    fn test_pending_is_restartable() {
        let (_db, log) = setup_log();

        for i in 0..5 {
            log.append(&event("card-1", 4, i * 100)).unwrap();
        }

        // 限量读取两次，结果一致（读取不消费）
        let first = log.pending(2).unwrap();
        let second = log.pending(2).unwrap();
        assert_eq!(first, second);
        assert_eq!(first.len(), 2);
    }

    #[test]
    fn test_acknowledge_archives_but_keeps_history() {
        let (_db, log) = setup_log();

        let r1 = log.append(&event("card-1", 4, 100)).unwrap();
        let r2 = log.append(&event("card-2", 2, 200)).unwrap();
        let r3 = log.append(&event("card-3", 5, 300)).unwrap();

        let acked = log.acknowledge(r2).unwrap();
        assert_eq!(acked, 2);

        let pending = log.pending(10).unwrap();
        assert_eq!(pending.len(), 1);
        assert_eq!(pending[0].local_revision, r3);

        // 历史完整保留
        assert_eq!(log.history().unwrap().len(), 3);
        let _ = r1;
    }

    #[test]
    fn test_acknowledge_is_idempotent() {
        let (_db, log) = setup_log();

        let r1 = log.append(&event("card-1", 4, 100)).unwrap();
        assert_eq!(log.acknowledge(r1).unwrap(), 1);
        assert_eq!(log.acknowledge(r1).unwrap(), 0);
    }

    #[test]
    fn test_prune_acknowledged_only_removes_archived() {
        let (_db, log) = setup_log();

        let r1 = log.append(&event("card-1", 4, 100)).unwrap();
        log.append(&event("card-2", 3, 200)).unwrap();
        log.acknowledge(r1).unwrap();

        let pruned = log.prune_acknowledged(millis_to_datetime(10_000)).unwrap();
        assert_eq!(pruned, 1);

        // 未确认的事件不受清理影响
        assert_eq!(log.pending(10).unwrap().len(), 1);
        assert_eq!(log.history().unwrap().len(), 1);
    }

    #[test]
    fn test_history_since_filters_by_timestamp() {
        let (_db, log) = setup_log();

        log.append(&event("card-1", 4, 100)).unwrap();
        log.append(&event("card-2", 3, 200)).unwrap();
        log.append(&event("card-3", 5, 300)).unwrap();

        let recent = log.history_since(millis_to_datetime(200)).unwrap();
        assert_eq!(recent.len(), 2);
        assert_eq!(recent[0].card_id, "card-2");
    }
}
