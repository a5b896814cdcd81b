//! 卡片状态仓储模块
//!
//! 每设备的持久化卡片状态表，单写者契约：
//! 本地写入必须携带期望的 revision，不匹配即 `ConcurrentLocalWrite`。

use rusqlite::Connection;
use std::sync::{Arc, Mutex, MutexGuard};

use crate::error::{SrsError, SrsResult};
use crate::models::{datetime_to_millis, CardState};

/// 卡片状态仓储
pub struct CardStateStore {
    conn: Arc<Mutex<Connection>>,
}

impl CardStateStore {
    /// 创建新的卡片状态仓储
    pub fn new(conn: Arc<Mutex<Connection>>) -> Self {
        Self { conn }
    }

    // ========== 读取操作 ==========

    /// 获取卡片状态，未见过的卡片返回默认状态
    pub fn get(&self, card_id: &str) -> SrsResult<CardState> {
        Ok(self
            .try_get(card_id)?
            .unwrap_or_else(|| CardState::new_default(card_id)))
    }

    /// 获取卡片状态，不存在时返回 None
    pub fn try_get(&self, card_id: &str) -> SrsResult<Option<CardState>> {
        let conn = self.get_connection()?;
        Self::try_get_with_conn(&conn, card_id)
    }

    /// 在既有连接/事务上读取卡片状态
    pub fn try_get_with_conn(conn: &Connection, card_id: &str) -> SrsResult<Option<CardState>> {
        let state = conn
            .query_row(
                "SELECT * FROM card_state WHERE card_id = ?1",
                [card_id],
                |row| CardState::from_row(row),
            )
            .ok();

        Ok(state)
    }

    /// 查询到期卡片
    ///
    /// 返回 due_at <= as_of 的卡片 ID，按 due_at 升序、card_id 断开并列。
    pub fn get_due_cards(&self, as_of: chrono::DateTime<chrono::Utc>) -> SrsResult<Vec<String>> {
        let conn = self.get_connection()?;

        let mut stmt = conn.prepare(
            r#"
            SELECT card_id FROM card_state
            WHERE due_at_ms IS NOT NULL AND due_at_ms <= ?1
            ORDER BY due_at_ms ASC, card_id ASC
            "#,
        )?;

        let ids = stmt
            .query_map([datetime_to_millis(as_of)], |row| row.get(0))?
            .filter_map(|r| r.ok())
            .collect();

        Ok(ids)
    }

    /// 获取所有有未同步修改的卡片状态
    pub fn dirty_states(&self) -> SrsResult<Vec<CardState>> {
        let conn = self.get_connection()?;

        let mut stmt =
            conn.prepare("SELECT * FROM card_state WHERE is_dirty = 1 ORDER BY card_id ASC")?;

        let states = stmt
            .query_map([], |row| CardState::from_row(row))?
            .filter_map(|r| r.ok())
            .collect();

        Ok(states)
    }

    // ========== 写入操作 ==========

    /// 写入调度引擎的输出（单写者契约）
    ///
    /// `expected_revision` 为调用方读取旧状态时看到的 revision。
    /// 行已被其他写者推进时返回 `ConcurrentLocalWrite`。
    pub fn put(&self, state: &CardState, expected_revision: i64) -> SrsResult<()> {
        let conn = self.get_connection()?;
        Self::put_with_conn(&conn, state, expected_revision)
    }

    /// 在既有连接/事务上执行受保护写入
    pub fn put_with_conn(
        conn: &Connection,
        state: &CardState,
        expected_revision: i64,
    ) -> SrsResult<()> {
        let current: Option<i64> = conn
            .query_row(
                "SELECT revision FROM card_state WHERE card_id = ?1",
                [&state.card_id],
                |row| row.get(0),
            )
            .ok();

        let actual = current.unwrap_or(0);
        if actual != expected_revision {
            return Err(SrsError::ConcurrentLocalWrite {
                card_id: state.card_id.clone(),
                expected: expected_revision,
                actual,
            });
        }

        state.upsert(conn)
    }

    /// 写入服务端裁决后的权威状态
    ///
    /// 同步协调器在 Applying 阶段逐卡调用，每张卡一个事务。
    /// `observed_revision` 为裁决时读到的本地 revision；事务内重读，
    /// 若本地在裁决与应用之间又提交了复习则跳过（返回 false），
    /// 该卡保持 dirty，下轮推送后由服务端重新裁决。
    pub fn apply_authoritative(
        &self,
        state: &CardState,
        observed_revision: i64,
    ) -> SrsResult<bool> {
        let mut conn = self.get_connection()?;

        let tx = conn.transaction()?;

        let current: i64 = tx
            .query_row(
                "SELECT revision FROM card_state WHERE card_id = ?1",
                [&state.card_id],
                |row| row.get(0),
            )
            .unwrap_or(0);

        if current != observed_revision {
            return Ok(false);
        }

        state.upsert(&tx)?;
        tx.commit()?;

        Ok(true)
    }

    /// 推送确认后标记状态已同步
    ///
    /// 仅当行的 revision 仍等于推送时的快照 revision 才清除脏标记，
    /// 推送期间又产生的新修改保持 dirty。
    pub fn mark_synced(&self, card_id: &str, pushed_revision: i64) -> SrsResult<bool> {
        let conn = self.get_connection()?;

        let affected = conn.execute(
            r#"
            UPDATE card_state
            SET is_dirty = 0, synced_revision = ?2
            WHERE card_id = ?1 AND revision = ?2
            "#,
            rusqlite::params![card_id, pushed_revision],
        )?;

        Ok(affected > 0)
    }

    /// 删除卡片状态（内容子系统删除卡片时调用）
    pub fn remove(&self, card_id: &str) -> SrsResult<bool> {
        let conn = self.get_connection()?;

        let affected = conn.execute("DELETE FROM card_state WHERE card_id = ?1", [card_id])?;
        Ok(affected > 0)
    }

    // ========== 辅助方法 ==========

    fn get_connection(&self) -> SrsResult<MutexGuard<'_, Connection>> {
        self.conn
            .lock()
            .map_err(|e| SrsError::LockError(e.to_string()))
    }
}
