//! SQLite 离线存储模块
//!
//! 提供本地 SQLite 数据库存储功能，支持：
//! - 卡片调度状态的本地持久化（进程重启后仍然有效）
//! - 复习事件变更日志的离线存储
//! - 同步元数据（水位线、上次同步时间）

// ============================================================
// 子模块声明
// ============================================================

pub mod card_state;
pub mod change_log;
pub mod migrations;

// ============================================================
// 重新导出主要类型
// ============================================================

pub use card_state::CardStateStore;
pub use change_log::ChangeLog;
pub use migrations::run_migrations;

// ============================================================
// 依赖导入
// ============================================================

use rusqlite::Connection;
use std::path::Path;
use std::sync::{Arc, Mutex, MutexGuard};

use crate::error::{SrsError, SrsResult};
use crate::models::datetime_to_millis;

/// 拉取水位线元数据键
pub const META_PULL_WATERMARK: &str = "pull_watermark";
/// 上次成功同步时间元数据键
pub const META_LAST_SYNC_MS: &str = "last_sync_ms";
/// 本设备 ID 元数据键
pub const META_DEVICE_ID: &str = "device_id";

/// 待同步记录数统计
///
/// 供 UI 层展示"待同步"指示器使用。
#[derive(Debug, Clone, Default)]
pub struct PendingSyncCount {
    /// 变更日志中待推送的事件数
    pub pending_events: i64,
    /// 有未同步修改的卡片数
    pub dirty_cards: i64,
}

/// 数据库连接管理器
pub struct DatabaseManager {
    connection: Arc<Mutex<Connection>>,
    db_path: String,
}

impl DatabaseManager {
    /// 创建新的数据库管理器
    ///
    /// 自动启用 WAL 模式、外键约束，并运行数据库迁移。
    pub fn new<P: AsRef<Path>>(db_path: P) -> SrsResult<Self> {
        let path_str = db_path.as_ref().to_string_lossy().to_string();
        let connection = Connection::open(&db_path)?;

        // 启用 WAL 模式以提高并发性能
        connection.execute_batch(
            "PRAGMA journal_mode=WAL;
             PRAGMA synchronous=NORMAL;
             PRAGMA foreign_keys=ON;
             PRAGMA cache_size=-64000;",
        )?;

        let manager = Self {
            connection: Arc::new(Mutex::new(connection)),
            db_path: path_str,
        };

        manager.initialize()?;

        Ok(manager)
    }

    /// 创建内存数据库（用于测试）
    pub fn in_memory() -> SrsResult<Self> {
        let connection = Connection::open_in_memory()?;

        connection.execute_batch(
            "PRAGMA foreign_keys=ON;
             PRAGMA cache_size=-64000;",
        )?;

        let manager = Self {
            connection: Arc::new(Mutex::new(connection)),
            db_path: ":memory:".to_string(),
        };

        manager.initialize()?;

        Ok(manager)
    }

    /// 初始化数据库（运行迁移）
    pub fn initialize(&self) -> SrsResult<()> {
        let conn = self.get_connection()?;
        migrations::run_migrations(&conn)?;
        Ok(())
    }

    /// 获取共享连接句柄（供各仓储持有）
    pub fn shared_connection(&self) -> Arc<Mutex<Connection>> {
        Arc::clone(&self.connection)
    }

    /// 获取数据库连接的锁
    pub fn get_connection(&self) -> SrsResult<MutexGuard<'_, Connection>> {
        self.connection
            .lock()
            .map_err(|e| SrsError::LockError(e.to_string()))
    }

    /// 获取数据库路径
    pub fn db_path(&self) -> &str {
        &self.db_path
    }

    /// 执行事务
    ///
    /// # Example
    /// ```ignore
    /// let result = db.transaction(|conn| {
    ///     conn.execute("INSERT INTO ...", [])?;
    ///     Ok(42)
    /// })?;
    /// ```
    pub fn transaction<F, T>(&self, f: F) -> SrsResult<T>
    where
        F: FnOnce(&Connection) -> SrsResult<T>,
    {
        let mut conn = self
            .connection
            .lock()
            .map_err(|e| SrsError::LockError(e.to_string()))?;

        let tx = conn.transaction()?;
        let result = f(&tx)?;
        tx.commit()?;

        Ok(result)
    }

    // ========== 同步元数据操作 ==========

    /// 获取同步元数据
    pub fn get_sync_metadata(&self, key: &str) -> SrsResult<Option<String>> {
        let conn = self.get_connection()?;

        let value = conn
            .query_row(
                "SELECT value FROM sync_metadata WHERE key = ?1",
                [key],
                |row| row.get(0),
            )
            .ok();

        Ok(value)
    }

    /// 设置同步元数据
    pub fn set_sync_metadata(&self, key: &str, value: &str) -> SrsResult<()> {
        let conn = self.get_connection()?;

        conn.execute(
            r#"
            INSERT INTO sync_metadata (key, value, updated_at_ms)
            VALUES (?1, ?2, ?3)
            ON CONFLICT(key) DO UPDATE SET
                value = excluded.value,
                updated_at_ms = excluded.updated_at_ms
            "#,
            rusqlite::params![key, value, datetime_to_millis(chrono::Utc::now())],
        )?;

        Ok(())
    }

    /// 获取拉取水位线（从未同步过则为 0）
    pub fn pull_watermark(&self) -> SrsResult<i64> {
        Ok(self
            .get_sync_metadata(META_PULL_WATERMARK)?
            .and_then(|v| v.parse().ok())
            .unwrap_or(0))
    }

    /// 设置拉取水位线
    pub fn set_pull_watermark(&self, watermark: i64) -> SrsResult<()> {
        self.set_sync_metadata(META_PULL_WATERMARK, &watermark.to_string())
    }

    /// 统计待同步记录数
    pub fn pending_sync_count(&self) -> SrsResult<PendingSyncCount> {
        let conn = self.get_connection()?;

        let pending_events: i64 = conn.query_row(
            "SELECT COUNT(*) FROM change_log WHERE status = 'pending'",
            [],
            |row| row.get(0),
        )?;

        let dirty_cards: i64 = conn.query_row(
            "SELECT COUNT(*) FROM card_state WHERE is_dirty = 1",
            [],
            |row| row.get(0),
        )?;

        Ok(PendingSyncCount {
            pending_events,
            dirty_cards,
        })
    }
}
