//! 数据库迁移模块
//!
//! 管理 SQLite 数据库的版本迁移。
//!
//! ## 迁移策略
//! - 每个迁移在独立事务中执行
//! - 迁移记录存储在 schema_migrations 表中

use rusqlite::Connection;

use crate::error::{SrsError, SrsResult};

/// 当前数据库 schema 版本
pub const CURRENT_SCHEMA_VERSION: i32 = 2;

/// 初始化 schema SQL (V1)
const INIT_SCHEMA: &str = include_str!("schema.sql");

/// 迁移记录
#[derive(Debug, Clone)]
pub struct Migration {
    /// 迁移版本号
    pub version: i32,
    /// 迁移名称/描述
    pub name: String,
    /// 迁移 SQL 语句
    pub sql: String,
}

impl Migration {
    /// 创建新的迁移
    pub fn new(version: i32, name: impl Into<String>, sql: impl Into<String>) -> Self {
        Self {
            version,
            name: name.into(),
            sql: sql.into(),
        }
    }
}

/// 获取所有迁移定义
///
/// 返回按版本号排序的迁移列表
pub fn get_migrations() -> Vec<Migration> {
    vec![
        // V1: 初始表结构
        Migration::new(1, "初始表结构", INIT_SCHEMA),
        // V2: 添加索引优化
        Migration::new(
            2,
            "添加索引优化",
            r#"
            -- 到期卡片查询：按 due_at 升序、card_id 断开并列
            CREATE INDEX IF NOT EXISTS idx_cs_due
                ON card_state(due_at_ms, card_id);

            -- 脏状态推送查询
            CREATE INDEX IF NOT EXISTS idx_cs_dirty
                ON card_state(is_dirty, revision);

            -- 待推送事件查询
            CREATE INDEX IF NOT EXISTS idx_cl_status
                ON change_log(status, local_revision);

            -- 统计聚合按时间扫描
            CREATE INDEX IF NOT EXISTS idx_cl_client_ts
                ON change_log(client_ts_ms);
            "#,
        ),
    ]
}

/// 确保迁移表存在
fn ensure_migrations_table(conn: &Connection) -> SrsResult<()> {
    conn.execute(
        r#"
        CREATE TABLE IF NOT EXISTS schema_migrations (
            version INTEGER PRIMARY KEY,
            name TEXT NOT NULL,
            applied_at INTEGER NOT NULL
        )
        "#,
        [],
    )?;
    Ok(())
}

/// 获取当前数据库版本
pub fn get_current_version(conn: &Connection) -> i32 {
    if ensure_migrations_table(conn).is_err() {
        return 0;
    }

    conn.query_row(
        "SELECT COALESCE(MAX(version), 0) FROM schema_migrations",
        [],
        |row| row.get(0),
    )
    .unwrap_or(0)
}

/// 获取已应用的迁移版本列表
fn get_applied_versions(conn: &Connection) -> SrsResult<Vec<i32>> {
    ensure_migrations_table(conn)?;

    let mut stmt = conn.prepare("SELECT version FROM schema_migrations ORDER BY version")?;
    let versions = stmt
        .query_map([], |row| row.get(0))?
        .filter_map(|r| r.ok())
        .collect();

    Ok(versions)
}

/// 记录迁移已应用
fn record_migration(conn: &Connection, migration: &Migration) -> SrsResult<()> {
    conn.execute(
        "INSERT INTO schema_migrations (version, name, applied_at) VALUES (?1, ?2, ?3)",
        rusqlite::params![
            migration.version,
            migration.name,
            std::time::SystemTime::now()
                .duration_since(std::time::UNIX_EPOCH)
                .unwrap_or_default()
                .as_secs() as i64
        ],
    )?;

    Ok(())
}

/// 运行数据库迁移
///
/// 检查当前数据库版本并执行必要的迁移脚本。
/// 每个迁移在独立事务中执行，失败时自动回滚该迁移。
pub fn run_migrations(conn: &Connection) -> SrsResult<i32> {
    ensure_migrations_table(conn)?;

    let applied_versions = get_applied_versions(conn)?;
    let migrations = get_migrations();
    let mut final_version = get_current_version(conn);

    log::info!(
        "当前数据库版本: {}, 目标版本: {}",
        final_version,
        CURRENT_SCHEMA_VERSION
    );

    for migration in migrations {
        if applied_versions.contains(&migration.version) {
            continue;
        }

        log::info!("运行迁移 v{}: {}", migration.version, migration.name);

        match execute_migration_in_transaction(conn, &migration) {
            Ok(()) => {
                final_version = migration.version;
                log::info!("迁移 v{} 完成", migration.version);
            }
            Err(e) => {
                log::error!("迁移 v{} 失败: {}", migration.version, e);
                return Err(e);
            }
        }
    }

    Ok(final_version)
}

/// 在事务中执行单个迁移
fn execute_migration_in_transaction(conn: &Connection, migration: &Migration) -> SrsResult<()> {
    conn.execute("BEGIN IMMEDIATE", [])?;

    match conn.execute_batch(&migration.sql) {
        Ok(()) => {
            if let Err(e) = record_migration(conn, migration) {
                conn.execute("ROLLBACK", []).ok();
                return Err(e);
            }

            conn.execute("COMMIT", [])?;
            Ok(())
        }
        Err(e) => {
            conn.execute("ROLLBACK", []).ok();
            Err(SrsError::Migration(format!(
                "迁移 v{} 执行失败: {}",
                migration.version, e
            )))
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_run_migrations_from_empty() {
        let conn = Connection::open_in_memory().unwrap();
        let version = run_migrations(&conn).expect("migrations should succeed");
        assert_eq!(version, CURRENT_SCHEMA_VERSION);
    }

    #[test]
    fn test_run_migrations_is_idempotent() {
        let conn = Connection::open_in_memory().unwrap();
        run_migrations(&conn).unwrap();
        let version = run_migrations(&conn).expect("re-run should be a no-op");
        assert_eq!(version, CURRENT_SCHEMA_VERSION);
    }

    #[test]
    fn test_migrations_create_core_tables() {
        let conn = Connection::open_in_memory().unwrap();
        run_migrations(&conn).unwrap();

        for table in ["card_state", "change_log", "sync_metadata"] {
            let count: i64 = conn
                .query_row(
                    "SELECT COUNT(*) FROM sqlite_master WHERE type='table' AND name=?1",
                    [table],
                    |row| row.get(0),
                )
                .unwrap();
            assert_eq!(count, 1, "table {} missing", table);
        }
    }
}
