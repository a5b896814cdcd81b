//! 数据模型定义
//!
//! 定义卡片调度状态与复习事件，以及与 SQLite 交互的行映射方法。
//! 所有时间戳在数据库与线上均以 Unix 毫秒表示。

use chrono::{DateTime, Utc};
use rusqlite::{params, Connection, Result as SqliteResult, Row};
use serde::{Deserialize, Serialize};

use crate::error::SrsResult;
use crate::fixed::{Fixed, DEFAULT_EASE, EASE_FLOOR};
use crate::grade::Grade;

// ============================================================
// CardState - 卡片调度状态
// ============================================================

/// 卡片调度状态
///
/// 每张卡片每个学习者一条，只能由调度引擎的输出经 CardStateStore 写入。
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CardState {
    /// 卡片标识（由内容子系统拥有，这里仅引用）
    pub card_id: String,
    /// 距下次复习的间隔天数（非负定点数）
    pub interval_days: Fixed,
    /// 易化因子（下限 1.3）
    pub ease_factor: Fixed,
    /// 到期时间 = last_reviewed_at + interval_days，未复习过则为空
    #[serde(with = "chrono::serde::ts_milliseconds_option")]
    pub due_at: Option<DateTime<Utc>>,
    /// 连续非遗忘复习次数
    pub repetitions: u32,
    /// 最后复习时间
    #[serde(with = "chrono::serde::ts_milliseconds_option")]
    pub last_reviewed_at: Option<DateTime<Utc>>,
    /// 最后一次评分
    pub last_grade: Option<Grade>,
    /// 本地修订号，每次调度更新递增，与时间戳共同构成合并裁决依据
    pub revision: i64,
    /// 已与服务端确认到的修订号（水位线）
    pub synced_revision: i64,
    /// 是否有未同步的本地修改
    pub is_dirty: bool,
}

impl CardState {
    /// 创建首次曝光的默认状态（间隔 0、易化因子 2.5、复习次数 0）
    pub fn new_default(card_id: impl Into<String>) -> Self {
        Self {
            card_id: card_id.into(),
            interval_days: Fixed::ZERO,
            ease_factor: DEFAULT_EASE,
            due_at: None,
            repetitions: 0,
            last_reviewed_at: None,
            last_grade: None,
            revision: 0,
            synced_revision: 0,
            is_dirty: false,
        }
    }

    /// 校验状态不变量
    ///
    /// interval_days >= 0、ease_factor >= 1.3，且 due_at 与
    /// last_reviewed_at + interval_days 一致（二者同为空或同推导）。
    pub fn invariants_hold(&self) -> bool {
        if !self.interval_days.is_non_negative() || self.ease_factor < EASE_FLOOR {
            return false;
        }
        match (self.last_reviewed_at, self.due_at) {
            (None, None) => true,
            (Some(reviewed), Some(due)) => {
                let expected = reviewed + chrono::Duration::milliseconds(self.interval_days.days_to_millis());
                expected == due
            }
            _ => false,
        }
    }

    /// 从数据库行解析
    pub fn from_row(row: &Row) -> SqliteResult<Self> {
        Ok(Self {
            card_id: row.get("card_id")?,
            interval_days: Fixed::from_millis(row.get("interval_millidays")?),
            ease_factor: Fixed::from_millis(row.get("ease_millis")?),
            due_at: row.get::<_, Option<i64>>("due_at_ms")?.map(millis_to_datetime),
            repetitions: row.get::<_, i64>("repetitions")? as u32,
            last_reviewed_at: row
                .get::<_, Option<i64>>("last_reviewed_ms")?
                .map(millis_to_datetime),
            last_grade: row
                .get::<_, Option<i64>>("last_grade")?
                .map(Grade::from_stored),
            revision: row.get("revision")?,
            synced_revision: row.get("synced_revision")?,
            is_dirty: row.get::<_, i64>("is_dirty")? != 0,
        })
    }

    /// 插入或更新 (upsert)
    pub fn upsert(&self, conn: &Connection) -> SrsResult<()> {
        conn.execute(
            r#"
            INSERT INTO card_state (
                card_id, interval_millidays, ease_millis, due_at_ms,
                repetitions, last_reviewed_ms, last_grade,
                revision, synced_revision, is_dirty, updated_at_ms
            ) VALUES (
                ?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9, ?10, ?11
            )
            ON CONFLICT(card_id) DO UPDATE SET
                interval_millidays = excluded.interval_millidays,
                ease_millis = excluded.ease_millis,
                due_at_ms = excluded.due_at_ms,
                repetitions = excluded.repetitions,
                last_reviewed_ms = excluded.last_reviewed_ms,
                last_grade = excluded.last_grade,
                revision = excluded.revision,
                synced_revision = excluded.synced_revision,
                is_dirty = excluded.is_dirty,
                updated_at_ms = excluded.updated_at_ms
            "#,
            params![
                self.card_id,
                self.interval_days.raw(),
                self.ease_factor.raw(),
                self.due_at.map(datetime_to_millis),
                self.repetitions as i64,
                self.last_reviewed_at.map(datetime_to_millis),
                self.last_grade.map(|g| g.value() as i64),
                self.revision,
                self.synced_revision,
                self.is_dirty as i64,
                datetime_to_millis(Utc::now()),
            ],
        )?;
        Ok(())
    }
}

// ============================================================
// ReviewEvent - 复习事件
// ============================================================

/// 复习事件
///
/// 每次评分动作生成一条，创建后不可变。local_revision 为本设备
/// 变更日志的序号，跨设备顺序不保证，由时间戳 + 冲突裁决器解决。
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ReviewEvent {
    /// 卡片标识
    pub card_id: String,
    /// 评分 (0-5)
    pub grade: Grade,
    /// 客户端时间戳
    #[serde(with = "chrono::serde::ts_milliseconds")]
    pub client_timestamp: DateTime<Utc>,
    /// 产生事件的设备 ID
    pub device_id: String,
    /// 本设备变更日志序号
    pub local_revision: i64,
}

impl ReviewEvent {
    /// 创建新事件（local_revision 在追加到变更日志时由数据库分配）
    pub fn new(
        card_id: impl Into<String>,
        grade: Grade,
        client_timestamp: DateTime<Utc>,
        device_id: impl Into<String>,
    ) -> Self {
        Self {
            card_id: card_id.into(),
            grade,
            client_timestamp,
            device_id: device_id.into(),
            local_revision: 0,
        }
    }

    /// 去重键：同一 (device_id, local_revision) 的事件只生效一次
    pub fn dedup_key(&self) -> (String, i64) {
        (self.device_id.clone(), self.local_revision)
    }

    /// 从数据库行解析
    pub fn from_row(row: &Row) -> SqliteResult<Self> {
        Ok(Self {
            card_id: row.get("card_id")?,
            grade: Grade::from_stored(row.get::<_, i64>("grade")?),
            client_timestamp: millis_to_datetime(row.get("client_ts_ms")?),
            device_id: row.get("device_id")?,
            local_revision: row.get("local_revision")?,
        })
    }
}

// ============================================================
// 辅助函数
// ============================================================

/// Unix 毫秒转 DateTime
///
/// 超出 chrono 可表示范围的值按符号截断到边界，
/// 保证解码结果确定（任意两台设备对同一输入得到同一时间）。
pub fn millis_to_datetime(ms: i64) -> DateTime<Utc> {
    DateTime::from_timestamp_millis(ms).unwrap_or(if ms < 0 {
        DateTime::<Utc>::MIN_UTC
    } else {
        DateTime::<Utc>::MAX_UTC
    })
}

/// DateTime 转 Unix 毫秒
pub fn datetime_to_millis(dt: DateTime<Utc>) -> i64 {
    dt.timestamp_millis()
}
