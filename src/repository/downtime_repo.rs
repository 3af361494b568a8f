// ==========================================
// 车间有限产能排产核心 - 停机区间仓储
// ==========================================
// 职责: 管理 downtime_interval 表
// 说明: 可用率的时间依据; 进行中区间 ended_at 为 NULL
// 红线: Repository 不做业务逻辑,只做数据映射
// ==========================================

use crate::db::open_sqlite_connection;
use crate::domain::types::{DowntimeCategory, DowntimeKind};
use crate::domain::DowntimeInterval;
use crate::repository::error::{RepositoryError, RepositoryResult};
use chrono::NaiveDateTime;
use rusqlite::{params, Connection, Result as SqliteResult, Row};
use std::sync::{Arc, Mutex};

const TS_FORMAT: &str = "%Y-%m-%d %H:%M:%S";

pub struct DowntimeRepository {
    conn: Arc<Mutex<Connection>>,
}

impl DowntimeRepository {
    pub fn new(db_path: &str) -> RepositoryResult<Self> {
        let conn = open_sqlite_connection(db_path)
            .map_err(|e| RepositoryError::DatabaseConnectionError(e.to_string()))?;
        let repo = Self {
            conn: Arc::new(Mutex::new(conn)),
        };
        repo.ensure_table()?;
        Ok(repo)
    }

    pub fn from_connection(conn: Arc<Mutex<Connection>>) -> RepositoryResult<Self> {
        let repo = Self { conn };
        repo.ensure_table()?;
        Ok(repo)
    }

    fn get_conn(&self) -> RepositoryResult<std::sync::MutexGuard<Connection>> {
        self.conn
            .lock()
            .map_err(|e| RepositoryError::LockError(e.to_string()))
    }

    /// 确保表存在（如果不存在则创建）
    fn ensure_table(&self) -> RepositoryResult<()> {
        let conn = self.get_conn()?;
        conn.execute_batch(
            r#"
            CREATE TABLE IF NOT EXISTS downtime_interval (
              downtime_id TEXT PRIMARY KEY,
              work_center_id TEXT NOT NULL,
              kind TEXT NOT NULL,
              category TEXT NOT NULL,
              started_at TEXT NOT NULL,
              ended_at TEXT,
              reason TEXT NOT NULL,
              constraint_id TEXT
            );

            CREATE INDEX IF NOT EXISTS idx_downtime_work_center
              ON downtime_interval(work_center_id, started_at);
            CREATE INDEX IF NOT EXISTS idx_downtime_constraint
              ON downtime_interval(constraint_id);
            "#,
        )?;
        Ok(())
    }

    const SELECT_COLUMNS: &'static str = r#"
        downtime_id, work_center_id, kind, category,
        started_at, ended_at, reason, constraint_id
    "#;

    fn map_row(row: &Row<'_>) -> SqliteResult<RawDowntimeRow> {
        Ok(RawDowntimeRow {
            downtime_id: row.get(0)?,
            work_center_id: row.get(1)?,
            kind: row.get(2)?,
            category: row.get(3)?,
            started_at: row.get(4)?,
            ended_at: row.get(5)?,
            reason: row.get(6)?,
            constraint_id: row.get(7)?,
        })
    }

    /// 插入停机区间
    pub fn insert(&self, interval: &DowntimeInterval) -> RepositoryResult<String> {
        let conn = self.get_conn()?;
        conn.execute(
            r#"
            INSERT INTO downtime_interval (
                downtime_id, work_center_id, kind, category,
                started_at, ended_at, reason, constraint_id
            ) VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8)
            "#,
            params![
                interval.downtime_id,
                interval.work_center_id,
                interval.kind.to_db_str(),
                interval.category.to_db_str(),
                interval.started_at.format(TS_FORMAT).to_string(),
                interval.ended_at.map(|t| t.format(TS_FORMAT).to_string()),
                interval.reason,
                interval.constraint_id,
            ],
        )?;
        Ok(interval.downtime_id.clone())
    }

    /// 闭合停机区间
    pub fn close(&self, downtime_id: &str, ended_at: NaiveDateTime) -> RepositoryResult<()> {
        let conn = self.get_conn()?;
        let affected = conn.execute(
            "UPDATE downtime_interval SET ended_at = ?2 WHERE downtime_id = ?1 AND ended_at IS NULL",
            params![downtime_id, ended_at.format(TS_FORMAT).to_string()],
        )?;
        if affected == 0 {
            return Err(RepositoryError::NotFound {
                entity: "DowntimeInterval".to_string(),
                id: downtime_id.to_string(),
            });
        }
        Ok(())
    }

    /// 闭合由指定约束开启的进行中区间
    ///
    /// # 返回
    /// 闭合的区间数量（约束未开启过停机时为 0, 不报错）
    pub fn close_by_constraint(
        &self,
        constraint_id: &str,
        ended_at: NaiveDateTime,
    ) -> RepositoryResult<usize> {
        let conn = self.get_conn()?;
        let affected = conn.execute(
            "UPDATE downtime_interval SET ended_at = ?2 WHERE constraint_id = ?1 AND ended_at IS NULL",
            params![constraint_id, ended_at.format(TS_FORMAT).to_string()],
        )?;
        Ok(affected)
    }

    /// 指定工作中心与统计窗口有重叠的区间
    ///
    /// 进行中的区间视为持续到窗口结束
    pub fn list_overlapping(
        &self,
        work_center_id: &str,
        window_start: NaiveDateTime,
        window_end: NaiveDateTime,
    ) -> RepositoryResult<Vec<DowntimeInterval>> {
        let conn = self.get_conn()?;
        let sql = format!(
            r#"
            SELECT {} FROM downtime_interval
            WHERE work_center_id = ?1
              AND started_at <= ?3
              AND (ended_at IS NULL OR ended_at >= ?2)
            ORDER BY started_at ASC, downtime_id ASC
            "#,
            Self::SELECT_COLUMNS
        );
        let mut stmt = conn.prepare(&sql)?;
        let rows = stmt
            .query_map(
                params![
                    work_center_id,
                    window_start.format(TS_FORMAT).to_string(),
                    window_end.format(TS_FORMAT).to_string(),
                ],
                Self::map_row,
            )?
            .collect::<SqliteResult<Vec<_>>>()?;

        rows.into_iter().map(|raw| raw.into_domain()).collect()
    }

    /// 指定工作中心当前进行中的区间
    pub fn list_open(&self, work_center_id: &str) -> RepositoryResult<Vec<DowntimeInterval>> {
        let conn = self.get_conn()?;
        let sql = format!(
            r#"
            SELECT {} FROM downtime_interval
            WHERE work_center_id = ?1 AND ended_at IS NULL
            ORDER BY started_at ASC, downtime_id ASC
            "#,
            Self::SELECT_COLUMNS
        );
        let mut stmt = conn.prepare(&sql)?;
        let rows = stmt
            .query_map(params![work_center_id], Self::map_row)?
            .collect::<SqliteResult<Vec<_>>>()?;

        rows.into_iter().map(|raw| raw.into_domain()).collect()
    }
}

// ==========================================
// 行映射辅助
// ==========================================
struct RawDowntimeRow {
    downtime_id: String,
    work_center_id: String,
    kind: String,
    category: String,
    started_at: String,
    ended_at: Option<String>,
    reason: String,
    constraint_id: Option<String>,
}

impl RawDowntimeRow {
    fn into_domain(self) -> RepositoryResult<DowntimeInterval> {
        let kind = DowntimeKind::from_str(&self.kind).ok_or_else(|| {
            RepositoryError::FieldValueError {
                field: "kind".to_string(),
                message: format!("无法解析停机类型: {}", self.kind),
            }
        })?;
        Ok(DowntimeInterval {
            downtime_id: self.downtime_id,
            work_center_id: self.work_center_id,
            kind,
            category: DowntimeCategory::from_str(&self.category),
            started_at: parse_ts("started_at", &self.started_at)?,
            ended_at: match self.ended_at {
                Some(v) => Some(parse_ts("ended_at", &v)?),
                None => None,
            },
            reason: self.reason,
            constraint_id: self.constraint_id,
        })
    }
}

fn parse_ts(field: &str, value: &str) -> RepositoryResult<NaiveDateTime> {
    NaiveDateTime::parse_from_str(value, TS_FORMAT).map_err(|e| RepositoryError::FieldValueError {
        field: field.to_string(),
        message: format!("时间解析失败 ({}): {}", value, e),
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    fn setup_test_repo() -> DowntimeRepository {
        DowntimeRepository::new(":memory:").expect("Failed to create test repository")
    }

    fn base_time() -> NaiveDateTime {
        NaiveDateTime::parse_from_str("2026-03-01 08:00:00", TS_FORMAT).unwrap()
    }

    #[test]
    fn test_insert_open_and_close() {
        let repo = setup_test_repo();
        let interval = DowntimeInterval::new(
            "CNC-02".to_string(),
            DowntimeKind::Unplanned,
            DowntimeCategory::Breakdown,
            base_time(),
            "主轴温度超限".to_string(),
        );
        repo.insert(&interval).expect("Failed to insert");

        let open = repo.list_open("CNC-02").expect("Failed to list");
        assert_eq!(open.len(), 1);
        assert!(open[0].is_open());

        repo.close(&interval.downtime_id, base_time() + chrono::Duration::minutes(45))
            .expect("Failed to close");
        let open = repo.list_open("CNC-02").expect("Failed to list");
        assert!(open.is_empty());
    }

    #[test]
    fn test_close_by_constraint() {
        let repo = setup_test_repo();
        let interval = DowntimeInterval::new(
            "CNC-02".to_string(),
            DowntimeKind::Unplanned,
            DowntimeCategory::Breakdown,
            base_time(),
            "振动超标".to_string(),
        )
        .with_constraint("c-001".to_string());
        repo.insert(&interval).expect("Failed to insert");

        let closed = repo
            .close_by_constraint("c-001", base_time() + chrono::Duration::minutes(30))
            .expect("Failed to close");
        assert_eq!(closed, 1);

        // 再次闭合为空操作
        let closed = repo
            .close_by_constraint("c-001", base_time() + chrono::Duration::minutes(60))
            .expect("Failed to close");
        assert_eq!(closed, 0);
    }

    #[test]
    fn test_list_overlapping_includes_open_interval() {
        let repo = setup_test_repo();
        // 已闭合区间: 08:00-09:00
        let closed = DowntimeInterval::new(
            "CNC-01".to_string(),
            DowntimeKind::Planned,
            DowntimeCategory::Setup,
            base_time(),
            "计划保养".to_string(),
        )
        .with_end(base_time() + chrono::Duration::minutes(60));
        repo.insert(&closed).expect("Failed to insert");

        // 进行中区间: 10:00 开始
        let open = DowntimeInterval::new(
            "CNC-01".to_string(),
            DowntimeKind::Unplanned,
            DowntimeCategory::Breakdown,
            base_time() + chrono::Duration::minutes(120),
            "断刀".to_string(),
        );
        repo.insert(&open).expect("Failed to insert");

        let overlapping = repo
            .list_overlapping(
                "CNC-01",
                base_time(),
                base_time() + chrono::Duration::minutes(480),
            )
            .expect("Failed to list");
        assert_eq!(overlapping.len(), 2);

        // 窗口在两个区间之间 (09:10-09:50): 无重叠
        let between = repo
            .list_overlapping(
                "CNC-01",
                base_time() + chrono::Duration::minutes(70),
                base_time() + chrono::Duration::minutes(110),
            )
            .expect("Failed to list");
        assert!(between.is_empty());
    }
}
