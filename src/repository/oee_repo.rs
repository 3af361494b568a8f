// ==========================================
// 车间有限产能排产核心 - OEE 快照仓储
// ==========================================
// 职责: 管理 oee_snapshot 表 (历史快照, 只增不改)
// 红线: Repository 不做业务逻辑,只做数据映射
// ==========================================

use crate::db::open_sqlite_connection;
use crate::domain::oee::{OeeCounters, OeeSnapshot};
use crate::repository::error::{RepositoryError, RepositoryResult};
use chrono::NaiveDateTime;
use rusqlite::{params, Connection, Result as SqliteResult, Row};
use std::sync::{Arc, Mutex};

const TS_FORMAT: &str = "%Y-%m-%d %H:%M:%S";

pub struct OeeSnapshotRepository {
    conn: Arc<Mutex<Connection>>,
}

impl OeeSnapshotRepository {
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
            CREATE TABLE IF NOT EXISTS oee_snapshot (
              snapshot_id TEXT PRIMARY KEY,
              work_center_id TEXT NOT NULL,
              window_start TEXT NOT NULL,
              window_end TEXT NOT NULL,
              availability REAL,
              performance REAL,
              performance_raw REAL,
              quality REAL,
              oee REAL,
              counters_json TEXT NOT NULL,
              computed_at TEXT NOT NULL
            );

            CREATE INDEX IF NOT EXISTS idx_oee_snapshot_work_center
              ON oee_snapshot(work_center_id, computed_at);
            "#,
        )?;
        Ok(())
    }

    const SELECT_COLUMNS: &'static str = r#"
        snapshot_id, work_center_id, window_start, window_end,
        availability, performance, performance_raw, quality, oee,
        counters_json, computed_at
    "#;

    fn map_row(row: &Row<'_>) -> SqliteResult<RawOeeRow> {
        Ok(RawOeeRow {
            snapshot_id: row.get(0)?,
            work_center_id: row.get(1)?,
            window_start: row.get(2)?,
            window_end: row.get(3)?,
            availability: row.get(4)?,
            performance: row.get(5)?,
            performance_raw: row.get(6)?,
            quality: row.get(7)?,
            oee: row.get(8)?,
            counters_json: row.get(9)?,
            computed_at: row.get(10)?,
        })
    }

    /// 插入快照（历史只增不改）
    pub fn insert(&self, snapshot: &OeeSnapshot) -> RepositoryResult<String> {
        let counters_json = serde_json::to_string(&snapshot.counters)
            .map_err(|e| RepositoryError::InternalError(format!("计数器序列化失败: {}", e)))?;

        let conn = self.get_conn()?;
        conn.execute(
            r#"
            INSERT INTO oee_snapshot (
                snapshot_id, work_center_id, window_start, window_end,
                availability, performance, performance_raw, quality, oee,
                counters_json, computed_at
            ) VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9, ?10, ?11)
            "#,
            params![
                snapshot.snapshot_id,
                snapshot.work_center_id,
                snapshot.window_start.format(TS_FORMAT).to_string(),
                snapshot.window_end.format(TS_FORMAT).to_string(),
                snapshot.availability,
                snapshot.performance,
                snapshot.performance_raw,
                snapshot.quality,
                snapshot.oee,
                counters_json,
                snapshot.computed_at.format(TS_FORMAT).to_string(),
            ],
        )?;
        Ok(snapshot.snapshot_id.clone())
    }

    /// 指定工作中心的最新快照
    pub fn find_latest(&self, work_center_id: &str) -> RepositoryResult<Option<OeeSnapshot>> {
        let conn = self.get_conn()?;
        let sql = format!(
            r#"
            SELECT {} FROM oee_snapshot
            WHERE work_center_id = ?1
            ORDER BY computed_at DESC, snapshot_id DESC
            LIMIT 1
            "#,
            Self::SELECT_COLUMNS
        );
        let mut stmt = conn.prepare(&sql)?;

        let result = stmt.query_row(params![work_center_id], Self::map_row);
        match result {
            Ok(raw) => Ok(Some(raw.into_domain()?)),
            Err(rusqlite::Error::QueryReturnedNoRows) => Ok(None),
            Err(e) => Err(e.into()),
        }
    }

    /// 按计算时间窗口查询快照历史
    pub fn list_computed_between(
        &self,
        work_center_id: &str,
        window_start: NaiveDateTime,
        window_end: NaiveDateTime,
    ) -> RepositoryResult<Vec<OeeSnapshot>> {
        let conn = self.get_conn()?;
        let sql = format!(
            r#"
            SELECT {} FROM oee_snapshot
            WHERE work_center_id = ?1 AND computed_at >= ?2 AND computed_at <= ?3
            ORDER BY computed_at ASC, snapshot_id ASC
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
}

// ==========================================
// 行映射辅助
// ==========================================
struct RawOeeRow {
    snapshot_id: String,
    work_center_id: String,
    window_start: String,
    window_end: String,
    availability: Option<f64>,
    performance: Option<f64>,
    performance_raw: Option<f64>,
    quality: Option<f64>,
    oee: Option<f64>,
    counters_json: String,
    computed_at: String,
}

impl RawOeeRow {
    fn into_domain(self) -> RepositoryResult<OeeSnapshot> {
        let counters: OeeCounters = serde_json::from_str(&self.counters_json).map_err(|e| {
            RepositoryError::FieldValueError {
                field: "counters_json".to_string(),
                message: format!("计数器解析失败: {}", e),
            }
        })?;
        Ok(OeeSnapshot {
            snapshot_id: self.snapshot_id,
            work_center_id: self.work_center_id,
            window_start: parse_ts("window_start", &self.window_start)?,
            window_end: parse_ts("window_end", &self.window_end)?,
            availability: self.availability,
            performance: self.performance,
            performance_raw: self.performance_raw,
            quality: self.quality,
            oee: self.oee,
            counters,
            computed_at: parse_ts("computed_at", &self.computed_at)?,
        })
    }
}

fn parse_ts(field: &str, value: &str) -> RepositoryResult<NaiveDateTime> {
    NaiveDateTime::parse_from_str(value, TS_FORMAT).map_err(|e| RepositoryError::FieldValueError {
        field: field.to_string(),
        message: format!("时间解析失败 ({}): {}", value, e),
    })
}
