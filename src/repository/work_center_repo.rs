// ==========================================
// 车间有限产能排产核心 - 工作中心仓储
// ==========================================
// 职责: 管理 work_center 表
// 红线: Repository 不做业务逻辑,只做数据映射
// ==========================================

use crate::db::open_sqlite_connection;
use crate::domain::types::{WorkCenterKind, WorkCenterStatus};
use crate::domain::WorkCenter;
use crate::repository::error::{RepositoryError, RepositoryResult};
use chrono::NaiveDateTime;
use rusqlite::{params, Connection, Result as SqliteResult, Row};
use std::sync::{Arc, Mutex};

const TS_FORMAT: &str = "%Y-%m-%d %H:%M:%S";

pub struct WorkCenterRepository {
    conn: Arc<Mutex<Connection>>,
}

impl WorkCenterRepository {
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
            CREATE TABLE IF NOT EXISTS work_center (
              work_center_id TEXT PRIMARY KEY,
              name TEXT NOT NULL,
              kind TEXT NOT NULL,
              status TEXT NOT NULL,
              capacity_minutes REAL NOT NULL,
              load_minutes REAL NOT NULL DEFAULT 0,
              efficiency REAL NOT NULL DEFAULT 1.0,
              availability REAL NOT NULL DEFAULT 1.0,
              health_score REAL NOT NULL DEFAULT 100.0,
              created_at TEXT NOT NULL DEFAULT (datetime('now')),
              updated_at TEXT NOT NULL DEFAULT (datetime('now'))
            );

            CREATE INDEX IF NOT EXISTS idx_work_center_status
              ON work_center(status);
            "#,
        )?;
        Ok(())
    }

    fn map_row(row: &Row<'_>) -> SqliteResult<RawWorkCenterRow> {
        Ok(RawWorkCenterRow {
            work_center_id: row.get(0)?,
            name: row.get(1)?,
            kind: row.get(2)?,
            status: row.get(3)?,
            capacity_minutes: row.get(4)?,
            load_minutes: row.get(5)?,
            efficiency: row.get(6)?,
            availability: row.get(7)?,
            health_score: row.get(8)?,
            created_at: row.get(9)?,
            updated_at: row.get(10)?,
        })
    }

    const SELECT_COLUMNS: &'static str = r#"
        work_center_id, name, kind, status,
        capacity_minutes, load_minutes,
        efficiency, availability, health_score,
        created_at, updated_at
    "#;

    /// 创建或更新工作中心（Upsert 操作）
    pub fn upsert(&self, wc: &WorkCenter) -> RepositoryResult<()> {
        let conn = self.get_conn()?;
        conn.execute(
            r#"
            INSERT INTO work_center (
                work_center_id, name, kind, status,
                capacity_minutes, load_minutes,
                efficiency, availability, health_score,
                created_at, updated_at
            ) VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9, ?10, ?11)
            ON CONFLICT(work_center_id) DO UPDATE SET
                name = excluded.name,
                kind = excluded.kind,
                status = excluded.status,
                capacity_minutes = excluded.capacity_minutes,
                load_minutes = excluded.load_minutes,
                efficiency = excluded.efficiency,
                availability = excluded.availability,
                health_score = excluded.health_score,
                updated_at = excluded.updated_at
            "#,
            params![
                wc.work_center_id,
                wc.name,
                wc.kind.to_db_str(),
                wc.status.to_db_str(),
                wc.capacity_minutes,
                wc.load_minutes,
                wc.efficiency,
                wc.availability,
                wc.health_score,
                wc.created_at.format(TS_FORMAT).to_string(),
                wc.updated_at.format(TS_FORMAT).to_string(),
            ],
        )?;
        Ok(())
    }

    /// 按代码查找工作中心
    pub fn find_by_id(&self, work_center_id: &str) -> RepositoryResult<Option<WorkCenter>> {
        let conn = self.get_conn()?;
        let sql = format!(
            "SELECT {} FROM work_center WHERE work_center_id = ?1",
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

    /// 列出所有工作中心（按代码排序）
    pub fn list_all(&self) -> RepositoryResult<Vec<WorkCenter>> {
        let conn = self.get_conn()?;
        let sql = format!(
            "SELECT {} FROM work_center ORDER BY work_center_id ASC",
            Self::SELECT_COLUMNS
        );
        let mut stmt = conn.prepare(&sql)?;

        let rows = stmt
            .query_map([], Self::map_row)?
            .collect::<SqliteResult<Vec<_>>>()?;

        rows.into_iter().map(|raw| raw.into_domain()).collect()
    }

    /// 原子累加负载（下限 0），返回更新后的负载
    ///
    /// # 返回
    /// - `Ok(load)`: 更新后的负载分钟数
    /// - `Err(NotFound)`: 工作中心不存在
    pub fn add_load_delta(&self, work_center_id: &str, delta: f64) -> RepositoryResult<f64> {
        let conn = self.get_conn()?;
        let affected = conn.execute(
            r#"
            UPDATE work_center
            SET load_minutes = MAX(0.0, load_minutes + ?2),
                updated_at = ?3
            WHERE work_center_id = ?1
            "#,
            params![
                work_center_id,
                delta,
                chrono::Utc::now().naive_utc().format(TS_FORMAT).to_string()
            ],
        )?;
        if affected == 0 {
            return Err(RepositoryError::NotFound {
                entity: "WorkCenter".to_string(),
                id: work_center_id.to_string(),
            });
        }

        let load: f64 = conn.query_row(
            "SELECT load_minutes FROM work_center WHERE work_center_id = ?1",
            params![work_center_id],
            |row| row.get(0),
        )?;
        Ok(load)
    }

    /// 更新额定产能（管理操作）
    pub fn update_capacity(&self, work_center_id: &str, capacity_minutes: f64) -> RepositoryResult<()> {
        self.update_column(work_center_id, "capacity_minutes", capacity_minutes)
    }

    /// 更新健康度
    pub fn update_health(&self, work_center_id: &str, health_score: f64) -> RepositoryResult<()> {
        self.update_column(work_center_id, "health_score", health_score)
    }

    /// 更新滚动指标（效率/可用率）
    pub fn update_rollups(
        &self,
        work_center_id: &str,
        efficiency: f64,
        availability: f64,
    ) -> RepositoryResult<()> {
        let conn = self.get_conn()?;
        let affected = conn.execute(
            r#"
            UPDATE work_center
            SET efficiency = ?2, availability = ?3, updated_at = ?4
            WHERE work_center_id = ?1
            "#,
            params![
                work_center_id,
                efficiency,
                availability,
                chrono::Utc::now().naive_utc().format(TS_FORMAT).to_string()
            ],
        )?;
        if affected == 0 {
            return Err(RepositoryError::NotFound {
                entity: "WorkCenter".to_string(),
                id: work_center_id.to_string(),
            });
        }
        Ok(())
    }

    /// 更新状态
    pub fn update_status(
        &self,
        work_center_id: &str,
        status: WorkCenterStatus,
    ) -> RepositoryResult<()> {
        let conn = self.get_conn()?;
        let affected = conn.execute(
            r#"
            UPDATE work_center
            SET status = ?2, updated_at = ?3
            WHERE work_center_id = ?1
            "#,
            params![
                work_center_id,
                status.to_db_str(),
                chrono::Utc::now().naive_utc().format(TS_FORMAT).to_string()
            ],
        )?;
        if affected == 0 {
            return Err(RepositoryError::NotFound {
                entity: "WorkCenter".to_string(),
                id: work_center_id.to_string(),
            });
        }
        Ok(())
    }

    fn update_column(&self, work_center_id: &str, column: &str, value: f64) -> RepositoryResult<()> {
        let conn = self.get_conn()?;
        let sql = format!(
            "UPDATE work_center SET {} = ?2, updated_at = ?3 WHERE work_center_id = ?1",
            column
        );
        let affected = conn.execute(
            &sql,
            params![
                work_center_id,
                value,
                chrono::Utc::now().naive_utc().format(TS_FORMAT).to_string()
            ],
        )?;
        if affected == 0 {
            return Err(RepositoryError::NotFound {
                entity: "WorkCenter".to_string(),
                id: work_center_id.to_string(),
            });
        }
        Ok(())
    }
}

// ==========================================
// 行映射辅助
// ==========================================
struct RawWorkCenterRow {
    work_center_id: String,
    name: String,
    kind: String,
    status: String,
    capacity_minutes: f64,
    load_minutes: f64,
    efficiency: f64,
    availability: f64,
    health_score: f64,
    created_at: String,
    updated_at: String,
}

impl RawWorkCenterRow {
    fn into_domain(self) -> RepositoryResult<WorkCenter> {
        let status = WorkCenterStatus::from_str(&self.status).ok_or_else(|| {
            RepositoryError::FieldValueError {
                field: "status".to_string(),
                message: format!("无法解析工作中心状态: {}", self.status),
            }
        })?;
        Ok(WorkCenter {
            work_center_id: self.work_center_id,
            name: self.name,
            kind: WorkCenterKind::from_str(&self.kind),
            status,
            capacity_minutes: self.capacity_minutes,
            load_minutes: self.load_minutes,
            efficiency: self.efficiency,
            availability: self.availability,
            health_score: self.health_score,
            created_at: parse_ts("created_at", &self.created_at)?,
            updated_at: parse_ts("updated_at", &self.updated_at)?,
        })
    }
}

fn parse_ts(field: &str, value: &str) -> RepositoryResult<NaiveDateTime> {
    NaiveDateTime::parse_from_str(value, TS_FORMAT).map_err(|e| RepositoryError::FieldValueError {
        field: field.to_string(),
        message: format!("时间解析失败 ({}): {}", value, e),
    })
}
