// ==========================================
// 车间有限产能排产核心 - 约束仓储
// ==========================================
// 职责: 管理 constraint_record / constraint_job 表
// 说明: constraint 为 SQL 保留字, 表名用 constraint_record
// 红线: 约束只置为失效, 不物理删除
// ==========================================

use crate::db::open_sqlite_connection;
use crate::domain::types::{ConstraintSeverity, ConstraintType};
use crate::domain::Constraint;
use crate::repository::error::{RepositoryError, RepositoryResult};
use chrono::NaiveDateTime;
use rusqlite::{params, Connection, Result as SqliteResult, Row};
use std::sync::{Arc, Mutex};

const TS_FORMAT: &str = "%Y-%m-%d %H:%M:%S";

// ==========================================
// ConstraintFilter - 列表查询过滤条件
// ==========================================
#[derive(Debug, Clone, Default)]
pub struct ConstraintFilter {
    pub constraint_type: Option<ConstraintType>,
    pub severity: Option<ConstraintSeverity>,
    pub active: Option<bool>,
    pub work_center_id: Option<String>,
}

pub struct ConstraintRepository {
    conn: Arc<Mutex<Connection>>,
}

impl ConstraintRepository {
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
            CREATE TABLE IF NOT EXISTS constraint_record (
              constraint_id TEXT PRIMARY KEY,
              constraint_type TEXT NOT NULL,
              severity TEXT NOT NULL,
              work_center_id TEXT,
              description TEXT NOT NULL,
              raised_by TEXT NOT NULL,
              active INTEGER NOT NULL DEFAULT 1,
              resolution_note TEXT,
              resolved_by TEXT,
              raised_at TEXT NOT NULL,
              resolved_at TEXT
            );

            CREATE TABLE IF NOT EXISTS constraint_job (
              constraint_id TEXT NOT NULL,
              job_id TEXT NOT NULL,
              PRIMARY KEY (constraint_id, job_id)
            );

            CREATE INDEX IF NOT EXISTS idx_constraint_active
              ON constraint_record(active);
            CREATE INDEX IF NOT EXISTS idx_constraint_work_center
              ON constraint_record(work_center_id);
            CREATE INDEX IF NOT EXISTS idx_constraint_job_job
              ON constraint_job(job_id);
            "#,
        )?;
        Ok(())
    }

    const SELECT_COLUMNS: &'static str = r#"
        constraint_id, constraint_type, severity, work_center_id,
        description, raised_by, active,
        resolution_note, resolved_by, raised_at, resolved_at
    "#;

    fn map_row(row: &Row<'_>) -> SqliteResult<RawConstraintRow> {
        Ok(RawConstraintRow {
            constraint_id: row.get(0)?,
            constraint_type: row.get(1)?,
            severity: row.get(2)?,
            work_center_id: row.get(3)?,
            description: row.get(4)?,
            raised_by: row.get(5)?,
            active: row.get::<_, i64>(6)? != 0,
            resolution_note: row.get(7)?,
            resolved_by: row.get(8)?,
            raised_at: row.get(9)?,
            resolved_at: row.get(10)?,
        })
    }

    /// 插入约束及其作业关联（事务）
    pub fn insert(&self, constraint: &Constraint) -> RepositoryResult<String> {
        let mut conn = self.get_conn()?;
        let tx = conn
            .transaction()
            .map_err(|e| RepositoryError::DatabaseTransactionError(e.to_string()))?;

        tx.execute(
            r#"
            INSERT INTO constraint_record (
                constraint_id, constraint_type, severity, work_center_id,
                description, raised_by, active,
                resolution_note, resolved_by, raised_at, resolved_at
            ) VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9, ?10, ?11)
            "#,
            params![
                constraint.constraint_id,
                constraint.constraint_type.to_db_str(),
                constraint.severity.to_db_str(),
                constraint.work_center_id,
                constraint.description,
                constraint.raised_by,
                constraint.active as i64,
                constraint.resolution_note,
                constraint.resolved_by,
                constraint.raised_at.format(TS_FORMAT).to_string(),
                constraint.resolved_at.map(|t| t.format(TS_FORMAT).to_string()),
            ],
        )?;

        for job_id in &constraint.affected_job_ids {
            tx.execute(
                "INSERT OR IGNORE INTO constraint_job (constraint_id, job_id) VALUES (?1, ?2)",
                params![constraint.constraint_id, job_id],
            )?;
        }

        tx.commit()
            .map_err(|e| RepositoryError::DatabaseTransactionError(e.to_string()))?;
        Ok(constraint.constraint_id.clone())
    }

    /// 按ID查找约束（含作业关联）
    pub fn find_by_id(&self, constraint_id: &str) -> RepositoryResult<Option<Constraint>> {
        let conn = self.get_conn()?;
        let sql = format!(
            "SELECT {} FROM constraint_record WHERE constraint_id = ?1",
            Self::SELECT_COLUMNS
        );
        let mut stmt = conn.prepare(&sql)?;

        let result = stmt.query_row(params![constraint_id], Self::map_row);
        let raw = match result {
            Ok(raw) => raw,
            Err(rusqlite::Error::QueryReturnedNoRows) => return Ok(None),
            Err(e) => return Err(e.into()),
        };

        let job_ids = Self::load_job_ids(&conn, constraint_id)?;
        Ok(Some(raw.into_domain(job_ids)?))
    }

    /// 列出所有生效约束
    pub fn list_active(&self) -> RepositoryResult<Vec<Constraint>> {
        self.list(&ConstraintFilter {
            active: Some(true),
            ..Default::default()
        })
    }

    /// 列出指定作业的生效约束
    pub fn list_active_for_job(&self, job_id: &str) -> RepositoryResult<Vec<Constraint>> {
        let conn = self.get_conn()?;
        let sql = format!(
            r#"
            SELECT {} FROM constraint_record c
            WHERE c.active = 1
              AND EXISTS (
                SELECT 1 FROM constraint_job cj
                WHERE cj.constraint_id = c.constraint_id AND cj.job_id = ?1
              )
            ORDER BY c.raised_at ASC
            "#,
            Self::SELECT_COLUMNS
        );
        let mut stmt = conn.prepare(&sql)?;
        let rows = stmt
            .query_map(params![job_id], Self::map_row)?
            .collect::<SqliteResult<Vec<_>>>()?;

        let mut result = Vec::with_capacity(rows.len());
        for raw in rows {
            let job_ids = Self::load_job_ids(&conn, &raw.constraint_id)?;
            result.push(raw.into_domain(job_ids)?);
        }
        Ok(result)
    }

    /// 指定作业是否存在生效的 CRITICAL 约束
    pub fn has_active_critical(&self, job_id: &str) -> RepositoryResult<bool> {
        let conn = self.get_conn()?;
        let exists: bool = conn
            .query_row(
                r#"
                SELECT EXISTS (
                  SELECT 1
                  FROM constraint_record c
                  JOIN constraint_job cj ON cj.constraint_id = c.constraint_id
                  WHERE cj.job_id = ?1 AND c.active = 1 AND c.severity = 'CRITICAL'
                )
                "#,
                params![job_id],
                |row| row.get::<_, i64>(0),
            )
            .map(|v| v != 0)?;
        Ok(exists)
    }

    /// 条件列表查询
    pub fn list(&self, filter: &ConstraintFilter) -> RepositoryResult<Vec<Constraint>> {
        let conn = self.get_conn()?;

        let mut sql = format!(
            "SELECT {} FROM constraint_record WHERE 1=1",
            Self::SELECT_COLUMNS
        );
        let mut params_vec: Vec<Box<dyn rusqlite::ToSql>> = Vec::new();

        if let Some(ct) = filter.constraint_type {
            params_vec.push(Box::new(ct.to_db_str().to_string()));
            sql.push_str(&format!(" AND constraint_type = ?{}", params_vec.len()));
        }
        if let Some(sev) = filter.severity {
            params_vec.push(Box::new(sev.to_db_str().to_string()));
            sql.push_str(&format!(" AND severity = ?{}", params_vec.len()));
        }
        if let Some(active) = filter.active {
            params_vec.push(Box::new(active as i64));
            sql.push_str(&format!(" AND active = ?{}", params_vec.len()));
        }
        if let Some(wc) = &filter.work_center_id {
            params_vec.push(Box::new(wc.clone()));
            sql.push_str(&format!(" AND work_center_id = ?{}", params_vec.len()));
        }
        sql.push_str(" ORDER BY raised_at ASC, constraint_id ASC");

        let mut stmt = conn.prepare(&sql)?;
        let param_refs: Vec<&dyn rusqlite::ToSql> =
            params_vec.iter().map(|p| p.as_ref()).collect();
        let rows = stmt
            .query_map(param_refs.as_slice(), Self::map_row)?
            .collect::<SqliteResult<Vec<_>>>()?;

        let mut result = Vec::with_capacity(rows.len());
        for raw in rows {
            let job_ids = Self::load_job_ids(&conn, &raw.constraint_id)?;
            result.push(raw.into_domain(job_ids)?);
        }
        Ok(result)
    }

    /// 解除约束（置失效并记录处理信息）
    ///
    /// # 返回
    /// - `Ok(Constraint)`: 解除后的约束
    /// - `Err(BusinessRuleViolation)`: 约束已处于失效状态
    /// - `Err(NotFound)`: 约束不存在
    pub fn resolve(
        &self,
        constraint_id: &str,
        note: Option<&str>,
        resolved_by: &str,
        resolved_at: NaiveDateTime,
    ) -> RepositoryResult<Constraint> {
        {
            let conn = self.get_conn()?;
            let affected = conn.execute(
                r#"
                UPDATE constraint_record
                SET active = 0,
                    resolution_note = ?2,
                    resolved_by = ?3,
                    resolved_at = ?4
                WHERE constraint_id = ?1 AND active = 1
                "#,
                params![
                    constraint_id,
                    note,
                    resolved_by,
                    resolved_at.format(TS_FORMAT).to_string(),
                ],
            )?;

            if affected == 0 {
                let exists: bool = conn
                    .query_row(
                        "SELECT EXISTS (SELECT 1 FROM constraint_record WHERE constraint_id = ?1)",
                        params![constraint_id],
                        |row| row.get::<_, i64>(0),
                    )
                    .map(|v| v != 0)?;
                return if exists {
                    Err(RepositoryError::BusinessRuleViolation(format!(
                        "约束已解除: {}",
                        constraint_id
                    )))
                } else {
                    Err(RepositoryError::NotFound {
                        entity: "Constraint".to_string(),
                        id: constraint_id.to_string(),
                    })
                };
            }
        }

        self.find_by_id(constraint_id)?
            .ok_or_else(|| RepositoryError::NotFound {
                entity: "Constraint".to_string(),
                id: constraint_id.to_string(),
            })
    }

    fn load_job_ids(conn: &Connection, constraint_id: &str) -> RepositoryResult<Vec<String>> {
        let mut stmt = conn.prepare(
            "SELECT job_id FROM constraint_job WHERE constraint_id = ?1 ORDER BY job_id ASC",
        )?;
        let ids = stmt
            .query_map(params![constraint_id], |row| row.get::<_, String>(0))?
            .collect::<SqliteResult<Vec<_>>>()?;
        Ok(ids)
    }
}

// ==========================================
// 行映射辅助
// ==========================================
struct RawConstraintRow {
    constraint_id: String,
    constraint_type: String,
    severity: String,
    work_center_id: Option<String>,
    description: String,
    raised_by: String,
    active: bool,
    resolution_note: Option<String>,
    resolved_by: Option<String>,
    raised_at: String,
    resolved_at: Option<String>,
}

impl RawConstraintRow {
    fn into_domain(self, job_ids: Vec<String>) -> RepositoryResult<Constraint> {
        let constraint_type = ConstraintType::from_str(&self.constraint_type).ok_or_else(|| {
            RepositoryError::FieldValueError {
                field: "constraint_type".to_string(),
                message: format!("无法解析约束类型: {}", self.constraint_type),
            }
        })?;
        let severity = ConstraintSeverity::from_str(&self.severity).ok_or_else(|| {
            RepositoryError::FieldValueError {
                field: "severity".to_string(),
                message: format!("无法解析约束严重度: {}", self.severity),
            }
        })?;
        Ok(Constraint {
            constraint_id: self.constraint_id,
            constraint_type,
            severity,
            work_center_id: self.work_center_id,
            affected_job_ids: job_ids,
            description: self.description,
            raised_by: self.raised_by,
            active: self.active,
            resolution_note: self.resolution_note,
            resolved_by: self.resolved_by,
            raised_at: parse_ts("raised_at", &self.raised_at)?,
            resolved_at: match self.resolved_at {
                Some(v) => Some(parse_ts("resolved_at", &v)?),
                None => None,
            },
        })
    }
}

fn parse_ts(field: &str, value: &str) -> RepositoryResult<NaiveDateTime> {
    NaiveDateTime::parse_from_str(value, TS_FORMAT).map_err(|e| RepositoryError::FieldValueError {
        field: field.to_string(),
        message: format!("时间解析失败 ({}): {}", value, e),
    })
}
