// ==========================================
// 车间有限产能排产核心 - 操作日志仓储
// ==========================================
// 职责: 管理 action_log 表 (审计追踪, 只增不改)
// 红线: 所有指令与自动迁移都要落一条记录
// ==========================================

use crate::db::open_sqlite_connection;
use crate::domain::ActionLog;
use crate::repository::error::{RepositoryError, RepositoryResult};
use chrono::NaiveDateTime;
use rusqlite::{params, Connection, Result as SqliteResult, Row};
use std::sync::{Arc, Mutex};

const TS_FORMAT: &str = "%Y-%m-%d %H:%M:%S";

pub struct ActionLogRepository {
    conn: Arc<Mutex<Connection>>,
}

impl ActionLogRepository {
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
            CREATE TABLE IF NOT EXISTS action_log (
              action_id TEXT PRIMARY KEY,
              action_type TEXT NOT NULL,
              action_ts TEXT NOT NULL,
              actor TEXT NOT NULL,
              payload_json TEXT,
              job_id TEXT,
              work_center_id TEXT,
              detail TEXT
            );

            CREATE INDEX IF NOT EXISTS idx_action_log_ts
              ON action_log(action_ts);
            CREATE INDEX IF NOT EXISTS idx_action_log_job
              ON action_log(job_id, action_ts);
            "#,
        )?;
        Ok(())
    }

    const SELECT_COLUMNS: &'static str = r#"
        action_id, action_type, action_ts, actor,
        payload_json, job_id, work_center_id, detail
    "#;

    fn map_row(row: &Row<'_>) -> SqliteResult<RawActionLogRow> {
        Ok(RawActionLogRow {
            action_id: row.get(0)?,
            action_type: row.get(1)?,
            action_ts: row.get(2)?,
            actor: row.get(3)?,
            payload_json: row.get(4)?,
            job_id: row.get(5)?,
            work_center_id: row.get(6)?,
            detail: row.get(7)?,
        })
    }

    /// 插入操作日志
    pub fn insert(&self, log: &ActionLog) -> RepositoryResult<String> {
        let payload = match &log.payload_json {
            Some(v) => Some(
                serde_json::to_string(v)
                    .map_err(|e| RepositoryError::InternalError(format!("日志负载序列化失败: {}", e)))?,
            ),
            None => None,
        };

        let conn = self.get_conn()?;
        conn.execute(
            r#"
            INSERT INTO action_log (
                action_id, action_type, action_ts, actor,
                payload_json, job_id, work_center_id, detail
            ) VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8)
            "#,
            params![
                log.action_id,
                log.action_type,
                log.action_ts.format(TS_FORMAT).to_string(),
                log.actor,
                payload,
                log.job_id,
                log.work_center_id,
                log.detail,
            ],
        )?;
        Ok(log.action_id.clone())
    }

    /// 最近 N 条日志（时间倒序）
    pub fn list_recent(&self, limit: usize) -> RepositoryResult<Vec<ActionLog>> {
        let conn = self.get_conn()?;
        let sql = format!(
            r#"
            SELECT {} FROM action_log
            ORDER BY action_ts DESC, action_id DESC
            LIMIT ?1
            "#,
            Self::SELECT_COLUMNS
        );
        let mut stmt = conn.prepare(&sql)?;
        let rows = stmt
            .query_map(params![limit as i64], Self::map_row)?
            .collect::<SqliteResult<Vec<_>>>()?;

        rows.into_iter().map(|raw| raw.into_domain()).collect()
    }

    /// 指定作业的全部日志（时间正序）
    pub fn list_by_job(&self, job_id: &str) -> RepositoryResult<Vec<ActionLog>> {
        let conn = self.get_conn()?;
        let sql = format!(
            r#"
            SELECT {} FROM action_log
            WHERE job_id = ?1
            ORDER BY action_ts ASC, action_id ASC
            "#,
            Self::SELECT_COLUMNS
        );
        let mut stmt = conn.prepare(&sql)?;
        let rows = stmt
            .query_map(params![job_id], Self::map_row)?
            .collect::<SqliteResult<Vec<_>>>()?;

        rows.into_iter().map(|raw| raw.into_domain()).collect()
    }
}

// ==========================================
// 行映射辅助
// ==========================================
struct RawActionLogRow {
    action_id: String,
    action_type: String,
    action_ts: String,
    actor: String,
    payload_json: Option<String>,
    job_id: Option<String>,
    work_center_id: Option<String>,
    detail: Option<String>,
}

impl RawActionLogRow {
    fn into_domain(self) -> RepositoryResult<ActionLog> {
        let payload_json = match self.payload_json {
            Some(raw) => Some(serde_json::from_str(&raw).map_err(|e| {
                RepositoryError::FieldValueError {
                    field: "payload_json".to_string(),
                    message: format!("日志负载解析失败: {}", e),
                }
            })?),
            None => None,
        };
        Ok(ActionLog {
            action_id: self.action_id,
            action_type: self.action_type,
            action_ts: parse_ts("action_ts", &self.action_ts)?,
            actor: self.actor,
            payload_json,
            job_id: self.job_id,
            work_center_id: self.work_center_id,
            detail: self.detail,
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
    use crate::domain::ActionType;

    fn setup_test_repo() -> ActionLogRepository {
        ActionLogRepository::new(":memory:").expect("Failed to create test repository")
    }

    #[test]
    fn test_insert_and_list_recent() {
        let repo = setup_test_repo();
        let log = ActionLog::new(ActionType::StartJob, "zhang.op".to_string())
            .with_job("job-1".to_string())
            .with_work_center("CNC-01".to_string())
            .with_detail("开工".to_string());
        repo.insert(&log).expect("Failed to insert");

        let recent = repo.list_recent(10).expect("Failed to list");
        assert_eq!(recent.len(), 1);
        assert_eq!(recent[0].action_type, "StartJob");
        assert_eq!(recent[0].actor, "zhang.op");
    }

    #[test]
    fn test_payload_round_trip() {
        let repo = setup_test_repo();
        let log = ActionLog::new(ActionType::ResolveConstraint, "li.gong".to_string())
            .with_payload(&serde_json::json!({"constraint_id": "c-1", "note": "刀具已更换"}));
        repo.insert(&log).expect("Failed to insert");

        let recent = repo.list_recent(1).expect("Failed to list");
        let payload = recent[0].payload_json.as_ref().expect("payload missing");
        assert_eq!(payload["constraint_id"], "c-1");
    }

    #[test]
    fn test_list_by_job() {
        let repo = setup_test_repo();
        repo.insert(&ActionLog::new(ActionType::StartJob, "a".to_string()).with_job("job-1".to_string()))
            .expect("insert");
        repo.insert(&ActionLog::new(ActionType::CompleteJob, "a".to_string()).with_job("job-1".to_string()))
            .expect("insert");
        repo.insert(&ActionLog::new(ActionType::StartJob, "a".to_string()).with_job("job-2".to_string()))
            .expect("insert");

        let logs = repo.list_by_job("job-1").expect("Failed to list");
        assert_eq!(logs.len(), 2);
    }
}
