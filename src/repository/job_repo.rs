// ==========================================
// 车间有限产能排产核心 - 作业仓储
// ==========================================
// 职责: 管理 job 表 (含乐观锁修订号)
// 红线: Repository 不做业务逻辑,只做数据映射
// 红线: 状态字段的写入都要走 update_with_revision
// ==========================================

use crate::db::open_sqlite_connection;
use crate::domain::types::{JobPriority, JobState};
use crate::domain::Job;
use crate::repository::error::{RepositoryError, RepositoryResult};
use chrono::NaiveDateTime;
use rusqlite::{params, Connection, Result as SqliteResult, Row};
use std::sync::{Arc, Mutex};

const TS_FORMAT: &str = "%Y-%m-%d %H:%M:%S";

pub struct JobRepository {
    conn: Arc<Mutex<Connection>>,
}

impl JobRepository {
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
            CREATE TABLE IF NOT EXISTS job (
              job_id TEXT PRIMARY KEY,
              job_no TEXT NOT NULL UNIQUE,
              work_order_no TEXT NOT NULL,
              product TEXT NOT NULL,
              work_center_id TEXT NOT NULL,
              priority TEXT NOT NULL,
              state TEXT NOT NULL,
              scheduled_start TEXT,
              scheduled_end TEXT,
              actual_start TEXT,
              actual_end TEXT,
              target_qty INTEGER NOT NULL,
              completed_qty INTEGER NOT NULL DEFAULT 0,
              setup_minutes REAL NOT NULL,
              planned_cycle_minutes REAL NOT NULL,
              actual_cycle_minutes REAL,
              revision INTEGER NOT NULL DEFAULT 0,
              created_at TEXT NOT NULL DEFAULT (datetime('now')),
              updated_at TEXT NOT NULL DEFAULT (datetime('now'))
            );

            CREATE INDEX IF NOT EXISTS idx_job_work_center
              ON job(work_center_id);
            CREATE INDEX IF NOT EXISTS idx_job_state
              ON job(state);
            CREATE INDEX IF NOT EXISTS idx_job_scheduled_start
              ON job(scheduled_start);
            "#,
        )?;
        Ok(())
    }

    const SELECT_COLUMNS: &'static str = r#"
        job_id, job_no, work_order_no, product,
        work_center_id, priority, state,
        scheduled_start, scheduled_end, actual_start, actual_end,
        target_qty, completed_qty,
        setup_minutes, planned_cycle_minutes, actual_cycle_minutes,
        revision, created_at, updated_at
    "#;

    fn map_row(row: &Row<'_>) -> SqliteResult<RawJobRow> {
        Ok(RawJobRow {
            job_id: row.get(0)?,
            job_no: row.get(1)?,
            work_order_no: row.get(2)?,
            product: row.get(3)?,
            work_center_id: row.get(4)?,
            priority: row.get(5)?,
            state: row.get(6)?,
            scheduled_start: row.get(7)?,
            scheduled_end: row.get(8)?,
            actual_start: row.get(9)?,
            actual_end: row.get(10)?,
            target_qty: row.get(11)?,
            completed_qty: row.get(12)?,
            setup_minutes: row.get(13)?,
            planned_cycle_minutes: row.get(14)?,
            actual_cycle_minutes: row.get(15)?,
            revision: row.get(16)?,
            created_at: row.get(17)?,
            updated_at: row.get(18)?,
        })
    }

    /// 插入新作业
    pub fn insert(&self, job: &Job) -> RepositoryResult<String> {
        let conn = self.get_conn()?;
        conn.execute(
            r#"
            INSERT INTO job (
                job_id, job_no, work_order_no, product,
                work_center_id, priority, state,
                scheduled_start, scheduled_end, actual_start, actual_end,
                target_qty, completed_qty,
                setup_minutes, planned_cycle_minutes, actual_cycle_minutes,
                revision, created_at, updated_at
            ) VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9, ?10, ?11, ?12, ?13, ?14, ?15, ?16, ?17, ?18, ?19)
            "#,
            params![
                job.job_id,
                job.job_no,
                job.work_order_no,
                job.product,
                job.work_center_id,
                job.priority.to_db_str(),
                job.state.to_db_str(),
                job.scheduled_start.map(|t| t.format(TS_FORMAT).to_string()),
                job.scheduled_end.map(|t| t.format(TS_FORMAT).to_string()),
                job.actual_start.map(|t| t.format(TS_FORMAT).to_string()),
                job.actual_end.map(|t| t.format(TS_FORMAT).to_string()),
                job.target_qty,
                job.completed_qty,
                job.setup_minutes,
                job.planned_cycle_minutes,
                job.actual_cycle_minutes,
                job.revision,
                job.created_at.format(TS_FORMAT).to_string(),
                job.updated_at.format(TS_FORMAT).to_string(),
            ],
        )?;
        Ok(job.job_id.clone())
    }

    /// 按ID查找作业
    pub fn find_by_id(&self, job_id: &str) -> RepositoryResult<Option<Job>> {
        let conn = self.get_conn()?;
        let sql = format!("SELECT {} FROM job WHERE job_id = ?1", Self::SELECT_COLUMNS);
        let mut stmt = conn.prepare(&sql)?;

        let result = stmt.query_row(params![job_id], Self::map_row);
        match result {
            Ok(raw) => Ok(Some(raw.into_domain()?)),
            Err(rusqlite::Error::QueryReturnedNoRows) => Ok(None),
            Err(e) => Err(e.into()),
        }
    }

    /// 按作业编号查找
    pub fn find_by_job_no(&self, job_no: &str) -> RepositoryResult<Option<Job>> {
        let conn = self.get_conn()?;
        let sql = format!("SELECT {} FROM job WHERE job_no = ?1", Self::SELECT_COLUMNS);
        let mut stmt = conn.prepare(&sql)?;

        let result = stmt.query_row(params![job_no], Self::map_row);
        match result {
            Ok(raw) => Ok(Some(raw.into_domain()?)),
            Err(rusqlite::Error::QueryReturnedNoRows) => Ok(None),
            Err(e) => Err(e.into()),
        }
    }

    /// 列出所有作业（按编号排序）
    pub fn list_all(&self) -> RepositoryResult<Vec<Job>> {
        self.list_where("1=1", &[])
    }

    /// 列出指定工作中心的作业
    pub fn list_by_work_center(&self, work_center_id: &str) -> RepositoryResult<Vec<Job>> {
        self.list_where(
            "work_center_id = ?1",
            &[&work_center_id as &dyn rusqlite::ToSql],
        )
    }

    /// 列出指定状态的作业
    pub fn list_by_state(&self, state: JobState) -> RepositoryResult<Vec<Job>> {
        let db_state = state.to_db_str();
        self.list_where("state = ?1", &[&db_state as &dyn rusqlite::ToSql])
    }

    /// 列出指定工作中心上所有未到吸收态的作业
    pub fn list_open_by_work_center(&self, work_center_id: &str) -> RepositoryResult<Vec<Job>> {
        self.list_where(
            "work_center_id = ?1 AND state NOT IN ('COMPLETED', 'CANCELLED')",
            &[&work_center_id as &dyn rusqlite::ToSql],
        )
    }

    /// 按计划开始时间窗口查询
    pub fn list_scheduled_between(
        &self,
        window_start: NaiveDateTime,
        window_end: NaiveDateTime,
    ) -> RepositoryResult<Vec<Job>> {
        let start = window_start.format(TS_FORMAT).to_string();
        let end = window_end.format(TS_FORMAT).to_string();
        self.list_where(
            "scheduled_start IS NOT NULL AND scheduled_start >= ?1 AND scheduled_start <= ?2",
            &[&start as &dyn rusqlite::ToSql, &end as &dyn rusqlite::ToSql],
        )
    }

    fn list_where(
        &self,
        predicate: &str,
        params: &[&dyn rusqlite::ToSql],
    ) -> RepositoryResult<Vec<Job>> {
        let conn = self.get_conn()?;
        let sql = format!(
            "SELECT {} FROM job WHERE {} ORDER BY job_no ASC",
            Self::SELECT_COLUMNS,
            predicate
        );
        let mut stmt = conn.prepare(&sql)?;

        let rows = stmt
            .query_map(params, Self::map_row)?
            .collect::<SqliteResult<Vec<_>>>()?;

        rows.into_iter().map(|raw| raw.into_domain()).collect()
    }

    /// 带乐观锁的整行更新
    ///
    /// # 参数
    /// - `job`: 期望写入的作业（revision 为读取时的值）
    ///
    /// # 返回
    /// - `Ok(Job)`: 更新成功, 返回修订号 +1 后的作业
    /// - `Err(OptimisticLockFailure)`: 修订号不匹配, 调用方重读后重试
    /// - `Err(NotFound)`: 作业不存在
    pub fn update_with_revision(&self, job: &Job) -> RepositoryResult<Job> {
        let conn = self.get_conn()?;
        let now = chrono::Utc::now().naive_utc().format(TS_FORMAT).to_string();
        let affected = conn.execute(
            r#"
            UPDATE job SET
                work_center_id = ?2,
                priority = ?3,
                state = ?4,
                scheduled_start = ?5,
                scheduled_end = ?6,
                actual_start = ?7,
                actual_end = ?8,
                completed_qty = ?9,
                actual_cycle_minutes = ?10,
                revision = revision + 1,
                updated_at = ?11
            WHERE job_id = ?1 AND revision = ?12
            "#,
            params![
                job.job_id,
                job.work_center_id,
                job.priority.to_db_str(),
                job.state.to_db_str(),
                job.scheduled_start.map(|t| t.format(TS_FORMAT).to_string()),
                job.scheduled_end.map(|t| t.format(TS_FORMAT).to_string()),
                job.actual_start.map(|t| t.format(TS_FORMAT).to_string()),
                job.actual_end.map(|t| t.format(TS_FORMAT).to_string()),
                job.completed_qty,
                job.actual_cycle_minutes,
                now,
                job.revision,
            ],
        )?;

        if affected == 0 {
            // 区分: 不存在 vs 修订号竞争
            let actual: Option<i64> = {
                let mut stmt = conn.prepare("SELECT revision FROM job WHERE job_id = ?1")?;
                match stmt.query_row(params![job.job_id], |row| row.get(0)) {
                    Ok(v) => Some(v),
                    Err(rusqlite::Error::QueryReturnedNoRows) => None,
                    Err(e) => return Err(e.into()),
                }
            };
            return match actual {
                Some(actual_revision) => Err(RepositoryError::OptimisticLockFailure {
                    job_id: job.job_id.clone(),
                    expected: job.revision,
                    actual: actual_revision,
                }),
                None => Err(RepositoryError::NotFound {
                    entity: "Job".to_string(),
                    id: job.job_id.clone(),
                }),
            };
        }

        let mut updated = job.clone();
        updated.revision += 1;
        Ok(updated)
    }
}

// ==========================================
// 行映射辅助
// ==========================================
struct RawJobRow {
    job_id: String,
    job_no: String,
    work_order_no: String,
    product: String,
    work_center_id: String,
    priority: String,
    state: String,
    scheduled_start: Option<String>,
    scheduled_end: Option<String>,
    actual_start: Option<String>,
    actual_end: Option<String>,
    target_qty: i64,
    completed_qty: i64,
    setup_minutes: f64,
    planned_cycle_minutes: f64,
    actual_cycle_minutes: Option<f64>,
    revision: i64,
    created_at: String,
    updated_at: String,
}

impl RawJobRow {
    fn into_domain(self) -> RepositoryResult<Job> {
        let state = JobState::from_str(&self.state).ok_or_else(|| {
            RepositoryError::FieldValueError {
                field: "state".to_string(),
                message: format!("无法解析作业状态: {}", self.state),
            }
        })?;
        Ok(Job {
            job_id: self.job_id,
            job_no: self.job_no,
            work_order_no: self.work_order_no,
            product: self.product,
            work_center_id: self.work_center_id,
            priority: JobPriority::from_str(&self.priority),
            state,
            scheduled_start: parse_opt_ts("scheduled_start", self.scheduled_start)?,
            scheduled_end: parse_opt_ts("scheduled_end", self.scheduled_end)?,
            actual_start: parse_opt_ts("actual_start", self.actual_start)?,
            actual_end: parse_opt_ts("actual_end", self.actual_end)?,
            target_qty: self.target_qty,
            completed_qty: self.completed_qty,
            setup_minutes: self.setup_minutes,
            planned_cycle_minutes: self.planned_cycle_minutes,
            actual_cycle_minutes: self.actual_cycle_minutes,
            revision: self.revision,
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

fn parse_opt_ts(field: &str, value: Option<String>) -> RepositoryResult<Option<NaiveDateTime>> {
    match value {
        Some(v) => Ok(Some(parse_ts(field, &v)?)),
        None => Ok(None),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::domain::types::JobPriority;

    fn setup_test_repo() -> JobRepository {
        JobRepository::new(":memory:").expect("Failed to create test repository")
    }

    fn create_test_job(job_no: &str, work_center: &str) -> Job {
        Job::new(
            job_no.to_string(),
            format!("WO-{}", job_no),
            "法兰盘".to_string(),
            work_center.to_string(),
            JobPriority::Normal,
            100,
            30.0,
            3.0,
        )
    }

    #[test]
    fn test_insert_and_find() {
        let repo = setup_test_repo();
        let job = create_test_job("JOB-0001", "CNC-01");

        repo.insert(&job).expect("Failed to insert");

        let found = repo
            .find_by_id(&job.job_id)
            .expect("Failed to find")
            .expect("Job not found");

        assert_eq!(found.job_no, "JOB-0001");
        assert_eq!(found.state, JobState::Scheduled);
        assert_eq!(found.revision, 0);
        assert!(found.scheduled_start.is_none());
    }

    #[test]
    fn test_update_with_revision_success() {
        let repo = setup_test_repo();
        let job = create_test_job("JOB-0001", "CNC-01");
        repo.insert(&job).expect("Failed to insert");

        let mut loaded = repo
            .find_by_id(&job.job_id)
            .expect("Failed to find")
            .expect("Job not found");
        loaded.completed_qty = 50;

        let updated = repo
            .update_with_revision(&loaded)
            .expect("Failed to update");
        assert_eq!(updated.revision, 1);

        let reloaded = repo
            .find_by_id(&job.job_id)
            .expect("Failed to find")
            .expect("Job not found");
        assert_eq!(reloaded.completed_qty, 50);
        assert_eq!(reloaded.revision, 1);
    }

    #[test]
    fn test_update_with_stale_revision_fails() {
        let repo = setup_test_repo();
        let job = create_test_job("JOB-0001", "CNC-01");
        repo.insert(&job).expect("Failed to insert");

        let stale = repo
            .find_by_id(&job.job_id)
            .expect("Failed to find")
            .expect("Job not found");

        // 第一次写入成功, revision 0 -> 1
        let mut first = stale.clone();
        first.completed_qty = 10;
        repo.update_with_revision(&first).expect("Failed to update");

        // 用过期的 revision 0 再写, 必须失败
        let mut second = stale;
        second.completed_qty = 99;
        let result = repo.update_with_revision(&second);

        match result {
            Err(RepositoryError::OptimisticLockFailure {
                expected, actual, ..
            }) => {
                assert_eq!(expected, 0);
                assert_eq!(actual, 1);
            }
            other => panic!("Expected OptimisticLockFailure, got {:?}", other.map(|j| j.revision)),
        }
    }

    #[test]
    fn test_update_missing_job_not_found() {
        let repo = setup_test_repo();
        let job = create_test_job("JOB-0001", "CNC-01");
        let result = repo.update_with_revision(&job);
        assert!(matches!(result, Err(RepositoryError::NotFound { .. })));
    }

    #[test]
    fn test_list_open_by_work_center() {
        let repo = setup_test_repo();
        let mut a = create_test_job("JOB-0001", "CNC-01");
        let b = create_test_job("JOB-0002", "CNC-01");
        let c = create_test_job("JOB-0003", "CNC-02");
        a.state = JobState::Completed;
        repo.insert(&a).expect("insert a");
        repo.insert(&b).expect("insert b");
        repo.insert(&c).expect("insert c");

        let open = repo
            .list_open_by_work_center("CNC-01")
            .expect("Failed to list");
        assert_eq!(open.len(), 1);
        assert_eq!(open[0].job_no, "JOB-0002");
    }

    #[test]
    fn test_list_scheduled_between() {
        let repo = setup_test_repo();
        let mut job = create_test_job("JOB-0001", "CNC-01");
        let start = NaiveDateTime::parse_from_str("2026-03-01 08:00:00", TS_FORMAT).unwrap();
        job.scheduled_start = Some(start);
        job.scheduled_end = Some(start + chrono::Duration::minutes(330));
        repo.insert(&job).expect("Failed to insert");

        let window_start =
            NaiveDateTime::parse_from_str("2026-03-01 00:00:00", TS_FORMAT).unwrap();
        let window_end = NaiveDateTime::parse_from_str("2026-03-01 23:59:59", TS_FORMAT).unwrap();
        let in_window = repo
            .list_scheduled_between(window_start, window_end)
            .expect("Failed to query");
        assert_eq!(in_window.len(), 1);

        let next_day = repo
            .list_scheduled_between(
                window_end,
                window_end + chrono::Duration::days(1),
            )
            .expect("Failed to query");
        assert!(next_day.is_empty());
    }
}
