// ==========================================
// 车间有限产能排产核心 - 作业台账
// ==========================================
// 职责: 作业状态机的唯一事实来源
// 红线: 同一作业的变更串行化 (修订号+重试), 到达顺序生效
// 红线: BLOCKED 只由关键约束强制进入, 解除后回 SCHEDULED
// 红线: COMPLETED / CANCELLED 为吸收态
// ==========================================

use crate::domain::types::JobState;
use crate::domain::{ActionLog, ActionType, Job};
use crate::engine::events::{FloorEvent, FloorEventType, OptionalEventPublisher};
use crate::engine::registry::WorkCenterRegistry;
use crate::repository::error::RepositoryError;
use crate::repository::{ActionLogRepository, ConstraintRepository, JobRepository};
use chrono::NaiveDateTime;
use std::sync::Arc;
use thiserror::Error;

// ==========================================
// 台账层错误类型
// ==========================================
#[derive(Error, Debug)]
pub enum LedgerError {
    #[error("作业不存在: {job_id}")]
    NotFound { job_id: String },

    #[error("无效的状态迁移: from={from} to={to}")]
    InvalidTransition { from: JobState, to: JobState },

    #[error("作业被关键约束阻塞: job_id={job_id}, 生效关键约束 {critical_count} 条")]
    Blocked { job_id: String, critical_count: usize },

    #[error("并发修改冲突 (重试 {attempts} 次后放弃): job_id={job_id}")]
    Conflict { job_id: String, attempts: u32 },

    #[error("指令校验失败: {0}")]
    Validation(String),

    #[error(transparent)]
    Repository(#[from] RepositoryError),
}

pub type LedgerResult<T> = Result<T, LedgerError>;

// ==========================================
// JobLedger - 作业台账
// ==========================================
pub struct JobLedger {
    job_repo: Arc<JobRepository>,
    constraint_repo: Arc<ConstraintRepository>,
    registry: Arc<WorkCenterRegistry>,
    action_log_repo: Arc<ActionLogRepository>,
    publisher: OptionalEventPublisher,
    retry_limit: u32,
}

impl JobLedger {
    pub fn new(
        job_repo: Arc<JobRepository>,
        constraint_repo: Arc<ConstraintRepository>,
        registry: Arc<WorkCenterRegistry>,
        action_log_repo: Arc<ActionLogRepository>,
        publisher: OptionalEventPublisher,
        retry_limit: u32,
    ) -> Self {
        Self {
            job_repo,
            constraint_repo,
            registry,
            action_log_repo,
            publisher,
            retry_limit: retry_limit.max(1),
        }
    }

    // ==========================================
    // 查询
    // ==========================================

    pub fn get(&self, job_id: &str) -> LedgerResult<Job> {
        self.job_repo
            .find_by_id(job_id)?
            .ok_or_else(|| LedgerError::NotFound {
                job_id: job_id.to_string(),
            })
    }

    pub fn list(&self) -> LedgerResult<Vec<Job>> {
        Ok(self.job_repo.list_all()?)
    }

    pub fn list_open_by_work_center(&self, work_center_id: &str) -> LedgerResult<Vec<Job>> {
        Ok(self.job_repo.list_open_by_work_center(work_center_id)?)
    }

    // ==========================================
    // 创建
    // ==========================================

    /// 工单释放: 作业进入台账, 承诺负载落到工作中心
    pub fn release(&self, job: &Job) -> LedgerResult<Job> {
        // 指派目标必须已注册
        let _ = self.registry.get(&job.work_center_id)?;
        self.job_repo.insert(job)?;
        let _ = self
            .registry
            .record_load_delta(&job.work_center_id, job.block_minutes())?;

        tracing::info!(job_no = %job.job_no, work_center_id = %job.work_center_id, "作业已释放进入排产");
        self.publish_transition(job, None, JobState::Scheduled, "release");
        Ok(job.clone())
    }

    // ==========================================
    // 操作员指令
    // ==========================================

    /// 开工: SCHEDULED -> IN_PROGRESS
    ///
    /// 存在生效关键约束时拒绝 (Blocked)
    pub fn start(&self, job_id: &str, actor: &str, now: NaiveDateTime) -> LedgerResult<Job> {
        let critical = self.constraint_repo.list_active_for_job(job_id)?;
        let critical_count = critical.iter().filter(|c| c.is_blocking()).count();
        if critical_count > 0 {
            return Err(LedgerError::Blocked {
                job_id: job_id.to_string(),
                critical_count,
            });
        }

        let updated = self.mutate_with_retry(job_id, |job| {
            Self::guard(job.state, JobState::Scheduled, JobState::InProgress)?;
            job.state = JobState::InProgress;
            if job.actual_start.is_none() {
                job.actual_start = Some(now);
            }
            Ok(())
        })?;

        self.log_action(ActionType::StartJob, actor, &updated, None);
        self.publish_transition(&updated, Some(JobState::Scheduled), JobState::InProgress, actor);
        Ok(updated)
    }

    /// 暂停: IN_PROGRESS -> SCHEDULED (保留实际开始时间)
    pub fn pause(&self, job_id: &str, actor: &str) -> LedgerResult<Job> {
        let updated = self.mutate_with_retry(job_id, |job| {
            Self::guard(job.state, JobState::InProgress, JobState::Scheduled)?;
            job.state = JobState::Scheduled;
            Ok(())
        })?;

        self.log_action(ActionType::PauseJob, actor, &updated, None);
        self.publish_transition(&updated, Some(JobState::InProgress), JobState::Scheduled, actor);
        Ok(updated)
    }

    /// 完工: IN_PROGRESS -> COMPLETED
    ///
    /// 数量未达标时必须带操作员说明强制完工
    pub fn complete(
        &self,
        job_id: &str,
        actor: &str,
        override_reason: Option<&str>,
        now: NaiveDateTime,
    ) -> LedgerResult<Job> {
        let updated = self.mutate_with_retry(job_id, |job| {
            Self::guard(job.state, JobState::InProgress, JobState::Completed)?;
            if !job.is_quantity_fulfilled() {
                match override_reason {
                    Some(reason) if !reason.trim().is_empty() => {}
                    _ => {
                        return Err(LedgerError::Validation(format!(
                            "数量未达标 ({}/{}), 强制完工必须填写原因",
                            job.completed_qty, job.target_qty
                        )))
                    }
                }
            }
            job.state = JobState::Completed;
            job.actual_end = Some(now);
            // 实际节拍 = (实际运行时长 - 换型) / 完成数量
            if let Some(start) = job.actual_start {
                if job.completed_qty > 0 {
                    let run_minutes =
                        ((now - start).num_seconds() as f64 / 60.0 - job.setup_minutes).max(0.0);
                    job.actual_cycle_minutes = Some(run_minutes / job.completed_qty as f64);
                }
            }
            Ok(())
        })?;

        let detail = override_reason.map(|r| format!("强制完工: {}", r));
        self.log_action(ActionType::CompleteJob, actor, &updated, detail);
        self.publish_transition(&updated, Some(JobState::InProgress), JobState::Completed, actor);
        Ok(updated)
    }

    /// 取消: 非吸收态 -> CANCELLED, 必须带原因
    pub fn cancel(&self, job_id: &str, actor: &str, reason: &str) -> LedgerResult<Job> {
        if reason.trim().is_empty() {
            return Err(LedgerError::Validation("取消作业必须填写原因".to_string()));
        }

        let mut from = JobState::Scheduled;
        let updated = self.mutate_with_retry(job_id, |job| {
            if job.state.is_terminal() {
                return Err(LedgerError::InvalidTransition {
                    from: job.state,
                    to: JobState::Cancelled,
                });
            }
            from = job.state;
            job.state = JobState::Cancelled;
            Ok(())
        })?;

        self.log_action(ActionType::CancelJob, actor, &updated, Some(reason.to_string()));
        self.publish_transition(&updated, Some(from), JobState::Cancelled, actor);
        Ok(updated)
    }

    /// 记录产出进度 (完成数量只增不减)
    pub fn record_progress(&self, job_id: &str, completed_qty: i64) -> LedgerResult<Job> {
        self.mutate_with_retry(job_id, |job| {
            if completed_qty < job.completed_qty {
                return Err(LedgerError::Validation(format!(
                    "完成数量不可回退: {} -> {}",
                    job.completed_qty, completed_qty
                )));
            }
            job.completed_qty = completed_qty.min(job.target_qty);
            Ok(())
        })
    }

    // ==========================================
    // 自动迁移 (约束引擎 / 延期扫描调用)
    // ==========================================

    /// 关键约束附着: 非吸收态立即强制 BLOCKED
    ///
    /// 已是 BLOCKED 或吸收态时为空操作
    pub fn force_block(&self, job_id: &str, constraint_id: &str) -> LedgerResult<Option<Job>> {
        let current = self.get(job_id)?;
        if current.state.is_terminal() || current.state == JobState::Blocked {
            return Ok(None);
        }

        let from = current.state;
        let updated = self.mutate_with_retry(job_id, |job| {
            if job.state.is_terminal() || job.state == JobState::Blocked {
                return Ok(());
            }
            job.state = JobState::Blocked;
            Ok(())
        })?;

        let log = ActionLog::new(ActionType::AutoTransition, "ConstraintEngine".to_string())
            .with_job(updated.job_id.clone())
            .with_work_center(updated.work_center_id.clone())
            .with_detail(format!("关键约束 {} 强制阻塞", constraint_id));
        self.insert_log(log);
        self.publish_transition(&updated, Some(from), JobState::Blocked, "ConstraintEngine");
        Ok(Some(updated))
    }

    /// 最后一条关键约束解除: BLOCKED -> SCHEDULED (绝不直接回 IN_PROGRESS)
    ///
    /// 仍有生效关键约束时为空操作
    pub fn release_block(&self, job_id: &str) -> LedgerResult<Option<Job>> {
        if self.constraint_repo.has_active_critical(job_id)? {
            return Ok(None);
        }
        let current = self.get(job_id)?;
        if current.state != JobState::Blocked {
            return Ok(None);
        }

        let updated = self.mutate_with_retry(job_id, |job| {
            if job.state != JobState::Blocked {
                return Ok(());
            }
            job.state = JobState::Scheduled;
            Ok(())
        })?;

        let log = ActionLog::new(ActionType::AutoTransition, "ConstraintEngine".to_string())
            .with_job(updated.job_id.clone())
            .with_work_center(updated.work_center_id.clone())
            .with_detail("关键约束已全部解除, 作业回到待排产".to_string());
        self.insert_log(log);
        self.publish_transition(&updated, Some(JobState::Blocked), JobState::Scheduled, "ConstraintEngine");
        Ok(Some(updated))
    }

    /// 延期扫描: now 已越过计划结束且未完工的作业标记 DELAYED
    ///
    /// # 返回
    /// 本轮新标记为延期的作业数
    pub fn sweep_delayed(&self, now: NaiveDateTime) -> LedgerResult<usize> {
        let mut swept = 0;
        for job in self.job_repo.list_all()? {
            let overdue = matches!(job.state, JobState::Scheduled | JobState::InProgress)
                && job.scheduled_end.map(|end| now > end).unwrap_or(false);
            if !overdue {
                continue;
            }
            let from = job.state;
            let updated = self.mutate_with_retry(&job.job_id, |j| {
                if !matches!(j.state, JobState::Scheduled | JobState::InProgress) {
                    return Ok(());
                }
                j.state = JobState::Delayed;
                Ok(())
            })?;
            if updated.state == JobState::Delayed {
                let log = ActionLog::new(ActionType::AutoTransition, "DelaySweep".to_string())
                    .with_job(updated.job_id.clone())
                    .with_work_center(updated.work_center_id.clone())
                    .with_detail("已越过计划结束时间".to_string());
                self.insert_log(log);
                self.publish_transition(&updated, Some(from), JobState::Delayed, "DelaySweep");
                swept += 1;
            }
        }
        Ok(swept)
    }

    // ==========================================
    // 排产增量应用 (Scheduler 调用)
    // ==========================================

    /// 应用单条排产指派
    ///
    /// IN_PROGRESS 作业只允许调整计划时间, 不换工作中心;
    /// DELAYED 作业被重新接纳回 SCHEDULED
    pub fn apply_assignment(
        &self,
        job_id: &str,
        work_center_id: &str,
        scheduled_start: NaiveDateTime,
        scheduled_end: NaiveDateTime,
    ) -> LedgerResult<Job> {
        let updated = self.mutate_with_retry(job_id, |job| {
            if job.state.is_terminal() || job.state == JobState::Blocked {
                return Err(LedgerError::InvalidTransition {
                    from: job.state,
                    to: JobState::Scheduled,
                });
            }
            if job.state == JobState::InProgress && job.work_center_id != work_center_id {
                return Err(LedgerError::Validation(format!(
                    "进行中作业不可改派工作中心: {} -> {}",
                    job.work_center_id, work_center_id
                )));
            }
            job.work_center_id = work_center_id.to_string();
            job.scheduled_start = Some(scheduled_start);
            job.scheduled_end = Some(scheduled_end);
            if job.state == JobState::Delayed {
                job.state = JobState::Scheduled;
            }
            Ok(())
        })?;
        Ok(updated)
    }

    // ==========================================
    // 内部
    // ==========================================

    fn guard(from: JobState, expected: JobState, to: JobState) -> LedgerResult<()> {
        if from != expected {
            return Err(LedgerError::InvalidTransition { from, to });
        }
        Ok(())
    }

    /// 带乐观锁重试的串行化变更
    ///
    /// 负载副作用: 变更前后按剩余负载差额同步工作中心;
    /// 工作中心被改派时旧中心减全额、新中心加全额
    fn mutate_with_retry(
        &self,
        job_id: &str,
        mut mutate: impl FnMut(&mut Job) -> LedgerResult<()>,
    ) -> LedgerResult<Job> {
        let mut attempt: u32 = 0;
        loop {
            let mut job = self.get(job_id)?;
            let alloc_before = job.remaining_allocation_minutes();
            let wc_before = job.work_center_id.clone();

            mutate(&mut job)?;
            let alloc_after = job.remaining_allocation_minutes();
            let wc_after = job.work_center_id.clone();

            match self.job_repo.update_with_revision(&job) {
                Ok(updated) => {
                    if wc_before != wc_after {
                        let _ = self.registry.record_load_delta(&wc_before, -alloc_before)?;
                        let _ = self.registry.record_load_delta(&wc_after, alloc_after)?;
                    } else {
                        let delta = alloc_after - alloc_before;
                        if delta.abs() > f64::EPSILON {
                            let _ = self.registry.record_load_delta(&wc_after, delta)?;
                        }
                    }
                    return Ok(updated);
                }
                Err(RepositoryError::OptimisticLockFailure { .. }) => {
                    attempt += 1;
                    if attempt >= self.retry_limit {
                        return Err(LedgerError::Conflict {
                            job_id: job_id.to_string(),
                            attempts: attempt,
                        });
                    }
                    tracing::debug!(job_id, attempt, "乐观锁冲突, 重读后重试");
                }
                Err(e) => return Err(e.into()),
            }
        }
    }

    fn log_action(&self, action_type: ActionType, actor: &str, job: &Job, detail: Option<String>) {
        let mut log = ActionLog::new(action_type, actor.to_string())
            .with_job(job.job_id.clone())
            .with_work_center(job.work_center_id.clone());
        if let Some(d) = detail {
            log = log.with_detail(d);
        }
        self.insert_log(log);
    }

    // 审计写入失败不阻断业务, 但必须留痕
    fn insert_log(&self, log: ActionLog) {
        if let Err(e) = self.action_log_repo.insert(&log) {
            tracing::error!("操作日志写入失败: {}", e);
        }
    }

    fn publish_transition(&self, job: &Job, from: Option<JobState>, to: JobState, source: &str) {
        let detail = match from {
            Some(f) => format!("{} -> {}", f, to),
            None => format!("-> {}", to),
        };
        self.publisher.publish(
            FloorEvent::new(FloorEventType::JobTransition, source)
                .with_job(&job.job_id)
                .with_work_center(&job.work_center_id)
                .with_detail(detail),
        );
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::domain::types::{ConstraintSeverity, ConstraintType, JobPriority, WorkCenterKind};
    use crate::domain::{Constraint, WorkCenter};
    use crate::engine::events::OptionalEventPublisher;
    use crate::repository::WorkCenterRepository;
    use rusqlite::Connection;
    use std::sync::Mutex;

    struct Fixture {
        ledger: JobLedger,
        job_repo: Arc<JobRepository>,
        constraint_repo: Arc<ConstraintRepository>,
        registry: Arc<WorkCenterRegistry>,
    }

    fn setup() -> Fixture {
        let conn = Arc::new(Mutex::new(Connection::open_in_memory().expect("conn")));
        let job_repo = Arc::new(JobRepository::from_connection(conn.clone()).expect("job repo"));
        let constraint_repo =
            Arc::new(ConstraintRepository::from_connection(conn.clone()).expect("constraint repo"));
        let wc_repo =
            Arc::new(WorkCenterRepository::from_connection(conn.clone()).expect("wc repo"));
        let action_log_repo =
            Arc::new(ActionLogRepository::from_connection(conn).expect("log repo"));
        let registry = Arc::new(WorkCenterRegistry::new(
            wc_repo,
            OptionalEventPublisher::none(),
        ));
        registry
            .register(&WorkCenter::new(
                "CNC-01".to_string(),
                "一号加工中心".to_string(),
                WorkCenterKind::Machining,
                480.0,
            ))
            .expect("register");

        let ledger = JobLedger::new(
            job_repo.clone(),
            constraint_repo.clone(),
            registry.clone(),
            action_log_repo,
            OptionalEventPublisher::none(),
            3,
        );
        Fixture {
            ledger,
            job_repo,
            constraint_repo,
            registry,
        }
    }

    fn release_job(fx: &Fixture, job_no: &str, target_qty: i64) -> Job {
        let job = Job::new(
            job_no.to_string(),
            format!("WO-{}", job_no),
            "法兰盘".to_string(),
            "CNC-01".to_string(),
            JobPriority::Normal,
            target_qty,
            30.0,
            3.0,
        );
        fx.ledger.release(&job).expect("release")
    }

    fn now() -> NaiveDateTime {
        chrono::Utc::now().naive_utc()
    }

    #[test]
    fn test_release_commits_load() {
        let fx = setup();
        release_job(&fx, "JOB-0001", 100);
        // 负载 = 换型 30 + 100 × 3.0 = 330
        let wc = fx.registry.get("CNC-01").expect("get");
        assert_eq!(wc.load_minutes, 330.0);
    }

    #[test]
    fn test_happy_path_start_complete() {
        let fx = setup();
        let job = release_job(&fx, "JOB-0001", 100);

        let started = fx.ledger.start(&job.job_id, "zhang.op", now()).expect("start");
        assert_eq!(started.state, JobState::InProgress);
        assert!(started.actual_start.is_some());

        fx.ledger
            .record_progress(&job.job_id, 100)
            .expect("progress");
        let completed = fx
            .ledger
            .complete(&job.job_id, "zhang.op", None, now())
            .expect("complete");
        assert_eq!(completed.state, JobState::Completed);
        assert!(completed.actual_end.is_some());

        // 完工后剩余负载归零
        let wc = fx.registry.get("CNC-01").expect("get");
        assert_eq!(wc.load_minutes, 0.0);
    }

    #[test]
    fn test_complete_short_quantity_requires_reason() {
        let fx = setup();
        let job = release_job(&fx, "JOB-0001", 100);
        fx.ledger.start(&job.job_id, "op", now()).expect("start");
        fx.ledger.record_progress(&job.job_id, 60).expect("progress");

        let refused = fx.ledger.complete(&job.job_id, "op", None, now());
        assert!(matches!(refused, Err(LedgerError::Validation(_))));

        let forced = fx
            .ledger
            .complete(&job.job_id, "op", Some("客户变更, 剩余取消"), now())
            .expect("forced complete");
        assert_eq!(forced.state, JobState::Completed);
    }

    #[test]
    fn test_start_refused_when_critically_constrained() {
        let fx = setup();
        let job = release_job(&fx, "JOB-0001", 100);

        let constraint = Constraint::new(
            ConstraintType::Resource,
            ConstraintSeverity::Critical,
            "主轴故障".to_string(),
            "TELEMETRY".to_string(),
        )
        .with_jobs(vec![job.job_id.clone()]);
        fx.constraint_repo.insert(&constraint).expect("insert");

        let result = fx.ledger.start(&job.job_id, "op", now());
        assert!(matches!(result, Err(LedgerError::Blocked { .. })));
    }

    #[test]
    fn test_force_block_and_release_to_scheduled() {
        let fx = setup();
        let job = release_job(&fx, "JOB-0001", 100);
        fx.ledger.start(&job.job_id, "op", now()).expect("start");

        let constraint = Constraint::new(
            ConstraintType::Resource,
            ConstraintSeverity::Critical,
            "断刀".to_string(),
            "TELEMETRY".to_string(),
        )
        .with_jobs(vec![job.job_id.clone()]);
        fx.constraint_repo.insert(&constraint).expect("insert");

        let blocked = fx
            .ledger
            .force_block(&job.job_id, &constraint.constraint_id)
            .expect("force block")
            .expect("transitioned");
        assert_eq!(blocked.state, JobState::Blocked);

        // 约束仍生效: 解除阻塞为空操作
        assert!(fx.ledger.release_block(&job.job_id).expect("noop").is_none());

        fx.constraint_repo
            .resolve(&constraint.constraint_id, Some("换刀完成"), "li.gong", now())
            .expect("resolve");

        // 回 SCHEDULED, 绝不直接回 IN_PROGRESS
        let released = fx
            .ledger
            .release_block(&job.job_id)
            .expect("release")
            .expect("transitioned");
        assert_eq!(released.state, JobState::Scheduled);
        assert!(released.actual_start.is_some());
    }

    #[test]
    fn test_terminal_states_absorbing() {
        let fx = setup();
        let job = release_job(&fx, "JOB-0001", 100);
        fx.ledger
            .cancel(&job.job_id, "op", "工单作废")
            .expect("cancel");

        let restart = fx.ledger.start(&job.job_id, "op", now());
        assert!(matches!(
            restart,
            Err(LedgerError::InvalidTransition { .. })
        ));
        let recancel = fx.ledger.cancel(&job.job_id, "op", "再次取消");
        assert!(matches!(
            recancel,
            Err(LedgerError::InvalidTransition { .. })
        ));
    }

    #[test]
    fn test_sweep_delayed() {
        let fx = setup();
        let job = release_job(&fx, "JOB-0001", 100);
        let past = now() - chrono::Duration::minutes(60);
        fx.ledger
            .apply_assignment(&job.job_id, "CNC-01", past - chrono::Duration::minutes(330), past)
            .expect("assign");

        let swept = fx.ledger.sweep_delayed(now()).expect("sweep");
        assert_eq!(swept, 1);
        assert_eq!(fx.ledger.get(&job.job_id).expect("get").state, JobState::Delayed);

        // 幂等: 已延期的不再重复标记
        let swept = fx.ledger.sweep_delayed(now()).expect("sweep");
        assert_eq!(swept, 0);
    }

    #[test]
    fn test_cancel_requires_reason() {
        let fx = setup();
        let job = release_job(&fx, "JOB-0001", 100);
        let result = fx.ledger.cancel(&job.job_id, "op", "  ");
        assert!(matches!(result, Err(LedgerError::Validation(_))));
    }

    // 另一写方在本次读改写之间抢先提交一次
    fn bump_revision_out_of_band(fx: &Fixture, job_id: &str) {
        let fresh = fx
            .job_repo
            .find_by_id(job_id)
            .expect("find")
            .expect("exists");
        fx.job_repo
            .update_with_revision(&fresh)
            .expect("out-of-band update");
    }

    #[test]
    fn test_revision_conflict_retries_then_succeeds() {
        let fx = setup();
        let job = release_job(&fx, "JOB-0001", 100);

        let mut interfered = false;
        let updated = fx
            .ledger
            .mutate_with_retry(&job.job_id, |j| {
                if !interfered {
                    interfered = true;
                    bump_revision_out_of_band(&fx, &j.job_id);
                }
                j.completed_qty = 10;
                Ok(())
            })
            .expect("retry then succeed");

        assert!(interfered);
        assert_eq!(updated.completed_qty, 10);
        // 重读后的第二轮提交成功, 修订号越过抢先写方
        assert!(updated.revision >= 2);
    }

    #[test]
    fn test_conflict_surfaces_after_retry_limit() {
        let fx = setup();
        let job = release_job(&fx, "JOB-0001", 100);

        // 每一轮都被抢先提交 => 重试额度耗尽后放弃
        let result = fx.ledger.mutate_with_retry(&job.job_id, |j| {
            bump_revision_out_of_band(&fx, &j.job_id);
            j.completed_qty += 1;
            Ok(())
        });
        match result {
            Err(LedgerError::Conflict { attempts, .. }) => assert_eq!(attempts, 3),
            other => panic!("期望 Conflict, 实际 {:?}", other),
        }

        // 放弃后作业本体未被本次变更污染
        let current = fx.ledger.get(&job.job_id).expect("get");
        assert_eq!(current.completed_qty, 0);
    }
}
