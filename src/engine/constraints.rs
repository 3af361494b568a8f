// ==========================================
// 车间有限产能排产核心 - 约束引擎
// ==========================================
// 职责: 约束全生命周期 (上报/解除) 与派生动作
// 红线: 约束只能显式解除, 永不静默过期
// 红线: CRITICAL 约束附着 => 关联作业立即 BLOCKED;
//       最后一条关键约束解除 => 回 SCHEDULED 并请求重排
// ==========================================

use crate::config::SchedulingParams;
use crate::domain::types::{
    ConstraintSeverity, ConstraintType, DowntimeCategory, DowntimeKind,
};
use crate::domain::{
    Constraint, DowntimeInterval, MaintenanceNotice, MaterialNotice, MaterialStatus,
    ToolWearReading,
};
use crate::engine::events::{FloorEvent, FloorEventType, OptionalEventPublisher};
use crate::engine::ledger::{JobLedger, LedgerError, LedgerResult};
use crate::repository::{ConstraintFilter, ConstraintRepository, DowntimeRepository, JobRepository};
use chrono::NaiveDateTime;
use std::sync::Arc;

// ==========================================
// ConstraintEngine - 约束引擎
// ==========================================
pub struct ConstraintEngine {
    constraint_repo: Arc<ConstraintRepository>,
    downtime_repo: Arc<DowntimeRepository>,
    job_repo: Arc<JobRepository>,
    ledger: Arc<JobLedger>,
    publisher: OptionalEventPublisher,
    params: SchedulingParams,
}

impl ConstraintEngine {
    pub fn new(
        constraint_repo: Arc<ConstraintRepository>,
        downtime_repo: Arc<DowntimeRepository>,
        job_repo: Arc<JobRepository>,
        ledger: Arc<JobLedger>,
        publisher: OptionalEventPublisher,
        params: SchedulingParams,
    ) -> Self {
        Self {
            constraint_repo,
            downtime_repo,
            job_repo,
            ledger,
            publisher,
            params,
        }
    }

    // ==========================================
    // 上报
    // ==========================================

    /// 上报约束
    ///
    /// 未显式关联作业但指明工作中心的约束, 自动展开到
    /// 该中心全部未完结作业; CRITICAL 约束立即强制阻塞,
    /// 设备类 CRITICAL 同时开启计划外停机区间
    pub fn raise(&self, mut constraint: Constraint) -> LedgerResult<Constraint> {
        if constraint.description.trim().is_empty() {
            return Err(LedgerError::Validation("约束描述不能为空".to_string()));
        }
        if constraint.work_center_id.is_none() && constraint.affected_job_ids.is_empty() {
            return Err(LedgerError::Validation(
                "约束必须关联工作中心或至少一个作业".to_string(),
            ));
        }

        if constraint.affected_job_ids.is_empty() {
            if let Some(wc_id) = &constraint.work_center_id {
                constraint.affected_job_ids = self
                    .job_repo
                    .list_open_by_work_center(wc_id)?
                    .into_iter()
                    .map(|j| j.job_id)
                    .collect();
            }
        }

        self.constraint_repo.insert(&constraint)?;
        tracing::info!(
            constraint_id = %constraint.constraint_id,
            constraint_type = %constraint.constraint_type,
            severity = %constraint.severity,
            affected = constraint.affected_job_ids.len(),
            "约束已上报"
        );

        if constraint.is_blocking() {
            for job_id in &constraint.affected_job_ids {
                self.ledger.force_block(job_id, &constraint.constraint_id)?;
            }
            if let Some(wc_id) = &constraint.work_center_id {
                self.open_unplanned_downtime(&constraint, wc_id)?;
            }
        }

        let mut event = FloorEvent::new(FloorEventType::ConstraintRaised, &constraint.raised_by)
            .with_constraint(&constraint.constraint_id)
            .with_detail(format!("{} {}", constraint.severity, constraint.description));
        if let Some(wc_id) = &constraint.work_center_id {
            event = event.with_work_center(wc_id);
        }
        self.publisher.publish(event);
        Ok(constraint)
    }

    // ==========================================
    // 解除
    // ==========================================

    /// 解除约束
    ///
    /// LOW 以上严重度必须带非空处理说明; 由本约束开启的
    /// 停机区间随之闭合; 不再被任何关键约束关联的作业回
    /// SCHEDULED, 并发布限定受影响作业的重排请求
    pub fn resolve(
        &self,
        constraint_id: &str,
        note: Option<&str>,
        resolved_by: &str,
        now: NaiveDateTime,
    ) -> LedgerResult<Constraint> {
        let current = self
            .constraint_repo
            .find_by_id(constraint_id)?
            .ok_or_else(|| LedgerError::Validation(format!("约束不存在: {}", constraint_id)))?;

        if current.severity.requires_resolution_note() {
            match note {
                Some(n) if !n.trim().is_empty() => {}
                _ => {
                    return Err(LedgerError::Validation(format!(
                        "{} 级约束解除必须填写处理说明",
                        current.severity
                    )))
                }
            }
        }

        let resolved = self
            .constraint_repo
            .resolve(constraint_id, note, resolved_by, now)?;

        let closed = self.downtime_repo.close_by_constraint(constraint_id, now)?;
        if closed > 0 {
            self.publisher.publish(
                FloorEvent::new(FloorEventType::DowntimeClosed, "ConstraintEngine")
                    .with_constraint(constraint_id)
                    .with_detail(format!("闭合停机区间 {} 个", closed)),
            );
        }

        // 仍被其他关键约束关联的作业留在 BLOCKED
        let mut unblocked = Vec::new();
        if resolved.severity == ConstraintSeverity::Critical {
            for job_id in &resolved.affected_job_ids {
                if self.ledger.release_block(job_id)?.is_some() {
                    unblocked.push(job_id.clone());
                }
            }
        }

        tracing::info!(
            constraint_id,
            resolved_by,
            unblocked = unblocked.len(),
            "约束已解除"
        );

        let mut event = FloorEvent::new(FloorEventType::ConstraintResolved, resolved_by)
            .with_constraint(constraint_id);
        if let Some(wc_id) = &resolved.work_center_id {
            event = event.with_work_center(wc_id);
        }
        self.publisher.publish(event);

        if !unblocked.is_empty() {
            let mut request = FloorEvent::new(FloorEventType::ReoptimizeRequested, "ConstraintEngine")
                .with_constraint(constraint_id)
                .with_detail(format!("解除阻塞作业重排: {}", unblocked.join(",")));
            if let Some(wc_id) = &resolved.work_center_id {
                request = request.with_work_center(wc_id);
            }
            self.publisher.publish(request);
        }
        Ok(resolved)
    }

    // ==========================================
    // 查询
    // ==========================================

    /// 指定作业的生效约束
    pub fn active_for(&self, job_id: &str) -> LedgerResult<Vec<Constraint>> {
        Ok(self.constraint_repo.list_active_for_job(job_id)?)
    }

    /// 按条件过滤约束
    pub fn list(&self, filter: &ConstraintFilter) -> LedgerResult<Vec<Constraint>> {
        Ok(self.constraint_repo.list(filter)?)
    }

    /// 全部生效约束
    pub fn list_active(&self) -> LedgerResult<Vec<Constraint>> {
        Ok(self.constraint_repo.list_active()?)
    }

    // ==========================================
    // 外部数据源落约束
    // ==========================================

    /// 维保窗口: 落计划内停机 + 资源/人力约束
    ///
    /// 原因指向人力缺口时记 LABOR 类型, 其余记 RESOURCE
    pub fn apply_maintenance_notice(&self, notice: &MaintenanceNotice) -> LedgerResult<Constraint> {
        if notice.unavailable_to <= notice.unavailable_from {
            return Err(LedgerError::Validation(format!(
                "维保窗口无效: {} -> {}",
                notice.unavailable_from, notice.unavailable_to
            )));
        }

        let interval = DowntimeInterval::new(
            notice.work_center_id.clone(),
            DowntimeKind::Planned,
            DowntimeCategory::Other,
            notice.unavailable_from,
            notice.reason.clone(),
        )
        .with_end(notice.unavailable_to);
        self.downtime_repo.insert(&interval)?;
        self.publisher.publish(
            FloorEvent::new(FloorEventType::DowntimeOpened, "MaintenanceFeed")
                .with_work_center(&notice.work_center_id)
                .with_detail(format!("计划内 {:.0} 分钟", notice.window_minutes())),
        );

        let constraint_type = if notice.is_labor_related() {
            ConstraintType::Labor
        } else {
            ConstraintType::Resource
        };
        let constraint = Constraint::new(
            constraint_type,
            ConstraintSeverity::High,
            format!("维保窗口: {}", notice.reason),
            "MAINTENANCE_FEED".to_string(),
        )
        .with_work_center(notice.work_center_id.clone());
        self.raise(constraint)
    }

    /// 物料可用度: CRITICAL => 物料关键约束 (阻塞),
    /// LOW => 中等约束提示, 其余忽略
    pub fn apply_material_notice(
        &self,
        notice: &MaterialNotice,
    ) -> LedgerResult<Option<Constraint>> {
        let severity = match notice.status {
            MaterialStatus::Critical => ConstraintSeverity::Critical,
            MaterialStatus::Low => ConstraintSeverity::Medium,
            MaterialStatus::Adequate | MaterialStatus::Excess => return Ok(None),
        };

        let mut constraint = Constraint::new(
            ConstraintType::Material,
            severity,
            format!("物料 {} 可用度 {}", notice.material_code, notice.status),
            "MATERIAL_FEED".to_string(),
        );
        if let Some(wc_id) = &notice.work_center_id {
            constraint = constraint.with_work_center(wc_id.clone());
        }
        if let Some(job_id) = &notice.job_id {
            constraint = constraint.with_jobs(vec![job_id.clone()]);
        }
        Ok(Some(self.raise(constraint)?))
    }

    /// 工装寿命: 剩余寿命低于阈值 => 工装约束
    pub fn apply_tool_wear(&self, reading: &ToolWearReading) -> LedgerResult<Option<Constraint>> {
        if reading.life_remaining_pct >= self.params.tool_wear_threshold_pct {
            return Ok(None);
        }
        // 寿命逼近告罄按关键处理
        let severity = if reading.life_remaining_pct < self.params.tool_wear_threshold_pct / 2.0 {
            ConstraintSeverity::Critical
        } else {
            ConstraintSeverity::High
        };
        let constraint = Constraint::new(
            ConstraintType::Tooling,
            severity,
            format!(
                "工装 {} 剩余寿命 {:.1}%",
                reading.tool_id, reading.life_remaining_pct
            ),
            "TOOL_WEAR_FEED".to_string(),
        )
        .with_work_center(reading.work_center_id.clone());
        Ok(Some(self.raise(constraint)?))
    }

    // ==========================================
    // 内部
    // ==========================================

    fn open_unplanned_downtime(
        &self,
        constraint: &Constraint,
        work_center_id: &str,
    ) -> LedgerResult<()> {
        let category = match constraint.constraint_type {
            ConstraintType::Resource => DowntimeCategory::Breakdown,
            ConstraintType::Material => DowntimeCategory::Material,
            ConstraintType::Tooling => DowntimeCategory::Tooling,
            _ => DowntimeCategory::Other,
        };
        let interval = DowntimeInterval::new(
            work_center_id.to_string(),
            DowntimeKind::Unplanned,
            category,
            constraint.raised_at,
            constraint.description.clone(),
        )
        .with_constraint(constraint.constraint_id.clone());
        self.downtime_repo.insert(&interval)?;
        self.publisher.publish(
            FloorEvent::new(FloorEventType::DowntimeOpened, "ConstraintEngine")
                .with_work_center(work_center_id)
                .with_constraint(&constraint.constraint_id),
        );
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::domain::types::{JobPriority, JobState, WorkCenterKind};
    use crate::domain::{Job, WorkCenter};
    use crate::engine::registry::WorkCenterRegistry;
    use crate::repository::{ActionLogRepository, WorkCenterRepository};
    use rusqlite::Connection;
    use std::sync::Mutex;

    struct Fixture {
        engine: ConstraintEngine,
        ledger: Arc<JobLedger>,
        downtime_repo: Arc<DowntimeRepository>,
    }

    fn setup() -> Fixture {
        let conn = Arc::new(Mutex::new(Connection::open_in_memory().expect("conn")));
        let job_repo = Arc::new(JobRepository::from_connection(conn.clone()).expect("job repo"));
        let constraint_repo =
            Arc::new(ConstraintRepository::from_connection(conn.clone()).expect("constraint repo"));
        let downtime_repo =
            Arc::new(DowntimeRepository::from_connection(conn.clone()).expect("downtime repo"));
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
                "CNC-02".to_string(),
                "二号加工中心".to_string(),
                WorkCenterKind::Machining,
                480.0,
            ))
            .expect("register");

        let ledger = Arc::new(JobLedger::new(
            job_repo.clone(),
            constraint_repo.clone(),
            registry,
            action_log_repo,
            OptionalEventPublisher::none(),
            3,
        ));
        let engine = ConstraintEngine::new(
            constraint_repo,
            downtime_repo.clone(),
            job_repo,
            ledger.clone(),
            OptionalEventPublisher::none(),
            SchedulingParams::default(),
        );
        Fixture {
            engine,
            ledger,
            downtime_repo,
        }
    }

    fn release_job(fx: &Fixture, job_no: &str) -> Job {
        let job = Job::new(
            job_no.to_string(),
            format!("WO-{}", job_no),
            "轴承座".to_string(),
            "CNC-02".to_string(),
            JobPriority::Normal,
            50,
            20.0,
            4.0,
        );
        fx.ledger.release(&job).expect("release")
    }

    fn now() -> NaiveDateTime {
        chrono::Utc::now().naive_utc()
    }

    #[test]
    fn test_critical_breakdown_blocks_and_opens_downtime() {
        let fx = setup();
        let job_a = release_job(&fx, "JOB-0001");
        let job_b = release_job(&fx, "JOB-0002");

        // 只给工作中心, 作业范围自动展开
        let raised = fx
            .engine
            .raise(
                Constraint::new(
                    ConstraintType::Resource,
                    ConstraintSeverity::Critical,
                    "主轴故障".to_string(),
                    "TELEMETRY".to_string(),
                )
                .with_work_center("CNC-02".to_string()),
            )
            .expect("raise");
        assert_eq!(raised.affected_job_ids.len(), 2);

        assert_eq!(fx.ledger.get(&job_a.job_id).expect("a").state, JobState::Blocked);
        assert_eq!(fx.ledger.get(&job_b.job_id).expect("b").state, JobState::Blocked);

        let open = fx.downtime_repo.list_open("CNC-02").expect("open");
        assert_eq!(open.len(), 1);
        assert_eq!(open[0].kind, DowntimeKind::Unplanned);
        assert_eq!(open[0].category, DowntimeCategory::Breakdown);
    }

    #[test]
    fn test_resolve_requires_note_and_unblocks() {
        let fx = setup();
        let job = release_job(&fx, "JOB-0001");

        let raised = fx
            .engine
            .raise(
                Constraint::new(
                    ConstraintType::Resource,
                    ConstraintSeverity::Critical,
                    "断刀".to_string(),
                    "TELEMETRY".to_string(),
                )
                .with_work_center("CNC-02".to_string()),
            )
            .expect("raise");

        // 无说明解除被拒
        let refused = fx.engine.resolve(&raised.constraint_id, None, "li.gong", now());
        assert!(matches!(refused, Err(LedgerError::Validation(_))));

        fx.engine
            .resolve(&raised.constraint_id, Some("换刀完成"), "li.gong", now())
            .expect("resolve");

        assert_eq!(
            fx.ledger.get(&job.job_id).expect("job").state,
            JobState::Scheduled
        );
        assert!(fx.downtime_repo.list_open("CNC-02").expect("open").is_empty());
    }

    #[test]
    fn test_job_stays_blocked_under_remaining_critical() {
        let fx = setup();
        let job = release_job(&fx, "JOB-0001");

        let first = fx
            .engine
            .raise(
                Constraint::new(
                    ConstraintType::Resource,
                    ConstraintSeverity::Critical,
                    "故障一".to_string(),
                    "TELEMETRY".to_string(),
                )
                .with_jobs(vec![job.job_id.clone()]),
            )
            .expect("raise");
        let _second = fx
            .engine
            .raise(
                Constraint::new(
                    ConstraintType::Material,
                    ConstraintSeverity::Critical,
                    "缺料".to_string(),
                    "MATERIAL_FEED".to_string(),
                )
                .with_jobs(vec![job.job_id.clone()]),
            )
            .expect("raise");

        fx.engine
            .resolve(&first.constraint_id, Some("已修复"), "op", now())
            .expect("resolve");
        // 另一条关键约束仍生效
        assert_eq!(
            fx.ledger.get(&job.job_id).expect("job").state,
            JobState::Blocked
        );
    }

    #[test]
    fn test_maintenance_notice_plans_downtime() {
        let fx = setup();
        let start = now() + chrono::Duration::hours(2);
        let notice = MaintenanceNotice {
            work_center_id: "CNC-02".to_string(),
            unavailable_from: start,
            unavailable_to: start + chrono::Duration::minutes(90),
            reason: "季度保养".to_string(),
        };

        let constraint = fx.engine.apply_maintenance_notice(&notice).expect("apply");
        assert_eq!(constraint.constraint_type, ConstraintType::Resource);
        assert_eq!(constraint.severity, ConstraintSeverity::High);

        let intervals = fx
            .downtime_repo
            .list_overlapping("CNC-02", start, start + chrono::Duration::minutes(90))
            .expect("overlap");
        assert_eq!(intervals.len(), 1);
        assert_eq!(intervals[0].kind, DowntimeKind::Planned);
        assert!(!intervals[0].is_open());
    }

    #[test]
    fn test_labor_maintenance_notice_typed_labor() {
        let fx = setup();
        let start = now();
        let notice = MaintenanceNotice {
            work_center_id: "CNC-02".to_string(),
            unavailable_from: start,
            unavailable_to: start + chrono::Duration::minutes(60),
            reason: "operator shortage".to_string(),
        };
        let constraint = fx.engine.apply_maintenance_notice(&notice).expect("apply");
        assert_eq!(constraint.constraint_type, ConstraintType::Labor);
    }

    #[test]
    fn test_material_notice_thresholds() {
        let fx = setup();
        let job = release_job(&fx, "JOB-0001");

        let adequate = MaterialNotice {
            work_center_id: None,
            job_id: Some(job.job_id.clone()),
            material_code: "MAT-042".to_string(),
            status: MaterialStatus::Adequate,
            timestamp: now(),
        };
        assert!(fx.engine.apply_material_notice(&adequate).expect("apply").is_none());

        let critical = MaterialNotice {
            status: MaterialStatus::Critical,
            ..adequate.clone()
        };
        let constraint = fx
            .engine
            .apply_material_notice(&critical)
            .expect("apply")
            .expect("constraint");
        assert_eq!(constraint.severity, ConstraintSeverity::Critical);
        assert_eq!(
            fx.ledger.get(&job.job_id).expect("job").state,
            JobState::Blocked
        );
    }

    #[test]
    fn test_tool_wear_threshold() {
        let fx = setup();
        release_job(&fx, "JOB-0001");

        let healthy = ToolWearReading {
            work_center_id: "CNC-02".to_string(),
            tool_id: "T-17".to_string(),
            life_remaining_pct: 55.0,
            timestamp: now(),
        };
        assert!(fx.engine.apply_tool_wear(&healthy).expect("apply").is_none());

        // 默认阈值 10%: 8% 记高严重度
        let worn = ToolWearReading {
            life_remaining_pct: 8.0,
            ..healthy.clone()
        };
        let constraint = fx
            .engine
            .apply_tool_wear(&worn)
            .expect("apply")
            .expect("constraint");
        assert_eq!(constraint.constraint_type, ConstraintType::Tooling);
        assert_eq!(constraint.severity, ConstraintSeverity::High);

        // 阈值一半以下升级为关键
        let nearly_dead = ToolWearReading {
            life_remaining_pct: 3.0,
            ..healthy
        };
        let constraint = fx
            .engine
            .apply_tool_wear(&nearly_dead)
            .expect("apply")
            .expect("constraint");
        assert_eq!(constraint.severity, ConstraintSeverity::Critical);
    }

    #[test]
    fn test_raise_requires_scope() {
        let fx = setup();
        let unscoped = Constraint::new(
            ConstraintType::Sequence,
            ConstraintSeverity::Low,
            "前序未完".to_string(),
            "op".to_string(),
        );
        let result = fx.engine.raise(unscoped);
        assert!(matches!(result, Err(LedgerError::Validation(_))));
    }
}
