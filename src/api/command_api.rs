// ==========================================
// 车间有限产能排产核心 - 指令接口
// ==========================================
// 职责: 操作员/上游系统的全部写入口
// 红线: 每条指令落一条操作日志 (谁/何时/何动作/何对象)
// 红线: 指令校验失败必须带显式原因拒绝
// ==========================================

use crate::api::error::{ApiError, ApiResult};
use crate::domain::types::{ConstraintSeverity, ConstraintType, JobPriority};
use crate::domain::{
    ActionLog, ActionType, Constraint, Job, MachineSignal, MaintenanceNotice, MaterialNotice,
    ToolWearReading, WorkCenter,
};
use crate::engine::{
    ConstraintEngine, IngestOutcome, JobLedger, ReoptimizeScope, ScheduleDelta, Scheduler,
    TelemetryIngestor, WorkCenterRegistry,
};
use crate::repository::ActionLogRepository;
use chrono::NaiveDateTime;
use serde::{Deserialize, Serialize};
use std::sync::Arc;

// ==========================================
// 指令载荷
// ==========================================

/// 工单释放请求
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ReleaseJobRequest {
    pub job_no: String,
    pub work_order_no: String,
    pub product: String,
    pub work_center_id: String,
    pub priority: JobPriority,
    pub target_qty: i64,
    pub setup_minutes: f64,
    pub planned_cycle_minutes: f64,
}

/// 约束上报请求
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ReportConstraintRequest {
    pub constraint_type: ConstraintType,
    pub severity: ConstraintSeverity,
    pub description: String,
    pub work_center_id: Option<String>,
    pub job_ids: Vec<String>,
}

// ==========================================
// CommandApi - 指令接口
// ==========================================
pub struct CommandApi {
    registry: Arc<WorkCenterRegistry>,
    ledger: Arc<JobLedger>,
    constraint_engine: Arc<ConstraintEngine>,
    scheduler: Arc<Scheduler>,
    ingestor: Arc<TelemetryIngestor>,
    action_log_repo: Arc<ActionLogRepository>,
}

impl CommandApi {
    pub fn new(
        registry: Arc<WorkCenterRegistry>,
        ledger: Arc<JobLedger>,
        constraint_engine: Arc<ConstraintEngine>,
        scheduler: Arc<Scheduler>,
        ingestor: Arc<TelemetryIngestor>,
        action_log_repo: Arc<ActionLogRepository>,
    ) -> Self {
        Self {
            registry,
            ledger,
            constraint_engine,
            scheduler,
            ingestor,
            action_log_repo,
        }
    }

    // ==========================================
    // 工作中心管理
    // ==========================================

    /// 注册工作中心
    pub fn register_work_center(&self, work_center: &WorkCenter) -> ApiResult<()> {
        if work_center.work_center_id.trim().is_empty() {
            return Err(ApiError::Validation("工作中心代码不能为空".to_string()));
        }
        if work_center.capacity_minutes <= 0.0 {
            return Err(ApiError::Validation(format!(
                "额定产能必须为正数: {}",
                work_center.capacity_minutes
            )));
        }
        self.registry.register(work_center)?;
        Ok(())
    }

    /// 管理操作: 调整额定产能
    pub fn update_capacity(&self, work_center_id: &str, capacity_minutes: f64) -> ApiResult<()> {
        self.registry.update_capacity(work_center_id, capacity_minutes)?;
        Ok(())
    }

    /// 停用工作中心
    pub fn deactivate_work_center(&self, work_center_id: &str) -> ApiResult<()> {
        self.registry.deactivate(work_center_id)?;
        Ok(())
    }

    // ==========================================
    // 作业指令
    // ==========================================

    /// 工单释放为作业
    pub fn release_job(&self, request: &ReleaseJobRequest) -> ApiResult<Job> {
        if request.job_no.trim().is_empty() {
            return Err(ApiError::Validation("作业编号不能为空".to_string()));
        }
        if request.target_qty <= 0 {
            return Err(ApiError::Validation(format!(
                "目标数量必须为正数: {}",
                request.target_qty
            )));
        }
        if request.planned_cycle_minutes <= 0.0 {
            return Err(ApiError::Validation(format!(
                "计划节拍必须为正数: {}",
                request.planned_cycle_minutes
            )));
        }

        let job = Job::new(
            request.job_no.clone(),
            request.work_order_no.clone(),
            request.product.clone(),
            request.work_center_id.clone(),
            request.priority,
            request.target_qty,
            request.setup_minutes.max(0.0),
            request.planned_cycle_minutes,
        );
        Ok(self.ledger.release(&job)?)
    }

    /// 开工
    pub fn start_job(&self, job_id: &str, actor: &str, now: NaiveDateTime) -> ApiResult<Job> {
        Ok(self.ledger.start(job_id, actor, now)?)
    }

    /// 暂停
    pub fn pause_job(&self, job_id: &str, actor: &str) -> ApiResult<Job> {
        Ok(self.ledger.pause(job_id, actor)?)
    }

    /// 完工 (数量未达标时必须带原因)
    pub fn complete_job(
        &self,
        job_id: &str,
        actor: &str,
        override_reason: Option<&str>,
        now: NaiveDateTime,
    ) -> ApiResult<Job> {
        Ok(self.ledger.complete(job_id, actor, override_reason, now)?)
    }

    /// 取消
    pub fn cancel_job(&self, job_id: &str, actor: &str, reason: &str) -> ApiResult<Job> {
        Ok(self.ledger.cancel(job_id, actor, reason)?)
    }

    /// 产出进度上报
    pub fn report_progress(&self, job_id: &str, completed_qty: i64) -> ApiResult<Job> {
        Ok(self.ledger.record_progress(job_id, completed_qty)?)
    }

    // ==========================================
    // 约束指令
    // ==========================================

    /// 人工上报约束
    pub fn report_constraint(
        &self,
        request: &ReportConstraintRequest,
        actor: &str,
    ) -> ApiResult<Constraint> {
        let mut constraint = Constraint::new(
            request.constraint_type,
            request.severity,
            request.description.clone(),
            actor.to_string(),
        );
        if let Some(wc_id) = &request.work_center_id {
            constraint = constraint.with_work_center(wc_id.clone());
        }
        if !request.job_ids.is_empty() {
            constraint = constraint.with_jobs(request.job_ids.clone());
        }

        let raised = self.constraint_engine.raise(constraint)?;
        self.log(
            ActionLog::new(ActionType::ReportConstraint, actor.to_string())
                .with_detail(format!(
                    "{} {} ({})",
                    raised.severity, raised.description, raised.constraint_id
                )),
        );
        Ok(raised)
    }

    /// 解除约束
    pub fn resolve_constraint(
        &self,
        constraint_id: &str,
        note: Option<&str>,
        actor: &str,
        now: NaiveDateTime,
    ) -> ApiResult<Constraint> {
        let resolved = self
            .constraint_engine
            .resolve(constraint_id, note, actor, now)?;
        self.log(
            ActionLog::new(ActionType::ResolveConstraint, actor.to_string())
                .with_detail(format!("约束 {} 已解除", constraint_id)),
        );
        Ok(resolved)
    }

    // ==========================================
    // 排产指令
    // ==========================================

    /// 触发重排产并应用增量
    pub fn reoptimize(
        &self,
        scope: &ReoptimizeScope,
        actor: &str,
        now: NaiveDateTime,
    ) -> ApiResult<ScheduleDelta> {
        let delta = self.scheduler.reoptimize(scope, now)?;
        self.log(
            ActionLog::new(ActionType::Reoptimize, actor.to_string()).with_detail(format!(
                "指派 {} 条, 未变 {} 条, 钉死 {} 条",
                delta.assignments.len(),
                delta.unchanged,
                delta.pinned
            )),
        );
        Ok(delta)
    }

    // ==========================================
    // 外部数据入口
    // ==========================================

    /// 接收遥测信号; 乱序信号以 StaleSignal 拒绝
    pub fn ingest_signal(&self, signal: &MachineSignal) -> ApiResult<()> {
        match self.ingestor.ingest(signal)? {
            IngestOutcome::Accepted => Ok(()),
            IngestOutcome::RejectedStale => Err(ApiError::StaleSignal(format!(
                "来源 {} 时间戳 {} 未前进",
                signal.work_center_id, signal.timestamp
            ))),
        }
    }

    /// 维保窗口通知
    pub fn apply_maintenance_notice(&self, notice: &MaintenanceNotice) -> ApiResult<Constraint> {
        Ok(self.constraint_engine.apply_maintenance_notice(notice)?)
    }

    /// 物料可用度通知
    pub fn apply_material_notice(&self, notice: &MaterialNotice) -> ApiResult<Option<Constraint>> {
        Ok(self.constraint_engine.apply_material_notice(notice)?)
    }

    /// 工装寿命读数
    pub fn apply_tool_wear(&self, reading: &ToolWearReading) -> ApiResult<Option<Constraint>> {
        Ok(self.constraint_engine.apply_tool_wear(reading)?)
    }

    // 审计写入失败不阻断业务
    fn log(&self, log: ActionLog) {
        if let Err(e) = self.action_log_repo.insert(&log) {
            tracing::error!("操作日志写入失败: {}", e);
        }
    }
}
