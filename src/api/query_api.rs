// ==========================================
// 车间有限产能排产核心 - 查询接口
// ==========================================
// 职责: 车间状态的全部读出口 (实体快照 + 事件订阅)
// 红线: OEE 指标缺失分母时拒绝给数, 以 UndefinedMetric 明示
// ==========================================

use crate::api::error::{ApiError, ApiResult};
use crate::domain::{
    ActionLog, Constraint, DowntimeInterval, Job, OeeSnapshot, WorkCenter,
};
use crate::engine::{
    BusStats, EventBus, FloorEvent, IngestStats, JobLedger, OeeCalculator, TelemetryIngestor,
    WorkCenterRegistry,
};
use crate::repository::{ActionLogRepository, ConstraintFilter, ConstraintRepository, DowntimeRepository};
use chrono::NaiveDateTime;
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use tokio::sync::broadcast;

// ==========================================
// 查询载荷
// ==========================================

/// OEE 指标项
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum OeeMetric {
    Availability,
    Performance,
    Quality,
    Oee,
}

/// 单工作中心车间视图
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct FloorView {
    pub work_center: WorkCenter,
    /// 利用率 (不封顶; > 1.0 为超额承诺)
    pub utilization: f64,
    pub jobs: Vec<Job>,
    pub active_constraints: Vec<Constraint>,
    pub open_downtime: Vec<DowntimeInterval>,
    pub latest_oee: Option<OeeSnapshot>,
}

// ==========================================
// QueryApi - 查询接口
// ==========================================
pub struct QueryApi {
    registry: Arc<WorkCenterRegistry>,
    ledger: Arc<JobLedger>,
    constraint_repo: Arc<ConstraintRepository>,
    downtime_repo: Arc<DowntimeRepository>,
    action_log_repo: Arc<ActionLogRepository>,
    oee_calculator: Arc<OeeCalculator>,
    ingestor: Arc<TelemetryIngestor>,
    bus: Arc<EventBus>,
}

impl QueryApi {
    #[allow(clippy::too_many_arguments)]
    pub fn new(
        registry: Arc<WorkCenterRegistry>,
        ledger: Arc<JobLedger>,
        constraint_repo: Arc<ConstraintRepository>,
        downtime_repo: Arc<DowntimeRepository>,
        action_log_repo: Arc<ActionLogRepository>,
        oee_calculator: Arc<OeeCalculator>,
        ingestor: Arc<TelemetryIngestor>,
        bus: Arc<EventBus>,
    ) -> Self {
        Self {
            registry,
            ledger,
            constraint_repo,
            downtime_repo,
            action_log_repo,
            oee_calculator,
            ingestor,
            bus,
        }
    }

    // ==========================================
    // 实体快照
    // ==========================================

    pub fn get_work_center(&self, work_center_id: &str) -> ApiResult<WorkCenter> {
        Ok(self.registry.get(work_center_id)?)
    }

    pub fn list_work_centers(&self) -> ApiResult<Vec<WorkCenter>> {
        Ok(self.registry.list()?)
    }

    pub fn get_job(&self, job_id: &str) -> ApiResult<Job> {
        Ok(self.ledger.get(job_id)?)
    }

    pub fn list_jobs(&self) -> ApiResult<Vec<Job>> {
        Ok(self.ledger.list()?)
    }

    pub fn list_constraints(&self, filter: &ConstraintFilter) -> ApiResult<Vec<Constraint>> {
        Ok(self.constraint_repo.list(filter)?)
    }

    pub fn list_active_constraints_for_job(&self, job_id: &str) -> ApiResult<Vec<Constraint>> {
        Ok(self.constraint_repo.list_active_for_job(job_id)?)
    }

    pub fn list_downtime(
        &self,
        work_center_id: &str,
        window_start: NaiveDateTime,
        window_end: NaiveDateTime,
    ) -> ApiResult<Vec<DowntimeInterval>> {
        Ok(self
            .downtime_repo
            .list_overlapping(work_center_id, window_start, window_end)?)
    }

    pub fn list_action_logs(&self, limit: usize) -> ApiResult<Vec<ActionLog>> {
        Ok(self.action_log_repo.list_recent(limit)?)
    }

    pub fn list_action_logs_for_job(&self, job_id: &str) -> ApiResult<Vec<ActionLog>> {
        Ok(self.action_log_repo.list_by_job(job_id)?)
    }

    // ==========================================
    // OEE 查询
    // ==========================================

    /// 最近一次 OEE 快照 (含未定义指标的原始计数器)
    pub fn get_latest_oee(&self, work_center_id: &str) -> ApiResult<OeeSnapshot> {
        self.oee_calculator
            .latest(work_center_id)?
            .ok_or_else(|| ApiError::NotFound(format!("OeeSnapshot(工作中心={})", work_center_id)))
    }

    /// 读取单项 OEE 指标数值
    ///
    /// 缺失分母的指标不给数, 以 UndefinedMetric 明示
    pub fn get_oee_value(&self, work_center_id: &str, metric: OeeMetric) -> ApiResult<f64> {
        let snapshot = self.get_latest_oee(work_center_id)?;
        let (value, label) = match metric {
            OeeMetric::Availability => (snapshot.availability, "可用率"),
            OeeMetric::Performance => (snapshot.performance, "表现率"),
            OeeMetric::Quality => (snapshot.quality, "质量率"),
            OeeMetric::Oee => (snapshot.oee, "OEE"),
        };
        value.ok_or_else(|| {
            ApiError::UndefinedMetric(format!(
                "{} (工作中心={}, 窗口 {} ~ {})",
                label, work_center_id, snapshot.window_start, snapshot.window_end
            ))
        })
    }

    // ==========================================
    // 车间视图
    // ==========================================

    /// 单工作中心聚合视图
    pub fn floor_snapshot(&self, work_center_id: &str) -> ApiResult<FloorView> {
        let work_center = self.registry.get(work_center_id)?;
        let jobs = self.ledger.list_open_by_work_center(work_center_id)?;
        let active_constraints = self.constraint_repo.list(&ConstraintFilter {
            active: Some(true),
            work_center_id: Some(work_center_id.to_string()),
            ..Default::default()
        })?;
        let open_downtime = self.downtime_repo.list_open(work_center_id)?;
        let latest_oee = self.oee_calculator.latest(work_center_id)?;
        let utilization = work_center.utilization();

        Ok(FloorView {
            work_center,
            utilization,
            jobs,
            active_constraints,
            open_downtime,
            latest_oee,
        })
    }

    // ==========================================
    // 事件流
    // ==========================================

    /// 订阅实时车间事件
    pub fn subscribe(&self) -> broadcast::Receiver<FloorEvent> {
        self.bus.subscribe()
    }

    /// 最近缓冲事件回放
    pub fn recent_events(&self, limit: usize) -> Vec<FloorEvent> {
        self.bus.recent(limit)
    }

    /// 总线统计
    pub fn bus_stats(&self) -> BusStats {
        self.bus.stats()
    }

    /// 遥测接收统计
    pub fn ingest_stats(&self) -> IngestStats {
        self.ingestor.stats()
    }
}
