// ==========================================
// 车间有限产能排产核心 - 排产器
// ==========================================
// 策略: 同一输入产出同一计划 (确定性贪心打包)
// 排序键: 优先级降序 -> 计划开始升序 -> 作业ID升序
// 红线: 超出产能窗口的作业顺延, 永不丢弃
// 红线: 进行中作业钉死, 不改派不重排
// 红线: 排产以增量落地, 未变化的作业不写库
// ==========================================

use crate::config::SchedulingParams;
use crate::domain::types::JobState;
use crate::domain::{Job, WorkCenter};
use crate::engine::events::{FloorEvent, FloorEventType, OptionalEventPublisher};
use crate::engine::ledger::{JobLedger, LedgerResult};
use crate::engine::registry::WorkCenterRegistry;
use crate::repository::JobRepository;
use chrono::{Duration, NaiveDateTime, Timelike};
use serde::{Deserialize, Serialize};
use std::collections::{BTreeMap, HashSet};
use std::sync::Arc;
use uuid::Uuid;

// ==========================================
// 重排范围
// ==========================================
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ReoptimizeScope {
    /// 全车间
    All,
    /// 单个工作中心
    WorkCenter(String),
    /// 指定作业 (按其当前指派的工作中心展开)
    Jobs(Vec<String>),
}

// ==========================================
// 排产增量
// ==========================================

/// 单条排产指派
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct JobAssignment {
    pub job_id: String,
    pub job_no: String,
    pub work_center_id: String,
    pub scheduled_start: NaiveDateTime,
    pub scheduled_end: NaiveDateTime,
    /// 顺延: 计划开始已越过产能窗口末端
    pub pushed_out: bool,
}

/// 一轮规划的增量输出 (只含计划变化的作业)
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ScheduleDelta {
    pub delta_id: String,
    pub generated_at: NaiveDateTime,
    pub assignments: Vec<JobAssignment>,
    /// 计划未变化而跳过的作业数
    pub unchanged: usize,
    /// 钉死跳过的进行中作业数
    pub pinned: usize,
}

impl ScheduleDelta {
    pub fn is_empty(&self) -> bool {
        self.assignments.is_empty()
    }
}

// ==========================================
// Scheduler - 排产器
// ==========================================
pub struct Scheduler {
    job_repo: Arc<JobRepository>,
    registry: Arc<WorkCenterRegistry>,
    ledger: Arc<JobLedger>,
    publisher: OptionalEventPublisher,
    params: SchedulingParams,
}

impl Scheduler {
    pub fn new(
        job_repo: Arc<JobRepository>,
        registry: Arc<WorkCenterRegistry>,
        ledger: Arc<JobLedger>,
        publisher: OptionalEventPublisher,
        params: SchedulingParams,
    ) -> Self {
        Self {
            job_repo,
            registry,
            ledger,
            publisher,
            params,
        }
    }

    // ==========================================
    // 规划
    // ==========================================

    /// 生成排产增量 (纯计算, 不落库)
    ///
    /// 受影响工作中心上的全部可排作业参与打包;
    /// BLOCKED 作业留在原位不参与, 进行中作业按剩余
    /// 负载占住队首
    pub fn plan(&self, scope: &ReoptimizeScope, now: NaiveDateTime) -> LedgerResult<ScheduleDelta> {
        // 落库列格式只到秒, 整秒对齐保证重排时计划时刻原样回读
        let now = now.with_nanosecond(0).unwrap_or(now);
        let centers = self.affected_centers(scope)?;
        let mut assignments = Vec::new();
        let mut unchanged = 0;
        let mut pinned = 0;

        for wc in centers.values() {
            if !wc.accepts_new_assignments() {
                tracing::warn!(work_center_id = %wc.work_center_id, "工作中心不接收新排产, 跳过");
                continue;
            }

            let jobs = self.job_repo.list_by_work_center(&wc.work_center_id)?;

            // 进行中作业按剩余负载占住队首
            let mut cursor = now;
            for job in jobs.iter().filter(|j| j.state == JobState::InProgress) {
                cursor += minutes(job.remaining_allocation_minutes());
                pinned += 1;
            }

            let mut candidates: Vec<&Job> = jobs
                .iter()
                .filter(|j| matches!(j.state, JobState::Scheduled | JobState::Delayed))
                .collect();
            candidates.sort_by(|a, b| {
                b.priority
                    .cmp(&a.priority)
                    .then_with(|| compare_start(a.scheduled_start, b.scheduled_start))
                    .then_with(|| a.job_id.cmp(&b.job_id))
            });

            // 顺延边界: 额定产能与计划窗口取小者
            let horizon = wc.capacity_minutes.min(self.params.planning_window_minutes);
            let window_end = now + minutes(horizon);
            for job in candidates {
                let start = cursor;
                let end = start + minutes(job.block_minutes());
                cursor = end;

                if same_minute(job.scheduled_start, start) && same_minute(job.scheduled_end, end) {
                    unchanged += 1;
                    continue;
                }
                if start >= window_end {
                    tracing::warn!(
                        job_no = %job.job_no,
                        work_center_id = %wc.work_center_id,
                        "产能不足, 作业顺延至窗口之外"
                    );
                }
                assignments.push(JobAssignment {
                    job_id: job.job_id.clone(),
                    job_no: job.job_no.clone(),
                    work_center_id: wc.work_center_id.clone(),
                    scheduled_start: start,
                    scheduled_end: end,
                    pushed_out: start >= window_end,
                });
            }
        }

        Ok(ScheduleDelta {
            delta_id: Uuid::new_v4().to_string(),
            generated_at: now,
            assignments,
            unchanged,
            pinned,
        })
    }

    /// 应用排产增量
    ///
    /// # 返回
    /// 实际落库的指派条数
    pub fn apply(&self, delta: &ScheduleDelta) -> LedgerResult<usize> {
        let mut applied = 0;
        for assignment in &delta.assignments {
            self.ledger.apply_assignment(
                &assignment.job_id,
                &assignment.work_center_id,
                assignment.scheduled_start,
                assignment.scheduled_end,
            )?;
            applied += 1;
        }

        if applied > 0 {
            tracing::info!(delta_id = %delta.delta_id, applied, "排产增量已应用");
            self.publisher.publish(
                FloorEvent::new(FloorEventType::ScheduleApplied, "Scheduler")
                    .with_detail(format!("指派 {} 条 (delta {})", applied, delta.delta_id)),
            );
        }
        Ok(applied)
    }

    /// 规划并落地
    pub fn reoptimize(
        &self,
        scope: &ReoptimizeScope,
        now: NaiveDateTime,
    ) -> LedgerResult<ScheduleDelta> {
        let delta = self.plan(scope, now)?;
        self.apply(&delta)?;
        Ok(delta)
    }

    // ==========================================
    // 内部
    // ==========================================

    /// 范围展开为工作中心集合 (BTreeMap 保证遍历顺序确定)
    fn affected_centers(
        &self,
        scope: &ReoptimizeScope,
    ) -> LedgerResult<BTreeMap<String, WorkCenter>> {
        let mut centers = BTreeMap::new();
        match scope {
            ReoptimizeScope::All => {
                for wc in self.registry.list()? {
                    centers.insert(wc.work_center_id.clone(), wc);
                }
            }
            ReoptimizeScope::WorkCenter(id) => {
                let wc = self.registry.get(id)?;
                centers.insert(wc.work_center_id.clone(), wc);
            }
            ReoptimizeScope::Jobs(job_ids) => {
                let mut wc_ids = HashSet::new();
                for job_id in job_ids {
                    let job = self.ledger.get(job_id)?;
                    wc_ids.insert(job.work_center_id);
                }
                for wc_id in wc_ids {
                    let wc = self.registry.get(&wc_id)?;
                    centers.insert(wc.work_center_id.clone(), wc);
                }
            }
        }
        Ok(centers)
    }
}

fn minutes(m: f64) -> Duration {
    Duration::seconds((m * 60.0).round() as i64)
}

fn compare_start(a: Option<NaiveDateTime>, b: Option<NaiveDateTime>) -> std::cmp::Ordering {
    match (a, b) {
        (Some(x), Some(y)) => x.cmp(&y),
        (Some(_), None) => std::cmp::Ordering::Less,
        (None, Some(_)) => std::cmp::Ordering::Greater,
        (None, None) => std::cmp::Ordering::Equal,
    }
}

fn same_minute(a: Option<NaiveDateTime>, b: NaiveDateTime) -> bool {
    a.map(|x| (x - b).num_seconds().abs() < 60).unwrap_or(false)
}
