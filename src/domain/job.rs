// ==========================================
// 车间有限产能排产核心 - 作业领域模型
// ==========================================
// 红线: 状态迁移只经由 JobLedger, 不在此处变更状态
// 说明: 作业进度百分比与工作中心利用率是两个字段, 永不混用
// ==========================================

use crate::domain::types::{JobPriority, JobState};
use chrono::NaiveDateTime;
use serde::{Deserialize, Serialize};

// ==========================================
// Job - 排产作业
// ==========================================
// 用途: 工单释放后进入排产的最小调度单元
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Job {
    // ===== 标识 =====
    pub job_id: String,            // 作业ID (UUID)
    pub job_no: String,            // 作业编号 (如 "JOB-2026-0001")
    pub work_order_no: String,     // 关联工单号
    pub product: String,           // 目标产品

    // ===== 排产指派 =====
    pub work_center_id: String,    // 当前指派工作中心
    pub priority: JobPriority,     // 优先级
    pub state: JobState,           // 当前状态

    // ===== 计划/实际时间 =====
    pub scheduled_start: Option<NaiveDateTime>, // 计划开始
    pub scheduled_end: Option<NaiveDateTime>,   // 计划结束
    pub actual_start: Option<NaiveDateTime>,    // 实际开始
    pub actual_end: Option<NaiveDateTime>,      // 实际结束

    // ===== 数量 =====
    pub target_qty: i64,           // 目标数量
    pub completed_qty: i64,        // 已完成数量

    // ===== 节拍参数 =====
    pub setup_minutes: f64,        // 换型准备时间 (分钟)
    pub planned_cycle_minutes: f64, // 计划单件节拍 (分钟/件)
    pub actual_cycle_minutes: Option<f64>, // 实际单件节拍 (分钟/件)

    // ===== 并发控制 =====
    pub revision: i64,             // 乐观锁修订号

    // ===== 审计 =====
    pub created_at: NaiveDateTime, // 创建时间
    pub updated_at: NaiveDateTime, // 更新时间
}

impl Job {
    /// 创建新作业（初始 SCHEDULED, 未指派时刻）
    pub fn new(
        job_no: String,
        work_order_no: String,
        product: String,
        work_center_id: String,
        priority: JobPriority,
        target_qty: i64,
        setup_minutes: f64,
        planned_cycle_minutes: f64,
    ) -> Self {
        let now = chrono::Utc::now().naive_utc();
        Self {
            job_id: uuid::Uuid::new_v4().to_string(),
            job_no,
            work_order_no,
            product,
            work_center_id,
            priority,
            state: JobState::Scheduled,
            scheduled_start: None,
            scheduled_end: None,
            actual_start: None,
            actual_end: None,
            target_qty,
            completed_qty: 0,
            setup_minutes,
            planned_cycle_minutes,
            actual_cycle_minutes: None,
            revision: 0,
            created_at: now,
            updated_at: now,
        }
    }

    /// 作业进度百分比 (完成数量/目标数量)
    ///
    /// # 返回
    /// 0.0 - 100.0; 目标数量为 0 时返回 0.0
    pub fn progress_pct(&self) -> f64 {
        if self.target_qty <= 0 {
            return 0.0;
        }
        (self.completed_qty as f64 / self.target_qty as f64) * 100.0
    }

    /// 加工时长 (分钟) = 目标数量 × 计划节拍
    pub fn duration_minutes(&self) -> f64 {
        self.target_qty as f64 * self.planned_cycle_minutes
    }

    /// 排产占用块 (分钟) = 换型 + 加工, 作为不可抢占的整体
    pub fn block_minutes(&self) -> f64 {
        self.setup_minutes + self.duration_minutes()
    }

    /// 剩余负载分配 (分钟)
    ///
    /// 吸收态为 0; 未开工为完整占用块; 进行中按剩余数量折算
    pub fn remaining_allocation_minutes(&self) -> f64 {
        if self.state.is_terminal() {
            return 0.0;
        }
        if self.actual_start.is_none() {
            return self.block_minutes();
        }
        let remaining_qty = (self.target_qty - self.completed_qty).max(0);
        remaining_qty as f64 * self.planned_cycle_minutes
    }

    /// 数量已达标
    pub fn is_quantity_fulfilled(&self) -> bool {
        self.completed_qty >= self.target_qty
    }
}
