// ==========================================
// 车间有限产能排产核心 - 约束领域模型
// ==========================================
// 红线: 约束只能显式解除, 永不静默过期
// 红线: CRITICAL 约束强制关联作业进入 BLOCKED
// ==========================================

use crate::domain::types::{ConstraintSeverity, ConstraintType};
use chrono::NaiveDateTime;
use serde::{Deserialize, Serialize};
use uuid::Uuid;

// ==========================================
// Constraint - 运行约束
// ==========================================
// 来源: 遥测阈值 / 维保与物料数据 / 人工上报
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Constraint {
    // ===== 标识 =====
    pub constraint_id: String,           // 约束ID (UUID)
    pub constraint_type: ConstraintType, // 类型
    pub severity: ConstraintSeverity,    // 严重度

    // ===== 影响范围 =====
    pub work_center_id: Option<String>,  // 来源工作中心
    pub affected_job_ids: Vec<String>,   // 关联(阻塞/降级)作业

    // ===== 描述 =====
    pub description: String,             // 描述
    pub raised_by: String,               // 上报来源 (操作员或系统源)

    // ===== 解除 =====
    pub active: bool,                    // 是否有效
    pub resolution_note: Option<String>, // 处理说明
    pub resolved_by: Option<String>,     // 解除人

    // ===== 时间 =====
    pub raised_at: NaiveDateTime,        // 上报时间
    pub resolved_at: Option<NaiveDateTime>, // 解除时间
}

impl Constraint {
    /// 创建新约束（生效状态, 自动生成 UUID 与时间戳）
    pub fn new(
        constraint_type: ConstraintType,
        severity: ConstraintSeverity,
        description: String,
        raised_by: String,
    ) -> Self {
        Self {
            constraint_id: Uuid::new_v4().to_string(),
            constraint_type,
            severity,
            work_center_id: None,
            affected_job_ids: Vec::new(),
            description,
            raised_by,
            active: true,
            resolution_note: None,
            resolved_by: None,
            raised_at: chrono::Utc::now().naive_utc(),
            resolved_at: None,
        }
    }

    /// 设置来源工作中心
    pub fn with_work_center(mut self, work_center_id: String) -> Self {
        self.work_center_id = Some(work_center_id);
        self
    }

    /// 设置关联作业
    pub fn with_jobs(mut self, job_ids: Vec<String>) -> Self {
        self.affected_job_ids = job_ids;
        self
    }

    /// 是否为阻塞性约束（有效且 CRITICAL）
    pub fn is_blocking(&self) -> bool {
        self.active && self.severity == ConstraintSeverity::Critical
    }

    /// 是否关联指定作业
    pub fn affects_job(&self, job_id: &str) -> bool {
        self.affected_job_ids.iter().any(|id| id == job_id)
    }
}
