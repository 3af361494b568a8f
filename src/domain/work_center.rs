// ==========================================
// 车间有限产能排产核心 - 工作中心领域模型
// ==========================================
// 红线: 产能变更只走管理操作, 不从遥测推断
// 红线: 只停用不删除
// ==========================================

use crate::domain::types::{WorkCenterKind, WorkCenterStatus};
use chrono::NaiveDateTime;
use serde::{Deserialize, Serialize};

// ==========================================
// WorkCenter - 工作中心
// ==========================================
// 用途: 静态产能事实 + 实时负载/健康度
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct WorkCenter {
    // ===== 标识 =====
    pub work_center_id: String,    // 工作中心代码 (如 "CNC-01")
    pub name: String,              // 显示名称
    pub kind: WorkCenterKind,      // 类别
    pub status: WorkCenterStatus,  // 当前状态

    // ===== 产能参数 =====
    pub capacity_minutes: f64,     // 计划窗口额定产能 (分钟)

    // ===== 实时负载 =====
    pub load_minutes: f64,         // 已承诺负载 (分钟)

    // ===== 滚动指标 =====
    pub efficiency: f64,           // 历史实际/理想节拍比
    pub availability: f64,         // 运行时间/计划时间
    pub health_score: f64,         // 滚动健康度 (0-100)

    // ===== 审计 =====
    pub created_at: NaiveDateTime, // 创建时间
    pub updated_at: NaiveDateTime, // 更新时间
}

impl WorkCenter {
    /// 创建新的工作中心（默认运行状态、空负载、满健康度）
    pub fn new(
        work_center_id: String,
        name: String,
        kind: WorkCenterKind,
        capacity_minutes: f64,
    ) -> Self {
        let now = chrono::Utc::now().naive_utc();
        Self {
            work_center_id,
            name,
            kind,
            status: WorkCenterStatus::Active,
            capacity_minutes,
            load_minutes: 0.0,
            efficiency: 1.0,
            availability: 1.0,
            health_score: 100.0,
            created_at: now,
            updated_at: now,
        }
    }

    /// 利用率 = 负载/产能
    ///
    /// # 返回
    /// 比例值（0.0 起，不封顶）；超过 1.0 表示超额承诺，属于有效告警信号
    pub fn utilization(&self) -> f64 {
        if self.capacity_minutes <= 0.0 {
            return 0.0;
        }
        self.load_minutes / self.capacity_minutes
    }

    /// 剩余可排产能（分钟，下限 0）
    pub fn remaining_capacity_minutes(&self) -> f64 {
        (self.capacity_minutes - self.load_minutes).max(0.0)
    }

    /// 是否可接收新排产（仅运行状态）
    pub fn accepts_new_assignments(&self) -> bool {
        self.status == WorkCenterStatus::Active
    }
}
