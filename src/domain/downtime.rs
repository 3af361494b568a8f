// ==========================================
// 车间有限产能排产核心 - 停机区间领域模型
// ==========================================
// 用途: 可用率的时间依据; 维保窗口落为计划内停机,
//       故障约束开启计划外停机并在解除时闭合
// ==========================================

use crate::domain::types::{DowntimeCategory, DowntimeKind};
use chrono::NaiveDateTime;
use serde::{Deserialize, Serialize};
use uuid::Uuid;

// ==========================================
// DowntimeInterval - 停机区间
// ==========================================
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DowntimeInterval {
    // ===== 标识 =====
    pub downtime_id: String,            // 区间ID (UUID)
    pub work_center_id: String,         // 工作中心

    // ===== 分类 =====
    pub kind: DowntimeKind,             // 计划内/计划外
    pub category: DowntimeCategory,     // 原因分类

    // ===== 区间 =====
    pub started_at: NaiveDateTime,      // 开始
    pub ended_at: Option<NaiveDateTime>, // 结束 (None = 进行中)

    // ===== 关联 =====
    pub reason: String,                 // 原因描述
    pub constraint_id: Option<String>,  // 开启本区间的约束
}

impl DowntimeInterval {
    /// 创建新的停机区间（开区间）
    pub fn new(
        work_center_id: String,
        kind: DowntimeKind,
        category: DowntimeCategory,
        started_at: NaiveDateTime,
        reason: String,
    ) -> Self {
        Self {
            downtime_id: Uuid::new_v4().to_string(),
            work_center_id,
            kind,
            category,
            started_at,
            ended_at: None,
            reason,
            constraint_id: None,
        }
    }

    /// 关联开启约束
    pub fn with_constraint(mut self, constraint_id: String) -> Self {
        self.constraint_id = Some(constraint_id);
        self
    }

    /// 设置结束时间（闭合区间）
    pub fn with_end(mut self, ended_at: NaiveDateTime) -> Self {
        self.ended_at = Some(ended_at);
        self
    }

    /// 是否仍在进行
    pub fn is_open(&self) -> bool {
        self.ended_at.is_none()
    }

    /// 与给定窗口的重叠时长 (分钟)
    ///
    /// # 参数
    /// - `window_start` / `window_end`: 统计窗口
    ///
    /// # 说明
    /// 进行中的区间按窗口结束时刻截断
    pub fn overlap_minutes(
        &self,
        window_start: NaiveDateTime,
        window_end: NaiveDateTime,
    ) -> f64 {
        let effective_end = self.ended_at.unwrap_or(window_end);
        let start = self.started_at.max(window_start);
        let end = effective_end.min(window_end);
        if end <= start {
            return 0.0;
        }
        (end - start).num_seconds() as f64 / 60.0
    }
}
