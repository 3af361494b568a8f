// ==========================================
// 车间有限产能排产核心 - 操作日志领域模型
// ==========================================
// 红线: 所有指令与自动迁移必须记录
// 用途: 审计追踪
// ==========================================

use chrono::NaiveDateTime;
use serde::{Deserialize, Serialize};
use serde_json::Value as JsonValue;

// ==========================================
// ActionLog - 操作日志
// ==========================================
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ActionLog {
    // ===== 主键 =====
    pub action_id: String,          // 日志ID (UUID)
    pub action_type: String,        // 操作类型 (存储为字符串)
    pub action_ts: NaiveDateTime,   // 操作时间戳
    pub actor: String,              // 操作人或系统源

    // ===== 操作负载 =====
    pub payload_json: Option<JsonValue>, // 操作参数 (JSON)

    // ===== 扩展字段 (业务用) =====
    pub job_id: Option<String>,          // 关联作业
    pub work_center_id: Option<String>,  // 关联工作中心
    pub detail: Option<String>,          // 详细描述
}

// ==========================================
// ActionType - 操作类型
// ==========================================
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum ActionType {
    StartJob,          // 开工
    PauseJob,          // 暂停
    CompleteJob,       // 完工
    CancelJob,         // 取消
    ReportConstraint,  // 上报约束
    ResolveConstraint, // 解除约束
    Reoptimize,        // 重排产
    AutoTransition,    // 自动状态迁移
    FeedReplay,        // 数据回放
}

// ==========================================
// ActionType 辅助方法
// ==========================================
impl ActionType {
    /// 转换为字符串 (用于数据库存储)
    pub fn as_str(&self) -> &'static str {
        match self {
            ActionType::StartJob => "StartJob",
            ActionType::PauseJob => "PauseJob",
            ActionType::CompleteJob => "CompleteJob",
            ActionType::CancelJob => "CancelJob",
            ActionType::ReportConstraint => "ReportConstraint",
            ActionType::ResolveConstraint => "ResolveConstraint",
            ActionType::Reoptimize => "Reoptimize",
            ActionType::AutoTransition => "AutoTransition",
            ActionType::FeedReplay => "FeedReplay",
        }
    }

    /// 从字符串解析
    pub fn from_str(s: &str) -> Option<Self> {
        match s {
            "StartJob" => Some(ActionType::StartJob),
            "PauseJob" => Some(ActionType::PauseJob),
            "CompleteJob" => Some(ActionType::CompleteJob),
            "CancelJob" => Some(ActionType::CancelJob),
            "ReportConstraint" => Some(ActionType::ReportConstraint),
            "ResolveConstraint" => Some(ActionType::ResolveConstraint),
            "Reoptimize" => Some(ActionType::Reoptimize),
            "AutoTransition" => Some(ActionType::AutoTransition),
            "FeedReplay" => Some(ActionType::FeedReplay),
            _ => None,
        }
    }
}

// ==========================================
// ActionLog 辅助方法
// ==========================================
impl ActionLog {
    /// 创建新的操作日志
    ///
    /// # 参数
    /// - `action_type`: 操作类型
    /// - `actor`: 操作人或系统源
    pub fn new(action_type: ActionType, actor: String) -> Self {
        Self {
            action_id: uuid::Uuid::new_v4().to_string(),
            action_type: action_type.as_str().to_string(),
            action_ts: chrono::Utc::now().naive_utc(),
            actor,
            payload_json: None,
            job_id: None,
            work_center_id: None,
            detail: None,
        }
    }

    /// 设置操作负载 (转换为JSON)
    pub fn with_payload<T: Serialize>(mut self, payload: &T) -> Self {
        self.payload_json = serde_json::to_value(payload).ok();
        self
    }

    /// 设置关联作业
    pub fn with_job(mut self, job_id: String) -> Self {
        self.job_id = Some(job_id);
        self
    }

    /// 设置关联工作中心
    pub fn with_work_center(mut self, work_center_id: String) -> Self {
        self.work_center_id = Some(work_center_id);
        self
    }

    /// 设置详细描述
    pub fn with_detail(mut self, detail: String) -> Self {
        self.detail = Some(detail);
        self
    }
}
