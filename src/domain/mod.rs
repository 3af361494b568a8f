// ==========================================
// 车间有限产能排产核心 - 领域模型层
// ==========================================
// 职责: 定义领域实体、类型、业务规则接口
// 红线: 不含数据访问逻辑,不含引擎逻辑
// ==========================================

pub mod action_log;
pub mod constraint;
pub mod downtime;
pub mod job;
pub mod oee;
pub mod signal;
pub mod types;
pub mod work_center;

// 重导出核心类型
pub use action_log::{ActionLog, ActionType};
pub use constraint::Constraint;
pub use downtime::DowntimeInterval;
pub use job::Job;
pub use oee::{OeeCounters, OeeSnapshot};
pub use signal::{
    MachineSignal, MaintenanceNotice, MaterialNotice, MaterialStatus, QualitySample,
    ToolWearReading,
};
pub use types::{
    ConstraintSeverity, ConstraintType, DowntimeCategory, DowntimeKind, JobPriority, JobState,
    WorkCenterKind, WorkCenterStatus,
};
pub use work_center::WorkCenter;
