// ==========================================
// 车间有限产能排产核心 - 领域类型定义
// ==========================================
// 红线: 状态机迁移只允许经由 JobLedger
// 序列化格式: SCREAMING_SNAKE_CASE (与数据库一致)
// ==========================================

use serde::{Deserialize, Serialize};
use std::fmt;

// ==========================================
// 作业优先级 (Job Priority)
// ==========================================
// 顺序: Low < Normal < High < Critical (排序按优先级降序)
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum JobPriority {
    Low,      // 低
    Normal,   // 正常
    High,     // 高
    Critical, // 关键
}

impl fmt::Display for JobPriority {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            JobPriority::Low => write!(f, "LOW"),
            JobPriority::Normal => write!(f, "NORMAL"),
            JobPriority::High => write!(f, "HIGH"),
            JobPriority::Critical => write!(f, "CRITICAL"),
        }
    }
}

impl JobPriority {
    /// 从字符串解析优先级
    pub fn from_str(s: &str) -> Self {
        match s.to_uppercase().as_str() {
            "LOW" => JobPriority::Low,
            "NORMAL" => JobPriority::Normal,
            "HIGH" => JobPriority::High,
            "CRITICAL" => JobPriority::Critical,
            _ => JobPriority::Normal, // 默认值
        }
    }

    /// 转换为数据库存储的字符串
    pub fn to_db_str(&self) -> &'static str {
        match self {
            JobPriority::Low => "LOW",
            JobPriority::Normal => "NORMAL",
            JobPriority::High => "HIGH",
            JobPriority::Critical => "CRITICAL",
        }
    }
}

// ==========================================
// 作业状态 (Job State)
// ==========================================
// 主路径: SCHEDULED -> IN_PROGRESS -> COMPLETED
// BLOCKED 仅由关键约束强制进入, 解除后回到 SCHEDULED
// COMPLETED / CANCELLED 为吸收态
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum JobState {
    Scheduled,  // 已排产
    InProgress, // 进行中
    Completed,  // 已完成
    Delayed,    // 已延期
    Blocked,    // 被阻塞
    Cancelled,  // 已取消
}

impl fmt::Display for JobState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            JobState::Scheduled => write!(f, "SCHEDULED"),
            JobState::InProgress => write!(f, "IN_PROGRESS"),
            JobState::Completed => write!(f, "COMPLETED"),
            JobState::Delayed => write!(f, "DELAYED"),
            JobState::Blocked => write!(f, "BLOCKED"),
            JobState::Cancelled => write!(f, "CANCELLED"),
        }
    }
}

impl JobState {
    /// 从字符串解析状态
    pub fn from_str(s: &str) -> Option<Self> {
        match s.to_uppercase().as_str() {
            "SCHEDULED" => Some(JobState::Scheduled),
            "IN_PROGRESS" => Some(JobState::InProgress),
            "COMPLETED" => Some(JobState::Completed),
            "DELAYED" => Some(JobState::Delayed),
            "BLOCKED" => Some(JobState::Blocked),
            "CANCELLED" => Some(JobState::Cancelled),
            _ => None,
        }
    }

    /// 转换为数据库存储的字符串
    pub fn to_db_str(&self) -> &'static str {
        match self {
            JobState::Scheduled => "SCHEDULED",
            JobState::InProgress => "IN_PROGRESS",
            JobState::Completed => "COMPLETED",
            JobState::Delayed => "DELAYED",
            JobState::Blocked => "BLOCKED",
            JobState::Cancelled => "CANCELLED",
        }
    }

    /// 是否为吸收态（不再迁出）
    pub fn is_terminal(&self) -> bool {
        matches!(self, JobState::Completed | JobState::Cancelled)
    }

    /// 是否可参与排产（非阻塞且非吸收态）
    pub fn is_schedulable(&self) -> bool {
        matches!(
            self,
            JobState::Scheduled | JobState::InProgress | JobState::Delayed
        )
    }
}

// ==========================================
// 约束类型 (Constraint Type)
// ==========================================
// 类型集合封闭: 设备/物料/工装/人力/工序顺序
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum ConstraintType {
    Resource, // 设备资源
    Material, // 物料
    Tooling,  // 工装刀具
    Labor,    // 人力
    Sequence, // 工序顺序
}

impl fmt::Display for ConstraintType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ConstraintType::Resource => write!(f, "RESOURCE"),
            ConstraintType::Material => write!(f, "MATERIAL"),
            ConstraintType::Tooling => write!(f, "TOOLING"),
            ConstraintType::Labor => write!(f, "LABOR"),
            ConstraintType::Sequence => write!(f, "SEQUENCE"),
        }
    }
}

impl ConstraintType {
    /// 从字符串解析约束类型
    pub fn from_str(s: &str) -> Option<Self> {
        match s.to_uppercase().as_str() {
            "RESOURCE" => Some(ConstraintType::Resource),
            "MATERIAL" => Some(ConstraintType::Material),
            "TOOLING" => Some(ConstraintType::Tooling),
            "LABOR" => Some(ConstraintType::Labor),
            "SEQUENCE" => Some(ConstraintType::Sequence),
            _ => None,
        }
    }

    /// 转换为数据库存储的字符串
    pub fn to_db_str(&self) -> &'static str {
        match self {
            ConstraintType::Resource => "RESOURCE",
            ConstraintType::Material => "MATERIAL",
            ConstraintType::Tooling => "TOOLING",
            ConstraintType::Labor => "LABOR",
            ConstraintType::Sequence => "SEQUENCE",
        }
    }
}

// ==========================================
// 约束严重度 (Constraint Severity)
// ==========================================
// 顺序: Low < Medium < High < Critical
// 红线: CRITICAL 强制作业进入 BLOCKED; 严重度不自动衰减
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum ConstraintSeverity {
    Low,      // 低
    Medium,   // 中
    High,     // 高
    Critical, // 关键
}

impl fmt::Display for ConstraintSeverity {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ConstraintSeverity::Low => write!(f, "LOW"),
            ConstraintSeverity::Medium => write!(f, "MEDIUM"),
            ConstraintSeverity::High => write!(f, "HIGH"),
            ConstraintSeverity::Critical => write!(f, "CRITICAL"),
        }
    }
}

impl ConstraintSeverity {
    /// 从字符串解析严重度
    pub fn from_str(s: &str) -> Option<Self> {
        match s.to_uppercase().as_str() {
            "LOW" => Some(ConstraintSeverity::Low),
            "MEDIUM" => Some(ConstraintSeverity::Medium),
            "HIGH" => Some(ConstraintSeverity::High),
            "CRITICAL" => Some(ConstraintSeverity::Critical),
            _ => None,
        }
    }

    /// 转换为数据库存储的字符串
    pub fn to_db_str(&self) -> &'static str {
        match self {
            ConstraintSeverity::Low => "LOW",
            ConstraintSeverity::Medium => "MEDIUM",
            ConstraintSeverity::High => "HIGH",
            ConstraintSeverity::Critical => "CRITICAL",
        }
    }

    /// 解除时是否必须填写处理说明（LOW 以上）
    pub fn requires_resolution_note(&self) -> bool {
        *self > ConstraintSeverity::Low
    }
}

// ==========================================
// 工作中心类别 (Work Center Kind)
// ==========================================
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum WorkCenterKind {
    Machining,   // 机加工
    Assembly,    // 装配
    Quality,     // 质检
    Packaging,   // 包装
    Maintenance, // 维修
}

impl fmt::Display for WorkCenterKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            WorkCenterKind::Machining => write!(f, "MACHINING"),
            WorkCenterKind::Assembly => write!(f, "ASSEMBLY"),
            WorkCenterKind::Quality => write!(f, "QUALITY"),
            WorkCenterKind::Packaging => write!(f, "PACKAGING"),
            WorkCenterKind::Maintenance => write!(f, "MAINTENANCE"),
        }
    }
}

impl WorkCenterKind {
    /// 从字符串解析类别
    pub fn from_str(s: &str) -> Self {
        match s.to_uppercase().as_str() {
            "MACHINING" => WorkCenterKind::Machining,
            "ASSEMBLY" => WorkCenterKind::Assembly,
            "QUALITY" => WorkCenterKind::Quality,
            "PACKAGING" => WorkCenterKind::Packaging,
            "MAINTENANCE" => WorkCenterKind::Maintenance,
            _ => WorkCenterKind::Machining, // 默认值
        }
    }

    /// 转换为数据库存储的字符串
    pub fn to_db_str(&self) -> &'static str {
        match self {
            WorkCenterKind::Machining => "MACHINING",
            WorkCenterKind::Assembly => "ASSEMBLY",
            WorkCenterKind::Quality => "QUALITY",
            WorkCenterKind::Packaging => "PACKAGING",
            WorkCenterKind::Maintenance => "MAINTENANCE",
        }
    }
}

// ==========================================
// 工作中心状态 (Work Center Status)
// ==========================================
// 红线: 工作中心只停用不删除
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum WorkCenterStatus {
    Active,      // 运行
    Inactive,    // 停用
    Maintenance, // 维护中
    Breakdown,   // 故障
}

impl fmt::Display for WorkCenterStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            WorkCenterStatus::Active => write!(f, "ACTIVE"),
            WorkCenterStatus::Inactive => write!(f, "INACTIVE"),
            WorkCenterStatus::Maintenance => write!(f, "MAINTENANCE"),
            WorkCenterStatus::Breakdown => write!(f, "BREAKDOWN"),
        }
    }
}

impl WorkCenterStatus {
    /// 从字符串解析状态
    pub fn from_str(s: &str) -> Option<Self> {
        match s.to_uppercase().as_str() {
            "ACTIVE" => Some(WorkCenterStatus::Active),
            "INACTIVE" => Some(WorkCenterStatus::Inactive),
            "MAINTENANCE" => Some(WorkCenterStatus::Maintenance),
            "BREAKDOWN" => Some(WorkCenterStatus::Breakdown),
            _ => None,
        }
    }

    /// 转换为数据库存储的字符串
    pub fn to_db_str(&self) -> &'static str {
        match self {
            WorkCenterStatus::Active => "ACTIVE",
            WorkCenterStatus::Inactive => "INACTIVE",
            WorkCenterStatus::Maintenance => "MAINTENANCE",
            WorkCenterStatus::Breakdown => "BREAKDOWN",
        }
    }
}

// ==========================================
// 停机类型 (Downtime Kind)
// ==========================================
// 计划内停机来自维保窗口, 计划外停机来自故障约束
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum DowntimeKind {
    Planned,   // 计划内
    Unplanned, // 计划外
}

impl fmt::Display for DowntimeKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            DowntimeKind::Planned => write!(f, "PLANNED"),
            DowntimeKind::Unplanned => write!(f, "UNPLANNED"),
        }
    }
}

impl DowntimeKind {
    /// 从字符串解析停机类型
    pub fn from_str(s: &str) -> Option<Self> {
        match s.to_uppercase().as_str() {
            "PLANNED" => Some(DowntimeKind::Planned),
            "UNPLANNED" => Some(DowntimeKind::Unplanned),
            _ => None,
        }
    }

    /// 转换为数据库存储的字符串
    pub fn to_db_str(&self) -> &'static str {
        match self {
            DowntimeKind::Planned => "PLANNED",
            DowntimeKind::Unplanned => "UNPLANNED",
        }
    }
}

// ==========================================
// 停机原因分类 (Downtime Category)
// ==========================================
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum DowntimeCategory {
    Breakdown, // 设备故障
    Material,  // 物料短缺
    Quality,   // 质量问题
    Setup,     // 换型调整
    Tooling,   // 工装刀具
    Other,     // 其他
}

impl fmt::Display for DowntimeCategory {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            DowntimeCategory::Breakdown => write!(f, "BREAKDOWN"),
            DowntimeCategory::Material => write!(f, "MATERIAL"),
            DowntimeCategory::Quality => write!(f, "QUALITY"),
            DowntimeCategory::Setup => write!(f, "SETUP"),
            DowntimeCategory::Tooling => write!(f, "TOOLING"),
            DowntimeCategory::Other => write!(f, "OTHER"),
        }
    }
}

impl DowntimeCategory {
    /// 从字符串解析分类
    pub fn from_str(s: &str) -> Self {
        match s.to_uppercase().as_str() {
            "BREAKDOWN" => DowntimeCategory::Breakdown,
            "MATERIAL" => DowntimeCategory::Material,
            "QUALITY" => DowntimeCategory::Quality,
            "SETUP" => DowntimeCategory::Setup,
            "TOOLING" => DowntimeCategory::Tooling,
            _ => DowntimeCategory::Other, // 默认值
        }
    }

    /// 转换为数据库存储的字符串
    pub fn to_db_str(&self) -> &'static str {
        match self {
            DowntimeCategory::Breakdown => "BREAKDOWN",
            DowntimeCategory::Material => "MATERIAL",
            DowntimeCategory::Quality => "QUALITY",
            DowntimeCategory::Setup => "SETUP",
            DowntimeCategory::Tooling => "TOOLING",
            DowntimeCategory::Other => "OTHER",
        }
    }
}
