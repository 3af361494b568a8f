// ==========================================
// 车间有限产能排产核心 - 外部数据信号模型
// ==========================================
// 说明: 遥测信号为瞬态数据, 不单条落库,
//       只汇入工作中心负载/健康度与 OEE 输入
// ==========================================

use chrono::NaiveDateTime;
use serde::{Deserialize, Serialize};
use std::fmt;

// ==========================================
// MachineSignal - 机台遥测信号
// ==========================================
// 不变量: 同一来源时间戳单调递增, 乱序信号计数丢弃
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct MachineSignal {
    pub work_center_id: String,    // 工作中心
    pub timestamp: NaiveDateTime,  // 采样时间
    pub speed: f64,                // 速度 (件/小时)
    pub temperature: f64,          // 温度 (摄氏度)
    pub vibration: f64,            // 振动 (mm/s)
    pub power: f64,                // 功率 (kW)
}

// ==========================================
// QualitySample - 质检结果
// ==========================================
// 来源: 外部质检子系统, 按批次报告
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct QualitySample {
    pub work_center_id: Option<String>, // 工作中心 (与作业二选一)
    pub job_id: Option<String>,         // 作业
    pub timestamp: NaiveDateTime,       // 检验时间
    pub total_checked: i64,             // 检验总数
    pub defect_count: i64,              // 不良数
}

impl QualitySample {
    /// 良品数 = 检验总数 - 不良数 (下限 0)
    pub fn good_count(&self) -> i64 {
        (self.total_checked - self.defect_count).max(0)
    }
}

// ==========================================
// MaintenanceNotice - 维保窗口通知
// ==========================================
// 来源: 外部维保子系统
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct MaintenanceNotice {
    pub work_center_id: String,         // 工作中心
    pub unavailable_from: NaiveDateTime, // 停机开始
    pub unavailable_to: NaiveDateTime,   // 停机结束
    pub reason: String,                  // 原因
}

impl MaintenanceNotice {
    /// 窗口时长 (分钟, 下限 0)
    pub fn window_minutes(&self) -> f64 {
        let secs = (self.unavailable_to - self.unavailable_from).num_seconds();
        (secs.max(0) as f64) / 60.0
    }

    /// 原因是否指向人力缺口（用于约束类型判定）
    pub fn is_labor_related(&self) -> bool {
        let lower = self.reason.to_lowercase();
        lower.contains("labor") || lower.contains("operator") || lower.contains("人力")
    }
}

// ==========================================
// 物料可用度 (Material Status)
// ==========================================
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum MaterialStatus {
    Adequate, // 充足
    Low,      // 偏低
    Critical, // 告罄
    Excess,   // 过剩
}

impl fmt::Display for MaterialStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            MaterialStatus::Adequate => write!(f, "ADEQUATE"),
            MaterialStatus::Low => write!(f, "LOW"),
            MaterialStatus::Critical => write!(f, "CRITICAL"),
            MaterialStatus::Excess => write!(f, "EXCESS"),
        }
    }
}

impl MaterialStatus {
    /// 从字符串解析
    pub fn from_str(s: &str) -> Self {
        match s.to_uppercase().as_str() {
            "LOW" => MaterialStatus::Low,
            "CRITICAL" => MaterialStatus::Critical,
            "EXCESS" => MaterialStatus::Excess,
            _ => MaterialStatus::Adequate, // 默认值
        }
    }
}

// ==========================================
// MaterialNotice - 物料可用度通知
// ==========================================
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct MaterialNotice {
    pub work_center_id: Option<String>, // 工作中心 (与作业二选一)
    pub job_id: Option<String>,         // 作业
    pub material_code: String,          // 物料编码
    pub status: MaterialStatus,         // 可用度
    pub timestamp: NaiveDateTime,       // 上报时间
}

// ==========================================
// ToolWearReading - 工装寿命读数
// ==========================================
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ToolWearReading {
    pub work_center_id: String,    // 工作中心
    pub tool_id: String,           // 工装/刀具编号
    pub life_remaining_pct: f64,   // 剩余寿命百分比 (0-100)
    pub timestamp: NaiveDateTime,  // 读数时间
}
