// ==========================================
// 车间有限产能排产核心 - OEE 领域模型
// ==========================================
// 公式: OEE = 可用率 × 表现率 × 质量率 (固定, 不按窗口配置)
// 红线: 缺失分母时指标为"未定义", 不得报 0 或 100
// ==========================================

use chrono::NaiveDateTime;
use serde::{Deserialize, Serialize};

// ==========================================
// OeeCounters - 原始计数器
// ==========================================
// 用途: 支撑百分比的可追溯原始量
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct OeeCounters {
    // ===== 时间 (分钟) =====
    pub planned_production_minutes: f64, // 计划生产时间
    pub runtime_minutes: f64,            // 实际运行时间
    pub planned_downtime_minutes: f64,   // 计划内停机
    pub unplanned_downtime_minutes: f64, // 计划外停机

    // ===== 节拍 (分钟/件) =====
    pub ideal_cycle_minutes: f64,        // 理想节拍
    pub actual_cycle_minutes: f64,       // 实际节拍

    // ===== 数量 (件) =====
    pub total_parts: i64,                // 总产出
    pub good_parts: i64,                 // 良品
    pub defect_parts: i64,               // 不良品
}

// ==========================================
// OeeSnapshot - OEE 快照
// ==========================================
// 每个工作中心每个滚动窗口一份; 由事件触发重算, 不走定时器
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct OeeSnapshot {
    // ===== 标识 =====
    pub snapshot_id: String,             // 快照ID (UUID)
    pub work_center_id: String,          // 所属工作中心

    // ===== 窗口 =====
    pub window_start: NaiveDateTime,     // 窗口开始
    pub window_end: NaiveDateTime,       // 窗口结束

    // ===== 百分比指标 (0-100; None = 未定义) =====
    pub availability: Option<f64>,       // 可用率
    pub performance: Option<f64>,        // 表现率 (报告口径, 封顶 100)
    pub performance_raw: Option<f64>,    // 表现率原始值 (不封顶, 供下钻分析)
    pub quality: Option<f64>,            // 质量率
    pub oee: Option<f64>,                // 综合 OEE

    // ===== 原始计数器 =====
    pub counters: OeeCounters,           // 支撑数据

    // ===== 时间 =====
    pub computed_at: NaiveDateTime,      // 计算时间
}

impl OeeSnapshot {
    /// OEE 是否可定义（三项因子全部有分母）
    pub fn is_defined(&self) -> bool {
        self.oee.is_some()
    }

    /// 表现率是否超过理想节拍（下钻信号, 不是错误）
    pub fn runs_faster_than_ideal(&self) -> bool {
        self.performance_raw.map(|p| p > 100.0).unwrap_or(false)
    }
}
