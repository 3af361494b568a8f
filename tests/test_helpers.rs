// ==========================================
// 测试辅助函数
// ==========================================
// 职责: 临时数据库上的应用装配与常用测试数据构造
// ==========================================

#![allow(dead_code)]

use chrono::NaiveDateTime;
use shopfloor_aps::api::ReleaseJobRequest;
use shopfloor_aps::app::AppState;
use shopfloor_aps::domain::types::{JobPriority, WorkCenterKind};
use shopfloor_aps::domain::{Job, MachineSignal, WorkCenter};
use tempfile::TempDir;

/// 在临时数据库上装配完整应用
///
/// # 返回
/// - TempDir: 临时目录 (需要保持存活, 否则数据库文件被回收)
/// - AppState: 装配完成的应用状态
pub fn setup_app() -> (TempDir, AppState) {
    let dir = tempfile::tempdir().expect("tempdir");
    let db_path = dir.path().join("test.db").to_string_lossy().to_string();
    let state = AppState::new(db_path).expect("app state");
    (dir, state)
}

/// 解析测试时间戳 (YYYY-MM-DD HH:MM:SS)
pub fn ts(s: &str) -> NaiveDateTime {
    NaiveDateTime::parse_from_str(s, "%Y-%m-%d %H:%M:%S").expect("timestamp")
}

/// 注册一个机加工工作中心
pub fn register_center(state: &AppState, work_center_id: &str, capacity_minutes: f64) {
    state
        .command_api
        .register_work_center(&WorkCenter::new(
            work_center_id.to_string(),
            format!("{} 测试中心", work_center_id),
            WorkCenterKind::Machining,
            capacity_minutes,
        ))
        .expect("register work center");
}

/// 释放一个作业并返回落库后的实体
pub fn release_job(
    state: &AppState,
    job_no: &str,
    work_center_id: &str,
    priority: JobPriority,
    target_qty: i64,
    setup_minutes: f64,
    planned_cycle_minutes: f64,
) -> Job {
    state
        .command_api
        .release_job(&ReleaseJobRequest {
            job_no: job_no.to_string(),
            work_order_no: format!("WO-{}", job_no),
            product: "测试件".to_string(),
            work_center_id: work_center_id.to_string(),
            priority,
            target_qty,
            setup_minutes,
            planned_cycle_minutes,
        })
        .expect("release job")
}

/// 构造一条机台遥测信号
pub fn signal(
    work_center_id: &str,
    at: NaiveDateTime,
    speed: f64,
    temperature: f64,
    vibration: f64,
) -> MachineSignal {
    MachineSignal {
        work_center_id: work_center_id.to_string(),
        timestamp: at,
        speed,
        temperature,
        vibration,
        power: 15.0,
    }
}

/// 浮点近似断言
pub fn assert_close(actual: f64, expected: f64, tolerance: f64) {
    assert!(
        (actual - expected).abs() < tolerance,
        "期望 {} (±{}), 实际 {}",
        expected,
        tolerance,
        actual
    );
}
