// ==========================================
// 车间有限产能排产核心 - 演示数据种子
// ==========================================
// 用途: 在空库上造一套可演示的车间场景
// 场景: 3 个工作中心 + 5 个作业 + 一条维保窗口 + 一轮排产
// ==========================================

use shopfloor_aps::api::ReleaseJobRequest;
use shopfloor_aps::app::{get_default_db_path, AppState};
use shopfloor_aps::domain::types::{JobPriority, WorkCenterKind};
use shopfloor_aps::domain::{MaintenanceNotice, WorkCenter};
use shopfloor_aps::engine::ReoptimizeScope;
use shopfloor_aps::logging;

fn main() {
    logging::init();

    let db_path = std::env::args()
        .nth(1)
        .unwrap_or_else(get_default_db_path);
    tracing::info!("演示数据写入: {}", db_path);

    let state = match AppState::new(db_path) {
        Ok(s) => s,
        Err(e) => {
            tracing::error!("AppState初始化失败: {}", e);
            std::process::exit(1);
        }
    };
    let now = chrono::Utc::now().naive_utc();

    // ==========================================
    // 工作中心
    // ==========================================
    let centers = [
        ("CNC-01", "一号加工中心", WorkCenterKind::Machining, 480.0),
        ("CNC-02", "二号加工中心", WorkCenterKind::Machining, 480.0),
        ("ASM-01", "一号装配线", WorkCenterKind::Assembly, 420.0),
    ];
    for (id, name, kind, capacity) in centers {
        state
            .command_api
            .register_work_center(&WorkCenter::new(
                id.to_string(),
                name.to_string(),
                kind,
                capacity,
            ))
            .expect("注册工作中心失败");
    }

    // ==========================================
    // 作业
    // ==========================================
    let jobs = [
        ("JOB-2026-0001", "WO-1001", "法兰盘", "CNC-01", JobPriority::High, 100, 30.0, 3.0),
        ("JOB-2026-0002", "WO-1002", "轴承座", "CNC-01", JobPriority::Normal, 80, 20.0, 2.5),
        ("JOB-2026-0003", "WO-1003", "齿轮坯", "CNC-02", JobPriority::Critical, 60, 25.0, 4.0),
        ("JOB-2026-0004", "WO-1004", "端盖", "CNC-02", JobPriority::Low, 120, 15.0, 1.5),
        ("JOB-2026-0005", "WO-1005", "减速器总成", "ASM-01", JobPriority::Normal, 40, 40.0, 6.0),
    ];
    for (job_no, wo, product, wc, priority, qty, setup, cycle) in jobs {
        state
            .command_api
            .release_job(&ReleaseJobRequest {
                job_no: job_no.to_string(),
                work_order_no: wo.to_string(),
                product: product.to_string(),
                work_center_id: wc.to_string(),
                priority,
                target_qty: qty,
                setup_minutes: setup,
                planned_cycle_minutes: cycle,
            })
            .expect("工单释放失败");
    }

    // ==========================================
    // 维保窗口 + 排产
    // ==========================================
    state
        .command_api
        .apply_maintenance_notice(&MaintenanceNotice {
            work_center_id: "ASM-01".to_string(),
            unavailable_from: now + chrono::Duration::hours(4),
            unavailable_to: now + chrono::Duration::hours(5),
            reason: "季度保养".to_string(),
        })
        .expect("维保窗口写入失败");

    let delta = state
        .command_api
        .reoptimize(&ReoptimizeScope::All, "seed", now)
        .expect("初始排产失败");

    tracing::info!(
        work_centers = centers.len(),
        jobs = jobs.len(),
        assignments = delta.assignments.len(),
        "演示数据写入完成"
    );
}
