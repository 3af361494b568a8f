// ==========================================
// 遥测链路集成测试
// ==========================================
// 目标: 信号接收 -> 健康度 -> 故障约束 -> 作业阻塞
//       的完整在线路径, 以及事件总线可观测性
// ==========================================

#[path = "test_helpers.rs"]
mod test_helpers;

use chrono::Duration;
use shopfloor_aps::api::ApiError;
use shopfloor_aps::domain::types::{ConstraintType, JobPriority, JobState};
use shopfloor_aps::engine::FloorEventType;
use test_helpers::{register_center, release_job, setup_app, signal, ts};

#[test]
fn test_out_of_order_signal_is_rejected() {
    let (_dir, state) = setup_app();
    register_center(&state, "CNC-01", 480.0);

    let t = ts("2026-03-02 08:00:00");
    state
        .command_api
        .ingest_signal(&signal("CNC-01", t, 20.0, 45.0, 2.0))
        .expect("first signal");

    // 相同时间戳 => 乱序拒绝
    let err = state
        .command_api
        .ingest_signal(&signal("CNC-01", t, 20.0, 45.0, 2.0))
        .expect_err("same timestamp");
    assert!(matches!(err, ApiError::StaleSignal(_)), "实际 {:?}", err);

    // 回拨时间戳同样拒绝
    let err = state
        .command_api
        .ingest_signal(&signal("CNC-01", t - Duration::seconds(30), 20.0, 45.0, 2.0))
        .expect_err("older timestamp");
    assert!(matches!(err, ApiError::StaleSignal(_)));

    let stats = state.query_api.ingest_stats();
    assert_eq!(stats.accepted_total, 1);
    assert_eq!(stats.rejected_total, 2);
}

#[test]
fn test_unknown_source_is_not_found() {
    let (_dir, state) = setup_app();
    let err = state
        .command_api
        .ingest_signal(&signal("NO-SUCH", ts("2026-03-02 08:00:00"), 20.0, 45.0, 2.0))
        .expect_err("unknown source");
    assert!(matches!(err, ApiError::NotFound(_)), "实际 {:?}", err);
}

#[test]
fn test_degraded_telemetry_blocks_jobs_on_center() {
    let (_dir, state) = setup_app();
    register_center(&state, "CNC-01", 480.0);
    let job = release_job(&state, "JOB-0201", "CNC-01", JobPriority::High, 50, 10.0, 2.0);

    // 连续超温超振信号把健康度 EMA 压到故障阈值之下
    let mut t = ts("2026-03-02 08:00:00");
    for _ in 0..20 {
        t += Duration::seconds(15);
        state
            .command_api
            .ingest_signal(&signal("CNC-01", t, 0.0, 190.0, 30.0))
            .expect("ingest");
    }

    let view = state.query_api.floor_snapshot("CNC-01").expect("snapshot");
    assert!(
        view.work_center.health_score < state.params.health_critical_threshold,
        "健康度应跌破阈值, 实际 {:.1}",
        view.work_center.health_score
    );

    // 故障约束只挂一条, 作业被强制阻塞
    let breakdowns: Vec<_> = view
        .active_constraints
        .iter()
        .filter(|c| c.is_blocking() && c.constraint_type == ConstraintType::Resource)
        .collect();
    assert_eq!(breakdowns.len(), 1);
    assert_eq!(
        state.query_api.get_job(&job.job_id).expect("job").state,
        JobState::Blocked
    );
}

#[test]
fn test_health_recovery_does_not_auto_unblock() {
    let (_dir, state) = setup_app();
    register_center(&state, "CNC-01", 480.0);
    let job = release_job(&state, "JOB-0202", "CNC-01", JobPriority::Normal, 50, 10.0, 2.0);

    let mut t = ts("2026-03-02 08:00:00");
    for _ in 0..20 {
        t += Duration::seconds(15);
        state
            .command_api
            .ingest_signal(&signal("CNC-01", t, 0.0, 190.0, 30.0))
            .expect("bad signal");
    }
    let constraint = state
        .query_api
        .floor_snapshot("CNC-01")
        .expect("snapshot")
        .active_constraints
        .into_iter()
        .find(|c| c.is_blocking())
        .expect("breakdown constraint");

    // 工况恢复把健康度拉回阈值之上
    for _ in 0..20 {
        t += Duration::seconds(15);
        state
            .command_api
            .ingest_signal(&signal("CNC-01", t, 20.0, 45.0, 2.0))
            .expect("good signal");
    }
    let view = state.query_api.floor_snapshot("CNC-01").expect("snapshot");
    assert!(view.work_center.health_score > state.params.health_critical_threshold);

    // 约束永不静默过期, 作业仍然 BLOCKED
    assert_eq!(
        state.query_api.get_job(&job.job_id).expect("job").state,
        JobState::Blocked
    );

    // 显式解除后才回 SCHEDULED
    state
        .command_api
        .resolve_constraint(
            &constraint.constraint_id,
            Some("现场确认设备恢复正常"),
            "维修组",
            t + Duration::minutes(5),
        )
        .expect("resolve");
    assert_eq!(
        state.query_api.get_job(&job.job_id).expect("job").state,
        JobState::Scheduled
    );
}

#[test]
fn test_stale_source_scan_raises_once() {
    let (_dir, state) = setup_app();
    register_center(&state, "CNC-01", 480.0);

    let t = ts("2026-03-02 08:00:00");
    state
        .command_api
        .ingest_signal(&signal("CNC-01", t, 20.0, 45.0, 2.0))
        .expect("ingest");

    // 静默超过阈值 (默认 120 秒) => 挂失联约束, 重复扫描不加挂
    let later = t + Duration::minutes(10);
    assert_eq!(state.ingestor.scan_stale_sources(later).expect("scan"), 1);
    assert_eq!(state.ingestor.scan_stale_sources(later).expect("scan"), 0);

    let view = state.query_api.floor_snapshot("CNC-01").expect("snapshot");
    assert!(view
        .active_constraints
        .iter()
        .any(|c| c.raised_by == "TELEMETRY_STALENESS"));
}

#[test]
fn test_signal_events_visible_on_bus() {
    let (_dir, state) = setup_app();
    register_center(&state, "CNC-01", 480.0);

    let t = ts("2026-03-02 08:00:00");
    state
        .command_api
        .ingest_signal(&signal("CNC-01", t, 20.0, 45.0, 2.0))
        .expect("accepted");
    let _ = state
        .command_api
        .ingest_signal(&signal("CNC-01", t, 20.0, 45.0, 2.0));

    let events = state.query_api.recent_events(50);
    assert!(events
        .iter()
        .any(|e| e.event_type == FloorEventType::SignalAccepted));
    assert!(events
        .iter()
        .any(|e| e.event_type == FloorEventType::SignalRejected));

    let stats = state.query_api.bus_stats();
    assert!(stats.published_total >= 2);
}
