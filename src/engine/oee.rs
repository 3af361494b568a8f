// ==========================================
// 车间有限产能排产核心 - OEE 计算器
// ==========================================
// 公式: OEE = 可用率 × 表现率 × 质量率 (固定公式)
// 红线: 缺失分母的指标为"未定义"(None), 不得报 0 或 100
// 红线: 表现率报告口径封顶 100, 原始值保留供下钻
// 触发: 质检样本 / 节拍观测 / 停机区间边界, 不走定时器
// ==========================================

use crate::config::SchedulingParams;
use crate::domain::{OeeCounters, OeeSnapshot, QualitySample};
use crate::engine::events::{FloorEvent, FloorEventType, OptionalEventPublisher};
use crate::engine::registry::WorkCenterRegistry;
use crate::repository::error::{RepositoryError, RepositoryResult};
use crate::repository::{DowntimeRepository, JobRepository, OeeSnapshotRepository};
use chrono::{Duration, NaiveDateTime};
use std::collections::{HashMap, VecDeque};
use std::sync::{Arc, Mutex};
use uuid::Uuid;

// ==========================================
// 窗口内观测
// ==========================================

#[derive(Debug, Clone)]
struct CycleObservation {
    at: NaiveDateTime,
    parts: i64,
    ideal_cycle_minutes: f64,
    actual_cycle_minutes: f64,
}

#[derive(Debug, Clone)]
struct QualityObservation {
    at: NaiveDateTime,
    total_checked: i64,
    good_count: i64,
    defect_count: i64,
}

#[derive(Debug, Default)]
struct WindowAccumulator {
    cycles: VecDeque<CycleObservation>,
    quality: VecDeque<QualityObservation>,
}

impl WindowAccumulator {
    /// 剔除滚动窗口之前的观测
    fn prune(&mut self, window_start: NaiveDateTime) {
        while self.cycles.front().map(|o| o.at < window_start).unwrap_or(false) {
            self.cycles.pop_front();
        }
        while self.quality.front().map(|o| o.at < window_start).unwrap_or(false) {
            self.quality.pop_front();
        }
    }
}

// ==========================================
// OeeCalculator - OEE 计算器
// ==========================================
pub struct OeeCalculator {
    snapshot_repo: Arc<OeeSnapshotRepository>,
    downtime_repo: Arc<DowntimeRepository>,
    job_repo: Arc<JobRepository>,
    registry: Arc<WorkCenterRegistry>,
    publisher: OptionalEventPublisher,
    params: SchedulingParams,
    accumulators: Mutex<HashMap<String, WindowAccumulator>>,
}

impl OeeCalculator {
    pub fn new(
        snapshot_repo: Arc<OeeSnapshotRepository>,
        downtime_repo: Arc<DowntimeRepository>,
        job_repo: Arc<JobRepository>,
        registry: Arc<WorkCenterRegistry>,
        publisher: OptionalEventPublisher,
        params: SchedulingParams,
    ) -> Self {
        Self {
            snapshot_repo,
            downtime_repo,
            job_repo,
            registry,
            publisher,
            params,
            accumulators: Mutex::new(HashMap::new()),
        }
    }

    // ==========================================
    // 触发入口
    // ==========================================

    /// 节拍观测 (遥测汇入): 记录产出与节拍后重算
    pub fn on_cycle_observation(
        &self,
        work_center_id: &str,
        ideal_cycle_minutes: f64,
        actual_cycle_minutes: f64,
        parts_delta: i64,
        at: NaiveDateTime,
    ) -> RepositoryResult<OeeSnapshot> {
        if parts_delta > 0 && ideal_cycle_minutes > 0.0 {
            let mut acc = self.lock_accumulators();
            acc.entry(work_center_id.to_string())
                .or_default()
                .cycles
                .push_back(CycleObservation {
                    at,
                    parts: parts_delta,
                    ideal_cycle_minutes,
                    actual_cycle_minutes,
                });
        }
        self.recompute(work_center_id, at)
    }

    /// 质检样本: 工作中心缺省时经作业归属解析
    pub fn on_quality_sample(&self, sample: &QualitySample) -> RepositoryResult<OeeSnapshot> {
        let work_center_id = match (&sample.work_center_id, &sample.job_id) {
            (Some(wc), _) => wc.clone(),
            (None, Some(job_id)) => {
                let job = self
                    .job_repo
                    .find_by_id(job_id)?
                    .ok_or_else(|| RepositoryError::NotFound {
                        entity: "Job".to_string(),
                        id: job_id.clone(),
                    })?;
                job.work_center_id
            }
            (None, None) => {
                return Err(RepositoryError::ValidationError(
                    "质检样本必须带工作中心或作业".to_string(),
                ))
            }
        };

        if sample.total_checked > 0 {
            let mut acc = self.lock_accumulators();
            acc.entry(work_center_id.clone())
                .or_default()
                .quality
                .push_back(QualityObservation {
                    at: sample.timestamp,
                    total_checked: sample.total_checked,
                    good_count: sample.good_count(),
                    defect_count: sample.defect_count,
                });
        }
        self.recompute(&work_center_id, sample.timestamp)
    }

    /// 停机区间开启/闭合边界触发重算
    pub fn on_downtime_boundary(
        &self,
        work_center_id: &str,
        now: NaiveDateTime,
    ) -> RepositoryResult<OeeSnapshot> {
        self.recompute(work_center_id, now)
    }

    /// 最近一次快照
    pub fn latest(&self, work_center_id: &str) -> RepositoryResult<Option<OeeSnapshot>> {
        self.snapshot_repo.find_latest(work_center_id)
    }

    // ==========================================
    // 核心计算
    // ==========================================

    /// 按滚动窗口重算并落库
    ///
    /// 计划生产时间 = 窗口 - 计划内停机;
    /// 运行时间 = 计划生产时间 - 计划外停机 (下限 0);
    /// 窗口内无任何观测与停机时三项指标全部未定义
    pub fn recompute(
        &self,
        work_center_id: &str,
        now: NaiveDateTime,
    ) -> RepositoryResult<OeeSnapshot> {
        let window_minutes = self.params.oee_window_minutes;
        let window_start = now - Duration::seconds((window_minutes * 60.0) as i64);

        let intervals = self
            .downtime_repo
            .list_overlapping(work_center_id, window_start, now)?;
        let planned_downtime: f64 = intervals
            .iter()
            .filter(|i| i.kind == crate::domain::types::DowntimeKind::Planned)
            .map(|i| i.overlap_minutes(window_start, now))
            .sum();
        let unplanned_downtime: f64 = intervals
            .iter()
            .filter(|i| i.kind == crate::domain::types::DowntimeKind::Unplanned)
            .map(|i| i.overlap_minutes(window_start, now))
            .sum();

        let (cycles, quality) = {
            let mut acc = self.lock_accumulators();
            let entry = acc.entry(work_center_id.to_string()).or_default();
            entry.prune(window_start);
            (
                entry.cycles.iter().cloned().collect::<Vec<_>>(),
                entry.quality.iter().cloned().collect::<Vec<_>>(),
            )
        };

        let planned_production = (window_minutes - planned_downtime).max(0.0);
        let runtime = (planned_production - unplanned_downtime).max(0.0);

        let total_parts: i64 = cycles.iter().map(|o| o.parts).sum();
        let ideal_minutes: f64 = cycles
            .iter()
            .map(|o| o.ideal_cycle_minutes * o.parts as f64)
            .sum();
        let actual_minutes: f64 = cycles
            .iter()
            .map(|o| o.actual_cycle_minutes * o.parts as f64)
            .sum();
        let total_checked: i64 = quality.iter().map(|o| o.total_checked).sum();
        let good_parts: i64 = quality.iter().map(|o| o.good_count).sum();
        let defect_parts: i64 = quality.iter().map(|o| o.defect_count).sum();

        // 空窗口: 没有任何观测和停机记录时不假装 100% 可用
        let has_evidence = !cycles.is_empty() || !quality.is_empty() || !intervals.is_empty();
        let availability = if has_evidence && planned_production > 0.0 {
            Some(runtime / planned_production * 100.0)
        } else {
            None
        };

        // 表现率 = 理想节拍 / 实际节拍 (时间轴由可用率负责)
        let performance_raw = if total_parts > 0 && ideal_minutes > 0.0 && actual_minutes > 0.0 {
            Some(ideal_minutes / actual_minutes * 100.0)
        } else {
            None
        };
        let performance = performance_raw.map(|p| p.min(100.0));

        let quality_rate = if total_checked > 0 {
            Some(good_parts as f64 / total_checked as f64 * 100.0)
        } else {
            None
        };

        let oee = match (availability, performance, quality_rate) {
            (Some(a), Some(p), Some(q)) => Some(a * p * q / 10_000.0),
            _ => None,
        };

        let counters = OeeCounters {
            planned_production_minutes: planned_production,
            runtime_minutes: runtime,
            planned_downtime_minutes: planned_downtime,
            unplanned_downtime_minutes: unplanned_downtime,
            ideal_cycle_minutes: if total_parts > 0 {
                ideal_minutes / total_parts as f64
            } else {
                0.0
            },
            actual_cycle_minutes: if total_parts > 0 {
                actual_minutes / total_parts as f64
            } else {
                0.0
            },
            total_parts,
            good_parts,
            defect_parts,
        };

        let snapshot = OeeSnapshot {
            snapshot_id: Uuid::new_v4().to_string(),
            work_center_id: work_center_id.to_string(),
            window_start,
            window_end: now,
            availability,
            performance,
            performance_raw,
            quality: quality_rate,
            oee,
            counters,
            computed_at: now,
        };
        self.snapshot_repo.insert(&snapshot)?;

        // 滚动指标回写: 两个分母都存在才更新, 未定义不折算成 100%
        if counters_have_rollups(&snapshot) {
            if let Some(availability) = snapshot.availability {
                let efficiency = snapshot.counters.actual_cycle_minutes
                    / snapshot.counters.ideal_cycle_minutes;
                self.registry
                    .record_rollups(work_center_id, efficiency, availability / 100.0)?;
            }
        }

        self.publisher.publish(
            FloorEvent::new(FloorEventType::OeeRecomputed, "OeeCalculator")
                .with_work_center(work_center_id)
                .with_detail(match snapshot.oee {
                    Some(v) => format!("OEE {:.1}%", v),
                    None => "OEE 未定义".to_string(),
                }),
        );
        Ok(snapshot)
    }

    fn lock_accumulators(&self) -> std::sync::MutexGuard<'_, HashMap<String, WindowAccumulator>> {
        match self.accumulators.lock() {
            Ok(g) => g,
            Err(poisoned) => poisoned.into_inner(),
        }
    }
}

fn counters_have_rollups(snapshot: &OeeSnapshot) -> bool {
    snapshot.counters.total_parts > 0 && snapshot.counters.ideal_cycle_minutes > 0.0
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::domain::types::{DowntimeCategory, DowntimeKind, WorkCenterKind};
    use crate::domain::{DowntimeInterval, WorkCenter};
    use crate::repository::WorkCenterRepository;
    use rusqlite::Connection;

    struct Fixture {
        calc: OeeCalculator,
        registry: Arc<WorkCenterRegistry>,
        downtime_repo: Arc<DowntimeRepository>,
    }

    fn setup() -> Fixture {
        let conn = Arc::new(Mutex::new(Connection::open_in_memory().expect("conn")));
        let snapshot_repo =
            Arc::new(OeeSnapshotRepository::from_connection(conn.clone()).expect("oee repo"));
        let downtime_repo =
            Arc::new(DowntimeRepository::from_connection(conn.clone()).expect("downtime repo"));
        let job_repo = Arc::new(JobRepository::from_connection(conn.clone()).expect("job repo"));
        let wc_repo =
            Arc::new(WorkCenterRepository::from_connection(conn).expect("wc repo"));
        let registry = Arc::new(WorkCenterRegistry::new(
            wc_repo,
            OptionalEventPublisher::none(),
        ));
        registry
            .register(&WorkCenter::new(
                "CNC-03".to_string(),
                "三号加工中心".to_string(),
                WorkCenterKind::Machining,
                480.0,
            ))
            .expect("register");

        let calc = OeeCalculator::new(
            snapshot_repo,
            downtime_repo.clone(),
            job_repo,
            registry.clone(),
            OptionalEventPublisher::none(),
            SchedulingParams::default(),
        );
        Fixture {
            calc,
            registry,
            downtime_repo,
        }
    }

    fn now() -> NaiveDateTime {
        chrono::Utc::now().naive_utc()
    }

    #[test]
    fn test_empty_window_all_undefined() {
        let fx = setup();
        let snapshot = fx.calc.recompute("CNC-03", now()).expect("recompute");
        assert!(snapshot.availability.is_none());
        assert!(snapshot.performance.is_none());
        assert!(snapshot.quality.is_none());
        assert!(!snapshot.is_defined());
    }

    #[test]
    fn test_full_window_computation() {
        let fx = setup();
        let t = now();

        // 480 分钟窗口, 无停机: 100 件, 理想节拍 3.0, 实际 4.0
        fx.calc
            .on_cycle_observation("CNC-03", 3.0, 4.0, 100, t)
            .expect("cycle");
        let snapshot = fx
            .calc
            .on_quality_sample(&QualitySample {
                work_center_id: Some("CNC-03".to_string()),
                job_id: None,
                timestamp: t,
                total_checked: 100,
                defect_count: 10,
            })
            .expect("quality");

        // 可用率 100, 表现率 300/400 = 75, 质量率 90
        assert!((snapshot.availability.expect("a") - 100.0).abs() < 1e-9);
        assert!((snapshot.performance.expect("p") - 75.0).abs() < 1e-9);
        assert!((snapshot.quality.expect("q") - 90.0).abs() < 1e-9);
        assert!((snapshot.oee.expect("oee") - 67.5).abs() < 1e-9);
    }

    #[test]
    fn test_performance_clamped_raw_retained() {
        let fx = setup();
        let t = now();

        // 实际节拍 2.4 快于理想 3.0: 原始 125%, 报告 100%
        let snapshot = fx
            .calc
            .on_cycle_observation("CNC-03", 3.0, 2.4, 200, t)
            .expect("cycle");
        assert!((snapshot.performance_raw.expect("raw") - 125.0).abs() < 1e-9);
        assert!((snapshot.performance.expect("p") - 100.0).abs() < 1e-9);
        assert!(snapshot.runs_faster_than_ideal());
    }

    #[test]
    fn test_downtime_shapes_availability() {
        let fx = setup();
        let t = now();

        // 计划内 120 分钟 + 计划外 60 分钟
        fx.downtime_repo
            .insert(
                &DowntimeInterval::new(
                    "CNC-03".to_string(),
                    DowntimeKind::Planned,
                    DowntimeCategory::Other,
                    t - Duration::minutes(400),
                    "保养".to_string(),
                )
                .with_end(t - Duration::minutes(280)),
            )
            .expect("planned");
        fx.downtime_repo
            .insert(
                &DowntimeInterval::new(
                    "CNC-03".to_string(),
                    DowntimeKind::Unplanned,
                    DowntimeCategory::Breakdown,
                    t - Duration::minutes(200),
                    "故障".to_string(),
                )
                .with_end(t - Duration::minutes(140)),
            )
            .expect("unplanned");

        let snapshot = fx.calc.on_downtime_boundary("CNC-03", t).expect("recompute");
        // 计划生产 360, 运行 300 => 可用率 83.33%
        assert!((snapshot.counters.planned_production_minutes - 360.0).abs() < 1e-6);
        assert!((snapshot.counters.runtime_minutes - 300.0).abs() < 1e-6);
        let availability = snapshot.availability.expect("a");
        assert!((availability - 300.0 / 360.0 * 100.0).abs() < 1e-6);
        // 无产出与质检: 综合 OEE 未定义
        assert!(snapshot.oee.is_none());
    }

    #[test]
    fn test_observations_pruned_outside_window() {
        let fx = setup();
        let t = now();

        // 窗口外旧观测不计入
        fx.calc
            .on_cycle_observation("CNC-03", 3.0, 3.5, 50, t - Duration::minutes(600))
            .expect("old cycle");
        let snapshot = fx.calc.recompute("CNC-03", t).expect("recompute");
        assert_eq!(snapshot.counters.total_parts, 0);
        assert!(snapshot.performance.is_none());
    }

    #[test]
    fn test_undefined_availability_skips_rollup_writeback() {
        let fx = setup();
        let t = now();

        // 计划内停机铺满整个窗口: 计划生产时间 0, 可用率未定义
        fx.downtime_repo
            .insert(
                &DowntimeInterval::new(
                    "CNC-03".to_string(),
                    DowntimeKind::Planned,
                    DowntimeCategory::Other,
                    t - Duration::minutes(500),
                    "整窗保养".to_string(),
                )
                .with_end(t),
            )
            .expect("planned");
        let snapshot = fx
            .calc
            .on_cycle_observation("CNC-03", 3.0, 4.0, 100, t)
            .expect("cycle");
        assert!(snapshot.availability.is_none());
        assert!(snapshot.performance.is_some());

        // 可用率未定义时不回写滚动指标, 更不得按 100% 折算
        let wc = fx.registry.get("CNC-03").expect("wc");
        assert!((wc.efficiency - 1.0).abs() < 1e-9);
        assert!((wc.availability - 1.0).abs() < 1e-9);
    }

    #[test]
    fn test_quality_sample_requires_scope() {
        let fx = setup();
        let result = fx.calc.on_quality_sample(&QualitySample {
            work_center_id: None,
            job_id: None,
            timestamp: now(),
            total_checked: 10,
            defect_count: 1,
        });
        assert!(matches!(result, Err(RepositoryError::ValidationError(_))));
    }
}
