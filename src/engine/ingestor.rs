// ==========================================
// 车间有限产能排产核心 - 遥测接收器
// ==========================================
// 职责: 机台信号的唯一入口
// 红线: 同一来源时间戳必须单调递增, 乱序信号计数丢弃
// 红线: 信号为瞬态数据不落库, 只汇入健康度与 OEE 输入
// 红线: 健康度 EMA 跌破阈值 => 关键资源约束 (故障判定)
// ==========================================

use crate::config::SchedulingParams;
use crate::domain::types::{ConstraintSeverity, ConstraintType, JobState};
use crate::domain::{Constraint, MachineSignal};
use crate::engine::constraints::ConstraintEngine;
use crate::engine::events::{FloorEvent, FloorEventType, OptionalEventPublisher};
use crate::engine::ledger::{LedgerError, LedgerResult};
use crate::engine::oee::OeeCalculator;
use crate::engine::registry::WorkCenterRegistry;
use crate::repository::{ConstraintFilter, JobRepository};
use chrono::{Duration, NaiveDateTime};
use std::collections::{HashMap, HashSet};
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex};

// ==========================================
// 接收结果与统计
// ==========================================

/// 单条信号的接收结果
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum IngestOutcome {
    /// 已接受并汇入
    Accepted,
    /// 乱序丢弃 (时间戳未前进)
    RejectedStale,
}

#[derive(Debug, Clone, Default)]
pub struct IngestStats {
    pub accepted_total: u64,
    pub rejected_total: u64,
}

// ==========================================
// TelemetryIngestor - 遥测接收器
// ==========================================
pub struct TelemetryIngestor {
    registry: Arc<WorkCenterRegistry>,
    constraint_engine: Arc<ConstraintEngine>,
    oee_calculator: Arc<OeeCalculator>,
    job_repo: Arc<JobRepository>,
    publisher: OptionalEventPublisher,
    params: SchedulingParams,
    // 来源 => 最近接受的时间戳
    last_accepted: Mutex<HashMap<String, NaiveDateTime>>,
    // 已因失联挂过约束的来源 (恢复信号后摘除)
    stale_flagged: Mutex<HashSet<String>>,
    accepted_total: AtomicU64,
    rejected_total: AtomicU64,
}

impl TelemetryIngestor {
    pub fn new(
        registry: Arc<WorkCenterRegistry>,
        constraint_engine: Arc<ConstraintEngine>,
        oee_calculator: Arc<OeeCalculator>,
        job_repo: Arc<JobRepository>,
        publisher: OptionalEventPublisher,
        params: SchedulingParams,
    ) -> Self {
        Self {
            registry,
            constraint_engine,
            oee_calculator,
            job_repo,
            publisher,
            params,
            last_accepted: Mutex::new(HashMap::new()),
            stale_flagged: Mutex::new(HashSet::new()),
            accepted_total: AtomicU64::new(0),
            rejected_total: AtomicU64::new(0),
        }
    }

    pub fn stats(&self) -> IngestStats {
        IngestStats {
            accepted_total: self.accepted_total.load(Ordering::Relaxed),
            rejected_total: self.rejected_total.load(Ordering::Relaxed),
        }
    }

    // ==========================================
    // 信号接收
    // ==========================================

    /// 接收单条机台信号
    ///
    /// 乱序信号计数丢弃并返回 `RejectedStale`, 不报错;
    /// 接受的信号更新健康度 EMA, 并把速度折算的节拍
    /// 观测汇入 OEE 输入
    pub fn ingest(&self, signal: &MachineSignal) -> LedgerResult<IngestOutcome> {
        let wc = self.registry.get(&signal.work_center_id)?;

        let previous = {
            let mut last = self.lock_last_accepted();
            match last.get(&signal.work_center_id) {
                Some(prev) if signal.timestamp <= *prev => {
                    let prev = *prev;
                    drop(last);
                    self.rejected_total.fetch_add(1, Ordering::Relaxed);
                    tracing::warn!(
                        work_center_id = %signal.work_center_id,
                        timestamp = %signal.timestamp,
                        last_accepted = %prev,
                        "乱序遥测信号已丢弃"
                    );
                    self.publisher.publish(
                        FloorEvent::new(FloorEventType::SignalRejected, "TelemetryIngestor")
                            .with_work_center(&signal.work_center_id)
                            .with_detail(format!("时间戳未前进: {}", signal.timestamp)),
                    );
                    return Ok(IngestOutcome::RejectedStale);
                }
                prev => {
                    let previous = prev.copied();
                    last.insert(signal.work_center_id.clone(), signal.timestamp);
                    previous
                }
            }
        };
        self.accepted_total.fetch_add(1, Ordering::Relaxed);

        // 恢复信号摘除失联标记
        {
            let mut flagged = self.lock_stale_flagged();
            flagged.remove(&signal.work_center_id);
        }

        self.publisher.publish(
            FloorEvent::new(FloorEventType::SignalAccepted, "TelemetryIngestor")
                .with_work_center(&signal.work_center_id),
        );

        // 健康度 EMA
        let instant = self.instant_condition_score(signal);
        let alpha = self.params.health_ema_alpha.clamp(0.0, 1.0);
        let health = alpha * instant + (1.0 - alpha) * wc.health_score;
        self.registry.record_health(&signal.work_center_id, health)?;

        if health < self.params.health_critical_threshold {
            self.raise_breakdown_if_absent(&signal.work_center_id, health)?;
        }

        self.forward_cycle_observation(signal, previous)?;
        Ok(IngestOutcome::Accepted)
    }

    // ==========================================
    // 失联扫描
    // ==========================================

    /// 扫描超过静默阈值的来源, 挂资源约束
    ///
    /// 每个来源只挂一次, 恢复信号后可再次触发
    ///
    /// # 返回
    /// 本轮新挂约束的来源数
    pub fn scan_stale_sources(&self, now: NaiveDateTime) -> LedgerResult<usize> {
        let threshold = Duration::seconds(self.params.staleness_seconds);
        let stale: Vec<(String, NaiveDateTime)> = {
            let last = self.lock_last_accepted();
            last.iter()
                .filter(|(_, ts)| now - **ts > threshold)
                .map(|(id, ts)| (id.clone(), *ts))
                .collect()
        };

        let mut raised = 0;
        for (work_center_id, last_seen) in stale {
            {
                let mut flagged = self.lock_stale_flagged();
                if !flagged.insert(work_center_id.clone()) {
                    continue;
                }
            }
            tracing::warn!(work_center_id = %work_center_id, last_seen = %last_seen, "遥测来源失联");
            self.constraint_engine.raise(
                Constraint::new(
                    ConstraintType::Resource,
                    ConstraintSeverity::High,
                    format!("遥测失联, 最近信号 {}", last_seen),
                    "TELEMETRY_STALENESS".to_string(),
                )
                .with_work_center(work_center_id),
            )?;
            raised += 1;
        }
        Ok(raised)
    }

    // ==========================================
    // 内部
    // ==========================================

    /// 瞬时工况评分 (0-100)
    ///
    /// 温度越出标称带、振动超限各按偏差比例扣分
    fn instant_condition_score(&self, signal: &MachineSignal) -> f64 {
        let mut score = 100.0;

        let band = (self.params.nominal_temp_high - self.params.nominal_temp_low).max(1.0);
        if signal.temperature > self.params.nominal_temp_high {
            score -= (signal.temperature - self.params.nominal_temp_high) / band * 100.0;
        } else if signal.temperature < self.params.nominal_temp_low {
            score -= (self.params.nominal_temp_low - signal.temperature) / band * 100.0;
        }

        if signal.vibration > self.params.nominal_vibration_max {
            let excess = signal.vibration - self.params.nominal_vibration_max;
            score -= excess / self.params.nominal_vibration_max.max(0.1) * 100.0;
        }

        score.clamp(0.0, 100.0)
    }

    /// 健康度跌破阈值: 无在挂关键资源约束时补挂
    fn raise_breakdown_if_absent(&self, work_center_id: &str, health: f64) -> LedgerResult<()> {
        let existing = self.constraint_engine.list(&ConstraintFilter {
            constraint_type: Some(ConstraintType::Resource),
            severity: Some(ConstraintSeverity::Critical),
            active: Some(true),
            work_center_id: Some(work_center_id.to_string()),
        })?;
        if !existing.is_empty() {
            return Ok(());
        }

        tracing::error!(work_center_id, health, "健康度跌破故障阈值");
        self.constraint_engine.raise(
            Constraint::new(
                ConstraintType::Resource,
                ConstraintSeverity::Critical,
                format!("健康度 {:.1} 低于故障阈值", health),
                "TELEMETRY".to_string(),
            )
            .with_work_center(work_center_id.to_string()),
        )?;
        Ok(())
    }

    /// 速度折算节拍观测汇入 OEE
    ///
    /// 理想节拍取该中心进行中作业的计划节拍;
    /// 产出增量 = 速度 × 距上次接受信号的时长
    fn forward_cycle_observation(
        &self,
        signal: &MachineSignal,
        previous: Option<NaiveDateTime>,
    ) -> LedgerResult<()> {
        let prev = match previous {
            Some(p) => p,
            None => return Ok(()),
        };
        if signal.speed <= 0.0 {
            return Ok(());
        }

        let running = self
            .job_repo
            .list_by_work_center(&signal.work_center_id)?
            .into_iter()
            .find(|j| j.state == JobState::InProgress);
        let job = match running {
            Some(j) => j,
            None => return Ok(()),
        };

        let elapsed_hours = (signal.timestamp - prev).num_seconds().max(0) as f64 / 3600.0;
        let parts_delta = (signal.speed * elapsed_hours).round() as i64;
        if parts_delta <= 0 {
            return Ok(());
        }

        let actual_cycle_minutes = 60.0 / signal.speed;
        self.oee_calculator
            .on_cycle_observation(
                &signal.work_center_id,
                job.planned_cycle_minutes,
                actual_cycle_minutes,
                parts_delta,
                signal.timestamp,
            )
            .map_err(LedgerError::Repository)?;
        Ok(())
    }

    fn lock_last_accepted(&self) -> std::sync::MutexGuard<'_, HashMap<String, NaiveDateTime>> {
        match self.last_accepted.lock() {
            Ok(g) => g,
            Err(poisoned) => poisoned.into_inner(),
        }
    }

    fn lock_stale_flagged(&self) -> std::sync::MutexGuard<'_, HashSet<String>> {
        match self.stale_flagged.lock() {
            Ok(g) => g,
            Err(poisoned) => poisoned.into_inner(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::domain::types::WorkCenterKind;
    use crate::domain::WorkCenter;
    use crate::engine::ledger::JobLedger;
    use crate::repository::{
        ActionLogRepository, ConstraintRepository, DowntimeRepository, OeeSnapshotRepository,
        WorkCenterRepository,
    };
    use rusqlite::Connection;

    struct Fixture {
        ingestor: TelemetryIngestor,
        registry: Arc<WorkCenterRegistry>,
        constraint_engine: Arc<ConstraintEngine>,
    }

    fn setup() -> Fixture {
        let conn = Arc::new(Mutex::new(Connection::open_in_memory().expect("conn")));
        let job_repo = Arc::new(JobRepository::from_connection(conn.clone()).expect("job repo"));
        let constraint_repo =
            Arc::new(ConstraintRepository::from_connection(conn.clone()).expect("constraint repo"));
        let downtime_repo =
            Arc::new(DowntimeRepository::from_connection(conn.clone()).expect("downtime repo"));
        let snapshot_repo =
            Arc::new(OeeSnapshotRepository::from_connection(conn.clone()).expect("oee repo"));
        let wc_repo =
            Arc::new(WorkCenterRepository::from_connection(conn.clone()).expect("wc repo"));
        let action_log_repo =
            Arc::new(ActionLogRepository::from_connection(conn).expect("log repo"));

        let registry = Arc::new(WorkCenterRegistry::new(
            wc_repo,
            OptionalEventPublisher::none(),
        ));
        registry
            .register(&WorkCenter::new(
                "CNC-01".to_string(),
                "一号加工中心".to_string(),
                WorkCenterKind::Machining,
                480.0,
            ))
            .expect("register");

        let ledger = Arc::new(JobLedger::new(
            job_repo.clone(),
            constraint_repo.clone(),
            registry.clone(),
            action_log_repo,
            OptionalEventPublisher::none(),
            3,
        ));
        let constraint_engine = Arc::new(ConstraintEngine::new(
            constraint_repo,
            downtime_repo.clone(),
            job_repo.clone(),
            ledger,
            OptionalEventPublisher::none(),
            SchedulingParams::default(),
        ));
        let oee_calculator = Arc::new(OeeCalculator::new(
            snapshot_repo,
            downtime_repo,
            job_repo.clone(),
            registry.clone(),
            OptionalEventPublisher::none(),
            SchedulingParams::default(),
        ));
        let ingestor = TelemetryIngestor::new(
            registry.clone(),
            constraint_engine.clone(),
            oee_calculator,
            job_repo,
            OptionalEventPublisher::none(),
            SchedulingParams::default(),
        );
        Fixture {
            ingestor,
            registry,
            constraint_engine,
        }
    }

    fn signal(at: NaiveDateTime, temperature: f64, vibration: f64) -> MachineSignal {
        MachineSignal {
            work_center_id: "CNC-01".to_string(),
            timestamp: at,
            speed: 20.0,
            temperature,
            vibration,
            power: 12.0,
        }
    }

    fn now() -> NaiveDateTime {
        chrono::Utc::now().naive_utc()
    }

    #[test]
    fn test_monotonic_rejection() {
        let fx = setup();
        let t = now();

        assert_eq!(
            fx.ingestor.ingest(&signal(t, 40.0, 2.0)).expect("first"),
            IngestOutcome::Accepted
        );
        // 相同时间戳与回拨时间戳都拒绝
        assert_eq!(
            fx.ingestor.ingest(&signal(t, 40.0, 2.0)).expect("same"),
            IngestOutcome::RejectedStale
        );
        assert_eq!(
            fx.ingestor
                .ingest(&signal(t - Duration::seconds(5), 40.0, 2.0))
                .expect("older"),
            IngestOutcome::RejectedStale
        );

        let stats = fx.ingestor.stats();
        assert_eq!(stats.accepted_total, 1);
        assert_eq!(stats.rejected_total, 2);
    }

    #[test]
    fn test_unknown_source_is_error() {
        let fx = setup();
        let mut s = signal(now(), 40.0, 2.0);
        s.work_center_id = "NO-SUCH".to_string();
        assert!(fx.ingestor.ingest(&s).is_err());
    }

    #[test]
    fn test_healthy_signal_keeps_score_high() {
        let fx = setup();
        fx.ingestor
            .ingest(&signal(now(), 40.0, 2.0))
            .expect("ingest");
        let wc = fx.registry.get("CNC-01").expect("get");
        assert!(wc.health_score > 95.0);
    }

    #[test]
    fn test_degraded_signals_raise_breakdown_constraint() {
        let fx = setup();
        let mut t = now();

        // 连续超温超振信号把 EMA 压到阈值之下
        for _ in 0..20 {
            t += Duration::seconds(10);
            fx.ingestor
                .ingest(&signal(t, 190.0, 30.0))
                .expect("ingest");
        }
        let wc = fx.registry.get("CNC-01").expect("get");
        assert!(wc.health_score < SchedulingParams::default().health_critical_threshold);

        let active = fx.constraint_engine.list_active().expect("list");
        let breakdowns: Vec<_> = active
            .iter()
            .filter(|c| c.is_blocking() && c.raised_by == "TELEMETRY")
            .collect();
        // 只挂一条, 不重复
        assert_eq!(breakdowns.len(), 1);
    }

    #[test]
    fn test_stale_scan_flags_once() {
        let fx = setup();
        let t = now() - Duration::seconds(600);
        fx.ingestor.ingest(&signal(t, 40.0, 2.0)).expect("ingest");

        let raised = fx.ingestor.scan_stale_sources(now()).expect("scan");
        assert_eq!(raised, 1);
        // 重复扫描不再挂新约束
        let raised = fx.ingestor.scan_stale_sources(now()).expect("scan");
        assert_eq!(raised, 0);

        // 新信号恢复后可再次触发
        fx.ingestor
            .ingest(&signal(now(), 40.0, 2.0))
            .expect("ingest");
        let raised = fx.ingestor.scan_stale_sources(now()).expect("scan");
        assert_eq!(raised, 0);
    }
}
