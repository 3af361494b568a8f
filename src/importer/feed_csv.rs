// ==========================================
// 车间有限产能排产核心 - CSV 数据回放
// ==========================================
// 职责: 离线 CSV 数据按行回放进引擎 (演示/联调/事故复盘)
// 支持: 遥测 / 质检 / 维保 / 物料 / 工装寿命 五类馈送
// 红线: 单行失败不中断整轮回放, 逐行计入报告
// ==========================================

use crate::domain::{
    MachineSignal, MaintenanceNotice, MaterialNotice, MaterialStatus, QualitySample,
    ToolWearReading,
};
use crate::domain::{ActionLog, ActionType};
use crate::engine::{ConstraintEngine, IngestOutcome, OeeCalculator, TelemetryIngestor};
use crate::i18n::t_with_args;
use crate::importer::error::{FeedError, FeedResult};
use crate::repository::ActionLogRepository;
use chrono::NaiveDateTime;
use csv::ReaderBuilder;
use serde::Deserialize;
use std::fs::File;
use std::path::Path;
use std::sync::Arc;

const TS_FORMAT: &str = "%Y-%m-%d %H:%M:%S";

// ==========================================
// 回放报告
// ==========================================
#[derive(Debug, Clone, Default)]
pub struct ReplayReport {
    /// 读到的总行数
    pub total: usize,
    /// 成功回放
    pub applied: usize,
    /// 业务性拒绝 (如乱序遥测), 不算失败
    pub rejected: usize,
    /// 处理失败 (带行号与原因)
    pub failures: Vec<(usize, String)>,
}

impl ReplayReport {
    fn applied(&mut self) {
        self.applied += 1;
    }

    fn rejected(&mut self) {
        self.rejected += 1;
    }

    fn failed(&mut self, row: usize, message: String) {
        tracing::warn!(row, "回放记录处理失败: {}", message);
        self.failures.push((row, message));
    }
}

// ==========================================
// CSV 行格式
// ==========================================

#[derive(Debug, Deserialize)]
struct TelemetryRow {
    work_center_id: String,
    timestamp: String,
    speed: f64,
    temperature: f64,
    vibration: f64,
    power: f64,
}

#[derive(Debug, Deserialize)]
struct QualityRow {
    work_center_id: Option<String>,
    job_id: Option<String>,
    timestamp: String,
    total_checked: i64,
    defect_count: i64,
}

#[derive(Debug, Deserialize)]
struct MaintenanceRow {
    work_center_id: String,
    unavailable_from: String,
    unavailable_to: String,
    reason: String,
}

#[derive(Debug, Deserialize)]
struct MaterialRow {
    work_center_id: Option<String>,
    job_id: Option<String>,
    material_code: String,
    status: String,
    timestamp: String,
}

#[derive(Debug, Deserialize)]
struct ToolWearRow {
    work_center_id: String,
    tool_id: String,
    life_remaining_pct: f64,
    timestamp: String,
}

// ==========================================
// FeedReplayer - 数据回放器
// ==========================================
pub struct FeedReplayer {
    ingestor: Arc<TelemetryIngestor>,
    oee_calculator: Arc<OeeCalculator>,
    constraint_engine: Arc<ConstraintEngine>,
    action_log_repo: Arc<ActionLogRepository>,
}

impl FeedReplayer {
    pub fn new(
        ingestor: Arc<TelemetryIngestor>,
        oee_calculator: Arc<OeeCalculator>,
        constraint_engine: Arc<ConstraintEngine>,
        action_log_repo: Arc<ActionLogRepository>,
    ) -> Self {
        Self {
            ingestor,
            oee_calculator,
            constraint_engine,
            action_log_repo,
        }
    }

    // ==========================================
    // 各类馈送回放
    // ==========================================

    /// 回放遥测 CSV
    ///
    /// 列: work_center_id, timestamp, speed, temperature, vibration, power
    pub fn replay_telemetry(&self, path: &Path) -> FeedResult<ReplayReport> {
        let mut report = ReplayReport::default();
        for (row, parsed) in self.read_rows::<TelemetryRow>(path)? {
            report.total += 1;
            let record = match parsed {
                Ok(r) => r,
                Err(e) => {
                    report.failed(row, e.to_string());
                    continue;
                }
            };
            let timestamp = match parse_ts(row, "timestamp", &record.timestamp) {
                Ok(t) => t,
                Err(e) => {
                    report.failed(row, e.to_string());
                    continue;
                }
            };
            let signal = MachineSignal {
                work_center_id: record.work_center_id,
                timestamp,
                speed: record.speed,
                temperature: record.temperature,
                vibration: record.vibration,
                power: record.power,
            };
            match self.ingestor.ingest(&signal) {
                Ok(IngestOutcome::Accepted) => report.applied(),
                Ok(IngestOutcome::RejectedStale) => report.rejected(),
                Err(e) => report.failed(row, e.to_string()),
            }
        }
        self.finish("telemetry", path, &report);
        Ok(report)
    }

    /// 回放质检 CSV
    ///
    /// 列: work_center_id, job_id, timestamp, total_checked, defect_count
    pub fn replay_quality(&self, path: &Path) -> FeedResult<ReplayReport> {
        let mut report = ReplayReport::default();
        for (row, parsed) in self.read_rows::<QualityRow>(path)? {
            report.total += 1;
            let record = match parsed {
                Ok(r) => r,
                Err(e) => {
                    report.failed(row, e.to_string());
                    continue;
                }
            };
            let timestamp = match parse_ts(row, "timestamp", &record.timestamp) {
                Ok(t) => t,
                Err(e) => {
                    report.failed(row, e.to_string());
                    continue;
                }
            };
            let sample = QualitySample {
                work_center_id: none_if_empty(record.work_center_id),
                job_id: none_if_empty(record.job_id),
                timestamp,
                total_checked: record.total_checked,
                defect_count: record.defect_count,
            };
            match self.oee_calculator.on_quality_sample(&sample) {
                Ok(_) => report.applied(),
                Err(e) => report.failed(row, e.to_string()),
            }
        }
        self.finish("quality", path, &report);
        Ok(report)
    }

    /// 回放维保窗口 CSV
    ///
    /// 列: work_center_id, unavailable_from, unavailable_to, reason
    pub fn replay_maintenance(&self, path: &Path) -> FeedResult<ReplayReport> {
        let mut report = ReplayReport::default();
        for (row, parsed) in self.read_rows::<MaintenanceRow>(path)? {
            report.total += 1;
            let record = match parsed {
                Ok(r) => r,
                Err(e) => {
                    report.failed(row, e.to_string());
                    continue;
                }
            };
            let from = parse_ts(row, "unavailable_from", &record.unavailable_from);
            let to = parse_ts(row, "unavailable_to", &record.unavailable_to);
            let (from, to) = match (from, to) {
                (Ok(f), Ok(t)) => (f, t),
                (Err(e), _) | (_, Err(e)) => {
                    report.failed(row, e.to_string());
                    continue;
                }
            };
            let notice = MaintenanceNotice {
                work_center_id: record.work_center_id,
                unavailable_from: from,
                unavailable_to: to,
                reason: record.reason,
            };
            match self.constraint_engine.apply_maintenance_notice(&notice) {
                Ok(_) => report.applied(),
                Err(e) => report.failed(row, e.to_string()),
            }
        }
        self.finish("maintenance", path, &report);
        Ok(report)
    }

    /// 回放物料可用度 CSV
    ///
    /// 列: work_center_id, job_id, material_code, status, timestamp
    pub fn replay_material(&self, path: &Path) -> FeedResult<ReplayReport> {
        let mut report = ReplayReport::default();
        for (row, parsed) in self.read_rows::<MaterialRow>(path)? {
            report.total += 1;
            let record = match parsed {
                Ok(r) => r,
                Err(e) => {
                    report.failed(row, e.to_string());
                    continue;
                }
            };
            let timestamp = match parse_ts(row, "timestamp", &record.timestamp) {
                Ok(t) => t,
                Err(e) => {
                    report.failed(row, e.to_string());
                    continue;
                }
            };
            let notice = MaterialNotice {
                work_center_id: none_if_empty(record.work_center_id),
                job_id: none_if_empty(record.job_id),
                material_code: record.material_code,
                status: MaterialStatus::from_str(&record.status),
                timestamp,
            };
            match self.constraint_engine.apply_material_notice(&notice) {
                // 充足/过剩不落约束, 也算成功回放
                Ok(_) => report.applied(),
                Err(e) => report.failed(row, e.to_string()),
            }
        }
        self.finish("material", path, &report);
        Ok(report)
    }

    /// 回放工装寿命 CSV
    ///
    /// 列: work_center_id, tool_id, life_remaining_pct, timestamp
    pub fn replay_tool_wear(&self, path: &Path) -> FeedResult<ReplayReport> {
        let mut report = ReplayReport::default();
        for (row, parsed) in self.read_rows::<ToolWearRow>(path)? {
            report.total += 1;
            let record = match parsed {
                Ok(r) => r,
                Err(e) => {
                    report.failed(row, e.to_string());
                    continue;
                }
            };
            let timestamp = match parse_ts(row, "timestamp", &record.timestamp) {
                Ok(t) => t,
                Err(e) => {
                    report.failed(row, e.to_string());
                    continue;
                }
            };
            let reading = ToolWearReading {
                work_center_id: record.work_center_id,
                tool_id: record.tool_id,
                life_remaining_pct: record.life_remaining_pct,
                timestamp,
            };
            match self.constraint_engine.apply_tool_wear(&reading) {
                Ok(_) => report.applied(),
                Err(e) => report.failed(row, e.to_string()),
            }
        }
        self.finish("tool_wear", path, &report);
        Ok(report)
    }

    // ==========================================
    // 内部
    // ==========================================

    fn read_rows<T: serde::de::DeserializeOwned>(
        &self,
        path: &Path,
    ) -> FeedResult<Vec<(usize, Result<T, csv::Error>)>> {
        if !path.exists() {
            return Err(FeedError::FileNotFound(t_with_args(
                "feed.file_not_found",
                &[("path", &path.display().to_string())],
            )));
        }
        if path.extension().map(|e| e != "csv").unwrap_or(true) {
            return Err(FeedError::UnsupportedFormat(
                path.extension()
                    .map(|e| e.to_string_lossy().to_string())
                    .unwrap_or_default(),
            ));
        }

        let file = File::open(path)?;
        let mut reader = ReaderBuilder::new()
            .has_headers(true)
            .trim(csv::Trim::All)
            .from_reader(file);
        // 行号从 2 起算 (1 为表头), 报告对人可读
        Ok(reader
            .deserialize::<T>()
            .enumerate()
            .map(|(i, r)| (i + 2, r))
            .collect())
    }

    fn finish(&self, feed: &str, path: &Path, report: &ReplayReport) {
        tracing::info!(
            feed,
            path = %path.display(),
            total = report.total,
            applied = report.applied,
            rejected = report.rejected,
            failed = report.failures.len(),
            "{}",
            t_with_args("feed.replay_done", &[("count", &report.total.to_string())])
        );
        let log = ActionLog::new(ActionType::FeedReplay, "FeedReplayer".to_string()).with_detail(
            format!(
                "{} {}: 共 {} 条, 成功 {}, 拒绝 {}, 失败 {}",
                feed,
                path.display(),
                report.total,
                report.applied,
                report.rejected,
                report.failures.len()
            ),
        );
        if let Err(e) = self.action_log_repo.insert(&log) {
            tracing::error!("操作日志写入失败: {}", e);
        }
    }
}

fn parse_ts(row: usize, field: &str, value: &str) -> FeedResult<NaiveDateTime> {
    NaiveDateTime::parse_from_str(value, TS_FORMAT).map_err(|_| FeedError::TimestampFormatError {
        row,
        field: field.to_string(),
        value: value.to_string(),
    })
}

fn none_if_empty(value: Option<String>) -> Option<String> {
    value.filter(|v| !v.trim().is_empty())
}
