// ==========================================
// 车间有限产能排产核心 - 应用状态
// ==========================================
// 职责: 装配根 (仓储 -> 引擎 -> API), 共享单一数据库连接
// ==========================================

use std::sync::{Arc, Mutex};

use crate::api::{CommandApi, QueryApi};
use crate::config::config_manager::ConfigManager;
use crate::config::SchedulingParams;
use crate::db::open_sqlite_connection;
use crate::engine::{
    ConstraintEngine, EventBus, FloorEventPublisher, JobLedger, OeeCalculator,
    OptionalEventPublisher, Scheduler, TelemetryIngestor, WorkCenterRegistry,
};
use crate::repository::{
    ActionLogRepository, ConstraintRepository, DowntimeRepository, JobRepository,
    OeeSnapshotRepository, WorkCenterRepository,
};

/// 应用状态
///
/// 所有引擎与 API 实例共享同一个 SQLite 连接和事件总线
pub struct AppState {
    /// 数据库路径
    pub db_path: String,

    /// 引擎运行参数 (启动时从配置库加载)
    pub params: SchedulingParams,

    /// 配置管理器
    pub config_manager: Arc<ConfigManager>,

    /// 事件总线
    pub bus: Arc<EventBus>,

    /// 工作中心注册表
    pub registry: Arc<WorkCenterRegistry>,

    /// 作业台账
    pub ledger: Arc<JobLedger>,

    /// 约束引擎
    pub constraint_engine: Arc<ConstraintEngine>,

    /// OEE 计算器
    pub oee_calculator: Arc<OeeCalculator>,

    /// 遥测接收器
    pub ingestor: Arc<TelemetryIngestor>,

    /// 排产器
    pub scheduler: Arc<Scheduler>,

    /// 指令接口
    pub command_api: Arc<CommandApi>,

    /// 查询接口
    pub query_api: Arc<QueryApi>,
}

impl AppState {
    /// 创建新的 AppState 实例
    ///
    /// 按 仓储 -> 引擎 -> API 的顺序装配; 任一步失败立即返回
    pub fn new(db_path: String) -> Result<Self, String> {
        tracing::info!("初始化AppState, 数据库路径: {}", db_path);

        let conn = open_sqlite_connection(&db_path)
            .map_err(|e| format!("无法打开数据库: {}", e))?;
        let conn = Arc::new(Mutex::new(conn));

        // ==========================================
        // 初始化仓储层
        // ==========================================
        let work_center_repo = Arc::new(
            WorkCenterRepository::from_connection(conn.clone())
                .map_err(|e| format!("无法创建WorkCenterRepository: {}", e))?,
        );
        let job_repo = Arc::new(
            JobRepository::from_connection(conn.clone())
                .map_err(|e| format!("无法创建JobRepository: {}", e))?,
        );
        let constraint_repo = Arc::new(
            ConstraintRepository::from_connection(conn.clone())
                .map_err(|e| format!("无法创建ConstraintRepository: {}", e))?,
        );
        let downtime_repo = Arc::new(
            DowntimeRepository::from_connection(conn.clone())
                .map_err(|e| format!("无法创建DowntimeRepository: {}", e))?,
        );
        let oee_repo = Arc::new(
            OeeSnapshotRepository::from_connection(conn.clone())
                .map_err(|e| format!("无法创建OeeSnapshotRepository: {}", e))?,
        );
        let action_log_repo = Arc::new(
            ActionLogRepository::from_connection(conn.clone())
                .map_err(|e| format!("无法创建ActionLogRepository: {}", e))?,
        );

        // ==========================================
        // 配置与总线
        // ==========================================
        let config_manager = Arc::new(
            ConfigManager::from_connection(conn)
                .map_err(|e| format!("无法创建ConfigManager: {}", e))?,
        );
        let params = config_manager
            .load_scheduling_params()
            .map_err(|e| format!("无法加载运行参数: {}", e))?;
        tracing::info!(
            oee_window_minutes = params.oee_window_minutes,
            planning_window_minutes = params.planning_window_minutes,
            "运行参数已加载"
        );

        let bus = Arc::new(EventBus::new(params.bus_buffer_capacity));
        let publisher =
            || OptionalEventPublisher::with_publisher(bus.clone() as Arc<dyn FloorEventPublisher>);

        // ==========================================
        // 初始化引擎层
        // ==========================================
        let registry = Arc::new(WorkCenterRegistry::new(work_center_repo, publisher()));
        let ledger = Arc::new(JobLedger::new(
            job_repo.clone(),
            constraint_repo.clone(),
            registry.clone(),
            action_log_repo.clone(),
            publisher(),
            params.revision_retry_limit,
        ));
        let constraint_engine = Arc::new(ConstraintEngine::new(
            constraint_repo.clone(),
            downtime_repo.clone(),
            job_repo.clone(),
            ledger.clone(),
            publisher(),
            params.clone(),
        ));
        let oee_calculator = Arc::new(OeeCalculator::new(
            oee_repo,
            downtime_repo.clone(),
            job_repo.clone(),
            registry.clone(),
            publisher(),
            params.clone(),
        ));
        let ingestor = Arc::new(TelemetryIngestor::new(
            registry.clone(),
            constraint_engine.clone(),
            oee_calculator.clone(),
            job_repo.clone(),
            publisher(),
            params.clone(),
        ));
        let scheduler = Arc::new(Scheduler::new(
            job_repo,
            registry.clone(),
            ledger.clone(),
            publisher(),
            params.clone(),
        ));

        // ==========================================
        // 初始化API层
        // ==========================================
        let command_api = Arc::new(CommandApi::new(
            registry.clone(),
            ledger.clone(),
            constraint_engine.clone(),
            scheduler.clone(),
            ingestor.clone(),
            action_log_repo.clone(),
        ));
        let query_api = Arc::new(QueryApi::new(
            registry.clone(),
            ledger.clone(),
            constraint_repo,
            downtime_repo,
            action_log_repo,
            oee_calculator.clone(),
            ingestor.clone(),
            bus.clone(),
        ));

        tracing::info!("AppState初始化完成");

        Ok(Self {
            db_path,
            params,
            config_manager,
            bus,
            registry,
            ledger,
            constraint_engine,
            oee_calculator,
            ingestor,
            scheduler,
            command_api,
            query_api,
        })
    }

    /// 获取数据库路径
    pub fn get_db_path(&self) -> &str {
        &self.db_path
    }
}

// ==========================================
// 默认数据库路径辅助函数
// ==========================================

/// 获取默认数据库路径
///
/// 环境变量 SHOPFLOOR_APS_DB_PATH 优先; 否则使用用户数据目录,
/// 开发与生产环境分开, 避免污染生产数据
pub fn get_default_db_path() -> String {
    use std::path::PathBuf;

    if let Ok(path) = std::env::var("SHOPFLOOR_APS_DB_PATH") {
        let trimmed = path.trim();
        if !trimmed.is_empty() {
            return trimmed.to_string();
        }
    }

    let mut path = PathBuf::from("./shopfloor_aps.db");

    if let Some(data_dir) = dirs::data_dir() {
        #[cfg(debug_assertions)]
        {
            path = data_dir.join("shopfloor-aps-dev");
        }

        #[cfg(not(debug_assertions))]
        {
            path = data_dir.join("shopfloor-aps");
        }

        std::fs::create_dir_all(&path).ok();
        path = path.join("shopfloor_aps.db");
    }

    path.to_string_lossy().to_string()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_get_default_db_path() {
        let path = get_default_db_path();
        assert!(!path.is_empty());
        assert!(path.ends_with(".db"));
    }

    #[test]
    fn test_app_state_assembles_on_temp_db() {
        let dir = tempfile::tempdir().expect("tempdir");
        let db_path = dir.path().join("assemble.db");
        let state =
            AppState::new(db_path.to_string_lossy().to_string()).expect("assemble app state");

        assert!(state.query_api.list_work_centers().expect("list").is_empty());
        assert_eq!(state.params.revision_retry_limit, 3);
    }
}
