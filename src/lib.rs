// ==========================================
// 车间有限产能排产核心 - 核心库
// ==========================================
// 技术栈: Rust + Tokio + SQLite
// 系统定位: 短周期(班次~当日)有限产能排产与OEE核算
// ==========================================

// 初始化国际化系统
rust_i18n::i18n!("locales", fallback = "zh-CN");

// ==========================================
// 模块声明
// ==========================================

// 领域层 - 实体与类型
pub mod domain;

// 数据仓储层 - 数据访问
pub mod repository;

// 引擎层 - 业务规则
pub mod engine;

// 导入层 - 外部数据回放
pub mod importer;

// 配置层 - 系统配置
pub mod config;

// 数据库基础设施（连接初始化/PRAGMA 统一）
pub mod db;

// 日志系统
pub mod logging;

// 国际化
pub mod i18n;

// API 层 - 业务接口
pub mod api;

// 应用层 - 装配与运行
pub mod app;

// ==========================================
// 重导出核心类型
// ==========================================

// 领域类型
pub use domain::types::{
    ConstraintSeverity, ConstraintType, DowntimeCategory, DowntimeKind, JobPriority, JobState,
    WorkCenterKind, WorkCenterStatus,
};

// 领域实体
pub use domain::{
    ActionLog, ActionType, Constraint, DowntimeInterval, Job, MachineSignal, MaintenanceNotice,
    MaterialNotice, OeeSnapshot, QualitySample, ToolWearReading, WorkCenter,
};

// 引擎
pub use engine::{
    ConstraintEngine, EventBus, JobLedger, OeeCalculator, ScheduleDelta, Scheduler,
    TelemetryIngestor, WorkCenterRegistry,
};

// API
pub use api::{ApiError, ApiResult, CommandApi, QueryApi};

// ==========================================
// 常量定义
// ==========================================

// 系统版本
pub const VERSION: &str = env!("CARGO_PKG_VERSION");

// 系统名称
pub const APP_NAME: &str = "车间有限产能排产核心";

// 数据库版本
pub const DB_VERSION: &str = "v0.1";

// ==========================================
// 预编译检查
// ==========================================
