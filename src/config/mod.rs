// ==========================================
// 车间有限产能排产核心 - 配置层
// ==========================================
// 存储: config_kv 表 (scope + key-value)
// ==========================================

pub mod config_manager;

pub use config_manager::{config_keys, ConfigManager, SchedulingParams, SchedulingParamsReader};
