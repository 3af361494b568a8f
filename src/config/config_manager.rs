// ==========================================
// 车间有限产能排产核心 - 配置管理器
// ==========================================
// 职责: 配置加载、查询、覆写管理
// 存储: config_kv 表 (key-value + scope)
// 说明: 配置缺失时使用内置默认值, 不报错
// ==========================================

use crate::db::open_sqlite_connection;
use async_trait::async_trait;
use rusqlite::{params, Connection};
use serde_json::json;
use std::collections::HashMap;
use std::error::Error;
use std::str::FromStr;
use std::sync::{Arc, Mutex};

// ==========================================
// 配置键全集
// ==========================================
pub mod config_keys {
    // ===== 遥测健康度 =====
    /// 温度标称带下限 (摄氏度)
    pub const NOMINAL_TEMP_LOW: &str = "telemetry/nominal_temp_low";
    /// 温度标称带上限 (摄氏度)
    pub const NOMINAL_TEMP_HIGH: &str = "telemetry/nominal_temp_high";
    /// 振动标称上限 (mm/s)
    pub const NOMINAL_VIBRATION_MAX: &str = "telemetry/nominal_vibration_max";
    /// 健康度 EMA 平滑系数 (0-1)
    pub const HEALTH_EMA_ALPHA: &str = "telemetry/health_ema_alpha";
    /// 健康度故障阈值 (低于此值上报故障约束)
    pub const HEALTH_CRITICAL_THRESHOLD: &str = "telemetry/health_critical_threshold";
    /// 遥测源静默判定秒数
    pub const STALENESS_SECONDS: &str = "telemetry/staleness_seconds";

    // ===== 排产 =====
    /// 计划窗口长度 (分钟)
    pub const PLANNING_WINDOW_MINUTES: &str = "scheduler/planning_window_minutes";

    // ===== OEE =====
    /// OEE 滚动窗口长度 (分钟)
    pub const OEE_WINDOW_MINUTES: &str = "oee/window_minutes";

    // ===== 并发 =====
    /// 乐观锁冲突内部重试上限
    pub const REVISION_RETRY_LIMIT: &str = "concurrency/revision_retry_limit";
    /// 事件总线缓冲容量
    pub const BUS_BUFFER_CAPACITY: &str = "bus/buffer_capacity";

    // ===== 工装 =====
    /// 工装剩余寿命告警阈值 (百分比)
    pub const TOOL_WEAR_THRESHOLD_PCT: &str = "tooling/wear_threshold_pct";
}

// ==========================================
// SchedulingParams - 引擎运行参数
// ==========================================
// 引擎在构造/刷新时整体加载, 不在热路径上逐键查库
#[derive(Debug, Clone)]
pub struct SchedulingParams {
    pub nominal_temp_low: f64,
    pub nominal_temp_high: f64,
    pub nominal_vibration_max: f64,
    pub health_ema_alpha: f64,
    pub health_critical_threshold: f64,
    pub staleness_seconds: i64,
    pub planning_window_minutes: f64,
    pub oee_window_minutes: f64,
    pub revision_retry_limit: u32,
    pub bus_buffer_capacity: usize,
    pub tool_wear_threshold_pct: f64,
}

impl Default for SchedulingParams {
    fn default() -> Self {
        Self {
            nominal_temp_low: 18.0,
            nominal_temp_high: 75.0,
            nominal_vibration_max: 8.0,
            health_ema_alpha: 0.3,
            health_critical_threshold: 40.0,
            staleness_seconds: 120,
            planning_window_minutes: 480.0,
            oee_window_minutes: 480.0,
            revision_retry_limit: 3,
            bus_buffer_capacity: 1024,
            tool_wear_threshold_pct: 10.0,
        }
    }
}

// ==========================================
// SchedulingParamsReader - 配置读取 trait
// ==========================================
/// 引擎运行参数读取接口
///
/// 阶段任务在启动与刷新时通过此 trait 加载参数,
/// 测试中可用固定参数实现替代数据库
#[async_trait]
pub trait SchedulingParamsReader: Send + Sync {
    async fn load_params(&self) -> Result<SchedulingParams, Box<dyn Error + Send + Sync>>;
}

// ==========================================
// ConfigManager - 配置管理器
// ==========================================
pub struct ConfigManager {
    conn: Arc<Mutex<Connection>>,
}

impl ConfigManager {
    /// 创建新的 ConfigManager 实例
    pub fn new(db_path: &str) -> Result<Self, Box<dyn Error>> {
        let conn = open_sqlite_connection(db_path)?;
        let manager = Self {
            conn: Arc::new(Mutex::new(conn)),
        };
        manager.ensure_table()?;
        Ok(manager)
    }

    /// 从已有连接创建 ConfigManager
    ///
    /// 说明：为保证连接行为一致，会对传入连接再次应用统一 PRAGMA（幂等）。
    pub fn from_connection(conn: Arc<Mutex<Connection>>) -> Result<Self, Box<dyn Error>> {
        {
            let conn_guard = conn.lock().map_err(|e| format!("锁获取失败: {}", e))?;
            crate::db::configure_sqlite_connection(&conn_guard)?;
        }
        let manager = Self { conn };
        manager.ensure_table()?;
        Ok(manager)
    }

    fn ensure_table(&self) -> Result<(), Box<dyn Error>> {
        let conn = self.conn.lock().map_err(|e| format!("锁获取失败: {}", e))?;
        conn.execute_batch(
            r#"
            CREATE TABLE IF NOT EXISTS config_kv (
              scope_id TEXT NOT NULL,
              key TEXT NOT NULL,
              value TEXT NOT NULL,
              PRIMARY KEY (scope_id, key)
            );
            "#,
        )?;
        Ok(())
    }

    /// 从 config_kv 表读取配置值（scope_id='global'）
    fn get_config_value(&self, key: &str) -> Result<Option<String>, Box<dyn Error>> {
        let conn = self.conn.lock().map_err(|e| format!("锁获取失败: {}", e))?;

        let result = conn.query_row(
            "SELECT value FROM config_kv WHERE scope_id = 'global' AND key = ?1",
            params![key],
            |row| row.get::<_, String>(0),
        );

        match result {
            Ok(value) => Ok(Some(value)),
            Err(rusqlite::Error::QueryReturnedNoRows) => Ok(None),
            Err(e) => Err(Box::new(e)),
        }
    }

    /// 写入配置值（scope_id='global', UPSERT）
    pub fn set_config_value(&self, key: &str, value: &str) -> Result<(), Box<dyn Error>> {
        let conn = self.conn.lock().map_err(|e| format!("锁获取失败: {}", e))?;
        conn.execute(
            "INSERT INTO config_kv (scope_id, key, value) VALUES ('global', ?1, ?2)
             ON CONFLICT(scope_id, key) DO UPDATE SET value = ?2",
            params![key, value],
        )?;
        Ok(())
    }

    /// 读取并解析为指定类型, 缺失或解析失败时用默认值
    ///
    /// 解析失败记一条 warn, 不中断调用方
    fn get_parsed_or<T: FromStr + Copy>(&self, key: &str, default: T) -> Result<T, Box<dyn Error>> {
        match self.get_config_value(key)? {
            Some(raw) => match raw.parse::<T>() {
                Ok(v) => Ok(v),
                Err(_) => {
                    tracing::warn!(key, raw, "配置值解析失败, 使用默认值");
                    Ok(default)
                }
            },
            None => Ok(default),
        }
    }

    /// 整体加载引擎运行参数
    pub fn load_scheduling_params(&self) -> Result<SchedulingParams, Box<dyn Error>> {
        let d = SchedulingParams::default();
        Ok(SchedulingParams {
            nominal_temp_low: self
                .get_parsed_or(config_keys::NOMINAL_TEMP_LOW, d.nominal_temp_low)?,
            nominal_temp_high: self
                .get_parsed_or(config_keys::NOMINAL_TEMP_HIGH, d.nominal_temp_high)?,
            nominal_vibration_max: self
                .get_parsed_or(config_keys::NOMINAL_VIBRATION_MAX, d.nominal_vibration_max)?,
            health_ema_alpha: self
                .get_parsed_or(config_keys::HEALTH_EMA_ALPHA, d.health_ema_alpha)?,
            health_critical_threshold: self.get_parsed_or(
                config_keys::HEALTH_CRITICAL_THRESHOLD,
                d.health_critical_threshold,
            )?,
            staleness_seconds: self
                .get_parsed_or(config_keys::STALENESS_SECONDS, d.staleness_seconds)?,
            planning_window_minutes: self.get_parsed_or(
                config_keys::PLANNING_WINDOW_MINUTES,
                d.planning_window_minutes,
            )?,
            oee_window_minutes: self
                .get_parsed_or(config_keys::OEE_WINDOW_MINUTES, d.oee_window_minutes)?,
            revision_retry_limit: self
                .get_parsed_or(config_keys::REVISION_RETRY_LIMIT, d.revision_retry_limit)?,
            bus_buffer_capacity: self
                .get_parsed_or(config_keys::BUS_BUFFER_CAPACITY, d.bus_buffer_capacity)?,
            tool_wear_threshold_pct: self.get_parsed_or(
                config_keys::TOOL_WEAR_THRESHOLD_PCT,
                d.tool_wear_threshold_pct,
            )?,
        })
    }

    /// 获取所有配置的快照（JSON格式）
    pub fn get_config_snapshot(&self) -> Result<String, Box<dyn Error>> {
        let conn = self.conn.lock().map_err(|e| format!("锁获取失败: {}", e))?;

        let mut stmt =
            conn.prepare("SELECT key, value FROM config_kv WHERE scope_id = 'global' ORDER BY key")?;

        let mut config_map: HashMap<String, String> = HashMap::new();
        let rows = stmt.query_map([], |row| {
            Ok((row.get::<_, String>(0)?, row.get::<_, String>(1)?))
        })?;

        for row in rows {
            let (key, value) = row?;
            config_map.insert(key, value);
        }

        let json_value = json!(config_map);
        Ok(serde_json::to_string(&json_value)?)
    }

    /// 从配置快照恢复配置
    ///
    /// # 注意
    /// 此方法会覆盖现有的 global 配置
    pub fn restore_config_from_snapshot(&self, snapshot_json: &str) -> Result<usize, Box<dyn Error>> {
        let config_map: HashMap<String, String> = serde_json::from_str(snapshot_json)?;

        let conn = self.conn.lock().map_err(|e| format!("锁获取失败: {}", e))?;
        conn.execute("BEGIN TRANSACTION", [])?;

        let mut count = 0;
        for (key, value) in config_map.iter() {
            let affected = conn.execute(
                "INSERT INTO config_kv (scope_id, key, value) VALUES ('global', ?1, ?2)
                 ON CONFLICT(scope_id, key) DO UPDATE SET value = ?2",
                params![key, value],
            )?;
            count += affected;
        }

        conn.execute("COMMIT", [])?;
        Ok(count)
    }
}

#[async_trait]
impl SchedulingParamsReader for ConfigManager {
    async fn load_params(&self) -> Result<SchedulingParams, Box<dyn Error + Send + Sync>> {
        self.load_scheduling_params()
            .map_err(|e| -> Box<dyn Error + Send + Sync> { e.to_string().into() })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn setup_manager() -> ConfigManager {
        ConfigManager::new(":memory:").expect("Failed to create config manager")
    }

    #[test]
    fn test_defaults_when_empty() {
        let manager = setup_manager();
        let params = manager.load_scheduling_params().expect("Failed to load");
        assert_eq!(params.planning_window_minutes, 480.0);
        assert_eq!(params.revision_retry_limit, 3);
        assert_eq!(params.staleness_seconds, 120);
    }

    #[test]
    fn test_set_and_load_override() {
        let manager = setup_manager();
        manager
            .set_config_value(config_keys::HEALTH_CRITICAL_THRESHOLD, "55.5")
            .expect("Failed to set");
        manager
            .set_config_value(config_keys::PLANNING_WINDOW_MINUTES, "960")
            .expect("Failed to set");

        let params = manager.load_scheduling_params().expect("Failed to load");
        assert_eq!(params.health_critical_threshold, 55.5);
        assert_eq!(params.planning_window_minutes, 960.0);
    }

    #[test]
    fn test_unparseable_value_falls_back() {
        let manager = setup_manager();
        manager
            .set_config_value(config_keys::STALENESS_SECONDS, "not-a-number")
            .expect("Failed to set");

        let params = manager.load_scheduling_params().expect("Failed to load");
        assert_eq!(params.staleness_seconds, 120);
    }

    #[test]
    fn test_snapshot_restore_round_trip() {
        let manager = setup_manager();
        manager
            .set_config_value(config_keys::OEE_WINDOW_MINUTES, "240")
            .expect("Failed to set");

        let snapshot = manager.get_config_snapshot().expect("Failed to snapshot");

        let other = setup_manager();
        let restored = other
            .restore_config_from_snapshot(&snapshot)
            .expect("Failed to restore");
        assert_eq!(restored, 1);
        let params = other.load_scheduling_params().expect("Failed to load");
        assert_eq!(params.oee_window_minutes, 240.0);
    }
}
