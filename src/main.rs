// ==========================================
// 车间有限产能排产核心 - 服务主入口
// ==========================================
// 技术栈: Tokio + Rust + SQLite
// 系统定位: 短周期(班次~当日)有限产能排产与OEE核算
// ==========================================

use shopfloor_aps::app::{get_default_db_path, spawn_stages, AppState};
use shopfloor_aps::importer::FeedReplayer;
use shopfloor_aps::logging;
use shopfloor_aps::repository::ActionLogRepository;
use std::path::PathBuf;
use std::sync::Arc;

#[tokio::main]
async fn main() {
    logging::init();

    tracing::info!("==================================================");
    tracing::info!("{}", shopfloor_aps::APP_NAME);
    tracing::info!("系统版本: {}", shopfloor_aps::VERSION);
    tracing::info!("==================================================");

    let db_path = get_default_db_path();
    tracing::info!("使用数据库: {}", db_path);

    let state = match AppState::new(db_path) {
        Ok(s) => Arc::new(s),
        Err(e) => {
            tracing::error!("AppState初始化失败: {}", e);
            std::process::exit(1);
        }
    };

    // 可选: 启动前回放离线数据 (--replay-<feed> <path>)
    if let Err(e) = run_replay_args(&state) {
        tracing::error!("数据回放失败: {}", e);
        std::process::exit(1);
    }

    let stages = spawn_stages(state.clone());
    tracing::info!("后台阶段任务已启动, Ctrl-C 停机");

    match tokio::signal::ctrl_c().await {
        Ok(()) => tracing::info!("收到停机信号"),
        Err(e) => tracing::error!("停机信号监听失败: {}", e),
    }

    stages.shutdown().await;
    let stats = state.query_api.bus_stats();
    tracing::info!(
        published_total = stats.published_total,
        dropped_total = stats.dropped_total,
        "服务已退出"
    );
}

/// 解析回放参数
///
/// 支持: --replay-telemetry / --replay-quality / --replay-maintenance
///       / --replay-material / --replay-tool-wear, 各接一个 CSV 路径
fn run_replay_args(state: &Arc<AppState>) -> Result<(), String> {
    let args: Vec<String> = std::env::args().skip(1).collect();
    if args.is_empty() {
        return Ok(());
    }

    let action_log_repo = Arc::new(
        ActionLogRepository::new(state.get_db_path())
            .map_err(|e| format!("无法创建ActionLogRepository: {}", e))?,
    );
    let replayer = FeedReplayer::new(
        state.ingestor.clone(),
        state.oee_calculator.clone(),
        state.constraint_engine.clone(),
        action_log_repo,
    );

    let mut iter = args.iter();
    while let Some(flag) = iter.next() {
        let path = iter
            .next()
            .map(PathBuf::from)
            .ok_or_else(|| format!("参数 {} 缺少文件路径", flag))?;
        let report = match flag.as_str() {
            "--replay-telemetry" => replayer.replay_telemetry(&path),
            "--replay-quality" => replayer.replay_quality(&path),
            "--replay-maintenance" => replayer.replay_maintenance(&path),
            "--replay-material" => replayer.replay_material(&path),
            "--replay-tool-wear" => replayer.replay_tool_wear(&path),
            other => return Err(format!("未知参数: {}", other)),
        }
        .map_err(|e| e.to_string())?;
        tracing::info!(
            flag = flag.as_str(),
            total = report.total,
            applied = report.applied,
            rejected = report.rejected,
            failed = report.failures.len(),
            "回放完成"
        );
    }
    Ok(())
}
