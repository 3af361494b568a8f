// ==========================================
// 车间有限产能排产核心 - 应用层
// ==========================================
// 职责: 状态装配 + 后台阶段任务
// ==========================================

pub mod stages;
pub mod state;

pub use stages::{spawn_stages, StageHandles};
pub use state::{get_default_db_path, AppState};
