// ==========================================
// 车间有限产能排产核心 - API 层
// ==========================================
// 分层: 指令接口(写) + 查询接口(读), 引擎之上的唯一外部表面
// ==========================================

pub mod command_api;
pub mod error;
pub mod query_api;

pub use command_api::{CommandApi, ReleaseJobRequest, ReportConstraintRequest};
pub use error::{ApiError, ApiResult};
pub use query_api::{FloorView, OeeMetric, QueryApi};
