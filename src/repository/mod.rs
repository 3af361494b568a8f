// ==========================================
// 车间有限产能排产核心 - 数据仓储层
// ==========================================
// 职责: 提供数据访问接口,屏蔽数据库细节
// 红线: Repository 不含业务逻辑
// 约束: 所有查询使用参数化,防止 SQL 注入
// ==========================================

pub mod action_log_repo;
pub mod constraint_repo;
pub mod downtime_repo;
pub mod error;
pub mod job_repo;
pub mod oee_repo;
pub mod work_center_repo;

// 重导出核心仓储
pub use action_log_repo::ActionLogRepository;
pub use constraint_repo::{ConstraintFilter, ConstraintRepository};
pub use downtime_repo::DowntimeRepository;
pub use error::{RepositoryError, RepositoryResult};
pub use job_repo::JobRepository;
pub use oee_repo::OeeSnapshotRepository;
pub use work_center_repo::WorkCenterRepository;
