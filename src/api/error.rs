// ==========================================
// 车间有限产能排产核心 - API层错误类型
// ==========================================
// 职责: 把仓储/台账层技术错误折算为指令方可读的业务错误
// 红线: 每个错误必须带显式原因, 可解释可追溯
// ==========================================

use crate::engine::LedgerError;
use crate::repository::error::RepositoryError;
use thiserror::Error;

/// API层错误类型
#[derive(Error, Debug)]
pub enum ApiError {
    // ==========================================
    // 业务规则错误
    // ==========================================
    #[error("资源未找到: {0}")]
    NotFound(String),

    #[error("无效的状态迁移: from={from} to={to}")]
    InvalidTransition { from: String, to: String },

    /// 关键约束阻塞, 指令被拒
    #[error("作业被关键约束阻塞: {job_id} (生效关键约束 {critical_count} 条)")]
    Blocked {
        job_id: String,
        critical_count: usize,
    },

    #[error("无效输入: {0}")]
    Validation(String),

    #[error("业务规则违反: {0}")]
    BusinessRuleViolation(String),

    // ==========================================
    // 数据语义错误
    // ==========================================
    /// 乱序遥测信号 (时间戳未前进)
    #[error("遥测信号乱序: {0}")]
    StaleSignal(String),

    /// OEE 指标缺失分母, 不提供数值
    #[error("指标未定义 (缺失分母): {0}")]
    UndefinedMetric(String),

    // ==========================================
    // 并发控制错误
    // ==========================================
    #[error("并发修改冲突: {0}")]
    ConcurrentModification(String),

    // ==========================================
    // 数据访问错误
    // ==========================================
    #[error("数据库错误: {0}")]
    DatabaseError(String),

    #[error("数据库连接失败: {0}")]
    DatabaseConnectionError(String),

    // ==========================================
    // 通用错误
    // ==========================================
    #[error("内部错误: {0}")]
    InternalError(String),

    #[error(transparent)]
    Other(#[from] anyhow::Error),
}

/// Result 类型别名
pub type ApiResult<T> = Result<T, ApiError>;

// ==========================================
// 从 RepositoryError 转换
// ==========================================
impl From<RepositoryError> for ApiError {
    fn from(err: RepositoryError) -> Self {
        match err {
            RepositoryError::OptimisticLockFailure {
                job_id,
                expected,
                actual,
            } => ApiError::ConcurrentModification(format!(
                "作业{}已被并发修改 (期望revision={}, 实际revision={})",
                job_id, expected, actual
            )),

            RepositoryError::NotFound { entity, id } => {
                ApiError::NotFound(format!("{}(id={})不存在", entity, id))
            }
            RepositoryError::DatabaseConnectionError(msg) => ApiError::DatabaseConnectionError(msg),
            RepositoryError::LockError(msg) => {
                ApiError::DatabaseConnectionError(format!("数据库锁获取失败: {}", msg))
            }
            RepositoryError::DatabaseTransactionError(msg)
            | RepositoryError::DatabaseQueryError(msg) => ApiError::DatabaseError(msg),
            RepositoryError::UniqueConstraintViolation(msg) => {
                ApiError::BusinessRuleViolation(format!("唯一约束违反: {}", msg))
            }
            RepositoryError::ForeignKeyViolation(msg) => {
                ApiError::BusinessRuleViolation(format!("外键约束违反: {}", msg))
            }

            RepositoryError::BusinessRuleViolation(msg) => ApiError::BusinessRuleViolation(msg),
            RepositoryError::InvalidStateTransition { from, to } => {
                ApiError::InvalidTransition { from, to }
            }

            RepositoryError::ValidationError(msg) => ApiError::Validation(msg),
            RepositoryError::FieldValueError { field, message } => {
                ApiError::Validation(format!("字段{}错误: {}", field, message))
            }

            RepositoryError::InternalError(msg) => ApiError::InternalError(msg),
            RepositoryError::Other(err) => ApiError::Other(err),
        }
    }
}

// ==========================================
// 从 LedgerError 转换
// ==========================================
impl From<LedgerError> for ApiError {
    fn from(err: LedgerError) -> Self {
        match err {
            LedgerError::NotFound { job_id } => {
                ApiError::NotFound(format!("Job(id={})不存在", job_id))
            }
            LedgerError::InvalidTransition { from, to } => ApiError::InvalidTransition {
                from: from.to_string(),
                to: to.to_string(),
            },
            LedgerError::Blocked {
                job_id,
                critical_count,
            } => ApiError::Blocked {
                job_id,
                critical_count,
            },
            LedgerError::Conflict { job_id, attempts } => ApiError::ConcurrentModification(
                format!("作业{}持续冲突, 重试{}次后放弃", job_id, attempts),
            ),
            LedgerError::Validation(msg) => ApiError::Validation(msg),
            LedgerError::Repository(repo_err) => repo_err.into(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_optimistic_lock_maps_to_concurrent_modification() {
        let repo_err = RepositoryError::OptimisticLockFailure {
            job_id: "j-001".to_string(),
            expected: 3,
            actual: 5,
        };
        let api_err: ApiError = repo_err.into();
        match api_err {
            ApiError::ConcurrentModification(msg) => {
                assert!(msg.contains("j-001"));
                assert!(msg.contains("revision=3"));
            }
            other => panic!("期望 ConcurrentModification, 实际 {:?}", other),
        }
    }

    #[test]
    fn test_not_found_conversion() {
        let repo_err = RepositoryError::NotFound {
            entity: "WorkCenter".to_string(),
            id: "CNC-09".to_string(),
        };
        let api_err: ApiError = repo_err.into();
        match api_err {
            ApiError::NotFound(msg) => {
                assert!(msg.contains("WorkCenter"));
                assert!(msg.contains("CNC-09"));
            }
            other => panic!("期望 NotFound, 实际 {:?}", other),
        }
    }

    #[test]
    fn test_blocked_carries_count() {
        let ledger_err = LedgerError::Blocked {
            job_id: "j-001".to_string(),
            critical_count: 2,
        };
        let api_err: ApiError = ledger_err.into();
        match api_err {
            ApiError::Blocked { critical_count, .. } => assert_eq!(critical_count, 2),
            other => panic!("期望 Blocked, 实际 {:?}", other),
        }
    }
}
