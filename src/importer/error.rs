// ==========================================
// 车间有限产能排产核心 - 回放模块错误类型
// ==========================================
// 工具: thiserror 派生宏
// ==========================================

use thiserror::Error;

/// 数据回放错误类型
#[derive(Error, Debug)]
pub enum FeedError {
    // ===== 文件相关错误 =====
    #[error("{0}")]
    FileNotFound(String),

    #[error("文件格式不支持: {0}（仅支持 .csv）")]
    UnsupportedFormat(String),

    #[error("CSV 解析失败 (行 {row}): {message}")]
    CsvParseError { row: usize, message: String },

    #[error("时间格式错误 (行 {row}, 字段 {field}): 期望 YYYY-MM-DD HH:MM:SS, 实际 {value}")]
    TimestampFormatError {
        row: usize,
        field: String,
        value: String,
    },

    // ===== 回放执行错误 =====
    #[error("回放记录处理失败 (行 {row}): {message}")]
    ReplayError { row: usize, message: String },

    #[error("IO 错误: {0}")]
    Io(#[from] std::io::Error),

    #[error(transparent)]
    Csv(#[from] csv::Error),
}

/// Result 类型别名
pub type FeedResult<T> = Result<T, FeedError>;
