// ==========================================
// 车间有限产能排产核心 - 回放层
// ==========================================
// 职责: 离线 CSV 数据按在线路径回放进引擎
// ==========================================

pub mod error;
pub mod feed_csv;

pub use error::{FeedError, FeedResult};
pub use feed_csv::{FeedReplayer, ReplayReport};
