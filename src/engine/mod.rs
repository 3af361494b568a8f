// ==========================================
// 车间有限产能排产核心 - 引擎层
// ==========================================
// 分层: 引擎层只依赖仓储与领域层, 通过事件 trait 解耦总线
// ==========================================

pub mod bus;
pub mod constraints;
pub mod events;
pub mod ingestor;
pub mod ledger;
pub mod oee;
pub mod registry;
pub mod scheduler;

pub use bus::{BusStats, EventBus};
pub use constraints::ConstraintEngine;
pub use events::{
    FloorEvent, FloorEventPublisher, FloorEventType, NoOpEventPublisher, OptionalEventPublisher,
};
pub use ingestor::{IngestOutcome, IngestStats, TelemetryIngestor};
pub use ledger::{JobLedger, LedgerError, LedgerResult};
pub use oee::OeeCalculator;
pub use registry::WorkCenterRegistry;
pub use scheduler::{JobAssignment, ReoptimizeScope, ScheduleDelta, Scheduler};
