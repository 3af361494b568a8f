// ==========================================
// 车间有限产能排产核心 - 引擎层事件定义
// ==========================================
// 职责: 定义车间事件类型与发布 trait
// 说明: Engine 层定义 trait, 总线与测试各自实现,
//       引擎不直接依赖总线实现
// ==========================================

use serde::{Deserialize, Serialize};
use std::error::Error;
use std::sync::Arc;

// ==========================================
// 车间事件类型
// ==========================================

/// 车间事件类型
///
/// 内部各阶段与外部订阅方消费同一组事件类型
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub enum FloorEventType {
    /// 遥测信号已接受
    SignalAccepted,
    /// 遥测信号被拒绝 (乱序)
    SignalRejected,
    /// 健康度变化
    HealthChanged,
    /// 约束上报
    ConstraintRaised,
    /// 约束解除
    ConstraintResolved,
    /// 作业状态迁移
    JobTransition,
    /// 排产增量已应用
    ScheduleApplied,
    /// 请求重排产
    ReoptimizeRequested,
    /// OEE 重算完成
    OeeRecomputed,
    /// 停机区间开启
    DowntimeOpened,
    /// 停机区间闭合
    DowntimeClosed,
}

impl FloorEventType {
    /// 转换为字符串标识
    pub fn as_str(&self) -> &str {
        match self {
            FloorEventType::SignalAccepted => "SignalAccepted",
            FloorEventType::SignalRejected => "SignalRejected",
            FloorEventType::HealthChanged => "HealthChanged",
            FloorEventType::ConstraintRaised => "ConstraintRaised",
            FloorEventType::ConstraintResolved => "ConstraintResolved",
            FloorEventType::JobTransition => "JobTransition",
            FloorEventType::ScheduleApplied => "ScheduleApplied",
            FloorEventType::ReoptimizeRequested => "ReoptimizeRequested",
            FloorEventType::OeeRecomputed => "OeeRecomputed",
            FloorEventType::DowntimeOpened => "DowntimeOpened",
            FloorEventType::DowntimeClosed => "DowntimeClosed",
        }
    }

    /// 背压下是否优先保留
    ///
    /// 遥测类事件可丢弃, 约束/作业/排产事件不可
    pub fn is_critical(&self) -> bool {
        !matches!(
            self,
            FloorEventType::SignalAccepted
                | FloorEventType::SignalRejected
                | FloorEventType::HealthChanged
                | FloorEventType::OeeRecomputed
        )
    }
}

// ==========================================
// 车间事件
// ==========================================

/// 车间事件
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct FloorEvent {
    /// 事件类型
    pub event_type: FloorEventType,
    /// 关联工作中心
    pub work_center_id: Option<String>,
    /// 关联作业
    pub job_id: Option<String>,
    /// 关联约束
    pub constraint_id: Option<String>,
    /// 事件来源描述
    pub source: String,
    /// 附加说明
    pub detail: Option<String>,
    /// 事件时间
    pub occurred_at: chrono::NaiveDateTime,
}

impl FloorEvent {
    /// 创建新事件
    pub fn new(event_type: FloorEventType, source: &str) -> Self {
        Self {
            event_type,
            work_center_id: None,
            job_id: None,
            constraint_id: None,
            source: source.to_string(),
            detail: None,
            occurred_at: chrono::Utc::now().naive_utc(),
        }
    }

    /// 设置关联工作中心
    pub fn with_work_center(mut self, work_center_id: &str) -> Self {
        self.work_center_id = Some(work_center_id.to_string());
        self
    }

    /// 设置关联作业
    pub fn with_job(mut self, job_id: &str) -> Self {
        self.job_id = Some(job_id.to_string());
        self
    }

    /// 设置关联约束
    pub fn with_constraint(mut self, constraint_id: &str) -> Self {
        self.constraint_id = Some(constraint_id.to_string());
        self
    }

    /// 设置附加说明
    pub fn with_detail(mut self, detail: String) -> Self {
        self.detail = Some(detail);
        self
    }
}

// ==========================================
// 事件发布 Trait
// ==========================================

/// 车间事件发布者 Trait
///
/// Engine 层定义, EventBus 实现; 发布必须立即返回,
/// 下游消费失败不得传导回发布方
pub trait FloorEventPublisher: Send + Sync {
    /// 发布车间事件
    fn publish(&self, event: FloorEvent) -> Result<(), Box<dyn Error + Send + Sync>>;
}

/// 空操作事件发布者
///
/// 用于不需要事件发布的场景（如单元测试）
#[derive(Debug, Clone, Default)]
pub struct NoOpEventPublisher;

impl FloorEventPublisher for NoOpEventPublisher {
    fn publish(&self, event: FloorEvent) -> Result<(), Box<dyn Error + Send + Sync>> {
        tracing::debug!(
            event_type = event.event_type.as_str(),
            "NoOpEventPublisher: 跳过事件发布"
        );
        Ok(())
    }
}

/// 可选的事件发布者包装
///
/// 简化 Option<Arc<dyn FloorEventPublisher>> 的使用
pub struct OptionalEventPublisher {
    inner: Option<Arc<dyn FloorEventPublisher>>,
}

impl OptionalEventPublisher {
    /// 创建带发布者的实例
    pub fn with_publisher(publisher: Arc<dyn FloorEventPublisher>) -> Self {
        Self {
            inner: Some(publisher),
        }
    }

    /// 创建空实例（不发布事件）
    pub fn none() -> Self {
        Self { inner: None }
    }

    /// 发布事件（如果有发布者）
    ///
    /// 发布失败只记日志, 不向调用方传导
    pub fn publish(&self, event: FloorEvent) {
        if let Some(publisher) = &self.inner {
            if let Err(e) = publisher.publish(event) {
                tracing::warn!("事件发布失败(已忽略): {}", e);
            }
        }
    }

    /// 检查是否配置了发布者
    pub fn is_configured(&self) -> bool {
        self.inner.is_some()
    }
}

impl Default for OptionalEventPublisher {
    fn default() -> Self {
        Self::none()
    }
}
