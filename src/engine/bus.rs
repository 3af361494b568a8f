// ==========================================
// 车间有限产能排产核心 - 事件总线
// ==========================================
// 职责: 有界缓冲 + 广播分发
// 红线: 发布永不阻塞; 背压时先丢最旧的非关键事件
//       (遥测类先于约束/作业类), 丢弃必须计数
// ==========================================

use crate::engine::events::{FloorEvent, FloorEventPublisher};
use std::collections::VecDeque;
use std::error::Error;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Mutex;
use tokio::sync::broadcast;

// ==========================================
// 总线统计
// ==========================================
#[derive(Debug, Clone, Default)]
pub struct BusStats {
    pub published_total: u64,
    pub dropped_total: u64,
    pub buffered: usize,
}

// ==========================================
// EventBus - 事件总线
// ==========================================
// 缓冲区保留最近事件供查询接口回放;
// 实时消费方走 broadcast 订阅, 落后的订阅方自行感知 Lagged
pub struct EventBus {
    buffer: Mutex<VecDeque<FloorEvent>>,
    capacity: usize,
    sender: broadcast::Sender<FloorEvent>,
    published_total: AtomicU64,
    dropped_total: AtomicU64,
}

impl EventBus {
    /// 创建事件总线
    ///
    /// # 参数
    /// - `capacity`: 缓冲容量 (下限 16)
    pub fn new(capacity: usize) -> Self {
        let capacity = capacity.max(16);
        let (sender, _) = broadcast::channel(capacity);
        Self {
            buffer: Mutex::new(VecDeque::with_capacity(capacity)),
            capacity,
            sender,
            published_total: AtomicU64::new(0),
            dropped_total: AtomicU64::new(0),
        }
    }

    /// 订阅实时事件流
    pub fn subscribe(&self) -> broadcast::Receiver<FloorEvent> {
        self.sender.subscribe()
    }

    /// 最近缓冲的事件（时间正序, 最多 limit 条）
    pub fn recent(&self, limit: usize) -> Vec<FloorEvent> {
        let buffer = match self.buffer.lock() {
            Ok(b) => b,
            Err(poisoned) => poisoned.into_inner(),
        };
        let skip = buffer.len().saturating_sub(limit);
        buffer.iter().skip(skip).cloned().collect()
    }

    /// 当前统计
    pub fn stats(&self) -> BusStats {
        let buffered = match self.buffer.lock() {
            Ok(b) => b.len(),
            Err(poisoned) => poisoned.into_inner().len(),
        };
        BusStats {
            published_total: self.published_total.load(Ordering::Relaxed),
            dropped_total: self.dropped_total.load(Ordering::Relaxed),
            buffered,
        }
    }

    fn push_bounded(&self, event: FloorEvent) {
        let mut buffer = match self.buffer.lock() {
            Ok(b) => b,
            Err(poisoned) => poisoned.into_inner(),
        };
        if buffer.len() >= self.capacity {
            // 从最旧一侧找第一个非关键事件丢弃; 全是关键事件时丢最旧的
            let victim = buffer
                .iter()
                .position(|e| !e.event_type.is_critical())
                .unwrap_or(0);
            if let Some(dropped) = buffer.remove(victim) {
                self.dropped_total.fetch_add(1, Ordering::Relaxed);
                tracing::warn!(
                    event_type = dropped.event_type.as_str(),
                    "事件总线缓冲已满, 丢弃最旧的非关键事件"
                );
            }
        }
        buffer.push_back(event);
    }
}

impl FloorEventPublisher for EventBus {
    /// 发布事件: 先广播后入缓冲, 任何情况下立即返回
    fn publish(&self, event: FloorEvent) -> Result<(), Box<dyn Error + Send + Sync>> {
        self.published_total.fetch_add(1, Ordering::Relaxed);

        // 无订阅方时 send 返回 Err, 属正常情况
        let _ = self.sender.send(event.clone());

        self.push_bounded(event);
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::engine::events::FloorEventType;

    fn telemetry_event(n: usize) -> FloorEvent {
        FloorEvent::new(FloorEventType::SignalAccepted, "test").with_detail(format!("t{}", n))
    }

    fn job_event(n: usize) -> FloorEvent {
        FloorEvent::new(FloorEventType::JobTransition, "test").with_detail(format!("j{}", n))
    }

    #[test]
    fn test_publish_and_recent() {
        let bus = EventBus::new(16);
        bus.publish(telemetry_event(1)).expect("publish");
        bus.publish(job_event(2)).expect("publish");

        let recent = bus.recent(10);
        assert_eq!(recent.len(), 2);
        assert_eq!(recent[0].event_type, FloorEventType::SignalAccepted);
        assert_eq!(bus.stats().published_total, 2);
        assert_eq!(bus.stats().dropped_total, 0);
    }

    #[test]
    fn test_overflow_drops_oldest_non_critical_first() {
        let bus = EventBus::new(16);
        // 填满: 1 条旧遥测 + 15 条作业事件
        bus.publish(telemetry_event(0)).expect("publish");
        for n in 1..16 {
            bus.publish(job_event(n)).expect("publish");
        }
        // 溢出: 必须丢掉遥测事件, 保留全部作业事件
        bus.publish(job_event(16)).expect("publish");

        let stats = bus.stats();
        assert_eq!(stats.dropped_total, 1);
        assert_eq!(stats.buffered, 16);
        let recent = bus.recent(32);
        assert!(recent
            .iter()
            .all(|e| e.event_type == FloorEventType::JobTransition));
    }

    #[test]
    fn test_overflow_all_critical_drops_oldest() {
        let bus = EventBus::new(16);
        for n in 0..17 {
            bus.publish(job_event(n)).expect("publish");
        }
        let recent = bus.recent(32);
        assert_eq!(recent.len(), 16);
        // 最旧的 j0 被丢弃
        assert_eq!(recent[0].detail.as_deref(), Some("j1"));
        assert_eq!(bus.stats().dropped_total, 1);
    }

    #[tokio::test]
    async fn test_subscription_receives_events() {
        let bus = EventBus::new(16);
        let mut rx = bus.subscribe();
        bus.publish(job_event(1)).expect("publish");

        let received = rx.recv().await.expect("recv");
        assert_eq!(received.event_type, FloorEventType::JobTransition);
    }
}
