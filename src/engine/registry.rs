// ==========================================
// 车间有限产能排产核心 - 工作中心注册表
// ==========================================
// 职责: 静态产能事实 + 实时负载/健康度的唯一入口
// 红线: 产能只走管理操作变更, 不从遥测推断
// 红线: 利用率不封顶, 超 100% 是有效的超额承诺告警
// ==========================================

use crate::domain::types::WorkCenterStatus;
use crate::domain::WorkCenter;
use crate::engine::events::{FloorEvent, FloorEventType, OptionalEventPublisher};
use crate::repository::error::{RepositoryError, RepositoryResult};
use crate::repository::WorkCenterRepository;
use std::sync::Arc;

// ==========================================
// WorkCenterRegistry - 工作中心注册表
// ==========================================
pub struct WorkCenterRegistry {
    repo: Arc<WorkCenterRepository>,
    publisher: OptionalEventPublisher,
}

impl WorkCenterRegistry {
    pub fn new(repo: Arc<WorkCenterRepository>, publisher: OptionalEventPublisher) -> Self {
        Self { repo, publisher }
    }

    /// 注册 (或更新) 工作中心
    pub fn register(&self, work_center: &WorkCenter) -> RepositoryResult<()> {
        self.repo.upsert(work_center)?;
        tracing::info!(
            work_center_id = %work_center.work_center_id,
            capacity_minutes = work_center.capacity_minutes,
            "工作中心已注册"
        );
        Ok(())
    }

    /// 按代码获取工作中心
    pub fn get(&self, work_center_id: &str) -> RepositoryResult<WorkCenter> {
        self.repo
            .find_by_id(work_center_id)?
            .ok_or_else(|| RepositoryError::NotFound {
                entity: "WorkCenter".to_string(),
                id: work_center_id.to_string(),
            })
    }

    /// 列出所有工作中心
    pub fn list(&self) -> RepositoryResult<Vec<WorkCenter>> {
        self.repo.list_all()
    }

    /// 记录负载增量, 返回更新后的利用率
    ///
    /// 超过 1.0 记一条告警日志, 但不截断、不报错
    pub fn record_load_delta(&self, work_center_id: &str, delta: f64) -> RepositoryResult<f64> {
        let load = self.repo.add_load_delta(work_center_id, delta)?;
        let wc = self.get(work_center_id)?;
        let utilization = wc.utilization();
        if utilization > 1.0 {
            tracing::warn!(
                work_center_id,
                load_minutes = load,
                capacity_minutes = wc.capacity_minutes,
                utilization_pct = utilization * 100.0,
                "工作中心超额承诺"
            );
        }
        Ok(utilization)
    }

    /// 管理操作: 更新额定产能
    pub fn update_capacity(&self, work_center_id: &str, capacity_minutes: f64) -> RepositoryResult<()> {
        if capacity_minutes <= 0.0 {
            return Err(RepositoryError::ValidationError(format!(
                "额定产能必须为正数: {}",
                capacity_minutes
            )));
        }
        self.repo.update_capacity(work_center_id, capacity_minutes)
    }

    /// 更新健康度 (0-100 裁剪)
    pub fn record_health(&self, work_center_id: &str, health_score: f64) -> RepositoryResult<()> {
        let clamped = health_score.clamp(0.0, 100.0);
        self.repo.update_health(work_center_id, clamped)?;
        self.publisher.publish(
            FloorEvent::new(FloorEventType::HealthChanged, "WorkCenterRegistry")
                .with_work_center(work_center_id)
                .with_detail(format!("{:.1}", clamped)),
        );
        Ok(())
    }

    /// 更新滚动指标 (效率/可用率)
    pub fn record_rollups(
        &self,
        work_center_id: &str,
        efficiency: f64,
        availability: f64,
    ) -> RepositoryResult<()> {
        self.repo
            .update_rollups(work_center_id, efficiency, availability)
    }

    /// 更新运行状态
    pub fn set_status(&self, work_center_id: &str, status: WorkCenterStatus) -> RepositoryResult<()> {
        self.repo.update_status(work_center_id, status)
    }

    /// 停用工作中心 (只停用, 不删除)
    pub fn deactivate(&self, work_center_id: &str) -> RepositoryResult<()> {
        self.repo
            .update_status(work_center_id, WorkCenterStatus::Inactive)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::domain::types::WorkCenterKind;

    fn setup_registry() -> WorkCenterRegistry {
        let repo = Arc::new(WorkCenterRepository::new(":memory:").expect("repo"));
        WorkCenterRegistry::new(repo, OptionalEventPublisher::none())
    }

    fn register_center(registry: &WorkCenterRegistry, id: &str, capacity: f64) {
        registry
            .register(&WorkCenter::new(
                id.to_string(),
                format!("测试 {}", id),
                WorkCenterKind::Machining,
                capacity,
            ))
            .expect("register");
    }

    #[test]
    fn test_get_unknown_is_not_found() {
        let registry = setup_registry();
        let result = registry.get("NO-SUCH");
        assert!(matches!(result, Err(RepositoryError::NotFound { .. })));
    }

    #[test]
    fn test_utilization_unclamped_above_one() {
        let registry = setup_registry();
        register_center(&registry, "CNC-01", 480.0);

        // 超额承诺: 600/480 = 1.25, 照实返回
        let utilization = registry
            .record_load_delta("CNC-01", 600.0)
            .expect("record load");
        assert!((utilization - 1.25).abs() < 1e-9);
    }

    #[test]
    fn test_capacity_change_is_explicit_only() {
        let registry = setup_registry();
        register_center(&registry, "CNC-01", 480.0);

        registry
            .update_capacity("CNC-01", 960.0)
            .expect("update capacity");
        assert_eq!(registry.get("CNC-01").expect("get").capacity_minutes, 960.0);

        let invalid = registry.update_capacity("CNC-01", 0.0);
        assert!(matches!(invalid, Err(RepositoryError::ValidationError(_))));
    }

    #[test]
    fn test_health_clamped_to_band() {
        let registry = setup_registry();
        register_center(&registry, "CNC-01", 480.0);

        registry.record_health("CNC-01", 120.0).expect("health");
        assert_eq!(registry.get("CNC-01").expect("get").health_score, 100.0);

        registry.record_health("CNC-01", -5.0).expect("health");
        assert_eq!(registry.get("CNC-01").expect("get").health_score, 0.0);
    }

    #[test]
    fn test_deactivate_keeps_record() {
        let registry = setup_registry();
        register_center(&registry, "CNC-01", 480.0);

        registry.deactivate("CNC-01").expect("deactivate");
        let wc = registry.get("CNC-01").expect("get");
        assert_eq!(wc.status, WorkCenterStatus::Inactive);
        assert!(!wc.accepts_new_assignments());
    }
}
