// ==========================================
// 车间有限产能排产核心 - 后台阶段任务
// ==========================================
// 职责: 遥测接收工人 + 重排请求消费 + 周期扫描
// 红线: 重排请求按"最后一次生效"合并, 不排队逐个执行
// 红线: 阶段任务失败只记日志, 不拖垮服务
// ==========================================

use crate::app::state::AppState;
use crate::domain::MachineSignal;
use crate::engine::{FloorEventType, ReoptimizeScope};
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;
use tokio::sync::{mpsc, watch, Notify};
use tokio::task::JoinHandle;

/// 遥测接收通道深度
const TELEMETRY_CHANNEL_DEPTH: usize = 256;

/// 周期扫描间隔 (延期作业 + 遥测失联)
const SWEEP_INTERVAL_SECS: u64 = 30;

// ==========================================
// StageHandles - 阶段任务句柄
// ==========================================
pub struct StageHandles {
    /// 遥测信号入口 (上游协议适配层投递到此)
    pub telemetry_tx: mpsc::Sender<MachineSignal>,
    shutdown_tx: watch::Sender<bool>,
    handles: Vec<JoinHandle<()>>,
}

impl StageHandles {
    /// 发出停机信号并等待全部阶段退出
    pub async fn shutdown(self) {
        let _ = self.shutdown_tx.send(true);
        for handle in self.handles {
            let _ = handle.await;
        }
    }
}

// ==========================================
// 阶段装配
// ==========================================

/// 启动全部后台阶段任务
pub fn spawn_stages(state: Arc<AppState>) -> StageHandles {
    let (shutdown_tx, shutdown_rx) = watch::channel(false);
    let (telemetry_tx, telemetry_rx) = mpsc::channel(TELEMETRY_CHANNEL_DEPTH);

    let handles = vec![
        spawn_telemetry_worker(state.clone(), telemetry_rx, shutdown_rx.clone()),
        spawn_reoptimize_worker(state.clone(), shutdown_rx.clone()),
        spawn_sweep_worker(state, shutdown_rx),
    ];

    StageHandles {
        telemetry_tx,
        shutdown_tx,
        handles,
    }
}

// ==========================================
// 遥测接收工人
// ==========================================

fn spawn_telemetry_worker(
    state: Arc<AppState>,
    mut rx: mpsc::Receiver<MachineSignal>,
    mut shutdown: watch::Receiver<bool>,
) -> JoinHandle<()> {
    tokio::spawn(async move {
        tracing::info!("遥测接收工人已启动");
        loop {
            tokio::select! {
                maybe_signal = rx.recv() => {
                    let signal = match maybe_signal {
                        Some(s) => s,
                        None => break,
                    };
                    // 乱序拒绝不是故障, 已在接收器内部计数
                    if let Err(e) = state.ingestor.ingest(&signal) {
                        tracing::error!(
                            work_center_id = %signal.work_center_id,
                            "遥测信号处理失败: {}", e
                        );
                    }
                }
                _ = shutdown.changed() => break,
            }
        }
        tracing::info!("遥测接收工人已退出");
    })
}

// ==========================================
// 重排请求消费 (最后一次生效)
// ==========================================

fn spawn_reoptimize_worker(
    state: Arc<AppState>,
    mut shutdown: watch::Receiver<bool>,
) -> JoinHandle<()> {
    let notify = Arc::new(Notify::new());
    let pending: Arc<Mutex<Option<ReoptimizeScope>>> = Arc::new(Mutex::new(None));
    let generation = Arc::new(AtomicU64::new(0));

    // 监听总线, 把重排请求折叠进 pending
    {
        let notify = notify.clone();
        let pending = pending.clone();
        let generation = generation.clone();
        let mut events = state.bus.subscribe();
        let mut shutdown = shutdown.clone();
        tokio::spawn(async move {
            loop {
                tokio::select! {
                    received = events.recv() => {
                        let event = match received {
                            Ok(e) => e,
                            Err(tokio::sync::broadcast::error::RecvError::Lagged(n)) => {
                                tracing::warn!(skipped = n, "重排监听落后, 改为全量重排");
                                *lock_pending(&pending) = Some(ReoptimizeScope::All);
                                generation.fetch_add(1, Ordering::Relaxed);
                                notify.notify_one();
                                continue;
                            }
                            Err(_) => break,
                        };
                        if event.event_type != FloorEventType::ReoptimizeRequested {
                            continue;
                        }
                        let scope = match &event.work_center_id {
                            Some(wc) => ReoptimizeScope::WorkCenter(wc.clone()),
                            None => ReoptimizeScope::All,
                        };
                        {
                            let mut slot = lock_pending(&pending);
                            // 不同范围的请求合并为全量
                            *slot = match slot.take() {
                                None => Some(scope),
                                Some(prev) if prev == scope => Some(scope),
                                Some(_) => Some(ReoptimizeScope::All),
                            };
                        }
                        generation.fetch_add(1, Ordering::Relaxed);
                        notify.notify_one();
                    }
                    _ = shutdown.changed() => break,
                }
            }
        });
    }

    tokio::spawn(async move {
        tracing::info!("重排消费工人已启动");
        loop {
            tokio::select! {
                _ = notify.notified() => {
                    // 执行前取走当前代次; 执行期间新到的请求会再次唤醒
                    let before = generation.load(Ordering::Relaxed);
                    let scope = lock_pending(&pending).take();
                    if let Some(scope) = scope {
                        let now = chrono::Utc::now().naive_utc();
                        match state.scheduler.reoptimize(&scope, now) {
                            Ok(delta) => {
                                tracing::info!(
                                    assignments = delta.assignments.len(),
                                    generation = before,
                                    "重排请求已消费"
                                );
                            }
                            Err(e) => tracing::error!("重排执行失败: {}", e),
                        }
                    }
                }
                _ = shutdown.changed() => break,
            }
        }
        tracing::info!("重排消费工人已退出");
    })
}

// ==========================================
// 周期扫描 (延期作业 + 遥测失联)
// ==========================================

fn spawn_sweep_worker(state: Arc<AppState>, mut shutdown: watch::Receiver<bool>) -> JoinHandle<()> {
    tokio::spawn(async move {
        tracing::info!(interval_secs = SWEEP_INTERVAL_SECS, "周期扫描已启动");
        let mut ticker = tokio::time::interval(Duration::from_secs(SWEEP_INTERVAL_SECS));
        ticker.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Skip);
        loop {
            tokio::select! {
                _ = ticker.tick() => {
                    let now = chrono::Utc::now().naive_utc();
                    match state.ledger.sweep_delayed(now) {
                        Ok(0) => {}
                        Ok(swept) => tracing::info!(swept, "延期扫描标记作业"),
                        Err(e) => tracing::error!("延期扫描失败: {}", e),
                    }
                    match state.ingestor.scan_stale_sources(now) {
                        Ok(0) => {}
                        Ok(raised) => tracing::warn!(raised, "遥测失联扫描挂出约束"),
                        Err(e) => tracing::error!("遥测失联扫描失败: {}", e),
                    }
                }
                _ = shutdown.changed() => break,
            }
        }
        tracing::info!("周期扫描已退出");
    })
}

fn lock_pending(
    pending: &Arc<Mutex<Option<ReoptimizeScope>>>,
) -> std::sync::MutexGuard<'_, Option<ReoptimizeScope>> {
    match pending.lock() {
        Ok(g) => g,
        Err(poisoned) => poisoned.into_inner(),
    }
}
