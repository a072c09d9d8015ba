//! 矿队运行时
//!
//! 持有全部虚拟矿机，在独立的节拍工作任务上以固定节拍推进模拟，
//! 同时向上层提供线程安全的控制面：创建/删除/遥测快照/配置下发/
//! 重启。
//!
//! 锁纪律：矿队级读写锁只保护 id→矿机 映射本身，创建/删除持写锁，
//! 其余操作短暂持读锁解析 id；每台矿机由自己的互斥锁保护，`advance`、
//! 快照、配置、重启都先取它。任何路径都不会同时持有两台矿机的锁，
//! 也不会在持锁期间做 I/O。

use crate::clock::Clock;
use crate::config::FleetConfig;
use crate::config_surface::{ConfigPatch, ConfigSurface, ConfigViolation};
use crate::engine::SimulationEngine;
use crate::error::FleetError;
use crate::presets::{ModelPreset, PresetRegistry, ScenarioPreset};
use crate::rng::MinerRng;
use crate::state::MinerState;
use crate::telemetry::TelemetrySnapshot;
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::{Arc, Mutex, RwLock};
use tokio::sync::watch;
use tracing::{debug, error, info, warn};

/// 矿机条目摘要
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct MinerSummary {
    pub miner_id: String,
    pub model_id: String,
    pub scenario_id: String,
}

/// 配置下发结果
///
/// 逐字段接受策略：`applied` 是实际进入待生效队列的字段，
/// `violations` 是被拒绝字段的原因列表，两者可以同时非空。
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PatchOutcome {
    pub applied: ConfigPatch,
    pub violations: Vec<ConfigViolation>,
}

/// 矿机槽位
///
/// 状态由槽位内的互斥锁独占保护；`deleted` 标记让删除与正在进行的
/// 节拍不会互相干扰：节拍拿到锁后发现已删除就直接跳过。
struct MinerSlot {
    miner_id: String,
    model: Arc<ModelPreset>,
    scenario: Arc<ScenarioPreset>,
    state: Mutex<MinerState>,
    deleted: AtomicBool,
}

/// 矿队运行时
pub struct FleetRuntime {
    miners: RwLock<HashMap<String, Arc<MinerSlot>>>,
    next_id: AtomicU64,
    clock: Arc<dyn Clock>,
    presets: PresetRegistry,
    engine: SimulationEngine,
    config: FleetConfig,
    worker: Mutex<Option<tokio::task::JoinHandle<()>>>,
    shutdown_tx: watch::Sender<bool>,
}

impl FleetRuntime {
    /// 以内置预设目录创建矿队
    pub fn new(config: FleetConfig, clock: Arc<dyn Clock>) -> Self {
        Self::with_presets(config, clock, PresetRegistry::builtin())
    }

    /// 以自定义预设目录创建矿队
    pub fn with_presets(config: FleetConfig, clock: Arc<dyn Clock>, presets: PresetRegistry) -> Self {
        let (shutdown_tx, _) = watch::channel(false);
        Self {
            miners: RwLock::new(HashMap::new()),
            next_id: AtomicU64::new(1),
            clock,
            presets,
            engine: SimulationEngine::new(),
            config,
            worker: Mutex::new(None),
            shutdown_tx,
        }
    }

    /// 当前矿队配置
    pub fn config(&self) -> &FleetConfig {
        &self.config
    }

    /// 列出全部矿机（按ID排序）
    pub fn list(&self) -> Result<Vec<MinerSummary>, FleetError> {
        let miners = self.read_map()?;
        let mut summaries: Vec<_> = miners
            .values()
            .map(|slot| MinerSummary {
                miner_id: slot.miner_id.clone(),
                model_id: slot.model.model_id.clone(),
                scenario_id: slot.scenario.scenario_id.clone(),
            })
            .collect();
        summaries.sort_by(|a, b| a.miner_id.cmp(&b.miner_id));
        Ok(summaries)
    }

    /// 矿机数量
    pub fn miner_count(&self) -> usize {
        self.read_map().map(|m| m.len()).unwrap_or(0)
    }

    /// 创建矿机
    ///
    /// ID 形如 m_001，进程内单调递增，删除后不复用。未知机型或场景
    /// 返回 NotFound；达到容量上限返回 FleetBusy。
    pub fn create(&self, model_id: &str, scenario_id: &str) -> Result<String, FleetError> {
        let model = self.presets.model(model_id)?;
        let scenario = self.presets.scenario(scenario_id)?;

        let mut miners = self
            .miners
            .write()
            .map_err(|e| FleetError::runtime(format!("fleet map lock poisoned: {}", e)))?;

        if let Some(limit) = self.config.max_miners {
            if miners.len() >= limit {
                return Err(FleetError::FleetBusy { limit });
            }
        }

        let seq = self.next_id.fetch_add(1, Ordering::SeqCst);
        let miner_id = format!("m_{:03}", seq);
        let now_s = self.clock.now();
        let created_nanos = (now_s * 1e9) as u64;
        let seed = MinerRng::derive_seed(&miner_id, created_nanos, self.config.seed);

        let state = MinerState::new(miner_id.clone(), &model, &scenario, seed, now_s);
        let slot = Arc::new(MinerSlot {
            miner_id: miner_id.clone(),
            model,
            scenario,
            state: Mutex::new(state),
            deleted: AtomicBool::new(false),
        });
        miners.insert(miner_id.clone(), slot);

        info!(miner_id = %miner_id, model_id, scenario_id, "created virtual miner");
        Ok(miner_id)
    }

    /// 以配置里的默认机型和场景创建矿机
    pub fn create_default(&self) -> Result<String, FleetError> {
        self.create(&self.config.default_model_id, &self.config.default_scenario_id)
    }

    /// 删除矿机
    ///
    /// 从映射里移除后立即对外不可见；正在进行的节拍通过 deleted
    /// 标记跳过该矿机，不会让条目复活。
    pub fn delete(&self, miner_id: &str) -> Result<(), FleetError> {
        let slot = {
            let mut miners = self
                .miners
                .write()
                .map_err(|e| FleetError::runtime(format!("fleet map lock poisoned: {}", e)))?;
            miners
                .remove(miner_id)
                .ok_or_else(|| FleetError::miner_not_found(miner_id))?
        };
        slot.deleted.store(true, Ordering::SeqCst);

        info!(miner_id, "deleted virtual miner");
        Ok(())
    }

    /// 读取矿机遥测快照
    ///
    /// 投影期间持有该矿机的锁，快照内部自洽。
    pub fn snapshot(&self, miner_id: &str) -> Result<TelemetrySnapshot, FleetError> {
        let slot = self.slot(miner_id)?;
        let now_s = self.clock.now();
        let state = lock_state(&slot)?;
        Ok(TelemetrySnapshot::project(&state, &slot.model, now_s))
    }

    /// 下发配置补丁
    ///
    /// 校验后写入待生效队列，由下一个节拍统一应用。同一矿机的两次
    /// 补丁按取得矿机锁的顺序合并，重叠字段后到者覆盖。
    pub fn patch_config(
        &self,
        miner_id: &str,
        patch: &ConfigPatch,
    ) -> Result<PatchOutcome, FleetError> {
        let slot = self.slot(miner_id)?;
        let (accepted, violations) = ConfigSurface::validate(patch, &slot.model);

        if !accepted.is_empty() {
            let mut state = lock_state(&slot)?;
            state.pending.merge_from(&accepted);
        }
        if !violations.is_empty() {
            debug!(miner_id, ?violations, "config patch partially rejected");
        }

        Ok(PatchOutcome {
            applied: accepted,
            violations,
        })
    }

    /// 重启矿机
    pub fn restart(&self, miner_id: &str) -> Result<(), FleetError> {
        let slot = self.slot(miner_id)?;
        let duration_s = slot.scenario.restart_duration_s;
        {
            let mut state = lock_state(&slot)?;
            state.begin_restart(duration_s);
        }
        info!(miner_id, duration_s, "miner restart requested");
        Ok(())
    }

    /// 列出全部机型预设
    pub fn list_models(&self) -> Vec<Arc<ModelPreset>> {
        self.presets.list_models()
    }

    /// 列出全部场景ID
    pub fn list_scenarios(&self) -> Vec<String> {
        self.presets.list_scenario_ids()
    }

    /// 推进整个矿队到时刻 now_s
    ///
    /// 在映射快照上逐台取锁推进；期间被删除的矿机直接跳过。单台
    /// 矿机的故障（锁中毒、数值异常）只影响它自己。
    pub fn tick_all(&self, now_s: f64) {
        let slots: Vec<Arc<MinerSlot>> = match self.miners.read() {
            Ok(miners) => miners.values().cloned().collect(),
            Err(e) => {
                error!("fleet map lock poisoned, skipping tick: {}", e);
                return;
            }
        };

        for slot in slots {
            if slot.deleted.load(Ordering::SeqCst) {
                continue;
            }
            let mut state = match slot.state.lock() {
                Ok(state) => state,
                Err(e) => {
                    error!(miner_id = %slot.miner_id, "miner lock poisoned, skipping: {}", e);
                    continue;
                }
            };
            let dt_s = (now_s - state.last_tick_at_s).max(0.0);
            self.engine.advance(&mut state, dt_s, &slot.model, &slot.scenario);
            state.last_tick_at_s = now_s;
        }
    }

    /// 启动节拍工作任务
    ///
    /// 以配置的节拍推进矿队；某一拍超时则下一拍立即开始并携带更大
    /// 的 dt，由引擎截断。重复启动是无害的空操作。
    pub fn start(self: &Arc<Self>) -> Result<(), FleetError> {
        let mut worker = self
            .worker
            .lock()
            .map_err(|e| FleetError::runtime(format!("worker lock poisoned: {}", e)))?;

        if let Some(handle) = worker.as_ref() {
            if !handle.is_finished() {
                warn!("fleet tick worker is already running");
                return Ok(());
            }
        }

        self.shutdown_tx.send_replace(false);
        let runtime = Arc::clone(self);
        let mut shutdown_rx = self.shutdown_tx.subscribe();
        let period = self.config.tick_period();

        let handle = tokio::spawn(async move {
            let mut ticker = tokio::time::interval(period);
            ticker.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Delay);
            loop {
                tokio::select! {
                    _ = ticker.tick() => {
                        let now_s = runtime.clock.now();
                        runtime.tick_all(now_s);
                    }
                    changed = shutdown_rx.changed() => {
                        if changed.is_err() || *shutdown_rx.borrow() {
                            break;
                        }
                    }
                }
            }
        });
        *worker = Some(handle);

        info!(tick_hz = self.config.tick_hz, "fleet tick worker started");
        Ok(())
    }

    /// 停止节拍工作任务
    ///
    /// 等待进行中的一拍完整结束后退出。
    pub async fn stop(&self) -> Result<(), FleetError> {
        let handle = {
            let mut worker = self
                .worker
                .lock()
                .map_err(|e| FleetError::runtime(format!("worker lock poisoned: {}", e)))?;
            worker.take()
        };

        match handle {
            Some(handle) => {
                self.shutdown_tx.send_replace(true);
                if let Err(e) = handle.await {
                    error!("fleet tick worker join error: {}", e);
                }
                info!("fleet tick worker stopped");
            }
            None => warn!("fleet tick worker is not running"),
        }
        Ok(())
    }

    fn slot(&self, miner_id: &str) -> Result<Arc<MinerSlot>, FleetError> {
        let miners = self.read_map()?;
        miners
            .get(miner_id)
            .cloned()
            .ok_or_else(|| FleetError::miner_not_found(miner_id))
    }

    fn read_map(
        &self,
    ) -> Result<std::sync::RwLockReadGuard<'_, HashMap<String, Arc<MinerSlot>>>, FleetError> {
        self.miners
            .read()
            .map_err(|e| FleetError::runtime(format!("fleet map lock poisoned: {}", e)))
    }
}

fn lock_state(slot: &MinerSlot) -> Result<std::sync::MutexGuard<'_, MinerState>, FleetError> {
    slot.state
        .lock()
        .map_err(|e| FleetError::runtime(format!("miner lock poisoned: {}", e)))
}
