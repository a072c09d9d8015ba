//! 矿机状态
//!
//! `MinerState` 是单台矿机的全部可变状态，由矿队里它自己的互斥锁
//! 独占保护。只有两条路径会修改它：节拍里的 `SimulationEngine::advance`
//! 和重启动作；配置补丁只写入 `pending`，等下一个节拍统一生效。

use crate::config_surface::{ConfigPatch, MinerConfig};
use crate::presets::{ModelPreset, ScenarioPreset};
use crate::rng::MinerRng;
use serde::{Deserialize, Serialize};

/// 矿池连接状态
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum PoolState {
    /// 正在连接矿池
    Connecting,
    /// 链路已建立，尚未开始提交
    Connected,
    /// 掉线后重连中
    Reconnecting,
    /// 正常挖矿
    Mining,
    /// 重启中
    Restarting,
}

impl PoolState {
    /// 该状态下算力是否被强制归零
    pub fn forces_zero_hashrate(&self) -> bool {
        matches!(
            self,
            PoolState::Connecting | PoolState::Reconnecting | PoolState::Restarting
        )
    }
}

impl std::fmt::Display for PoolState {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let s = match self {
            PoolState::Connecting => "connecting",
            PoolState::Connected => "connected",
            PoolState::Reconnecting => "reconnecting",
            PoolState::Mining => "mining",
            PoolState::Restarting => "restarting",
        };
        write!(f, "{}", s)
    }
}

/// 单台矿机的可变状态
#[derive(Debug, Clone)]
pub struct MinerState {
    /// 矿机ID（创建后不变，删除后不复用）
    pub miner_id: String,
    /// 机型ID
    pub model_id: String,
    /// 场景ID
    pub scenario_id: String,
    /// 创建时刻（Unix 秒）
    pub created_at_s: f64,

    /// 矿池连接状态
    pub pool_state: PoolState,
    /// 累计运行时间（秒），重启期间停表
    pub uptime_s: f64,
    /// 接受的份额（单调不减）
    pub shares_accepted: u64,
    /// 拒绝的份额（单调不减）
    pub shares_rejected: u64,
    /// 历史最优份额难度
    pub best_difficulty: u64,

    /// 芯片温度 (°C)
    pub chip_temp_c: f64,
    /// VR 温度 (°C)
    pub vr_temp_c: f64,
    /// 环境温度 (°C)
    pub ambient_c: f64,
    /// 风扇占空比 (%)
    pub fan_percent: f64,
    /// 风扇转速 (RPM)
    pub fan_rpm: f64,
    /// 上报算力 (GH/s)
    pub hashrate_ghs: f64,
    /// 整机功耗 (W)
    pub power_w: f64,
    /// 误码率 (%)
    pub error_percentage: f64,

    /// 在用配置
    pub config: MinerConfig,
    /// 待生效配置补丁
    pub pending: ConfigPatch,
    /// 算力爬坡进度 [0,1]
    pub ramp_progress: f64,
    /// 矿机自己的随机数流
    pub rng: MinerRng,
    /// 上次节拍时刻（Unix 秒）
    pub last_tick_at_s: f64,

    /// 重启倒计时（秒）
    pub(crate) restart_remaining_s: f64,
    /// 连接延迟倒计时（秒）
    pub(crate) connect_remaining_s: f64,
    /// 重连倒计时（秒）
    pub(crate) reconnect_remaining_s: f64,
    /// 风扇 PI 控制器积分项
    pub(crate) fan_integral: f64,
    /// 就地恢复过的数值故障次数
    pub(crate) fault_count: u64,
}

impl MinerState {
    /// 在机型标称点初始化一台矿机
    ///
    /// 温度从环境温度起步，算力为零，矿池状态为 connecting；
    /// 连接延迟是该矿机随机数流的第一次消费。
    pub fn new(
        miner_id: String,
        model: &ModelPreset,
        scenario: &ScenarioPreset,
        seed: u64,
        now_s: f64,
    ) -> Self {
        let mut rng = MinerRng::with_seed(seed);
        let ambient_c = scenario.ambient_c.unwrap_or(model.ambient_c_default);
        let connect_remaining_s =
            rng.uniform_range(scenario.connect_delay_s.0, scenario.connect_delay_s.1);
        let config = MinerConfig::nominal(model);
        let fan_percent = model.fan_baseline_pct.clamp(0.0, 100.0);

        Self {
            miner_id,
            model_id: model.model_id.clone(),
            scenario_id: scenario.scenario_id.clone(),
            created_at_s: now_s,

            pool_state: PoolState::Connecting,
            uptime_s: 0.0,
            shares_accepted: 0,
            shares_rejected: 0,
            best_difficulty: 0,

            chip_temp_c: ambient_c,
            vr_temp_c: ambient_c + model.vr_offset_c,
            ambient_c,
            fan_percent,
            fan_rpm: fan_percent / 100.0 * model.fan_max_rpm as f64,
            hashrate_ghs: 0.0,
            power_w: model.idle_power_w,
            error_percentage: scenario.error_floor_pct,

            config,
            pending: ConfigPatch::default(),
            ramp_progress: 0.0,
            rng,
            last_tick_at_s: now_s,

            restart_remaining_s: 0.0,
            connect_remaining_s,
            reconnect_remaining_s: 0.0,
            fan_integral: 0.0,
            fault_count: 0,
        }
    }

    /// 进入重启流程
    ///
    /// 立即切换到 restarting 并把算力清零，倒计时结束后由引擎转回
    /// connecting。重启期间 uptime 停表但不清零。
    pub fn begin_restart(&mut self, duration_s: f64) {
        self.restart_remaining_s = duration_s.max(0.0);
        self.pool_state = PoolState::Restarting;
        self.hashrate_ghs = 0.0;
    }

    /// 已恢复的数值故障次数
    pub fn fault_count(&self) -> u64 {
        self.fault_count
    }
}
