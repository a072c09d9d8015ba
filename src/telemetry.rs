//! 遥测快照
//!
//! `TelemetrySnapshot` 是 `MinerState` 的只读投影，字段名与上层 API
//! 承诺的对外名称逐字一致。快照按值拷贝交给调用方，投影期间持有
//! 矿机锁，保证各字段来自同一时刻、不会读到撕裂的状态。

use crate::presets::ModelPreset;
use crate::state::{MinerState, PoolState};
use serde::{Deserialize, Serialize};

/// 单台矿机的遥测快照
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TelemetrySnapshot {
    /// 矿机ID
    pub miner_id: String,
    /// 上报算力 (GH/s)
    #[serde(rename = "hashRate")]
    pub hashrate_ghs: f64,
    /// 芯片温度 (°C)
    #[serde(rename = "temp")]
    pub chip_temp_c: f64,
    /// VR 温度 (°C)
    #[serde(rename = "vrTemp")]
    pub vr_temp_c: f64,
    /// 整机功耗 (W)
    #[serde(rename = "power")]
    pub power_w: f64,
    /// 风扇占空比 (%)
    pub fanspeed: f64,
    /// 风扇转速 (RPM)
    pub fanrpm: f64,
    /// 核心电压 (mV)
    #[serde(rename = "coreVoltage")]
    pub core_voltage_mv: u32,
    /// 频率 (MHz)
    #[serde(rename = "frequency")]
    pub frequency_mhz: u32,
    /// 误码率 (%)
    #[serde(rename = "errorPercentage")]
    pub error_percentage: f64,
    /// 接受的份额
    #[serde(rename = "sharesAccepted")]
    pub shares_accepted: u64,
    /// 拒绝的份额
    #[serde(rename = "sharesRejected")]
    pub shares_rejected: u64,
    /// 矿池连接状态
    #[serde(rename = "poolState")]
    pub pool_state: PoolState,
    /// 累计运行时间 (秒)
    #[serde(rename = "uptimeSeconds")]
    pub uptime_seconds: f64,
    /// 输入电压 (V)，来自机型预设
    #[serde(rename = "voltage")]
    pub input_voltage_v: f64,
    /// 目标温度 (°C)
    #[serde(rename = "targettemp")]
    pub target_temp_c: f64,
    /// 自动风扇（0/1）
    pub autofanspeed: u8,
    /// 快照时刻 (Unix 秒)
    pub timestamp: f64,
    /// 历史最优份额难度
    #[serde(rename = "bestDiff")]
    pub best_difficulty: u64,
}

impl TelemetrySnapshot {
    /// 从矿机状态投影快照
    pub fn project(state: &MinerState, model: &ModelPreset, now_s: f64) -> Self {
        Self {
            miner_id: state.miner_id.clone(),
            hashrate_ghs: state.hashrate_ghs,
            chip_temp_c: state.chip_temp_c,
            vr_temp_c: state.vr_temp_c,
            power_w: state.power_w,
            fanspeed: state.fan_percent,
            fanrpm: state.fan_rpm,
            core_voltage_mv: state.config.core_voltage_mv,
            frequency_mhz: state.config.frequency_mhz,
            error_percentage: state.error_percentage,
            shares_accepted: state.shares_accepted,
            shares_rejected: state.shares_rejected,
            pool_state: state.pool_state,
            uptime_seconds: state.uptime_s,
            input_voltage_v: model.input_voltage_v,
            target_temp_c: state.config.target_temp_c,
            autofanspeed: u8::from(state.config.autofanspeed),
            timestamp: now_s,
            best_difficulty: state.best_difficulty,
        }
    }
}
