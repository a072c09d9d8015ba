//! 机型与场景预设
//!
//! `ModelPreset` 描述一种硬件原型（芯片家族、标称工作点、热参数），
//! `ScenarioPreset` 是叠加在机型之上的行为层（环境温度、矿池抖动、
//! 误码地板）。两者都是不可变参数包，模拟引擎只读取不修改。
//!
//! 内置目录覆盖 Bitaxe / NerdAxe 家族的常见板型（BM1397 / BM1366 /
//! BM1368 / BM1370），参数围绕各自的标称点标定：标称配置、基准风扇
//! 占空比、24°C 环境下芯片温度稳定在 60°C 附近。

use crate::error::FleetError;
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::sync::Arc;
use tracing::warn;

/// 机型预设
///
/// 除了基础规格外还携带模拟引擎的标定钩子：算力-电压指数、动态功耗
/// 系数（由标称功耗反推）、风扇满速散热系数等。
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ModelPreset {
    /// 机型ID（目录内唯一）
    pub model_id: String,
    /// 展示名称
    pub display_name: String,
    /// ASIC 芯片型号
    pub asic_model: String,
    /// 芯片数量
    pub asic_count: u32,
    /// 输入电压 (V)，5 或 12
    pub input_voltage_v: f64,
    /// 标称频率 (MHz)
    pub frequency_mhz: u32,
    /// 标称核心电压 (mV)
    pub core_voltage_mv: u32,
    /// 频率可调区间 (MHz)
    pub frequency_range_mhz: (u32, u32),
    /// 核心电压可调区间 (mV)
    pub core_voltage_range_mv: (u32, u32),
    /// 标称点单芯片算力 (GH/s)
    pub hashrate_per_chip_ghs: f64,
    /// 标称点整机功耗 (W)
    pub power_w_at_nominal: f64,
    /// 空闲功耗 (W)
    pub idle_power_w: f64,
    /// 热容 (J/°C)
    pub thermal_mass_j_per_c: f64,
    /// 热阻 (°C/W)，纯传导散热部分
    pub thermal_resistance_c_per_w: f64,
    /// 风扇满速时的散热系数 (W/°C)
    pub fan_cooling_w_per_c: f64,
    /// VR 相对芯片的温度偏移 (°C)
    pub vr_offset_c: f64,
    /// 风扇最大转速 (RPM)
    pub fan_max_rpm: u32,
    /// 默认环境温度 (°C)
    pub ambient_c_default: f64,
    /// 默认目标温度 (°C)
    pub temp_target_c_default: f64,
    /// 风扇控制器的前馈基准占空比 (%)
    pub fan_baseline_pct: f64,
    /// 算力曲线中电压项的次线性指数
    pub hashrate_voltage_exponent: f64,
    /// 标称工作点的份额产生率 (个/秒)
    pub share_rate_hz_at_nominal: f64,
}

impl ModelPreset {
    /// 标称整机算力 (GH/s)
    pub fn nominal_hashrate_ghs(&self) -> f64 {
        self.hashrate_per_chip_ghs * self.asic_count as f64
    }

    /// 算力缩放曲线 f(频率, 电压)
    ///
    /// f(标称点) = 1，对频率线性单调，电压项次线性。
    pub fn hashrate_scale(&self, frequency_mhz: u32, core_voltage_mv: u32) -> f64 {
        let freq_scale = frequency_mhz as f64 / (self.frequency_mhz as f64).max(1.0);
        let volt_scale = core_voltage_mv as f64 / (self.core_voltage_mv as f64).max(1.0);
        freq_scale * volt_scale.max(0.0).powf(self.hashrate_voltage_exponent)
    }

    /// 动态功耗系数 k_dyn (W)
    ///
    /// 标定为：标称配置、完全爬坡时整机功耗恰好等于 `power_w_at_nominal`。
    pub fn dynamic_power_w(&self) -> f64 {
        (self.power_w_at_nominal - self.idle_power_w).max(0.0)
    }
}

/// 场景预设
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ScenarioPreset {
    /// 场景ID
    pub scenario_id: String,
    /// 环境温度覆盖 (°C)，None 时使用机型默认值
    pub ambient_c: Option<f64>,
    /// 份额拒绝偏置：拒绝率 = 接受率 × reject_bias
    pub reject_bias: f64,
    /// 每秒掉线概率
    pub disconnect_rate_per_s: f64,
    /// 平均恢复时间 (秒)
    pub mttr_s: f64,
    /// 误码率地板 (%)
    pub error_floor_pct: f64,
    /// 算力测量抖动标准差（相对值）
    pub hashrate_jitter_sigma: f64,
    /// 每节拍热噪声标准差 (°C)
    pub thermal_noise_sigma_c: f64,
    /// 连接延迟区间 (秒)
    pub connect_delay_s: (f64, f64),
    /// 重启持续时间 (秒)
    pub restart_duration_s: f64,
}

/// 预设注册表
///
/// 矿队运行时从这里解析 model_id / scenario_id。注册表在构建后不再
/// 变化，条目以 Arc 共享给各矿机。
#[derive(Debug, Clone)]
pub struct PresetRegistry {
    models: HashMap<String, Arc<ModelPreset>>,
    scenarios: HashMap<String, Arc<ScenarioPreset>>,
}

impl PresetRegistry {
    /// 创建空注册表
    pub fn empty() -> Self {
        Self {
            models: HashMap::new(),
            scenarios: HashMap::new(),
        }
    }

    /// 创建带内置目录的注册表
    pub fn builtin() -> Self {
        let mut registry = Self::empty();
        for model in builtin_models() {
            registry.register_model(model);
        }
        for scenario in builtin_scenarios() {
            registry.register_scenario(scenario);
        }
        registry
    }

    /// 注册机型预设
    pub fn register_model(&mut self, preset: ModelPreset) {
        if self.models.contains_key(&preset.model_id) {
            warn!("机型预设 '{}' 已存在，将被覆盖", preset.model_id);
        }
        self.models.insert(preset.model_id.clone(), Arc::new(preset));
    }

    /// 注册场景预设
    pub fn register_scenario(&mut self, preset: ScenarioPreset) {
        if self.scenarios.contains_key(&preset.scenario_id) {
            warn!("场景预设 '{}' 已存在，将被覆盖", preset.scenario_id);
        }
        self.scenarios
            .insert(preset.scenario_id.clone(), Arc::new(preset));
    }

    /// 按ID查找机型
    pub fn model(&self, model_id: &str) -> Result<Arc<ModelPreset>, FleetError> {
        self.models
            .get(model_id)
            .cloned()
            .ok_or_else(|| FleetError::model_not_found(model_id))
    }

    /// 按ID查找场景
    pub fn scenario(&self, scenario_id: &str) -> Result<Arc<ScenarioPreset>, FleetError> {
        self.scenarios
            .get(scenario_id)
            .cloned()
            .ok_or_else(|| FleetError::scenario_not_found(scenario_id))
    }

    /// 列出全部机型（按ID排序）
    pub fn list_models(&self) -> Vec<Arc<ModelPreset>> {
        let mut models: Vec<_> = self.models.values().cloned().collect();
        models.sort_by(|a, b| a.model_id.cmp(&b.model_id));
        models
    }

    /// 列出全部场景ID（排序）
    pub fn list_scenario_ids(&self) -> Vec<String> {
        let mut ids: Vec<_> = self.scenarios.keys().cloned().collect();
        ids.sort();
        ids
    }
}

impl Default for PresetRegistry {
    fn default() -> Self {
        Self::builtin()
    }
}

/// 内置机型目录
///
/// 单芯片算力 = 标称频率 × 小核数 / 1000；热参数按
/// "标称功耗、基准风扇占空比、24°C 环境 → 芯片 60°C、
/// 一阶时间常数约 30 秒" 标定。
fn builtin_models() -> Vec<ModelPreset> {
    vec![
        ModelPreset {
            model_id: "bm1397_1chip_5v".to_string(),
            display_name: "Bitaxe Max (BM1397 x1, 5V)".to_string(),
            asic_model: "BM1397".to_string(),
            asic_count: 1,
            input_voltage_v: 5.0,
            frequency_mhz: 425,
            core_voltage_mv: 1400,
            frequency_range_mhz: (400, 600),
            core_voltage_range_mv: (1100, 1500),
            hashrate_per_chip_ghs: 285.6,
            power_w_at_nominal: 25.0,
            idle_power_w: 3.0,
            thermal_mass_j_per_c: 21.0,
            thermal_resistance_c_per_w: 3.6,
            fan_cooling_w_per_c: 0.83,
            vr_offset_c: 1.5,
            fan_max_rpm: 8000,
            ambient_c_default: 24.0,
            temp_target_c_default: 60.0,
            fan_baseline_pct: 50.0,
            hashrate_voltage_exponent: 0.35,
            share_rate_hz_at_nominal: 0.010,
        },
        ModelPreset {
            model_id: "bm1366_1chip_5v".to_string(),
            display_name: "Bitaxe Ultra (BM1366 x1, 5V)".to_string(),
            asic_model: "BM1366".to_string(),
            asic_count: 1,
            input_voltage_v: 5.0,
            frequency_mhz: 485,
            core_voltage_mv: 1200,
            frequency_range_mhz: (400, 575),
            core_voltage_range_mv: (1100, 1300),
            hashrate_per_chip_ghs: 433.6,
            power_w_at_nominal: 25.0,
            idle_power_w: 3.0,
            thermal_mass_j_per_c: 21.0,
            thermal_resistance_c_per_w: 3.6,
            fan_cooling_w_per_c: 0.83,
            vr_offset_c: 1.0,
            fan_max_rpm: 9000,
            ambient_c_default: 24.0,
            temp_target_c_default: 60.0,
            fan_baseline_pct: 50.0,
            hashrate_voltage_exponent: 0.35,
            share_rate_hz_at_nominal: 0.010,
        },
        ModelPreset {
            model_id: "bm1366_6chip_12v".to_string(),
            display_name: "Bitaxe Hex (BM1366 x6, 12V)".to_string(),
            asic_model: "BM1366".to_string(),
            asic_count: 6,
            input_voltage_v: 12.0,
            frequency_mhz: 485,
            core_voltage_mv: 1200,
            frequency_range_mhz: (400, 575),
            core_voltage_range_mv: (1100, 1300),
            hashrate_per_chip_ghs: 433.6,
            power_w_at_nominal: 90.0,
            idle_power_w: 8.0,
            thermal_mass_j_per_c: 75.0,
            thermal_resistance_c_per_w: 1.0,
            fan_cooling_w_per_c: 3.0,
            vr_offset_c: 6.0,
            fan_max_rpm: 12000,
            ambient_c_default: 24.0,
            temp_target_c_default: 60.0,
            fan_baseline_pct: 50.0,
            hashrate_voltage_exponent: 0.35,
            share_rate_hz_at_nominal: 0.080,
        },
        ModelPreset {
            model_id: "bm1368_4chip".to_string(),
            display_name: "QAxe+ / NerdQAxe+ (BM1368 x4, 12V)".to_string(),
            asic_model: "BM1368".to_string(),
            asic_count: 4,
            input_voltage_v: 12.0,
            frequency_mhz: 490,
            core_voltage_mv: 1166,
            frequency_range_mhz: (400, 575),
            core_voltage_range_mv: (1100, 1300),
            hashrate_per_chip_ghs: 625.2,
            power_w_at_nominal: 55.0,
            idle_power_w: 6.0,
            thermal_mass_j_per_c: 46.0,
            thermal_resistance_c_per_w: 1.64,
            fan_cooling_w_per_c: 1.83,
            vr_offset_c: 10.0,
            fan_max_rpm: 14000,
            ambient_c_default: 24.0,
            temp_target_c_default: 60.0,
            fan_baseline_pct: 50.0,
            hashrate_voltage_exponent: 0.35,
            share_rate_hz_at_nominal: 0.070,
        },
        ModelPreset {
            model_id: "bm1370_1chip_5v".to_string(),
            display_name: "Bitaxe Gamma (BM1370 x1, 5V)".to_string(),
            asic_model: "BM1370".to_string(),
            asic_count: 1,
            input_voltage_v: 5.0,
            frequency_mhz: 600,
            core_voltage_mv: 1175,
            frequency_range_mhz: (400, 625),
            core_voltage_range_mv: (1000, 1250),
            hashrate_per_chip_ghs: 1224.0,
            power_w_at_nominal: 20.0,
            idle_power_w: 3.0,
            thermal_mass_j_per_c: 17.0,
            thermal_resistance_c_per_w: 4.5,
            fan_cooling_w_per_c: 0.67,
            vr_offset_c: 1.0,
            fan_max_rpm: 15500,
            ambient_c_default: 24.0,
            temp_target_c_default: 60.0,
            fan_baseline_pct: 50.0,
            hashrate_voltage_exponent: 0.30,
            share_rate_hz_at_nominal: 0.024,
        },
        ModelPreset {
            model_id: "bm1370_4chip".to_string(),
            display_name: "NerdQAxe++ (BM1370 x4, 12V)".to_string(),
            asic_model: "BM1370".to_string(),
            asic_count: 4,
            input_voltage_v: 12.0,
            frequency_mhz: 600,
            core_voltage_mv: 1175,
            frequency_range_mhz: (400, 625),
            core_voltage_range_mv: (1000, 1250),
            hashrate_per_chip_ghs: 1224.0,
            power_w_at_nominal: 76.0,
            idle_power_w: 6.0,
            thermal_mass_j_per_c: 63.0,
            thermal_resistance_c_per_w: 1.18,
            fan_cooling_w_per_c: 2.53,
            vr_offset_c: 10.0,
            fan_max_rpm: 16000,
            ambient_c_default: 24.0,
            temp_target_c_default: 60.0,
            fan_baseline_pct: 50.0,
            hashrate_voltage_exponent: 0.30,
            share_rate_hz_at_nominal: 0.120,
        },
        ModelPreset {
            model_id: "bm1370_8chip".to_string(),
            display_name: "NerdOCTAXE-Gamma (BM1370 x8, 12V)".to_string(),
            asic_model: "BM1370".to_string(),
            asic_count: 8,
            input_voltage_v: 12.0,
            frequency_mhz: 600,
            core_voltage_mv: 1175,
            frequency_range_mhz: (400, 625),
            core_voltage_range_mv: (1000, 1250),
            hashrate_per_chip_ghs: 1224.0,
            power_w_at_nominal: 155.0,
            idle_power_w: 10.0,
            thermal_mass_j_per_c: 129.0,
            thermal_resistance_c_per_w: 0.58,
            fan_cooling_w_per_c: 5.17,
            vr_offset_c: 14.0,
            fan_max_rpm: 18000,
            ambient_c_default: 24.0,
            temp_target_c_default: 60.0,
            fan_baseline_pct: 50.0,
            hashrate_voltage_exponent: 0.30,
            share_rate_hz_at_nominal: 0.220,
        },
    ]
}

/// 内置场景目录
fn builtin_scenarios() -> Vec<ScenarioPreset> {
    vec![
        ScenarioPreset {
            scenario_id: "healthy".to_string(),
            ambient_c: None,
            reject_bias: 0.003,
            disconnect_rate_per_s: 0.0,
            mttr_s: 8.0,
            error_floor_pct: 0.0,
            hashrate_jitter_sigma: 0.02,
            thermal_noise_sigma_c: 0.2,
            connect_delay_s: (2.0, 5.0),
            restart_duration_s: 5.0,
        },
        ScenarioPreset {
            scenario_id: "hot_ambient".to_string(),
            ambient_c: Some(38.0),
            reject_bias: 0.006,
            disconnect_rate_per_s: 0.0,
            mttr_s: 8.0,
            error_floor_pct: 0.1,
            hashrate_jitter_sigma: 0.025,
            thermal_noise_sigma_c: 0.3,
            connect_delay_s: (2.0, 5.0),
            restart_duration_s: 5.0,
        },
        ScenarioPreset {
            scenario_id: "flaky_pool".to_string(),
            ambient_c: None,
            reject_bias: 0.01,
            disconnect_rate_per_s: 0.05,
            mttr_s: 10.0,
            error_floor_pct: 0.2,
            hashrate_jitter_sigma: 0.03,
            thermal_noise_sigma_c: 0.2,
            connect_delay_s: (2.0, 5.0),
            restart_duration_s: 5.0,
        },
        ScenarioPreset {
            scenario_id: "degraded".to_string(),
            ambient_c: None,
            reject_bias: 0.06,
            disconnect_rate_per_s: 0.01,
            mttr_s: 15.0,
            error_floor_pct: 3.0,
            hashrate_jitter_sigma: 0.06,
            thermal_noise_sigma_c: 0.4,
            connect_delay_s: (2.0, 5.0),
            restart_duration_s: 5.0,
        },
    ]
}
