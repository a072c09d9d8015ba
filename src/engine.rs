//! 矿机模拟引擎
//!
//! `advance` 把单台矿机状态向前推进 dt 秒，步骤固定：应用待生效
//! 配置 → 重启倒计时 → 矿池状态机 → 算力爬坡 → 功耗 → 热模型 →
//! 风扇控制 → 份额与误码 → 运行时间。引擎不做任何 I/O，真实时间
//! 只以 dt 的形式进入，相同的 (预设, 场景, 种子, dt 序列) 产生
//! 逐位一致的遥测轨迹。
//!
//! 任何中间量出现 NaN/Inf 时只把出问题的字段复位到标称值，本次
//! 节拍照常完成，也不会影响矿队里的其他矿机。

use crate::presets::{ModelPreset, ScenarioPreset};
use crate::state::{MinerState, PoolState};
use tracing::warn;

/// dt 上限（秒），长时间暂停后避免数值爆炸
const MAX_DT_S: f64 = 5.0;
/// 算力爬坡时间常数（上升）
const RAMP_UP_TAU_S: f64 = 30.0;
/// 算力衰减时间常数（下降）
const RAMP_DOWN_TAU_S: f64 = 3.0;
/// 功耗趋近时间常数
const POWER_TAU_S: f64 = 6.0;
/// 风扇 PI 控制比例系数
const FAN_KP: f64 = 2.0;
/// 风扇 PI 控制积分系数
const FAN_KI: f64 = 0.05;
/// 积分项限幅（抗饱和）
const FAN_INTEGRAL_LIMIT: f64 = 100.0;
/// 自动模式下的风扇占空比下限 (%)
const FAN_AUTO_MIN_PCT: f64 = 10.0;
/// 芯片温度超过目标该幅度后风扇强制全速 (°C)
const FAN_PANIC_MARGIN_C: f64 = 15.0;
/// 误码率 EWMA 的单份额权重
const ERROR_EWMA_ALPHA: f64 = 0.01;
/// VR 温度噪声带宽 (°C)
const VR_NOISE_BAND_C: f64 = 0.4;

/// 指数趋近：current 以时间常数 tau 向 target 收敛
fn approach(current: f64, target: f64, dt: f64, tau: f64) -> f64 {
    if tau <= 0.0 {
        return target;
    }
    let alpha = 1.0 - (-dt.max(0.0) / tau).exp();
    current + (target - current) * alpha
}

/// 模拟引擎
///
/// 无内部状态，可在整个矿队间共享。
#[derive(Debug, Clone, Copy, Default)]
pub struct SimulationEngine;

impl SimulationEngine {
    /// 创建新的模拟引擎
    pub fn new() -> Self {
        Self
    }

    /// 推进一台矿机 dt 秒
    pub fn advance(
        &self,
        state: &mut MinerState,
        dt_s: f64,
        model: &ModelPreset,
        scenario: &ScenarioPreset,
    ) {
        let dt = if dt_s.is_finite() {
            dt_s.clamp(0.0, MAX_DT_S)
        } else {
            0.0
        };

        // 1. 应用待生效配置
        if !state.pending.is_empty() {
            let pending = std::mem::take(&mut state.pending);
            pending.apply_to(&mut state.config);
        }

        // 2. 重启倒计时
        if state.restart_remaining_s > 0.0 {
            state.restart_remaining_s -= dt;
            if state.restart_remaining_s <= 0.0 {
                state.restart_remaining_s = 0.0;
                state.pool_state = PoolState::Connecting;
                state.connect_remaining_s = state
                    .rng
                    .uniform_range(scenario.connect_delay_s.0, scenario.connect_delay_s.1);
            } else {
                state.pool_state = PoolState::Restarting;
            }
        }

        // 3. 矿池状态机
        match state.pool_state {
            PoolState::Connecting => {
                state.connect_remaining_s -= dt;
                if state.connect_remaining_s <= 0.0 {
                    state.connect_remaining_s = 0.0;
                    state.pool_state = PoolState::Connected;
                }
            }
            PoolState::Connected => {
                state.pool_state = PoolState::Mining;
            }
            PoolState::Mining => {
                if scenario.disconnect_rate_per_s > 0.0
                    && state.rng.uniform() < scenario.disconnect_rate_per_s * dt
                {
                    // 恢复时间取指数分布，均值 mttr_s
                    let u = state.rng.uniform().max(f64::MIN_POSITIVE);
                    state.reconnect_remaining_s = -scenario.mttr_s * u.ln();
                    state.pool_state = PoolState::Reconnecting;
                }
            }
            PoolState::Reconnecting => {
                state.reconnect_remaining_s -= dt;
                if state.reconnect_remaining_s <= 0.0 {
                    state.reconnect_remaining_s = 0.0;
                    state.pool_state = PoolState::Mining;
                }
            }
            PoolState::Restarting => {}
        }

        let mining = state.pool_state == PoolState::Mining;

        // 4. 算力爬坡
        let target_hash_ghs = model.nominal_hashrate_ghs()
            * model.hashrate_scale(state.config.frequency_mhz, state.config.core_voltage_mv);
        let (ramp_goal, ramp_tau) = if mining {
            (1.0, RAMP_UP_TAU_S)
        } else {
            (0.0, RAMP_DOWN_TAU_S)
        };
        state.ramp_progress = approach(state.ramp_progress, ramp_goal, dt, ramp_tau).clamp(0.0, 1.0);

        let jitter = (1.0 + state.rng.gauss(scenario.hashrate_jitter_sigma)).max(0.0);
        state.hashrate_ghs = if state.pool_state.forces_zero_hashrate() {
            0.0
        } else {
            (target_hash_ghs * state.ramp_progress * jitter).max(0.0)
        };

        // 5. 功耗模型
        let freq_scale = state.config.frequency_mhz as f64 / (model.frequency_mhz as f64).max(1.0);
        let volt_scale =
            state.config.core_voltage_mv as f64 / (model.core_voltage_mv as f64).max(1.0);
        let power_target = model.idle_power_w
            + model.dynamic_power_w() * freq_scale * volt_scale * volt_scale * state.ramp_progress;
        state.power_w = approach(state.power_w, power_target, dt, POWER_TAU_S).max(0.0);

        // 6. 热模型（欧拉积分）
        state.ambient_c = scenario.ambient_c.unwrap_or(model.ambient_c_default);
        let delta_t = state.chip_temp_c - state.ambient_c;
        let conduction_w = delta_t / model.thermal_resistance_c_per_w.max(1e-6);
        let fan_cooling_w = model.fan_cooling_w_per_c * (state.fan_percent / 100.0) * delta_t;
        let net_heat_w = state.power_w - conduction_w - fan_cooling_w;
        state.chip_temp_c += dt * net_heat_w / model.thermal_mass_j_per_c.max(1e-6)
            + state.rng.gauss(scenario.thermal_noise_sigma_c);
        if state.chip_temp_c < state.ambient_c {
            state.chip_temp_c = state.ambient_c;
        }
        state.vr_temp_c = state.chip_temp_c
            + model.vr_offset_c
            + state.rng.uniform_range(-VR_NOISE_BAND_C, VR_NOISE_BAND_C);

        // 7. 风扇控制
        if state.config.autofanspeed {
            let err = state.chip_temp_c - state.config.target_temp_c;
            if err >= FAN_PANIC_MARGIN_C {
                state.fan_percent = 100.0;
                state.fan_integral = approach(state.fan_integral, 0.0, dt, 18.0);
            } else {
                // 抗饱和：输出顶在边界且误差继续推向边界时停止积分
                let at_max = state.fan_percent >= 100.0 - 1e-9;
                let at_min = state.fan_percent <= FAN_AUTO_MIN_PCT + 1e-9;
                if !((at_max && err > 0.0) || (at_min && err < 0.0)) {
                    state.fan_integral = (state.fan_integral + err * dt)
                        .clamp(-FAN_INTEGRAL_LIMIT, FAN_INTEGRAL_LIMIT);
                }
                let desired = model.fan_baseline_pct + FAN_KP * err + FAN_KI * state.fan_integral;
                state.fan_percent = desired.clamp(FAN_AUTO_MIN_PCT, 100.0);
            }
        } else {
            state.fan_percent = state.config.manual_fan_percent.clamp(0.0, 100.0);
        }
        state.fan_rpm = state.fan_percent / 100.0 * model.fan_max_rpm as f64;

        // 8. 份额与误码
        if mining {
            let nominal_hash = model.nominal_hashrate_ghs();
            let lambda = if nominal_hash > 0.0 {
                model.share_rate_hz_at_nominal * (state.hashrate_ghs / nominal_hash) * dt
            } else {
                0.0
            };
            let accepted = state.rng.poisson(lambda);
            let rejected = state.rng.poisson(lambda * scenario.reject_bias.max(0.0));

            state.shares_accepted += accepted;
            state.shares_rejected += rejected;

            for _ in 0..accepted {
                // 份额难度服从重尾分布，保留历史最优
                let u = state.rng.uniform().max(1e-9);
                let candidate = (u.powi(-3) * 10_000.0).clamp(10_000.0, 50_000_000_000.0) as u64;
                if candidate > state.best_difficulty {
                    state.best_difficulty = candidate;
                }
                state.error_percentage *= 1.0 - ERROR_EWMA_ALPHA;
            }
            for _ in 0..rejected {
                state.error_percentage =
                    state.error_percentage * (1.0 - ERROR_EWMA_ALPHA) + 100.0 * ERROR_EWMA_ALPHA;
            }
        }
        state.error_percentage = state
            .error_percentage
            .max(scenario.error_floor_pct)
            .clamp(0.0, 100.0);

        // 9. 运行时间（重启期间停表）
        if state.pool_state != PoolState::Restarting {
            state.uptime_s += dt;
        }

        self.recover_non_finite(state, model, scenario);
    }

    /// 数值故障恢复
    ///
    /// 出问题的字段复位到标称值，节拍照常结束。
    fn recover_non_finite(
        &self,
        state: &mut MinerState,
        model: &ModelPreset,
        scenario: &ScenarioPreset,
    ) {
        let ambient = scenario.ambient_c.unwrap_or(model.ambient_c_default);
        let mut faults = 0u64;

        if !state.chip_temp_c.is_finite() {
            state.chip_temp_c = ambient;
            faults += 1;
        }
        if !state.vr_temp_c.is_finite() {
            state.vr_temp_c = state.chip_temp_c + model.vr_offset_c;
            faults += 1;
        }
        if !state.hashrate_ghs.is_finite() || state.hashrate_ghs < 0.0 {
            state.hashrate_ghs = 0.0;
            faults += 1;
        }
        if !state.power_w.is_finite() {
            state.power_w = model.idle_power_w;
            faults += 1;
        }
        if !state.fan_percent.is_finite() {
            state.fan_percent = model.fan_baseline_pct.clamp(0.0, 100.0);
            state.fan_rpm = state.fan_percent / 100.0 * model.fan_max_rpm as f64;
            faults += 1;
        }
        if !state.fan_rpm.is_finite() {
            state.fan_rpm = state.fan_percent / 100.0 * model.fan_max_rpm as f64;
            faults += 1;
        }
        if !state.ramp_progress.is_finite() {
            state.ramp_progress = 0.0;
            faults += 1;
        }
        if !state.error_percentage.is_finite() {
            state.error_percentage = scenario.error_floor_pct.clamp(0.0, 100.0);
            faults += 1;
        }
        if !state.fan_integral.is_finite() {
            state.fan_integral = 0.0;
            faults += 1;
        }
        if !state.uptime_s.is_finite() {
            state.uptime_s = 0.0;
            faults += 1;
        }

        if faults > 0 {
            state.fault_count += faults;
            warn!(
                miner_id = %state.miner_id,
                faults,
                "simulation produced non-finite values, fields reset to nominal"
            );
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::presets::PresetRegistry;
    use crate::state::MinerState;
    use std::sync::Arc;

    fn fixture(scenario_id: &str) -> (MinerState, Arc<ModelPreset>, Arc<ScenarioPreset>) {
        let registry = PresetRegistry::builtin();
        let model = registry.model("bm1370_4chip").unwrap();
        let scenario = registry.scenario(scenario_id).unwrap();
        let state = MinerState::new("m_001".to_string(), &model, &scenario, 42, 0.0);
        (state, model, scenario)
    }

    #[test]
    fn test_approach_converges() {
        let mut x = 0.0;
        for _ in 0..200 {
            x = approach(x, 10.0, 1.0, 5.0);
        }
        assert!((x - 10.0).abs() < 1e-6, "指数趋近应该收敛到目标");

        // tau<=0 时直接跳到目标
        assert_eq!(approach(0.0, 3.0, 1.0, 0.0), 3.0);
    }

    #[test]
    fn test_dt_is_clamped() {
        let engine = SimulationEngine::new();
        let (mut state, model, scenario) = fixture("healthy");

        // 一小时的空洞只按 5 秒推进
        engine.advance(&mut state, 3600.0, &model, &scenario);
        assert!(state.uptime_s <= 5.0 + 1e-9, "dt 应该被截断到 5 秒");

        let (mut state, model, scenario) = fixture("healthy");
        engine.advance(&mut state, f64::NAN, &model, &scenario);
        assert_eq!(state.uptime_s, 0.0, "非法 dt 按 0 处理");
    }

    #[test]
    fn test_connecting_reaches_mining() {
        let engine = SimulationEngine::new();
        let (mut state, model, scenario) = fixture("healthy");

        // 连接延迟最长 5 秒，再加一拍 connected 过渡
        for _ in 0..8 {
            engine.advance(&mut state, 1.0, &model, &scenario);
        }
        assert_eq!(state.pool_state, PoolState::Mining, "8 秒内应该进入 mining");
    }

    #[test]
    fn test_zero_hashrate_while_not_mining() {
        let engine = SimulationEngine::new();
        let (mut state, model, scenario) = fixture("healthy");

        while state.pool_state != PoolState::Mining {
            assert_eq!(state.hashrate_ghs, 0.0, "{} 状态下算力必须为 0", state.pool_state);
            engine.advance(&mut state, 1.0, &model, &scenario);
        }
    }

    #[test]
    fn test_pending_config_applied_at_tick_start() {
        let engine = SimulationEngine::new();
        let (mut state, model, scenario) = fixture("healthy");

        state.pending.frequency_mhz = Some(500);
        assert_eq!(state.config.frequency_mhz, 600, "补丁在节拍前不可见");

        engine.advance(&mut state, 1.0, &model, &scenario);
        assert_eq!(state.config.frequency_mhz, 500);
        assert!(state.pending.is_empty(), "应用后待生效补丁被清空");
    }

    #[test]
    fn test_restart_countdown_and_recovery() {
        let engine = SimulationEngine::new();
        let (mut state, model, scenario) = fixture("healthy");

        // 先跑到 mining
        for _ in 0..10 {
            engine.advance(&mut state, 1.0, &model, &scenario);
        }
        let uptime_before = state.uptime_s;
        state.begin_restart(5.0);

        // 重启期间：状态保持、算力为零、uptime 停表
        for _ in 0..4 {
            engine.advance(&mut state, 1.0, &model, &scenario);
            assert_eq!(state.pool_state, PoolState::Restarting);
            assert_eq!(state.hashrate_ghs, 0.0);
        }
        assert_eq!(state.uptime_s, uptime_before, "重启期间 uptime 不走");

        // 倒计时结束后转回 connecting，最终回到 mining
        for _ in 0..12 {
            engine.advance(&mut state, 1.0, &model, &scenario);
        }
        assert_eq!(state.pool_state, PoolState::Mining);
        assert!(state.uptime_s > uptime_before);
    }

    #[test]
    fn test_shares_are_monotonic() {
        let engine = SimulationEngine::new();
        let (mut state, model, scenario) = fixture("degraded");

        let mut last_accepted = 0;
        let mut last_rejected = 0;
        for _ in 0..600 {
            engine.advance(&mut state, 1.0, &model, &scenario);
            assert!(state.shares_accepted >= last_accepted);
            assert!(state.shares_rejected >= last_rejected);
            last_accepted = state.shares_accepted;
            last_rejected = state.shares_rejected;
        }
        assert!(state.shares_accepted > 0, "600 秒内应该产生份额");
    }

    #[test]
    fn test_error_percentage_respects_floor_and_bounds() {
        let engine = SimulationEngine::new();
        let (mut state, model, scenario) = fixture("degraded");

        for _ in 0..600 {
            engine.advance(&mut state, 1.0, &model, &scenario);
            assert!(state.error_percentage >= scenario.error_floor_pct - 1e-9);
            assert!((0.0..=100.0).contains(&state.error_percentage));
        }
    }

    #[test]
    fn test_manual_fan_mode() {
        let engine = SimulationEngine::new();
        let (mut state, model, scenario) = fixture("healthy");

        state.pending.autofanspeed = Some(0);
        state.pending.manual_fan_percent = Some(73.0);
        engine.advance(&mut state, 1.0, &model, &scenario);

        assert_eq!(state.fan_percent, 73.0);
        let expected_rpm = 73.0 / 100.0 * model.fan_max_rpm as f64;
        assert!((state.fan_rpm - expected_rpm).abs() < 1e-9);
    }

    #[test]
    fn test_non_finite_fields_are_recovered() {
        let engine = SimulationEngine::new();
        let (mut state, model, scenario) = fixture("healthy");

        state.chip_temp_c = f64::NAN;
        state.power_w = f64::INFINITY;
        engine.advance(&mut state, 1.0, &model, &scenario);

        assert!(state.chip_temp_c.is_finite(), "芯片温度应该被复位");
        assert!(state.power_w.is_finite(), "功耗应该被复位");
        assert!(state.fault_count() > 0, "故障恢复应该被计数");

        // 后续节拍恢复正常演化
        for _ in 0..10 {
            engine.advance(&mut state, 1.0, &model, &scenario);
        }
        assert!(state.chip_temp_c.is_finite());
    }

    #[test]
    fn test_power_settles_near_nominal_when_mining() {
        let engine = SimulationEngine::new();
        let (mut state, model, scenario) = fixture("healthy");

        for _ in 0..180 {
            engine.advance(&mut state, 1.0, &model, &scenario);
        }
        assert_eq!(state.pool_state, PoolState::Mining);
        let ratio = state.power_w / model.power_w_at_nominal;
        assert!(
            (0.92..=1.08).contains(&ratio),
            "标称配置下功耗应该接近标称值，实际比率 {}",
            ratio
        );
    }
}
