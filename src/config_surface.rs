//! 配置面
//!
//! 运行中的矿机通过 PATCH 风格的增量补丁调整工作点。补丁逐字段独立
//! 校验（越界字段产生违例并被丢弃，合法字段照常生效），然后进入
//! `pendingConfig` 暂存，由下一个节拍在推进开始时统一应用。把应用
//! 推迟到节拍内，遥测读取方和配置写入方之间就不存在先检查后使用的
//! 竞态，模拟也保持为 (state, dt, config) 的纯函数。

use crate::presets::ModelPreset;
use serde::{Deserialize, Serialize};
use serde_json::Value;

/// 矿机的可变配置
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct MinerConfig {
    /// 核心电压 (mV)
    pub core_voltage_mv: u32,
    /// 频率 (MHz)
    pub frequency_mhz: u32,
    /// 自动风扇（0/1）
    pub autofanspeed: bool,
    /// 自动风扇的目标温度 (°C)
    pub target_temp_c: f64,
    /// 手动风扇占空比 (%)，仅 autofanspeed=0 时生效
    pub manual_fan_percent: f64,
}

impl MinerConfig {
    /// 机型标称点配置
    pub fn nominal(model: &ModelPreset) -> Self {
        Self {
            core_voltage_mv: model.core_voltage_mv,
            frequency_mhz: model.frequency_mhz,
            autofanspeed: true,
            target_temp_c: model.temp_target_c_default,
            manual_fan_percent: model.fan_baseline_pct,
        }
    }
}

/// 配置补丁
///
/// 只包含调用方明确给出的字段，`autofanspeed` 保留原始 0/1 值直到
/// 校验通过。
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct ConfigPatch {
    #[serde(rename = "coreVoltage", skip_serializing_if = "Option::is_none")]
    pub core_voltage_mv: Option<u32>,
    #[serde(rename = "frequency", skip_serializing_if = "Option::is_none")]
    pub frequency_mhz: Option<u32>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub autofanspeed: Option<u8>,
    #[serde(rename = "targettemp", skip_serializing_if = "Option::is_none")]
    pub target_temp_c: Option<f64>,
    #[serde(rename = "manualFanPercent", skip_serializing_if = "Option::is_none")]
    pub manual_fan_percent: Option<f64>,
}

impl ConfigPatch {
    /// 补丁是否为空
    pub fn is_empty(&self) -> bool {
        self.core_voltage_mv.is_none()
            && self.frequency_mhz.is_none()
            && self.autofanspeed.is_none()
            && self.target_temp_c.is_none()
            && self.manual_fan_percent.is_none()
    }

    /// 逐字段合并另一个补丁，后来者覆盖先到者
    pub fn merge_from(&mut self, other: &ConfigPatch) {
        if other.core_voltage_mv.is_some() {
            self.core_voltage_mv = other.core_voltage_mv;
        }
        if other.frequency_mhz.is_some() {
            self.frequency_mhz = other.frequency_mhz;
        }
        if other.autofanspeed.is_some() {
            self.autofanspeed = other.autofanspeed;
        }
        if other.target_temp_c.is_some() {
            self.target_temp_c = other.target_temp_c;
        }
        if other.manual_fan_percent.is_some() {
            self.manual_fan_percent = other.manual_fan_percent;
        }
    }

    /// 应用到在用配置
    pub fn apply_to(&self, config: &mut MinerConfig) {
        if let Some(v) = self.core_voltage_mv {
            config.core_voltage_mv = v;
        }
        if let Some(f) = self.frequency_mhz {
            config.frequency_mhz = f;
        }
        if let Some(a) = self.autofanspeed {
            config.autofanspeed = a != 0;
        }
        if let Some(t) = self.target_temp_c {
            config.target_temp_c = t;
        }
        if let Some(p) = self.manual_fan_percent {
            config.manual_fan_percent = p;
        }
    }

    /// 从 JSON 对象提取补丁
    ///
    /// 只认识文档化的键，其余键静默丢弃；已知键上类型不对的值产生
    /// `invalid_type` 违例。
    pub fn from_json(body: &Value) -> (Self, Vec<ConfigViolation>) {
        let mut patch = Self::default();
        let mut violations = Vec::new();

        let obj = match body.as_object() {
            Some(obj) => obj,
            None => return (patch, violations),
        };

        for (key, value) in obj {
            match key.as_str() {
                "coreVoltage" => match value.as_u64() {
                    Some(v) => patch.core_voltage_mv = Some(v as u32),
                    None => violations.push(ConfigViolation::new("coreVoltage", "invalid_type")),
                },
                "frequency" => match value.as_u64() {
                    Some(v) => patch.frequency_mhz = Some(v as u32),
                    None => violations.push(ConfigViolation::new("frequency", "invalid_type")),
                },
                "autofanspeed" => match value.as_u64() {
                    Some(v) => patch.autofanspeed = Some(v.min(u8::MAX as u64) as u8),
                    None => violations.push(ConfigViolation::new("autofanspeed", "invalid_type")),
                },
                "targettemp" => match value.as_f64() {
                    Some(v) => patch.target_temp_c = Some(v),
                    None => violations.push(ConfigViolation::new("targettemp", "invalid_type")),
                },
                "manualFanPercent" => match value.as_f64() {
                    Some(v) => patch.manual_fan_percent = Some(v),
                    None => {
                        violations.push(ConfigViolation::new("manualFanPercent", "invalid_type"))
                    }
                },
                // 未知键静默丢弃
                _ => {}
            }
        }

        (patch, violations)
    }
}

/// 单个字段的校验违例
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ConfigViolation {
    /// 字段名（对外的补丁键名）
    pub field: String,
    /// 拒绝原因
    pub reason: String,
}

impl ConfigViolation {
    /// 创建新的违例记录
    pub fn new<F: Into<String>, R: Into<String>>(field: F, reason: R) -> Self {
        Self {
            field: field.into(),
            reason: reason.into(),
        }
    }
}

/// 配置校验入口
pub struct ConfigSurface;

impl ConfigSurface {
    /// 逐字段校验补丁
    ///
    /// 返回只含合法字段的规范化补丁和违例列表。策略是逐字段接受：
    /// 越界字段被拒绝并记录违例，同一补丁里的其余字段不受影响。
    pub fn validate(patch: &ConfigPatch, model: &ModelPreset) -> (ConfigPatch, Vec<ConfigViolation>) {
        let mut accepted = ConfigPatch::default();
        let mut violations = Vec::new();

        if let Some(v) = patch.core_voltage_mv {
            let (lo, hi) = model.core_voltage_range_mv;
            if v < lo || v > hi {
                violations.push(ConfigViolation::new("coreVoltage", "out_of_range"));
            } else {
                accepted.core_voltage_mv = Some(v);
            }
        }

        if let Some(f) = patch.frequency_mhz {
            let (lo, hi) = model.frequency_range_mhz;
            if f < lo || f > hi {
                violations.push(ConfigViolation::new("frequency", "out_of_range"));
            } else {
                accepted.frequency_mhz = Some(f);
            }
        }

        if let Some(a) = patch.autofanspeed {
            if a > 1 {
                violations.push(ConfigViolation::new("autofanspeed", "invalid_value"));
            } else {
                accepted.autofanspeed = Some(a);
            }
        }

        if let Some(t) = patch.target_temp_c {
            if !(30.0..=90.0).contains(&t) || !t.is_finite() {
                violations.push(ConfigViolation::new("targettemp", "out_of_range"));
            } else {
                accepted.target_temp_c = Some(t);
            }
        }

        if let Some(p) = patch.manual_fan_percent {
            if !(0.0..=100.0).contains(&p) || !p.is_finite() {
                violations.push(ConfigViolation::new("manualFanPercent", "out_of_range"));
            } else {
                accepted.manual_fan_percent = Some(p);
            }
        }

        (accepted, violations)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::presets::PresetRegistry;
    use serde_json::json;

    fn quad() -> std::sync::Arc<ModelPreset> {
        PresetRegistry::builtin().model("bm1370_4chip").unwrap()
    }

    #[test]
    fn test_validate_accepts_in_range() {
        let model = quad();
        let patch = ConfigPatch {
            core_voltage_mv: Some(1200),
            frequency_mhz: Some(550),
            autofanspeed: Some(0),
            target_temp_c: Some(65.0),
            manual_fan_percent: Some(80.0),
        };

        let (accepted, violations) = ConfigSurface::validate(&patch, &model);
        assert!(violations.is_empty(), "区间内的补丁不应该产生违例");
        assert_eq!(accepted, patch);
    }

    #[test]
    fn test_validate_rejects_out_of_range_voltage() {
        let model = quad();
        let patch = ConfigPatch {
            core_voltage_mv: Some(9999),
            frequency_mhz: Some(550),
            ..Default::default()
        };

        let (accepted, violations) = ConfigSurface::validate(&patch, &model);
        assert_eq!(violations.len(), 1);
        assert_eq!(violations[0], ConfigViolation::new("coreVoltage", "out_of_range"));

        // 逐字段接受：频率照常通过
        assert_eq!(accepted.core_voltage_mv, None);
        assert_eq!(accepted.frequency_mhz, Some(550));
    }

    #[test]
    fn test_validate_autofanspeed_must_be_boolean() {
        let model = quad();
        let patch = ConfigPatch {
            autofanspeed: Some(2),
            ..Default::default()
        };

        let (accepted, violations) = ConfigSurface::validate(&patch, &model);
        assert!(accepted.is_empty());
        assert_eq!(violations[0], ConfigViolation::new("autofanspeed", "invalid_value"));
    }

    #[test]
    fn test_validate_targettemp_band() {
        let model = quad();

        for bad in [29.9, 90.1, f64::NAN] {
            let patch = ConfigPatch {
                target_temp_c: Some(bad),
                ..Default::default()
            };
            let (accepted, violations) = ConfigSurface::validate(&patch, &model);
            assert!(accepted.is_empty());
            assert_eq!(violations[0].field, "targettemp");
        }

        let patch = ConfigPatch {
            target_temp_c: Some(30.0),
            ..Default::default()
        };
        let (accepted, violations) = ConfigSurface::validate(&patch, &model);
        assert!(violations.is_empty());
        assert_eq!(accepted.target_temp_c, Some(30.0));
    }

    #[test]
    fn test_from_json_drops_unknown_keys() {
        let body = json!({
            "coreVoltage": 1150,
            "frequency": 500,
            "flipMode": true,
            "stratumURL": "pool.example",
        });

        let (patch, violations) = ConfigPatch::from_json(&body);
        assert!(violations.is_empty());
        assert_eq!(patch.core_voltage_mv, Some(1150));
        assert_eq!(patch.frequency_mhz, Some(500));
        assert_eq!(patch.autofanspeed, None);
    }

    #[test]
    fn test_from_json_flags_bad_types() {
        let body = json!({ "coreVoltage": "loud", "targettemp": 58.5 });

        let (patch, violations) = ConfigPatch::from_json(&body);
        assert_eq!(patch.target_temp_c, Some(58.5));
        assert_eq!(violations.len(), 1);
        assert_eq!(violations[0].field, "coreVoltage");
        assert_eq!(violations[0].reason, "invalid_type");
    }

    #[test]
    fn test_merge_later_fields_win() {
        let mut first = ConfigPatch {
            core_voltage_mv: Some(1100),
            frequency_mhz: Some(500),
            ..Default::default()
        };
        let second = ConfigPatch {
            core_voltage_mv: Some(1250),
            target_temp_c: Some(55.0),
            ..Default::default()
        };

        first.merge_from(&second);
        assert_eq!(first.core_voltage_mv, Some(1250), "后到的字段应该覆盖");
        assert_eq!(first.frequency_mhz, Some(500), "未覆盖的字段应该保留");
        assert_eq!(first.target_temp_c, Some(55.0));
    }

    #[test]
    fn test_apply_to_config() {
        let model = quad();
        let mut config = MinerConfig::nominal(&model);
        let patch = ConfigPatch {
            autofanspeed: Some(0),
            manual_fan_percent: Some(70.0),
            ..Default::default()
        };

        patch.apply_to(&mut config);
        assert!(!config.autofanspeed);
        assert_eq!(config.manual_fan_percent, 70.0);
        assert_eq!(config.core_voltage_mv, model.core_voltage_mv, "未补丁字段保持标称值");
    }
}
