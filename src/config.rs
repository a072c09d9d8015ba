//! 矿队配置

use anyhow::{Context, Result};
use serde::{Deserialize, Serialize};
use std::path::Path;
use std::time::Duration;

/// 矿队运行时配置
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct FleetConfig {
    /// 模拟节拍 (Hz)
    pub tick_hz: f64,
    /// 创建矿机时的默认机型
    pub default_model_id: String,
    /// 创建矿机时的默认场景
    pub default_scenario_id: String,
    /// 矿队容量上限，超出后创建返回 FleetBusy
    pub max_miners: Option<usize>,
    /// 固定随机种子（回放与测试用），None 时混入创建时刻
    pub seed: Option<u64>,
}

impl Default for FleetConfig {
    fn default() -> Self {
        Self {
            tick_hz: 1.0,
            default_model_id: "bm1370_4chip".to_string(),
            default_scenario_id: "healthy".to_string(),
            max_miners: None,
            seed: None,
        }
    }
}

impl FleetConfig {
    /// 从 TOML 文件加载配置
    pub fn load<P: AsRef<Path>>(path: P) -> Result<Self> {
        let path = path.as_ref();
        let content = std::fs::read_to_string(path)
            .with_context(|| format!("读取配置文件失败: {}", path.display()))?;
        let config: Self = toml::from_str(&content)
            .with_context(|| format!("解析配置文件失败: {}", path.display()))?;
        config.validate()?;
        Ok(config)
    }

    /// 校验配置
    pub fn validate(&self) -> Result<()> {
        anyhow::ensure!(
            self.tick_hz.is_finite() && self.tick_hz >= 0.1 && self.tick_hz <= 100.0,
            "tick_hz 必须在 0.1 到 100 之间: {}",
            self.tick_hz
        );
        anyhow::ensure!(!self.default_model_id.is_empty(), "默认机型ID不能为空");
        anyhow::ensure!(!self.default_scenario_id.is_empty(), "默认场景ID不能为空");
        if let Some(limit) = self.max_miners {
            anyhow::ensure!(limit >= 1, "矿队容量上限至少为 1");
        }
        Ok(())
    }

    /// 节拍周期
    pub fn tick_period(&self) -> Duration {
        Duration::from_secs_f64(1.0 / self.tick_hz.clamp(0.1, 100.0))
    }
}
