//! 错误类型定义

use thiserror::Error;

/// 矿队运行时错误
///
/// 面向调用方的操作（创建/删除/快照/配置/重启）返回这些错误；
/// 节拍内部的数值故障在引擎里就地恢复并记录日志，永远不会传播
/// 到这里。
#[derive(Error, Debug)]
pub enum FleetError {
    #[error("矿机未找到: {miner_id}")]
    MinerNotFound { miner_id: String },

    #[error("机型预设未找到: {model_id}")]
    ModelNotFound { model_id: String },

    #[error("场景预设未找到: {scenario_id}")]
    ScenarioNotFound { scenario_id: String },

    #[error("矿队容量已满: 上限 {limit} 台")]
    FleetBusy { limit: usize },

    #[error("运行时错误: {message}")]
    Runtime { message: String },
}

impl FleetError {
    /// 创建矿机未找到错误
    pub fn miner_not_found<S: Into<String>>(miner_id: S) -> Self {
        Self::MinerNotFound {
            miner_id: miner_id.into(),
        }
    }

    /// 创建机型预设未找到错误
    pub fn model_not_found<S: Into<String>>(model_id: S) -> Self {
        Self::ModelNotFound {
            model_id: model_id.into(),
        }
    }

    /// 创建场景预设未找到错误
    pub fn scenario_not_found<S: Into<String>>(scenario_id: S) -> Self {
        Self::ScenarioNotFound {
            scenario_id: scenario_id.into(),
        }
    }

    /// 创建运行时错误
    pub fn runtime<S: Into<String>>(message: S) -> Self {
        Self::Runtime {
            message: message.into(),
        }
    }

    /// 是否属于"资源未找到"一类（HTTP 层据此映射 404）
    pub fn is_not_found(&self) -> bool {
        matches!(
            self,
            Self::MinerNotFound { .. } | Self::ModelNotFound { .. } | Self::ScenarioNotFound { .. }
        )
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_not_found_classification() {
        assert!(FleetError::miner_not_found("m_001").is_not_found());
        assert!(FleetError::model_not_found("bm9999").is_not_found());
        assert!(FleetError::scenario_not_found("nope").is_not_found());
        assert!(!FleetError::FleetBusy { limit: 8 }.is_not_found());
        assert!(!FleetError::runtime("lock poisoned").is_not_found());
    }

    #[test]
    fn test_error_display() {
        let err = FleetError::miner_not_found("m_042");
        assert!(err.to_string().contains("m_042"));
    }
}
