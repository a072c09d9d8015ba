//! AxeSim Core - 虚拟 ASIC 矿机矿队模拟核心
//!
//! 在单个进程里运行大量虚拟比特币矿机，为上层管理面（仪表盘、
//! 控制器、基准工具）提供确定性的、无副作用的测试床：遥测、热行为、
//! 份额统计和配置面都模仿真实设备。
//!
//! ## 架构要点
//!
//! ### 确定性模拟
//! - 每台矿机持有独立的种子化随机数流
//! - 真实时间只通过可注入的 `Clock` 进入系统
//! - 相同的 (预设, 场景, 种子, dt 序列) 复现逐位一致的遥测轨迹
//!
//! ### 并发安全的控制面
//! - 矿队级读写锁只保护 id→矿机 映射
//! - 每台矿机由自己的互斥锁保护，快照不会读到撕裂状态
//! - 配置补丁进入待生效队列，下一个节拍统一应用
//!
//! ### 故障隔离
//! - 单台矿机的数值故障就地恢复，矿队永不停摆
//! - 节拍落后时下一拍携带更大的 dt，由引擎截断

pub mod clock;
pub mod config;
pub mod config_surface;
pub mod engine;
pub mod error;
pub mod fleet;
pub mod presets;
pub mod rng;
pub mod state;
pub mod telemetry;

pub use clock::{Clock, ManualClock, SystemClock};
pub use config::FleetConfig;
pub use config_surface::{ConfigPatch, ConfigSurface, ConfigViolation, MinerConfig};
pub use engine::SimulationEngine;
pub use error::FleetError;
pub use fleet::{FleetRuntime, MinerSummary, PatchOutcome};
pub use presets::{ModelPreset, PresetRegistry, ScenarioPreset};
pub use rng::MinerRng;
pub use state::{MinerState, PoolState};
pub use telemetry::TelemetrySnapshot;

/// 库版本
pub const VERSION: &str = env!("CARGO_PKG_VERSION");

/// 库名称
pub const NAME: &str = "axesim-core";

/// 初始化日志系统
///
/// 遵循 RUST_LOG 环境变量，未设置时默认 info 级别。测试或嵌入方
/// 已经装过订阅器时重复调用是无害的。
pub fn init_tracing() {
    use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

    let _ = tracing_subscriber::registry()
        .with(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "axesim_core=info".into()),
        )
        .with(tracing_subscriber::fmt::layer())
        .try_init();
}
