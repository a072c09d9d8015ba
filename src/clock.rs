//! 时钟抽象
//!
//! 模拟核心只通过 `Clock` 特征获取时间，真实时间只在节拍工作任务
//! 一处进入系统。测试中注入 `ManualClock` 即可用任意 dt 序列驱动
//! 虚拟时间。

use std::sync::Mutex;
use std::time::{Instant, SystemTime, UNIX_EPOCH};

/// 时间源特征
///
/// 返回 Unix 秒（浮点）。实现必须在进程内单调不减。
pub trait Clock: Send + Sync {
    /// 当前时间（Unix 秒）
    fn now(&self) -> f64;
}

/// 系统时钟
///
/// 启动时记录一次墙钟基准，之后用单调时钟推进，避免墙钟回拨
/// 导致 dt 为负。
pub struct SystemClock {
    epoch_unix_s: f64,
    started: Instant,
}

impl SystemClock {
    /// 创建新的系统时钟
    pub fn new() -> Self {
        let epoch_unix_s = SystemTime::now()
            .duration_since(UNIX_EPOCH)
            .map(|d| d.as_secs_f64())
            .unwrap_or(0.0);
        Self {
            epoch_unix_s,
            started: Instant::now(),
        }
    }
}

impl Default for SystemClock {
    fn default() -> Self {
        Self::new()
    }
}

impl Clock for SystemClock {
    fn now(&self) -> f64 {
        self.epoch_unix_s + self.started.elapsed().as_secs_f64()
    }
}

/// 手动时钟（测试用）
///
/// 只有显式调用 `advance`/`set` 时时间才会前进。
pub struct ManualClock {
    now_s: Mutex<f64>,
}

impl ManualClock {
    /// 以给定起始时刻创建手动时钟
    pub fn new(start_s: f64) -> Self {
        Self {
            now_s: Mutex::new(start_s),
        }
    }

    /// 推进时钟（负值被忽略）
    pub fn advance(&self, dt_s: f64) {
        let mut now = self.now_s.lock().unwrap();
        *now += dt_s.max(0.0);
    }

    /// 直接设置时间（不允许回拨）
    pub fn set(&self, now_s: f64) {
        let mut now = self.now_s.lock().unwrap();
        if now_s > *now {
            *now = now_s;
        }
    }
}

impl Clock for ManualClock {
    fn now(&self) -> f64 {
        *self.now_s.lock().unwrap()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_system_clock_monotonic() {
        let clock = SystemClock::new();
        let a = clock.now();
        let b = clock.now();
        assert!(b >= a, "系统时钟不应该倒退");
        assert!(a > 1_000_000_000.0, "系统时钟应该返回合理的Unix秒");
    }

    #[test]
    fn test_manual_clock_advance() {
        let clock = ManualClock::new(1000.0);
        assert_eq!(clock.now(), 1000.0);

        clock.advance(1.5);
        assert_eq!(clock.now(), 1001.5);

        // 负值推进被忽略
        clock.advance(-10.0);
        assert_eq!(clock.now(), 1001.5);
    }

    #[test]
    fn test_manual_clock_set_never_rewinds() {
        let clock = ManualClock::new(1000.0);
        clock.set(2000.0);
        assert_eq!(clock.now(), 2000.0);

        // 回拨被忽略
        clock.set(500.0);
        assert_eq!(clock.now(), 2000.0);
    }
}
