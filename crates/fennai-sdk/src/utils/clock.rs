//! 时钟抽象
//!
//! 所有持久化时间字段统一使用 UTC 毫秒时间戳。业务代码通过注入的 `Clock`
//! 取时间，测试中使用 `ManualClock` 精确控制（例如 24 小时忽略窗口）。

use std::sync::atomic::{AtomicI64, Ordering};

use chrono::Utc;

pub const MILLIS_PER_HOUR: i64 = 60 * 60 * 1000;
pub const MILLIS_PER_DAY: i64 = 24 * MILLIS_PER_HOUR;

/// 时间来源
pub trait Clock: Send + Sync + std::fmt::Debug {
    /// 当前 UTC 毫秒时间戳
    fn now_millis(&self) -> i64;
}

/// 系统时钟
#[derive(Debug, Default, Clone, Copy)]
pub struct SystemClock;

impl Clock for SystemClock {
    fn now_millis(&self) -> i64 {
        Utc::now().timestamp_millis()
    }
}

/// 手动时钟（测试用）
#[derive(Debug, Default)]
pub struct ManualClock {
    now: AtomicI64,
}

impl ManualClock {
    pub fn new(start_millis: i64) -> Self {
        Self {
            now: AtomicI64::new(start_millis),
        }
    }

    pub fn set(&self, millis: i64) {
        self.now.store(millis, Ordering::SeqCst);
    }

    pub fn advance_millis(&self, delta: i64) {
        self.now.fetch_add(delta, Ordering::SeqCst);
    }

    pub fn advance_hours(&self, hours: i64) {
        self.advance_millis(hours * MILLIS_PER_HOUR);
    }
}

impl Clock for ManualClock {
    fn now_millis(&self) -> i64 {
        self.now.load(Ordering::SeqCst)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_manual_clock_advance() {
        let clock = ManualClock::new(1_000);
        clock.advance_hours(2);
        assert_eq!(clock.now_millis(), 1_000 + 2 * MILLIS_PER_HOUR);

        clock.set(42);
        assert_eq!(clock.now_millis(), 42);
    }

    #[test]
    fn test_system_clock_is_recent() {
        // 2024-01-01 之后
        assert!(SystemClock.now_millis() > 1_704_067_200_000);
    }
}
